use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "medrag")]
#[command(about = "Local retrieval-augmented context for medical education content", long_about = None)]
pub struct Cli {
    #[arg(long, global = true, default_value = ".", help = "Base directory for relative store and corpus paths")]
    pub base: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Ingest a directory of .txt, .md and .html files into a collection")]
    Ingest {
        #[arg(help = "Directory to ingest")]
        dir: PathBuf,

        #[arg(short, long, help = "Target collection")]
        collection: String,

        #[arg(long, help = "Body system assigned to every document")]
        system: Option<String>,

        #[arg(long, help = "Complexity level (1-5) assigned to every document")]
        complexity: Option<u8>,
    },

    #[command(about = "Retrieve context for a free-text query")]
    Query {
        #[arg(help = "The query text")]
        query: String,

        #[command(flatten)]
        filters: FilterArgs,
    },

    #[command(about = "Retrieve context for a structure, symptom or lab test")]
    Lookup {
        #[arg(value_enum, help = "Kind of lookup")]
        kind: LookupKind,

        #[arg(help = "Structure, symptom or lab test name")]
        name: String,

        #[arg(long, help = "Lab result value")]
        value: Option<String>,

        #[command(flatten)]
        filters: FilterArgs,
    },

    #[command(about = "Populate every configured collection from the baseline corpus")]
    Populate,

    #[command(about = "Show document counts per collection")]
    Status,
}

#[derive(clap::Args)]
pub struct FilterArgs {
    #[arg(long, help = "Restrict to one body system")]
    pub system: Option<String>,

    #[arg(long, help = "Highest complexity level to include (1-5)")]
    pub max_complexity: Option<u8>,

    #[arg(long, help = "Token budget for the assembled context")]
    pub max_tokens: Option<usize>,

    #[arg(short, long, help = "Collections to search (defaults to all configured)")]
    pub collection: Vec<String>,

    #[arg(long, help = "Print the context as JSON")]
    pub json: bool,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum LookupKind {
    Structure,
    Symptom,
    Lab,
}
