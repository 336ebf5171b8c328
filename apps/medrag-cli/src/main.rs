use anyhow::Context;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;
use tracing_subscriber::EnvFilter;

use medrag_core::config::Config;
use medrag_core::progress::{IngestProgress, IngestStage};
use medrag_core::types::{BodySystem, CollectionName, ComplexityLevel, MetadataFilter, SourceMetadata};
use medrag_rag::{IngestOptions, Lookup, RagRuntime, RetrievalOptions, RetrievedContext};

mod cli;

use cli::{Cli, Commands, FilterArgs, LookupKind};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn retrieval_options(args: &FilterArgs) -> anyhow::Result<RetrievalOptions> {
    let filter = MetadataFilter {
        body_system: args.system.as_deref().map(str::parse::<BodySystem>).transpose()?,
        max_complexity: args.max_complexity.map(ComplexityLevel::new).transpose()?,
        ..MetadataFilter::default()
    };
    let collections = if args.collection.is_empty() {
        None
    } else {
        Some(args.collection.iter().map(|c| CollectionName::new(c.as_str())).collect::<Result<Vec<_>, _>>()?)
    };
    Ok(RetrievalOptions { max_tokens: args.max_tokens, filter, collections, min_score: None })
}

fn print_context(ctx: &RetrievedContext, as_json: bool) -> anyhow::Result<()> {
    if as_json {
        let value = json!({
            "query": ctx.query,
            "context": ctx.to_prompt_block(),
            "citations": ctx.citations,
            "stats": ctx.stats(),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }
    if ctx.is_empty() {
        println!("No matching context for: {}", ctx.query);
        return Ok(());
    }
    println!("{}\n", ctx.to_prompt_block());
    println!("Sources:");
    for c in &ctx.citations {
        let section = c.section.as_deref().map(|s| format!(" ({})", s)).unwrap_or_default();
        println!("  [{}] {}{}", c.index, c.source, section);
    }
    let stats = ctx.stats();
    println!("\n{} chunks, {} tokens, {} ms", stats.chunks_used, stats.total_tokens, stats.processing_time_ms);
    Ok(())
}

/// Drive a progress bar from ingestion events until the sender is dropped.
fn spawn_progress_bar() -> anyhow::Result<(tokio::sync::mpsc::UnboundedSender<IngestProgress>, tokio::task::JoinHandle<()>)> {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<IngestProgress>();
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );
    let handle = tokio::spawn(async move {
        while let Some(ev) = rx.recv().await {
            pb.set_length(ev.total as u64);
            pb.set_position(ev.current as u64);
            pb.set_message(format!("{}: {}", ev.stage, ev.message));
            if ev.stage == IngestStage::Complete { pb.finish_with_message(ev.message); }
        }
        if !pb.is_finished() { pb.abandon(); }
    });
    Ok((tx, handle))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = Config::load().context("loading configuration")?;
    let settings = config.rag()?;
    let runtime = RagRuntime::from_settings(settings, &cli.base)?;
    runtime.scoped(run(&runtime, cli.command)).await
}

async fn run(runtime: &RagRuntime, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Ingest { dir, collection, system, complexity } => {
            let collection = CollectionName::new(collection)?;
            let mut template = SourceMetadata::default();
            if let Some(system) = system { template = template.with_body_system(system.parse()?); }
            if let Some(level) = complexity { template = template.with_complexity(ComplexityLevel::new(level)?); }
            let (tx, bar) = spawn_progress_bar()?;
            let options = IngestOptions::from_settings(&runtime.settings).with_progress(tx);
            let report = runtime.pipeline.ingest_directory(&collection, &dir, &template, &options).await;
            drop(options);
            let _ = bar.await;
            let report = report?;
            println!(
                "Ingested {} documents ({} chunks, ~{} tokens) into '{}' in {:.2?}",
                report.documents_ingested, report.chunks_created, report.estimated_tokens, collection, report.elapsed
            );
        }
        Commands::Query { query, filters } => {
            let options = retrieval_options(&filters)?;
            runtime.cache.ensure_populated().await?;
            let ctx = runtime.engine.retrieve(&query, &options).await?;
            print_context(&ctx, filters.json)?;
        }
        Commands::Lookup { kind, name, value, filters } => {
            let options = retrieval_options(&filters)?;
            let lookup = match kind {
                LookupKind::Structure => Lookup::Structure(name),
                LookupKind::Symptom => Lookup::Symptom(name),
                LookupKind::Lab => Lookup::Lab { name, value },
            };
            runtime.cache.ensure_populated().await?;
            let ctx = runtime.engine.lookup(&lookup, &options, None).await?;
            print_context(&ctx, filters.json)?;
        }
        Commands::Populate => {
            runtime.cache.ensure_populated().await?;
            for collection in runtime.cache.collections() {
                println!("{:<16} {}", collection, runtime.store.count(collection).await?);
            }
        }
        Commands::Status => {
            let configured: Vec<CollectionName> = runtime.settings.collection_names()?;
            let stored = runtime.store.collections().await?;
            for collection in configured.iter().chain(stored.iter().filter(|c| !configured.contains(*c))) {
                println!("{:<16} {}", collection, runtime.store.count(collection).await?);
            }
            println!("backend: {:?}, embedder: {:?}", runtime.settings.backend, runtime.settings.embedder);
        }
    }
    Ok(())
}
