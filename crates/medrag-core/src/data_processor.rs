//! Turns files on disk into [`SourceContent`] ready for ingestion.
//!
//! Plain text and markdown are read as-is; HTML is reduced to its visible
//! text with `scraper` before chunking.

use scraper::{ElementRef, Html, Node};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::types::{SourceContent, SourceMetadata};

const TEXT_EXTENSIONS: [&str; 3] = ["txt", "md", "markdown"];
const HTML_EXTENSIONS: [&str; 2] = ["html", "htm"];
const HIDDEN_ELEMENTS: [&str; 5] = ["script", "style", "noscript", "template", "head"];
/// Elements that break text apart; inline markup joins with its neighbours.
const BLOCK_ELEMENTS: [&str; 36] = [
    "address", "article", "aside", "blockquote", "body", "br", "caption", "dd", "div", "dl", "dt", "figcaption",
    "figure", "footer", "form", "h1", "h2", "h3", "h4", "h5", "h6", "header", "hr", "li", "main", "nav", "ol", "p",
    "pre", "section", "table", "td", "th", "tr", "ul", "html",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileKind {
    Text,
    Html,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DataProcessor;

impl DataProcessor {
    pub fn new() -> Self { Self }

    /// Load a single file with caller-provided metadata.
    pub fn process_file(&self, path: &Path, metadata: SourceMetadata) -> Result<SourceContent> {
        let kind = file_kind(path).ok_or_else(|| {
            Error::InvalidConfig(format!("unsupported file type: {}", path.display()))
        })?;
        let raw = self.read_file_content(path)?;
        let text = match kind {
            FileKind::Text => raw,
            FileKind::Html => strip_html(&raw),
        };
        Ok(SourceContent::new(text, metadata))
    }

    /// Load every supported file below `data_dir`, sorted by path.
    ///
    /// Each file inherits `template`; its `source` becomes the path relative to
    /// `data_dir` without extension, and a missing `section` is filled from the
    /// first-level subdirectory.
    pub fn process_directory(&self, data_dir: &Path, template: &SourceMetadata) -> Result<Vec<SourceContent>> {
        if !data_dir.is_dir() {
            return Err(Error::InvalidConfig(format!("not a directory: {}", data_dir.display())));
        }
        let files = self.list_files(data_dir);
        if files.is_empty() {
            info!(dir = %data_dir.display(), "no ingestible files found");
            return Ok(vec![]);
        }
        let mut sources = Vec::with_capacity(files.len());
        for (file_index, file_path) in files.iter().enumerate() {
            debug!("Processing file {}/{}: {}", file_index + 1, files.len(), file_path.display());
            let mut metadata = template.clone();
            metadata.source = self.source_name(file_path, data_dir);
            if metadata.section.is_none() {
                metadata.section = self.section_from_path(file_path, data_dir);
            }
            let source = self.process_file(file_path, metadata)?;
            if source.text.trim().is_empty() { continue; }
            sources.push(source);
        }
        info!(files = files.len(), sources = sources.len(), dir = %data_dir.display(), "loaded directory");
        Ok(sources)
    }

    fn read_file_content(&self, file_path: &Path) -> Result<String> {
        match fs::read_to_string(file_path) {
            Ok(content) => Ok(content),
            Err(_) => Ok(String::from_utf8_lossy(&fs::read(file_path)?).to_string()),
        }
    }

    fn source_name(&self, file_path: &Path, data_dir: &Path) -> String {
        let relative = file_path.strip_prefix(data_dir).unwrap_or(file_path);
        let stem = relative.with_extension("");
        stem.components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/")
    }

    fn section_from_path(&self, file_path: &Path, data_dir: &Path) -> Option<String> {
        let relative = file_path.strip_prefix(data_dir).ok()?;
        let mut components = relative.components();
        let first = components.next()?;
        // A bare file at the root has no section.
        components.next()?;
        Some(first.as_os_str().to_string_lossy().into_owned())
    }

    fn list_files(&self, root: &Path) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = walkdir::WalkDir::new(root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| file_kind(p).is_some())
            .collect();
        files.sort();
        files
    }
}

fn file_kind(path: &Path) -> Option<FileKind> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    if TEXT_EXTENSIONS.contains(&ext.as_str()) {
        Some(FileKind::Text)
    } else if HTML_EXTENSIONS.contains(&ext.as_str()) {
        Some(FileKind::Html)
    } else {
        None
    }
}

/// Visible text of an HTML document. `script`, `style`, `noscript` and
/// `template` contents are dropped, block elements and `<br>` become
/// spaces, and whitespace is collapsed.
pub fn strip_html(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut raw = String::new();
    push_visible_text(document.root_element(), &mut raw);
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn push_visible_text(element: ElementRef<'_>, out: &mut String) {
    let name = element.value().name();
    if HIDDEN_ELEMENTS.contains(&name) { return; }
    let block = BLOCK_ELEMENTS.contains(&name);
    if block { out.push(' '); }
    for child in element.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(_) => {
                if let Some(el) = ElementRef::wrap(child) { push_visible_text(el, out); }
            }
            _ => {}
        }
    }
    if block { out.push(' '); }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_tags_and_hidden_elements() {
        let html = r#"<html><head><title>T</title><style>p { color: red }</style></head>
            <body><h1>The Heart</h1><script>alert(1)</script>
            <p>Four   chambers pump <b>blood</b>.</p></body></html>"#;
        let text = strip_html(html);
        assert_eq!(text, "The Heart Four chambers pump blood.");
        assert!(!text.contains("alert"));
        assert!(!text.contains("color"));
    }

    #[test]
    fn inline_markup_does_not_split_words() {
        assert_eq!(
            strip_html("<p>Normal hemo<b>globin</b> is 13.5<sub>g/dL</sub>.</p>"),
            "Normal hemoglobin is 13.5g/dL."
        );
        assert_eq!(strip_html("<ul><li>Aorta</li><li>Vena cava</li></ul>Line<br>break"), "Aorta Vena cava Line break");
    }

    #[test]
    fn unsupported_extension_is_config_error() {
        let processor = DataProcessor::new();
        let err = processor.process_file(Path::new("scan.pdf"), SourceMetadata::new("scan")).unwrap_err();
        assert!(err.is_config());
    }
}
