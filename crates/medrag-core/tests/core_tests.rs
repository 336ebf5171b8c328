use std::fs;
use std::io::Write;
use tempfile::TempDir;

use medrag_core::chunker::{chunk_text, ChunkingConfig};
use medrag_core::data_processor::DataProcessor;
use medrag_core::types::{BodySystem, SourceMetadata};

#[test]
fn process_directory_single_small_file() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path();
    let file_path = dir.join("a.txt");
    let mut f = fs::File::create(&file_path).unwrap();
    writeln!(f, "Short text").unwrap();

    let processor = DataProcessor::new();
    let sources = processor.process_directory(dir, &SourceMetadata::default()).expect("process");

    assert_eq!(sources.len(), 1);
    assert_eq!(sources[0].text.trim(), "Short text");
    assert_eq!(sources[0].metadata.source, "a");
    assert_eq!(sources[0].metadata.section, None);

    let chunks = chunk_text(&sources[0].text, &ChunkingConfig::default()).unwrap();
    assert_eq!(chunks.len(), 1, "one small file becomes one chunk");
}

#[test]
fn process_directory_mixed_formats_sorted_with_sections() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path();
    fs::create_dir_all(dir.join("cardio")).unwrap();
    fs::write(dir.join("cardio/heart.html"), "<p>The <em>heart</em> pumps.</p><script>x()</script>").unwrap();
    fs::write(dir.join("cardio/vessels.md"), "# Vessels\nArteries carry blood away.").unwrap();
    fs::write(dir.join("lungs.txt"), "Alveoli exchange gases.").unwrap();
    fs::write(dir.join("ignored.pdf"), "binary").unwrap();
    fs::write(dir.join("empty.txt"), "   ").unwrap();

    let template = SourceMetadata::default().with_body_system(BodySystem::Cardiovascular);
    let sources = DataProcessor::new().process_directory(dir, &template).expect("process");

    let names: Vec<&str> = sources.iter().map(|s| s.metadata.source.as_str()).collect();
    assert_eq!(names, vec!["cardio/heart", "cardio/vessels", "lungs"]);
    assert_eq!(sources[0].text, "The heart pumps.");
    assert_eq!(sources[0].metadata.section.as_deref(), Some("cardio"));
    assert_eq!(sources[2].metadata.section, None);
    assert!(sources.iter().all(|s| s.metadata.body_system == Some(BodySystem::Cardiovascular)));
}

#[test]
fn process_directory_rejects_missing_dir() {
    let tmp = TempDir::new().unwrap();
    let err = DataProcessor::new()
        .process_directory(&tmp.path().join("nope"), &SourceMetadata::default())
        .unwrap_err();
    assert!(err.is_config());
}
