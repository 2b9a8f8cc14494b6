//! Loading engine configuration from TOML.

use pakvault::{Container, OpenOptions, OpenPolicy, PakConfig, PakError, SaveStrategy};
use tempfile::TempDir;

#[test]
fn test_load_from_file() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("pakvault.toml");
    std::fs::write(
        &path,
        r#"
zstd_level = 9
min_compression_size = 128
worker_threads = 2
parallel_threshold = 16
text_encoding = "euc-kr"
"#,
    )
    .unwrap();

    let config = PakConfig::load(&path).unwrap();
    assert_eq!(config.zstd_level, 9);
    assert_eq!(config.min_compression_size, 128);
    assert_eq!(config.worker_count(), 2);
    assert_eq!(config.parallel_threshold, 16);
    assert_eq!(config.encoding().unwrap().name(), "EUC-KR");
}

#[test]
fn test_missing_keys_use_defaults() {
    let config = PakConfig::from_toml_str("zstd_level = 5").unwrap();
    let defaults = PakConfig::default();
    assert_eq!(config.zstd_level, 5);
    assert_eq!(config.parallel_threshold, defaults.parallel_threshold);
    assert_eq!(config.text_encoding, "utf-8");
    assert_eq!(config.scratch_root(), std::env::temp_dir());
}

#[test]
fn test_invalid_values_rejected() {
    for text in [
        "zstd_level = 0",
        "worker_threads = 0",
        "text_encoding = \"klingon\"",
        "unknown_key = true",
    ] {
        let err = PakConfig::from_toml_str(text).unwrap_err();
        assert!(matches!(err, PakError::Config(_)), "{} gave {:?}", text, err);
    }
}

#[test]
fn test_config_flows_into_saves() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("configured.pak");
    // Threshold above the payload size keeps it stored raw
    let config = PakConfig::from_toml_str("min_compression_size = 100000").unwrap();
    let mut container = Container::open(
        &path,
        OpenOptions::new()
            .policy(OpenPolicy::CreateNew)
            .config(config),
    )
    .unwrap();
    container.add_bytes("big.txt", b"x".repeat(8000)).unwrap();
    container.save(SaveStrategy::FullRewrite).unwrap();

    let entry = container.entry("big.txt").unwrap();
    assert_eq!(entry.stored_size, 8000);
    assert_eq!(entry.compressed_size, -1);
}
