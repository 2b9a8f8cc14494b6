//! Reading the three container layouts and moving entries between them.

use pakvault::codec::gzip_bytes;
use pakvault::progress::ProgressSink;
use pakvault::{
    to_canonical, BundleWriter, Container, ContainerState, EntryFlags, FormatKind, OpenOptions,
    OpenPolicy, PakError, PakWriter, SaveStrategy, SharedProgress, TracingReporter, IMPORT_PREFIX,
};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::TempDir;

/// Helper: raw gzip record stream, one 'f' record per file
fn gzip_records(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut raw = Vec::new();
    for (name, data) in files {
        raw.push(b'f');
        raw.extend_from_slice(&(name.len() as u32 + 1).to_le_bytes());
        raw.extend_from_slice(name.as_bytes());
        raw.push(0);
        raw.extend_from_slice(&(data.len() as u32).to_le_bytes());
        raw.extend_from_slice(data);
    }
    raw.push(b'e');
    raw
}

fn write_gzip(dir: &Path, name: &str, files: &[(&str, &[u8])]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, gzip_bytes(&gzip_records(files)).unwrap()).unwrap();
    path
}

/// Records every published percentage
#[derive(Default)]
struct Percentages(Mutex<Vec<u8>>);

impl ProgressSink for Percentages {
    fn on_progress(&self, percent: u8) {
        self.0.lock().unwrap().push(percent);
    }
}

#[test]
fn test_gzip_single_record() {
    let temp = TempDir::new().unwrap();
    let path = write_gzip(temp.path(), "one.gz", &[("a.txt", b"ABC")]);

    let container = Container::open(&path, OpenOptions::default()).unwrap();
    assert_eq!(container.kind(), Some(FormatKind::GzipRecords));
    assert_eq!(container.len(), 1);

    let entry = container.entry("a.txt").unwrap();
    assert!(entry.is_file());
    assert_eq!(entry.decompressed_size, 3);
    assert_eq!(container.read("a.txt").unwrap(), b"ABC");
}

#[test]
fn test_reads_are_repeatable() {
    let temp = TempDir::new().unwrap();
    let path = write_gzip(
        temp.path(),
        "multi.gz",
        &[("x/1.bin", &[1u8; 300]), ("x/2.bin", &[2u8; 10]), ("y.txt", b"why")],
    );
    let container = Container::open(&path, OpenOptions::default()).unwrap();

    // Interleave reads; each must see the same bytes every time
    for _ in 0..3 {
        assert_eq!(container.read("y.txt").unwrap(), b"why");
        assert_eq!(container.read("x/1.bin").unwrap(), vec![1u8; 300]);
        assert_eq!(container.read("x/2.bin").unwrap(), vec![2u8; 10]);
    }
}

#[test]
fn test_gzip_to_canonical_round_trip() {
    let temp = TempDir::new().unwrap();
    let source_path = write_gzip(
        temp.path(),
        "src.gz",
        &[("docs/readme.txt", b"hello from gzip"), ("bin/blob", &[9u8; 5000])],
    );
    let target = temp.path().join("out.pak");

    let source = Container::open(&source_path, OpenOptions::default()).unwrap();
    let mut canonical = to_canonical(source, &target).unwrap();
    assert_eq!(SaveStrategy::recommend(&canonical), SaveStrategy::FullRewrite);
    canonical.save(SaveStrategy::FullRewrite).unwrap();
    drop(canonical);

    let reopened = Container::open(&target, OpenOptions::default()).unwrap();
    assert_eq!(reopened.kind(), Some(FormatKind::Pak));
    let paths: Vec<_> = reopened.entries().map(|e| e.path.clone()).collect();
    assert_eq!(
        paths,
        vec![
            format!("{}docs/readme.txt", IMPORT_PREFIX),
            format!("{}bin/blob", IMPORT_PREFIX),
        ]
    );
    assert_eq!(
        reopened.read("import/docs/readme.txt").unwrap(),
        b"hello from gzip"
    );
    assert_eq!(reopened.read("import/bin/blob").unwrap(), vec![9u8; 5000]);
}

#[test]
fn test_bundle_lzss_bytes_survive_conversion() {
    let temp = TempDir::new().unwrap();
    let bundle_path = temp.path().join("level.bndl");
    let texture = b"tile".repeat(400);

    let mut writer = BundleWriter::new();
    writer.add_file("tex/tile.raw", &texture, EntryFlags::FILE).unwrap();
    std::fs::write(&bundle_path, writer.finish(Vec::new()).unwrap()).unwrap();

    let source = Container::open(&bundle_path, OpenOptions::default()).unwrap();
    let packed = source.read_compressed("tex/tile.raw").unwrap();
    assert!(packed.len() < texture.len());

    let target = temp.path().join("level.pak");
    let mut canonical = to_canonical(source, &target).unwrap();
    let report = canonical.save(SaveStrategy::FullRewrite).unwrap();
    assert_eq!(report.copied, 1);
    assert_eq!(report.encoded, 0);

    let entry = canonical.entry("import/tex/tile.raw").unwrap();
    assert!(entry.flags.contains(EntryFlags::LZSS));
    assert_eq!(canonical.read_compressed("import/tex/tile.raw").unwrap(), packed);
    assert_eq!(canonical.read("import/tex/tile.raw").unwrap(), texture);
}

#[test]
fn test_lzss_entry_with_inflated_size_fails_to_read() {
    let temp = TempDir::new().unwrap();
    let bundle_path = temp.path().join("inflated.bndl");
    let packed = pakvault::codec::lzss::compress(b"small payload");

    let mut writer = BundleWriter::new();
    writer
        .add_lzss("tex/huge.raw", packed, u64::from(u32::MAX))
        .unwrap();
    writer.add_file("ok.txt", b"fine", EntryFlags::FILE).unwrap();
    std::fs::write(&bundle_path, writer.finish(Vec::new()).unwrap()).unwrap();

    let container = Container::open(&bundle_path, OpenOptions::default()).unwrap();
    assert!(matches!(
        container.read("tex/huge.raw"),
        Err(PakError::DecompressionFailed(_))
    ));
    assert_eq!(container.read("ok.txt").unwrap(), b"fine");
}

#[test]
fn test_pak_written_directly_is_readable() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("direct.pak");

    let mut writer = PakWriter::create(&path).unwrap();
    writer.add_file("a.txt", b"alpha").unwrap();
    writer.add_directory("empty").unwrap();
    writer.add_file("nested/b.json", br#"{"b":1}"#).unwrap();
    writer.finalize().unwrap();

    let container = Container::open(&path, OpenOptions::default()).unwrap();
    assert_eq!(container.state(), ContainerState::Normal);
    assert_eq!(container.len(), 3);
    assert!(container.entry("empty").unwrap().is_directory());
    assert_eq!(container.read("nested/b.json").unwrap(), br#"{"b":1}"#);
}

#[test]
fn test_export_gzip_records_reopens() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("src.pak");
    let mut container =
        Container::open(&path, OpenOptions::new().policy(OpenPolicy::CreateNew)).unwrap();
    container.add_bytes("a.txt", b"ABC".to_vec()).unwrap();
    container.add_bytes("dir/b.txt", b"bee".to_vec()).unwrap();

    let out = temp.path().join("exported.gz");
    container.save(SaveStrategy::ExportGzipRecords(out.clone())).unwrap();

    let exported = Container::open(&out, OpenOptions::default()).unwrap();
    assert_eq!(exported.kind(), Some(FormatKind::GzipRecords));
    assert_eq!(exported.read("a.txt").unwrap(), b"ABC");
    assert_eq!(exported.read("dir/b.txt").unwrap(), b"bee");
}

#[test]
fn test_unknown_magic_is_rejected() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("junk.bin");
    std::fs::write(&path, b"definitely not an archive").unwrap();

    let err = Container::open(&path, OpenOptions::default()).unwrap_err();
    assert!(err.is_data_error());
}

#[test]
fn test_gzip_load_splits_progress_between_unwrap_and_table() {
    let temp = TempDir::new().unwrap();
    let names: Vec<String> = (0..200).map(|i| format!("dir/file{:03}.txt", i)).collect();
    let files: Vec<(&str, &[u8])> = names.iter().map(|n| (n.as_str(), &b"body"[..])).collect();
    let path = write_gzip(temp.path(), "many.gz", &files);

    let progress = Percentages::default();
    let container = Container::load(&path, OpenOptions::default(), &progress, &TracingReporter);
    assert_eq!(container.state(), ContainerState::Normal);
    assert_eq!(container.len(), 200);

    let seen = progress.0.lock().unwrap();
    assert!(seen.windows(2).all(|w| w[0] < w[1]), "{:?}", seen);
    let unwrapped = seen.iter().position(|&p| p == 50).expect("unwrap band ends at 50");
    assert!(seen[unwrapped + 1..].iter().any(|&p| p > 50 && p < 100));
    assert_eq!(seen.last(), Some(&100));

    let shared = SharedProgress::default();
    let again = Container::load(&path, OpenOptions::default(), &shared, &TracingReporter);
    assert_eq!(again.len(), 200);
    assert_eq!(shared.percent(), 100);
    assert!(shared.is_finished());
}

#[test]
fn test_converted_container_keeps_the_passphrase() {
    let temp = TempDir::new().unwrap();
    let source_path = write_gzip(temp.path(), "plain.gz", &[("a.txt", b"sealed later")]);
    let source = Container::open(&source_path, OpenOptions::new().passphrase("pw")).unwrap();

    let target = temp.path().join("sealed.pak");
    let mut canonical = to_canonical(source, &target).unwrap();
    canonical.encrypt("import/a.txt").unwrap();
    canonical.save(SaveStrategy::FullRewrite).unwrap();
    drop(canonical);

    let locked = Container::open(&target, OpenOptions::default()).unwrap();
    assert!(matches!(
        locked.read("import/a.txt"),
        Err(PakError::MissingKey(_))
    ));
    drop(locked);

    let unlocked = Container::open(&target, OpenOptions::new().passphrase("pw")).unwrap();
    assert_eq!(unlocked.read("import/a.txt").unwrap(), b"sealed later");
}
