//! Staged edits applied through each save strategy, checked by reopening.

use pakvault::codec::gzip_bytes;
use pakvault::{
    pad_entry, Container, EntryFlags, ModFlags, OpenOptions, OpenPolicy, PakError, PakWriter,
    SaveStrategy,
};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn new_container(path: &Path) -> Container {
    Container::open(path, OpenOptions::new().policy(OpenPolicy::CreateNew)).unwrap()
}

fn reopen(path: &Path) -> Container {
    Container::open(path, OpenOptions::default()).unwrap()
}

fn sample_pak(dir: &Path, name: &str, files: &[(&str, &[u8])]) -> PathBuf {
    let path = dir.join(name);
    let mut writer = PakWriter::create(&path).unwrap();
    for (file, data) in files {
        writer.add_file(file, data).unwrap();
    }
    writer.finalize().unwrap();
    path
}

#[test]
fn test_full_rewrite_applies_removal_and_rename() {
    let temp = TempDir::new().unwrap();
    let path = sample_pak(
        temp.path(),
        "edit.pak",
        &[("keep.txt", b"keep"), ("drop.txt", b"drop"), ("old.txt", b"moved")],
    );
    let mut container = reopen(&path);

    container.remove("drop.txt").unwrap();
    container.rename("old.txt", "new/name.txt").unwrap();
    assert!(!container.contains("drop.txt"));
    assert_eq!(SaveStrategy::recommend(&container), SaveStrategy::FullRewrite);

    let report = container.save(SaveStrategy::FullRewrite).unwrap();
    assert_eq!(report.entries, 2);
    assert!(!container.is_modified());
    drop(container);

    let reopened = reopen(&path);
    let paths: Vec<_> = reopened.entries().map(|e| e.path.clone()).collect();
    assert_eq!(paths, vec!["keep.txt", "new/name.txt"]);
    assert_eq!(reopened.read("new/name.txt").unwrap(), b"moved");
}

#[test]
fn test_in_place_patch_keeps_existing_payloads() {
    let temp = TempDir::new().unwrap();
    let path = sample_pak(temp.path(), "patch.pak", &[("a.bin", &[1u8; 4096])]);
    let mut container = reopen(&path);
    let original_offset = container.entry("a.bin").unwrap().offset;

    container.add_bytes("b.txt", b"appended".to_vec()).unwrap();
    assert_eq!(SaveStrategy::recommend(&container), SaveStrategy::InPlacePatch);
    let report = container.save(SaveStrategy::InPlacePatch).unwrap();
    assert_eq!(report.encoded, 1);
    assert_eq!(report.copied, 0);

    assert_eq!(container.entry("a.bin").unwrap().offset, original_offset);
    assert_eq!(container.read("a.bin").unwrap(), vec![1u8; 4096]);
    assert_eq!(container.read("b.txt").unwrap(), b"appended");
}

#[test]
fn test_compact_shares_duplicates() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("dupes.pak");
    let mut container = new_container(&path);
    let body = b"duplicate payload ".repeat(500);
    for name in ["one.dat", "two.dat", "three.dat"] {
        container.add_bytes(name, body.clone()).unwrap();
    }
    container.save(SaveStrategy::FullRewrite).unwrap();
    let before = std::fs::metadata(&path).unwrap().len();

    let report = container.save(SaveStrategy::Compact).unwrap();
    assert_eq!(report.shared, 2);
    assert!(std::fs::metadata(&path).unwrap().len() < before);
    drop(container);

    let reopened = reopen(&path);
    let offsets: Vec<_> = reopened.entries().map(|e| e.offset).collect();
    assert!(offsets.windows(2).all(|w| w[0] == w[1]));
    for name in ["one.dat", "two.dat", "three.dat"] {
        assert_eq!(reopened.read(name).unwrap(), body);
    }
}

#[test]
fn test_encrypted_entries_need_the_passphrase() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("sealed.pak");
    let mut container = new_container(&path);
    container.set_passphrase("correct horse").unwrap();
    container.add_bytes("secret.txt", b"top secret".to_vec()).unwrap();
    container.add_bytes("public.txt", b"hello".to_vec()).unwrap();
    container.encrypt("secret.txt").unwrap();
    container.save(SaveStrategy::FullRewrite).unwrap();
    drop(container);

    let locked = reopen(&path);
    assert!(locked
        .entry("secret.txt")
        .unwrap()
        .flags
        .contains(EntryFlags::DATA_CRYPTED));
    assert_eq!(locked.read("public.txt").unwrap(), b"hello");
    assert!(matches!(
        locked.read("secret.txt"),
        Err(PakError::MissingKey(_))
    ));
    drop(locked);

    let unlocked =
        Container::open(&path, OpenOptions::new().passphrase("correct horse")).unwrap();
    assert_eq!(unlocked.read("secret.txt").unwrap(), b"top secret");
}

#[test]
fn test_merge_then_source_repack() {
    let temp = TempDir::new().unwrap();
    let base_path = sample_pak(temp.path(), "base.pak", &[("base.txt", b"base")]);
    let mod_path = sample_pak(
        temp.path(),
        "mod.pak",
        &[("base.txt", b"overridden"), ("extra.txt", b"extra")],
    );

    let mut base = reopen(&base_path);
    let merged = base.merge(reopen(&mod_path)).unwrap();
    assert_eq!(merged, 2);
    assert!(base
        .entry("extra.txt")
        .unwrap()
        .modifications
        .contains(ModFlags::MERGE_SOURCE));
    assert_eq!(SaveStrategy::recommend(&base), SaveStrategy::SourceRepack);

    base.save(SaveStrategy::SourceRepack).unwrap();
    drop(base);

    let reopened = reopen(&base_path);
    assert_eq!(reopened.read("base.txt").unwrap(), b"overridden");
    assert_eq!(reopened.read("extra.txt").unwrap(), b"extra");
}

#[test]
fn test_padded_entry_replaces_original() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("tex.pak");
    let mut container = new_container(&path);
    let pixels: Vec<u8> = (0..100u8).collect();
    container.add_bytes("tex/ten.raw", pixels.clone()).unwrap();
    container.save(SaveStrategy::FullRewrite).unwrap();

    let (padded, width, height) =
        pad_entry(container.entry("tex/ten.raw").unwrap(), 10, 10, 1, 4).unwrap();
    assert_eq!((width, height), (12, 12));
    container
        .replace_bytes("tex/ten.raw", padded.decompressed_data().unwrap())
        .unwrap();
    container.save(SaveStrategy::FullRewrite).unwrap();

    let stored = container.read("tex/ten.raw").unwrap();
    assert_eq!(stored.len(), 144);
    assert_eq!(&stored[12..22], &pixels[10..20]);
    assert_eq!(&stored[22..24], &[0, 0]);
}

#[test]
fn test_export_leaves_container_editable() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("live.pak");
    let mut container = new_container(&path);
    container.add_bytes("pending.txt", b"not saved yet".to_vec()).unwrap();

    let out = temp.path().join("copy.bndl");
    container.save(SaveStrategy::ExportBundle(out.clone())).unwrap();

    assert!(container.is_modified());
    assert_eq!(reopen(&out).read("pending.txt").unwrap(), b"not saved yet");
}

#[test]
fn test_overlong_path_never_reaches_the_archive() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("long.pak");
    let mut container = new_container(&path);
    container.add_bytes("keep.bin", vec![7u8; 64]).unwrap();
    container.save(SaveStrategy::FullRewrite).unwrap();

    let long_name = "x".repeat(5000);
    assert!(matches!(
        container.add_bytes(&long_name, b"nope".to_vec()),
        Err(PakError::PathError(_))
    ));
    assert!(matches!(
        container.rename("keep.bin", &long_name),
        Err(PakError::PathError(_))
    ));

    // A merged record is not staged through add_bytes; the save must still
    // refuse it before writing
    let gz_path = temp.path().join("long.gz");
    let mut raw = vec![b'f'];
    raw.extend_from_slice(&(long_name.len() as u32 + 1).to_le_bytes());
    raw.extend_from_slice(long_name.as_bytes());
    raw.push(0);
    raw.extend_from_slice(&2u32.to_le_bytes());
    raw.extend_from_slice(b"hi");
    raw.push(b'e');
    std::fs::write(&gz_path, gzip_bytes(&raw).unwrap()).unwrap();
    container.merge(reopen(&gz_path)).unwrap();

    for strategy in [SaveStrategy::InPlacePatch, SaveStrategy::Compact] {
        let err = container.save(strategy).unwrap_err();
        assert!(matches!(err, PakError::PathError(_)), "{:?}", err);
    }
    drop(container);

    let reopened = reopen(&path);
    assert_eq!(reopened.len(), 1);
    assert_eq!(reopened.read("keep.bin").unwrap(), vec![7u8; 64]);
}
