//! Re-rooting foreign containers into the canonical PAK representation.

use crate::config::OpenPolicy;
use crate::container::Container;
use crate::entry::{EntryFlags, ModFlags};
use crate::error::Result;
use crate::formats::FormatKind;
use std::path::PathBuf;

/// Namespace foreign entries are re-rooted under
pub const IMPORT_PREFIX: &str = "import/";

/// Turn `source` into a PAK-kind container that saves to `target`.
///
/// Entries keep their order, names and flags (plus `FILE` for files) under
/// [`IMPORT_PREFIX`], are flagged `ADDED | MERGE_SOURCE`, and keep reading
/// through the source adapters, which move into the new container along with
/// any scratch files. A PAK container is returned unchanged.
pub fn to_canonical(mut source: Container, target: impl Into<PathBuf>) -> Result<Container> {
    source.ensure_usable()?;
    if source.kind() == Some(FormatKind::Pak) {
        return Ok(source);
    }

    let mut options = source.options().clone();
    options.policy = OpenPolicy::Normal;
    let mut canonical = Container::detached(target.into(), FormatKind::Pak, options);

    let entries = std::mem::take(&mut source.table).into_entries();
    canonical.adopt(&mut source);

    for mut entry in entries {
        if entry.modifications.contains(ModFlags::REMOVED) {
            continue;
        }
        entry.path = format!("{}{}", IMPORT_PREFIX, entry.path);
        if !entry.is_directory() {
            entry.flags |= EntryFlags::FILE;
        }
        entry.modifications |= ModFlags::ADDED | ModFlags::MERGE_SOURCE;
        canonical.table.insert(entry)?;
    }

    tracing::info!(
        source = %source.path().display(),
        target = %canonical.path().display(),
        entries = canonical.table.len(),
        "converted to canonical container"
    );
    Ok(canonical)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OpenOptions;
    use crate::container::ContainerState;
    use crate::formats::bundle::BundleWriter;
    use tempfile::TempDir;

    #[test]
    fn test_bundle_entries_are_rerooted() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("b.bndl");
        let mut writer = BundleWriter::new();
        writer.add_file("maps/a.map", &[3u8; 500], EntryFlags::FILE).unwrap();
        writer.add_file("z.txt", b"zz", EntryFlags::FILE).unwrap();
        std::fs::write(&path, writer.finish(Vec::new()).unwrap()).unwrap();

        let source = Container::open(&path, OpenOptions::default()).unwrap();
        let canonical = to_canonical(source, temp.path().join("out.pak")).unwrap();

        assert_eq!(canonical.state(), ContainerState::Normal);
        assert_eq!(canonical.kind(), Some(FormatKind::Pak));
        let paths: Vec<_> = canonical.entries().map(|e| e.path.clone()).collect();
        assert_eq!(paths, vec!["import/maps/a.map", "import/z.txt"]);
        assert_eq!(canonical.read("import/maps/a.map").unwrap(), vec![3u8; 500]);
        assert!(canonical
            .entry("import/z.txt")
            .unwrap()
            .modifications
            .contains(ModFlags::ADDED | ModFlags::MERGE_SOURCE));
    }

    #[test]
    fn test_pak_passes_through() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("p.pak");
        let source = Container::open(&path, OpenOptions::new().policy(OpenPolicy::CreateNew)).unwrap();
        let same = to_canonical(source, temp.path().join("ignored.pak")).unwrap();
        assert_eq!(same.path(), path.as_path());
    }
}
