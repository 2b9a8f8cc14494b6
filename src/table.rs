use crate::entry::{normalize_path, Entry};
use crate::error::{PakError, Result};
use std::collections::HashMap;

/// Entry table with O(1) lookup and stable insertion order
#[derive(Debug, Clone, Default)]
pub struct EntryTable {
    entries: Vec<Entry>,
    index: HashMap<String, usize>,
    ignore_case: bool,
}

impl EntryTable {
    pub fn new(ignore_case: bool) -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
            ignore_case,
        }
    }

    pub fn ignore_case(&self) -> bool {
        self.ignore_case
    }

    fn key(&self, normalized: &str) -> String {
        if self.ignore_case {
            normalized.to_lowercase()
        } else {
            normalized.to_string()
        }
    }

    fn lookup(&self, path: &str) -> Option<usize> {
        let normalized = normalize_path(path).ok()?;
        self.index.get(&self.key(&normalized)).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.lookup(path).is_some()
    }

    pub fn get(&self, path: &str) -> Option<&Entry> {
        self.lookup(path).map(|i| &self.entries[i])
    }

    pub fn get_mut(&mut self, path: &str) -> Option<&mut Entry> {
        self.lookup(path).map(move |i| &mut self.entries[i])
    }

    /// Insert an entry, normalizing its path; duplicates are rejected
    pub fn insert(&mut self, mut entry: Entry) -> Result<()> {
        entry.path = normalize_path(&entry.path)?;
        let key = self.key(&entry.path);
        if self.index.contains_key(&key) {
            return Err(PakError::DuplicateEntry(entry.path));
        }
        self.index.insert(key, self.entries.len());
        self.entries.push(entry);
        Ok(())
    }

    /// Insert or replace, keeping the original position on replace
    pub fn upsert(&mut self, mut entry: Entry) -> Result<Option<Entry>> {
        entry.path = normalize_path(&entry.path)?;
        let key = self.key(&entry.path);
        match self.index.get(&key) {
            Some(&i) => Ok(Some(std::mem::replace(&mut self.entries[i], entry))),
            None => {
                self.index.insert(key, self.entries.len());
                self.entries.push(entry);
                Ok(None)
            }
        }
    }

    /// Remove an entry outright (not a staged removal)
    pub fn remove(&mut self, path: &str) -> Option<Entry> {
        let i = self.lookup(path)?;
        let entry = self.entries.remove(i);
        self.reindex();
        Some(entry)
    }

    /// Change an entry's path in place, keeping its position
    pub fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        let i = self
            .lookup(from)
            .ok_or_else(|| PakError::EntryNotFound(from.to_string()))?;
        let normalized = normalize_path(to)?;
        let new_key = self.key(&normalized);
        if let Some(&existing) = self.index.get(&new_key) {
            if existing != i {
                return Err(PakError::DuplicateEntry(normalized));
            }
        }
        let old_key = self.key(&self.entries[i].path);
        self.index.remove(&old_key);
        self.index.insert(new_key, i);
        self.entries[i].path = normalized;
        Ok(())
    }

    pub fn retain<F: FnMut(&Entry) -> bool>(&mut self, f: F) {
        self.entries.retain(f);
        self.reindex();
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Entry> {
        self.entries.iter()
    }

    /// Consume the table, yielding entries in insertion order
    pub fn into_entries(self) -> Vec<Entry> {
        self.entries
    }

    /// Paths in insertion order
    pub fn paths(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.path.as_str()).collect()
    }

    fn reindex(&mut self) {
        let keys: Vec<String> = self.entries.iter().map(|e| self.key(&e.path)).collect();
        self.index = keys.into_iter().enumerate().map(|(i, k)| (k, i)).collect();
    }
}

impl<'a> IntoIterator for &'a EntryTable {
    type Item = &'a Entry;
    type IntoIter = std::slice::Iter<'a, Entry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn staged(path: &str) -> Entry {
        Entry::staged(path.to_string(), path.as_bytes().to_vec())
    }

    #[test]
    fn test_insertion_order_preserved() {
        let mut table = EntryTable::new(false);
        for p in ["z.txt", "a.txt", "m/n.txt"] {
            table.insert(staged(p)).unwrap();
        }
        assert_eq!(table.paths(), vec!["z.txt", "a.txt", "m/n.txt"]);
        table.remove("a.txt").unwrap();
        assert_eq!(table.paths(), vec!["z.txt", "m/n.txt"]);
        assert!(table.get("m/n.txt").is_some());
    }

    #[test]
    fn test_case_policy() {
        let mut strict = EntryTable::new(false);
        strict.insert(staged("Data/File.txt")).unwrap();
        strict.insert(staged("data/file.txt")).unwrap();
        assert_eq!(strict.len(), 2);
        assert!(strict.get("DATA/FILE.TXT").is_none());

        let mut loose = EntryTable::new(true);
        loose.insert(staged("Data/File.txt")).unwrap();
        assert!(matches!(
            loose.insert(staged("data/file.txt")),
            Err(PakError::DuplicateEntry(_))
        ));
        // Case is preserved in the stored path
        assert_eq!(loose.get("DATA/FILE.TXT").unwrap().path, "Data/File.txt");
    }

    #[test]
    fn test_lookup_normalizes() {
        let mut table = EntryTable::new(false);
        table.insert(staged("\\dir\\file.bin")).unwrap();
        assert!(table.contains("dir/file.bin"));
        assert!(table.contains("/dir/./file.bin"));
    }

    #[test]
    fn test_rename_keeps_position() {
        let mut table = EntryTable::new(false);
        table.insert(staged("a")).unwrap();
        table.insert(staged("b")).unwrap();
        table.rename("a", "c").unwrap();
        assert_eq!(table.paths(), vec!["c", "b"]);
        assert!(table.rename("c", "b").is_err());
        assert!(table.rename("missing", "x").is_err());
    }
}
