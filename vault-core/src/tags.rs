//! In-memory tag index derived from the entry store.
//!
//! Forward map (tag -> entry IDs) for filter queries, reverse map
//! (entry ID -> tags) so per-entry updates touch only the affected buckets.
//! Never persisted: rebuilt from the store on open.

use crate::entry::{normalize_tag, EntryId};
use crate::store::EntryStore;
use std::collections::{BTreeMap, BTreeSet, HashMap};

#[derive(Debug, Default)]
pub struct TagIndex {
    by_tag: BTreeMap<String, BTreeSet<EntryId>>,
    by_entry: HashMap<EntryId, BTreeSet<String>>,
}

impl TagIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from the persisted tag sets of every non-missing entry
    pub fn rebuild(store: &EntryStore) -> crate::Result<Self> {
        let mut index = Self::new();
        for entry in store.list_all() {
            let entry = entry?;
            if !entry.missing {
                index.insert_entry(&entry.id, &entry.tags);
            }
        }
        Ok(index)
    }

    /// Returns false when the tag normalizes to nothing or was already present
    pub fn add_tag(&mut self, id: &EntryId, tag: &str) -> bool {
        let Some(tag) = normalize_tag(tag) else {
            return false;
        };
        let inserted = self
            .by_entry
            .entry(id.clone())
            .or_default()
            .insert(tag.clone());
        if inserted {
            self.by_tag.entry(tag).or_default().insert(id.clone());
        }
        inserted
    }

    pub fn remove_tag(&mut self, id: &EntryId, tag: &str) -> bool {
        let Some(tag) = normalize_tag(tag) else {
            return false;
        };
        let removed = match self.by_entry.get_mut(id) {
            Some(tags) => {
                let removed = tags.remove(&tag);
                if tags.is_empty() {
                    self.by_entry.remove(id);
                }
                removed
            }
            None => false,
        };
        if removed {
            self.drop_from_bucket(&tag, id);
        }
        removed
    }

    /// Index an entry's whole tag set, replacing whatever was indexed for it
    pub fn insert_entry(&mut self, id: &EntryId, tags: &BTreeSet<String>) {
        self.remove_entry(id);
        for tag in tags {
            self.add_tag(id, tag);
        }
    }

    /// Drop an entry from every bucket it appears in
    pub fn remove_entry(&mut self, id: &EntryId) {
        if let Some(tags) = self.by_entry.remove(id) {
            for tag in tags {
                self.drop_from_bucket(&tag, id);
            }
        }
    }

    fn drop_from_bucket(&mut self, tag: &str, id: &EntryId) {
        if let Some(bucket) = self.by_tag.get_mut(tag) {
            bucket.remove(id);
            if bucket.is_empty() {
                self.by_tag.remove(tag);
            }
        }
    }

    pub fn tags_for(&self, id: &EntryId) -> Option<&BTreeSet<String>> {
        self.by_entry.get(id)
    }

    /// Entries carrying `tag` (any casing or spacing variant)
    pub fn ids_for_tag(&self, tag: &str) -> Option<&BTreeSet<EntryId>> {
        let tag = normalize_tag(tag)?;
        self.by_tag.get(&tag)
    }

    /// Every tag referenced by at least one indexed entry, in sorted order
    pub fn all_tags(&self) -> impl Iterator<Item = &str> + '_ {
        self.by_tag.keys().map(String::as_str)
    }

    /// (tag, number of entries) pairs in tag order
    pub fn tag_counts(&self) -> impl Iterator<Item = (&str, usize)> + '_ {
        self.by_tag.iter().map(|(t, ids)| (t.as_str(), ids.len()))
    }

    pub fn tag_count(&self) -> usize {
        self.by_tag.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::Entry;

    fn id(path: &str) -> EntryId {
        EntryId::for_path(path)
    }

    fn set(tags: &[&str]) -> BTreeSet<String> {
        tags.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_add_and_lookup_normalizes() {
        let mut index = TagIndex::new();
        assert!(index.add_tag(&id("a.jpg"), "  Cat "));
        assert!(!index.add_tag(&id("a.jpg"), "CAT"));
        assert!(!index.add_tag(&id("a.jpg"), "   "));

        let ids = index.ids_for_tag("cat").unwrap();
        assert!(ids.contains(&id("a.jpg")));
        assert_eq!(index.ids_for_tag(" CAT").unwrap().len(), 1);
        assert_eq!(index.tags_for(&id("a.jpg")).unwrap(), &set(&["cat"]));
    }

    #[test]
    fn test_empty_buckets_disappear() {
        let mut index = TagIndex::new();
        index.add_tag(&id("a.jpg"), "cat");
        index.add_tag(&id("b.jpg"), "cat");
        assert!(index.remove_tag(&id("a.jpg"), "cat"));
        assert_eq!(index.all_tags().collect::<Vec<_>>(), vec!["cat"]);

        assert!(index.remove_tag(&id("b.jpg"), "Cat"));
        assert_eq!(index.all_tags().count(), 0);
        assert!(index.ids_for_tag("cat").is_none());
        assert!(index.tags_for(&id("b.jpg")).is_none());
        assert!(!index.remove_tag(&id("b.jpg"), "cat"));
    }

    #[test]
    fn test_insert_entry_replaces_previous_tags() {
        let mut index = TagIndex::new();
        index.insert_entry(&id("a.jpg"), &set(&["cat", "dog"]));
        index.insert_entry(&id("a.jpg"), &set(&["dog", "bird"]));

        assert!(index.ids_for_tag("cat").is_none());
        assert_eq!(
            index.all_tags().collect::<Vec<_>>(),
            vec!["bird", "dog"]
        );
        index.remove_entry(&id("a.jpg"));
        assert_eq!(index.tag_count(), 0);
    }

    #[test]
    fn test_tag_counts_are_sorted() {
        let mut index = TagIndex::new();
        index.insert_entry(&id("a.jpg"), &set(&["zebra", "cat"]));
        index.insert_entry(&id("b.jpg"), &set(&["cat"]));
        let counts: Vec<(&str, usize)> = index.tag_counts().collect();
        assert_eq!(counts, vec![("cat", 2), ("zebra", 1)]);
    }

    #[test]
    fn test_rebuild_skips_missing_entries() {
        let store = EntryStore::open_in_memory().unwrap();
        let mut present = Entry::new("a.jpg", 1, 1);
        present.tags = set(&["cat"]);
        let mut gone = Entry::new("b.jpg", 1, 1);
        gone.tags = set(&["cat", "dog"]);
        gone.missing = true;
        store.upsert(&present).unwrap();
        store.upsert(&gone).unwrap();

        let index = TagIndex::rebuild(&store).unwrap();
        let cats = index.ids_for_tag("cat").unwrap();
        assert_eq!(cats.len(), 1);
        assert!(cats.contains(&present.id));
        assert!(index.ids_for_tag("dog").is_none());
    }
}
