//! Locally cached, index-sorted view of an ordered collection.

use tracing::warn;

#[derive(Debug, Clone)]
pub(crate) struct CacheEntry<T> {
    pub key: String,
    pub index: i64,
    pub value: T,
}

/// Entries sorted ascending by `(index, key)`.
///
/// Equal indexes are not produced by local operations but can arrive from
/// concurrent peers; the key breaks the tie so every participant agrees on one order.
#[derive(Debug)]
pub(crate) struct OrderedCache<T> {
    entries: Vec<CacheEntry<T>>,
}

impl<T> Default for OrderedCache<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<T> OrderedCache<T> {
    pub fn from_entries(mut entries: Vec<CacheEntry<T>>) -> Self {
        entries.sort_by(|a, b| a.index.cmp(&b.index).then_with(|| a.key.cmp(&b.key)));
        let cache = Self { entries };
        cache.warn_on_ties();
        cache
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> &[CacheEntry<T>] {
        &self.entries
    }

    pub fn position(&self, key: &str) -> Option<usize> {
        self.entries.iter().position(|entry| entry.key == key)
    }

    pub fn get(&self, key: &str) -> Option<&CacheEntry<T>> {
        self.entries.iter().find(|entry| entry.key == key)
    }

    pub fn at(&self, position: usize) -> Option<&CacheEntry<T>> {
        self.entries.get(position)
    }

    /// Index the next appended entry receives: past both the size and the last index.
    pub fn append_index(&self) -> i64 {
        let size = self.entries.len() as i64;
        match self.entries.last() {
            Some(last) => (size + 1).max(last.index + 1),
            None => size + 1,
        }
    }

    /// Inserts or replaces the entry for `entry.key` at its sorted position.
    pub fn upsert(&mut self, entry: CacheEntry<T>) {
        self.remove(&entry.key);
        let position = self
            .entries
            .partition_point(|e| (e.index, e.key.as_str()) < (entry.index, entry.key.as_str()));
        let tie = [position.checked_sub(1), Some(position)]
            .into_iter()
            .flatten()
            .filter_map(|p| self.entries.get(p))
            .any(|neighbour| neighbour.index == entry.index);
        if tie {
            warn!(key = %entry.key, index = entry.index, "entries share an order index");
        }
        self.entries.insert(position, entry);
    }

    pub fn remove(&mut self, key: &str) -> bool {
        match self.position(key) {
            Some(position) => {
                self.entries.remove(position);
                true
            }
            None => false,
        }
    }

    /// Adds one to the index of every entry at or above `from`.
    pub fn shift_from(&mut self, from: i64) {
        for entry in self.entries.iter_mut().filter(|e| e.index >= from) {
            entry.index += 1;
        }
    }

    /// Applies new indexes and restores the sort order.
    pub fn reindex(&mut self, mut index_of: impl FnMut(&str) -> Option<i64>) {
        for entry in &mut self.entries {
            if let Some(index) = index_of(&entry.key) {
                entry.index = index;
            }
        }
        self.entries
            .sort_by(|a, b| a.index.cmp(&b.index).then_with(|| a.key.cmp(&b.key)));
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn warn_on_ties(&self) {
        for pair in self.entries.windows(2) {
            if pair[0].index == pair[1].index {
                warn!(
                    first = %pair[0].key,
                    second = %pair[1].key,
                    index = pair[0].index,
                    "entries share an order index"
                );
            }
        }
    }
}
