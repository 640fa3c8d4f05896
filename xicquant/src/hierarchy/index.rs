use std::collections::HashMap;

use identity_hash::BuildIdentityHasher;

use super::LevelKey;

/// A bidirectional mapping between a node's sorted child keys and their positions.
///
/// Rebuilt wholesale whenever the child list changes.
#[derive(Debug, Default, Clone)]
pub struct LevelIndex {
    positions: HashMap<LevelKey, usize, BuildIdentityHasher<LevelKey>>,
    keys: Vec<LevelKey>,
}

impl LevelIndex {
    /// Build an index from keys that are already in sorted order
    pub fn rebuild<I: IntoIterator<Item = LevelKey>>(keys: I) -> Self {
        let keys: Vec<LevelKey> = keys.into_iter().collect();
        let mut positions =
            HashMap::with_capacity_and_hasher(keys.len(), BuildIdentityHasher::default());
        for (i, k) in keys.iter().enumerate() {
            positions.insert(*k, i);
        }
        Self { positions, keys }
    }

    pub fn position_of(&self, key: LevelKey) -> Option<usize> {
        self.positions.get(&key).copied()
    }

    pub fn key_at(&self, index: usize) -> Option<LevelKey> {
        self.keys.get(index).copied()
    }

    pub fn contains_key(&self, key: LevelKey) -> bool {
        self.positions.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn keys(&self) -> &[LevelKey] {
        &self.keys
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_bidirectional() {
        let index = LevelIndex::rebuild([2, 3, 7].map(LevelKey));
        assert_eq!(index.len(), 3);
        assert_eq!(index.position_of(LevelKey(7)), Some(2));
        assert_eq!(index.key_at(1), Some(LevelKey(3)));
        assert_eq!(index.position_of(LevelKey(4)), None);
        assert_eq!(index.key_at(3), None);
        for (i, k) in index.keys().iter().enumerate() {
            assert_eq!(index.position_of(*k), Some(i));
        }
    }
}
