use bytes::Bytes;
use std::collections::HashMap;

// A value along with the version of the write which produced it. Versions are
// handed out by the leader and only ever increase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned {
    pub version: u64,
    pub value: Bytes,
}

// A key-value store where both the key and the value type are just bytes.
pub trait Store {
    fn get(&self, key: &Bytes) -> Option<Versioned>;

    // Installs the supplied value unless the store already holds a newer one.
    // Returns whether the value was installed.
    fn apply(&mut self, key: Bytes, value: Versioned) -> bool;
}

// A store implementation backed by a simple in-memory hash map.
pub struct MapStore {
    data: HashMap<Bytes, Versioned>,
}

impl MapStore {
    pub fn new() -> Self {
        MapStore {
            data: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }
}

impl Store for MapStore {
    fn get(&self, key: &Bytes) -> Option<Versioned> {
        self.data.get(key).cloned()
    }

    fn apply(&mut self, key: Bytes, value: Versioned) -> bool {
        match self.data.get(&key) {
            Some(existing) if existing.version >= value.version => false,
            _ => {
                self.data.insert(key, value);
                true
            }
        }
    }
}
