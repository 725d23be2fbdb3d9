use std::collections::HashMap;

/// The bytes this node can actually serve, keyed by resource name.
///
/// Only local "add resource" actions write here; requests from other peers
/// are read-only.
#[derive(Debug, Default)]
pub struct LocalResourceStore {
    resources: HashMap<String, Vec<u8>>,
}

impl LocalResourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the previous content when a name is replaced.
    pub fn insert(&mut self, name: String, data: Vec<u8>) -> Option<Vec<u8>> {
        self.resources.insert(name, data)
    }

    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.resources.get(name).map(Vec::as_slice)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.resources.contains_key(name)
    }

    /// Sorted, so repeated index uploads are stable.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.resources.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}
