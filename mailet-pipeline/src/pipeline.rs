use ahash::AHashMap;

use crate::Processor;

/// Every configured processor, by name, and the one new mail starts in
#[derive(Debug)]
pub struct Pipeline {
    root: String,
    processors: AHashMap<String, Processor>,
}

impl Pipeline {
    pub(crate) fn new(root: String, processors: AHashMap<String, Processor>) -> Self {
        Self { root, processors }
    }

    /// Name of the processor new mail is bound to
    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn get(&self, name: &str) -> Option<&Processor> {
        self.processors.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.processors.contains_key(name)
    }

    /// Processor names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.processors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
