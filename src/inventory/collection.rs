//! An insertion-ordered, name-keyed collection with a loaded flag.
use crate::models::{Entity, Repository};
use std::collections::HashMap;

pub trait Keyed {
    fn key(&self) -> &str;
}

impl Keyed for Entity {
    fn key(&self) -> &str {
        &self.name
    }
}

impl Keyed for Repository {
    fn key(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone)]
pub struct ViewCollection<T> {
    entries: Vec<T>,
    index: HashMap<String, usize>,
    loaded: bool,
    last_error: Option<String>,
    /// Bumped by every load that starts; see `Inventory::begin_load`.
    pub(crate) generation: u64,
}

impl<T> Default for ViewCollection<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
            loaded: false,
            last_error: None,
            generation: 0,
        }
    }
}

impl<T: Keyed + Clone> ViewCollection<T> {
    /// Replaces the contents after a successful full fetch. Duplicate names
    /// keep their first occurrence.
    pub fn replace(&mut self, entries: Vec<T>) {
        self.entries.clear();
        self.index.clear();
        for entry in entries {
            if self.index.contains_key(entry.key()) {
                log::debug!("Dropping duplicate entry '{}'", entry.key());
                continue;
            }
            self.index.insert(entry.key().to_string(), self.entries.len());
            self.entries.push(entry);
        }
        self.loaded = true;
        self.last_error = None;
    }

    /// Marks a failed fetch: empty, not loaded, error kept for display.
    pub fn fail(&mut self, message: String) {
        self.entries.clear();
        self.index.clear();
        self.loaded = false;
        self.last_error = Some(message);
    }

    pub fn get(&self, name: &str) -> Option<&T> {
        self.index.get(name).map(|&i| &self.entries[i])
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut T> {
        match self.index.get(name) {
            Some(&i) => self.entries.get_mut(i),
            None => None,
        }
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.entries.iter_mut()
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.key().to_string()).collect()
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.entries.clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }
}
