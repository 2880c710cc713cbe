//! Identity-preserving parameter registry.
//!
//! Scripts are re-evaluated wholesale on every save and on every parameter
//! edit. The registry is what keeps the user's edits alive across those
//! evaluations: the first `acquire` of a root name builds the tree, every
//! later `acquire` hands back the same instance without rebuilding it.
//!
//! One registry belongs to one [`crate::session::Session`] (one document);
//! there is no process-wide instance.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashSet};

use crate::error::{ParamError, Result};
use crate::tree::ParamTree;

/// Root names are compared after truncation to this many characters.
pub const MAX_ROOT_NAME_LEN: usize = 64;

struct Entry {
    /// Full name as first acquired; the map key may be truncated.
    name: String,
    tree: ParamTree,
}

#[derive(Default)]
pub struct ParamRegistry {
    entries: RefCell<BTreeMap<String, Entry>>,
    /// Keys acquired during the current evaluation pass, if one is running.
    declared: RefCell<Option<HashSet<String>>>,
}

impl ParamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the live tree registered under `root`, building it with `build`
    /// only if there is none.
    ///
    /// No internal borrow is held while `build` runs, so it may itself call
    /// `acquire` or `evict`. If such a nested call registers the same name
    /// first, the nested tree wins and the freshly built one is discarded.
    pub fn acquire<F>(&self, root: &str, build: F) -> Result<ParamTree>
    where
        F: FnOnce() -> Result<ParamTree>,
    {
        let key = root_key(root)?;
        if let Some(tree) = self.lookup(&key, root)? {
            self.mark_declared(&key);
            return Ok(tree);
        }

        log::debug!("Building parameter tree {root:?}");
        let tree = build()?;
        if tree.name() != root {
            return Err(ParamError::invalid_identifier(
                root,
                format!("schema builder produced a tree named {:?}", tree.name()),
            ));
        }

        if let Some(existing) = self.lookup(&key, root)? {
            log::debug!("Parameter tree {root:?} was registered during its own construction; keeping the first");
            self.mark_declared(&key);
            return Ok(existing);
        }

        self.entries.borrow_mut().insert(
            key.clone(),
            Entry {
                name: root.to_string(),
                tree: tree.clone(),
            },
        );
        self.mark_declared(&key);
        Ok(tree)
    }

    fn lookup(&self, key: &str, root: &str) -> Result<Option<ParamTree>> {
        let entries = self.entries.borrow();
        match entries.get(key) {
            Some(entry) if entry.name == root => Ok(Some(entry.tree.clone())),
            Some(entry) => Err(ParamError::invalid_identifier(
                root,
                format!(
                    "collides with {:?} after truncation to {MAX_ROOT_NAME_LEN} characters",
                    entry.name
                ),
            )),
            None => Ok(None),
        }
    }

    fn mark_declared(&self, key: &str) {
        if let Some(declared) = self.declared.borrow_mut().as_mut() {
            declared.insert(key.to_string());
        }
    }

    pub fn get(&self, root: &str) -> Option<ParamTree> {
        let key = root_key(root).ok()?;
        self.lookup(&key, root).ok().flatten()
    }

    pub fn contains(&self, root: &str) -> bool {
        self.get(root).is_some()
    }

    /// Remove `root` and release its subscriptions. Returns false if it was
    /// not registered.
    pub fn evict(&self, root: &str) -> bool {
        let Ok(key) = root_key(root) else {
            return false;
        };
        let removed = {
            let mut entries = self.entries.borrow_mut();
            match entries.get(&key) {
                Some(entry) if entry.name == root => entries.remove(&key),
                _ => None,
            }
        };

        match removed {
            Some(entry) => {
                log::info!("Evicting parameter tree {root:?}");
                entry.tree.release();
                true
            }
            None => false,
        }
    }

    /// Registered root names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.entries
            .borrow()
            .values()
            .map(|e| e.name.clone())
            .collect()
    }

    pub fn trees(&self) -> Vec<ParamTree> {
        self.entries.borrow().values().map(|e| e.tree.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Start recording which roots the next evaluation pass declares.
    pub fn begin_pass(&self) {
        *self.declared.borrow_mut() = Some(HashSet::new());
    }

    /// Finish a successful pass: evict every root it did not declare.
    /// Returns the evicted names.
    pub fn end_pass(&self) -> Vec<String> {
        let Some(declared) = self.declared.borrow_mut().take() else {
            return Vec::new();
        };
        let stale: Vec<String> = self
            .entries
            .borrow()
            .iter()
            .filter(|(key, _)| !declared.contains(*key))
            .map(|(_, e)| e.name.clone())
            .collect();

        for name in &stale {
            self.evict(name);
        }
        stale
    }

    /// Finish a failed pass without evicting anything.
    pub fn abort_pass(&self) {
        self.declared.borrow_mut().take();
    }

    /// Release and forget every tree.
    pub fn clear(&self) {
        let entries = std::mem::take(&mut *self.entries.borrow_mut());
        for entry in entries.into_values() {
            entry.tree.release();
        }
    }
}

impl Drop for ParamRegistry {
    fn drop(&mut self) {
        self.clear();
    }
}

fn root_key(root: &str) -> Result<String> {
    if root.trim().is_empty() {
        return Err(ParamError::invalid_identifier(root, "root name must not be empty"));
    }
    Ok(root.chars().take(MAX_ROOT_NAME_LEN).collect())
}
