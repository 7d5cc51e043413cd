// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Module cache for the runner

use futures::future::{LocalBoxFuture, Shared};
use rustc_hash::{FxHashMap, FxHashSet};
use sourcemap::SourceMap;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use vnode_runtime::Value;

use super::normalize::canonicalize;
use super::source_map::extract_source_map;
use crate::error::Result;

/// In-flight evaluation of a module, shared by every concurrent requester.
pub type SharedExecution = Shared<LocalBoxFuture<'static, Result<Value>>>;

/// Cached module entry
#[derive(Clone, Default)]
pub struct ModuleEntry {
    /// Transformed source, absent for externalized modules
    pub code: Option<String>,
    /// The module's exports
    pub exports: Option<Value>,
    /// Pending or settled evaluation
    pub promise: Option<SharedExecution>,
    /// Whether the evaluation has settled
    pub evaluated: bool,
    /// Modules that imported this one
    pub importers: FxHashSet<String>,
    /// Parsed inline source map
    pub map: Option<Rc<SourceMap>>,
    /// Marker entry of an id being resolved
    pub resolving: bool,
}

impl fmt::Debug for ModuleEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleEntry")
            .field("code", &self.code.as_ref().map(|c| c.len()))
            .field("exports", &self.exports)
            .field("promise", &self.promise.is_some())
            .field("evaluated", &self.evaluated)
            .field("importers", &self.importers)
            .field("resolving", &self.resolving)
            .finish()
    }
}

/// Module cache keyed by canonical module id.
///
/// Cloning yields another handle to the same cache.
#[derive(Clone, Default)]
pub struct ModuleCache {
    entries: Rc<RefCell<FxHashMap<String, ModuleEntry>>>,
}

impl ModuleCache {
    /// Create a new empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the entry of `fs_path`, creating an empty one if missing
    pub fn get(&self, fs_path: &str) -> ModuleEntry {
        self.get_by_module_id(&canonicalize(fs_path))
    }

    /// Get an entry by already-canonical id, creating it if missing
    pub fn get_by_module_id(&self, id: &str) -> ModuleEntry {
        self.entries
            .borrow_mut()
            .entry(id.to_string())
            .or_default()
            .clone()
    }

    /// Replace the entry of `fs_path`
    pub fn set(&self, fs_path: &str, entry: ModuleEntry) {
        self.set_by_module_id(&canonicalize(fs_path), entry);
    }

    /// Replace an entry by already-canonical id
    pub fn set_by_module_id(&self, id: &str, entry: ModuleEntry) {
        self.entries.borrow_mut().insert(id.to_string(), entry);
    }

    /// Merge into the entry of `fs_path`, creating it if missing
    pub fn update<F>(&self, fs_path: &str, f: F)
    where
        F: FnOnce(&mut ModuleEntry),
    {
        self.update_by_module_id(&canonicalize(fs_path), f);
    }

    /// Merge into an entry by already-canonical id
    pub fn update_by_module_id<F>(&self, id: &str, f: F)
    where
        F: FnOnce(&mut ModuleEntry),
    {
        let mut entries = self.entries.borrow_mut();
        f(entries.entry(id.to_string()).or_default());
    }

    /// Check if a module is cached
    pub fn has(&self, fs_path: &str) -> bool {
        self.entries.borrow().contains_key(&canonicalize(fs_path))
    }

    /// Remove a module from the cache
    pub fn delete(&self, fs_path: &str) -> bool {
        self.delete_by_module_id(&canonicalize(fs_path))
    }

    /// Remove a module by already-canonical id
    pub fn delete_by_module_id(&self, id: &str) -> bool {
        self.entries.borrow_mut().remove(id).is_some()
    }

    /// Clear the entire cache
    pub fn clear(&self) {
        self.entries.borrow_mut().clear();
    }

    /// Get all cached module ids
    pub fn keys(&self) -> Vec<String> {
        self.entries.borrow().keys().cloned().collect()
    }

    /// Get the number of cached modules
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    /// Check if the cache is empty
    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    /// Invalidate the given modules and, transitively, everything that
    /// imported them. Returns every invalidated id.
    pub fn invalidate_dependents<I, S>(&self, ids: I) -> FxHashSet<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut invalidated = FxHashSet::default();
        let mut pending: Vec<String> = ids.into_iter().map(|id| canonicalize(id.as_ref())).collect();

        while let Some(id) = pending.pop() {
            if !invalidated.insert(id.clone()) {
                continue;
            }
            let removed = self.entries.borrow_mut().remove(&id);
            if let Some(entry) = removed {
                pending.extend(entry.importers);
            }
        }

        tracing::debug!(target: "vnode::runner", count = invalidated.len(), "invalidated dependents");
        invalidated
    }

    /// Invalidate the given modules and, transitively, everything they
    /// imported. Returns every invalidated id.
    pub fn invalidate_dependencies<I, S>(&self, ids: I) -> FxHashSet<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut invalidated = FxHashSet::default();
        let mut pending: Vec<String> = ids.into_iter().map(|id| canonicalize(id.as_ref())).collect();

        while let Some(id) = pending.pop() {
            if !invalidated.insert(id.clone()) {
                continue;
            }
            let imported: Vec<String> = self
                .entries
                .borrow()
                .iter()
                .filter(|(_, entry)| entry.importers.contains(&id))
                .map(|(key, _)| key.clone())
                .collect();
            pending.extend(imported);
            self.entries.borrow_mut().remove(&id);
        }

        tracing::debug!(target: "vnode::runner", count = invalidated.len(), "invalidated dependencies");
        invalidated
    }

    /// The source map of a cached module, parsed on first request
    pub fn get_source_map(&self, fs_path: &str) -> Option<Rc<SourceMap>> {
        let id = canonicalize(fs_path);
        let entry = self.get_by_module_id(&id);
        if let Some(map) = entry.map {
            return Some(map);
        }
        let map = Rc::new(extract_source_map(entry.code.as_deref()?)?);
        let stored = Rc::clone(&map);
        self.update_by_module_id(&id, move |entry| entry.map = Some(stored));
        Some(map)
    }
}

impl fmt::Debug for ModuleCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleCache").field("len", &self.len()).finish()
    }
}
