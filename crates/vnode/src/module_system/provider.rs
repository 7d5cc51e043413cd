// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Collaborators of the module runner.
//!
//! The runner does not transform, resolve or natively load anything by
//! itself. It asks:
//!
//! - a [`ModuleFetcher`] for the transformed code of a module, or for the
//!   path to import natively instead;
//! - an optional [`ResolveId`] to map specifiers onto module ids;
//! - a [`NativeImporter`] for externalized modules and `require()`;
//! - an optional [`HotContextFactory`] for `import.meta.hot`.

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use std::cell::RefCell;
use url::Url;
use vnode_runtime::Value;

use super::externalize::Externalizer;
use super::normalize::{canonicalize, clean_url, dirname, resolve_path, slash};
use super::runner::ModuleRunner;
use crate::config::DepsConfig;
use crate::error::{Result, RunnerError};

/// What the transform provider returned for a module.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchResult {
    /// Transformed source
    pub code: Option<String>,
    /// Path to import natively instead of evaluating `code`
    pub externalize: Option<String>,
}

impl FetchResult {
    /// A transformed module.
    pub fn code(code: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            externalize: None,
        }
    }

    /// A module handed to the native loader.
    pub fn externalize(path: impl Into<String>) -> Self {
        Self {
            code: None,
            externalize: Some(path.into()),
        }
    }
}

/// The transform provider.
#[async_trait(?Send)]
pub trait ModuleFetcher {
    /// Fetch the transformed code of `id`
    async fn fetch_module(&self, id: &str) -> Result<FetchResult>;
}

/// A resolved module id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedId {
    /// Resolved id
    pub id: String,
    /// Whether the module lives outside the project
    pub external: bool,
}

/// External resolver, typically the bundler's resolution algorithm.
#[async_trait(?Send)]
pub trait ResolveId {
    /// Resolve `id` imported from `importer`; `None` falls back to file
    /// system mapping.
    async fn resolve_id(&self, id: &str, importer: Option<&str>) -> Result<Option<ResolvedId>>;
}

/// Produces `import.meta.hot` objects.
pub trait HotContextFactory {
    /// Called at most once per module evaluation, on first access
    fn create_hot_context(&self, runner: &ModuleRunner, id: &str) -> Value;
}

/// The platform's own module loader.
#[async_trait(?Send)]
pub trait NativeImporter {
    /// Dynamic import of `path`
    async fn import(&self, path: &str) -> Result<Value>;

    /// `require(specifier)` from the module at `parent`
    fn require(&self, specifier: &str, parent: &str) -> Result<Value>;
}

/// In-memory transform provider.
///
/// Modules are keyed by canonical id. Every fetch is counted.
#[derive(Default)]
pub struct MemoryFetcher {
    modules: RefCell<FxHashMap<String, FetchResult>>,
    requests: RefCell<FxHashMap<String, usize>>,
}

impl MemoryFetcher {
    /// Create an empty provider
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `code` for `id`
    pub fn add(&self, id: &str, code: impl Into<String>) {
        self.modules
            .borrow_mut()
            .insert(canonicalize(id), FetchResult::code(code));
    }

    /// Externalize `id` to `path`
    pub fn add_external(&self, id: &str, path: impl Into<String>) {
        self.modules
            .borrow_mut()
            .insert(canonicalize(id), FetchResult::externalize(path));
    }

    /// Stop serving `id`
    pub fn remove(&self, id: &str) {
        self.modules.borrow_mut().remove(&canonicalize(id));
    }

    /// How many times `id` was fetched
    pub fn fetch_count(&self, id: &str) -> usize {
        self.requests
            .borrow()
            .get(&canonicalize(id))
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait(?Send)]
impl ModuleFetcher for MemoryFetcher {
    async fn fetch_module(&self, id: &str) -> Result<FetchResult> {
        let key = canonicalize(id);
        *self.requests.borrow_mut().entry(key.clone()).or_insert(0) += 1;
        // Fetching is a suspension point, like a real transform request
        tokio::task::yield_now().await;
        Ok(self.modules.borrow().get(&key).cloned().unwrap_or_default())
    }
}

/// Transform provider reading sources from disk.
///
/// Sources are served untransformed; modules the [`Externalizer`] picks are
/// handed to the native loader.
pub struct FsFetcher {
    externalizer: Externalizer,
}

impl FsFetcher {
    /// Create a provider with the given dependency options
    pub fn new(deps: DepsConfig) -> Self {
        Self {
            externalizer: Externalizer::new(deps),
        }
    }

    /// The externalization resolver in use
    pub fn externalizer(&self) -> &Externalizer {
        &self.externalizer
    }
}

impl Default for FsFetcher {
    fn default() -> Self {
        Self::new(DepsConfig::default())
    }
}

#[async_trait(?Send)]
impl ModuleFetcher for FsFetcher {
    async fn fetch_module(&self, id: &str) -> Result<FetchResult> {
        let id = canonicalize(id);
        if let Some(path) = self.externalizer.should_externalize(&id) {
            return Ok(FetchResult::externalize(path));
        }
        match std::fs::read_to_string(clean_url(&id)) {
            Ok(code) => Ok(FetchResult::code(code)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(target: "vnode::runner", id = %id, "source not found");
                Ok(FetchResult::default())
            }
            Err(err) => Err(err.into()),
        }
    }
}

/// Registry of host-provided modules for the native loader.
///
/// Modules are keyed by built-in name (`fs`, with or without `node:`) or by
/// absolute path (`file://` urls are accepted).
#[derive(Default)]
pub struct NativeModules {
    modules: RefCell<FxHashMap<String, Value>>,
    imports: RefCell<FxHashMap<String, usize>>,
}

impl NativeModules {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Provide `module` under `specifier`
    pub fn register(&self, specifier: &str, module: Value) {
        self.modules.borrow_mut().insert(Self::key(specifier), module);
    }

    /// How many times `specifier` was imported
    pub fn import_count(&self, specifier: &str) -> usize {
        self.imports
            .borrow()
            .get(&Self::key(specifier))
            .copied()
            .unwrap_or(0)
    }

    fn key(specifier: &str) -> String {
        if specifier.starts_with("file://") {
            if let Some(path) = Url::parse(specifier).ok().and_then(|u| u.to_file_path().ok()) {
                return slash(&path.to_string_lossy());
            }
        }
        specifier.strip_prefix("node:").unwrap_or(specifier).to_string()
    }

    fn lookup(&self, key: &str) -> Option<Value> {
        self.modules.borrow().get(key).cloned()
    }
}

#[async_trait(?Send)]
impl NativeImporter for NativeModules {
    async fn import(&self, path: &str) -> Result<Value> {
        let key = Self::key(path);
        *self.imports.borrow_mut().entry(key.clone()).or_insert(0) += 1;
        self.lookup(&key).ok_or_else(|| RunnerError::NativeImport {
            path: path.to_string(),
            reason: "Cannot find module".to_string(),
        })
    }

    fn require(&self, specifier: &str, parent: &str) -> Result<Value> {
        let key = if specifier.starts_with("./") || specifier.starts_with("../") {
            resolve_path(dirname(&slash(parent)), specifier)
        } else {
            Self::key(specifier)
        };
        self.lookup(&key).ok_or_else(|| RunnerError::NativeImport {
            path: specifier.to_string(),
            reason: format!("Cannot find module required from {}", parent),
        })
    }
}
