// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Mock registrations, per suite file.

use futures::future::LocalBoxFuture;
use futures::FutureExt;
use rustc_hash::FxHashMap;
use std::fmt;
use std::future::Future;
use std::rc::Rc;
use vnode_runtime::Value;

use crate::error::Result;

/// Suite key of registrations made outside any suite file.
pub const GLOBAL_SUITE: &str = "global";

/// User-supplied module factory.
#[derive(Clone)]
pub struct MockFactory(Rc<dyn Fn() -> LocalBoxFuture<'static, Result<Value>>>);

impl MockFactory {
    /// Wrap an async factory
    pub fn new<F, Fut>(factory: F) -> Self
    where
        F: Fn() -> Fut + 'static,
        Fut: Future<Output = Result<Value>> + 'static,
    {
        Self(Rc::new(move || factory().boxed_local()))
    }

    /// Wrap a synchronous factory
    pub fn sync<F>(factory: F) -> Self
    where
        F: Fn() -> Result<Value> + 'static,
    {
        Self(Rc::new(move || futures::future::ready(factory()).boxed_local()))
    }

    /// Run the factory
    pub fn call(&self) -> LocalBoxFuture<'static, Result<Value>> {
        (self.0)()
    }
}

impl fmt::Debug for MockFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MockFactory(<fn>)")
    }
}

/// How a module is replaced.
#[derive(Clone, Debug)]
pub enum MockKind {
    /// Exports produced by a factory
    Factory(MockFactory),
    /// A module from a `__mocks__` folder
    Path(String),
    /// A structural mock of the real module
    Automock,
}

/// A declaration waiting to be resolved.
#[derive(Clone, Debug)]
pub enum PendingMock {
    /// `mock(id)` or `mock(id, factory)`
    Mock {
        /// Specifier as written
        id: String,
        /// Declaring module
        importer: String,
        /// Replacement factory
        factory: Option<MockFactory>,
    },
    /// `unmock(id)`
    Unmock {
        /// Specifier as written
        id: String,
        /// Declaring module
        importer: String,
    },
}

impl PendingMock {
    /// Specifier as written
    pub fn id(&self) -> &str {
        match self {
            PendingMock::Mock { id, .. } | PendingMock::Unmock { id, .. } => id,
        }
    }

    /// Declaring module
    pub fn importer(&self) -> &str {
        match self {
            PendingMock::Mock { importer, .. } | PendingMock::Unmock { importer, .. } => importer,
        }
    }
}

/// Registered mocks keyed by suite file and canonical module id.
///
/// Registrations of a suite override the global ones.
#[derive(Debug, Default)]
pub struct MockRegistry {
    mocks: FxHashMap<String, FxHashMap<String, MockKind>>,
    raw_ids: FxHashMap<String, FxHashMap<String, String>>,
}

impl MockRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `kind` for `id` in `suite`; `raw_id` is the specifier the
    /// mock was declared with.
    pub fn insert(&mut self, suite: &str, id: &str, raw_id: &str, kind: MockKind) {
        self.mocks
            .entry(suite.to_string())
            .or_default()
            .insert(id.to_string(), kind);
        self.raw_ids
            .entry(suite.to_string())
            .or_default()
            .insert(id.to_string(), raw_id.to_string());
    }

    /// Drop the registration of `id` in `suite`
    pub fn remove(&mut self, suite: &str, id: &str) -> Option<MockKind> {
        self.mocks.get_mut(suite).and_then(|mocks| mocks.remove(id))
    }

    /// The mock of `id` visible from `suite`
    pub fn get(&self, suite: &str, id: &str) -> Option<MockKind> {
        self.mocks
            .get(suite)
            .and_then(|mocks| mocks.get(id))
            .or_else(|| self.mocks.get(GLOBAL_SUITE).and_then(|mocks| mocks.get(id)))
            .cloned()
    }

    /// The specifier `id` was mocked with, for diagnostics
    pub fn raw_id(&self, suite: &str, id: &str) -> Option<String> {
        self.raw_ids
            .get(suite)
            .and_then(|ids| ids.get(id))
            .or_else(|| self.raw_ids.get(GLOBAL_SUITE).and_then(|ids| ids.get(id)))
            .cloned()
    }

    /// Number of registrations visible from `suite`
    pub fn count(&self, suite: &str) -> usize {
        let suite_mocks = self.mocks.get(suite);
        let global = self
            .mocks
            .get(GLOBAL_SUITE)
            .map(|mocks| {
                mocks
                    .keys()
                    .filter(|id| suite == GLOBAL_SUITE || !suite_mocks.is_some_and(|m| m.contains_key(*id)))
                    .count()
            })
            .unwrap_or(0);
        let own = if suite == GLOBAL_SUITE {
            0
        } else {
            suite_mocks.map_or(0, |m| m.len())
        };
        own + global
    }

    /// Forget every registration
    pub fn clear(&mut self) {
        self.mocks.clear();
        self.raw_ids.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suite_overrides_global() {
        let mut registry = MockRegistry::new();
        registry.insert(GLOBAL_SUITE, "/src/a.js", "./a", MockKind::Automock);
        registry.insert("/test/a.test.js", "/src/a.js", "../src/a", MockKind::Path("/src/__mocks__/a.js".into()));

        assert!(matches!(registry.get("/test/a.test.js", "/src/a.js"), Some(MockKind::Path(_))));
        assert!(matches!(registry.get("/test/b.test.js", "/src/a.js"), Some(MockKind::Automock)));
        assert_eq!(registry.raw_id("/test/a.test.js", "/src/a.js").as_deref(), Some("../src/a"));
        assert_eq!(registry.raw_id("/test/b.test.js", "/src/a.js").as_deref(), Some("./a"));
        assert_eq!(registry.count("/test/a.test.js"), 1);
        assert_eq!(registry.count(GLOBAL_SUITE), 1);

        assert!(registry.remove("/test/a.test.js", "/src/a.js").is_some());
        assert!(matches!(registry.get("/test/a.test.js", "/src/a.js"), Some(MockKind::Automock)));
        registry.clear();
        assert!(registry.get(GLOBAL_SUITE, "/src/a.js").is_none());
    }

    #[tokio::test]
    async fn test_factories() {
        let sync = MockFactory::sync(|| Ok(Value::from(1)));
        let async_factory = MockFactory::new(|| async { Ok(Value::from(2)) });
        assert_eq!(sync.call().await.unwrap(), Value::from(1));
        assert_eq!(async_factory.call().await.unwrap(), Value::from(2));
    }
}
