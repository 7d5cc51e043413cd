// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

#![allow(dead_code)]

use async_trait::async_trait;
use std::path::Path;
use std::rc::Rc;
use vnode::module_system::normalize::{canonicalize, dirname, resolve_path};
use vnode::{
    MemoryFetcher, ModuleRunner, NativeEvaluator, NativeModules, ResolveId, ResolvedId, Result, RunnerConfig,
    RunnerOptions,
};

/// Resolves relative specifiers against their importer without touching
/// the file system; everything else is left to the runner.
pub struct LexicalResolver;

#[async_trait(?Send)]
impl ResolveId for LexicalResolver {
    async fn resolve_id(&self, id: &str, importer: Option<&str>) -> Result<Option<ResolvedId>> {
        if !id.starts_with("./") && !id.starts_with("../") {
            return Ok(None);
        }
        let Some(importer) = importer else {
            return Ok(None);
        };
        let importer = canonicalize(importer);
        Ok(Some(ResolvedId {
            id: resolve_path(dirname(&importer), id),
            external: false,
        }))
    }
}

pub struct Harness {
    pub runner: ModuleRunner,
    pub fetcher: Rc<MemoryFetcher>,
    pub evaluator: Rc<NativeEvaluator>,
    pub native: Rc<NativeModules>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_root(Path::new("/"))
    }

    pub fn with_root(root: &Path) -> Self {
        init_tracing();
        let fetcher = Rc::new(MemoryFetcher::new());
        let evaluator = Rc::new(NativeEvaluator::new());
        let native = Rc::new(NativeModules::new());
        let config = RunnerConfig {
            root: root.to_path_buf(),
            ..RunnerConfig::default()
        };
        let options = RunnerOptions::new(fetcher.clone(), evaluator.clone())
            .with_resolver(Rc::new(LexicalResolver))
            .with_native(native.clone())
            .with_config(config);
        Self {
            runner: ModuleRunner::new(options),
            fetcher,
            evaluator,
            native,
        }
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
