// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! The module runner.
//!
//! Every module goes through the same pipeline:
//!
//! 1. [`ModuleRunner::resolve_url`] maps a specifier onto a module id and a
//!    file system path;
//! 2. [`ModuleRunner::dependency_request`] detects cycles and offers the
//!    request to the mocker;
//! 3. [`ModuleRunner::cached_request`] makes sure a module is evaluated at
//!    most once, however many requests are in flight;
//! 4. [`ModuleRunner::direct_request`] fetches, wraps and evaluates it.

use futures::future::{self, Either, LocalBoxFuture};
use futures::FutureExt;
use rustc_hash::FxHashMap;
use sourcemap::SourceMap;
use std::cell::RefCell;
use std::convert::Infallible;
use std::fmt;
use std::path::Path;
use std::rc::{Rc, Weak};
use std::time::Duration;
use url::Url;
use vnode_runtime::{FunctionRef, Getter, ObjectRef, Value};

use super::builtins::is_builtin;
use super::cache::{ModuleCache, ModuleEntry, SharedExecution};
use super::context::{import_meta, ImportFn, ModuleContext};
use super::evaluator::{Evaluator, ModuleScript};
use super::exports::{interoped_namespace, should_interop, ModuleExports};
use super::normalize::{
    canonicalize, clean_url, is_internal_request, normalize_request_id, resolve_path, slash,
    to_file_path, VALID_ID_PREFIX,
};
use super::provider::{
    FetchResult, HotContextFactory, ModuleFetcher, NativeImporter, NativeModules, ResolveId,
};
use crate::config::RunnerConfig;
use crate::error::{Result, RunnerError};
use crate::mocker::{MockOutcome, Mocker, MockerConfig};

/// Dependencies loading for longer than this are reported in debug mode.
const SLOW_LOAD: Duration = Duration::from_secs(2);

fn noop() -> Value {
    Value::Function(FunctionRef::native("", 0, |_| Ok(Value::Undefined)))
}

/// Stand-in for the dev-server client, which has no meaning outside a
/// browser.
fn client_stub() -> Value {
    let create_hot_context = FunctionRef::native("createHotContext", 0, |_| {
        let hot = ObjectRef::from_entries(
            ["accept", "prune", "dispose", "decline", "invalidate", "on"].map(|key| (key, noop())),
        );
        Ok(Value::Object(hot))
    });
    let inject_query = FunctionRef::native("injectQuery", 1, |args| {
        Ok(args.first().cloned().unwrap_or_default())
    });
    let update_style = FunctionRef::native("updateStyle", 2, |_| Ok(Value::Undefined));

    Value::Object(ObjectRef::from_entries([
        ("injectQuery", Value::Function(inject_query)),
        ("createHotContext", Value::Function(create_hot_context)),
        ("updateStyle", Value::Function(update_style)),
    ]))
}

/// Modules answered without fetching: the dev-server client.
pub fn default_request_stubs() -> FxHashMap<String, Value> {
    let stub = client_stub();
    let mut stubs = FxHashMap::default();
    stubs.insert("/@vite/client".to_string(), stub.clone());
    stubs.insert("@vite/client".to_string(), stub);
    stubs
}

/// Collaborators and configuration of a [`ModuleRunner`].
pub struct RunnerOptions {
    /// Transform provider
    pub fetcher: Rc<dyn ModuleFetcher>,
    /// Runs wrapped module code
    pub evaluator: Rc<dyn Evaluator>,
    /// External resolver; ids are mapped onto the file system without one
    pub resolver: Option<Rc<dyn ResolveId>>,
    /// Loader of externalized modules and `require()`
    pub native: Rc<dyn NativeImporter>,
    /// Factory of `import.meta.hot`
    pub hot: Option<Rc<dyn HotContextFactory>>,
    /// Module cache, possibly shared with another runner
    pub cache: ModuleCache,
    /// Modules answered without fetching
    pub request_stubs: FxHashMap<String, Value>,
    /// Runner configuration
    pub config: RunnerConfig,
}

impl RunnerOptions {
    /// Options with the default native loader, cache, stubs and config.
    pub fn new(fetcher: Rc<dyn ModuleFetcher>, evaluator: Rc<dyn Evaluator>) -> Self {
        Self {
            fetcher,
            evaluator,
            resolver: None,
            native: Rc::new(NativeModules::new()),
            hot: None,
            cache: ModuleCache::new(),
            request_stubs: default_request_stubs(),
            config: RunnerConfig::default(),
        }
    }

    /// Use an external resolver
    pub fn with_resolver(mut self, resolver: Rc<dyn ResolveId>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Use another native loader
    pub fn with_native(mut self, native: Rc<dyn NativeImporter>) -> Self {
        self.native = native;
        self
    }

    /// Provide `import.meta.hot`
    pub fn with_hot_context(mut self, hot: Rc<dyn HotContextFactory>) -> Self {
        self.hot = Some(hot);
        self
    }

    /// Use an existing module cache
    pub fn with_cache(mut self, cache: ModuleCache) -> Self {
        self.cache = cache;
        self
    }

    /// Replace the request stubs
    pub fn with_request_stubs(mut self, stubs: FxHashMap<String, Value>) -> Self {
        self.request_stubs = stubs;
        self
    }

    /// Use the given configuration
    pub fn with_config(mut self, config: RunnerConfig) -> Self {
        self.config = config;
        self
    }
}

struct RunnerInner {
    options: RunnerOptions,
    root: String,
    mocker: RefCell<Option<Mocker>>,
}

/// Loads, evaluates and caches modules.
///
/// Cloning yields another handle to the same runner.
#[derive(Clone)]
pub struct ModuleRunner {
    inner: Rc<RunnerInner>,
}

/// Non-owning handle to a [`ModuleRunner`], held by everything the runner
/// itself keeps alive.
#[derive(Clone)]
pub struct WeakRunner(Weak<RunnerInner>);

impl WeakRunner {
    /// The runner, if it is still alive
    pub fn upgrade(&self) -> Option<ModuleRunner> {
        self.0.upgrade().map(|inner| ModuleRunner { inner })
    }
}

impl fmt::Debug for WeakRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("WeakRunner")
            .field(&(self.0.strong_count() > 0))
            .finish()
    }
}

impl ModuleRunner {
    /// Create a runner
    pub fn new(options: RunnerOptions) -> Self {
        let root = slash(&options.config.root.to_string_lossy());
        tracing::debug!(target: "vnode::runner", root = %root, debug = options.config.debug, "runner created");
        Self {
            inner: Rc::new(RunnerInner {
                options,
                root,
                mocker: RefCell::new(None),
            }),
        }
    }

    /// The module cache
    pub fn cache(&self) -> &ModuleCache {
        &self.inner.options.cache
    }

    /// The runner configuration
    pub fn config(&self) -> &RunnerConfig {
        &self.inner.options.config
    }

    /// The project root
    pub fn root(&self) -> &Path {
        &self.inner.options.config.root
    }

    /// A non-owning handle
    pub fn downgrade(&self) -> WeakRunner {
        WeakRunner(Rc::downgrade(&self.inner))
    }

    /// Turn on module mocking, returning the session's mocker.
    pub fn enable_mocking(&self) -> Mocker {
        if let Some(mocker) = self.mocker() {
            return mocker;
        }
        let mocker = Mocker::new(self.downgrade(), MockerConfig::from(self.config()));
        *self.inner.mocker.borrow_mut() = Some(mocker.clone());
        mocker
    }

    /// The mocker, when mocking is enabled
    pub fn mocker(&self) -> Option<Mocker> {
        self.inner.mocker.borrow().clone()
    }

    /// Parsed inline source map of an evaluated module
    pub fn get_source_map(&self, id: &str) -> Option<Rc<SourceMap>> {
        self.cache().get_source_map(id)
    }

    /// Run the file at `file`, relative to the project root.
    pub async fn execute_file(&self, file: &str) -> Result<Value> {
        let path = resolve_path(&self.inner.root, file);
        let url = format!("/@fs{}", path);
        self.cached_request(url.clone(), url, Vec::new()).await
    }

    /// Resolve `raw_id` and run it.
    pub async fn execute_id(&self, raw_id: &str) -> Result<Value> {
        let (id, url) = self.resolve_url(raw_id, None).await?;
        self.cached_request(id, url, Vec::new()).await
    }

    /// Whether `id` goes through resolution at all
    pub fn should_resolve_id(&self, id: &str) -> bool {
        !is_internal_request(id) && !is_builtin(id)
    }

    /// Map `id` imported from `importer` onto `(module id, file system path)`.
    pub async fn resolve_url(&self, id: &str, importer: Option<&str>) -> Result<(String, String)> {
        let resolve_key = format!("resolve:{}", id);
        self.cache().set_by_module_id(
            &resolve_key,
            ModuleEntry {
                resolving: true,
                ..Default::default()
            },
        );
        let result = self.resolve_url_inner(id, importer).await;
        self.cache().delete_by_module_id(&resolve_key);
        result
    }

    async fn resolve_url_inner(&self, id: &str, importer: Option<&str>) -> Result<(String, String)> {
        if !self.should_resolve_id(id) {
            return Ok((id.to_string(), id.to_string()));
        }
        // The resolver expects `/@id/` ids without importer
        let importer = if id.starts_with(VALID_ID_PREFIX) {
            None
        } else {
            importer
        };
        let base = self.config().base.as_deref();
        let id = normalize_request_id(id, base);

        let resolved = match &self.inner.options.resolver {
            Some(resolver) => resolver
                .resolve_id(&id, importer)
                .await
                .map_err(|err| RunnerError::resolution(&id, importer, err.to_string()))?,
            None => None,
        };

        match resolved {
            Some(resolved) => {
                let resolved_id = normalize_request_id(&resolved.id, base);
                tracing::trace!(target: "vnode::runner", id = %id, resolved = %resolved_id, "resolved");
                Ok((resolved_id.clone(), resolved_id))
            }
            None => {
                let path = to_file_path(&id, Path::new(&self.inner.root)).path;
                Ok((id, path))
            }
        }
    }

    /// Whether the default export of a natively imported module is unwrapped
    pub fn should_interop(&self, path: &str, module: &Value) -> bool {
        should_interop(path, module, self.config().interop_default)
    }

    /// Import `path` natively and apply default interop.
    pub async fn interoped_import(&self, path: &str) -> Result<Value> {
        let module = self.inner.options.native.import(path).await?;
        Ok(interoped_namespace(path, module, self.config().interop_default))
    }

    /// Request a module, evaluating it at most once.
    ///
    /// Concurrent requests for one module share a single evaluation. A
    /// request from inside a cycle gets the partial exports.
    pub fn cached_request(
        &self,
        id: String,
        fs_path: String,
        callstack: Vec<String>,
    ) -> LocalBoxFuture<'static, Result<Value>> {
        let runner = self.clone();
        async move {
            let module_id = canonicalize(&fs_path);
            let cache = runner.cache();

            if let Some(importer) = callstack.last().cloned() {
                cache.update_by_module_id(&module_id, |entry| {
                    entry.importers.insert(importer);
                });
            }
            let entry = cache.get_by_module_id(&module_id);

            if callstack.contains(&module_id) {
                if let Some(exports) = entry.exports {
                    return Ok(exports);
                }
            }

            if let Some(promise) = entry.promise {
                return promise.await;
            }

            let promise: SharedExecution = runner.direct_request(id, fs_path, callstack).shared();
            cache.update_by_module_id(&module_id, |entry| {
                entry.promise = Some(promise.clone());
                entry.evaluated = false;
            });

            let result = promise.await;
            // The entry may have been invalidated meanwhile
            if cache.has(&module_id) {
                cache.update_by_module_id(&module_id, |entry| entry.evaluated = true);
            }
            result
        }
        .boxed_local()
    }

    /// Request a dependency of a module being evaluated.
    pub fn dependency_request(
        &self,
        id: String,
        fs_path: String,
        callstack: Vec<String>,
    ) -> LocalBoxFuture<'static, Result<Value>> {
        let runner = self.clone();
        async move {
            if let Some(mocker) = runner.mocker() {
                match mocker.request_with_mock(&fs_path, &callstack).await? {
                    MockOutcome::Exports(exports) => return Ok(exports),
                    MockOutcome::Redirect(path) => {
                        return runner.request_dependency(path.clone(), path, callstack).await;
                    }
                    MockOutcome::Passthrough => {}
                }
            }
            runner.request_dependency(id, fs_path, callstack).await
        }
        .boxed_local()
    }

    fn request_dependency(
        &self,
        id: String,
        fs_path: String,
        callstack: Vec<String>,
    ) -> LocalBoxFuture<'static, Result<Value>> {
        let runner = self.clone();
        async move {
            let module_id = canonicalize(&fs_path);
            let stack = || {
                let mut stack = callstack.clone();
                stack.push(module_id.clone());
                stack.reverse();
                stack
            };

            if callstack.contains(&module_id) {
                if let Some(exports) = runner.cache().get_by_module_id(&module_id).exports {
                    return Ok(exports);
                }
                return Err(RunnerError::CircularDependency { stack: stack() });
            }

            if !runner.config().debug {
                return runner.cached_request(id, fs_path, callstack).await;
            }

            let slow_stack = stack();
            let warn = async move {
                tokio::time::sleep(SLOW_LOAD).await;
                tracing::warn!(
                    target: "vnode::runner",
                    module = %slow_stack[0],
                    "module takes over 2s to load.\nstack:\n{}",
                    slow_stack.iter().map(|p| format!("- {}", p)).collect::<Vec<_>>().join("\n")
                );
                future::pending::<Infallible>().await
            }
            .boxed_local();

            let request = runner.cached_request(id, fs_path, callstack.clone());
            match future::select(request, warn).await {
                Either::Left((result, _timer)) => result,
                Either::Right((never, _)) => match never {},
            }
        }
        .boxed_local()
    }

    /// Load and evaluate one module, without any caching of the evaluation.
    pub fn direct_request(
        &self,
        id: String,
        fs_path: String,
        callstack: Vec<String>,
    ) -> LocalBoxFuture<'static, Result<Value>> {
        let runner = self.clone();
        async move { runner.evaluate_module(id, fs_path, callstack).await }.boxed_local()
    }

    async fn evaluate_module(&self, id: String, fs_path: String, parent_stack: Vec<String>) -> Result<Value> {
        let module_id = canonicalize(&fs_path);
        let mut callstack = parent_stack;
        callstack.push(module_id.clone());

        if let Some(stub) = self.inner.options.request_stubs.get(&id) {
            return Ok(stub.clone());
        }

        let FetchResult { code, externalize } = self.inner.options.fetcher.fetch_module(&id).await?;

        if let Some(path) = externalize {
            tracing::debug!(target: "vnode::native", path = %path, "importing externalized module");
            let exports = self.interoped_import(&path).await?;
            let cached = exports.clone();
            self.cache()
                .update_by_module_id(&module_id, |entry| entry.exports = Some(cached));
            return Ok(exports);
        }

        let Some(code) = code else {
            let importer = callstack
                .len()
                .checked_sub(2)
                .map(|index| callstack[index].clone());
            return Err(RunnerError::LoadFailed { id, importer });
        };

        let module_path = clean_url(&module_id).to_string();
        let exports = ModuleExports::new(&module_path, self.config().interop_default);
        let namespace = exports.value();
        let source = code.clone();
        self.cache().update_by_module_id(&module_id, |entry| {
            entry.code = Some(source);
            entry.exports = Some(namespace);
        });

        let (href, filename) = match Url::from_file_path(&module_path) {
            Ok(url) => {
                let filename = url
                    .to_file_path()
                    .map(|p| slash(&p.to_string_lossy()))
                    .unwrap_or_else(|_| module_path.clone());
                (url.to_string(), filename)
            }
            // Virtual modules have no file
            Err(()) => (module_path.clone(), module_path.clone()),
        };

        let hot = self.inner.options.hot.clone().map(|factory| {
            let weak = self.downgrade();
            let hot_id = format!("/@fs/{}", fs_path.trim_start_matches('/'));
            let getter: Getter = Rc::new(move || {
                let runner = weak
                    .upgrade()
                    .ok_or_else(|| RunnerError::RunnerDropped.into_runtime())?;
                Ok(factory.create_hot_context(&runner, &hot_id))
            });
            getter
        });

        let mut context = ModuleContext::new(filename.clone(), exports.clone(), self.import_fn(&fs_path, &callstack))
            .with_import_meta(import_meta(&href, hot))
            .with_require(self.require_fn(&filename));
        if let Some(mocker) = self.mocker() {
            context = context.with_mocker(mocker.scoped(&fs_path));
        }

        tracing::debug!(target: "vnode::execute", filename = %filename, "executing module");

        let script = ModuleScript::wrap(filename, &code);
        self.inner.options.evaluator.evaluate(&script, context).await?;

        Ok(exports.value())
    }

    /// `__vite_ssr_import__` of the module at `importer`.
    fn import_fn(&self, importer: &str, callstack: &[String]) -> ImportFn {
        let weak = self.downgrade();
        let importer = importer.to_string();
        let callstack = callstack.to_vec();
        Rc::new(move |dep: String| {
            let weak = weak.clone();
            let importer = importer.clone();
            let callstack = callstack.clone();
            async move {
                let runner = weak.upgrade().ok_or(RunnerError::RunnerDropped)?;
                let (id, fs_path) = runner.resolve_url(&dep, Some(&importer)).await?;
                runner.dependency_request(id, fs_path, callstack).await
            }
            .boxed_local()
        })
    }

    /// `require` of the module at `filename`.
    fn require_fn(&self, filename: &str) -> Value {
        let native = Rc::clone(&self.inner.options.native);
        let parent = filename.to_string();
        Value::Function(FunctionRef::native("require", 1, move |args| {
            let specifier = args.first().and_then(Value::as_str).ok_or_else(|| {
                vnode_runtime::Error::type_error("The \"id\" argument must be of type string")
            })?;
            native
                .require(specifier, &parent)
                .map_err(RunnerError::into_runtime)
        }))
    }
}

impl fmt::Debug for ModuleRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleRunner")
            .field("root", &self.inner.root)
            .field("cache", self.cache())
            .field("mocking", &self.inner.mocker.borrow().is_some())
            .finish()
    }
}
