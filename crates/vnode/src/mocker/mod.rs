// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Module mocking.
//!
//! Test code declares mocks before the module graph is known, so
//! declarations are queued and resolved right before the next lookup. A
//! registered module is replaced by:
//!
//! - the exports of a factory, guarded against reads of missing exports;
//! - a module from a `__mocks__` folder next to it (or under the project
//!   root for packages and built-ins);
//! - a structural auto-mock of the real module.

mod automock;
mod registry;

pub use automock::mock_object;
pub use registry::{MockFactory, MockKind, MockRegistry, PendingMock, GLOBAL_SUITE};

use futures::future::{try_join_all, LocalBoxFuture, Shared};
use futures::FutureExt;
use owo_colors::OwoColorize;
use std::cell::RefCell;
use std::fmt;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use vnode_runtime::{ObjectRef, ProxyHandler, Value};

use crate::config::RunnerConfig;
use crate::error::{Result, RunnerError};
use crate::module_system::builtins::is_builtin;
use crate::module_system::normalize::{canonicalize, dirname, slash};
use crate::module_system::runner::{ModuleRunner, WeakRunner};

tokio::task_local! {
    /// Mock keys whose factories are being polled on this task.
    static RUNNING_FACTORIES: Vec<String>;
}

/// Whether the factory of `key` is an ancestor of the current request.
fn in_factory(key: &str) -> bool {
    RUNNING_FACTORIES
        .try_with(|running| running.iter().any(|running| running == key))
        .unwrap_or(false)
}

/// Cache key of the mock of `id`.
pub fn mock_key(id: &str) -> String {
    format!("mock:{}", id)
}

/// Mocker configuration.
#[derive(Debug, Clone)]
pub struct MockerConfig {
    /// Project root, home of the top-level `__mocks__` folder
    pub root: PathBuf,
}

impl From<&RunnerConfig> for MockerConfig {
    fn from(config: &RunnerConfig) -> Self {
        Self {
            root: config.root.clone(),
        }
    }
}

/// What to do with a dependency request.
#[derive(Debug, Clone)]
pub enum MockOutcome {
    /// Use these exports
    Exports(Value),
    /// Load this module instead
    Redirect(String),
    /// The dependency is not mocked
    Passthrough,
}

/// A resolved mock target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockTarget {
    /// Module id
    pub id: String,
    /// File system path
    pub fs_path: String,
    /// The specifier, for packages and modules that could not be resolved
    pub external: Option<String>,
}

struct MockerInner {
    runner: WeakRunner,
    config: MockerConfig,
    pending: RefCell<Vec<PendingMock>>,
    resolving: RefCell<Option<Shared<LocalBoxFuture<'static, Result<()>>>>>,
    registry: RefCell<MockRegistry>,
    suite_file: RefCell<Option<String>>,
}

/// Mocking session of a runner.
///
/// Cloning yields another handle to the same session.
#[derive(Clone)]
pub struct Mocker {
    inner: Rc<MockerInner>,
}

impl Mocker {
    pub(crate) fn new(runner: WeakRunner, config: MockerConfig) -> Self {
        Self {
            inner: Rc::new(MockerInner {
                runner,
                config,
                pending: RefCell::new(Vec::new()),
                resolving: RefCell::new(None),
                registry: RefCell::new(MockRegistry::new()),
                suite_file: RefCell::new(None),
            }),
        }
    }

    fn runner(&self) -> Result<ModuleRunner> {
        self.inner.runner.upgrade().ok_or(RunnerError::RunnerDropped)
    }

    /// The mocker configuration
    pub fn config(&self) -> &MockerConfig {
        &self.inner.config
    }

    /// Set the suite file registrations are made for; `None` is global.
    pub fn set_suite_file(&self, path: Option<&str>) {
        *self.inner.suite_file.borrow_mut() = path.map(str::to_string);
    }

    /// The current suite file, `global` when unset
    pub fn suite_file(&self) -> String {
        self.inner
            .suite_file
            .borrow()
            .clone()
            .unwrap_or_else(|| GLOBAL_SUITE.to_string())
    }

    /// Declare that `id`, imported from `importer`, is mocked.
    pub fn queue_mock(&self, id: &str, importer: &str, factory: Option<MockFactory>) {
        self.inner.pending.borrow_mut().push(PendingMock::Mock {
            id: id.to_string(),
            importer: importer.to_string(),
            factory,
        });
    }

    /// Declare that `id`, imported from `importer`, is not mocked.
    pub fn queue_unmock(&self, id: &str, importer: &str) {
        self.inner.pending.borrow_mut().push(PendingMock::Unmock {
            id: id.to_string(),
            importer: importer.to_string(),
        });
    }

    /// Number of declarations waiting to be resolved
    pub fn pending_count(&self) -> usize {
        self.inner.pending.borrow().len()
    }

    /// Resolve every queued declaration and apply it, in declaration order.
    ///
    /// Concurrent callers wait for the same resolution, so no lookup runs
    /// while queued mocks are still unregistered. Declarations leave the
    /// queue only once the whole batch is applied; after a failure they stay
    /// queued and the next lookup fails the same way.
    pub async fn resolve_mocks(&self) -> Result<()> {
        loop {
            let in_flight = self.inner.resolving.borrow().clone();
            if let Some(resolution) = in_flight {
                resolution.await?;
                continue;
            }

            let batch = self.inner.pending.borrow().clone();
            if batch.is_empty() {
                return Ok(());
            }
            let mocker = self.clone();
            let resolution = async move {
                let count = batch.len();
                let applied = mocker.apply_declarations(batch).await;
                if applied.is_ok() {
                    let mut pending = mocker.inner.pending.borrow_mut();
                    let count = count.min(pending.len());
                    pending.drain(..count);
                }
                mocker.inner.resolving.borrow_mut().take();
                applied
            }
            .boxed_local()
            .shared();
            *self.inner.resolving.borrow_mut() = Some(resolution.clone());
            return resolution.await;
        }
    }

    async fn apply_declarations(&self, pending: Vec<PendingMock>) -> Result<()> {
        let targets = try_join_all(
            pending
                .iter()
                .map(|mock| self.resolve_path(mock.id(), mock.importer())),
        )
        .await?;

        for (mock, target) in pending.into_iter().zip(targets) {
            match mock {
                PendingMock::Unmock { .. } => self.unmock_path(&target.fs_path),
                PendingMock::Mock { id, factory, .. } => {
                    self.mock_path(&id, &target.fs_path, target.external.as_deref(), factory)
                }
            }
        }
        Ok(())
    }

    /// The mock registered for canonical `id`
    pub fn get_dependency_mock(&self, id: &str) -> Option<MockKind> {
        self.inner.registry.borrow().get(&self.suite_file(), id)
    }

    /// Resolve `raw_id` imported from `importer`.
    pub async fn resolve_path(&self, raw_id: &str, importer: &str) -> Result<MockTarget> {
        let runner = self.runner()?;
        let (id, fs_path) = runner.resolve_url(raw_id, Some(importer)).await?;
        // Packages and unresolved modules (mocked without being installed)
        let external = (!Path::new(&fs_path).is_absolute() || fs_path.contains("/node_modules/"))
            .then(|| raw_id.to_string());
        Ok(MockTarget {
            id,
            fs_path,
            external,
        })
    }

    /// Find the `__mocks__` file of the module at `mock_path`.
    ///
    /// Local files look next to themselves (`dir/__mocks__/file`). Packages,
    /// built-ins and missing files look under `<root>/__mocks__`, mirroring
    /// the specifier's folders and matching the basename without extension.
    pub fn resolve_mock_path(&self, mock_path: &str, external: Option<&str>) -> Option<String> {
        let path = external.unwrap_or(mock_path);

        if external.is_some() || is_builtin(mock_path) || !Path::new(mock_path).exists() {
            let mock_dirname = dirname(path).trim_start_matches('/');
            let mut mock_folder = self.inner.config.root.join("__mocks__");
            if !mock_dirname.is_empty() && mock_dirname != "." {
                mock_folder.push(mock_dirname);
            }
            let mut files: Vec<PathBuf> = std::fs::read_dir(&mock_folder)
                .ok()?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .collect();
            files.sort();

            let base_original = basename(path);
            return files
                .into_iter()
                .find(|file| file.file_stem().is_some_and(|stem| stem.to_string_lossy() == base_original))
                .map(|file| slash(&file.to_string_lossy()));
        }

        let full_path = format!("{}/__mocks__/{}", dirname(path), basename(path));
        Path::new(&full_path).exists().then_some(full_path)
    }

    /// Register a mock of the module at `path`, declared as `original_id`.
    pub fn mock_path(&self, original_id: &str, path: &str, external: Option<&str>, factory: Option<MockFactory>) {
        let suite = self.suite_file();
        let id = canonicalize(path);
        let kind = match factory {
            Some(factory) => MockKind::Factory(factory),
            None => match self.resolve_mock_path(path, external) {
                Some(mock) => MockKind::Path(mock),
                None => MockKind::Automock,
            },
        };
        tracing::debug!(target: "vnode::mocker", suite = %suite, id = %id, kind = ?kind, "mock registered");
        self.inner
            .registry
            .borrow_mut()
            .insert(&suite, &id, original_id, kind);
    }

    /// Drop the mock of the module at `path`, and its cached exports.
    pub fn unmock_path(&self, path: &str) {
        let suite = self.suite_file();
        let id = canonicalize(path);
        self.inner.registry.borrow_mut().remove(&suite, &id);
        if let Ok(runner) = self.runner() {
            runner.cache().delete_by_module_id(&mock_key(&id));
        }
        tracing::debug!(target: "vnode::mocker", suite = %suite, id = %id, "mock removed");
    }

    /// Offer a dependency request for `url` to the mocks.
    pub async fn request_with_mock(&self, url: &str, callstack: &[String]) -> Result<MockOutcome> {
        self.resolve_mocks().await?;

        let id = canonicalize(url);
        let Some(mock) = self.get_dependency_mock(&id) else {
            return Ok(MockOutcome::Passthrough);
        };
        let key = mock_key(&id);

        match mock {
            MockKind::Automock => {
                let runner = self.runner()?;
                if let Some(exports) = runner.cache().get_by_module_id(&key).exports {
                    return Ok(MockOutcome::Exports(exports));
                }
                // Registered before loading, so cyclic requests get the same object
                let exports = Value::Object(ObjectRef::new());
                let placeholder = exports.clone();
                runner
                    .cache()
                    .update_by_module_id(&key, |entry| entry.exports = Some(placeholder));
                let module = runner
                    .direct_request(url.to_string(), url.to_string(), callstack.to_vec())
                    .await?;
                mock_object(&module, &exports);
                Ok(MockOutcome::Exports(exports))
            }
            // Requests made while the factory runs get the real module
            MockKind::Factory(factory) if !callstack.contains(&id) && !in_factory(&key) => {
                Ok(MockOutcome::Exports(self.call_factory(&id, &factory).await?))
            }
            MockKind::Path(path) if !callstack.contains(&canonicalize(&path)) => {
                Ok(MockOutcome::Redirect(path))
            }
            _ => Ok(MockOutcome::Passthrough),
        }
    }

    /// Exports of the factory mock of `id`, produced once.
    async fn call_factory(&self, id: &str, factory: &MockFactory) -> Result<Value> {
        let runner = self.runner()?;
        let key = mock_key(id);
        let entry = runner.cache().get_by_module_id(&key);
        if let Some(exports) = entry.exports {
            return Ok(exports);
        }
        if let Some(promise) = entry.promise {
            return promise.await;
        }

        let mocker = self.clone();
        let module_id = id.to_string();
        let factory = factory.clone();
        let mut running = RUNNING_FACTORIES
            .try_with(Vec::clone)
            .unwrap_or_default();
        running.push(key.clone());
        let promise = RUNNING_FACTORIES
            .scope(running, async move { mocker.run_factory(&module_id, &factory).await })
            .boxed_local()
            .shared();
        let pending = promise.clone();
        runner
            .cache()
            .update_by_module_id(&key, |entry| entry.promise = Some(pending));

        let result = promise.await;
        runner.cache().update_by_module_id(&key, |entry| {
            entry.promise = None;
            if let Ok(exports) = &result {
                entry.exports = Some(exports.clone());
            }
        });
        result
    }

    async fn run_factory(&self, id: &str, factory: &MockFactory) -> Result<Value> {
        let mock_path = self
            .inner
            .registry
            .borrow()
            .raw_id(&self.suite_file(), id)
            .unwrap_or_else(|| id.to_string());

        let exports = factory.call().await.map_err(|cause| RunnerError::MockFactory {
            path: mock_path.clone(),
            cause: Box::new(cause),
        })?;

        let Value::Object(target) = exports else {
            return Err(RunnerError::InvalidMockFactory { path: mock_path });
        };
        tracing::debug!(target: "vnode::mocker", id = %id, "factory mock created");
        Ok(Value::Object(ObjectRef::proxy(
            target,
            Rc::new(FactoryExports { mock_path }),
        )))
    }

    /// Import the real module, bypassing mocks.
    pub async fn import_actual(&self, raw_id: &str, importer: &str) -> Result<Value> {
        let target = self.resolve_path(raw_id, importer).await?;
        let runner = self.runner()?;
        runner
            .cached_request(target.id, target.fs_path, vec![canonicalize(importer)])
            .await
    }

    /// Import the mock of a module: the registered one, the `__mocks__`
    /// file, or an auto-mock of the real module.
    pub async fn import_mock(&self, raw_id: &str, importer: &str) -> Result<Value> {
        self.resolve_mocks().await?;
        let target = self.resolve_path(raw_id, importer).await?;
        let runner = self.runner()?;
        let id = canonicalize(&target.fs_path);

        let mock = match self.get_dependency_mock(&id) {
            Some(mock) => mock,
            None => match self.resolve_mock_path(&target.fs_path, target.external.as_deref()) {
                Some(path) => MockKind::Path(path),
                None => MockKind::Automock,
            },
        };
        let callstack = vec![canonicalize(importer)];

        match mock {
            MockKind::Automock => {
                let module = runner
                    .cached_request(target.id, target.fs_path, callstack)
                    .await?;
                let mocked = Value::Object(ObjectRef::new());
                mock_object(&module, &mocked);
                Ok(mocked)
            }
            MockKind::Factory(_) if in_factory(&mock_key(&id)) => {
                runner
                    .cached_request(target.id, target.fs_path, callstack)
                    .await
            }
            MockKind::Factory(factory) => self.call_factory(&id, &factory).await,
            MockKind::Path(path) => runner.dependency_request(path.clone(), path, callstack).await,
        }
    }

    /// The mocking API of the module at `importer`
    pub fn scoped(&self, importer: &str) -> ScopedMocker {
        ScopedMocker {
            mocker: self.clone(),
            importer: importer.to_string(),
        }
    }

    /// Build a structural mock of `object` into `target`.
    pub fn mock_object(&self, object: &Value, target: &Value) {
        mock_object(object, target);
    }

    /// Forget every registration and queued declaration
    pub fn reset(&self) {
        self.inner.pending.borrow_mut().clear();
        self.inner.resolving.borrow_mut().take();
        self.inner.registry.borrow_mut().clear();
    }
}

impl fmt::Debug for Mocker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mocker")
            .field("suite_file", &self.suite_file())
            .field("pending", &self.pending_count())
            .finish()
    }
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Guards the exports of a factory mock against reads of missing exports.
struct FactoryExports {
    mock_path: String,
}

impl ProxyHandler for FactoryExports {
    fn get(&self, target: &ObjectRef, key: &str) -> vnode_runtime::Result<Value> {
        // Promise detection reads `then`, which must not throw
        if key != "then" && !target.has(key) {
            let snippet = format!(
                "mock(\"{path}\", async () => {{\n  const actual = await import_actual(\"{path}\")\n  return {{\n    ...actual,\n    // your mocked methods\n  }},\n}})",
                path = self.mock_path
            );
            return Err(vnode_runtime::Error::generic(format!(
                "[vnode] No \"{}\" export is defined on the \"{}\" mock. Did you forget to return it from \"mock\"?\n\
                 If you need to partially mock a module, you can use \"import_actual\" inside:\n\n{}\n",
                key,
                self.mock_path,
                snippet.green()
            )));
        }
        target.get(key)
    }
}

/// Mocking API bound to one module.
#[derive(Clone, Debug)]
pub struct ScopedMocker {
    mocker: Mocker,
    importer: String,
}

impl ScopedMocker {
    /// The module this API belongs to
    pub fn importer(&self) -> &str {
        &self.importer
    }

    /// `mock(id)` or `mock(id, factory)`
    pub fn mock(&self, id: &str, factory: Option<MockFactory>) {
        self.mocker.queue_mock(id, &self.importer, factory);
    }

    /// `unmock(id)`
    pub fn unmock(&self, id: &str) {
        self.mocker.queue_unmock(id, &self.importer);
    }

    /// `import_actual(id)`
    pub fn import_actual(&self, id: &str) -> LocalBoxFuture<'static, Result<Value>> {
        let mocker = self.mocker.clone();
        let id = id.to_string();
        let importer = self.importer.clone();
        async move { mocker.import_actual(&id, &importer).await }.boxed_local()
    }

    /// `import_mock(id)`
    pub fn import_mock(&self, id: &str) -> LocalBoxFuture<'static, Result<Value>> {
        let mocker = self.mocker.clone();
        let id = id.to_string();
        let importer = self.importer.clone();
        async move { mocker.import_mock(&id, &importer).await }.boxed_local()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module_system::evaluator::NativeEvaluator;
    use crate::module_system::provider::MemoryFetcher;
    use crate::module_system::runner::RunnerOptions;
    use std::fs;

    fn runner_at(root: &Path) -> ModuleRunner {
        let config = RunnerConfig {
            root: root.to_path_buf(),
            ..RunnerConfig::default()
        };
        ModuleRunner::new(
            RunnerOptions::new(Rc::new(MemoryFetcher::new()), Rc::new(NativeEvaluator::new()))
                .with_config(config),
        )
    }

    fn touch(root: &Path, relative: &str) -> String {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "").unwrap();
        slash(&path.to_string_lossy())
    }

    #[test]
    fn test_suite_file_defaults_to_global() {
        let runner = runner_at(Path::new("/"));
        let mocker = runner.enable_mocking();
        assert_eq!(mocker.suite_file(), "global");
        mocker.set_suite_file(Some("/test/a.test.js"));
        assert_eq!(mocker.suite_file(), "/test/a.test.js");
    }

    #[test]
    fn test_resolve_mock_path_sibling_folder() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let original = touch(root, "src/math.js");
        let mock = touch(root, "src/__mocks__/math.js");

        let runner = runner_at(root);
        let mocker = runner.enable_mocking();
        assert_eq!(mocker.resolve_mock_path(&original, None), Some(mock));

        let other = touch(root, "src/other.js");
        assert_eq!(mocker.resolve_mock_path(&other, None), None);
    }

    #[test]
    fn test_resolve_mock_path_root_folder() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let lodash = touch(root, "__mocks__/lodash.ts");
        let nested = touch(root, "__mocks__/@vueuse/integration/useJwt.js");
        let fs_mock = touch(root, "__mocks__/fs.cjs");

        let runner = runner_at(root);
        let mocker = runner.enable_mocking();
        assert_eq!(
            mocker.resolve_mock_path("/project/node_modules/lodash/index.js", Some("lodash")),
            Some(lodash)
        );
        assert_eq!(
            mocker.resolve_mock_path("@vueuse/integration/useJwt", Some("@vueuse/integration/useJwt")),
            Some(nested)
        );
        assert_eq!(mocker.resolve_mock_path("fs", None), Some(fs_mock));
        assert_eq!(mocker.resolve_mock_path("vscode", Some("vscode")), None);
    }

    #[tokio::test]
    async fn test_declarations_resolve_in_order() {
        let runner = runner_at(Path::new("/"));
        let mocker = runner.enable_mocking();
        mocker.queue_mock("/src/a.js", "/src/main.js", Some(MockFactory::sync(|| Ok(Value::Object(ObjectRef::new())))));
        mocker.queue_unmock("/src/a.js", "/src/main.js");
        mocker.queue_mock("/src/b.js", "/src/main.js", None);
        assert_eq!(mocker.pending_count(), 3);

        mocker.resolve_mocks().await.unwrap();
        assert_eq!(mocker.pending_count(), 0);
        assert!(mocker.get_dependency_mock("/src/a.js").is_none());
        assert!(matches!(mocker.get_dependency_mock("/src/b.js"), Some(MockKind::Automock)));
    }

    #[tokio::test]
    async fn test_unresolved_modules_are_external() {
        let runner = runner_at(Path::new("/"));
        let mocker = runner.enable_mocking();
        let target = mocker.resolve_path("vscode", "/src/main.js").await.unwrap();
        assert_eq!(target.external.as_deref(), Some("vscode"));
        let target = mocker.resolve_path("/src/a.js", "/src/main.js").await.unwrap();
        assert_eq!(target.external, None);
    }

    #[tokio::test]
    async fn test_factory_errors() {
        let runner = runner_at(Path::new("/"));
        let mocker = runner.enable_mocking();
        mocker.mock_path("./boom", "/src/boom.js", None, Some(MockFactory::sync(|| {
            Err(vnode_runtime::Error::generic("boom").into())
        })));
        mocker.mock_path("./number", "/src/number.js", None, Some(MockFactory::sync(|| Ok(Value::from(1)))));

        let err = mocker.request_with_mock("/src/boom.js", &[]).await.unwrap_err();
        assert!(matches!(&err, RunnerError::MockFactory { path, .. } if path == "./boom"));
        let err = mocker.request_with_mock("/src/number.js", &[]).await.unwrap_err();
        assert!(matches!(&err, RunnerError::InvalidMockFactory { path } if path == "./number"));
    }

    #[tokio::test]
    async fn test_factory_is_memoized_and_guarded() {
        let runner = runner_at(Path::new("/"));
        let mocker = runner.enable_mocking();
        let calls = Rc::new(std::cell::Cell::new(0));
        let counter = Rc::clone(&calls);
        mocker.mock_path("./math", "/src/math.js", None, Some(MockFactory::sync(move || {
            counter.set(counter.get() + 1);
            Ok(Value::Object(ObjectRef::from_entries([("pi", Value::from(2.5))])))
        })));

        let MockOutcome::Exports(first) = mocker.request_with_mock("/src/math.js", &[]).await.unwrap() else {
            panic!("expected exports");
        };
        let MockOutcome::Exports(second) = mocker.request_with_mock("/src/math.js", &[]).await.unwrap() else {
            panic!("expected exports");
        };
        assert_eq!(first, second);
        assert_eq!(calls.get(), 1);

        assert_eq!(first.get("pi").unwrap(), Value::from(2.5));
        assert_eq!(first.get("then").unwrap(), Value::Undefined);
        let err = first.get("tau").unwrap_err().to_string();
        assert!(err.contains("No \"tau\" export is defined on the \"./math\" mock"));
        assert!(err.contains("import_actual(\"./math\")"));

        // Inside its own module the factory is bypassed
        let outcome = mocker
            .request_with_mock("/src/math.js", &["/src/math.js".to_string()])
            .await
            .unwrap();
        assert!(matches!(outcome, MockOutcome::Passthrough));

        mocker.unmock_path("/src/math.js");
        assert!(!runner.cache().keys().contains(&mock_key("/src/math.js")));
    }
}
