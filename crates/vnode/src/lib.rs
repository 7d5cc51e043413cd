// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! # vnode
//!
//! An on-demand module runner. Modules arrive already transformed from a
//! transform provider and are evaluated in-process, with:
//!
//! - at-most-once evaluation per module, shared by concurrent importers
//! - circular import detection with partial exports
//! - externalization of packages and built-ins to the native loader
//! - CommonJS/ESM `default` interop
//! - invalidation of dependents and dependencies
//! - inline source map extraction
//! - **module mocking** (factories, `__mocks__` folders and auto-mocks)
//!
//! ## Evaluation
//!
//! The runner hands each transformed module to an [`Evaluator`]. The only
//! evaluator shipped here, [`NativeEvaluator`], runs Rust module bodies
//! registered per filename with [`NativeEvaluator::define`]. It never
//! executes the fetched `code`, which is still fetched, wrapped and source
//! mapped. Running fetched JavaScript requires plugging in an evaluator
//! backed by a script engine.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::rc::Rc;
//! use vnode::{FsFetcher, FsResolver, ModuleRunner, NativeEvaluator, RunnerOptions};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> vnode::Result<()> {
//!     let evaluator = Rc::new(NativeEvaluator::new());
//!     evaluator.define("/project/src/main.js", |ctx| async move {
//!         ctx.import("./app.js").await?;
//!         Ok(())
//!     });
//!     let options = RunnerOptions::new(Rc::new(FsFetcher::default()), evaluator)
//!         .with_resolver(Rc::new(FsResolver::new("/project")));
//!     let runner = ModuleRunner::new(options);
//!     runner.execute_file("src/main.js").await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Mocking
//!
//! ```rust,ignore
//! let mocker = runner.enable_mocking();
//! mocker.queue_mock("./math", "/project/src/main.js", None);
//! runner.execute_file("src/main.js").await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod mocker;
pub mod module_system;

// Re-exports
pub use config::{DepsConfig, RunnerConfig};
pub use error::{Result, RunnerError};
pub use mocker::{MockFactory, MockKind, MockOutcome, Mocker, MockerConfig, ScopedMocker};
pub use module_system::{
    Evaluator, FetchResult, FsFetcher, FsResolver, HotContextFactory, MemoryFetcher, ModuleCache, ModuleContext,
    ModuleExports, ModuleFetcher, ModuleRunner, ModuleScript, NativeEvaluator, NativeImporter, NativeModules,
    ResolveId, ResolvedId, RunnerOptions, WeakRunner,
};
pub use vnode_runtime::{ObjectRef, Value};
