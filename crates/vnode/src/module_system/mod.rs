// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Module loading and execution
//!
//! Modules are fetched as already-transformed code, wrapped into an async
//! function taking the [`context::CONTEXT_KEYS`] bindings, and evaluated at
//! most once per runner.
//!
//! ## Inlined modules
//! - `__vite_ssr_import__` / `__vite_ssr_dynamic_import__`
//! - `__vite_ssr_exports__` with live getter bindings
//! - CommonJS `exports` / `module.exports` aliasing
//! - `import.meta.url` and a lazy `import.meta.hot`
//!
//! ## Externalized modules
//! - Built-ins and packages are handed to the native loader
//! - `default` interop for CommonJS packages

pub mod builtins;
pub mod cache;
pub mod context;
pub mod evaluator;
pub mod exports;
pub mod externalize;
pub mod normalize;
pub mod provider;
pub mod resolver;
pub mod runner;
pub mod source_map;

pub use builtins::{is_builtin, BUILTIN_MODULES};
pub use cache::{ModuleCache, ModuleEntry, SharedExecution};
pub use context::{import_meta, Binding, ImportFn, ModuleContext, CONTEXT_KEYS};
pub use evaluator::{strip_shebang, Evaluator, ModuleScript, NativeEvaluator};
pub use exports::{interoped_namespace, should_interop, ModuleExports};
pub use externalize::{guess_cjs_version, is_valid_node_import, Externalizer};
pub use normalize::{canonicalize, normalize_module_id, normalize_request_id, slash};
pub use provider::{
    FetchResult, FsFetcher, HotContextFactory, MemoryFetcher, ModuleFetcher, NativeImporter, NativeModules,
    ResolveId, ResolvedId,
};
pub use resolver::FsResolver;
pub use runner::{default_request_stubs, ModuleRunner, RunnerOptions, WeakRunner};
pub use source_map::extract_source_map;
