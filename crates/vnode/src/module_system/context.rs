// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Execution context of an inlined module.
//!
//! Module code only sees the bindings listed in [`CONTEXT_KEYS`], plus the
//! scoped mocking API when mocking is enabled.

use futures::future::LocalBoxFuture;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use vnode_runtime::{Getter, ObjectRef, Property, Setter, Slot, Value};

use super::exports::ModuleExports;
use super::normalize::dirname;
use crate::error::Result;
use crate::mocker::ScopedMocker;

/// Names of the bindings injected into every module, in parameter order.
pub const CONTEXT_KEYS: [&str; 10] = [
    "__vite_ssr_import__",
    "__vite_ssr_dynamic_import__",
    "__vite_ssr_exports__",
    "__vite_ssr_exportAll__",
    "__vite_ssr_import_meta__",
    "require",
    "exports",
    "module",
    "__filename",
    "__dirname",
];

/// Resolves and requests a dependency of the current module.
pub type ImportFn = Rc<dyn Fn(String) -> LocalBoxFuture<'static, Result<Value>>>;

/// A binding injected into module code.
#[derive(Clone)]
pub enum Binding {
    /// Plain value
    Value(Value),
    /// Static or dynamic import function
    Import(ImportFn),
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Binding::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Binding::Import(_) => f.write_str("Import(<fn>)"),
        }
    }
}

/// Builds the `import.meta` object of a module.
///
/// With a `hot` factory, `import.meta.hot` is created on first read and can
/// be overwritten.
pub fn import_meta(url: &str, hot: Option<Getter>) -> Value {
    let meta = ObjectRef::from_entries([("url", Value::from(url))]);

    if let Some(create) = hot {
        let slot: Rc<RefCell<Option<Value>>> = Rc::new(RefCell::new(None));
        let cached = Rc::clone(&slot);
        let get: Getter = Rc::new(move || {
            if let Some(hot) = cached.borrow().as_ref() {
                return Ok(hot.clone());
            }
            let hot = create()?;
            *cached.borrow_mut() = Some(hot.clone());
            Ok(hot)
        });
        let set: Setter = Rc::new(move |value| {
            *slot.borrow_mut() = Some(value);
            Ok(())
        });
        // Defining on a fresh object cannot fail
        let _ = meta.define_property(
            "hot",
            Property {
                slot: Slot::Accessor {
                    get: Some(get),
                    set: Some(set),
                },
                writable: false,
                enumerable: true,
                configurable: true,
            },
        );
    }

    Value::Object(meta)
}

/// Bindings of one module evaluation.
#[derive(Clone)]
pub struct ModuleContext {
    import: ImportFn,
    exports: ModuleExports,
    import_meta: Value,
    require: Value,
    cjs_exports: Value,
    module: Value,
    filename: String,
    dirname: String,
    mocker: Option<ScopedMocker>,
}

impl ModuleContext {
    /// Creates a context for the module at `filename`.
    pub fn new(filename: impl Into<String>, exports: ModuleExports, import: ImportFn) -> Self {
        let filename = filename.into();
        let dirname = dirname(&filename).to_string();
        Self {
            import,
            cjs_exports: exports.cjs_exports(),
            module: exports.module_object(),
            exports,
            import_meta: Value::Object(ObjectRef::new()),
            require: Value::Undefined,
            filename,
            dirname,
            mocker: None,
        }
    }

    /// Sets `import.meta`
    pub fn with_import_meta(mut self, meta: Value) -> Self {
        self.import_meta = meta;
        self
    }

    /// Sets the `require` function
    pub fn with_require(mut self, require: Value) -> Self {
        self.require = require;
        self
    }

    /// Exposes the mocking API
    pub fn with_mocker(mut self, mocker: ScopedMocker) -> Self {
        self.mocker = Some(mocker);
        self
    }

    /// `__vite_ssr_import__(specifier)`
    pub fn import(&self, specifier: &str) -> LocalBoxFuture<'static, Result<Value>> {
        (self.import)(specifier.to_string())
    }

    /// `__vite_ssr_dynamic_import__(specifier)`
    pub fn dynamic_import(&self, specifier: &str) -> LocalBoxFuture<'static, Result<Value>> {
        (self.import)(specifier.to_string())
    }

    /// `__vite_ssr_exports__`
    pub fn exports(&self) -> &ModuleExports {
        &self.exports
    }

    /// `__vite_ssr_exportAll__(source)`
    pub fn export_all(&self, source: &Value) {
        self.exports.export_all(source);
    }

    /// `__vite_ssr_import_meta__`
    pub fn import_meta(&self) -> &Value {
        &self.import_meta
    }

    /// `require(specifier)`
    pub fn require(&self, specifier: &str) -> Result<Value> {
        Ok(self.require.call(&[Value::from(specifier)])?)
    }

    /// The `require` function itself
    pub fn require_fn(&self) -> &Value {
        &self.require
    }

    /// The CommonJS `exports` binding
    pub fn cjs_exports(&self) -> &Value {
        &self.cjs_exports
    }

    /// The CommonJS `module` binding
    pub fn module(&self) -> &Value {
        &self.module
    }

    /// `__filename`
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// `__dirname`
    pub fn dirname(&self) -> &str {
        &self.dirname
    }

    /// Mocking API scoped to this module, when mocking is enabled
    pub fn mocker(&self) -> Option<&ScopedMocker> {
        self.mocker.as_ref()
    }

    /// Every binding, in [`CONTEXT_KEYS`] order.
    pub fn bindings(&self) -> Vec<(&'static str, Binding)> {
        let exports = self.exports.clone();
        let export_all = vnode_runtime::FunctionRef::native("__vite_ssr_exportAll__", 1, move |args| {
            exports.export_all(args.first().unwrap_or(&Value::Undefined));
            Ok(Value::Undefined)
        });

        let values = [
            Binding::Import(Rc::clone(&self.import)),
            Binding::Import(Rc::clone(&self.import)),
            Binding::Value(self.exports.value()),
            Binding::Value(Value::Function(export_all)),
            Binding::Value(self.import_meta.clone()),
            Binding::Value(self.require.clone()),
            Binding::Value(self.cjs_exports.clone()),
            Binding::Value(self.module.clone()),
            Binding::Value(Value::from(self.filename.as_str())),
            Binding::Value(Value::from(self.dirname.as_str())),
        ];
        CONTEXT_KEYS.into_iter().zip(values).collect()
    }
}

impl fmt::Debug for ModuleContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleContext")
            .field("filename", &self.filename)
            .field("mocking", &self.mocker.is_some())
            .finish()
    }
}
