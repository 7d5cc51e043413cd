// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Module exports and CommonJS/ESM interop.
//!
//! A module's exports are a `Module`-class namespace object. CommonJS code
//! writes through [`ModuleExports::set`] and [`ModuleExports::set_module_exports`],
//! which keep the namespace's `default` and its named exports in sync:
//!
//! - `module.exports = value` makes `value` the default export and exposes
//!   its enumerable keys as named exports.
//! - `exports.key = value` writes into the default export and adds a named
//!   export, unless the default export is a primitive, in which case the
//!   named export reads as `undefined`.

use std::rc::Rc;
use vnode_runtime::{ObjectClass, ObjectRef, Property, ProxyHandler, Result, Setter, Slot, Value};

/// Defines `key` on `exports` as an enumerable, configurable getter.
pub fn define_export<F>(exports: &ObjectRef, key: &str, get: F) -> Result<()>
where
    F: Fn() -> Result<Value> + 'static,
{
    exports.define_getter(key, get)
}

/// Re-exports every enumerable key of `source` except `default` as a live
/// binding on `exports`.
///
/// Self-exports, primitives and arrays are ignored. Keys that cannot be
/// defined are skipped.
pub fn export_all(exports: &ObjectRef, source: &Value) {
    if let Value::Object(obj) = source {
        if obj.ptr_eq(exports) {
            return;
        }
    }
    if source.is_primitive() || source.is_array() {
        return;
    }

    for key in source.enumerable_keys() {
        if key == "default" {
            continue;
        }
        let source = source.clone();
        let name = key.clone();
        let _ = define_export(exports, &key, move || source.get(&name));
    }
}

/// Whether an externalized module at `path` gets its default export
/// unwrapped.
pub fn should_interop(path: &str, module: &Value, interop_default: bool) -> bool {
    if !interop_default {
        return false;
    }
    // ESM files are never interop-ed
    !path.ends_with(".mjs") && module.has("default")
}

/// Splits a natively imported module into the object to read named exports
/// from and its default export, honouring `__esModule` markers.
pub fn interop_module(module: &Value) -> (Value, Value) {
    if module.is_primitive() {
        let wrapper = ObjectRef::from_entries([("default", module.clone())]);
        return (Value::Object(wrapper), module.clone());
    }

    let mut module = module.clone();
    let mut default_export = if module.has("default") {
        module.get("default").unwrap_or_default()
    } else {
        module.clone()
    };

    if !default_export.is_primitive() && default_export.has("__esModule") {
        module = default_export.clone();
        if default_export.has("default") {
            default_export = default_export.get("default").unwrap_or_default();
        }
    }

    (module, default_export)
}

/// Namespace view of an interop-ed module: `default` is the default export,
/// other keys fall back from the module to the default export.
struct InteropNamespace {
    module: Value,
    default_export: Value,
}

impl ProxyHandler for InteropNamespace {
    fn get(&self, _target: &ObjectRef, key: &str) -> Result<Value> {
        if key == "default" {
            return Ok(self.default_export.clone());
        }
        let value = self.module.get(key)?;
        if !value.is_nullish() {
            return Ok(value);
        }
        if self.default_export.is_nullish() {
            return Ok(Value::Undefined);
        }
        self.default_export.get(key)
    }

    fn has(&self, _target: &ObjectRef, key: &str) -> bool {
        if key == "default" {
            return !self.default_export.is_undefined();
        }
        self.module.has(key) || self.default_export.has(key)
    }

    fn own_keys(&self, target: &ObjectRef) -> Vec<String> {
        let mut keys = target.keys();
        if !self.default_export.is_undefined() && !keys.iter().any(|k| k == "default") {
            keys.push("default".to_string());
        }
        keys
    }
}

/// Applies [`should_interop`] and [`interop_module`] to a natively imported
/// module, returning the namespace consumers see.
pub fn interoped_namespace(path: &str, module: Value, interop_default: bool) -> Value {
    if !should_interop(path, &module, interop_default) {
        return module;
    }
    let (module, default_export) = interop_module(&module);
    let target = module.properties().unwrap_or_default();
    Value::Object(ObjectRef::proxy(
        target,
        Rc::new(InteropNamespace {
            module,
            default_export,
        }),
    ))
}

/// The exports of one inlined module.
///
/// Cloning yields another handle to the same namespace.
#[derive(Clone, Debug)]
pub struct ModuleExports {
    namespace: ObjectRef,
    module_path: Rc<str>,
    interop_default: bool,
}

impl ModuleExports {
    /// Creates an empty namespace for the module at `module_path`.
    pub fn new(module_path: &str, interop_default: bool) -> Self {
        Self {
            namespace: ObjectRef::with_class(ObjectClass::Module),
            module_path: Rc::from(module_path),
            interop_default,
        }
    }

    /// The namespace object.
    pub fn namespace(&self) -> &ObjectRef {
        &self.namespace
    }

    /// The namespace as a value.
    pub fn value(&self) -> Value {
        Value::Object(self.namespace.clone())
    }

    /// Reads an export.
    pub fn get(&self, key: &str) -> Result<Value> {
        self.namespace.get(key)
    }

    /// Defines a live ESM export.
    pub fn define<F>(&self, key: &str, get: F) -> Result<()>
    where
        F: Fn() -> Result<Value> + 'static,
    {
        define_export(&self.namespace, key, get)
    }

    /// Defines an ESM export bound to a fixed value.
    pub fn define_value(&self, key: &str, value: Value) -> Result<()> {
        self.define(key, move || Ok(value.clone()))
    }

    /// Merges every named export of `source` (`export * from`).
    pub fn export_all(&self, source: &Value) {
        export_all(&self.namespace, source);
    }

    /// `exports[key] = value` from CommonJS code.
    pub fn set(&self, key: &str, value: Value) -> Result<()> {
        let exports = &self.namespace;
        let default_only = ObjectRef::from_entries([("default", value.clone())]);
        if key == "default"
            && should_interop(&self.module_path, &Value::Object(default_only), self.interop_default)
        {
            export_all(exports, &value);
            return exports.set("default", value);
        }

        if !exports.has("default") {
            exports.set("default", Value::Object(ObjectRef::new()))?;
        }

        // A primitive default has no named exports
        let default_export = exports.get("default")?;
        if default_export.is_primitive() {
            return define_export(exports, key, || Ok(Value::Undefined));
        }

        default_export.set(key, value.clone())?;
        if key != "default" {
            define_export(exports, key, move || Ok(value.clone()))?;
        }
        Ok(())
    }

    /// `module.exports = value` from CommonJS code.
    pub fn set_module_exports(&self, value: Value) -> Result<()> {
        export_all(&self.namespace, &value);
        self.namespace.set("default", value)
    }

    /// The `exports` binding handed to CommonJS code: reads see the
    /// namespace, writes go through [`ModuleExports::set`].
    pub fn cjs_exports(&self) -> Value {
        Value::Object(ObjectRef::proxy(
            self.namespace.clone(),
            Rc::new(CjsExports(self.clone())),
        ))
    }

    /// The `module` binding handed to CommonJS code.
    pub fn module_object(&self) -> Value {
        let module = ObjectRef::new();
        let cjs = self.cjs_exports();
        let exports = self.clone();
        let set: Setter = Rc::new(move |value| exports.set_module_exports(value));
        // Defining on a fresh object cannot fail
        let _ = module.define_property(
            "exports",
            Property {
                slot: Slot::Accessor {
                    get: Some(Rc::new(move || Ok(cjs.clone()))),
                    set: Some(set),
                },
                writable: false,
                enumerable: true,
                configurable: true,
            },
        );
        Value::Object(module)
    }
}

struct CjsExports(ModuleExports);

impl ProxyHandler for CjsExports {
    fn get(&self, target: &ObjectRef, key: &str) -> Result<Value> {
        target.get(key)
    }

    fn set(&self, _target: &ObjectRef, key: &str, value: Value) -> Result<()> {
        self.0.set(key, value)
    }
}
