// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Function representation.

use crate::error::Result;
use crate::object::ObjectRef;
use crate::spy::MockState;
use crate::value::Value;
use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

/// A native (Rust) function body.
pub type NativeFn = Rc<dyn Fn(&[Value]) -> Result<Value>>;

pub(crate) enum Behavior {
    /// Host implementation
    Native(NativeFn),
    /// Mock function recording its calls
    Mock(MockState),
}

/// A callable value.
///
/// Functions are objects too: besides the callable part they own a property
/// bag, which is how namespaced-function exports (`fn.helper = ...`) work.
pub struct Function {
    name: String,
    /// Reported arity, mutable like `Object.defineProperty(fn, 'length')`
    length: Cell<usize>,
    behavior: Behavior,
    properties: ObjectRef,
}

/// Shared handle to a [`Function`].
#[derive(Clone)]
pub struct FunctionRef(Rc<Function>);

impl FunctionRef {
    /// Creates a native function.
    pub fn native<F>(name: impl Into<String>, length: usize, func: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value> + 'static,
    {
        Self::with_behavior(name.into(), length, Behavior::Native(Rc::new(func)))
    }

    pub(crate) fn with_behavior(name: String, length: usize, behavior: Behavior) -> Self {
        Self(Rc::new(Function {
            name,
            length: Cell::new(length),
            behavior,
            properties: ObjectRef::new(),
        }))
    }

    /// The function name (empty for anonymous functions).
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// The reported arity.
    pub fn length(&self) -> usize {
        self.0.length.get()
    }

    /// Overrides the reported arity.
    pub fn set_length(&self, length: usize) {
        self.0.length.set(length);
    }

    /// The function's own property bag.
    pub fn properties(&self) -> &ObjectRef {
        &self.0.properties
    }

    /// Reads a property; `name` and `length` are intrinsic.
    pub fn get(&self, key: &str) -> Result<Value> {
        match key {
            "name" => Ok(Value::String(self.0.name.clone())),
            "length" => Ok(Value::Number(self.length() as f64)),
            _ => self.0.properties.get(key),
        }
    }

    /// `key in fn`.
    pub fn has(&self, key: &str) -> bool {
        matches!(key, "name" | "length") || self.0.properties.has(key)
    }

    /// Invokes the function.
    pub fn call(&self, args: &[Value]) -> Result<Value> {
        match &self.0.behavior {
            Behavior::Native(func) => func(args),
            Behavior::Mock(state) => state.invoke(args),
        }
    }

    /// True for functions created by the spy module.
    pub fn is_mock_function(&self) -> bool {
        matches!(self.0.behavior, Behavior::Mock(_))
    }

    /// Call records and implementation controls of a mock function.
    pub fn mock(&self) -> Option<&MockState> {
        match &self.0.behavior {
            Behavior::Mock(state) => Some(state),
            Behavior::Native(_) => None,
        }
    }

    /// Identity comparison.
    pub fn ptr_eq(&self, other: &FunctionRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn identity(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }
}

impl fmt::Debug for FunctionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0.behavior {
            Behavior::Native(_) => write!(f, "NativeFunction({})", self.0.name),
            Behavior::Mock(_) => write!(f, "MockFunction({})", self.0.name),
        }
    }
}
