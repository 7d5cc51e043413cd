// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Dynamic value representation.

use crate::error::{Error, Result};
use crate::function::FunctionRef;
use crate::object::{ObjectClass, ObjectRef};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// A dynamic value exchanged between the runner and evaluated modules.
///
/// Reference variants (`Array`, `Object`, `Function`) share their storage on
/// clone and compare by identity, never structurally.
#[derive(Debug, Clone, Default)]
pub enum Value {
    /// undefined
    #[default]
    Undefined,
    /// null
    Null,
    /// Boolean value
    Boolean(bool),
    /// Number (IEEE 754 double)
    Number(f64),
    /// String
    String(String),
    /// Array reference
    Array(ArrayRef),
    /// Object reference
    Object(ObjectRef),
    /// Function reference
    Function(FunctionRef),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) => true,
            (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            // NaN never equals itself
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a.ptr_eq(b),
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            (Value::Function(a), Value::Function(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl Value {
    /// Returns true if this value is undefined.
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// Returns true if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns true if this value is nullish (null or undefined).
    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    /// Returns true for values that are not objects (`v !== Object(v)`).
    pub fn is_primitive(&self) -> bool {
        !matches!(self, Value::Array(_) | Value::Object(_) | Value::Function(_))
    }

    /// Returns true if this value is a function.
    pub fn is_function(&self) -> bool {
        matches!(self, Value::Function(_))
    }

    /// Returns true if this value is an array.
    pub fn is_array(&self) -> bool {
        matches!(self, Value::Array(_))
    }

    /// Returns the object reference, if this is an object.
    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// Returns the function reference, if this is a function.
    pub fn as_function(&self) -> Option<&FunctionRef> {
        match self {
            Value::Function(func) => Some(func),
            _ => None,
        }
    }

    /// Returns the array reference, if this is an array.
    pub fn as_array(&self) -> Option<&ArrayRef> {
        match self {
            Value::Array(arr) => Some(arr),
            _ => None,
        }
    }

    /// Returns the string slice, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the number, if this is a number.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// The property bag backing this value: objects are their own bag,
    /// functions carry one alongside their callable part.
    pub fn properties(&self) -> Option<ObjectRef> {
        match self {
            Value::Object(obj) => Some(obj.clone()),
            Value::Function(func) => Some(func.properties().clone()),
            _ => None,
        }
    }

    /// Reads a property (`value[key]`).
    pub fn get(&self, key: &str) -> Result<Value> {
        match self {
            Value::Undefined | Value::Null => Err(Error::type_error(format!(
                "Cannot read properties of {} (reading '{}')",
                self, key
            ))),
            Value::String(s) if key == "length" => Ok(Value::Number(s.chars().count() as f64)),
            Value::Array(arr) => Ok(arr.get_property(key)),
            Value::Object(obj) => obj.get(key),
            Value::Function(func) => func.get(key),
            _ => Ok(Value::Undefined),
        }
    }

    /// Writes a property (`value[key] = v`), with strict-mode failures.
    pub fn set(&self, key: &str, value: Value) -> Result<()> {
        match self {
            Value::Undefined | Value::Null => Err(Error::type_error(format!(
                "Cannot set properties of {} (setting '{}')",
                self, key
            ))),
            Value::Array(arr) => {
                if let Ok(index) = key.parse::<usize>() {
                    arr.set(index, value);
                }
                Ok(())
            }
            Value::Object(obj) => obj.set(key, value),
            Value::Function(func) => func.properties().set(key, value),
            // Assignments to primitives are silently dropped
            _ => Ok(()),
        }
    }

    /// `key in value`, including inherited properties.
    pub fn has(&self, key: &str) -> bool {
        match self {
            Value::Object(obj) => obj.has(key),
            Value::Function(func) => func.has(key),
            Value::Array(arr) => key == "length" || key.parse::<usize>().is_ok_and(|i| i < arr.len()),
            _ => false,
        }
    }

    /// Enumerable keys a `for..in` loop would visit.
    pub fn enumerable_keys(&self) -> Vec<String> {
        match self {
            Value::Object(obj) => obj.enumerable_keys_in_chain(),
            Value::Function(func) => func.properties().enumerable_keys_in_chain(),
            Value::Array(arr) => (0..arr.len()).map(|i| i.to_string()).collect(),
            _ => Vec::new(),
        }
    }

    /// Calls this value as a function.
    pub fn call(&self, args: &[Value]) -> Result<Value> {
        match self {
            Value::Function(func) => func.call(args),
            other => Err(Error::type_error(format!("{} is not a function", other.type_of()))),
        }
    }

    /// Stable identity key for reference values, usable in identity-keyed maps.
    ///
    /// The key is only meaningful while the value is alive.
    pub fn identity(&self) -> Option<usize> {
        match self {
            Value::Array(arr) => Some(arr.identity()),
            Value::Object(obj) => Some(obj.identity()),
            Value::Function(func) => Some(func.identity()),
            _ => None,
        }
    }

    /// Converts the value to a boolean (ToBoolean).
    pub fn to_boolean(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Boolean(b) => *b,
            Value::Number(n) => !n.is_nan() && *n != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::Array(_) | Value::Object(_) | Value::Function(_) => true,
        }
    }

    /// Returns the type of this value as a string.
    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "object", // Historical quirk
            Value::Boolean(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) | Value::Object(_) => "object",
            Value::Function(_) => "function",
        }
    }

    /// The `Object.prototype.toString` tag of this value (`Object`, `Module`,
    /// `Array`, `Function`, `Null`, ...).
    pub fn class_name(&self) -> String {
        match self {
            Value::Undefined => "Undefined".to_string(),
            Value::Null => "Null".to_string(),
            Value::Boolean(_) => "Boolean".to_string(),
            Value::Number(_) => "Number".to_string(),
            Value::String(_) => "String".to_string(),
            Value::Array(_) => "Array".to_string(),
            Value::Object(obj) => obj.class().to_string(),
            Value::Function(_) => "Function".to_string(),
        }
    }

    /// True for plain objects and module namespaces.
    pub fn is_plain_object_or_module(&self) -> bool {
        matches!(self, Value::Object(obj) if matches!(obj.class(), ObjectClass::Object | ObjectClass::Module))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", n),
            Value::String(s) => write!(f, "{}", s),
            Value::Array(arr) => write!(f, "[Array({})]", arr.len()),
            Value::Object(obj) => write!(f, "[object {}]", obj.class()),
            Value::Function(func) => {
                if func.name().is_empty() {
                    write!(f, "[Function (anonymous)]")
                } else {
                    write!(f, "[Function: {}]", func.name())
                }
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<ObjectRef> for Value {
    fn from(obj: ObjectRef) -> Self {
        Value::Object(obj)
    }
}

impl From<FunctionRef> for Value {
    fn from(func: FunctionRef) -> Self {
        Value::Function(func)
    }
}

impl From<ArrayRef> for Value {
    fn from(arr: ArrayRef) -> Self {
        Value::Array(arr)
    }
}

/// A shared, growable array.
#[derive(Clone, Default)]
pub struct ArrayRef(Rc<RefCell<Vec<Value>>>);

impl ArrayRef {
    /// Creates a new empty array.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an array holding the given elements.
    pub fn from_vec(items: Vec<Value>) -> Self {
        Self(Rc::new(RefCell::new(items)))
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    /// Returns true if the array has no elements.
    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    /// Element at `index`, or undefined.
    pub fn get(&self, index: usize) -> Value {
        self.0.borrow().get(index).cloned().unwrap_or_default()
    }

    /// Stores `value` at `index`, padding with undefined.
    pub fn set(&self, index: usize, value: Value) {
        let mut items = self.0.borrow_mut();
        if index >= items.len() {
            items.resize(index + 1, Value::Undefined);
        }
        items[index] = value;
    }

    /// Appends an element.
    pub fn push(&self, value: Value) {
        self.0.borrow_mut().push(value);
    }

    /// Snapshot of the elements.
    pub fn to_vec(&self) -> Vec<Value> {
        self.0.borrow().clone()
    }

    /// Identity comparison.
    pub fn ptr_eq(&self, other: &ArrayRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn identity(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }

    fn get_property(&self, key: &str) -> Value {
        if key == "length" {
            return Value::Number(self.len() as f64);
        }
        match key.parse::<usize>() {
            Ok(index) => self.get(index),
            Err(_) => Value::Undefined,
        }
    }
}

impl fmt::Debug for ArrayRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Elements may reference the array itself
        write!(f, "Array(len = {})", self.len())
    }
}
