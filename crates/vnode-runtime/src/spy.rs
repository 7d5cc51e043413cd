// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Mock functions and spies.

use crate::error::{Error, Result};
use crate::function::{Behavior, FunctionRef, NativeFn};
use crate::object::{ObjectRef, Property};
use crate::value::Value;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

/// Outcome of one recorded call.
#[derive(Debug, Clone, PartialEq)]
pub enum MockResult {
    /// The call returned a value
    Return(Value),
    /// The call failed
    Throw(Error),
}

/// Call records and implementation of a mock function.
#[derive(Default)]
pub struct MockState {
    calls: RefCell<Vec<Vec<Value>>>,
    results: RefCell<Vec<MockResult>>,
    implementation: RefCell<Option<NativeFn>>,
    once: RefCell<VecDeque<NativeFn>>,
}

impl MockState {
    pub(crate) fn invoke(&self, args: &[Value]) -> Result<Value> {
        self.calls.borrow_mut().push(args.to_vec());

        let implementation = self
            .once
            .borrow_mut()
            .pop_front()
            .or_else(|| self.implementation.borrow().clone());
        let result = match implementation {
            Some(func) => func(args),
            None => Ok(Value::Undefined),
        };

        self.results.borrow_mut().push(match &result {
            Ok(value) => MockResult::Return(value.clone()),
            Err(err) => MockResult::Throw(err.clone()),
        });
        result
    }

    /// Arguments of every call so far.
    pub fn calls(&self) -> Vec<Vec<Value>> {
        self.calls.borrow().clone()
    }

    /// Number of calls so far.
    pub fn call_count(&self) -> usize {
        self.calls.borrow().len()
    }

    /// Arguments of the most recent call.
    pub fn last_call(&self) -> Option<Vec<Value>> {
        self.calls.borrow().last().cloned()
    }

    /// Outcome of every call so far.
    pub fn results(&self) -> Vec<MockResult> {
        self.results.borrow().clone()
    }

    /// Replaces the implementation.
    pub fn mock_implementation<F>(&self, func: F)
    where
        F: Fn(&[Value]) -> Result<Value> + 'static,
    {
        *self.implementation.borrow_mut() = Some(Rc::new(func));
    }

    /// Queues an implementation used for the next call only.
    pub fn mock_implementation_once<F>(&self, func: F)
    where
        F: Fn(&[Value]) -> Result<Value> + 'static,
    {
        self.once.borrow_mut().push_back(Rc::new(func));
    }

    /// Makes every call return `value`.
    pub fn mock_return_value(&self, value: Value) {
        self.mock_implementation(move |_| Ok(value.clone()));
    }

    /// Forgets recorded calls and results.
    pub fn mock_clear(&self) {
        self.calls.borrow_mut().clear();
        self.results.borrow_mut().clear();
    }

    /// Forgets recorded calls and every implementation; calls return undefined.
    pub fn mock_reset(&self) {
        self.mock_clear();
        self.implementation.borrow_mut().take();
        self.once.borrow_mut().clear();
    }
}

/// Creates a mock function returning undefined (`vi.fn()`).
pub fn mock_fn(name: impl Into<String>) -> FunctionRef {
    FunctionRef::with_behavior(name.into(), 0, Behavior::Mock(MockState::default()))
}

/// Creates a mock function with an initial implementation (`vi.fn(impl)`).
pub fn mock_fn_with<F>(name: impl Into<String>, func: F) -> FunctionRef
where
    F: Fn(&[Value]) -> Result<Value> + 'static,
{
    let mock = mock_fn(name);
    if let Some(state) = mock.mock() {
        state.mock_implementation(func);
    }
    mock
}

/// Replaces `container[key]` with a spy delegating to the original function.
///
/// The spy keeps the original's name and arity; its implementation can be
/// swapped through [`FunctionRef::mock`].
pub fn spy_on(container: &ObjectRef, key: &str) -> Result<FunctionRef> {
    let original = match container.get(key)? {
        Value::Function(func) => func,
        other => {
            return Err(Error::type_error(format!(
                "cannot spy on {} because it is not a function; {} given",
                key,
                other.type_of()
            )));
        }
    };

    let spy = mock_fn(original.name());
    spy.set_length(original.length());
    if let Some(state) = spy.mock() {
        let delegate = original.clone();
        state.mock_implementation(move |args| delegate.call(args));
    }

    let mut property = container
        .get_own_property(key)
        .unwrap_or_else(|| Property::data(Value::Undefined));
    property.slot = crate::object::Slot::Data(Value::Function(spy.clone()));
    property.writable = true;
    container.define_property(key, property)?;
    Ok(spy)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_fn_records_calls() {
        let mock = mock_fn("spy");
        assert!(mock.is_mock_function());
        assert!(mock.call(&[Value::from(1)]).unwrap().is_undefined());

        let state = mock.mock().unwrap();
        assert_eq!(state.call_count(), 1);
        assert_eq!(state.last_call(), Some(vec![Value::from(1)]));
    }

    #[test]
    fn test_once_then_default() {
        let mock = mock_fn_with("f", |_| Ok(Value::from("default")));
        let state = mock.mock().unwrap();
        state.mock_implementation_once(|_| Ok(Value::from("once")));

        assert_eq!(mock.call(&[]).unwrap(), Value::from("once"));
        assert_eq!(mock.call(&[]).unwrap(), Value::from("default"));

        state.mock_reset();
        assert!(mock.call(&[]).unwrap().is_undefined());
        assert_eq!(state.call_count(), 1);
    }

    #[test]
    fn test_spy_on_delegates() {
        let container = ObjectRef::new();
        let double = FunctionRef::native("double", 1, |args| {
            Ok(Value::Number(args[0].as_number().unwrap_or(0.0) * 2.0))
        });
        container.set("double", Value::from(double.clone())).unwrap();

        let spy = spy_on(&container, "double").unwrap();
        let installed = container.get("double").unwrap();
        assert_eq!(installed, Value::from(spy.clone()));
        assert_eq!(spy.length(), 1);
        assert_eq!(installed.call(&[Value::from(4)]).unwrap(), Value::from(8));

        spy.mock().unwrap().mock_implementation(|_| Ok(Value::Undefined));
        assert!(installed.call(&[Value::from(4)]).unwrap().is_undefined());
        assert_eq!(spy.mock().unwrap().call_count(), 2);
    }

    #[test]
    fn test_spy_on_non_function() {
        let container = ObjectRef::from_entries([("n", Value::from(1))]);
        assert!(spy_on(&container, "n").is_err());
    }
}
