// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Deep auto-mocking of module exports.

use rustc_hash::FxHashMap;
use vnode_runtime::{spy_on, ArrayRef, ObjectClass, ObjectRef, Property, Value};

/// Function properties that are never touched.
const SPECIAL_FUNCTION_PROPS: &[&str] = &["arguments", "callee", "caller", "length", "name"];

/// Maps already visited originals to their mocked counterparts.
///
/// Originals are kept alive while tracked so their identity keys stay
/// unique.
#[derive(Default)]
struct RefTracker {
    refs: FxHashMap<usize, (Value, Value)>,
}

impl RefTracker {
    fn get(&self, value: &Value) -> Option<usize> {
        value.identity().filter(|id| self.refs.contains_key(id))
    }

    fn mocked(&self, id: usize) -> Option<Value> {
        self.refs.get(&id).map(|(_, mocked)| mocked.clone())
    }

    fn track(&mut self, original: &Value, mocked: Value) {
        if let Some(id) = original.identity() {
            self.refs.insert(id, (original.clone(), mocked));
        }
    }
}

/// Assignment of an already mocked value, applied after the traversal.
struct Link {
    container: Value,
    key: String,
    target: usize,
}

struct AutoMocker {
    refs: RefTracker,
    links: Vec<Link>,
}

/// Builds a structural mock of `object` into `target`.
///
/// - mock functions and plain data are copied as they are;
/// - arrays become empty arrays;
/// - functions become spies returning `undefined` with an arity of 0, and
///   their own properties are mocked as well;
/// - objects are mocked recursively.
///
/// Values seen twice (including `object` itself) are linked to the mock
/// created the first time. Assignments that fail are skipped.
pub fn mock_object(object: &Value, target: &Value) {
    let mut mocker = AutoMocker {
        refs: RefTracker::default(),
        links: Vec::new(),
    };
    mocker.refs.track(object, target.clone());
    mocker.mock_properties_of(object, target);

    let AutoMocker { refs, links } = mocker;
    for link in links {
        if let Some(mocked) = refs.mocked(link.target) {
            define(&link.container, &link.key, mocked);
        }
    }
}

fn define(container: &Value, key: &str, value: Value) -> bool {
    container.set(key, value).is_ok()
}

fn is_special_prop(key: &str, container_class: &str) -> bool {
    container_class.contains("Function") && SPECIAL_FUNCTION_PROPS.contains(&key)
}

/// Own or inherited descriptor of `key`.
fn find_property(object: &ObjectRef, key: &str) -> Option<Property> {
    let mut current = Some(object.clone());
    while let Some(obj) = current {
        if let Some(prop) = obj.get_own_property(key) {
            return Some(prop);
        }
        current = obj.prototype();
    }
    None
}

impl AutoMocker {
    fn mock_properties_of(&mut self, container: &Value, new_container: &Value) {
        let Some(properties) = container.properties() else {
            return;
        };
        let container_class = container.class_name();
        let is_module = properties.class() == ObjectClass::Module
            || container.get("__esModule").is_ok_and(|v| v.to_boolean());

        for key in container.enumerable_keys() {
            // Module exports are getters and get mocked; other accessors are copied
            if !is_module {
                if let Some(prop) = find_property(&properties, &key).filter(Property::is_accessor) {
                    if let Some(bag) = new_container.properties() {
                        let _ = bag.define_property(&key, prop);
                    }
                    continue;
                }
            }

            if is_special_prop(&key, &container_class) {
                continue;
            }

            let Ok(value) = container.get(&key) else {
                continue;
            };

            if let Some(id) = self.refs.get(&value) {
                self.links.push(Link {
                    container: new_container.clone(),
                    key,
                    target: id,
                });
                continue;
            }

            if value.is_array() {
                define(new_container, &key, Value::Array(ArrayRef::new()));
                continue;
            }

            let class = value.class_name();
            let is_mock = value.as_function().is_some_and(|f| f.is_mock_function());
            if (!value.is_function() || is_mock) && class != "Object" && class != "Module" {
                define(new_container, &key, value);
                continue;
            }

            let placeholder = if value.is_function() {
                value.clone()
            } else {
                Value::Object(ObjectRef::new())
            };
            if !define(new_container, &key, placeholder) {
                continue;
            }

            let mocked = if value.is_function() {
                let Some(bag) = new_container.properties() else {
                    continue;
                };
                match spy_on(&bag, &key) {
                    Ok(spy) => {
                        if let Some(state) = spy.mock() {
                            state.mock_implementation(|_| Ok(Value::Undefined));
                        }
                        spy.set_length(0);
                        Value::Function(spy)
                    }
                    Err(_) => continue,
                }
            } else {
                match new_container.get(&key) {
                    Ok(mocked) => mocked,
                    Err(_) => continue,
                }
            };

            self.refs.track(&value, mocked.clone());
            self.mock_properties_of(&value, &mocked);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vnode_runtime::{mock_fn, FunctionRef};

    fn obj(entries: &[(&str, Value)]) -> Value {
        Value::Object(ObjectRef::from_entries(entries.iter().cloned()))
    }

    fn empty() -> Value {
        Value::Object(ObjectRef::new())
    }

    #[test]
    fn test_functions_become_stubs() {
        let add = FunctionRef::native("add", 2, |args| {
            let a = args.first().and_then(Value::as_number).unwrap_or(0.0);
            let b = args.get(1).and_then(Value::as_number).unwrap_or(0.0);
            Ok(Value::from(a + b))
        });
        let module = obj(&[("add", Value::Function(add.clone()))]);
        let mocked = empty();
        mock_object(&module, &mocked);

        let stub = mocked.get("add").unwrap();
        let stub_fn = stub.as_function().unwrap();
        assert!(stub_fn.is_mock_function());
        assert!(!stub_fn.ptr_eq(&add));
        assert_eq!(stub_fn.length(), 0);
        assert_eq!(stub.call(&[Value::from(1), Value::from(2)]).unwrap(), Value::Undefined);
        assert_eq!(stub_fn.mock().unwrap().call_count(), 1);
        // The original is untouched
        assert_eq!(module.get("add").unwrap().call(&[Value::from(1), Value::from(2)]).unwrap(), Value::from(3.0));
    }

    #[test]
    fn test_data_arrays_and_mocks() {
        let existing = mock_fn("existing");
        let list = Value::Array(ArrayRef::from_vec(vec![Value::from(1)]));
        let module = obj(&[
            ("answer", Value::from(42)),
            ("name", Value::from("math")),
            ("list", list.clone()),
            ("existing", Value::Function(existing.clone())),
        ]);
        let mocked = empty();
        mock_object(&module, &mocked);

        assert_eq!(mocked.get("answer").unwrap(), Value::from(42));
        assert_eq!(mocked.get("name").unwrap(), Value::from("math"));
        let mocked_list = mocked.get("list").unwrap();
        assert!(mocked_list.is_array());
        assert_ne!(mocked_list, list);
        assert_eq!(mocked_list.as_array().unwrap().len(), 0);
        assert_eq!(mocked.get("existing").unwrap(), Value::Function(existing));
    }

    #[test]
    fn test_nested_objects_and_namespaced_functions() {
        let helper = FunctionRef::native("helper", 0, |_| Ok(Value::from(1)));
        let format = FunctionRef::native("format", 1, |_| Ok(Value::from("x")));
        format
            .properties()
            .set("helper", Value::Function(helper))
            .unwrap();
        let utils = obj(&[("format", Value::Function(format))]);
        let module = obj(&[("utils", utils.clone())]);

        let mocked = empty();
        mock_object(&module, &mocked);

        let mocked_utils = mocked.get("utils").unwrap();
        assert_ne!(mocked_utils, utils);
        let mocked_format = mocked_utils.get("format").unwrap();
        assert!(mocked_format.as_function().unwrap().is_mock_function());
        let mocked_helper = mocked_format.get("helper").unwrap();
        assert!(mocked_helper.as_function().unwrap().is_mock_function());
        assert_eq!(mocked_helper.call(&[]).unwrap(), Value::Undefined);
    }

    #[test]
    fn test_self_reference_terminates() {
        let config = ObjectRef::new();
        config.set("name", Value::from("config")).unwrap();
        config.set("self", Value::Object(config.clone())).unwrap();
        let module = ObjectRef::with_class(ObjectClass::Module);
        module.set("config", Value::Object(config.clone())).unwrap();
        module.set("module", Value::Object(module.clone())).unwrap();
        let module = Value::Object(module);

        let mocked = empty();
        mock_object(&module, &mocked);

        let mocked_config = mocked.get("config").unwrap();
        assert_ne!(mocked_config, Value::Object(config));
        assert_eq!(mocked_config.get("name").unwrap(), Value::from("config"));
        assert_eq!(mocked_config.get("self").unwrap(), mocked_config);
        assert_eq!(mocked.get("module").unwrap(), mocked);
    }

    #[test]
    fn test_accessors_of_plain_objects_are_copied() {
        let source = ObjectRef::new();
        source.define_getter("live", || Ok(Value::from(7))).unwrap();
        let mocked = empty();
        mock_object(&Value::Object(source), &mocked);

        let prop = mocked.as_object().unwrap().get_own_property("live").unwrap();
        assert!(prop.is_accessor());
        assert_eq!(mocked.get("live").unwrap(), Value::from(7));
    }

    #[test]
    fn test_frozen_target_is_skipped() {
        let module = obj(&[("a", Value::from(1)), ("b", empty())]);
        let target = ObjectRef::new();
        target.freeze();
        mock_object(&module, &Value::Object(target.clone()));
        assert!(target.is_empty());
    }
}
