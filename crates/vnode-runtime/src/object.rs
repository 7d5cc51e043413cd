// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Object representation.
//!
//! Objects are shared, interior-mutable property maps with an optional
//! prototype. Properties are either data slots or accessor slots whose
//! getters may fail, which is how live module bindings and throwing mock
//! exports are expressed.

use crate::error::{Error, Result};
use crate::value::Value;
use indexmap::IndexMap;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Getter half of an accessor property.
pub type Getter = Rc<dyn Fn() -> Result<Value>>;

/// Setter half of an accessor property.
pub type Setter = Rc<dyn Fn(Value) -> Result<()>>;

/// Storage of a single property.
#[derive(Clone)]
pub enum Slot {
    /// Plain value
    Data(Value),
    /// Getter/setter pair
    Accessor {
        /// Invoked on read
        get: Option<Getter>,
        /// Invoked on write
        set: Option<Setter>,
    },
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slot::Data(value) => f.debug_tuple("Data").field(value).finish(),
            Slot::Accessor { get, set } => f
                .debug_struct("Accessor")
                .field("get", &get.is_some())
                .field("set", &set.is_some())
                .finish(),
        }
    }
}

/// A property descriptor.
#[derive(Debug, Clone)]
pub struct Property {
    /// The property storage
    pub slot: Slot,
    /// Whether the property is writable (data slots only)
    pub writable: bool,
    /// Whether the property is enumerable
    pub enumerable: bool,
    /// Whether the property is configurable
    pub configurable: bool,
}

impl Property {
    /// A writable, enumerable, configurable data property.
    pub fn data(value: Value) -> Self {
        Self {
            slot: Slot::Data(value),
            writable: true,
            enumerable: true,
            configurable: true,
        }
    }

    /// An enumerable, configurable getter-only property.
    pub fn getter(get: Getter) -> Self {
        Self {
            slot: Slot::Accessor {
                get: Some(get),
                set: None,
            },
            writable: false,
            enumerable: true,
            configurable: true,
        }
    }

    /// Marks the property non-enumerable.
    pub fn hidden(mut self) -> Self {
        self.enumerable = false;
        self
    }

    /// Marks the property read-only and non-configurable.
    pub fn locked(mut self) -> Self {
        self.writable = false;
        self.configurable = false;
        self
    }

    /// Returns true for getter/setter properties.
    pub fn is_accessor(&self) -> bool {
        matches!(self.slot, Slot::Accessor { .. })
    }

    /// The stored value of a data property.
    pub fn value(&self) -> Option<&Value> {
        match &self.slot {
            Slot::Data(value) => Some(value),
            Slot::Accessor { .. } => None,
        }
    }

    /// Reads the property, running its getter if any.
    pub fn read(&self) -> Result<Value> {
        match &self.slot {
            Slot::Data(value) => Ok(value.clone()),
            Slot::Accessor { get: Some(get), .. } => get(),
            Slot::Accessor { get: None, .. } => Ok(Value::Undefined),
        }
    }
}

/// `Symbol.toStringTag`-style classification of an object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectClass {
    /// Ordinary object
    Object,
    /// Module namespace object
    Module,
    /// Any other builtin class (`Date`, `Map`, `Error`, ...)
    Builtin(String),
}

impl fmt::Display for ObjectClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectClass::Object => write!(f, "Object"),
            ObjectClass::Module => write!(f, "Module"),
            ObjectClass::Builtin(name) => write!(f, "{}", name),
        }
    }
}

/// Traps of a proxy object. Definitions and deletions always reach the target.
pub trait ProxyHandler {
    /// Property read trap.
    fn get(&self, target: &ObjectRef, key: &str) -> Result<Value>;

    /// Assignment trap.
    fn set(&self, target: &ObjectRef, key: &str, value: Value) -> Result<()> {
        target.set(key, value)
    }

    /// `in` trap.
    fn has(&self, target: &ObjectRef, key: &str) -> bool {
        target.has(key)
    }

    /// Own enumerable keys trap.
    fn own_keys(&self, target: &ObjectRef) -> Vec<String> {
        target.keys()
    }
}

struct Proxy {
    target: ObjectRef,
    handler: Rc<dyn ProxyHandler>,
}

/// An object.
pub struct Object {
    class: ObjectClass,
    properties: IndexMap<String, Property>,
    prototype: Option<ObjectRef>,
    extensible: bool,
    proxy: Option<Proxy>,
}

impl Object {
    fn with_class(class: ObjectClass) -> Self {
        Self {
            class,
            properties: IndexMap::new(),
            prototype: None,
            extensible: true,
            proxy: None,
        }
    }
}

/// Shared handle to an [`Object`].
#[derive(Clone)]
pub struct ObjectRef(Rc<RefCell<Object>>);

impl Default for ObjectRef {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectRef {
    /// Creates a new empty ordinary object.
    pub fn new() -> Self {
        Self::with_class(ObjectClass::Object)
    }

    /// Creates a new empty object of the given class.
    pub fn with_class(class: ObjectClass) -> Self {
        Self(Rc::new(RefCell::new(Object::with_class(class))))
    }

    /// Creates an ordinary object from key/value pairs.
    pub fn from_entries<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        let obj = Self::new();
        {
            let mut inner = obj.0.borrow_mut();
            for (key, value) in entries {
                inner.properties.insert(key.into(), Property::data(value));
            }
        }
        obj
    }

    /// Creates a proxy forwarding to `target` through `handler`.
    pub fn proxy(target: ObjectRef, handler: Rc<dyn ProxyHandler>) -> Self {
        let mut object = Object::with_class(target.class());
        object.proxy = Some(Proxy { target, handler });
        Self(Rc::new(RefCell::new(object)))
    }

    fn proxy_parts(&self) -> Option<(ObjectRef, Rc<dyn ProxyHandler>)> {
        self.0
            .borrow()
            .proxy
            .as_ref()
            .map(|p| (p.target.clone(), Rc::clone(&p.handler)))
    }

    /// The object a proxy forwards to.
    pub fn proxy_target(&self) -> Option<ObjectRef> {
        self.proxy_parts().map(|(target, _)| target)
    }

    /// The class tag of this object (a proxy reports its target's).
    pub fn class(&self) -> ObjectClass {
        match self.proxy_target() {
            Some(target) => target.class(),
            None => self.0.borrow().class.clone(),
        }
    }

    /// The prototype, if any.
    pub fn prototype(&self) -> Option<ObjectRef> {
        self.0.borrow().prototype.clone()
    }

    /// Replaces the prototype.
    pub fn set_prototype(&self, prototype: Option<ObjectRef>) {
        self.0.borrow_mut().prototype = prototype;
    }

    /// Own property descriptor.
    pub fn get_own_property(&self, key: &str) -> Option<Property> {
        if let Some(target) = self.proxy_target() {
            return target.get_own_property(key);
        }
        self.0.borrow().properties.get(key).cloned()
    }

    /// Reads a property, walking the prototype chain.
    pub fn get(&self, key: &str) -> Result<Value> {
        let mut current = Some(self.clone());
        while let Some(obj) = current {
            if let Some((target, handler)) = obj.proxy_parts() {
                return handler.get(&target, key);
            }
            let (prop, proto) = {
                let inner = obj.0.borrow();
                (inner.properties.get(key).cloned(), inner.prototype.clone())
            };
            if let Some(prop) = prop {
                return prop.read();
            }
            current = proto;
        }
        Ok(Value::Undefined)
    }

    /// Assigns a property with strict-mode semantics.
    pub fn set(&self, key: &str, value: Value) -> Result<()> {
        if let Some((target, handler)) = self.proxy_parts() {
            return handler.set(&target, key, value);
        }

        // Find the property that governs the assignment
        let mut governing = None;
        let mut current = Some(self.clone());
        while let Some(obj) = current {
            let (prop, proto) = {
                let inner = obj.0.borrow();
                (inner.properties.get(key).cloned(), inner.prototype.clone())
            };
            if let Some(prop) = prop {
                governing = Some((obj.ptr_eq(self), prop));
                break;
            }
            current = proto;
        }

        match governing {
            Some((_, Property { slot: Slot::Accessor { set: Some(set), .. }, .. })) => set(value),
            Some((_, Property { slot: Slot::Accessor { set: None, .. }, .. })) => {
                Err(Error::type_error(format!(
                    "Cannot set property {} of [object {}] which has only a getter",
                    key,
                    self.class()
                )))
            }
            Some((_, prop)) if !prop.writable => Err(Error::type_error(format!(
                "Cannot assign to read only property '{}' of object",
                key
            ))),
            Some((true, _)) => {
                let mut inner = self.0.borrow_mut();
                if let Some(prop) = inner.properties.get_mut(key) {
                    prop.slot = Slot::Data(value);
                }
                Ok(())
            }
            _ => {
                let mut inner = self.0.borrow_mut();
                if !inner.extensible {
                    return Err(Error::type_error(format!(
                        "Cannot add property {}, object is not extensible",
                        key
                    )));
                }
                inner.properties.insert(key.to_string(), Property::data(value));
                Ok(())
            }
        }
    }

    /// `Object.defineProperty`.
    pub fn define_property(&self, key: &str, property: Property) -> Result<()> {
        if let Some(target) = self.proxy_target() {
            return target.define_property(key, property);
        }
        let mut inner = self.0.borrow_mut();
        match inner.properties.get(key) {
            Some(existing) if !existing.configurable => {
                Err(Error::type_error(format!("Cannot redefine property: {}", key)))
            }
            None if !inner.extensible => Err(Error::type_error(format!(
                "Cannot define property {}, object is not extensible",
                key
            ))),
            _ => {
                inner.properties.insert(key.to_string(), property);
                Ok(())
            }
        }
    }

    /// Defines an enumerable, configurable getter.
    pub fn define_getter<F>(&self, key: &str, get: F) -> Result<()>
    where
        F: Fn() -> Result<Value> + 'static,
    {
        self.define_property(key, Property::getter(Rc::new(get)))
    }

    /// Deletes an own configurable property.
    pub fn delete(&self, key: &str) -> bool {
        if let Some(target) = self.proxy_target() {
            return target.delete(key);
        }
        let mut inner = self.0.borrow_mut();
        match inner.properties.get(key) {
            Some(prop) if prop.configurable => {
                inner.properties.shift_remove(key);
                true
            }
            Some(_) => false,
            None => true,
        }
    }

    /// `key in object`, including inherited properties.
    pub fn has(&self, key: &str) -> bool {
        if let Some((target, handler)) = self.proxy_parts() {
            return handler.has(&target, key);
        }
        if self.has_own(key) {
            return true;
        }
        self.prototype().is_some_and(|proto| proto.has(key))
    }

    /// Own property check.
    pub fn has_own(&self, key: &str) -> bool {
        if let Some(target) = self.proxy_target() {
            return target.has_own(key);
        }
        self.0.borrow().properties.contains_key(key)
    }

    /// Own enumerable keys in insertion order (`Object.keys`).
    pub fn keys(&self) -> Vec<String> {
        if let Some((target, handler)) = self.proxy_parts() {
            return handler.own_keys(&target);
        }
        self.0
            .borrow()
            .properties
            .iter()
            .filter(|(_, prop)| prop.enumerable)
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// All own keys, enumerable or not.
    pub fn own_property_keys(&self) -> Vec<String> {
        if let Some(target) = self.proxy_target() {
            return target.own_property_keys();
        }
        self.0.borrow().properties.keys().cloned().collect()
    }

    /// Keys a `for..in` loop visits: enumerable keys of the whole chain,
    /// shadowed keys reported once.
    pub fn enumerable_keys_in_chain(&self) -> Vec<String> {
        if self.proxy_target().is_some() {
            return self.keys();
        }
        let mut seen = Vec::new();
        let mut keys = Vec::new();
        let mut current = Some(self.clone());
        while let Some(obj) = current {
            {
                let inner = obj.0.borrow();
                for (key, prop) in inner.properties.iter() {
                    if seen.contains(key) {
                        continue;
                    }
                    seen.push(key.clone());
                    if prop.enumerable {
                        keys.push(key.clone());
                    }
                }
            }
            current = obj.prototype();
        }
        keys
    }

    /// Number of own properties.
    pub fn len(&self) -> usize {
        self.own_property_keys().len()
    }

    /// Returns true if the object has no own properties.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `Object.preventExtensions`.
    pub fn prevent_extensions(&self) {
        self.0.borrow_mut().extensible = false;
    }

    /// `Object.freeze`.
    pub fn freeze(&self) {
        let mut inner = self.0.borrow_mut();
        inner.extensible = false;
        for prop in inner.properties.values_mut() {
            prop.writable = false;
            prop.configurable = false;
        }
    }

    /// Whether new properties may be added.
    pub fn is_extensible(&self) -> bool {
        self.0.borrow().extensible
    }

    /// Identity comparison.
    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn identity(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Values are not printed, objects are routinely cyclic
        match self.0.try_borrow() {
            Ok(inner) => f
                .debug_struct("Object")
                .field("class", &inner.class)
                .field("keys", &inner.properties.keys().collect::<Vec<_>>())
                .field("proxy", &inner.proxy.is_some())
                .finish(),
            Err(_) => write!(f, "Object(<borrowed>)"),
        }
    }
}
