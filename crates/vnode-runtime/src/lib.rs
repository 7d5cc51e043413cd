// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! # vnode-runtime
//!
//! The dynamic value model shared by the vnode module runner and the modules
//! it evaluates.
//!
//! - [`Value`]: undefined, null, booleans, numbers, strings and the reference
//!   types below, compared by identity
//! - [`ObjectRef`]: ordered properties with data and accessor slots,
//!   prototypes, freezing and proxies
//! - [`FunctionRef`]: callables that also carry properties
//! - [`spy`]: mock functions recording their calls
//!
//! Everything here is single-threaded (`Rc`/`RefCell`): a module graph is
//! evaluated cooperatively on one thread.
//!
//! ## Quick Start
//!
//! ```rust
//! use vnode_runtime::{ObjectRef, Value};
//!
//! let exports = ObjectRef::new();
//! exports.set("answer", Value::from(42)).unwrap();
//! assert_eq!(exports.get("answer").unwrap(), Value::from(42));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod function;
pub mod object;
pub mod spy;
pub mod value;

// Re-exports for convenience
pub use error::{Error, Result};
pub use function::{FunctionRef, NativeFn};
pub use object::{Getter, ObjectClass, ObjectRef, Property, ProxyHandler, Setter, Slot};
pub use spy::{mock_fn, mock_fn_with, spy_on, MockResult, MockState};
pub use value::{ArrayRef, Value};
