// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Errors raised while reading, writing or calling runtime values.

use thiserror::Error;

/// Result type for value operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors thrown by property access, assignment and calls.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// Type error (wrong receiver, frozen object, calling a non-function)
    #[error("TypeError: {0}")]
    TypeError(String),

    /// Reference error (unknown binding)
    #[error("ReferenceError: {0}")]
    ReferenceError(String),

    /// Plain `Error` thrown by user or host code
    #[error("{0}")]
    Generic(String),
}

impl Error {
    /// Create a new TypeError
    pub fn type_error(msg: impl Into<String>) -> Self {
        Self::TypeError(msg.into())
    }

    /// Create a new ReferenceError
    pub fn reference_error(msg: impl Into<String>) -> Self {
        Self::ReferenceError(msg.into())
    }

    /// Create a plain error with a message
    pub fn generic(msg: impl Into<String>) -> Self {
        Self::Generic(msg.into())
    }
}
