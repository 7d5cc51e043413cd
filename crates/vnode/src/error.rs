// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Error types for the module runner

use std::sync::Arc;
use thiserror::Error;

/// Result type for module runner operations
pub type Result<T> = std::result::Result<T, RunnerError>;

/// Errors that can occur while resolving, loading, evaluating or mocking modules.
///
/// Errors are cloneable: one failed evaluation is handed to every caller
/// waiting on the same module.
#[derive(Debug, Clone, Error)]
pub enum RunnerError {
    /// Error thrown by a value operation inside module code
    #[error("{0}")]
    Runtime(#[from] vnode_runtime::Error),

    /// Dependency could not be mapped to a loadable artifact
    #[error("Failed to resolve \"{id}\"{}: {reason}", importer_suffix(importer))]
    Resolution {
        /// Requested specifier
        id: String,
        /// Module that requested it
        importer: Option<String>,
        /// Reason for failure
        reason: String,
    },

    /// A dependency edge re-entered a module that has not produced exports yet
    #[error("[vnode] Failed to resolve circular dependency, stack:\n{}", format_stack(stack))]
    CircularDependency {
        /// Import chain, innermost module first
        stack: Vec<String>,
    },

    /// The transform provider returned neither code nor an externalize path
    #[error("[vnode] Failed to load \"{id}\" imported from {}", importer.as_deref().unwrap_or("<entry>"))]
    LoadFailed {
        /// Requested module id
        id: String,
        /// Module that requested it
        importer: Option<String>,
    },

    /// The native import mechanism rejected a module
    #[error("Cannot import native module '{path}': {reason}")]
    NativeImport {
        /// Path handed to the native loader
        path: String,
        /// Reason for failure
        reason: String,
    },

    /// The evaluator could not run a module
    #[error("Error evaluating '{filename}': {message}")]
    Evaluation {
        /// Module filename
        filename: String,
        /// Reason for failure
        message: String,
    },

    /// A mock factory threw
    #[error(
        "[vnode] There was an error when mocking a module \"{path}\". \
         If you are using a mock factory, make sure there are no top level variables inside, \
         since the call is hoisted to the top of the file."
    )]
    MockFactory {
        /// Mocked module
        path: String,
        /// Error thrown by the factory
        #[source]
        cause: Box<RunnerError>,
    },

    /// A mock factory returned something other than an object
    #[error(
        "[vnode] mock(\"{path}\", factory) is not returning an object. \
         Did you mean to return an object with a \"default\" key?"
    )]
    InvalidMockFactory {
        /// Mocked module
        path: String,
    },

    /// Invalid configuration
    #[error("Config error: {0}")]
    Config(String),

    /// File system error
    #[error("File system error: {0}")]
    Io(Arc<std::io::Error>),

    /// JSON parsing error
    #[error("JSON parse error: {0}")]
    Json(Arc<serde_json::Error>),

    /// The runner owning a mocker or hot context was dropped
    #[error("The module runner was dropped")]
    RunnerDropped,
}

impl RunnerError {
    /// Create a resolution error
    pub fn resolution(id: impl Into<String>, importer: Option<&str>, reason: impl Into<String>) -> Self {
        Self::Resolution {
            id: id.into(),
            importer: importer.map(str::to_string),
            reason: reason.into(),
        }
    }

    /// Create an evaluation error
    pub fn evaluation(filename: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Evaluation {
            filename: filename.into(),
            message: message.into(),
        }
    }

    /// Convert into an error that can be thrown through module code
    pub fn into_runtime(self) -> vnode_runtime::Error {
        match self {
            Self::Runtime(err) => err,
            other => vnode_runtime::Error::generic(other.to_string()),
        }
    }
}

impl From<std::io::Error> for RunnerError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

impl From<serde_json::Error> for RunnerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(Arc::new(err))
    }
}

fn importer_suffix(importer: &Option<String>) -> String {
    match importer {
        Some(importer) => format!(" from \"{}\"", importer),
        None => String::new(),
    }
}

fn format_stack(stack: &[String]) -> String {
    stack
        .iter()
        .map(|p| format!("- {}", p))
        .collect::<Vec<_>>()
        .join("\n")
}
