// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Runner configuration.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, RunnerError};

/// Environment variable enabling slow-load diagnostics.
pub const DEBUG_ENV: &str = "VNODE_DEBUG_RUNNER";

/// Environment variable overriding the project root.
pub const ROOT_ENV: &str = "VNODE_ROOT";

/// Configuration of a [`ModuleRunner`](crate::ModuleRunner).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RunnerConfig {
    /// Project root, used to map root-relative ids to files
    pub root: PathBuf,

    /// Public base path stripped from request ids
    pub base: Option<String>,

    /// Unwrap `default` of externalized modules
    pub interop_default: bool,

    /// Warn about dependencies that take long to load
    pub debug: bool,

    /// Externalization options
    pub deps: DepsConfig,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/"),
            base: None,
            interop_default: true,
            debug: false,
            deps: DepsConfig::default(),
        }
    }
}

impl RunnerConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: RunnerConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from a JSON file if it exists, then apply
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) if path.is_file() => Self::from_file(path)?,
            _ => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(debug) = lookup(DEBUG_ENV) {
            self.debug = match debug.trim().to_ascii_lowercase().as_str() {
                "" | "0" | "false" | "no" | "off" => false,
                "1" | "true" | "yes" | "on" => true,
                other => {
                    return Err(RunnerError::Config(format!(
                        "{} must be a boolean, got '{}'",
                        DEBUG_ENV, other
                    )));
                }
            };
        }
        if let Some(root) = lookup(ROOT_ENV).filter(|r| !r.is_empty()) {
            self.root = PathBuf::from(root);
        }
        Ok(())
    }
}

/// How dependencies are split between inlining and native import.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DepsConfig {
    /// Ids that are always inlined
    pub inline: PatternList,

    /// Ids that are always externalized
    pub external: PatternList,

    /// Look for a CommonJS sibling of ESM builds in `node_modules`
    #[serde(rename = "fallbackCJS", alias = "fallbackCjs")]
    pub fallback_cjs: bool,
}

/// A list of patterns, or `true` to match everything.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PatternList {
    /// `true` matches every id, `false` none
    All(bool),
    /// Matches when any pattern matches
    List(Vec<Pattern>),
}

impl Default for PatternList {
    fn default() -> Self {
        PatternList::List(Vec::new())
    }
}

impl PatternList {
    /// Build a list from patterns.
    pub fn of(patterns: impl IntoIterator<Item = Pattern>) -> Self {
        PatternList::List(patterns.into_iter().collect())
    }

    /// Whether any pattern matches `id`.
    pub fn matches(&self, id: &str) -> bool {
        match self {
            PatternList::All(all) => *all,
            PatternList::List(patterns) => patterns.iter().any(|p| p.matches(id)),
        }
    }
}

/// A package name or a regular expression.
///
/// In JSON a plain string is a package name; `{ "regex": "..." }` is a
/// regular expression.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RawPattern", into = "RawPattern")]
pub enum Pattern {
    /// Matches ids containing `/node_modules/<name>/`
    Package(String),
    /// Matches ids the expression finds a match in
    Regex(Regex),
}

impl Pattern {
    /// Package name pattern.
    pub fn package(name: impl Into<String>) -> Self {
        Pattern::Package(name.into())
    }

    /// Regular expression pattern.
    pub fn regex(source: &str) -> Result<Self> {
        Regex::new(source)
            .map(Pattern::Regex)
            .map_err(|e| RunnerError::Config(format!("invalid pattern '{}': {}", source, e)))
    }

    /// Whether this pattern matches `id`.
    pub fn matches(&self, id: &str) -> bool {
        match self {
            Pattern::Package(name) => id.contains(&format!("/node_modules/{}/", name)),
            Pattern::Regex(re) => re.is_match(id),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawPattern {
    Package(String),
    Regex { regex: String },
}

impl TryFrom<RawPattern> for Pattern {
    type Error = RunnerError;

    fn try_from(raw: RawPattern) -> Result<Self> {
        match raw {
            RawPattern::Package(name) => Ok(Pattern::Package(name)),
            RawPattern::Regex { regex } => Pattern::regex(&regex),
        }
    }
}

impl From<Pattern> for RawPattern {
    fn from(pattern: Pattern) -> Self {
        match pattern {
            Pattern::Package(name) => RawPattern::Package(name),
            Pattern::Regex(re) => RawPattern::Regex {
                regex: re.as_str().to_string(),
            },
        }
    }
}
