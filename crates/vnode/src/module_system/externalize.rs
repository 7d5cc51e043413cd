// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Externalization decisions.
//!
//! A module is either inlined (transformed and evaluated by the runner) or
//! externalized (handed to the native import mechanism). Built-ins, prebuilt
//! CommonJS packages and anything the platform can load natively are
//! externalized; sources that need transformation are inlined.

use once_cell::sync::Lazy;
use regex::Regex;
use rustc_hash::FxHashMap;
use serde::Deserialize;
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use url::Url;

use super::builtins::is_builtin;
use super::normalize::slash;
use crate::config::DepsConfig;

const KNOWN_ASSET_TYPES: &[&str] = &[
    // images
    "png", "jpe?g", "jfif", "pjpeg", "pjp", "gif", "svg", "ico", "webp", "avif",
    // media
    "mp4", "webm", "ogg", "mp3", "wav", "flac", "aac",
    // fonts
    "woff2?", "eot", "ttf", "otf",
    // other
    "webmanifest", "pdf", "txt",
];

static ESM_EXT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\.(es|esm|esm-browser|esm-bundler|es6|module)\.js$").expect("valid regex")
});
static ESM_FOLDER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/(es|esm)/(.*\.js)$").expect("valid regex"));

static DEFAULT_INLINE: Lazy<Vec<Regex>> = Lazy::new(|| {
    let assets = format!(r"\.({})$", KNOWN_ASSET_TYPES.join("|"));
    [r"virtual:", r"\.[mc]?ts$", r"[?&](init|raw|url|inline)\b", assets.as_str()]
        .iter()
        .map(|re| Regex::new(re).expect("valid regex"))
        .collect()
});

static DEPS_EXTERNAL: Lazy<Vec<Regex>> = Lazy::new(|| {
    [r"\.cjs\.js$", r"\.mjs$"]
        .iter()
        .map(|re| Regex::new(re).expect("valid regex"))
        .collect()
});

static ESM_SYNTAX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?m)(?:[\s;]|^)(?:import[\s\w*,{}]*from|import\s*["'*{]|export\b\s*(?:[*{]|default|class|type|function|const|var|let|async function)|import\.meta\b)"#,
    )
    .expect("valid regex")
});
static CJS_SYNTAX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)(?:[\s;]|^)(?:module\.exports\b|exports\.\w|require\s*\(|global\.\w)")
        .expect("valid regex")
});
static ESM_PATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\.(\w+-)?esm?(-\w+)?\.js$|/(esm?)/").expect("valid regex"));
static WINDOWS_BACKSLASH_PATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\w:\\").expect("valid regex"));
static WINDOWS_SLASH_PATH: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\w:/").expect("valid regex"));

fn matches_any(id: &str, patterns: &[Regex]) -> bool {
    patterns.iter().any(|re| re.is_match(id))
}

/// Finds a conventional CommonJS sibling of an ESM build on disk.
///
/// `pkg/index.esm.js` is checked as `.mjs`, `.umd.js`, `.cjs.js` and `.js`;
/// `pkg/esm/index.js` as `pkg/umd/`, `pkg/cjs/`, `pkg/lib/` and `pkg/`.
pub fn guess_cjs_version(id: &str) -> Option<String> {
    if ESM_EXT_RE.is_match(id) {
        let found = [".mjs", ".umd.js", ".cjs.js", ".js"]
            .iter()
            .map(|ext| ESM_EXT_RE.replace(id, *ext).into_owned())
            .find(|candidate| Path::new(candidate).exists());
        if found.is_some() {
            return found;
        }
    }
    if ESM_FOLDER_RE.is_match(id) {
        return ["/umd/$2", "/cjs/$2", "/lib/$2", "/$2"]
            .iter()
            .map(|rep| ESM_FOLDER_RE.replace(id, *rep).into_owned())
            .find(|candidate| Path::new(candidate).exists());
    }
    None
}

fn patch_windows_import_path(path: &str) -> String {
    if WINDOWS_BACKSLASH_PATH.is_match(path) {
        format!("file:///{}", slash(path))
    } else if WINDOWS_SLASH_PATH.is_match(path) {
        format!("file:///{}", path)
    } else {
        path.to_string()
    }
}

/// Minimal package.json structure for the `type` field
#[derive(Debug, Deserialize)]
struct PackageJson {
    #[serde(rename = "type")]
    type_field: Option<String>,
}

/// Find the package.json type field for a file
fn find_package_type(path: &Path) -> Option<String> {
    let mut current = path.parent();
    while let Some(dir) = current {
        let pkg_path = dir.join("package.json");
        if pkg_path.is_file() {
            let content = std::fs::read_to_string(&pkg_path).ok()?;
            return serde_json::from_str::<PackageJson>(&content).ok()?.type_field;
        }
        current = dir.parent();
    }
    None
}

fn to_local_path(id: &str) -> Option<PathBuf> {
    match id.split_once(':') {
        // Single letters are drive letters, not schemes
        Some((scheme, _)) if scheme.len() > 1 => match scheme {
            "file" => Url::parse(id).ok()?.to_file_path().ok(),
            _ => None,
        },
        _ => Some(PathBuf::from(id)),
    }
}

/// Whether the native loader can import `id` without transformation.
pub fn is_valid_node_import(id: &str) -> bool {
    if id.starts_with("data:") {
        return true;
    }
    let path = match to_local_path(id) {
        Some(path) => path,
        None => return false,
    };

    match path.extension().and_then(|e| e.to_str()) {
        Some("mjs" | "cjs" | "node" | "wasm") => return true,
        Some("js") => {}
        _ => return false,
    }

    if find_package_type(&path).as_deref() == Some("module") {
        return true;
    }

    if ESM_PATH.is_match(&slash(&path.to_string_lossy())) {
        return false;
    }

    match std::fs::read_to_string(&path) {
        Ok(code) => CJS_SYNTAX.is_match(&code) || !ESM_SYNTAX.is_match(&code),
        Err(_) => false,
    }
}

/// Decides, and remembers, which modules bypass the transform pipeline.
pub struct Externalizer {
    options: DepsConfig,
    cache: RefCell<FxHashMap<String, Option<String>>>,
}

impl Externalizer {
    /// Create an externalizer with the given dependency options
    pub fn new(options: DepsConfig) -> Self {
        Self {
            options,
            cache: RefCell::new(FxHashMap::default()),
        }
    }

    /// The dependency options
    pub fn options(&self) -> &DepsConfig {
        &self.options
    }

    /// Returns the path to import natively, or `None` to inline `id`.
    ///
    /// Decisions are memoized per id.
    pub fn should_externalize(&self, id: &str) -> Option<String> {
        if let Some(decision) = self.cache.borrow().get(id) {
            return decision.clone();
        }
        let decision = self.decide(id);
        tracing::trace!(target: "vnode::runner", id, externalized = ?decision, "externalize decision");
        self.cache
            .borrow_mut()
            .insert(id.to_string(), decision.clone());
        decision
    }

    fn decide(&self, id: &str) -> Option<String> {
        if is_builtin(id) || id.starts_with("data:") {
            return Some(id.to_string());
        }

        let id = patch_windows_import_path(id);

        if self.options.inline.matches(&id) {
            return None;
        }
        if self.options.external.matches(&id) {
            return Some(id);
        }

        let is_node_module = id.contains("/node_modules/");
        let id = if is_node_module && self.options.fallback_cjs {
            guess_cjs_version(&id).unwrap_or(id)
        } else {
            id
        };

        if matches_any(&id, &DEFAULT_INLINE) {
            return None;
        }
        if matches_any(&id, &DEPS_EXTERNAL) {
            return Some(id);
        }

        let is_dist = id.contains("/dist/");
        if (is_node_module || is_dist) && is_valid_node_import(&id) {
            return Some(id);
        }

        None
    }
}

impl Default for Externalizer {
    fn default() -> Self {
        Self::new(DepsConfig::default())
    }
}
