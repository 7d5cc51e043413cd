// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Path and module identifier normalization.
//!
//! Every module request goes through these functions before it reaches the
//! cache, so that `/@fs/a.js`, `file:///a.js` and `/a.js?v=123` all share one
//! cache entry. Every normalizer is idempotent.

use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;

/// Prefix of ids that must be passed to the transform provider unchanged.
pub const VALID_ID_PREFIX: &str = "/@id/";

/// Prefix of virtual module ids.
pub const VIRTUAL_PREFIX: char = '\0';

static INTERNAL_REQUEST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^/?(@vite/client|@vite/env)$").expect("valid regex"));

static V_QUERY: Lazy<Regex> = Lazy::new(|| Regex::new(r"\?v=\w+").expect("valid regex"));
static V_PARAM: Lazy<Regex> = Lazy::new(|| Regex::new(r"&v=\w+").expect("valid regex"));
static T_QUERY: Lazy<Regex> = Lazy::new(|| Regex::new(r"\?t=\w+").expect("valid regex"));
static T_PARAM: Lazy<Regex> = Lazy::new(|| Regex::new(r"&t=\w+").expect("valid regex"));

/// Converts backslashes to forward slashes.
pub fn slash(path: &str) -> String {
    path.replace('\\', "/")
}

fn collapse_leading_slashes(id: &str) -> String {
    if id.starts_with("//") {
        format!("/{}", id.trim_start_matches('/'))
    } else {
        id.to_string()
    }
}

fn fixpoint(id: &str, step: impl Fn(&str) -> String) -> String {
    let mut current = id.to_string();
    loop {
        let next = step(&current);
        if next == current {
            return next;
        }
        current = next;
    }
}

fn normalize_request_id_once(id: &str) -> String {
    let id = if let Some(rest) = id.strip_prefix("/@id/__x00__") {
        format!("{}{}", VIRTUAL_PREFIX, rest)
    } else {
        id.strip_prefix(VALID_ID_PREFIX).unwrap_or(id).to_string()
    };
    let id = id.strip_prefix("__vite-browser-external:").unwrap_or(&id);
    let id = id.strip_prefix("file:").unwrap_or(id);
    let id = collapse_leading_slashes(id);

    let id = V_QUERY.replace(&id, "?");
    let id = V_PARAM.replace(&id, "");
    let id = T_QUERY.replace(&id, "?");
    let id = T_PARAM.replace(&id, "");
    let id = id.replacen("?import", "?", 1);
    let id = id.replacen("&import", "", 1);
    let id = id.replacen("?&", "?", 1);
    id.trim_end_matches('?').to_string()
}

/// Normalizes a request id as it arrives from the transform pipeline.
///
/// Strips `base`, dev-server id prefixes and the cache-busting query
/// parameters (`v`, `t`, `import`).
pub fn normalize_request_id(id: &str, base: Option<&str>) -> String {
    let id = match base {
        Some(base) if base != "/" && !base.is_empty() && id.starts_with(base) => {
            format!("/{}", &id[base.len()..])
        }
        _ => id.to_string(),
    };
    fixpoint(&id, normalize_request_id_once)
}

fn normalize_module_id_once(id: &str) -> String {
    let id = slash(id);
    let id = match id.strip_prefix("/@fs/") {
        Some(rest) if cfg!(windows) => rest.to_string(),
        Some(rest) => format!("/{}", rest),
        None => id,
    };
    let id = match id.strip_prefix("file:/") {
        Some(rest) => format!("/{}", rest),
        None => id,
    };
    let id = id.strip_prefix("node:").unwrap_or(&id);
    collapse_leading_slashes(id)
}

/// Normalizes a module id into the form used as cache key.
///
/// Virtual (`\0`-prefixed) ids are returned unchanged.
pub fn normalize_module_id(id: &str) -> String {
    if id.starts_with(VIRTUAL_PREFIX) {
        return id.to_string();
    }
    fixpoint(id, normalize_module_id_once)
}

/// Request normalization followed by module id normalization.
pub fn canonicalize(id: &str) -> String {
    fixpoint(id, |id| normalize_module_id(&normalize_request_id(id, None)))
}

/// Drops the `#hash` and then the `?query` of a url.
pub fn clean_url(url: &str) -> &str {
    let url = url.split_once('#').map_or(url, |(head, _)| head);
    url.split_once('?').map_or(url, |(head, _)| head)
}

/// True for dev-server client modules that are never loaded from disk.
pub fn is_internal_request(id: &str) -> bool {
    INTERNAL_REQUEST.is_match(id)
}

/// Lexically resolves `relative` against the directory `base`, like
/// `path.resolve` without touching the file system.
///
/// Absolute `relative` paths replace `base`; `.` and `..` segments are
/// folded.
pub fn resolve_path(base: &str, relative: &str) -> String {
    let relative = slash(relative);
    let joined = if relative.starts_with('/') {
        relative
    } else {
        format!("{}/{}", slash(base), relative)
    };

    let mut segments: Vec<&str> = Vec::new();
    for segment in joined.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    format!("/{}", segments.join("/"))
}

/// The directory part of a slash-separated path.
pub fn dirname(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) => "/",
        Some(index) => &path[..index],
        None => ".",
    }
}

/// A module id mapped onto the file system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePath {
    /// Absolute path, or the id itself when no file was found
    pub path: String,
    /// Whether the file exists
    pub exists: bool,
}

/// Maps a module id onto a file path under `root`.
pub fn to_file_path(id: &str, root: &Path) -> FilePath {
    if id.starts_with(VIRTUAL_PREFIX) {
        return FilePath {
            path: id.to_string(),
            exists: false,
        };
    }

    let root = slash(&root.to_string_lossy());
    let exists_on_disk = |p: &str| Path::new(clean_url(p)).exists();

    let (mut absolute, exists) = if let Some(rest) = id.strip_prefix("/@fs/") {
        (format!("/{}", rest), true)
    } else if !id.starts_with(&root) && id.starts_with('/') {
        let resolved = format!("{}/{}", root.trim_end_matches('/'), &id[1..]);
        if exists_on_disk(&resolved) {
            (resolved, true)
        } else {
            (id.to_string(), false)
        }
    } else if id.starts_with(&root) && exists_on_disk(id) {
        (id.to_string(), true)
    } else {
        (id.to_string(), false)
    };

    if absolute.starts_with("//") {
        absolute.remove(0);
    }

    FilePath {
        path: absolute,
        exists,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_request_id() {
        assert_eq!(normalize_request_id("/@id/__x00__virtual", None), "\0virtual");
        assert_eq!(normalize_request_id("/@id/lodash", None), "lodash");
        assert_eq!(normalize_request_id("file:///a/b.js", None), "/a/b.js");
        assert_eq!(normalize_request_id("/a.js?v=123abc", None), "/a.js");
        assert_eq!(normalize_request_id("/a.js?t=1&v=2", None), "/a.js");
        assert_eq!(normalize_request_id("/a.js?import&raw", None), "/a.js?raw");
        assert_eq!(normalize_request_id("/a.js?raw&import", None), "/a.js?raw");
        assert_eq!(
            normalize_request_id("__vite-browser-external:fs", None),
            "fs"
        );
    }

    #[test]
    fn test_normalize_request_id_base() {
        assert_eq!(normalize_request_id("/app/src/a.js", Some("/app/")), "/src/a.js");
        assert_eq!(normalize_request_id("/other/a.js", Some("/app/")), "/other/a.js");
    }

    #[test]
    fn test_normalize_module_id() {
        assert!(!normalize_module_id("C:\\a\\b.js").contains('\\'));
        assert_eq!(normalize_module_id("node:fs"), "fs");
        assert_eq!(normalize_module_id("file:///a/b.js"), "/a/b.js");
        assert_eq!(normalize_module_id("///a/b.js"), "/a/b.js");
        assert_eq!(normalize_module_id("\0virtual:x"), "\0virtual:x");
        #[cfg(not(windows))]
        assert_eq!(normalize_module_id("/@fs/a/b.js"), "/a/b.js");
    }

    #[test]
    fn test_normalizers_are_idempotent() {
        let ids = [
            "/@fs//@fs/a.js",
            "file:/file:///x.js",
            "node:node:fs",
            "/@id//@id/y",
            "/a.js?v=1?v=2",
            "////deep/a.js?t=1&t=2&import",
            "/@id/__x00__virtual:z",
            "node:/@id/w",
        ];
        for id in ids {
            let once = normalize_request_id(id, None);
            assert_eq!(normalize_request_id(&once, None), once, "request id {:?}", id);
            let once = normalize_module_id(id);
            assert_eq!(normalize_module_id(&once), once, "module id {:?}", id);
            let once = canonicalize(id);
            assert_eq!(canonicalize(&once), once, "canonical id {:?}", id);
        }
    }

    #[test]
    fn test_resolve_path() {
        assert_eq!(resolve_path("/src", "./math.js"), "/src/math.js");
        assert_eq!(resolve_path("/src/lib", "../util/a.js"), "/src/util/a.js");
        assert_eq!(resolve_path("/src", "/abs/b.js"), "/abs/b.js");
        assert_eq!(resolve_path("/", "../../x"), "/x");
        assert_eq!(dirname("/src/a.js"), "/src");
        assert_eq!(dirname("/a.js"), "/");
        assert_eq!(dirname("lodash"), ".");
    }

    #[test]
    fn test_clean_url() {
        assert_eq!(clean_url("/a.js?x=1#top"), "/a.js");
        assert_eq!(clean_url("/a.js#top?x"), "/a.js");
        assert_eq!(clean_url("/a.js"), "/a.js");
    }

    #[test]
    fn test_internal_request() {
        assert!(is_internal_request("@vite/client"));
        assert!(is_internal_request("/@vite/env"));
        assert!(!is_internal_request("/@vite/client.js"));
    }

    #[test]
    fn test_to_file_path() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("src")).unwrap();
        std::fs::write(root.join("src/a.js"), "").unwrap();
        let root_str = slash(&root.to_string_lossy());

        let resolved = to_file_path("/src/a.js", root);
        assert_eq!(resolved.path, format!("{}/src/a.js", root_str));
        assert!(resolved.exists);

        let under_root = to_file_path(&format!("{}/src/a.js?x", root_str), root);
        assert!(under_root.exists);

        let missing = to_file_path("/src/missing.js", root);
        assert_eq!(missing.path, "/src/missing.js");
        assert!(!missing.exists);

        let fs = to_file_path("/@fs/abs/b.js", root);
        assert_eq!(fs.path, "/abs/b.js");
        assert!(fs.exists);

        // Only the `/@fs/` prefix marks a file system path
        let lookalike = to_file_path("/@fsx.js", root);
        assert_eq!(lookalike.path, "/@fsx.js");
        assert!(!lookalike.exists);

        assert!(!to_file_path("\0virtual", root).exists);
    }
}
