// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Module path resolution (Node.js algorithm)

use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use super::builtins::is_builtin;
use super::normalize::{canonicalize, clean_url, dirname, resolve_path, slash};
use super::provider::{ResolveId, ResolvedId};
use crate::error::Result;

/// File system resolver following the Node.js lookup rules: built-ins,
/// relative and absolute files with extension and `index` probing, and
/// `node_modules` packages through `package.json` `main`.
pub struct FsResolver {
    /// Directory used when a request has no importer
    root: PathBuf,
    /// File extensions to try
    extensions: Vec<String>,
}

impl FsResolver {
    /// Create a new resolver rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            extensions: [".js", ".mjs", ".cjs", ".ts", ".json"]
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
        }
    }

    /// Replace the extensions tried
    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extensions = extensions.into_iter().map(Into::into).collect();
        self
    }

    /// Resolve a specifier to an absolute file path.
    pub fn resolve(&self, specifier: &str, importer: Option<&str>) -> Option<PathBuf> {
        let parent_dir = match importer {
            Some(importer) => PathBuf::from(dirname(clean_url(&canonicalize(importer)))),
            None => self.root.clone(),
        };

        if specifier.starts_with("./")
            || specifier.starts_with("../")
            || specifier.starts_with('/')
            || (cfg!(windows) && specifier.chars().nth(1) == Some(':'))
        {
            let path = resolve_path(&slash(&parent_dir.to_string_lossy()), specifier);
            return self.resolve_file(Path::new(&path));
        }

        self.resolve_node_modules(specifier, &parent_dir)
    }

    /// Resolve a file path
    fn resolve_file(&self, path: &Path) -> Option<PathBuf> {
        if path.is_file() {
            return Some(path.to_path_buf());
        }

        // Extensions are appended, `a.service` must not become `a.js`
        for ext in &self.extensions {
            let mut with_ext = path.as_os_str().to_owned();
            with_ext.push(ext);
            let with_ext = PathBuf::from(with_ext);
            if with_ext.is_file() {
                return Some(with_ext);
            }
        }

        if path.is_dir() {
            return self.resolve_directory(path);
        }

        None
    }

    /// Resolve a directory (look for package.json main or index.js)
    fn resolve_directory(&self, dir: &Path) -> Option<PathBuf> {
        let package_json_path = dir.join("package.json");
        if let Ok(content) = std::fs::read_to_string(&package_json_path) {
            match serde_json::from_str::<PackageJson>(&content) {
                Ok(PackageJson { main: Some(main) }) => {
                    let main_path = dir.join(&main);
                    if main_path.is_file() {
                        return Some(main_path);
                    }
                    for ext in &self.extensions {
                        let candidate = dir.join(format!("{}{}", main, ext));
                        if candidate.is_file() {
                            return Some(candidate);
                        }
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::debug!(
                        target: "vnode::runner",
                        path = %package_json_path.display(),
                        %err,
                        "ignoring malformed package.json"
                    );
                }
            }
        }

        self.extensions
            .iter()
            .map(|ext| dir.join(format!("index{}", ext)))
            .find(|index| index.is_file())
    }

    /// Resolve a module from node_modules
    fn resolve_node_modules(&self, specifier: &str, parent_dir: &Path) -> Option<PathBuf> {
        let (package_name, subpath) = parse_package_specifier(specifier);

        // Walk up directory tree looking for node_modules
        let mut current = Some(parent_dir);
        while let Some(dir) = current {
            let package_dir = dir.join("node_modules").join(package_name);

            if package_dir.exists() {
                let resolved = match subpath {
                    Some(sub) => self.resolve_file(&package_dir.join(sub)),
                    None => self.resolve_directory(&package_dir),
                };
                if resolved.is_some() {
                    return resolved;
                }
            }

            current = dir.parent();
        }

        None
    }
}

impl Default for FsResolver {
    fn default() -> Self {
        Self::new("/")
    }
}

#[async_trait(?Send)]
impl ResolveId for FsResolver {
    async fn resolve_id(&self, id: &str, importer: Option<&str>) -> Result<Option<ResolvedId>> {
        if is_builtin(id) {
            return Ok(Some(ResolvedId {
                id: id.to_string(),
                external: true,
            }));
        }

        let path = clean_url(id);
        let query = &id[path.len()..];
        let resolved = self.resolve(path, importer).map(|file| {
            let file = slash(&file.to_string_lossy());
            ResolvedId {
                external: file.contains("/node_modules/"),
                id: format!("{}{}", file, query),
            }
        });
        tracing::trace!(target: "vnode::runner", id, ?importer, ?resolved, "resolved");
        Ok(resolved)
    }
}

/// Minimal package.json structure for resolution
#[derive(Debug, Deserialize)]
struct PackageJson {
    main: Option<String>,
}

/// Parse a package specifier into name and optional subpath
fn parse_package_specifier(specifier: &str) -> (&str, Option<&str>) {
    if specifier.starts_with('@') {
        // Scoped package: @scope/name or @scope/name/subpath
        if let Some(slash_pos) = specifier[1..].find('/') {
            let after_scope = &specifier[slash_pos + 2..];
            if let Some(subpath_pos) = after_scope.find('/') {
                let name_end = slash_pos + 2 + subpath_pos;
                return (&specifier[..name_end], Some(&specifier[name_end + 1..]));
            }
        }
        (specifier, None)
    } else if let Some(slash_pos) = specifier.find('/') {
        (&specifier[..slash_pos], Some(&specifier[slash_pos + 1..]))
    } else {
        (specifier, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(root: &Path, relative: &str, content: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn id_of(root: &Path, relative: &str) -> String {
        slash(&root.join(relative).to_string_lossy())
    }

    #[test]
    fn test_parse_package_specifier() {
        assert_eq!(parse_package_specifier("lodash"), ("lodash", None));
        assert_eq!(parse_package_specifier("lodash/get"), ("lodash", Some("get")));
        assert_eq!(parse_package_specifier("@types/node"), ("@types/node", None));
        assert_eq!(
            parse_package_specifier("@babel/core/lib/index"),
            ("@babel/core", Some("lib/index"))
        );
    }

    #[tokio::test]
    async fn test_builtins_are_external() {
        let resolver = FsResolver::default();
        let resolved = resolver.resolve_id("node:fs", None).await.unwrap().unwrap();
        assert_eq!(resolved.id, "node:fs");
        assert!(resolved.external);
    }

    #[tokio::test]
    async fn test_relative_files() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "src/main.js", "");
        write(root, "src/util.service.js", "");
        write(root, "src/lib/index.ts", "");

        let resolver = FsResolver::new(root);
        let importer = id_of(root, "src/main.js");

        let resolved = resolver
            .resolve_id("./util.service", Some(&importer))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved.id, id_of(root, "src/util.service.js"));
        assert!(!resolved.external);

        let resolved = resolver
            .resolve_id("./lib?raw", Some(&importer))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved.id, format!("{}?raw", id_of(root, "src/lib/index.ts")));

        assert!(resolver
            .resolve_id("./missing", Some(&importer))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_node_modules_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "src/deep/main.js", "");
        write(root, "node_modules/pkg/package.json", r#"{"main": "dist/entry"}"#);
        write(root, "node_modules/pkg/dist/entry.js", "");
        write(root, "node_modules/@scope/tool/lib/run.cjs", "");

        let resolver = FsResolver::new(root);
        let importer = id_of(root, "src/deep/main.js");

        let resolved = resolver.resolve_id("pkg", Some(&importer)).await.unwrap().unwrap();
        assert_eq!(resolved.id, id_of(root, "node_modules/pkg/dist/entry.js"));
        assert!(resolved.external);

        let resolved = resolver
            .resolve_id("@scope/tool/lib/run", None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved.id, id_of(root, "node_modules/@scope/tool/lib/run.cjs"));

        assert!(resolver.resolve_id("nope", None).await.unwrap().is_none());
    }
}
