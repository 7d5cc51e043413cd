// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Inline source maps of transformed modules.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use once_cell::sync::Lazy;
use regex::Regex;
use sourcemap::SourceMap;

static INLINE_SOURCE_MAP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"//# sourceMappingURL=data:application/json(?:;charset=utf-8)?;base64,([A-Za-z0-9+/=]+)",
    )
    .expect("valid regex")
});

/// The base64 payload of the last inline source map comment in `code`.
pub fn inline_source_map_data(code: &str) -> Option<&str> {
    INLINE_SOURCE_MAP
        .captures_iter(code)
        .last()
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Decodes and parses the inline source map of `code`, if any.
pub fn extract_source_map(code: &str) -> Option<SourceMap> {
    let data = inline_source_map_data(code)?;
    let bytes = match STANDARD.decode(data) {
        Ok(bytes) => bytes,
        Err(err) => {
            tracing::debug!(target: "vnode::runner", %err, "invalid inline source map encoding");
            return None;
        }
    };
    match SourceMap::from_slice(&bytes) {
        Ok(map) => Some(map),
        Err(err) => {
            tracing::debug!(target: "vnode::runner", %err, "invalid inline source map");
            None
        }
    }
}
