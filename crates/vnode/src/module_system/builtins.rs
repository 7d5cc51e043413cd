// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Built-in platform modules.

/// Built-in module names, without the `node:` scheme.
pub const BUILTIN_MODULES: &[&str] = &[
    "assert",
    "async_hooks",
    "buffer",
    "child_process",
    "cluster",
    "console",
    "constants",
    "crypto",
    "dgram",
    "diagnostics_channel",
    "dns",
    "domain",
    "events",
    "fs",
    "http",
    "http2",
    "https",
    "inspector",
    "module",
    "net",
    "os",
    "path",
    "perf_hooks",
    "process",
    "punycode",
    "querystring",
    "readline",
    "repl",
    "stream",
    "string_decoder",
    "sys",
    "timers",
    "tls",
    "trace_events",
    "tty",
    "url",
    "util",
    "v8",
    "vm",
    "wasi",
    "worker_threads",
    "zlib",
];

/// Modules that only exist with the `node:` scheme.
pub const SCHEME_ONLY_MODULES: &[&str] = &["test", "test/reporters", "sea", "sqlite"];

/// Returns true if `id` names a built-in module (`fs`, `node:fs`, `fs/promises`).
pub fn is_builtin(id: &str) -> bool {
    if let Some(name) = id.strip_prefix("node:") {
        if SCHEME_ONLY_MODULES.contains(&name) {
            return true;
        }
        return is_builtin_name(name);
    }
    is_builtin_name(id)
}

fn is_builtin_name(name: &str) -> bool {
    let root = name.split('/').next().unwrap_or(name);
    BUILTIN_MODULES.contains(&root)
}
