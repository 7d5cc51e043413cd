// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Isolated evaluation of wrapped module code.

use async_trait::async_trait;
use futures::future::LocalBoxFuture;
use futures::FutureExt;
use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::future::Future;
use std::rc::Rc;

use super::context::{ModuleContext, CONTEXT_KEYS};
use crate::error::{Result, RunnerError};

/// Replaces a leading `#!` line with spaces, keeping every offset intact.
pub fn strip_shebang(code: &str) -> String {
    if !code.starts_with("#!") {
        return code.to_string();
    }
    let end = code.find('\n').unwrap_or(code.len());
    let line = &code[..end];
    format!("{}{}", " ".repeat(line.chars().count()), &code[end..])
}

/// Module code wrapped into an async function over the context bindings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleScript {
    /// Resolved file name, used for diagnostics and stack traces
    pub filename: String,
    /// `'use strict';async (<keys>)=>{{<code>\n}}`
    pub code: String,
    /// Column offset mapping the wrapper's first line back onto the source
    pub column_offset: i64,
    /// Parameter names, equal to [`CONTEXT_KEYS`]
    pub parameters: Vec<String>,
}

impl ModuleScript {
    /// Strips the shebang of `code` and wraps it.
    pub fn wrap(filename: impl Into<String>, code: &str) -> Self {
        let definition = format!("'use strict';async ({})=>{{{{", CONTEXT_KEYS.join(","));
        let column_offset = -(definition.len() as i64);
        Self {
            filename: filename.into(),
            code: format!("{}{}\n}}}}", definition, strip_shebang(code)),
            column_offset,
            parameters: CONTEXT_KEYS.iter().map(|k| k.to_string()).collect(),
        }
    }
}

/// Runs wrapped module code.
///
/// Implementations execute `script` so that it only sees the bindings of
/// `context`, then invoke it and wait for it to settle.
#[async_trait(?Send)]
pub trait Evaluator {
    /// Evaluate one module
    async fn evaluate(&self, script: &ModuleScript, context: ModuleContext) -> Result<()>;
}

type ModuleBody = Rc<dyn Fn(ModuleContext) -> LocalBoxFuture<'static, Result<()>>>;

/// Evaluator for module bodies written in Rust.
///
/// Each body is bound to a filename and receives the module's context, so
/// it can only reach other modules through the injected bindings. The
/// body is picked by `script.filename` alone: `script.code` is never
/// executed, and a file without a body fails to evaluate.
#[derive(Default)]
pub struct NativeEvaluator {
    bodies: RefCell<FxHashMap<String, ModuleBody>>,
    evaluations: RefCell<FxHashMap<String, usize>>,
}

impl NativeEvaluator {
    /// Create an evaluator with no module bodies
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `body` to the module at `filename`
    pub fn define<F, Fut>(&self, filename: impl Into<String>, body: F)
    where
        F: Fn(ModuleContext) -> Fut + 'static,
        Fut: Future<Output = Result<()>> + 'static,
    {
        let body: ModuleBody = Rc::new(move |context| body(context).boxed_local());
        self.bodies.borrow_mut().insert(filename.into(), body);
    }

    /// How many times the module at `filename` was evaluated
    pub fn evaluation_count(&self, filename: &str) -> usize {
        self.evaluations.borrow().get(filename).copied().unwrap_or(0)
    }
}

#[async_trait(?Send)]
impl Evaluator for NativeEvaluator {
    async fn evaluate(&self, script: &ModuleScript, context: ModuleContext) -> Result<()> {
        let body = self.bodies.borrow().get(&script.filename).cloned();
        let Some(body) = body else {
            return Err(RunnerError::evaluation(
                &script.filename,
                "no module body is defined for this file",
            ));
        };
        *self
            .evaluations
            .borrow_mut()
            .entry(script.filename.clone())
            .or_insert(0) += 1;
        body(context).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module_system::exports::ModuleExports;
    use vnode_runtime::Value;

    #[test]
    fn test_strip_shebang_keeps_offsets() {
        let code = "#!/usr/bin/env node\nconsole.log(1)";
        let stripped = strip_shebang(code);
        assert_eq!(stripped.len(), code.len());
        assert!(stripped.starts_with("                   \n"));
        assert!(stripped.ends_with("console.log(1)"));
        assert_eq!(strip_shebang("#!only"), "      ");
        assert_eq!(strip_shebang("let a = '#!'"), "let a = '#!'");
    }

    #[test]
    fn test_wrap() {
        let script = ModuleScript::wrap("/src/a.js", "export {}");
        assert!(script
            .code
            .starts_with("'use strict';async (__vite_ssr_import__,__vite_ssr_dynamic_import__,"));
        assert!(script.code.ends_with("__dirname)=>{{export {}\n}}"));
        let definition_len = script.code.len() - "export {}\n}}".len();
        assert_eq!(script.column_offset, -(definition_len as i64));
        assert_eq!(script.parameters.len(), CONTEXT_KEYS.len());
    }

    #[tokio::test]
    async fn test_native_evaluator() {
        let evaluator = NativeEvaluator::new();
        evaluator.define("/src/a.js", |ctx: ModuleContext| async move {
            ctx.exports().define_value("a", Value::from(1))?;
            Ok::<_, RunnerError>(())
        });

        let exports = ModuleExports::new("/src/a.js", true);
        let context = ModuleContext::new(
            "/src/a.js",
            exports.clone(),
            Rc::new(|_: String| async { Ok::<_, RunnerError>(Value::Undefined) }.boxed_local()),
        );
        let script = ModuleScript::wrap("/src/a.js", "");
        evaluator.evaluate(&script, context.clone()).await.unwrap();
        assert_eq!(exports.get("a").unwrap(), Value::from(1));
        assert_eq!(evaluator.evaluation_count("/src/a.js"), 1);

        let missing = ModuleScript::wrap("/src/b.js", "");
        let err = evaluator.evaluate(&missing, context).await.unwrap_err();
        assert!(matches!(err, RunnerError::Evaluation { .. }));
    }
}
