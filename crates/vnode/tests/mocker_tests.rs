// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Module mocking through the runner.

mod common;

use async_trait::async_trait;
use common::{Harness, LexicalResolver};
use std::fs;
use std::path::Path;
use std::rc::Rc;
use std::time::Duration;
use vnode::module_system::normalize::slash;
use vnode::{
    MemoryFetcher, MockFactory, ModuleContext, ModuleRunner, NativeEvaluator, ObjectRef, ResolveId, ResolvedId,
    RunnerError, RunnerOptions, Value,
};
use vnode_runtime::FunctionRef;

fn math_factory() -> MockFactory {
    MockFactory::sync(|| {
        let add = FunctionRef::native("add", 0, |_| Ok(Value::from(42)));
        Ok(Value::Object(ObjectRef::from_entries([("add", Value::Function(add))])))
    })
}

fn define_real_math(h: &Harness, path: &str) {
    h.fetcher.add(path, "export function add(a, b) { return a + b }");
    h.evaluator.define(path, |ctx: ModuleContext| async move {
        let add = FunctionRef::native("add", 2, |args| {
            let a = args.first().and_then(Value::as_number).unwrap_or(0.0);
            let b = args.get(1).and_then(Value::as_number).unwrap_or(0.0);
            Ok(Value::from(a + b))
        });
        ctx.exports().define_value("add", Value::Function(add))?;
        ctx.exports().define_value("PI", Value::from(3.0))?;
        Ok::<_, RunnerError>(())
    });
}

fn touch(root: &Path, relative: &str) -> String {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, "").unwrap();
    slash(&path.to_string_lossy())
}

#[tokio::test]
async fn test_factory_mock_and_missing_export() {
    let h = Harness::new();
    h.runner.enable_mocking();
    h.fetcher.add("/src/main.js", "import { add, subtract } from './math'");
    h.evaluator.define("/src/main.js", |ctx: ModuleContext| async move {
        ctx.mocker().expect("mocking is enabled").mock("./math", Some(math_factory()));

        let math = ctx.import("./math").await?;
        ctx.exports().define_value("sum", math.get("add")?.call(&[])?)?;
        let err = math.get("subtract").unwrap_err();
        ctx.exports().define_value("error", Value::from(err.to_string()))?;
        Ok::<_, RunnerError>(())
    });

    let main = h.runner.execute_file("src/main.js").await.unwrap();
    assert_eq!(main.get("sum").unwrap(), Value::from(42));

    let error = main.get("error").unwrap();
    let error = error.as_str().unwrap();
    assert!(error.contains("\"subtract\""));
    assert!(error.contains("\"./math\""));
    assert!(error.contains("import_actual"));
    // The real module was never requested
    assert_eq!(h.fetcher.fetch_count("/src/math"), 0);
}

#[tokio::test]
async fn test_factory_runs_once_for_every_importer() {
    let h = Harness::new();
    let mocker = h.runner.enable_mocking();
    let calls = std::rc::Rc::new(std::cell::Cell::new(0));
    let counter = calls.clone();
    mocker.queue_mock(
        "./math.js",
        "/src/main.js",
        Some(MockFactory::new(move || {
            counter.set(counter.get() + 1);
            async {
                tokio::task::yield_now().await;
                Ok(Value::Object(ObjectRef::from_entries([("PI", Value::from(4.0))])))
            }
        })),
    );

    h.fetcher.add("/src/main.js", "import './a.js'; import './b.js'");
    h.evaluator.define("/src/main.js", |ctx: ModuleContext| async move {
        let (a, b) = futures::join!(ctx.import("./a.js"), ctx.import("./b.js"));
        ctx.exports().define_value("a", a?.get("math")?)?;
        ctx.exports().define_value("b", b?.get("math")?)?;
        Ok::<_, RunnerError>(())
    });
    for importer in ["/src/a.js", "/src/b.js"] {
        h.fetcher.add(importer, "import * as math from './math.js'");
        h.evaluator.define(importer, |ctx: ModuleContext| async move {
            let math = ctx.import("./math.js").await?;
            ctx.exports().define_value("math", math)?;
            Ok::<_, RunnerError>(())
        });
    }

    let main = h.runner.execute_file("src/main.js").await.unwrap();
    assert_eq!(calls.get(), 1);
    assert_eq!(main.get("a").unwrap(), main.get("b").unwrap());
    assert_eq!(main.get("a").unwrap().get("PI").unwrap(), Value::from(4.0));
}

#[tokio::test]
async fn test_automock_of_self_referencing_module() {
    let h = Harness::new();
    let mocker = h.runner.enable_mocking();
    mocker.queue_mock("/src/config.js", "/src/main.js", None);

    h.fetcher.add("/src/config.js", "export const config = { self: config }");
    h.evaluator.define("/src/config.js", |ctx: ModuleContext| async move {
        let config = ObjectRef::new();
        config.set("name", Value::from("app"))?;
        config.set("self", Value::Object(config.clone()))?;
        let load = FunctionRef::native("load", 1, |_| Ok(Value::from("real")));
        config.set("load", Value::Function(load))?;
        ctx.exports().define_value("config", Value::Object(config))?;
        Ok::<_, RunnerError>(())
    });
    h.fetcher.add("/src/main.js", "import { config } from './config.js'");
    h.evaluator.define("/src/main.js", |ctx: ModuleContext| async move {
        let config = ctx.import("./config.js").await?;
        ctx.exports().define_value("config", config.get("config")?)?;
        Ok::<_, RunnerError>(())
    });

    let main = h.runner.execute_file("src/main.js").await.unwrap();
    let config = main.get("config").unwrap();
    assert_eq!(config.get("name").unwrap(), Value::from("app"));
    assert_eq!(config.get("self").unwrap(), config);

    let load = config.get("load").unwrap();
    assert!(load.as_function().unwrap().is_mock_function());
    assert_eq!(load.call(&[]).unwrap(), Value::Undefined);

    // The real module ran once to be inspected
    assert_eq!(h.evaluator.evaluation_count("/src/config.js"), 1);
    let real = h.runner.cache().get("/src/config.js").exports.unwrap();
    assert_ne!(real.get("config").unwrap(), config);
}

#[tokio::test]
async fn test_mocks_folder_next_to_module() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let main = touch(root, "src/main.js");
    let math = touch(root, "src/math.js");
    let mock = touch(root, "src/__mocks__/math.js");

    let h = Harness::with_root(root);
    let mocker = h.runner.enable_mocking();
    mocker.queue_mock("./math.js", &main, None);

    define_real_math(&h, &math);
    h.fetcher.add(&mock, "export const add = () => 'from mocks folder'");
    h.evaluator.define(mock.clone(), |ctx: ModuleContext| async move {
        ctx.exports().define_value("source", Value::from("mocks folder"))?;
        Ok::<_, RunnerError>(())
    });
    h.fetcher.add(&main, "import * as math from './math.js'");
    h.evaluator.define(main.clone(), |ctx: ModuleContext| async move {
        let math = ctx.import("./math.js").await?;
        ctx.exports().define_value("math", math)?;
        Ok::<_, RunnerError>(())
    });

    let exports = h.runner.execute_file(&main).await.unwrap();
    let math_exports = exports.get("math").unwrap();
    assert_eq!(math_exports.get("source").unwrap(), Value::from("mocks folder"));
    assert_eq!(h.evaluator.evaluation_count(&math), 0);
    assert_eq!(h.evaluator.evaluation_count(&mock), 1);
}

#[tokio::test]
async fn test_import_actual_and_import_mock() {
    let h = Harness::new();
    h.runner.enable_mocking();
    define_real_math(&h, "/src/math.js");
    h.fetcher.add("/src/util.js", "export function format() {}");
    h.evaluator.define("/src/util.js", |ctx: ModuleContext| async move {
        let format = FunctionRef::native("format", 1, |_| Ok(Value::from("formatted")));
        ctx.exports().define_value("format", Value::Function(format))?;
        Ok::<_, RunnerError>(())
    });

    h.fetcher.add("/src/main.test.js", "mock('./math.js', factory)");
    h.evaluator.define("/src/main.test.js", |ctx: ModuleContext| async move {
        let mocker = ctx.mocker().expect("mocking is enabled");
        mocker.mock("./math.js", Some(math_factory()));

        let actual = mocker.import_actual("./math.js").await?;
        let mocked = mocker.import_mock("./math.js").await?;
        let util = mocker.import_mock("./util.js").await?;

        ctx.exports().define_value("actual", actual.get("add")?.call(&[Value::from(1), Value::from(2)])?)?;
        ctx.exports().define_value("mocked", mocked.get("add")?.call(&[])?)?;
        ctx.exports().define_value("format", util.get("format")?.call(&[])?)?;
        Ok::<_, RunnerError>(())
    });

    let exports = h.runner.execute_file("src/main.test.js").await.unwrap();
    assert_eq!(exports.get("actual").unwrap(), Value::from(3.0));
    assert_eq!(exports.get("mocked").unwrap(), Value::from(42));
    assert_eq!(exports.get("format").unwrap(), Value::Undefined);
}

#[tokio::test]
async fn test_unmock_restores_real_module() {
    let h = Harness::new();
    let mocker = h.runner.enable_mocking();
    define_real_math(&h, "/src/math.js");
    mocker.queue_mock("./math.js", "/src/main.js", Some(math_factory()));
    mocker.queue_unmock("./math.js", "/src/main.js");

    h.fetcher.add("/src/main.js", "import { add } from './math.js'");
    h.evaluator.define("/src/main.js", |ctx: ModuleContext| async move {
        let math = ctx.import("./math.js").await?;
        ctx.exports().define_value("sum", math.get("add")?.call(&[Value::from(2), Value::from(2)])?)?;
        Ok::<_, RunnerError>(())
    });

    let exports = h.runner.execute_file("src/main.js").await.unwrap();
    assert_eq!(exports.get("sum").unwrap(), Value::from(4.0));
    assert_eq!(mocker.pending_count(), 0);
}

#[tokio::test]
async fn test_suite_registrations_are_isolated() {
    let h = Harness::new();
    let mocker = h.runner.enable_mocking();

    mocker.set_suite_file(Some("/test/a.test.js"));
    mocker.queue_mock("/src/math.js", "/test/a.test.js", Some(math_factory()));
    mocker.resolve_mocks().await.unwrap();
    assert!(mocker.get_dependency_mock("/src/math.js").is_some());

    mocker.set_suite_file(Some("/test/b.test.js"));
    assert!(mocker.get_dependency_mock("/src/math.js").is_none());

    mocker.set_suite_file(None);
    mocker.queue_mock("/src/math.js", "/test/setup.js", None);
    mocker.resolve_mocks().await.unwrap();
    mocker.set_suite_file(Some("/test/b.test.js"));
    assert!(mocker.get_dependency_mock("/src/math.js").is_some());
}

#[tokio::test]
async fn test_concurrent_lookups_wait_for_declarations() {
    let h = Harness::new();
    let mocker = h.runner.enable_mocking();
    mocker.queue_mock("/src/math.js", "/src/main.js", Some(math_factory()));

    let (first, second) = futures::join!(
        mocker.request_with_mock("/src/math.js", &[]),
        mocker.request_with_mock("/src/math.js", &[])
    );
    for outcome in [first.unwrap(), second.unwrap()] {
        assert!(matches!(outcome, vnode::MockOutcome::Exports(_)));
    }
}

#[tokio::test]
async fn test_factory_importing_its_own_dependents_settles() {
    let h = Harness::new();
    h.runner.enable_mocking();

    h.fetcher.add("/src/a.js", "export const real = true");
    h.evaluator.define("/src/a.js", |ctx: ModuleContext| async move {
        ctx.exports().define_value("real", Value::from(true))?;
        Ok::<_, RunnerError>(())
    });
    h.fetcher.add("/src/b.js", "import * as a from './a.js'");
    h.evaluator.define("/src/b.js", |ctx: ModuleContext| async move {
        let a = ctx.import("./a.js").await?;
        ctx.exports().define_value("a", a)?;
        Ok::<_, RunnerError>(())
    });
    h.fetcher.add("/src/main.js", "mock('./a.js', async () => ({ b: await import('./b.js') }))");
    h.evaluator.define("/src/main.js", |ctx: ModuleContext| async move {
        let importer = ctx.clone();
        ctx.mocker().expect("mocking is enabled").mock(
            "./a.js",
            Some(MockFactory::new(move || {
                let ctx = importer.clone();
                async move {
                    let b = ctx.import("./b.js").await?;
                    Ok(Value::Object(ObjectRef::from_entries([
                        ("source", Value::from("factory")),
                        ("b", b),
                    ])))
                }
            })),
        );
        let a = ctx.import("./a.js").await?;
        ctx.exports().define_value("a", a)?;
        Ok::<_, RunnerError>(())
    });

    let main = tokio::time::timeout(Duration::from_secs(3), h.runner.execute_file("src/main.js"))
        .await
        .expect("the run settles")
        .unwrap();
    let mocked = main.get("a").unwrap();
    assert_eq!(mocked.get("source").unwrap(), Value::from("factory"));
    // b, imported by the factory, sees the real module
    let seen_by_b = mocked.get("b").unwrap().get("a").unwrap();
    assert_eq!(seen_by_b.get("real").unwrap(), Value::from(true));
    assert_eq!(h.evaluator.evaluation_count("/src/a.js"), 1);
}

/// Rejects specifiers naming a missing module.
struct RejectingResolver;

#[async_trait(?Send)]
impl ResolveId for RejectingResolver {
    async fn resolve_id(&self, id: &str, importer: Option<&str>) -> vnode::Result<Option<ResolvedId>> {
        if id.contains("missing") {
            return Err(RunnerError::resolution(id, importer, "module not found"));
        }
        LexicalResolver.resolve_id(id, importer).await
    }
}

#[tokio::test]
async fn test_failed_declaration_keeps_the_batch() {
    let options = RunnerOptions::new(Rc::new(MemoryFetcher::new()), Rc::new(NativeEvaluator::new()))
        .with_resolver(Rc::new(RejectingResolver));
    let runner = ModuleRunner::new(options);
    let mocker = runner.enable_mocking();
    mocker.queue_mock("/src/good.js", "/src/main.js", Some(math_factory()));
    mocker.queue_mock("./missing.js", "/src/main.js", None);

    for _ in 0..2 {
        let err = mocker.resolve_mocks().await.unwrap_err();
        assert!(matches!(&err, RunnerError::Resolution { id, .. } if id.contains("missing")));
        assert_eq!(mocker.pending_count(), 2);
        assert!(mocker.get_dependency_mock("/src/good.js").is_none());
    }
    let err = mocker.request_with_mock("/src/good.js", &[]).await.unwrap_err();
    assert!(matches!(err, RunnerError::Resolution { .. }));

    // Later declarations queue behind the failed batch
    mocker.queue_unmock("/src/good.js", "/src/main.js");
    assert_eq!(mocker.pending_count(), 3);

    mocker.reset();
    mocker.queue_mock("/src/good.js", "/src/main.js", Some(math_factory()));
    mocker.resolve_mocks().await.unwrap();
    assert_eq!(mocker.pending_count(), 0);
    assert!(mocker.get_dependency_mock("/src/good.js").is_some());
}
