//! Resolution, invocation and override behaviour of the injector.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::anyhow;
use serde_json::json;

use async_injector::{
    annotate, Args, Callable, Constructed, FailurePolicy, Injector, InjectorConfig, InjectorError,
    Invocable, Locals, Module, Service,
};

#[derive(Debug)]
struct Engine {
    cylinders: u32,
}

#[derive(Debug)]
struct Car {
    engine: Arc<Engine>,
}

fn engine_factory(counter: Arc<AtomicUsize>) -> Callable {
    Callable::sync(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(Service::new(Engine { cylinders: 8 }))
    })
}

fn car_type() -> Callable {
    annotate(
        ["engine"],
        Callable::constructor(|args: Args| {
            Ok(Constructed::new(Car {
                engine: args.get::<Engine>(0)?,
            }))
        }),
    )
}

fn depends_on(names: &[&str]) -> Callable {
    annotate(
        names.iter().copied(),
        Callable::sync(|_| Ok(Service::new("done"))),
    )
}

#[tokio::test]
async fn providers_resolve_to_singletons() {
    let counter = Arc::new(AtomicUsize::new(0));
    let module = Module::named("cars")
        .factory("engine", engine_factory(counter.clone()))
        .type_("car", car_type())
        .shared();
    let injector = Injector::new(vec![module]).unwrap();

    let first = injector.get("car").await.unwrap();
    let second = injector.get("car").await.unwrap();
    assert!(first.ptr_eq(&second));

    let car = first.downcast::<Car>().unwrap();
    let engine = injector.get_as::<Engine>("engine").await.unwrap().unwrap();
    assert!(Arc::ptr_eq(&car.engine, &engine));
    assert_eq!(engine.cylinders, 8);
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn reused_module_gets_fresh_instances_per_injector() {
    let module = Module::new()
        .factory("engine", engine_factory(Arc::new(AtomicUsize::new(0))))
        .shared();

    let a = Injector::new(vec![module.clone()]).unwrap();
    let b = Injector::new(vec![module]).unwrap();

    let from_a = a.get("engine").await.unwrap();
    let from_b = b.get("engine").await.unwrap();
    assert!(!from_a.ptr_eq(&from_b));
}

#[tokio::test]
async fn array_notation_declares_dependencies() {
    let module = Module::new()
        .value("a", "A")
        .value("b", "B")
        .factory(
            "joined",
            Invocable::array(
                ["a", "b"],
                Callable::sync(|args| {
                    let a = args.get::<&'static str>(0)?;
                    let b = args.get::<&'static str>(1)?;
                    Ok(Service::new(format!("{a}{b}")))
                }),
            ),
        )
        .shared();
    let injector = Injector::new(vec![module]).unwrap();

    let joined = injector.get_as::<String>("joined").await.unwrap().unwrap();
    assert_eq!(joined.as_str(), "AB");
}

#[tokio::test]
async fn signature_text_supplies_dependency_names() {
    let module = Module::new()
        .value("baz", "baz-value")
        .value("abc", "abc-value")
        .factory(
            "foo",
            Callable::sync(|args| Ok(Service::new(args.names().join(","))))
                .with_signature("function(/* baz */ a, abc)"),
        )
        .shared();
    let injector = Injector::new(vec![module]).unwrap();

    let names = injector.get_as::<String>("foo").await.unwrap().unwrap();
    assert_eq!(names.as_str(), "baz,abc");
}

#[tokio::test]
async fn dotted_names_walk_properties() {
    let module = Module::new()
        .value("config", Service::json(json!({"a": {"b": "c"}, "list": [1, 2]})))
        .value("a.b", "exact key")
        .shared();
    let injector = Injector::new(vec![module]).unwrap();

    let leaf = injector.get("config.a.b").await.unwrap();
    assert_eq!(leaf.as_json(), Some(&json!("c")));

    let item = injector.get("config.list.1").await.unwrap();
    assert_eq!(item.as_json(), Some(&json!(2)));

    assert!(injector.get("config.missing").await.unwrap().is_null());

    let err = injector.get("config.missing.x").await.unwrap_err();
    assert!(matches!(err, InjectorError::Property { .. }));
    assert_eq!(
        err.to_string(),
        "Cannot read property \"x\" of null (resolving \"config.missing.x\")"
    );

    // An exact provider key wins over property lookup.
    let exact = injector.get("a.b").await.unwrap();
    assert_eq!(exact.render(), "exact key");
}

#[tokio::test]
async fn dotted_lookup_requires_the_head_service() {
    let injector = Injector::new(Vec::new()).unwrap();
    let err = injector.get("config.a").await.unwrap_err();
    assert_eq!(err.to_string(), "No provider for \"config\"! (Resolving: config)");
}

#[tokio::test]
async fn injector_is_available_as_a_dependency() {
    let module = Module::new()
        .factory(
            "holder",
            annotate(["injector"], Callable::sync(|args| args.service(0))),
        )
        .shared();
    let injector = Injector::new(vec![module]).unwrap();

    let held = injector.get_as::<Injector>("holder").await.unwrap().unwrap();
    assert!(Injector::ptr_eq(&held, &injector));
}

#[tokio::test]
async fn injector_resolves_to_the_same_value_every_time() {
    let module = Module::new()
        .factory(
            "holder",
            annotate(["injector"], Callable::sync(|args| args.service(0))),
        )
        .shared();
    let injector = Injector::new(vec![module]).unwrap();

    let first = injector.get("injector").await.unwrap();
    let second = injector.get("injector").await.unwrap();
    assert!(first.ptr_eq(&second));
    assert!(injector.get("holder").await.unwrap().ptr_eq(&first));
}

#[tokio::test]
async fn missing_dependency_reports_full_path() {
    let module = Module::new()
        .factory("a", depends_on(&["b"]))
        .factory("b", depends_on(&["c"]))
        .shared();
    let injector = Injector::new(vec![module]).unwrap();

    let err = injector.get("a").await.unwrap_err();
    assert!(matches!(err, InjectorError::Unresolved { .. }));
    assert_eq!(
        err.to_string(),
        "No provider for \"c\"! (Resolving: a -> b -> c)"
    );
}

#[tokio::test]
async fn circular_dependency_is_reported() {
    let module = Module::new()
        .factory("a", depends_on(&["b"]))
        .factory("b", depends_on(&["a"]))
        .shared();
    let injector = Injector::new(vec![module]).unwrap();

    let err = injector.get("a").await.unwrap_err();
    assert!(matches!(err, InjectorError::CircularDependency { .. }));
    assert_eq!(
        err.to_string(),
        "Cannot resolve circular dependency! (Resolving: a -> b -> a)"
    );
}

#[tokio::test]
async fn self_dependency_is_circular() {
    let module = Module::new().factory("a", depends_on(&["a"])).shared();
    let injector = Injector::new(vec![module]).unwrap();

    let err = injector.get("a").await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "Cannot resolve circular dependency! (Resolving: a -> a)"
    );
}

#[tokio::test]
async fn cycles_across_concurrent_chains_fail_instead_of_hanging() {
    fn lookup_after_yield(target: &'static str) -> Callable {
        annotate(
            ["injector"],
            Callable::function(move |args| async move {
                let injector = args.get::<Injector>(0)?;
                tokio::task::yield_now().await;
                injector.get(target).await?;
                Ok::<_, anyhow::Error>(Service::null())
            }),
        )
    }

    let module = Module::new()
        .factory("a", lookup_after_yield("b"))
        .factory("b", lookup_after_yield("a"))
        .shared();
    let injector = Injector::new(vec![module]).unwrap();

    let (a, b) = tokio::join!(injector.get("a"), injector.get("b"));
    for result in [a, b] {
        let err = result.unwrap_err();
        assert!(matches!(err, InjectorError::CircularDependency { .. }), "{err}");
        let path = err.path().unwrap();
        assert!(path.contains("a") && path.contains("b"));
    }
}

#[tokio::test]
async fn lenient_lookup_of_unknown_name_is_null() {
    let injector = Injector::new(Vec::new()).unwrap();
    assert!(injector.get_with("nope", false).await.unwrap().is_null());

    let err = injector.get("nope").await.unwrap_err();
    assert_eq!(err.to_string(), "No provider for \"nope\"! (Resolving: nope)");
}

#[tokio::test]
async fn instantiate_awaits_async_dependencies() {
    let module = Module::new()
        .factory(
            "engine",
            Callable::function(|_| async {
                tokio::task::yield_now().await;
                Ok(Service::new(Engine { cylinders: 6 }))
            }),
        )
        .shared();
    let injector = Injector::new(vec![module]).unwrap();

    let car = injector.instantiate(car_type()).await.unwrap();
    assert_eq!(car.downcast_ref::<Car>().unwrap().engine.cylinders, 6);

    // instantiate never memoizes
    let other = injector.instantiate(car_type()).await.unwrap();
    assert!(!car.ptr_eq(&other));
}

#[tokio::test]
async fn instantiating_a_function_always_yields_an_object() {
    let injector = Injector::new(Vec::new()).unwrap();

    let primitive = injector
        .instantiate(Callable::sync(|_| Ok(Service::new(5_i32))))
        .await
        .unwrap();
    assert!(primitive.is_object());
    assert_ne!(primitive.render(), "5");

    let null = injector
        .instantiate(Callable::sync(|_| Ok(Service::null())))
        .await
        .unwrap();
    assert!(null.is_object());

    let engine = Service::new(Engine { cylinders: 2 });
    let returned = engine.clone();
    let object = injector
        .instantiate(Callable::sync(move |_| Ok(returned.clone())))
        .await
        .unwrap();
    assert!(object.ptr_eq(&engine));

    // a plain call keeps the primitive
    let invoked = injector
        .invoke(Callable::sync(|_| Ok(Service::new(5_i32))))
        .await
        .unwrap();
    assert_eq!(invoked.render(), "5");
}

#[tokio::test]
async fn provider_kind_decides_construction() {
    let module = Module::new()
        .type_("counter", Callable::sync(|_| Ok(Service::new(1_u32))))
        .factory("count", Callable::sync(|_| Ok(Service::new(1_u32))))
        .factory("car", car_type())
        .factory("engine", engine_factory(Arc::new(AtomicUsize::new(0))))
        .shared();
    let injector = Injector::new(vec![module]).unwrap();

    let counter = injector.get("counter").await.unwrap();
    assert!(counter.is_object());
    assert!(injector.get("counter.value").await.unwrap().is_null());
    assert_eq!(injector.get("count").await.unwrap().render(), "1");

    let err = injector.get("car").await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "Failed to create \"car\": constructor cannot be invoked without construction (Resolving: car)"
    );
}

#[tokio::test]
async fn constructor_return_value_overrides_objects_only() {
    let replacement = Service::new(Engine { cylinders: 12 });
    let returned = replacement.clone();
    let module = Module::new()
        .type_(
            "object",
            Callable::constructor(move |_| {
                Ok(Constructed::returning(
                    Service::new(Engine { cylinders: 4 }),
                    returned.clone(),
                ))
            }),
        )
        .type_(
            "primitive",
            Callable::constructor(|_| {
                Ok(Constructed::returning(
                    Service::new(Engine { cylinders: 4 }),
                    Service::new("ignored"),
                ))
            }),
        )
        .shared();
    let injector = Injector::new(vec![module]).unwrap();

    assert!(injector.get("object").await.unwrap().ptr_eq(&replacement));
    let fresh = injector.get_as::<Engine>("primitive").await.unwrap().unwrap();
    assert_eq!(fresh.cylinders, 4);
}

#[tokio::test]
async fn invoke_passes_context_and_prefers_locals() {
    let module = Module::new()
        .value("a", "registry-a")
        .value("b", "registry-b")
        .factory(
            "c",
            Callable::sync(|_| Err(anyhow!("provider for c must not run"))),
        )
        .shared();
    let injector = Injector::new(vec![module]).unwrap();

    let mut locals = Locals::new();
    locals.insert("a".to_string(), Service::new("local-a"));
    locals.insert("c".to_string(), Service::null());

    let callable = annotate(
        ["a", "b", "c"],
        Callable::sync(|args| {
            let ctx = args.context().downcast_ref::<&'static str>().copied();
            let rendered: Vec<String> = args.values().iter().map(Service::render).collect();
            Ok(Service::new(format!("{}:{}", ctx.unwrap_or("-"), rendered.join(","))))
        }),
    );

    let out = injector
        .invoke_with(callable, Service::new("ctx"), locals)
        .await
        .unwrap();
    assert_eq!(out.render(), "ctx:local-a,registry-b,null");
}

#[tokio::test]
async fn invoking_a_non_function_fails() {
    let injector = Injector::new(Vec::new()).unwrap();

    let err = injector.invoke(Service::new(123_i32)).await.unwrap_err();
    assert!(matches!(err, InjectorError::Invocation { .. }));
    assert_eq!(err.to_string(), "Cannot invoke \"123\". Expected a function!");

    let err = injector
        .invoke(Invocable::array(["a"], Service::new("nope")))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Cannot invoke \"a,nope\". Expected a function!");
}

#[tokio::test]
async fn non_function_factory_reports_its_path() {
    let module = Module::new()
        .factory("broken", Service::new(7_u8))
        .shared();
    let injector = Injector::new(vec![module]).unwrap();

    let err = injector.get("broken").await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "Cannot invoke \"7\". Expected a function! (Resolving: broken)"
    );
}

#[tokio::test]
async fn later_modules_override_earlier_ones() {
    let base = Module::named("base").value("bar", "real").shared();
    let mock = Module::named("mock").value("bar", "mocked").shared();

    let injector = Injector::new(vec![base, mock]).unwrap();
    assert_eq!(injector.get("bar").await.unwrap().render(), "mocked");
}

#[tokio::test]
async fn repeated_module_is_loaded_at_first_position() {
    let a = Module::named("a").value("x", "from-a").shared();
    let b = Module::named("b").value("x", "from-b").shared();

    let injector = Injector::new(vec![a.clone(), b, a]).unwrap();
    assert_eq!(injector.load_order(), vec!["a", "b"]);
    assert_eq!(injector.get("x").await.unwrap().render(), "from-b");
}

#[tokio::test]
async fn depends_on_loads_dependencies_first() {
    let core = Module::named("core").value("x", "core").shared();
    let app = Module::named("app")
        .depends_on(core.clone())
        .value("x", "app")
        .shared();

    let injector = Injector::new(vec![app]).unwrap();
    assert_eq!(injector.load_order(), vec!["core", "app"]);
    assert_eq!(injector.get("x").await.unwrap().render(), "app");
}

#[tokio::test]
async fn concurrent_requests_share_one_computation() {
    let counter = Arc::new(AtomicUsize::new(0));
    let calls = counter.clone();
    let module = Module::new()
        .factory(
            "slow",
            Callable::function(move |_| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::task::yield_now().await;
                    Ok(Service::new(Engine { cylinders: 2 }))
                }
            }),
        )
        .shared();
    let injector = Injector::new(vec![module]).unwrap();

    let results =
        futures::future::try_join_all((0..10).map(|_| injector.get("slow"))).await.unwrap();
    assert!(results.iter().all(|s| s.ptr_eq(&results[0])));
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn concurrent_requests_from_spawned_tasks_share_one_computation() {
    let counter = Arc::new(AtomicUsize::new(0));
    let module = Module::new()
        .factory("engine", engine_factory(counter.clone()))
        .shared();
    let injector = Injector::new(vec![module]).unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let injector = injector.clone();
            tokio::spawn(async move { injector.get("engine").await })
        })
        .collect();

    let mut services = Vec::new();
    for handle in handles {
        services.push(handle.await.unwrap().unwrap());
    }
    assert!(services.iter().all(|s| s.ptr_eq(&services[0])));
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

fn flaky(counter: Arc<AtomicUsize>) -> Callable {
    Callable::sync(move |_| {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            Err(anyhow!("not yet"))
        } else {
            Ok(Service::new("ready"))
        }
    })
}

#[tokio::test]
async fn failed_provider_is_retried_by_default() {
    let counter = Arc::new(AtomicUsize::new(0));
    let module = Module::new().factory("flaky", flaky(counter.clone())).shared();
    let injector = Injector::new(vec![module]).unwrap();

    let err = injector.get("flaky").await.unwrap_err();
    assert!(matches!(err, InjectorError::Provider { .. }));
    assert_eq!(
        err.to_string(),
        "Failed to create \"flaky\": not yet (Resolving: flaky)"
    );

    assert_eq!(injector.get("flaky").await.unwrap().render(), "ready");
    assert_eq!(counter.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn poison_policy_remembers_failures() {
    let counter = Arc::new(AtomicUsize::new(0));
    let module = Module::new().factory("flaky", flaky(counter.clone())).shared();
    let injector = Injector::builder()
        .module(module)
        .config(InjectorConfig {
            failure_policy: FailurePolicy::Poison,
        })
        .build()
        .unwrap();

    let first = injector.get("flaky").await.unwrap_err();
    let second = injector.get("flaky").await.unwrap_err();
    assert_eq!(first.to_string(), second.to_string());
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn custom_extractor_is_used_for_unannotated_callables() {
    struct Everything;
    impl async_injector::AnnotationExtractor for Everything {
        fn extract(&self, _callable: &Callable) -> Vec<String> {
            vec!["a".to_string()]
        }
    }

    let module = Module::new()
        .value("a", "A")
        .factory("b", Callable::sync(|args| args.service(0)))
        .shared();
    let injector = Injector::builder()
        .module(module)
        .extractor(Everything)
        .build()
        .unwrap();

    assert_eq!(injector.get("b").await.unwrap().render(), "A");
}

#[tokio::test]
async fn map_services_expose_properties() {
    let mut settings = HashMap::new();
    settings.insert("port".to_string(), Service::new(8080_u16));
    let module = Module::new()
        .value("settings", Service::with_properties(settings))
        .shared();
    let injector = Injector::new(vec![module]).unwrap();

    let port = injector.get_as::<u16>("settings.port").await.unwrap().unwrap();
    assert_eq!(*port, 8080);
}

#[test]
fn restricted_modules_are_rejected() {
    let module = Module::new().value("a", "a").exports(["a"]).shared();
    let err = Injector::new(vec![module]).unwrap_err();
    assert_eq!(err.to_string(), "private modules are not supported");
}

#[test]
fn child_injectors_are_refused() {
    let injector = Injector::new(Vec::new()).unwrap();
    let err = injector.create_child(Vec::new()).unwrap_err();
    assert!(matches!(err, InjectorError::Configuration(_)));
}
