use std::{
    any::TypeId,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, sleep},
    time::{Duration, Instant},
};

use futures::{executor::block_on, FutureExt};
use rstest::rstest;
use strata_di::{
    Args, BeanMethod, Component, Configuration, ConfigurationManifest, Constructor,
    ContainerBuilder, ContainerSettings, InitError, InjectError, Lazy, LoadState, Manifest, Phase,
    RegistrationError, RequireError,
};

#[derive(Default)]
struct A;
impl Component for A {
    fn manifest() -> Manifest<Self> {
        Manifest::with_default()
    }
}

struct B {
    field_a: Option<Arc<A>>,
}
impl Component for B {
    fn manifest() -> Manifest<Self> {
        Manifest::new()
            .constructor(Constructor::new(|_| Ok(B { field_a: None })))
            .field("field_a", |b: &mut B, a: Arc<A>| b.field_a = Some(a))
    }
}

struct C {
    b: Arc<B>,
}
impl Component for C {
    fn manifest() -> Manifest<Self> {
        Manifest::new().constructor(
            Constructor::new(|args| Ok(C { b: args.take()? }))
                .param::<Arc<B>>("b")
                .param::<Arc<A>>("a"),
        )
    }
}

#[test]
fn services_load_in_dependency_layers() {
    let container = block_on(
        ContainerBuilder::new()
            .component::<C>()
            .component::<B>()
            .component::<A>()
            .build_loaded(),
    )
    .unwrap();

    let plan = container.plan().unwrap();
    assert_eq!(plan.layer_of(TypeId::of::<A>()), Some(0));
    assert_eq!(plan.layer_of(TypeId::of::<B>()), Some(1));
    assert_eq!(plan.layer_of(TypeId::of::<C>()), Some(2));

    let a = container.require::<A>().unwrap();
    let b = container.require::<B>().unwrap();
    let c = container.require::<C>().unwrap();
    assert!(Arc::ptr_eq(b.field_a.as_ref().unwrap(), &a));
    assert!(Arc::ptr_eq(&c.b, &b));
}

struct P {
    _q: Arc<Q>,
}
impl Component for P {
    fn manifest() -> Manifest<Self> {
        Manifest::new()
            .constructor(Constructor::new(|args| Ok(P { _q: args.take()? })).param::<Arc<Q>>("q"))
    }
}

struct Q {
    _p: Arc<P>,
}
impl Component for Q {
    fn manifest() -> Manifest<Self> {
        Manifest::new()
            .constructor(Constructor::new(|args| Ok(Q { _p: args.take()? })).param::<Arc<P>>("p"))
    }
}

#[test]
fn circular_dependencies_fail_the_load() {
    let container = ContainerBuilder::new()
        .component::<P>()
        .component::<Q>()
        .build();

    let error = block_on(container.load()).unwrap_err();
    assert!(matches!(error, InitError::DependencyGraphError(_)));

    let message = error.to_string();
    assert!(message.contains(std::any::type_name::<P>()), "{message}");
    assert!(message.contains(std::any::type_name::<Q>()), "{message}");
    assert_eq!(container.state(), LoadState::Failed);
    assert!(container.get_dependency::<P>().is_none());
}

struct Parent {
    child: Arc<Child>,
}
impl Component for Parent {
    fn manifest() -> Manifest<Self> {
        Manifest::new().constructor(
            Constructor::new(|args| Ok(Parent { child: args.take()? }))
                .param::<Arc<Child>>("child"),
        )
    }
}

struct Child {
    parent: Lazy<Parent>,
}
impl Component for Child {
    fn manifest() -> Manifest<Self> {
        Manifest::new().constructor(
            Constructor::new(|args| Ok(Child { parent: args.take()? }))
                .param::<Lazy<Parent>>("parent"),
        )
    }
}

#[test]
fn lazy_dependencies_break_cycles() {
    let container = block_on(
        ContainerBuilder::new()
            .component::<Parent>()
            .component::<Child>()
            .build_loaded(),
    )
    .unwrap();

    let parent = container.require::<Parent>().unwrap();
    assert!(!parent.child.parent.is_resolved());
    assert!(Arc::ptr_eq(parent.child.parent.get(), &parent));
    assert!(parent.child.parent.is_resolved());
}

struct Alpha;
struct Beta(&'static str);
struct Gamma(&'static str);

#[derive(Default)]
struct Beans;
impl Configuration for Beans {
    fn manifest() -> ConfigurationManifest<Self> {
        ConfigurationManifest::with_default()
            .bean(BeanMethod::new("m1", |_: &Beans, _: &mut Args| Ok(Alpha)))
            .bean(
                BeanMethod::new("m2", |_: &Beans, args: &mut Args| {
                    let _a = args.take::<Arc<A>>()?;
                    Ok(Beta("beta"))
                })
                .param::<Arc<A>>("a"),
            )
            .bean(
                BeanMethod::new("m3", |_: &Beans, args: &mut Args| {
                    Ok(Gamma(args.take::<Arc<Beta>>()?.0))
                })
                .param::<Arc<Beta>>("beta"),
            )
    }
}

/// Needs a bean of the first phase
struct UsesAlpha {
    _alpha: Arc<Alpha>,
}
impl Component for UsesAlpha {
    fn manifest() -> Manifest<Self> {
        Manifest::new().constructor(
            Constructor::new(|args| Ok(UsesAlpha { _alpha: args.take()? }))
                .param::<Arc<Alpha>>("alpha"),
        )
    }
}

#[test]
fn provider_methods_are_split_around_services() {
    let container = block_on(
        ContainerBuilder::new()
            .configuration::<Beans>()
            .component::<A>()
            .component::<UsesAlpha>()
            .build_loaded(),
    )
    .unwrap();

    let plan = container.plan().unwrap();
    let phase = |name: &str| {
        let bean = plan
            .beans
            .beans()
            .find(|bean| bean.method.name == name)
            .unwrap();
        plan.phase_of(&bean.id)
    };
    assert_eq!(phase("m1"), Some(Phase::Before));
    assert_eq!(phase("m2"), Some(Phase::After));
    assert_eq!(phase("m3"), Some(Phase::After));

    assert!(container.get_dependency::<UsesAlpha>().is_some());
    assert_eq!(container.require::<Gamma>().unwrap().0, "beta");
    assert!(container.get_dependency::<Beans>().is_some());
}

static FAIL_ONCE: AtomicBool = AtomicBool::new(true);

#[derive(Debug)]
struct Flaky;
impl Component for Flaky {
    fn manifest() -> Manifest<Self> {
        Manifest::new().constructor(Constructor::new(|_| {
            match FAIL_ONCE.swap(false, Ordering::SeqCst) {
                true => Err("not yet".into()),
                false => Ok(Flaky),
            }
        }))
    }
}

#[test]
fn failed_loads_can_be_retried() {
    let container = ContainerBuilder::new()
        .add_instance(7_u32)
        .component::<Flaky>()
        .build();

    let error = block_on(container.load()).unwrap_err();
    assert!(matches!(error, InitError::ComponentFailed { .. }), "{error}");
    assert_eq!(container.state(), LoadState::Failed);
    assert!(container.get_dependency::<u32>().is_none());

    block_on(container.load()).unwrap();
    assert!(container.is_loaded());
    assert_eq!(*container.require::<u32>().unwrap(), 7);
    assert!(container.get_dependency::<Flaky>().is_some());
}

#[test]
fn loading_twice_keeps_instances() {
    let container = block_on(ContainerBuilder::new().component::<A>().build_loaded()).unwrap();
    let first = container.require::<A>().unwrap();

    block_on(container.load()).unwrap();
    assert!(Arc::ptr_eq(&first, &container.require::<A>().unwrap()));
}

#[test]
fn unload_drops_everything() {
    let container = block_on(ContainerBuilder::new().component::<A>().build_loaded()).unwrap();
    container.unload();

    assert_eq!(container.state(), LoadState::NotLoaded);
    assert!(container.plan().is_none());
    assert!(container.get_dependency::<A>().is_none());

    block_on(container.load()).unwrap();
    assert!(container.get_dependency::<A>().is_some());
}

struct Slow;
impl Component for Slow {
    fn manifest() -> Manifest<Self> {
        Manifest::new().constructor(Constructor::new(|_| {
            sleep(Duration::from_millis(500));
            Ok(Slow)
        }))
    }
}

#[test]
fn loads_exceeding_the_timeout_fail() {
    let container = ContainerBuilder::new()
        .settings(ContainerSettings::default().with_load_timeout(Duration::from_millis(50)))
        .component::<Slow>()
        .build();

    let error = block_on(container.load()).unwrap_err();
    assert!(matches!(error, InitError::Timeout), "{error}");
    assert_eq!(container.state(), LoadState::Failed);
}

/// Takes a while, after `A` was registered
struct Sluggish;
impl Component for Sluggish {
    fn manifest() -> Manifest<Self> {
        Manifest::new().constructor(
            Constructor::new(|args| {
                let _a = args.take::<Arc<A>>()?;
                sleep(Duration::from_millis(300));
                Ok(Sluggish)
            })
            .param::<Arc<A>>("a"),
        )
    }
}

#[test]
fn dropping_a_running_load_fails_it() {
    let container = ContainerBuilder::new()
        .component::<A>()
        .component::<Sluggish>()
        .build();
    let waiting = container.loaded();

    assert!(container.load().now_or_never().is_none());
    assert_eq!(container.state(), LoadState::Failed);
    assert!(matches!(block_on(waiting), Err(InitError::Aborted)));
    assert!(container.get_dependency::<A>().is_none());

    block_on(container.load()).unwrap();
    assert!(container.get_dependency::<Sluggish>().is_some());
}

#[test]
fn running_loads_refuse_outside_access() {
    let container = ContainerBuilder::new()
        .component::<A>()
        .component::<Sluggish>()
        .build();

    let loading = {
        let container = container.clone();
        thread::spawn(move || block_on(container.load()))
    };

    let started = Instant::now();
    while container.state() != LoadState::LoadingServiceLayers {
        assert!(started.elapsed() < Duration::from_secs(5), "load never started");
        sleep(Duration::from_millis(1));
    }

    assert!(matches!(
        container.require::<A>(),
        Err(InjectError::RequireError(RequireError::NotLoaded))
    ));
    assert_eq!(
        container.register_dependency(1_u16),
        Err(RegistrationError::NotLoaded)
    );
    assert_eq!(
        container.unregister_dependency::<A>(),
        Err(RegistrationError::NotLoaded)
    );

    loading.join().unwrap().unwrap();
    assert!(container.get_dependency::<A>().is_some());
    assert!(container.get_dependency::<u16>().is_none());
}

#[test]
fn waiting_for_a_load_sees_its_result() {
    let container = ContainerBuilder::new().component::<A>().build();
    let loaded = container.loaded();

    block_on(container.load()).unwrap();
    block_on(loaded).unwrap();
    block_on(container.loaded()).unwrap();
}

struct ProdOnly;
impl Component for ProdOnly {
    fn manifest() -> Manifest<Self> {
        Manifest::new()
            .profile("prod")
            .constructor(Constructor::new(|_| Ok(ProdOnly)))
    }
}

#[rstest]
#[case::inactive(None, false)]
#[case::other_profile(Some("dev"), false)]
#[case::active(Some("prod"), true)]
fn profiles_restrict_loading(#[case] profile: Option<&str>, #[case] loaded: bool) {
    let settings = match profile {
        Some(profile) => ContainerSettings::default().with_profile(profile),
        None => ContainerSettings::default(),
    };
    let container = block_on(
        ContainerBuilder::new()
            .settings(settings)
            .component::<ProdOnly>()
            .build_loaded(),
    )
    .unwrap();

    assert_eq!(container.get_dependency::<ProdOnly>().is_some(), loaded);
}

#[rstest]
#[case::threads(usize::MAX)]
#[case::fixed_pool(1)]
fn both_pools_build_the_same_graph(#[case] threshold: usize) {
    let container = block_on(
        ContainerBuilder::new()
            .settings(
                ContainerSettings::default()
                    .with_fixed_pool_size(2)
                    .with_fixed_pool_threshold(threshold)
                    .with_graph_parallel_threshold(0),
            )
            .component::<A>()
            .component::<B>()
            .component::<C>()
            .build_loaded(),
    )
    .unwrap();

    let c = container.require::<C>().unwrap();
    assert!(Arc::ptr_eq(&c.b, &container.require::<B>().unwrap()));
}
