use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        mpsc, Arc,
    },
    thread,
    time::Duration,
};

use futures::executor::block_on;
use strata_di::{
    Binding, Component, Constructor, Container, ContainerBuilder, ExtraArgs, InjectError, Manifest,
    RegistrationError, RequireError, Scope, TypeInfo,
};

fn loaded() -> Container {
    block_on(ContainerBuilder::new().build_loaded()).unwrap()
}

trait Shape: Send + Sync {
    fn corners(&self) -> u32;
}

struct Square;
impl Shape for Square {
    fn corners(&self) -> u32 {
        4
    }
}

#[test]
fn unloaded_containers_refuse_access() {
    let container = ContainerBuilder::new().build();

    assert!(matches!(
        container.require::<String>(),
        Err(InjectError::RequireError(RequireError::NotLoaded))
    ));
    assert_eq!(
        container.register_dependency("value".to_string()),
        Err(RegistrationError::NotLoaded)
    );
    assert_eq!(
        container.unregister_dependency::<String>(),
        Err(RegistrationError::NotLoaded)
    );
    assert!(container.get_dependency::<String>().is_none());
}

#[test]
fn one_registration_per_type_and_qualifier() {
    let container = loaded();
    container.register_dependency("first".to_string()).unwrap();

    assert_eq!(
        container.register_dependency("second".to_string()),
        Err(RegistrationError::Duplicate {
            owner: TypeInfo::of::<String>(),
            qualifier: Default::default(),
        })
    );
    container
        .register_dependency_qualified("second".to_string(), "alt")
        .unwrap();

    assert_eq!(*container.require::<String>().unwrap(), "first");
    assert_eq!(
        *container.require_qualified::<String>("alt").unwrap(),
        "second"
    );
    assert_eq!(container.get_dependency_list::<String>().unwrap().len(), 2);
}

#[test]
fn duplicate_preregistrations_fail_the_load() {
    let result = block_on(
        ContainerBuilder::new()
            .add_instance(1_u8)
            .add_instance(2_u8)
            .build_loaded(),
    );
    assert!(result.is_err());

    let container = block_on(
        ContainerBuilder::new()
            .add_instance(1_u8)
            .add_instance_qualified(2_u8, "other")
            .build_loaded(),
    )
    .unwrap();
    assert_eq!(*container.require_qualified::<u8>("other").unwrap(), 2);
}

#[test]
fn abstract_types_can_not_own_registrations() {
    let container = loaded();
    let shape: Arc<dyn Shape> = Arc::new(Square);

    assert_eq!(
        container.register_arc(shape, "default"),
        Err(RegistrationError::AbstractType(TypeInfo::of::<dyn Shape>()))
    );
}

#[test]
fn unregistering_removes_every_view() {
    let container = loaded();
    container
        .register_dependency_bound(
            Square,
            "default",
            &[Binding::new(|square: Arc<Square>| square as Arc<dyn Shape>)],
        )
        .unwrap();
    assert_eq!(container.require::<dyn Shape>().unwrap().corners(), 4);

    assert_eq!(container.unregister_dependency::<Square>(), Ok(1));
    assert!(container.get_dependency::<dyn Shape>().is_none());
    assert!(container.get_dependency::<Square>().is_none());
    assert_eq!(container.unregister_dependency::<Square>(), Ok(0));
}

#[test]
fn providers_follow_their_scope() {
    let calls = Arc::new(AtomicUsize::new(0));
    let container = loaded();

    let counter = calls.clone();
    container
        .register_provider("single", Scope::Singleton, move |_| {
            Ok(counter.fetch_add(1, Ordering::SeqCst))
        })
        .unwrap();
    let counter = calls.clone();
    container
        .register_provider("fresh", Scope::Prototype, move |_| {
            Ok(counter.fetch_add(1, Ordering::SeqCst) as u64)
        })
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    let first = container.require_qualified::<usize>("single").unwrap();
    let second = container.require_qualified::<usize>("single").unwrap();
    assert!(Arc::ptr_eq(&first, &second));

    let first = container.require_qualified::<u64>("fresh").unwrap();
    let second = container.require_qualified::<u64>("fresh").unwrap();
    assert_ne!(first, second);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[test]
fn builder_providers_resolve_their_dependencies() {
    let container = block_on(
        ContainerBuilder::new()
            .add_instance(21_u32)
            .add_provider("", Scope::Singleton, |handle| {
                let base = handle.resolve::<Arc<u32>>()?;
                Ok(u64::from(*base) * 2)
            })
            .build_loaded(),
    )
    .unwrap();

    assert_eq!(*container.require::<u64>().unwrap(), 42);
}

static BUILT: AtomicUsize = AtomicUsize::new(0);

struct OnDemand;
impl Component for OnDemand {
    fn manifest() -> Manifest<Self> {
        Manifest::new().constructor(Constructor::new(|_| {
            BUILT.fetch_add(1, Ordering::SeqCst);
            thread::sleep(std::time::Duration::from_millis(20));
            Ok(OnDemand)
        }))
    }
}

#[test]
fn concurrent_get_or_register_builds_once() {
    let container = loaded();

    let built = thread::scope(|scope| {
        let workers = (0..8)
            .map(|_| scope.spawn(|| container.get_or_register::<OnDemand>().unwrap()))
            .collect::<Vec<_>>();
        workers
            .into_iter()
            .map(|worker| worker.join().unwrap())
            .collect::<Vec<_>>()
    });

    assert_eq!(BUILT.load(Ordering::SeqCst), 1);
    assert!(built.iter().all(|instance| Arc::ptr_eq(instance, &built[0])));
    assert!(container.get_dependency::<OnDemand>().is_some());
}

struct Greeting {
    prefix: Arc<String>,
    name: Option<Arc<u32>>,
}
impl Component for Greeting {
    fn manifest() -> Manifest<Self> {
        Manifest::new()
            .prototype()
            .constructor(
                Constructor::new(|args| {
                    Ok(Greeting {
                        prefix: args.take()?,
                        name: None,
                    })
                })
                .param::<Arc<String>>("prefix"),
            )
            .field("name", |greeting: &mut Greeting, name: Option<Arc<u32>>| {
                greeting.name = name
            })
    }
}

#[test]
fn new_instances_prefer_extra_arguments() {
    let container = loaded();
    container.register_dependency("registered".to_string()).unwrap();

    let plain = container.new_instance::<Greeting>().unwrap();
    assert_eq!(*plain.prefix, "registered");

    let extra = container
        .new_instance_with::<Greeting>(ExtraArgs::new().with("extra".to_string()))
        .unwrap();
    assert_eq!(*extra.prefix, "extra");

    // Neither is registered
    assert!(container.get_dependency::<Greeting>().is_none());
}

#[test]
fn existing_values_get_their_fields_injected() {
    let container = loaded();
    container.register_dependency(5_u32).unwrap();

    let mut greeting = Greeting {
        prefix: Arc::new("manual".into()),
        name: None,
    };
    container.inject_dependencies(&mut greeting).unwrap();

    assert_eq!(greeting.name.as_deref(), Some(&5));
    assert_eq!(*greeting.prefix, "manual");
}

struct Left {
    _right: Arc<Right>,
}
struct Right {
    _left: Arc<Left>,
}

/// Singleton providers needing each other
fn entangled() -> Container {
    let container = loaded();
    container
        .register_provider("", Scope::Singleton, |handle| {
            thread::sleep(Duration::from_millis(50));
            Ok(Left {
                _right: handle.resolve()?,
            })
        })
        .unwrap();
    container
        .register_provider("", Scope::Singleton, |handle| {
            thread::sleep(Duration::from_millis(50));
            Ok(Right {
                _left: handle.resolve()?,
            })
        })
        .unwrap();
    container
}

/// Chain of the circular registration behind nested provider failures
fn circular_chain(error: &InjectError) -> Option<Vec<TypeInfo>> {
    match error {
        InjectError::Registration(RegistrationError::CircularRegistration { chain }) => {
            Some(chain.clone())
        }
        InjectError::ProviderFailed { error, .. } => {
            error.downcast_ref::<InjectError>().and_then(circular_chain)
        }
        _ => None,
    }
}

#[test]
fn re_entering_a_build_is_a_circular_registration() {
    let container = entangled();

    let error = container.require::<Left>().err().unwrap();
    assert_eq!(
        circular_chain(&error),
        Some(vec![
            TypeInfo::of::<Left>(),
            TypeInfo::of::<Right>(),
            TypeInfo::of::<Left>(),
        ]),
        "{error}"
    );
    assert!(error.to_string().contains("Circular registration"), "{error}");
}

#[test]
fn crossing_builds_on_two_threads_fail_instead_of_blocking() {
    let container = entangled();
    let (tx, rx) = mpsc::channel();

    let left = {
        let (container, tx) = (container.clone(), tx.clone());
        thread::spawn(move || {
            let error = container.require::<Left>().err();
            let _ = tx.send(error.as_ref().and_then(circular_chain));
        })
    };
    let right = {
        let container = container.clone();
        thread::spawn(move || {
            let error = container.require::<Right>().err();
            let _ = tx.send(error.as_ref().and_then(circular_chain));
        })
    };

    for _ in 0..2 {
        let chain = rx
            .recv_timeout(Duration::from_secs(5))
            .expect("resolution blocked");
        assert!(chain.is_some_and(|chain| chain.len() >= 2));
    }
    left.join().unwrap();
    right.join().unwrap();

    // Nothing was cached, a later resolution fails the same way
    assert!(container.get_dependency::<Left>().is_none());
}
