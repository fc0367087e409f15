//! Dependency resolution.
//!
//! The resolver walks a bean's declared dependencies depth-first, keeping the
//! chain of descriptors currently being built on this thread. Singletons are
//! delegated to the [`ScopeManager`](super::scope::ScopeManager); transients are
//! built inline. When a singleton is reached again while it is still under
//! construction, its lazy proxy is injected in place of the real instance.
//!
//! The chain also lives in a thread-local stack, so a lookup started from
//! inside a factory (forcing a deferred dependency, say) continues the
//! caller's chain instead of starting a fresh one.

use super::container::ContainerCore;
use super::lazy::{Lazy, LazyHandle};
use super::registry::Registry;
use super::scope::Obtained;
use super::{Cardinality, Contract, Dependency, Instance, ScopeKind, downcast};
use crate::error::{BeanstalkError, Result};
use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;

thread_local! {
    /// Beans under construction on this thread, tagged with their container.
    static ACTIVE: RefCell<Vec<(usize, usize)>> = const { RefCell::new(Vec::new()) };
}

/// Pops this thread's innermost active bean when dropped, unwinding included.
struct ActiveFrame;

impl Drop for ActiveFrame {
    fn drop(&mut self) {
        ACTIVE.with(|active| {
            active.borrow_mut().pop();
        });
    }
}

/// The outcome of a lookup, shaped by the requested [`Cardinality`].
#[derive(Clone)]
pub enum Resolved {
    Single(Instance),
    Optional(Option<Instance>),
    Collection(Vec<Instance>),
}

impl Resolved {
    /// The single instance, if the lookup produced exactly one.
    pub fn into_single(self) -> Option<Instance> {
        match self {
            Resolved::Single(instance) => Some(instance),
            Resolved::Optional(instance) => instance,
            Resolved::Collection(_) => None,
        }
    }

    pub fn into_vec(self) -> Vec<Instance> {
        match self {
            Resolved::Single(instance) => vec![instance],
            Resolved::Optional(instance) => instance.into_iter().collect(),
            Resolved::Collection(instances) => instances,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Resolved::Single(_) => 1,
            Resolved::Optional(instance) => usize::from(instance.is_some()),
            Resolved::Collection(instances) => instances.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for Resolved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolved::Single(_) => f.write_str("Single"),
            Resolved::Optional(instance) => write!(f, "Optional(present: {})", instance.is_some()),
            Resolved::Collection(instances) => write!(f, "Collection(len: {})", instances.len()),
        }
    }
}

enum Injected {
    Resolved(Resolved),
    Deferred(LazyHandle),
}

/// The resolved dependencies handed to a bean factory.
///
/// Accessors only return what the descriptor declared; asking for anything else
/// fails with [`BeanstalkError::UndeclaredDependency`].
pub struct Dependencies {
    bean: String,
    entries: Vec<(Dependency, Injected)>,
}

impl Dependencies {
    pub(crate) fn empty(bean: impl Into<String>) -> Self {
        Self {
            bean: bean.into(),
            entries: Vec::new(),
        }
    }

    /// The single bean declared for contract `T`.
    pub fn get<T: ?Sized + Send + Sync + 'static>(&self) -> Result<Arc<T>> {
        self.single(&Contract::of::<T>())
    }

    /// The single bean declared for contract `T` under `qualifier`.
    pub fn get_named<T: ?Sized + Send + Sync + 'static>(&self, qualifier: &str) -> Result<Arc<T>> {
        self.single(&Contract::of::<T>().named(qualifier.to_string()))
    }

    pub fn optional<T: ?Sized + Send + Sync + 'static>(&self) -> Result<Option<Arc<T>>> {
        let contract = Contract::of::<T>();
        match self.find(&contract, Cardinality::Optional)? {
            Injected::Resolved(Resolved::Optional(Some(instance))) => typed(instance).map(Some),
            _ => Ok(None),
        }
    }

    pub fn all<T: ?Sized + Send + Sync + 'static>(&self) -> Result<Vec<Arc<T>>> {
        let contract = Contract::of::<T>();
        match self.find(&contract, Cardinality::Collection)? {
            Injected::Resolved(Resolved::Collection(instances)) => instances.iter().map(typed::<T>).collect(),
            _ => Ok(Vec::new()),
        }
    }

    /// A [`Lazy`] handle for a deferred dependency on `T`.
    pub fn lazy<T: ?Sized + Send + Sync + 'static>(&self) -> Result<Lazy<T>> {
        let contract = Contract::of::<T>();
        let found = self.entries.iter().find_map(|(dependency, injected)| match injected {
            Injected::Deferred(handle) if dependency.contract() == &contract => Some(handle),
            _ => None,
        });
        match found {
            Some(handle) => Ok(Lazy::new(handle.clone())),
            None => Err(self.undeclared(&contract)),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn single<T: ?Sized + Send + Sync + 'static>(&self, contract: &Contract) -> Result<Arc<T>> {
        match self.find(contract, Cardinality::Single)? {
            Injected::Resolved(Resolved::Single(instance)) => typed(instance),
            _ => Err(self.undeclared(contract)),
        }
    }

    fn find(&self, contract: &Contract, cardinality: Cardinality) -> Result<&Injected> {
        self.entries
            .iter()
            .find(|(dependency, injected)| {
                !matches!(injected, Injected::Deferred(_))
                    && dependency.cardinality() == cardinality
                    && dependency.contract() == contract
            })
            .map(|(_, injected)| injected)
            .ok_or_else(|| self.undeclared(contract))
    }

    fn undeclared(&self, contract: &Contract) -> BeanstalkError {
        BeanstalkError::UndeclaredDependency {
            bean: self.bean.clone(),
            contract: contract.to_string(),
        }
    }
}

impl fmt::Debug for Dependencies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dependencies")
            .field("bean", &self.bean)
            .field(
                "declared",
                &self.entries.iter().map(|(dependency, _)| dependency).collect::<Vec<_>>(),
            )
            .finish()
    }
}

pub(crate) fn typed<T: ?Sized + Send + Sync + 'static>(instance: &Instance) -> Result<Arc<T>> {
    downcast::<T>(instance).ok_or_else(|| BeanstalkError::DowncastFailed {
        type_name: std::any::type_name::<T>().to_string(),
    })
}

/// Resolves lookups against one container's registry and scopes.
pub(crate) struct Resolver<'c> {
    core: &'c Arc<ContainerCore>,
    registry: Arc<Registry>,
    key: usize,
}

impl<'c> Resolver<'c> {
    pub(crate) fn new(core: &'c Arc<ContainerCore>) -> Result<Self> {
        let registry = core.registry()?;
        let key = Arc::as_ptr(core) as usize;
        Ok(Self {
            core,
            registry,
            key,
        })
    }

    pub(crate) fn lookup(&self, contract: &Contract, cardinality: Cardinality) -> Result<Resolved> {
        self.resolve(contract, cardinality, &mut self.active_chain(), None)
    }

    pub(crate) fn resolve_single(&self, contract: &Contract) -> Result<Instance> {
        match self.lookup(contract, Cardinality::Single)? {
            Resolved::Single(instance) => Ok(instance),
            _ => Err(BeanstalkError::UnsatisfiedDependency {
                contract: contract.to_string(),
                required_by: None,
            }),
        }
    }

    /// Builds (or returns) the bean at `index` without offering a proxy.
    ///
    /// Used by lazy proxies and eager boot. Hitting a singleton still under
    /// construction on this thread means a proxy was used too early.
    pub(crate) fn force(&self, index: usize) -> Result<Instance> {
        let descriptor = self.registry.descriptor(index);
        let mut chain = self.active_chain();
        match descriptor.scope() {
            ScopeKind::Transient => self.instance(index, &mut chain),
            ScopeKind::LazySingleton => match self.singleton(index, &mut chain)? {
                Obtained::Ready(instance) => Ok(instance),
                Obtained::InProgress => Err(BeanstalkError::CyclicDependency {
                    cycle: format!(
                        "'{}' was accessed through its lazy proxy before its construction completed",
                        descriptor.name()
                    ),
                }),
            },
        }
    }

    fn resolve(
        &self,
        contract: &Contract,
        cardinality: Cardinality,
        chain: &mut Vec<usize>,
        required_by: Option<&str>,
    ) -> Result<Resolved> {
        let matches = self.registry.matches(contract);
        tracing::debug!(
            "Resolving {} ({}): {} candidate(s)",
            contract,
            cardinality,
            matches.len()
        );

        match cardinality {
            Cardinality::Single => match matches.as_slice() {
                [] => Err(BeanstalkError::UnsatisfiedDependency {
                    contract: contract.to_string(),
                    required_by: required_by.map(str::to_string),
                }),
                [index] => Ok(Resolved::Single(self.instance(*index, chain)?)),
                _ => Err(self.ambiguous(contract, &matches)),
            },
            Cardinality::Optional => match matches.as_slice() {
                [] => Ok(Resolved::Optional(None)),
                [index] => Ok(Resolved::Optional(Some(self.instance(*index, chain)?))),
                _ => Err(self.ambiguous(contract, &matches)),
            },
            Cardinality::Collection => matches
                .iter()
                .map(|&index| self.instance(index, chain))
                .collect::<Result<Vec<_>>>()
                .map(Resolved::Collection),
        }
    }

    fn ambiguous(&self, contract: &Contract, matches: &[usize]) -> BeanstalkError {
        BeanstalkError::AmbiguousDependency {
            contract: contract.to_string(),
            candidates: self.registry.names(matches),
        }
    }

    fn instance(&self, index: usize, chain: &mut Vec<usize>) -> Result<Instance> {
        let descriptor = self.registry.descriptor(index);
        match descriptor.scope() {
            ScopeKind::Transient => {
                if let Some(position) = chain.iter().rposition(|&seen| seen == index) {
                    // Revisiting a transient is only sound if a singleton since
                    // its last visit will hand out a proxy and stop the descent.
                    let through_singleton = chain[position + 1..].iter().any(|&between| {
                        self.registry.descriptor(between).scope() == ScopeKind::LazySingleton
                    });
                    if !through_singleton {
                        let mut cycle = chain[position..].to_vec();
                        cycle.push(index);
                        return Err(BeanstalkError::CyclicDependency {
                            cycle: self.registry.describe_chain(&cycle),
                        });
                    }
                }
                self.build(index, chain)
            }
            ScopeKind::LazySingleton => match self.singleton(index, chain)? {
                Obtained::Ready(instance) => Ok(instance),
                Obtained::InProgress => self.break_cycle(index, chain),
            },
        }
    }

    fn singleton(&self, index: usize, chain: &mut Vec<usize>) -> Result<Obtained> {
        self.core
            .scopes
            .get_or_create(index, || self.build(index, chain))
    }

    fn break_cycle(&self, index: usize, chain: &[usize]) -> Result<Instance> {
        let descriptor = self.registry.descriptor(index);
        let handle = LazyHandle::bean(Arc::downgrade(self.core), index);
        match descriptor.make_proxy(handle) {
            Some(proxy) => {
                tracing::debug!(
                    "Injecting lazy proxy for '{}' to break a construction cycle",
                    descriptor.name()
                );
                Ok(proxy)
            }
            None => {
                let mut cycle = match chain.iter().rposition(|&seen| seen == index) {
                    Some(position) => chain[position..].to_vec(),
                    None => chain.to_vec(),
                };
                cycle.push(index);
                Err(BeanstalkError::ProxyUnsupported {
                    bean: descriptor.name().to_string(),
                    cycle: self.registry.describe_chain(&cycle),
                })
            }
        }
    }

    fn build(&self, index: usize, chain: &mut Vec<usize>) -> Result<Instance> {
        chain.push(index);
        let frame = self.enter(index);
        let built = self.construct(index, chain);
        drop(frame);
        chain.pop();
        built
    }

    fn enter(&self, index: usize) -> ActiveFrame {
        ACTIVE.with(|active| active.borrow_mut().push((self.key, index)));
        ActiveFrame
    }

    /// This container's beans currently under construction on this thread.
    fn active_chain(&self) -> Vec<usize> {
        ACTIVE.with(|active| {
            active
                .borrow()
                .iter()
                .filter(|(key, _)| *key == self.key)
                .map(|&(_, index)| index)
                .collect()
        })
    }

    fn construct(&self, index: usize, chain: &mut Vec<usize>) -> Result<Instance> {
        let descriptor = self.registry.descriptor(index);
        tracing::debug!("Constructing {} bean '{}'", descriptor.scope(), descriptor.name());

        let dependencies = self.inject(index, chain)?;
        let instance = descriptor.instantiate(&dependencies).map_err(|source| {
            tracing::error!("Factory for '{}' failed: {}", descriptor.name(), source);
            BeanstalkError::FactoryFailed {
                bean: descriptor.name().to_string(),
                source,
            }
        })?;
        self.core.lifecycle.on_constructed(descriptor, &instance)?;
        Ok(instance)
    }

    fn inject(&self, index: usize, chain: &mut Vec<usize>) -> Result<Dependencies> {
        let descriptor = self.registry.descriptor(index);
        let mut entries = Vec::with_capacity(descriptor.dependencies().len());
        for dependency in descriptor.dependencies() {
            let injected = if dependency.is_deferred() {
                Injected::Deferred(LazyHandle::contract(
                    Arc::downgrade(self.core),
                    dependency.contract().clone(),
                ))
            } else {
                Injected::Resolved(self.resolve(
                    dependency.contract(),
                    dependency.cardinality(),
                    chain,
                    Some(descriptor.name()),
                )?)
            };
            entries.push((dependency.clone(), injected));
        }
        Ok(Dependencies {
            bean: descriptor.name().to_string(),
            entries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::di::{BeanDescriptor, Container};
    use std::sync::atomic::{AtomicUsize, Ordering};

    trait Engine: Send + Sync {
        fn power(&self) -> u32;
    }

    trait Wheel: Send + Sync {
        fn position(&self) -> &'static str;
    }

    struct V8;

    impl Engine for V8 {
        fn power(&self) -> u32 {
            450
        }
    }

    struct Rim(&'static str);

    impl Wheel for Rim {
        fn position(&self) -> &'static str {
            self.0
        }
    }

    struct Car {
        engine: Arc<dyn Engine>,
        wheels: Vec<Arc<dyn Wheel>>,
        spoiler: Option<Arc<String>>,
    }

    fn car_beans(engine_builds: Arc<AtomicUsize>) -> Vec<BeanDescriptor> {
        vec![
            BeanDescriptor::singleton::<dyn Engine, _>(move |_| {
                engine_builds.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(V8) as Arc<dyn Engine>)
            })
            .build(),
            BeanDescriptor::transient::<dyn Wheel, _>(|_| Ok(Arc::new(Rim("front")) as Arc<dyn Wheel>))
                .qualifier("front")
                .build(),
            BeanDescriptor::transient::<dyn Wheel, _>(|_| Ok(Arc::new(Rim("rear")) as Arc<dyn Wheel>))
                .qualifier("rear")
                .build(),
            BeanDescriptor::transient::<Car, _>(|deps| {
                Ok(Arc::new(Car {
                    engine: deps.get::<dyn Engine>()?,
                    wheels: deps.all::<dyn Wheel>()?,
                    spoiler: deps.optional::<String>()?,
                }))
            })
            .depends_on(Dependency::single::<dyn Engine>())
            .depends_on(Dependency::collection::<dyn Wheel>())
            .depends_on(Dependency::optional::<String>())
            .build(),
        ]
    }

    #[test]
    fn test_injects_each_cardinality() {
        let builds = Arc::new(AtomicUsize::new(0));
        let container = Container::boot(car_beans(Arc::clone(&builds))).unwrap();

        let car = container.get::<Car>().unwrap();
        assert_eq!(car.engine.power(), 450);
        let positions: Vec<_> = car.wheels.iter().map(|w| w.position()).collect();
        assert_eq!(positions, vec!["front", "rear"]);
        assert!(car.spoiler.is_none());

        let again = container.get::<Car>().unwrap();
        assert!(!Arc::ptr_eq(&car, &again));
        assert!(Arc::ptr_eq(&car.engine, &again.engine));
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_lookup_by_cardinality() {
        let container = Container::boot(car_beans(Arc::new(AtomicUsize::new(0)))).unwrap();

        let wheels = container
            .lookup(&Contract::of::<dyn Wheel>(), Cardinality::Collection)
            .unwrap();
        assert_eq!(wheels.len(), 2);

        let missing = container
            .lookup(&Contract::of::<String>(), Cardinality::Optional)
            .unwrap();
        assert!(missing.is_empty());
        assert!(missing.into_single().is_none());

        assert!(matches!(
            container.lookup(&Contract::of::<dyn Wheel>(), Cardinality::Single),
            Err(BeanstalkError::AmbiguousDependency { .. })
        ));
        assert!(matches!(
            container.lookup(&Contract::of::<String>(), Cardinality::Single),
            Err(BeanstalkError::UnsatisfiedDependency { required_by: None, .. })
        ));
    }

    #[test]
    fn test_undeclared_access_is_rejected() {
        let container = Container::boot(vec![
            BeanDescriptor::singleton::<u64, _>(|_| Ok(Arc::new(7))).build(),
            BeanDescriptor::transient::<String, _>(|deps| {
                let value = deps.get::<u64>()?;
                Ok(Arc::new(value.to_string()))
            })
            .build(),
        ])
        .unwrap();

        let err = container.get::<String>().unwrap_err();
        match err {
            BeanstalkError::FactoryFailed { bean, source } => {
                assert_eq!(bean, "alloc::string::String");
                assert!(matches!(
                    source.downcast_ref::<BeanstalkError>(),
                    Some(BeanstalkError::UndeclaredDependency { .. })
                ));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_transient_revisit_through_singleton_gets_proxy() {
        trait Node: Send + Sync {
            fn label(&self) -> String;
        }

        struct Hub {
            spoke: Arc<Spoke>,
        }

        impl Node for Hub {
            fn label(&self) -> String {
                "hub".to_string()
            }
        }

        struct Spoke {
            hub: Arc<dyn Node>,
        }

        struct HubProxy(Lazy<dyn Node>);

        impl Node for HubProxy {
            fn label(&self) -> String {
                format!("proxy({})", self.0.label())
            }
        }

        let container = Container::boot(vec![
            BeanDescriptor::singleton::<dyn Node, _>(|deps| {
                Ok(Arc::new(Hub {
                    spoke: deps.get::<Spoke>()?,
                }) as Arc<dyn Node>)
            })
            .depends_on(Dependency::single::<Spoke>())
            .proxy(|lazy| Arc::new(HubProxy(lazy)) as Arc<dyn Node>)
            .name("hub")
            .build(),
            BeanDescriptor::transient::<Spoke, _>(|deps| {
                Ok(Arc::new(Spoke {
                    hub: deps.get::<dyn Node>()?,
                }))
            })
            .depends_on(Dependency::single::<dyn Node>())
            .name("spoke")
            .build(),
        ])
        .unwrap();

        // Entering through the transient: spoke -> hub -> spoke -> (hub proxy).
        let spoke = container.get::<Spoke>().unwrap();
        assert_eq!(spoke.hub.label(), "hub");

        let hub = container.get::<dyn Node>().unwrap();
        assert!(Arc::ptr_eq(&hub, &spoke.hub));
    }

    #[test]
    fn test_transient_revisit_checks_its_latest_occurrence() {
        trait Relay: Send + Sync {}

        struct Tower;

        impl Relay for Tower {}

        struct TowerProxy(#[allow(dead_code)] Lazy<dyn Relay>);

        impl Relay for TowerProxy {}

        struct Signal;

        let container = Container::boot(vec![
            BeanDescriptor::singleton::<dyn Relay, _>(|deps| {
                deps.get::<Signal>()?;
                Ok(Arc::new(Tower) as Arc<dyn Relay>)
            })
            .depends_on(Dependency::single::<Signal>())
            .proxy(|lazy| Arc::new(TowerProxy(lazy)) as Arc<dyn Relay>)
            .name("tower")
            .build(),
            // signal -> tower -> signal is broken by the tower proxy, but the
            // innermost signal then forces a deferred signal with no singleton
            // in between.
            BeanDescriptor::transient::<Signal, _>(|deps| {
                deps.get::<dyn Relay>()?;
                deps.lazy::<Signal>()?.try_get()?;
                Ok(Arc::new(Signal))
            })
            .depends_on(Dependency::single::<dyn Relay>())
            .depends_on(Dependency::deferred::<Signal>())
            .name("signal")
            .build(),
        ])
        .unwrap();

        match container.get::<Signal>() {
            Err(BeanstalkError::FactoryFailed { bean, source }) => {
                assert_eq!(bean, "signal");
                match source.downcast_ref::<BeanstalkError>() {
                    Some(BeanstalkError::CyclicDependency { cycle }) => {
                        assert_eq!(cycle, "signal -> signal");
                    }
                    other => panic!("expected cyclic dependency, got {:?}", other),
                }
            }
            other => panic!("expected factory failure, got {:?}", other.map(|_| ())),
        }
        assert_eq!(
            container.instances()[0].state,
            crate::di::InstanceState::Pending
        );
    }
}
