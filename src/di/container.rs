use super::resolver::{Resolver, typed};
use super::scope::{InstanceState, ScopeManager};
use super::{BeanDescriptor, Cardinality, ContainerBuilder, Contract, Registry, Resolved, ScopeKind};
use crate::config::ContainerConfig;
use crate::error::{BeanstalkError, Result};
use crate::lifecycle::{LifecycleController, ShutdownHandler};
use crate::messaging::{EventBus, Start, Stop, SubscriptionId};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

/// Shared state behind every [`Container`] handle.
///
/// Lazy proxies hold it weakly so they never keep a container alive.
pub(crate) struct ContainerCore {
    id: Uuid,
    config: ContainerConfig,
    registry: RwLock<Option<Arc<Registry>>>,
    pub(crate) scopes: ScopeManager,
    pub(crate) lifecycle: LifecycleController,
    events: EventBus,
    shut_down: AtomicBool,
}

impl ContainerCore {
    /// The loaded registry, or `NotRunning` once the container was shut down.
    pub(crate) fn registry(&self) -> Result<Arc<Registry>> {
        self.registry.read().clone().ok_or(BeanstalkError::NotRunning)
    }
}

/// Diagnostic view of one lazy singleton.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceInfo {
    pub bean: String,
    pub contract: String,
    pub state: InstanceState,
    /// Construction order, once `Ready`.
    pub sequence: Option<u64>,
    pub constructed_at: Option<DateTime<Utc>>,
}

/// A booted inversion-of-control container.
///
/// Cloning is cheap and every clone refers to the same container. Lookups are
/// safe from any number of threads; `boot` and `shutdown` must not race with
/// them.
///
/// # Example
///
/// ```rust
/// use beanstalk::di::{BeanDescriptor, Container, Dependency};
/// use std::sync::Arc;
///
/// struct Config {
///     url: String,
/// }
///
/// struct Client {
///     config: Arc<Config>,
/// }
///
/// let container = Container::boot(vec![
///     BeanDescriptor::singleton::<Config, _>(|_| {
///         Ok(Arc::new(Config { url: "postgres://localhost".to_string() }))
///     })
///     .build(),
///     BeanDescriptor::transient::<Client, _>(|deps| {
///         Ok(Arc::new(Client { config: deps.get::<Config>()? }))
///     })
///     .depends_on(Dependency::single::<Config>())
///     .build(),
/// ])?;
///
/// let client = container.get::<Client>()?;
/// assert_eq!(client.config.url, "postgres://localhost");
/// container.shutdown()?;
/// # Ok::<(), beanstalk::BeanstalkError>(())
/// ```
#[derive(Clone)]
pub struct Container {
    core: Arc<ContainerCore>,
}

impl Container {
    /// Boot a container with the default configuration.
    pub fn boot(descriptors: impl IntoIterator<Item = BeanDescriptor>) -> Result<Self> {
        ContainerBuilder::new().register_all(descriptors).boot()
    }

    pub fn builder() -> ContainerBuilder {
        ContainerBuilder::new()
    }

    /// Loads the registry, builds eager singletons and publishes `Start`.
    ///
    /// No container is returned if any step fails; singletons already built
    /// by a failed eager pass are torn down first.
    pub(crate) fn start(
        config: ContainerConfig,
        descriptors: Vec<BeanDescriptor>,
        events: EventBus,
    ) -> Result<Self> {
        tracing::info!(
            "Booting container '{}' with {} bean descriptor(s)...",
            config.name,
            descriptors.len()
        );

        let registry = Arc::new(Registry::load(descriptors).inspect_err(|e| {
            tracing::error!("Bean model rejected: {}", e);
        })?);

        let container = Self {
            core: Arc::new(ContainerCore {
                id: Uuid::new_v4(),
                config,
                registry: RwLock::new(Some(Arc::clone(&registry))),
                scopes: ScopeManager::new(),
                lifecycle: LifecycleController::new(),
                events,
                shut_down: AtomicBool::new(false),
            }),
        };

        let eager = container.construct_eager(&registry)?;
        let notified = container
            .core
            .events
            .publish(Start::now(container.name(), container.id()));

        tracing::info!(
            "Container '{}' started ({} beans, {} eager, {} Start listener(s))",
            container.name(),
            registry.len(),
            eager,
            notified
        );
        Ok(container)
    }

    fn construct_eager(&self, registry: &Registry) -> Result<usize> {
        let eager: Vec<usize> = registry
            .indices()
            .filter(|&index| {
                let descriptor = registry.descriptor(index);
                descriptor.scope() == ScopeKind::LazySingleton
                    && (descriptor.is_eager() || self.core.config.eager_singletons)
            })
            .collect();
        if eager.is_empty() {
            return Ok(0);
        }

        tracing::info!("Constructing {} eager singleton(s)...", eager.len());
        let resolver = Resolver::new(&self.core)?;
        for &index in &eager {
            if let Err(e) = resolver.force(index) {
                tracing::error!(
                    "Eager construction of '{}' failed: {}",
                    registry.descriptor(index).name(),
                    e
                );
                self.roll_back(registry);
                return Err(e);
            }
        }
        Ok(eager.len())
    }

    fn roll_back(&self, registry: &Registry) {
        self.core.shut_down.store(true, Ordering::SeqCst);
        let built = self.core.scopes.drain();
        tracing::warn!("Boot aborted; tearing down {} singleton(s)", built.len());
        if let Err(errors) = self.core.lifecycle.on_shutdown(registry, built) {
            tracing::warn!("Teardown after failed boot reported errors: {}", errors);
        }
        *self.core.registry.write() = None;
    }

    pub fn id(&self) -> Uuid {
        self.core.id
    }

    pub fn name(&self) -> &str {
        &self.core.config.name
    }

    pub fn config(&self) -> &ContainerConfig {
        &self.core.config
    }

    /// The loaded registry. Fails with `NotRunning` after shutdown.
    pub fn registry(&self) -> Result<Arc<Registry>> {
        self.core.registry()
    }

    pub fn is_running(&self) -> bool {
        !self.core.shut_down.load(Ordering::SeqCst)
    }

    /// Resolves `contract` with the given cardinality.
    pub fn lookup(&self, contract: &Contract, cardinality: Cardinality) -> Result<Resolved> {
        Resolver::new(&self.core)?.lookup(contract, cardinality)
    }

    pub fn get<T: ?Sized + Send + Sync + 'static>(&self) -> Result<Arc<T>> {
        self.single(Contract::of::<T>())
    }

    pub fn get_named<T: ?Sized + Send + Sync + 'static>(&self, qualifier: &str) -> Result<Arc<T>> {
        self.single(Contract::of::<T>().named(qualifier.to_string()))
    }

    pub fn get_optional<T: ?Sized + Send + Sync + 'static>(&self) -> Result<Option<Arc<T>>> {
        match self.lookup(&Contract::of::<T>(), Cardinality::Optional)? {
            Resolved::Optional(Some(instance)) => typed(&instance).map(Some),
            _ => Ok(None),
        }
    }

    /// Every bean of contract `T`, in registration order.
    pub fn get_all<T: ?Sized + Send + Sync + 'static>(&self) -> Result<Vec<Arc<T>>> {
        self.lookup(&Contract::of::<T>(), Cardinality::Collection)?
            .into_vec()
            .iter()
            .map(typed::<T>)
            .collect()
    }

    fn single<T: ?Sized + Send + Sync + 'static>(&self, contract: Contract) -> Result<Arc<T>> {
        let instance = Resolver::new(&self.core)?.resolve_single(&contract)?;
        typed(&instance)
    }

    pub fn events(&self) -> &EventBus {
        &self.core.events
    }

    pub fn subscribe<E, F>(&self, listener: F) -> SubscriptionId
    where
        E: Any + Send + Sync,
        F: Fn(&E) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.core.events.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.core.events.unsubscribe(id)
    }

    pub fn publish<E: Any + Send + Sync>(&self, event: E) -> usize {
        self.core.events.publish(event)
    }

    /// State of every lazy singleton, in registration order.
    ///
    /// Empty once the container has been shut down.
    pub fn instances(&self) -> Vec<InstanceInfo> {
        let Ok(registry) = self.core.registry() else {
            return Vec::new();
        };
        registry
            .indices()
            .filter(|&index| registry.descriptor(index).scope() == ScopeKind::LazySingleton)
            .map(|index| {
                let descriptor = registry.descriptor(index);
                let (state, ready) = self.core.scopes.snapshot(index);
                InstanceInfo {
                    bean: descriptor.name().to_string(),
                    contract: descriptor.contract().to_string(),
                    state,
                    sequence: ready.as_ref().map(|instance| instance.sequence()),
                    constructed_at: ready.as_ref().map(|instance| instance.constructed_at()),
                }
            })
            .collect()
    }

    /// Publishes `Stop`, tears down every constructed singleton in reverse
    /// construction order, then discards the registry and scope stores.
    ///
    /// A second call is a no-op. Teardown failures do not stop the pass and
    /// are returned together as [`BeanstalkError::Shutdown`].
    pub fn shutdown(&self) -> Result<()> {
        if self.core.shut_down.swap(true, Ordering::SeqCst) {
            tracing::debug!("Container '{}' is already shut down", self.name());
            return Ok(());
        }

        tracing::info!("Shutting down container '{}'...", self.name());
        self.core.events.publish(Stop::now(self.name(), self.id()));

        let registry = self.core.registry.read().clone();
        let instances = self.core.scopes.drain();
        let result = match &registry {
            Some(registry) => self.core.lifecycle.on_shutdown(registry, instances),
            None => Ok(()),
        };
        *self.core.registry.write() = None;

        tracing::info!("Container '{}' stopped", self.name());
        result.map_err(BeanstalkError::from)
    }

    /// Spawns a task that shuts the container down on Ctrl+C or SIGTERM.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn_shutdown_handler(&self) -> tokio::task::JoinHandle<Result<()>> {
        let handler = ShutdownHandler::new(self.clone());
        tokio::spawn(async move { handler.wait_for_shutdown().await })
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("id", &self.core.id)
            .field("name", &self.core.config.name)
            .field("running", &self.is_running())
            .finish()
    }
}
