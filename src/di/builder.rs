use crate::config::ContainerConfig;
use crate::di::{BeanDescriptor, Container};
use crate::error::Result;
use crate::messaging::EventBus;
use std::any::Any;

type PendingSubscription = Box<dyn FnOnce(&EventBus) + Send>;

/// Builder for booting a container
///
/// Collects configuration, bean descriptors and event listeners, then boots.
/// Listeners added here are subscribed before boot, so they observe `Start`.
///
/// # Example
/// ```
/// use beanstalk::config::ContainerConfig;
/// use beanstalk::di::{BeanDescriptor, ContainerBuilder};
/// use beanstalk::messaging::Start;
/// use std::sync::Arc;
///
/// let container = ContainerBuilder::new()
///     .config(ContainerConfig::new("billing"))
///     .register(BeanDescriptor::singleton::<String, _>(|_| Ok(Arc::new("EUR".to_string()))))
///     .subscribe(|event: &Start| {
///         tracing::info!("{} is up", event.container);
///         Ok(())
///     })
///     .boot()?;
/// assert_eq!(*container.get::<String>()?, "EUR");
/// # Ok::<(), beanstalk::BeanstalkError>(())
/// ```
pub struct ContainerBuilder {
    config: ContainerConfig,
    descriptors: Vec<BeanDescriptor>,
    subscriptions: Vec<PendingSubscription>,
}

impl ContainerBuilder {
    /// Create a new container builder
    pub fn new() -> Self {
        Self {
            config: ContainerConfig::default(),
            descriptors: Vec::new(),
            subscriptions: Vec::new(),
        }
    }

    pub fn config(mut self, config: ContainerConfig) -> Self {
        self.config = config;
        self
    }

    /// Register a bean descriptor
    pub fn register(mut self, descriptor: impl Into<BeanDescriptor>) -> Self {
        self.descriptors.push(descriptor.into());
        self
    }

    pub fn register_all(mut self, descriptors: impl IntoIterator<Item = BeanDescriptor>) -> Self {
        self.descriptors.extend(descriptors);
        self
    }

    /// Subscribe a listener that is in place before boot
    pub fn subscribe<E, F>(mut self, listener: F) -> Self
    where
        E: Any + Send + Sync,
        F: Fn(&E) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscriptions.push(Box::new(move |bus: &EventBus| {
            bus.subscribe(listener);
        }));
        self
    }

    /// Boot the container
    pub fn boot(self) -> Result<Container> {
        let events = EventBus::with_panic_isolation(self.config.isolate_listener_panics);
        for subscribe in self.subscriptions {
            subscribe(&events);
        }
        Container::start(self.config, self.descriptors, events)
    }
}

impl Default for ContainerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
