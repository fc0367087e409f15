//! Lifecycle hook traits
//!
//! Beans that implement these traits can bind them on their descriptor with
//! [`DescriptorBuilder::post_construct`](crate::di::DescriptorBuilder::post_construct),
//! [`DescriptorBuilder::pre_destroy`](crate::di::DescriptorBuilder::pre_destroy) and
//! [`DescriptorBuilder::auto_close`](crate::di::DescriptorBuilder::auto_close).

/// Called once after the bean's factory returns, before anyone else sees it.
///
/// An error aborts construction: the caller receives
/// [`BeanstalkError::Initialization`](crate::BeanstalkError::Initialization)
/// and, for a lazy singleton, the next lookup tries again.
///
/// # Example
///
/// ```rust
/// use beanstalk::lifecycle::PostConstruct;
/// use std::sync::atomic::{AtomicBool, Ordering};
///
/// struct Cache {
///     warm: AtomicBool,
/// }
///
/// impl PostConstruct for Cache {
///     fn post_construct(&self) -> anyhow::Result<()> {
///         self.warm.store(true, Ordering::SeqCst);
///         Ok(())
///     }
/// }
/// ```
pub trait PostConstruct: Send + Sync {
    fn post_construct(&self) -> anyhow::Result<()>;
}

/// Called during container shutdown for constructed lazy singletons.
///
/// Singletons are destroyed in **reverse order** of their construction.
/// A failure is recorded and shutdown carries on with the remaining beans.
pub trait PreDestroy: Send + Sync {
    fn pre_destroy(&self) -> anyhow::Result<()>;
}

/// Releases a resource owned by the bean (connections, file handles).
///
/// Runs after [`PreDestroy`] for the same bean, and runs even if the destroy
/// hook failed.
pub trait AutoClose: Send + Sync {
    fn close(&self) -> anyhow::Result<()>;
}
