use super::container::ContainerCore;
use super::resolver::Resolver;
use super::{Contract, Instance, downcast};
use crate::error::{BeanstalkError, Result};
use once_cell::sync::OnceCell;
use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Weak};

#[derive(Clone)]
enum LazyTarget {
    /// A specific lazy singleton, used for cycle-breaking proxies.
    Bean(usize),
    /// Whatever single bean satisfies the contract, used for deferred injection.
    Contract(Contract),
}

/// Untyped deferred reference into a container.
///
/// Holds the container weakly, so a proxy stored inside a singleton never
/// keeps its own container alive.
#[derive(Clone)]
pub struct LazyHandle {
    core: Weak<ContainerCore>,
    target: LazyTarget,
}

impl LazyHandle {
    pub(crate) fn bean(core: Weak<ContainerCore>, index: usize) -> Self {
        Self {
            core,
            target: LazyTarget::Bean(index),
        }
    }

    pub(crate) fn contract(core: Weak<ContainerCore>, contract: Contract) -> Self {
        Self {
            core,
            target: LazyTarget::Contract(contract),
        }
    }

    pub(crate) fn resolve(&self) -> Result<Instance> {
        let core = self.core.upgrade().ok_or(BeanstalkError::NotRunning)?;
        let resolver = Resolver::new(&core)?;
        match &self.target {
            LazyTarget::Bean(index) => resolver.force(*index),
            LazyTarget::Contract(contract) => resolver.resolve_single(contract),
        }
    }
}

impl fmt::Debug for LazyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            LazyTarget::Bean(index) => write!(f, "LazyHandle(bean #{})", index),
            LazyTarget::Contract(contract) => write!(f, "LazyHandle({})", contract),
        }
    }
}

/// A wrapper for lazily resolved beans.
///
/// `Lazy<T>` resolves its target from the container the first time it is
/// accessed and keeps the result. It is what lazy proxies forward to, and what
/// a deferred dependency injects.
///
/// # Panics
///
/// Dereferencing (or calling [`Lazy::get`]) panics if the target cannot be
/// resolved, for example when it is accessed through a proxy while its own
/// construction is still running on the same thread. Use [`Lazy::try_get`] to
/// observe the error instead.
pub struct Lazy<T: ?Sized + Send + Sync + 'static> {
    handle: LazyHandle,
    target: OnceCell<Arc<T>>,
}

impl<T: ?Sized + Send + Sync + 'static> Lazy<T> {
    pub(crate) fn new(handle: LazyHandle) -> Self {
        Self {
            handle,
            target: OnceCell::new(),
        }
    }

    pub fn try_get(&self) -> Result<Arc<T>> {
        self.target.get_or_try_init(|| self.load()).cloned()
    }

    pub fn get(&self) -> Arc<T> {
        Arc::clone(self.force())
    }

    pub fn is_resolved(&self) -> bool {
        self.target.get().is_some()
    }

    fn load(&self) -> Result<Arc<T>> {
        let instance = self.handle.resolve()?;
        downcast::<T>(&instance).ok_or_else(|| BeanstalkError::DowncastFailed {
            type_name: std::any::type_name::<T>().to_string(),
        })
    }

    fn force(&self) -> &Arc<T> {
        match self.target.get_or_try_init(|| self.load()) {
            Ok(target) => target,
            Err(e) => panic!(
                "Failed to lazily resolve dependency '{}': {}",
                std::any::type_name::<T>(),
                e
            ),
        }
    }
}

impl<T: ?Sized + Send + Sync + 'static> Deref for Lazy<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        self.force()
    }
}

impl<T: ?Sized + Send + Sync + 'static> Clone for Lazy<T> {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle.clone(),
            target: self.target.clone(),
        }
    }
}

impl<T: ?Sized + Send + Sync + 'static> fmt::Debug for Lazy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lazy")
            .field("target", &std::any::type_name::<T>())
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::di::{BeanDescriptor, Container, Dependency};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Report {
        title: String,
    }

    #[test]
    fn test_deferred_dependency_resolves_on_first_access() {
        let built = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&built);

        let container = Container::boot(vec![
            BeanDescriptor::singleton::<Report, _>(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(Report {
                    title: "weekly".to_string(),
                }))
            })
            .build(),
            BeanDescriptor::singleton::<Lazy<Report>, _>(|deps| Ok(Arc::new(deps.lazy::<Report>()?)))
                .depends_on(Dependency::deferred::<Report>())
                .build(),
        ])
        .unwrap();

        let lazy = container.get::<Lazy<Report>>().unwrap();
        assert!(!lazy.is_resolved());
        assert_eq!(built.load(Ordering::SeqCst), 0);

        assert_eq!(lazy.title, "weekly");
        assert!(lazy.is_resolved());
        assert!(Arc::ptr_eq(&lazy.get(), &container.get::<Report>().unwrap()));
        assert_eq!(built.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_lazy_fails_once_container_is_gone() {
        let container = Container::boot(vec![
            BeanDescriptor::singleton::<Report, _>(|_| {
                Ok(Arc::new(Report {
                    title: "daily".to_string(),
                }))
            })
            .build(),
            BeanDescriptor::transient::<Lazy<Report>, _>(|deps| Ok(Arc::new(deps.lazy::<Report>()?)))
                .depends_on(Dependency::deferred::<Report>())
                .build(),
        ])
        .unwrap();

        let lazy = container.get::<Lazy<Report>>().unwrap();
        container.shutdown().unwrap();
        drop(container);

        assert!(matches!(lazy.try_get(), Err(BeanstalkError::NotRunning)));
    }

    struct Node {
        next: Option<Arc<Node>>,
    }

    #[test]
    fn test_forcing_deferred_transient_cycle_in_factory_is_cyclic() {
        let container = Container::boot(vec![
            BeanDescriptor::transient::<Node, _>(|deps| {
                let next = deps.lazy::<Node>()?.try_get()?;
                Ok(Arc::new(Node { next: Some(next) }))
            })
            .name("node")
            .depends_on(Dependency::deferred::<Node>())
            .build(),
        ])
        .unwrap();

        match container.get::<Node>() {
            Err(BeanstalkError::FactoryFailed { bean, source }) => {
                assert_eq!(bean, "node");
                match source.downcast_ref::<BeanstalkError>() {
                    Some(BeanstalkError::CyclicDependency { cycle }) => {
                        assert_eq!(cycle, "node -> node");
                    }
                    other => panic!("expected cyclic dependency, got {:?}", other),
                }
            }
            other => panic!("expected factory failure, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_deferred_transient_resolved_after_construction() {
        let container = Container::boot(vec![
            BeanDescriptor::transient::<Node, _>(|_| Ok(Arc::new(Node { next: None }))).build(),
            BeanDescriptor::transient::<Lazy<Node>, _>(|deps| Ok(Arc::new(deps.lazy::<Node>()?)))
                .depends_on(Dependency::deferred::<Node>())
                .build(),
        ])
        .unwrap();

        let lazy = container.get::<Lazy<Node>>().unwrap();
        assert!(lazy.try_get().unwrap().next.is_none());
    }
}
