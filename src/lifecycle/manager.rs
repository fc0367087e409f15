//! Lifecycle Controller
//!
//! Runs init hooks as beans are constructed and tears down singletons in
//! reverse construction order at shutdown.

use super::{ShutdownErrors, TeardownFailure, TeardownPhase};
use crate::di::{BeanDescriptor, Instance, Registry, ScopeInstance};
use crate::error::{BeanstalkError, Result};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

/// Sequences post-construction initialization and pre-destruction cleanup.
///
/// The controller itself is stateless: construction order lives with the
/// scope store, which hands the finished singletons back at shutdown.
#[derive(Debug, Default)]
pub struct LifecycleController;

impl LifecycleController {
    pub fn new() -> Self {
        Self
    }

    /// Invokes the descriptor's init hook, if any, on a freshly built instance.
    ///
    /// Runs before the instance is handed to any caller. A failing (or
    /// panicking) hook aborts construction of this instance only.
    pub(crate) fn on_constructed(&self, descriptor: &BeanDescriptor, instance: &Instance) -> Result<()> {
        let Some(hook) = descriptor.init_hook() else {
            return Ok(());
        };

        tracing::debug!("Initializing: {}", descriptor.name());
        call_guarded(|| hook(instance)).map_err(|source| {
            tracing::error!("Init hook failed for {}: {}", descriptor.name(), source);
            BeanstalkError::Initialization {
                bean: descriptor.name().to_string(),
                source,
            }
        })?;
        tracing::debug!("Initialized: {}", descriptor.name());
        Ok(())
    }

    /// Tears down every given singleton in descending construction order.
    ///
    /// The destroy hook and the close operation of each bean run
    /// independently; a failure in either is collected and the pass carries
    /// on. All failures are reported together at the end.
    pub(crate) fn on_shutdown(
        &self,
        registry: &Registry,
        mut instances: Vec<ScopeInstance>,
    ) -> std::result::Result<(), ShutdownErrors> {
        instances.sort_by(|a, b| b.sequence().cmp(&a.sequence()));
        tracing::info!("Calling destroy hooks for {} singleton(s)...", instances.len());

        let mut failures = Vec::new();
        for scoped in &instances {
            let descriptor = registry.descriptor(scoped.descriptor());
            tracing::debug!("Destroying: {} (#{})", descriptor.name(), scoped.sequence());

            if let Some(hook) = descriptor.destroy_hook() {
                if let Err(e) = call_guarded(|| hook(scoped.instance())) {
                    tracing::error!("Destroy hook failed for {}: {}", descriptor.name(), e);
                    failures.push(TeardownFailure::new(descriptor.name(), TeardownPhase::Destroy, e));
                }
            }

            if let Some(close) = descriptor.close_hook() {
                if let Err(e) = call_guarded(|| close(scoped.instance())) {
                    tracing::error!("Close failed for {}: {}", descriptor.name(), e);
                    failures.push(TeardownFailure::new(descriptor.name(), TeardownPhase::Close, e));
                }
            }

            tracing::debug!("Destroyed: {}", descriptor.name());
        }

        tracing::info!(
            "Teardown complete ({} singletons, {} failures)",
            instances.len(),
            failures.len()
        );

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ShutdownErrors::new(failures))
        }
    }
}

/// Runs a hook, turning a panic into an ordinary error.
pub(crate) fn call_guarded<F>(hook: F) -> anyhow::Result<()>
where
    F: FnOnce() -> anyhow::Result<()>,
{
    match panic::catch_unwind(AssertUnwindSafe(hook)) {
        Ok(result) => result,
        Err(payload) => Err(anyhow::anyhow!("panicked: {}", panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::di::{BeanDescriptor, Container};
    use crate::lifecycle::{AutoClose, PreDestroy};
    use parking_lot::Mutex;
    use std::sync::Arc;

    struct Tracked {
        id: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        fail_destroy: bool,
    }

    impl PreDestroy for Tracked {
        fn pre_destroy(&self) -> anyhow::Result<()> {
            self.log.lock().push(format!("destroy:{}", self.id));
            if self.fail_destroy {
                anyhow::bail!("{} refused to stop", self.id);
            }
            Ok(())
        }
    }

    impl AutoClose for Tracked {
        fn close(&self) -> anyhow::Result<()> {
            self.log.lock().push(format!("close:{}", self.id));
            Ok(())
        }
    }

    fn tracked(id: &'static str, log: &Arc<Mutex<Vec<String>>>, fail_destroy: bool) -> BeanDescriptor {
        let log = Arc::clone(log);
        BeanDescriptor::singleton::<Tracked, _>(move |_| {
            Ok(Arc::new(Tracked {
                id,
                log: Arc::clone(&log),
                fail_destroy,
            }))
        })
        .qualifier(id)
        .name(id)
        .pre_destroy()
        .auto_close()
        .build()
    }

    #[test]
    fn test_teardown_reverse_order_and_close_after_failed_destroy() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let container = Container::boot(vec![
            tracked("a", &log, false),
            tracked("b", &log, true),
            tracked("c", &log, false),
        ])
        .unwrap();

        for id in ["b", "c", "a"] {
            container.get_named::<Tracked>(id).unwrap();
        }

        let err = container.shutdown().unwrap_err();
        assert_eq!(
            *log.lock(),
            vec!["destroy:a", "close:a", "destroy:c", "close:c", "destroy:b", "close:b"]
        );

        match err {
            BeanstalkError::Shutdown(errors) => {
                assert_eq!(errors.len(), 1);
                assert_eq!(errors.failures()[0].bean(), "b");
                assert_eq!(errors.failures()[0].phase(), TeardownPhase::Destroy);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_panicking_destroy_hook_is_collected() {
        let container = Container::boot(vec![
            BeanDescriptor::singleton::<u8, _>(|_| Ok(Arc::new(1)))
                .name("fragile")
                .on_destroy(|_| panic!("hook exploded"))
                .build(),
        ])
        .unwrap();
        container.get::<u8>().unwrap();

        match container.shutdown() {
            Err(BeanstalkError::Shutdown(errors)) => {
                assert_eq!(errors.failures()[0].bean(), "fragile");
                assert!(errors.failures()[0].cause().to_string().contains("hook exploded"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_init_failure_is_initialization_error() {
        let container = Container::boot(vec![
            BeanDescriptor::singleton::<u16, _>(|_| Ok(Arc::new(2)))
                .name("cold")
                .on_init(|_| anyhow::bail!("not ready"))
                .build(),
        ])
        .unwrap();

        match container.get::<u16>() {
            Err(BeanstalkError::Initialization { bean, source }) => {
                assert_eq!(bean, "cold");
                assert_eq!(source.to_string(), "not ready");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_call_guarded_reports_panic_message() {
        let err = call_guarded(|| panic!("{} went wrong", "something")).unwrap_err();
        assert_eq!(err.to_string(), "panicked: something went wrong");
    }
}
