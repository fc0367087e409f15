//! # Beanstalk
//!
//! The runtime core of a lightweight inversion-of-control container.
//!
//! Beanstalk consumes a set of bean descriptors (usually produced by a code
//! generator), validates the whole dependency graph at boot, and then serves
//! lookups with per-scope instantiation, lifecycle hooks and typed events.
//!
//! ## Features
//!
//! - **Validated model**: unsatisfied, ambiguous and cyclic dependencies are rejected at boot
//! - **Scopes**: `Transient` beans are built per lookup; `LazySingleton` beans once per container
//! - **Lazy proxies**: mutually dependent singletons are wired through deferred stand-ins
//! - **Lifecycle**: init hooks after construction, destroy/close hooks in reverse construction order
//! - **Event bus**: synchronous, exact-type dispatch with `Start`/`Stop` container events
//!
//! ## Quick Start
//!
//! ```rust
//! use beanstalk::prelude::*;
//!
//! trait Greeter: Send + Sync {
//!     fn greet(&self, name: &str) -> String;
//! }
//!
//! struct English;
//!
//! impl Greeter for English {
//!     fn greet(&self, name: &str) -> String {
//!         format!("Hello, {}!", name)
//!     }
//! }
//!
//! struct Reception {
//!     greeters: Vec<Arc<dyn Greeter>>,
//! }
//!
//! let container = Container::boot(vec![
//!     BeanDescriptor::singleton::<dyn Greeter, _>(|_| Ok(Arc::new(English) as Arc<dyn Greeter>))
//!         .build(),
//!     BeanDescriptor::transient::<Reception, _>(|deps| {
//!         Ok(Arc::new(Reception { greeters: deps.all::<dyn Greeter>()? }))
//!     })
//!     .depends_on(Dependency::collection::<dyn Greeter>())
//!     .build(),
//! ])?;
//!
//! let reception = container.get::<Reception>()?;
//! assert_eq!(reception.greeters[0].greet("Ada"), "Hello, Ada!");
//!
//! container.shutdown()?;
//! # Ok::<(), beanstalk::BeanstalkError>(())
//! ```

pub mod config;
pub mod di;
pub mod error;
pub mod lifecycle;
pub mod messaging;

// Re-export core types
pub use config::ContainerConfig;
pub use di::{
    BeanDescriptor, Cardinality, Container, ContainerBuilder, Contract, Dependency, Lazy, Resolved,
    ScopeKind,
};
pub use error::{BeanstalkError, Result};

/// Prelude module for convenient imports
///
/// ```
/// use beanstalk::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::ContainerConfig;
    pub use crate::di::{
        BeanDescriptor, Cardinality, Container, ContainerBuilder, Contract, Dependencies,
        Dependency, Lazy, Resolved, ScopeKind,
    };
    pub use crate::error::{BeanstalkError, Result};
    pub use crate::lifecycle::{
        AutoClose, PostConstruct, PreDestroy, ShutdownErrors, ShutdownHandler, shutdown_signal,
    };
    pub use crate::messaging::{EventBus, Start, Stop, SubscriptionId};
    pub use std::sync::Arc;
}
