//! Lifecycle Hooks Module
//!
//! This module sequences initialization and cleanup of beans during container
//! boot, lookup and shutdown.
//!
//! # Lifecycle Phases
//!
//! ```text
//! 1. Registry Load & Validation
//!    ↓
//! 2. Eager Singletons (optional)
//!    ↓  factory → init hook             ← PostConstruct
//! 3. Start event
//!    ↓
//! [Running... lazy singletons built on first lookup]
//!    ↓
//! 4. Shutdown Signal (SIGTERM/SIGINT) or Container::shutdown
//!    ↓
//! 5. Stop event
//!    ↓
//! 6. Destroy hooks, newest singleton first  ← PreDestroy, then AutoClose
//!    ↓
//! 7. Registry & scope stores discarded
//! ```
//!
//! # Example
//!
//! ```rust
//! use beanstalk::di::{BeanDescriptor, Container};
//! use beanstalk::lifecycle::{PostConstruct, PreDestroy};
//! use std::sync::Arc;
//!
//! struct DatabaseService;
//!
//! impl PostConstruct for DatabaseService {
//!     fn post_construct(&self) -> anyhow::Result<()> {
//!         tracing::info!("Opening database connection");
//!         Ok(())
//!     }
//! }
//!
//! impl PreDestroy for DatabaseService {
//!     fn pre_destroy(&self) -> anyhow::Result<()> {
//!         tracing::info!("Closing database connections");
//!         Ok(())
//!     }
//! }
//!
//! let container = Container::boot(vec![
//!     BeanDescriptor::singleton::<DatabaseService, _>(|_| Ok(Arc::new(DatabaseService)))
//!         .post_construct()
//!         .pre_destroy()
//!         .build(),
//! ])?;
//! let _db = container.get::<DatabaseService>()?;
//! container.shutdown()?;
//! # Ok::<(), beanstalk::BeanstalkError>(())
//! ```

mod error;
mod manager;
mod shutdown;
mod traits;

pub use error::{ShutdownErrors, TeardownFailure, TeardownPhase};
pub use manager::LifecycleController;
pub(crate) use manager::call_guarded;
pub use shutdown::{ShutdownHandler, shutdown_signal};
pub use traits::{AutoClose, PostConstruct, PreDestroy};
