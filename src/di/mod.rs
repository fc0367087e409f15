mod builder;
mod container;
mod contract;
pub(crate) mod descriptor;
mod lazy;
mod registry;
mod resolver;
mod scope;

pub use builder::ContainerBuilder;
pub use container::{Container, InstanceInfo};
pub use contract::{Cardinality, Contract, Dependency};
pub use descriptor::{BeanDescriptor, DescriptorBuilder, Instance, ScopeKind, downcast};
pub use lazy::{Lazy, LazyHandle};
pub use registry::Registry;
pub use resolver::{Dependencies, Resolved};
pub use scope::{InstanceState, ScopeInstance};
