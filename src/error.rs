use crate::lifecycle::ShutdownErrors;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, BeanstalkError>;

#[derive(Debug, Error)]
pub enum BeanstalkError {
    #[error("Invalid bean model: {message}")]
    Model { message: String },

    #[error("Unsatisfied dependency: no bean provides {contract}{}", required_by_suffix(.required_by))]
    UnsatisfiedDependency {
        contract: String,
        required_by: Option<String>,
    },

    #[error("Ambiguous dependency: {contract} is provided by [{}]", .candidates.join(", "))]
    AmbiguousDependency {
        contract: String,
        candidates: Vec<String>,
    },

    #[error("Circular dependency detected: {cycle}")]
    CyclicDependency { cycle: String },

    #[error("Bean '{bean}' cannot be lazily proxied but is part of a construction cycle: {cycle}")]
    ProxyUnsupported { bean: String, cycle: String },

    #[error("Initialization of bean '{bean}' failed: {source}")]
    Initialization {
        bean: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Factory of bean '{bean}' failed: {source}")]
    FactoryFailed {
        bean: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Bean '{bean}' did not declare a dependency on {contract}")]
    UndeclaredDependency { bean: String, contract: String },

    #[error("Failed to downcast type: {type_name}")]
    DowncastFailed { type_name: String },

    #[error("Container is not running")]
    NotRunning,

    #[error("Invalid configuration: {message}")]
    Config { message: String },

    #[error(transparent)]
    Shutdown(#[from] ShutdownErrors),
}

impl BeanstalkError {
    pub(crate) fn model(message: impl Into<String>) -> Self {
        Self::Model {
            message: message.into(),
        }
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Whether this error belongs to the class that aborts `boot`.
    pub fn is_model_error(&self) -> bool {
        matches!(
            self,
            Self::Model { .. }
                | Self::UnsatisfiedDependency { .. }
                | Self::AmbiguousDependency { .. }
                | Self::CyclicDependency { .. }
                | Self::ProxyUnsupported { .. }
        )
    }
}

fn required_by_suffix(required_by: &Option<String>) -> String {
    match required_by {
        Some(bean) => format!(" (required by '{}')", bean),
        None => String::new(),
    }
}
