//! Teardown error types

use thiserror::Error;

/// Which teardown step of a bean failed.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString,
)]
pub enum TeardownPhase {
    /// The bean's destroy hook.
    Destroy,
    /// The auto-close operation.
    Close,
}

/// A single failed teardown step.
#[derive(Debug, Error)]
#[error("{phase} of '{bean}' failed: {source}")]
pub struct TeardownFailure {
    bean: String,
    phase: TeardownPhase,
    #[source]
    source: anyhow::Error,
}

impl TeardownFailure {
    pub(crate) fn new(bean: impl Into<String>, phase: TeardownPhase, source: anyhow::Error) -> Self {
        Self {
            bean: bean.into(),
            phase,
            source,
        }
    }

    pub fn bean(&self) -> &str {
        &self.bean
    }

    pub fn phase(&self) -> TeardownPhase {
        self.phase
    }

    pub fn cause(&self) -> &anyhow::Error {
        &self.source
    }
}

/// Every teardown failure collected during one shutdown.
///
/// Shutdown keeps going after a failed step, so all of them are reported
/// together once the last singleton has been processed.
#[derive(Debug, Error)]
#[error("Shutdown completed with {} failure(s): {}", .failures.len(), summary(.failures))]
pub struct ShutdownErrors {
    failures: Vec<TeardownFailure>,
}

impl ShutdownErrors {
    pub(crate) fn new(failures: Vec<TeardownFailure>) -> Self {
        Self { failures }
    }

    pub fn failures(&self) -> &[TeardownFailure] {
        &self.failures
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }
}

fn summary(failures: &[TeardownFailure]) -> String {
    failures
        .iter()
        .map(|failure| failure.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_lists_every_failure() {
        let errors = ShutdownErrors::new(vec![
            TeardownFailure::new("pool", TeardownPhase::Destroy, anyhow::anyhow!("busy")),
            TeardownFailure::new("pool", TeardownPhase::Close, anyhow::anyhow!("socket reset")),
        ]);

        assert_eq!(errors.len(), 2);
        assert_eq!(
            errors.to_string(),
            "Shutdown completed with 2 failure(s): Destroy of 'pool' failed: busy; \
             Close of 'pool' failed: socket reset"
        );
        assert_eq!(errors.failures()[1].phase(), TeardownPhase::Close);
    }
}
