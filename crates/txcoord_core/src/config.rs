//! Coordinator configuration.

use std::time::Duration;

/// How participants take part in the completion protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParticipationStrategy {
    /// A single participant is committed in one phase without `prepare`.
    #[default]
    OnePhaseOptimized,
    /// Every participant is prepared before any commit, even when alone.
    TwoPhaseOnly,
}

/// Configuration for a transaction manager.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Timeout applied to new transactions when the thread set none.
    /// `None` disables timeouts.
    pub default_timeout: Option<Duration>,

    /// Commit protocol used for single-participant transactions.
    pub participation: ParticipationStrategy,

    /// Whether live transactions are tracked for monitoring and forced
    /// rollback.
    pub monitoring: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            default_timeout: None,
            participation: ParticipationStrategy::OnePhaseOptimized,
            monitoring: true,
        }
    }
}

impl CoordinatorConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the default transaction timeout.
    #[must_use]
    pub const fn default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Sets the participation strategy.
    #[must_use]
    pub const fn participation(mut self, strategy: ParticipationStrategy) -> Self {
        self.participation = strategy;
        self
    }

    /// Sets whether live transactions are tracked.
    #[must_use]
    pub const fn monitoring(mut self, value: bool) -> Self {
        self.monitoring = value;
        self
    }
}
