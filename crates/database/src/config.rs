//! Database configuration.

use serde::{Deserialize, Serialize};
use vigil_reactive::Scheduling;

/// Default number of concurrent readers of a `DatabasePool`.
pub const DEFAULT_MAXIMUM_READER_COUNT: usize = 5;

/// Scheduling of observations started without an explicit one.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DefaultScheduling {
    /// See [`Scheduling::Immediate`].
    Immediate,
    /// See [`Scheduling::Deferred`].
    #[default]
    Deferred,
}

impl From<DefaultScheduling> for Scheduling {
    fn from(scheduling: DefaultScheduling) -> Self {
        match scheduling {
            DefaultScheduling::Immediate => Scheduling::Immediate,
            DefaultScheduling::Deferred => Scheduling::Deferred,
        }
    }
}

/// Configuration of a `DatabaseQueue` or `DatabasePool`.
///
/// # Example
///
/// ```rust
/// use vigil_database::Configuration;
///
/// let config = Configuration::default()
///     .label("inventory")
///     .maximum_reader_count(2);
/// assert_eq!(config.get_label(), "inventory");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    /// Prefix of the names of the database threads.
    label: String,
    /// Number of evaluation workers of a pool. Queues always use one.
    maximum_reader_count: usize,
    default_scheduling: DefaultScheduling,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            label: "vigil".to_string(),
            maximum_reader_count: DEFAULT_MAXIMUM_READER_COUNT,
            default_scheduling: DefaultScheduling::default(),
        }
    }
}

impl Configuration {
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Sets the number of concurrent readers. Zero is treated as one.
    pub fn maximum_reader_count(mut self, count: usize) -> Self {
        self.maximum_reader_count = count.max(1);
        self
    }

    pub fn default_scheduling(mut self, scheduling: DefaultScheduling) -> Self {
        self.default_scheduling = scheduling;
        self
    }

    pub fn get_label(&self) -> &str {
        &self.label
    }

    pub fn get_maximum_reader_count(&self) -> usize {
        self.maximum_reader_count.max(1)
    }

    pub fn get_default_scheduling(&self) -> DefaultScheduling {
        self.default_scheduling
    }
}
