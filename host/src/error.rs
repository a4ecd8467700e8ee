use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub type Result<T, E = PluginError> = std::result::Result<T, E>;

/// Failures surfaced by the plugin runtime.
#[derive(Debug, Error)]
pub enum PluginError {
    #[error(
        "plugin directory does not exist: {}{}",
        .dir.display(),
        .plugin.as_deref().map(|p| format!(" (loading plugin {})", p)).unwrap_or_default()
    )]
    DirectoryMissing {
        dir: PathBuf,
        /// Plugin whose load ran into the missing directory.
        plugin: Option<String>,
    },

    #[error("plugin binary not found: {name} (searched {})", .dir.display())]
    NotFound { name: String, dir: PathBuf },

    #[error("plugin {name} failed handshake: {reason}")]
    Handshake { name: String, reason: String },

    #[error("plugin {name} is incompatible: API version {actual}, expected {expected}")]
    VersionMismatch {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("plugin {name} does not implement the ConfigPlugin contract: {reason}")]
    ContractViolation { name: String, reason: String },

    #[error("failed to connect to plugin {name}: {source}")]
    Transport {
        name: String,
        #[source]
        source: tonic::transport::Error,
    },

    #[error("plugin call failed: {0}")]
    Rpc(#[from] tonic::Status),

    #[error("plugin call timed out after {0:?}")]
    Timeout(Duration),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invalid value payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("plugin {0} is not loaded")]
    NotLoaded(String),

    #[error("plugin {0} is already running")]
    AlreadyRunning(String),

    #[error("plugin {0} is not running")]
    NotRunning(String),

    #[error("plugin {name} failed to initialize: {source}")]
    InitFailed {
        name: String,
        #[source]
        source: Box<PluginError>,
    },

    #[error("failed to restart plugin {name}: {source}")]
    RestartFailed {
        name: String,
        #[source]
        source: Box<PluginError>,
    },

    #[error("timeout waiting for plugin {name} to become healthy after {timeout:?}")]
    HealthTimeout { name: String, timeout: Duration },

    #[error(transparent)]
    Aggregate(#[from] AggregateError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse grouping of [`PluginError`] used to tell operators what kind of
/// problem a plugin has without matching on every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Plugin directory or binary is missing.
    Discovery,
    /// Spawn, handshake, connection, or API version failure.
    Handshake,
    /// Connected, but the dispensed service is not a config plugin.
    Contract,
    /// A call on a loaded plugin failed or timed out.
    Call,
    /// Health threshold or wait-for-healthy failure.
    Health,
    /// The restart path failed.
    Restart,
    /// The operation was invalid for the current lifecycle state.
    State,
}

impl PluginError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            PluginError::DirectoryMissing { .. } | PluginError::NotFound { .. } => {
                ErrorCategory::Discovery
            }
            PluginError::Handshake { .. }
            | PluginError::VersionMismatch { .. }
            | PluginError::Transport { .. }
            | PluginError::Io(_) => ErrorCategory::Handshake,
            PluginError::ContractViolation { .. } => ErrorCategory::Contract,
            PluginError::Rpc(_)
            | PluginError::Timeout(_)
            | PluginError::Validation(_)
            | PluginError::Payload(_) => ErrorCategory::Call,
            PluginError::HealthTimeout { .. } => ErrorCategory::Health,
            PluginError::RestartFailed { .. } => ErrorCategory::Restart,
            PluginError::NotLoaded(_)
            | PluginError::AlreadyRunning(_)
            | PluginError::NotRunning(_) => ErrorCategory::State,
            PluginError::InitFailed { source, .. } => source.category(),
            PluginError::Aggregate(err) => err
                .failures
                .first()
                .map(|(_, e)| e.category())
                .unwrap_or(ErrorCategory::State),
        }
    }

    /// True when the error means the caller should treat the plugin as
    /// unresponsive rather than as having answered with an error.
    pub fn is_timeout(&self) -> bool {
        match self {
            PluginError::Timeout(_) => true,
            PluginError::Rpc(status) => status.code() == tonic::Code::DeadlineExceeded,
            _ => false,
        }
    }
}

/// Failures collected from an operation fanned out over several plugins.
#[derive(Debug)]
pub struct AggregateError {
    pub operation: &'static str,
    pub attempted: usize,
    /// Failing plugin names with their causes, sorted by name.
    pub failures: Vec<(String, PluginError)>,
}

impl AggregateError {
    pub fn new(
        operation: &'static str,
        attempted: usize,
        mut failures: Vec<(String, PluginError)>,
    ) -> Self {
        failures.sort_by(|a, b| a.0.cmp(&b.0));
        Self {
            operation,
            attempted,
            failures,
        }
    }

    pub fn names(&self) -> Vec<&str> {
        self.failures.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn all_failed(&self) -> bool {
        self.failures.len() == self.attempted
    }

    pub fn get(&self, name: &str) -> Option<&PluginError> {
        self.failures
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, err)| err)
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "failed to {} {} of {} plugins: ",
            self.operation,
            self.failures.len(),
            self.attempted
        )?;
        for (i, (name, err)) in self.failures.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}: {}", name, err)?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_error_sorted_and_named() {
        let err = AggregateError::new(
            "load",
            3,
            vec![
                ("c".to_string(), PluginError::NotLoaded("c".to_string())),
                (
                    "b".to_string(),
                    PluginError::NotFound {
                        name: "b".to_string(),
                        dir: PathBuf::from("/plugins"),
                    },
                ),
            ],
        );

        assert_eq!(err.names(), vec!["b", "c"]);
        assert!(!err.all_failed());
        assert!(err.to_string().starts_with("failed to load 2 of 3 plugins: b:"));
        assert_eq!(
            err.get("b").map(PluginError::category),
            Some(ErrorCategory::Discovery)
        );
    }

    #[test]
    fn test_error_categories() {
        let mismatch = PluginError::VersionMismatch {
            name: "x".to_string(),
            expected: "v1.0.0".to_string(),
            actual: "v2.0.0".to_string(),
        };
        assert_eq!(mismatch.category(), ErrorCategory::Handshake);
        assert!(mismatch.to_string().contains("v2.0.0"));

        let contract = PluginError::ContractViolation {
            name: "x".to_string(),
            reason: "unimplemented".to_string(),
        };
        assert_eq!(contract.category(), ErrorCategory::Contract);

        let init = PluginError::InitFailed {
            name: "x".to_string(),
            source: Box::new(PluginError::Timeout(Duration::from_secs(5))),
        };
        assert_eq!(init.category(), ErrorCategory::Call);
    }

    #[test]
    fn test_deadline_exceeded_counts_as_timeout() {
        let err = PluginError::Rpc(tonic::Status::deadline_exceeded("slow"));
        assert!(err.is_timeout());
        assert!(!PluginError::Validation("bad".to_string()).is_timeout());
    }
}
