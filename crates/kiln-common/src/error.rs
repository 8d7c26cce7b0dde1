//! Error taxonomy shared by the pipeline engine, the bindless table and the device.

use std::path::PathBuf;
use std::sync::Arc;

/// Result alias used across the kiln crates.
pub type KilnResult<T> = Result<T, KilnError>;

/// Every failure the renderer support code can report.
///
/// Errors are `Clone` so the pipeline engine can keep a copy of a first-build
/// failure for every caller of `wait_ready` while logging the original.
#[derive(Debug, Clone, thiserror::Error)]
pub enum KilnError {
    /// A shader source file is missing or unreadable.
    #[error("cannot read shader source '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: Arc<std::io::Error>,
    },

    /// The shader compiler rejected a source. `diagnostic` is the raw compiler output.
    #[error("shader compilation failed for '{}':\n{diagnostic}", .path.display())]
    Compile { path: PathBuf, diagnostic: String },

    /// Creating a GPU object (pipeline, buffer, image, view, sampler, descriptor) failed.
    #[error("failed to create {what}: {result}")]
    DeviceBuild { what: String, result: String },

    /// A fixed-capacity slot table or buffer arena is full.
    #[error("{resource} capacity exceeded: {requested} requested, {capacity} available")]
    CapacityExceeded {
        resource: String,
        capacity: u64,
        requested: u64,
    },

    /// The caller asked for a binding the resource cannot provide.
    #[error("invalid usage: {0}")]
    Usage(String),

    /// The embedder supplied an unusable configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// One or more pipelines failed their very first build.
    #[error("{} pipeline(s) failed their first build; first error: {}", .0.len(), first_message(.0))]
    FirstBuild(Vec<KilnError>),

    /// The background rebuild worker is no longer running.
    #[error("pipeline rebuild worker stopped")]
    Stopped,
}

fn first_message(errors: &[KilnError]) -> String {
    errors
        .first()
        .map(ToString::to_string)
        .unwrap_or_else(|| "<none>".to_string())
}

impl KilnError {
    /// Wrap an IO error for `path`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source: Arc::new(source),
        }
    }

    /// Wrap a GPU API failure. `result` is usually a `vk::Result` or allocator error.
    pub fn device(what: impl Into<String>, result: impl std::fmt::Debug) -> Self {
        Self::DeviceBuild {
            what: what.into(),
            result: format!("{:?}", result),
        }
    }

    /// Capacity overflow of `resource`.
    pub fn capacity(resource: impl Into<String>, capacity: u64, requested: u64) -> Self {
        Self::CapacityExceeded {
            resource: resource.into(),
            capacity,
            requested,
        }
    }

    /// True for the errors that indicate a sizing misconfiguration rather than a bad shader.
    pub fn is_capacity(&self) -> bool {
        matches!(self, Self::CapacityExceeded { .. })
    }
}
