//! Shared types for the kiln renderer crates: configuration and the error taxonomy.

pub mod config;
pub mod error;

pub use config::{KilnConfig, WatchBackend};
pub use error::{KilnError, KilnResult};

/// Number of frames the GPU may be working on while the CPU records the next one.
///
/// Anything handed to deferred deletion is kept alive for this many frame advances.
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;
