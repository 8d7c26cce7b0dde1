//! Construction-time configuration supplied by the embedder.
//!
//! Capacities, the polling interval and the shader directory are fixed once the
//! pipeline engine and the bindless table are created.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{KilnError, KilnResult, MAX_FRAMES_IN_FLIGHT};

/// How the rebuild worker notices that a shader source changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchBackend {
    /// Re-stat every tracked source each cycle.
    #[default]
    Poll,
    /// Filesystem notifications; only touched sources are re-stat'ed.
    Notify,
}

/// Renderer support configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KilnConfig {
    /// Base directory shader source paths are resolved against.
    pub shader_dir: PathBuf,
    /// Sleep between two rebuild cycles of the background worker.
    pub poll_interval_ms: u64,
    /// Change detection backend used by the background worker.
    pub watch_backend: WatchBackend,
    /// Size of the deferred-deletion ring.
    pub frames_in_flight: usize,
    /// Slots in the sampled texture array and in the storage image array.
    pub max_textures: u32,
    /// Slots in the sampler array, built-in samplers included.
    pub max_samplers: u32,
    /// Where the Vulkan pipeline cache is loaded from and saved to.
    pub pipeline_cache_path: Option<PathBuf>,
    /// Explicit glslc binary; discovered on PATH / VULKAN_SDK when unset.
    pub glslc_path: Option<PathBuf>,
}

impl Default for KilnConfig {
    fn default() -> Self {
        Self {
            shader_dir: PathBuf::from("shaders"),
            poll_interval_ms: 1000,
            watch_backend: WatchBackend::Poll,
            frames_in_flight: MAX_FRAMES_IN_FLIGHT,
            max_textures: 8192,
            max_samplers: 16,
            pipeline_cache_path: None,
            glslc_path: None,
        }
    }
}

impl KilnConfig {
    /// Config rooted at `shader_dir` with every other field defaulted.
    pub fn with_shader_dir(shader_dir: impl Into<PathBuf>) -> Self {
        Self {
            shader_dir: shader_dir.into(),
            ..Self::default()
        }
    }

    /// Interval between rebuild cycles.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Reject settings no component can work with.
    pub fn validate(&self) -> KilnResult<()> {
        if self.frames_in_flight == 0 {
            return Err(KilnError::Config("frames_in_flight must be at least 1".into()));
        }
        if self.max_textures == 0 {
            return Err(KilnError::Config("max_textures must be at least 1".into()));
        }
        // Slots 0 and 1 hold the built-in linear and linear-min samplers.
        if self.max_samplers < 2 {
            return Err(KilnError::Config(format!(
                "max_samplers must be at least 2 (got {})",
                self.max_samplers
            )));
        }
        Ok(())
    }
}
