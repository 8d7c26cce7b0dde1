//! Shader sources, compiled artifacts and the compiler contract.

mod compiler;
pub mod watch;

pub use compiler::{GlslcCompiler, ShaderCompiler};

use ash::vk;
use std::fmt;
use std::path::{Path, PathBuf};

/// Pipeline stage a shader source is compiled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
    Mesh,
    Task,
}

impl ShaderStage {
    /// Stage name understood by `glslc -fshader-stage=`.
    pub fn glslc_name(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::Fragment => "fragment",
            ShaderStage::Compute => "compute",
            ShaderStage::Mesh => "mesh",
            ShaderStage::Task => "task",
        }
    }

    pub fn to_vk(self) -> vk::ShaderStageFlags {
        match self {
            ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
            ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
            ShaderStage::Compute => vk::ShaderStageFlags::COMPUTE,
            ShaderStage::Mesh => vk::ShaderStageFlags::MESH_EXT,
            ShaderStage::Task => vk::ShaderStageFlags::TASK_EXT,
        }
    }
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.glslc_name())
    }
}

/// A shader source: file path (relative to the compiler's base directory),
/// stage and preprocessor defines.
///
/// Two sources are the same shader only if all three match, define order
/// included. The pipeline engine compiles each distinct source once.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShaderSource {
    pub path: PathBuf,
    pub stage: ShaderStage,
    pub defines: Vec<(String, String)>,
}

impl ShaderSource {
    pub fn new(path: impl Into<PathBuf>, stage: ShaderStage) -> Self {
        Self {
            path: path.into(),
            stage,
            defines: Vec::new(),
        }
    }

    /// Append a `#define key value`.
    pub fn define(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.defines.push((key.into(), value.into()));
        self
    }

    pub fn vertex(path: impl Into<PathBuf>) -> Self {
        Self::new(path, ShaderStage::Vertex)
    }

    pub fn fragment(path: impl Into<PathBuf>) -> Self {
        Self::new(path, ShaderStage::Fragment)
    }

    pub fn compute(path: impl Into<PathBuf>) -> Self {
        Self::new(path, ShaderStage::Compute)
    }
}

impl fmt::Display for ShaderSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.path.display(), self.stage)?;
        for (key, value) in &self.defines {
            write!(f, " -D{}={}", key, value)?;
        }
        Ok(())
    }
}

/// SPIR-V produced from exactly one [`ShaderSource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledArtifact {
    stage: ShaderStage,
    words: Vec<u32>,
    name: String,
}

impl CompiledArtifact {
    pub fn new(stage: ShaderStage, words: Vec<u32>, name: impl Into<String>) -> Self {
        Self {
            stage,
            words,
            name: name.into(),
        }
    }

    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    /// SPIR-V words, ready for `vk::ShaderModuleCreateInfo::code`.
    pub fn words(&self) -> &[u32] {
        &self.words
    }

    /// File the artifact was compiled from, used in logs and debug names.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

/// Resolve a source path against the compiler base directory.
pub(crate) fn resolve(base_dir: &Path, source: &ShaderSource) -> PathBuf {
    base_dir.join(&source.path)
}
