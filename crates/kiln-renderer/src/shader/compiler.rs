//! Shader compiler contract and the glslc backend.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use kiln_common::{KilnError, KilnResult};

use super::{resolve, CompiledArtifact, ShaderSource};

const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Turns a [`ShaderSource`] into SPIR-V.
///
/// Failures are returned as the compiler's human-readable diagnostic text.
pub trait ShaderCompiler: Send + Sync {
    /// Directory source paths are relative to.
    fn base_dir(&self) -> &Path;

    fn compile(&self, source: &ShaderSource) -> Result<CompiledArtifact, String>;
}

/// Compiles GLSL through the Vulkan SDK `glslc` executable.
///
/// `#include` directives are resolved against the base directory.
pub struct GlslcCompiler {
    glslc: PathBuf,
    base_dir: PathBuf,
    debug_info: bool,
}

impl GlslcCompiler {
    /// Locate glslc (explicit path, then PATH, then VULKAN_SDK) and root it at `base_dir`.
    pub fn new(base_dir: impl Into<PathBuf>, glslc: Option<PathBuf>) -> KilnResult<Self> {
        let glslc = match glslc {
            Some(path) => path,
            None => find_glslc().ok_or_else(|| {
                KilnError::Config(
                    "glslc not found. Install the Vulkan SDK and ensure VULKAN_SDK is set or glslc is on PATH"
                        .to_string(),
                )
            })?,
        };
        log::info!("Using glslc: {}", glslc.display());

        Ok(Self {
            glslc,
            base_dir: base_dir.into(),
            debug_info: cfg!(debug_assertions),
        })
    }

    /// Build from the `shader_dir` and `glslc_path` config fields.
    pub fn from_config(config: &kiln_common::KilnConfig) -> KilnResult<Self> {
        Self::new(config.shader_dir.clone(), config.glslc_path.clone())
    }

    /// Emit SPIR-V debug info (`-g`). On by default in debug builds.
    pub fn with_debug_info(mut self, enabled: bool) -> Self {
        self.debug_info = enabled;
        self
    }

    fn command(&self, source: &ShaderSource, path: &Path) -> Command {
        let mut cmd = Command::new(&self.glslc);
        cmd.arg(format!("-fshader-stage={}", source.stage.glslc_name()))
            .args(["--target-env=vulkan1.3", "-O"]);
        if self.debug_info {
            cmd.arg("-g");
        }
        for (key, value) in &source.defines {
            cmd.arg(format!("-D{}={}", key, value));
        }
        cmd.arg("-I").arg(&self.base_dir);
        cmd.args(["-o", "-"]).arg(path);
        cmd
    }
}

impl ShaderCompiler for GlslcCompiler {
    fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn compile(&self, source: &ShaderSource) -> Result<CompiledArtifact, String> {
        let path = resolve(&self.base_dir, source);
        let output = self
            .command(source, &path)
            .output()
            .map_err(|e| format!("failed to run {}: {}", self.glslc.display(), e))?;

        if !output.status.success() {
            return Err(String::from_utf8_lossy(&output.stderr).into_owned());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            log::warn!("glslc {}: {}", source, stderr.trim());
        }

        let words = spirv_words(&output.stdout)?;
        Ok(CompiledArtifact::new(source.stage, words, path.display().to_string()))
    }
}

/// Reinterpret glslc output as SPIR-V words, checking size and magic number.
pub(crate) fn spirv_words(bytes: &[u8]) -> Result<Vec<u32>, String> {
    if bytes.len() % 4 != 0 {
        return Err(format!("SPIR-V size {} is not a multiple of 4", bytes.len()));
    }
    let words: Vec<u32> = bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();
    match words.first() {
        Some(&SPIRV_MAGIC) => Ok(words),
        Some(other) => Err(format!("invalid SPIR-V magic number {:#010x}", other)),
        None => Err("compiler produced no output".to_string()),
    }
}

/// Find glslc binary: check PATH, then VULKAN_SDK/Bin/
fn find_glslc() -> Option<PathBuf> {
    if let Ok(output) = Command::new("glslc").arg("--version").output() {
        if output.status.success() {
            return Some(PathBuf::from("glslc"));
        }
    }

    if let Ok(sdk) = env::var("VULKAN_SDK") {
        let sdk = PathBuf::from(sdk);
        for candidate in [sdk.join("Bin").join("glslc.exe"), sdk.join("bin").join("glslc")] {
            if candidate.exists() {
                return Some(candidate);
            }
        }
    }

    // Common Windows install path: newest SDK version directory first
    let base_path = Path::new(r"C:\VulkanSDK");
    if base_path.exists() {
        if let Ok(entries) = fs::read_dir(base_path) {
            let mut versions: Vec<_> = entries
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
                .collect();
            versions.sort_by_key(|e| std::cmp::Reverse(e.file_name()));

            for entry in versions {
                let glslc_path = entry.path().join("Bin").join("glslc.exe");
                if glslc_path.exists() {
                    return Some(glslc_path);
                }
            }
        }
    }

    None
}
