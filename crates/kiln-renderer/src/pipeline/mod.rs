//! Pipeline descriptors and the device contract the build engine consumes.

mod manager;

pub use manager::{PipelineManager, PipelineStats};

use ash::vk;

use crate::shader::{CompiledArtifact, ShaderSource, ShaderStage};
use kiln_common::KilnResult;

/// Fixed-function state for a graphics pipeline. Compute pipelines only read
/// `push_constants_size` and `label`.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineDesc {
    pub label: String,
    pub color_formats: Vec<vk::Format>,
    pub depth_format: vk::Format,
    pub topology: vk::PrimitiveTopology,
    pub polygon_mode: vk::PolygonMode,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_compare: vk::CompareOp,
    pub blend: bool,
    pub push_constants_size: u32,
}

impl Default for PipelineDesc {
    fn default() -> Self {
        Self {
            label: String::new(),
            color_formats: vec![vk::Format::B8G8R8A8_UNORM],
            depth_format: vk::Format::UNDEFINED,
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::FRONT,
            front_face: vk::FrontFace::CLOCKWISE,
            depth_test: false,
            depth_write: false,
            depth_compare: vk::CompareOp::GREATER_OR_EQUAL,
            blend: false,
            push_constants_size: 0,
        }
    }
}

impl PipelineDesc {
    pub fn labeled(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Self::default()
        }
    }

    pub fn with_depth(mut self, format: vk::Format, write: bool) -> Self {
        self.depth_format = format;
        self.depth_test = true;
        self.depth_write = write;
        self
    }

    pub fn with_push_constants(mut self, size: u32) -> Self {
        self.push_constants_size = size;
        self
    }
}

/// Stable index of a registration, valid for the manager's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PipelineHandle(pub(crate) u32);

impl PipelineHandle {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Whether a source list describes a compute pipeline: exactly one source,
/// of the compute stage.
pub(crate) fn is_compute(sources: &[ShaderSource]) -> bool {
    matches!(sources, [only] if only.stage == ShaderStage::Compute)
}

/// GPU side of pipeline construction and retirement.
///
/// `queue_deferred_deletion` takes ownership; the device frees the object
/// once `notify_frame_advanced` has been called often enough that no frame in
/// flight can still use it.
pub trait PipelineDevice: Send + Sync + 'static {
    type Layout: Clone + Send + Sync + 'static;
    type Pipeline: Send + 'static;

    fn build_graphics_pipeline(
        &self,
        desc: &PipelineDesc,
        artifacts: &[&CompiledArtifact],
        layout: &Self::Layout,
    ) -> KilnResult<Self::Pipeline>;

    fn build_compute_pipeline(
        &self,
        desc: &PipelineDesc,
        artifact: &CompiledArtifact,
        layout: &Self::Layout,
    ) -> KilnResult<Self::Pipeline>;

    fn queue_deferred_deletion(&self, pipeline: Self::Pipeline);

    fn notify_frame_advanced(&self);
}
