#![allow(clippy::too_many_arguments, clippy::type_complexity)]
//! Vulkan rendering support: a bindless resource table and an asynchronous,
//! hot-reloading pipeline build engine.
//!
//! The engine and the table are written against the [`pipeline::PipelineDevice`]
//! and [`bindless::BindlessDevice`] contracts; [`vulkan::VulkanDevice`] is the
//! ash-backed implementation of both.

pub mod bindless;
pub mod pipeline;
pub mod shader;
pub mod vulkan;

#[cfg(test)]
pub(crate) mod test_support;

pub use bindless::{
    BindlessDevice, BindlessTable, BufferHandle, BufferKind, BufferLayout, SamplerDesc, SlotIndex, TextureHandle,
    TextureUsage,
};
pub use kiln_common::{KilnConfig, KilnError, KilnResult, WatchBackend};
pub use pipeline::{PipelineDesc, PipelineDevice, PipelineHandle, PipelineManager, PipelineStats};
pub use shader::{CompiledArtifact, GlslcCompiler, ShaderCompiler, ShaderSource, ShaderStage};
pub use vulkan::{TextureDesc, VulkanDevice, VulkanPipeline};
