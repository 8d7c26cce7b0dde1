//! Bindless resource table.
//!
//! Textures, storage images and samplers live in large fixed-size descriptor
//! arrays in set 0; typed structured data lives in one append-only storage
//! buffer per declared kind in set 1. Shaders address everything by integer
//! index, so a pipeline binds the two sets once per frame.
//!
//! Shader layout (see [`SHADER_LAYOUT_GLSL`]):
//! - set 0, binding 0: sampled image array (`max_textures`)
//! - set 0, binding 1: storage image array (`max_textures`)
//! - set 0, binding 2: sampler array (`max_samplers`); slot 0 linear, slot 1 linear min-reduction
//! - set 1, binding N: storage buffer for the N-th declared buffer kind

mod arena;
mod table;

pub use arena::BufferArena;
pub use table::{BindlessTable, BufferHandle, BufferKind, BufferLayout, MipHandle, TextureHandle};

use ash::vk;
use bitflags::bitflags;

use kiln_common::KilnResult;

/// Index into one of the shader-visible slot arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotIndex(pub u32);

impl SlotIndex {
    /// Marks a slot kind the resource was not bound to.
    pub const INVALID: Self = Self(u32::MAX);

    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

impl Default for SlotIndex {
    fn default() -> Self {
        Self::INVALID
    }
}

bitflags! {
    /// Declared usage of a texture.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TextureUsage: u32 {
        const TRANSFER_SRC = 1 << 0;
        const TRANSFER_DST = 1 << 1;
        const SAMPLED = 1 << 2;
        const STORAGE = 1 << 3;
        const COLOR_ATTACHMENT = 1 << 4;
        const DEPTH_STENCIL_ATTACHMENT = 1 << 5;
    }
}

impl TextureUsage {
    pub fn to_vk(self) -> vk::ImageUsageFlags {
        let mut flags = vk::ImageUsageFlags::empty();
        if self.contains(Self::TRANSFER_SRC) {
            flags |= vk::ImageUsageFlags::TRANSFER_SRC;
        }
        if self.contains(Self::TRANSFER_DST) {
            flags |= vk::ImageUsageFlags::TRANSFER_DST;
        }
        if self.contains(Self::SAMPLED) {
            flags |= vk::ImageUsageFlags::SAMPLED;
        }
        if self.contains(Self::STORAGE) {
            flags |= vk::ImageUsageFlags::STORAGE;
        }
        if self.contains(Self::COLOR_ATTACHMENT) {
            flags |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
        }
        if self.contains(Self::DEPTH_STENCIL_ATTACHMENT) {
            flags |= vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
        }
        flags
    }
}

/// What the table needs to know about a texture it adopts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureInfo {
    pub usage: TextureUsage,
    pub mip_levels: u32,
    /// Size of the backing allocation.
    pub byte_size: u64,
}

/// Which slot array a texture write targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureSlotKind {
    Sampled,
    Storage,
}

impl TextureSlotKind {
    pub fn binding(self) -> u32 {
        match self {
            Self::Sampled => TEXTURE_BINDING,
            Self::Storage => STORAGE_IMAGE_BINDING,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SamplerFilter {
    Nearest,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SamplerReduction {
    WeightedAverage,
    Min,
    Max,
}

/// Sampler creation parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SamplerDesc {
    pub filter: SamplerFilter,
    pub reduction: SamplerReduction,
    pub clamp_to_edge: bool,
}

impl SamplerDesc {
    pub const LINEAR: Self = Self {
        filter: SamplerFilter::Linear,
        reduction: SamplerReduction::WeightedAverage,
        clamp_to_edge: false,
    };

    /// Min-reduction sampler used for depth pyramid downsampling.
    pub const LINEAR_MIN: Self = Self {
        filter: SamplerFilter::Linear,
        reduction: SamplerReduction::Min,
        clamp_to_edge: true,
    };

    pub const NEAREST: Self = Self {
        filter: SamplerFilter::Nearest,
        reduction: SamplerReduction::WeightedAverage,
        clamp_to_edge: false,
    };
}

/// Sizes of the set 0 arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableLimits {
    pub max_textures: u32,
    pub max_samplers: u32,
}

pub const TEXTURES_SET: u32 = 0;
pub const BUFFERS_SET: u32 = 1;
pub const TEXTURE_BINDING: u32 = 0;
pub const STORAGE_IMAGE_BINDING: u32 = 1;
pub const SAMPLER_BINDING: u32 = 2;

pub const LINEAR_SAMPLER: SlotIndex = SlotIndex(0);
pub const LINEAR_MIN_SAMPLER: SlotIndex = SlotIndex(1);

/// Host-visible storage buffer backing a [`BufferArena`].
pub trait ArenaBuffer {
    fn capacity(&self) -> u64;

    /// Copy `bytes` to `offset`. The arena guarantees the range is in bounds.
    fn write(&mut self, offset: u64, bytes: &[u8]);
}

/// Resource half of the device contract.
///
/// Created objects are owned values that release themselves when dropped.
pub trait BindlessDevice {
    type Texture;
    type View;
    type Sampler;
    type Buffer: ArenaBuffer;
    /// Descriptor set layouts, indexed by set.
    type Layouts: Clone;
    /// Descriptor sets, indexed by set.
    type Sets: Clone;

    fn texture_info(&self, texture: &Self::Texture) -> TextureInfo;

    /// View of the whole texture, or of one mip level.
    fn create_texture_view(&self, texture: &Self::Texture, mip: Option<u32>) -> KilnResult<Self::View>;

    fn create_sampler(&self, desc: &SamplerDesc) -> KilnResult<Self::Sampler>;

    fn create_arena_buffer(&self, capacity: u64, label: &str) -> KilnResult<Self::Buffer>;

    /// Build both sets and bind every arena buffer to its set 1 binding.
    fn create_binding_table(
        &self,
        limits: TableLimits,
        buffers: &[&Self::Buffer],
    ) -> KilnResult<(Self::Layouts, Self::Sets)>;

    fn write_texture_slot(&self, sets: &Self::Sets, kind: TextureSlotKind, slot: SlotIndex, view: &Self::View);

    fn write_sampler_slot(&self, sets: &Self::Sets, slot: SlotIndex, sampler: &Self::Sampler);
}

/// GLSL declarations matching the table layout.
pub const SHADER_LAYOUT_GLSL: &str = r#"
#extension GL_EXT_nonuniform_qualifier : require

layout(set = 0, binding = 0) uniform texture2D u_textures[];
layout(set = 0, binding = 1, rgba16f) uniform image2D u_images[];
layout(set = 0, binding = 2) uniform sampler u_samplers[];

#define LINEAR_SAMPLER 0
#define LINEAR_MIN_SAMPLER 1

vec4 sample_bindless(uint texture_index, uint sampler_index, vec2 uv) {
    return texture(sampler2D(u_textures[nonuniformEXT(texture_index)],
                             u_samplers[nonuniformEXT(sampler_index)]), uv);
}

// Buffer kinds are declared per application:
// layout(set = 1, binding = N) readonly buffer KindN { T items[]; } u_kindN;
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_index_sentinel() {
        assert!(!SlotIndex::INVALID.is_valid());
        assert!(!SlotIndex::default().is_valid());
        assert!(SlotIndex(0).is_valid());
    }

    #[test]
    fn test_usage_to_vk() {
        let usage = TextureUsage::SAMPLED | TextureUsage::STORAGE | TextureUsage::TRANSFER_DST;
        let flags = usage.to_vk();
        assert!(flags.contains(vk::ImageUsageFlags::SAMPLED));
        assert!(flags.contains(vk::ImageUsageFlags::STORAGE));
        assert!(flags.contains(vk::ImageUsageFlags::TRANSFER_DST));
        assert!(!flags.contains(vk::ImageUsageFlags::COLOR_ATTACHMENT));
    }

    #[test]
    fn test_slot_kind_bindings() {
        assert_eq!(TextureSlotKind::Sampled.binding(), 0);
        assert_eq!(TextureSlotKind::Storage.binding(), 1);
        assert_eq!(SAMPLER_BINDING, 2);
    }
}
