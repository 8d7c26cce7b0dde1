//! Descriptor layouts, pool and sets backing the bindless table.

use ash::vk;

use super::memory::{OwnedBuffer, OwnedView};
use super::samplers::OwnedSampler;
use crate::bindless::{
    SlotIndex, TableLimits, TextureSlotKind, BUFFERS_SET, SAMPLER_BINDING, STORAGE_IMAGE_BINDING,
    TEXTURES_SET, TEXTURE_BINDING,
};
use kiln_common::{KilnError, KilnResult};

const SET_COUNT: usize = 2;

/// Set layouts of the table, in set order. Also the layout input for every
/// pipeline built against the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindlessLayouts {
    pub sets: [vk::DescriptorSetLayout; SET_COUNT],
}

const BINDLESS_FLAGS: vk::DescriptorBindingFlags = vk::DescriptorBindingFlags::from_raw(
    vk::DescriptorBindingFlags::PARTIALLY_BOUND.as_raw() | vk::DescriptorBindingFlags::UPDATE_AFTER_BIND.as_raw(),
);

fn texture_bindings(limits: TableLimits) -> [vk::DescriptorSetLayoutBinding<'static>; 3] {
    [
        vk::DescriptorSetLayoutBinding::default()
            .binding(TEXTURE_BINDING)
            .descriptor_type(vk::DescriptorType::SAMPLED_IMAGE)
            .descriptor_count(limits.max_textures)
            .stage_flags(vk::ShaderStageFlags::ALL),
        vk::DescriptorSetLayoutBinding::default()
            .binding(STORAGE_IMAGE_BINDING)
            .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
            .descriptor_count(limits.max_textures)
            .stage_flags(vk::ShaderStageFlags::ALL),
        vk::DescriptorSetLayoutBinding::default()
            .binding(SAMPLER_BINDING)
            .descriptor_type(vk::DescriptorType::SAMPLER)
            .descriptor_count(limits.max_samplers)
            .stage_flags(vk::ShaderStageFlags::ALL),
    ]
}

fn buffer_bindings(count: usize) -> Vec<vk::DescriptorSetLayoutBinding<'static>> {
    (0..count as u32)
        .map(|binding| {
            vk::DescriptorSetLayoutBinding::default()
                .binding(binding)
                .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::ALL)
        })
        .collect()
}

fn pool_sizes(limits: TableLimits, buffer_count: usize) -> [vk::DescriptorPoolSize; 4] {
    [
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::SAMPLED_IMAGE,
            descriptor_count: limits.max_textures,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::STORAGE_IMAGE,
            descriptor_count: limits.max_textures,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::SAMPLER,
            descriptor_count: limits.max_samplers,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::STORAGE_BUFFER,
            descriptor_count: (buffer_count as u32).max(1),
        },
    ]
}

/// Owns the pool and both layouts; dropping it frees the sets.
pub struct DescriptorTable {
    device: ash::Device,
    pool: vk::DescriptorPool,
    layouts: BindlessLayouts,
    sets: [vk::DescriptorSet; SET_COUNT],
}

impl DescriptorTable {
    pub fn new(device: &ash::Device, limits: TableLimits, buffers: &[&OwnedBuffer]) -> KilnResult<Self> {
        let mut table = Self {
            device: device.clone(),
            pool: vk::DescriptorPool::null(),
            layouts: BindlessLayouts {
                sets: [vk::DescriptorSetLayout::null(); SET_COUNT],
            },
            sets: [vk::DescriptorSet::null(); SET_COUNT],
        };

        // Partially built tables are released by Drop on the error path.
        let textures = texture_bindings(limits);
        let texture_flags = [BINDLESS_FLAGS; 3];
        let mut texture_flags_info =
            vk::DescriptorSetLayoutBindingFlagsCreateInfo::default().binding_flags(&texture_flags);
        let texture_layout_info = vk::DescriptorSetLayoutCreateInfo::default()
            .bindings(&textures)
            .flags(vk::DescriptorSetLayoutCreateFlags::UPDATE_AFTER_BIND_POOL)
            .push_next(&mut texture_flags_info);
        table.layouts.sets[TEXTURES_SET as usize] =
            unsafe { device.create_descriptor_set_layout(&texture_layout_info, None) }
                .map_err(|e| KilnError::device("bindless texture set layout", e))?;

        let buffer_layout = buffer_bindings(buffers.len());
        let buffer_layout_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&buffer_layout);
        table.layouts.sets[BUFFERS_SET as usize] =
            unsafe { device.create_descriptor_set_layout(&buffer_layout_info, None) }
                .map_err(|e| KilnError::device("bindless buffer set layout", e))?;

        let sizes = pool_sizes(limits, buffers.len());
        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .pool_sizes(&sizes)
            .max_sets(SET_COUNT as u32)
            .flags(vk::DescriptorPoolCreateFlags::UPDATE_AFTER_BIND);
        table.pool = unsafe { device.create_descriptor_pool(&pool_info, None) }
            .map_err(|e| KilnError::device("bindless descriptor pool", e))?;

        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(table.pool)
            .set_layouts(&table.layouts.sets);
        let sets = unsafe { device.allocate_descriptor_sets(&alloc_info) }
            .map_err(|e| KilnError::device("bindless descriptor sets", e))?;
        table.sets.copy_from_slice(&sets[..SET_COUNT]);

        let buffer_infos: Vec<vk::DescriptorBufferInfo> = buffers
            .iter()
            .map(|buffer| {
                vk::DescriptorBufferInfo::default()
                    .buffer(buffer.handle())
                    .offset(0)
                    .range(vk::WHOLE_SIZE)
            })
            .collect();
        let writes: Vec<vk::WriteDescriptorSet> = buffer_infos
            .iter()
            .enumerate()
            .map(|(binding, info)| {
                vk::WriteDescriptorSet::default()
                    .dst_set(table.sets[BUFFERS_SET as usize])
                    .dst_binding(binding as u32)
                    .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                    .buffer_info(std::slice::from_ref(info))
            })
            .collect();
        if !writes.is_empty() {
            unsafe { device.update_descriptor_sets(&writes, &[]) };
        }

        Ok(table)
    }

    pub fn layouts(&self) -> BindlessLayouts {
        self.layouts
    }

    /// Sets in set order, ready for `cmd_bind_descriptor_sets`.
    pub fn sets(&self) -> [vk::DescriptorSet; SET_COUNT] {
        self.sets
    }

    pub fn write_texture(&self, kind: TextureSlotKind, slot: SlotIndex, view: &OwnedView) {
        let (descriptor_type, image_layout) = match kind {
            TextureSlotKind::Sampled => (vk::DescriptorType::SAMPLED_IMAGE, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL),
            TextureSlotKind::Storage => (vk::DescriptorType::STORAGE_IMAGE, vk::ImageLayout::GENERAL),
        };
        let info = vk::DescriptorImageInfo::default()
            .image_view(view.handle())
            .image_layout(image_layout);
        let write = vk::WriteDescriptorSet::default()
            .dst_set(self.sets[TEXTURES_SET as usize])
            .dst_binding(kind.binding())
            .dst_array_element(slot.0)
            .descriptor_type(descriptor_type)
            .image_info(std::slice::from_ref(&info));
        unsafe { self.device.update_descriptor_sets(&[write], &[]) };
    }

    pub fn write_sampler(&self, slot: SlotIndex, sampler: &OwnedSampler) {
        let info = vk::DescriptorImageInfo::default().sampler(sampler.handle());
        let write = vk::WriteDescriptorSet::default()
            .dst_set(self.sets[TEXTURES_SET as usize])
            .dst_binding(SAMPLER_BINDING)
            .dst_array_element(slot.0)
            .descriptor_type(vk::DescriptorType::SAMPLER)
            .image_info(std::slice::from_ref(&info));
        unsafe { self.device.update_descriptor_sets(&[write], &[]) };
    }
}

impl Drop for DescriptorTable {
    fn drop(&mut self) {
        unsafe {
            if self.pool != vk::DescriptorPool::null() {
                self.device.destroy_descriptor_pool(self.pool, None);
            }
            for layout in self.layouts.sets {
                if layout != vk::DescriptorSetLayout::null() {
                    self.device.destroy_descriptor_set_layout(layout, None);
                }
            }
        }
    }
}
