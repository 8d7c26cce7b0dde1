//! ash-backed device for the pipeline engine and the bindless table.
//!
//! Instance and device bootstrap stay with the embedder: [`VulkanDevice`]
//! adopts an existing `ash::Device` (Vulkan 1.3 with dynamic rendering,
//! descriptor indexing and sampler min/max reduction enabled) and owns only
//! what it creates on top of it. The embedder destroys the device after
//! dropping every kiln object.

mod descriptors;
mod memory;
mod pipeline;
mod pipeline_cache;
mod retire;
mod samplers;

pub use descriptors::{BindlessLayouts, DescriptorTable};
pub use memory::{is_depth_format, mip_chain_length, MemoryManager, OwnedBuffer, OwnedImage, OwnedView, TextureDesc};
pub use pipeline::VulkanPipeline;
pub use pipeline_cache::{validate_header, CacheIdentity, PipelineCache};
pub use retire::RetireRing;
pub use samplers::OwnedSampler;

use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use parking_lot::Mutex;

use crate::bindless::{BindlessDevice, SamplerDesc, SlotIndex, TableLimits, TextureInfo, TextureSlotKind};
use crate::pipeline::{PipelineDesc, PipelineDevice};
use crate::shader::CompiledArtifact;
use kiln_common::{KilnConfig, KilnError, KilnResult};

pub struct VulkanDevice {
    device: ash::Device,
    physical_device: vk::PhysicalDevice,
    retired: Mutex<RetireRing<VulkanPipeline>>,
    pipeline_cache: PipelineCache,
    memory: MemoryManager,
}

impl VulkanDevice {
    pub fn new(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        device: ash::Device,
        config: &KilnConfig,
    ) -> KilnResult<Self> {
        config.validate()?;

        let props = unsafe { instance.get_physical_device_properties(physical_device) };
        let identity = CacheIdentity::from_properties(&props);
        let pipeline_cache = PipelineCache::new(&device, &identity, config.pipeline_cache_path.as_deref())?;
        let memory = MemoryManager::new(instance, &device, physical_device)?;

        log::debug!(
            "vulkan device ready: vendor {:04x} device {:04x}, {} frames in flight",
            props.vendor_id,
            props.device_id,
            config.frames_in_flight
        );

        Ok(Self {
            device,
            physical_device,
            retired: Mutex::new(RetireRing::new(config.frames_in_flight)),
            pipeline_cache,
            memory,
        })
    }

    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub fn memory(&self) -> &MemoryManager {
        &self.memory
    }

    /// Allocate a device-local 2D texture.
    pub fn create_texture(&self, desc: &TextureDesc) -> KilnResult<OwnedImage> {
        self.memory.create_image(desc)
    }

    /// Persist the pipeline cache to the configured path.
    pub fn save_pipeline_cache(&self) -> KilnResult<()> {
        self.pipeline_cache.save()
    }

    /// Pipelines waiting for their frames to retire.
    pub fn retired_pipelines(&self) -> usize {
        self.retired.lock().pending()
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        if let Err(e) = unsafe { self.device.device_wait_idle() } {
            log::error!("device_wait_idle failed during shutdown: {:?}", e);
        }
        self.retired.lock().drain();
        if let Err(e) = self.pipeline_cache.save() {
            log::warn!("{}", e);
        }
    }
}

impl PipelineDevice for VulkanDevice {
    type Layout = BindlessLayouts;
    type Pipeline = VulkanPipeline;

    fn build_graphics_pipeline(
        &self,
        desc: &PipelineDesc,
        artifacts: &[&CompiledArtifact],
        layout: &BindlessLayouts,
    ) -> KilnResult<VulkanPipeline> {
        pipeline::build_graphics(&self.device, self.pipeline_cache.handle(), desc, artifacts, layout)
    }

    fn build_compute_pipeline(
        &self,
        desc: &PipelineDesc,
        artifact: &CompiledArtifact,
        layout: &BindlessLayouts,
    ) -> KilnResult<VulkanPipeline> {
        pipeline::build_compute(&self.device, self.pipeline_cache.handle(), desc, artifact, layout)
    }

    fn queue_deferred_deletion(&self, pipeline: VulkanPipeline) {
        self.retired.lock().push(pipeline);
    }

    fn notify_frame_advanced(&self) {
        let freed = self.retired.lock().advance();
        if freed > 0 {
            log::debug!("freed {} retired pipeline(s)", freed);
        }
    }
}

impl BindlessDevice for VulkanDevice {
    type Texture = OwnedImage;
    type View = OwnedView;
    type Sampler = OwnedSampler;
    type Buffer = OwnedBuffer;
    type Layouts = BindlessLayouts;
    type Sets = Arc<DescriptorTable>;

    fn texture_info(&self, texture: &OwnedImage) -> TextureInfo {
        TextureInfo {
            usage: texture.usage(),
            mip_levels: texture.mip_levels(),
            byte_size: texture.byte_size(),
        }
    }

    fn create_texture_view(&self, texture: &OwnedImage, mip: Option<u32>) -> KilnResult<OwnedView> {
        self.memory.create_view(texture, mip)
    }

    fn create_sampler(&self, desc: &SamplerDesc) -> KilnResult<OwnedSampler> {
        samplers::create_sampler(&self.device, desc)
    }

    fn create_arena_buffer(&self, capacity: u64, label: &str) -> KilnResult<OwnedBuffer> {
        let buffer = self.memory.create_buffer(
            capacity,
            vk::BufferUsageFlags::STORAGE_BUFFER,
            MemoryLocation::CpuToGpu,
            label,
        )?;
        if !buffer.is_mapped() {
            return Err(KilnError::device(
                format!("buffer '{}'", label),
                "storage buffer memory is not host mappable",
            ));
        }
        Ok(buffer)
    }

    fn create_binding_table(
        &self,
        limits: TableLimits,
        buffers: &[&OwnedBuffer],
    ) -> KilnResult<(BindlessLayouts, Arc<DescriptorTable>)> {
        let table = DescriptorTable::new(&self.device, limits, buffers)?;
        Ok((table.layouts(), Arc::new(table)))
    }

    fn write_texture_slot(&self, sets: &Arc<DescriptorTable>, kind: TextureSlotKind, slot: SlotIndex, view: &OwnedView) {
        sets.write_texture(kind, slot, view);
    }

    fn write_sampler_slot(&self, sets: &Arc<DescriptorTable>, slot: SlotIndex, sampler: &OwnedSampler) {
        sets.write_sampler(slot, sampler);
    }
}
