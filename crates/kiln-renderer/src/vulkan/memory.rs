//! GPU memory through gpu-allocator, handed out as self-releasing objects.
//!
//! Every owned wrapper carries a clone of the `ash::Device` and, for memory,
//! the shared allocator, so dropping it is enough to release it. The
//! `ash::Device` itself must outlive all of them.

use std::sync::Arc;

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc};
use gpu_allocator::MemoryLocation;
use parking_lot::Mutex;

use crate::bindless::{ArenaBuffer, TextureUsage};
use kiln_common::{KilnError, KilnResult};

/// Parameters for [`MemoryManager::create_image`].
#[derive(Debug, Clone)]
pub struct TextureDesc {
    pub label: String,
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub usage: TextureUsage,
    pub mip_levels: u32,
}

impl TextureDesc {
    pub fn new(label: impl Into<String>, width: u32, height: u32, format: vk::Format, usage: TextureUsage) -> Self {
        Self {
            label: label.into(),
            extent: vk::Extent2D { width, height },
            format,
            usage,
            mip_levels: 1,
        }
    }

    /// Full mip chain for the extent.
    pub fn with_full_mip_chain(mut self) -> Self {
        self.mip_levels = mip_chain_length(self.extent);
        self
    }
}

pub fn mip_chain_length(extent: vk::Extent2D) -> u32 {
    32 - extent.width.max(extent.height).max(1).leading_zeros()
}

pub fn is_depth_format(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D16_UNORM
            | vk::Format::D32_SFLOAT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D32_SFLOAT_S8_UINT
    )
}

/// Image plus its memory.
pub struct OwnedImage {
    device: ash::Device,
    allocator: Arc<Mutex<Allocator>>,
    allocation: Option<Allocation>,
    image: vk::Image,
    format: vk::Format,
    extent: vk::Extent2D,
    usage: TextureUsage,
    mip_levels: u32,
    byte_size: u64,
}

impl OwnedImage {
    pub fn handle(&self) -> vk::Image {
        self.image
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn usage(&self) -> TextureUsage {
        self.usage
    }

    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }

    pub fn byte_size(&self) -> u64 {
        self.byte_size
    }
}

impl Drop for OwnedImage {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_image(self.image, None);
        }
        if let Some(allocation) = self.allocation.take() {
            if let Err(e) = self.allocator.lock().free(allocation) {
                log::error!("failed to free image memory: {:?}", e);
            }
        }
    }
}

/// Buffer plus its memory.
pub struct OwnedBuffer {
    device: ash::Device,
    allocator: Arc<Mutex<Allocator>>,
    allocation: Option<Allocation>,
    buffer: vk::Buffer,
    size: vk::DeviceSize,
}

impl OwnedBuffer {
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    pub fn is_mapped(&self) -> bool {
        self.allocation
            .as_ref()
            .is_some_and(|a| a.mapped_ptr().is_some())
    }
}

impl ArenaBuffer for OwnedBuffer {
    fn capacity(&self) -> u64 {
        self.size
    }

    fn write(&mut self, offset: u64, bytes: &[u8]) {
        let Some(mapped) = self.allocation.as_mut().and_then(Allocation::mapped_slice_mut) else {
            log::error!("write to unmapped buffer dropped");
            return;
        };
        let start = offset as usize;
        mapped[start..start + bytes.len()].copy_from_slice(bytes);
    }
}

impl Drop for OwnedBuffer {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_buffer(self.buffer, None);
        }
        if let Some(allocation) = self.allocation.take() {
            if let Err(e) = self.allocator.lock().free(allocation) {
                log::error!("failed to free buffer memory: {:?}", e);
            }
        }
    }
}

pub struct OwnedView {
    device: ash::Device,
    view: vk::ImageView,
}

impl OwnedView {
    pub fn handle(&self) -> vk::ImageView {
        self.view
    }
}

impl Drop for OwnedView {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_image_view(self.view, None);
        }
    }
}

/// gpu-allocator front end.
pub struct MemoryManager {
    allocator: Arc<Mutex<Allocator>>,
    device: ash::Device,
}

impl MemoryManager {
    pub fn new(instance: &ash::Instance, device: &ash::Device, physical_device: vk::PhysicalDevice) -> KilnResult<Self> {
        let mut debug_settings = gpu_allocator::AllocatorDebugSettings::default();
        debug_settings.log_memory_information = cfg!(debug_assertions);
        debug_settings.log_leaks_on_shutdown = true;

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings,
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })
        .map_err(|e| KilnError::device("allocator", e))?;

        Ok(Self {
            allocator: Arc::new(Mutex::new(allocator)),
            device: device.clone(),
        })
    }

    pub fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        name: &str,
    ) -> KilnResult<OwnedBuffer> {
        let buffer_info = vk::BufferCreateInfo::default()
            .size(size.max(1))
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { self.device.create_buffer(&buffer_info, None) }
            .map_err(|e| KilnError::device(format!("buffer '{}'", name), e))?;
        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };

        let allocation = self
            .allocator
            .lock()
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location,
                linear: true,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|e| {
                unsafe { self.device.destroy_buffer(buffer, None) };
                KilnError::device(format!("memory for buffer '{}'", name), e)
            })?;

        let owned = OwnedBuffer {
            device: self.device.clone(),
            allocator: Arc::clone(&self.allocator),
            allocation: Some(allocation),
            buffer,
            size,
        };
        if let Some(allocation) = owned.allocation.as_ref() {
            unsafe {
                self.device
                    .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
            }
            .map_err(|e| KilnError::device(format!("memory binding for buffer '{}'", name), e))?;
        }
        Ok(owned)
    }

    pub fn create_image(&self, desc: &TextureDesc) -> KilnResult<OwnedImage> {
        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(desc.format)
            .extent(vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            })
            .mip_levels(desc.mip_levels.max(1))
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(desc.usage.to_vk())
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { self.device.create_image(&image_info, None) }
            .map_err(|e| KilnError::device(format!("image '{}'", desc.label), e))?;
        let requirements = unsafe { self.device.get_image_memory_requirements(image) };

        let allocation = self
            .allocator
            .lock()
            .allocate(&AllocationCreateDesc {
                name: &desc.label,
                requirements,
                location: MemoryLocation::GpuOnly,
                linear: false,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|e| {
                unsafe { self.device.destroy_image(image, None) };
                KilnError::device(format!("memory for image '{}'", desc.label), e)
            })?;

        let owned = OwnedImage {
            device: self.device.clone(),
            allocator: Arc::clone(&self.allocator),
            byte_size: allocation.size(),
            allocation: Some(allocation),
            image,
            format: desc.format,
            extent: desc.extent,
            usage: desc.usage,
            mip_levels: desc.mip_levels.max(1),
        };
        if let Some(allocation) = owned.allocation.as_ref() {
            unsafe {
                self.device
                    .bind_image_memory(image, allocation.memory(), allocation.offset())
            }
            .map_err(|e| KilnError::device(format!("memory binding for image '{}'", desc.label), e))?;
        }
        Ok(owned)
    }

    /// View of the whole image, or of a single mip level.
    pub fn create_view(&self, image: &OwnedImage, mip: Option<u32>) -> KilnResult<OwnedView> {
        let aspect_mask = if is_depth_format(image.format) {
            vk::ImageAspectFlags::DEPTH
        } else {
            vk::ImageAspectFlags::COLOR
        };
        let (base_mip_level, level_count) = match mip {
            Some(level) => (level, 1),
            None => (0, image.mip_levels),
        };

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image.image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(image.format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask,
                base_mip_level,
                level_count,
                base_array_layer: 0,
                layer_count: 1,
            });

        let view = unsafe { self.device.create_image_view(&view_info, None) }
            .map_err(|e| KilnError::device("image view", e))?;
        Ok(OwnedView {
            device: self.device.clone(),
            view,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mip_chain_length() {
        assert_eq!(mip_chain_length(vk::Extent2D { width: 1, height: 1 }), 1);
        assert_eq!(mip_chain_length(vk::Extent2D { width: 256, height: 256 }), 9);
        assert_eq!(mip_chain_length(vk::Extent2D { width: 1920, height: 1080 }), 11);
        assert_eq!(mip_chain_length(vk::Extent2D { width: 0, height: 0 }), 1);
    }

    #[test]
    fn test_depth_formats() {
        assert!(is_depth_format(vk::Format::D32_SFLOAT));
        assert!(is_depth_format(vk::Format::D24_UNORM_S8_UINT));
        assert!(!is_depth_format(vk::Format::R8G8B8A8_UNORM));
    }

    #[test]
    fn test_texture_desc_full_chain() {
        let desc = TextureDesc::new("hzb", 512, 128, vk::Format::R32_SFLOAT, TextureUsage::SAMPLED | TextureUsage::STORAGE)
            .with_full_mip_chain();
        assert_eq!(desc.mip_levels, 10);
    }
}
