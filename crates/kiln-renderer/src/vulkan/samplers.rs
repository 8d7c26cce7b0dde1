//! Sampler objects for the bindless sampler array.

use ash::vk;

use crate::bindless::{SamplerDesc, SamplerFilter, SamplerReduction};
use kiln_common::{KilnError, KilnResult};

pub struct OwnedSampler {
    device: ash::Device,
    sampler: vk::Sampler,
}

impl OwnedSampler {
    pub fn handle(&self) -> vk::Sampler {
        self.sampler
    }
}

impl Drop for OwnedSampler {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_sampler(self.sampler, None);
        }
    }
}

fn filter_modes(filter: SamplerFilter) -> (vk::Filter, vk::SamplerMipmapMode) {
    match filter {
        SamplerFilter::Nearest => (vk::Filter::NEAREST, vk::SamplerMipmapMode::NEAREST),
        SamplerFilter::Linear => (vk::Filter::LINEAR, vk::SamplerMipmapMode::LINEAR),
    }
}

fn reduction_mode(reduction: SamplerReduction) -> vk::SamplerReductionMode {
    match reduction {
        SamplerReduction::WeightedAverage => vk::SamplerReductionMode::WEIGHTED_AVERAGE,
        SamplerReduction::Min => vk::SamplerReductionMode::MIN,
        SamplerReduction::Max => vk::SamplerReductionMode::MAX,
    }
}

pub fn create_sampler(device: &ash::Device, desc: &SamplerDesc) -> KilnResult<OwnedSampler> {
    let (filter, mipmap_mode) = filter_modes(desc.filter);
    let address_mode = if desc.clamp_to_edge {
        vk::SamplerAddressMode::CLAMP_TO_EDGE
    } else {
        vk::SamplerAddressMode::REPEAT
    };

    let mut reduction_info =
        vk::SamplerReductionModeCreateInfo::default().reduction_mode(reduction_mode(desc.reduction));

    let mut create_info = vk::SamplerCreateInfo::default()
        .mag_filter(filter)
        .min_filter(filter)
        .mipmap_mode(mipmap_mode)
        .address_mode_u(address_mode)
        .address_mode_v(address_mode)
        .address_mode_w(address_mode)
        .compare_enable(false)
        .compare_op(vk::CompareOp::ALWAYS)
        .min_lod(0.0)
        .max_lod(vk::LOD_CLAMP_NONE)
        .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
        .unnormalized_coordinates(false);
    if desc.reduction != SamplerReduction::WeightedAverage {
        create_info = create_info.push_next(&mut reduction_info);
    }

    let sampler = unsafe { device.create_sampler(&create_info, None) }
        .map_err(|e| KilnError::device("sampler", e))?;
    Ok(OwnedSampler {
        device: device.clone(),
        sampler,
    })
}
