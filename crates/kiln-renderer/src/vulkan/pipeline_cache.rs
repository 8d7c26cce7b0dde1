//! On-disk `vk::PipelineCache` so hot-reload rebuilds and restarts skip
//! driver recompilation of unchanged shaders.

use std::fs;
use std::path::{Path, PathBuf};

use ash::vk;

use kiln_common::{KilnError, KilnResult};

/// Identity of the device a cache blob was produced on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheIdentity {
    pub vendor_id: u32,
    pub device_id: u32,
    pub uuid: [u8; vk::UUID_SIZE],
}

impl CacheIdentity {
    pub fn from_properties(props: &vk::PhysicalDeviceProperties) -> Self {
        Self {
            vendor_id: props.vendor_id,
            device_id: props.device_id,
            uuid: props.pipeline_cache_uuid,
        }
    }
}

const HEADER_LEN: usize = 16 + vk::UUID_SIZE;

fn read_u32(data: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

/// Check the `VK_PIPELINE_CACHE_HEADER_VERSION_ONE` header against `identity`.
pub fn validate_header(data: &[u8], identity: &CacheIdentity) -> Result<(), String> {
    if data.len() < HEADER_LEN {
        return Err(format!("truncated header ({} bytes)", data.len()));
    }

    let header_size = read_u32(data, 0) as usize;
    let version = read_u32(data, 4);
    if header_size < HEADER_LEN || version != 1 {
        return Err(format!("unsupported header (size {}, version {})", header_size, version));
    }

    let vendor_id = read_u32(data, 8);
    let device_id = read_u32(data, 12);
    if vendor_id != identity.vendor_id || device_id != identity.device_id {
        return Err(format!(
            "device mismatch (cache {:04x}:{:04x}, current {:04x}:{:04x})",
            vendor_id, device_id, identity.vendor_id, identity.device_id
        ));
    }
    if data[16..HEADER_LEN] != identity.uuid {
        return Err("UUID mismatch".to_string());
    }
    Ok(())
}

/// Read a cache file, discarding it when it belongs to another device or driver.
fn load(path: &Path, identity: &CacheIdentity) -> Option<Vec<u8>> {
    let data = fs::read(path).ok()?;
    match validate_header(&data, identity) {
        Ok(()) => Some(data),
        Err(reason) => {
            log::info!("ignoring pipeline cache {}: {}", path.display(), reason);
            None
        }
    }
}

pub struct PipelineCache {
    device: ash::Device,
    cache: vk::PipelineCache,
    path: Option<PathBuf>,
    loaded_bytes: usize,
}

impl PipelineCache {
    /// Create the cache, seeded from `path` when it holds a compatible blob.
    pub fn new(device: &ash::Device, identity: &CacheIdentity, path: Option<&Path>) -> KilnResult<Self> {
        let initial = path.and_then(|p| load(p, identity));

        let create_info = match initial.as_deref() {
            Some(data) => vk::PipelineCacheCreateInfo::default().initial_data(data),
            None => vk::PipelineCacheCreateInfo::default(),
        };
        let cache = unsafe { device.create_pipeline_cache(&create_info, None) }
            .map_err(|e| KilnError::device("pipeline cache", e))?;

        let loaded_bytes = initial.as_ref().map_or(0, Vec::len);
        if loaded_bytes > 0 {
            log::info!("loaded pipeline cache ({} bytes)", loaded_bytes);
        }

        Ok(Self {
            device: device.clone(),
            cache,
            path: path.map(Path::to_path_buf),
            loaded_bytes,
        })
    }

    pub fn handle(&self) -> vk::PipelineCache {
        self.cache
    }

    pub fn was_loaded_from_disk(&self) -> bool {
        self.loaded_bytes > 0
    }

    /// Write the cache to its file. No-op without a configured path.
    pub fn save(&self) -> KilnResult<()> {
        let Some(path) = self.path.as_deref() else {
            return Ok(());
        };

        let data = unsafe { self.device.get_pipeline_cache_data(self.cache) }
            .map_err(|e| KilnError::device("pipeline cache data", e))?;
        if data.is_empty() {
            return Ok(());
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| KilnError::io(parent, e))?;
        }
        fs::write(path, &data).map_err(|e| KilnError::io(path, e))?;
        log::info!("saved pipeline cache ({} bytes)", data.len());
        Ok(())
    }
}

impl Drop for PipelineCache {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline_cache(self.cache, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> CacheIdentity {
        CacheIdentity {
            vendor_id: 0x10de,
            device_id: 0x2684,
            uuid: [7; vk::UUID_SIZE],
        }
    }

    fn header(identity: &CacheIdentity) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&(HEADER_LEN as u32).to_le_bytes());
        data.extend_from_slice(&1u32.to_le_bytes());
        data.extend_from_slice(&identity.vendor_id.to_le_bytes());
        data.extend_from_slice(&identity.device_id.to_le_bytes());
        data.extend_from_slice(&identity.uuid);
        data.extend_from_slice(&[0xab; 64]);
        data
    }

    #[test]
    fn test_matching_header_accepted() {
        assert!(validate_header(&header(&identity()), &identity()).is_ok());
    }

    #[test]
    fn test_header_fields_are_little_endian() {
        let mut data = vec![16 + vk::UUID_SIZE as u8, 0, 0, 0, 1, 0, 0, 0, 0xde, 0x10, 0, 0, 0x84, 0x26, 0, 0];
        data.extend_from_slice(&[7; vk::UUID_SIZE]);
        assert_eq!(read_u32(&data, 8), 0x10de);
        assert!(validate_header(&data, &identity()).is_ok());
    }

    #[test]
    fn test_device_mismatch_rejected() {
        let mut other = identity();
        other.device_id = 0x1234;
        let err = validate_header(&header(&other), &identity()).unwrap_err();
        assert!(err.contains("device mismatch"));
    }

    #[test]
    fn test_uuid_mismatch_rejected() {
        let mut other = identity();
        other.uuid[3] = 0;
        assert_eq!(validate_header(&header(&other), &identity()).unwrap_err(), "UUID mismatch");
    }

    #[test]
    fn test_truncated_and_bad_version_rejected() {
        assert!(validate_header(&[0; 8], &identity()).is_err());
        let mut data = header(&identity());
        data[4..8].copy_from_slice(&2u32.to_le_bytes());
        assert!(validate_header(&data, &identity()).is_err());
    }

    #[test]
    fn test_load_ignores_foreign_cache() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipelines.bin");
        let mut other = identity();
        other.vendor_id = 0x1002;
        fs::write(&path, header(&other)).unwrap();
        assert!(load(&path, &identity()).is_none());

        fs::write(&path, header(&identity())).unwrap();
        assert_eq!(load(&path, &identity()).map(|d| d.len()), Some(HEADER_LEN + 64));
        assert!(load(&dir.path().join("missing.bin"), &identity()).is_none());
    }
}
