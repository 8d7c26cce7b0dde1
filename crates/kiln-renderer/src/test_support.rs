//! Mocks shared by the unit tests: a counting compiler, pipeline and
//! resource devices that record what they were asked to do, and temporary
//! shader directories with controllable modification times.

use std::collections::HashMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use ash::vk;
use parking_lot::Mutex;
use tempfile::TempDir;

use crate::bindless::{
    ArenaBuffer, BindlessDevice, SamplerDesc, SlotIndex, TableLimits, TextureInfo, TextureSlotKind, TextureUsage,
};
use crate::pipeline::{PipelineDesc, PipelineDevice};
use crate::shader::{CompiledArtifact, ShaderCompiler, ShaderSource, ShaderStage};
use kiln_common::{KilnError, KilnResult};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// ============================================================
// Shader directories
// ============================================================

pub struct ShaderDir {
    dir: TempDir,
}

impl ShaderDir {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Replace `name` with `contents` stamped `secs` after a fixed base time.
    /// The file is staged and renamed into place so pollers never see a
    /// half-written version.
    pub fn write(&self, name: &str, contents: &str, secs: u64) -> SystemTime {
        let stamp = UNIX_EPOCH + Duration::from_secs(1_700_000_000 + secs);
        let staged = self.dir.path().join(format!(".{}.tmp", name.replace('/', "_")));
        fs::write(&staged, contents).expect("write shader");
        File::options()
            .write(true)
            .open(&staged)
            .and_then(|f| f.set_modified(stamp))
            .expect("set mtime");

        let target = self.dir.path().join(name);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).expect("create shader subdir");
        }
        fs::rename(&staged, &target).expect("rename shader");
        stamp
    }
}

// ============================================================
// Compiler
// ============================================================

/// Accepts any readable file unless it contains "syntax error".
pub struct MockCompiler {
    base_dir: PathBuf,
    counts: Mutex<HashMap<ShaderSource, usize>>,
    total: AtomicUsize,
}

impl MockCompiler {
    pub fn new(base_dir: &Path) -> Self {
        Self {
            base_dir: base_dir.to_path_buf(),
            counts: Mutex::new(HashMap::new()),
            total: AtomicUsize::new(0),
        }
    }

    pub fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    pub fn count(&self, source: &ShaderSource) -> usize {
        self.counts.lock().get(source).copied().unwrap_or(0)
    }
}

impl ShaderCompiler for MockCompiler {
    fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn compile(&self, source: &ShaderSource) -> Result<CompiledArtifact, String> {
        self.total.fetch_add(1, Ordering::SeqCst);
        *self.counts.lock().entry(source.clone()).or_insert(0) += 1;

        let path = self.base_dir.join(&source.path);
        let text = fs::read_to_string(&path).map_err(|e| format!("{}: {}", path.display(), e))?;
        if text.contains("syntax error") {
            return Err(format!("{}:2: error: '' : syntax error", source.path.display()));
        }
        Ok(CompiledArtifact::new(
            source.stage,
            vec![0x0723_0203, text.len() as u32],
            source.to_string(),
        ))
    }
}

// ============================================================
// Pipeline device
// ============================================================

#[derive(Debug)]
pub struct MockPipeline {
    pub serial: u32,
    pub label: String,
    pub compute: bool,
    pub stages: Vec<ShaderStage>,
}

#[derive(Default)]
pub struct MockDevice {
    serial: AtomicU32,
    builds: AtomicUsize,
    fail: AtomicBool,
    frames: AtomicUsize,
    deleted: Mutex<Vec<u32>>,
}

impl MockDevice {
    pub fn fail_builds(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Build attempts, successful or not.
    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    /// Serials handed to deferred deletion, in order.
    pub fn deleted(&self) -> Vec<u32> {
        self.deleted.lock().clone()
    }

    pub fn frames(&self) -> usize {
        self.frames.load(Ordering::SeqCst)
    }

    fn build(&self, desc: &PipelineDesc, stages: Vec<ShaderStage>, compute: bool) -> KilnResult<MockPipeline> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(KilnError::device(
                format!("pipeline '{}'", desc.label),
                vk::Result::ERROR_INITIALIZATION_FAILED,
            ));
        }
        Ok(MockPipeline {
            serial: self.serial.fetch_add(1, Ordering::SeqCst),
            label: desc.label.clone(),
            compute,
            stages,
        })
    }
}

impl PipelineDevice for MockDevice {
    type Layout = ();
    type Pipeline = MockPipeline;

    fn build_graphics_pipeline(
        &self,
        desc: &PipelineDesc,
        artifacts: &[&CompiledArtifact],
        _layout: &(),
    ) -> KilnResult<MockPipeline> {
        self.build(desc, artifacts.iter().map(|a| a.stage()).collect(), false)
    }

    fn build_compute_pipeline(&self, desc: &PipelineDesc, artifact: &CompiledArtifact, _layout: &()) -> KilnResult<MockPipeline> {
        self.build(desc, vec![artifact.stage()], true)
    }

    fn queue_deferred_deletion(&self, pipeline: MockPipeline) {
        self.deleted.lock().push(pipeline.serial);
    }

    fn notify_frame_advanced(&self) {
        self.frames.fetch_add(1, Ordering::SeqCst);
    }
}

// ============================================================
// Resource device
// ============================================================

impl ArenaBuffer for Vec<u8> {
    fn capacity(&self) -> u64 {
        self.len() as u64
    }

    fn write(&mut self, offset: u64, bytes: &[u8]) {
        let start = offset as usize;
        self[start..start + bytes.len()].copy_from_slice(bytes);
    }
}

pub struct MockTexture {
    pub info: TextureInfo,
}

impl MockTexture {
    pub fn new(usage: TextureUsage, mip_levels: u32, byte_size: u64) -> Self {
        Self {
            info: TextureInfo {
                usage,
                mip_levels,
                byte_size,
            },
        }
    }
}

#[derive(Debug)]
pub struct MockView {
    pub mip: Option<u32>,
}

#[derive(Default)]
pub struct MockBindless {
    views: AtomicUsize,
    fail_views: AtomicBool,
    texture_writes: Mutex<Vec<(TextureSlotKind, SlotIndex)>>,
    sampler_writes: Mutex<Vec<(SlotIndex, SamplerDesc)>>,
    table_buffers: Mutex<Vec<u64>>,
}

impl MockBindless {
    pub fn fail_views(&self, fail: bool) {
        self.fail_views.store(fail, Ordering::SeqCst);
    }

    pub fn views_created(&self) -> usize {
        self.views.load(Ordering::SeqCst)
    }

    pub fn texture_writes(&self) -> Vec<(TextureSlotKind, SlotIndex)> {
        self.texture_writes.lock().clone()
    }

    pub fn sampler_writes(&self) -> Vec<(SlotIndex, SamplerDesc)> {
        self.sampler_writes.lock().clone()
    }

    /// Capacities of the buffers bound when the table was built.
    pub fn table_buffers(&self) -> Vec<u64> {
        self.table_buffers.lock().clone()
    }
}

impl BindlessDevice for MockBindless {
    type Texture = MockTexture;
    type View = MockView;
    type Sampler = SamplerDesc;
    type Buffer = Vec<u8>;
    type Layouts = TableLimits;
    type Sets = ();

    fn texture_info(&self, texture: &MockTexture) -> TextureInfo {
        texture.info
    }

    fn create_texture_view(&self, _texture: &MockTexture, mip: Option<u32>) -> KilnResult<MockView> {
        if self.fail_views.load(Ordering::SeqCst) {
            return Err(KilnError::device("image view", vk::Result::ERROR_OUT_OF_DEVICE_MEMORY));
        }
        self.views.fetch_add(1, Ordering::SeqCst);
        Ok(MockView { mip })
    }

    fn create_sampler(&self, desc: &SamplerDesc) -> KilnResult<SamplerDesc> {
        Ok(*desc)
    }

    fn create_arena_buffer(&self, capacity: u64, _label: &str) -> KilnResult<Vec<u8>> {
        Ok(vec![0; capacity as usize])
    }

    fn create_binding_table(&self, limits: TableLimits, buffers: &[&Vec<u8>]) -> KilnResult<(TableLimits, ())> {
        *self.table_buffers.lock() = buffers.iter().map(|b| b.len() as u64).collect();
        Ok((limits, ()))
    }

    fn write_texture_slot(&self, _sets: &(), kind: TextureSlotKind, slot: SlotIndex, _view: &MockView) {
        self.texture_writes.lock().push((kind, slot));
    }

    fn write_sampler_slot(&self, _sets: &(), slot: SlotIndex, sampler: &SamplerDesc) {
        self.sampler_writes.lock().push((slot, *sampler));
    }
}
