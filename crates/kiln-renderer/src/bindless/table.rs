//! Slot allocation and buffer arenas behind the bindless descriptor sets.

use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::sync::Arc;

use bytemuck::Pod;

use super::{
    BindlessDevice, BufferArena, SamplerDesc, SlotIndex, TableLimits, TextureSlotKind, TextureUsage,
};
use kiln_common::{KilnConfig, KilnError, KilnResult};

struct KindDecl {
    label: String,
    elem_size: u64,
    capacity: u64,
}

/// Buffer kinds declared before the table is built; each becomes one set 1
/// binding in declaration order.
#[derive(Default)]
pub struct BufferLayout {
    kinds: Vec<KindDecl>,
}

impl BufferLayout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a kind holding up to `capacity` elements of `T`.
    pub fn declare<T: Pod>(&mut self, label: impl Into<String>, capacity: u64) -> BufferKind<T> {
        let index = self.kinds.len() as u32;
        self.kinds.push(KindDecl {
            label: label.into(),
            elem_size: mem::size_of::<T>().max(1) as u64,
            capacity,
        });
        BufferKind {
            index,
            _marker: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}

/// Typed token for a declared buffer kind.
pub struct BufferKind<T> {
    index: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> BufferKind<T> {
    pub fn index(self) -> u32 {
        self.index
    }

    /// Binding of this kind's storage buffer in set 1.
    pub fn binding(self) -> u32 {
        self.index
    }
}

impl<T> Clone for BufferKind<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for BufferKind<T> {}

impl<T> fmt::Debug for BufferKind<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BufferKind<{}>({})", std::any::type_name::<T>(), self.index)
    }
}

/// Element index of an entry inside its kind's buffer.
pub struct BufferHandle<T> {
    index: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> BufferHandle<T> {
    pub fn index(self) -> u32 {
        self.index
    }
}

impl<T> Clone for BufferHandle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for BufferHandle<T> {}

impl<T> PartialEq for BufferHandle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl<T> Eq for BufferHandle<T> {}

impl<T> fmt::Debug for BufferHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BufferHandle({})", self.index)
    }
}

/// Slots of a single mip level.
pub struct MipHandle<V> {
    pub view: Arc<V>,
    pub sampled: SlotIndex,
    pub storage: SlotIndex,
}

impl<V> Clone for MipHandle<V> {
    fn clone(&self) -> Self {
        Self {
            view: Arc::clone(&self.view),
            sampled: self.sampled,
            storage: self.storage,
        }
    }
}

/// A texture registered in the table. Slot kinds the texture's usage does not
/// allow are [`SlotIndex::INVALID`]; `mips` is empty unless per-mip slots were
/// requested.
pub struct TextureHandle<V> {
    pub view: Arc<V>,
    pub sampled: SlotIndex,
    pub storage: SlotIndex,
    pub mips: Vec<MipHandle<V>>,
}

impl<V: fmt::Debug> fmt::Debug for MipHandle<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MipHandle")
            .field("view", &self.view)
            .field("sampled", &self.sampled)
            .field("storage", &self.storage)
            .finish()
    }
}

impl<V: fmt::Debug> fmt::Debug for TextureHandle<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TextureHandle")
            .field("view", &self.view)
            .field("sampled", &self.sampled)
            .field("storage", &self.storage)
            .field("mips", &self.mips)
            .finish()
    }
}

impl<V> Clone for TextureHandle<V> {
    fn clone(&self) -> Self {
        Self {
            view: Arc::clone(&self.view),
            sampled: self.sampled,
            storage: self.storage,
            mips: self.mips.clone(),
        }
    }
}

/// Monotonic slot counter. Slots are never freed.
struct SlotCounter {
    name: &'static str,
    next: u32,
    capacity: u32,
}

impl SlotCounter {
    fn new(name: &'static str, capacity: u32) -> Self {
        Self {
            name,
            next: 0,
            capacity,
        }
    }

    fn ensure(&self, count: u32) -> KilnResult<()> {
        let remaining = self.capacity - self.next;
        if count > remaining {
            return Err(KilnError::capacity(
                format!("{} slots", self.name),
                remaining as u64,
                count as u64,
            ));
        }
        Ok(())
    }

    /// Callers `ensure` first.
    fn take(&mut self) -> SlotIndex {
        let slot = SlotIndex(self.next);
        self.next += 1;
        slot
    }
}

/// Bindless table over a [`BindlessDevice`].
///
/// Single writer: registration takes `&mut self`. Views, textures and
/// samplers stay alive for the table's lifetime because their slots are
/// never reused.
pub struct BindlessTable<D: BindlessDevice> {
    device: Arc<D>,
    layouts: D::Layouts,
    sets: D::Sets,
    arenas: Vec<BufferArena<D::Buffer>>,
    elem_sizes: Vec<u64>,
    views: Vec<Arc<D::View>>,
    textures: Vec<D::Texture>,
    samplers: Vec<D::Sampler>,
    sampled_slots: SlotCounter,
    storage_slots: SlotCounter,
    sampler_slots: SlotCounter,
    texture_memory: u64,
}

impl<D: BindlessDevice> BindlessTable<D> {
    /// Allocate the arenas, build both descriptor sets and install the
    /// built-in samplers.
    pub fn new(device: Arc<D>, config: &KilnConfig, layout: BufferLayout) -> KilnResult<Self> {
        config.validate()?;

        let mut arenas = Vec::with_capacity(layout.kinds.len());
        let mut elem_sizes = Vec::with_capacity(layout.kinds.len());
        for kind in &layout.kinds {
            let bytes = kind
                .elem_size
                .checked_mul(kind.capacity)
                .ok_or_else(|| KilnError::Config(format!("buffer kind '{}' is too large", kind.label)))?;
            let buffer = device.create_arena_buffer(bytes, &kind.label)?;
            arenas.push(BufferArena::new(buffer, format!("buffer arena '{}'", kind.label)));
            elem_sizes.push(kind.elem_size);
        }

        let limits = TableLimits {
            max_textures: config.max_textures,
            max_samplers: config.max_samplers,
        };
        let (layouts, sets) = {
            let buffers: Vec<&D::Buffer> = arenas.iter().map(BufferArena::buffer).collect();
            device.create_binding_table(limits, &buffers)?
        };

        let mut table = Self {
            device,
            layouts,
            sets,
            arenas,
            elem_sizes,
            views: Vec::new(),
            textures: Vec::new(),
            samplers: Vec::new(),
            sampled_slots: SlotCounter::new("sampled texture", limits.max_textures),
            storage_slots: SlotCounter::new("storage image", limits.max_textures),
            sampler_slots: SlotCounter::new("sampler", limits.max_samplers),
            texture_memory: 0,
        };

        table.add_sampler(&SamplerDesc::LINEAR)?;
        table.add_sampler(&SamplerDesc::LINEAR_MIN)?;

        log::debug!(
            "bindless table ready: {} textures, {} samplers, {} buffer kind(s)",
            limits.max_textures,
            limits.max_samplers,
            table.arenas.len()
        );
        Ok(table)
    }

    /// Adopt `texture` and bind it to the slot arrays its usage allows.
    ///
    /// With `per_mip`, every mip level additionally gets its own view and
    /// slots. Capacity for all of them is checked before anything is created,
    /// so a failed call consumes no slot.
    pub fn add_texture(&mut self, texture: D::Texture, per_mip: bool) -> KilnResult<TextureHandle<D::View>> {
        let info = self.device.texture_info(&texture);
        let sampled = info.usage.contains(TextureUsage::SAMPLED);
        let storage = info.usage.contains(TextureUsage::STORAGE);
        if !sampled && !storage {
            return Err(KilnError::Usage(format!(
                "texture usage {:?} allows neither sampled nor storage access",
                info.usage
            )));
        }

        let mip_count = if per_mip { info.mip_levels } else { 0 };
        let needed = 1 + mip_count;
        if sampled {
            self.sampled_slots.ensure(needed)?;
        }
        if storage {
            self.storage_slots.ensure(needed)?;
        }

        let view = Arc::new(self.device.create_texture_view(&texture, None)?);
        let mut mip_views = Vec::with_capacity(mip_count as usize);
        for mip in 0..mip_count {
            mip_views.push(Arc::new(self.device.create_texture_view(&texture, Some(mip))?));
        }

        let (sampled_slot, storage_slot) = self.bind_view(&view, sampled, storage);
        let mips = mip_views
            .into_iter()
            .map(|view| {
                let (mip_sampled, mip_storage) = self.bind_view(&view, sampled, storage);
                MipHandle {
                    view,
                    sampled: mip_sampled,
                    storage: mip_storage,
                }
            })
            .collect();

        self.texture_memory += info.byte_size;
        self.textures.push(texture);

        Ok(TextureHandle {
            view,
            sampled: sampled_slot,
            storage: storage_slot,
            mips,
        })
    }

    fn bind_view(&mut self, view: &Arc<D::View>, sampled: bool, storage: bool) -> (SlotIndex, SlotIndex) {
        let mut slots = (SlotIndex::INVALID, SlotIndex::INVALID);
        if sampled {
            slots.0 = self.sampled_slots.take();
            self.device
                .write_texture_slot(&self.sets, TextureSlotKind::Sampled, slots.0, view);
        }
        if storage {
            slots.1 = self.storage_slots.take();
            self.device
                .write_texture_slot(&self.sets, TextureSlotKind::Storage, slots.1, view);
        }
        self.views.push(Arc::clone(view));
        slots
    }

    /// Create a sampler and bind it to the next sampler slot.
    pub fn add_sampler(&mut self, desc: &SamplerDesc) -> KilnResult<SlotIndex> {
        self.sampler_slots.ensure(1)?;
        let sampler = self.device.create_sampler(desc)?;
        let slot = self.sampler_slots.take();
        self.device.write_sampler_slot(&self.sets, slot, &sampler);
        self.samplers.push(sampler);
        Ok(slot)
    }

    /// Append `value` to the buffer of `kind`, returning its element index.
    pub fn add_buffer_entry<T: Pod>(&mut self, kind: BufferKind<T>, value: &T) -> KilnResult<BufferHandle<T>> {
        let elem_size = mem::size_of::<T>().max(1) as u64;
        match self.elem_sizes.get(kind.index as usize) {
            Some(&size) if size == elem_size => {}
            Some(&size) => {
                return Err(KilnError::Usage(format!(
                    "buffer kind {} holds {}-byte elements, got {}",
                    kind.index, size, elem_size
                )))
            }
            None => return Err(KilnError::Usage(format!("unknown buffer kind {}", kind.index))),
        }

        let offset = self.arenas[kind.index as usize].append(bytemuck::bytes_of(value))?;
        Ok(BufferHandle {
            index: (offset / elem_size) as u32,
            _marker: PhantomData,
        })
    }

    /// Untyped append of whole elements. Returns the byte offset.
    ///
    /// `bytes` must be a multiple of the kind's element size so later typed
    /// entries keep landing on element boundaries.
    pub fn add_buffer_bytes(&mut self, kind_index: u32, bytes: &[u8]) -> KilnResult<u64> {
        let elem_size = *self
            .elem_sizes
            .get(kind_index as usize)
            .ok_or_else(|| KilnError::Usage(format!("unknown buffer kind {}", kind_index)))?;
        if bytes.len() as u64 % elem_size != 0 {
            return Err(KilnError::Usage(format!(
                "{} bytes is not a whole number of {}-byte elements for buffer kind {}",
                bytes.len(),
                elem_size,
                kind_index
            )));
        }
        self.arenas[kind_index as usize].append(bytes)
    }

    /// Bytes used and capacity of a kind's arena.
    pub fn buffer_usage(&self, kind_index: u32) -> Option<(u64, u64)> {
        self.arenas
            .get(kind_index as usize)
            .map(|arena| (arena.len(), arena.capacity()))
    }

    /// Total allocation size of every adopted texture.
    pub fn texture_memory_usage(&self) -> u64 {
        self.texture_memory
    }

    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    pub fn layouts(&self) -> &D::Layouts {
        &self.layouts
    }

    pub fn sets(&self) -> &D::Sets {
        &self.sets
    }

    pub fn device(&self) -> &Arc<D> {
        &self.device
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bindless::{LINEAR_MIN_SAMPLER, LINEAR_SAMPLER};
    use crate::test_support::{init_logging, MockBindless, MockTexture};
    use bytemuck::Zeroable;

    #[repr(C)]
    #[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
    struct Light {
        position: [f32; 3],
        radius: f32,
    }

    #[repr(C)]
    #[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
    struct Material {
        albedo: u32,
        normal: u32,
    }

    fn config(max_textures: u32, max_samplers: u32) -> KilnConfig {
        KilnConfig {
            max_textures,
            max_samplers,
            ..KilnConfig::default()
        }
    }

    fn table(max_textures: u32) -> (Arc<MockBindless>, BindlessTable<MockBindless>) {
        init_logging();
        let device = Arc::new(MockBindless::default());
        let table = BindlessTable::new(Arc::clone(&device), &config(max_textures, 4), BufferLayout::new()).unwrap();
        (device, table)
    }

    // ============================================================
    // Construction
    // ============================================================

    #[test]
    fn test_builtin_samplers() {
        let (device, _table) = table(8);
        let writes = device.sampler_writes();
        assert_eq!(writes, vec![(LINEAR_SAMPLER, SamplerDesc::LINEAR), (LINEAR_MIN_SAMPLER, SamplerDesc::LINEAR_MIN)]);
    }

    #[test]
    fn test_one_arena_per_kind() {
        let device = Arc::new(MockBindless::default());
        let mut layout = BufferLayout::new();
        let lights = layout.declare::<Light>("lights", 4);
        let materials = layout.declare::<Material>("materials", 10);
        let table = BindlessTable::new(Arc::clone(&device), &config(8, 4), layout).unwrap();

        assert_eq!(lights.binding(), 0);
        assert_eq!(materials.binding(), 1);
        assert_eq!(device.table_buffers(), vec![64, 80]);
        assert_eq!(table.buffer_usage(0), Some((0, 64)));
        assert_eq!(table.buffer_usage(1), Some((0, 80)));
        assert_eq!(table.buffer_usage(2), None);
    }

    #[test]
    fn test_rejects_invalid_config() {
        let device = Arc::new(MockBindless::default());
        let result = BindlessTable::new(device, &config(8, 1), BufferLayout::new());
        assert!(matches!(result, Err(KilnError::Config(_))));
    }

    // ============================================================
    // Textures
    // ============================================================

    #[test]
    fn test_texture_slots_are_sequential() {
        let (_device, mut table) = table(16);
        for k in 0..5u32 {
            let handle = table
                .add_texture(MockTexture::new(TextureUsage::SAMPLED | TextureUsage::STORAGE, 1, 256), false)
                .unwrap();
            assert_eq!(handle.sampled, SlotIndex(k));
            assert_eq!(handle.storage, SlotIndex(k));
        }
    }

    #[test]
    fn test_slot_kinds_counted_independently() {
        let (device, mut table) = table(16);

        let a = table.add_texture(MockTexture::new(TextureUsage::SAMPLED, 1, 64), false).unwrap();
        let b = table.add_texture(MockTexture::new(TextureUsage::STORAGE, 1, 64), false).unwrap();
        let c = table
            .add_texture(MockTexture::new(TextureUsage::SAMPLED | TextureUsage::STORAGE, 1, 64), false)
            .unwrap();

        assert_eq!((a.sampled, a.storage), (SlotIndex(0), SlotIndex::INVALID));
        assert_eq!((b.sampled, b.storage), (SlotIndex::INVALID, SlotIndex(0)));
        assert_eq!((c.sampled, c.storage), (SlotIndex(1), SlotIndex(1)));

        // Only the slot kinds a texture needs are written.
        let writes = device.texture_writes();
        assert_eq!(
            writes,
            vec![
                (TextureSlotKind::Sampled, SlotIndex(0)),
                (TextureSlotKind::Storage, SlotIndex(0)),
                (TextureSlotKind::Sampled, SlotIndex(1)),
                (TextureSlotKind::Storage, SlotIndex(1)),
            ]
        );
    }

    #[test]
    fn test_usage_without_shader_access_is_rejected() {
        let (device, mut table) = table(16);

        let err = table
            .add_texture(MockTexture::new(TextureUsage::COLOR_ATTACHMENT | TextureUsage::TRANSFER_SRC, 1, 64), false)
            .unwrap_err();
        assert!(matches!(err, KilnError::Usage(_)));
        assert!(device.texture_writes().is_empty());
        assert_eq!(device.views_created(), 0);
        assert_eq!(table.texture_count(), 0);
        assert_eq!(table.texture_memory_usage(), 0);

        let next = table.add_texture(MockTexture::new(TextureUsage::SAMPLED, 1, 64), false).unwrap();
        assert_eq!(next.sampled, SlotIndex(0));
    }

    #[test]
    fn test_per_mip_slots() {
        let (device, mut table) = table(16);
        let handle = table
            .add_texture(MockTexture::new(TextureUsage::SAMPLED | TextureUsage::STORAGE, 3, 1024), true)
            .unwrap();

        assert_eq!(handle.sampled, SlotIndex(0));
        assert_eq!(handle.storage, SlotIndex(0));
        assert_eq!(handle.mips.len(), 3);
        for (i, mip) in handle.mips.iter().enumerate() {
            assert_eq!(mip.sampled, SlotIndex(i as u32 + 1));
            assert_eq!(mip.storage, SlotIndex(i as u32 + 1));
            assert_eq!(mip.view.mip, Some(i as u32));
        }
        assert_eq!(handle.view.mip, None);
        assert_eq!(device.views_created(), 4);

        let next = table.add_texture(MockTexture::new(TextureUsage::SAMPLED, 1, 64), false).unwrap();
        assert_eq!(next.sampled, SlotIndex(4));
    }

    #[test]
    fn test_texture_capacity_checked_before_binding() {
        let (device, mut table) = table(3);
        table.add_texture(MockTexture::new(TextureUsage::SAMPLED, 1, 64), false).unwrap();

        // Needs 1 + 3 sampled slots, only 2 left.
        let err = table
            .add_texture(MockTexture::new(TextureUsage::SAMPLED, 3, 64), true)
            .unwrap_err();
        assert!(err.is_capacity());
        assert_eq!(device.texture_writes().len(), 1);
        assert_eq!(device.views_created(), 1);

        let b = table.add_texture(MockTexture::new(TextureUsage::SAMPLED, 1, 64), false).unwrap();
        let c = table.add_texture(MockTexture::new(TextureUsage::SAMPLED, 1, 64), false).unwrap();
        assert_eq!((b.sampled, c.sampled), (SlotIndex(1), SlotIndex(2)));

        let err = table.add_texture(MockTexture::new(TextureUsage::SAMPLED, 1, 64), false).unwrap_err();
        assert!(err.is_capacity());
    }

    #[test]
    fn test_view_failure_consumes_no_slot() {
        let (device, mut table) = table(4);
        device.fail_views(true);
        assert!(table.add_texture(MockTexture::new(TextureUsage::SAMPLED, 1, 64), false).is_err());
        device.fail_views(false);

        let handle = table.add_texture(MockTexture::new(TextureUsage::SAMPLED, 1, 64), false).unwrap();
        assert_eq!(handle.sampled, SlotIndex(0));
    }

    #[test]
    fn test_texture_memory_usage() {
        let (_device, mut table) = table(8);
        table.add_texture(MockTexture::new(TextureUsage::SAMPLED, 1, 4096), false).unwrap();
        table.add_texture(MockTexture::new(TextureUsage::STORAGE, 4, 1000), true).unwrap();
        assert_eq!(table.texture_memory_usage(), 5096);
        assert_eq!(table.texture_count(), 2);
    }

    // ============================================================
    // Samplers
    // ============================================================

    #[test]
    fn test_sampler_slots() {
        let (_device, mut table) = table(8);
        assert_eq!(table.add_sampler(&SamplerDesc::NEAREST).unwrap(), SlotIndex(2));
        assert_eq!(table.add_sampler(&SamplerDesc::NEAREST).unwrap(), SlotIndex(3));
        assert!(table.add_sampler(&SamplerDesc::NEAREST).unwrap_err().is_capacity());
    }

    // ============================================================
    // Buffers
    // ============================================================

    #[test]
    fn test_buffer_entries_return_element_indices() {
        let device = Arc::new(MockBindless::default());
        let mut layout = BufferLayout::new();
        let lights = layout.declare::<Light>("lights", 3);
        let materials = layout.declare::<Material>("materials", 8);
        let mut table = BindlessTable::new(device, &config(8, 4), layout).unwrap();

        let light = Light {
            position: [1.0, 2.0, 3.0],
            radius: 4.0,
        };
        for k in 0..3 {
            assert_eq!(table.add_buffer_entry(lights, &light).unwrap().index(), k);
        }
        let m = table.add_buffer_entry(materials, &Material { albedo: 7, normal: 9 }).unwrap();
        assert_eq!(m.index(), 0);

        let err = table.add_buffer_entry(lights, &light).unwrap_err();
        assert!(err.is_capacity());
        assert_eq!(table.buffer_usage(0), Some((48, 48)));

        let written = &table.arenas[0].buffer()[16..32];
        assert_eq!(written, bytemuck::bytes_of(&light));
        assert_eq!(&table.arenas[1].buffer()[0..8], bytemuck::bytes_of(&Material { albedo: 7, normal: 9 }));
    }

    #[test]
    fn test_buffer_kind_from_other_layout_is_rejected() {
        let device = Arc::new(MockBindless::default());
        let mut table = BindlessTable::new(device, &config(8, 4), BufferLayout::new()).unwrap();

        let mut other = BufferLayout::new();
        let stray = other.declare::<Material>("stray", 4);
        assert!(matches!(
            table.add_buffer_entry(stray, &Material { albedo: 0, normal: 0 }),
            Err(KilnError::Usage(_))
        ));
        assert!(matches!(table.add_buffer_bytes(3, &[0; 4]), Err(KilnError::Usage(_))));
    }

    #[test]
    fn test_raw_bytes_must_fill_whole_elements() {
        let device = Arc::new(MockBindless::default());
        let mut layout = BufferLayout::new();
        let quads = layout.declare::<[u32; 4]>("quads", 4);
        let mut table = BindlessTable::new(device, &config(8, 4), layout).unwrap();

        assert_eq!(table.add_buffer_entry(quads, &[1; 4]).unwrap().index(), 0);
        assert!(matches!(
            table.add_buffer_bytes(quads.index(), &[0xAA; 3]),
            Err(KilnError::Usage(_))
        ));
        assert_eq!(table.buffer_usage(0), Some((16, 64)));

        let second = table.add_buffer_entry(quads, &[2; 4]).unwrap();
        assert_eq!(second.index(), 1);
        let start = second.index() as usize * 16;
        assert_eq!(&table.arenas[0].buffer()[start..start + 16], bytemuck::bytes_of(&[2u32; 4]));

        // Whole elements are accepted and keep typed indices aligned.
        assert_eq!(table.add_buffer_bytes(quads.index(), bytemuck::bytes_of(&[3u32; 4])).unwrap(), 32);
        assert_eq!(table.add_buffer_entry(quads, &[4; 4]).unwrap().index(), 3);
    }

    #[test]
    fn test_buffer_kind_element_size_mismatch() {
        let device = Arc::new(MockBindless::default());
        let mut layout = BufferLayout::new();
        layout.declare::<Light>("lights", 4);
        let mut table = BindlessTable::new(device, &config(8, 4), layout).unwrap();

        let mut other = BufferLayout::new();
        let wrong = other.declare::<Material>("materials", 4);
        assert!(matches!(
            table.add_buffer_entry(wrong, &Material { albedo: 1, normal: 2 }),
            Err(KilnError::Usage(_))
        ));
        assert_eq!(table.buffer_usage(0), Some((0, 64)));
    }
}
