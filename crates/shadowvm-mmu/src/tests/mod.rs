//! Engine tests against an in-memory driver.

mod context;

use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    rc::Rc,
};

use shadowvm_arch_x86::{
    Cr0, Cr3, Cr4, Interrupt, MsrEfer, PageTableLevel, PagingEntry, Registers, X86,
};
use shadowvm_core::{
    Architecture as _, Gfn, GuestMemory, HostMemory, HostRegionType, Hpa, MappedPage, MemoryHooks,
    MemoryMap, Pa, RegionDescriptor, RegionLookup, Va, VcpuControl, VcpuId, VmmDriver, VmmError,
    VmmInfo,
};
use zerocopy::IntoBytes as _;

use crate::{ShadowPaging, ShadowPagingConfig};

pub(super) const PRESENT: u64 = 1 << 0;
pub(super) const WRITE: u64 = 1 << 1;
pub(super) const USER: u64 = 1 << 2;
pub(super) const ACCESSED: u64 = 1 << 5;
pub(super) const DIRTY: u64 = 1 << 6;
pub(super) const LARGE: u64 = 1 << 7;
pub(super) const EXECUTE_DISABLE: u64 = 1 << 63;

/// Guest RAM, backed by host memory at [`RAM_HOST`].
pub(super) const RAM_END: u64 = 0x0100_0000;
pub(super) const RAM_HOST: u64 = 0x4000_0000;

/// Write-hooked RAM (e.g. a framebuffer).
pub(super) const WRITE_HOOKED: u64 = 0x0100_0000;
pub(super) const WRITE_HOOKED_HOST: u64 = 0x5000_0000;

/// Emulated device registers.
pub(super) const MMIO: u64 = 0x0110_0000;

/// Paged-out guest memory.
pub(super) const SWAPPED: u64 = 0x0120_0000;

/// A hole in the guest-physical address space.
pub(super) const INVALID: u64 = 0x0130_0000;

/// RAM backed by host memory above 4GB. Only mapped by tests that add
/// [`high_region`].
pub(super) const HIGH: u64 = 0x0140_0000;
pub(super) const HIGH_HOST: u64 = 0x1_2345_6000;

/// Shadow frames are handed out from here.
const FRAME_POOL: u64 = 0x2000_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum HookKind {
    Full,
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct HookCall {
    pub kind: HookKind,
    pub va: Va,
    pub pa: Pa,
    pub error_code: u32,
}

///////////////////////////////////////////////////////////////////////////////
// Mock Driver
///////////////////////////////////////////////////////////////////////////////

pub(super) struct MockDriver {
    regions: RefCell<MemoryMap>,
    guest: RefCell<HashMap<Gfn, Vec<u8>>>,
    host: RefCell<HashMap<Hpa, Vec<u8>>>,
    next_frame: Cell<u64>,
    allocations_left: Cell<Option<usize>>,
    freed: Rc<RefCell<Vec<Hpa>>>,
    registers: RefCell<Registers>,
    interrupts: RefCell<Vec<Interrupt>>,
    hooks: RefCell<Vec<HookCall>>,
}

impl MockDriver {
    pub(super) fn new() -> Result<Self, VmmError> {
        let mut regions = MemoryMap::new();
        regions.insert(RegionDescriptor::new(
            Pa(0),
            Pa(RAM_END),
            HostRegionType::Allocated,
            Hpa(RAM_HOST),
        ))?;
        regions.insert(RegionDescriptor::new(
            Pa(WRITE_HOOKED),
            Pa(WRITE_HOOKED + 0x10_0000),
            HostRegionType::WriteHook,
            Hpa(WRITE_HOOKED_HOST),
        ))?;
        regions.insert(RegionDescriptor::new(
            Pa(MMIO),
            Pa(MMIO + 0x1_0000),
            HostRegionType::FullHook,
            Hpa(0),
        ))?;
        regions.insert(RegionDescriptor::new(
            Pa(SWAPPED),
            Pa(SWAPPED + 0x1_0000),
            HostRegionType::Swapped,
            Hpa(0),
        ))?;
        regions.insert(RegionDescriptor::new(
            Pa(INVALID),
            Pa(INVALID + 0x1000),
            HostRegionType::Invalid,
            Hpa(0),
        ))?;

        Ok(Self {
            regions: RefCell::new(regions),
            guest: RefCell::new(HashMap::new()),
            host: RefCell::new(HashMap::new()),
            next_frame: Cell::new(FRAME_POOL),
            allocations_left: Cell::new(None),
            freed: Rc::new(RefCell::new(Vec::new())),
            registers: RefCell::new(Registers::default()),
            interrupts: RefCell::new(Vec::new()),
            hooks: RefCell::new(Vec::new()),
        })
    }

    /// Maps another guest-physical range.
    pub(super) fn add_region(&self, region: RegionDescriptor) -> Result<(), VmmError> {
        self.regions.borrow_mut().insert(region)
    }

    /// Hands out the following shadow frames from `hpa` upwards.
    pub(super) fn place_frames_at(&self, hpa: u64) {
        self.next_frame.set(hpa);
    }

    /// Makes every allocation after the next `count` fail.
    pub(super) fn limit_allocations(&self, count: usize) {
        self.allocations_left.set(Some(count));
    }

    pub(super) fn set_guest_entry<E>(&self, table: u64, index: u64, entry: E)
    where
        E: PagingEntry,
    {
        self.write_guest_bytes(Pa(table + index * E::SIZE), entry.as_bytes());
    }

    pub(super) fn guest_entry<E>(&self, table: u64, index: u64) -> E
    where
        E: PagingEntry,
    {
        let pa = Pa(table + index * E::SIZE);
        let guest = self.guest.borrow();
        guest
            .get(&X86::gfn_from_pa(pa))
            .and_then(|page| {
                let offset = X86::pa_offset(pa) as usize;
                E::read_from_bytes(&page[offset..offset + E::SIZE as usize]).ok()
            })
            .unwrap_or_default()
    }

    pub(super) fn host_entry<E>(&self, table: Hpa, index: u64) -> E
    where
        E: PagingEntry,
    {
        let host = self.host.borrow();
        host.get(&table)
            .and_then(|page| {
                let offset = (index * E::SIZE) as usize;
                E::read_from_bytes(&page[offset..offset + E::SIZE as usize]).ok()
            })
            .unwrap_or_default()
    }

    /// Returns a copy of every host page, for detecting shadow writes.
    pub(super) fn host_snapshot(&self) -> HashMap<Hpa, Vec<u8>> {
        self.host.borrow().clone()
    }

    pub(super) fn freed(&self) -> Vec<Hpa> {
        self.freed.borrow().clone()
    }

    /// Returns the log of freed frames, which outlives the driver.
    pub(super) fn freed_log(&self) -> Rc<RefCell<Vec<Hpa>>> {
        Rc::clone(&self.freed)
    }

    pub(super) fn interrupts(&self) -> Vec<Interrupt> {
        self.interrupts.borrow().clone()
    }

    pub(super) fn hooks(&self) -> Vec<HookCall> {
        self.hooks.borrow().clone()
    }

    pub(super) fn current_registers(&self) -> Registers {
        *self.registers.borrow()
    }

    pub(super) fn load_registers(&self, registers: Registers) {
        *self.registers.borrow_mut() = registers;
    }

    pub(super) fn write_guest_bytes(&self, pa: Pa, content: &[u8]) {
        let offset = X86::pa_offset(pa) as usize;
        let mut guest = self.guest.borrow_mut();
        let page = guest
            .entry(X86::gfn_from_pa(pa))
            .or_insert_with(|| vec![0u8; X86::PAGE_SIZE as usize]);
        page[offset..offset + content.len()].copy_from_slice(content);
    }
}

impl VmmDriver for MockDriver {
    type Architecture = X86;

    fn info(&self) -> Result<VmmInfo, VmmError> {
        Ok(VmmInfo {
            page_size: X86::PAGE_SIZE,
            vcpus: 1,
        })
    }
}

impl GuestMemory for MockDriver {
    fn read_guest_page(&self, gfn: Gfn) -> Result<MappedPage, VmmError> {
        if let Some(page) = self.guest.borrow().get(&gfn) {
            return Ok(MappedPage::new(page.clone()));
        }

        // Untouched RAM reads as zeroes.
        match self.regions.borrow().lookup(X86::pa_from_gfn(gfn)) {
            Some(region) if region.host_type.is_mappable() => {
                Ok(MappedPage::new(vec![0u8; X86::PAGE_SIZE as usize]))
            }
            _ => Err(VmmError::Other("guest frame has no backing memory")),
        }
    }

    fn write_guest(&self, pa: Pa, content: &[u8]) -> Result<(), VmmError> {
        self.write_guest_bytes(pa, content);
        Ok(())
    }
}

impl HostMemory for MockDriver {
    fn allocate_page(&self) -> Option<Hpa> {
        if let Some(left) = self.allocations_left.get() {
            if left == 0 {
                return None;
            }
            self.allocations_left.set(Some(left - 1));
        }

        let hpa = Hpa(self.next_frame.get());
        self.next_frame.set(hpa.0 + X86::PAGE_SIZE);
        self.host
            .borrow_mut()
            .insert(hpa, vec![0xcc; X86::PAGE_SIZE as usize]);
        Some(hpa)
    }

    fn free_page(&self, hpa: Hpa) -> Result<(), VmmError> {
        self.host
            .borrow_mut()
            .remove(&hpa)
            .ok_or(VmmError::Other("double free"))?;
        self.freed.borrow_mut().push(hpa);
        Ok(())
    }

    fn read_host_page(&self, hpa: Hpa) -> Result<MappedPage, VmmError> {
        let host = self.host.borrow();
        let page = host
            .get(&hpa)
            .ok_or(VmmError::Other("host page not allocated"))?;
        Ok(MappedPage::new(page.clone()))
    }

    fn write_host(&self, hpa: Hpa, content: &[u8]) -> Result<(), VmmError> {
        let base = hpa.align_down(X86::PAGE_SIZE);
        let offset = hpa.offset_in(X86::PAGE_SIZE) as usize;

        let mut host = self.host.borrow_mut();
        let page = host
            .get_mut(&base)
            .ok_or(VmmError::Other("host page not allocated"))?;
        page[offset..offset + content.len()].copy_from_slice(content);
        Ok(())
    }
}

impl RegionLookup for MockDriver {
    fn region(&self, pa: Pa) -> Option<RegionDescriptor> {
        self.regions.borrow().lookup(pa)
    }

    fn guest_physical_end(&self) -> Pa {
        self.regions.borrow().end()
    }
}

impl VcpuControl for MockDriver {
    fn registers(&self, _vcpu: VcpuId) -> Result<Registers, VmmError> {
        Ok(*self.registers.borrow())
    }

    fn set_registers(&self, _vcpu: VcpuId, registers: Registers) -> Result<(), VmmError> {
        *self.registers.borrow_mut() = registers;
        Ok(())
    }

    fn inject_interrupt(&self, _vcpu: VcpuId, interrupt: Interrupt) -> Result<(), VmmError> {
        self.interrupts.borrow_mut().push(interrupt);
        Ok(())
    }
}

impl MemoryHooks for MockDriver {
    fn full_access(
        &self,
        _vcpu: VcpuId,
        va: Va,
        pa: Pa,
        _region: &RegionDescriptor,
        error_code: u32,
    ) -> Result<(), VmmError> {
        self.hooks.borrow_mut().push(HookCall {
            kind: HookKind::Full,
            va,
            pa,
            error_code,
        });
        Ok(())
    }

    fn write_access(
        &self,
        _vcpu: VcpuId,
        va: Va,
        pa: Pa,
        _region: &RegionDescriptor,
        error_code: u32,
    ) -> Result<(), VmmError> {
        self.hooks.borrow_mut().push(HookCall {
            kind: HookKind::Write,
            va,
            pa,
            error_code,
        });
        Ok(())
    }
}

///////////////////////////////////////////////////////////////////////////////
// Helpers
///////////////////////////////////////////////////////////////////////////////

pub(super) fn high_region() -> RegionDescriptor {
    RegionDescriptor::new(
        Pa(HIGH),
        Pa(HIGH + 0x1000),
        HostRegionType::Allocated,
        Hpa(HIGH_HOST),
    )
}

const CR0_PE: u64 = 1 << 0;
const CR0_PG: u64 = 1 << 31;
const CR4_PSE: u64 = 1 << 4;
const CR4_PAE: u64 = 1 << 5;
const EFER_LME: u64 = 1 << 8;
const EFER_LMA: u64 = 1 << 10;

pub(super) fn paging_off() -> (Cr0, Cr4, MsrEfer) {
    (Cr0(CR0_PE), Cr4(0), MsrEfer(0))
}

pub(super) fn legacy_paging(pse: bool) -> (Cr0, Cr4, MsrEfer) {
    let cr4 = match pse {
        true => CR4_PSE,
        false => 0,
    };

    (Cr0(CR0_PE | CR0_PG), Cr4(cr4), MsrEfer(0))
}

pub(super) fn long_paging() -> (Cr0, Cr4, MsrEfer) {
    (
        Cr0(CR0_PE | CR0_PG),
        Cr4(CR4_PAE),
        MsrEfer(EFER_LME | EFER_LMA),
    )
}

fn init_tracing() {
    // Only the first test to get here installs the subscriber.
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_target(false)
        .with_test_writer()
        .try_init();
}

pub(super) fn engine_with(
    config: ShadowPagingConfig,
    cr3: u64,
    (cr0, cr4, efer): (Cr0, Cr4, MsrEfer),
) -> Result<ShadowPaging<MockDriver>, VmmError> {
    init_tracing();

    let mut engine = ShadowPaging::new(MockDriver::new()?, VcpuId(0)).with_config(config);
    engine.write_guest_cr3(Cr3(cr3))?;
    engine.update_paging_mode(cr0, cr4, efer)?;
    Ok(engine)
}

pub(super) fn legacy_engine(cr3: u64, pse: bool) -> Result<ShadowPaging<MockDriver>, VmmError> {
    engine_with(ShadowPagingConfig::default(), cr3, legacy_paging(pse))
}

pub(super) fn long_engine(cr3: u64) -> Result<ShadowPaging<MockDriver>, VmmError> {
    engine_with(ShadowPagingConfig::default(), cr3, long_paging())
}

/// Walks the loaded shadow tables for `va`.
///
/// Returns one entry per level, stopping after the first entry that is not
/// present.
pub(super) fn shadow_path<E>(engine: &ShadowPaging<MockDriver>, va: Va) -> Vec<E>
where
    E: PagingEntry,
{
    let mode = engine.state().shadow_mode;
    let mut path = Vec::new();
    let mut table = match engine.state().shadow_root {
        Some(root) => root,
        None => return path,
    };
    let mut level = mode.root_level();

    loop {
        let entry = engine
            .driver()
            .host_entry::<E>(table, mode.index_for(va, level));
        path.push(entry);

        match level.next() {
            Some(next) if entry.present() => {
                table = Hpa(entry.address());
                level = next;
            }
            _ => return path,
        }
    }
}

/// Returns the shadow leaf mapping `va`, if one is present.
pub(super) fn shadow_leaf<E>(engine: &ShadowPaging<MockDriver>, va: Va) -> Option<E>
where
    E: PagingEntry,
{
    let mode = engine.state().shadow_mode;
    let path = shadow_path::<E>(engine, va);
    let expected = match mode.root_level() {
        PageTableLevel::Pml4 => 4,
        _ => 2,
    };

    match path.last() {
        Some(leaf) if path.len() == expected && leaf.present() => Some(*leaf),
        _ => None,
    }
}
