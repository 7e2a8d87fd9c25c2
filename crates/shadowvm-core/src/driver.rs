//! Services the engine consumes from the monitor.
//!
//! The engine never touches memory, allocates frames or talks to a vCPU on
//! its own. Each of these services is a narrow trait, so a driver for a real
//! monitor and a mock for tests implement exactly the same surface.
//!
//! All methods take `&self`. A driver shared between vCPUs provides its own
//! synchronization.

use crate::{
    Architecture, Gfn, Hpa, MappedPage, Pa, RegionDescriptor, Va, VcpuId, VmmError,
};

/// Information about the virtual machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmmInfo {
    /// The size of a page in bytes.
    pub page_size: u64,

    /// The number of virtual CPUs.
    pub vcpus: u16,
}

/// Base trait of every driver.
pub trait VmmDriver {
    /// The architecture supported by the driver.
    type Architecture: Architecture + ?Sized;

    /// Retrieves information about the virtual machine.
    fn info(&self) -> Result<VmmInfo, VmmError>;
}

/// Access to guest-physical memory.
pub trait GuestMemory: VmmDriver {
    /// Reads a page of guest-physical memory.
    ///
    /// Fails if the frame has no host memory behind it.
    fn read_guest_page(&self, gfn: Gfn) -> Result<MappedPage, VmmError>;

    /// Writes bytes at a guest-physical address.
    ///
    /// The write never crosses a page boundary.
    fn write_guest(&self, pa: Pa, content: &[u8]) -> Result<(), VmmError>;
}

/// Access to host-physical pages holding shadow page tables.
pub trait HostMemory: VmmDriver {
    /// Allocates a single host page.
    ///
    /// Returns `None` when the host is out of memory.
    fn allocate_page(&self) -> Option<Hpa>;

    /// Returns a page previously obtained from [`allocate_page`].
    ///
    /// [`allocate_page`]: Self::allocate_page
    fn free_page(&self, hpa: Hpa) -> Result<(), VmmError>;

    /// Reads a host page.
    fn read_host_page(&self, hpa: Hpa) -> Result<MappedPage, VmmError>;

    /// Writes bytes at a host-physical address.
    ///
    /// The write never crosses a page boundary.
    fn write_host(&self, hpa: Hpa, content: &[u8]) -> Result<(), VmmError>;
}

/// Guest-physical memory map queries.
pub trait RegionLookup: VmmDriver {
    /// Returns the region containing the guest-physical address.
    fn region(&self, pa: Pa) -> Option<RegionDescriptor>;

    /// Returns the end of guest-physical memory.
    ///
    /// Nothing at or above this address is ever mapped.
    fn guest_physical_end(&self) -> Pa;
}

/// Register access and event injection for a vCPU.
pub trait VcpuControl: VmmDriver {
    /// Retrieves the registers of a specific virtual CPU.
    fn registers(
        &self,
        vcpu: VcpuId,
    ) -> Result<<Self::Architecture as Architecture>::Registers, VmmError>;

    /// Sets the registers of a specific virtual CPU.
    fn set_registers(
        &self,
        vcpu: VcpuId,
        registers: <Self::Architecture as Architecture>::Registers,
    ) -> Result<(), VmmError>;

    /// Injects an interrupt into a specific virtual CPU.
    fn inject_interrupt(
        &self,
        vcpu: VcpuId,
        interrupt: <Self::Architecture as Architecture>::Interrupt,
    ) -> Result<(), VmmError>;
}

/// Handlers for accesses to hooked memory regions.
///
/// A handler emulates the access (including advancing the instruction
/// pointer). An `Err` is fatal for the faulting vCPU.
pub trait MemoryHooks: VmmDriver {
    /// Handles any access to a fully hooked or swapped region.
    fn full_access(
        &self,
        vcpu: VcpuId,
        va: Va,
        pa: Pa,
        region: &RegionDescriptor,
        error_code: u32,
    ) -> Result<(), VmmError>;

    /// Handles a write to a write-hooked region.
    fn write_access(
        &self,
        vcpu: VcpuId,
        va: Va,
        pa: Pa,
        region: &RegionDescriptor,
        error_code: u32,
    ) -> Result<(), VmmError>;
}
