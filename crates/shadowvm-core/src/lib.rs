//! Core shadow paging types.
//!
//! Architecture-neutral vocabulary shared by the engine and its drivers:
//! address newtypes, the error type, the guest-physical memory map and the
//! driver traits through which the engine reaches the rest of the monitor.

pub mod arch;
mod core;
pub mod driver;
mod error;
mod page;
pub mod region;

pub use self::{
    arch::{Architecture, Registers},
    core::{Gfn, Hpa, Pa, Va, VcpuId},
    driver::{GuestMemory, HostMemory, MemoryHooks, RegionLookup, VcpuControl, VmmDriver, VmmInfo},
    error::VmmError,
    page::MappedPage,
    region::{HostRegionType, MemoryMap, RegionDescriptor},
};
