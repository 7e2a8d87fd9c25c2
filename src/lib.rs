//! Shadow page table engine for a bare-metal virtual machine monitor.
//!
//! The engine keeps a second, monitor-owned set of x86 page tables in sync
//! with the tables the guest believes it controls. Every divergence between
//! the two surfaces as a page fault, which [`ShadowPaging`] resolves by
//! filling in the shadow tree, reflecting the fault into the guest, or
//! forwarding the access to a memory hook.
//!
//! # Crates
//!
//! - [`shadowvm_core`]: addresses, errors, the guest-physical region map
//!   and the driver traits the engine consumes.
//! - [`arch`]: x86 page-table entry formats, control registers and
//!   exceptions (feature `arch-x86`).
//! - [`mmu`]: the engine itself (feature `mmu`).
//!
//! # Example
//!
//! ```no_run
//! # use shadowvm::{mmu::{ShadowPaging, ShadowPagingConfig}, arch::PagingMode};
//! # fn example<Driver>(driver: Driver) -> Result<(), shadowvm::VmmError>
//! # where Driver: shadowvm::mmu::ShadowDriver,
//! # {
//! let config = ShadowPagingConfig::default().with_passthrough_mode(PagingMode::Long);
//! let mut mmu = ShadowPaging::new(driver, shadowvm::VcpuId(0)).with_config(config);
//! mmu.activate_passthrough()?;
//! # Ok(())
//! # }
//! ```

pub use shadowvm_core::*;

#[cfg(feature = "arch-x86")]
pub use shadowvm_arch_x86 as arch;

#[cfg(feature = "mmu")]
pub use shadowvm_mmu as mmu;
#[cfg(feature = "mmu")]
pub use shadowvm_mmu::{FaultResolution, ShadowPaging};
