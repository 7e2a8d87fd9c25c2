//! Shadow page table engine.
//!
//! The guest believes it controls the page tables its CR3 points at. The
//! physical CPU actually runs on a second set of tables owned by this
//! engine, the *shadow* tables. They start out empty and are filled in one
//! entry at a time as the guest touches memory.
//!
//! Every page fault the guest takes is first handed to
//! [`ShadowPaging::handle_page_fault`]. At each level of the walk the guest
//! entry and the shadow entry are checked against the faulting access, and
//! the pair is classified by [`decision::decide`]:
//!
//! - If the guest's own tables deny the access, the fault is reflected into
//!   the guest unchanged and the shadow tables are not touched.
//! - If the shadow is merely behind the guest, the missing shadow table is
//!   allocated or the missing leaf is filled in, and the guest resumes.
//! - If the guest maps a frame without host memory behind it, the access is
//!   forwarded to the monitor's memory hooks, or a machine check is injected
//!   when the frame does not exist at all.
//!
//! # Dirty bits
//!
//! A leaf is first mapped read-only unless the guest already marked it dirty
//! or the faulting access is a write. The first write then faults again,
//! which is where the guest dirty bit is set and write access granted. The
//! engine never clears a guest dirty bit.
//!
//! # Contexts
//!
//! All shadow tables reachable from one top-level shadow table form a
//! *context*. A guest CR3 write or paging mode change retires the current
//! context as a whole and starts a new, empty one. Frames are tracked in a
//! [`FrameArena`] keyed by host-physical address.
//!
//! # Limitations
//!
//! PAE (3-level) paging and 1GB guest pages are not supported. 2-level
//! shadow tables only reach the first 4GB of host memory. Guest frames
//! backed above that get a machine check, and shadow frames above it are
//! refused with [`VmmError::HostAddressOutOfReach`].

mod config;
pub mod decision;
mod decoder;
mod fault;
mod frame;
mod hook;
mod invlpg;
mod legacy;
mod level;
mod long;
mod passthrough;
mod state;

use shadowvm_arch_x86::{Cr0, Cr3, Cr4, MsrEfer, PagingMode, X86};
use shadowvm_core::{
    GuestMemory, HostMemory, Hpa, MemoryHooks, RegionLookup, VcpuControl, VcpuId, VmmDriver,
    VmmError,
};

pub use self::{
    config::ShadowPagingConfig,
    decoder::{IcedDecoder, InstructionDecoder, MemoryOperand},
    fault::FaultResolution,
    frame::{FrameArena, ShadowFrame},
    passthrough::PassthroughTables,
    state::{MemoryMode, ShadowPageState},
};

/// Services a driver must provide to back a [`ShadowPaging`] instance.
pub trait ShadowDriver:
    VmmDriver<Architecture = X86> + GuestMemory + HostMemory + RegionLookup + VcpuControl + MemoryHooks
{
}

impl<T> ShadowDriver for T where
    T: VmmDriver<Architecture = X86>
        + GuestMemory
        + HostMemory
        + RegionLookup
        + VcpuControl
        + MemoryHooks
{
}

/// Shadow paging engine of a single vCPU.
pub struct ShadowPaging<Driver>
where
    Driver: ShadowDriver,
{
    driver: Driver,
    vcpu: VcpuId,
    state: ShadowPageState,
    frames: FrameArena,
    decoder: Box<dyn InstructionDecoder>,
    config: ShadowPagingConfig,
}

impl<Driver> ShadowPaging<Driver>
where
    Driver: ShadowDriver,
{
    /// Creates a new engine for `vcpu`.
    ///
    /// The guest starts in physical memory mode with no shadow tables
    /// loaded, both paging modes set to 2-level and both CR3 values zero.
    pub fn new(driver: Driver, vcpu: VcpuId) -> Self {
        Self {
            driver,
            vcpu,
            state: ShadowPageState::default(),
            frames: FrameArena::new(),
            decoder: Box::new(IcedDecoder),
            config: ShadowPagingConfig::default(),
        }
    }

    /// Replaces the configuration.
    ///
    /// Should be called before any shadow table is built. The frame limit
    /// applies to frames allocated afterwards.
    pub fn with_config(mut self, config: ShadowPagingConfig) -> Self {
        self.frames.set_limit(config.max_frames);
        self.config = config;
        self
    }

    /// Replaces the decoder used to emulate INVLPG.
    pub fn with_decoder(mut self, decoder: impl InstructionDecoder + 'static) -> Self {
        self.decoder = Box::new(decoder);
        self
    }

    /// Returns the driver.
    pub fn driver(&self) -> &Driver {
        &self.driver
    }

    /// Returns the vCPU the engine belongs to.
    pub fn vcpu(&self) -> VcpuId {
        self.vcpu
    }

    /// Returns the current paging state.
    pub fn state(&self) -> &ShadowPageState {
        &self.state
    }

    /// Returns the shadow frames owned by the engine.
    pub fn frames(&self) -> &FrameArena {
        &self.frames
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ShadowPagingConfig {
        &self.config
    }

    /// Returns the value to load into the physical CR3.
    pub fn shadow_cr3(&self) -> Cr3 {
        self.state.shadow_cr3()
    }

    /// Records a guest CR3 write.
    ///
    /// With guest paging enabled the current shadow context is retired and
    /// a fresh, empty top-level table takes its place. Nothing from the
    /// previous address space survives into the new one.
    pub fn write_guest_cr3(&mut self, cr3: Cr3) -> Result<(), VmmError> {
        tracing::debug!(vcpu = %self.vcpu, cr3 = %format_args!("{:#x}", cr3.0), "guest CR3 write");

        self.state.guest_cr3 = cr3;

        if self.state.memory_mode == MemoryMode::Virtual {
            self.retire_current()?;
            self.activate_shadow_root()?;
        }

        Ok(())
    }

    /// Records a change of the guest's paging control bits.
    ///
    /// Switching between physical and virtual memory mode, or between 2- and
    /// 4-level paging, retires the current shadow context. Turning paging
    /// off loads the passthrough tables.
    pub fn update_paging_mode(
        &mut self,
        cr0: Cr0,
        cr4: Cr4,
        efer: MsrEfer,
    ) -> Result<(), VmmError> {
        let mode = PagingMode::from_control_registers(cr0, cr4, efer)?;
        let pse = cr4.page_size_extensions();

        match mode {
            None => {
                self.state.page_size_extensions = pse;

                if self.state.memory_mode != MemoryMode::Physical
                    || self.state.shadow_root.is_none()
                {
                    self.activate_passthrough()?;
                }
            }

            Some(mode) => {
                let changed = self.state.memory_mode != MemoryMode::Virtual
                    || self.state.guest_mode != mode
                    || self.state.page_size_extensions != pse;

                self.state.page_size_extensions = pse;

                if changed {
                    tracing::debug!(vcpu = %self.vcpu, ?mode, pse, "guest paging enabled");

                    self.retire_current()?;
                    self.state.memory_mode = MemoryMode::Virtual;
                    self.state.guest_mode = mode;
                    self.state.shadow_mode = mode;
                    self.activate_shadow_root()?;
                }
            }
        }

        Ok(())
    }

    /// Builds identity tables in the configured passthrough format and
    /// loads them.
    pub fn activate_passthrough(&mut self) -> Result<(), VmmError> {
        self.retire_current()?;

        let tables = self.build_identity_tables(self.config.passthrough_mode)?;
        self.state.memory_mode = MemoryMode::Physical;
        self.state.shadow_mode = tables.mode;
        self.state.shadow_root = Some(tables.root);

        tracing::debug!(
            vcpu = %self.vcpu,
            root = %tables.root,
            frames = tables.frames,
            "passthrough tables loaded"
        );
        Ok(())
    }

    /// Releases every frame of the context rooted at `root`.
    ///
    /// If `root` is the loaded context, nothing is loaded afterwards.
    /// Returns the number of released frames.
    pub fn retire_context(&mut self, root: Hpa) -> Result<usize, VmmError> {
        if self.state.shadow_root == Some(root) {
            self.state.shadow_root = None;
        }

        self.frames.release_context(&self.driver, root)
    }

    fn retire_current(&mut self) -> Result<(), VmmError> {
        if let Some(root) = self.state.shadow_root {
            self.retire_context(root)?;
        }

        Ok(())
    }

    /// Allocates an empty top-level table for the current shadow mode.
    fn activate_shadow_root(&mut self) -> Result<Hpa, VmmError> {
        let root = self
            .frames
            .allocate_root(&self.driver, self.state.shadow_mode)?;

        self.state.shadow_root = Some(root);
        Ok(root)
    }
}

impl<Driver> Drop for ShadowPaging<Driver>
where
    Driver: ShadowDriver,
{
    fn drop(&mut self) {
        if let Err(err) = self.frames.release_everything(&self.driver) {
            tracing::warn!(vcpu = %self.vcpu, %err, "failed to release shadow frames");
        }
    }
}

#[cfg(test)]
mod tests;
