use shadowvm_arch_x86::{Interrupt, PageFaultErrorCode, PagingMode};
use shadowvm_core::{Pa, Va, VmmError};

use crate::{MemoryMode, ShadowDriver, ShadowPaging, legacy::Legacy, long::Long};

/// How a fault was resolved.
///
/// Every variant means the vCPU may be resumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultResolution {
    /// The shadow tables were brought in line with the guest, or already
    /// were. The faulting instruction will be retried.
    Resumed,

    /// The guest's own tables deny the access. A page fault was injected.
    PageFaultInjected,

    /// The guest maps memory that does not exist. A machine check was
    /// injected.
    MachineCheckInjected,

    /// The access was forwarded to a memory hook.
    Hooked,
}

impl<Driver> ShadowPaging<Driver>
where
    Driver: ShadowDriver,
{
    /// Handles a page fault taken by the guest.
    ///
    /// `va` is the faulting address (the CR2 value at the time of the exit)
    /// and `error_code` the error code the processor pushed. An `Err` is
    /// fatal for the vCPU: it must not be resumed.
    pub fn handle_page_fault(
        &mut self,
        va: Va,
        error_code: PageFaultErrorCode,
    ) -> Result<FaultResolution, VmmError> {
        tracing::trace!(
            vcpu = %self.vcpu,
            %va,
            error_code = ?error_code,
            mode = ?self.state.memory_mode,
            "page fault"
        );

        if self.state.memory_mode == MemoryMode::Physical {
            let pa = Pa(va.0);
            let region = self.driver.region(pa);
            return self.dispatch_hook(va, pa, region, error_code);
        }

        match (self.state.guest_mode, self.state.shadow_mode) {
            (PagingMode::Legacy, PagingMode::Legacy) => {
                self.handle_shadow_fault::<Legacy>(va, error_code)
            }
            (PagingMode::Long, PagingMode::Long) => {
                self.handle_shadow_fault::<Long>(va, error_code)
            }
            (guest, shadow) => {
                tracing::error!(?guest, ?shadow, "mismatched guest and shadow paging modes");
                Err(VmmError::NotSupported)
            }
        }
    }

    /// Reflects a page fault into the guest.
    ///
    /// The faulting address is written to the guest CR2 before the
    /// exception is queued.
    pub(crate) fn inject_page_fault(
        &self,
        va: Va,
        error_code: PageFaultErrorCode,
    ) -> Result<FaultResolution, VmmError> {
        tracing::debug!(vcpu = %self.vcpu, %va, ?error_code, "injecting page fault");

        let mut registers = self.driver.registers(self.vcpu)?;
        registers.cr2 = va.into();
        self.driver.set_registers(self.vcpu, registers)?;

        self.driver
            .inject_interrupt(self.vcpu, Interrupt::page_fault(va, error_code))?;
        Ok(FaultResolution::PageFaultInjected)
    }

    /// Injects a machine check into the guest.
    pub(crate) fn inject_machine_check(&self, va: Va) -> Result<FaultResolution, VmmError> {
        tracing::debug!(vcpu = %self.vcpu, %va, "injecting machine check");

        self.driver
            .inject_interrupt(self.vcpu, Interrupt::machine_check())?;
        Ok(FaultResolution::MachineCheckInjected)
    }
}
