use shadowvm_arch_x86::PageFaultErrorCode;
use shadowvm_core::{HostRegionType, Pa, RegionDescriptor, Va, VmmError};

use crate::{FaultResolution, ShadowDriver, ShadowPaging};

impl<Driver> ShadowPaging<Driver>
where
    Driver: ShadowDriver,
{
    /// Routes an access to a guest-physical address without host memory
    /// behind it, or a write to a write-hooked one, to the driver's memory
    /// hooks.
    ///
    /// Also the whole fault path while guest paging is disabled, where `pa`
    /// is the faulting address itself.
    pub(crate) fn dispatch_hook(
        &self,
        va: Va,
        pa: Pa,
        region: Option<RegionDescriptor>,
        error_code: PageFaultErrorCode,
    ) -> Result<FaultResolution, VmmError> {
        let region = match region {
            Some(region) if region.host_type != HostRegionType::Invalid => region,
            _ => {
                tracing::warn!(vcpu = %self.vcpu, %va, %pa, "access to invalid guest memory");
                return self.inject_machine_check(va);
            }
        };

        match region.host_type {
            HostRegionType::FullHook | HostRegionType::Swapped => {
                tracing::trace!(vcpu = %self.vcpu, %va, %pa, ?error_code, "full access hook");
                self.driver
                    .full_access(self.vcpu, va, pa, &region, error_code.bits())?;
                Ok(FaultResolution::Hooked)
            }

            HostRegionType::WriteHook if error_code.is_write() => {
                tracing::trace!(vcpu = %self.vcpu, %va, %pa, ?error_code, "write access hook");
                self.driver
                    .write_access(self.vcpu, va, pa, &region, error_code.bits())?;
                Ok(FaultResolution::Hooked)
            }

            _ => {
                // Mapped memory faulting with paging disabled means the
                // passthrough tables were reloaded under the guest.
                tracing::debug!(vcpu = %self.vcpu, %va, %pa, ?error_code, "spurious fault on mapped memory");
                Ok(FaultResolution::Resumed)
            }
        }
    }
}
