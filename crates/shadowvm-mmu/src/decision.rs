//! Per-level fault classification.
//!
//! Every level of a shadow page fault is resolved by [`decide`], a pure
//! function of the guest and shadow access status at that level, the kind of
//! table, and (for leaves) the region the guest maps. The level handlers
//! only carry out the returned [`FaultDecision`].

use shadowvm_arch_x86::AccessStatus;
use shadowvm_core::HostRegionType;

/// Kind of table the entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableRole {
    /// The entry points at another table, or maps a large page.
    Directory,

    /// The entry maps a 4KB frame.
    ///
    /// A 4KB slice of a guest large page is a leaf as well.
    Leaf,
}

/// Everything [`decide`] looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FaultInputs {
    /// Kind of table.
    pub role: TableRole,

    /// Guest entry checked against the faulting access.
    pub guest: AccessStatus,

    /// Shadow entry checked against the faulting access.
    pub shadow: AccessStatus,

    /// Whether the guest entry maps a large page.
    pub large_page: bool,

    /// Region of the guest frame a leaf maps. `None` for directories and for
    /// frames outside of guest memory.
    pub region: Option<HostRegionType>,
}

/// What to do at one level of a shadow page fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultDecision {
    /// The guest's own tables deny the access. Reflect the fault.
    InjectPageFault,

    /// The guest maps memory that does not exist.
    MachineCheck,

    /// Allocate the missing shadow table and continue below it.
    AllocateTable,

    /// The shadow entry is valid. Continue below it.
    Descend,

    /// First write through a read-only shadow entry. Record the guest dirty
    /// bit and mirror the guest's write permission.
    SyncDirty,

    /// Point the shadow leaf at the host frame backing the guest frame.
    MapFrame,

    /// The frame has no host memory. Forward to the full-access hook.
    FullHook,

    /// Write to a write-hooked frame. Forward to the write hook.
    WriteHook,

    /// Shadow and guest already agree. The fault came from a stale TLB entry.
    Stale,

    /// The guest removed a mapping the shadow still holds. Drop the shadow
    /// entry.
    InvalidateStale,
}

impl FaultDecision {
    /// Checks if the decision ends the walk.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::AllocateTable | Self::Descend)
    }

    /// Checks if carrying out the decision only touches the guest.
    pub fn injects(self) -> bool {
        matches!(self, Self::InjectPageFault | Self::MachineCheck)
    }
}

/// Checks if a fault is attributable to the guest's own tables.
///
/// True when the guest denies the access for a reason other than
/// not-present while the shadow entry is present, or when both entries are
/// not present.
pub fn is_guest_fault(guest: AccessStatus, shadow: AccessStatus) -> bool {
    use AccessStatus::*;

    guest != Ok
        && ((shadow != NotPresent && guest != NotPresent)
            || (shadow == NotPresent && guest == NotPresent))
}

/// Classifies one level of a shadow page fault.
pub fn decide(inputs: FaultInputs) -> FaultDecision {
    use AccessStatus::*;

    if is_guest_fault(inputs.guest, inputs.shadow) {
        return FaultDecision::InjectPageFault;
    }

    if inputs.guest == NotPresent {
        // The shadow entry is present here, or the test above would have
        // fired.
        return FaultDecision::InvalidateStale;
    }

    if inputs.shadow == UserError {
        return FaultDecision::InjectPageFault;
    }

    match inputs.role {
        TableRole::Directory => match inputs.shadow {
            NotPresent => FaultDecision::AllocateTable,
            Ok => FaultDecision::Descend,
            WriteError if inputs.large_page => FaultDecision::SyncDirty,
            _ => FaultDecision::InjectPageFault,
        },

        // The guest leaf denies the access and the shadow has nothing to
        // fix up yet.
        TableRole::Leaf if inputs.shadow == NotPresent && inputs.guest != Ok => {
            FaultDecision::InjectPageFault
        }

        TableRole::Leaf => match (inputs.shadow, inputs.region) {
            (_, None | Some(HostRegionType::Invalid)) => FaultDecision::MachineCheck,

            (NotPresent, Some(HostRegionType::Allocated | HostRegionType::WriteHook)) => {
                FaultDecision::MapFrame
            }
            (_, Some(HostRegionType::FullHook | HostRegionType::Swapped)) => {
                FaultDecision::FullHook
            }

            (Ok, Some(_)) => FaultDecision::Stale,

            (WriteError, Some(HostRegionType::WriteHook)) => FaultDecision::WriteHook,
            (WriteError, Some(HostRegionType::Allocated)) => FaultDecision::SyncDirty,

            (_, Some(_)) => FaultDecision::InjectPageFault,
        },
    }
}
