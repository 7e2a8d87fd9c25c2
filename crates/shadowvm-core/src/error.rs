use crate::{Hpa, Pa, Va};

/// An error that can occur while maintaining shadow page tables.
///
/// Faults that the guest caused itself are not errors. They are delivered
/// to the guest and reported as a successful resolution. A `VmmError` always
/// means the current fault cannot be completed and the vCPU must not be
/// resumed.
#[derive(thiserror::Error, Debug)]
pub enum VmmError {
    /// An error occurred in the driver.
    #[error(transparent)]
    Driver(Box<dyn std::error::Error>),

    /// A memory hook handler failed.
    #[error("memory hook failed: {0}")]
    Hook(Box<dyn std::error::Error>),

    /// The host could not provide a page for a shadow table.
    #[error("Shadow frame allocation failed")]
    FrameAllocation,

    /// The host returned a frame that is already tracked by the engine.
    #[error("Shadow frame {0} is already in use")]
    FrameInUse(Hpa),

    /// A host address does not fit into the entry format of the shadow
    /// tables.
    #[error("Host address {0} is out of reach of the shadow tables")]
    HostAddressOutOfReach(Hpa),

    /// The top-level guest page table could not be read.
    #[error("Guest root table {0} is not readable")]
    GuestRootUnreadable(Pa),

    /// The operation requires the guest to have paging enabled.
    #[error("Guest paging is disabled")]
    PagingDisabled,

    /// The guest virtual address is not mapped by the guest page tables.
    #[error("Guest address {0} is not mapped")]
    NotMapped(Va),

    /// The trapped instruction could not be decoded.
    #[error("Instruction decode failed: {0}")]
    Decode(&'static str),

    /// Operation not supported.
    #[error("Operation not supported.")]
    NotSupported,

    /// Other error.
    #[error("{0}")]
    Other(&'static str),
}
