mod exception;
pub use self::exception::ExceptionVector;

use shadowvm_core::Va;

use crate::PageFaultErrorCode;

/// Type of interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptType {
    /// External interrupt.
    ExternalInterrupt,

    /// NMI.
    Nmi,

    /// Hardware exception.
    HardwareException,

    /// Software interrupt (CD nn).
    SoftwareInterrupt,
}

/// An interrupt or exception to be delivered to a vCPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interrupt {
    /// Vector number of the interrupt.
    pub vector: ExceptionVector,

    /// Type of interrupt.
    pub typ: InterruptType,

    /// Error code associated with the interrupt.
    pub error_code: u32,

    /// Extra information about the interrupt.
    ///
    /// For page faults, this is the virtual address that caused the fault
    /// (i.e., `CR2`).
    pub extra: u64,
}

impl Interrupt {
    /// Creates a new page fault exception.
    pub fn page_fault(va: Va, error_code: PageFaultErrorCode) -> Self {
        Self {
            vector: ExceptionVector::PageFault,
            typ: InterruptType::HardwareException,
            error_code: error_code.bits(),
            extra: va.into(),
        }
    }

    /// Creates a new machine check exception.
    pub fn machine_check() -> Self {
        Self {
            vector: ExceptionVector::MachineCheck,
            typ: InterruptType::HardwareException,
            error_code: 0,
            extra: 0,
        }
    }
}
