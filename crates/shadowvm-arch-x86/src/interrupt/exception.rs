/// Exception vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExceptionVector(pub u8);

#[expect(non_upper_case_globals)]
impl ExceptionVector {
    /// Invalid Opcode (#UD).
    pub const InvalidOpcode: Self = Self(6);

    /// General Protection (#GP).
    pub const GeneralProtection: Self = Self(13);

    /// Page Fault (#PF).
    ///
    /// # Source
    ///
    /// Any memory reference.
    pub const PageFault: Self = Self(14);

    /// Machine Check (#MC).
    ///
    /// # Source
    ///
    /// Model dependent. Raised by the monitor when a guest page table points
    /// outside of guest memory.
    pub const MachineCheck: Self = Self(18);

    /// Checks if the exception pushes an error code.
    pub fn requires_error_code(self) -> bool {
        matches!(self.0, 8 | 10..=14 | 17 | 21)
    }
}

impl std::fmt::Display for ExceptionVector {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match *self {
            Self::InvalidOpcode => write!(f, "#UD"),
            Self::GeneralProtection => write!(f, "#GP"),
            Self::PageFault => write!(f, "#PF"),
            Self::MachineCheck => write!(f, "#MC"),
            Self(vector) => write!(f, "#{vector}"),
        }
    }
}
