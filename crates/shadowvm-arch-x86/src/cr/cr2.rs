use shadowvm_core::Va;

/// `CR2` control register.
///
/// Holds the linear address that caused the most recent page fault.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Cr2(pub u64);

impl From<Va> for Cr2 {
    fn from(value: Va) -> Self {
        Self(value.0)
    }
}

impl From<Cr2> for Va {
    fn from(value: Cr2) -> Self {
        Va(value.0)
    }
}
