/// `CR0` control register.
///
/// Only the flags that affect address translation are decoded.
#[derive(Default, Clone, Copy, PartialEq, Eq)]
pub struct Cr0(pub u64);

impl Cr0 {
    /// Checks if the CR0.PE flag is set.
    ///
    /// Enables protected mode when set. Paging requires both PE and PG.
    pub fn protection_enable(self) -> bool {
        self.0 & 1 != 0
    }

    /// Checks if the CR0.WP flag is set.
    ///
    /// When set, supervisor-level code cannot write into read-only pages.
    pub fn write_protect(self) -> bool {
        self.0 >> 16 & 1 != 0
    }

    /// Checks if the CR0.PG flag is set.
    ///
    /// Enables paging when set; when clear, all linear addresses are treated
    /// as physical addresses.
    pub fn paging(self) -> bool {
        self.0 >> 31 & 1 != 0
    }
}

impl std::fmt::Debug for Cr0 {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Cr0")
            .field("protection_enable", &self.protection_enable())
            .field("write_protect", &self.write_protect())
            .field("paging", &self.paging())
            .finish()
    }
}

impl From<u64> for Cr0 {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Cr0> for u64 {
    fn from(value: Cr0) -> Self {
        value.0
    }
}
