/// `CR4` control register.
#[derive(Default, Clone, Copy, PartialEq, Eq)]
pub struct Cr4(pub u64);

impl Cr4 {
    /// Checks if the CR4.PSE flag is set.
    ///
    /// Enables 4MB pages with 32-bit paging.
    pub fn page_size_extensions(self) -> bool {
        self.0 >> 4 & 1 != 0
    }

    /// Checks if the CR4.PAE flag is set.
    ///
    /// Selects PAE paging, or 4-level paging when long mode is active.
    pub fn physical_address_extension(self) -> bool {
        self.0 >> 5 & 1 != 0
    }

    /// Checks if the CR4.PGE flag is set.
    pub fn page_global_enable(self) -> bool {
        self.0 >> 7 & 1 != 0
    }
}

impl std::fmt::Debug for Cr4 {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Cr4")
            .field("page_size_extensions", &self.page_size_extensions())
            .field("physical_address_extension", &self.physical_address_extension())
            .field("page_global_enable", &self.page_global_enable())
            .finish()
    }
}

impl From<u64> for Cr4 {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Cr4> for u64 {
    fn from(value: Cr4) -> Self {
        value.0
    }
}
