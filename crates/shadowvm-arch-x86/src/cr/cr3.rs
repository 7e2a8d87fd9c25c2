use shadowvm_core::{Hpa, Pa};

use crate::PagingMode;

/// `CR3` control register.
///
/// Contains the physical address of the top-level paging structure.
#[derive(Default, Clone, Copy, PartialEq, Eq)]
pub struct Cr3(pub u64);

impl Cr3 {
    /// Returns the guest-physical address of the top-level table.
    ///
    /// 2-level paging uses bits 12..31, 4-level paging bits 12..51.
    pub fn root(self, mode: PagingMode) -> Pa {
        match mode {
            PagingMode::Legacy => Pa(self.0 & 0xffff_f000),
            PagingMode::Long => Pa(self.0 & 0x000f_ffff_ffff_f000),
        }
    }

    /// Returns true if the top-level table is accessed write-through.
    pub fn write_through(self) -> bool {
        self.0 >> 3 & 1 != 0
    }

    /// Returns true if caching of the top-level table is disabled.
    pub fn cache_disable(self) -> bool {
        self.0 >> 4 & 1 != 0
    }
}

impl std::fmt::Debug for Cr3 {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Cr3")
            .field("value", &format_args!("{:#x}", self.0))
            .field("write_through", &self.write_through())
            .field("cache_disable", &self.cache_disable())
            .finish()
    }
}

impl From<u64> for Cr3 {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Cr3> for u64 {
    fn from(value: Cr3) -> Self {
        value.0
    }
}

impl From<Hpa> for Cr3 {
    fn from(value: Hpa) -> Self {
        Self(value.0)
    }
}
