use serde::{Deserialize, Serialize};

use crate::{Cr0, Cr4, MsrEfer, PageTableEntry32, PageTableEntry64, PagingEntry};
use shadowvm_core::{Va, VmmError};

/// Paging modes the engine can shadow.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PagingMode {
    /// 32-bit 2-level paging (PD, PT) with 4MB large pages.
    #[default]
    Legacy,

    /// 64-bit 4-level paging (PML4, PDPT, PD, PT) with 2MB large pages.
    Long,
}

impl PagingMode {
    /// Derives the guest paging mode from its control registers.
    ///
    /// Returns `Ok(None)` while paging is disabled. PAE paging outside of
    /// long mode is not supported.
    pub fn from_control_registers(
        cr0: Cr0,
        cr4: Cr4,
        efer: MsrEfer,
    ) -> Result<Option<Self>, VmmError> {
        if !cr0.paging() {
            return Ok(None);
        }

        if efer.long_mode_active() {
            return Ok(Some(Self::Long));
        }

        if cr4.physical_address_extension() {
            return Err(VmmError::NotSupported);
        }

        Ok(Some(Self::Legacy))
    }

    /// Returns the address width (i.e. pointer size) of the paging mode in
    /// bytes.
    pub fn address_width(self) -> usize {
        match self {
            Self::Legacy => 4,
            Self::Long => 8,
        }
    }

    /// Returns the level of the top-level table (the one CR3 points to).
    pub fn root_level(self) -> PageTableLevel {
        match self {
            Self::Legacy => PageTableLevel::Pd,
            Self::Long => PageTableLevel::Pml4,
        }
    }

    /// Returns the highest physical address an entry of this mode can point
    /// at.
    pub fn max_address(self) -> u64 {
        match self {
            Self::Legacy => PageTableEntry32::MAX_ADDRESS,
            Self::Long => PageTableEntry64::MAX_ADDRESS,
        }
    }

    /// Returns the size of a large page mapped by a page directory entry.
    pub fn large_page_size(self) -> u64 {
        match self {
            Self::Legacy => 0x40_0000,
            Self::Long => 0x20_0000,
        }
    }

    /// Returns the number of bytes covered by a single entry at `level`.
    pub fn entry_span(self, level: PageTableLevel) -> u64 {
        1 << self.index_shift(level)
    }

    /// Returns the number of entries in a table.
    pub fn entries_per_table(self) -> u64 {
        match self {
            Self::Legacy => 1024,
            Self::Long => 512,
        }
    }

    /// Returns the index of `va` in the table at `level`.
    pub fn index_for(self, va: Va, level: PageTableLevel) -> u64 {
        (va.0 >> self.index_shift(level)) & (self.entries_per_table() - 1)
    }

    fn index_shift(self, level: PageTableLevel) -> u32 {
        match self {
            Self::Legacy => 12 + 10 * level as u32,
            Self::Long => 12 + 9 * level as u32,
        }
    }
}

/// The levels in the page table hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum PageTableLevel {
    /// Page Table (PT) - the lowest level, pointing directly to 4KB pages.
    Pt,

    /// Page Directory (PD) - can point to PTs or large pages.
    Pd,

    /// Page Directory Pointer Table (PDPT).
    Pdpt,

    /// Page Map Level 4 (PML4) - the highest level in 4-level paging.
    Pml4,
}

impl PageTableLevel {
    /// Returns the next lower level in the page table hierarchy.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Pt => None,
            Self::Pd => Some(Self::Pt),
            Self::Pdpt => Some(Self::Pd),
            Self::Pml4 => Some(Self::Pdpt),
        }
    }

    /// Checks if entries at this level always map a frame.
    pub fn is_leaf(self) -> bool {
        self == Self::Pt
    }
}
