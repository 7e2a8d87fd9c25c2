use shadowvm_arch_x86::{PageTableEntry64, PageTableLevel, PagingEntry as _, PagingMode};
use shadowvm_core::VmmError;

use crate::{ShadowPageState, level::PagingFormat};

/// 4-level, 64-bit paging.
///
/// 2MB pages are shadowed with 4KB leaves. 1GB pages are rejected.
pub(crate) struct Long;

impl PagingFormat for Long {
    type Entry = PageTableEntry64;

    const MODE: PagingMode = PagingMode::Long;

    fn maps_large_page(
        _state: &ShadowPageState,
        level: PageTableLevel,
        entry: Self::Entry,
    ) -> Result<bool, VmmError> {
        if !entry.present() || !entry.large() {
            return Ok(false);
        }

        match level {
            PageTableLevel::Pd => Ok(true),
            PageTableLevel::Pdpt => {
                tracing::error!(?entry, "1GB guest pages are not supported");
                Err(VmmError::NotSupported)
            }
            PageTableLevel::Pt | PageTableLevel::Pml4 => Ok(false),
        }
    }
}
