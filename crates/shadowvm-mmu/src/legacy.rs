use shadowvm_arch_x86::{PageTableEntry32, PageTableLevel, PagingEntry as _, PagingMode};
use shadowvm_core::VmmError;

use crate::{ShadowPageState, level::PagingFormat};

/// 2-level, 32-bit paging.
///
/// A page directory entry with PS set maps a 4MB page, but only while the
/// guest has CR4.PSE enabled. Otherwise the bit is ignored and the entry
/// points at a page table like any other.
pub(crate) struct Legacy;

impl PagingFormat for Legacy {
    type Entry = PageTableEntry32;

    const MODE: PagingMode = PagingMode::Legacy;

    fn maps_large_page(
        state: &ShadowPageState,
        level: PageTableLevel,
        entry: Self::Entry,
    ) -> Result<bool, VmmError> {
        Ok(level == PageTableLevel::Pd
            && entry.present()
            && entry.large()
            && state.page_size_extensions)
    }
}
