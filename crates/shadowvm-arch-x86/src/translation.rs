use shadowvm_core::{Architecture as _, GuestMemory, Pa, Va, VmmError};
use smallvec::SmallVec;

use crate::{PageTableEntry32, PageTableEntry64, PageTableLevel, PagingEntry, PagingMode, X86};

/// A single entry visited during a guest page table walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranslationEntry {
    /// The level of the table the entry belongs to.
    pub level: PageTableLevel,

    /// The raw entry, zero-extended to 64 bits.
    pub raw: u64,

    /// Whether the entry is present.
    pub present: bool,

    /// Whether the entry maps a large page.
    pub large: bool,

    /// The guest-physical address of the entry itself.
    pub entry_address: Pa,
}

impl TranslationEntry {
    /// Checks if the entry terminates the walk at a frame.
    pub fn is_leaf(&self) -> bool {
        self.present && (self.level.is_leaf() || self.large)
    }
}

/// Collection of translation entries, typically used in page table walks.
pub type TranslationEntries = SmallVec<[TranslationEntry; 4]>;

/// The result of walking the guest page tables for one virtual address.
#[derive(Debug)]
pub struct VaTranslation {
    entries: TranslationEntries,
    pa: Option<Pa>,
}

impl VaTranslation {
    /// Returns the entries visited during the walk, top level first.
    pub fn entries(&self) -> &[TranslationEntry] {
        &self.entries
    }

    /// Returns the entry visited at `level`, if the walk got that far.
    pub fn entry(&self, level: PageTableLevel) -> Option<&TranslationEntry> {
        self.entries.iter().find(|entry| entry.level == level)
    }

    /// Returns the translated guest-physical address, if the address is
    /// mapped.
    pub fn pa(&self) -> Option<Pa> {
        self.pa
    }
}

impl X86 {
    /// Walks the guest page tables rooted at `root`.
    ///
    /// A not-present entry ends the walk without an error. Failing to read
    /// a table does not.
    ///
    /// `page_size_extensions` is CR4.PSE. In 2-level paging the PS bit of a
    /// directory entry is ignored without it.
    pub fn translation<Driver>(
        driver: &Driver,
        mode: PagingMode,
        page_size_extensions: bool,
        root: Pa,
        va: Va,
    ) -> Result<VaTranslation, VmmError>
    where
        Driver: GuestMemory,
    {
        let large_directories = mode == PagingMode::Long || page_size_extensions;

        match mode {
            PagingMode::Legacy => {
                walk::<PageTableEntry32, Driver>(driver, mode, large_directories, root, va)
            }
            PagingMode::Long => {
                walk::<PageTableEntry64, Driver>(driver, mode, large_directories, root, va)
            }
        }
    }

    /// Translates a guest virtual address to a guest-physical address.
    pub fn translate_address<Driver>(
        driver: &Driver,
        mode: PagingMode,
        page_size_extensions: bool,
        root: Pa,
        va: Va,
    ) -> Result<Pa, VmmError>
    where
        Driver: GuestMemory,
    {
        Self::translation(driver, mode, page_size_extensions, root, va)?
            .pa()
            .ok_or(VmmError::NotMapped(va))
    }

    /// Reads guest memory through the guest page tables.
    ///
    /// Returns the number of bytes read, which is less than `buffer.len()`
    /// only if the range runs into an unmapped page.
    pub fn read_virtual<Driver>(
        driver: &Driver,
        mode: PagingMode,
        page_size_extensions: bool,
        root: Pa,
        va: Va,
        buffer: &mut [u8],
    ) -> Result<usize, VmmError>
    where
        Driver: GuestMemory,
    {
        let mut position = 0;

        while position < buffer.len() {
            let address = va + position as u64;
            let pa = match Self::translation(driver, mode, page_size_extensions, root, address)?.pa() {
                Some(pa) => pa,
                None if position > 0 => break,
                None => return Err(VmmError::NotMapped(address)),
            };

            let page = driver.read_guest_page(Self::gfn_from_pa(pa))?;
            let offset = Self::pa_offset(pa) as usize;
            let size = (page.len() - offset).min(buffer.len() - position);
            buffer[position..position + size].copy_from_slice(&page[offset..offset + size]);
            position += size;
        }

        Ok(position)
    }
}

fn walk<E, Driver>(
    driver: &Driver,
    mode: PagingMode,
    large_directories: bool,
    root: Pa,
    va: Va,
) -> Result<VaTranslation, VmmError>
where
    E: PagingEntry,
    Driver: GuestMemory,
{
    let mut entries = TranslationEntries::new();
    let mut table = root;
    let mut level = mode.root_level();

    loop {
        let index = mode.index_for(va, level);
        let page = driver.read_guest_page(X86::gfn_from_pa(table))?;
        let entry = page
            .entry::<E>(index as usize)
            .ok_or(VmmError::Other("short page table read"))?;

        let large = match level {
            PageTableLevel::Pd => large_directories && entry.large(),
            PageTableLevel::Pdpt => entry.large(),
            _ => false,
        };
        entries.push(TranslationEntry {
            level,
            raw: entry.raw(),
            present: entry.present(),
            large,
            entry_address: table + index * E::SIZE,
        });

        if !entry.present() {
            return Ok(VaTranslation { entries, pa: None });
        }

        let span = mode.entry_span(level);
        if level == PageTableLevel::Pt || large {
            let base = match level {
                PageTableLevel::Pt => entry.address(),
                PageTableLevel::Pd => entry.large_address(),
                _ => entry.raw() & 0x000f_ffff_c000_0000,
            };

            let pa = Pa(base + va.offset_in(span));
            return Ok(VaTranslation {
                entries,
                pa: Some(pa),
            });
        }

        table = Pa(entry.address());
        level = match level.next() {
            Some(next) => next,
            None => return Err(VmmError::Other("page table walk overran the leaf level")),
        };
    }
}
