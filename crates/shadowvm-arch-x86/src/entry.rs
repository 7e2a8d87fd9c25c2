use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Common interface of 32-bit and 64-bit page table entries.
///
/// Directory entries and leaf entries share one format. Bits that only
/// exist at some levels (`dirty`, `large`) read as whatever the hardware
/// would see, and the caller decides whether they are meaningful.
pub trait PagingEntry:
    std::fmt::Debug
    + Default
    + Clone
    + Copy
    + PartialEq
    + Eq
    + FromBytes
    + IntoBytes
    + Immutable
    + KnownLayout
{
    /// Size of the entry in bytes.
    const SIZE: u64;

    /// Size of the page mapped by a large directory entry.
    const LARGE_PAGE_SIZE: u64;

    /// Highest physical address the entry can point at.
    const MAX_ADDRESS: u64;

    /// Checks if `address` fits into the entry's address field.
    fn can_address(address: u64) -> bool {
        address <= Self::MAX_ADDRESS
    }

    /// Returns the raw value zero-extended to 64 bits.
    fn raw(self) -> u64;

    /// Checks if the entry is present.
    fn present(self) -> bool;

    /// Checks if the entry allows writes.
    fn write(self) -> bool;

    /// Checks if the entry allows user-mode access.
    fn user(self) -> bool;

    /// Checks if the entry has been accessed.
    fn accessed(self) -> bool;

    /// Checks if the page has been written to.
    fn dirty(self) -> bool;

    /// Checks if a directory entry maps a large page.
    fn large(self) -> bool;

    /// Checks if instruction fetches through the entry are forbidden.
    ///
    /// Always false for formats without an execute-disable bit.
    fn execute_disable(self) -> bool;

    /// Returns the 4KB-aligned address of the child table or frame.
    fn address(self) -> u64;

    /// Returns the base address of a large page.
    fn large_address(self) -> u64;

    /// Sets the present bit.
    fn set_present(&mut self, value: bool);

    /// Sets the write bit.
    fn set_write(&mut self, value: bool);

    /// Sets the user bit.
    fn set_user(&mut self, value: bool);

    /// Sets the page-level write-through bit.
    fn set_write_through(&mut self, value: bool);

    /// Sets the page-level cache-disable bit.
    fn set_cache_disable(&mut self, value: bool);

    /// Sets the accessed bit.
    fn set_accessed(&mut self, value: bool);

    /// Sets the dirty bit.
    fn set_dirty(&mut self, value: bool);

    /// Sets the global bit.
    fn set_global(&mut self, value: bool);

    /// Sets the execute-disable bit. Ignored by formats without one.
    fn set_execute_disable(&mut self, value: bool);

    /// Sets the 4KB-aligned address of the child table or frame.
    ///
    /// Address bits beyond [`Self::MAX_ADDRESS`] are dropped. Callers check
    /// [`Self::can_address`] first.
    fn set_address(&mut self, address: u64);
}

macro_rules! page_table_entry {
    (
        $(#[$meta:meta])*
        $name:ident($type:ty),
        address_mask: $address_mask:expr,
        large_address_mask: $large_address_mask:expr,
        large_page_size: $large_page_size:expr,
        execute_disable: $execute_disable:expr $(,)?
    ) => {
        $(#[$meta])*
        #[repr(transparent)]
        #[derive(
            Default, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout,
        )]
        pub struct $name(pub $type);

        impl $name {
            const PRESENT: u32 = 0;
            const WRITE: u32 = 1;
            const USER: u32 = 2;
            const WRITE_THROUGH: u32 = 3;
            const CACHE_DISABLE: u32 = 4;
            const ACCESSED: u32 = 5;
            const DIRTY: u32 = 6;
            const LARGE: u32 = 7;
            const GLOBAL: u32 = 8;
            const AVAILABLE: u32 = 9;

            fn bit(self, shift: u32) -> bool {
                (self.0 >> shift) & 1 != 0
            }

            fn set_bit(&mut self, shift: u32, value: bool) {
                if value {
                    self.0 |= 1 << shift;
                } else {
                    self.0 &= !(1 << shift);
                }
            }

            /// Checks if page-level write-through is enabled.
            pub fn write_through(self) -> bool {
                self.bit(Self::WRITE_THROUGH)
            }

            /// Checks if caching is disabled for the page.
            pub fn cache_disable(self) -> bool {
                self.bit(Self::CACHE_DISABLE)
            }

            /// Checks if the page is global (shared between all address
            /// spaces).
            pub fn global(self) -> bool {
                self.bit(Self::GLOBAL)
            }

            /// Returns the three bits reserved for software use.
            pub fn available(self) -> u8 {
                ((self.0 >> Self::AVAILABLE) & 0b111) as u8
            }

            /// Sets the three bits reserved for software use.
            pub fn set_available(&mut self, value: u8) {
                self.0 &= !(0b111 << Self::AVAILABLE);
                self.0 |= ((value & 0b111) as $type) << Self::AVAILABLE;
            }
        }

        impl PagingEntry for $name {
            const SIZE: u64 = ::std::mem::size_of::<$type>() as u64;
            const LARGE_PAGE_SIZE: u64 = $large_page_size;
            const MAX_ADDRESS: u64 = {
                let mask: $type = $address_mask;
                mask as u64 | 0xfff
            };

            fn raw(self) -> u64 {
                self.0 as u64
            }

            fn present(self) -> bool {
                self.bit(Self::PRESENT)
            }

            fn write(self) -> bool {
                self.bit(Self::WRITE)
            }

            fn user(self) -> bool {
                self.bit(Self::USER)
            }

            fn accessed(self) -> bool {
                self.bit(Self::ACCESSED)
            }

            fn dirty(self) -> bool {
                self.bit(Self::DIRTY)
            }

            fn large(self) -> bool {
                self.bit(Self::LARGE)
            }

            fn execute_disable(self) -> bool {
                match $execute_disable {
                    Some(shift) => self.bit(shift),
                    None => false,
                }
            }

            fn address(self) -> u64 {
                (self.0 & $address_mask) as u64
            }

            fn large_address(self) -> u64 {
                (self.0 & $large_address_mask) as u64
            }

            fn set_present(&mut self, value: bool) {
                self.set_bit(Self::PRESENT, value);
            }

            fn set_write(&mut self, value: bool) {
                self.set_bit(Self::WRITE, value);
            }

            fn set_user(&mut self, value: bool) {
                self.set_bit(Self::USER, value);
            }

            fn set_write_through(&mut self, value: bool) {
                self.set_bit(Self::WRITE_THROUGH, value);
            }

            fn set_cache_disable(&mut self, value: bool) {
                self.set_bit(Self::CACHE_DISABLE, value);
            }

            fn set_accessed(&mut self, value: bool) {
                self.set_bit(Self::ACCESSED, value);
            }

            fn set_dirty(&mut self, value: bool) {
                self.set_bit(Self::DIRTY, value);
            }

            fn set_global(&mut self, value: bool) {
                self.set_bit(Self::GLOBAL, value);
            }

            fn set_execute_disable(&mut self, value: bool) {
                if let Some(shift) = $execute_disable {
                    self.set_bit(shift, value);
                }
            }

            fn set_address(&mut self, address: u64) {
                self.0 = (self.0 & !$address_mask) | (address as $type & $address_mask);
            }
        }

        impl ::std::fmt::Debug for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
                f.debug_struct(stringify!($name))
                    .field("present", &self.present())
                    .field("write", &self.write())
                    .field("user", &self.user())
                    .field("write_through", &self.write_through())
                    .field("cache_disable", &self.cache_disable())
                    .field("accessed", &self.accessed())
                    .field("dirty", &self.dirty())
                    .field("large", &self.large())
                    .field("global", &self.global())
                    .field("address", &format_args!("{:#x}", self.address()))
                    .finish()
            }
        }
    };
}

page_table_entry! {
    /// An entry of a 32-bit (2-level) page table or page directory.
    PageTableEntry32(u32),
    address_mask: 0xffff_f000,
    large_address_mask: 0xffc0_0000,
    large_page_size: 0x40_0000,
    execute_disable: None::<u32>,
}

page_table_entry! {
    /// An entry of a 64-bit (4-level) paging structure.
    PageTableEntry64(u64),
    address_mask: 0x000f_ffff_ffff_f000,
    large_address_mask: 0x000f_ffff_ffe0_0000,
    large_page_size: 0x20_0000,
    execute_disable: Some(63u32),
}
