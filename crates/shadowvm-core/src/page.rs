use std::{ops::Deref, rc::Rc};

use zerocopy::{FromBytes, Immutable, KnownLayout};

/// A page of memory mapped by the driver.
///
/// Used for guest-physical pages (guest page tables, instruction bytes) as
/// well as host-physical pages (shadow page tables).
#[derive(Clone)]
pub struct MappedPage(Rc<dyn Deref<Target = [u8]>>);

impl MappedPage {
    /// Creates a new mapped page.
    pub fn new<T>(inner: T) -> Self
    where
        T: Deref<Target = [u8]> + 'static,
    {
        Self(Rc::new(inner))
    }

    /// Views the page as a table of fixed-size entries.
    ///
    /// Returns `None` if the page length is not a multiple of the entry size
    /// or the backing memory is misaligned for `T`.
    pub fn entries<T>(&self) -> Option<&[T]>
    where
        T: FromBytes + Immutable + KnownLayout,
    {
        <[T]>::ref_from_bytes(self).ok()
    }

    /// Reads a single entry of a table of fixed-size entries.
    pub fn entry<T>(&self, index: usize) -> Option<T>
    where
        T: FromBytes + Immutable + KnownLayout + Copy,
    {
        let size = std::mem::size_of::<T>();
        let bytes = self.get(index * size..(index + 1) * size)?;
        T::read_from_bytes(bytes).ok()
    }
}

impl Deref for MappedPage {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<[u8]> for MappedPage {
    fn as_ref(&self) -> &[u8] {
        self.deref()
    }
}

impl std::fmt::Debug for MappedPage {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("MappedPage").field("len", &self.len()).finish()
    }
}
