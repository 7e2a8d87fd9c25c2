//! Shadow frame arena.
//!
//! Every host page holding a shadow table is recorded here together with
//! the context (top-level shadow table) that owns it and the table that
//! points at it. Teardown never follows the pointers stored in the tables
//! themselves. It filters the arena instead.

use indexmap::IndexMap;
use shadowvm_arch_x86::{PageTableLevel, PagingMode, X86};
use shadowvm_core::{Architecture as _, HostMemory, Hpa, VmmError};

/// A host page used as a shadow page table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShadowFrame {
    /// Host-physical address of the page.
    pub hpa: Hpa,

    /// Top-level shadow table this frame belongs to.
    ///
    /// A top-level table is its own context.
    pub context: Hpa,

    /// Level of the table stored in the frame.
    pub level: PageTableLevel,

    /// Table whose entry points at this frame. `None` for a top-level
    /// table.
    pub parent: Option<Hpa>,
}

/// Shadow frames owned by one engine, keyed by host-physical address.
#[derive(Debug, Default)]
pub struct FrameArena {
    frames: IndexMap<Hpa, ShadowFrame>,
    limit: Option<usize>,
}

impl FrameArena {
    /// Creates an empty arena.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty arena holding at most `limit` frames.
    pub fn with_limit(limit: Option<usize>) -> Self {
        Self {
            frames: IndexMap::new(),
            limit,
        }
    }

    /// Changes the maximum number of frames.
    ///
    /// Frames already in the arena are kept even if they exceed the new
    /// limit.
    pub fn set_limit(&mut self, limit: Option<usize>) {
        self.limit = limit;
    }

    /// Returns the number of frames in the arena.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Checks if the arena is empty.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Looks up a frame.
    pub fn get(&self, hpa: Hpa) -> Option<&ShadowFrame> {
        self.frames.get(&hpa)
    }

    /// Checks if the arena tracks the frame.
    pub fn contains(&self, hpa: Hpa) -> bool {
        self.frames.contains_key(&hpa)
    }

    /// Iterates over all frames in allocation order.
    pub fn iter(&self) -> impl Iterator<Item = &ShadowFrame> {
        self.frames.values()
    }

    /// Iterates over the frames owned by `context`.
    pub fn frames_in(&self, context: Hpa) -> impl Iterator<Item = &ShadowFrame> {
        self.frames
            .values()
            .filter(move |frame| frame.context == context)
    }

    /// Returns the top-level tables of all live contexts.
    pub fn contexts(&self) -> Vec<Hpa> {
        self.frames
            .values()
            .filter(|frame| frame.parent.is_none())
            .map(|frame| frame.hpa)
            .collect()
    }

    /// Allocates a zeroed frame for a new top-level table in `mode`.
    pub(crate) fn allocate_root<Driver>(
        &mut self,
        driver: &Driver,
        mode: PagingMode,
    ) -> Result<Hpa, VmmError>
    where
        Driver: HostMemory,
    {
        self.allocate_frame(driver, mode, mode.root_level(), None)
    }

    /// Allocates a zeroed frame for a table referenced from `parent`.
    pub(crate) fn allocate_child<Driver>(
        &mut self,
        driver: &Driver,
        mode: PagingMode,
        level: PageTableLevel,
        parent: Hpa,
    ) -> Result<Hpa, VmmError>
    where
        Driver: HostMemory,
    {
        self.allocate_frame(driver, mode, level, Some(parent))
    }

    /// Frames the entries of `mode` cannot point at are handed back to the
    /// host and fail with [`VmmError::HostAddressOutOfReach`].
    fn allocate_frame<Driver>(
        &mut self,
        driver: &Driver,
        mode: PagingMode,
        level: PageTableLevel,
        parent: Option<Hpa>,
    ) -> Result<Hpa, VmmError>
    where
        Driver: HostMemory,
    {
        let context = match parent {
            Some(parent) => match self.frames.get(&parent) {
                Some(frame) => Some(frame.context),
                None => return Err(VmmError::Other("parent shadow frame is not tracked")),
            },
            None => None,
        };

        if self.limit.is_some_and(|limit| self.frames.len() >= limit) {
            tracing::warn!(limit = ?self.limit, "shadow frame limit reached");
            return Err(VmmError::FrameAllocation);
        }

        let hpa = driver.allocate_page().ok_or(VmmError::FrameAllocation)?;
        if self.frames.contains_key(&hpa) {
            // The page is a live table of ours. Its owner frees it.
            tracing::error!(%hpa, "host handed out a shadow frame twice");
            return Err(VmmError::FrameInUse(hpa));
        }

        if hpa.0 > mode.max_address() {
            tracing::warn!(%hpa, ?mode, "shadow frame out of reach of the tables");
            driver.free_page(hpa)?;
            return Err(VmmError::HostAddressOutOfReach(hpa));
        }

        driver.write_host(hpa, &[0u8; X86::PAGE_SIZE as usize])?;

        let frame = ShadowFrame {
            hpa,
            context: context.unwrap_or(hpa),
            level,
            parent,
        };

        tracing::trace!(%hpa, context = %frame.context, ?level, "shadow frame allocated");
        self.frames.insert(hpa, frame);
        Ok(hpa)
    }

    /// Returns a single frame to the host.
    pub(crate) fn release<Driver>(&mut self, driver: &Driver, hpa: Hpa) -> Result<(), VmmError>
    where
        Driver: HostMemory,
    {
        if self.frames.shift_remove(&hpa).is_some() {
            tracing::trace!(%hpa, "shadow frame released");
            driver.free_page(hpa)?;
        }

        Ok(())
    }

    /// Returns every frame owned by `context` to the host.
    ///
    /// Frames of other contexts are left alone. Returns the number of
    /// released frames.
    pub(crate) fn release_context<Driver>(
        &mut self,
        driver: &Driver,
        context: Hpa,
    ) -> Result<usize, VmmError>
    where
        Driver: HostMemory,
    {
        let victims: Vec<Hpa> = self.frames_in(context).map(|frame| frame.hpa).collect();
        self.release_all(driver, &victims)?;

        tracing::debug!(%context, frames = victims.len(), "shadow context retired");
        Ok(victims.len())
    }

    /// Returns `root` and every frame below it to the host.
    ///
    /// Returns the number of released frames.
    pub(crate) fn release_subtree<Driver>(
        &mut self,
        driver: &Driver,
        root: Hpa,
    ) -> Result<usize, VmmError>
    where
        Driver: HostMemory,
    {
        if !self.frames.contains_key(&root) {
            return Ok(0);
        }

        let mut victims = vec![root];
        let mut cursor = 0;
        while cursor < victims.len() {
            let parent = victims[cursor];
            victims.extend(
                self.frames
                    .values()
                    .filter(|frame| frame.parent == Some(parent))
                    .map(|frame| frame.hpa),
            );
            cursor += 1;
        }

        self.release_all(driver, &victims)?;
        Ok(victims.len())
    }

    /// Returns every frame to the host.
    pub(crate) fn release_everything<Driver>(&mut self, driver: &Driver) -> Result<(), VmmError>
    where
        Driver: HostMemory,
    {
        let victims: Vec<Hpa> = self.frames.keys().copied().collect();
        self.release_all(driver, &victims)
    }

    fn release_all<Driver>(&mut self, driver: &Driver, victims: &[Hpa]) -> Result<(), VmmError>
    where
        Driver: HostMemory,
    {
        // Frames are untracked even if freeing one of them fails.
        for hpa in victims {
            self.frames.shift_remove(hpa);
        }

        for &hpa in victims {
            driver.free_page(hpa)?;
        }

        Ok(())
    }
}
