//! Identity tables for a guest running with paging disabled.
//!
//! The guest's physical addresses are its virtual addresses, so the
//! hardware needs tables that translate each guest-physical page to the
//! host page backing it. Only regions with host memory behind them are
//! mapped. Anything else stays not present, so that an access faults and
//! reaches the memory hooks.

use serde::{Deserialize, Serialize};
use shadowvm_arch_x86::{PageTableEntry32, PageTableEntry64, PageTableLevel, PagingEntry, PagingMode};
use shadowvm_core::{HostRegionType, Hpa, Pa, VmmError};
use zerocopy::IntoBytes as _;

use crate::{ShadowDriver, ShadowPaging};

/// A freshly built set of identity tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassthroughTables {
    /// Format of the tables.
    pub mode: PagingMode,

    /// Top-level table.
    pub root: Hpa,

    /// Number of frames the tables occupy, root included.
    pub frames: usize,
}

impl<Driver> ShadowPaging<Driver>
where
    Driver: ShadowDriver,
{
    /// Builds identity tables covering guest-physical memory up to
    /// [`RegionLookup::guest_physical_end`].
    ///
    /// The tables form a context of their own in the frame arena. They are
    /// not loaded.
    ///
    /// Fails with [`VmmError::HostAddressOutOfReach`] if `mode` cannot point
    /// at the host memory behind a mapped region. 2-level tables only reach
    /// the first 4GB of host memory.
    ///
    /// [`RegionLookup::guest_physical_end`]: shadowvm_core::RegionLookup::guest_physical_end
    pub fn build_identity_tables(&mut self, mode: PagingMode) -> Result<PassthroughTables, VmmError> {
        let end = self.driver.guest_physical_end();
        let root = self.frames.allocate_root(&self.driver, mode)?;

        let result = match mode {
            PagingMode::Legacy => {
                self.fill_identity_table::<PageTableEntry32>(mode, root, mode.root_level(), Pa(0), end)
            }
            PagingMode::Long => {
                self.fill_identity_table::<PageTableEntry64>(mode, root, mode.root_level(), Pa(0), end)
            }
        };

        if let Err(err) = result {
            tracing::warn!(?mode, %err, "failed to build passthrough tables");
            self.frames.release_context(&self.driver, root)?;
            return Err(err);
        }

        Ok(PassthroughTables {
            mode,
            root,
            frames: self.frames.frames_in(root).count(),
        })
    }

    /// Fills `table`, whose first entry maps guest-physical `base`.
    ///
    /// Child tables left without a single present entry are freed again.
    /// Returns whether `table` has any present entry.
    fn fill_identity_table<E>(
        &mut self,
        mode: PagingMode,
        table: Hpa,
        level: PageTableLevel,
        base: Pa,
        end: Pa,
    ) -> Result<bool, VmmError>
    where
        E: PagingEntry,
    {
        let span = mode.entry_span(level);
        let mut entries = vec![E::default(); mode.entries_per_table() as usize];

        for (index, entry) in entries.iter_mut().enumerate() {
            let start = base + index as u64 * span;
            if start >= end {
                break;
            }

            match level.next() {
                None => {
                    let region = match self.driver.region(start) {
                        Some(region) if region.host_type.is_mappable() => region,
                        _ => continue,
                    };

                    let host = region.host_address(start);
                    if !E::can_address(host.0) {
                        tracing::warn!(?mode, %start, %host, "host frame out of reach of the identity tables");
                        return Err(VmmError::HostAddressOutOfReach(host));
                    }

                    entry.set_present(true);
                    entry.set_user(true);
                    entry.set_write(region.host_type == HostRegionType::Allocated);
                    entry.set_address(host.0);
                }

                Some(next) => {
                    let child = self.frames.allocate_child(&self.driver, mode, next, table)?;

                    if self.fill_identity_table::<E>(mode, child, next, start, end)? {
                        entry.set_present(true);
                        entry.set_user(true);
                        entry.set_write(true);
                        entry.set_address(child.0);
                    } else {
                        self.frames.release(&self.driver, child)?;
                    }
                }
            }
        }

        self.driver.write_host(table, entries.as_bytes())?;
        Ok(entries.iter().any(|entry| entry.present()))
    }
}
