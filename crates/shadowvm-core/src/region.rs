//! Guest-physical memory map.
//!
//! Every guest-physical address the engine shadows is classified by a
//! [`RegionDescriptor`]. The descriptor decides whether a shadow entry may
//! point at host memory directly, must stay read-only, or must never be
//! present at all.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{Hpa, Pa, VmmError};

/// How a guest-physical region is backed on the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HostRegionType {
    /// Ordinary RAM backed by host memory.
    Allocated,

    /// RAM backed by host memory whose writes must be trapped.
    WriteHook,

    /// No backing memory. Every access is trapped (e.g. MMIO).
    FullHook,

    /// No mapping exists. Any access is a fatal guest error.
    Invalid,

    /// Backed by external storage and not resident in host memory.
    Swapped,
}

impl HostRegionType {
    /// Checks if a shadow entry may map the region directly.
    pub fn is_mappable(self) -> bool {
        matches!(self, Self::Allocated | Self::WriteHook)
    }
}

/// A contiguous range of guest-physical memory and its host backing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionDescriptor {
    /// First guest-physical address of the region.
    pub guest_start: Pa,

    /// Guest-physical address one past the end of the region.
    pub guest_end: Pa,

    /// Backing classification.
    pub host_type: HostRegionType,

    /// Host-physical address backing `guest_start`.
    ///
    /// Meaningful only for regions with host memory behind them.
    pub host_addr: Hpa,
}

impl RegionDescriptor {
    /// Creates a new region descriptor.
    pub fn new(guest_start: Pa, guest_end: Pa, host_type: HostRegionType, host_addr: Hpa) -> Self {
        Self {
            guest_start,
            guest_end,
            host_type,
            host_addr,
        }
    }

    /// Checks if the region contains the guest-physical address.
    pub fn contains(&self, pa: Pa) -> bool {
        self.guest_start <= pa && pa < self.guest_end
    }

    /// Returns the host-physical address backing `pa`.
    ///
    /// The region is mapped linearly, so the result is `pa` shifted by the
    /// distance between the guest and host bases.
    pub fn host_address(&self, pa: Pa) -> Hpa {
        self.host_addr + (pa - self.guest_start)
    }
}

/// An ordered set of non-overlapping guest-physical regions.
#[derive(Debug, Default, Clone)]
pub struct MemoryMap {
    regions: BTreeMap<Pa, RegionDescriptor>,
}

impl MemoryMap {
    /// Creates an empty memory map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a region to the map.
    ///
    /// Fails if the region is empty or overlaps an existing one.
    pub fn insert(&mut self, region: RegionDescriptor) -> Result<(), VmmError> {
        if region.guest_start >= region.guest_end {
            return Err(VmmError::Other("empty memory region"));
        }

        let overlaps = self
            .regions
            .range(..region.guest_end)
            .next_back()
            .is_some_and(|(_, existing)| existing.guest_end > region.guest_start);

        if overlaps {
            tracing::warn!(
                start = %region.guest_start,
                end = %region.guest_end,
                "overlapping memory region"
            );
            return Err(VmmError::Other("overlapping memory region"));
        }

        tracing::debug!(
            start = %region.guest_start,
            end = %region.guest_end,
            host = %region.host_addr,
            typ = ?region.host_type,
            "memory region added"
        );

        self.regions.insert(region.guest_start, region);
        Ok(())
    }

    /// Removes the region starting at `guest_start`.
    pub fn remove(&mut self, guest_start: Pa) -> Option<RegionDescriptor> {
        self.regions.remove(&guest_start)
    }

    /// Looks up the region containing `pa`.
    pub fn lookup(&self, pa: Pa) -> Option<RegionDescriptor> {
        self.regions
            .range(..=pa)
            .next_back()
            .map(|(_, region)| *region)
            .filter(|region| region.contains(pa))
    }

    /// Returns the end of the highest region, or zero for an empty map.
    pub fn end(&self) -> Pa {
        self.regions
            .values()
            .next_back()
            .map(|region| region.guest_end)
            .unwrap_or_default()
    }

    /// Iterates over the regions in address order.
    pub fn iter(&self) -> impl Iterator<Item = &RegionDescriptor> {
        self.regions.values()
    }
}
