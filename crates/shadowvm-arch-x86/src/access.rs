use serde::{Deserialize, Serialize};

use crate::PagingEntry;

bitflags::bitflags! {
    /// Page fault error code pushed by the processor.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct PageFaultErrorCode: u32 {
        /// The fault was caused by a page-level protection violation
        /// (clear: by a not-present page).
        const PRESENT = 1 << 0;

        /// The access causing the fault was a write.
        const WRITE = 1 << 1;

        /// The access causing the fault originated in user mode.
        const USER = 1 << 2;

        /// A reserved bit was set in a paging-structure entry.
        const RESERVED = 1 << 3;

        /// The fault was caused by an instruction fetch.
        const INSTRUCTION_FETCH = 1 << 4;
    }
}

impl PageFaultErrorCode {
    /// Checks if the faulting access was a write.
    pub fn is_write(self) -> bool {
        self.contains(Self::WRITE)
    }

    /// Checks if the faulting access was an instruction fetch.
    pub fn is_fetch(self) -> bool {
        self.contains(Self::INSTRUCTION_FETCH)
    }

    /// Checks if the faulting access originated in user mode.
    pub fn is_user(self) -> bool {
        self.contains(Self::USER)
    }
}

impl From<u32> for PageFaultErrorCode {
    fn from(value: u32) -> Self {
        Self::from_bits_retain(value)
    }
}

impl From<PageFaultErrorCode> for u32 {
    fn from(value: PageFaultErrorCode) -> Self {
        value.bits()
    }
}

/// Outcome of checking one paging-structure entry against an access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessStatus {
    /// The entry permits the access.
    Ok,

    /// The entry is not present.
    NotPresent,

    /// The access is a write and the entry is read-only.
    WriteError,

    /// The access is from user mode and the entry is supervisor-only.
    UserError,

    /// The access is an instruction fetch and the entry forbids execution.
    FetchError,
}

impl AccessStatus {
    /// Checks `entry` against the access described by `error_code`.
    ///
    /// Presence is checked first, then write permission, then privilege,
    /// then execute permission.
    pub fn of<E>(entry: E, error_code: PageFaultErrorCode) -> Self
    where
        E: PagingEntry,
    {
        if !entry.present() {
            Self::NotPresent
        } else if error_code.is_write() && !entry.write() {
            Self::WriteError
        } else if error_code.is_user() && !entry.user() {
            Self::UserError
        } else if error_code.is_fetch() && entry.execute_disable() {
            Self::FetchError
        } else {
            Self::Ok
        }
    }
}
