//! x86 paging definitions.
//!
//! Page table entry formats for 2-level (32-bit) and 4-level (64-bit)
//! paging, the control registers that select between them, the page fault
//! error code and the exceptions the engine injects.

mod access;
mod cr;
mod efer;
mod entry;
mod interrupt;
mod paging;
mod registers;
mod translation;

use shadowvm_core::Architecture;

pub use self::{
    access::{AccessStatus, PageFaultErrorCode},
    cr::{Cr0, Cr2, Cr3, Cr4},
    efer::MsrEfer,
    entry::{PageTableEntry32, PageTableEntry64, PagingEntry},
    interrupt::{ExceptionVector, Interrupt, InterruptType},
    paging::{PageTableLevel, PagingMode},
    registers::Registers,
    translation::{TranslationEntries, TranslationEntry, VaTranslation},
};

/// x86 architecture.
#[derive(Debug)]
pub struct X86;

impl Architecture for X86 {
    const PAGE_SIZE: u64 = 0x1000;
    const PAGE_SHIFT: u64 = 12;
    const PAGE_MASK: u64 = 0xFFFFFFFFFFFFF000;

    type Registers = Registers;
    type Interrupt = Interrupt;
}
