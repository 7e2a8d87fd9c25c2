//! Architecture abstraction.

use std::fmt::Debug;

use crate::{Gfn, Pa};

/// Defines the architecture-specific constants and types the engine and
/// its drivers exchange.
pub trait Architecture {
    /// The size of a memory page in bytes.
    ///
    /// # Architecture-specific
    ///
    /// - **x86**: `0x1000` (4096 bytes)
    const PAGE_SIZE: u64;

    /// The number of bits to shift when converting between page numbers and
    /// physical addresses.
    ///
    /// # Architecture-specific
    ///
    /// - **x86**: `12` (2^12 = 4096)
    const PAGE_SHIFT: u64;

    /// A bitmask used to isolate the page number from a full address.
    ///
    /// # Architecture-specific
    ///
    /// - **x86**: `0xFFFFFFFFFFFFF000`
    const PAGE_MASK: u64;

    /// The complete set of CPU registers for the architecture.
    type Registers: Registers;

    /// Interrupts and exceptions that can be injected into a vCPU.
    type Interrupt: Debug + Clone + Copy;

    /// Converts a guest physical address to a guest frame number.
    fn gfn_from_pa(pa: Pa) -> Gfn {
        Gfn(pa.0 >> Self::PAGE_SHIFT)
    }

    /// Converts a guest frame number to a guest physical address.
    fn pa_from_gfn(gfn: Gfn) -> Pa {
        Pa(gfn.0 << Self::PAGE_SHIFT)
    }

    /// Returns the offset of a guest physical address within its page.
    fn pa_offset(pa: Pa) -> u64 {
        pa.0 & !Self::PAGE_MASK
    }
}

/// Register state of a single vCPU.
pub trait Registers: Debug + Default + Clone + Copy {
    /// Returns the instruction pointer.
    fn instruction_pointer(&self) -> u64;

    /// Sets the instruction pointer.
    fn set_instruction_pointer(&mut self, ip: u64);
}
