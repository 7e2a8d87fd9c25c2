use shadowvm_arch_x86::{PageTableLevel, PagingEntry as _, PagingMode, X86};
use shadowvm_core::{Hpa, Pa, Va, VmmError};

use crate::{
    FaultResolution, MemoryMode, ShadowDriver, ShadowPaging,
    legacy::Legacy,
    level::PagingFormat,
    long::Long,
};

/// Longest possible x86 instruction.
const MAX_INSTRUCTION_LENGTH: usize = 15;

impl<Driver> ShadowPaging<Driver>
where
    Driver: ShadowDriver,
{
    /// Emulates an INVLPG the guest executed.
    ///
    /// The instruction is fetched through the guest page tables at CS:RIP
    /// and decoded to find the invalidated address. The matching shadow
    /// entry is dropped and RIP is advanced past the instruction.
    ///
    /// Fails with [`VmmError::PagingDisabled`] while the guest runs without
    /// paging, as INVLPG should not be intercepted then.
    pub fn handle_invlpg(&mut self) -> Result<FaultResolution, VmmError> {
        if self.state.memory_mode != MemoryMode::Virtual {
            return Err(VmmError::PagingDisabled);
        }

        let mode = self.state.guest_mode;
        let mut registers = self.driver.registers(self.vcpu)?;

        let ip = Va(registers.cs_base.wrapping_add(registers.rip));
        let mut bytes = [0u8; MAX_INSTRUCTION_LENGTH];
        let size = X86::read_virtual(
            &self.driver,
            mode,
            self.state.page_size_extensions,
            self.state.guest_cr3.root(mode),
            ip,
            &mut bytes,
        )?;

        let operand = self
            .decoder
            .decode_invlpg(&bytes[..size], mode, &registers)?;

        tracing::debug!(vcpu = %self.vcpu, %ip, va = %operand.address, "invlpg");
        self.invalidate_page(operand.address)?;

        registers.rip = registers.rip.wrapping_add(operand.length as u64);
        if mode == PagingMode::Legacy {
            registers.rip &= 0xffff_ffff;
        }

        self.driver.set_registers(self.vcpu, registers)?;
        Ok(FaultResolution::Resumed)
    }

    /// Drops the shadow translation of `va`.
    ///
    /// Only the shadow leaf mapping `va` is cleared. If the guest maps `va`
    /// with a large page, or no longer maps its directory entry at all, the
    /// shadow directory entry is cleared instead, which drops every 4KB
    /// slice below it.
    pub fn invalidate_page(&mut self, va: Va) -> Result<(), VmmError> {
        if self.state.memory_mode != MemoryMode::Virtual {
            return Err(VmmError::PagingDisabled);
        }

        match self.state.shadow_mode {
            PagingMode::Legacy => self.invalidate_shadow_page::<Legacy>(va),
            PagingMode::Long => self.invalidate_shadow_page::<Long>(va),
        }
    }

    fn invalidate_shadow_page<F>(&mut self, va: Va) -> Result<(), VmmError>
    where
        F: PagingFormat,
    {
        let mode = F::MODE;
        let mut shadow_table = match self.state.shadow_root {
            Some(root) => root,
            None => return Ok(()),
        };
        let mut guest_table = Some(self.state.guest_cr3.root(mode));
        let mut level = mode.root_level();

        // Both walks stop at the page directory.
        while level != PageTableLevel::Pd {
            let index = mode.index_for(va, level);

            let shadow = self.read_shadow_entry::<F::Entry>(shadow_table, index)?;
            if !shadow.present() {
                return Ok(());
            }

            guest_table = guest_table
                .and_then(|table| self.read_guest_entry::<F::Entry>(table, index).ok())
                .filter(|entry| entry.present())
                .map(|entry| Pa(entry.address()));

            shadow_table = Hpa(shadow.address());
            level = level
                .next()
                .ok_or(VmmError::Other("walk passed the page directory"))?;
        }

        let index = mode.index_for(va, PageTableLevel::Pd);
        let directory = self.read_shadow_entry::<F::Entry>(shadow_table, index)?;
        if !directory.present() {
            return Ok(());
        }

        let guest_directory = guest_table
            .and_then(|table| self.read_guest_entry::<F::Entry>(table, index).ok())
            .filter(|entry| entry.present());

        let drop_table = match guest_directory {
            Some(entry) => F::maps_large_page(&self.state, PageTableLevel::Pd, entry).unwrap_or(true),
            None => true,
        };

        if drop_table {
            let child = Hpa(directory.address());
            tracing::trace!(%va, table = %child, "shadow page table invalidated");

            self.write_shadow_entry(shadow_table + index * F::Entry::SIZE, F::Entry::default())?;
            if self.config.release_invalidated_tables {
                self.frames.release_subtree(&self.driver, child)?;
            }

            return Ok(());
        }

        let table = Hpa(directory.address());
        let index = mode.index_for(va, PageTableLevel::Pt);
        tracing::trace!(%va, %table, index, "shadow leaf invalidated");

        self.write_shadow_entry(table + index * F::Entry::SIZE, F::Entry::default())
    }
}
