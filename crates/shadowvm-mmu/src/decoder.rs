use iced_x86::{Decoder, DecoderOptions, Mnemonic, Register};
use shadowvm_arch_x86::{PagingMode, Registers};
use shadowvm_core::{Va, VmmError};

/// Memory operand of a decoded instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryOperand {
    /// Effective address of the operand.
    pub address: Va,

    /// Length of the instruction in bytes.
    pub length: u8,
}

/// Decodes trapped guest instructions.
pub trait InstructionDecoder {
    /// Decodes an INVLPG instruction at the start of `bytes`.
    ///
    /// `registers` hold the guest state at the time of the trap and are
    /// used to compute the effective address.
    fn decode_invlpg(
        &self,
        bytes: &[u8],
        mode: PagingMode,
        registers: &Registers,
    ) -> Result<MemoryOperand, VmmError>;
}

/// [`InstructionDecoder`] built on `iced-x86`.
#[derive(Debug, Default, Clone, Copy)]
pub struct IcedDecoder;

impl InstructionDecoder for IcedDecoder {
    fn decode_invlpg(
        &self,
        bytes: &[u8],
        mode: PagingMode,
        registers: &Registers,
    ) -> Result<MemoryOperand, VmmError> {
        let bitness = match mode {
            PagingMode::Legacy => 32,
            PagingMode::Long => 64,
        };

        let mut decoder = Decoder::with_ip(bitness, bytes, registers.rip, DecoderOptions::NONE);
        if !decoder.can_decode() {
            return Err(VmmError::Decode("no instruction bytes"));
        }

        let instruction = decoder.decode();
        if instruction.is_invalid() {
            return Err(VmmError::Decode("invalid instruction"));
        }

        if instruction.mnemonic() != Mnemonic::Invlpg {
            tracing::warn!(mnemonic = ?instruction.mnemonic(), "expected INVLPG");
            return Err(VmmError::Decode("not an INVLPG instruction"));
        }

        let address = instruction
            .virtual_address(0, 0, |register, _, _| register_value(registers, register))
            .ok_or(VmmError::Decode("unresolvable memory operand"))?;

        let address = match mode {
            PagingMode::Legacy => address & 0xffff_ffff,
            PagingMode::Long => address,
        };

        Ok(MemoryOperand {
            address: Va(address),
            length: instruction.len() as u8,
        })
    }
}

fn register_value(registers: &Registers, register: Register) -> Option<u64> {
    // Flat segmentation.
    if register.is_segment_register() {
        return match register {
            Register::CS => Some(registers.cs_base),
            _ => Some(0),
        };
    }

    let value = match register.full_register() {
        Register::RAX => registers.rax,
        Register::RBX => registers.rbx,
        Register::RCX => registers.rcx,
        Register::RDX => registers.rdx,
        Register::RBP => registers.rbp,
        Register::RSI => registers.rsi,
        Register::RDI => registers.rdi,
        Register::RSP => registers.rsp,
        Register::R8 => registers.r8,
        Register::R9 => registers.r9,
        Register::R10 => registers.r10,
        Register::R11 => registers.r11,
        Register::R12 => registers.r12,
        Register::R13 => registers.r13,
        Register::R14 => registers.r14,
        Register::R15 => registers.r15,
        Register::RIP => registers.rip,
        _ => return None,
    };

    match register.size() {
        1 => Some(value & 0xff),
        2 => Some(value & 0xffff),
        4 => Some(value & 0xffff_ffff),
        _ => Some(value),
    }
}
