//! 65816/65C816 CPU handling types
//!
//! # Literature
//!
//! - the [super famicom wiki page](https://wiki.superfamicom.org/65816-reference)
//! - <https://www.westerndesigncenter.com/wdc/documentation/w65c816s.pdf>

use crate::device::Addr24;
use core::ops::{BitAnd, BitAndAssign, BitOr, BitOrAssign, Not};

/// Structure containing the processor registers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Regs {
    /// The accumulator register
    pub a: u16,
    /// The first index register
    pub x: u16,
    /// The second index register
    pub y: u16,
    /// The stack pointer
    pub sp: u16,
    /// The direct page register (the direct page is limited to bank zero)
    pub dp: u16,
    /// The program counter with the program bank register.
    pub pc: Addr24,
    /// The data bank register
    pub db: u8,
    /// The processor status
    pub status: Status,
    /// 6502 emulation mode
    pub is_emulation: bool,
}

impl Regs {
    pub const fn new() -> Self {
        Self {
            a: 0,
            x: 0,
            y: 0,
            sp: 0x1ff,
            dp: 0,
            pc: Addr24::new(0, 0),
            db: 0,
            status: Status::RESET_DEFAULT,
            is_emulation: true,
        }
    }

    pub const fn a8(&self) -> u8 {
        (self.a & 0xff) as u8
    }

    pub fn set_a8(&mut self, val: u8) {
        self.a = (self.a & 0xff00) | val as u16
    }

    pub const fn x8(&self) -> u8 {
        (self.x & 0xff) as u8
    }

    pub const fn y8(&self) -> u8 {
        (self.y & 0xff) as u8
    }

    /// Status register as stored by snes9x, with the emulation flag in bit 8
    pub const fn packed_status(&self) -> u16 {
        self.status.0 as u16 | ((self.is_emulation as u16) << 8)
    }
}

/// Processor status flags
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status(pub u8);

macro_rules! bitor { ($t:ident, $($vs:ident)|*) => { $t($(<$t>::$vs.0)|*) }; }

impl Status {
    /// Negative Flag
    pub const NEGATIVE: Self = Self(0b1000_0000);
    /// Overflow Flag
    pub const OVERFLOW: Self = Self(0b0100_0000);
    /// Memory/Accumulator size
    ///  - `0`: 16-bit
    ///  - `1`: 8-bit
    ///
    /// **native only**
    pub const ACCUMULATION: Self = Self(0b0010_0000);
    /// Index register size
    ///  - `0`: 16-bit
    ///  - `1`: 8-bit
    ///
    /// **native only**
    pub const INDEX_REGISTER_SIZE: Self = Self(0b0001_0000);
    /// Decimal Flag
    pub const DECIMAL: Self = Self(0b0000_1000);
    /// IRQ-Disable Flag
    pub const IRQ_DISABLE: Self = Self(0b0000_0100);
    /// Zero Flag
    pub const ZERO: Self = Self(0b0000_0010);
    /// Carry Flag
    pub const CARRY: Self = Self(0b0000_0001);
    /// Break Flag
    ///
    /// **6502 emulation mode only**, only visible in the pushed copy
    pub const BREAK: Self = Self(0b0001_0000);

    /// The value that the status register gets reset to
    pub const RESET_DEFAULT: Self = bitor!(Self, ACCUMULATION | INDEX_REGISTER_SIZE | IRQ_DISABLE);

    pub const fn has(&self, flag: Self) -> bool {
        self.0 & flag.0 > 0
    }

    pub fn set_if(&mut self, flag: Self, condition: bool) {
        if condition {
            *self |= flag
        } else {
            *self &= !flag
        }
    }
}

impl BitAnd for Status {
    type Output = Self;
    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl BitOr for Status {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for Status {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0
    }
}

impl BitAndAssign for Status {
    fn bitand_assign(&mut self, rhs: Self) {
        self.0 &= rhs.0
    }
}

impl Not for Status {
    type Output = Self;
    fn not(self) -> Self {
        Self(!self.0)
    }
}

/// Execution state of the processor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuState {
    Running,
    /// `WAI` was executed; fetching resumes on the next NMI or IRQ
    WaitingForInterrupt,
    /// `STP` was executed; only a reset leaves this state
    Stopped,
    /// Halted for a debugger until [`Cpu::resume`] is called
    DebugBreak,
}

/// The operand widths currently selected by the M and X flags.
///
/// Each variant selects one monomorphized copy of the opcode dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    M8X8,
    M8X16,
    M16X8,
    M16X16,
}

/// Structure for emulating the 65816 Processor
#[derive(Debug, Clone)]
pub struct Cpu {
    pub regs: Regs,
    pub state: CpuState,
    pub(crate) variant: Variant,
    /// Latched NMI edge that is taken before the next instruction
    pub(crate) nmi_pending: bool,
    /// Level of the IRQ input line
    pub(crate) irq_line: bool,
    /// Memory speed of the last opcode fetch in master cycles
    pub(crate) mem_speed: u32,
}

impl Cpu {
    pub fn new() -> Self {
        Self {
            regs: Regs::new(),
            state: CpuState::Running,
            variant: Variant::M8X8,
            nmi_pending: false,
            irq_line: false,
            mem_speed: crate::timing::SLOW_ONE_CYCLE,
        }
    }

    /// Indicate if the A register is in 8-bit mode
    pub const fn is_reg8(&self) -> bool {
        self.regs.status.has(Status::ACCUMULATION)
    }

    /// Indicate if the X and Y registers are in 8-bit mode
    pub const fn is_idx8(&self) -> bool {
        self.regs.status.has(Status::INDEX_REGISTER_SIZE)
    }

    pub const fn variant(&self) -> Variant {
        self.variant
    }

    pub const fn nmi_pending(&self) -> bool {
        self.nmi_pending
    }

    pub const fn irq_line(&self) -> bool {
        self.irq_line
    }

    /// Build an [`Addr24`] from an 16-bit address with the data bank register
    pub const fn get_data_addr(&self, addr: u16) -> Addr24 {
        Addr24::new(self.regs.db, addr)
    }

    pub fn update_nz8(&mut self, val: u8) {
        self.regs.status.set_if(Status::ZERO, val == 0);
        self.regs.status.set_if(Status::NEGATIVE, val & 0x80 > 0);
    }

    pub fn update_nz16(&mut self, val: u16) {
        self.regs.status.set_if(Status::ZERO, val == 0);
        self.regs.status.set_if(Status::NEGATIVE, val & 0x8000 > 0);
    }

    /// Enforce the register invariants after the status register or the
    /// emulation flag changed and reselect the dispatch variant.
    pub fn update_status(&mut self) {
        if self.regs.is_emulation {
            self.regs.status |= Status::INDEX_REGISTER_SIZE | Status::ACCUMULATION;
            self.regs.sp = (self.regs.sp & 0xff) | 0x100;
        }
        if self.is_idx8() {
            self.regs.x &= 0xff;
            self.regs.y &= 0xff;
        }
        self.variant = match (self.is_reg8(), self.is_idx8()) {
            (true, true) => Variant::M8X8,
            (true, false) => Variant::M8X16,
            (false, true) => Variant::M16X8,
            (false, false) => Variant::M16X16,
        };
    }

    /// Leave [`CpuState::DebugBreak`]; other states are not affected
    pub fn resume(&mut self) {
        if self.state == CpuState::DebugBreak {
            self.state = CpuState::Running
        }
    }

    /// Request a break into [`CpuState::DebugBreak`] before the next instruction
    pub fn request_break(&mut self) {
        if self.state == CpuState::Running {
            self.state = CpuState::DebugBreak
        }
    }

    pub(crate) fn reset(&mut self) {
        self.regs = Regs::new();
        self.state = CpuState::Running;
        self.nmi_pending = false;
        self.irq_line = false;
        self.update_status();
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emulation_forces_8bit_registers() {
        let mut cpu = Cpu::new();
        cpu.regs.is_emulation = false;
        cpu.regs.status = Status(0);
        cpu.regs.x = 0x1234;
        cpu.regs.sp = 0x0abc;
        cpu.update_status();
        assert_eq!(cpu.variant(), Variant::M16X16);
        assert_eq!(cpu.regs.x, 0x1234);

        cpu.regs.is_emulation = true;
        cpu.update_status();
        assert_eq!(cpu.variant(), Variant::M8X8);
        assert_eq!(cpu.regs.x, 0x34);
        assert_eq!(cpu.regs.sp, 0x01bc);
    }

    #[test]
    fn index_flag_clears_high_bytes() {
        let mut cpu = Cpu::new();
        cpu.regs.is_emulation = false;
        cpu.regs.status = Status::ACCUMULATION;
        cpu.regs.y = 0xff01;
        cpu.regs.a = 0xff01;
        cpu.update_status();
        assert_eq!(cpu.variant(), Variant::M8X16);
        cpu.regs.status |= Status::INDEX_REGISTER_SIZE;
        cpu.update_status();
        assert_eq!(cpu.regs.y, 0x01);
        // the hidden B accumulator survives
        assert_eq!(cpu.regs.a, 0xff01);
    }

    #[test]
    fn packed_status_has_emulation_bit() {
        let regs = Regs::new();
        assert_eq!(regs.packed_status(), 0x134);
    }
}
