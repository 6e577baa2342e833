//! The 65816 opcode dispatcher
//!
//! [`Device::execute`] is generic over the accumulator width `A` and the
//! index width `I`; [`Device::dispatch_instruction`] picks one of the four
//! monomorphized copies from [`Variant`].

use crate::{
    addressing::{Access, Mode},
    alu::{self, Word},
    backend::AudioBackend,
    cpu::{CpuState, Status, Variant},
    device::{Addr24, Device, MemoryMap},
    timing::TWO_CYCLES,
};

/// Operand mode of the `ORA`/`AND`/`EOR`/`ADC`/`STA`/`LDA`/`CMP`/`SBC`
/// group, decoded from the low five opcode bits. `None` is immediate.
const fn group_mode(op: u8) -> Option<Mode> {
    match op & 0x1f {
        0x01 => Some(Mode::DirectXIndirect),
        0x03 => Some(Mode::StackRelative),
        0x05 => Some(Mode::Direct),
        0x07 => Some(Mode::DirectIndirectLong),
        0x0d => Some(Mode::Absolute),
        0x0f => Some(Mode::Long),
        0x11 => Some(Mode::DirectIndirectY),
        0x12 => Some(Mode::DirectIndirect),
        0x13 => Some(Mode::StackRelativeIndirectY),
        0x15 => Some(Mode::DirectX),
        0x17 => Some(Mode::DirectIndirectLongY),
        0x19 => Some(Mode::AbsoluteY),
        0x1d => Some(Mode::AbsoluteX),
        0x1f => Some(Mode::LongX),
        _ => None,
    }
}

const fn is_group_op(op: u8) -> bool {
    matches!(
        op & 0x1f,
        0x01 | 0x03 | 0x05 | 0x07 | 0x09 | 0x0d | 0x0f | 0x11 | 0x12 | 0x13 | 0x15 | 0x17 | 0x19 | 0x1d | 0x1f
    )
}

/// Operand mode of the shift/rotate and `INC`/`DEC` memory forms
const fn modify_mode(op: u8) -> Mode {
    match op & 0x1f {
        0x06 => Mode::Direct,
        0x0e => Mode::Absolute,
        0x16 => Mode::DirectX,
        _ => Mode::AbsoluteX,
    }
}

const fn is_modify_op(op: u8) -> bool {
    matches!(op & 0x1f, 0x06 | 0x0e | 0x16 | 0x1e) && !matches!(op >> 5, 4 | 5)
}

impl<M: MemoryMap, B: AudioBackend> Device<M, B> {
    fn acc<A: Word>(&self) -> A {
        A::from_u16(self.cpu.regs.a)
    }

    fn set_acc<A: Word>(&mut self, value: A) {
        self.cpu.regs.a = A::merge(self.cpu.regs.a, value)
    }

    fn status(&mut self) -> &mut Status {
        &mut self.cpu.regs.status
    }

    fn read_operand<W: Word>(&mut self, mode: Option<Mode>) -> W {
        match mode {
            None => self.load::<W>(true),
            Some(mode) => {
                let addr = self.resolve(mode, Access::Read);
                self.read::<W>(addr)
            }
        }
    }

    fn store<W: Word>(&mut self, mode: Mode, value: W) {
        let addr = self.resolve(mode, Access::Write);
        self.write::<W>(addr, value)
    }

    fn modify<W: Word, F>(&mut self, mode: Mode, f: F)
    where
        F: FnOnce(&mut Status, W) -> W,
    {
        let addr = self.resolve(mode, Access::Modify);
        let value = self.read::<W>(addr);
        self.idle_one();
        let result = f(&mut self.cpu.regs.status, value);
        self.write_rmw::<W>(addr, result)
    }

    fn modify_acc<A: Word, F>(&mut self, f: F)
    where
        F: FnOnce(&mut Status, A) -> A,
    {
        self.idle_one();
        let value = self.acc::<A>();
        let result = f(&mut self.cpu.regs.status, value);
        self.set_acc(result)
    }

    fn load_index<I: Word>(&mut self, mode: Option<Mode>) -> u16 {
        let value = self.read_operand::<I>(mode);
        alu::update_nz(self.status(), value);
        value.to_u16()
    }

    fn compare_index<I: Word>(&mut self, reg: u16, mode: Option<Mode>) {
        let value = self.read_operand::<I>(mode);
        alu::compare(self.status(), I::from_u16(reg), value)
    }

    /// Transfer `value` truncated to the width `W`, updating N and Z
    fn transfer<W: Word>(&mut self, value: u16) -> W {
        self.idle_one();
        let value = W::from_u16(value);
        alu::update_nz(self.status(), value);
        value
    }

    fn set_sp(&mut self, value: u16) {
        self.cpu.regs.sp = if self.cpu.regs.is_emulation {
            (value & 0xff) | 0x100
        } else {
            value
        }
    }

    fn branch(&mut self, condition: bool) {
        let target = self.relative();
        if condition {
            self.idle_one();
            if self.cpu.regs.is_emulation && target & 0xff00 != self.cpu.regs.pc.addr & 0xff00 {
                self.idle_one()
            }
            self.cpu.regs.pc.addr = target
        }
    }

    fn pull_reg<W: Word>(&mut self) -> W {
        self.idle(TWO_CYCLES);
        let value = self.pull::<W>();
        alu::update_nz(self.status(), value);
        value
    }

    /// Fetch and execute the next instruction
    pub(crate) fn dispatch_instruction(&mut self) {
        let start = self.cpu.regs.pc;
        let op = self.load::<u8>(true);
        log::trace!("executing {:02x} @ {}", op, start);
        match self.cpu.variant {
            Variant::M8X8 => self.execute::<u8, u8>(op),
            Variant::M8X16 => self.execute::<u8, u16>(op),
            Variant::M16X8 => self.execute::<u16, u8>(op),
            Variant::M16X16 => self.execute::<u16, u16>(op),
        }
    }

    fn execute<A: Word, I: Word>(&mut self, op: u8) {
        match op {
            0x89 => {
                // BIT - Test bits against an immediate value
                let value = self.load::<A>(true);
                let a = self.acc::<A>();
                alu::bit(self.status(), a, value, true)
            }
            op if is_group_op(op) => self.execute_group::<A>(op),
            op if is_modify_op(op) => {
                let mode = modify_mode(op);
                match op >> 5 {
                    // ASL - Arithmetic left shift on memory
                    0 => self.modify::<A, _>(mode, alu::asl::<A>),
                    // ROL - Rotate memory left
                    1 => self.modify::<A, _>(mode, alu::rol::<A>),
                    // LSR - Logical right shift on memory
                    2 => self.modify::<A, _>(mode, alu::lsr::<A>),
                    // ROR - Rotate memory right
                    3 => self.modify::<A, _>(mode, alu::ror::<A>),
                    // DEC - Decrement memory
                    6 => self.modify::<A, _>(mode, alu::dec::<A>),
                    // INC - Increment memory
                    _ => self.modify::<A, _>(mode, alu::inc::<A>),
                }
            }
            0x00 => {
                // BRK - Software break
                self.load::<u8>(true);
                self.interrupt(0xffe6, 0xfffe, true);
                log::debug!("BRK, handler at {}", self.cpu.regs.pc);
            }
            0x02 => {
                // COP - Co-Processor Enable
                self.load::<u8>(true);
                self.interrupt(0xffe4, 0xfff4, true);
            }
            0x04 | 0x0c | 0x14 | 0x1c => {
                // TSB/TRB - Test and set/reset memory bits against A
                let mode = if op & 0x08 > 0 {
                    Mode::Absolute
                } else {
                    Mode::Direct
                };
                let a = self.acc::<A>();
                if op < 0x10 {
                    self.modify::<A, _>(mode, |p, v| alu::tsb(p, a, v))
                } else {
                    self.modify::<A, _>(mode, |p, v| alu::trb(p, a, v))
                }
            }
            0x0a => {
                // ASL - Arithmetic left shift on A
                self.modify_acc::<A, _>(alu::asl::<A>)
            }
            0x2a => {
                // ROL - Rotate A left
                self.modify_acc::<A, _>(alu::rol::<A>)
            }
            0x4a => {
                // LSR - Logical right shift on A
                self.modify_acc::<A, _>(alu::lsr::<A>)
            }
            0x6a => {
                // ROR - Rotate A right
                self.modify_acc::<A, _>(alu::ror::<A>)
            }
            0x1a => {
                // INC - Increment A
                self.modify_acc::<A, _>(alu::inc::<A>)
            }
            0x3a => {
                // DEC - Decrement A
                self.modify_acc::<A, _>(alu::dec::<A>)
            }
            0x10 => {
                // BPL - Branch if Plus
                self.branch(!self.cpu.regs.status.has(Status::NEGATIVE))
            }
            0x30 => {
                // BMI - Branch if Minus
                self.branch(self.cpu.regs.status.has(Status::NEGATIVE))
            }
            0x50 => {
                // BVC - Branch if Overflow Clear
                self.branch(!self.cpu.regs.status.has(Status::OVERFLOW))
            }
            0x70 => {
                // BVS - Branch if Overflow Set
                self.branch(self.cpu.regs.status.has(Status::OVERFLOW))
            }
            0x80 => {
                // BRA - Branch Always
                self.branch(true)
            }
            0x90 => {
                // BCC - Branch if Carry Clear
                self.branch(!self.cpu.regs.status.has(Status::CARRY))
            }
            0xb0 => {
                // BCS - Branch if Carry Set
                self.branch(self.cpu.regs.status.has(Status::CARRY))
            }
            0xd0 => {
                // BNE - Branch if Not Equal
                self.branch(!self.cpu.regs.status.has(Status::ZERO))
            }
            0xf0 => {
                // BEQ - Branch if Equal
                self.branch(self.cpu.regs.status.has(Status::ZERO))
            }
            0x82 => {
                // BRL - Branch Long
                let target = self.relative_long(Access::Jump);
                self.idle_one();
                self.cpu.regs.pc.addr = target
            }
            0x18 | 0x38 | 0x58 | 0x78 | 0xb8 | 0xd8 | 0xf8 => {
                // CLC/SEC/CLI/SEI/CLV/CLD/SED - Clear or set a flag
                self.idle_one();
                let flag = match op {
                    0x18 | 0x38 => Status::CARRY,
                    0x58 | 0x78 => Status::IRQ_DISABLE,
                    0xb8 => Status::OVERFLOW,
                    _ => Status::DECIMAL,
                };
                self.status().set_if(flag, op & 0x20 > 0 && op != 0xb8)
            }
            0xc2 | 0xe2 => {
                // REP/SEP - Reset or set status bits
                let mask = Status(self.load::<u8>(true));
                self.idle_one();
                if op == 0xc2 {
                    *self.status() &= !mask
                } else {
                    *self.status() |= mask
                }
                self.cpu.update_status()
            }
            0xfb => {
                // XCE - Exchange carry and emulation flags
                self.idle_one();
                let carry = self.cpu.regs.status.has(Status::CARRY);
                let emulation = self.cpu.regs.is_emulation;
                self.status().set_if(Status::CARRY, emulation);
                self.cpu.regs.is_emulation = carry;
                self.cpu.update_status()
            }
            0x08 => {
                // PHP - Push Status Register
                self.idle_one();
                self.push(self.cpu.regs.status.0)
            }
            0x28 => {
                // PLP - Pull Status Register
                self.idle(TWO_CYCLES);
                self.cpu.regs.status = Status(self.pull::<u8>());
                self.cpu.update_status()
            }
            0x48 => {
                // PHA - Push A
                self.idle_one();
                self.push(self.acc::<A>())
            }
            0x68 => {
                // PLA - Pull A
                let value = self.pull_reg::<A>();
                self.set_acc(value)
            }
            0xda => {
                // PHX - Push X
                self.idle_one();
                self.push(I::from_u16(self.cpu.regs.x))
            }
            0xfa => {
                // PLX - Pull X
                self.cpu.regs.x = self.pull_reg::<I>().to_u16()
            }
            0x5a => {
                // PHY - Push Y
                self.idle_one();
                self.push(I::from_u16(self.cpu.regs.y))
            }
            0x7a => {
                // PLY - Pull Y
                self.cpu.regs.y = self.pull_reg::<I>().to_u16()
            }
            0x8b => {
                // PHB - Push Data Bank
                self.idle_one();
                self.push(self.cpu.regs.db)
            }
            0xab => {
                // PLB - Pull Data Bank
                self.cpu.regs.db = self.pull_reg::<u8>()
            }
            0x0b => {
                // PHD - Push Direct Page
                self.idle_one();
                self.push(self.cpu.regs.dp)
            }
            0x2b => {
                // PLD - Pull Direct Page
                self.cpu.regs.dp = self.pull_reg::<u16>()
            }
            0x4b => {
                // PHK - Push Program Bank
                self.idle_one();
                self.push(self.cpu.regs.pc.bank)
            }
            0xf4 => {
                // PEA - Push Effective Absolute Address
                let value = self.load::<u16>(false);
                self.push(value)
            }
            0xd4 => {
                // PEI - Push Effective Indirect Address
                let addr = self.resolve(Mode::DirectIndirect, Access::None);
                self.push(addr.addr.addr)
            }
            0x62 => {
                // PER - Push Effective PC Relative Address
                let value = self.relative_long(Access::None);
                self.idle_one();
                self.push(value)
            }
            0x4c => {
                // JMP - Jump absolute
                self.cpu.regs.pc.addr = self.load::<u16>(true)
            }
            0x5c => {
                // JML - Jump absolute long
                self.cpu.regs.pc = self.load::<Addr24>(true)
            }
            0x6c => {
                // JMP - Jump absolute indirect
                self.cpu.regs.pc.addr = self.absolute_indirect()
            }
            0x7c => {
                // JMP - Jump absolute indexed indirect
                self.cpu.regs.pc.addr = self.absolute_x_indirect()
            }
            0xdc => {
                // JML - Jump absolute indirect long
                self.cpu.regs.pc = self.absolute_indirect_long()
            }
            0x20 => {
                // JSR - Jump to Subroutine
                let target = self.load::<u16>(true);
                self.idle_one();
                self.push(self.cpu.regs.pc.addr.wrapping_sub(1));
                self.cpu.regs.pc.addr = target
            }
            0xfc => {
                // JSR - Jump to Subroutine absolute indexed indirect
                let target = self.absolute_x_indirect();
                self.push(self.cpu.regs.pc.addr.wrapping_sub(1));
                self.cpu.regs.pc.addr = target
            }
            0x22 => {
                // JSL - Jump to Subroutine Long
                let target = self.load::<Addr24>(true);
                self.idle_one();
                self.push(self.cpu.regs.pc.bank);
                self.push(self.cpu.regs.pc.addr.wrapping_sub(1));
                self.cpu.regs.pc = target
            }
            0x60 => {
                // RTS - Return from Subroutine
                self.idle(TWO_CYCLES);
                let addr = self.pull::<u16>();
                self.idle_one();
                self.cpu.regs.pc.addr = addr.wrapping_add(1)
            }
            0x6b => {
                // RTL - Return from Subroutine Long
                self.idle(TWO_CYCLES);
                let addr = self.pull::<u16>();
                let bank = self.pull::<u8>();
                self.cpu.regs.pc = Addr24::new(bank, addr.wrapping_add(1))
            }
            0x40 => {
                // RTI - Return from Interrupt
                self.idle(TWO_CYCLES);
                self.cpu.regs.status = Status(self.pull::<u8>());
                self.cpu.update_status();
                self.cpu.regs.pc.addr = self.pull::<u16>();
                if !self.cpu.regs.is_emulation {
                    self.cpu.regs.pc.bank = self.pull::<u8>()
                }
            }
            0x24 | 0x2c | 0x34 | 0x3c => {
                // BIT - Test bits against memory
                let mode = match op {
                    0x24 => Mode::Direct,
                    0x2c => Mode::Absolute,
                    0x34 => Mode::DirectX,
                    _ => Mode::AbsoluteX,
                };
                let value = self.read_operand::<A>(Some(mode));
                let a = self.acc::<A>();
                alu::bit(self.status(), a, value, false)
            }
            0x64 | 0x74 | 0x9c | 0x9e => {
                // STZ - Store zero
                let mode = match op {
                    0x64 => Mode::Direct,
                    0x74 => Mode::DirectX,
                    0x9c => Mode::Absolute,
                    _ => Mode::AbsoluteX,
                };
                self.store::<A>(mode, A::from_u16(0))
            }
            0x84 | 0x8c | 0x94 => {
                // STY - Store Y
                let mode = match op {
                    0x84 => Mode::Direct,
                    0x8c => Mode::Absolute,
                    _ => Mode::DirectX,
                };
                self.store::<I>(mode, I::from_u16(self.cpu.regs.y))
            }
            0x86 | 0x8e | 0x96 => {
                // STX - Store X
                let mode = match op {
                    0x86 => Mode::Direct,
                    0x8e => Mode::Absolute,
                    _ => Mode::DirectY,
                };
                self.store::<I>(mode, I::from_u16(self.cpu.regs.x))
            }
            0xa0 | 0xa4 | 0xac | 0xb4 | 0xbc => {
                // LDY - Load Y
                let mode = match op {
                    0xa0 => None,
                    0xa4 => Some(Mode::Direct),
                    0xac => Some(Mode::Absolute),
                    0xb4 => Some(Mode::DirectX),
                    _ => Some(Mode::AbsoluteX),
                };
                self.cpu.regs.y = self.load_index::<I>(mode)
            }
            0xa2 | 0xa6 | 0xae | 0xb6 | 0xbe => {
                // LDX - Load X
                let mode = match op {
                    0xa2 => None,
                    0xa6 => Some(Mode::Direct),
                    0xae => Some(Mode::Absolute),
                    0xb6 => Some(Mode::DirectY),
                    _ => Some(Mode::AbsoluteY),
                };
                self.cpu.regs.x = self.load_index::<I>(mode)
            }
            0xc0 | 0xc4 | 0xcc => {
                // CPY - Compare Y
                let mode = match op {
                    0xc0 => None,
                    0xc4 => Some(Mode::Direct),
                    _ => Some(Mode::Absolute),
                };
                self.compare_index::<I>(self.cpu.regs.y, mode)
            }
            0xe0 | 0xe4 | 0xec => {
                // CPX - Compare X
                let mode = match op {
                    0xe0 => None,
                    0xe4 => Some(Mode::Direct),
                    _ => Some(Mode::Absolute),
                };
                self.compare_index::<I>(self.cpu.regs.x, mode)
            }
            0xe8 | 0xc8 | 0xca | 0x88 => {
                // INX/INY/DEX/DEY - Increment or decrement an index register
                self.idle_one();
                let (is_y, increment) = match op {
                    0xe8 => (false, true),
                    0xc8 => (true, true),
                    0xca => (false, false),
                    _ => (true, false),
                };
                let reg = if is_y {
                    self.cpu.regs.y
                } else {
                    self.cpu.regs.x
                };
                let value = I::from_u16(reg);
                let result = if increment {
                    alu::inc(self.status(), value)
                } else {
                    alu::dec(self.status(), value)
                };
                if is_y {
                    self.cpu.regs.y = result.to_u16()
                } else {
                    self.cpu.regs.x = result.to_u16()
                }
            }
            0xaa => {
                // TAX - Transfer A to X
                self.cpu.regs.x = self.transfer::<I>(self.cpu.regs.a).to_u16()
            }
            0xa8 => {
                // TAY - Transfer A to Y
                self.cpu.regs.y = self.transfer::<I>(self.cpu.regs.a).to_u16()
            }
            0x8a => {
                // TXA - Transfer X to A
                let value = self.transfer::<A>(self.cpu.regs.x);
                self.set_acc(value)
            }
            0x98 => {
                // TYA - Transfer Y to A
                let value = self.transfer::<A>(self.cpu.regs.y);
                self.set_acc(value)
            }
            0x9b => {
                // TXY - Transfer X to Y
                self.cpu.regs.y = self.transfer::<I>(self.cpu.regs.x).to_u16()
            }
            0xbb => {
                // TYX - Transfer Y to X
                self.cpu.regs.x = self.transfer::<I>(self.cpu.regs.y).to_u16()
            }
            0xba => {
                // TSX - Transfer SP to X
                self.cpu.regs.x = self.transfer::<I>(self.cpu.regs.sp).to_u16()
            }
            0x9a => {
                // TXS - Transfer X to SP
                self.idle_one();
                self.set_sp(self.cpu.regs.x)
            }
            0x1b => {
                // TCS - Transfer A to SP
                self.idle_one();
                self.set_sp(self.cpu.regs.a)
            }
            0x3b => {
                // TSC - Transfer SP to A
                self.cpu.regs.a = self.transfer::<u16>(self.cpu.regs.sp)
            }
            0x5b => {
                // TCD - Transfer A to DP
                self.cpu.regs.dp = self.transfer::<u16>(self.cpu.regs.a)
            }
            0x7b => {
                // TDC - Transfer DP to A
                self.cpu.regs.a = self.transfer::<u16>(self.cpu.regs.dp)
            }
            0xeb => {
                // XBA - Exchange the A bytes
                self.idle(TWO_CYCLES);
                self.cpu.regs.a = self.cpu.regs.a.swap_bytes();
                self.cpu.update_nz8(self.cpu.regs.a8())
            }
            0x44 | 0x54 => {
                // MVP/MVN - Block Move Positive/Negative, one byte per execution
                let (dst, src) = self.block_move_banks();
                self.cpu.regs.db = dst;
                let value = self.read_byte(Addr24::new(src, self.cpu.regs.x));
                self.write_byte(Addr24::new(dst, self.cpu.regs.y), value);
                self.idle(TWO_CYCLES);
                let step = |reg: u16| {
                    let reg = if op == 0x54 {
                        reg.wrapping_add(1)
                    } else {
                        reg.wrapping_sub(1)
                    };
                    I::from_u16(reg).to_u16()
                };
                self.cpu.regs.x = step(self.cpu.regs.x);
                self.cpu.regs.y = step(self.cpu.regs.y);
                self.cpu.regs.a = self.cpu.regs.a.wrapping_sub(1);
                if self.cpu.regs.a != 0xffff {
                    self.cpu.regs.pc.addr = self.cpu.regs.pc.addr.wrapping_sub(3)
                }
            }
            0xcb => {
                // WAI - Wait for Interrupt
                self.idle(TWO_CYCLES);
                self.cpu.state = CpuState::WaitingForInterrupt
            }
            0xdb => {
                // STP - Stop the Processor
                self.idle(TWO_CYCLES);
                self.cpu.state = CpuState::Stopped;
                log::warn!("STP at {}, cpu stopped until reset", self.cpu.regs.pc);
            }
            0x42 => {
                // WDM - Reserved for future expansion
                self.load::<u8>(true);
                if self.config.break_on_wdm {
                    self.cpu.state = CpuState::DebugBreak
                }
            }
            0xea => {
                // NOP - No operation
                self.idle_one()
            }
            _ => unreachable!("opcode {:02x} is covered by the decoding groups", op),
        }
    }

    /// `ORA`, `AND`, `EOR`, `ADC`, `STA`, `LDA`, `CMP` and `SBC`
    fn execute_group<A: Word>(&mut self, op: u8) {
        let mode = group_mode(op);
        if op >> 5 == 4 {
            // STA - Store A
            let a = self.acc::<A>();
            if let Some(mode) = mode {
                self.store::<A>(mode, a)
            }
            return;
        }
        let value = self.read_operand::<A>(mode);
        let a = self.acc::<A>();
        let p = &mut self.cpu.regs.status;
        let result = match op >> 5 {
            // ORA - Bitwise or A with memory
            0 => A::from_u16(a.to_u16() | value.to_u16()),
            // AND - Bitwise and A with memory
            1 => A::from_u16(a.to_u16() & value.to_u16()),
            // EOR - Bitwise exclusive or A with memory
            2 => A::from_u16(a.to_u16() ^ value.to_u16()),
            // ADC - Add with carry
            3 => A::adc(a, value, p),
            // LDA - Load A
            5 => value,
            // CMP - Compare A with memory
            6 => return alu::compare(p, a, value),
            // SBC - Subtract with carry
            _ => A::sbc(a, value, p),
        };
        alu::update_nz(p, result);
        self.set_acc(result)
    }
}
