//! Operand address resolution for the 65816 addressing modes
//!
//! Every resolver fetches its operand bytes from the program counter,
//! charges the internal cycles of the mode and returns the effective
//! address of the operand.
//!
//! # Literature
//!
//! - <https://wiki.superfamicom.org/65816-reference#addressing-modes>

use crate::{
    backend::AudioBackend,
    device::{Addr24, Device, MemoryMap, OpAddress},
};

/// The kind of memory access an instruction performs with its operand
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// The effective address itself is the operand (`PEA`, `PEI`, `PER`)
    None,
    Read,
    Write,
    Modify,
    Jump,
}

impl Access {
    /// Whether fetched operand bytes refresh the open bus latch
    pub const fn latches_operand(self) -> bool {
        matches!(self, Self::Read | Self::Modify | Self::Jump)
    }

    /// Writes and read-modify-write accesses always pay for indexing
    const fn always_indexed(self) -> bool {
        matches!(self, Self::Write | Self::Modify)
    }
}

/// Addressing modes with a data operand in memory. Immediate operands,
/// jumps and branches are fetched by the instructions themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// `d`
    Direct,
    /// `d,X`
    DirectX,
    /// `d,Y`
    DirectY,
    /// `(d)`
    DirectIndirect,
    /// `[d]`
    DirectIndirectLong,
    /// `(d,X)`
    DirectXIndirect,
    /// `(d),Y`
    DirectIndirectY,
    /// `[d],Y`
    DirectIndirectLongY,
    /// `a`
    Absolute,
    /// `a,X`
    AbsoluteX,
    /// `a,Y`
    AbsoluteY,
    /// `al`
    Long,
    /// `al,X`
    LongX,
    /// `d,S`
    StackRelative,
    /// `(d,S),Y`
    StackRelativeIndirectY,
}

const fn page(addr: u16) -> u16 {
    addr & 0xff00
}

impl<M: MemoryMap, B: AudioBackend> Device<M, B> {
    /// Emulation mode with a page aligned direct page keeps direct page
    /// accesses inside that page
    fn direct_page_wraps(&self) -> bool {
        self.cpu.regs.is_emulation && self.cpu.regs.dp & 0xff == 0
    }

    fn direct(&mut self, offset: u8, index: Option<u16>) -> Addr24 {
        let dp = self.cpu.regs.dp;
        if dp & 0xff != 0 {
            self.idle_one()
        }
        let addr = match index {
            None => dp.wrapping_add(offset.into()),
            Some(index) => {
                self.idle_one();
                if self.direct_page_wraps() {
                    dp | (u16::from(offset).wrapping_add(index) & 0xff)
                } else {
                    dp.wrapping_add(offset.into()).wrapping_add(index)
                }
            }
        };
        Addr24::new(0, addr)
    }

    /// Read a 16-bit pointer from the direct page
    fn direct_pointer(&mut self, addr: Addr24) -> u16 {
        let lo = self.read_byte(addr);
        let next = if self.direct_page_wraps() {
            Addr24::new(0, page(addr.addr) | (addr.addr.wrapping_add(1) & 0xff))
        } else {
            addr.add_in_bank(1)
        };
        let hi = self.read_byte(next);
        u16::from_le_bytes([lo, hi])
    }

    /// Add an index register to a data bank address, paying the indexing
    /// cycle where the access kind or a page crossing requires it
    fn indexed(&mut self, base: Addr24, index: u16, access: Access) -> Addr24 {
        let addr = base.add_linear(index.into());
        if access.always_indexed()
            || !self.cpu.is_idx8()
            || page(base.addr) != page(base.addr.wrapping_add(index))
        {
            self.idle_one()
        }
        addr
    }

    /// Resolve the operand address of `mode` and advance the program
    /// counter past the operand bytes
    pub fn resolve(&mut self, mode: Mode, access: Access) -> OpAddress {
        let latch = access.latches_operand();
        let (x, y, db) = (self.cpu.regs.x, self.cpu.regs.y, self.cpu.regs.db);
        match mode {
            Mode::Direct => {
                let offset = self.load::<u8>(latch);
                OpAddress::bank(self.direct(offset, None))
            }
            Mode::DirectX | Mode::DirectY => {
                let offset = self.load::<u8>(latch);
                let index = if mode == Mode::DirectX { x } else { y };
                OpAddress::bank(self.direct(offset, Some(index)))
            }
            Mode::DirectIndirect => {
                let offset = self.load::<u8>(latch);
                let pointer = self.direct(offset, None);
                let addr = self.direct_pointer(pointer);
                OpAddress::linear(Addr24::new(db, addr))
            }
            Mode::DirectIndirectLong => {
                let offset = self.load::<u8>(latch);
                let pointer = self.direct(offset, None);
                OpAddress::linear(self.read::<Addr24>(OpAddress::bank(pointer)))
            }
            Mode::DirectXIndirect => {
                let offset = self.load::<u8>(latch);
                let pointer = self.direct(offset, Some(x));
                let addr = self.direct_pointer(pointer);
                OpAddress::linear(Addr24::new(db, addr))
            }
            Mode::DirectIndirectY => {
                let offset = self.load::<u8>(latch);
                let pointer = self.direct(offset, None);
                let base = self.direct_pointer(pointer);
                OpAddress::linear(self.indexed(Addr24::new(db, base), y, access))
            }
            Mode::DirectIndirectLongY => {
                let offset = self.load::<u8>(latch);
                let pointer = self.direct(offset, None);
                let base = self.read::<Addr24>(OpAddress::bank(pointer));
                OpAddress::linear(base.add_linear(y.into()))
            }
            Mode::Absolute => {
                let addr = self.load::<u16>(latch);
                OpAddress::linear(Addr24::new(db, addr))
            }
            Mode::AbsoluteX | Mode::AbsoluteY => {
                let base = self.load::<u16>(latch);
                let index = if mode == Mode::AbsoluteX { x } else { y };
                OpAddress::linear(self.indexed(Addr24::new(db, base), index, access))
            }
            Mode::Long => OpAddress::linear(self.load::<Addr24>(latch)),
            Mode::LongX => {
                let base = self.load::<Addr24>(latch);
                OpAddress::linear(base.add_linear(x.into()))
            }
            Mode::StackRelative => {
                let offset = self.load::<u8>(latch);
                self.idle_one();
                let addr = self.cpu.regs.sp.wrapping_add(offset.into());
                OpAddress::bank(Addr24::new(0, addr))
            }
            Mode::StackRelativeIndirectY => {
                let offset = self.load::<u8>(latch);
                self.idle_one();
                let pointer = Addr24::new(0, self.cpu.regs.sp.wrapping_add(offset.into()));
                let base = self.read::<u16>(OpAddress::bank(pointer));
                self.idle_one();
                OpAddress::linear(Addr24::new(db, base).add_linear(y.into()))
            }
        }
    }

    /// `rel8`: returns the branch target inside the program bank
    pub fn relative(&mut self) -> u16 {
        let offset = self.load::<u8>(true) as i8;
        self.cpu.regs.pc.addr.wrapping_add(offset as u16)
    }

    /// `rel16`: returns the branch target inside the program bank
    pub fn relative_long(&mut self, access: Access) -> u16 {
        let offset = self.load::<u16>(access.latches_operand());
        self.cpu.regs.pc.addr.wrapping_add(offset)
    }

    /// `(a)`: the pointer lives in bank 0
    pub fn absolute_indirect(&mut self) -> u16 {
        let pointer = self.load::<u16>(true);
        self.read::<u16>(OpAddress::bank(Addr24::new(0, pointer)))
    }

    /// `[a]`: the 24-bit pointer lives in bank 0
    pub fn absolute_indirect_long(&mut self) -> Addr24 {
        let pointer = self.load::<u16>(true);
        self.read::<Addr24>(OpAddress::bank(Addr24::new(0, pointer)))
    }

    /// `(a,X)`: the pointer lives in the program bank
    pub fn absolute_x_indirect(&mut self) -> u16 {
        let base = self.load::<u16>(true);
        self.idle_one();
        let pointer = Addr24::new(self.cpu.regs.pc.bank, base.wrapping_add(self.cpu.regs.x));
        self.read::<u16>(OpAddress::bank(pointer))
    }

    /// The `MVN`/`MVP` operand pair: `(destination bank, source bank)`
    pub fn block_move_banks(&mut self) -> (u8, u8) {
        let dst = self.load::<u8>(false);
        let src = self.load::<u8>(true);
        (dst, src)
    }
}
