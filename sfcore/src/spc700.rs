//! SPC700 Sound Coprocessor handling types
//!
//! # Literature
//!
//! - <https://wiki.superfamicom.org/spc700-reference>
//! - <https://emudev.de/q00-snes/spc700-the-audio-processor/>
//! - The first of the two official SNES documentation books

use crate::{config::SoundConfig, dsp::Dsp};

pub const MEMORY_SIZE: usize = 64 * 1024;

/// Start of the IPL ROM shadow
pub const ROM_START: u16 = 0xffc0;

/// The boot loader visible at `0xffc0..=0xffff` while enabled in `0xf1`
pub static IPL_ROM: [u8; 64] = [
    0xCD, 0xEF, 0xBD, 0xE8, 0x00, 0xC6, 0x1D, 0xD0, 0xFC, 0x8F, 0xAA, 0xF4, 0x8F, 0xBB, 0xF5, 0x78,
    0xCC, 0xF4, 0xD0, 0xFB, 0x2F, 0x19, 0xEB, 0xF4, 0xD0, 0xFC, 0x7E, 0xF4, 0xD0, 0x0B, 0xE4, 0xF5,
    0xCB, 0xF4, 0xD7, 0x00, 0xFC, 0xD0, 0xF3, 0xAB, 0x01, 0x10, 0xEF, 0x7E, 0xF4, 0x10, 0xEB, 0xBA,
    0xF6, 0xDA, 0x00, 0xBA, 0xF4, 0xC4, 0xF4, 0xDD, 0x5D, 0xD0, 0xDB, 0x1F, 0x00, 0x00, 0xC0, 0xFF,
];

// Taken branches add two cycles on top of these (see `Spc700::branch`).
// BRA (0x2f) is unconditional and already includes them.
#[rustfmt::skip]
static CYCLES: [u8; 256] = [
    /* ^0 ^1 ^2 ^3 ^4 ^5 ^6 ^7 | ^8 ^9 ^a ^b ^c ^d ^e ^f */
       2, 8, 4, 5, 3, 4, 3, 6,   2, 6, 5, 4, 5, 4, 6, 8,  // 0^
       2, 8, 4, 5, 4, 5, 5, 6,   5, 5, 6, 5, 2, 2, 4, 6,  // 1^
       2, 8, 4, 5, 3, 4, 3, 6,   2, 6, 5, 4, 5, 4, 5, 4,  // 2^
       2, 8, 4, 5, 4, 5, 5, 6,   5, 5, 6, 5, 2, 2, 3, 8,  // 3^
       2, 8, 4, 5, 3, 4, 3, 6,   2, 6, 4, 4, 5, 4, 6, 6,  // 4^
       2, 8, 4, 5, 4, 5, 5, 6,   5, 5, 4, 5, 2, 2, 4, 3,  // 5^
       2, 8, 4, 5, 3, 4, 3, 6,   2, 6, 4, 4, 5, 4, 5, 5,  // 6^
       2, 8, 4, 5, 4, 5, 5, 6,   5, 5, 5, 5, 2, 2, 3, 6,  // 7^
       2, 8, 4, 5, 3, 4, 3, 6,   2, 6, 5, 4, 5, 2, 4, 5,  // 8^
       2, 8, 4, 5, 4, 5, 5, 6,   5, 5, 5, 5, 2, 2,12, 5,  // 9^
       3, 8, 4, 5, 3, 4, 3, 6,   2, 6, 4, 4, 5, 2, 4, 4,  // a^
       2, 8, 4, 5, 4, 5, 5, 6,   5, 5, 5, 5, 2, 2, 3, 4,  // b^
       3, 8, 4, 5, 4, 5, 4, 7,   2, 5, 6, 4, 5, 2, 4, 9,  // c^
       2, 8, 4, 5, 5, 6, 6, 7,   4, 5, 4, 5, 2, 2, 6, 3,  // d^
       2, 8, 4, 5, 3, 4, 3, 6,   2, 4, 5, 3, 4, 3, 4, 3,  // e^
       2, 8, 4, 5, 4, 5, 5, 6,   3, 4, 5, 4, 2, 2, 4, 3,  // f^
];

/// Value of the control register after reset: IPL ROM visible, timers off
pub const CONTROL_RESET: u8 = 0x80;

/// APU cycles per tick of the 64 kHz timer
const TIMER_FAST_PERIOD: u32 = 16;

/// Flags
pub mod flags {
    pub const CARRY: u8 = 0x01;
    pub const ZERO: u8 = 0x02;
    pub const INTERRUPT_ENABLE: u8 = 0x04;
    pub const HALF_CARRY: u8 = 0x08;
    pub const BREAK: u8 = 0x10;
    /// 0 means zero page is at 0x00xx,
    /// 1 means zero page is at 0x01xx
    pub const ZERO_PAGE: u8 = 0x20;
    pub const OVERFLOW: u8 = 0x40;
    pub const SIGN: u8 = 0x80;
}

/// Power-on RAM: runs of 32 `0x00` and 32 `0xff` bytes
fn power_up_memory() -> Box<[u8; MEMORY_SIZE]> {
    let mut mem = Box::new([0; MEMORY_SIZE]);
    for (i, byte) in mem.iter_mut().enumerate() {
        if i & 0x20 != 0 {
            *byte = 0xff
        }
    }
    mem
}

/// Memory operand of an instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// `dp`
    Dp,
    /// `dp+X`
    DpX,
    /// `dp+Y`
    DpY,
    /// `!abs`
    Abs,
    /// `!abs+X`
    AbsX,
    /// `!abs+Y`
    AbsY,
    /// `(X)`
    IndirectX,
    /// `(Y)`
    IndirectY,
    /// `[dp+X]`
    DpXIndirect,
    /// `[dp]+Y`
    DpIndirectY,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AluOp {
    Or,
    And,
    Eor,
    Cmp,
    Adc,
    Sbc,
}

impl AluOp {
    /// Operations of the even opcode rows `0x0_` to `0xa_`
    const ROWS: [Self; 6] = [
        Self::Or,
        Self::And,
        Self::Eor,
        Self::Cmp,
        Self::Adc,
        Self::Sbc,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ShiftOp {
    Asl,
    Rol,
    Lsr,
    Ror,
    Dec,
    Inc,
}

impl ShiftOp {
    const ROWS: [Self; 6] = [
        Self::Asl,
        Self::Rol,
        Self::Lsr,
        Self::Ror,
        Self::Dec,
        Self::Inc,
    ];
}

#[derive(Debug, Clone)]
pub struct Spc700 {
    /// The RAM, including the bytes hidden below the IPL ROM
    pub(crate) mem: Box<[u8; MEMORY_SIZE]>,
    /// data, we send to the main processor
    pub(crate) output: [u8; 4],
    pub(crate) dsp: Dsp,

    pub(crate) a: u8,
    pub(crate) x: u8,
    pub(crate) y: u8,
    pub(crate) sp: u8,
    pub(crate) status: u8,
    pub(crate) pc: u16,

    pub(crate) show_rom: bool,
    /// Ticks since the last counter increment
    pub(crate) timers: [u16; 3],
    /// Ticks per counter increment, `1..=256`
    pub(crate) timer_targets: [u16; 3],
    pub(crate) timer_enabled: [bool; 3],
    pub(crate) timer_written: [bool; 3],
    /// APU cycles not yet converted to timer ticks
    pub(crate) timer_clock: u32,
    /// Fast timer ticks modulo 8, the slow timers tick on wrap
    pub(crate) timer_phase: u8,
    /// Total APU cycles executed
    pub(crate) cycles: u64,
    pub(crate) halt: bool,
}

impl Spc700 {
    pub fn new(sound: &SoundConfig) -> Self {
        let mut spc = Self {
            mem: power_up_memory(),
            output: [0; 4],
            dsp: Dsp::new(sound),
            a: 0,
            x: 0,
            y: 0,
            sp: 0xff,
            status: 0,
            pc: ROM_START,
            show_rom: true,
            timers: [0; 3],
            timer_targets: [0x100; 3],
            timer_enabled: [false; 3],
            timer_written: [false; 3],
            timer_clock: 0,
            timer_phase: 0,
            cycles: 0,
            halt: false,
        };
        spc.reset(sound);
        spc
    }

    pub fn reset(&mut self, sound: &SoundConfig) {
        self.mem = power_up_memory();
        self.mem[0xf1] = CONTROL_RESET;
        self.output = [0; 4];
        self.a = 0;
        self.x = 0;
        self.y = 0;
        self.sp = 0xff;
        self.status = 0;
        // actually the reset vector at 0xfffe, but the visible ROM
        // always points it here
        self.pc = ROM_START;
        self.show_rom = true;
        self.timers = [0; 3];
        self.timer_targets = [0x100; 3];
        self.timer_enabled = [false; 3];
        self.timer_written = [false; 3];
        self.timer_clock = 0;
        self.timer_phase = 0;
        self.cycles = 0;
        self.halt = false;
        self.dsp.reset(sound);
        log::info!("spc700 reset");
    }

    pub fn is_rom_mapped(&self) -> bool {
        self.show_rom
    }

    pub fn is_halted(&self) -> bool {
        self.halt
    }

    pub fn ram(&self) -> &[u8; MEMORY_SIZE] {
        &self.mem
    }

    pub fn dsp(&self) -> &Dsp {
        &self.dsp
    }

    pub fn dsp_mut(&mut self) -> &mut Dsp {
        &mut self.dsp
    }

    /// The RAM as seen by the processor, with the IPL ROM overlaid when it
    /// is visible
    pub fn visible_ram(&self) -> Box<[u8; MEMORY_SIZE]> {
        let mut mem = self.mem.clone();
        if self.show_rom {
            mem[usize::from(ROM_START)..].copy_from_slice(&IPL_ROM)
        }
        mem
    }

    /// Value the main processor reads from port `n`
    pub fn output_port(&self, n: u8) -> u8 {
        self.output[usize::from(n & 3)]
    }

    /// The main processor writes port `n`
    pub fn set_input_port(&mut self, n: u8, val: u8) {
        self.mem[0xf4 + usize::from(n & 3)] = val
    }

    pub fn read(&mut self, addr: u16) -> u8 {
        match addr {
            0xf3 => self.dsp.read(self.mem[0xf2] & 0x7f),
            0xfd..=0xff => core::mem::take(&mut self.mem[usize::from(addr)]),
            ROM_START..=0xffff if self.show_rom => IPL_ROM[usize::from(addr - ROM_START)],
            addr => self.mem[usize::from(addr)],
        }
    }

    pub fn write(&mut self, addr: u16, val: u8) {
        match addr {
            0xf0 => log::warn!("write {:02x} to SPC700 test register ignored", val),
            0xf1 => self.set_control(val),
            0xf3 => {
                let reg = self.mem[0xf2];
                if reg < 0x80 {
                    self.dsp.write(reg, val, &self.mem)
                }
            }
            0xf4..=0xf7 => self.output[usize::from(addr - 0xf4)] = val,
            0xfa..=0xfc => {
                let i = usize::from(addr - 0xfa);
                self.mem[usize::from(addr)] = val;
                self.timer_targets[i] = if val == 0 { 0x100 } else { val.into() };
                self.timer_written[i] = true;
            }
            // the counters are read-only
            0xfd..=0xff => (),
            addr => self.mem[usize::from(addr)] = val,
        }
    }

    /// Write the control register `0xf1`
    pub(crate) fn set_control(&mut self, val: u8) {
        for i in 0..3 {
            let enable = val & (1 << i) != 0;
            if enable && !self.timer_enabled[i] {
                self.timers[i] = 0;
                self.mem[0xfd + i] = 0;
                let target = self.mem[0xfa + i];
                self.timer_targets[i] = if target == 0 { 0x100 } else { target.into() };
            }
            self.timer_enabled[i] = enable;
        }
        if val & 0x10 != 0 {
            self.mem[0xf4..0xf6].fill(0)
        }
        if val & 0x20 != 0 {
            self.mem[0xf6..0xf8].fill(0)
        }
        self.show_rom = val & 0x80 != 0;
        self.mem[0xf1] = val;
    }

    /// Let `cycles` APU cycles pass for the timers and the DSP
    pub fn tick(&mut self, cycles: u32) {
        self.cycles += u64::from(cycles);
        self.dsp.advance(cycles);
        self.timer_clock += cycles;
        while self.timer_clock >= TIMER_FAST_PERIOD {
            self.timer_clock -= TIMER_FAST_PERIOD;
            self.update_timer(2);
            self.timer_phase = (self.timer_phase + 1) & 7;
            if self.timer_phase == 0 {
                self.update_timer(0);
                self.update_timer(1);
            }
        }
    }

    fn update_timer(&mut self, i: usize) {
        if self.timer_enabled[i] {
            self.timers[i] += 1;
            if self.timers[i] >= self.timer_targets[i] {
                self.timers[i] = 0;
                let counter = &mut self.mem[0xfd + i];
                *counter = counter.wrapping_add(1) & 0xf;
            }
        }
    }

    /// Render every pending output frame
    pub fn flush_audio(&mut self) {
        self.dsp.flush(&self.mem)
    }

    fn dp(&self, addr: u8) -> u16 {
        u16::from(addr) | (u16::from(self.status & flags::ZERO_PAGE) << 3)
    }

    fn read_dp(&mut self, addr: u8) -> u8 {
        self.read(self.dp(addr))
    }

    fn write_dp(&mut self, addr: u8, val: u8) {
        self.write(self.dp(addr), val)
    }

    /// Both bytes of a direct page word stay inside the page
    fn read16_dp(&mut self, addr: u8) -> u16 {
        u16::from_le_bytes([self.read_dp(addr), self.read_dp(addr.wrapping_add(1))])
    }

    fn write16_dp(&mut self, addr: u8, val: u16) {
        let [lo, hi] = val.to_le_bytes();
        self.write_dp(addr, lo);
        self.write_dp(addr.wrapping_add(1), hi)
    }

    pub fn read16(&mut self, addr: u16) -> u16 {
        u16::from_le_bytes([self.read(addr), self.read(addr.wrapping_add(1))])
    }

    fn push(&mut self, val: u8) {
        self.write(u16::from(self.sp) | 0x100, val);
        self.sp = self.sp.wrapping_sub(1);
    }

    fn push16(&mut self, val: u16) {
        let [lo, hi] = val.to_le_bytes();
        self.push(hi);
        self.push(lo)
    }

    fn pull(&mut self) -> u8 {
        self.sp = self.sp.wrapping_add(1);
        self.read(u16::from(self.sp) | 0x100)
    }

    fn pull16(&mut self) -> u16 {
        u16::from_le_bytes([self.pull(), self.pull()])
    }

    fn load(&mut self) -> u8 {
        let val = self.read(self.pc);
        self.pc = self.pc.wrapping_add(1);
        val
    }

    fn load16(&mut self) -> u16 {
        u16::from_le_bytes([self.load(), self.load()])
    }

    pub fn ya(&self) -> u16 {
        u16::from_le_bytes([self.a, self.y])
    }

    pub fn set_ya(&mut self, val: u16) {
        let [a, y] = val.to_le_bytes();
        self.a = a;
        self.y = y;
    }

    fn set_status(&mut self, cond: bool, flag: u8) {
        if cond {
            self.status |= flag
        } else {
            self.status &= !flag
        }
    }

    fn carry(&self) -> u8 {
        self.status & flags::CARRY
    }

    fn update_nz8(&mut self, val: u8) {
        self.set_status(val == 0, flags::ZERO);
        self.set_status(val & 0x80 != 0, flags::SIGN);
    }

    fn update_nz16(&mut self, val: u16) {
        self.set_status(val == 0, flags::ZERO);
        self.set_status(val & 0x8000 != 0, flags::SIGN);
    }

    /// Fetch the operand bytes of `mode` and return the effective address
    fn address(&mut self, mode: Mode) -> u16 {
        match mode {
            Mode::Dp => {
                let offset = self.load();
                self.dp(offset)
            }
            Mode::DpX => {
                let offset = self.load().wrapping_add(self.x);
                self.dp(offset)
            }
            Mode::DpY => {
                let offset = self.load().wrapping_add(self.y);
                self.dp(offset)
            }
            Mode::Abs => self.load16(),
            Mode::AbsX => self.load16().wrapping_add(self.x.into()),
            Mode::AbsY => self.load16().wrapping_add(self.y.into()),
            Mode::IndirectX => self.dp(self.x),
            Mode::IndirectY => self.dp(self.y),
            Mode::DpXIndirect => {
                let offset = self.load().wrapping_add(self.x);
                self.read16_dp(offset)
            }
            Mode::DpIndirectY => {
                let offset = self.load();
                self.read16_dp(offset).wrapping_add(self.y.into())
            }
        }
    }

    fn read_mode(&mut self, mode: Mode) -> u8 {
        let addr = self.address(mode);
        self.read(addr)
    }

    fn adc(&mut self, a: u8, b: u8) -> u8 {
        let sum = u16::from(a) + u16::from(b) + u16::from(self.carry());
        let res = sum as u8;
        self.set_status(sum > 0xff, flags::CARRY);
        self.set_status(!(a ^ b) & (b ^ res) & 0x80 != 0, flags::OVERFLOW);
        self.set_status((a ^ b ^ res) & 0x10 != 0, flags::HALF_CARRY);
        self.update_nz8(res);
        res
    }

    fn sbc(&mut self, a: u8, b: u8) -> u8 {
        let diff = i16::from(a) - i16::from(b) + i16::from(self.carry()) - 1;
        let res = diff as u8;
        self.set_status(diff >= 0, flags::CARRY);
        self.set_status((a ^ b) & (a ^ res) & 0x80 != 0, flags::OVERFLOW);
        self.set_status((a ^ b ^ res) & 0x10 == 0, flags::HALF_CARRY);
        self.update_nz8(res);
        res
    }

    fn compare(&mut self, a: u8, b: u8) {
        let diff = i16::from(a) - i16::from(b);
        self.set_status(diff >= 0, flags::CARRY);
        self.update_nz8(diff as u8);
    }

    /// Returns the value to store; `CMP` returns `a` unchanged
    fn alu(&mut self, op: AluOp, a: u8, b: u8) -> u8 {
        let res = match op {
            AluOp::Or => a | b,
            AluOp::And => a & b,
            AluOp::Eor => a ^ b,
            AluOp::Cmp => {
                self.compare(a, b);
                return a;
            }
            AluOp::Adc => return self.adc(a, b),
            AluOp::Sbc => return self.sbc(a, b),
        };
        self.update_nz8(res);
        res
    }

    fn shift(&mut self, op: ShiftOp, val: u8) -> u8 {
        let res = match op {
            ShiftOp::Asl => {
                self.set_status(val & 0x80 != 0, flags::CARRY);
                val << 1
            }
            ShiftOp::Rol => {
                let res = (val << 1) | self.carry();
                self.set_status(val & 0x80 != 0, flags::CARRY);
                res
            }
            ShiftOp::Lsr => {
                self.set_status(val & 1 != 0, flags::CARRY);
                val >> 1
            }
            ShiftOp::Ror => {
                let res = (val >> 1) | (self.carry() << 7);
                self.set_status(val & 1 != 0, flags::CARRY);
                res
            }
            ShiftOp::Dec => val.wrapping_sub(1),
            ShiftOp::Inc => val.wrapping_add(1),
        };
        self.update_nz8(res);
        res
    }

    /// Fetch a relative offset and take it if `cond` holds.
    /// Returns the extra cycles.
    fn branch(&mut self, cond: bool) -> u32 {
        let rel = self.load() as i8;
        if cond {
            self.pc = self.pc.wrapping_add(rel as u16);
            2
        } else {
            0
        }
    }

    /// Operand of the bit instructions: `(address, bit)`
    fn mem_bit(&mut self) -> (u16, u8) {
        let operand = self.load16();
        (operand & 0x1fff, (operand >> 13) as u8)
    }

    /// Execute one instruction and return its duration in APU cycles.
    ///
    /// The base duration passes before the instruction body runs, so
    /// writes to the DSP land after the audio it already produced.
    pub fn dispatch_instruction(&mut self) -> u32 {
        let op = self.load();
        let base = u32::from(CYCLES[usize::from(op)]);
        self.tick(base);
        let extra = self.execute(op);
        if extra > 0 {
            self.tick(extra)
        }
        base + extra
    }

    fn execute(&mut self, op: u8) -> u32 {
        let (row, col) = (op >> 4, op & 0xf);
        match (row, col) {
            (0x0..=0xb, 0x4..=0x9) => self.execute_alu(op),
            (0x0..=0xb, 0xb | 0xc) => {
                let shift = ShiftOp::ROWS[usize::from(row >> 1)];
                let mode = match (row & 1, col) {
                    (0, 0xb) => Some(Mode::Dp),
                    (0, _) => Some(Mode::Abs),
                    (_, 0xb) => Some(Mode::DpX),
                    _ => None,
                };
                match mode {
                    Some(mode) => {
                        let addr = self.address(mode);
                        let val = self.read(addr);
                        let res = self.shift(shift, val);
                        self.write(addr, res)
                    }
                    None => self.a = self.shift(shift, self.a),
                }
                0
            }
            (_, 0x1) => {
                // TCALL n
                self.push16(self.pc);
                self.pc = self.read16(0xffde - (u16::from(row) << 1));
                0
            }
            (_, 0x2) => {
                // SET1 / CLR1 dp.bit
                let bit = 1 << (row >> 1);
                let addr = self.address(Mode::Dp);
                let val = self.read(addr);
                let val = if row & 1 == 0 { val | bit } else { val & !bit };
                self.write(addr, val);
                0
            }
            (_, 0x3) => {
                // BBS / BBC dp.bit, rel
                let val = self.read_mode(Mode::Dp);
                let set = val & (1 << (row >> 1)) != 0;
                self.branch(set == (row & 1 == 0))
            }
            _ => self.execute_misc(op),
        }
    }

    /// Columns 4 to 9 of the rows `0x0_` to `0xb_`
    fn execute_alu(&mut self, op: u8) -> u32 {
        let (row, col) = (op >> 4, op & 0xf);
        let alu = AluOp::ROWS[usize::from(row >> 1)];
        let mode = match (row & 1, col) {
            (0, 0x4) => Mode::Dp,
            (0, 0x5) => Mode::Abs,
            (0, 0x6) => Mode::IndirectX,
            (0, 0x7) => Mode::DpXIndirect,
            (1, 0x4) => Mode::DpX,
            (1, 0x5) => Mode::AbsX,
            (1, 0x6) => Mode::AbsY,
            (1, 0x7) => Mode::DpIndirectY,
            (0, 0x8) => {
                // A, #imm
                let imm = self.load();
                self.a = self.alu(alu, self.a, imm);
                return 0;
            }
            (0, _) => {
                // dp, dp: the source operand comes first
                let src = self.read_mode(Mode::Dp);
                let dst = self.address(Mode::Dp);
                let val = self.read(dst);
                let res = self.alu(alu, val, src);
                if alu != AluOp::Cmp {
                    self.write(dst, res)
                }
                return 0;
            }
            (_, 0x8) => {
                // dp, #imm
                let imm = self.load();
                let dst = self.address(Mode::Dp);
                let val = self.read(dst);
                let res = self.alu(alu, val, imm);
                if alu != AluOp::Cmp {
                    self.write(dst, res)
                }
                return 0;
            }
            _ => {
                // (X), (Y)
                let src = self.read_mode(Mode::IndirectY);
                let dst = self.dp(self.x);
                let val = self.read(dst);
                let res = self.alu(alu, val, src);
                if alu != AluOp::Cmp {
                    self.write(dst, res)
                }
                return 0;
            }
        };
        let val = self.read_mode(mode);
        self.a = self.alu(alu, self.a, val);
        0
    }

    fn store(&mut self, mode: Mode, val: u8) {
        let addr = self.address(mode);
        self.write(addr, val)
    }

    fn load_reg(&mut self, mode: Option<Mode>) -> u8 {
        let val = match mode {
            Some(mode) => self.read_mode(mode),
            None => self.load(),
        };
        self.update_nz8(val);
        val
    }

    fn execute_misc(&mut self, op: u8) -> u32 {
        match op {
            0x00 => (), // NOP
            0x10 => return self.branch(self.status & flags::SIGN == 0),
            0x30 => return self.branch(self.status & flags::SIGN != 0),
            0x50 => return self.branch(self.status & flags::OVERFLOW == 0),
            0x70 => return self.branch(self.status & flags::OVERFLOW != 0),
            0x90 => return self.branch(self.status & flags::CARRY == 0),
            0xb0 => return self.branch(self.status & flags::CARRY != 0),
            0xd0 => return self.branch(self.status & flags::ZERO == 0),
            0xf0 => return self.branch(self.status & flags::ZERO != 0),
            0x2f => {
                self.branch(true);
            }
            0x20 => self.status &= !flags::ZERO_PAGE,
            0x40 => self.status |= flags::ZERO_PAGE,
            0x60 => self.status &= !flags::CARRY,
            0x80 => self.status |= flags::CARRY,
            0xa0 => self.status |= flags::INTERRUPT_ENABLE,
            0xc0 => self.status &= !flags::INTERRUPT_ENABLE,
            0xe0 => self.status &= !(flags::OVERFLOW | flags::HALF_CARRY),
            0xed => self.status ^= flags::CARRY,

            // bit operations on `!abs.bit`
            0x0a | 0x2a | 0x4a | 0x6a | 0x8a | 0xaa => {
                let (addr, bit) = self.mem_bit();
                let mut set = (self.read(addr) >> bit) & 1 != 0;
                if op == 0x2a || op == 0x6a {
                    set = !set
                }
                let carry = self.carry() != 0;
                let carry = match op {
                    0x0a | 0x2a => carry || set,
                    0x4a | 0x6a => carry && set,
                    0x8a => carry ^ set,
                    _ => set,
                };
                self.set_status(carry, flags::CARRY)
            }
            0xca => {
                // MOV1 !abs.bit, C
                let (addr, bit) = self.mem_bit();
                let val = self.read(addr);
                let val = (val & !(1 << bit)) | (self.carry() << bit);
                self.write(addr, val)
            }
            0xea => {
                // NOT1 !abs.bit
                let (addr, bit) = self.mem_bit();
                let val = self.read(addr) ^ (1 << bit);
                self.write(addr, val)
            }

            // word operations on `dp`
            0x1a | 0x3a => {
                let offset = self.load();
                let val = self.read16_dp(offset);
                let val = if op == 0x1a {
                    val.wrapping_sub(1)
                } else {
                    val.wrapping_add(1)
                };
                self.write16_dp(offset, val);
                self.update_nz16(val)
            }
            0x5a => {
                // CMPW YA, dp
                let offset = self.load();
                let val = self.read16_dp(offset);
                let diff = i32::from(self.ya()) - i32::from(val);
                self.set_status(diff >= 0, flags::CARRY);
                self.update_nz16(diff as u16)
            }
            0x7a => {
                // ADDW YA, dp
                let offset = self.load();
                let val = self.read16_dp(offset);
                let ya = self.ya();
                let sum = u32::from(ya) + u32::from(val);
                let res = sum as u16;
                self.set_status(sum > 0xffff, flags::CARRY);
                self.set_status(!(ya ^ val) & (val ^ res) & 0x8000 != 0, flags::OVERFLOW);
                self.set_status((ya ^ val ^ res) & 0x1000 != 0, flags::HALF_CARRY);
                self.set_ya(res);
                self.update_nz16(res)
            }
            0x9a => {
                // SUBW YA, dp
                let offset = self.load();
                let val = self.read16_dp(offset);
                let ya = self.ya();
                let diff = i32::from(ya) - i32::from(val);
                let res = diff as u16;
                self.set_status(diff >= 0, flags::CARRY);
                self.set_status((ya ^ val) & (ya ^ res) & 0x8000 != 0, flags::OVERFLOW);
                self.set_status((ya ^ val ^ res) & 0x1000 == 0, flags::HALF_CARRY);
                self.set_ya(res);
                self.update_nz16(res)
            }
            0xba => {
                // MOVW YA, dp
                let offset = self.load();
                let val = self.read16_dp(offset);
                self.set_ya(val);
                self.update_nz16(val)
            }
            0xda => {
                // MOVW dp, YA
                let offset = self.load();
                self.write16_dp(offset, self.ya())
            }
            0xfa => {
                // MOV dp, dp
                let val = self.read_mode(Mode::Dp);
                self.store(Mode::Dp, val)
            }

            // stack and register transfers
            0x0d => self.push(self.status),
            0x2d => self.push(self.a),
            0x4d => self.push(self.x),
            0x6d => self.push(self.y),
            0x8e => self.status = self.pull(),
            0xae => self.a = self.pull(),
            0xce => self.x = self.pull(),
            0xee => self.y = self.pull(),
            0x1d => {
                self.x = self.x.wrapping_sub(1);
                self.update_nz8(self.x)
            }
            0x3d => {
                self.x = self.x.wrapping_add(1);
                self.update_nz8(self.x)
            }
            0xdc => {
                self.y = self.y.wrapping_sub(1);
                self.update_nz8(self.y)
            }
            0xfc => {
                self.y = self.y.wrapping_add(1);
                self.update_nz8(self.y)
            }
            0x5d => {
                self.x = self.a;
                self.update_nz8(self.x)
            }
            0x7d => {
                self.a = self.x;
                self.update_nz8(self.a)
            }
            0x9d => {
                self.x = self.sp;
                self.update_nz8(self.x)
            }
            0xbd => self.sp = self.x,
            0xdd => {
                self.a = self.y;
                self.update_nz8(self.a)
            }
            0xfd => {
                self.y = self.a;
                self.update_nz8(self.y)
            }

            // compares on X and Y
            0xc8 => {
                let val = self.load();
                self.compare(self.x, val)
            }
            0x3e | 0x1e => {
                let mode = if op == 0x3e { Mode::Dp } else { Mode::Abs };
                let val = self.read_mode(mode);
                self.compare(self.x, val)
            }
            0xad => {
                let val = self.load();
                self.compare(self.y, val)
            }
            0x7e | 0x5e => {
                let mode = if op == 0x7e { Mode::Dp } else { Mode::Abs };
                let val = self.read_mode(mode);
                self.compare(self.y, val)
            }

            // TSET1 / TCLR1 !abs
            0x0e | 0x4e => {
                let addr = self.address(Mode::Abs);
                let val = self.read(addr);
                self.update_nz8(self.a.wrapping_sub(val));
                let res = if op == 0x0e { val | self.a } else { val & !self.a };
                self.write(addr, res)
            }

            // loops
            0x2e | 0xde => {
                // CBNE dp(+X), rel
                let mode = if op == 0x2e { Mode::Dp } else { Mode::DpX };
                let val = self.read_mode(mode);
                return self.branch(val != self.a);
            }
            0x6e => {
                // DBNZ dp, rel
                let addr = self.address(Mode::Dp);
                let val = self.read(addr).wrapping_sub(1);
                self.write(addr, val);
                return self.branch(val != 0);
            }
            0xfe => {
                // DBNZ Y, rel
                self.y = self.y.wrapping_sub(1);
                return self.branch(self.y != 0);
            }

            // arithmetic on A and YA
            0x9e => {
                // DIV YA, X
                if self.x == 0 {
                    self.status |= flags::OVERFLOW;
                    self.a = 0xff;
                    self.y = 0xff;
                } else {
                    self.status &= !flags::OVERFLOW;
                    let (ya, x) = (self.ya(), u16::from(self.x));
                    self.a = (ya / x) as u8;
                    self.y = (ya % x) as u8;
                }
                self.update_nz8(self.a)
            }
            0xcf => {
                // MUL YA
                let res = u16::from(self.a) * u16::from(self.y);
                self.set_ya(res);
                self.update_nz16(res)
            }
            0x9f => {
                // XCN A
                self.a = self.a.rotate_left(4);
                self.update_nz8(self.a)
            }
            0xdf => {
                // DAA A
                if self.a & 0xf > 9 || self.status & flags::HALF_CARRY != 0 {
                    if self.a > 0xf0 {
                        self.status |= flags::CARRY
                    }
                    self.a = self.a.wrapping_add(6);
                }
                if self.a > 0x9f || self.carry() != 0 {
                    self.a = self.a.wrapping_add(0x60);
                    self.status |= flags::CARRY
                } else {
                    self.status &= !flags::CARRY
                }
                self.update_nz8(self.a)
            }
            0xbe => {
                // DAS A
                if self.a & 0xf > 9 || self.status & flags::HALF_CARRY == 0 {
                    self.a = self.a.wrapping_sub(6);
                }
                if self.a > 0x9f || self.carry() == 0 {
                    self.a = self.a.wrapping_sub(0x60);
                    self.status &= !flags::CARRY
                } else {
                    self.status |= flags::CARRY
                }
                self.update_nz8(self.a)
            }

            // jumps and calls
            0x0f => {
                // BRK
                let new_pc = self.read16(0xffde);
                self.push16(self.pc);
                self.push(self.status);
                self.pc = new_pc;
                self.status = (self.status | flags::BREAK) & !flags::INTERRUPT_ENABLE
            }
            0x1f => {
                // JMP [!abs+X]
                let addr = self.address(Mode::AbsX);
                self.pc = self.read16(addr)
            }
            0x3f => {
                // CALL !abs
                let addr = self.load16();
                self.push16(self.pc);
                self.pc = addr
            }
            0x4f => {
                // PCALL up
                let offset = self.load();
                self.push16(self.pc);
                self.pc = 0xff00 | u16::from(offset)
            }
            0x5f => self.pc = self.load16(),
            0x6f => self.pc = self.pull16(),
            0x7f => {
                self.status = self.pull();
                self.pc = self.pull16()
            }

            // moves
            0x8f => {
                let imm = self.load();
                self.store(Mode::Dp, imm)
            }
            0xaf => {
                // MOV (X)+, A
                let addr = self.dp(self.x);
                self.write(addr, self.a);
                self.x = self.x.wrapping_add(1)
            }
            0xbf => {
                // MOV A, (X)+
                self.a = self.read_mode(Mode::IndirectX);
                self.x = self.x.wrapping_add(1);
                self.update_nz8(self.a)
            }
            0xc4 => self.store(Mode::Dp, self.a),
            0xc5 => self.store(Mode::Abs, self.a),
            0xc6 => self.store(Mode::IndirectX, self.a),
            0xc7 => self.store(Mode::DpXIndirect, self.a),
            0xd4 => self.store(Mode::DpX, self.a),
            0xd5 => self.store(Mode::AbsX, self.a),
            0xd6 => self.store(Mode::AbsY, self.a),
            0xd7 => self.store(Mode::DpIndirectY, self.a),
            0xc9 => self.store(Mode::Abs, self.x),
            0xd8 => self.store(Mode::Dp, self.x),
            0xd9 => self.store(Mode::DpY, self.x),
            0xcb => self.store(Mode::Dp, self.y),
            0xcc => self.store(Mode::Abs, self.y),
            0xdb => self.store(Mode::DpX, self.y),
            0xe4 => self.a = self.load_reg(Some(Mode::Dp)),
            0xe5 => self.a = self.load_reg(Some(Mode::Abs)),
            0xe6 => self.a = self.load_reg(Some(Mode::IndirectX)),
            0xe7 => self.a = self.load_reg(Some(Mode::DpXIndirect)),
            0xe8 => self.a = self.load_reg(None),
            0xf4 => self.a = self.load_reg(Some(Mode::DpX)),
            0xf5 => self.a = self.load_reg(Some(Mode::AbsX)),
            0xf6 => self.a = self.load_reg(Some(Mode::AbsY)),
            0xf7 => self.a = self.load_reg(Some(Mode::DpIndirectY)),
            0xcd => self.x = self.load_reg(None),
            0xe9 => self.x = self.load_reg(Some(Mode::Abs)),
            0xf8 => self.x = self.load_reg(Some(Mode::Dp)),
            0xf9 => self.x = self.load_reg(Some(Mode::DpY)),
            0x8d => self.y = self.load_reg(None),
            0xeb => self.y = self.load_reg(Some(Mode::Dp)),
            0xec => self.y = self.load_reg(Some(Mode::Abs)),
            0xfb => self.y = self.load_reg(Some(Mode::DpX)),

            0xef | 0xff => {
                // SLEEP / STOP - Halt the processor until reset
                log::warn!(
                    "spc700 halted by {} at {:04x}",
                    if op == 0xef { "SLEEP" } else { "STOP" },
                    self.pc.wrapping_sub(1)
                );
                self.halt = true
            }
            _ => unreachable!("opcode {:02x} is decoded by row", op),
        }
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spc_with_program(program: &[u8]) -> Spc700 {
        let mut spc = Spc700::new(&SoundConfig::default());
        spc.mem[0x200..0x200 + program.len()].copy_from_slice(program);
        spc.pc = 0x200;
        spc
    }

    #[test]
    fn reset_state() {
        let mut spc = Spc700::new(&SoundConfig::default());
        assert_eq!((spc.sp, spc.pc, spc.status), (0xff, 0xffc0, 0));
        assert_eq!(spc.read(0xffc0), 0xcd);
        assert_eq!(spc.mem[0x20], 0xff);
        assert_eq!(spc.mem[0x40], 0x00);
        assert_eq!(spc.mem[0xf1], CONTROL_RESET);
    }

    #[test]
    fn rom_shadow_keeps_written_ram() {
        let mut spc = spc_with_program(&[]);
        spc.write(0xffc0, 0x12);
        assert_eq!(spc.read(0xffc0), IPL_ROM[0]);
        spc.write(0xf1, 0x00);
        assert_eq!(spc.read(0xffc0), 0x12);
    }

    #[test]
    fn adc_and_sbc_flags() {
        // MOV A,#$7f ; ADC A,#$01 ; SETC ; SBC A,#$01
        let mut spc = spc_with_program(&[0xe8, 0x7f, 0x88, 0x01, 0x80, 0xa8, 0x01]);
        spc.dispatch_instruction();
        spc.dispatch_instruction();
        assert_eq!(spc.a, 0x80);
        assert_ne!(spc.status & flags::OVERFLOW, 0);
        assert_ne!(spc.status & flags::HALF_CARRY, 0);
        assert_eq!(spc.status & flags::CARRY, 0);
        spc.dispatch_instruction();
        spc.dispatch_instruction();
        assert_eq!(spc.a, 0x7f);
        assert_ne!(spc.status & flags::CARRY, 0);
        assert_ne!(spc.status & flags::OVERFLOW, 0);
    }

    #[test]
    fn branch_cycles() {
        // MOV Y,#2 ; loop: DBNZ Y,loop
        let mut spc = spc_with_program(&[0x8d, 0x02, 0xfe, 0xfe]);
        assert_eq!(spc.dispatch_instruction(), 2);
        assert_eq!(spc.dispatch_instruction(), 6);
        assert_eq!(spc.pc, 0x202);
        assert_eq!(spc.dispatch_instruction(), 4);
        assert_eq!(spc.pc, 0x204);
        assert_eq!(spc.y, 0);
    }

    #[test]
    fn mul_div_and_words() {
        // MOV A,#$10 ; MOV Y,#$20 ; MUL YA ; MOV X,#$30 ; DIV YA,X
        let mut spc = spc_with_program(&[0xe8, 0x10, 0x8d, 0x20, 0xcf, 0xcd, 0x30, 0x9e]);
        for _ in 0..3 {
            spc.dispatch_instruction();
        }
        assert_eq!(spc.ya(), 0x200);
        spc.dispatch_instruction();
        spc.dispatch_instruction();
        assert_eq!((spc.a, spc.y), (0x0a, 0x20));
    }

    #[test]
    fn call_and_return() {
        // CALL $0300 ... $0300: RET
        let mut spc = spc_with_program(&[0x3f, 0x00, 0x03]);
        spc.mem[0x300] = 0x6f;
        spc.dispatch_instruction();
        assert_eq!((spc.pc, spc.sp), (0x300, 0xfd));
        assert_eq!(spc.read16(0x1fe), 0x203);
        spc.dispatch_instruction();
        assert_eq!((spc.pc, spc.sp), (0x203, 0xff));
    }

    #[test]
    fn timers_count_and_clear_on_read() {
        let mut spc = spc_with_program(&[]);
        spc.write(0xfc, 2);
        spc.write(0xf1, 0x04);
        spc.tick(16 * 5);
        assert_eq!(spc.read(0xff), 2);
        assert_eq!(spc.read(0xff), 0);
        // timer 0 ticks eight times slower, target 0 means 256
        spc.write(0xf1, 0x05);
        spc.tick(128 * 256);
        assert_eq!(spc.read(0xfd), 1);
    }

    #[test]
    fn control_clears_input_ports() {
        let mut spc = spc_with_program(&[]);
        for i in 0..4 {
            spc.set_input_port(i, 0x11 * (i + 1));
        }
        spc.write(0xf1, 0x10);
        assert_eq!(
            [spc.read(0xf4), spc.read(0xf5), spc.read(0xf6), spc.read(0xf7)],
            [0, 0, 0x33, 0x44]
        );
        spc.write(0xf5, 0x99);
        assert_eq!(spc.output_port(1), 0x99);
        assert_eq!(spc.read(0xf5), 0);
    }

    #[test]
    fn stop_halts() {
        let mut spc = spc_with_program(&[0xff]);
        spc.dispatch_instruction();
        assert!(spc.is_halted());
    }
}
