//! The emulated machine context and its CPU-side bus

use crate::{
    backend::AudioBackend,
    config::Config,
    cpu::{Cpu, CpuState, Status},
    smp::Smp,
    timing::{Cycles, Scheduler, ONE_CYCLE, TWO_CYCLES},
};

/// The 24-bit address type used
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Addr24 {
    pub bank: u8,
    pub addr: u16,
}

impl Addr24 {
    pub const fn new(bank: u8, addr: u16) -> Self {
        Self { bank, addr }
    }

    pub const fn from_u32(addr: u32) -> Self {
        Self::new((addr >> 16) as u8, (addr & 0xffff) as u16)
    }

    pub const fn to_u32(self) -> u32 {
        ((self.bank as u32) << 16) | self.addr as u32
    }

    /// Add an offset, carrying into the bank and wrapping at 24 bits
    pub const fn add_linear(self, offset: u32) -> Self {
        Self::from_u32(self.to_u32().wrapping_add(offset) & 0xff_ffff)
    }

    /// Add an offset, wrapping inside the current bank
    pub const fn add_in_bank(self, offset: u16) -> Self {
        Self::new(self.bank, self.addr.wrapping_add(offset))
    }
}

impl std::fmt::Display for Addr24 {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:02x}:{:04x}", self.bank, self.addr)
    }
}

pub trait Data: std::fmt::Debug + Sized + Default + Clone + Copy {
    type Arr: AsRef<[u8]> + AsMut<[u8]> + Default + std::fmt::Debug + Clone + Copy;
    fn to_bytes(self) -> Self::Arr;
    fn from_bytes(bytes: &Self::Arr) -> Self;
}

impl Data for u8 {
    type Arr = [u8; 1];
    fn to_bytes(self) -> [u8; 1] {
        [self]
    }
    fn from_bytes(bytes: &[u8; 1]) -> Self {
        bytes[0]
    }
}

impl Data for u16 {
    type Arr = [u8; 2];
    fn to_bytes(self) -> [u8; 2] {
        self.to_le_bytes()
    }
    fn from_bytes(bytes: &[u8; 2]) -> Self {
        u16::from_le_bytes(*bytes)
    }
}

impl Data for Addr24 {
    type Arr = [u8; 3];
    fn to_bytes(self) -> [u8; 3] {
        let bytes = self.addr.to_le_bytes();
        [bytes[0], bytes[1], self.bank]
    }
    fn from_bytes(bytes: &[u8; 3]) -> Self {
        Self::new(bytes[2], u16::from_le_bytes([bytes[0], bytes[1]]))
    }
}

/// Address wrapping rule for the bytes following an effective address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wrap {
    /// The address wraps inside its bank (direct page, stack, bank 0 pointers)
    Bank,
    /// The address carries into the next bank and wraps at 24 bits
    Linear,
}

/// The effective operand address of one instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpAddress {
    pub addr: Addr24,
    pub wrap: Wrap,
}

impl OpAddress {
    pub const fn bank(addr: Addr24) -> Self {
        Self {
            addr,
            wrap: Wrap::Bank,
        }
    }

    pub const fn linear(addr: Addr24) -> Self {
        Self {
            addr,
            wrap: Wrap::Linear,
        }
    }

    pub const fn offset(self, n: u16) -> Addr24 {
        match self.wrap {
            Wrap::Bank => self.addr.add_in_bank(n),
            Wrap::Linear => self.addr.add_linear(n as u32),
        }
    }
}

/// The memory map the CPU is attached to (cartridge, WRAM, I/O registers).
///
/// The APU ports at `$2140..=$217f` of the system banks are handled by the
/// [`Device`] itself and never reach the map.
pub trait MemoryMap {
    /// Read a byte; `None` means nothing drives the bus (open bus)
    fn read(&mut self, addr: Addr24) -> Option<u8>;

    fn write(&mut self, addr: Addr24, value: u8);

    /// Access time of the address in master cycles
    fn speed(&self, _addr: Addr24) -> Cycles {
        crate::timing::SLOW_ONE_CYCLE
    }
}

/// Returns `true` for the CPU-visible APU port mirror region
pub const fn is_apu_port(addr: Addr24) -> bool {
    (addr.bank & 0x40 == 0) && addr.addr & 0xffc0 == 0x2140
}

/// The emulated machine: CPU, audio unit and their shared clock
#[derive(Debug)]
pub struct Device<M: MemoryMap, B: AudioBackend> {
    pub cpu: Cpu,
    pub smp: Smp<B>,
    pub memory: M,
    /// <https://wiki.superfamicom.org/open-bus>
    pub open_bus: u8,
    pub(crate) scheduler: Scheduler,
    pub(crate) config: Config,
}

impl<M: MemoryMap, B: AudioBackend> Device<M, B> {
    pub fn new(memory: M, backend: B, config: Config) -> Self {
        let mut device = Self {
            cpu: Cpu::new(),
            smp: Smp::new(backend, &config),
            memory,
            open_bus: 0,
            scheduler: Scheduler::new(),
            config,
        };
        device.reset();
        device
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Hardware reset of every component
    pub fn reset(&mut self) {
        self.scheduler.reset();
        self.smp.reset(&self.config);
        self.cpu.reset();
        self.open_bus = 0;
        let vector = self.read::<u16>(OpAddress::bank(Addr24::new(0, 0xfffc)));
        self.cpu.regs.pc = Addr24::new(0, vector);
        // the vector fetch is part of the reset sequence, not program time
        self.scheduler.cycles = 0;
        log::info!("cpu reset, pc = {}", self.cpu.regs.pc);
    }

    /// Master cycles elapsed since reset
    pub fn cycles(&self) -> u64 {
        self.scheduler.cycles
    }

    /// Advance the clock by internal operation cycles
    pub(crate) fn idle(&mut self, n: Cycles) {
        self.scheduler.cycles += u64::from(n);
    }

    pub(crate) fn idle_one(&mut self) {
        self.idle(ONE_CYCLE)
    }

    /// Read one byte and advance the clock. Unmapped addresses return
    /// open bus; everything else refreshes it.
    pub fn read_byte(&mut self, addr: Addr24) -> u8 {
        self.read_byte_latched(addr, true)
    }

    fn read_byte_latched(&mut self, addr: Addr24, latch: bool) -> u8 {
        self.scheduler.cycles += u64::from(self.memory.speed(addr));
        let value = if is_apu_port(addr) {
            self.sync_apu();
            Some(self.smp.read_output_port(addr.addr as u8))
        } else {
            self.memory.read(addr)
        };
        match value {
            Some(value) => {
                if latch {
                    self.open_bus = value
                }
                value
            }
            None => self.open_bus,
        }
    }

    pub fn write_byte(&mut self, addr: Addr24, value: u8) {
        self.scheduler.cycles += u64::from(self.memory.speed(addr));
        self.open_bus = value;
        if is_apu_port(addr) {
            self.sync_apu();
            self.smp.write_input_port(addr.addr as u8, value)
        } else {
            self.memory.write(addr, value)
        }
    }

    /// Read a value at an effective address
    pub fn read<D: Data>(&mut self, op: OpAddress) -> D {
        let mut arr = D::Arr::default();
        for (i, d) in arr.as_mut().iter_mut().enumerate() {
            *d = self.read_byte(op.offset(i as u16));
        }
        D::from_bytes(&arr)
    }

    /// Write a value to an effective address
    pub fn write<D: Data>(&mut self, op: OpAddress, value: D) {
        for (i, d) in value.to_bytes().as_ref().iter().enumerate() {
            self.write_byte(op.offset(i as u16), *d)
        }
    }

    /// Write a value high byte first, the order read-modify-write
    /// instructions use
    pub fn write_rmw<D: Data>(&mut self, op: OpAddress, value: D) {
        for (i, d) in value.to_bytes().as_ref().iter().enumerate().rev() {
            self.write_byte(op.offset(i as u16), *d)
        }
    }

    /// Fetch a value from the program counter memory region.
    ///
    /// The program counter wraps inside the program bank. The open bus
    /// latch only follows the fetched bytes if `latch` is set.
    pub fn load<D: Data>(&mut self, latch: bool) -> D {
        let mut arr = D::Arr::default();
        for d in arr.as_mut() {
            let pc = self.cpu.regs.pc;
            *d = self.read_byte_latched(pc, latch);
            self.cpu.regs.pc.addr = pc.addr.wrapping_add(1);
        }
        D::from_bytes(&arr)
    }

    fn stack_addr(&self) -> Addr24 {
        Addr24::new(0, self.cpu.regs.sp)
    }

    fn step_sp(&mut self, up: bool) {
        let sp = if up {
            self.cpu.regs.sp.wrapping_add(1)
        } else {
            self.cpu.regs.sp.wrapping_sub(1)
        };
        self.cpu.regs.sp = if self.cpu.regs.is_emulation {
            (sp & 0xff) | 0x100
        } else {
            sp
        };
    }

    /// Push data on the stack
    pub fn push<D: Data>(&mut self, val: D) {
        for d in val.to_bytes().as_ref().iter().rev() {
            self.write_byte(self.stack_addr(), *d);
            self.step_sp(false);
        }
    }

    /// Pull data from the stack
    pub fn pull<D: Data>(&mut self) -> D {
        let mut arr = D::Arr::default();
        for d in arr.as_mut() {
            self.step_sp(true);
            *d = self.read_byte(self.stack_addr());
        }
        D::from_bytes(&arr)
    }

    /// Enter an interrupt handler, pushing the current program counter.
    ///
    /// `software` marks BRK/COP, which set the pushed B flag in emulation mode.
    pub(crate) fn interrupt(&mut self, native_vector: u16, emu_vector: u16, software: bool) {
        if self.cpu.regs.is_emulation {
            self.idle_one();
            self.push(self.cpu.regs.pc.addr);
            let mut status = self.cpu.regs.status;
            status.set_if(Status::BREAK, software);
            self.push(status.0 | 0x20);
        } else {
            self.idle(TWO_CYCLES);
            self.push(self.cpu.regs.pc.bank);
            self.push(self.cpu.regs.pc.addr);
            self.push(self.cpu.regs.status.0);
        }
        self.cpu.regs.status |= Status::IRQ_DISABLE;
        self.cpu.regs.status &= !Status::DECIMAL;
        let vector = if self.cpu.regs.is_emulation {
            emu_vector
        } else {
            native_vector
        };
        let addr = self.read::<u16>(OpAddress::bank(Addr24::new(0, vector)));
        self.cpu.regs.pc = Addr24::new(0, addr);
    }

    /// Take a pending NMI or IRQ before the next instruction.
    ///
    /// Returns `true` if an interrupt sequence was run.
    pub(crate) fn poll_interrupts(&mut self) -> bool {
        let irq = self.cpu.irq_line && !self.cpu.regs.status.has(Status::IRQ_DISABLE);
        if self.cpu.state == CpuState::WaitingForInterrupt
            && (self.cpu.nmi_pending || self.cpu.irq_line)
        {
            // WAI also ends on a masked IRQ, without taking it
            self.cpu.state = CpuState::Running;
        }
        if self.cpu.state != CpuState::Running {
            return false;
        }
        if self.cpu.nmi_pending {
            self.cpu.nmi_pending = false;
            self.interrupt(0xffea, 0xfffa, false);
            log::debug!("nmi taken, handler at {}", self.cpu.regs.pc);
            true
        } else if irq {
            self.interrupt(0xffee, 0xfffe, false);
            log::debug!("irq taken, handler at {}", self.cpu.regs.pc);
            true
        } else {
            false
        }
    }

    /// Latch an NMI edge
    pub fn post_nmi(&mut self) {
        self.cpu.nmi_pending = true
    }

    /// Drive the IRQ input line
    pub fn set_irq_line(&mut self, level: bool) {
        self.cpu.irq_line = level
    }

    /// Let the audio unit run up to the current CPU time
    pub fn sync_apu(&mut self) {
        self.smp.catch_up(self.scheduler.cycles)
    }
}
