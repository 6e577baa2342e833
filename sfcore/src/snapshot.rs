//! Freezing and restoring the machine state
//!
//! The blob starts with the snes9x signature and holds the `CPU`, `REG`,
//! `APU`, `ARE`, `ARA` and `SOU` blocks in the layout snes9x uses. The `XTR`
//! block that follows holds state snes9x keeps nowhere (clock fractions,
//! the pending key-on pipeline, interpolation and the echo ring). Snapshots
//! without it load like snes9x loads its own: the missing state is rebuilt
//! from the DSP registers.

use crate::{
    backend::AudioBackend,
    cpu::{Cpu, CpuState, Regs, Status},
    device::{Addr24, Device, MemoryMap},
    dsp::Dsp,
    spc700::{Spc700, MEMORY_SIZE, ROM_START},
    timing::ONE_CYCLE,
};
use save_state::{InSaveState, SaveStateDeserializer, SaveStateSerializer};

pub const SIGNATURE: &[u8; 14] = b"#!snes9x:0001\n";

/// Bits of the `Flags` field of the `CPU` block
pub mod cpu_flags {
    pub const DEBUG: u32 = 0x1;
    pub const NMI: u32 = 0x80;
    pub const IRQ: u32 = 0x800;
    pub const STOPPED: u32 = 0x1000;
}

const APU_HALTED: u8 = 0x80;
const EXTRA_RAM_LEN: usize = MEMORY_SIZE - ROM_START as usize;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SnapshotError {
    #[error("missing snapshot signature")]
    BadSignature,
    #[error("snapshot needs {needed} bytes, the buffer holds {available}")]
    BufferTooSmall { needed: usize, available: usize },
    #[error("malformed snapshot: {0}")]
    Format(#[from] save_state::Error),
}

fn get<T: InSaveState + Default>(state: &mut SaveStateDeserializer<'_>) -> Result<T, save_state::Error> {
    let mut value = T::default();
    value.deserialize(state)?;
    Ok(value)
}

/// Everything a restore replaces, built up before the machine is touched
struct Staged {
    cpu: Cpu,
    spc: Spc700,
    cycles: u64,
    open_bus: u8,
    last_cycles: u64,
    fraction: u64,
    budget: i64,
}

fn cpu_state_code(state: CpuState) -> u8 {
    match state {
        CpuState::Running => 0,
        CpuState::WaitingForInterrupt => 1,
        CpuState::Stopped => 2,
        CpuState::DebugBreak => 3,
    }
}

fn cpu_state_from_code(code: u8) -> Result<CpuState, save_state::Error> {
    Ok(match code {
        0 => CpuState::Running,
        1 => CpuState::WaitingForInterrupt,
        2 => CpuState::Stopped,
        3 => CpuState::DebugBreak,
        value => {
            return Err(save_state::Error::InvalidValue {
                what: "cpu state",
                value: value.into(),
            })
        }
    })
}

fn freeze_cpu(cpu: &Cpu, cycles: u64, next_event: Option<u64>, s: &mut SaveStateSerializer) {
    let mut flags = 0;
    if cpu.state == CpuState::DebugBreak {
        flags |= cpu_flags::DEBUG
    }
    if cpu.state == CpuState::Stopped {
        flags |= cpu_flags::STOPPED
    }
    if cpu.nmi_pending {
        flags |= cpu_flags::NMI
    }
    if cpu.irq_line {
        flags |= cpu_flags::IRQ
    }
    flags.serialize(s);
    // branch skip
    0u8.serialize(s);
    cpu.nmi_pending.serialize(s);
    cpu.irq_line.serialize(s);
    (cpu.state == CpuState::WaitingForInterrupt).serialize(s);
    // which event
    0u8.serialize(s);
    (cycles as u32).serialize(s);
    (next_event.unwrap_or(0) as u32).serialize(s);
    // v counter
    0u32.serialize(s);
    cpu.mem_speed.serialize(s);
    (cpu.mem_speed * 2).serialize(s);
    ONE_CYCLE.serialize(s);
}

/// Returns the master clock stored in the block
fn restore_cpu(cpu: &mut Cpu, d: &mut SaveStateDeserializer<'_>) -> Result<u64, save_state::Error> {
    let flags: u32 = get(d)?;
    let _branch_skip: u8 = get(d)?;
    let nmi: bool = get(d)?;
    let irq: bool = get(d)?;
    let waiting: bool = get(d)?;
    let _which_event: u8 = get(d)?;
    let cycles: u32 = get(d)?;
    let _next_event: u32 = get(d)?;
    let _v_counter: u32 = get(d)?;
    let mem_speed: u32 = get(d)?;
    let _mem_speed_x2: u32 = get(d)?;
    let _fast_rom_speed: u32 = get(d)?;
    cpu.state = if flags & cpu_flags::STOPPED != 0 {
        CpuState::Stopped
    } else if flags & cpu_flags::DEBUG != 0 {
        CpuState::DebugBreak
    } else if waiting {
        CpuState::WaitingForInterrupt
    } else {
        CpuState::Running
    };
    cpu.nmi_pending = nmi || flags & cpu_flags::NMI != 0;
    cpu.irq_line = irq || flags & cpu_flags::IRQ != 0;
    cpu.mem_speed = mem_speed;
    Ok(cycles.into())
}

fn freeze_regs(regs: &Regs, s: &mut SaveStateSerializer) {
    regs.pc.bank.serialize(s);
    regs.db.serialize(s);
    regs.packed_status().serialize(s);
    for reg in [regs.a, regs.dp, regs.sp, regs.x, regs.y, regs.pc.addr] {
        reg.serialize(s)
    }
}

fn restore_regs(cpu: &mut Cpu, d: &mut SaveStateDeserializer<'_>) -> Result<(), save_state::Error> {
    let pb: u8 = get(d)?;
    cpu.regs.db = get(d)?;
    let status: u16 = get(d)?;
    cpu.regs.a = get(d)?;
    cpu.regs.dp = get(d)?;
    cpu.regs.sp = get(d)?;
    cpu.regs.x = get(d)?;
    cpu.regs.y = get(d)?;
    cpu.regs.pc = Addr24::new(pb, get(d)?);
    cpu.regs.status = Status(status as u8);
    cpu.regs.is_emulation = status & 0x100 != 0;
    cpu.update_status();
    Ok(())
}

fn freeze_apu(spc: &Spc700, s: &mut SaveStateSerializer) {
    (spc.cycles as u32).serialize(s);
    spc.show_rom.serialize(s);
    (if spc.halt { APU_HALTED } else { 0 }).serialize(s);
    spc.dsp.keyed.serialize(s);
    spc.output.serialize(s);
    spc.dsp.regs.serialize(s);
    s.bytes(&spc.mem[usize::from(ROM_START)..]);
    spc.timers.serialize(s);
    spc.timer_targets.serialize(s);
    spc.timer_enabled.serialize(s);
    spc.timer_written.serialize(s);
}

/// Returns the RAM below the IPL ROM
fn restore_apu(
    spc: &mut Spc700,
    d: &mut SaveStateDeserializer<'_>,
) -> Result<[u8; EXTRA_RAM_LEN], save_state::Error> {
    let cycles: u32 = get(d)?;
    spc.cycles = cycles.into();
    spc.show_rom = get(d)?;
    let flags: u8 = get(d)?;
    spc.halt = flags & APU_HALTED != 0;
    spc.dsp.keyed = get(d)?;
    spc.output = get(d)?;
    spc.dsp.regs.deserialize(d)?;
    let extra = d.take_array()?;
    spc.timers = get(d)?;
    spc.timer_targets = get(d)?;
    for target in spc.timer_targets.iter_mut() {
        if *target == 0 || *target > 0x100 {
            *target = 0x100
        }
    }
    spc.timer_enabled = get(d)?;
    spc.timer_written = get(d)?;
    Ok(extra)
}

fn freeze_apu_regs(spc: &Spc700, s: &mut SaveStateSerializer) {
    spc.status.serialize(s);
    spc.ya().serialize(s);
    spc.x.serialize(s);
    spc.sp.serialize(s);
    spc.pc.serialize(s);
}

fn restore_apu_regs(spc: &mut Spc700, d: &mut SaveStateDeserializer<'_>) -> Result<(), save_state::Error> {
    spc.status = get(d)?;
    let ya: u16 = get(d)?;
    spc.set_ya(ya);
    spc.x = get(d)?;
    spc.sp = get(d)?;
    spc.pc = get(d)?;
    Ok(())
}

fn freeze_sound(dsp: &Dsp, s: &mut SaveStateSerializer) {
    for volume in [dsp.master_volume, dsp.echo_volume] {
        volume.serialize(s)
    }
    for value in [
        dsp.echo_enable.into(),
        dsp.echo.feedback,
        dsp.echo.ptr as i32,
        dsp.echo.size as i32,
        dsp.echo_write_enabled.into(),
        dsp.echo_channel_enable.into(),
        dsp.pitch_mod.into(),
    ] {
        value.serialize(s)
    }
    [0u32; 3].serialize(s);
    dsp.voices.serialize(s);
}

fn restore_sound(dsp: &mut Dsp, d: &mut SaveStateDeserializer<'_>) -> Result<(), save_state::Error> {
    dsp.master_volume = get(d)?;
    dsp.echo_volume = get(d)?;
    let echo_enable: i32 = get(d)?;
    dsp.echo_enable = echo_enable as u8;
    dsp.echo.feedback = get(d)?;
    let ptr: i32 = get(d)?;
    let size: i32 = get(d)?;
    dsp.echo.ptr = ptr.max(0) as usize;
    dsp.echo.size = size.max(0) as usize;
    let write_enabled: i32 = get(d)?;
    dsp.echo_write_enabled = write_enabled != 0;
    let channel_enable: i32 = get(d)?;
    dsp.echo_channel_enable = channel_enable as u8;
    let pitch_mod: i32 = get(d)?;
    dsp.pitch_mod = pitch_mod as u8;
    let _dummy: [u32; 3] = get(d)?;
    dsp.voices.deserialize(d)?;
    Ok(())
}

impl<M: MemoryMap, B: AudioBackend> Device<M, B> {
    fn freeze_extra(&self, s: &mut SaveStateSerializer) {
        let (smp, spc) = (&self.smp, &self.smp.spc);
        let dsp = &spc.dsp;
        self.scheduler.cycles.serialize(s);
        smp.last_cycles.serialize(s);
        smp.fraction.serialize(s);
        smp.budget.serialize(s);
        self.open_bus.serialize(s);
        cpu_state_code(self.cpu.state).serialize(s);
        spc.timer_clock.serialize(s);
        spc.timer_phase.serialize(s);
        spc.cycles.serialize(s);
        spc.halt.serialize(s);
        dsp.key_on.serialize(s);
        dsp.key_on_prev.serialize(s);
        dsp.noise.serialize(s);
        dsp.noise_hertz.serialize(s);
        dsp.mute.serialize(s);
        dsp.clock.serialize(s);
        (dsp.pending as u32).serialize(s);
        for voice in dsp.voices.iter() {
            voice.frequency.serialize(s);
            voice.envxx.serialize(s);
            voice.next_sample.serialize(s);
            voice.interpolate.serialize(s);
        }
        dsp.echo.ring.serialize(s);
        dsp.echo.history.serialize(s);
        dsp.echo.history_index.serialize(s);
        dsp.output.serialize(s);
    }

    /// Serialize the machine state
    pub fn freeze(&self) -> Vec<u8> {
        let spc = &self.smp.spc;
        let mut s = SaveStateSerializer::new();
        s.bytes(SIGNATURE);
        s.block("CPU", |s| {
            freeze_cpu(&self.cpu, self.scheduler.cycles, self.scheduler.next_time(), s)
        });
        s.block("REG", |s| freeze_regs(&self.cpu.regs, s));
        s.block("APU", |s| freeze_apu(spc, s));
        s.block("ARE", |s| freeze_apu_regs(spc, s));
        s.raw_block("ARA", &spc.visible_ram()[..]);
        s.block("SOU", |s| freeze_sound(&spc.dsp, s));
        s.block("XTR", |s| self.freeze_extra(s));
        s.data
    }

    /// Serialize the machine state into `buf`, returning the length used.
    /// Nothing is written if the buffer is too small.
    pub fn freeze_into(&self, buf: &mut [u8]) -> Result<usize, SnapshotError> {
        let data = self.freeze();
        let available = buf.len();
        let out = buf
            .get_mut(..data.len())
            .ok_or(SnapshotError::BufferTooSmall {
                needed: data.len(),
                available,
            })?;
        out.copy_from_slice(&data);
        Ok(data.len())
    }

    /// Replace the machine state with a snapshot. The machine is left
    /// unmodified on error.
    pub fn restore(&mut self, data: &[u8]) -> Result<(), SnapshotError> {
        let body = data
            .strip_prefix(SIGNATURE.as_slice())
            .ok_or(SnapshotError::BadSignature)?;
        let mut d = SaveStateDeserializer::new(body);
        let mut staged = Staged {
            cpu: self.cpu.clone(),
            spc: self.smp.spc.clone(),
            cycles: 0,
            open_bus: self.open_bus,
            last_cycles: 0,
            fraction: 0,
            budget: 0,
        };

        let mut block = d.block("CPU")?;
        staged.cycles = restore_cpu(&mut staged.cpu, &mut block)?;
        block.finish("CPU")?;
        let mut block = d.block("REG")?;
        restore_regs(&mut staged.cpu, &mut block)?;
        block.finish("REG")?;
        let mut block = d.block("APU")?;
        let extra = restore_apu(&mut staged.spc, &mut block)?;
        block.finish("APU")?;
        let mut block = d.block("ARE")?;
        restore_apu_regs(&mut staged.spc, &mut block)?;
        block.finish("ARE")?;
        let mut block = d.block("ARA")?;
        staged.spc.mem.copy_from_slice(block.take(MEMORY_SIZE)?);
        staged.spc.mem[usize::from(ROM_START)..].copy_from_slice(&extra);
        block.finish("ARA")?;
        let mut block = d.block("SOU")?;
        restore_sound(&mut staged.spc.dsp, &mut block)?;
        block.finish("SOU")?;

        let dsp = &mut staged.spc.dsp;
        dsp.pending = 0;
        dsp.clock = 0;
        dsp.output.clear();
        if d.peek_block_name() == Some("XTR") {
            let mut block = d.block("XTR")?;
            restore_extra(&mut staged, &mut block)?;
            block.finish("XTR")?;
        } else {
            log::info!("snapshot without core state, rebuilding it from the registers");
            staged.spc.dsp.rebuild_derived_state();
            staged.last_cycles = staged.cycles;
        }

        let Staged {
            cpu,
            spc,
            cycles,
            open_bus,
            last_cycles,
            fraction,
            budget,
        } = staged;
        self.cpu = cpu;
        self.smp.spc = spc;
        self.smp.last_cycles = last_cycles;
        self.smp.fraction = fraction;
        self.smp.budget = budget;
        self.scheduler.cycles = cycles;
        self.open_bus = open_bus;
        log::info!("snapshot restored at master cycle {}", cycles);
        Ok(())
    }
}

fn restore_extra(staged: &mut Staged, d: &mut SaveStateDeserializer<'_>) -> Result<(), save_state::Error> {
    staged.cycles = get(d)?;
    staged.last_cycles = get(d)?;
    staged.fraction = get(d)?;
    staged.budget = get(d)?;
    staged.open_bus = get(d)?;
    staged.cpu.state = cpu_state_from_code(get(d)?)?;
    let spc = &mut staged.spc;
    spc.timer_clock = get(d)?;
    spc.timer_phase = get(d)?;
    spc.cycles = get(d)?;
    spc.halt = get(d)?;
    let dsp = &mut spc.dsp;
    dsp.key_on = get(d)?;
    dsp.key_on_prev = get(d)?;
    dsp.noise = get(d)?;
    dsp.noise_hertz = get(d)?;
    dsp.mute = get(d)?;
    dsp.clock = get(d)?;
    let pending: u32 = get(d)?;
    dsp.pending = pending as usize;
    for voice in dsp.voices.iter_mut() {
        voice.frequency = get(d)?;
        voice.envxx = get(d)?;
        voice.next_sample = get(d)?;
        voice.interpolate = get(d)?;
    }
    dsp.echo.ring = get(d)?;
    dsp.echo.history = get(d)?;
    dsp.echo.history_index = get(d)?;
    dsp.output = get(d)?;
    for tap in 0..8u8 {
        let coef = dsp.regs[usize::from(tap << 4) | 0xf];
        dsp.echo.set_tap(tap.into(), (coef as i8).into());
    }
    let echo = &dsp.echo;
    if echo.size > echo.ring.len() || (echo.size > 0 && echo.ptr >= echo.size) {
        return Err(save_state::Error::InvalidValue {
            what: "echo ring",
            value: echo.size as u32,
        });
    }
    Ok(())
}
