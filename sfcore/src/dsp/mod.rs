//! S-DSP sound generator
//!
//! The DSP register bank is a flat 128 byte array. Writes are translated
//! into the state of the eight [`Channel`]s and the echo unit, which render
//! output frames at the configured playback rate. Frames are rendered lazily:
//! the APU clock accumulates pending frames and every register write first
//! renders them, so that writes take effect at the right point in time.
//!
//! # Literature
//!
//! - <https://wiki.superfamicom.org/spc700-reference>
//! - <https://snesmusic.org/files/spc_file_format.txt>

/// Define a `u32` backed state enum that can be stored in save states
macro_rules! state_enum {
    ($(#[$meta:meta])* $name:ident {
        #[default]
        $first:ident = $first_value:literal,
        $($variant:ident = $value:literal,)*
    }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
        #[repr(u32)]
        pub enum $name {
            #[default]
            $first = $first_value,
            $($variant = $value,)*
        }

        impl $name {
            pub const fn from_u32(value: u32) -> Option<Self> {
                match value {
                    $first_value => Some(Self::$first),
                    $($value => Some(Self::$variant),)*
                    _ => None,
                }
            }
        }

        impl save_state::InSaveState for $name {
            fn serialize(&self, state: &mut save_state::SaveStateSerializer) {
                save_state::InSaveState::serialize(&(*self as u32), state)
            }

            fn deserialize(
                &mut self,
                state: &mut save_state::SaveStateDeserializer,
            ) -> Result<(), save_state::Error> {
                let mut value: u32 = 0;
                save_state::InSaveState::deserialize(&mut value, state)?;
                *self = Self::from_u32(value).ok_or(save_state::Error::InvalidValue {
                    what: stringify!($name),
                    value,
                })?;
                Ok(())
            }
        }
    };
}

pub mod brr;
pub mod echo;
pub mod envelope;
pub mod voice;

#[cfg(test)]
mod tests;

use crate::{config::SoundConfig, spc700::MEMORY_SIZE, timing::APU_CLOCK_HZ};
pub use echo::Echo;
pub use envelope::{EnvMode, EnvState};
pub use voice::{Channel, SoundType};
use voice::MixBus;

pub const REGISTER_COUNT: usize = 0x80;
pub const VOICE_COUNT: usize = 8;

/// Global registers
pub mod global {
    pub const MVOLL: u8 = 0x0c;
    pub const EFB: u8 = 0x0d;
    pub const MVOLR: u8 = 0x1c;
    pub const EVOLL: u8 = 0x2c;
    pub const PMON: u8 = 0x2d;
    pub const EVOLR: u8 = 0x3c;
    pub const NON: u8 = 0x3d;
    pub const KON: u8 = 0x4c;
    pub const EON: u8 = 0x4d;
    pub const KOFF: u8 = 0x5c;
    pub const DIR: u8 = 0x5d;
    pub const FLG: u8 = 0x6c;
    pub const ESA: u8 = 0x6d;
    pub const ENDX: u8 = 0x7c;
    pub const EDL: u8 = 0x7d;
}

/// Per-voice registers, relative to `voice << 4`
pub mod voice_reg {
    pub const VOLL: u8 = 0x0;
    pub const VOLR: u8 = 0x1;
    pub const PITCHL: u8 = 0x2;
    pub const PITCHH: u8 = 0x3;
    pub const SRCN: u8 = 0x4;
    pub const ADSR1: u8 = 0x5;
    pub const ADSR2: u8 = 0x6;
    pub const GAIN: u8 = 0x7;
    pub const ENVX: u8 = 0x8;
    pub const OUTX: u8 = 0x9;
    /// The FIR coefficient `reg >> 4` lives in the same row
    pub const COEF: u8 = 0xf;
}

pub mod flg {
    pub const SOFT_RESET: u8 = 0x80;
    pub const MUTE: u8 = 0x40;
    pub const ECHO_DISABLE: u8 = 0x20;
    pub const NOISE_CLOCK: u8 = 0x1f;
}

/// Noise generator frequencies selected by `FLG & 0x1f`
#[rustfmt::skip]
pub static NOISE_FREQ: [u32; 32] = [
    0, 16, 21, 25, 31, 42, 50, 63,
    84, 100, 125, 167, 200, 250, 333, 400,
    500, 667, 800, 1000, 1300, 1600, 2000, 2700,
    3200, 4000, 5300, 6400, 8000, 10700, 16000, 32000,
];

/// Frames rendered per pass over the voices
const CHUNK_FRAMES: usize = 256;

pub(crate) const fn clip16(val: i32) -> i32 {
    if val > i16::MAX as i32 {
        i16::MAX as i32
    } else if val < i16::MIN as i32 {
        i16::MIN as i32
    } else {
        val
    }
}

#[derive(Debug, Clone)]
pub struct Dsp {
    pub(crate) regs: [u8; REGISTER_COUNT],
    pub(crate) voices: [Channel; VOICE_COUNT],
    pub(crate) echo: Echo,
    pub(crate) master_volume: [i16; 2],
    pub(crate) echo_volume: [i16; 2],
    /// Voices currently feeding the echo unit
    pub(crate) echo_enable: u8,
    /// The last value written to `EON`
    pub(crate) echo_channel_enable: u8,
    pub(crate) echo_write_enabled: bool,
    pub(crate) pitch_mod: u8,
    /// Voices which were keyed on and did not stop yet
    pub(crate) keyed: u8,
    /// Key-on bits deferred by a set `KOFF` bit
    pub(crate) key_on: u8,
    /// Deferred key-on bits waiting for `KOFF` to be cleared
    pub(crate) key_on_prev: u8,
    pub(crate) noise: u32,
    pub(crate) noise_hertz: u32,
    pub(crate) mute: bool,

    config: SoundConfig,
    /// `APU cycles * playback rate` not yet converted to frames
    pub(crate) clock: u64,
    /// Frames due but not yet rendered
    pub(crate) pending: usize,
    wave: Vec<i32>,
    mix: Vec<i32>,
    echo_in: Vec<i32>,
    /// Rendered interleaved samples not yet taken by the caller
    pub(crate) output: Vec<i16>,
    dump_armed: bool,
    dump_requested: bool,
}

impl Dsp {
    pub fn new(sound: &SoundConfig) -> Self {
        let mut dsp = Self {
            regs: [0; REGISTER_COUNT],
            voices: Default::default(),
            echo: Echo::new(sound.playback_rate, sound.stereo),
            master_volume: [0; 2],
            echo_volume: [0; 2],
            echo_enable: 0,
            echo_channel_enable: 0,
            echo_write_enabled: false,
            pitch_mod: 0,
            keyed: 0,
            key_on: 0,
            key_on_prev: 0,
            noise: 1,
            noise_hertz: 0,
            mute: true,
            config: sound.clone(),
            clock: 0,
            pending: 0,
            wave: vec![],
            mix: vec![],
            echo_in: vec![],
            output: vec![],
            dump_armed: false,
            dump_requested: false,
        };
        dsp.reset(sound);
        dsp
    }

    /// Power-on state for the given output format
    pub fn reset(&mut self, sound: &SoundConfig) {
        if self.config.playback_rate != sound.playback_rate || self.config.stereo != sound.stereo {
            self.echo = Echo::new(sound.playback_rate, sound.stereo);
        }
        self.config = sound.clone();
        let len = CHUNK_FRAMES * sound.channels();
        self.wave = vec![0; CHUNK_FRAMES];
        self.mix = vec![0; len];
        self.echo_in = vec![0; len];
        self.output = Vec::with_capacity(sound.block_frames.max(CHUNK_FRAMES) * sound.channels() * 2);

        self.regs = [0; REGISTER_COUNT];
        self.regs[usize::from(global::FLG)] = flg::MUTE | flg::ECHO_DISABLE;
        self.voices = Default::default();
        self.echo.reset();
        self.master_volume = [127; 2];
        self.echo_volume = [0; 2];
        self.echo_write_enabled = false;
        self.echo_channel_enable = 0;
        self.echo_enable = 0;
        self.pitch_mod = 0;
        self.keyed = 0;
        self.key_on = 0;
        self.key_on_prev = 0;
        self.noise = 1;
        self.noise_hertz = 0;
        self.mute = true;
        self.clock = 0;
        self.pending = 0;
        self.dump_armed = false;
        self.dump_requested = false;
        self.set_echo_enable(0);
    }

    pub fn config(&self) -> &SoundConfig {
        &self.config
    }

    pub fn registers(&self) -> &[u8; REGISTER_COUNT] {
        &self.regs
    }

    pub fn voice(&self, n: usize) -> &Channel {
        &self.voices[n & 7]
    }

    pub fn keyed_voices(&self) -> u8 {
        self.keyed
    }

    /// Select which voices are heard. Muted voices keep playing.
    pub fn set_channel_mask(&mut self, mask: u8) {
        self.config.channel_mask = mask
    }

    fn reg(&self, reg: u8) -> u8 {
        self.regs[usize::from(reg)]
    }

    fn voice_reg(&self, voice: usize, reg: u8) -> u8 {
        self.regs[(voice << 4) | usize::from(reg)]
    }

    pub fn read(&self, reg: u8) -> u8 {
        let reg = reg & 0x7f;
        let voice = &self.voices[usize::from(reg >> 4)];
        match reg & 0xf {
            voice_reg::ENVX => match voice.state {
                EnvState::Silent | EnvState::Gain => 0,
                _ => voice.envx as u8,
            },
            voice_reg::OUTX if voice.state == EnvState::Silent => 0,
            voice_reg::OUTX => (voice.sample >> 8) as u8,
            _ => self.regs[usize::from(reg)],
        }
    }

    /// Let `cycles` APU cycles pass
    pub fn advance(&mut self, cycles: u32) {
        self.clock += u64::from(cycles) * u64::from(self.config.playback_rate);
        let hz = u64::from(APU_CLOCK_HZ);
        self.pending += (self.clock / hz) as usize;
        self.clock %= hz;
    }

    /// Render every pending frame
    pub fn flush(&mut self, ram: &[u8; MEMORY_SIZE]) {
        while self.pending > 0 {
            let frames = self.pending.min(CHUNK_FRAMES);
            self.render(frames, ram);
            self.pending -= frames;
        }
    }

    /// Interleaved samples rendered so far
    pub fn samples(&self) -> &[i16] {
        &self.output
    }

    /// Drop the first `n` rendered samples
    pub fn consume_samples(&mut self, n: usize) {
        self.output.drain(..n.min(self.output.len()));
    }

    /// Request a dump at the next key-on of a voice that is not keyed on
    /// in `KON` already
    pub fn arm_dump(&mut self) {
        self.dump_armed = true;
        self.dump_requested = false;
    }

    pub fn is_dump_armed(&self) -> bool {
        self.dump_armed
    }

    /// Whether a key-on fired the armed dump, clearing the request
    pub fn take_dump_request(&mut self) -> bool {
        core::mem::take(&mut self.dump_requested)
    }

    pub fn write(&mut self, reg: u8, byte: u8, ram: &[u8; MEMORY_SIZE]) {
        let reg = reg & 0x7f;
        self.flush(ram);
        log::trace!("dsp register {:02x} <- {:02x}", reg, byte);
        let rate = self.config.playback_rate;
        let voice = usize::from(reg >> 4);
        let mut byte = byte;
        match reg {
            global::FLG => {
                if byte & flg::SOFT_RESET != 0 {
                    self.regs[usize::from(global::ENDX)] = 0;
                    self.regs[usize::from(global::KOFF)] = 0;
                    self.regs[usize::from(global::KON)] = 0;
                    self.set_echo_write_enable(false);
                    self.soft_reset();
                    byte = flg::MUTE | flg::ECHO_DISABLE | (byte & flg::NOISE_CLOCK);
                    log::debug!("dsp soft reset");
                } else {
                    self.set_echo_write_enable(byte & flg::ECHO_DISABLE == 0);
                    self.mute = byte & flg::MUTE != 0;
                    self.noise_hertz = NOISE_FREQ[usize::from(byte & flg::NOISE_CLOCK)];
                    let noise_hertz = self.noise_hertz;
                    for voice in self.voices.iter_mut() {
                        if voice.sound_type == SoundType::Noise {
                            voice.set_frequency(noise_hertz, rate)
                        }
                    }
                }
            }
            global::NON => {
                let noise_hertz = self.noise_hertz;
                for (j, voice) in self.voices.iter_mut().enumerate() {
                    voice.sound_type = if byte & (1 << j) != 0 {
                        SoundType::Noise
                    } else {
                        SoundType::Sample
                    };
                    voice.set_frequency(noise_hertz, rate)
                }
            }
            global::MVOLL | global::MVOLR | global::EVOLL | global::EVOLR => {
                self.regs[usize::from(reg)] = byte;
                let (left_reg, right_reg) = if reg & 0x20 == 0 {
                    (global::MVOLL, global::MVOLR)
                } else {
                    (global::EVOLL, global::EVOLR)
                };
                let left = i16::from(self.reg(left_reg) as i8);
                let right = i16::from(self.reg(right_reg) as i8);
                let volume = if self.config.stereo {
                    [left, right]
                } else {
                    [(left.abs() + right.abs()) / 2; 2]
                };
                if reg & 0x20 == 0 {
                    self.master_volume = volume
                } else {
                    self.echo_volume = volume
                }
            }
            global::ENDX => byte = 0,
            global::KOFF => {
                for j in 0..VOICE_COUNT {
                    let mask = 1 << j;
                    if byte & mask != 0 {
                        if self.keyed & mask != 0 {
                            self.key_on_prev &= !mask;
                            self.keyed &= !mask;
                            self.regs[usize::from(global::KON)] &= !mask;
                            self.voices[j].key_off(rate);
                            log::debug!("voice {} keyed off", j);
                        }
                    } else if self.key_on_prev & mask != 0 {
                        self.key_on_prev &= !mask;
                        self.keyed |= mask;
                        self.regs[usize::from(global::KOFF)] &= !mask;
                        self.regs[usize::from(global::ENDX)] &= !mask;
                        self.play_sample(j, ram);
                    }
                }
                self.regs[usize::from(global::KOFF)] = byte;
                return;
            }
            global::KON => {
                if self.dump_armed && byte & !self.reg(global::KON) != 0 {
                    self.dump_armed = false;
                    self.dump_requested = true;
                    log::info!("key-on {:02x} fires the armed dump", byte);
                }
                for j in 0..VOICE_COUNT {
                    let mask = 1 << j;
                    if byte & mask == 0 {
                        continue;
                    }
                    if self.reg(global::KOFF) & mask == 0 {
                        self.key_on_prev &= !mask;
                        self.keyed |= mask;
                        self.regs[usize::from(global::ENDX)] &= !mask;
                        self.play_sample(j, ram);
                    } else {
                        self.key_on |= mask;
                        log::debug!("key-on of voice {} deferred by KOFF", j);
                    }
                }
                self.regs[usize::from(global::KON)] = byte;
                return;
            }
            global::PMON => self.pitch_mod = byte & !1,
            global::EON => self.set_echo_enable(byte),
            global::EFB => self.echo.set_feedback(i32::from(byte as i8)),
            global::EDL => {
                self.regs[usize::from(reg)] = byte;
                self.set_echo_delay(byte & 0xf)
            }
            global::DIR | global::ESA => (),
            _ => match reg & 0xf {
                voice_reg::VOLL | voice_reg::VOLR => {
                    self.regs[usize::from(reg)] = byte;
                    let left = i16::from(self.voice_reg(voice, voice_reg::VOLL) as i8);
                    let right = i16::from(self.voice_reg(voice, voice_reg::VOLR) as i8);
                    let stereo = self.config.stereo;
                    self.voices[voice].set_volume(left, right, stereo);
                }
                voice_reg::PITCHL | voice_reg::PITCHH => {
                    self.regs[usize::from(reg)] = byte;
                    let code = u16::from_le_bytes([
                        self.voice_reg(voice, voice_reg::PITCHL),
                        self.voice_reg(voice, voice_reg::PITCHH),
                    ]) & 0x3fff;
                    let noise_hertz = self.noise_hertz;
                    let channel = &mut self.voices[voice];
                    channel.hertz = u32::from(code) * 8;
                    channel.set_frequency(noise_hertz, rate);
                }
                voice_reg::ADSR1 | voice_reg::ADSR2 | voice_reg::GAIN => {
                    if self.reg(reg) != byte {
                        self.regs[usize::from(reg)] = byte;
                        let (gain, adsr1, adsr2) = (
                            self.voice_reg(voice, voice_reg::GAIN),
                            self.voice_reg(voice, voice_reg::ADSR1),
                            self.voice_reg(voice, voice_reg::ADSR2),
                        );
                        if self.voices[voice].fix_envelope(gain, adsr1, adsr2, rate) {
                            self.end_of_sample(voice)
                        }
                    }
                }
                voice_reg::COEF => self.echo.set_tap(voice, i32::from(byte as i8)),
                _ => (),
            },
        }
        self.key_on_prev |= self.key_on;
        self.key_on = 0;
        self.regs[usize::from(reg)] = byte;
    }

    /// Silence every voice and reset the echo filter to identity, leaving
    /// the output muted. The register bank is left alone apart from `FLG`.
    fn soft_reset(&mut self) {
        let noise_hertz = self.noise_hertz;
        let rate = self.config.playback_rate;
        for voice in self.voices.iter_mut() {
            *voice = Channel::new();
            voice.set_frequency(noise_hertz, rate);
        }
        self.keyed = 0;
        self.key_on = 0;
        self.key_on_prev = 0;
        self.echo.clear();
        self.echo.ptr = 0;
        self.echo.feedback = 0;
        self.echo.taps = [127, 0, 0, 0, 0, 0, 0, 0];
        self.mute = true;
        self.noise = 1;
    }

    fn set_echo_delay(&mut self, delay: u8) {
        let (rate, stereo) = (self.config.playback_rate, self.config.stereo);
        self.echo.set_delay(delay, rate, stereo);
        self.set_echo_enable(self.reg(global::EON));
    }

    fn set_echo_write_enable(&mut self, enabled: bool) {
        self.echo_write_enabled = enabled;
        self.set_echo_delay(self.reg(global::EDL) & 0xf);
    }

    fn set_echo_enable(&mut self, byte: u8) {
        self.echo_channel_enable = byte;
        let byte = if self.echo_write_enabled && self.config.echo {
            byte
        } else {
            0
        };
        if byte != 0 && self.echo_enable == 0 {
            self.echo.clear();
        }
        self.echo_enable = byte;
    }

    /// Restart voice `j` from the start address of its sample
    fn play_sample(&mut self, j: usize, ram: &[u8; MEMORY_SIZE]) {
        let rate = self.config.playback_rate;
        let (gain, adsr1, adsr2, srcn) = (
            self.voice_reg(j, voice_reg::GAIN),
            self.voice_reg(j, voice_reg::ADSR1),
            self.voice_reg(j, voice_reg::ADSR2),
            self.voice_reg(j, voice_reg::SRCN),
        );
        let (dir, noise, noise_hertz) = (
            self.reg(global::DIR),
            self.reg(global::NON) & (1 << j) != 0,
            self.noise_hertz,
        );
        let voice = &mut self.voices[j];
        voice.state = EnvState::Silent;
        voice.mode = EnvMode::None;
        voice.envx = 0;
        voice.envxx = 0;
        voice.fix_envelope(gain, adsr1, adsr2, rate);
        voice.start(ram, dir, srcn, noise);
        voice.set_frequency(noise_hertz, rate);
        voice.enter_envelope(rate);
        voice.fix_envelope(gain, adsr1, adsr2, rate);
        log::debug!("voice {} keyed on, sample {:02x}, {:?}", j, srcn, voice.state);
    }

    /// Voice `j` ran out
    fn end_of_sample(&mut self, j: usize) {
        let mask = 1 << j;
        let voice = &mut self.voices[j];
        voice.state = EnvState::Silent;
        voice.mode = EnvMode::None;
        self.regs[usize::from(global::ENDX)] |= mask;
        self.regs[usize::from(global::KON)] &= !mask;
        self.regs[usize::from(global::KOFF)] &= !mask;
        self.keyed &= !mask;
        log::debug!("voice {} ended", j);
    }

    /// Rebuild the state which is derived from the registers, after the
    /// voices were restored from a save state without core-specific data
    pub(crate) fn rebuild_derived_state(&mut self) {
        let rate = self.config.playback_rate;
        let flags = self.reg(global::FLG);
        self.mute = flags & flg::MUTE != 0;
        self.noise_hertz = NOISE_FREQ[usize::from(flags & flg::NOISE_CLOCK)];
        let noise_hertz = self.noise_hertz;
        for voice in self.voices.iter_mut() {
            voice.needs_decode = true;
            voice.set_frequency(noise_hertz, rate);
            voice.envxx = voice.envx << envelope::ENVX_SHIFT;
            voice.next_sample = 0;
            voice.interpolate = 0;
        }
        for tap in 0..8 {
            let value = i32::from(self.reg(((tap as u8) << 4) | voice_reg::COEF) as i8);
            self.echo.set_tap(tap, value);
        }
        self.echo.set_feedback(i32::from(self.reg(global::EFB) as i8));
        self.echo.clear();
        self.echo_write_enabled = flags & flg::ECHO_DISABLE == 0;
        self.echo_enable = 0;
        self.set_echo_delay(self.reg(global::EDL) & 0xf);
        self.set_echo_enable(self.reg(global::EON));
    }

    /// Render `frames` frames into the output
    fn render(&mut self, frames: usize, ram: &[u8; MEMORY_SIZE]) {
        let stereo = self.config.stereo;
        let channels = self.config.channels();
        let len = frames * channels;
        if self.mute {
            self.output.resize(self.output.len() + len, 0);
            return;
        }
        self.wave[..frames].fill(0);
        self.mix[..len].fill(0);
        self.echo_in[..len].fill(0);

        let pitch_mod = u16::from(self.pitch_mod & !self.reg(global::NON));
        let mut finished = 0u8;
        for j in 0..VOICE_COUNT {
            let mask = 1u8 << j;
            if self.voices[j].state == EnvState::Silent || self.config.channel_mask & mask == 0 {
                continue;
            }
            let echo = if self.echo_enable & mask != 0 {
                Some(&mut self.echo_in[..len])
            } else {
                None
            };
            let mut bus = MixBus {
                ram,
                dir: self.regs[usize::from(global::DIR)],
                stereo,
                interpolate: self.config.interpolate,
                playback_rate: self.config.playback_rate,
                noise: &mut self.noise,
                wave: &mut self.wave[..frames],
                mix: &mut self.mix[..len],
                echo,
                endx: 0,
            };
            let modulated = pitch_mod & (1 << j) != 0;
            let feeds_next = pitch_mod & (1 << (j + 1)) != 0;
            if self.voices[j].mix(j, &mut bus, modulated, feeds_next) {
                finished |= mask;
            }
            let endx = bus.endx;
            self.regs[usize::from(global::ENDX)] |= endx;
        }
        for j in 0..VOICE_COUNT {
            if finished & (1 << j) != 0 {
                self.end_of_sample(j)
            }
        }

        let use_echo = self.echo_enable != 0 && self.echo.size > 0;
        for i in 0..len {
            let c = if stereo { i & 1 } else { 0 };
            let mut sample = self.mix[i] * i32::from(self.master_volume[c]);
            if use_echo {
                let echo = self.echo.process(self.echo_in[i], channels as u32);
                sample += echo * i32::from(self.echo_volume[c]);
            }
            self.output.push(clip16(sample >> 7) as i16);
        }
    }
}
