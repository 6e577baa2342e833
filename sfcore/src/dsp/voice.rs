//! Per-voice sample playback

use super::{
    brr::{self, BLOCK_LEN, SAMPLES_PER_BLOCK},
    clip16,
    envelope::{EnvMode, EnvState, ENVX_SHIFT, FIXED_POINT, MAX_ENVELOPE_HEIGHT},
};
use crate::spc700::MEMORY_SIZE;
use save_state_macro::InSaveState;

/// Sample pointer of a voice which played its final sample
pub const LAST_SAMPLE: u32 = 0xff_ffff;

state_enum! {
    SoundType {
        #[default]
        Sample = 0,
        Noise = 1,
    }
}

/// Playback state of one voice.
///
/// The serialized fields follow the channel layout of snes9x sound
/// snapshots; the skipped ones are rebuilt after loading or stored in the
/// core-specific block.
#[derive(Debug, Clone, Default, InSaveState)]
pub struct Channel {
    pub state: EnvState,
    pub sound_type: SoundType,
    pub volume_left: i16,
    pub volume_right: i16,
    /// Playback frequency of the pitch register
    pub hertz: u32,
    /// Fractional sample position
    pub count: u32,
    pub loop_flag: bool,
    #[state(width = u32)]
    pub envx: i32,
    pub left_vol_level: i16,
    pub right_vol_level: i16,
    pub envx_target: i16,
    pub env_error: u32,
    pub erate: u32,
    pub direction: i32,
    pub attack_rate: u32,
    pub decay_rate: u32,
    pub sustain_rate: u32,
    pub release_rate: u32,
    pub sustain_level: u32,
    pub sample: i16,
    pub decoded: [i16; SAMPLES_PER_BLOCK],
    pub previous: [i16; 2],
    pub sample_number: u16,
    pub last_block: bool,
    pub needs_decode: bool,
    pub block_pointer: u32,
    pub sample_pointer: u32,
    pub mode: EnvMode,

    /// Sample step per output frame, 16.16 fixed point
    #[state(skip)]
    pub frequency: u32,
    /// `envx` with 24 fractional bits
    #[state(skip)]
    pub envxx: i32,
    #[state(skip)]
    pub next_sample: i16,
    /// Per-frame increment while interpolating inside one sample
    #[state(skip)]
    pub interpolate: i32,
}

/// What a voice reads and writes while it is mixed
pub(super) struct MixBus<'a> {
    pub ram: &'a [u8; MEMORY_SIZE],
    /// Sample directory page (`DIR`)
    pub dir: u8,
    pub stereo: bool,
    pub interpolate: bool,
    pub playback_rate: u32,
    pub noise: &'a mut u32,
    /// Output of the previous voice, one entry per frame
    pub wave: &'a mut [i32],
    pub mix: &'a mut [i32],
    pub echo: Option<&'a mut [i32]>,
    /// Voices which passed a looping end block
    pub endx: u8,
}

/// Scale a frequency by the previous voice's output
fn pitch_mod(freq: u32, wave: i32) -> u32 {
    ((i64::from(freq) * ((i64::from(wave) + 0x80_0000) >> 16)) >> 7) as u32
}

/// Address of the sample directory entry of `srcn`
pub(super) fn directory_entry(ram: &[u8; MEMORY_SIZE], dir: u8, srcn: u16, offset: u16) -> u16 {
    let addr = (u16::from(dir) << 8).wrapping_add(srcn << 2).wrapping_add(offset);
    u16::from_le_bytes([
        ram[usize::from(addr)],
        ram[usize::from(addr.wrapping_add(1))],
    ])
}

impl Channel {
    pub fn new() -> Self {
        Self::default()
    }

    pub(super) fn update_levels(&mut self) {
        self.left_vol_level = (self.envx * i32::from(self.volume_left) / 128) as i16;
        self.right_vol_level = (self.envx * i32::from(self.volume_right) / 128) as i16;
    }

    pub(super) fn set_volume(&mut self, left: i16, right: i16, stereo: bool) {
        self.volume_left = if stereo {
            left
        } else {
            ((i32::from(left).abs() + i32::from(right).abs()) / 2) as i16
        };
        self.volume_right = right;
        self.update_levels();
    }

    /// Recompute the fixed point step. Noise voices play at the noise rate.
    pub(super) fn set_frequency(&mut self, noise_hertz: u32, playback_rate: u32) {
        if playback_rate == 0 {
            return;
        }
        let hertz = match self.sound_type {
            SoundType::Noise => noise_hertz,
            SoundType::Sample => self.hertz,
        };
        self.frequency = (u64::from(hertz) * u64::from(FIXED_POINT) / u64::from(playback_rate)) as u32;
    }

    /// Decode the block at `block_pointer` and advance past it
    pub(super) fn decode(&mut self, ram: &[u8; MEMORY_SIZE]) {
        let start = self.block_pointer as usize;
        if start > MEMORY_SIZE - BLOCK_LEN {
            self.last_block = true;
            self.loop_flag = false;
            return;
        }
        let mut block = [0; BLOCK_LEN];
        block.copy_from_slice(&ram[start..start + BLOCK_LEN]);
        let header = brr::Header(block[0]);
        self.last_block = header.is_end();
        if self.last_block {
            self.loop_flag = header.is_loop()
        }
        let (decoded, previous) = brr::decode_block(&block, self.previous);
        self.decoded = decoded;
        self.previous = previous;
        self.block_pointer += BLOCK_LEN as u32;
    }

    /// Restart the voice from the beginning of its sample.
    /// The envelope registers are applied by the caller.
    pub(super) fn start(&mut self, ram: &[u8; MEMORY_SIZE], dir: u8, srcn: u8, noise: bool) {
        self.sample_number = srcn.into();
        self.sound_type = if noise {
            SoundType::Noise
        } else {
            SoundType::Sample
        };
        self.loop_flag = false;
        self.needs_decode = true;
        self.last_block = false;
        self.previous = [0; 2];
        self.block_pointer = directory_entry(ram, dir, srcn.into(), 0).into();
        self.sample_pointer = 0;
        self.env_error = 0;
        self.next_sample = 0;
        self.interpolate = 0;
    }

    /// Enter the first envelope state after key-on
    pub(super) fn enter_envelope(&mut self, playback_rate: u32) {
        match self.mode {
            EnvMode::Adsr => {
                if self.attack_rate == 0 {
                    if self.decay_rate == 0 || self.sustain_level == 8 {
                        self.state = EnvState::Sustain;
                        self.envx = self.sustain_height();
                        self.set_env_rate(self.sustain_rate, -1, 0, playback_rate);
                    } else {
                        self.state = EnvState::Decay;
                        self.envx = MAX_ENVELOPE_HEIGHT;
                        let target = self.sustain_height();
                        self.set_env_rate(self.decay_rate, -1, target, playback_rate);
                    }
                    self.update_levels();
                } else {
                    self.state = EnvState::Attack;
                    self.envx = 0;
                    self.left_vol_level = 0;
                    self.right_vol_level = 0;
                    self.set_env_rate(self.attack_rate, 1, MAX_ENVELOPE_HEIGHT, playback_rate);
                }
                self.envxx = self.envx << ENVX_SHIFT;
            }
            EnvMode::Gain => self.state = EnvState::Gain,
            EnvMode::IncreaseLinear => self.state = EnvState::IncreaseLinear,
            EnvMode::IncreaseBentLine => self.state = EnvState::IncreaseBentLine,
            EnvMode::DecreaseLinear => self.state = EnvState::DecreaseLinear,
            EnvMode::DecreaseExponential => self.state = EnvState::DecreaseExponential,
            EnvMode::None | EnvMode::Release => (),
        }
    }

    fn output(&self) -> (i32, i32) {
        let sample = i32::from(self.sample);
        (
            sample * i32::from(self.left_vol_level) / 128,
            sample * i32::from(self.right_vol_level) / 128,
        )
    }

    /// Mix `bus.wave.len()` frames of this voice into the bus.
    ///
    /// `modulated` scales the pitch by `bus.wave`, `feeds_next` stores the
    /// output to `bus.wave` for the next voice. Returns `true` if the voice
    /// ran out, in which case the remaining frames stay silent.
    pub(super) fn mix(&mut self, index: usize, bus: &mut MixBus<'_>, modulated: bool, feeds_next: bool) -> bool {
        let freq0 = self.frequency;
        let interpolate = bus.interpolate;
        let can_interpolate = move |freq: u32| interpolate && freq < FIXED_POINT && !modulated;
        if self.needs_decode {
            self.decode(bus.ram);
            self.needs_decode = false;
            self.sample = self.decoded[0];
            self.sample_pointer = (freq0 >> 16).clamp(1, SAMPLES_PER_BLOCK as u32 - 1);
            self.next_sample = self.decoded[self.sample_pointer as usize];
            self.interpolate = 0;
            if can_interpolate(freq0) {
                self.interpolate = self.step_towards_next(freq0)
            }
        }
        let channels = if bus.stereo { 2 } else { 1 };
        let (mut left, mut right) = self.output();
        for frame in 0..bus.wave.len() {
            let freq = if modulated {
                pitch_mod(freq0, bus.wave[frame])
            } else {
                freq0
            };

            self.env_error = self.env_error.wrapping_add(self.erate);
            if self.env_error >= FIXED_POINT {
                if self.step_envelope(bus.playback_rate) {
                    return true;
                }
                (left, right) = self.output();
            }

            self.count = self.count.wrapping_add(freq);
            if self.count >= FIXED_POINT {
                let steps = self.count >> 16;
                self.sample_pointer += steps;
                self.count &= FIXED_POINT - 1;
                self.sample = self.next_sample;
                if self.sample_pointer >= SAMPLES_PER_BLOCK as u32 {
                    if self.sample_pointer >= LAST_SAMPLE {
                        return true;
                    }
                    loop {
                        self.sample_pointer -= SAMPLES_PER_BLOCK as u32;
                        if self.last_block {
                            if !self.loop_flag {
                                self.sample_pointer = LAST_SAMPLE;
                                self.next_sample = self.sample;
                                break;
                            }
                            bus.endx |= 1 << index;
                            self.last_block = false;
                            self.block_pointer =
                                directory_entry(bus.ram, bus.dir, self.sample_number, 2).into();
                        }
                        self.decode(bus.ram);
                        if self.sample_pointer < SAMPLES_PER_BLOCK as u32 {
                            break;
                        }
                    }
                    if self.sample_pointer < LAST_SAMPLE {
                        self.next_sample = self.decoded[self.sample_pointer as usize];
                    }
                } else {
                    self.next_sample = self.decoded[self.sample_pointer as usize];
                }

                match self.sound_type {
                    SoundType::Sample if can_interpolate(freq) => {
                        self.interpolate = self.step_towards_next(freq);
                        let delta = i64::from(self.next_sample) - i64::from(self.sample);
                        self.sample = (i64::from(self.sample)
                            + delta * i64::from(self.count) / i64::from(FIXED_POINT))
                            as i16;
                    }
                    SoundType::Sample => self.interpolate = 0,
                    SoundType::Noise => {
                        for _ in 0..steps {
                            *bus.noise <<= 1;
                            if *bus.noise & 0x8000_0000 != 0 {
                                *bus.noise ^= 0x4_0001
                            }
                        }
                        self.sample = (((*bus.noise as i32) << 17) >> 17) as i16;
                        self.interpolate = 0;
                    }
                }
                (left, right) = self.output();
            } else if self.interpolate != 0 {
                self.sample = clip16(i32::from(self.sample) + self.interpolate) as i16;
                (left, right) = self.output();
            }

            if feeds_next {
                bus.wave[frame] = i32::from(self.sample) * self.envx;
            }
            let at = frame * channels;
            bus.mix[at] += left;
            if let Some(echo) = bus.echo.as_deref_mut() {
                echo[at] += left;
            }
            if bus.stereo {
                bus.mix[at + 1] += right;
                if let Some(echo) = bus.echo.as_deref_mut() {
                    echo[at + 1] += right;
                }
            }
        }
        false
    }

    fn step_towards_next(&self, freq: u32) -> i32 {
        let delta = i64::from(self.next_sample) - i64::from(self.sample);
        (delta * i64::from(freq) / i64::from(FIXED_POINT)) as i32
    }
}
