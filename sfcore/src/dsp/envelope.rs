//! Envelope generator
//!
//! The height of every voice runs from 0 to 127 and is advanced with a
//! 16.16 fixed point error accumulator. Rates are given in milliseconds for
//! the whole range and converted to a per-frame step for the playback rate.

use super::voice::Channel;

pub const MAX_ENVELOPE_HEIGHT: i32 = 127;
/// Shift between the height and its fractional form
pub const ENVX_SHIFT: u32 = 24;
pub const FIXED_POINT: u32 = 0x10000;
/// A rate which never changes the height
pub const RATE_INFINITE: u32 = u32::MAX;
/// Key-off always releases in 8 ms
pub const RELEASE_RATE: u32 = 8;

pub static ATTACK_RATE: [u32; 16] = [
    4100, 2600, 1500, 1000, 640, 380, 260, 160, 96, 64, 40, 24, 16, 10, 6, 1,
];

pub static DECAY_RATE: [u32; 8] = [1200, 740, 440, 290, 180, 110, 74, 37];

#[rustfmt::skip]
pub static SUSTAIN_RATE: [u32; 32] = [
    RATE_INFINITE, 38000, 28000, 24000, 19000, 14000, 12000, 9400,
    7100, 5900, 4700, 3500, 2900, 2400, 1800, 1500,
    1200, 880, 740, 590, 440, 370, 290, 220,
    180, 150, 110, 92, 74, 55, 37, 18,
];

#[rustfmt::skip]
pub static INCREASE_RATE: [u32; 32] = [
    RATE_INFINITE, 4100, 3100, 2600, 2000, 1500, 1300, 1000,
    770, 640, 510, 380, 320, 260, 190, 160,
    130, 96, 80, 64, 48, 40, 32, 24,
    20, 16, 12, 10, 8, 6, 4, 2,
];

/// Exponential decrease shares the sustain durations
pub static DECREASE_RATE_EXP: &[u32; 32] = &SUSTAIN_RATE;

/// Height units per rate unit of every [`EnvState`]
static STEPS: [i64; 10] = [0, 64, 619, 619, 128, 1, 64, 55, 64, 619];

state_enum! {
    /// What the envelope is doing right now
    EnvState {
        #[default]
        Silent = 0,
        Attack = 1,
        Decay = 2,
        Sustain = 3,
        Release = 4,
        Gain = 5,
        IncreaseLinear = 6,
        IncreaseBentLine = 7,
        DecreaseLinear = 8,
        DecreaseExponential = 9,
    }
}

state_enum! {
    /// Which register set drives the envelope
    EnvMode {
        #[default]
        None = 0,
        Adsr = 1,
        Release = 4,
        Gain = 5,
        IncreaseLinear = 6,
        IncreaseBentLine = 7,
        DecreaseLinear = 8,
        DecreaseExponential = 9,
    }
}

impl EnvMode {
    /// The state a voice in this mode is in while it plays
    const fn state(self) -> EnvState {
        match self {
            Self::None => EnvState::Silent,
            Self::Adsr => EnvState::Attack,
            Self::Release => EnvState::Release,
            Self::Gain => EnvState::Gain,
            Self::IncreaseLinear => EnvState::IncreaseLinear,
            Self::IncreaseBentLine => EnvState::IncreaseBentLine,
            Self::DecreaseLinear => EnvState::DecreaseLinear,
            Self::DecreaseExponential => EnvState::DecreaseExponential,
        }
    }
}

/// One exponential step: `height * 255 / 256` in the fractional form
const fn exp_decrease(envxx: i32) -> i32 {
    (envxx >> 8) * 255
}

impl Channel {
    pub(super) fn set_env_rate(&mut self, rate: u32, direction: i32, target: i32, playback_rate: u32) {
        self.envx_target = target as i16;
        let rate = if rate == RATE_INFINITE {
            self.direction = 0;
            0
        } else {
            self.direction = direction;
            rate
        };
        self.erate = if rate == 0 || playback_rate == 0 {
            0
        } else {
            (i64::from(FIXED_POINT) * 1000 * STEPS[self.state as usize]
                / (i64::from(rate) * i64::from(playback_rate))) as u32
        };
    }

    /// Switch the envelope mode if the current mode allows it
    pub(super) fn set_mode(&mut self, mode: EnvMode) -> bool {
        let allowed = match mode {
            EnvMode::None => false,
            EnvMode::Release => self.mode != EnvMode::None,
            EnvMode::Adsr => matches!(self.mode, EnvMode::None | EnvMode::Adsr),
            _ => self.mode != EnvMode::Release,
        };
        if allowed {
            self.mode = mode;
            if mode != EnvMode::Adsr && mode != EnvMode::Release && self.state != EnvState::Silent
            {
                self.state = mode.state()
            }
        }
        allowed
    }

    pub(super) fn set_adsr(
        &mut self,
        rates: [u32; 3],
        sustain_level: u32,
        release: u32,
        playback_rate: u32,
    ) {
        let [attack, decay, sustain] = rates;
        self.attack_rate = attack;
        self.decay_rate = decay;
        self.sustain_rate = sustain;
        self.release_rate = release;
        self.sustain_level = sustain_level + 1;
        match self.state {
            EnvState::Attack => self.set_env_rate(attack, 1, MAX_ENVELOPE_HEIGHT, playback_rate),
            EnvState::Decay => self.set_env_rate(decay, -1, self.sustain_height(), playback_rate),
            EnvState::Sustain => self.set_env_rate(sustain, -1, 0, playback_rate),
            _ => (),
        }
    }

    /// Height at which decay turns into sustain
    pub(super) fn sustain_height(&self) -> i32 {
        (MAX_ENVELOPE_HEIGHT * self.sustain_level as i32) >> 3
    }

    /// Set the height directly. Returns `true` if the voice ran out.
    pub(super) fn set_envelope_height(&mut self, level: i32) -> bool {
        self.envx = level;
        self.envxx = level << ENVX_SHIFT;
        self.update_levels();
        self.envx == 0 && !matches!(self.state, EnvState::Silent | EnvState::Gain)
    }

    /// Apply the ADSR1, ADSR2 and GAIN registers of the voice.
    /// Returns `true` if the voice ran out.
    pub(super) fn fix_envelope(&mut self, gain: u8, adsr1: u8, adsr2: u8, playback_rate: u32) -> bool {
        if adsr1 & 0x80 != 0 {
            if self.set_mode(EnvMode::Adsr) {
                let attack = match ATTACK_RATE[usize::from(adsr1 & 0xf)] {
                    1 => 0,
                    rate => rate,
                };
                let rates = [
                    attack,
                    DECAY_RATE[usize::from((adsr1 >> 4) & 7)],
                    SUSTAIN_RATE[usize::from(adsr2 & 0x1f)],
                ];
                self.set_adsr(rates, u32::from(adsr2 >> 5), RELEASE_RATE, playback_rate);
            }
            return false;
        }
        if gain & 0x80 == 0 {
            // direct gain
            if self.set_mode(EnvMode::Gain) {
                let level = i32::from(gain & 0x7f);
                self.set_env_rate(0, 0, level, playback_rate);
                return self.set_envelope_height(level);
            }
            return false;
        }
        let index = usize::from(gain & 0x1f);
        if gain & 0x40 != 0 {
            let mode = if gain & 0x20 != 0 {
                EnvMode::IncreaseBentLine
            } else {
                EnvMode::IncreaseLinear
            };
            if self.set_mode(mode) {
                self.set_env_rate(INCREASE_RATE[index], 1, MAX_ENVELOPE_HEIGHT, playback_rate)
            }
        } else if gain & 0x20 != 0 {
            if self.set_mode(EnvMode::DecreaseExponential) {
                self.set_env_rate(DECREASE_RATE_EXP[index] / 2, -1, 0, playback_rate)
            }
        } else if self.set_mode(EnvMode::DecreaseLinear) {
            self.set_env_rate(INCREASE_RATE[index], -1, 0, playback_rate)
        }
        false
    }

    /// Enter release from any audible state
    pub(super) fn key_off(&mut self, playback_rate: u32) {
        if self.state != EnvState::Silent {
            self.state = EnvState::Release;
            self.mode = EnvMode::Release;
            self.set_env_rate(RELEASE_RATE, -1, 0, playback_rate);
            log::debug!("voice released at height {}", self.envx);
        }
    }

    /// Advance the envelope once the error accumulator has overflowed.
    /// Returns `true` if the voice ran out.
    pub(super) fn step_envelope(&mut self, playback_rate: u32) -> bool {
        let step = (self.env_error >> 16) as i32;
        match self.state {
            EnvState::Attack | EnvState::IncreaseLinear | EnvState::IncreaseBentLine => {
                self.env_error &= FIXED_POINT - 1;
                if self.state == EnvState::IncreaseBentLine
                    && self.envx >= (MAX_ENVELOPE_HEIGHT * 3) / 4
                {
                    self.envxx += ((MAX_ENVELOPE_HEIGHT << ENVX_SHIFT) / 256) * step;
                    self.envx = self.envxx >> ENVX_SHIFT;
                } else {
                    self.envx += step << 1;
                    self.envxx = self.envx << ENVX_SHIFT;
                }
                if self.envx >= 126 {
                    self.envx = MAX_ENVELOPE_HEIGHT;
                    self.envxx = MAX_ENVELOPE_HEIGHT << ENVX_SHIFT;
                    if self.state == EnvState::Attack {
                        if self.sustain_level != 8 {
                            self.state = EnvState::Decay;
                            let target = self.sustain_height();
                            self.set_env_rate(self.decay_rate, -1, target, playback_rate);
                        } else {
                            self.state = EnvState::Sustain;
                            self.set_env_rate(self.sustain_rate, -1, 0, playback_rate);
                        }
                    } else {
                        self.state = EnvState::Gain;
                        self.mode = EnvMode::Gain;
                        self.set_env_rate(0, -1, 0, playback_rate);
                    }
                    log::trace!("envelope reached full height, now {:?}", self.state);
                }
            }
            EnvState::Decay | EnvState::Sustain | EnvState::DecreaseExponential => {
                while self.env_error >= FIXED_POINT {
                    self.envxx = exp_decrease(self.envxx);
                    self.env_error -= FIXED_POINT;
                }
                self.envx = self.envxx >> ENVX_SHIFT;
                if self.state == EnvState::Decay {
                    if self.envx <= i32::from(self.envx_target) {
                        if self.envx <= 0 {
                            return true;
                        }
                        self.state = EnvState::Sustain;
                        self.set_env_rate(self.sustain_rate, -1, 0, playback_rate);
                    }
                } else if self.envx <= 0 {
                    return true;
                }
            }
            EnvState::Release => {
                while self.env_error >= FIXED_POINT {
                    self.envxx -= (MAX_ENVELOPE_HEIGHT << ENVX_SHIFT) / 256;
                    self.env_error -= FIXED_POINT;
                }
                self.envx = self.envxx >> ENVX_SHIFT;
                if self.envx <= 0 {
                    return true;
                }
            }
            EnvState::DecreaseLinear => {
                self.env_error &= FIXED_POINT - 1;
                self.envx -= step << 1;
                self.envxx = self.envx << ENVX_SHIFT;
                if self.envx <= 0 {
                    return true;
                }
            }
            EnvState::Gain => self.set_env_rate(0, -1, 0, playback_rate),
            EnvState::Silent => (),
        }
        self.update_levels();
        false
    }
}
