//! Machine and sound output configuration

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The video standard of the console, which decides the ratio between the
/// master clock and the APU clock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(rename_all = "lowercase"))]
pub enum Region {
    #[default]
    Ntsc,
    Pal,
}

impl Region {
    /// `(master, apu)` so that `master` master cycles take as long as `apu`
    /// APU cycles
    pub const fn apu_proportion(self) -> (u64, u64) {
        match self {
            Self::Ntsc => (118125, 5632),
            Self::Pal => (2128137, 102400),
        }
    }
}

/// Format of the generated PCM stream
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
pub struct SoundConfig {
    /// Output frames per second
    pub playback_rate: u32,
    pub stereo: bool,
    /// Signed 16-bit samples if set, unsigned 8-bit otherwise
    pub sixteen_bit: bool,
    /// Linear interpolation between decoded samples
    pub interpolate: bool,
    pub echo: bool,
    /// Frames per block handed to the audio backend
    pub block_frames: usize,
    /// Voices with a cleared bit are muted in the output
    pub channel_mask: u8,
}

impl Default for SoundConfig {
    fn default() -> Self {
        Self {
            playback_rate: 32000,
            stereo: true,
            sixteen_bit: true,
            interpolate: true,
            echo: true,
            block_frames: 512,
            channel_mask: 0xff,
        }
    }
}

impl SoundConfig {
    pub const fn channels(&self) -> usize {
        if self.stereo {
            2
        } else {
            1
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
pub struct Config {
    pub region: Region,
    pub sound: SoundConfig,
    /// Enter [`crate::cpu::CpuState::DebugBreak`] on `WDM` instead of
    /// skipping it
    pub break_on_wdm: bool,
}
