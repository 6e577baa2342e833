//! Echo ring with FIR filter and feedback
//!
//! The ring holds interleaved samples. Every sample leaving the ring is
//! passed through an 8-tap filter and fed back with the echo input of the
//! same frame.

/// Samples of echo delay per `EDL` step at 32 kHz
const SAMPLES_PER_STEP: u32 = 512;
const MAX_DELAY: u32 = 15;

#[derive(Debug, Clone)]
pub struct Echo {
    pub(crate) ring: Vec<i32>,
    pub(crate) ptr: usize,
    pub(crate) size: usize,
    pub(crate) feedback: i32,
    pub(crate) taps: [i32; 8],
    pub(crate) history: [i32; 16],
    pub(crate) history_index: u32,
}

const fn clip8(val: i32) -> i32 {
    if val > 127 {
        127
    } else if val < -128 {
        -128
    } else {
        val
    }
}

/// Ring length for a delay setting
pub fn ring_len(delay: u8, playback_rate: u32, stereo: bool) -> usize {
    let len = (SAMPLES_PER_STEP * u32::from(delay) * playback_rate / 32000) as usize;
    if stereo {
        len << 1
    } else {
        len
    }
}

impl Echo {
    /// Allocate a ring large enough for the longest delay
    pub fn new(playback_rate: u32, stereo: bool) -> Self {
        let mut taps = [0; 8];
        taps[0] = 127;
        Self {
            ring: vec![0; ring_len(MAX_DELAY as u8, playback_rate, stereo)],
            ptr: 0,
            size: 0,
            feedback: 0,
            taps,
            history: [0; 16],
            history_index: 0,
        }
    }

    pub fn reset(&mut self) {
        self.clear();
        self.ptr = 0;
        self.size = 0;
        self.feedback = 0;
        self.taps = [127, 0, 0, 0, 0, 0, 0, 0];
    }

    /// Zero the ring contents and the filter history
    pub fn clear(&mut self) {
        self.ring.fill(0);
        self.history = [0; 16];
    }

    pub fn set_delay(&mut self, delay: u8, playback_rate: u32, stereo: bool) {
        self.size = ring_len(delay, playback_rate, stereo);
        if self.ring.len() < self.size {
            self.ring.resize(self.size, 0)
        }
        self.ptr = if self.size > 0 { self.ptr % self.size } else { 0 };
    }

    pub fn set_feedback(&mut self, feedback: i32) {
        self.feedback = clip8(feedback)
    }

    pub fn set_tap(&mut self, tap: usize, value: i32) {
        self.taps[tap & 7] = value
    }

    /// Whether the filter leaves the signal as it is, apart from the tap
    /// 0 scale
    pub fn is_identity(&self) -> bool {
        matches!(self.taps[0], 0 | 127) && self.taps[1..].iter().all(|&t| t == 0)
    }

    /// Filter one sample leaving the ring. `stride` is the number of
    /// interleaved channels.
    fn filter(&mut self, sample: i32, stride: u32) -> i32 {
        if self.is_identity() {
            return sample * self.taps[0] / 128;
        }
        let z = self.history_index;
        self.history[(z & 15) as usize] = sample;
        let mut acc = sample * self.taps[0];
        for (k, &tap) in self.taps.iter().enumerate().skip(1) {
            let at = z.wrapping_sub(k as u32 * stride) & 15;
            acc += self.history[at as usize] * tap;
        }
        self.history_index = z.wrapping_add(1);
        acc / 128
    }

    /// Take the delayed sample at the cursor, filter it and replace it
    /// with `input` plus feedback. Returns the filtered sample.
    pub fn process(&mut self, input: i32, stride: u32) -> i32 {
        let delayed = self.ring[self.ptr];
        let filtered = self.filter(delayed, stride);
        self.ring[self.ptr] = filtered * self.feedback / 128 + input;
        self.ptr += 1;
        if self.ptr >= self.size {
            self.ptr = 0
        }
        filtered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_len_scales_with_rate() {
        assert_eq!(ring_len(1, 32000, false), 512);
        assert_eq!(ring_len(2, 32000, true), 2048);
        assert_eq!(ring_len(1, 16000, false), 256);
        assert_eq!(ring_len(0, 32000, true), 0);
    }

    #[test]
    fn identity_filter_delays_and_scales() {
        let mut echo = Echo::new(32000, false);
        echo.set_delay(1, 32000, false);
        let out: Vec<i32> = (0..1024)
            .map(|i| echo.process(if i == 0 { 1280 } else { 0 }, 1))
            .collect();
        assert!(out[..512].iter().all(|&s| s == 0));
        assert_eq!(out[512], 1280 * 127 / 128);
        assert!(out[513..].iter().all(|&s| s == 0));
    }

    #[test]
    fn feedback_repeats() {
        let mut echo = Echo::new(32000, false);
        echo.set_delay(1, 32000, false);
        echo.set_feedback(64);
        let out: Vec<i32> = (0..1536)
            .map(|i| echo.process(if i == 0 { 1024 } else { 0 }, 1))
            .collect();
        assert_eq!(out[512], 1016);
        assert_eq!(out[1024], 1016 * 64 / 128 * 127 / 128);
    }

    #[test]
    fn fir_uses_history_of_the_same_channel() {
        let mut echo = Echo::new(32000, true);
        echo.taps = [64, 64, 0, 0, 0, 0, 0, 0];
        assert!(!echo.is_identity());
        // stereo: the second tap looks two samples back
        assert_eq!(echo.filter(256, 2), 128);
        assert_eq!(echo.filter(512, 2), 256);
        assert_eq!(echo.filter(0, 2), 128);
    }
}
