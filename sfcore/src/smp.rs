//! The audio unit as seen by the main CPU
//!
//! The SPC700 runs behind the master clock and is caught up lazily: before
//! every access to the APU ports and at the end of every run slice. Master
//! cycles are converted to APU cycles with an exact fraction, so the two
//! clocks never drift apart.

use crate::{
    backend::{AudioBackend as Backend, PcmBlock},
    config::{Config, SoundConfig},
    spc,
    spc700::Spc700,
};

#[derive(Debug)]
pub struct Smp<B: Backend> {
    pub spc: Spc700,
    pub backend: B,
    /// `(master, apu)` cycle ratio
    pub(crate) proportion: (u64, u64),
    /// Master clock at the last catch up
    pub(crate) last_cycles: u64,
    /// Master cycles times `proportion.1` not yet converted
    pub(crate) fraction: u64,
    /// APU cycles still to run; negative if the last instruction overshot
    pub(crate) budget: i64,
    sound: SoundConfig,
    scratch: Vec<u8>,
    dump: Option<Vec<u8>>,
}

impl<B: Backend> Smp<B> {
    pub fn new(backend: B, config: &Config) -> Self {
        Self {
            spc: Spc700::new(&config.sound),
            backend,
            proportion: config.region.apu_proportion(),
            last_cycles: 0,
            fraction: 0,
            budget: 0,
            sound: config.sound.clone(),
            scratch: Vec::with_capacity(config.sound.block_frames * config.sound.channels()),
            dump: None,
        }
    }

    pub fn reset(&mut self, config: &Config) {
        self.proportion = config.region.apu_proportion();
        self.sound = config.sound.clone();
        self.last_cycles = 0;
        self.fraction = 0;
        self.budget = 0;
        self.dump = None;
        self.spc.reset(&config.sound);
    }

    pub fn sound_config(&self) -> &SoundConfig {
        &self.sound
    }

    /// Run the APU up to the master clock `now`
    pub fn catch_up(&mut self, now: u64) {
        let elapsed = now.saturating_sub(self.last_cycles);
        self.last_cycles = now;
        let total = elapsed * self.proportion.1 + self.fraction;
        self.budget += (total / self.proportion.0) as i64;
        self.fraction = total % self.proportion.0;
        self.run();
    }

    /// Run the APU for a number of its own cycles, independent of the
    /// master clock
    pub fn run_cycles(&mut self, cycles: u32) {
        self.budget += i64::from(cycles);
        self.run();
    }

    fn run(&mut self) {
        while self.budget > 0 {
            if self.spc.is_halted() {
                // the timers and the DSP keep running
                let mut left = self.budget as u64;
                while left > 0 {
                    let n = left.min(u64::from(u32::MAX)) as u32;
                    self.spc.tick(n);
                    left -= u64::from(n);
                }
                self.budget = 0;
                break;
            }
            self.budget -= i64::from(self.spc.dispatch_instruction());
            if self.spc.dsp_mut().take_dump_request() {
                self.dump = Some(spc::save(&self.spc));
                log::info!("spc dump captured at pc {:04x}", self.spc.pc);
            }
        }
        self.deliver(false);
    }

    /// Render the pending frames and hand every complete block to the
    /// backend. With `partial` set, the remaining samples follow as a short
    /// block.
    fn deliver(&mut self, partial: bool) {
        self.spc.flush_audio();
        let block = (self.sound.block_frames * self.sound.channels()).max(1);
        loop {
            let available = self.spc.dsp().samples().len();
            let len = if available >= block {
                block
            } else if partial && available > 0 {
                available
            } else {
                break;
            };
            let samples = &self.spc.dsp().samples()[..len];
            if self.sound.sixteen_bit {
                self.backend.push_block(PcmBlock::Signed16(samples))
            } else {
                self.scratch.clear();
                self.scratch
                    .extend(samples.iter().map(|&s| ((s >> 8) + 128) as u8));
                self.backend.push_block(PcmBlock::Unsigned8(&self.scratch))
            }
            self.spc.dsp_mut().consume_samples(len);
        }
    }

    /// Hand the samples of an incomplete block to the backend
    pub fn flush_partial(&mut self) {
        self.deliver(true)
    }

    pub fn read_output_port(&mut self, addr: u8) -> u8 {
        self.spc.output_port(addr & 3)
    }

    pub fn write_input_port(&mut self, addr: u8, data: u8) {
        self.spc.set_input_port(addr & 3, data)
    }

    /// Capture an SPC image at the next key-on
    pub fn arm_spc_dump(&mut self) {
        self.dump = None;
        self.spc.dsp_mut().arm_dump();
    }

    /// The SPC image captured since the dump was armed
    pub fn take_spc_dump(&mut self) -> Option<Vec<u8>> {
        self.dump.take()
    }

    /// Replace the APU state with an SPC image, keeping the clock
    pub fn load_spc(&mut self, data: &[u8]) -> Result<(), spc::SpcError> {
        spc::load(&mut self.spc, data)?;
        self.budget = 0;
        Ok(())
    }

    /// An SPC image of the current APU state
    pub fn save_spc(&mut self) -> Vec<u8> {
        self.spc.flush_audio();
        spc::save(&self.spc)
    }
}
