//! SNES processor core: the 65C816 CPU, the SPC700 audio processor and the
//! S-DSP sound generator, advanced by one master clock.
//!
//! The cartridge, WRAM and I/O registers are supplied by the caller as a
//! [`device::MemoryMap`]; generated audio leaves through a
//! [`backend::AudioBackend`].

mod addressing;
pub mod alu;
pub mod backend;
pub mod config;
pub mod cpu;
pub mod device;
pub mod dsp;
mod instr;
pub mod smp;
pub mod snapshot;
pub mod spc;
pub mod spc700;
pub mod timing;

#[cfg(test)]
mod tests;

pub use backend::{AudioBackend, PcmBlock};
pub use config::{Config, Region, SoundConfig};
pub use device::{Addr24, Device, MemoryMap};
pub use snapshot::SnapshotError;
pub use spc::SpcError;
pub use timing::Event;
