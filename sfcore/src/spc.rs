//! `.spc` sound file images
//!
//! An SPC image holds the complete state of the audio unit: the SPC700
//! registers, its 64 KiB of RAM, the DSP registers and the RAM hidden below
//! the IPL ROM.
//!
//! # Literature
//!
//! - <https://snesmusic.org/files/spc_file_format.txt>

use crate::{
    dsp::{flg, global, REGISTER_COUNT},
    spc700::{Spc700, MEMORY_SIZE, ROM_START},
};

pub const SIGNATURE: &[u8; 33] = b"SNES-SPC700 Sound File Data v0.30";
pub const VERSION: u8 = 0x1e;
/// Follows the signature
const MARKER: [u8; 3] = [26, 26, 26];

const REGISTERS: usize = 0x25;
const RAM: usize = 0x100;
const DSP: usize = RAM + MEMORY_SIZE;
const EXTRA_RAM: usize = 0x101c0;
pub const IMAGE_LEN: usize = 0x10200;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SpcError {
    #[error("spc image too short ({len} bytes, {} needed)", IMAGE_LEN)]
    Truncated { len: usize },
    #[error("missing spc signature")]
    BadSignature,
}

/// Serialize the current state of the audio unit
pub fn save(spc: &Spc700) -> Vec<u8> {
    let mut data = vec![0; IMAGE_LEN];
    data[..SIGNATURE.len()].copy_from_slice(SIGNATURE);
    data[33..36].copy_from_slice(&MARKER);
    data[36] = VERSION;
    let [pc_lo, pc_hi] = spc.pc.to_le_bytes();
    data[REGISTERS..REGISTERS + 7]
        .copy_from_slice(&[pc_lo, pc_hi, spc.a, spc.x, spc.y, spc.status, spc.sp]);
    data[RAM..DSP].copy_from_slice(&spc.visible_ram()[..]);
    data[DSP..DSP + REGISTER_COUNT].copy_from_slice(spc.dsp.registers());
    data[EXTRA_RAM..].copy_from_slice(&spc.mem[usize::from(ROM_START)..]);
    data
}

/// Check the signature and length of an image
pub fn validate(data: &[u8]) -> Result<(), SpcError> {
    if data.len() < IMAGE_LEN {
        return Err(SpcError::Truncated { len: data.len() });
    }
    if &data[..SIGNATURE.len()] != SIGNATURE {
        return Err(SpcError::BadSignature);
    }
    Ok(())
}

/// Reset the audio unit and restore it from an image.
///
/// The DSP registers are replayed through the register write path, so the
/// voices pick up their state. `KON` is written last, starting the voices
/// keyed in the image.
pub fn load(spc: &mut Spc700, data: &[u8]) -> Result<(), SpcError> {
    validate(data)?;
    let sound = spc.dsp.config().clone();
    spc.reset(&sound);

    let regs = &data[REGISTERS..REGISTERS + 7];
    spc.pc = u16::from_le_bytes([regs[0], regs[1]]);
    spc.a = regs[2];
    spc.x = regs[3];
    spc.y = regs[4];
    spc.status = regs[5];
    spc.sp = regs[6];

    spc.mem.copy_from_slice(&data[RAM..DSP]);
    spc.mem[usize::from(ROM_START)..].copy_from_slice(&data[EXTRA_RAM..]);
    // keep the ports the image holds
    spc.set_control(data[RAM + 0xf1] & 0x87);
    for i in 0..3 {
        let target = data[RAM + 0xfa + i];
        spc.timer_targets[i] = if target == 0 { 0x100 } else { target.into() };
        spc.mem[0xfd + i] = data[RAM + 0xfd + i] & 0xf;
    }
    spc.output.copy_from_slice(&data[RAM + 0xf4..RAM + 0xf8]);

    let dsp = &data[DSP..DSP + REGISTER_COUNT];
    for (reg, &val) in (0u8..).zip(dsp.iter()) {
        let val = match reg {
            global::KON | global::KOFF => continue,
            global::FLG => val & !flg::SOFT_RESET,
            _ => val,
        };
        spc.dsp.write(reg, val, &spc.mem);
    }
    spc.dsp.write(global::KON, dsp[usize::from(global::KON)], &spc.mem);
    log::info!(
        "spc image loaded, pc = {:04x}, voices keyed {:02x}",
        spc.pc,
        spc.dsp.keyed_voices()
    );
    Ok(())
}
