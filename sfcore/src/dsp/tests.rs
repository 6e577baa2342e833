use super::*;

/// APU cycles per frame at 32 kHz
const FRAME: u32 = APU_CLOCK_HZ / 32000;

struct Rig {
    dsp: Dsp,
    ram: Box<[u8; MEMORY_SIZE]>,
}

impl Rig {
    /// A mono DSP with one looping sample of constant level as sample 0
    fn new() -> Self {
        let sound = SoundConfig {
            stereo: false,
            ..Default::default()
        };
        let mut ram = Box::new([0; MEMORY_SIZE]);
        ram[0x200..0x204].copy_from_slice(&[0x00, 0x03, 0x00, 0x03]);
        ram[0x300] = 0xc3;
        ram[0x301..0x309].fill(0x77);
        let mut rig = Self {
            dsp: Dsp::new(&sound),
            ram,
        };
        rig.write(global::DIR, 0x02);
        rig.write(global::FLG, flg::ECHO_DISABLE);
        rig.write(global::MVOLL, 0x7f);
        rig.write(global::MVOLR, 0x7f);
        rig.write(voice_reg::VOLL, 0x7f);
        rig.write(voice_reg::VOLR, 0x7f);
        rig.write(voice_reg::PITCHH, 0x08);
        rig
    }

    fn write(&mut self, reg: u8, val: u8) {
        self.dsp.write(reg, val, &self.ram)
    }

    fn run(&mut self, frames: u32) {
        self.dsp.advance(frames * FRAME);
        self.dsp.flush(&self.ram);
    }
}

#[test]
fn reset_state() {
    let dsp = Dsp::new(&SoundConfig::default());
    assert_eq!(dsp.read(global::FLG), flg::MUTE | flg::ECHO_DISABLE);
    assert!(dsp.mute);
    assert_eq!(dsp.echo_enable, 0);
    assert_eq!(dsp.keyed_voices(), 0);
    assert!(dsp.voices.iter().all(|v| v.state == EnvState::Silent));
}

#[test]
fn frames_follow_the_apu_clock() {
    let mut rig = Rig::new();
    rig.dsp.advance(FRAME * 10 + FRAME / 2);
    assert_eq!(rig.dsp.pending, 10);
    rig.dsp.advance(FRAME / 2);
    rig.dsp.flush(&rig.ram);
    assert_eq!(rig.dsp.samples().len(), 11);
    rig.dsp.consume_samples(4);
    assert_eq!(rig.dsp.samples().len(), 7);
}

#[test]
fn muted_output_is_silent() {
    let mut rig = Rig::new();
    rig.write(voice_reg::ADSR1, 0x8f);
    rig.write(voice_reg::ADSR2, 0xe0);
    rig.write(global::KON, 0x01);
    rig.write(global::FLG, flg::MUTE | flg::ECHO_DISABLE);
    rig.run(500);
    assert_eq!(rig.dsp.samples().len(), 500);
    assert!(rig.dsp.samples().iter().all(|&s| s == 0));
}

#[test]
fn envelope_is_monotonic_per_phase() {
    let mut rig = Rig::new();
    // attack 40 ms, decay 290 ms, sustain level 4/8, sustain 1200 ms
    rig.write(voice_reg::ADSR1, 0x80 | (3 << 4) | 0x0a);
    rig.write(voice_reg::ADSR2, (3 << 5) | 0x10);
    rig.write(global::KON, 0x01);
    assert_eq!(rig.dsp.voice(0).state, EnvState::Attack);

    let mut seen = vec![];
    let mut last = (EnvState::Attack, 0);
    for _ in 0..20000 {
        rig.run(1);
        let voice = rig.dsp.voice(0);
        let now = (voice.state, voice.envx);
        if last.0 == EnvState::Attack && now.0 == EnvState::Attack {
            assert!(now.1 >= last.1, "attack fell from {} to {}", last.1, now.1);
        }
        if matches!(last.0, EnvState::Decay | EnvState::Sustain) {
            assert!(now.1 <= last.1, "{:?} rose from {} to {}", now.0, last.1, now.1);
        }
        if seen.last() != Some(&now.0) {
            seen.push(now.0)
        }
        last = now;
    }
    assert_eq!(seen, [EnvState::Attack, EnvState::Decay, EnvState::Sustain]);
    assert!(rig.dsp.voice(0).envx <= 63);
}

#[test]
fn full_sustain_holds_until_key_off() {
    let mut rig = Rig::new();
    // attack at the fastest rate, sustain level at full scale, no sustain decay
    rig.write(voice_reg::ADSR1, 0x8f);
    rig.write(voice_reg::ADSR2, 0xe0);
    rig.write(global::KON, 0x01);
    rig.run(5000);
    assert_eq!(rig.dsp.voice(0).state, EnvState::Sustain);
    assert_eq!(rig.dsp.voice(0).envx, 127);
    assert_eq!(rig.dsp.read(voice_reg::ENVX), 127);
    assert!(rig.dsp.samples()[4000..].iter().all(|&s| s > 0));

    rig.write(global::KOFF, 0x01);
    assert_eq!(rig.dsp.voice(0).state, EnvState::Release);
    rig.run(1000);
    assert_eq!(rig.dsp.voice(0).state, EnvState::Silent);
    assert_eq!(rig.dsp.keyed_voices(), 0);
    assert_eq!(rig.dsp.read(global::ENDX) & 1, 1);
    assert_eq!(rig.dsp.read(voice_reg::OUTX), 0);
}

#[test]
fn key_on_waits_for_key_off_release() {
    let mut rig = Rig::new();
    rig.write(voice_reg::ADSR1, 0x8f);
    rig.write(voice_reg::ADSR2, 0xe0);
    rig.write(global::KOFF, 0x01);
    rig.write(global::KON, 0x01);
    assert_eq!(rig.dsp.voice(0).state, EnvState::Silent);
    assert_eq!(rig.dsp.key_on, 0x01);

    // the deferred bit has not reached the pipeline yet
    rig.write(global::KOFF, 0x00);
    assert_eq!(rig.dsp.voice(0).state, EnvState::Silent);

    rig.write(global::KOFF, 0x01);
    rig.write(global::MVOLL, 0x7f);
    assert_eq!(rig.dsp.key_on, 0);
    assert_eq!(rig.dsp.key_on_prev, 0x01);
    rig.write(global::KOFF, 0x00);
    assert_eq!(rig.dsp.voice(0).state, EnvState::Sustain);
    assert_eq!(rig.dsp.keyed_voices(), 0x01);
    assert_eq!(rig.dsp.key_on_prev, 0);
}

#[test]
fn looping_sample_sets_endx() {
    let mut rig = Rig::new();
    rig.write(voice_reg::ADSR1, 0x8f);
    rig.write(voice_reg::ADSR2, 0xe0);
    rig.write(global::KON, 0x01);
    assert_eq!(rig.dsp.read(global::ENDX), 0);
    rig.run(100);
    assert_eq!(rig.dsp.read(global::ENDX), 0x01);
    assert_eq!(rig.dsp.voice(0).state, EnvState::Sustain);
    rig.write(global::ENDX, 0xff);
    assert_eq!(rig.dsp.read(global::ENDX), 0);
}

#[test]
fn non_looping_sample_ends() {
    let mut rig = Rig::new();
    rig.ram[0x300] = 0xc1;
    rig.write(voice_reg::ADSR1, 0x8f);
    rig.write(voice_reg::ADSR2, 0xe0);
    rig.write(global::KON, 0x01);
    rig.run(200);
    assert_eq!(rig.dsp.voice(0).state, EnvState::Silent);
    assert_eq!(rig.dsp.read(global::ENDX), 0x01);
    assert_eq!(rig.dsp.read(global::KON), 0);
}

#[test]
fn direct_gain_reads_back_as_zero_envx() {
    let mut rig = Rig::new();
    rig.write(voice_reg::GAIN, 0x40);
    rig.write(global::KON, 0x01);
    rig.run(10);
    assert_eq!(rig.dsp.voice(0).state, EnvState::Gain);
    assert_eq!(rig.dsp.voice(0).envx, 0x40);
    assert_eq!(rig.dsp.read(voice_reg::ENVX), 0);
    assert_ne!(rig.dsp.read(voice_reg::OUTX), 0);
}

#[test]
fn masked_voice_is_not_heard() {
    let mut rig = Rig::new();
    rig.dsp.set_channel_mask(0xfe);
    rig.write(voice_reg::ADSR1, 0x8f);
    rig.write(voice_reg::ADSR2, 0xe0);
    rig.write(global::KON, 0x01);
    rig.run(100);
    assert!(rig.dsp.samples().iter().all(|&s| s == 0));
}

#[test]
fn noise_voice_varies() {
    let mut rig = Rig::new();
    rig.write(global::NON, 0x01);
    rig.write(global::FLG, flg::ECHO_DISABLE | 0x1f);
    rig.write(voice_reg::ADSR1, 0x8f);
    rig.write(voice_reg::ADSR2, 0xe0);
    rig.write(global::KON, 0x01);
    rig.run(64);
    let samples = rig.dsp.samples();
    assert!(samples.windows(2).any(|w| w[0] != w[1]));
    assert_eq!(rig.dsp.voice(0).sound_type, SoundType::Noise);
}

#[test]
fn echo_needs_writes_and_delay() {
    let mut rig = Rig::new();
    rig.write(global::EON, 0x01);
    assert_eq!(rig.dsp.echo_enable, 0);
    assert_eq!(rig.dsp.echo_channel_enable, 0x01);
    rig.write(global::FLG, 0);
    assert_eq!(rig.dsp.echo_enable, 0x01);
    rig.write(global::EDL, 0x02);
    assert_eq!(rig.dsp.echo.size, 1024);
    rig.write(global::FLG, flg::ECHO_DISABLE);
    assert_eq!(rig.dsp.echo_enable, 0);
}

#[test]
fn soft_reset_mutes_and_restores_the_filter() {
    let mut rig = Rig::new();
    rig.write(voice_reg::ADSR1, 0x8f);
    rig.write(voice_reg::ADSR2, 0xe0);
    rig.write(voice_reg::COEF, 0x40);
    rig.write(0x1f, 0x20);
    rig.write(global::EFB, 0x40);
    rig.write(global::KON, 0x01);
    rig.run(100);
    assert!(!rig.dsp.mute);
    assert_ne!(rig.dsp.voice(0).state, EnvState::Silent);

    rig.write(global::FLG, flg::SOFT_RESET | 0x05);
    assert_eq!(rig.dsp.read(global::FLG), flg::MUTE | flg::ECHO_DISABLE | 0x05);
    assert!(rig.dsp.mute);
    assert_eq!(rig.dsp.echo.taps, [127, 0, 0, 0, 0, 0, 0, 0]);
    assert_eq!(rig.dsp.echo.feedback, 0);
    assert_eq!(rig.dsp.keyed_voices(), 0);
    assert_eq!(rig.dsp.voice(0).state, EnvState::Silent);
    for reg in [global::KON, global::KOFF, global::ENDX] {
        assert_eq!(rig.dsp.read(reg), 0);
    }
    rig.run(50);
    assert!(rig.dsp.samples()[100..].iter().all(|&s| s == 0));
}

#[test]
fn noise_clock_follows_the_written_flags() {
    let mut rig = Rig::new();
    rig.write(global::FLG, flg::ECHO_DISABLE | 0x1f);
    assert_eq!(rig.dsp.noise_hertz, 32000);
    rig.write(global::FLG, flg::ECHO_DISABLE | 0x01);
    assert_eq!(rig.dsp.noise_hertz, 16);
}

#[test]
fn armed_dump_fires_once() {
    let mut rig = Rig::new();
    rig.dsp.arm_dump();
    rig.write(global::KON, 0x00);
    assert!(!rig.dsp.take_dump_request());
    rig.write(global::KON, 0x01);
    assert!(rig.dsp.take_dump_request());
    assert!(!rig.dsp.take_dump_request());
    assert!(!rig.dsp.is_dump_armed());
}

#[test]
fn brr_decoding_is_pure() {
    let block = [0xc0, 0x7f, 0, 0, 0, 0, 0, 0, 0];
    let (samples, prev) = brr::decode_block(&block, [0; 2]);
    assert_eq!(samples[..2], [28672, -4096]);
    assert_eq!(brr::decode_block(&block, [0; 2]), (samples, prev));

    let filtered = [0x04, 0, 0, 0, 0, 0, 0, 0, 0];
    let (a, _) = brr::decode_block(&filtered, [1000, 0]);
    let (b, _) = brr::decode_block(&filtered, [1000, 0]);
    assert_eq!(a, b);
    assert_eq!(a[0], 936);
    let (c, _) = brr::decode_block(&filtered, [0, 0]);
    assert!(c.iter().all(|&s| s == 0));
}

#[test]
fn state_enums_reject_unknown_values() {
    use save_state::{InSaveState, SaveStateDeserializer};
    let mut state = EnvState::Silent;
    let data = 10u32.to_be_bytes();
    assert!(state
        .deserialize(&mut SaveStateDeserializer::new(&data))
        .is_err());
    let data = 3u32.to_be_bytes();
    assert!(state
        .deserialize(&mut SaveStateDeserializer::new(&data))
        .is_ok());
    assert_eq!(state, EnvState::Sustain);
}
