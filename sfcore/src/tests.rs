use crate::{
    backend::{Collect, Dummy},
    config::{Config, SoundConfig},
    cpu::{CpuState, Status},
    device::{Addr24, Device, MemoryMap},
    dsp::{global, EnvState},
    smp::Smp,
    snapshot::{SnapshotError, SIGNATURE},
    spc::{self, SpcError},
    spc700::Spc700,
    timing::Event,
};

/// 64 KiB of RAM mirrored into banks `$00-$BF`. Nothing answers in the
/// banks above.
struct FlatMemory {
    mem: Vec<u8>,
    /// Every write with its full address
    writes: Vec<(Addr24, u8)>,
}

impl FlatMemory {
    /// Place `program` at `$8000` and point the reset vector at it
    fn with_program(program: &[u8]) -> Self {
        let mut mem = vec![0; 0x10000];
        mem[0x8000..0x8000 + program.len()].copy_from_slice(program);
        mem[0xfffc..0xfffe].copy_from_slice(&[0x00, 0x80]);
        Self {
            mem,
            writes: Vec::new(),
        }
    }

    fn set_vector(&mut self, vector: u16, target: u16) {
        let at = usize::from(vector);
        self.mem[at..at + 2].copy_from_slice(&target.to_le_bytes())
    }
}

impl MemoryMap for FlatMemory {
    fn read(&mut self, addr: Addr24) -> Option<u8> {
        (addr.bank < 0xc0).then(|| self.mem[usize::from(addr.addr)])
    }

    fn write(&mut self, addr: Addr24, value: u8) {
        self.writes.push((addr, value));
        self.mem[usize::from(addr.addr)] = value
    }
}

/// BRA to itself
const IDLE_LOOP: [u8; 2] = [0x80, 0xfe];

fn write_dsp(spc: &mut Spc700, reg: u8, val: u8) {
    spc.write(0xf2, reg);
    spc.write(0xf3, val);
}

/// Let the APU idle at `$0400` with voice 0 playing a looping sample
/// through the echo unit
fn start_voice(spc: &mut Spc700) {
    spc.mem[0x200..0x204].copy_from_slice(&[0x00, 0x03, 0x00, 0x03]);
    // two blocks: a ramp with filter 1, then a looping block
    spc.mem[0x300..0x309].copy_from_slice(&[0xb4, 0x12, 0x34, 0x56, 0x70, 0x9a, 0xbc, 0xde, 0xf1]);
    spc.mem[0x309..0x312].copy_from_slice(&[0xa3, 0x7f, 0x08, 0x80, 0xf7, 0x31, 0x13, 0xc4, 0x4c]);
    spc.mem[0x400..0x402].copy_from_slice(&[0x2f, 0xfe]);
    spc.pc = 0x400;
    spc.set_control(0x00);
    for (reg, val) in [
        (global::DIR, 0x02),
        (global::FLG, 0x00),
        (global::MVOLL, 0x60),
        (global::MVOLR, 0x50),
        (global::EVOLL, 0x30),
        (global::EVOLR, 0x28),
        (global::EON, 0x01),
        (global::EDL, 0x01),
        (global::EFB, 0x40),
        (0x0f, 0x40),
        (0x1f, 0x20),
        (0x2f, 0xf0),
        (0x00, 0x50),
        (0x01, 0x30),
        (0x02, 0x00),
        (0x03, 0x10),
        (0x05, 0x8a),
        (0x06, 0x36),
        (global::KON, 0x01),
    ] {
        write_dsp(spc, reg, val)
    }
}

#[test]
fn cycle_sum_of_a_sequence() {
    // CLC ; LDA #$12 ; STA $10 ; INC $10 ; NOP
    let program = [0x18, 0xa9, 0x12, 0x85, 0x10, 0xe6, 0x10, 0xea];
    let mut device = Device::new(FlatMemory::with_program(&program), Dummy, Config::default());
    assert_eq!(device.cycles(), 0);
    let total: u32 = (0..5).map(|_| device.step()).sum();
    assert_eq!(total, 106);
    assert_eq!(device.cycles(), 106);
    assert_eq!(device.memory.mem[0x10], 0x13);
    assert_eq!(device.cpu.regs.pc.addr, 0x8008);
}

#[test]
fn wai_resumes_on_nmi_and_stp_halts() {
    let mut memory = FlatMemory::with_program(&[
        0xcb, // WAI
        0xdb, // STP
    ]);
    memory.set_vector(0xfffa, 0x9000);
    memory.mem[0x9000..0x9003].copy_from_slice(&[
        0xe6, 0x20, // INC $20
        0x40, // RTI
    ]);
    let mut device = Device::new(memory, Dummy, Config::default());
    device.step();
    assert_eq!(device.cpu.state, CpuState::WaitingForInterrupt);

    // a waiting CPU skips straight to the next event
    device.schedule(5_000, Event::Nmi);
    assert_eq!(device.run_until_event(), Some(Event::Nmi));
    assert_eq!(device.cycles(), 5_000);
    assert_eq!(device.cpu.state, CpuState::WaitingForInterrupt);

    device.run_for(2_000);
    assert_eq!(device.memory.mem[0x20], 1);
    assert_eq!(device.cpu.state, CpuState::Stopped);
    assert_eq!(device.cpu.regs.sp, 0x1ff);
    assert_eq!(device.cpu.regs.pc.addr, 0x8002);
    assert_eq!(device.cycles(), 7_000);
    assert_eq!(device.step(), 0);
    assert_eq!(device.run_until_event(), None);
}

#[test]
fn masked_irq_ends_wai_without_entering_the_handler() {
    let mut memory = FlatMemory::with_program(&[
        0xcb, // WAI
        0xe8, // INX
        0x58, // CLI
        0xea, // NOP
        0xdb, // STP
    ]);
    memory.set_vector(0xfffe, 0x9100);
    memory.mem[0x9100] = 0xdb;
    let mut device = Device::new(memory, Dummy, Config::default());
    device.schedule(5_000, Event::IrqAssert);
    device.run_for(20_000);

    assert_eq!(device.cpu.regs.x, 1);
    // taken right after CLI, the NOP never runs
    assert_eq!(device.cpu.regs.pc.addr, 0x9101);
    assert_eq!(device.memory.mem[0x1fe..0x200], [0x03, 0x80]);
    assert!(device.cpu.regs.status.has(Status::IRQ_DISABLE));
    assert_eq!(device.cpu.state, CpuState::Stopped);
    assert_eq!(device.cycles(), 20_000);
}

#[test]
fn width_changes_take_effect_immediately() {
    let program = [
        0x18, 0xfb, // CLC ; XCE
        0xc2, 0x20, // REP #$20
        0xa9, 0x34, 0x12, // LDA #$1234
        0xe2, 0x20, // SEP #$20
        0xa9, 0x56, // LDA #$56
        0xc2, 0x10, // REP #$10
        0xa2, 0xcd, 0xab, // LDX #$abcd
        0xe2, 0x10, // SEP #$10
        0x38, 0xfb, // SEC ; XCE
        0xdb,
    ];
    let mut device = Device::new(FlatMemory::with_program(&program), Dummy, Config::default());
    for _ in 0..4 {
        device.step();
    }
    assert!(!device.cpu.regs.is_emulation);
    assert!(!device.cpu.is_reg8());
    assert_eq!(device.cpu.regs.a, 0x1234);
    assert_eq!(device.cpu.regs.pc.addr, 0x8007);

    device.run_for(1_000);
    // the 8-bit load keeps the high byte
    assert_eq!(device.cpu.regs.a, 0x1256);
    // SEP #$10 clears the index high bytes
    assert_eq!(device.cpu.regs.x, 0x00cd);
    assert!(device.cpu.regs.is_emulation);
    assert!(device.cpu.is_reg8() && device.cpu.is_idx8());
    assert!(!device.cpu.regs.status.has(Status::CARRY));
    assert_eq!(device.cpu.regs.pc.addr, 0x8015);
}

#[test]
fn indexed_addresses_wrap_by_mode() {
    let program = [
        0xa2, 0x20, // LDX #$20
        0xa9, 0x77, // LDA #$77
        0x95, 0xf0, // STA $f0,X
        0x18, 0xfb, // CLC ; XCE
        0xa9, 0x88, // LDA #$88
        0x95, 0xf0, // STA $f0,X
        0x9f, 0xf0, 0xff, 0xff, // STA $fffff0,X
        0x9d, 0xf0, 0xff, // STA $fff0,X
        0xdb,
    ];
    let mut device = Device::new(FlatMemory::with_program(&program), Dummy, Config::default());
    device.run_for(1_000);
    assert_eq!(
        device.memory.writes,
        [
            // emulation mode stays inside the direct page
            (Addr24::new(0x00, 0x0010), 0x77),
            (Addr24::new(0x00, 0x0110), 0x88),
            // long indexing wraps at 24 bits
            (Addr24::new(0x00, 0x0010), 0x88),
            // absolute indexing carries into the next bank
            (Addr24::new(0x01, 0x0010), 0x88),
        ]
    );
}

#[test]
fn unmapped_reads_return_open_bus() {
    let program = [
        0xaf, 0x34, 0x12, 0xc0, // LDA $c01234
        0xa2, 0x5a, // LDX #$5a
        0xae, 0x00, 0x00, // LDX $0000
        0xaf, 0x00, 0x80, 0xc7, // LDA $c78000
        0xdb,
    ];
    let mut device = Device::new(FlatMemory::with_program(&program), Dummy, Config::default());
    device.memory.mem[0] = 0x3c;
    device.step();
    // the last byte on the bus was the bank of the operand
    assert_eq!(device.cpu.regs.a, 0xc0);
    assert_eq!(device.open_bus, 0xc0);
    device.step();
    device.step();
    assert_eq!(device.open_bus, 0x3c);
    device.step();
    assert_eq!(device.cpu.regs.a, 0xc7);
    assert_eq!(device.cpu.regs.x, 0x3c);
}

#[test]
fn block_moves_copy_until_the_count_wraps() {
    let program = [
        0x18, 0xfb, // CLC ; XCE
        0xc2, 0x30, // REP #$30
        0xa9, 0x03, 0x00, // LDA #$0003
        0xa2, 0x00, 0x10, // LDX #$1000
        0xa0, 0x00, 0x20, // LDY #$2000
        0x54, 0x00, 0x00, // MVN $00,$00
        0xa9, 0x01, 0x00, // LDA #$0001
        0xa2, 0x03, 0x10, // LDX #$1003
        0xa0, 0x03, 0x30, // LDY #$3003
        0x44, 0x00, 0x00, // MVP $00,$00
        0xdb,
    ];
    let mut memory = FlatMemory::with_program(&program);
    memory.mem[0x1000..0x1004].copy_from_slice(&[1, 2, 3, 4]);
    let mut device = Device::new(memory, Dummy, Config::default());
    device.cpu.regs.db = 0x7e;
    device.run_for(10_000);

    assert_eq!(device.memory.mem[0x2000..0x2005], [1, 2, 3, 4, 0]);
    assert_eq!(device.memory.mem[0x3001..0x3005], [0, 3, 4, 0]);
    assert_eq!(device.cpu.regs.x, 0x1001);
    assert_eq!(device.cpu.regs.y, 0x3001);
    assert_eq!(device.cpu.regs.a, 0xffff);
    // the destination bank becomes the data bank
    assert_eq!(device.cpu.regs.db, 0x00);
    assert_eq!(device.cpu.state, CpuState::Stopped);
}

#[test]
fn apu_port_handshake() {
    let program = [
        0xad, 0x40, 0x21, // LDA $2140
        0xc9, 0xaa, // CMP #$aa
        0xd0, 0xf9, // BNE -7
        0xad, 0x7d, 0x21, // LDA $217d, mirror of port 1
        0x85, 0x10, // STA $10
        0xa9, 0xcc, // LDA #$cc
        0x8d, 0x40, 0x21, // STA $2140
        0x80, 0xfe,
    ];
    let mut device = Device::new(FlatMemory::with_program(&program), Dummy, Config::default());
    device.run_for(200_000);
    assert_eq!(device.memory.mem[0x10], 0xbb);
    assert_eq!(device.smp.spc.ram()[0xf4], 0xcc);
    // the ports never reach the memory map
    assert_eq!(device.memory.mem[0x2140], 0);
}

#[test]
fn apu_follows_the_master_clock() {
    let mut device = Device::new(FlatMemory::with_program(&IDLE_LOOP), Dummy, Config::default());
    device.run_for(118125 * 4);
    // 118125 master cycles take 5632 APU cycles, give or take one instruction
    let cycles = device.smp.spc.cycles as i64;
    assert!((0..=12).contains(&(cycles - 5632 * 4)), "apu ran {} cycles", cycles);
}

fn playing_device() -> Device<FlatMemory, Collect> {
    let mut device = Device::new(
        FlatMemory::with_program(&IDLE_LOOP),
        Collect::default(),
        Config::default(),
    );
    start_voice(&mut device.smp.spc);
    device
}

#[test]
fn snapshot_round_trip_reproduces_output() {
    let mut device = playing_device();
    device.run_for(200_000);
    let at = device.cycles();
    let snapshot = device.freeze();
    assert!(snapshot.starts_with(SIGNATURE));
    let mark = device.smp.backend.signed.len();
    device.run_for(3_000_000);
    let expected = &device.smp.backend.signed[mark..];
    assert!(expected.iter().any(|&s| s != 0));

    let mut restored = Device::new(
        FlatMemory::with_program(&IDLE_LOOP),
        Collect::default(),
        Config::default(),
    );
    restored.restore(&snapshot).unwrap();
    assert_eq!(restored.cycles(), at);
    restored.run_for(3_000_000);
    assert_eq!(restored.smp.backend.signed, expected);
    assert_eq!(restored.freeze(), device.freeze());
}

#[test]
fn failed_restore_keeps_the_machine() {
    let mut device = playing_device();
    device.run_for(100_000);
    let snapshot = device.freeze();
    device.run_for(100_000);
    let before = device.freeze();

    assert!(matches!(
        device.restore(&snapshot[..snapshot.len() / 2]),
        Err(SnapshotError::Format(_))
    ));
    assert_eq!(device.freeze(), before);
    assert_eq!(
        device.restore(b"#!snes9x:0002\n"),
        Err(SnapshotError::BadSignature)
    );
    let mut corrupt = snapshot.clone();
    corrupt[SIGNATURE.len()] = b'X';
    assert!(device.restore(&corrupt).is_err());
    assert_eq!(device.freeze(), before);

    let mut small = vec![0xa5; snapshot.len() - 1];
    assert!(matches!(
        device.freeze_into(&mut small),
        Err(SnapshotError::BufferTooSmall { .. })
    ));
    assert!(small.iter().all(|&b| b == 0xa5));
    let mut buf = vec![0; before.len() + 16];
    assert_eq!(device.freeze_into(&mut buf), Ok(before.len()));
    assert_eq!(&buf[..before.len()], &before[..]);
}

#[test]
fn snapshot_without_core_block_loads() {
    let mut device = playing_device();
    device.run_for(300_000);
    let snapshot = device.freeze();
    let xtr = snapshot
        .windows(4)
        .rposition(|w| w == b"XTR:")
        .unwrap();

    let mut restored = Device::new(
        FlatMemory::with_program(&IDLE_LOOP),
        Collect::default(),
        Config::default(),
    );
    restored.restore(&snapshot[..xtr]).unwrap();
    let (a, b) = (device.smp.spc.dsp(), restored.smp.spc.dsp());
    assert_eq!(a.registers(), b.registers());
    assert_eq!(a.voice(0).state, b.voice(0).state);
    assert_eq!(a.voice(0).envx, b.voice(0).envx);
    assert_eq!(a.voice(0).frequency, b.voice(0).frequency);
    assert_eq!(b.echo_enable, 0x01);
    assert_eq!(b.echo.size, 1024);
    assert_eq!(restored.smp.spc.pc, device.smp.spc.pc);
    assert_eq!(restored.cpu.regs, device.cpu.regs);
    restored.run_for(500_000);
    assert!(restored.smp.backend.signed.iter().any(|&s| s != 0));
}

#[test]
fn spc_image_round_trip() {
    let config = Config::default();
    let mut smp = Smp::new(Collect::default(), &config);
    start_voice(&mut smp.spc);
    smp.run_cycles(10_000);
    let image = smp.save_spc();
    assert_eq!(image.len(), spc::IMAGE_LEN);
    assert_eq!(&image[..33], spc::SIGNATURE);
    assert_eq!(image[36], spc::VERSION);

    let mut loaded = Smp::new(Collect::default(), &config);
    loaded.load_spc(&image).unwrap();
    assert_eq!(loaded.spc.pc, smp.spc.pc);
    assert_eq!(loaded.spc.ram()[..0xf0], smp.spc.ram()[..0xf0]);
    assert!(!loaded.spc.is_rom_mapped());
    assert_eq!(loaded.spc.dsp().keyed_voices(), 0x01);
    assert_ne!(loaded.spc.dsp().voice(0).state, EnvState::Silent);
    assert_eq!(loaded.spc.dsp().echo_enable, 0x01);
    loaded.run_cycles(50_000);
    loaded.flush_partial();
    assert!(loaded.backend.signed.iter().any(|&s| s != 0));

    assert_eq!(
        loaded.load_spc(&image[..0x1000]),
        Err(SpcError::Truncated { len: 0x1000 })
    );
    let mut bad = image.clone();
    bad[0] = b'X';
    assert_eq!(loaded.load_spc(&bad), Err(SpcError::BadSignature));
}

#[test]
fn armed_dump_captures_the_key_on() {
    let config = Config::default();
    let mut smp = Smp::new(Dummy, &config);
    smp.spc.mem[0x400..0x408].copy_from_slice(&[
        0x8f, 0x4c, 0xf2, // MOV $f2,#$4c
        0x8f, 0x01, 0xf3, // MOV $f3,#$01
        0x2f, 0xfe,
    ]);
    smp.spc.pc = 0x400;
    smp.arm_spc_dump();
    smp.run_cycles(40);
    let dump = smp.take_spc_dump().unwrap();
    assert_eq!(dump[0x100 + 0x10000 + usize::from(global::KON)], 0x01);
    assert_eq!(u16::from_le_bytes([dump[0x25], dump[0x26]]), 0x406);
    assert!(smp.take_spc_dump().is_none());
}

#[test]
fn eight_bit_output_is_offset() {
    let config = Config {
        sound: SoundConfig {
            sixteen_bit: false,
            block_frames: 64,
            ..Default::default()
        },
        ..Default::default()
    };
    let mut smp = Smp::new(Collect::default(), &config);
    smp.run_cycles(32 * 200);
    // muted after reset
    assert_eq!(smp.backend.blocks, 3);
    assert_eq!(smp.backend.unsigned.len(), 3 * 64 * 2);
    assert!(smp.backend.unsigned.iter().all(|&s| s == 0x80));
    assert!(smp.backend.signed.is_empty());
    smp.flush_partial();
    assert_eq!(smp.backend.unsigned.len(), 200 * 2);
}
