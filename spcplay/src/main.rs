mod config;

use clap::{CommandFactory, ErrorKind, Parser};
use sfcore::{backend::Dummy, smp::Smp, timing::APU_CLOCK_HZ, AudioBackend, PcmBlock, SoundConfig};
use std::{
    fs::File,
    io::BufWriter,
    path::{Path, PathBuf},
};

#[derive(Parser, Clone)]
#[clap(version = clap::crate_version!(), about = "Render an SPC sound file to WAV")]
struct Options {
    #[clap(parse(from_os_str))]
    input: PathBuf,
    /// Output file, the input with a `.wav` extension by default
    #[clap(short, long, parse(from_os_str))]
    output: Option<PathBuf>,
    /// Render without writing any output
    #[clap(long, conflicts_with = "output")]
    null: bool,
    #[clap(short, long, parse(from_os_str))]
    config: Option<PathBuf>,
    /// Playback rate in Hz
    #[clap(long)]
    rate: Option<u32>,
    #[clap(long)]
    mono: bool,
    /// Unsigned 8-bit samples
    #[clap(long)]
    eight_bit: bool,
    #[clap(long)]
    no_interpolation: bool,
    #[clap(long)]
    no_echo: bool,
    #[clap(short, long)]
    seconds: Option<f64>,
    /// Only voices with a set bit are heard
    #[clap(long)]
    channel_mask: Option<u8>,
    /// Write the state of the audio unit after rendering as a new SPC image
    #[clap(long, parse(from_os_str))]
    save_spc: Option<PathBuf>,
    #[clap(short, long, parse(from_occurrences))]
    verbose: u8,
}

fn error<E: std::fmt::Display>(kind: ErrorKind, val: E) -> ! {
    Options::command().error(kind, val).exit()
}

impl Options {
    fn apply(&self, sound: &mut SoundConfig) {
        if let Some(rate) = self.rate {
            if !(8000..=48000).contains(&rate) {
                error(
                    ErrorKind::InvalidValue,
                    format_args!("playback rate {} outside 8000..=48000", rate),
                )
            }
            sound.playback_rate = rate
        }
        if let Some(mask) = self.channel_mask {
            sound.channel_mask = mask
        }
        sound.stereo &= !self.mono;
        sound.sixteen_bit &= !self.eight_bit;
        sound.interpolate &= !self.no_interpolation;
        sound.echo &= !self.no_echo;
    }
}

/// Streams every block the audio unit delivers into a WAV file
struct WavBackend {
    writer: hound::WavWriter<BufWriter<File>>,
    error: Option<hound::Error>,
    frames: u64,
    channels: u64,
}

impl WavBackend {
    fn create(path: &Path, sound: &SoundConfig) -> Result<Self, hound::Error> {
        let spec = hound::WavSpec {
            channels: sound.channels() as u16,
            sample_rate: sound.playback_rate,
            bits_per_sample: if sound.sixteen_bit { 16 } else { 8 },
            sample_format: hound::SampleFormat::Int,
        };
        Ok(Self {
            writer: hound::WavWriter::create(path, spec)?,
            error: None,
            frames: 0,
            channels: sound.channels() as u64,
        })
    }

    fn write_block(&mut self, block: PcmBlock<'_>) -> Result<(), hound::Error> {
        match block {
            PcmBlock::Signed16(samples) => {
                for &s in samples {
                    self.writer.write_sample(s)?
                }
            }
            // hound takes 8-bit samples signed and stores them with the
            // unsigned offset
            PcmBlock::Unsigned8(samples) => {
                for &s in samples {
                    self.writer.write_sample((i16::from(s) - 128) as i8)?
                }
            }
        }
        self.frames += block.len() as u64 / self.channels;
        Ok(())
    }

    fn finish(self) -> Result<u64, hound::Error> {
        if let Some(err) = self.error {
            return Err(err);
        }
        self.writer.finalize()?;
        Ok(self.frames)
    }
}

impl AudioBackend for WavBackend {
    fn push_block(&mut self, block: PcmBlock<'_>) {
        if self.error.is_none() {
            if let Err(err) = self.write_block(block) {
                log::error!("failed writing samples: {}", err);
                self.error = Some(err)
            }
        }
    }
}

fn main() {
    let options = Options::parse();
    let level = match options.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let mut config = config::Config::load(options.config.clone()).unwrap_or_else(|err| {
        error(
            ErrorKind::InvalidValue,
            format_args!("Failure while loading the config file ({})\n", err),
        )
    });
    options.apply(&mut config.sound);
    let seconds = options.seconds.unwrap_or(config.seconds);
    if !(seconds.is_finite() && seconds > 0.0) {
        error(
            ErrorKind::InvalidValue,
            format_args!("track length {} is not a positive number of seconds", seconds),
        )
    }

    let image = std::fs::read(&options.input).unwrap_or_else(|err| {
        error(
            ErrorKind::Io,
            format_args!(
                "Could not read file \"{}\" ({})\n",
                options.input.display(),
                err
            ),
        )
    });
    let core_config = sfcore::Config {
        region: config.region,
        sound: config.sound.clone(),
        ..Default::default()
    };
    let total = (seconds * f64::from(APU_CLOCK_HZ)) as u64;
    if options.null {
        let mut smp = Smp::new(Dummy, &core_config);
        render(&mut smp, &options, &image, total, |_| false);
        return;
    }

    let output = options
        .output
        .clone()
        .unwrap_or_else(|| options.input.with_extension("wav"));
    let backend = WavBackend::create(&output, &config.sound).unwrap_or_else(|err| {
        error(
            ErrorKind::Io,
            format_args!("Could not create \"{}\" ({})\n", output.display(), err),
        )
    });
    let mut smp = Smp::new(backend, &core_config);
    render(&mut smp, &options, &image, total, |wav| wav.error.is_some());
    match smp.backend.finish() {
        Ok(frames) => log::info!("wrote {} frames to \"{}\"", frames, output.display()),
        Err(err) => error(
            ErrorKind::Io,
            format_args!("Could not write \"{}\" ({})\n", output.display(), err),
        ),
    }
}

/// Load the image and run the audio unit for `total` APU cycles
fn render<B: AudioBackend>(
    smp: &mut Smp<B>,
    options: &Options,
    image: &[u8],
    total: u64,
    failed: impl Fn(&B) -> bool,
) {
    smp.load_spc(image).unwrap_or_else(|err| {
        error(
            ErrorKind::InvalidValue,
            format_args!(
                "Failure while reading SPC file \"{}\" ({})\n",
                options.input.display(),
                err
            ),
        )
    });

    let slice = u64::from(APU_CLOCK_HZ / 100);
    let mut done = 0;
    while done < total && !failed(&smp.backend) {
        let cycles = slice.min(total - done);
        smp.run_cycles(cycles as u32);
        done += cycles;
    }
    smp.flush_partial();

    if let Some(path) = &options.save_spc {
        if let Err(err) = std::fs::write(path, smp.save_spc()) {
            error(
                ErrorKind::Io,
                format_args!("Could not write \"{}\" ({})\n", path.display(), err),
            )
        }
    }
}
