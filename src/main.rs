use std::env;
use std::path::Path;

use anyhow::{bail, Context, Result};

use fm_sound_server::driver::adlib::ADLIB_GROUP_MASK;
use fm_sound_server::driver::{AdlibPatch, OperatorPatch, ADLIB_DRIVER_NUM};
use fm_sound_server::sound::track::encode_events;
use fm_sound_server::{
    MemoryResources, PatchBank, ResourceKind, SoundConfig, SoundHandle, SoundManager,
    SoundResourceBuilder, TrackEvent, TrackSpec,
};

/// Resource id of the built-in demo tune
const DEMO_SOUND_ID: u32 = 1;
/// Longest render when no duration is given
const MAX_RENDER_SECONDS: u32 = 120;
/// Ticks per quarter note at the 50 Hz server rate
const QUARTER: u32 = 20;

const MELODY: [(u8, u32); 16] = [
    (72, 1),
    (76, 1),
    (79, 1),
    (84, 1),
    (83, 2),
    (79, 2),
    (81, 1),
    (77, 1),
    (74, 1),
    (77, 1),
    (76, 2),
    (72, 2),
    (74, 1),
    (79, 1),
    (77, 1),
    (71, 1),
];

const BASS: [(u8, u32); 8] = [
    (48, 2),
    (43, 2),
    (41, 2),
    (43, 2),
    (45, 2),
    (41, 2),
    (43, 2),
    (43, 2),
];

fn print_usage() {
    eprintln!(
        "Usage:\n  fm-sound-server [--config <file.json>] <command>\n\nCommands:\n  render <out.wav> [seconds]   Render the demo tune to a WAV file\n  play [seconds]               Stream the demo tune to the audio device{}\n  drivers                      List the available sound drivers\n  config                       Print the active configuration as JSON\n\nFlags:\n  --config <file.json>         Load settings from a JSON file\n  -h, --help                   Show this help\n",
        if cfg!(feature = "streaming") {
            ""
        } else {
            " (needs --features streaming)"
        }
    );
}

/// Encode a monophonic line of `(note, quarters)` pairs
fn line(notes: &[(u8, u32)], velocity: u8) -> Vec<u8> {
    let mut events = Vec::with_capacity(notes.len() * 4 + 1);
    for &(note, quarters) in notes {
        let length = quarters * QUARTER;
        events.push(TrackEvent::Note { note, velocity });
        events.push(TrackEvent::Rest(length - 2));
        events.push(TrackEvent::NoteTouch(note));
        events.push(TrackEvent::Rest(2));
    }
    events.push(TrackEvent::End);
    encode_events(&events)
}

fn demo_bank() -> Vec<u8> {
    let organ = OperatorPatch {
        multiplier: 1,
        sustain: true,
        attack: 15,
        decay: 2,
        sustain_level: 2,
        release: 7,
        ..Default::default()
    };
    let lead = AdlibPatch {
        note_lo: 0,
        note_hi: 127,
        note_override: None,
        additive: false,
        modulator: OperatorPatch {
            total_level: 30,
            ..organ
        },
        feedback: 2,
        carrier: organ,
    };
    let bass = AdlibPatch {
        modulator: OperatorPatch {
            multiplier: 0,
            total_level: 18,
            ..organ
        },
        feedback: 5,
        carrier: OperatorPatch {
            decay: 4,
            sustain_level: 6,
            ..organ
        },
        ..lead
    };
    PatchBank::encode(&[vec![lead], vec![bass]])
}

fn demo_resources() -> MemoryResources {
    let mut resources = MemoryResources::new();
    resources.insert(ResourceKind::Bank, ADLIB_DRIVER_NUM, 0, demo_bank());
    SoundResourceBuilder::new(DEMO_SOUND_ID)
        .loop_count(2)
        .group(
            ADLIB_GROUP_MASK,
            vec![
                TrackSpec::channel(0, 1, line(&MELODY, 112)).with_voices(2),
                TrackSpec::channel(1, 1, line(&BASS, 100))
                    .with_program(1)
                    .with_sub_priority(1),
            ],
        )
        .install(&mut resources);
    resources
}

fn start_demo(config: SoundConfig) -> Result<(SoundManager, SoundHandle)> {
    let mut manager = SoundManager::new(demo_resources(), config);
    manager.install_config_drivers()?;
    if !manager.is_installed(ADLIB_DRIVER_NUM) {
        bail!("the Adlib driver (#{}) is not configured", ADLIB_DRIVER_NUM);
    }
    let sound = manager.create_sound();
    manager.play(sound, DEMO_SOUND_ID)?;
    Ok((manager, sound))
}

fn render(config: SoundConfig, out: &Path, seconds: Option<u32>) -> Result<()> {
    let sample_rate = config.sample_rate;
    let limit = seconds.unwrap_or(MAX_RENDER_SECONDS) as usize * sample_rate as usize;
    let (mut manager, sound) = start_demo(config)?;

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(out, spec)
        .with_context(|| format!("failed to create {}", out.display()))?;

    let mut block = vec![0i16; (sample_rate / 50) as usize];
    let mut written = 0;
    while written < limit && (seconds.is_some() || manager.is_playing(sound)) {
        let count = block.len().min(limit - written);
        manager.render(&mut block[..count])?;
        manager.dispatch()?;
        for &sample in &block[..count] {
            writer.write_sample(sample)?;
        }
        written += count;
    }
    writer.finalize().context("failed to finalize WAV file")?;

    println!(
        "Wrote {} samples ({:.2} s at {} Hz) to {}",
        written,
        written as f32 / sample_rate as f32,
        sample_rate,
        out.display()
    );
    Ok(())
}

#[cfg(feature = "streaming")]
fn play(config: SoundConfig, seconds: Option<u32>) -> Result<()> {
    use fm_sound_server::{AudioDevice, RealtimePlayer, StreamConfig};
    use std::time::{Duration, Instant};

    let stream_config = StreamConfig::stable(config.sample_rate);
    let limit = seconds.map(Duration::from_secs);
    let (mut manager, sound) = start_demo(config)?;

    let mut player = RealtimePlayer::new(stream_config)?;
    let device = AudioDevice::new(
        stream_config.sample_rate,
        stream_config.channels,
        player.get_buffer(),
    )?;
    println!(
        "Playing demo tune ({:.1} ms buffer latency)",
        stream_config.latency_ms()
    );

    let block = (stream_config.sample_rate / 50) as usize;
    let start = Instant::now();
    while manager.is_playing(sound) && limit.map_or(true, |l| start.elapsed() < l) {
        player.pump(&mut manager, block)?;
    }
    manager.stop(sound)?;
    while player.fill_percentage() > 0.0 {
        std::thread::sleep(Duration::from_millis(10));
    }
    device.finish();

    let stats = player.get_stats();
    println!("Samples played:    {}", stats.samples_played);
    println!("Overrun events:    {}", stats.overrun_count);
    Ok(())
}

#[cfg(not(feature = "streaming"))]
fn play(_config: SoundConfig, _seconds: Option<u32>) -> Result<()> {
    bail!("playback requires the \"streaming\" feature. Rebuild with `--features streaming`.")
}

fn parse_seconds(arg: Option<String>) -> Result<Option<u32>> {
    arg.map(|s| {
        s.parse::<u32>()
            .with_context(|| format!("invalid duration: {}", s))
    })
    .transpose()
}

fn main() -> Result<()> {
    let mut config_path: Option<String> = None;
    let mut positional = Vec::new();

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--help" | "-h" => {
                print_usage();
                return Ok(());
            }
            "--config" => match args.next() {
                Some(value) => config_path = Some(value),
                None => {
                    print_usage();
                    bail!("--config requires a file argument");
                }
            },
            _ if arg.starts_with("--config=") => {
                config_path = Some(arg["--config=".len()..].to_string());
            }
            _ if arg.starts_with('-') => {
                print_usage();
                bail!("unknown flag: {}", arg);
            }
            _ => positional.push(arg),
        }
    }

    let config = match config_path {
        Some(path) => SoundConfig::load(&path)
            .with_context(|| format!("failed to load configuration from {}", path))?,
        None => SoundConfig::default(),
    };

    let mut positional = positional.into_iter();
    match positional.next().as_deref() {
        Some("render") => {
            let Some(out) = positional.next() else {
                print_usage();
                bail!("render needs an output file");
            };
            let seconds = parse_seconds(positional.next())?;
            render(config, Path::new(&out), seconds)
        }
        Some("play") => {
            let seconds = parse_seconds(positional.next())?;
            play(config, seconds)
        }
        Some("drivers") => {
            let mut manager = SoundManager::new(MemoryResources::new(), config);
            for info in manager.build_driver_list(true) {
                println!("{}", info);
            }
            Ok(())
        }
        Some("config") => {
            println!("{}", config.to_json()?);
            Ok(())
        }
        Some(other) => {
            print_usage();
            bail!("unknown command: {}", other)
        }
        None => {
            print_usage();
            Ok(())
        }
    }
}
