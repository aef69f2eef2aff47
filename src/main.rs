//! LCR Meter - sound-card component measurement
//!
//! Entry point for the interactive terminal front-end.

use anyhow::Result;
use lcrmeter::audio::channel::CpalChannel;
use lcrmeter::engine::{Engine, EngineEvent, LiveReading};
use lcrmeter::measure::session::{AutoMethod, Mode};
use lcrmeter::AppConfig;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};

/// Interval between printed live readouts
const LIVE_PRINT_INTERVAL: Duration = Duration::from_secs(1);

/// Command line overrides applied on top of the config file
#[derive(Default)]
struct CliOptions {
    config_path: Option<PathBuf>,
    input_device: Option<String>,
    output_device: Option<String>,
    sample_rate: Option<u32>,
    chunk_size: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("lcrmeter=info".parse()?),
        )
        .init();

    println!("╔════════════════════════════════════════════════════════════╗");
    println!(
        "║         LCR Meter v{} - Sound Card Component Meter        ║",
        lcrmeter::VERSION
    );
    println!("╚════════════════════════════════════════════════════════════╝");
    println!();

    let args: Vec<String> = std::env::args().collect();
    let mut options = CliOptions::default();
    let mut i = 1;

    while i < args.len() {
        let value = args.get(i + 1).cloned();
        match args[i].as_str() {
            "--list" | "-l" => {
                list_devices();
                return Ok(());
            }
            "--version" | "-v" => {
                println!("lcrmeter {}", lcrmeter::VERSION);
                return Ok(());
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            "--config" | "-c" => {
                let Some(path) = value else {
                    eprintln!("Error: --config requires a path");
                    return Ok(());
                };
                options.config_path = Some(PathBuf::from(path));
                i += 2;
                continue;
            }
            "--input" | "-i" => {
                let Some(name) = value else {
                    eprintln!("Error: --input requires a device name");
                    return Ok(());
                };
                options.input_device = Some(name);
                i += 2;
                continue;
            }
            "--output" | "-o" => {
                let Some(name) = value else {
                    eprintln!("Error: --output requires a device name");
                    return Ok(());
                };
                options.output_device = Some(name);
                i += 2;
                continue;
            }
            "--sample-rate" | "-r" => {
                options.sample_rate = value.as_deref().and_then(|v| v.parse().ok());
                if options.sample_rate.is_none() {
                    eprintln!("Error: Invalid sample rate: {}", value.unwrap_or_default());
                    return Ok(());
                }
                i += 2;
                continue;
            }
            "--chunk-size" => {
                options.chunk_size = value.as_deref().and_then(|v| v.parse().ok());
                if options.chunk_size.is_none() {
                    eprintln!("Error: Invalid chunk size: {}", value.unwrap_or_default());
                    return Ok(());
                }
                i += 2;
                continue;
            }
            arg => {
                eprintln!("Unknown argument: {}", arg);
                print_help();
                return Ok(());
            }
        }
    }

    let mut config = AppConfig::load(options.config_path.as_deref());
    if options.input_device.is_some() {
        config.input_device = options.input_device;
    }
    if options.output_device.is_some() {
        config.output_device = options.output_device;
    }
    if let Some(rate) = options.sample_rate {
        config.sample_rate = rate;
    }
    if let Some(chunk) = options.chunk_size {
        config.chunk_size = chunk;
    }

    run(config).await
}

fn print_help() {
    println!("Usage: lcrmeter [OPTIONS]");
    println!();
    println!("Options:");
    println!("  -l, --list              List available audio devices");
    println!("  -c, --config PATH       Read settings from a JSON config file");
    println!("  -i, --input NAME        Input (probe) device");
    println!("  -o, --output NAME       Output (generator) device");
    println!("  -r, --sample-rate RATE  Sample rate (default: 44100)");
    println!("      --chunk-size N      Samples per chunk (default: 1024)");
    println!("  -v, --version           Show version");
    println!("  -h, --help              Show this help");
    println!();
    println!("Examples:");
    println!("  lcrmeter -i \"USB Audio CODEC\" -o \"USB Audio CODEC\"");
    println!("  lcrmeter --config lcrmeter.json");
}

fn print_commands() {
    println!("Commands:");
    println!("  gen                 Toggle the signal generator");
    println!("  freq +|-|HZ         Step or set the generator frequency");
    println!("  amp +|-|VALUE       Step or set the generator amplitude");
    println!("  cal VALUE           Set the calibration factor (V at full scale)");
    println!("  r VALUE             Set the known resistor (Ω)");
    println!("  mode r|c|l|auto     Select the measurement mode");
    println!("  method sweep|phase  Select the auto-detect method");
    println!("  m                   Measure / continue to the next step");
    println!("  cancel              Abandon the current measurement");
    println!("  scope +|-           V/Div up or down");
    println!("  wave                Draw the latest waveform");
    println!("  status              Show generator, calibration and session state");
    println!("  help                Show this list");
    println!("  quit                Exit");
}

fn list_devices() {
    println!("Scanning for audio devices...");
    println!();

    match CpalChannel::list_devices() {
        Ok(devices) => {
            if devices.is_empty() {
                println!("No audio devices found.");
            } else {
                println!("Found {} device(s):", devices.len());
                println!();
                for (i, device) in devices.iter().enumerate() {
                    let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
                    println!("  {}. {}{}", i + 1, device.name, default_marker);
                    println!(
                        "     Channels: {} in, {} out",
                        device.input_channels, device.output_channels
                    );
                    if !device.sample_rates.is_empty() {
                        println!("     Sample rates: {:?}", device.sample_rates);
                    }
                    println!();
                }
            }
        }
        Err(e) => {
            error!("Failed to list devices: {}", e);
            println!("Error: {}", e);
        }
    }
}

async fn run(config: AppConfig) -> Result<()> {
    let audio = config.audio_config();
    let (channel, input, output) = match CpalChannel::open(
        audio,
        config.input_device.as_deref(),
        config.output_device.as_deref(),
    ) {
        Ok(opened) => opened,
        Err(e) => {
            error!("Failed to open audio channel: {}", e);
            println!("Error: {}", e);
            println!();
            println!("Use --list to see available devices.");
            return Ok(());
        }
    };

    println!("Input:  {}", channel.input_name());
    println!("Output: {}", channel.output_name());
    println!(
        "Format: {} Hz, mono, 16-bit, {} samples/chunk",
        audio.sample_rate, audio.chunk_size
    );
    println!();

    let mut engine = Engine::from_config(&config, Box::new(input), Box::new(output))?;
    let events = engine.events();

    // Set up Ctrl+C handler
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .ok();

    print_commands();
    println!();
    print_mode(&engine);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut ticker = tokio::time::interval(Duration::from_millis(config.live_poll_ms.max(10)));
    let mut last_live_print = Instant::now();
    let mut last_live: Option<LiveReading> = None;

    while running.load(Ordering::SeqCst) {
        tokio::select! {
            line = lines.next_line() => {
                match line? {
                    Some(line) => {
                        if !handle_command(&mut engine, line.trim(), last_live.as_ref()) {
                            break;
                        }
                    }
                    None => break,
                }
            }
            _ = ticker.tick() => {
                engine.poll();

                match tokio::task::block_in_place(|| engine.live_reading()) {
                    Ok(Some(reading)) => {
                        if last_live_print.elapsed() >= LIVE_PRINT_INTERVAL {
                            println!(
                                "[{}] Freq: {:.1} Hz | Voltage (RMS): {:.4} V",
                                reading.timestamp.format("%H:%M:%S"),
                                reading.frequency,
                                reading.voltage_rms
                            );
                            last_live_print = Instant::now();
                        }
                        last_live = Some(reading);
                    }
                    Ok(None) => {}
                    Err(e) => {
                        error!("Live readout failed: {}", e);
                        break;
                    }
                }
            }
        }

        for event in events.try_iter() {
            print_event(&event);
        }
    }

    println!();
    println!("Stopping...");
    engine.shutdown();
    drop(channel);
    println!("Done.");

    Ok(())
}

fn print_mode(engine: &Engine) {
    let info = engine.mode_info();
    println!("Mode: {} [{}]", info.label, info.unit);
    println!("{}", info.recommendation);
    if engine.mode() == Mode::Auto {
        println!("Auto-detect method: {:?}", engine.method());
    }
}

fn print_event(event: &EngineEvent) {
    match event {
        EngineEvent::StateChanged { state, prompt } => {
            info!("State: {}", state);
            println!(">> {}", prompt);
        }
        EngineEvent::Status(text) => println!("   {}", text),
        EngineEvent::Busy(_) => {}
        EngineEvent::Result(outcome) => println!("== Result: {}", outcome),
    }
}

/// Apply one command line; returns `false` to quit
fn handle_command(engine: &mut Engine, line: &str, last_live: Option<&LiveReading>) -> bool {
    let mut parts = line.split_whitespace();
    let Some(cmd) = parts.next() else {
        return true;
    };
    let arg = parts.next().unwrap_or("");

    match cmd {
        "quit" | "q" | "exit" => return false,
        "help" | "?" => print_commands(),
        "gen" => match engine.toggle_generator() {
            Ok(true) => println!("Signal generator: ON"),
            Ok(false) => println!("Signal generator: OFF"),
            Err(e) => println!("Error: {}", e),
        },
        "freq" => {
            let applied = match arg {
                "+" => engine.step_frequency(true),
                "-" => engine.step_frequency(false),
                value => match value.parse::<f64>() {
                    Ok(hz) => engine.set_frequency(hz),
                    Err(_) => {
                        println!("Usage: freq +|-|HZ");
                        return true;
                    }
                },
            };
            println!("Frequency: {} Hz", applied);
        }
        "amp" => {
            let applied = match arg {
                "+" => engine.step_amplitude(true),
                "-" => engine.step_amplitude(false),
                value => match value.parse::<f64>() {
                    Ok(amp) => engine.set_amplitude(amp),
                    Err(_) => {
                        println!("Usage: amp +|-|VALUE");
                        return true;
                    }
                },
            };
            println!("Amplitude: {:.1}", applied);
        }
        "cal" => match engine.edit_calibration_factor(arg) {
            Ok(v) => println!("Calibration factor: {}", v),
            Err(e) => println!("Error: {}", e),
        },
        "r" => match engine.edit_known_resistor(arg) {
            Ok(v) => println!("Known resistor: {} Ω", v),
            Err(e) => println!("Error: {}", e),
        },
        "mode" => match arg.parse::<Mode>() {
            Ok(mode) => {
                engine.select_mode(mode);
                print_mode(engine);
            }
            Err(e) => println!("Error: {}", e),
        },
        "method" => match arg.parse::<AutoMethod>() {
            Ok(method) => {
                engine.select_method(method);
                println!("Auto-detect method: {:?}", method);
            }
            Err(e) => println!("Error: {}", e),
        },
        "m" | "measure" | "continue" => {
            if let Err(e) = engine.action() {
                info!("Action rejected: {}", e);
            }
        }
        "cancel" => engine.cancel(),
        "scope" => {
            let scope = engine.scope_mut();
            match arg {
                "+" => scope.increase(),
                "-" => scope.decrease(),
                _ => scope.volt_div(),
            };
            println!(
                "V/Div: {:.1} (±{:.0})",
                engine.scope().volt_div(),
                engine.scope().y_limit()
            );
        }
        "wave" => match last_live {
            Some(reading) => {
                for row in engine.scope().render(&reading.waveform, 64, 15) {
                    println!("|{}|", row);
                }
            }
            None => println!("No waveform captured yet."),
        },
        "status" => {
            let generator = engine.generator_state();
            let calibration = engine.calibration();
            println!(
                "Generator: {} | {} Hz | amplitude {:.1}",
                if generator.enabled { "ON" } else { "OFF" },
                generator.frequency,
                generator.amplitude
            );
            println!(
                "Calibration: {} V full scale | R_known {} Ω",
                calibration.calibration_factor(),
                calibration.known_resistor()
            );
            println!(
                "Session: {} {}",
                engine.state(),
                if engine.is_busy() { "(measuring)" } else { "" }
            );
            print_mode(engine);
        }
        other => println!("Unknown command: {} (type 'help')", other),
    }

    true
}
