use std::{sync::Arc, sync::mpsc::channel, thread, time::Duration};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use env_logger::Env;
use midilink::{
    DirectoryWatcher, EndpointId, InputSession, MidiEvent, OutputSession, SysExMessage, Transport,
    backend::MidirTransport,
};

#[derive(Parser)]
#[command(name = "midilink", version, about = "Talk to MIDI endpoints")]
struct Cli {
    /// Client name the OS shows for our ports
    #[arg(long, env = "MIDILINK_CLIENT_NAME", default_value = "midilink")]
    client_name: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List input and output endpoints
    List,
    /// Print everything an input endpoint sends
    Monitor { id: EndpointId },
    /// Play one note
    Note {
        id: EndpointId,
        #[arg(long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..16))]
        channel: u8,
        #[arg(long, default_value_t = 60, value_parser = clap::value_parser!(u8).range(0..128))]
        note: u8,
        #[arg(long, default_value_t = 100, value_parser = clap::value_parser!(u8).range(0..128))]
        velocity: u8,
        #[arg(long, default_value_t = 500)]
        duration_ms: u64,
    },
    /// Send a system-exclusive message given as hex bytes, e.g. `F0 7E 7F 06 01 F7`
    Sysex {
        id: EndpointId,
        #[arg(required = true, value_parser = parse_hex_byte)]
        bytes: Vec<u8>,
    },
    /// All sound / notes off on every channel
    Panic { id: EndpointId },
    /// Report endpoints as they are plugged and unplugged
    Watch {
        #[arg(long, default_value_t = 2000)]
        interval_ms: u64,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let transport = Arc::new(MidirTransport::new(cli.client_name.clone()));

    match cli.command {
        Command::List => {
            let inputs = transport.list_inputs()?;
            let outputs = transport.list_outputs()?;
            println!("Inputs:");
            for (id, name) in inputs {
                println!("  {id}\t{name}");
            }
            println!("Outputs:");
            for (id, name) in outputs {
                println!("  {id}\t{name}");
            }
        }
        Command::Monitor { id } => {
            let (tx, rx) = channel::<MidiEvent>();
            let mut input = InputSession::new(transport, cli.client_name, tx);
            input
                .connect(&id)
                .with_context(|| format!("connect input {id}"))?;
            input.start().with_context(|| format!("start input {id}"))?;

            for event in rx {
                match event {
                    MidiEvent::Channel { message, time } => {
                        println!("{:>12} {message}", time.0)
                    }
                    MidiEvent::SysEx(msg) => println!("{:>12} {:02X?}", "sysex", msg.as_bytes()),
                }
            }
        }
        Command::Note {
            id,
            channel,
            note,
            velocity,
            duration_ms,
        } => {
            let mut output = connect_output(transport, cli.client_name, &id)?;
            output.note_on(channel, note, velocity);
            thread::sleep(Duration::from_millis(duration_ms));
            output.note_off(channel, note);
        }
        Command::Sysex { id, bytes } => {
            if bytes.first() != Some(&0xF0) || bytes.last() != Some(&0xF7) {
                log::warn!("sysex is not framed by F0 .. F7, sending as-is");
            }
            let mut output = connect_output(transport, cli.client_name, &id)?;
            output.send_sysex(&SysExMessage::from_raw(bytes));
        }
        Command::Panic { id } => {
            let mut output = connect_output(transport, cli.client_name, &id)?;
            output.stop_all();
        }
        Command::Watch { interval_ms } => {
            let (tx, rx) = channel();
            let _watcher =
                DirectoryWatcher::start(transport, Duration::from_millis(interval_ms), tx)?;
            for event in rx {
                println!("{event:?}");
            }
        }
    }
    Ok(())
}

// ─────────────────── helpers ─────────────────────────────────────────────────

fn connect_output(
    transport: Arc<MidirTransport>,
    client_name: String,
    id: &EndpointId,
) -> Result<OutputSession<MidirTransport>> {
    let mut output = OutputSession::new(transport, client_name);
    output
        .connect(id)
        .with_context(|| format!("connect output {id}"))?;
    Ok(output)
}

fn parse_hex_byte(s: &str) -> Result<u8> {
    let digits = s.trim_start_matches("0x").trim_start_matches("0X");
    if digits.is_empty() || digits.len() > 2 {
        bail!("{s:?} is not a hex byte");
    }
    u8::from_str_radix(digits, 16).with_context(|| format!("{s:?} is not a hex byte"))
}
