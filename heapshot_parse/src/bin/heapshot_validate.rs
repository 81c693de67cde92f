use clap::Parser;
use heapshot_parse::{ByteCursor, EventFamily, LogBuffer, LogHeader};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;

/// Decode a Mono profiler log and report what it contains.
#[derive(Parser, Debug)]
#[command(name = "heapshot_validate")]
#[command(version, about)]
struct Args {
    /// Log file written by the Mono log profiler
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Dump every event to stdout as NDJSON
    #[arg(long)]
    events: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    let path = args.input.display();

    let file = match File::open(&args.input) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Error opening '{}': {}", path, e);
            return ExitCode::FAILURE;
        }
    };

    let mut cursor = ByteCursor::new(file);
    let header = match LogHeader::read(&mut cursor) {
        Ok(Some(header)) => header,
        Ok(None) => {
            eprintln!("Invalid log '{}': header is incomplete", path);
            return ExitCode::FAILURE;
        }
        Err(e) => {
            eprintln!("Invalid log '{}': {}", path, e);
            return ExitCode::FAILURE;
        }
    };

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    let mut buffers = 0usize;
    let mut counts: BTreeMap<EventFamily, usize> = BTreeMap::new();

    let outcome = 'read: loop {
        match LogBuffer::read(&mut cursor, header.revision()) {
            Ok(Some(buffer)) => {
                buffers += 1;
                for event in &buffer.events {
                    *counts.entry(event.event.family()).or_default() += 1;
                    if args.events {
                        let line = match serde_json::to_string(event) {
                            Ok(line) => line,
                            Err(e) => break 'read Err(e.to_string()),
                        };
                        if let Err(e) = writeln!(out, "{}", line) {
                            break 'read Err(e.to_string());
                        }
                    }
                }
            }
            Ok(None) => break Ok(()),
            Err(e) => break Err(e.to_string()),
        }
    };
    if let Err(e) = out.flush() {
        eprintln!("Error writing events: {}", e);
        return ExitCode::FAILURE;
    }

    let trailing = cursor
        .position()
        .and_then(|pos| Ok(cursor.stream_len()?.saturating_sub(pos)))
        .unwrap_or(0);

    eprintln!("Log: {}", path);
    eprintln!(
        "  Format version: {} ({:?})",
        header.format,
        header.revision()
    );
    eprintln!("  Profiler version: {}.{}", header.major, header.minor);
    eprintln!("  Pid: {}  Port: {}", header.pid, header.port);
    if let Some(arch) = &header.arch {
        eprintln!("  Arch: {}", arch);
    }
    if let Some(os) = &header.os {
        eprintln!("  OS: {}", os);
    }
    eprintln!("  Buffers: {}", buffers);
    for (family, count) in &counts {
        eprintln!("  {:<10} {}", family.name(), count);
    }
    if trailing > 0 {
        eprintln!("  Incomplete trailing data: {} bytes", trailing);
    }

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Invalid log '{}': {}", path, e);
            ExitCode::FAILURE
        }
    }
}
