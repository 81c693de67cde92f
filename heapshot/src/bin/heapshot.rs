//! Inspect heap snapshots recorded by the Mono log profiler.
//!
//! Snapshots are numbered from 1 in the order their heap walks ended; most
//! commands default to the last one.
//!
//! # Usage
//!
//! ```bash
//! heapshot summary app.mlpd
//! heapshot tree app.mlpd System.String --inverse --depth 4
//! heapshot roots app.mlpd MyApp.Leaky -s 2
//! heapshot diff app.mlpd 1 3 -o growth.ndjson
//! heapshot graph app.mlpd | dot -Tsvg > heap.svg
//! heapshot trigger app.mlpd --timeout 30
//! ```

use clap::{Parser, Subcommand};
use heapshot::progress::{CancelFlag, StderrProgress};
use heapshot::report::{self, HeapGrowth};
use heapshot::roots;
use heapshot::{HeapShotError, HeapSnapshot, LogReader};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "heapshot")]
#[command(about = "Inspect heap snapshots from Mono log profiler logs")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the snapshots of a log and the types of one of them
    Summary {
        /// Log file written by the Mono log profiler
        log: PathBuf,

        /// Snapshot number (defaults to the last one)
        #[arg(short, long)]
        snapshot: Option<usize>,

        /// Plain text instead of NDJSON
        #[arg(long)]
        text: bool,

        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the reference tree of a type
    Tree {
        log: PathBuf,

        /// Fully qualified type name
        type_name: String,

        /// Follow references backwards, towards the objects holding the type
        #[arg(short, long)]
        inverse: bool,

        /// Levels to print below the root
        #[arg(short, long, default_value = "3")]
        depth: usize,

        #[arg(short, long)]
        snapshot: Option<usize>,

        /// NDJSON instead of an indented text tree
        #[arg(long)]
        json: bool,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Shortest reference paths from the instances of a type to GC roots
    Roots {
        log: PathBuf,

        type_name: String,

        #[arg(short, long, default_value = "8")]
        depth: usize,

        #[arg(short, long)]
        snapshot: Option<usize>,

        /// Graphviz DOT graph of the paths instead of a text tree
        #[arg(long)]
        dot: bool,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Types that grew between two snapshots
    Diff {
        log: PathBuf,

        /// Snapshot number to compare
        older: usize,

        /// Other snapshot number; the earlier of the two is the baseline
        newer: usize,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Graphviz DOT graph of every type-level reference in a snapshot
    Graph {
        log: PathBuf,

        #[arg(short, long)]
        snapshot: Option<usize>,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Ask the running profiler to walk the heap and wait for the snapshot
    Trigger {
        log: PathBuf,

        /// Seconds to wait for the snapshot to appear in the log
        #[arg(short, long, default_value = "60")]
        timeout: u64,
    },
}

fn open_output(path: Option<&Path>) -> io::Result<Box<dyn Write>> {
    Ok(match path {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(BufWriter::new(io::stdout())),
    })
}

fn load(path: &Path, cancel: &CancelFlag) -> Result<LogReader, Box<dyn std::error::Error>> {
    eprintln!("Loading: {}", path.display());
    let mut reader = LogReader::open(path)?;
    let outcome = reader.read(&StderrProgress::new(cancel.clone()))?;
    if outcome.cancelled {
        return Err(HeapShotError::Cancelled.into());
    }
    eprintln!(
        "  {} buffers, {} snapshots",
        outcome.buffers,
        reader.snapshots().len()
    );
    Ok(reader)
}

/// Snapshot by its 1-based number, or the last one.
fn pick(reader: &LogReader, number: Option<usize>) -> Result<&HeapSnapshot, Box<dyn std::error::Error>> {
    let index = match number {
        Some(n) => n.checked_sub(1).ok_or(HeapShotError::SnapshotNotFound(n))?,
        None => match reader.snapshots().len() {
            0 => return Err(format!("no heap snapshots in {}", reader.path().display()).into()),
            n => n - 1,
        },
    };
    Ok(reader.snapshot(index)?)
}

fn run(args: Args, cancel: CancelFlag) -> Result<(), Box<dyn std::error::Error>> {
    match args.command {
        Command::Summary {
            log,
            snapshot,
            text,
            output,
        } => {
            let reader = load(&log, &cancel)?;
            for s in reader.snapshots() {
                eprintln!(
                    "  snapshot {}: {} objects, {} bytes",
                    s.name(),
                    s.num_objects(),
                    s.total_memory()
                );
            }
            let s = pick(&reader, snapshot)?;
            let mut out = open_output(output.as_deref())?;
            if text {
                report::write_summary_text(s, &mut out)?;
            } else {
                report::write_summary_ndjson(s, &mut out)?;
            }
            out.flush()?;
        }

        Command::Tree {
            log,
            type_name,
            inverse,
            depth,
            snapshot,
            json,
            output,
        } => {
            let reader = load(&log, &cancel)?;
            let s = pick(&reader, snapshot)?;
            let mut tree = s.reference_tree(&type_name, inverse)?;
            let mut out = open_output(output.as_deref())?;
            if json {
                report::write_tree_ndjson(&mut out, &mut tree, inverse, depth)?;
            } else {
                report::write_tree(&mut out, &mut tree, depth)?;
            }
            out.flush()?;
        }

        Command::Roots {
            log,
            type_name,
            depth,
            snapshot,
            dot,
            output,
        } => {
            let reader = load(&log, &cancel)?;
            let s = pick(&reader, snapshot)?;
            let progress = StderrProgress::new(cancel.clone());
            let mut out = open_output(output.as_deref())?;
            if dot {
                let type_index = s
                    .type_from_name(&type_name)
                    .ok_or_else(|| HeapShotError::TypeNotFound(type_name.clone()))?;
                let paths = roots::find_root_paths(s, type_index, &progress)?;
                eprintln!("  {} objects on root paths", paths.object_count());
                paths.create_graph(s).write_dot(&mut out)?;
            } else {
                let mut tree = s.root_reference_tree(&type_name, &progress)?;
                report::write_tree(&mut out, &mut tree, depth)?;
            }
            out.flush()?;
        }

        Command::Diff {
            log,
            older,
            newer,
            output,
        } => {
            let reader = load(&log, &cancel)?;
            let a = pick(&reader, Some(older))?;
            let b = pick(&reader, Some(newer))?;

            eprintln!("Computing diff...");
            let growth = HeapGrowth::compute(a, b);
            eprintln!("Found {} growing types", growth.type_growth.len());

            match output {
                Some(path) => {
                    let writer = BufWriter::new(File::create(&path)?);
                    growth.write_ndjson(writer)?;
                    eprintln!("Wrote diff to {}", path.display());
                }
                None => {
                    growth.write_ndjson(io::stdout())?;
                }
            }
        }

        Command::Graph {
            log,
            snapshot,
            output,
        } => {
            let reader = load(&log, &cancel)?;
            let s = pick(&reader, snapshot)?;
            let graph = s.create_graph();
            eprintln!(
                "  {} types, {} edges",
                graph.nodes().len(),
                graph.edges().len()
            );
            let mut out = open_output(output.as_deref())?;
            graph.write_dot(&mut out)?;
            out.flush()?;
        }

        Command::Trigger { log, timeout } => {
            let mut reader = load(&log, &cancel)?;
            let port = reader.port();
            if port == 0 {
                return Err("the profiler did not open a command port".into());
            }
            eprintln!("Requesting heap walk on port {}", port);
            LogReader::force_snapshot(port)?;
            if reader.wait_for_snapshot(Duration::from_secs(timeout))? {
                let s = pick(&reader, None)?;
                eprintln!(
                    "Snapshot {}: {} objects, {} bytes",
                    s.name(),
                    s.num_objects(),
                    s.total_memory()
                );
            } else {
                return Err(format!("no snapshot within {} seconds", timeout).into());
            }
        }
    }

    Ok(())
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

    let cancel = CancelFlag::new();
    let handler_flag = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || handler_flag.cancel()) {
        tracing::warn!(error = %e, "could not install Ctrl-C handler");
    }

    match run(args, cancel) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
