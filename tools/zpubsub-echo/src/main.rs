// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! zpubsub-echo - Print events from zpubsub publishers as they arrive
//!
//! Subscribes to one or more event ids, either on an explicit publisher
//! endpoint or on every publisher discovered in a session.

use chrono::Local;
use clap::Parser;
use colored::*;
use std::io::{self, IsTerminal, Write};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use zpubsub::{Error, EventId, Session, Subscriber};

const POLL_SLICE: Duration = Duration::from_millis(100);

/// Print zpubsub events in real-time
#[derive(Parser, Debug)]
#[command(name = "zpubsub-echo")]
#[command(version)]
#[command(about = "Print zpubsub events as they arrive")]
struct Args {
    /// Event ids (32 hex digits or 0x-prefixed) or schema names
    #[arg(required = true)]
    events: Vec<String>,

    /// Connect to this publisher instead of using discovery
    #[arg(short, long)]
    uri: Option<String>,

    /// Discovery session (default: $ZPUBSUB_SESSION, then the OS user)
    #[arg(short, long, conflicts_with = "uri")]
    session: Option<String>,

    /// Maximum number of events to print (0 = unlimited)
    #[arg(short = 'n', long, default_value = "0")]
    count: u64,

    /// Output format: pretty, hex, text, raw
    #[arg(short, long, default_value = "pretty")]
    format: OutputFormat,

    /// Stop after this many milliseconds (0 = run until Ctrl+C)
    #[arg(short, long, default_value = "0")]
    timeout_ms: u64,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    /// Quiet mode - only output data, no headers
    #[arg(short = 'q', long)]
    quiet: bool,
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum OutputFormat {
    Pretty,
    Hex,
    Text,
    Raw,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" | "p" => Ok(OutputFormat::Pretty),
            "hex" | "h" => Ok(OutputFormat::Hex),
            "text" | "t" => Ok(OutputFormat::Text),
            "raw" | "r" => Ok(OutputFormat::Raw),
            _ => Err(format!("Unknown format: {}", s)),
        }
    }
}

/// Event selected on the command line.
#[derive(Clone, Debug)]
struct Target {
    label: String,
    id: EventId,
}

impl Target {
    fn parse(arg: &str) -> Self {
        let looks_hex = arg.starts_with("0x")
            || arg.starts_with("0X")
            || (arg.len() == 32 && arg.chars().all(|c| c.is_ascii_hexdigit()));
        let id = if looks_hex {
            EventId::from_str(arg).ok()
        } else {
            None
        };
        match id {
            Some(id) => Self {
                label: id.to_string(),
                id,
            },
            None => Self {
                label: arg.to_string(),
                id: EventId::from_name(arg),
            },
        }
    }
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    if args.no_color || !io::stdout().is_terminal() {
        colored::control::set_override(false);
    }

    if let Err(e) = run_echo(&args) {
        eprintln!("{}: {}", "Error".red().bold(), e);
        std::process::exit(1);
    }
}

fn run_echo(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    let targets: Vec<Target> = args.events.iter().map(|e| Target::parse(e)).collect();

    let subscriber = match (&args.uri, &args.session) {
        (Some(uri), _) => Subscriber::builder().uri(uri).build()?,
        (None, Some(session)) => Subscriber::builder().session(session.as_str()).build()?,
        (None, None) => Subscriber::builder().session(Session::Default).build()?,
    };

    if !args.quiet {
        print_header(args, &targets, &subscriber);
    }

    let printed = Arc::new(AtomicU64::new(0));
    let max_events = args.count;
    for target in &targets {
        let printed = Arc::clone(&printed);
        let label = target.label.clone();
        let format = args.format;
        subscriber.subscribe(target.id, move |payload| {
            let seq = printed.fetch_add(1, Ordering::SeqCst) + 1;
            if max_events > 0 && seq > max_events {
                return;
            }
            print_event(&label, payload, format, seq);
            let _ = io::stdout().flush();
        });
    }

    let deadline =
        (args.timeout_ms > 0).then(|| Instant::now() + Duration::from_millis(args.timeout_ms));

    while running.load(Ordering::SeqCst) {
        if max_events > 0 && printed.load(Ordering::SeqCst) >= max_events {
            break;
        }
        let slice = match deadline {
            Some(deadline) => {
                let left = deadline.saturating_duration_since(Instant::now());
                if left.is_zero() {
                    break;
                }
                left.min(POLL_SLICE)
            }
            None => POLL_SLICE,
        };
        if let Err(e) = subscriber.receive(slice) {
            check_receive_error(e, args.quiet)?;
        }
    }

    if !args.quiet {
        let total = printed.load(Ordering::SeqCst);
        let total = if max_events > 0 { total.min(max_events) } else { total };
        eprintln!("\n{} Received {} event(s)", "---".dimmed(), total);
    }

    Ok(())
}

/// A failed wait is fatal; a message that cannot be dispatched is only
/// reported.
fn check_receive_error(err: Error, quiet: bool) -> Result<(), Error> {
    match err {
        Error::Poll(_) => Err(err),
        other => {
            if !quiet {
                eprintln!("{}: {}", "Warning".yellow(), other);
            }
            Ok(())
        }
    }
}

fn print_header(args: &Args, targets: &[Target], subscriber: &Subscriber) {
    let source = match (&args.uri, subscriber.session()) {
        (Some(uri), _) => format!("uri={}", uri),
        (None, Some(session)) => format!("session={}", session),
        (None, None) => "no discovery".to_string(),
    };
    for target in targets {
        eprintln!(
            "{} {} {} ({})",
            ">>>".green().bold(),
            "Subscribing to".bold(),
            target.label.cyan(),
            target.id.to_string().dimmed()
        );
    }
    eprintln!("    {} format={:?}", source, args.format);
    eprintln!("{}", "Press Ctrl+C to stop".dimmed());
    eprintln!();
}

fn print_event(label: &str, payload: &[u8], format: OutputFormat, seq: u64) {
    let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S%.3f").to_string();

    match format {
        OutputFormat::Pretty => {
            println!(
                "{} {} {} ({} bytes)",
                format!("[{}]", timestamp).dimmed(),
                format!("#{}", seq).yellow(),
                label.cyan(),
                payload.len()
            );
            print_preview(payload);
            println!();
        }
        OutputFormat::Hex => {
            println!(
                "{} #{} {} ({} bytes)",
                format!("[{}]", timestamp).dimmed(),
                seq,
                label,
                payload.len()
            );
            print_hex_dump(payload);
            println!();
        }
        OutputFormat::Text => {
            println!("{}", String::from_utf8_lossy(payload));
        }
        OutputFormat::Raw => {
            let mut stdout = io::stdout().lock();
            let _ = stdout.write_all(payload);
        }
    }
}

fn print_preview(payload: &[u8]) {
    if payload.is_empty() {
        println!("  {}", "(empty)".dimmed());
        return;
    }

    if let Ok(text) = std::str::from_utf8(payload) {
        if text
            .chars()
            .all(|c| !c.is_control() || c.is_ascii_whitespace())
        {
            println!("  {}: {}", "text".cyan(), text.green());
            return;
        }
    }

    let preview: String = payload
        .iter()
        .take(16)
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ");
    let suffix = if payload.len() > 16 { " ..." } else { "" };
    println!("  {}: {}{}", "bytes".cyan(), preview, suffix);
}

fn print_hex_dump(data: &[u8]) {
    for (i, chunk) in data.chunks(16).enumerate() {
        let mut line = format!("  {:04x}  ", i * 16);
        for j in 0..16 {
            if j == 8 {
                line.push(' ');
            }
            match chunk.get(j) {
                Some(byte) => line.push_str(&format!("{:02x} ", byte)),
                None => line.push_str("   "),
            }
        }
        let ascii: String = chunk
            .iter()
            .map(|&b| if (0x20..0x7f).contains(&b) { b as char } else { '.' })
            .collect();
        println!("{} |{}|", line, ascii);
    }
}
