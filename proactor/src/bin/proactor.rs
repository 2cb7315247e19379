// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

use std::cell::RefCell;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::rc::Rc;
use std::time::Duration;

use clap::error::ErrorKind;
use clap::Parser;
use log::*;

use proactor::tcp::{TcpClient, TcpDelegate};
use proactor::timer::{TimerHandler, TimerState};
use proactor::{timing, Proactor};

#[derive(Parser)]
struct Cli {
    /// Log level: t|trace|d|debug|i|info|w|warn|e|error|c|critical.
    #[arg(short, long, default_value = "info", value_parser = parse_level)]
    level: LevelFilter,

    /// Write the log to this file instead of stderr.
    #[arg(short, long)]
    file: Option<PathBuf>,
}

fn parse_level(level: &str) -> Result<LevelFilter, String> {
    match level {
        "t" | "trace" => Ok(LevelFilter::Trace),
        "d" | "debug" => Ok(LevelFilter::Debug),
        "i" | "info" => Ok(LevelFilter::Info),
        "w" | "warn" => Ok(LevelFilter::Warn),
        "e" | "error" => Ok(LevelFilter::Error),
        // The facade has no level above error; critical messages are
        // error records tagged "critical:".
        "c" | "critical" => Ok(LevelFilter::Error),
        other => Err(format!("unknown log level '{other}'")),
    }
}

fn setup_logger(args: &Cli) -> std::io::Result<()> {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(args.level);
    builder.format(|sink, record| {
        writeln!(
            sink,
            "[{}] [{:<5}] {}",
            timing::timestamp(),
            record.level(),
            record.args()
        )
    });

    if let Some(path) = &args.file {
        let file = std::fs::File::create(path)?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }

    builder.init();
    Ok(())
}

/// One-second demo timer that just announces itself.
struct TickHandler {
    timer: TimerState,
}

impl TickHandler {
    fn new() -> Self {
        Self {
            timer: TimerState::new("test-timer", Duration::from_secs(1)),
        }
    }
}

impl TimerHandler for TickHandler {
    fn timer(&self) -> &TimerState {
        &self.timer
    }

    fn timer_mut(&mut self) -> &mut TimerState {
        &mut self.timer
    }

    fn on_expire(&mut self, _proactor: &mut Proactor) {
        info!("[{}] timer expired", self.timer.name());
    }
}

/// Logs everything the demo TCP client hears back.
struct EchoLogger {
    tag: String,
}

impl TcpDelegate for EchoLogger {
    fn on_connect(&mut self) {
        info!("[{}] connected", self.tag);
    }

    fn on_receive(&mut self, data: &[u8]) {
        let text = String::from_utf8_lossy(data);
        let text = text.strip_suffix('\n').unwrap_or(&text);
        info!("[{}] rx data: {text}", self.tag);
    }
}

fn main() -> ExitCode {
    let args = match Cli::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            return match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::FAILURE,
            };
        }
    };

    if let Err(e) = setup_logger(&args) {
        eprintln!("could not set up logging: {e}");
        return ExitCode::FAILURE;
    }

    info!("proactor starting");

    let code = match serve() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("proactor failed: {e}");
            ExitCode::FAILURE
        }
    };

    info!("proactor exiting");
    code
}

fn serve() -> Result<(), proactor::Error> {
    let mut proactor = Proactor::new()?;

    let tick = Rc::new(RefCell::new(TickHandler::new()));
    proactor.add_timer_handler(tick);

    let delegate = EchoLogger {
        tag: "127.0.0.1@8080".to_string(),
    };
    let client = Rc::new(RefCell::new(TcpClient::new(
        "127.0.0.1",
        8080,
        Box::new(delegate),
    )));
    proactor.add_tcp_client(client);

    proactor.run()
}
