//! `standby daemon`: run the daemon in the foreground or talk to it.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use serde_json::Value;
use tabled::{settings::Style, Table, Tabled};

use standby_daemon::{request_stats, request_status, request_terminate, start_blocking, DaemonError};

use super::ConnectArgs;

#[derive(Subcommand, Debug)]
pub enum DaemonCommand {
    /// Run the daemon in the foreground until terminated.
    Start(ConnectArgs),
    /// Query daemon status.
    Status(ConnectArgs),
    /// Show restore counters and recent restores.
    Stats(StatsArgs),
    /// Ask the daemon to shut down.
    Stop(ConnectArgs),
    /// Print recent lines of the daemon log file.
    Logs(DaemonLogsArgs),
}

#[derive(Args, Debug)]
pub struct StatsArgs {
    #[command(flatten)]
    pub connect: ConnectArgs,

    /// Emit the raw JSON reply.
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct DaemonLogsArgs {
    #[command(flatten)]
    pub connect: ConnectArgs,

    /// Number of trailing lines to show.
    #[arg(long, default_value_t = 100)]
    pub lines: usize,
}

pub fn run(command: DaemonCommand) -> Result<()> {
    match command {
        DaemonCommand::Start(connect) => {
            let path = connect.config_path()?;
            start_blocking(&path).context("daemon exited with error")?;
        }
        DaemonCommand::Status(connect) => {
            let addr = connect.address()?;
            match request_status(&addr) {
                Ok(status) => print_json(&status)?,
                Err(DaemonError::DaemonNotRunning { .. }) => {
                    print_json(&serde_json::json!({ "running": false, "addr": addr }))?;
                }
                Err(err) => return Err(err).context("failed to query daemon status"),
            }
        }
        DaemonCommand::Stats(args) => {
            let addr = args.connect.address()?;
            let stats = request_stats(&addr).context("failed to query daemon stats")?;
            if args.json {
                print_json(&stats)?;
            } else {
                print_stats(&stats);
            }
        }
        DaemonCommand::Stop(connect) => {
            let addr = connect.address()?;
            match request_terminate(&addr) {
                Ok(()) => println!("daemon stop requested"),
                Err(DaemonError::DaemonNotRunning { .. }) => println!("daemon is not running"),
                Err(err) => return Err(err).context("failed to stop daemon"),
            }
        }
        DaemonCommand::Logs(args) => {
            let config = args.connect.load_config()?;
            match config.log_file {
                Some(path) => print_tail(&path, args.lines)
                    .with_context(|| format!("failed to read {}", path.display()))?,
                None => println!("no logFile configured; the daemon logs to stderr"),
            }
        }
    }

    Ok(())
}

fn print_json(value: &Value) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("failed to render daemon reply")?
    );
    Ok(())
}

#[derive(Tabled)]
struct RestoreRow {
    #[tabled(rename = "at")]
    at: String,
    #[tabled(rename = "mode")]
    mode: String,
    #[tabled(rename = "full from")]
    full_source: String,
    #[tabled(rename = "backup")]
    backup: String,
    #[tabled(rename = "result")]
    result: String,
}

fn print_stats(stats: &Value) {
    let counter = |key: &str| stats[key].as_u64().unwrap_or(0);
    println!(
        "{} reports, {} ignored, {} skipped",
        counter("count"),
        counter("ignored"),
        counter("skipped")
    );
    let failed = counter("failed_restores");
    let failed_text = if failed == 0 {
        "0 failed".green()
    } else {
        format!("{failed} failed").red()
    };
    println!("{} restores, {}", counter("restores"), failed_text);

    let rows: Vec<RestoreRow> = stats["history"]
        .as_array()
        .map(|history| history.iter().map(restore_row).collect())
        .unwrap_or_default();
    if rows.is_empty() {
        println!("no restores yet");
        return;
    }
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
}

fn restore_row(record: &Value) -> RestoreRow {
    let text = |key: &str| record[key].as_str().unwrap_or("-").to_string();
    let backup = match record["diff"].as_str() {
        Some(diff) => diff.to_string(),
        None => text("full"),
    };
    let result = if record["success"].as_bool().unwrap_or(false) {
        "ok".green().to_string()
    } else if let Some(error) = record["error"].as_str() {
        error.red().to_string()
    } else {
        match record["exit_code"].as_i64() {
            Some(code) => format!("exit {code}").red().to_string(),
            None => "killed".red().to_string(),
        }
    };
    RestoreRow {
        at: text("at"),
        mode: text("mode"),
        full_source: text("full_source"),
        backup,
        result,
    }
}

fn print_tail(path: &Path, lines: usize) -> Result<()> {
    if !path.exists() {
        println!("log file not found: {}", path.display());
        return Ok(());
    }

    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut tail = VecDeque::<String>::with_capacity(lines);
    for line in BufReader::new(file).lines() {
        let line = line.with_context(|| format!("read {}", path.display()))?;
        tail.push_back(line);
        if tail.len() > lines {
            tail.pop_front();
        }
    }

    println!("==> {} <==", path.display());
    for line in tail {
        println!("{line}");
    }
    Ok(())
}
