#![forbid(unsafe_code)]

//! Command-line front end: downloads a Google Drive video and re-encodes it
//! into a streaming-friendly MP4.
//!
//! With a link argument it runs once and exits non-zero on failure. Without
//! one it keeps prompting for links until stdin closes, running the whole
//! pipeline again for every line.

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use drive_reencode::config::{SettingsOverrides, resolve_settings};
use drive_reencode::logging::init_tracing;
use drive_reencode::pipeline::{Level, Pipeline, RunReport};
use drive_reencode::transcode::ensure_encoder_available;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::warn;

const PROMPT: &str = "Enter Google Drive Video Link: ";

/// Download a Google Drive video and re-encode it for streaming playback
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Google Drive share link. Omit to read links from stdin, one per line.
    link: Option<String>,

    /// Move the re-encoded file here instead of leaving it in the temp directory
    #[arg(short, long, value_name = "PATH", requires = "link")]
    output: Option<PathBuf>,

    /// ffmpeg binary to run (default: ffmpeg from PATH)
    #[arg(long, value_name = "PATH")]
    ffmpeg: Option<PathBuf>,

    /// Directory for the downloaded and re-encoded files
    #[arg(long, value_name = "DIR")]
    temp_dir: Option<PathBuf>,

    /// Refuse downloads larger than this many bytes (default: 5GB)
    #[arg(long, value_name = "BYTES")]
    max_bytes: Option<u64>,

    /// Keep the downloaded source next to the re-encoded file
    #[arg(long)]
    keep_download: bool,

    /// Settings file (default: ./.env)
    #[arg(long, value_name = "PATH")]
    env_file: Option<PathBuf>,

    /// Increase logging verbosity (-v = debug, -vv = trace). RUST_LOG wins.
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

impl Args {
    fn overrides(&self) -> SettingsOverrides {
        SettingsOverrides {
            ffmpeg: self.ffmpeg.clone(),
            temp_dir: self.temp_dir.clone(),
            max_bytes: self.max_bytes,
            keep_download: self.keep_download.then_some(true),
            env_path: self.env_file.clone(),
            ..SettingsOverrides::default()
        }
    }
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let settings = resolve_settings(args.overrides()).context("loading settings")?;
    let pipeline = Pipeline::from_settings(&settings);

    if let Err(err) = ensure_encoder_available(pipeline.transcoder().program()) {
        warn!("{err:#}");
    }

    match args.link.as_deref() {
        Some(link) => {
            let ok = process(&pipeline, link, args.output.as_deref());
            Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
        }
        None => {
            prompt_loop(&pipeline, io::stdin().lock())?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Reads one link per line until EOF. Blank lines are skipped.
fn prompt_loop(pipeline: &Pipeline, input: impl BufRead) -> Result<()> {
    let mut stdout = io::stdout();
    write!(stdout, "{PROMPT}")?;
    stdout.flush()?;
    for line in input.lines() {
        let line = line.context("reading link from stdin")?;
        let link = line.trim();
        if !link.is_empty() {
            process(pipeline, link, None);
            println!();
        }
        write!(stdout, "{PROMPT}")?;
        stdout.flush()?;
    }
    println!();
    Ok(())
}

/// Runs the pipeline once and prints the outcome. Returns whether it succeeded.
fn process(pipeline: &Pipeline, link: &str, destination: Option<&Path>) -> bool {
    let report = pipeline.process(link, destination);
    print_report(&report);
    report.success
}

fn print_report(report: &RunReport) {
    for notice in &report.messages {
        match notice.level {
            Level::Success => println!("{}", notice.text),
            Level::Error => eprintln!("Error: {}", notice.text),
        }
    }
    if let Some(path) = &report.output {
        println!("Output: {}", path.display());
    }
}

#[cfg(test)]
#[allow(dead_code)]
#[path = "../test_support.rs"]
mod test_support;
