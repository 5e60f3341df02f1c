#![forbid(unsafe_code)]

//! Streaming download of a single Drive file into a temporary `.mp4`.
//!
//! The server's `Content-Length` is checked before anything touches the disk,
//! and the same ceiling is enforced again on the bytes actually written, so a
//! server that lies about the length (or omits it) cannot fill the disk.

use std::fs;
use std::io::{self, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::TempPath;
use thiserror::Error;
use tracing::{debug, info};

/// 5 GiB.
pub const DEFAULT_MAX_BYTES: u64 = 5 * 1024 * 1024 * 1024;
pub const CHUNK_SIZE: usize = 8192;
pub const VIDEO_SUFFIX: &str = ".mp4";

const TEMP_PREFIX: &str = "drive-";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const READ_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("File is too large. The maximum allowed size is {}.", size_label(.limit))]
    TooLarge { declared: u64, limit: u64 },
    #[error(
        "File is too large. Received more than {} before the transfer was stopped.",
        size_label(.limit)
    )]
    LimitExceeded { limit: u64 },
    #[error("Failed to download file: {0}")]
    Status(u16),
    #[error("Failed to download file: {0}")]
    Transport(#[source] Box<ureq::Transport>),
    #[error("Failed to store download: {0}")]
    Io(#[from] io::Error),
}

/// Renders a byte ceiling the way users expect to read it ("5GB").
pub fn size_label(bytes: &u64) -> String {
    const GIB: u64 = 1024 * 1024 * 1024;
    const MIB: u64 = 1024 * 1024;
    match *bytes {
        0 => "0 bytes".to_string(),
        b if b % GIB == 0 => format!("{}GB", b / GIB),
        b if b % MIB == 0 => format!("{}MB", b / MIB),
        b => format!("{b} bytes"),
    }
}

/// Downloaded file on temporary storage. Deleted on drop unless kept.
#[derive(Debug)]
pub struct DownloadedArtifact {
    path: TempPath,
    bytes: u64,
}

impl DownloadedArtifact {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> u64 {
        self.bytes
    }

    pub fn is_empty(&self) -> bool {
        self.bytes == 0
    }

    /// Disarms the cleanup and returns the final location.
    pub fn keep(self) -> io::Result<PathBuf> {
        self.path.keep().map_err(|err| err.error)
    }
}

/// Blocking HTTP downloader with a hard size ceiling.
#[derive(Debug, Clone)]
pub struct Downloader {
    agent: ureq::Agent,
    max_bytes: u64,
    temp_dir: Option<PathBuf>,
}

impl Downloader {
    pub fn new(max_bytes: u64, temp_dir: Option<PathBuf>) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(CONNECT_TIMEOUT)
            .timeout_read(READ_TIMEOUT)
            .build();
        Self {
            agent,
            max_bytes,
            temp_dir,
        }
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// GETs `url` and streams the body into a fresh temporary file.
    pub fn fetch(&self, url: &str) -> Result<DownloadedArtifact, DownloadError> {
        info!(%url, "requesting download");
        let response = match self.agent.get(url).call() {
            Ok(response) => response,
            Err(ureq::Error::Status(code, _)) => return Err(DownloadError::Status(code)),
            Err(ureq::Error::Transport(transport)) => {
                return Err(DownloadError::Transport(Box::new(transport)));
            }
        };

        if response.status() != 200 {
            return Err(DownloadError::Status(response.status()));
        }

        let declared = declared_length(response.header("Content-Length"));
        debug!(declared, "response headers received");
        check_declared(declared, self.max_bytes)?;

        self.store_body(response.into_reader())
    }

    /// Copies `body` to a new temp file in `CHUNK_SIZE` reads.
    pub fn store_body(&self, mut body: impl Read) -> Result<DownloadedArtifact, DownloadError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(TEMP_PREFIX).suffix(VIDEO_SUFFIX);
        let mut file = match &self.temp_dir {
            Some(dir) => {
                fs::create_dir_all(dir)?;
                builder.tempfile_in(dir)?
            }
            None => builder.tempfile()?,
        };

        let mut buffer = [0u8; CHUNK_SIZE];
        let mut written: u64 = 0;
        loop {
            let read = match body.read(&mut buffer) {
                Ok(0) => break,
                Ok(read) => read,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            };
            written += read as u64;
            if written > self.max_bytes {
                // Dropping `file` removes the partial download.
                return Err(DownloadError::LimitExceeded {
                    limit: self.max_bytes,
                });
            }
            file.write_all(&buffer[..read])?;
        }
        file.flush()?;

        let path = file.into_temp_path();
        info!(path = %path.display(), bytes = written, "download stored");
        Ok(DownloadedArtifact {
            path,
            bytes: written,
        })
    }
}

/// Missing or unparsable lengths count as zero.
fn declared_length(header: Option<&str>) -> u64 {
    header
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(0)
}

fn check_declared(declared: u64, limit: u64) -> Result<(), DownloadError> {
    if declared > limit {
        return Err(DownloadError::TooLarge { declared, limit });
    }
    Ok(())
}
