#![forbid(unsafe_code)]

//! ffmpeg invocation with the fixed streaming profile: H.264 video on the
//! `fast` preset, AAC audio, and the `moov` atom moved to the front so
//! playback can start before the file is complete.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};

use anyhow::bail;
use tempfile::TempPath;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::download::VIDEO_SUFFIX;

pub const DEFAULT_ENCODER: &str = "ffmpeg";
pub const REENCODED_SUFFIX: &str = "_reencoded.mp4";

#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("FFmpeg error: input file {} does not exist", .0.display())]
    MissingInput(PathBuf),
    #[error("FFmpeg error: output file {} already exists", .0.display())]
    OutputExists(PathBuf),
    #[error("FFmpeg error: could not start {}: {source}", .program.display())]
    Launch {
        program: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("FFmpeg error:\n{stderr}")]
    Failed {
        status: Option<i32>,
        stderr: String,
    },
}

/// The encoded file could not be moved into place or kept.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error(
        "could not move the re-encoded video to {}; it was left at {}",
        .destination.display(),
        .kept.display()
    )]
    LeftInPlace {
        destination: PathBuf,
        kept: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("could not keep the re-encoded video at {}", .path.display())]
    Lost {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl PersistError {
    /// Where the encoded file can still be found, if anywhere.
    pub fn kept(&self) -> Option<&Path> {
        match self {
            PersistError::LeftInPlace { kept, .. } => Some(kept),
            PersistError::Lost { .. } => None,
        }
    }
}

/// Re-encoded file. Removed on drop unless kept or persisted elsewhere.
#[derive(Debug)]
pub struct EncodedArtifact {
    path: TempPath,
}

impl EncodedArtifact {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn keep(self) -> Result<PathBuf, PersistError> {
        keep_temp(self.path)
    }

    /// Moves the file to `dest`, copying when a rename crosses filesystems.
    /// If neither works the file stays where it is and the error says where.
    pub fn persist_to(self, dest: &Path) -> Result<PathBuf, PersistError> {
        let err = match self.path.persist(dest) {
            Ok(()) => return Ok(dest.to_path_buf()),
            Err(err) => err,
        };
        debug!(error = %err.error, "rename failed, copying instead");
        let temp = err.path;
        match fs::copy(&temp, dest) {
            Ok(_) => Ok(dest.to_path_buf()),
            Err(source) => {
                let kept = keep_temp(temp)?;
                warn!(
                    destination = %dest.display(),
                    kept = %kept.display(),
                    error = %source,
                    "could not move re-encoded video"
                );
                Err(PersistError::LeftInPlace {
                    destination: dest.to_path_buf(),
                    kept,
                    source,
                })
            }
        }
    }
}

fn keep_temp(temp: TempPath) -> Result<PathBuf, PersistError> {
    let path = temp.to_path_buf();
    temp.keep().map_err(|err| PersistError::Lost {
        path,
        source: err.error,
    })
}

/// Output location for a downloaded file: `clip.mp4` becomes
/// `clip_reencoded.mp4` in the same directory.
pub fn output_path_for(input: &Path) -> PathBuf {
    let name = input
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = name.strip_suffix(VIDEO_SUFFIX).unwrap_or(&name);
    input.with_file_name(format!("{stem}{REENCODED_SUFFIX}"))
}

#[derive(Debug, Clone)]
pub struct Transcoder {
    program: PathBuf,
}

impl Default for Transcoder {
    fn default() -> Self {
        Self::new(DEFAULT_ENCODER)
    }
}

impl Transcoder {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Arguments passed to the encoder, in order.
    pub fn profile_args(input: &Path, output: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["-i".into(), input.into()];
        args.extend(
            [
                "-c:v",
                "libx264",
                "-preset",
                "fast",
                "-c:a",
                "aac",
                "-strict",
                "experimental",
                "-movflags",
                "faststart",
            ]
            .map(OsString::from),
        );
        args.push(output.into());
        args
    }

    /// Runs the encoder and blocks until it exits.
    pub fn reencode(&self, input: &Path, output: &Path) -> Result<EncodedArtifact, TranscodeError> {
        if !input.is_file() {
            return Err(TranscodeError::MissingInput(input.to_path_buf()));
        }
        if output.exists() {
            return Err(TranscodeError::OutputExists(output.to_path_buf()));
        }
        // Armed before launch so a half-written output never outlives a failure.
        let guard = TempPath::from_path(output);

        info!(
            program = %self.program.display(),
            input = %input.display(),
            output = %output.display(),
            "starting encoder"
        );
        let result = Command::new(&self.program)
            .args(Self::profile_args(input, output))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|source| TranscodeError::Launch {
                program: self.program.clone(),
                source,
            })?;

        debug!(
            stdout = %String::from_utf8_lossy(&result.stdout),
            "encoder stdout"
        );
        if !result.status.success() {
            warn!(status = %result.status, "encoder failed");
            return Err(failure(result.status, &result.stderr));
        }

        info!(output = %output.display(), "encoder finished");
        Ok(EncodedArtifact { path: guard })
    }
}

fn failure(status: ExitStatus, stderr: &[u8]) -> TranscodeError {
    TranscodeError::Failed {
        status: status.code(),
        stderr: String::from_utf8_lossy(stderr).into_owned(),
    }
}

/// Runs `<program> -version` so a missing encoder shows up at start-up rather
/// than after a multi-gigabyte download.
pub fn ensure_encoder_available(program: &Path) -> anyhow::Result<()> {
    let status = Command::new(program)
        .arg("-version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();

    match status {
        Ok(status) if status.success() => Ok(()),
        Ok(_) => bail!(
            "{} is installed but returned a failure status",
            program.display()
        ),
        Err(err) => bail!("{} is not installed or not in PATH: {}", program.display(), err),
    }
}
