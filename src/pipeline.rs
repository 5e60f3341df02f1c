#![forbid(unsafe_code)]

//! Link → download → re-encode, stopping at the first failing stage.
//!
//! `Pipeline::run` holds no state between calls; every submission starts from
//! scratch. `Pipeline::process` also settles the encoded file and turns the
//! outcome into a [`RunReport`] that the surfaces (CLI prompt, web form)
//! render however they like.

use std::error::Error as _;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::Settings;
use crate::download::{DownloadError, Downloader};
use crate::link::{LinkError, LinkResolver};
use crate::transcode::{
    EncodedArtifact, PersistError, TranscodeError, Transcoder, output_path_for,
};

pub const SUCCESS_MESSAGE: &str = "Video successfully reencoded!";

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid Google Drive link.")]
    InvalidLink(#[source] LinkError),
    #[error("Video download failed.")]
    Download(#[source] DownloadError),
    #[error("Reencoding failed.")]
    Reencode(#[source] TranscodeError),
    #[error("Saving the reencoded video failed.")]
    Store(#[source] PersistError),
}

impl PipelineError {
    /// Stage-specific explanation shown ahead of the summary line. A link
    /// that is not a Drive link at all gets only the summary.
    pub fn detail(&self) -> Option<String> {
        match self {
            PipelineError::InvalidLink(LinkError::NotDriveLink) => None,
            PipelineError::InvalidLink(err) => Some(err.to_string()),
            PipelineError::Download(err) => Some(err.to_string()),
            PipelineError::Reencode(err) => Some(err.to_string()),
            PipelineError::Store(err) => Some(err.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Error,
    Success,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub level: Level,
    pub text: String,
}

impl Notice {
    fn error(text: impl Into<String>) -> Self {
        Self {
            level: Level::Error,
            text: text.into(),
        }
    }

    fn success(text: impl Into<String>) -> Self {
        Self {
            level: Level::Success,
            text: text.into(),
        }
    }
}

/// User-facing messages for one run, in display order, plus where the
/// re-encoded video ended up when the run succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub success: bool,
    pub messages: Vec<Notice>,
    pub output: Option<PathBuf>,
}

impl RunReport {
    pub fn from_result(result: &Result<PathBuf, PipelineError>) -> Self {
        match result {
            Ok(path) => Self {
                success: true,
                messages: vec![Notice::success(SUCCESS_MESSAGE)],
                output: Some(path.clone()),
            },
            Err(err) => {
                let mut messages: Vec<Notice> = err.detail().into_iter().map(Notice::error).collect();
                messages.push(Notice::error(err.to_string()));
                Self {
                    success: false,
                    messages,
                    output: None,
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Pipeline {
    resolver: LinkResolver,
    downloader: Downloader,
    transcoder: Transcoder,
    keep_download: bool,
}

impl Pipeline {
    pub fn new(
        resolver: LinkResolver,
        downloader: Downloader,
        transcoder: Transcoder,
        keep_download: bool,
    ) -> Self {
        Self {
            resolver,
            downloader,
            transcoder,
            keep_download,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            LinkResolver::new(settings.drive_base.clone()),
            Downloader::new(settings.max_bytes, settings.temp_dir.clone()),
            Transcoder::new(settings.ffmpeg.clone()),
            settings.keep_download,
        )
    }

    pub fn max_bytes(&self) -> u64 {
        self.downloader.max_bytes()
    }

    pub fn transcoder(&self) -> &Transcoder {
        &self.transcoder
    }

    /// Processes one share link end to end.
    pub fn run(&self, share_link: &str) -> Result<EncodedArtifact, PipelineError> {
        let id = self
            .resolver
            .resolve(share_link)
            .map_err(PipelineError::InvalidLink)?;
        info!(file_id = %id, "resolved share link");

        let url = self.resolver.download_url(&id);
        let downloaded = self
            .downloader
            .fetch(&url)
            .map_err(PipelineError::Download)?;

        let output = output_path_for(downloaded.path());
        let encoded = self
            .transcoder
            .reencode(downloaded.path(), &output)
            .map_err(PipelineError::Reencode)?;

        if self.keep_download {
            match downloaded.keep() {
                Ok(path) => info!(path = %path.display(), "kept downloaded source"),
                Err(err) => warn!(error = %err, "could not keep downloaded source"),
            }
        }
        Ok(encoded)
    }

    /// Runs the pipeline and settles the encoded file: moved to `destination`
    /// when one is given, kept where the encoder wrote it otherwise. The
    /// report is built afterwards, so success is only announced for a file
    /// that is actually on disk.
    pub fn process(&self, share_link: &str, destination: Option<&Path>) -> RunReport {
        let result = self.run(share_link).and_then(|encoded| {
            let stored = match destination {
                Some(dest) => encoded.persist_to(dest),
                None => encoded.keep(),
            };
            stored.map_err(PipelineError::Store)
        });
        match &result {
            Ok(path) => info!(output = %path.display(), "run finished"),
            Err(err) => log_failure(err),
        }
        RunReport::from_result(&result)
    }
}

fn log_failure(err: &PipelineError) {
    warn!(error = %err, "run failed");
    let mut source = err.source();
    while let Some(cause) = source {
        warn!(cause = %cause, "caused by");
        source = cause.source();
    }
}
