#![forbid(unsafe_code)]

//! Google Drive video fetcher and re-encoder.
//!
//! A share link goes through three blocking stages: [`link`] extracts the file
//! id, [`download`] streams the file into a temporary `.mp4`, and [`transcode`]
//! hands it to ffmpeg. [`pipeline`] wires them together for the binaries.

pub mod config;
pub mod download;
pub mod link;
pub mod logging;
pub mod pipeline;
pub mod transcode;

#[cfg(test)]
mod test_support;
