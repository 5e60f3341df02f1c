#![forbid(unsafe_code)]

//! Small Axum front end for the re-encoding pipeline.
//!
//! `GET /` shows a single text field, `POST /` runs the pipeline for the
//! submitted link and renders the resulting messages, and
//! `POST /api/reencode` does the same for JSON clients. Runs are serialised:
//! a second submission waits until the first one has finished.

use std::{
    net::{IpAddr, SocketAddr},
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result, anyhow};
use axum::{
    Form, Json, Router,
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use clap::{ArgAction, Parser};
use drive_reencode::config::{Settings, SettingsOverrides, resolve_settings};
use drive_reencode::download::size_label;
use drive_reencode::logging::init_tracing;
use drive_reencode::pipeline::{Level, Notice, Pipeline, RunReport};
use drive_reencode::transcode::ensure_encoder_available;
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::signal;
use tracing::{error, info, warn};

/// Serve a web form that downloads and re-encodes Google Drive videos
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct ServerArgs {
    /// Address to bind (default: 127.0.0.1)
    #[arg(long, value_name = "HOST")]
    host: Option<String>,

    /// Port to listen on (default: 8080)
    #[arg(short, long, value_name = "PORT")]
    port: Option<u16>,

    /// ffmpeg binary to run (default: ffmpeg from PATH)
    #[arg(long, value_name = "PATH")]
    ffmpeg: Option<PathBuf>,

    /// Directory for the downloaded and re-encoded files
    #[arg(long, value_name = "DIR")]
    temp_dir: Option<PathBuf>,

    /// Settings file (default: ./.env)
    #[arg(long, value_name = "PATH")]
    env_file: Option<PathBuf>,

    /// Increase logging verbosity (-v = debug, -vv = trace). RUST_LOG wins.
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

impl ServerArgs {
    fn overrides(&self) -> SettingsOverrides {
        SettingsOverrides {
            ffmpeg: self.ffmpeg.clone(),
            temp_dir: self.temp_dir.clone(),
            host: self.host.clone(),
            port: self.port,
            env_path: self.env_file.clone(),
            ..SettingsOverrides::default()
        }
    }
}

#[derive(Clone)]
struct AppState {
    pipeline: Arc<Pipeline>,
    /// Held for the whole duration of a run.
    job_lock: Arc<Mutex<()>>,
}

impl AppState {
    fn new(settings: &Settings) -> Self {
        Self {
            pipeline: Arc::new(Pipeline::from_settings(settings)),
            job_lock: Arc::new(Mutex::new(())),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SubmitForm {
    #[serde(default)]
    drive_url: String,
}

#[derive(Debug, Deserialize)]
struct ReencodeRequest {
    url: String,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.message,
        });
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[tokio::main]
async fn main() -> Result<()> {
    let args = ServerArgs::parse();
    init_tracing(args.verbose);

    let settings = resolve_settings(args.overrides()).context("loading settings")?;
    if let Err(err) = ensure_encoder_available(&settings.ffmpeg) {
        warn!("{err:#}");
    }
    let host = parse_host_arg(&settings.host)?;
    let state = AppState::new(&settings);

    let app = router(state);

    let addr = SocketAddr::new(host, settings.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {}", addr))?;
    info!("listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running web server")?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(show_form).post(submit_form))
        .route("/api/reencode", post(reencode_json))
        .with_state(state)
}

fn parse_host_arg(value: &str) -> Result<IpAddr> {
    let trimmed = value.trim();
    if trimmed.eq_ignore_ascii_case("localhost") {
        return Ok(IpAddr::from([127, 0, 0, 1]));
    }
    trimmed
        .parse::<IpAddr>()
        .map_err(|_| anyhow!("invalid host address: {value}"))
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        error!("failed to install Ctrl+C handler: {}", err);
    }
}

async fn show_form(State(state): State<AppState>) -> Html<String> {
    Html(render_page(state.pipeline.max_bytes(), "", &[], None))
}

async fn submit_form(
    State(state): State<AppState>,
    Form(form): Form<SubmitForm>,
) -> ApiResult<Html<String>> {
    let link = form.drive_url.trim().to_string();
    if link.is_empty() {
        return Ok(Html(render_page(state.pipeline.max_bytes(), "", &[], None)));
    }
    let max_bytes = state.pipeline.max_bytes();
    let report = run_pipeline(state, link.clone()).await?;
    Ok(Html(render_page(
        max_bytes,
        &link,
        &report.messages,
        report.output.as_deref(),
    )))
}

async fn reencode_json(
    State(state): State<AppState>,
    Json(request): Json<ReencodeRequest>,
) -> ApiResult<Json<RunReport>> {
    let link = request.url.trim().to_string();
    if link.is_empty() {
        return Err(ApiError::bad_request("url is required"));
    }
    let report = run_pipeline(state, link).await?;
    Ok(Json(report))
}

/// Runs the blocking pipeline off the async workers, one run at a time. The
/// encoded file stays in the temp directory so the reported path is valid.
async fn run_pipeline(state: AppState, link: String) -> ApiResult<RunReport> {
    tokio::task::spawn_blocking(move || {
        let _guard = state.job_lock.lock();
        state.pipeline.process(&link, None)
    })
    .await
    .map_err(|err| ApiError::internal(format!("pipeline task failed: {err}")))
}

fn render_page(
    max_bytes: u64,
    link: &str,
    notices: &[Notice],
    output: Option<&Path>,
) -> String {
    let mut body = String::new();
    for notice in notices {
        let class = match notice.level {
            Level::Error => "error",
            Level::Success => "success",
        };
        body.push_str(&format!(
            "<pre class=\"{class}\">{}</pre>\n",
            html_escape::encode_text(&notice.text)
        ));
    }
    if let Some(path) = output {
        body.push_str(&format!(
            "<p>Output: <code>{}</code></p>\n",
            html_escape::encode_text(&path.display().to_string())
        ));
    }

    format!(
        r#"<!doctype html>
<html>
<head>
<meta charset="utf-8">
<title>Google Drive Video Processing</title>
<style>
.error {{ color: #b00020; white-space: pre-wrap; }}
.success {{ color: #1b5e20; }}
</style>
</head>
<body>
<h1>Google Drive Video Processing (Max {limit})</h1>
<form method="post" action="/">
<label for="drive_url">Enter Google Drive Video Link:</label>
<input id="drive_url" name="drive_url" type="text" size="80" value="{value}">
<button type="submit">Process</button>
</form>
{body}</body>
</html>
"#,
        limit = size_label(&max_bytes),
        value = html_escape::encode_double_quoted_attribute(link),
    )
}

#[cfg(test)]
#[allow(dead_code)]
#[path = "../test_support.rs"]
mod test_support;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{CannedServer, install_encoding_stub};
    use axum::body::to_bytes;
    use clap::CommandFactory;
    use serde_json::Value;
    use std::fs;
    use tempfile::tempdir;

    fn test_state() -> AppState {
        AppState::new(&Settings {
            drive_base: "http://127.0.0.1:1".into(),
            ..Settings::default()
        })
    }

    #[test]
    fn args_are_well_formed() {
        ServerArgs::command().debug_assert();
    }

    #[test]
    fn parse_host_accepts_localhost_and_ips() {
        assert_eq!(
            parse_host_arg("localhost").unwrap(),
            IpAddr::from([127, 0, 0, 1])
        );
        assert_eq!(
            parse_host_arg(" 0.0.0.0 ").unwrap(),
            IpAddr::from([0, 0, 0, 0])
        );
        assert!(parse_host_arg("not a host").is_err());
    }

    #[test]
    fn render_page_escapes_user_input() {
        let notices = vec![Notice {
            level: Level::Error,
            text: "FFmpeg error:\n<script>".into(),
        }];
        let page = render_page(
            5 * 1024 * 1024 * 1024,
            "\"><script>alert(1)</script>",
            &notices,
            None,
        );
        assert!(page.contains("(Max 5GB)"));
        assert!(!page.contains("<script>"));
        assert!(page.contains("&lt;script&gt;"));
        assert!(page.contains("class=\"error\""));
    }

    #[tokio::test]
    async fn form_renders_without_messages() {
        let Html(page) = show_form(State(test_state())).await;
        assert!(page.contains("name=\"drive_url\""));
        assert!(!page.contains("<pre"));
    }

    #[tokio::test]
    async fn blank_submission_runs_nothing() {
        let Html(page) = submit_form(
            State(test_state()),
            Form(SubmitForm {
                drive_url: "   ".into(),
            }),
        )
        .await
        .unwrap();
        assert!(!page.contains("<pre"));
    }

    #[tokio::test]
    async fn invalid_link_renders_error() {
        let Html(page) = submit_form(
            State(test_state()),
            Form(SubmitForm {
                drive_url: "not-a-drive-link".into(),
            }),
        )
        .await
        .unwrap();
        assert!(page.contains("Invalid Google Drive link."));
        assert!(page.contains("value=\"not-a-drive-link\""));
    }

    #[tokio::test]
    async fn json_endpoint_reports_failure() {
        let Json(report) = reencode_json(
            State(test_state()),
            Json(ReencodeRequest {
                url: "https://drive.google.com/drive/folders/abc".into(),
            }),
        )
        .await
        .unwrap();
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["success"], Value::Bool(false));
        assert_eq!(value["output"], Value::Null);
        assert_eq!(
            value["messages"][0]["text"],
            "Invalid Google Drive link format."
        );
        assert_eq!(value["messages"][1]["text"], "Invalid Google Drive link.");
    }

    #[tokio::test]
    async fn json_endpoint_reports_kept_output() {
        let tools = tempdir().unwrap();
        let work = tempdir().unwrap();
        let body = b"pretend this is an mp4";
        let server = CannedServer::respond_once(
            &format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            ),
            body,
        );
        let state = AppState::new(&Settings {
            ffmpeg: install_encoding_stub(tools.path()),
            temp_dir: Some(work.path().to_path_buf()),
            drive_base: server.base.clone(),
            ..Settings::default()
        });

        let Json(report) = reencode_json(
            State(state),
            Json(ReencodeRequest {
                url: "https://drive.google.com/uc?id=XYZ&export=download".into(),
            }),
        )
        .await
        .unwrap();

        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["success"], Value::Bool(true));
        assert_eq!(value["messages"][0]["level"], "success");
        assert_eq!(value["messages"][0]["text"], "Video successfully reencoded!");

        let output = PathBuf::from(value["output"].as_str().unwrap());
        assert!(output.starts_with(work.path()));
        assert_eq!(fs::read(&output).unwrap(), body);
        assert!(server.request().starts_with("GET /uc?id=XYZ&export=download "));
    }

    #[tokio::test]
    async fn json_endpoint_rejects_blank_url() {
        let err = reencode_json(
            State(test_state()),
            Json(ReencodeRequest { url: " ".into() }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);

        let response = err.into_response();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["error"], "url is required");
    }

    #[tokio::test]
    async fn router_builds() {
        let _ = router(test_state());
    }
}
