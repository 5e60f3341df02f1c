//! Fixtures shared by the unit tests: a one-shot HTTP responder and an ffmpeg
//! stand-in script.

use std::fs;
use std::io::{Read, Write};
use std::net::TcpListener;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};

/// Accepts a single connection, replies with a fixed response and closes.
pub(crate) struct CannedServer {
    pub base: String,
    handle: JoinHandle<String>,
}

impl CannedServer {
    pub fn respond_once(head: &str, body: &[u8]) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let mut response = head.as_bytes().to_vec();
        response.extend_from_slice(body);

        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|window| window == b"\r\n\r\n") {
                match stream.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(read) => request.extend_from_slice(&buf[..read]),
                }
            }
            // The client may hang up early (oversized declarations).
            let _ = stream.write_all(&response);
            let _ = stream.flush();
            String::from_utf8_lossy(&request).into_owned()
        });

        Self { base, handle }
    }

    /// Raw request head the server received.
    pub fn request(self) -> String {
        self.handle.join().unwrap()
    }
}

/// ffmpeg stand-in that records its arguments in `<dir>/ffmpeg-args.txt` and
/// copies the input to the output path.
pub(crate) fn install_encoding_stub(dir: &Path) -> PathBuf {
    let args_file = dir.join("ffmpeg-args.txt");
    let script = format!(
        r#"#!/usr/bin/env bash
set -eu
printf '%s\n' "$@" > '{args}'
out="${{@: -1}}"
cp "$2" "$out"
echo "encoding finished" >&2
exit 0
"#,
        args = args_file.display()
    );
    install_script(dir, "ffmpeg-ok", &script)
}

/// ffmpeg stand-in that writes a partial output and exits with status 1.
pub(crate) fn install_failing_stub(dir: &Path, stderr: &str) -> PathBuf {
    let script = format!(
        r#"#!/usr/bin/env bash
out="${{@: -1}}"
echo partial > "$out"
printf '%s' '{stderr}' >&2
exit 1
"#
    );
    install_script(dir, "ffmpeg-fail", &script)
}

fn install_script(dir: &Path, name: &str, script: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, script).unwrap();
    #[cfg(unix)]
    {
        let mut perms = fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).unwrap();
    }
    path
}
