// ─── Transfer Unit ───
// One resumable, range-capable fetch of a single remote artifact into a
// staging file. Never touches the final destination path; promotion is the
// download manager's job, after verification.

use std::path::Path;

use futures_util::StreamExt;
use reqwest::{header, Client, StatusCode};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Progress callback: (bytes_so_far, total_bytes_or_unknown).
pub type ProgressFn = dyn Fn(u64, Option<u64>) + Send + Sync;

/// Emit progress at most once per this many bytes, to avoid callback storms.
const PROGRESS_STRIDE: u64 = 64 * 1024;

#[derive(Debug)]
pub enum TransferOutcome {
    /// Full body received; staging file holds the complete content.
    Complete { bytes: u64 },
    /// Transient fault. Staging bytes are preserved so the caller can
    /// re-invoke with the staging length as the resume offset.
    Retryable { bytes: u64, reason: String },
    /// Permanent rejection for this artifact. Not worth retrying. Carries
    /// the HTTP status when the rejection came from the server.
    Fatal { reason: String, status: Option<u16> },
    /// Cancellation was requested; staging bytes are left on disk.
    Cancelled { bytes: u64 },
}

pub struct FetchOptions<'a> {
    /// Byte offset to resume from. `None` means "use the staging file's
    /// current length".
    pub resume_from: Option<u64>,
    /// Expected final size, when the catalog declared one.
    pub expected_size: Option<u64>,
    pub progress: Option<&'a ProgressFn>,
    pub cancel: Option<&'a CancellationToken>,
}

impl Default for FetchOptions<'_> {
    fn default() -> Self {
        Self {
            resume_from: None,
            expected_size: None,
            progress: None,
            cancel: None,
        }
    }
}

/// Fetch `url` into `staging`, resuming from a prior partial download when
/// the server honors byte ranges.
pub async fn fetch(
    client: &Client,
    url: &str,
    staging: &Path,
    opts: FetchOptions<'_>,
) -> TransferOutcome {
    let offset = match opts.resume_from {
        Some(o) => o,
        None => fs::metadata(staging).await.map(|m| m.len()).unwrap_or(0),
    };

    let mut request = client.get(url);
    if offset > 0 {
        request = request.header(header::RANGE, format!("bytes={offset}-"));
    }

    let response = match request.send().await {
        Ok(r) => r,
        Err(e) => {
            return TransferOutcome::Retryable {
                bytes: offset,
                reason: format!("request failed: {e}"),
            }
        }
    };

    let status = response.status();
    let mut current = offset;

    // A server that ignores the range request replies 200 with the full
    // body; appending it to the staging file would duplicate bytes, so the
    // staging file is truncated and written from scratch instead.
    let truncate = match status {
        StatusCode::PARTIAL_CONTENT => false,
        StatusCode::OK => {
            if offset > 0 {
                debug!("Server ignored range request for {url}; restarting from 0");
                current = 0;
            }
            true
        }
        StatusCode::RANGE_NOT_SATISFIABLE => {
            // Local staging no longer lines up with the remote file.
            // Clear it so the next attempt starts fresh.
            let _ = fs::remove_file(staging).await;
            return TransferOutcome::Retryable {
                bytes: 0,
                reason: "range not satisfiable; staging file cleared".into(),
            };
        }
        StatusCode::TOO_MANY_REQUESTS => {
            return TransferOutcome::Retryable {
                bytes: offset,
                reason: "HTTP 429 rate limited".into(),
            };
        }
        s if s.is_server_error() => {
            return TransferOutcome::Retryable {
                bytes: offset,
                reason: format!("HTTP {}", s.as_u16()),
            };
        }
        s => {
            return TransferOutcome::Fatal {
                reason: format!("HTTP {}", s.as_u16()),
                status: Some(s.as_u16()),
            };
        }
    };

    let total = match (response.content_length(), truncate) {
        (Some(len), false) => Some(current + len),
        (Some(len), true) => Some(len),
        (None, _) => opts.expected_size,
    };

    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .append(!truncate)
        .truncate(truncate)
        .open(staging)
        .await;
    let mut file = match file {
        Ok(f) => f,
        Err(e) => {
            return TransferOutcome::Retryable {
                bytes: current,
                reason: format!("cannot open staging file: {e}"),
            }
        }
    };

    if let Some(cb) = opts.progress {
        cb(current, total);
    }
    let mut last_reported = current;

    let mut stream = response.bytes_stream();
    while let Some(item) = stream.next().await {
        if let Some(token) = opts.cancel {
            if token.is_cancelled() {
                let _ = file.flush().await;
                return TransferOutcome::Cancelled { bytes: current };
            }
        }

        let chunk = match item {
            Ok(c) => c,
            Err(e) => {
                let _ = file.flush().await;
                warn!("Stream interrupted for {url} at {current} bytes: {e}");
                return TransferOutcome::Retryable {
                    bytes: current,
                    reason: format!("stream interrupted: {e}"),
                };
            }
        };

        if let Err(e) = file.write_all(&chunk).await {
            return TransferOutcome::Retryable {
                bytes: current,
                reason: format!("staging write failed: {e}"),
            };
        }
        current += chunk.len() as u64;

        if let Some(cb) = opts.progress {
            if current - last_reported >= PROGRESS_STRIDE {
                cb(current, total);
                last_reported = current;
            }
        }
    }

    if let Err(e) = file.flush().await {
        return TransferOutcome::Retryable {
            bytes: current,
            reason: format!("staging flush failed: {e}"),
        };
    }
    drop(file);

    if let Some(cb) = opts.progress {
        cb(current, total);
    }

    // A short body means the connection closed early even though the
    // stream ended without an error.
    if let Some(expected) = opts.expected_size {
        if current < expected {
            return TransferOutcome::Retryable {
                bytes: current,
                reason: format!("truncated body: {current} of {expected} bytes"),
            };
        }
        if current > expected {
            return TransferOutcome::Fatal {
                reason: format!("body larger than declared size: {current} > {expected}"),
                status: None,
            };
        }
    }

    TransferOutcome::Complete { bytes: current }
}

/// Staging path for a destination: `mod.jar` -> `mod.jar.part`.
pub fn staging_path(dest: &Path) -> std::path::PathBuf {
    let mut name = dest.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".part");
    dest.with_file_name(name)
}

/// Basename of a URL path, query stripped. Used when the catalog supplies
/// no file name.
pub fn filename_from_url(url: &str) -> Option<String> {
    let without_query = url.split('?').next()?;
    let after_scheme = without_query
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(without_query);
    let (_, path) = after_scheme.split_once('/')?;
    let name = path.trim_end_matches('/').rsplit('/').next()?;
    if name.is_empty() {
        return None;
    }
    Some(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Serves one canned HTTP response, then closes the connection.
    async fn serve_once(response: Vec<u8>) -> (SocketAddr, JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            // Drain the request head before replying.
            let mut buf = Vec::new();
            let mut chunk = [0u8; 1024];
            loop {
                let n = sock.read(&mut chunk).await.unwrap_or(0);
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
                if buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    break;
                }
            }
            sock.write_all(&response).await.unwrap();
            let _ = sock.shutdown().await;
        });
        (addr, handle)
    }

    fn ok_response(body: &[u8]) -> Vec<u8> {
        let mut r = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            body.len()
        )
        .into_bytes();
        r.extend_from_slice(body);
        r
    }

    fn partial_response(body: &[u8], start: u64, full: u64) -> Vec<u8> {
        let mut r = format!(
            "HTTP/1.1 206 Partial Content\r\nContent-Length: {}\r\nContent-Range: bytes {}-{}/{}\r\nConnection: close\r\n\r\n",
            body.len(),
            start,
            full - 1,
            full
        )
        .into_bytes();
        r.extend_from_slice(body);
        r
    }

    fn status_response(code: u16, text: &str) -> Vec<u8> {
        format!("HTTP/1.1 {code} {text}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
            .into_bytes()
    }

    #[tokio::test]
    async fn full_fetch_writes_staging() {
        let body = b"hello artifact bytes";
        let (addr, server) = serve_once(ok_response(body)).await;
        let dir = tempfile::tempdir().unwrap();
        let staging = dir.path().join("a.jar.part");

        let client = reqwest::Client::new();
        let outcome = fetch(
            &client,
            &format!("http://{addr}/a.jar"),
            &staging,
            FetchOptions::default(),
        )
        .await;

        assert!(matches!(outcome, TransferOutcome::Complete { bytes } if bytes == body.len() as u64));
        assert_eq!(tokio::fs::read(&staging).await.unwrap(), body);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn resume_appends_to_partial_staging() {
        let full = b"0123456789abcdef";
        let (addr, server) = serve_once(partial_response(&full[6..], 6, full.len() as u64)).await;
        let dir = tempfile::tempdir().unwrap();
        let staging = dir.path().join("a.jar.part");
        tokio::fs::write(&staging, &full[..6]).await.unwrap();

        let client = reqwest::Client::new();
        let outcome = fetch(
            &client,
            &format!("http://{addr}/a.jar"),
            &staging,
            FetchOptions::default(),
        )
        .await;

        assert!(matches!(outcome, TransferOutcome::Complete { bytes } if bytes == full.len() as u64));
        assert_eq!(tokio::fs::read(&staging).await.unwrap(), full);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn ignored_range_restarts_from_zero() {
        let full = b"0123456789abcdef";
        // Server answers 200 with the whole body despite the range request.
        let (addr, server) = serve_once(ok_response(full)).await;
        let dir = tempfile::tempdir().unwrap();
        let staging = dir.path().join("a.jar.part");
        tokio::fs::write(&staging, &full[..6]).await.unwrap();

        let client = reqwest::Client::new();
        let outcome = fetch(
            &client,
            &format!("http://{addr}/a.jar"),
            &staging,
            FetchOptions::default(),
        )
        .await;

        assert!(matches!(outcome, TransferOutcome::Complete { bytes } if bytes == full.len() as u64));
        // No duplicated prefix.
        assert_eq!(tokio::fs::read(&staging).await.unwrap(), full);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn not_found_is_fatal() {
        let (addr, server) = serve_once(status_response(404, "Not Found")).await;
        let dir = tempfile::tempdir().unwrap();
        let staging = dir.path().join("a.jar.part");

        let client = reqwest::Client::new();
        let outcome = fetch(
            &client,
            &format!("http://{addr}/a.jar"),
            &staging,
            FetchOptions::default(),
        )
        .await;

        assert!(matches!(outcome, TransferOutcome::Fatal { .. }));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn server_error_is_retryable_and_preserves_staging() {
        let (addr, server) = serve_once(status_response(503, "Service Unavailable")).await;
        let dir = tempfile::tempdir().unwrap();
        let staging = dir.path().join("a.jar.part");
        tokio::fs::write(&staging, b"partial").await.unwrap();

        let client = reqwest::Client::new();
        let outcome = fetch(
            &client,
            &format!("http://{addr}/a.jar"),
            &staging,
            FetchOptions::default(),
        )
        .await;

        match outcome {
            TransferOutcome::Retryable { bytes, .. } => assert_eq!(bytes, 7),
            other => panic!("expected Retryable, got {other:?}"),
        }
        assert_eq!(tokio::fs::read(&staging).await.unwrap(), b"partial");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn interrupted_body_is_retryable_with_partial_bytes() {
        // Claims 100 bytes but sends only 10, then closes.
        let mut response =
            b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\nConnection: close\r\n\r\n".to_vec();
        response.extend_from_slice(b"0123456789");
        let (addr, server) = serve_once(response).await;
        let dir = tempfile::tempdir().unwrap();
        let staging = dir.path().join("a.jar.part");

        let client = reqwest::Client::new();
        let outcome = fetch(
            &client,
            &format!("http://{addr}/a.jar"),
            &staging,
            FetchOptions {
                expected_size: Some(100),
                ..Default::default()
            },
        )
        .await;

        match outcome {
            TransferOutcome::Retryable { bytes, .. } => assert_eq!(bytes, 10),
            other => panic!("expected Retryable, got {other:?}"),
        }
        assert_eq!(tokio::fs::read(&staging).await.unwrap(), b"0123456789");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn progress_reports_final_count() {
        let body = vec![7u8; 3000];
        let (addr, server) = serve_once(ok_response(&body)).await;
        let dir = tempfile::tempdir().unwrap();
        let staging = dir.path().join("a.jar.part");

        let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen_cb = seen.clone();
        let progress = move |bytes: u64, total: Option<u64>| {
            seen_cb.lock().unwrap().push((bytes, total));
        };

        let client = reqwest::Client::new();
        let outcome = fetch(
            &client,
            &format!("http://{addr}/a.jar"),
            &staging,
            FetchOptions {
                progress: Some(&progress),
                ..Default::default()
            },
        )
        .await;

        assert!(matches!(outcome, TransferOutcome::Complete { .. }));
        let seen = seen.lock().unwrap();
        assert_eq!(seen.last().copied(), Some((3000, Some(3000))));
        server.await.unwrap();
    }

    #[test]
    fn staging_path_appends_part_suffix() {
        let dest = Path::new("/x/mods/foo.jar");
        assert_eq!(staging_path(dest), Path::new("/x/mods/foo.jar.part"));
    }

    #[test]
    fn filename_from_url_strips_query() {
        assert_eq!(
            filename_from_url("https://cdn.example.com/files/123/foo.jar?token=abc"),
            Some("foo.jar".to_string())
        );
        assert_eq!(filename_from_url("https://cdn.example.com/"), None);
    }
}
