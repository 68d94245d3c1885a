// Test-only HTTP fixtures. A tiny single-threaded HTTP/1.1 responder is
// enough to exercise the transfer paths without mocking reqwest itself.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Opt-in log output for debugging tests, driven by RUST_LOG.
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Clone)]
pub(crate) enum Route {
    /// 200 (or 206 when the request carries a Range header) with this body.
    Ok(Vec<u8>),
    /// Always this status with an empty body.
    Status(u16),
    /// This status for the first `failures` requests, then 200 with body.
    Flaky { failures: usize, status: u16, body: Vec<u8> },
}

/// Spawns a loop serving `routes` by exact path. The task dies with the
/// test runtime; no explicit shutdown needed.
pub(crate) async fn spawn_server(routes: HashMap<String, Route>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits: Arc<Mutex<HashMap<String, usize>>> = Arc::new(Mutex::new(HashMap::new()));

    tokio::spawn(async move {
        loop {
            let Ok((mut sock, _)) = listener.accept().await else {
                break;
            };
            let routes = routes.clone();
            let hits = hits.clone();
            tokio::spawn(async move {
                let mut head = Vec::new();
                let mut chunk = [0u8; 1024];
                loop {
                    let n = sock.read(&mut chunk).await.unwrap_or(0);
                    if n == 0 {
                        break;
                    }
                    head.extend_from_slice(&chunk[..n]);
                    if head.windows(4).any(|w| w == b"\r\n\r\n") {
                        break;
                    }
                }
                let head = String::from_utf8_lossy(&head).to_string();
                let path = head
                    .lines()
                    .next()
                    .and_then(|l| l.split_whitespace().nth(1))
                    .unwrap_or("/")
                    .to_string();
                let range_start: Option<u64> = head.lines().find_map(|l| {
                    let rest = l.strip_prefix("Range: bytes=")?;
                    rest.split('-').next()?.parse().ok()
                });

                let response = match routes.get(&path) {
                    None => status_line(404, "Not Found"),
                    Some(Route::Status(code)) => status_line(*code, "Error"),
                    Some(Route::Ok(body)) => body_response(body, range_start),
                    Some(Route::Flaky { failures, status, body }) => {
                        let served = {
                            let mut h = hits.lock().unwrap();
                            let count = h.entry(path.clone()).or_insert(0);
                            *count += 1;
                            *count
                        };
                        if served <= *failures {
                            status_line(*status, "Error")
                        } else {
                            body_response(body, range_start)
                        }
                    }
                };
                let _ = sock.write_all(&response).await;
                let _ = sock.shutdown().await;
            });
        }
    });

    addr
}

fn status_line(code: u16, text: &str) -> Vec<u8> {
    format!("HTTP/1.1 {code} {text}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n").into_bytes()
}

fn body_response(body: &[u8], range_start: Option<u64>) -> Vec<u8> {
    match range_start {
        Some(start) if start > 0 && (start as usize) < body.len() => {
            let part = &body[start as usize..];
            let mut r = format!(
                "HTTP/1.1 206 Partial Content\r\nContent-Length: {}\r\nContent-Range: bytes {}-{}/{}\r\nConnection: close\r\n\r\n",
                part.len(),
                start,
                body.len() - 1,
                body.len()
            )
            .into_bytes();
            r.extend_from_slice(part);
            r
        }
        _ => {
            let mut r = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            )
            .into_bytes();
            r.extend_from_slice(body);
            r
        }
    }
}
