//! Per-run HTTP/CONNECT forward proxy.
//!
//! Each accepted connection re-fetches the URL policy slice through the
//! run's getters, so a policy edit applies to the next connection without
//! tearing the proxy down. Plain HTTP requests are forwarded through the
//! daemon's HTTP client; CONNECT tunnels are spliced byte-for-byte and never
//! TLS-terminated. Host and Authorization headers pass through verbatim and
//! request bodies are not modified.

use std::sync::{Arc, OnceLock};
use std::time::Instant;

use parking_lot::Mutex;
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, warn};

use crate::activity::ActivityChannel;
use crate::policy::engine::decide_url;

use super::pool::{DefaultActionGetter, UrlPolicyGetter};

/// Upper bound on a request head; anything larger is dropped.
const MAX_HEAD_BYTES: usize = 32 * 1024;

/// Everything a run's proxy needs to decide and forward.
pub(crate) struct RunContext {
    pub(crate) exec_id: String,
    pub(crate) command: String,
    pub(crate) url_policies: UrlPolicyGetter,
    pub(crate) default_action: DefaultActionGetter,
    pub(crate) activity: Arc<ActivityChannel>,
    pub(crate) last_activity: Arc<Mutex<Instant>>,
}

impl RunContext {
    fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    fn emit_denied(&self, url: &str, reason: &str) {
        self.activity.emit(
            "denied",
            json!({
                "execId": self.exec_id,
                "command": self.command,
                "target": url,
                "reason": reason,
                "via": "proxy",
            }),
        );
    }
}

/// Shared outbound client for plain-HTTP forwarding. Redirects are not
/// followed: the client behind the proxy sees them and re-requests, which
/// keeps every hop subject to policy.
fn http_client() -> &'static reqwest::Client {
    static CLIENT: OnceLock<reqwest::Client> = OnceLock::new();
    CLIENT.get_or_init(|| {
        reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap_or_default()
    })
}

/// Accept loop for one per-run proxy. Aborted by the pool on release; the
/// spawned per-connection tasks outlive the loop and drain naturally.
pub(crate) async fn serve(listener: TcpListener, run: Arc<RunContext>) {
    loop {
        match listener.accept().await {
            Ok((stream, _peer)) => {
                let run = Arc::clone(&run);
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, run).await {
                        debug!(error = %e, "proxy connection ended with error");
                    }
                });
            }
            Err(e) => {
                warn!(error = %e, "proxy accept failed");
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            }
        }
    }
}

/// Parsed request head: request line pieces, headers in order, and any body
/// bytes that arrived with the head.
struct RequestHead {
    method: String,
    target: String,
    headers: Vec<(String, String)>,
    leftover: Vec<u8>,
}

async fn read_head(stream: &mut TcpStream) -> crate::Result<RequestHead> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 2048];
    let head_end = loop {
        if let Some(pos) = find_head_end(&buf) {
            break pos;
        }
        if buf.len() > MAX_HEAD_BYTES {
            return Err(crate::Error::InvalidRequest("request head too large".into()));
        }
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(crate::Error::InvalidRequest(
                "connection closed mid-head".into(),
            ));
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    let leftover = buf[head_end + 4..].to_vec();
    let mut lines = head.split("\r\n");
    let request_line = lines
        .next()
        .ok_or_else(|| crate::Error::InvalidRequest("empty request".into()))?;
    let mut parts = request_line.split_whitespace();
    let method = parts
        .next()
        .ok_or_else(|| crate::Error::InvalidRequest("missing method".into()))?
        .to_string();
    let target = parts
        .next()
        .ok_or_else(|| crate::Error::InvalidRequest("missing target".into()))?
        .to_string();

    let mut headers = Vec::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }
    }
    Ok(RequestHead {
        method,
        target,
        headers,
        leftover,
    })
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn header<'a>(head: &'a RequestHead, name: &str) -> Option<&'a str> {
    head.headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

async fn handle_connection(mut stream: TcpStream, run: Arc<RunContext>) -> crate::Result<()> {
    run.touch();
    let head = read_head(&mut stream).await?;

    if head.method.eq_ignore_ascii_case("CONNECT") {
        handle_connect(stream, head, &run).await
    } else {
        handle_plain(stream, head, &run).await
    }
}

/// CONNECT tunnel: the path is unknown, so policy matches against
/// `https://<host>:<port>`. Denied tunnels are closed without a response.
async fn handle_connect(
    mut stream: TcpStream,
    head: RequestHead,
    run: &RunContext,
) -> crate::Result<()> {
    let authority = head.target.clone();
    let match_url = format!("https://{authority}");

    let decision = decide_url(&(run.url_policies)(), &match_url, (run.default_action)());
    if !decision.allowed {
        let reason = decision.reason.unwrap_or_else(|| "denied".into());
        debug!(target = %match_url, %reason, "CONNECT denied");
        run.emit_denied(&match_url, &reason);
        return Ok(());
    }

    let mut upstream = match TcpStream::connect(&authority).await {
        Ok(upstream) => upstream,
        Err(e) => {
            run.emit_denied(&match_url, &format!("upstream dial failed: {e}"));
            stream
                .write_all(b"HTTP/1.1 502 Bad Gateway\r\ncontent-length: 0\r\n\r\n")
                .await?;
            return Ok(());
        }
    };

    stream
        .write_all(b"HTTP/1.1 200 Connection Established\r\n\r\n")
        .await?;
    // Bytes that arrived glued to the CONNECT head belong to the tunnel.
    if !head.leftover.is_empty() {
        upstream.write_all(&head.leftover).await?;
    }
    let _ = tokio::io::copy_bidirectional(&mut stream, &mut upstream).await;
    Ok(())
}

/// Plain HTTP: the request target is the absolute URL. Denied requests get
/// a 403; upstream failures a 502.
async fn handle_plain(
    mut stream: TcpStream,
    head: RequestHead,
    run: &RunContext,
) -> crate::Result<()> {
    if !head.target.contains("://") {
        stream
            .write_all(b"HTTP/1.1 400 Bad Request\r\ncontent-length: 0\r\n\r\n")
            .await?;
        return Ok(());
    }
    let url = head.target.clone();

    let decision = decide_url(&(run.url_policies)(), &url, (run.default_action)());
    if !decision.allowed {
        let reason = decision.reason.unwrap_or_else(|| "denied".into());
        debug!(target = %url, %reason, "HTTP request denied");
        run.emit_denied(&url, &reason);
        let body = reason.into_bytes();
        let response = format!(
            "HTTP/1.1 403 Forbidden\r\ncontent-type: text/plain\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
            body.len()
        );
        stream.write_all(response.as_bytes()).await?;
        stream.write_all(&body).await?;
        return Ok(());
    }

    // Read the body, if the client declared one.
    let content_length: usize = header(&head, "content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let mut body = head.leftover.clone();
    while body.len() < content_length {
        let mut chunk = vec![0u8; (content_length - body.len()).min(16 * 1024)];
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }

    let method = reqwest::Method::from_bytes(head.method.as_bytes())
        .map_err(|_| crate::Error::InvalidRequest(format!("bad method {}", head.method)))?;
    let mut request = http_client().request(method, &url);
    for (name, value) in &head.headers {
        // Hop-by-hop headers stay on this hop; Host and Authorization pass
        // through verbatim.
        if is_hop_by_hop(name) {
            continue;
        }
        request = request.header(name.as_str(), value.as_str());
    }
    if !body.is_empty() {
        request = request.body(body);
    }

    match request.send().await {
        Ok(response) => {
            run.touch();
            let status = response.status();
            let mut response_head = format!(
                "HTTP/1.1 {} {}\r\n",
                status.as_u16(),
                status.canonical_reason().unwrap_or("")
            );
            for (name, value) in response.headers() {
                let name = name.as_str();
                if is_hop_by_hop(name) || name == "content-length" {
                    continue;
                }
                if let Ok(value) = value.to_str() {
                    response_head.push_str(&format!("{name}: {value}\r\n"));
                }
            }
            let bytes = response.bytes().await.unwrap_or_default();
            response_head.push_str(&format!(
                "content-length: {}\r\nconnection: close\r\n\r\n",
                bytes.len()
            ));
            stream.write_all(response_head.as_bytes()).await?;
            stream.write_all(&bytes).await?;
        }
        Err(e) => {
            run.emit_denied(&url, &format!("upstream request failed: {e}"));
            let body = format!("upstream request failed: {e}").into_bytes();
            let response = format!(
                "HTTP/1.1 502 Bad Gateway\r\ncontent-type: text/plain\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
                body.len()
            );
            stream.write_all(response.as_bytes()).await?;
            stream.write_all(&body).await?;
        }
    }
    Ok(())
}

fn is_hop_by_hop(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "connection"
            | "proxy-connection"
            | "proxy-authorization"
            | "keep-alive"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
    )
}
