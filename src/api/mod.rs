//! Live view HTTP server.
//!
//! Routes:
//! - `GET /stream.mjpg`: multipart MJPEG of the latest annotated frame
//! - `GET /frame.jpg`: latest annotated frame, 503 until the first inference
//! - `GET /report`: latest inspection report JSON, 404 before the first report
//! - `GET /health`: readiness and current sequence
//!
//! The acceptor runs on its own thread; every connection gets a thread of its own
//! so a long-lived stream viewer never blocks other requests.

use anyhow::{anyhow, Context, Result};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::state::SharedInference;

const MAX_REQUEST_BYTES: usize = 8192;
const STREAM_BOUNDARY: &str = "frame";
const STREAM_WAIT: Duration = Duration::from_millis(500);

#[derive(Clone, Debug, PartialEq)]
pub struct LiveViewConfig {
    pub addr: String,
    pub jpeg_quality: u8,
    /// Upper bound on frames per second sent to one stream viewer.
    pub max_fps: u32,
}

impl Default for LiveViewConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:8080".to_string(),
            jpeg_quality: 80,
            max_fps: 30,
        }
    }
}

#[derive(Debug)]
pub struct LiveViewHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl LiveViewHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("live view thread panicked"))?;
        }
        Ok(())
    }
}

pub struct LiveViewServer {
    cfg: LiveViewConfig,
    state: Arc<SharedInference>,
}

impl LiveViewServer {
    pub fn new(cfg: LiveViewConfig, state: Arc<SharedInference>) -> Self {
        Self { cfg, state }
    }

    pub fn spawn(self) -> Result<LiveViewHandle> {
        let configured_addr: SocketAddr = self
            .cfg
            .addr
            .parse()
            .with_context(|| format!("invalid live view address '{}'", self.cfg.addr))?;
        let listener = TcpListener::bind(configured_addr)
            .with_context(|| format!("bind live view on {}", configured_addr))?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let ctx = Arc::new(ServerContext {
            cfg: self.cfg,
            state: self.state,
            shutdown: Arc::clone(&shutdown),
        });
        let join = std::thread::Builder::new()
            .name("live-view".to_string())
            .spawn(move || {
                if let Err(err) = run_server(listener, ctx) {
                    log::error!("live view stopped: {}", err);
                }
            })
            .context("spawn live view thread")?;

        log::info!("live view listening on http://{}", addr);
        Ok(LiveViewHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

struct ServerContext {
    cfg: LiveViewConfig,
    state: Arc<SharedInference>,
    shutdown: Arc<AtomicBool>,
}

fn run_server(listener: TcpListener, ctx: Arc<ServerContext>) -> Result<()> {
    loop {
        if ctx.shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                let ctx = Arc::clone(&ctx);
                let spawned = std::thread::Builder::new()
                    .name(format!("live-view-{}", peer))
                    .spawn(move || {
                        if let Err(err) = handle_connection(stream, &ctx) {
                            log::debug!("live view connection from {} ended: {}", peer, err);
                        }
                    });
                if let Err(err) = spawned {
                    log::warn!("could not serve {}: {}", peer, err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(mut stream: TcpStream, ctx: &ServerContext) -> Result<()> {
    stream.set_nonblocking(false)?;
    let request = read_request(&mut stream)?;
    if request.method != "GET" {
        write_json_response(&mut stream, 405, r#"{"error":"method_not_allowed"}"#)?;
        return Ok(());
    }

    match request.path.as_str() {
        "/health" => {
            let body = serde_json::json!({
                "status": "ok",
                "ready": ctx.state.is_ready(),
                "sequence": ctx.state.sequence(),
            });
            write_response(&mut stream, 200, "application/json", body.to_string().as_bytes())
        }
        "/frame.jpg" => match ctx.state.snapshot() {
            Some(state) => {
                let jpeg = state.annotated_frame.to_jpeg(ctx.cfg.jpeg_quality)?;
                write_response(&mut stream, 200, "image/jpeg", &jpeg)
            }
            None => write_json_response(&mut stream, 503, r#"{"error":"not_ready"}"#),
        },
        "/report" => match ctx.state.latest_report() {
            Some(report) => {
                let payload = serde_json::to_vec(report.as_ref())?;
                write_response(&mut stream, 200, "application/json", &payload)
            }
            None => write_json_response(&mut stream, 404, r#"{"error":"no_report"}"#),
        },
        "/stream.mjpg" => stream_mjpeg(&mut stream, ctx),
        _ => write_json_response(&mut stream, 404, r#"{"error":"not_found"}"#),
    }
}

/// Push a new part whenever a newer state is published, until the viewer leaves
/// or the server shuts down.
fn stream_mjpeg(stream: &mut TcpStream, ctx: &ServerContext) -> Result<()> {
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: multipart/x-mixed-replace; boundary={}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        STREAM_BOUNDARY
    );
    stream.write_all(header.as_bytes())?;

    let min_gap = Duration::from_millis(1000 / u64::from(ctx.cfg.max_fps.max(1)));
    let mut last_sequence = 0;
    let mut last_sent: Option<Instant> = None;
    while !ctx.shutdown.load(Ordering::SeqCst) {
        let Some(state) = ctx.state.wait_for_newer(last_sequence, STREAM_WAIT) else {
            continue;
        };
        if let Some(sent) = last_sent {
            let elapsed = sent.elapsed();
            if elapsed < min_gap {
                std::thread::sleep(min_gap - elapsed);
            }
        }
        let jpeg = state.annotated_frame.to_jpeg(ctx.cfg.jpeg_quality)?;
        let part = format!(
            "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
            STREAM_BOUNDARY,
            jpeg.len()
        );
        stream.write_all(part.as_bytes())?;
        stream.write_all(&jpeg)?;
        stream.write_all(b"\r\n")?;
        stream.flush()?;
        last_sequence = state.sequence;
        last_sent = Some(Instant::now());
    }
    Ok(())
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!("request too large"));
        }
        if data.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    parse_request(&data)
}

fn parse_request(data: &[u8]) -> Result<HttpRequest> {
    let text = String::from_utf8_lossy(data);
    let mut lines = text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }
    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
        headers,
    })
}

fn write_json_response(stream: &mut TcpStream, status: u16, body: &str) -> Result<()> {
    write_response(stream, status, "application/json", body.as_bytes())
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        503 => "HTTP/1.1 503 Service Unavailable",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    #[allow(dead_code)]
    headers: HashMap<String, String>,
}
