//! HTTP surface of the analysis service.
//!
//! Endpoints:
//! - `GET /health`: liveness plus model readiness
//! - `POST /analyze`: `{"image": "<base64>"}` in, analysis report out
//! - `GET /test`: service banner with the configured model path
//!
//! Every response carries permissive CORS headers and `OPTIONS` preflight
//! requests are answered directly.

use crate::analysis::{AnalyzeError, Analyzer};
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

const MAX_HEADER_BYTES: usize = 8192;
const DEFAULT_MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    pub max_body_bytes: usize,
    /// Reported by `/test`.
    pub model_path: Option<PathBuf>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:5000".to_string(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            model_path: None,
        }
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    analyzer: Analyzer,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, analyzer: Analyzer) -> Self {
        Self { cfg, analyzer }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let cfg = Arc::new(self.cfg);
        let analyzer = self.analyzer;
        let join = std::thread::spawn(move || {
            if let Err(err) = run_api(listener, cfg, analyzer, shutdown_thread) {
                log::error!("analysis api stopped: {}", err);
            }
        });

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(
    listener: TcpListener,
    cfg: Arc<ApiConfig>,
    analyzer: Analyzer,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                let cfg = cfg.clone();
                let analyzer = analyzer.clone();
                std::thread::spawn(move || {
                    if let Err(err) = handle_connection(stream, &cfg, &analyzer) {
                        log::warn!("analysis api request from {} rejected: {}", peer, err);
                    }
                });
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

#[derive(Serialize)]
struct ErrorBody<'a> {
    success: bool,
    error: &'a str,
}

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
    model_loaded: bool,
    timestamp: chrono::DateTime<chrono::Local>,
}

#[derive(Serialize)]
struct TestBody {
    message: &'static str,
    model_loaded: bool,
    model_path: Option<String>,
}

#[derive(Deserialize)]
struct AnalyzeRequest {
    image: Option<String>,
}

fn handle_connection(mut stream: TcpStream, cfg: &ApiConfig, analyzer: &Analyzer) -> Result<()> {
    stream.set_nonblocking(false)?;
    let request = match read_request(&mut stream, cfg.max_body_bytes) {
        Ok(request) => request,
        Err(RequestError::TooLarge) => {
            write_error(&mut stream, 413, "Request body too large")?;
            return Err(anyhow!("request body too large"));
        }
        Err(RequestError::Malformed(err)) => {
            write_error(&mut stream, 400, "Malformed request")?;
            return Err(err);
        }
    };

    if request.method == "OPTIONS" {
        return write_response(&mut stream, 204, "application/json", b"");
    }

    match (request.method.as_str(), request.path.as_str()) {
        ("GET", "/health") => {
            let body = HealthBody {
                status: "healthy",
                model_loaded: analyzer.model().is_loaded(),
                timestamp: chrono::Local::now(),
            };
            write_json(&mut stream, 200, &body)
        }
        ("GET", "/test") => {
            let body = TestBody {
                message: "ML Service is running",
                model_loaded: analyzer.model().is_loaded(),
                model_path: cfg.model_path.as_ref().map(|p| p.display().to_string()),
            };
            write_json(&mut stream, 200, &body)
        }
        ("POST", "/analyze") => handle_analyze(&mut stream, &request, analyzer),
        (_, "/health" | "/test" | "/analyze") => {
            write_error(&mut stream, 405, "Method not allowed")
        }
        _ => write_error(&mut stream, 404, "Not found"),
    }
}

fn handle_analyze(stream: &mut TcpStream, request: &HttpRequest, analyzer: &Analyzer) -> Result<()> {
    let image = serde_json::from_slice::<AnalyzeRequest>(&request.body)
        .ok()
        .and_then(|req| req.image)
        .filter(|image| !image.trim().is_empty());
    let Some(image) = image else {
        return write_error(stream, 400, "No image provided");
    };

    match analyzer.analyze(&image) {
        Ok(report) => {
            log::info!(
                "analyzed {}x{} image: {} detections, severity {} (score {})",
                report.image_size.width,
                report.image_size.height,
                report.detection_count,
                report.suggested_severity,
                report.severity_score
            );
            write_json(stream, 200, &report)
        }
        Err(AnalyzeError::Decode(err)) => {
            log::warn!("rejected undecodable image: {}", err);
            write_error(stream, 400, "Invalid image format")
        }
        Err(AnalyzeError::ModelUnavailable) => {
            write_error(stream, 503, &AnalyzeError::ModelUnavailable.to_string())
        }
        Err(err) => {
            log::error!("analysis failed: {}", err);
            write_error(stream, 500, &err.to_string())
        }
    }
}

#[derive(Debug)]
enum RequestError {
    TooLarge,
    Malformed(anyhow::Error),
}

impl From<anyhow::Error> for RequestError {
    fn from(err: anyhow::Error) -> Self {
        RequestError::Malformed(err)
    }
}

impl From<std::io::Error> for RequestError {
    fn from(err: std::io::Error) -> Self {
        RequestError::Malformed(err.into())
    }
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    body: Vec<u8>,
}

fn read_request(
    stream: &mut TcpStream,
    max_body_bytes: usize,
) -> std::result::Result<HttpRequest, RequestError> {
    stream.set_read_timeout(Some(Duration::from_secs(10)))?;
    let mut buf = [0u8; 4096];
    let mut data = Vec::new();
    let header_end = loop {
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        if data.len() > MAX_HEADER_BYTES {
            return Err(anyhow!("request headers too large").into());
        }
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("connection closed before headers completed").into());
        }
        data.extend_from_slice(&buf[..n]);
    };

    let text = String::from_utf8_lossy(&data[..header_end]).into_owned();
    let mut lines = text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let mut headers = HashMap::new();
    for line in lines {
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }

    let content_length = match headers.get("content-length") {
        Some(value) => value
            .parse::<usize>()
            .map_err(|_| anyhow!("invalid content-length '{}'", value))?,
        None => 0,
    };
    if content_length > max_body_bytes {
        return Err(RequestError::TooLarge);
    }

    let mut body = data[header_end + 4..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!(
                "body truncated: expected {} bytes, received {}",
                content_length,
                body.len()
            )
            .into());
        }
        body.extend_from_slice(&buf[..n]);
    }
    body.truncate(content_length);

    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_uppercase(),
        path,
        body,
    })
}

fn write_json<T: Serialize>(stream: &mut TcpStream, status: u16, body: &T) -> Result<()> {
    let payload = serde_json::to_vec(body)?;
    write_response(stream, status, "application/json", &payload)
}

fn write_error(stream: &mut TcpStream, status: u16, error: &str) -> Result<()> {
    write_json(
        stream,
        status,
        &ErrorBody {
            success: false,
            error,
        },
    )
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        204 => "HTTP/1.1 204 No Content",
        400 => "HTTP/1.1 400 Bad Request",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        413 => "HTTP/1.1 413 Payload Too Large",
        503 => "HTTP/1.1 503 Service Unavailable",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\n\
         Access-Control-Allow-Origin: *\r\n\
         Access-Control-Allow-Methods: GET, POST, OPTIONS\r\n\
         Access-Control-Allow-Headers: Content-Type\r\n\
         Cache-Control: no-store\r\nConnection: close\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    Ok(())
}
