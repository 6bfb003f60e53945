use crate::config::{ApiSettings, VideoSettings};
use crate::error::AnalysisError;
use crate::ingest::Upload;
use crate::model::ModelService;
use crate::pipeline::{AnalysisReport, Pipeline};
use crate::present::RecordingPresenter;
use anyhow::{anyhow, Result};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const MAX_HEADER_BYTES: usize = 8192;
const HEADER_TIMEOUT: Duration = Duration::from_secs(2);
const BODY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    /// Uploads above this many bytes are refused with 413 before being read.
    pub max_upload_bytes: u64,
    /// Deadline for receiving a whole upload body, not per read.
    pub body_timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self::from(&ApiSettings::default())
    }
}

impl From<&ApiSettings> for ApiConfig {
    fn from(settings: &ApiSettings) -> Self {
        Self {
            addr: settings.addr.clone(),
            max_upload_bytes: settings.max_upload_bytes,
            body_timeout: BODY_TIMEOUT,
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

/// HTTP front end for the analysis pipeline.
///
/// Requests are served one at a time on a single thread, so one analysis
/// runs to completion before the next upload is read.
pub struct ApiServer {
    cfg: ApiConfig,
    model: Arc<ModelService>,
    video: VideoSettings,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, model: Arc<ModelService>, video: VideoSettings) -> Self {
        Self { cfg, model, video }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        if configured_addr.ip().is_loopback() && !addr.ip().is_loopback() {
            return Err(anyhow!(
                "api configured for loopback address '{}', but bound to non-loopback address '{}'",
                configured_addr,
                addr
            ));
        }
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let mut state = ApiState {
            model: self.model,
            video: self.video,
            max_upload_bytes: self.cfg.max_upload_bytes,
            body_timeout: self.cfg.body_timeout,
            latest_png: None,
        };
        let join = std::thread::spawn(move || {
            if let Err(err) = run_api(listener, &mut state, shutdown_thread) {
                log::error!("binsight api stopped: {}", err);
            }
        });

        log::info!("binsight api listening on {}", addr);
        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

struct ApiState {
    model: Arc<ModelService>,
    video: VideoSettings,
    max_upload_bytes: u64,
    body_timeout: Duration,
    latest_png: Option<Vec<u8>>,
}

fn run_api(listener: TcpListener, state: &mut ApiState, shutdown: Arc<AtomicBool>) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                if let Err(err) = handle_connection(stream, state) {
                    log::warn!("binsight api request rejected: {}", err);
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

fn handle_connection(mut stream: TcpStream, state: &mut ApiState) -> Result<()> {
    stream.set_nonblocking(false)?;
    let mut request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(err) => {
            write_json_response(&mut stream, 400, r#"{"error":"bad_request"}"#)?;
            return Err(err);
        }
    };

    let route = (request.method.clone(), request.path.clone());
    match (route.0.as_str(), route.1.as_str()) {
        ("GET", "/health") => write_json_response(&mut stream, 200, r#"{"status":"ok"}"#),
        ("GET", "/model") => serve_model(&mut stream, &request, &state.model),
        ("POST", "/analyze") => serve_analyze(&mut stream, &mut request, state),
        ("GET", "/annotated/latest") => match &state.latest_png {
            Some(png) => write_response(&mut stream, 200, "image/png", &[], png),
            None => write_json_response(&mut stream, 404, r#"{"error":"no_annotated_frame"}"#),
        },
        (_, "/health" | "/model" | "/analyze" | "/annotated/latest") => {
            write_json_response(&mut stream, 405, r#"{"error":"method_not_allowed"}"#)
        }
        _ => write_json_response(&mut stream, 404, r#"{"error":"not_found"}"#),
    }
}

fn serve_model(stream: &mut TcpStream, request: &HttpRequest, model: &ModelService) -> Result<()> {
    let artifact = model.artifact();
    let etag = format!("\"{}\"", artifact.sha256_hex());
    if request.headers.get("if-none-match") == Some(&etag) {
        return write_response(stream, 304, "application/octet-stream", &[("ETag", etag)], &[]);
    }
    let headers = [
        (
            "Content-Disposition",
            format!("attachment; filename=\"{}\"", artifact.download_name()),
        ),
        ("ETag", etag),
    ];
    write_response(
        stream,
        200,
        "application/octet-stream",
        &headers,
        artifact.bytes(),
    )
}

fn serve_analyze(
    stream: &mut TcpStream,
    request: &mut HttpRequest,
    state: &mut ApiState,
) -> Result<()> {
    let Some(file_name) = request.query_param("filename") else {
        return write_json_response(stream, 400, r#"{"error":"missing_filename"}"#);
    };
    let length = match request.headers.get("content-length") {
        Some(value) => match value.parse::<u64>() {
            Ok(length) => length,
            Err(_) => return write_json_response(stream, 400, r#"{"error":"bad_content_length"}"#),
        },
        None => return write_json_response(stream, 411, r#"{"error":"length_required"}"#),
    };
    if length > state.max_upload_bytes {
        return write_json_response(stream, 413, r#"{"error":"upload_too_large"}"#);
    }
    let body = match read_body(stream, request, length, state.body_timeout) {
        Ok(body) => body,
        Err(err) => {
            write_json_response(stream, 400, r#"{"error":"truncated_body"}"#)?;
            return Err(err);
        }
    };

    let upload = Upload::new(file_name, body);
    let mut presenter = RecordingPresenter::new();
    // Fresh per request so every run starts from Idle.
    let mut pipeline = Pipeline::new(state.model.clone(), state.video.clone());
    let result = pipeline.analyze(&upload, &mut presenter);
    let statuses: Vec<Value> = presenter
        .statuses()
        .into_iter()
        .map(|(level, text)| json!({ "level": level, "text": text }))
        .collect();

    match result {
        Ok(report) => {
            if let Some(annotated) = presenter.take_latest_annotated() {
                match annotated.encode_png() {
                    Ok(png) => state.latest_png = Some(png),
                    Err(err) => log::warn!("could not encode annotated frame: {err:#}"),
                }
            }
            let mut body = report_body(&report);
            body["state"] = json!(pipeline.state().as_str());
            body["statuses"] = Value::Array(statuses);
            write_response(
                stream,
                200,
                "application/json",
                &[],
                &serde_json::to_vec(&body)?,
            )
        }
        Err(err) => {
            let body = json!({
                "state": pipeline.state().as_str(),
                "error": err.code(),
                "message": err.to_string(),
                "statuses": statuses,
            });
            write_response(
                stream,
                status_for_error(&err),
                "application/json",
                &[],
                &serde_json::to_vec(&body)?,
            )
        }
    }
}

fn report_body(report: &AnalysisReport) -> Value {
    match report {
        AnalysisReport::Image {
            detection,
            caption,
            inference_error,
        } => json!({
            "kind": report.kind(),
            "detection": detection,
            "caption": caption,
            "inference_error": inference_error,
            "summary": null,
            "previews": 1,
        }),
        AnalysisReport::Video {
            summary,
            previews,
            inference_failures,
        } => json!({
            "kind": report.kind(),
            "detection": null,
            "caption": null,
            "inference_failures": inference_failures,
            "summary": summary,
            "previews": previews,
        }),
    }
}

fn status_for_error(err: &AnalysisError) -> u16 {
    match err {
        AnalysisError::UnsupportedFormat(_) => 415,
        AnalysisError::CannotOpen(_) | AnalysisError::DecodeError { .. } => 422,
        _ => 500,
    }
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(HEADER_TIMEOUT))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    let header_end = loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("connection closed before end of headers"));
        }
        data.extend_from_slice(&buf[..n]);
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        if data.len() > MAX_HEADER_BYTES {
            return Err(anyhow!("request headers too large"));
        }
    };
    let body_prefix = data.split_off(header_end + 4);
    let text = String::from_utf8_lossy(&data[..header_end]);
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
    let (path, query) = match raw_path.split_once('?') {
        Some((path, query)) => (path, query),
        None => (raw_path, ""),
    };
    let query = url::form_urlencoded::parse(query.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    Ok(HttpRequest {
        method: method.to_string(),
        path: path.to_string(),
        query,
        headers,
        body_prefix,
    })
}

fn read_body(
    stream: &mut TcpStream,
    request: &mut HttpRequest,
    length: u64,
    timeout: Duration,
) -> Result<Vec<u8>> {
    let mut body = std::mem::take(&mut request.body_prefix);
    if body.len() as u64 >= length {
        body.truncate(length as usize);
        return Ok(body);
    }
    let deadline = Instant::now() + timeout;
    let mut buf = [0u8; 64 * 1024];
    while (body.len() as u64) < length {
        let left = deadline
            .checked_duration_since(Instant::now())
            .filter(|left| !left.is_zero())
            .ok_or_else(|| {
                anyhow!(
                    "body not received within {:?} ({} of {} bytes)",
                    timeout,
                    body.len(),
                    length
                )
            })?;
        stream.set_read_timeout(Some(left))?;
        let want = (length - body.len() as u64).min(buf.len() as u64) as usize;
        let n = stream.read(&mut buf[..want])?;
        if n == 0 {
            return Err(anyhow!(
                "body ended after {} of {} bytes",
                body.len(),
                length
            ));
        }
        body.extend_from_slice(&buf[..n]);
    }
    Ok(body)
}

fn write_json_response(stream: &mut TcpStream, status: u16, body: &str) -> Result<()> {
    write_response(stream, status, "application/json", &[], body.as_bytes())
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    extra_headers: &[(&str, String)],
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        304 => "HTTP/1.1 304 Not Modified",
        400 => "HTTP/1.1 400 Bad Request",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        411 => "HTTP/1.1 411 Length Required",
        413 => "HTTP/1.1 413 Payload Too Large",
        415 => "HTTP/1.1 415 Unsupported Media Type",
        422 => "HTTP/1.1 422 Unprocessable Entity",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let mut header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    for (name, value) in extra_headers {
        header.push_str(&format!("{name}: {value}\r\n"));
    }
    header.push_str("\r\n");
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    stream.flush()?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    query: Vec<(String, String)>,
    headers: HashMap<String, String>,
    /// Body bytes that arrived together with the headers.
    body_prefix: Vec<u8>,
}

impl HttpRequest {
    fn query_param(&self, key: &str) -> Option<String> {
        self.query
            .iter()
            .find(|(k, v)| k == key && !v.trim().is_empty())
            .map(|(_, v)| v.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_status_codes() {
        assert_eq!(
            status_for_error(&AnalysisError::UnsupportedFormat("txt".into())),
            415
        );
        assert_eq!(status_for_error(&AnalysisError::CannotOpen("x".into())), 422);
        assert_eq!(
            status_for_error(&AnalysisError::DecodeError {
                frame: 3,
                reason: "x".into()
            }),
            422
        );
        assert_eq!(
            status_for_error(&AnalysisError::Interrupted { frames: 1 }),
            500
        );
    }

    #[test]
    fn query_param_skips_blank_values() {
        let request = HttpRequest {
            method: "POST".into(),
            path: "/analyze".into(),
            query: vec![
                ("filename".into(), " ".into()),
                ("filename".into(), "bin 1.png".into()),
            ],
            headers: HashMap::new(),
            body_prefix: Vec::new(),
        };
        assert_eq!(request.query_param("filename").as_deref(), Some("bin 1.png"));
        assert_eq!(request.query_param("other"), None);
    }
}
