//! Local HTTP control endpoint.
//!
//! `POST /` with `{"script": "...", "args": [...]}` launches a script (this is
//! what the `run` shim and the `bin/` shims call). `GET /add-script?script=<gist>`
//! imports a gist after confirmation. Everything is plain text.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, error, info};

use crate::error::{HostError, Result};
use crate::gist::ImportOutcome;

/// Largest request body accepted
const MAX_BODY: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LaunchRequest {
    pub script: String,
    pub args: Vec<String>,
}

/// What the endpoint triggers in the host.
pub trait ControlHandler: Send + Sync {
    /// Start a run; must not wait for it to finish
    fn launch(&self, request: LaunchRequest);
    /// Import a gist; may block on user confirmation
    fn add_script(&self, gist: &str) -> ImportOutcome;
}

pub struct ControlServer;

impl ControlServer {
    /// Bind `127.0.0.1:<port>` (0 picks a free port) and serve on a thread.
    pub fn start(port: u16, handler: Arc<dyn ControlHandler>) -> Result<ServerHandle> {
        let addr = format!("127.0.0.1:{}", port);
        let listener = TcpListener::bind(&addr).map_err(|e| HostError::io(&addr, e))?;
        listener
            .set_nonblocking(true)
            .map_err(|e| HostError::io(&addr, e))?;
        let local_addr = listener.local_addr().map_err(|e| HostError::io(&addr, e))?;

        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);

        let thread = thread::Builder::new()
            .name("control-server".into())
            .spawn(move || {
                info!(addr = %local_addr, "Control endpoint listening");
                while flag.load(Ordering::SeqCst) {
                    match listener.accept() {
                        Ok((stream, peer)) => {
                            debug!(peer = %peer, "Control connection");
                            let handler = Arc::clone(&handler);
                            thread::spawn(move || {
                                if let Err(e) = handle_connection(stream, handler.as_ref()) {
                                    error!(error = %e, "Error handling control request");
                                }
                            });
                        }
                        Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                            thread::sleep(Duration::from_millis(10));
                        }
                        Err(e) => error!(error = %e, "Accept error"),
                    }
                }
                info!("Control endpoint stopped");
            })
            .map_err(|e| HostError::io(&addr, e))?;

        Ok(ServerHandle {
            running,
            local_addr,
            thread: Some(thread),
        })
    }
}

/// Handle for controlling the running server
pub struct ServerHandle {
    running: Arc<AtomicBool>,
    local_addr: SocketAddr,
    thread: Option<thread::JoinHandle<()>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop accepting and wait for the accept loop to exit
    pub fn stop(mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

fn handle_connection(mut stream: TcpStream, handler: &dyn ControlHandler) -> std::io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(Duration::from_secs(10)))?;
    let mut reader = BufReader::new(stream.try_clone()?);

    let mut request_line = String::new();
    reader.read_line(&mut request_line)?;
    let parts: Vec<&str> = request_line.split_whitespace().collect();
    if parts.len() < 2 {
        return send_response(&mut stream, 400, "Bad Request", "Invalid request line");
    }
    let method = parts[0];
    let target = parts[1];

    let mut headers = HashMap::new();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        if let Some((key, value)) = line.split_once(':') {
            headers.insert(key.trim().to_lowercase(), value.trim().to_string());
        }
    }

    let (path, query) = target.split_once('?').unwrap_or((target, ""));
    debug!(method, path, "Control request");

    match (method, path) {
        ("POST", "/") => {
            let body = match read_body(&mut reader, &headers) {
                Ok(body) => body,
                Err(e) => {
                    debug!(error = %e, "Short or unreadable request body");
                    return send_response(&mut stream, 400, "Bad Request", "Malformed json");
                }
            };
            match parse_launch(&headers, &body) {
                Some(request) => {
                    info!(script = %request.script, args = request.args.len(), "Launch via control endpoint");
                    handler.launch(request);
                    send_response(&mut stream, 200, "OK", "Launched script!")
                }
                None => send_response(&mut stream, 400, "Bad Request", "Malformed json"),
            }
        }
        ("GET", "/add-script") => match query_param(query, "script") {
            Some(gist) => {
                let (status, reason, body) = match handler.add_script(&gist) {
                    ImportOutcome::Added(_) => (200, "OK", "Added script".to_string()),
                    ImportOutcome::Cancelled => (200, "OK", "Cancelled".to_string()),
                    ImportOutcome::InvalidGist => (400, "Bad Request", "Invalid gist".to_string()),
                    ImportOutcome::FetchFailed(_) => (502, "Bad Gateway", "Gist fetch failed".to_string()),
                    ImportOutcome::AlreadyExists(name) => {
                        (409, "Conflict", format!("{} already exists", name))
                    }
                };
                send_response(&mut stream, status, reason, &body)
            }
            None => send_response(&mut stream, 400, "Bad Request", "Invalid gist"),
        },
        _ => send_response(&mut stream, 404, "Not Found", "Not found"),
    }
}

fn read_body<R: Read>(reader: &mut R, headers: &HashMap<String, String>) -> std::io::Result<Vec<u8>> {
    let length: usize = headers
        .get("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
        .min(MAX_BODY);
    let mut body = vec![0u8; length];
    reader.read_exact(&mut body)?;
    Ok(body)
}

fn parse_launch(headers: &HashMap<String, String>, body: &[u8]) -> Option<LaunchRequest> {
    let is_json = headers
        .get("content-type")
        .is_some_and(|ct| ct.to_lowercase().starts_with("application/json"));
    if !is_json {
        return None;
    }
    serde_json::from_slice::<LaunchRequest>(body).ok()
}

/// First value for `key`, percent-decoded
fn query_param(query: &str, key: &str) -> Option<String> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == key)
        .map(|(_, v)| percent_decode(v))
        .filter(|v| !v.is_empty())
}

fn percent_decode(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
                match hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                    Some(b) => {
                        out.push(b);
                        i += 2;
                    }
                    None => out.push(b'%'),
                }
            }
            b => out.push(b),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn send_response(stream: &mut TcpStream, status: u16, reason: &str, body: &str) -> std::io::Result<()> {
    let response = format!(
        "HTTP/1.1 {} {}\r\n\
         Content-Type: text/plain; charset=utf-8\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {}",
        status,
        reason,
        body.len(),
        body
    );
    stream.write_all(response.as_bytes())?;
    stream.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::path::PathBuf;

    #[derive(Default)]
    struct FakeHandler {
        launched: Mutex<Vec<LaunchRequest>>,
        gists: Mutex<Vec<String>>,
    }

    impl ControlHandler for FakeHandler {
        fn launch(&self, request: LaunchRequest) {
            self.launched.lock().push(request);
        }

        fn add_script(&self, gist: &str) -> ImportOutcome {
            self.gists.lock().push(gist.to_string());
            match gist {
                "good" => ImportOutcome::Added(PathBuf::from("/kit/scripts/good.ts")),
                "declined" => ImportOutcome::Cancelled,
                "offline" => ImportOutcome::FetchFailed("offline".into()),
                _ => ImportOutcome::InvalidGist,
            }
        }
    }

    fn server() -> (Arc<FakeHandler>, ServerHandle) {
        let handler = Arc::new(FakeHandler::default());
        let handle = ControlServer::start(0, handler.clone()).unwrap();
        (handler, handle)
    }

    fn request(addr: SocketAddr, raw: &str) -> (u16, String) {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        stream.write_all(raw.as_bytes()).unwrap();
        stream.flush().unwrap();

        let mut response = String::new();
        stream.read_to_string(&mut response).unwrap();
        let status = response
            .lines()
            .next()
            .and_then(|l| l.split_whitespace().nth(1))
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        let body = response.split("\r\n\r\n").nth(1).unwrap_or("").to_string();
        (status, body)
    }

    fn post(addr: SocketAddr, content_type: &str, body: &str) -> (u16, String) {
        request(
            addr,
            &format!(
                "POST / HTTP/1.1\r\nHost: localhost\r\nContent-Type: {}\r\nContent-Length: {}\r\n\r\n{}",
                content_type,
                body.len(),
                body
            ),
        )
    }

    fn get(addr: SocketAddr, path: &str) -> (u16, String) {
        request(addr, &format!("GET {} HTTP/1.1\r\nHost: localhost\r\n\r\n", path))
    }

    #[test]
    fn test_short_body_gets_plain_text_error() {
        let (handler, handle) = server();
        let mut stream = TcpStream::connect(handle.local_addr()).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        stream
            .write_all(
                b"POST / HTTP/1.1\r\nContent-Type: application/json\r\nContent-Length: 100\r\n\r\n{}",
            )
            .unwrap();
        stream.shutdown(std::net::Shutdown::Write).unwrap();

        let mut response = String::new();
        stream.read_to_string(&mut response).unwrap();
        assert!(response.starts_with("HTTP/1.1 400"));
        assert!(response.ends_with("\r\n\r\nMalformed json"));
        assert!(handler.launched.lock().is_empty());
        handle.stop();
    }

    #[test]
    fn test_post_launches_script() {
        let (handler, handle) = server();
        let (status, body) = post(
            handle.local_addr(),
            "application/json",
            r#"{"script":"greet.ts","args":["Ada","x y"]}"#,
        );
        assert_eq!(status, 200);
        assert_eq!(body, "Launched script!");
        assert_eq!(
            handler.launched.lock().clone(),
            vec![LaunchRequest {
                script: "greet.ts".into(),
                args: vec!["Ada".into(), "x y".into()],
            }]
        );
        handle.stop();
    }

    #[test]
    fn test_post_rejects_malformed_bodies() {
        let (handler, handle) = server();
        let addr = handle.local_addr();
        for (ct, body) in [
            ("application/json", "{not json"),
            ("application/json", r#"{"script":"a.ts"}"#),
            ("application/json", r#"{"script":"a.ts","args":[1]}"#),
            ("text/plain", r#"{"script":"a.ts","args":[]}"#),
        ] {
            let (status, text) = post(addr, ct, body);
            assert_eq!(status, 400, "{} {}", ct, body);
            assert_eq!(text, "Malformed json");
        }
        assert!(handler.launched.lock().is_empty());
        handle.stop();
    }

    #[test]
    fn test_add_script_outcomes() {
        let (handler, handle) = server();
        let addr = handle.local_addr();
        assert_eq!(get(addr, "/add-script?script=good"), (200, "Added script".into()));
        assert_eq!(get(addr, "/add-script?script=declined"), (200, "Cancelled".into()));
        assert_eq!(get(addr, "/add-script?script=offline"), (502, "Gist fetch failed".into()));
        assert_eq!(get(addr, "/add-script?script=bad"), (400, "Invalid gist".into()));
        assert_eq!(get(addr, "/add-script"), (400, "Invalid gist".into()));

        get(addr, "/add-script?script=https%3A%2F%2Fgist.github.com%2Fu%2Fabc");
        assert_eq!(
            handler.gists.lock().last().map(String::as_str),
            Some("https://gist.github.com/u/abc")
        );
        handle.stop();
    }

    #[test]
    fn test_unknown_route_is_404() {
        let (_handler, handle) = server();
        assert_eq!(get(handle.local_addr(), "/nope"), (404, "Not found".into()));
        handle.stop();
    }

    #[test]
    fn test_stop() {
        let (_handler, handle) = server();
        assert!(handle.is_running());
        handle.stop();
    }

    #[test]
    fn test_percent_decode() {
        assert_eq!(percent_decode("a%20b+c"), "a b c");
        assert_eq!(percent_decode("100%"), "100%");
        assert_eq!(percent_decode("%zz"), "%zz");
    }
}
