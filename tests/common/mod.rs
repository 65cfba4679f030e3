#![allow(dead_code)]

use anyhow::anyhow;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

const MAX_REQUEST_BYTES: usize = 16 * 1024 * 1024;

type RouteKey = (String, String);

#[derive(Clone)]
struct StubReply {
    status: u16,
    body: Vec<u8>,
    content_type: String,
    delay: Duration,
}

struct RouteScript {
    replies: Vec<StubReply>,
    cursor: usize,
}

impl RouteScript {
    /// Serves the scripted replies in order; the last one repeats.
    fn next_reply(&mut self) -> StubReply {
        let index = self.cursor.min(self.replies.len() - 1);
        let reply = self.replies[index].clone();
        self.cursor += 1;
        reply
    }
}

#[derive(Clone, Debug)]
pub struct ReceivedRequest {
    pub method: String,
    pub path: String,
    pub raw_path: String,
    pub body: String,
}

/// Minimal scripted HTTP backend for driving the kiosk flows in tests.
pub struct StubBackend {
    addr: SocketAddr,
    routes: Arc<Mutex<HashMap<RouteKey, RouteScript>>>,
    requests: Arc<Mutex<Vec<ReceivedRequest>>>,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl StubBackend {
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind stub backend");
        listener.set_nonblocking(true).expect("nonblocking listener");
        let addr = listener.local_addr().expect("stub backend addr");
        let routes: Arc<Mutex<HashMap<RouteKey, RouteScript>>> = Arc::default();
        let requests: Arc<Mutex<Vec<ReceivedRequest>>> = Arc::default();
        let shutdown = Arc::new(AtomicBool::new(false));

        let join = {
            let routes = Arc::clone(&routes);
            let requests = Arc::clone(&requests);
            let shutdown = Arc::clone(&shutdown);
            std::thread::spawn(move || {
                while !shutdown.load(Ordering::SeqCst) {
                    match listener.accept() {
                        Ok((stream, _)) => {
                            if let Err(err) = handle_connection(stream, &routes, &requests) {
                                eprintln!("stub backend request failed: {err}");
                            }
                        }
                        Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                            std::thread::sleep(Duration::from_millis(10));
                        }
                        Err(_) => break,
                    }
                }
            })
        };

        Self {
            addr,
            routes,
            requests,
            shutdown,
            join: Some(join),
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Scripts one JSON reply that repeats for every hit.
    pub fn route(&self, method: &str, path: &str, status: u16, body: &str) {
        self.route_scripted(method, path, vec![json_reply(status, body, Duration::ZERO)]);
    }

    /// Scripts a sequence of JSON replies; the last one repeats.
    pub fn route_sequence(&self, method: &str, path: &str, replies: &[(u16, &str)]) {
        let replies = replies
            .iter()
            .map(|(status, body)| json_reply(*status, body, Duration::ZERO))
            .collect();
        self.route_scripted(method, path, replies);
    }

    /// Scripts a JSON reply that is held back for `delay` before sending.
    pub fn route_with_delay(
        &self,
        method: &str,
        path: &str,
        status: u16,
        body: &str,
        delay: Duration,
    ) {
        self.route_scripted(method, path, vec![json_reply(status, body, delay)]);
    }

    /// Scripts a binary JPEG reply for snapshot endpoints.
    pub fn route_jpeg(&self, path: &str, bytes: &[u8]) {
        self.route_scripted(
            "GET",
            path,
            vec![StubReply {
                status: 200,
                body: bytes.to_vec(),
                content_type: "image/jpeg".to_string(),
                delay: Duration::ZERO,
            }],
        );
    }

    fn route_scripted(&self, method: &str, path: &str, replies: Vec<StubReply>) {
        self.routes.lock().unwrap().insert(
            (method.to_string(), path.to_string()),
            RouteScript { replies, cursor: 0 },
        );
    }

    pub fn requests(&self) -> Vec<ReceivedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_for(&self, path: &str) -> Vec<ReceivedRequest> {
        self.requests()
            .into_iter()
            .filter(|request| request.path == path)
            .collect()
    }

    pub fn stop(mut self) {
        self.shutdown_now();
    }

    fn shutdown_now(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for StubBackend {
    fn drop(&mut self) {
        self.shutdown_now();
    }
}

fn json_reply(status: u16, body: &str, delay: Duration) -> StubReply {
    StubReply {
        status,
        body: body.as_bytes().to_vec(),
        content_type: "application/json".to_string(),
        delay,
    }
}

fn handle_connection(
    mut stream: TcpStream,
    routes: &Arc<Mutex<HashMap<RouteKey, RouteScript>>>,
    requests: &Arc<Mutex<Vec<ReceivedRequest>>>,
) -> anyhow::Result<()> {
    let request = read_request(&mut stream)?;
    requests.lock().unwrap().push(request.clone());

    let reply = routes
        .lock()
        .unwrap()
        .get_mut(&(request.method.clone(), request.path.clone()))
        .map(|script| script.next_reply())
        .unwrap_or_else(|| json_reply(404, r#"{"error":"not_found"}"#, Duration::ZERO));

    if !reply.delay.is_zero() {
        std::thread::sleep(reply.delay);
    }
    write_response(&mut stream, reply.status, &reply.content_type, &reply.body)
}

fn read_request(stream: &mut TcpStream) -> anyhow::Result<ReceivedRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut buf = [0u8; 4096];
    let mut data = Vec::new();
    let header_end = loop {
        if let Some(pos) = data.windows(4).position(|window| window == b"\r\n\r\n") {
            break pos;
        }
        if data.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!("request too large"));
        }
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("connection closed mid-headers"));
        }
        data.extend_from_slice(&buf[..n]);
    };

    let header_text = String::from_utf8_lossy(&data[..header_end]).to_string();
    let mut lines = header_text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts
        .next()
        .ok_or_else(|| anyhow!("missing method"))?
        .to_string();
    let raw_path = parts
        .next()
        .ok_or_else(|| anyhow!("missing path"))?
        .to_string();

    let mut content_length = 0usize;
    for line in lines {
        if let Some((key, value)) = line.split_once(':') {
            if key.trim().eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().unwrap_or(0);
            }
        }
    }

    let body_start = header_end + 4;
    while data.len() < body_start + content_length {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
    }
    let body_end = (body_start + content_length).min(data.len());
    let body = String::from_utf8_lossy(&data[body_start..body_end]).to_string();
    let path = raw_path
        .split('?')
        .next()
        .unwrap_or(&raw_path)
        .to_string();

    Ok(ReceivedRequest {
        method,
        path,
        raw_path,
        body,
    })
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> anyhow::Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        400 => "HTTP/1.1 400 Bad Request",
        404 => "HTTP/1.1 404 Not Found",
        409 => "HTTP/1.1 409 Conflict",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nConnection: close\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    Ok(())
}
