//! Scripted HTTP/1.1 server for tests: one canned reply per connection, in
//! order, repeating the last one once the script runs out.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use reqwest::{StatusCode, Url};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub(crate) enum Reply {
    Status { status: u16, body: String },
    /// Read the request, then never answer.
    Hang,
    /// Send the head and the first bytes of a longer body, then go quiet.
    Stall { status: u16, partial: String },
}

impl Reply {
    pub(crate) fn json(status: u16, body: &str) -> Self {
        Reply::Status {
            status,
            body: body.to_string(),
        }
    }
}

pub(crate) struct ScriptedServer {
    addr: SocketAddr,
    hits: Arc<AtomicUsize>,
    hit_times: Arc<Mutex<Vec<Instant>>>,
    requests: Arc<Mutex<Vec<String>>>,
    task: JoinHandle<()>,
}

impl ScriptedServer {
    pub(crate) async fn start(replies: Vec<Reply>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind test listener");
        let addr = listener.local_addr().expect("listener address");
        let hits = Arc::new(AtomicUsize::new(0));
        let hit_times = Arc::new(Mutex::new(Vec::new()));
        let requests = Arc::new(Mutex::new(Vec::new()));

        let task = {
            let hits = Arc::clone(&hits);
            let hit_times = Arc::clone(&hit_times);
            let requests = Arc::clone(&requests);
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    hit_times.lock().expect("hit times lock").push(Instant::now());
                    let index = hits.fetch_add(1, Ordering::SeqCst);
                    let reply = replies
                        .get(index)
                        .or_else(|| replies.last())
                        .cloned()
                        .unwrap_or_else(|| Reply::json(200, "{}"));
                    let requests = Arc::clone(&requests);
                    tokio::spawn(serve(stream, reply, requests));
                }
            })
        };

        Self {
            addr,
            hits,
            hit_times,
            requests,
            task,
        }
    }

    pub(crate) fn url(&self, path: &str) -> Url {
        Url::parse(&format!("http://{}{}", self.addr, path)).expect("valid test url")
    }

    pub(crate) fn base_url(&self) -> String {
        format!("http://{}/", self.addr)
    }

    pub(crate) fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    /// When each connection was accepted, in order.
    pub(crate) fn hit_times(&self) -> Vec<Instant> {
        self.hit_times.lock().expect("hit times lock").clone()
    }

    pub(crate) fn requests(&self) -> Vec<String> {
        self.requests.lock().expect("requests lock").clone()
    }
}

impl Drop for ScriptedServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// A URL on a port nothing listens on.
pub(crate) fn refused_url(path: &str) -> Url {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind probe listener");
    let addr = listener.local_addr().expect("probe address");
    drop(listener);
    Url::parse(&format!("http://{addr}{path}")).expect("valid refused url")
}

async fn serve(mut stream: TcpStream, reply: Reply, requests: Arc<Mutex<Vec<String>>>) {
    let request = read_request(&mut stream).await;
    requests.lock().expect("requests lock").push(request);

    match reply {
        Reply::Status { status, body } => {
            let response = format!("{}{body}", head(status, body.len()));
            let _ = stream.write_all(response.as_bytes()).await;
            let _ = stream.shutdown().await;
        }
        Reply::Hang => tokio::time::sleep(Duration::from_secs(3600)).await,
        Reply::Stall { status, partial } => {
            let response = format!("{}{partial}", head(status, partial.len() + 100));
            let _ = stream.write_all(response.as_bytes()).await;
            let _ = stream.flush().await;
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
    }
}

fn head(status: u16, content_length: usize) -> String {
    let reason = StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("Status");
    format!(
        "HTTP/1.1 {status} {reason}\r\ncontent-type: application/json\r\ncontent-length: {content_length}\r\nconnection: close\r\n\r\n"
    )
}

async fn read_request(stream: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..end]).to_lowercase();
            let body = &buf[end + 4..];
            let content_length = head
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok());
            let complete = match content_length {
                Some(len) => body.len() >= len,
                None if head.contains("transfer-encoding: chunked") => body.ends_with(b"0\r\n\r\n"),
                None => true,
            };
            if complete {
                break;
            }
        }
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}
