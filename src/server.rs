//! Bare-bones HTTP/1.1 webhook endpoint. One connection at a time: every
//! accepted event is handled to completion before the next request is read.

use anyhow::{Context, Result};
use serde_json::Value;
use std::{
    io::{self, BufRead, BufReader, Read, Write},
    net::{SocketAddr, TcpListener, TcpStream},
    sync::atomic::{AtomicBool, Ordering},
    thread,
    time::{Duration, Instant},
};

pub const WEBHOOK_PATH: &str = "/webhooks/analytics";

const MAX_HEAD_BYTES: u64 = 8 * 1024;
const MAX_HEADER_LINES: usize = 100;
const MAX_BODY_BYTES: usize = 1 << 20;
const IO_TIMEOUT: Duration = Duration::from_secs(5);
/// Upper bound on reading one whole request, however slowly it trickles in.
pub const REQUEST_DEADLINE: Duration = Duration::from_secs(10);
const ACCEPT_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    BadRequest,
    NotFound,
    MethodNotAllowed,
    PayloadTooLarge,
    HeaderTooLarge,
}

impl Status {
    pub fn code(self) -> u16 {
        match self {
            Status::Ok => 200,
            Status::BadRequest => 400,
            Status::NotFound => 404,
            Status::MethodNotAllowed => 405,
            Status::PayloadTooLarge => 413,
            Status::HeaderTooLarge => 431,
        }
    }

    fn reason(self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::BadRequest => "Bad Request",
            Status::NotFound => "Not Found",
            Status::MethodNotAllowed => "Method Not Allowed",
            Status::PayloadTooLarge => "Payload Too Large",
            Status::HeaderTooLarge => "Request Header Fields Too Large",
        }
    }
}

#[derive(thiserror::Error, Debug)]
enum RequestError {
    #[error(transparent)]
    Io(io::Error),
    #[error("malformed request: {0}")]
    Malformed(&'static str),
    #[error("request head exceeds {} bytes", MAX_HEAD_BYTES)]
    HeadTooLarge,
    #[error("body of {0} bytes exceeds limit")]
    TooLarge(usize),
}

impl From<io::Error> for RequestError {
    fn from(e: io::Error) -> Self {
        // read_line reports a non-UTF-8 head as InvalidData; that is the
        // client's fault, not a transport failure.
        match e.kind() {
            io::ErrorKind::InvalidData => RequestError::Malformed("request head is not UTF-8"),
            _ => RequestError::Io(e),
        }
    }
}

#[derive(Debug)]
struct Request {
    method: String,
    path: String,
    body: Vec<u8>,
}

pub struct WebhookServer {
    listener: TcpListener,
    request_deadline: Duration,
}

impl WebhookServer {
    pub fn bind(addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr).with_context(|| format!("bind {addr}"))?;
        Ok(Self {
            listener,
            request_deadline: REQUEST_DEADLINE,
        })
    }

    pub fn with_request_deadline(mut self, deadline: Duration) -> Self {
        self.request_deadline = deadline;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serves until `stop` is set, handing each accepted payload to
    /// `on_event`. The flag is checked between connections, so a request
    /// already being read finishes (or hits its deadline) first.
    pub fn serve(&self, stop: &AtomicBool, mut on_event: impl FnMut(&Value)) -> Result<()> {
        self.listener
            .set_nonblocking(true)
            .context("make listener non-blocking")?;
        log::info!(
            "👂 Listening for POST {WEBHOOK_PATH} on {}",
            self.local_addr()?
        );

        while !stop.load(Ordering::Relaxed) {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    if let Err(e) = self.handle(stream, peer, &mut on_event) {
                        log::warn!("connection failed: {e:#}");
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
                Err(e) => {
                    log::warn!("accept failed: {e}");
                    thread::sleep(ACCEPT_POLL);
                }
            }
        }

        log::info!("🛑 Stopped listening");
        Ok(())
    }

    /// Blocks for exactly one connection and answers it.
    pub fn accept_one(&self, on_event: &mut impl FnMut(&Value)) -> Result<Status> {
        let (stream, peer) = self.listener.accept().context("accept")?;
        self.handle(stream, peer, on_event)
    }

    fn handle(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        on_event: &mut impl FnMut(&Value),
    ) -> Result<Status> {
        // Some platforms hand out accepted sockets with the listener's mode.
        stream.set_nonblocking(false)?;
        stream.set_write_timeout(Some(IO_TIMEOUT))?;
        let until = Instant::now() + self.request_deadline;
        handle_connection(&stream, until, on_event).with_context(|| format!("peer {peer}"))
    }
}

/// Reads from a socket without letting the whole request outlast `until`.
/// Each read waits at most for the time left (and never longer than
/// [`IO_TIMEOUT`]), so a client trickling a byte at a time still gets cut off.
struct Deadline<'a> {
    stream: &'a TcpStream,
    until: Instant,
}

impl Read for Deadline<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let left = self.until.saturating_duration_since(Instant::now());
        if left.is_zero() {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "request deadline passed",
            ));
        }
        self.stream.set_read_timeout(Some(left.min(IO_TIMEOUT)))?;
        (&*self.stream).read(buf)
    }
}

fn handle_connection(
    stream: &TcpStream,
    until: Instant,
    on_event: &mut impl FnMut(&Value),
) -> Result<Status> {
    let mut reader = BufReader::new(Deadline { stream, until });
    let status = match read_request(&mut reader) {
        Ok(req) => {
            let status = match route(&req) {
                Ok(payload) => {
                    on_event(&payload);
                    Status::Ok
                }
                Err(status) => status,
            };
            log::info!("{} {} {}", status.code(), req.method, req.path);
            status
        }
        Err(RequestError::Io(e)) => return Err(e.into()),
        Err(e @ RequestError::TooLarge(_)) => {
            log::warn!("{e}");
            Status::PayloadTooLarge
        }
        Err(e @ RequestError::HeadTooLarge) => {
            log::warn!("{e}");
            Status::HeaderTooLarge
        }
        Err(e) => {
            log::warn!("{e}");
            Status::BadRequest
        }
    };
    write_response(&mut &*stream, status)?;
    Ok(status)
}

/// Method and route checks first, then the body must be JSON.
fn route(req: &Request) -> Result<Value, Status> {
    if req.method != "POST" {
        return Err(Status::MethodNotAllowed);
    }
    if req.path != WEBHOOK_PATH {
        return Err(Status::NotFound);
    }
    serde_json::from_slice(&req.body).map_err(|e| {
        log::warn!("webhook body is not JSON: {e}");
        Status::BadRequest
    })
}

fn read_request<R: BufRead>(reader: &mut R) -> Result<Request, RequestError> {
    let (method, path, content_length) = read_head(&mut reader.by_ref().take(MAX_HEAD_BYTES))?;
    let body = read_body(reader, content_length)?;
    Ok(Request { method, path, body })
}

/// Request line and headers, all within [`MAX_HEAD_BYTES`].
fn read_head<R: BufRead>(head: &mut io::Take<R>) -> Result<(String, String, usize), RequestError> {
    let mut line = String::new();
    if read_head_line(head, &mut line)? == 0 {
        return Err(RequestError::Malformed("empty request"));
    }
    let mut parts = line.split_whitespace();
    let method = parts
        .next()
        .ok_or(RequestError::Malformed("missing method"))?
        .to_owned();
    let target = parts.next().ok_or(RequestError::Malformed("missing path"))?;
    // Route on the path alone, like PATH_INFO.
    let path = target.split('?').next().unwrap_or(target).to_owned();

    let mut content_length = 0usize;
    for _ in 0..MAX_HEADER_LINES {
        if read_head_line(head, &mut line)? == 0 {
            return Err(RequestError::Malformed("truncated headers"));
        }
        let header = line.trim_end();
        if header.is_empty() {
            return Ok((method, path, content_length));
        }
        if let Some((name, value)) = header.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                content_length = value
                    .trim()
                    .parse()
                    .map_err(|_| RequestError::Malformed("bad content-length"))?;
            }
        }
    }
    Err(RequestError::Malformed("too many headers"))
}

fn read_head_line<R: BufRead>(head: &mut io::Take<R>, line: &mut String) -> Result<usize, RequestError> {
    line.clear();
    let n = head.read_line(line)?;
    // An unterminated line with the budget spent was cut short by the limit.
    if head.limit() == 0 && !line.ends_with('\n') {
        return Err(RequestError::HeadTooLarge);
    }
    Ok(n)
}

fn read_body<R: Read>(reader: &mut R, len: usize) -> Result<Vec<u8>, RequestError> {
    if len > MAX_BODY_BYTES {
        return Err(RequestError::TooLarge(len));
    }
    let mut body = vec![0; len];
    reader.read_exact(&mut body)?;
    Ok(body)
}

fn write_response<W: Write>(out: &mut W, status: Status) -> io::Result<()> {
    let body = status.reason();
    write!(
        out,
        "HTTP/1.1 {} {}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status.code(),
        status.reason(),
        body.len(),
        body
    )?;
    out.flush()
}
