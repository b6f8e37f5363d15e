//! Minimal Source RCON client for the Minecraft server's admin channel.
//!
//! Failures never propagate to callers during steady-state polling: the
//! client swallows them, marks itself disconnected and re-dials after a
//! fixed backoff, answering with an empty roster in the meantime.

use regex::Regex;
use std::io;
use std::sync::LazyLock;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{info, warn};

const SERVERDATA_AUTH: i32 = 3;
const SERVERDATA_EXECCOMMAND: i32 = 2;

/// Per-exchange I/O deadline; the Minecraft server answers well within this.
const IO_TIMEOUT: Duration = Duration::from_secs(5);

/// The authoritative "who is online" view as reported by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Roster {
    pub total: u32,
    pub names: Vec<String>,
}

impl Roster {
    pub fn empty() -> Self {
        Self {
            total: 0,
            names: Vec::new(),
        }
    }
}

struct ConnState {
    stream: Option<TcpStream>,
    next_attempt: Option<Instant>,
    next_id: i32,
}

pub struct RconClient {
    host: String,
    port: u16,
    password: String,
    retry: Duration,
    state: Mutex<ConnState>,
}

impl RconClient {
    pub fn new(host: String, port: u16, password: String, retry: Duration) -> Self {
        Self {
            host,
            port,
            password,
            retry,
            state: Mutex::new(ConnState {
                stream: None,
                next_attempt: None,
                next_id: 1,
            }),
        }
    }

    /// Establish the connection if there isn't one. Idempotent; a failed
    /// attempt schedules the next one `retry` later and returns quietly.
    pub async fn connect(&self) {
        let mut state = self.state.lock().await;
        self.ensure_connected(&mut state).await;
    }

    async fn ensure_connected(&self, state: &mut ConnState) {
        if state.stream.is_some() {
            return;
        }
        if let Some(at) = state.next_attempt {
            if Instant::now() < at {
                return;
            }
        }
        state.next_attempt = Some(Instant::now() + self.retry);

        match self.dial().await {
            Ok(stream) => {
                state.stream = Some(stream);
                state.next_attempt = None;
                info!(host = %self.host, port = self.port, "RCON connected");
            }
            Err(e) => {
                warn!(error = %e, retry_secs = self.retry.as_secs(), "RCON connect failed");
            }
        }
    }

    async fn dial(&self) -> io::Result<TcpStream> {
        let addr = format!("{}:{}", self.host, self.port);
        let mut stream = timeout(IO_TIMEOUT, TcpStream::connect(&addr))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "RCON connect timed out"))??;

        write_packet(&mut stream, 0, SERVERDATA_AUTH, &self.password).await?;
        let (id, _ptype, _body) = timeout(IO_TIMEOUT, read_packet(&mut stream))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "RCON auth timed out"))??;

        // The server echoes id -1 when the password is rejected
        if id == -1 {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "RCON password rejected",
            ));
        }

        Ok(stream)
    }

    /// Send a command and return the reply body. None when disconnected or
    /// on any transport error (which also drops the connection).
    pub async fn send_command(&self, cmd: &str) -> Option<String> {
        let mut state = self.state.lock().await;
        self.ensure_connected(&mut state).await;

        let id = state.next_id;
        state.next_id = state.next_id.checked_add(1).unwrap_or(1);

        let stream = state.stream.as_mut()?;
        match exchange(stream, id, cmd).await {
            Ok(body) => Some(body),
            Err(e) => {
                warn!(error = %e, cmd, "RCON send error");
                state.stream = None;
                state.next_attempt = Some(Instant::now() + self.retry);
                None
            }
        }
    }

    /// Query the online-player roster via the `list` command. Degrades to
    /// an empty roster on disconnects and malformed replies.
    pub async fn list_online_players(&self) -> Roster {
        match self.send_command("list").await {
            Some(reply) => parse_list_reply(&reply).unwrap_or_else(Roster::empty),
            None => Roster::empty(),
        }
    }
}

async fn exchange(stream: &mut TcpStream, id: i32, cmd: &str) -> io::Result<String> {
    timeout(IO_TIMEOUT, async {
        write_packet(stream, id, SERVERDATA_EXECCOMMAND, cmd).await?;
        let (_id, _ptype, body) = read_packet(stream).await?;
        Ok(body)
    })
    .await
    .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "RCON exchange timed out"))?
}

/// Frame: little-endian length, id, type, body, two NUL terminators.
fn encode_packet(id: i32, ptype: i32, body: &str) -> Vec<u8> {
    let len = (body.len() + 10) as i32;
    let mut buf = Vec::with_capacity(body.len() + 14);
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(&id.to_le_bytes());
    buf.extend_from_slice(&ptype.to_le_bytes());
    buf.extend_from_slice(body.as_bytes());
    buf.extend_from_slice(&[0, 0]);
    buf
}

async fn write_packet(stream: &mut TcpStream, id: i32, ptype: i32, body: &str) -> io::Result<()> {
    stream.write_all(&encode_packet(id, ptype, body)).await
}

async fn read_packet(stream: &mut TcpStream) -> io::Result<(i32, i32, String)> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await?;
    let len = i32::from_le_bytes(len_buf);
    // 10 = id + type + terminators; 4096 is the protocol's max payload
    if !(10..=4110).contains(&len) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "RCON packet length out of range",
        ));
    }

    let mut buf = vec![0u8; len as usize];
    stream.read_exact(&mut buf).await?;

    let id = i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    let ptype = i32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
    let body = String::from_utf8_lossy(&buf[8..len as usize - 2]).to_string();
    Ok((id, ptype, body))
}

static LIST_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"There are (\d+) of a max of \d+ players online: ?(.*)").unwrap());

/// Parse the fixed-format `list` reply. None for anything unexpected.
pub fn parse_list_reply(reply: &str) -> Option<Roster> {
    let caps = LIST_RE.captures(reply)?;
    let total = caps[1].parse().ok()?;
    let names = caps
        .get(2)
        .map(|m| m.as_str())
        .unwrap_or("")
        .split(", ")
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect();
    Some(Roster { total, names })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_list_reply_with_players() {
        let roster =
            parse_list_reply("There are 2 of a max of 20 players online: Alice, Bob").unwrap();
        assert_eq!(roster.total, 2);
        assert_eq!(roster.names, vec!["Alice", "Bob"]);
    }

    #[test]
    fn test_parse_list_reply_empty_server() {
        let roster = parse_list_reply("There are 0 of a max of 20 players online:").unwrap();
        assert_eq!(roster.total, 0);
        assert!(roster.names.is_empty());

        let roster = parse_list_reply("There are 0 of a max of 20 players online: ").unwrap();
        assert!(roster.names.is_empty());
    }

    #[test]
    fn test_parse_list_reply_malformed() {
        assert!(parse_list_reply("Unknown command").is_none());
        assert!(parse_list_reply("").is_none());
        assert!(parse_list_reply("There are many players online").is_none());
    }

    #[test]
    fn test_encode_packet_layout() {
        let buf = encode_packet(7, SERVERDATA_EXECCOMMAND, "list");
        // length excludes its own 4 bytes: 4 (id) + 4 (type) + 4 (body) + 2 (NULs)
        assert_eq!(&buf[0..4], &14i32.to_le_bytes());
        assert_eq!(&buf[4..8], &7i32.to_le_bytes());
        assert_eq!(&buf[8..12], &2i32.to_le_bytes());
        assert_eq!(&buf[12..16], b"list");
        assert_eq!(&buf[16..], &[0, 0]);
    }
}
