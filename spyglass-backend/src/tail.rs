//! Incremental log tailing: byte-offset tracking, rotation detection and
//! the notify-driven watcher task that feeds the session ledger.

use crate::events::{self, PlayerEvent};
use crate::{AppState, helpers, monitor};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use regex::Regex;
use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{LazyLock, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Tracks how far into the log file we have read.
pub struct LogTailer {
    path: PathBuf,
    offset: u64,
}

impl LogTailer {
    pub fn new(path: PathBuf) -> Self {
        Self { path, offset: 0 }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Position the cursor at the end of the file and return up to
    /// `backlog_bytes` of trailing lines for display history. The backlog
    /// is never run through event extraction. A missing file is not an
    /// error: nothing to seed, cursor at zero.
    pub async fn seed(&mut self, backlog_bytes: u64) -> io::Result<Vec<String>> {
        let meta = match tokio::fs::metadata(&self.path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(path = %self.path.display(), "log file not found, watching anyway");
                self.offset = 0;
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };

        let size = meta.len();
        let start = size.saturating_sub(backlog_bytes);

        let mut file = tokio::fs::File::open(&self.path).await?;
        file.seek(io::SeekFrom::Start(start)).await?;
        let mut buf = Vec::with_capacity((size - start) as usize);
        file.read_to_end(&mut buf).await?;

        self.offset = size;

        let mut lines = split_lines(&buf);
        // When we land mid-file the first line is almost certainly partial
        if start > 0 && !lines.is_empty() {
            lines.remove(0);
        }
        Ok(lines)
    }

    /// Read everything appended since the last successful read. A file
    /// smaller than the cursor means rotation/truncation: restart from
    /// zero. The cursor only advances past bytes that ended in a newline,
    /// and only after the read succeeded, so a failed read is retried on
    /// the next change notification.
    pub async fn read_new_lines(&mut self) -> io::Result<Vec<String>> {
        let meta = tokio::fs::metadata(&self.path).await?;
        let size = meta.len();

        if size < self.offset {
            debug!(path = %self.path.display(), "log rotated, resetting offset");
            self.offset = 0;
        }
        if size == self.offset {
            return Ok(Vec::new());
        }

        let mut file = tokio::fs::File::open(&self.path).await?;
        file.seek(io::SeekFrom::Start(self.offset)).await?;
        let mut buf = vec![0u8; (size - self.offset) as usize];
        file.read_exact(&mut buf).await?;

        // Hold back a trailing partial line until its newline arrives
        let Some(last_newline) = buf.iter().rposition(|&b| b == b'\n') else {
            return Ok(Vec::new());
        };
        let consumed = last_newline + 1;
        self.offset += consumed as u64;

        Ok(split_lines(&buf[..consumed]))
    }
}

fn split_lines(buf: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(buf)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect()
}

static IP_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+\.\d+\.\d+\.\d+").unwrap());
static UUID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}").unwrap()
});

/// Bounded ring of recent log lines served to newly connected observers.
/// Lines leaking IP addresses or UUIDs are dropped.
pub struct LogBuffer {
    capacity: usize,
    lines: Mutex<VecDeque<String>>,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            lines: Mutex::new(VecDeque::new()),
        }
    }

    fn keep(line: &str) -> bool {
        if line.contains('/') && IP_RE.is_match(line) {
            return false;
        }
        if UUID_RE.is_match(line) {
            return false;
        }
        true
    }

    /// Append a line. Returns false when the line was filtered out.
    pub fn push(&self, line: &str) -> bool {
        if !Self::keep(line) {
            return false;
        }
        let mut lines = self.lines.lock().unwrap();
        lines.push_back(line.to_string());
        while lines.len() > self.capacity {
            lines.pop_front();
        }
        true
    }

    /// Replace the buffer contents with a fresh backlog.
    pub fn reset(&self, backlog: Vec<String>) {
        self.lines.lock().unwrap().clear();
        for line in backlog {
            self.push(&line);
        }
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.lines.lock().unwrap().iter().cloned().collect()
    }
}

/// Watcher task: owns the notify watcher and the tail cursor, gated by
/// gateway activation. Being the single consumer of change events means
/// reads for one file never overlap.
pub async fn run_log_tailer(state: std::sync::Arc<AppState>, mut shutdown: watch::Receiver<bool>) {
    let mut activation = state.gateway.activation();
    let (fs_tx, mut fs_rx) = mpsc::unbounded_channel::<()>();
    let mut tailer = LogTailer::new(state.config.log_file.clone());
    let mut watcher: Option<RecommendedWatcher> = None;

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            changed = activation.changed() => {
                if changed.is_err() {
                    break;
                }
                let active = *activation.borrow_and_update();
                if active && watcher.is_none() {
                    match tailer.seed(state.config.log_backlog_bytes).await {
                        Ok(backlog) => state.log_buffer.reset(backlog),
                        Err(e) => warn!(error = %e, "failed to seed log backlog"),
                    }
                    watcher = start_watching(&state.config.log_file, fs_tx.clone());
                    if watcher.is_some() {
                        info!(path = %state.config.log_file.display(), "started log watching");
                    }
                } else if !active && watcher.is_some() {
                    watcher = None;
                    info!("stopped log watching (no observers connected)");
                }
            }
            Some(()) = fs_rx.recv() => {
                // Stale notifications may arrive after deactivation
                if watcher.is_some() {
                    process_new_lines(&state, &mut tailer).await;
                }
            }
        }
    }
}

fn start_watching(path: &Path, fs_tx: mpsc::UnboundedSender<()>) -> Option<RecommendedWatcher> {
    let file_name = path.file_name().map(|n| n.to_os_string());
    let mut watcher = match notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
        if let Ok(event) = res {
            if matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_))
                && event
                    .paths
                    .iter()
                    .any(|p| p.file_name() == file_name.as_deref())
            {
                let _ = fs_tx.send(());
            }
        }
    }) {
        Ok(w) => w,
        Err(e) => {
            warn!(error = %e, "failed to create log watcher");
            return None;
        }
    };

    // Watch the parent directory: the log file itself may not exist yet
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    if let Err(e) = watcher.watch(dir, RecursiveMode::NonRecursive) {
        warn!(error = %e, dir = %dir.display(), "failed to watch log directory");
        return None;
    }

    Some(watcher)
}

async fn process_new_lines(state: &std::sync::Arc<AppState>, tailer: &mut LogTailer) {
    let lines = match tailer.read_new_lines().await {
        Ok(lines) => lines,
        Err(e) => {
            warn!(error = %e, "failed to read new log lines");
            return;
        }
    };
    if lines.is_empty() {
        return;
    }

    let now = helpers::now();
    let mut saw_player_event = false;

    for raw in lines {
        let line = events::strip_color_codes(&raw);
        if state.log_buffer.push(&line) {
            state.gateway.emit("server:log", &line);
        }
        match events::extract(&line) {
            Some(PlayerEvent::Joined(name)) => {
                state.ledger.join(&name, now).await;
                saw_player_event = true;
            }
            Some(PlayerEvent::Left(name)) => {
                state.ledger.leave(&name, now).await;
                saw_player_event = true;
            }
            None => {}
        }
    }

    if saw_player_event {
        // Give the server a moment to settle before re-polling the roster
        tokio::time::sleep(Duration::from_millis(500)).await;
        monitor::refresh_and_broadcast_players(state).await;
    }
}
