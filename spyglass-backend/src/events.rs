//! Join/leave event extraction from raw server log lines.

use regex::Regex;
use std::sync::LazyLock;

/// A player presence event derived from one log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerEvent {
    Joined(String),
    Left(String),
}

static HEX_COLOR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)§x[0-9a-f]{12}").unwrap());
static COLOR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)§[0-9a-fk-or]").unwrap());
static ANY_FORMAT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"§.").unwrap());

static JOINED_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\S+) joined the game").unwrap());
// Checked in order; first match wins
static LEFT_RES: LazyLock<[Regex; 3]> = LazyLock::new(|| {
    [
        Regex::new(r"(\S+) left the game").unwrap(),
        Regex::new(r"(\S+) lost connection:").unwrap(),
        Regex::new(r"(\S+) has disconnected").unwrap(),
    ]
});

/// Strip Minecraft `§` color and formatting codes from a line.
pub fn strip_color_codes(line: &str) -> String {
    let line = HEX_COLOR_RE.replace_all(line, "");
    let line = COLOR_RE.replace_all(&line, "");
    let line = ANY_FORMAT_RE.replace_all(&line, "");
    line.trim().to_string()
}

/// Scan one log line for a join/leave event. Lines matching neither
/// pattern yield None. Callers are expected to strip color codes first.
pub fn extract(line: &str) -> Option<PlayerEvent> {
    if let Some(caps) = JOINED_RE.captures(line) {
        return Some(PlayerEvent::Joined(caps[1].to_string()));
    }

    for re in LEFT_RES.iter() {
        if let Some(caps) = re.captures(line) {
            return Some(PlayerEvent::Left(caps[1].to_string()));
        }
    }

    None
}
