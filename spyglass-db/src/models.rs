use arrayvec::ArrayString;
use serde::Serialize;

/// Minecraft player name - max 16 characters, stored inline (no heap allocation).
pub type PlayerName = ArrayString<16>;

/// One recorded play session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
  /// Row id, assigned on insert
  pub id: i64,
  /// Player's Minecraft username
  pub player_name: String,
  /// Unix timestamp when the session opened
  pub session_start: i64,
  /// Unix timestamp when the session closed; None while open
  pub session_end: Option<i64>,
  /// Whether the session is still open
  pub is_active: bool,
  /// Computed end - start in seconds; None while open
  pub duration: Option<i64>,
}

/// Filters and paging for the session listing query.
#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
  /// Substring match on the player name
  pub player_name: Option<String>,
  /// Only sessions starting at or after this timestamp
  pub start_after: Option<i64>,
  /// Only sessions starting at or before this timestamp
  pub start_before: Option<i64>,
  /// Only sessions still open
  pub active_only: bool,
  /// 1-based page number
  pub page: u32,
  /// Rows per page
  pub limit: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
  pub total: u64,
  pub page: u32,
  pub limit: u32,
  pub total_pages: u32,
  pub has_more: bool,
}

/// One page of session records.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPage {
  pub sessions: Vec<SessionRecord>,
  pub pagination: Pagination,
}

/// Per-player rollup inside [`SessionStats`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerStat {
  pub player_name: String,
  pub sessions: u64,
  pub total_time: i64,
}

/// Aggregate statistics over completed sessions.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
  pub total_sessions: u64,
  /// Sum of all completed-session durations, seconds
  pub total_playtime: i64,
  /// total_playtime / total_sessions, seconds (0 when empty)
  pub average_session_length: i64,
  pub unique_players: u64,
  /// Ordered by total_time descending
  pub player_stats: Vec<PlayerStat>,
}

/// mcMMO skill levels for one player, written by the server-side plugin.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillRow {
  pub player_name: String,
  pub taming: i64,
  pub mining: i64,
  pub woodcutting: i64,
  pub repair: i64,
  pub unarmed: i64,
  pub herbalism: i64,
  pub excavation: i64,
  pub archery: i64,
  pub swords: i64,
  pub axes: i64,
  pub acrobatics: i64,
  pub fishing: i64,
  pub alchemy: i64,
  pub total: i64,
}

/// A skill row joined with the player's most recent ended-session end time.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillEntry {
  #[serde(flatten)]
  pub skills: SkillRow,
  /// End of the most recent completed session, if any
  pub last_login: Option<i64>,
}
