mod error;
mod models;

pub use error::{DbError, Result};
pub use models::{
  Pagination, PlayerName, PlayerStat, SessionFilter, SessionPage, SessionRecord, SessionStats,
  SkillEntry, SkillRow,
};

use std::path::Path;
use tokio_rusqlite::Connection;
use tokio_rusqlite::rusqlite::types::Value;
use tokio_rusqlite::rusqlite::{params, params_from_iter};
use tracing::{debug, info};

/// Database wrapper for all Spyglass operations.
#[derive(Clone)]
pub struct Database {
  conn: Connection,
}

impl Database {
  /// Open or create a database at the given path.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = Connection::open(path).await?;
    let db = Self { conn };
    db.initialize().await?;
    Ok(db)
  }

  /// Create an in-memory database (useful for testing).
  pub async fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory().await?;
    let db = Self { conn };
    db.initialize().await?;
    Ok(db)
  }

  /// Initialize the database schema.
  async fn initialize(&self) -> Result<()> {
    self.conn
            .call(|conn| {
                // Enable WAL mode for better concurrent read/write performance
                conn.pragma_update(None, "journal_mode", "WAL")?;

                conn.execute_batch(
                    r#"
                    -- One row per play session; session_end is NULL while open
                    CREATE TABLE IF NOT EXISTS player_sessions (
                        id INTEGER PRIMARY KEY AUTOINCREMENT,
                        player_name TEXT NOT NULL,
                        session_start INTEGER NOT NULL,
                        session_end INTEGER,
                        is_active INTEGER NOT NULL DEFAULT 1
                    );

                    CREATE INDEX IF NOT EXISTS idx_sessions_player ON player_sessions(player_name);
                    CREATE INDEX IF NOT EXISTS idx_sessions_start ON player_sessions(session_start);
                    CREATE INDEX IF NOT EXISTS idx_sessions_active ON player_sessions(is_active);

                    -- mcMMO skill levels, written by the game-server plugin
                    CREATE TABLE IF NOT EXISTS player_skills (
                        player_name TEXT PRIMARY KEY,
                        taming INTEGER NOT NULL DEFAULT 0,
                        mining INTEGER NOT NULL DEFAULT 0,
                        woodcutting INTEGER NOT NULL DEFAULT 0,
                        repair INTEGER NOT NULL DEFAULT 0,
                        unarmed INTEGER NOT NULL DEFAULT 0,
                        herbalism INTEGER NOT NULL DEFAULT 0,
                        excavation INTEGER NOT NULL DEFAULT 0,
                        archery INTEGER NOT NULL DEFAULT 0,
                        swords INTEGER NOT NULL DEFAULT 0,
                        axes INTEGER NOT NULL DEFAULT 0,
                        acrobatics INTEGER NOT NULL DEFAULT 0,
                        fishing INTEGER NOT NULL DEFAULT 0,
                        alchemy INTEGER NOT NULL DEFAULT 0,
                        total INTEGER NOT NULL DEFAULT 0
                    );
                    "#,
                )?;
                Ok(())
            })
            .await?;

    info!("database initialized");
    Ok(())
  }

  // ========================================================================
  // Session mutations
  // ========================================================================

  /// Open a new session row and return its id.
  pub async fn create_open_session(&self, player_name: String, start: i64) -> Result<i64> {
    let player_name_log = player_name.clone();

    let id = self
      .conn
      .call(move |conn| {
        conn
          .prepare_cached(
            "INSERT INTO player_sessions (player_name, session_start, session_end, is_active) \
             VALUES (?1, ?2, NULL, 1)",
          )?
          .execute(params![&player_name, start])?;

        Ok(conn.last_insert_rowid())
      })
      .await?;

    debug!(player_name = %player_name_log, id, "opened session");
    Ok(id)
  }

  /// Close an open session. Errors if the row is gone or already closed.
  pub async fn close_session(&self, id: i64, end: i64) -> Result<()> {
    let result = self
      .conn
      .call(move |conn| {
        let updated = conn
          .prepare_cached(
            "UPDATE player_sessions SET session_end = ?2, is_active = 0 \
             WHERE id = ?1 AND is_active = 1",
          )?
          .execute(params![id, end])?;

        if updated == 0 {
          return Ok(Err(DbError::SessionNotFound));
        }

        Ok(Ok(()))
      })
      .await??;

    debug!(id, "closed session");
    Ok(result)
  }

  /// Delete a session row (used to drop sessions below the minimum duration).
  pub async fn delete_session(&self, id: i64) -> Result<()> {
    let result = self
      .conn
      .call(move |conn| {
        let deleted = conn
          .prepare_cached("DELETE FROM player_sessions WHERE id = ?1")?
          .execute(params![id])?;

        if deleted == 0 {
          return Ok(Err(DbError::SessionNotFound));
        }

        Ok(Ok(()))
      })
      .await??;

    debug!(id, "deleted session");
    Ok(result)
  }

  /// Clean up sessions left open by a previous process run: rows shorter
  /// than `min_duration` are deleted, the rest are closed at `now`.
  /// Returns (closed, deleted).
  pub async fn recover_orphaned_sessions(&self, now: i64, min_duration: i64) -> Result<(u64, u64)> {
    let (closed, deleted) = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;

        let deleted = tx
          .prepare_cached(
            "DELETE FROM player_sessions WHERE is_active = 1 AND ?1 - session_start < ?2",
          )?
          .execute(params![now, min_duration])?;

        let closed = tx
          .prepare_cached(
            "UPDATE player_sessions SET session_end = ?1, is_active = 0 WHERE is_active = 1",
          )?
          .execute(params![now])?;

        tx.commit()?;
        Ok((closed as u64, deleted as u64))
      })
      .await?;

    if closed > 0 || deleted > 0 {
      info!(closed, deleted, "recovered orphaned sessions");
    }

    Ok((closed, deleted))
  }

  // ========================================================================
  // Session queries
  // ========================================================================

  /// List sessions with filters and pagination.
  pub async fn list_sessions(&self, filter: SessionFilter) -> Result<SessionPage> {
    let page = filter.page.max(1);
    let limit = filter.limit.max(1);

    let result = self
      .conn
      .call(move |conn| {
        let mut conditions: Vec<&str> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if let Some(name) = &filter.player_name {
          conditions.push("player_name LIKE ?");
          values.push(Value::Text(format!("%{}%", name)));
        }
        if let Some(after) = filter.start_after {
          conditions.push("session_start >= ?");
          values.push(Value::Integer(after));
        }
        if let Some(before) = filter.start_before {
          conditions.push("session_start <= ?");
          values.push(Value::Integer(before));
        }
        if filter.active_only {
          conditions.push("is_active = 1");
        }

        let where_clause = if conditions.is_empty() {
          String::new()
        } else {
          format!("WHERE {}", conditions.join(" AND "))
        };

        let total: u64 = conn
          .prepare(&format!(
            "SELECT COUNT(*) FROM player_sessions {}",
            where_clause
          ))?
          .query_row(params_from_iter(values.iter()), |row| row.get(0))?;

        let offset = (page - 1) as u64 * limit as u64;
        let sql = format!(
          "SELECT id, player_name, session_start, session_end, is_active \
           FROM player_sessions {} \
           ORDER BY is_active DESC, session_end DESC, session_start DESC \
           LIMIT {} OFFSET {}",
          where_clause, limit, offset
        );

        let sessions = conn
          .prepare(&sql)?
          .query_map(params_from_iter(values.iter()), row_to_session)?
          .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(SessionPage {
          sessions,
          pagination: Pagination {
            total,
            page,
            limit,
            total_pages: (total as u32).div_ceil(limit),
            has_more: offset + (limit as u64) < total,
          },
        })
      })
      .await?;

    Ok(result)
  }

  /// Session history for one player, newest first.
  pub async fn player_sessions(
    &self,
    player_name: String,
    page: u32,
    limit: u32,
  ) -> Result<SessionPage> {
    let page = page.max(1);
    let limit = limit.max(1);

    let result = self
      .conn
      .call(move |conn| {
        let total: u64 = conn
          .prepare_cached("SELECT COUNT(*) FROM player_sessions WHERE player_name = ?1")?
          .query_row(params![&player_name], |row| row.get(0))?;

        let offset = (page - 1) as u64 * limit as u64;
        let mut stmt = conn.prepare_cached(
          "SELECT id, player_name, session_start, session_end, is_active \
           FROM player_sessions WHERE player_name = ?1 \
           ORDER BY session_start DESC LIMIT ?2 OFFSET ?3",
        )?;

        let sessions = stmt
          .query_map(params![&player_name, limit, offset as i64], row_to_session)?
          .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(SessionPage {
          sessions,
          pagination: Pagination {
            total,
            page,
            limit,
            total_pages: (total as u32).div_ceil(limit),
            has_more: offset + (limit as u64) < total,
          },
        })
      })
      .await?;

    Ok(result)
  }

  /// All currently-open sessions, newest first.
  pub async fn active_sessions(&self) -> Result<Vec<SessionRecord>> {
    let sessions = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare_cached(
          "SELECT id, player_name, session_start, session_end, is_active \
           FROM player_sessions WHERE is_active = 1 ORDER BY session_start DESC",
        )?;

        let sessions = stmt
          .query_map([], row_to_session)?
          .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(sessions)
      })
      .await?;

    Ok(sessions)
  }

  /// Aggregate completed-session statistics since `since`, optionally for
  /// a single player.
  pub async fn session_stats(&self, since: i64, player_name: Option<String>) -> Result<SessionStats> {
    let stats = self
      .conn
      .call(move |conn| {
        let mut conditions =
          vec!["is_active = 0", "session_end IS NOT NULL", "session_start >= ?"];
        let mut values: Vec<Value> = vec![Value::Integer(since)];

        if let Some(name) = &player_name {
          conditions.push("player_name = ?");
          values.push(Value::Text(name.clone()));
        }

        let sql = format!(
          "SELECT player_name, COUNT(*), SUM(session_end - session_start) \
           FROM player_sessions WHERE {} \
           GROUP BY player_name ORDER BY SUM(session_end - session_start) DESC",
          conditions.join(" AND ")
        );

        let player_stats = conn
          .prepare(&sql)?
          .query_map(params_from_iter(values.iter()), |row| {
            Ok(PlayerStat {
              player_name: row.get(0)?,
              sessions: row.get(1)?,
              total_time: row.get(2)?,
            })
          })?
          .collect::<std::result::Result<Vec<PlayerStat>, _>>()?;

        let total_sessions: u64 = player_stats.iter().map(|p| p.sessions).sum();
        let total_playtime: i64 = player_stats.iter().map(|p| p.total_time).sum();
        let average_session_length = if total_sessions > 0 {
          total_playtime / total_sessions as i64
        } else {
          0
        };

        Ok(SessionStats {
          total_sessions,
          total_playtime,
          average_session_length,
          unique_players: player_stats.len() as u64,
          player_stats,
        })
      })
      .await?;

    Ok(stats)
  }

  // ========================================================================
  // Skills
  // ========================================================================

  /// Skill rows joined with each player's most recent ended-session end.
  /// This is the expensive view behind the presence cache.
  pub async fn skills_with_last_login(&self) -> Result<Vec<SkillEntry>> {
    let entries = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare_cached(
          "SELECT s.player_name, s.taming, s.mining, s.woodcutting, s.repair, s.unarmed, \
                  s.herbalism, s.excavation, s.archery, s.swords, s.axes, s.acrobatics, \
                  s.fishing, s.alchemy, s.total, \
                  (SELECT MAX(ps.session_end) FROM player_sessions ps \
                   WHERE ps.player_name = s.player_name AND ps.session_end IS NOT NULL) \
           FROM player_skills s ORDER BY s.total DESC",
        )?;

        let entries = stmt
          .query_map([], |row| {
            Ok(SkillEntry {
              skills: SkillRow {
                player_name: row.get(0)?,
                taming: row.get(1)?,
                mining: row.get(2)?,
                woodcutting: row.get(3)?,
                repair: row.get(4)?,
                unarmed: row.get(5)?,
                herbalism: row.get(6)?,
                excavation: row.get(7)?,
                archery: row.get(8)?,
                swords: row.get(9)?,
                axes: row.get(10)?,
                acrobatics: row.get(11)?,
                fishing: row.get(12)?,
                alchemy: row.get(13)?,
                total: row.get(14)?,
              },
              last_login: row.get(15)?,
            })
          })?
          .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(entries)
      })
      .await?;

    Ok(entries)
  }

  /// Insert or replace a player's skill row.
  pub async fn upsert_skills(&self, row: SkillRow) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        conn
          .prepare_cached(
            "INSERT OR REPLACE INTO player_skills \
             (player_name, taming, mining, woodcutting, repair, unarmed, herbalism, \
              excavation, archery, swords, axes, acrobatics, fishing, alchemy, total) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
          )?
          .execute(params![
            &row.player_name,
            row.taming,
            row.mining,
            row.woodcutting,
            row.repair,
            row.unarmed,
            row.herbalism,
            row.excavation,
            row.archery,
            row.swords,
            row.axes,
            row.acrobatics,
            row.fishing,
            row.alchemy,
            row.total,
          ])?;
        Ok(())
      })
      .await?;

    Ok(())
  }
}

fn row_to_session(
  row: &tokio_rusqlite::rusqlite::Row<'_>,
) -> std::result::Result<SessionRecord, tokio_rusqlite::rusqlite::Error> {
  let session_start: i64 = row.get(2)?;
  let session_end: Option<i64> = row.get(3)?;
  Ok(SessionRecord {
    id: row.get(0)?,
    player_name: row.get(1)?,
    session_start,
    session_end,
    is_active: row.get(4)?,
    duration: session_end.map(|end| end - session_start),
  })
}
