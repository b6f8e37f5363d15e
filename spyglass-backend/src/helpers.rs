use std::time::{SystemTime, UNIX_EPOCH};

pub fn now() -> i64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .unwrap()
    .as_secs() as i64
}

/// Format a duration in seconds as "2h 15m" (or "15m" under an hour).
pub fn format_duration(secs: i64) -> String {
  if secs <= 0 {
    return "0m".to_string();
  }

  let minutes = secs / 60;
  let hours = minutes / 60;
  let remaining_minutes = minutes % 60;

  if hours > 0 {
    format!("{}h {}m", hours, remaining_minutes)
  } else {
    format!("{}m", remaining_minutes)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_format_duration() {
    assert_eq!(format_duration(0), "0m");
    assert_eq!(format_duration(-5), "0m");
    assert_eq!(format_duration(59), "0m");
    assert_eq!(format_duration(300), "5m");
    assert_eq!(format_duration(3600), "1h 0m");
    assert_eq!(format_duration(8100), "2h 15m");
  }
}
