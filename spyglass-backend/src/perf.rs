//! Server performance metrics: parses TabTPS output fetched over RCON on
//! a fixed interval and keeps a bounded history.

use crate::events::strip_color_codes;
use crate::{AppState, helpers};
use regex::Regex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{LazyLock, Mutex};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TpsMetrics {
    pub one_minute: Option<f64>,
    pub five_minute: Option<f64>,
    pub fifteen_minute: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MsptWindow {
    pub avg: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MsptMetrics {
    pub five_second: MsptWindow,
    pub ten_second: MsptWindow,
    pub sixty_second: MsptWindow,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CpuMetrics {
    pub system: Option<f64>,
    pub process: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryMetrics {
    pub used: Option<i64>,
    pub allocated: Option<i64>,
    pub max: Option<i64>,
    pub used_percentage: Option<i64>,
}

/// One parsed performance snapshot.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerfSample {
    pub timestamp: i64,
    pub tps: TpsMetrics,
    pub mspt: MsptMetrics,
    pub cpu: CpuMetrics,
    pub memory: MemoryMetrics,
}

static TPS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"TPS: ([\d.]+) \(1m\), ([\d.]+) \(5m\), ([\d.]+) \(15m\)").unwrap()
});
static MSPT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)s - ([\d.]+), ([\d.]+), ([\d.]+)").unwrap());
static CPU_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"CPU: ([\d.]+)%, ([\d.]+)% \(sys\., proc\.\)").unwrap());
static RAM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"RAM: (\d+)M/(\d+)M \(max\. (\d+)M\)").unwrap());

/// Parse a TabTPS `tps` reply. None when nothing in the reply looked like
/// a metric line (wrong command, plugin missing).
pub fn parse_tabtps_response(response: &str, timestamp: i64) -> Option<PerfSample> {
    let clean = strip_color_codes(response);
    let mut sample = PerfSample {
        timestamp,
        tps: TpsMetrics::default(),
        mspt: MsptMetrics::default(),
        cpu: CpuMetrics::default(),
        memory: MemoryMetrics::default(),
    };
    let mut matched = false;

    for line in clean.lines().map(str::trim) {
        if let Some(caps) = TPS_RE.captures(line) {
            sample.tps.one_minute = caps[1].parse().ok();
            sample.tps.five_minute = caps[2].parse().ok();
            sample.tps.fifteen_minute = caps[3].parse().ok();
            matched = true;
        } else if let Some(caps) = MSPT_RE.captures(line) {
            let window = MsptWindow {
                avg: caps[2].parse().ok(),
                min: caps[3].parse().ok(),
                max: caps[4].parse().ok(),
            };
            match &caps[1] {
                "5" => sample.mspt.five_second = window,
                "10" => sample.mspt.ten_second = window,
                "60" => sample.mspt.sixty_second = window,
                _ => continue,
            }
            matched = true;
        } else if let Some(caps) = CPU_RE.captures(line) {
            sample.cpu.system = caps[1].parse().ok();
            sample.cpu.process = caps[2].parse().ok();
            matched = true;
        } else if let Some(caps) = RAM_RE.captures(line) {
            let used: Option<i64> = caps[1].parse().ok();
            let allocated: Option<i64> = caps[2].parse().ok();
            sample.memory.used = used;
            sample.memory.allocated = allocated;
            sample.memory.max = caps[3].parse().ok();
            sample.memory.used_percentage = match (used, allocated) {
                (Some(u), Some(a)) if a > 0 => Some((u as f64 / a as f64 * 100.0).round() as i64),
                _ => None,
            };
            matched = true;
        }
    }

    matched.then_some(sample)
}

/// Bounded in-memory history of performance samples.
pub struct PerfMonitor {
    capacity: usize,
    history: Mutex<VecDeque<PerfSample>>,
}

impl PerfMonitor {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            history: Mutex::new(VecDeque::new()),
        }
    }

    pub fn record(&self, sample: PerfSample) {
        let mut history = self.history.lock().unwrap();
        history.push_back(sample);
        while history.len() > self.capacity {
            history.pop_front();
        }
    }

    pub fn latest(&self) -> Option<PerfSample> {
        self.history.lock().unwrap().back().cloned()
    }

    pub fn history(&self) -> Vec<PerfSample> {
        self.history.lock().unwrap().iter().cloned().collect()
    }
}

/// Collect metrics on a fixed interval, independent of observer count,
/// broadcasting each sample when anyone is watching.
pub(crate) async fn run_perf_collector(
    state: std::sync::Arc<AppState>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(state.config.perf_collect_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                let Some(reply) = state.rcon.send_command("tabtps:tps").await else {
                    continue;
                };
                let Some(sample) = parse_tabtps_response(&reply, helpers::now()) else {
                    debug!("unparseable tabtps reply, skipping sample");
                    continue;
                };
                info!(
                    tps = ?sample.tps.one_minute,
                    cpu = ?sample.cpu.process,
                    "performance metrics collected"
                );
                if state.gateway.count() > 0 {
                    state.gateway.emit("performance:update", &sample);
                }
                state.perf.record(sample);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "TPS: 20.00 (1m), 19.98 (5m), 20.00 (15m)\n\
                          MSPT - Average, Minimum, Maximum\n\
                          5s - 2.74, 1.20, 8.66\n\
                          10s - 2.79, 1.20, 14.67\n\
                          60s - 2.90, 1.08, 35.28\n\
                          CPU: 4.35%, 2.86% (sys., proc.)\n\
                          RAM: 3341M/4096M (max. 4096M)";

    #[test]
    fn test_parse_full_response() {
        let sample = parse_tabtps_response(SAMPLE, 1700000000).unwrap();
        assert_eq!(sample.timestamp, 1700000000);
        assert_eq!(sample.tps.one_minute, Some(20.0));
        assert_eq!(sample.tps.five_minute, Some(19.98));
        assert_eq!(sample.mspt.five_second.avg, Some(2.74));
        assert_eq!(sample.mspt.ten_second.max, Some(14.67));
        assert_eq!(sample.mspt.sixty_second.min, Some(1.08));
        assert_eq!(sample.cpu.system, Some(4.35));
        assert_eq!(sample.cpu.process, Some(2.86));
        assert_eq!(sample.memory.used, Some(3341));
        assert_eq!(sample.memory.allocated, Some(4096));
        assert_eq!(sample.memory.used_percentage, Some(82));
    }

    #[test]
    fn test_parse_color_coded_response() {
        let colored = format!("§a§l{}", "TPS: 18.50 (1m), 19.00 (5m), 19.50 (15m)");
        let sample = parse_tabtps_response(&colored, 0).unwrap();
        assert_eq!(sample.tps.one_minute, Some(18.5));
    }

    #[test]
    fn test_parse_rejects_non_metric_replies() {
        assert!(parse_tabtps_response("Unknown command", 0).is_none());
        assert!(parse_tabtps_response("", 0).is_none());
    }

    #[test]
    fn test_monitor_caps_history() {
        let monitor = PerfMonitor::new(2);
        for i in 0..4 {
            monitor.record(parse_tabtps_response(SAMPLE, i).unwrap());
        }

        let history = monitor.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].timestamp, 2);
        assert_eq!(monitor.latest().unwrap().timestamp, 3);
    }
}
