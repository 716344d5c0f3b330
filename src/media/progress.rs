use regex::Regex;
use std::sync::LazyLock;

/// Highest percentage reported while a step is still running; 100 is only
/// reported once the job's last step has exited successfully.
pub const MAX_RUNNING_PERCENT: u8 = 99;

static ELAPSED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"time=\s*(\d+):(\d{1,2}):(\d{1,2}(?:\.\d+)?)").expect("elapsed pattern is valid")
});

/// Extract the elapsed-time marker (`time=HH:MM:SS.ff`) from one output line
pub fn parse_elapsed(line: &str) -> Option<f64> {
    let caps = ELAPSED.captures(line)?;
    let hours: f64 = caps.get(1)?.as_str().parse().ok()?;
    let minutes: f64 = caps.get(2)?.as_str().parse().ok()?;
    let seconds: f64 = caps.get(3)?.as_str().parse().ok()?;
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// Percentage of `duration` covered by `elapsed`, capped below 100.
/// `None` when the duration is unknown.
pub fn running_percent(elapsed: f64, duration: f64) -> Option<u8> {
    if !(duration > 0.0) || !elapsed.is_finite() {
        return None;
    }
    let percent = (elapsed / duration * 100.0).floor();
    Some(percent.clamp(0.0, MAX_RUNNING_PERCENT as f64) as u8)
}
