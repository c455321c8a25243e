//! Shared helpers: errors, logging and console formatting

pub mod error;
pub mod logging;

pub use error::{Result, SceneError};
pub use logging::{init_logging, LogConfig, TrainingLogger};

/// Render seconds as `12.3s`, `4m 05s` or `2h 07m`
pub fn format_duration(seconds: f64) -> String {
    let seconds = seconds.max(0.0);
    if seconds < 60.0 {
        return format!("{seconds:.1}s");
    }
    let total = seconds.round() as u64;
    let (hours, minutes, secs) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours == 0 {
        format!("{minutes}m {secs:02}s")
    } else {
        format!("{hours}h {minutes:02}m")
    }
}

/// Group digits by thousands: `31500` becomes `31,500`
pub fn format_number(n: usize) -> String {
    let digits = n.to_string();
    let mut groups: Vec<&str> = Vec::new();
    let mut end = digits.len();
    while end > 3 {
        groups.push(&digits[end - 3..end]);
        end -= 3;
    }
    groups.push(&digits[..end]);
    groups.reverse();
    groups.join(",")
}

/// Accuracy in `[0, 1]` as a percentage with two decimals
pub fn format_percent(fraction: f64) -> String {
    format!("{:.2}%", fraction * 100.0)
}
