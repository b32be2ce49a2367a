use std::time::Duration;
use crate::outcome::Outcome;

/// Format a duration as `H:MM:SS`
pub fn format_clock(d: Duration) -> String {
    let secs = d.as_secs_f64().round() as u64;
    format!("{}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

/// Bytes of transcoded output written by successful jobs
pub fn total_output_bytes(outcomes: &[Outcome]) -> u64 {
    outcomes
        .iter()
        .filter(|o| o.is_success())
        .filter_map(|o| std::fs::metadata(&o.job().output_path).ok())
        .map(|m| m.len())
        .sum()
}
