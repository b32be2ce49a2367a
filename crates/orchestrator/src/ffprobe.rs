use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use serde::Deserialize;
use tokio::process::Command;
use crate::config::BatchConfig;
use crate::error::ProbeWarning;

#[derive(Debug, Deserialize)]
struct FFProbeData {
    format: FFProbeFormat,
}

/// Format-level metadata from ffprobe
#[derive(Debug, Clone, Deserialize)]
pub struct FFProbeFormat {
    pub format_name: Option<String>,
    /// Seconds, as a decimal string
    pub duration: Option<String>,
}

/// Query the total duration of a source file.
///
/// Read-only; used only to turn engine positions into a completion fraction.
pub async fn probe_duration(cfg: &BatchConfig, file_path: &Path) -> Result<Duration, ProbeWarning> {
    let output = Command::new(&cfg.ffprobe_bin)
        .arg("-v")
        .arg("error")
        .arg("-print_format")
        .arg("json")
        .arg("-show_format")
        .arg(file_path)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| ProbeWarning::Launch(e.to_string()))?;

    if !output.status.success() {
        return Err(ProbeWarning::Exit(output.status.code()));
    }

    let json_str = String::from_utf8_lossy(&output.stdout);
    parse_duration_json(&json_str)
}

/// Extract `format.duration` from ffprobe's JSON output
pub fn parse_duration_json(json_str: &str) -> Result<Duration, ProbeWarning> {
    let data: FFProbeData = serde_json::from_str(json_str)
        .map_err(|e| ProbeWarning::Parse(e.to_string()))?;

    let raw = data.format.duration.ok_or(ProbeWarning::Missing)?;
    let secs: f64 = raw
        .trim()
        .parse()
        .map_err(|_| ProbeWarning::Parse(format!("duration '{}'", raw)))?;

    if !secs.is_finite() || secs <= 0.0 {
        return Err(ProbeWarning::Missing);
    }
    Ok(Duration::from_secs_f64(secs))
}
