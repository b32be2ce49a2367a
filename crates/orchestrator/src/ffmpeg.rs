use std::ffi::OsString;
use std::fmt;
use std::str::FromStr;
use serde::{Deserialize, Serialize};
use crate::job::Job;

/// Static encoder argument templates.
///
/// Parameters never depend on job content; only input and output paths vary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EncodeProfile {
    /// libx265 on the CPU
    #[default]
    X265,
    /// NVIDIA NVENC H.264
    H264Nvenc,
    /// NVIDIA NVENC HEVC
    HevcNvenc,
}

impl EncodeProfile {
    pub const ALL: [EncodeProfile; 3] = [EncodeProfile::X265, EncodeProfile::H264Nvenc, EncodeProfile::HevcNvenc];

    pub fn name(&self) -> &'static str {
        match self {
            EncodeProfile::X265 => "x265",
            EncodeProfile::H264Nvenc => "h264-nvenc",
            EncodeProfile::HevcNvenc => "hevc-nvenc",
        }
    }

    /// Arguments placed before `-i`
    fn input_args(&self) -> &'static [&'static str] {
        match self {
            EncodeProfile::X265 => &[],
            EncodeProfile::H264Nvenc | EncodeProfile::HevcNvenc => &["-hwaccel", "cuda"],
        }
    }

    /// Scaling, codec and quality arguments placed after the input
    fn codec_args(&self) -> &'static [&'static str] {
        match self {
            EncodeProfile::X265 => &[
                "-vf", "scale=-2:720",
                "-c:v", "libx265",
                "-crf", "23",
                "-preset", "fast",
                "-c:a", "copy",
                "-map_metadata", "0",
            ],
            EncodeProfile::H264Nvenc => &[
                "-vf", "scale=1280:720",
                "-c:v", "h264_nvenc",
                "-cq", "28",
                "-c:a", "copy",
                "-map_metadata", "0",
            ],
            EncodeProfile::HevcNvenc => &[
                "-vf", "scale=-2:720",
                "-c:v", "hevc_nvenc",
                "-cq", "23",
                "-preset", "slow",
                "-tune", "hq",
                "-c:a", "copy",
                "-map_metadata", "0",
            ],
        }
    }
}

impl fmt::Display for EncodeProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EncodeProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EncodeProfile::ALL
            .into_iter()
            .find(|p| p.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                let known: Vec<&str> = EncodeProfile::ALL.iter().map(|p| p.name()).collect();
                format!("unknown profile '{}' (expected one of: {})", s, known.join(", "))
            })
    }
}

/// Build the engine argument list for one job.
///
/// The engine writes to the job's staging path and reports machine-readable
/// progress on stdout (`-progress pipe:1`); `-nostats` keeps the human
/// status line off stderr so the stderr tail stays useful for diagnostics.
pub fn build_encode_command(job: &Job, profile: EncodeProfile) -> Vec<OsString> {
    let mut args: Vec<OsString> = Vec::new();

    for arg in ["-hide_banner", "-nostdin", "-y"] {
        args.push(arg.into());
    }
    args.extend(profile.input_args().iter().map(OsString::from));

    args.push("-i".into());
    args.push(job.source_path.clone().into_os_string());

    args.extend(profile.codec_args().iter().map(OsString::from));

    for arg in ["-progress", "pipe:1", "-nostats"] {
        args.push(arg.into());
    }
    args.push(job.staging_path.clone().into_os_string());

    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::{Path, PathBuf};

    fn test_job() -> Job {
        Job::new(0, PathBuf::from("/v/My Movie.mkv"), Path::new("/v/720p"), Path::new("/v/done"), "")
    }

    fn as_strings(args: &[OsString]) -> Vec<String> {
        args.iter().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    #[test]
    fn test_x265_command_layout() {
        let args = as_strings(&build_encode_command(&test_job(), EncodeProfile::X265));

        let input_pos = args.iter().position(|a| a == "-i").unwrap();
        assert_eq!(args[input_pos + 1], "/v/My Movie.mkv");
        assert!(args.windows(2).any(|w| w == ["-c:v", "libx265"]));
        assert!(args.windows(2).any(|w| w == ["-progress", "pipe:1"]));
        assert_eq!(args.last().unwrap(), "/v/720p/.partial-My Movie.mkv");
        assert!(!args.contains(&"-hwaccel".to_string()));
    }

    #[test]
    fn test_nvenc_hwaccel_precedes_input() {
        for profile in [EncodeProfile::H264Nvenc, EncodeProfile::HevcNvenc] {
            let args = as_strings(&build_encode_command(&test_job(), profile));
            let hw = args.iter().position(|a| a == "-hwaccel").unwrap();
            let input = args.iter().position(|a| a == "-i").unwrap();
            assert!(hw < input, "{} must request hwaccel before the input", profile);
        }
    }

    #[test]
    fn test_engine_never_reads_stdin() {
        for profile in EncodeProfile::ALL {
            let args = as_strings(&build_encode_command(&test_job(), profile));
            assert!(args.contains(&"-nostdin".to_string()));
        }
    }

    #[test]
    fn test_profile_names_round_trip_through_from_str() {
        for profile in EncodeProfile::ALL {
            assert_eq!(profile.name().parse::<EncodeProfile>().unwrap(), profile);
        }
        assert_eq!("HEVC-NVENC".parse::<EncodeProfile>().unwrap(), EncodeProfile::HevcNvenc);
        assert!("vp9".parse::<EncodeProfile>().is_err());
    }
}
