use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ToolkitError;

/// Output container formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Container {
    Mp4,
    Mkv,
    Mov,
}

/// Container used when the target cannot hold the selected codecs
pub const FALLBACK_CONTAINER: Container = Container::Mkv;

impl Container {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::Mkv => "mkv",
            Self::Mov => "mov",
        }
    }

    /// Video codecs that can be stream-copied in; `None` means any
    fn video_codecs(&self) -> Option<&'static [&'static str]> {
        match self {
            Self::Mp4 => Some(&["h264", "hevc", "mpeg4", "mpeg2video", "mpeg1video"]),
            Self::Mov => Some(&["h264", "hevc", "mpeg4", "prores"]),
            Self::Mkv => None,
        }
    }

    fn audio_codecs(&self) -> Option<&'static [&'static str]> {
        match self {
            Self::Mp4 => Some(&["aac", "mp3", "ac3"]),
            Self::Mov => Some(&["aac", "alac", "mp3", "ac3", "pcm_s16le"]),
            Self::Mkv => None,
        }
    }

    fn subtitle_codecs(&self) -> Option<&'static [&'static str]> {
        match self {
            Self::Mp4 | Self::Mov => Some(&["mov_text"]),
            Self::Mkv => None,
        }
    }

    pub fn accepts_video(&self, codec: &str) -> bool {
        allowed(self.video_codecs(), codec)
    }

    pub fn accepts_audio(&self, codec: &str) -> bool {
        allowed(self.audio_codecs(), codec)
    }

    pub fn accepts_subtitle(&self, codec: &str) -> bool {
        allowed(self.subtitle_codecs(), codec)
    }

    /// Whether the muxer wants `-movflags +faststart`
    pub fn is_quicktime_family(&self) -> bool {
        matches!(self, Self::Mp4 | Self::Mov)
    }
}

fn allowed(list: Option<&[&str]>, codec: &str) -> bool {
    match list {
        None => true,
        Some(list) => list.iter().any(|c| c.eq_ignore_ascii_case(codec)),
    }
}

impl fmt::Display for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for Container {
    type Err = ToolkitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().trim_start_matches('.').to_lowercase().as_str() {
            "mp4" => Ok(Self::Mp4),
            "mkv" | "matroska" => Ok(Self::Mkv),
            "mov" => Ok(Self::Mov),
            other => Err(ToolkitError::UnsupportedFormat(format!(
                "container '{}'. Valid containers: mp4, mkv, mov",
                other
            ))),
        }
    }
}

/// Video codecs offered for re-encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    H264,
    Hevc,
    Mpeg2,
    Mpeg1,
}

impl VideoCodec {
    /// ffmpeg encoder name
    pub fn encoder(&self) -> &'static str {
        match self {
            Self::H264 => "libx264",
            Self::Hevc => "libx265",
            Self::Mpeg2 => "mpeg2video",
            Self::Mpeg1 => "mpeg1video",
        }
    }

    /// x264/x265 take `-crf` and `-preset`; the mpeg encoders do not
    pub fn supports_crf(&self) -> bool {
        matches!(self, Self::H264 | Self::Hevc)
    }
}

impl FromStr for VideoCodec {
    type Err = ToolkitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "h264" | "avc" | "x264" => Ok(Self::H264),
            "hevc" | "h265" | "x265" => Ok(Self::Hevc),
            "mpeg2" | "mpeg2video" => Ok(Self::Mpeg2),
            "mpeg1" | "mpeg1video" => Ok(Self::Mpeg1),
            other => Err(ToolkitError::UnsupportedFormat(format!(
                "video codec '{}'. Valid codecs: h264, hevc, mpeg2, mpeg1",
                other
            ))),
        }
    }
}

/// Audio codecs offered for re-encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioCodec {
    Aac,
    Ac3,
    Mp3,
    Vorbis,
    Opus,
}

impl AudioCodec {
    pub fn encoder(&self) -> &'static str {
        match self {
            Self::Aac => "aac",
            Self::Ac3 => "ac3",
            Self::Mp3 => "libmp3lame",
            Self::Vorbis => "libvorbis",
            Self::Opus => "libopus",
        }
    }
}

impl FromStr for AudioCodec {
    type Err = ToolkitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "aac" => Ok(Self::Aac),
            "ac3" => Ok(Self::Ac3),
            "mp3" => Ok(Self::Mp3),
            "vorbis" => Ok(Self::Vorbis),
            "opus" => Ok(Self::Opus),
            other => Err(ToolkitError::UnsupportedFormat(format!(
                "audio codec '{}'. Valid codecs: aac, ac3, mp3, vorbis, opus",
                other
            ))),
        }
    }
}
