use serde::{Deserialize, Serialize};
use std::fmt;

/// Elementary stream category as reported by the prober
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Video,
    Audio,
    Subtitle,
}

impl StreamKind {
    /// Map an ffprobe `codec_type`; data and attachment streams are not catalogued
    pub fn from_codec_type(codec_type: &str) -> Option<Self> {
        match codec_type {
            "video" => Some(Self::Video),
            "audio" => Some(Self::Audio),
            "subtitle" => Some(Self::Subtitle),
            _ => None,
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Subtitle => "subtitle",
        };
        f.write_str(name)
    }
}

/// One probed stream. The index is container-assigned and unique per file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    pub index: u32,
    pub kind: StreamKind,
    pub codec_name: String,
    pub language: Option<String>,
}

impl StreamDescriptor {
    pub fn new<S: Into<String>>(index: u32, kind: StreamKind, codec_name: S) -> Self {
        Self {
            index,
            kind,
            codec_name: codec_name.into(),
            language: None,
        }
    }

    pub fn with_language<S: Into<String>>(mut self, language: S) -> Self {
        let language = language.into();
        self.language = if language.trim().is_empty() {
            None
        } else {
            Some(language)
        };
        self
    }

    /// Language tag used in file names; `und` when the prober gave none
    pub fn language_tag(&self) -> &str {
        self.language.as_deref().unwrap_or("und")
    }
}

/// Read-only set of streams for one input file, kept in index order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamCatalog {
    streams: Vec<StreamDescriptor>,
}

impl StreamCatalog {
    pub fn new(mut streams: Vec<StreamDescriptor>) -> Self {
        streams.sort_by_key(|s| s.index);
        streams.dedup_by_key(|s| s.index);
        Self { streams }
    }

    pub fn streams(&self) -> &[StreamDescriptor] {
        &self.streams
    }

    pub fn of_kind(&self, kind: StreamKind) -> impl Iterator<Item = &StreamDescriptor> {
        self.streams.iter().filter(move |s| s.kind == kind)
    }

    pub fn video(&self) -> impl Iterator<Item = &StreamDescriptor> {
        self.of_kind(StreamKind::Video)
    }

    pub fn audio(&self) -> impl Iterator<Item = &StreamDescriptor> {
        self.of_kind(StreamKind::Audio)
    }

    pub fn subtitles(&self) -> impl Iterator<Item = &StreamDescriptor> {
        self.of_kind(StreamKind::Subtitle)
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    /// Short codec summary, e.g. `h264/aac,ac3`
    pub fn codec_summary(&self) -> String {
        let join = |kind| {
            let mut names: Vec<&str> = self.of_kind(kind).map(|s| s.codec_name.as_str()).collect();
            names.dedup();
            names.join(",")
        };
        format!("{}/{}", join(StreamKind::Video), join(StreamKind::Audio))
    }
}
