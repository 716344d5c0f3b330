use std::path::{Path, PathBuf};

/// One invocation of the media tool: phase label, argument vector and the
/// single file it writes. The tool binary itself is supplied by the runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaCommand {
    pub description: String,
    pub args: Vec<String>,
    pub destination: PathBuf,
}

impl MediaCommand {
    /// Create a new media processing command
    pub fn new<S: Into<String>>(description: S) -> Self {
        Self {
            description: description.into(),
            args: Vec::new(),
            destination: PathBuf::new(),
        }
    }

    /// Add an argument
    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add multiple arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(|s| s.into()));
        self
    }

    /// Quiet banner plus overwrite policy; must precede the input
    pub fn preamble(self, overwrite: bool) -> Self {
        self.arg("-hide_banner").arg(if overwrite { "-y" } else { "-n" })
    }

    /// Add input file
    pub fn input<P: AsRef<Path>>(self, path: P) -> Self {
        self.arg("-i").arg(path.as_ref().to_string_lossy().to_string())
    }

    /// Select a stream of the first input by its probed index
    pub fn map_stream(self, index: u32) -> Self {
        self.arg("-map").arg(format!("0:{}", index))
    }

    /// Copy every mapped stream without re-encoding
    pub fn copy_all(self) -> Self {
        self.arg("-c").arg("copy")
    }

    /// Set video codec
    pub fn video_codec<S: Into<String>>(self, codec: S) -> Self {
        self.arg("-c:v").arg(codec)
    }

    /// Set audio codec
    pub fn audio_codec<S: Into<String>>(self, codec: S) -> Self {
        self.arg("-c:a").arg(codec)
    }

    /// Set subtitle codec
    pub fn subtitle_codec<S: Into<String>>(self, codec: S) -> Self {
        self.arg("-c:s").arg(codec)
    }

    pub fn audio_bitrate_kbps(self, kbps: u32) -> Self {
        self.arg("-b:a").arg(format!("{}k", kbps))
    }

    pub fn crf(self, crf: u8) -> Self {
        self.arg("-crf").arg(crf.to_string())
    }

    pub fn preset<S: Into<String>>(self, preset: S) -> Self {
        self.arg("-preset").arg(preset)
    }

    /// Move the index to the front of mp4/mov output
    pub fn faststart(self) -> Self {
        self.arg("-movflags").arg("+faststart")
    }

    /// Add output file; it becomes the step's destination
    pub fn output<P: AsRef<Path>>(mut self, path: P) -> Self {
        let path = path.as_ref();
        self.destination = path.to_path_buf();
        self.arg(path.to_string_lossy().to_string())
    }

    /// Shell-like rendering for logs and dry runs
    pub fn command_line(&self, binary: &str) -> String {
        let mut line = binary.to_string();
        for arg in &self.args {
            line.push(' ');
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                line.push('"');
                line.push_str(arg);
                line.push('"');
            } else {
                line.push_str(arg);
            }
        }
        line
    }
}
