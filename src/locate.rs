//! Error location in freshly read log text
//!
//! Two independent scans run over the same chunk: the error *message* is the
//! most recent error line, while the *frame* is the first stack frame that
//! follows the earliest error line. When several errors are interleaved in
//! one chunk the two scans can point at different errors; callers accept that.

use regex::Regex;
use std::path::PathBuf;
use std::sync::OnceLock;

/// Error kinds recognised by prefix even without a trailing colon
const KNOWN_ERROR_KINDS: &[&str] = &["TypeError", "Error"];

fn generic_error_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\w+Error:").expect("valid error regex"))
}

fn frame_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s+at\s").expect("valid frame regex"))
}

fn frame_location_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"at\s+(?:.*\s\(?)?([^\s()]+):(\d+):(\d+)").expect("valid location regex")
    })
}

/// file:line:column of one call site
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameLocation {
    pub file: PathBuf,
    pub line: usize,
    pub column: usize,
}

/// Where the patch should go
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorDetails {
    pub file_path: PathBuf,
    /// 1-based, as printed in the stack trace
    pub line_number: usize,
}

/// One error as it appears in the log: kind, message and its frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorRecord {
    pub kind: String,
    pub message: String,
    pub frames: Vec<FrameLocation>,
}

fn is_error_line(line: &str) -> bool {
    KNOWN_ERROR_KINDS.iter().any(|kind| line.starts_with(kind))
        || generic_error_re().is_match(line)
}

fn is_frame_line(line: &str) -> bool {
    frame_line_re().is_match(line)
}

/// The most recent line that starts an error, scanning from the end.
pub fn most_recent_error_message(text: &str) -> Option<&str> {
    text.trim().lines().rev().find(|line| is_error_line(line))
}

/// The first stack frame after the first line mentioning `Error`.
pub fn most_recent_frame(text: &str) -> Option<&str> {
    let lines: Vec<&str> = text.trim().lines().collect();
    let error_idx = lines.iter().position(|line| line.contains("Error"))?;
    lines[error_idx + 1..]
        .iter()
        .find(|line| is_frame_line(line))
        .copied()
}

/// Pull `path:line:column` out of a frame line.
pub fn parse_frame(frame_line: &str) -> Option<FrameLocation> {
    let caps = frame_location_re().captures(frame_line)?;
    Some(FrameLocation {
        file: PathBuf::from(&caps[1]),
        line: caps[2].parse().ok()?,
        column: caps[3].parse().ok()?,
    })
}

/// File and line of a frame, or `None` if the line is not a frame.
pub fn parse_error_details(frame_line: &str) -> Option<ErrorDetails> {
    parse_frame(frame_line).map(|frame| ErrorDetails {
        file_path: frame.file,
        line_number: frame.line,
    })
}

impl ErrorRecord {
    /// Build a record for the most recent error in `text`, with the frames
    /// printed directly beneath it.
    pub fn most_recent(text: &str) -> Option<Self> {
        let lines: Vec<&str> = text.trim().lines().collect();
        let idx = lines.iter().rposition(|line| is_error_line(line))?;
        let header = lines[idx];

        let (kind, message) = match header.split_once(':') {
            Some((kind, message)) => (kind.trim(), message.trim()),
            None => (header.trim(), ""),
        };
        let frames = lines[idx + 1..]
            .iter()
            .take_while(|line| is_frame_line(line))
            .filter_map(|line| parse_frame(line))
            .collect();

        Some(Self {
            kind: kind.to_string(),
            message: message.to_string(),
            frames,
        })
    }
}
