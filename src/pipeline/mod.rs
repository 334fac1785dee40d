//! Detect → patch orchestration
//!
//! One attempt walks the chain locate → extract → request → gate → apply and
//! stops at the first step whose precondition fails. Nothing is written
//! unless every step before the apply succeeded, and no failure escapes as
//! an error: every abort is a [`AbortReason`] the caller can log and forget.
//!
//! Only one attempt runs at a time per [`Pipeline`]. A second call while one
//! is in flight returns [`AbortReason::Busy`] without touching any file.

use crate::apply::{self, AppliedPatch};
use crate::client::{extract_first_code_block, ChatCompletionsClient, PatchRequest, PatchSource};
use crate::config::Config;
use crate::extract::FunctionExtractor;
use crate::locate::{most_recent_error_message, most_recent_frame, parse_error_details, ErrorRecord};
use crate::preview::{render_mini_diff, render_patch_preview, Palette};
use crate::safety::{DeniedCapability, SafetyGate, SafetyVerdict};
use crate::tail::LogTailer;
use crate::util::{first_line, truncate};
use anyhow::Result;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::Instrument;
use uuid::Uuid;


/// Which kind of thing went wrong
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Nothing to do, or local files did not cooperate
    Precondition,
    /// The patch service failed or answered without usable code
    Remote,
    /// A usable candidate was refused by the safety gate
    Policy,
}

impl FailureClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureClass::Precondition => "precondition",
            FailureClass::Remote => "remote",
            FailureClass::Policy => "policy",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    /// Another attempt is still running
    Busy,
    NoErrorFound,
    UnparsableLocation { frame: String },
    SourceUnreadable { path: PathBuf, error: String },
    ServiceUnavailable(String),
    NoValidPatch,
    RejectedBySafetyGate {
        pattern: String,
        capability: DeniedCapability,
    },
    /// The target file changed while the patch was being generated
    SourceChanged { path: PathBuf },
    /// Backup or write failed
    ApplyFailed(String),
}

impl AbortReason {
    pub fn class(&self) -> FailureClass {
        match self {
            AbortReason::ServiceUnavailable(_) | AbortReason::NoValidPatch => FailureClass::Remote,
            AbortReason::RejectedBySafetyGate { .. } => FailureClass::Policy,
            AbortReason::Busy
            | AbortReason::NoErrorFound
            | AbortReason::UnparsableLocation { .. }
            | AbortReason::SourceUnreadable { .. }
            | AbortReason::SourceChanged { .. }
            | AbortReason::ApplyFailed(_) => FailureClass::Precondition,
        }
    }
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::Busy => write!(f, "another patch attempt is in progress"),
            AbortReason::NoErrorFound => write!(f, "no error found"),
            AbortReason::UnparsableLocation { frame } => {
                write!(f, "could not parse error location from `{}`", frame.trim())
            }
            AbortReason::SourceUnreadable { path, error } => {
                write!(f, "could not read {}: {}", path.display(), error)
            }
            AbortReason::ServiceUnavailable(msg) => write!(f, "patch service failed: {}", msg),
            AbortReason::NoValidPatch => write!(f, "no valid patch"),
            AbortReason::RejectedBySafetyGate {
                pattern,
                capability,
            } => write!(
                f,
                "patch rejected by safety gate ({}: `{}`)",
                capability.label(),
                pattern
            ),
            AbortReason::SourceChanged { path } => {
                write!(f, "{} changed while the patch was generated", path.display())
            }
            AbortReason::ApplyFailed(msg) => write!(f, "failed to apply patch: {}", msg),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchOutcome {
    Applied(AppliedPatch),
    Aborted(AbortReason),
}

impl PatchOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, PatchOutcome::Applied(_))
    }

    pub fn abort_reason(&self) -> Option<&AbortReason> {
        match self {
            PatchOutcome::Aborted(reason) => Some(reason),
            PatchOutcome::Applied(_) => None,
        }
    }
}

impl fmt::Display for PatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatchOutcome::Applied(p) => write!(
                f,
                "patched {} lines {}-{} (backup: {})",
                p.file.display(),
                p.start_line + 1,
                p.end_line + 1,
                p.backup.display()
            ),
            PatchOutcome::Aborted(reason) => write!(f, "patch not applied: {}", reason),
        }
    }
}

/// Output options for a run
#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    pub show_preview: bool,
    pub preview_max_lines: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            show_preview: true,
            preview_max_lines: 40,
        }
    }
}

/// Log text that arrived while an attempt was running.
///
/// Chunks are appended in arrival order, so the queued text reads like one
/// larger poll of the log. Taking it empties the slot.
#[derive(Debug, Default)]
pub struct PendingLog {
    text: Option<String>,
}

impl PendingLog {
    pub fn push(&mut self, chunk: &str) {
        self.text.get_or_insert_with(String::new).push_str(chunk);
    }

    pub fn take(&mut self) -> Option<String> {
        self.text.take()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_none()
    }
}

/// Releases the busy flag however the attempt ends.
struct FlightGuard<'a>(&'a AtomicBool);

impl<'a> FlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct Pipeline {
    source: Arc<dyn PatchSource>,
    gate: SafetyGate,
    extractor: FunctionExtractor,
    options: PipelineOptions,
    busy: AtomicBool,
}

impl Pipeline {
    pub fn new(source: Arc<dyn PatchSource>, gate: SafetyGate, options: PipelineOptions) -> Self {
        Self {
            source,
            gate,
            extractor: FunctionExtractor::default(),
            options,
            busy: AtomicBool::new(false),
        }
    }

    /// Pipeline talking to the configured chat completions endpoint.
    pub fn from_config(config: &Config) -> Result<Self> {
        let client = ChatCompletionsClient::new(config.service.clone())?;
        Ok(Self::new(
            Arc::new(client),
            SafetyGate::new(config.extra_deny.clone()),
            PipelineOptions {
                show_preview: config.show_preview,
                preview_max_lines: config.preview_max_lines,
            },
        ))
    }

    pub fn with_extractor(mut self, extractor: FunctionExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Run one detect → patch attempt over freshly read log text.
    pub async fn run_surgical_patch(&self, log_text: &str) -> PatchOutcome {
        let Some(_guard) = FlightGuard::acquire(&self.busy) else {
            tracing::warn!("skipping patch attempt: another attempt is in progress");
            return PatchOutcome::Aborted(AbortReason::Busy);
        };

        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("patch_run", %run_id);
        let outcome = self.attempt(log_text).instrument(span.clone()).await;

        span.in_scope(|| match &outcome {
            PatchOutcome::Applied(patch) => tracing::info!(
                file = %patch.file.display(),
                backup = %patch.backup.display(),
                start_line = patch.start_line + 1,
                end_line = patch.end_line + 1,
                "patch applied"
            ),
            PatchOutcome::Aborted(reason) => tracing::warn!(
                class = reason.class().as_str(),
                "patch not applied: {}",
                reason
            ),
        });
        outcome
    }

    /// Read new log entries and attempt a patch if they mention a trigger kind.
    ///
    /// `Ok(None)` when there is nothing new or nothing to react to; in that
    /// case no file is read beyond the log and no request is made.
    pub async fn scan_once(&self, tailer: &LogTailer, config: &Config) -> Result<Option<PatchOutcome>> {
        let Some(chunk) = tailer.read_new_entries()? else {
            return Ok(None);
        };
        if !config.is_trigger(&chunk) {
            return Ok(None);
        }
        Ok(Some(self.run_surgical_patch(&chunk).await))
    }

    async fn attempt(&self, log_text: &str) -> PatchOutcome {
        match self.try_attempt(log_text).await {
            Ok(patch) => PatchOutcome::Applied(patch),
            Err(reason) => PatchOutcome::Aborted(reason),
        }
    }

    async fn try_attempt(&self, log_text: &str) -> Result<AppliedPatch, AbortReason> {
        let frame = most_recent_frame(log_text).ok_or(AbortReason::NoErrorFound)?;
        let error_message = most_recent_error_message(log_text)
            .unwrap_or(frame)
            .trim()
            .to_string();

        let details = parse_error_details(frame).ok_or_else(|| AbortReason::UnparsableLocation {
            frame: frame.to_string(),
        })?;
        let path = details.file_path;
        let kind = ErrorRecord::most_recent(log_text).map(|record| record.kind);
        tracing::info!(
            kind = kind.as_deref().unwrap_or("unknown"),
            file = %path.display(),
            line = details.line_number,
            error = %truncate(&error_message, 160),
            "runtime error located"
        );

        // always the current file, not whatever the log saw
        let content = fs::read_to_string(&path).map_err(|e| AbortReason::SourceUnreadable {
            path: path.clone(),
            error: e.to_string(),
        })?;
        let lines: Vec<&str> = content.split('\n').collect();
        let span = self
            .extractor
            .extract(&path, &lines, details.line_number.saturating_sub(1));
        tracing::debug!(
            strategy = self.extractor.strategy_name(),
            start_line = span.start_line + 1,
            end_line = span.end_line + 1,
            "function span extracted"
        );

        let request = PatchRequest {
            error_message,
            function_code: span.source_text.clone(),
        };
        let response = self
            .source
            .request_patch(&request)
            .await
            .map_err(|e| AbortReason::ServiceUnavailable(first_line(&e.to_string()).to_string()))?;

        let candidate = extract_first_code_block(&response)
            .filter(|c| c.has_block_marker())
            .ok_or(AbortReason::NoValidPatch)?;

        if let SafetyVerdict::Rejected {
            pattern,
            capability,
        } = self.gate.check(&candidate.code)
        {
            return Err(AbortReason::RejectedBySafetyGate {
                pattern,
                capability,
            });
        }

        if self.options.show_preview {
            let palette = Palette::detect();
            let max = self.options.preview_max_lines;
            eprintln!(
                "{}",
                render_patch_preview(&span.source_text, &candidate.code, span.start_line, max, palette)
            );
            eprintln!(
                "{}",
                render_mini_diff(&span.source_text, &candidate.code, max, palette)
            );
        }

        // the request can take a while; refuse to splice stale lines
        match fs::read_to_string(&path) {
            Ok(current) if current == content => {}
            Ok(_) => return Err(AbortReason::SourceChanged { path }),
            Err(e) => {
                return Err(AbortReason::SourceUnreadable {
                    path,
                    error: e.to_string(),
                })
            }
        }

        apply::apply_patch(&path, &lines, span.start_line, span.end_line, &candidate.code)
            .map_err(|e| AbortReason::ApplyFailed(format!("{:#}", e)))
    }
}
