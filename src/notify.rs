use serde::Serialize;
use serde_json::json;

/// How a notice should be presented. Problems are flushed as they happen;
/// the run summary arrives as a single message or success at the end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Problem,
    Message,
    Success,
}

/// Machine-readable notice identifiers. The daemon never renders prose;
/// callers localize from the key plus params.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKey {
    BadSessionDate,
    BadSessionTime,
    CourseNotFound,
    CourseHasNoActivity,
    UnknownGroup,
    EmptyRepeatRange,
    DuplicateSession,
    SessionsGenerated,
}

#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub key: MessageKey,
    pub params: serde_json::Value,
}

impl Diagnostic {
    pub fn problem(key: MessageKey, params: serde_json::Value) -> Self {
        Diagnostic {
            severity: Severity::Problem,
            key,
            params,
        }
    }

    pub fn message(key: MessageKey, params: serde_json::Value) -> Self {
        Diagnostic {
            severity: Severity::Message,
            key,
            params,
        }
    }

    pub fn success(key: MessageKey, params: serde_json::Value) -> Self {
        Diagnostic {
            severity: Severity::Success,
            key,
            params,
        }
    }
}

/// Sink for per-row notices and the end-of-run completion event.
pub trait Notify {
    fn notify(&mut self, diagnostic: Diagnostic);

    /// Raised exactly once per import run with the accepted-session count.
    fn completed(&mut self, count: usize);
}

/// Collects everything in memory; the IPC layer serializes the queue into
/// the response.
#[derive(Debug, Default)]
pub struct NotifyQueue {
    pub diagnostics: Vec<Diagnostic>,
    pub completed_count: Option<usize>,
}

impl NotifyQueue {
    pub fn new() -> Self {
        NotifyQueue::default()
    }

    pub fn count_of(&self, key: MessageKey) -> usize {
        self.diagnostics.iter().filter(|d| d.key == key).count()
    }
}

impl Notify for NotifyQueue {
    fn notify(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    fn completed(&mut self, count: usize) {
        self.completed_count = Some(count);
    }
}

pub fn queue_to_json(queue: &NotifyQueue) -> serde_json::Value {
    json!(queue.diagnostics)
}
