//! Process-wide log sanitization.
//!
//! Secrets (upstream tokens, bot tokens, webhook URLs) are registered at
//! config-load time; every formatted log line is routed through
//! [`sanitize`] before it reaches stdout or the log file, so a registered
//! value can never appear in output even when an error message embeds it.
//!
//! Registration is process-global on purpose: the registry must outlive any
//! individual subsystem and be reachable from the tracing writer.

use regex::Regex;
use std::io::Write;
use std::sync::{Arc, Mutex, OnceLock, RwLock};
use tracing_subscriber::fmt::MakeWriter;

const REDACTED: &str = "[REDACTED]";

/// Values shorter than this are ignored on registration; redacting them
/// would mangle ordinary log text.
const MIN_SECRET_LEN: usize = 4;

/// Traversal depth cap for [`sanitize_value`].  JSON trees are acyclic, so
/// this only guards against absurdly nested documents.
const MAX_DEPTH: usize = 64;

struct Registry {
    literals: Vec<String>,
    patterns: Vec<Regex>,
}

fn registry() -> &'static RwLock<Registry> {
    static REGISTRY: OnceLock<RwLock<Registry>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        RwLock::new(Registry {
            literals: Vec::new(),
            patterns: Vec::new(),
        })
    })
}

/// Register a literal sensitive string.  Short or empty values are ignored.
pub fn register_secret(secret: &str) {
    let secret = secret.trim();
    if secret.len() < MIN_SECRET_LEN {
        return;
    }
    let mut reg = registry().write().expect("sanitizer registry poisoned");
    if !reg.literals.iter().any(|s| s == secret) {
        reg.literals.push(secret.to_owned());
        // Longest first, so overlapping secrets redact fully.
        reg.literals.sort_by_key(|s| std::cmp::Reverse(s.len()));
    }
}

/// Register a regex pattern whose matches are redacted.
pub fn register_pattern(pattern: &str) -> Result<(), regex::Error> {
    let re = Regex::new(pattern)?;
    registry()
        .write()
        .expect("sanitizer registry poisoned")
        .patterns
        .push(re);
    Ok(())
}

/// Replace every registered literal and pattern match with `[REDACTED]`.
pub fn sanitize(text: &str) -> String {
    let reg = registry().read().expect("sanitizer registry poisoned");
    let mut out = text.to_owned();
    for literal in &reg.literals {
        if out.contains(literal.as_str()) {
            out = out.replace(literal.as_str(), REDACTED);
        }
    }
    for pattern in &reg.patterns {
        out = pattern.replace_all(&out, REDACTED).into_owned();
    }
    out
}

/// Walk an arbitrary JSON value depth-first, sanitizing every string.
///
/// Null, booleans and numbers pass through untouched.  Nesting deeper than
/// [`MAX_DEPTH`] is collapsed to a marker string.
pub fn sanitize_value(value: &serde_json::Value) -> serde_json::Value {
    sanitize_value_at(value, 0)
}

fn sanitize_value_at(value: &serde_json::Value, depth: usize) -> serde_json::Value {
    use serde_json::Value;
    if depth > MAX_DEPTH {
        return Value::String("[Truncated]".to_owned());
    }
    match value {
        Value::String(s) => Value::String(sanitize(s)),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| sanitize_value_at(v, depth + 1))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (sanitize(k), sanitize_value_at(v, depth + 1)))
                .collect(),
        ),
        other => other.clone(),
    }
}

// ---------------------------------------------------------------------------
// Tracing writer
// ---------------------------------------------------------------------------

/// File copy of the log stream, attached after config load (the tracing
/// subscriber is installed before the config file has been read).
fn file_sink() -> &'static Mutex<Option<Arc<Mutex<std::fs::File>>>> {
    static FILE_SINK: OnceLock<Mutex<Option<Arc<Mutex<std::fs::File>>>>> = OnceLock::new();
    FILE_SINK.get_or_init(|| Mutex::new(None))
}

/// Start copying sanitized log output to `path` (append-only).
/// Idempotent: a second call replaces the previous file handle.
pub fn attach_log_file(path: &std::path::Path) -> std::io::Result<()> {
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    *file_sink().lock().expect("log file sink poisoned") = Some(Arc::new(Mutex::new(file)));
    Ok(())
}

/// `MakeWriter` that buffers each formatted event and sanitizes it before
/// writing to stdout (and the attached log file, when one exists).
#[derive(Clone, Copy, Default)]
pub struct SanitizingMakeWriter;

impl SanitizingMakeWriter {
    pub fn stdout() -> Self {
        SanitizingMakeWriter
    }
}

impl<'a> MakeWriter<'a> for SanitizingMakeWriter {
    type Writer = SanitizingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        SanitizingWriter {
            buf: Vec::with_capacity(256),
            file: file_sink().lock().expect("log file sink poisoned").clone(),
        }
    }
}

/// Per-event writer: collects the formatted bytes, sanitizes on drop.
pub struct SanitizingWriter {
    buf: Vec<u8>,
    file: Option<Arc<Mutex<std::fs::File>>>,
}

impl Write for SanitizingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Drop for SanitizingWriter {
    fn drop(&mut self) {
        if self.buf.is_empty() {
            return;
        }
        let text = String::from_utf8_lossy(&self.buf);
        let clean = sanitize(&text);
        let mut stdout = std::io::stdout().lock();
        let _ = stdout.write_all(clean.as_bytes());
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = file.write_all(clean.as_bytes());
            }
        }
    }
}
