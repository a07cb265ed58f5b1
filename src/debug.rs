use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// JSON-lines sink for renderer diagnostics (cycles, missing references,
/// skipped resources). Clones share one file.
#[derive(Clone)]
pub(crate) struct DebugLogger {
    inner: Arc<Mutex<DebugSink>>,
}

struct DebugSink {
    writer: BufWriter<File>,
    /// Events per kind since the last summary.
    pending: BTreeMap<String, u64>,
}

impl DebugLogger {
    pub fn new(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(DebugSink {
                writer: BufWriter::new(file),
                pending: BTreeMap::new(),
            })),
        })
    }

    /// Writes `{"type":<kind>, <fields>...}` and counts it toward the next summary.
    pub fn event(&self, kind: &str, fields: &[(&str, &str)]) {
        let mut line = JsonLine::new(kind);
        for (key, value) in fields {
            line = line.str(key, value);
        }
        let line = line.finish();
        if let Ok(mut sink) = self.inner.lock() {
            let seen = sink.pending.entry(kind.to_string()).or_insert(0);
            *seen = seen.saturating_add(1);
            let _ = writeln!(sink.writer, "{line}");
        }
    }

    /// Writes one `debug.summary` line with the per-kind event counts and resets them.
    pub fn emit_summary(&self, context: &str) {
        if let Ok(mut sink) = self.inner.lock() {
            let pending = std::mem::take(&mut sink.pending);
            let mut counts = JsonLine::object();
            for (kind, seen) in &pending {
                counts = counts.num(kind, *seen);
            }
            let line = JsonLine::new("debug.summary")
                .str("context", context)
                .raw("counts", &counts.finish())
                .finish();
            let _ = writeln!(sink.writer, "{line}");
        }
    }

    pub fn flush(&self) {
        if let Ok(mut sink) = self.inner.lock() {
            let _ = sink.writer.flush();
        }
    }
}

/// Flat JSON object writer for log lines; keys keep insertion order.
pub(crate) struct JsonLine {
    out: String,
    empty: bool,
}

impl JsonLine {
    /// Object starting with `"type":<kind>`.
    pub fn new(kind: &str) -> Self {
        Self::object().str("type", kind)
    }

    pub fn object() -> Self {
        Self {
            out: String::from("{"),
            empty: true,
        }
    }

    fn key(&mut self, key: &str) {
        if !self.empty {
            self.out.push(',');
        }
        self.empty = false;
        self.out.push('"');
        self.out.push_str(&json_escape(key));
        self.out.push_str("\":");
    }

    pub fn str(mut self, key: &str, value: &str) -> Self {
        self.key(key);
        self.out.push('"');
        self.out.push_str(&json_escape(value));
        self.out.push('"');
        self
    }

    pub fn num(mut self, key: &str, value: impl std::fmt::Display) -> Self {
        self.key(key);
        self.out.push_str(&value.to_string());
        self
    }

    /// `value` must already be valid JSON.
    pub fn raw(mut self, key: &str, value: &str) -> Self {
        self.key(key);
        self.out.push_str(value);
        self
    }

    pub fn finish(mut self) -> String {
        self.out.push('}');
        self.out
    }
}

pub(crate) fn json_escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 8);
    for ch in raw.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            _ => out.push(ch),
        }
    }
    out
}
