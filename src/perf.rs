use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::debug::JsonLine;

const HOT_LIMIT: usize = 100;

/// JSON-lines timing sink. When the last clone drops, a `<stem>_hot.log`
/// ranking the slowest spans and largest counters is written next to the log.
#[derive(Clone)]
pub(crate) struct PerfLogger {
    inner: Arc<Mutex<PerfSink>>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
struct SpanStats {
    total_ms: f64,
    max_ms: f64,
    count: u64,
}

struct PerfSink {
    writer: BufWriter<File>,
    path: PathBuf,
    spans: HashMap<String, SpanStats>,
    counts: HashMap<String, u64>,
}

impl PerfLogger {
    pub fn new(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let writer = BufWriter::new(File::create(&path)?);
        Ok(Self {
            inner: Arc::new(Mutex::new(PerfSink {
                writer,
                path,
                spans: HashMap::new(),
                counts: HashMap::new(),
            })),
        })
    }

    pub fn log_span_ms(&self, name: &str, render_id: Option<usize>, ms: f64) {
        let line = with_render_id(JsonLine::new("perf.span").str("name", name), render_id)
            .str("unit", "ms")
            .num("ms", format!("{ms:.3}"))
            .finish();
        if let Ok(mut sink) = self.inner.lock() {
            let stats = sink.spans.entry(name.to_string()).or_default();
            stats.total_ms += ms;
            stats.max_ms = stats.max_ms.max(ms);
            stats.count = stats.count.saturating_add(1);
            let _ = writeln!(sink.writer, "{line}");
        }
    }

    pub fn log_counts(&self, name: &str, render_id: Option<usize>, counts: &[(&str, u64)]) {
        let mut object = JsonLine::object();
        for (key, value) in counts {
            object = object.num(key, *value);
        }
        let line = with_render_id(JsonLine::new("perf.counts").str("name", name), render_id)
            .raw("counts", &object.finish())
            .finish();
        if let Ok(mut sink) = self.inner.lock() {
            for (key, value) in counts {
                let total = sink.counts.entry(format!("{name}.{key}")).or_insert(0);
                *total = total.saturating_add(*value);
            }
            let _ = writeln!(sink.writer, "{line}");
        }
    }

    pub fn flush(&self) {
        if let Ok(mut sink) = self.inner.lock() {
            let _ = sink.writer.flush();
        }
    }
}

fn with_render_id(line: JsonLine, render_id: Option<usize>) -> JsonLine {
    match render_id {
        Some(id) => line.num("render_id", id),
        None => line.raw("render_id", "null"),
    }
}

impl PerfSink {
    fn hot_lines(&self) -> Vec<String> {
        let mut spans: Vec<(&String, &SpanStats)> = self.spans.iter().collect();
        spans.sort_by(|a, b| b.1.total_ms.total_cmp(&a.1.total_ms).then_with(|| a.0.cmp(b.0)));
        let mut counts: Vec<(&String, &u64)> = self.counts.iter().collect();
        counts.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));

        let span_lines = spans.into_iter().take(HOT_LIMIT).enumerate().map(|(rank, (name, stats))| {
            let avg = stats.total_ms / stats.count.max(1) as f64;
            JsonLine::new("perf.hot.span")
                .num("rank", rank + 1)
                .str("name", name)
                .num("ms", format!("{:.3}", stats.total_ms))
                .num("max_ms", format!("{:.3}", stats.max_ms))
                .num("count", stats.count)
                .num("avg_ms", format!("{avg:.3}"))
                .finish()
        });
        let count_lines = counts.into_iter().take(HOT_LIMIT).enumerate().map(|(rank, (name, value))| {
            JsonLine::new("perf.hot.count")
                .num("rank", rank + 1)
                .str("name", name)
                .num("value", value)
                .finish()
        });
        span_lines.chain(count_lines).collect()
    }
}

impl Drop for PerfSink {
    fn drop(&mut self) {
        let _ = self.writer.flush();
        let Ok(file) = File::create(hot_path_for(&self.path)) else {
            return;
        };
        let mut writer = BufWriter::new(file);
        for line in self.hot_lines() {
            let _ = writeln!(writer, "{line}");
        }
    }
}

fn hot_path_for(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("fullbleed_svg_perf");
    path.with_file_name(format!("{stem}_hot.log"))
}

/// Runs `f`, logging its wall time as span `name` when a logger is attached.
pub(crate) fn timed<T>(
    perf: Option<&PerfLogger>,
    name: &str,
    render_id: Option<usize>,
    f: impl FnOnce() -> T,
) -> T {
    let Some(perf) = perf else {
        return f();
    };
    let start = Instant::now();
    let out = f();
    perf.log_span_ms(name, render_id, start.elapsed().as_secs_f64() * 1000.0);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hot_path_sits_next_to_log() {
        assert_eq!(
            hot_path_for(Path::new("/tmp/run.jsonl")),
            PathBuf::from("/tmp/run_hot.log")
        );
        assert_eq!(
            hot_path_for(Path::new("/tmp/trace")),
            PathBuf::from("/tmp/trace_hot.log")
        );
    }

    #[test]
    fn spans_and_counts_are_logged() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("fullbleed_svg_perf_{}.jsonl", std::process::id()));
        {
            let perf = PerfLogger::new(&path).expect("create log");
            let value = timed(Some(&perf), "svg.parse", Some(1), || 7);
            assert_eq!(value, 7);
            perf.log_counts("svg", Some(1), &[("nodes", 12)]);
            perf.log_span_ms("svg.paint", None, 2.0);
            perf.flush();
        }
        let text = std::fs::read_to_string(&path).expect("read log");
        assert!(text.contains(r#"{"type":"perf.span","name":"svg.parse","render_id":1,"unit":"ms","ms":"#));
        assert!(text.contains(r#""render_id":null"#));
        assert!(text.contains(r#""counts":{"nodes":12}"#));
        let hot = hot_path_for(&path);
        let hot_text = std::fs::read_to_string(&hot).expect("read hot log");
        assert!(hot_text.contains(r#""name":"svg.nodes","value":12"#));
        assert!(hot_text.contains(r#""name":"svg.paint","ms":2.000,"max_ms":2.000,"count":1"#));
        let _ = std::fs::remove_file(&path);
        let _ = std::fs::remove_file(&hot);
    }

    #[test]
    fn timed_without_logger_just_runs() {
        assert_eq!(timed(None, "svg.paint", None, || "done"), "done");
    }
}
