/// CLI utilities for consistent output formatting
use std::io::IsTerminal;

use confgraph::pipeline::ResolveStats;
use confgraph::storage::FlushSummary;

/// Get a colored prefix
///
/// Returns bright cyan if stderr is a TTY, plain text otherwise.
pub fn confgraph_prefix() -> &'static str {
    if std::io::stderr().is_terminal() {
        "\x1b[96m[confgraph]\x1b[0m"
    } else {
        "[confgraph]"
    }
}

/// One-line run summary printed after `run`
pub fn run_summary(stats: &ResolveStats, flush: Option<&FlushSummary>) -> String {
    let mut line = format!(
        "{} resolved: {} hits, {} misses, {} invocations",
        confgraph_prefix(),
        stats.hits,
        stats.misses,
        stats.invocations
    );
    if stats.uncached > 0 {
        line.push_str(&format!(", {} uncached", stats.uncached));
    }
    if let Some(flush) = flush {
        line.push_str(&format!(
            "; snapshot: {} written, {} skipped, {} merged",
            flush.written,
            flush.skipped,
            flush.merged()
        ));
        if flush.failed > 0 {
            line.push_str(&format!(", {} failed", flush.failed));
        }
    }
    line
}

/// Human-readable byte count
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", size, UNITS[unit])
    }
}
