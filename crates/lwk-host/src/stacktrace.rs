//! Kernel backtraces
//!
//! Traces come from the platform as text. Frames belonging to the host
//! itself (the supervisor module, its bindings glue and the worker script)
//! sit above and below the kernel's frames; both runs are removed so the
//! kernel sees only its own frames.
//!
//! Host frames are recognized by name. Browsers label wasm frames with the
//! module URL, so `lwk_supervisor_bg.wasm` frames stay recognizable in a
//! release build without a name section. A supervisor served under other
//! file names, or instantiated from raw bytes, shows up as anonymous
//! `wasm-function[N]` frames, and those are kept.

/// Written over the last bytes of a trace that did not fit
pub const TRUNCATION_MARKER: &[u8; 3] = b"...";

/// Substrings identifying host frames: symbol names and the file names
/// of the supervisor module, its glue and the worker script
const HOST_FRAME_MARKERS: &[&str] = &["lwk_supervisor", "__wbg_", "__wbindgen", "worker.js"];

fn is_host_frame(frame: &str) -> bool {
    HOST_FRAME_MARKERS.iter().any(|m| frame.contains(m))
}

/// Remove the `Error` header line and the host frames around the kernel's.
pub fn trim_host_frames(trace: &str) -> String {
    let frames: Vec<&str> = trace
        .lines()
        .map(str::trim)
        .enumerate()
        .filter(|&(i, line)| !line.is_empty() && !(i == 0 && line == "Error"))
        .map(|(_, line)| line)
        .collect();

    let Some(first) = frames.iter().position(|f| !is_host_frame(f)) else {
        return String::new();
    };
    let last = frames
        .iter()
        .rposition(|f| !is_host_frame(f))
        .unwrap_or(first);

    let mut out = String::with_capacity(trace.len());
    for frame in &frames[first..=last] {
        out.push_str(frame);
        out.push('\n');
    }
    out
}

/// Fit `trace` into `capacity` bytes.
///
/// A trace at least `capacity` bytes long is cut to `capacity` bytes and
/// ends in [`TRUNCATION_MARKER`] (or as much of it as fits).
pub fn fit_to_capacity(trace: &[u8], capacity: usize) -> Vec<u8> {
    if trace.len() < capacity {
        return trace.to_vec();
    }
    let mut out = trace[..capacity].to_vec();
    let marker_len = TRUNCATION_MARKER.len().min(capacity);
    out[capacity - marker_len..].copy_from_slice(&TRUNCATION_MARKER[..marker_len]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const BROWSER_TRACE: &str = "Error\n    at __wbg_new_8a6f238a6ece86ea (http://localhost/pkg/lwk_supervisor.js:210:17)\n    at lwk_supervisor_bg.wasm.lwk_supervisor::context::capture_backtrace (wasm://wasm/lwk_supervisor_bg-0a1b:wasm-function[120]:0x1f2e)\n    at kernel.wasm.dump_stack (wasm://wasm/kernel-77aa:wasm-function[42]:0x3b10)\n    at kernel.wasm.panic (wasm://wasm/kernel-77aa:wasm-function[7]:0x120)\n";

    #[test]
    fn test_trim_host_frames() {
        let trimmed = trim_host_frames(BROWSER_TRACE);
        let lines: Vec<&str> = trimmed.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("at kernel.wasm.dump_stack"));
        assert!(lines[1].starts_with("at kernel.wasm.panic"));
    }

    #[test]
    fn test_trim_frames_without_symbol_names() {
        let trace = "Error\n    at imports.wbg.__wbg_new_abc (http://localhost:8080/pkg/lwk_supervisor.js:310:21)\n    at http://localhost:8080/pkg/lwk_supervisor_bg.wasm:wasm-function[512]:0x3a1f2\n    at wasm://wasm/00a1b2c3:wasm-function[42]:0x3b10\n    at wasm://wasm/00a1b2c3:wasm-function[7]:0x120\n    at http://localhost:8080/pkg/lwk_supervisor_bg.wasm:wasm-function[900]:0x5000\n    at context_main (http://localhost:8080/pkg/lwk_supervisor.js:400:10)\n    at self.onmessage (http://localhost:8080/worker.js:7:3)\n";
        assert_eq!(
            trim_host_frames(trace),
            "at wasm://wasm/00a1b2c3:wasm-function[42]:0x3b10\nat wasm://wasm/00a1b2c3:wasm-function[7]:0x120\n"
        );
    }

    #[test]
    fn test_only_host_frames() {
        let trace = "__wbg_new_abc@http://localhost/pkg/lwk_supervisor.js:1:1\nonmessage@http://localhost/worker.js:7:3\n";
        assert_eq!(trim_host_frames(trace), "");
    }

    #[test]
    fn test_short_trace_left_short() {
        assert_eq!(fit_to_capacity(b"abc", 10), b"abc");
    }

    #[test]
    fn test_exact_fit_gets_marker() {
        assert_eq!(fit_to_capacity(b"abcdef", 6), b"abc...");
    }

    #[test]
    fn test_long_trace_truncated() {
        let out = fit_to_capacity(b"0123456789", 5);
        assert_eq!(out, b"01...");
    }

    #[test]
    fn test_tiny_capacity() {
        assert_eq!(fit_to_capacity(b"0123456789", 2), b"..");
        assert!(fit_to_capacity(b"0123456789", 0).is_empty());
    }
}
