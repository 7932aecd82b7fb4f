//! Output sinks
//!
//! Tool output, remote command output, and the live channel's byte stream
//! all flow into an [`OutputSink`]. The session swaps in [`NullSink`] when
//! verbosity is disabled.

use std::sync::Mutex;

/// A capability consuming a byte stream.
///
/// Writes must not block for long: sinks sit on the output path of the
/// transfer tool and the remote channel.
pub trait OutputSink: Send + Sync {
    /// Consume one chunk of output.
    fn write(&self, data: &[u8]);
}

/// Discards everything written to it.
pub struct NullSink;

impl OutputSink for NullSink {
    fn write(&self, _data: &[u8]) {}
}

/// Accumulates written bytes in memory. Useful for capturing command output
/// programmatically and in tests.
#[derive(Default)]
pub struct MemorySink {
    buf: Mutex<Vec<u8>>,
}

impl MemorySink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy of everything written so far.
    pub fn contents(&self) -> Vec<u8> {
        self.buf.lock().expect("sink lock poisoned").clone()
    }

    /// The contents as lossily-decoded UTF-8.
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.contents()).into_owned()
    }
}

impl OutputSink for MemorySink {
    fn write(&self, data: &[u8]) {
        self.buf.lock().expect("sink lock poisoned").extend_from_slice(data);
    }
}
