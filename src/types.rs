// src/types.rs

//! Public value types: output chunks, encodings, stream sink specifiers and
//! the result returned by every run.

use std::path::PathBuf;

use tokio::sync::mpsc;

/// A piece of child output, already decoded (or deliberately not).
///
/// A single run only ever produces one of the two variants, matching the
/// configured [`Encoding`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputChunk {
    Text(String),
    Bytes(Vec<u8>),
}

impl OutputChunk {
    pub fn is_empty(&self) -> bool {
        match self {
            OutputChunk::Text(s) => s.is_empty(),
            OutputChunk::Bytes(b) => b.is_empty(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            OutputChunk::Text(s) => s.len(),
            OutputChunk::Bytes(b) => b.len(),
        }
    }

    /// Text view of the chunk; bytes are rendered lossily.
    pub fn to_text(&self) -> String {
        match self {
            OutputChunk::Text(s) => s.clone(),
            OutputChunk::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
        }
    }

    /// Append another chunk of the same variant.
    pub(crate) fn append(&mut self, other: &OutputChunk) {
        match (self, other) {
            (OutputChunk::Text(a), OutputChunk::Text(b)) => a.push_str(b),
            (OutputChunk::Bytes(a), OutputChunk::Bytes(b)) => a.extend_from_slice(b),
            // Mixed variants cannot happen within one run; degrade via text.
            (OutputChunk::Text(a), OutputChunk::Bytes(b)) => {
                a.push_str(&String::from_utf8_lossy(b))
            }
            (OutputChunk::Bytes(a), OutputChunk::Text(b)) => a.extend_from_slice(b.as_bytes()),
        }
    }

    /// An empty chunk of the variant matching `encoding`.
    pub(crate) fn empty_for(encoding: Encoding) -> OutputChunk {
        match encoding {
            Encoding::Raw => OutputChunk::Bytes(Vec::new()),
            _ => OutputChunk::Text(String::new()),
        }
    }
}

/// Text codec applied to child output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// UTF-8 with lossy replacement of invalid sequences.
    Utf8,
    /// IBM code page 437, the classic `cmd.exe` console encoding.
    Cp437,
    /// No decoding; chunks and results are raw bytes.
    Raw,
}

impl Encoding {
    /// `cp437` catches most of what `cmd.exe` emits; everything else
    /// speaks UTF-8.
    pub fn platform_default() -> Encoding {
        if cfg!(windows) {
            Encoding::Cp437
        } else {
            Encoding::Utf8
        }
    }

    pub fn is_raw(&self) -> bool {
        matches!(self, Encoding::Raw)
    }
}

/// Incremental decoder used by the stream pumps.
///
/// UTF-8 sequences may straddle read-chunk boundaries, so up to three
/// trailing bytes of an incomplete sequence are carried over to the next
/// chunk instead of being replaced.
#[derive(Debug, Default)]
pub(crate) struct StreamDecoder {
    carry: Vec<u8>,
}

impl StreamDecoder {
    pub(crate) fn decode(&mut self, encoding: Encoding, input: &[u8]) -> OutputChunk {
        match encoding {
            Encoding::Raw => OutputChunk::Bytes(input.to_vec()),
            Encoding::Cp437 => {
                use codepage_437::{FromCp437, CP437_CONTROL};
                OutputChunk::Text(String::from_cp437(input.to_vec(), &CP437_CONTROL))
            }
            Encoding::Utf8 => {
                let mut bytes = std::mem::take(&mut self.carry);
                bytes.extend_from_slice(input);
                let mut out = String::with_capacity(bytes.len());
                let mut rest = bytes.as_slice();
                loop {
                    match std::str::from_utf8(rest) {
                        Ok(s) => {
                            out.push_str(s);
                            break;
                        }
                        Err(err) => {
                            let (valid, after) = rest.split_at(err.valid_up_to());
                            // Safe: split at a validated boundary.
                            out.push_str(std::str::from_utf8(valid).unwrap());
                            match err.error_len() {
                                Some(n) => {
                                    tracing::debug!(
                                        bytes = n,
                                        "replacing undecodable byte sequence"
                                    );
                                    out.push(char::REPLACEMENT_CHARACTER);
                                    rest = &after[n..];
                                }
                                None => {
                                    // Incomplete trailing sequence: keep for
                                    // the next chunk.
                                    self.carry = after.to_vec();
                                    rest = &[];
                                }
                            }
                            if rest.is_empty() {
                                break;
                            }
                        }
                    }
                }
                OutputChunk::Text(out)
            }
        }
    }

    /// Flush any buffered incomplete sequence as replacement output.
    pub(crate) fn finish(&mut self, encoding: Encoding) -> Option<OutputChunk> {
        if self.carry.is_empty() {
            return None;
        }
        let carry = std::mem::take(&mut self.carry);
        match encoding {
            Encoding::Utf8 => Some(OutputChunk::Text(
                String::from_utf8_lossy(&carry).into_owned(),
            )),
            _ => Some(OutputChunk::Bytes(carry)),
        }
    }
}

/// Bounded queue endpoint for live chunk delivery.
///
/// The engine deposits `Some(chunk)` for every chunk read, and `None`
/// exactly once when the stream ends. A full queue blocks the pump
/// (backpressure), never drops.
pub type ChunkSender = mpsc::Sender<Option<OutputChunk>>;

/// Callback sink, invoked synchronously by the pump for every chunk.
pub type ChunkFn = Box<dyn FnMut(OutputChunk) + Send + Sync>;

/// Where a child stream goes.
///
/// This is the resolved, explicit form of what the original dynamic
/// "stdout argument" could be.
pub enum StreamSpec {
    /// Capture into the returned output (the default for stdout).
    Capture,
    /// Discard at the OS level; the result carries `None` for this stream.
    Discard,
    /// Write raw bytes to this file (truncated), redirected at the OS
    /// level. The engine closes the file before returning.
    File(PathBuf),
    /// Deliver chunks to a bounded queue, in addition to capturing.
    Queue(ChunkSender),
    /// Invoke a callback for every chunk, in addition to capturing.
    Callback(ChunkFn),
    /// Merge this stream into stdout (the default for stderr).
    Merge,
}

impl std::fmt::Debug for StreamSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamSpec::Capture => f.write_str("Capture"),
            StreamSpec::Discard => f.write_str("Discard"),
            StreamSpec::File(p) => f.debug_tuple("File").field(p).finish(),
            StreamSpec::Queue(_) => f.write_str("Queue(..)"),
            StreamSpec::Callback(_) => f.write_str("Callback(..)"),
            StreamSpec::Merge => f.write_str("Merge"),
        }
    }
}

impl StreamSpec {
    pub(crate) fn is_live_sink(&self) -> bool {
        matches!(self, StreamSpec::Queue(_) | StreamSpec::Callback(_))
    }
}

/// Captured output of a finished run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutput {
    /// stdout and stderr interleaved (or stdout alone when stderr was
    /// discarded / redirected). `None` when stdout itself was discarded
    /// or redirected to a file.
    Merged(Option<OutputChunk>),
    /// Separate streams, produced when `split_streams` is set.
    Split {
        stdout: Option<OutputChunk>,
        stderr: Option<OutputChunk>,
    },
}

/// What every run returns. `exit_code` is the child's native code when it
/// exited normally, or one of the engine's reserved negative codes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunResult {
    pub exit_code: i32,
    pub output: RunOutput,
}

impl RunResult {
    /// Merged output as text; empty string when nothing was captured.
    pub fn output_string(&self) -> String {
        match &self.output {
            RunOutput::Merged(chunk) => chunk.as_ref().map(|c| c.to_text()).unwrap_or_default(),
            RunOutput::Split { stdout, stderr } => {
                let mut s = stdout.as_ref().map(|c| c.to_text()).unwrap_or_default();
                if let Some(err) = stderr {
                    s.push_str(&err.to_text());
                }
                s
            }
        }
    }

    /// Captured stdout as text, when the run used `split_streams`.
    pub fn stdout_string(&self) -> Option<String> {
        match &self.output {
            RunOutput::Merged(chunk) => chunk.as_ref().map(|c| c.to_text()),
            RunOutput::Split { stdout, .. } => stdout.as_ref().map(|c| c.to_text()),
        }
    }

    /// Captured stderr as text, when the run used `split_streams`.
    pub fn stderr_string(&self) -> Option<String> {
        match &self.output {
            RunOutput::Merged(_) => None,
            RunOutput::Split { stderr, .. } => stderr.as_ref().map(|c| c.to_text()),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}
