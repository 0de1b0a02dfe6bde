// src/exec/sink.rs

//! Chunk destinations attached to a child stream.
//!
//! One `StreamSinks` bundles everything a stream fans out to: the
//! in-memory accumulator for the returned output, an optional bounded
//! queue, an optional callback, and the live echo to our own stdout.
//! Every chunk read from the pipe is delivered to each of them, in that
//! order. When stderr is merged into stdout both pumps share one
//! `StreamSinks` behind a mutex, which is also what gives merged output
//! its chunk-granularity interleaving.
//!
//! Queue end-of-stream sentinels are the supervisor's job (exactly once,
//! stdout before stderr); file and discard destinations never reach this
//! module, they are redirected at the OS level by the spawner.

use std::io::Write;
use std::sync::{Arc, Mutex};

use crate::types::{ChunkFn, ChunkSender, OutputChunk};

/// Shared growing buffer holding what `run` will return for one stream
/// (or for both, when merged).
pub(crate) type SharedAccumulator = Arc<Mutex<OutputChunk>>;

pub(crate) type SharedSinks = Arc<tokio::sync::Mutex<StreamSinks>>;

pub(crate) struct StreamSinks {
    /// `None` when the stream's output is not part of the returned tuple.
    pub capture: Option<SharedAccumulator>,
    /// Bounded live queue; a full queue blocks the pump.
    pub queue: Option<ChunkSender>,
    /// Caller callback, invoked synchronously per chunk.
    pub callback: Option<ChunkFn>,
    /// Echo decoded output to the caller's stdout as it arrives.
    pub live: bool,
}

impl StreamSinks {
    pub(crate) fn capture_only(capture: Option<SharedAccumulator>, live: bool) -> Self {
        Self {
            capture,
            queue: None,
            callback: None,
            live,
        }
    }

    /// Deliver one chunk to every attached destination.
    pub(crate) async fn dispatch(&mut self, chunk: OutputChunk) {
        if self.live {
            echo(&chunk);
        }

        if let Some(callback) = self.callback.as_mut() {
            callback(chunk.clone());
        }

        if let Some(queue) = self.queue.as_ref() {
            // Backpressure: block until the consumer makes room. A closed
            // queue (consumer gone) just drops the chunk.
            let _ = queue.send(Some(chunk.clone())).await;
        }

        if let Some(capture) = self.capture.as_ref() {
            capture.lock().expect("accumulator lock").append(&chunk);
        }
    }
}

fn echo(chunk: &OutputChunk) {
    let stdout = std::io::stdout();
    let mut lock = stdout.lock();
    let _ = match chunk {
        OutputChunk::Text(s) => lock.write_all(s.as_bytes()),
        OutputChunk::Bytes(b) => lock.write_all(b),
    };
    let _ = lock.flush();
}

pub(crate) fn new_accumulator(encoding: crate::types::Encoding) -> SharedAccumulator {
    Arc::new(Mutex::new(OutputChunk::empty_for(encoding)))
}

/// Take the accumulated output out of the shared buffer.
pub(crate) fn take_accumulated(acc: &SharedAccumulator) -> OutputChunk {
    let mut guard = acc.lock().expect("accumulator lock");
    std::mem::replace(&mut *guard, OutputChunk::Text(String::new()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Encoding;

    #[tokio::test]
    async fn dispatch_fans_out_to_all_destinations() {
        let acc = new_accumulator(Encoding::Utf8);
        let (tx, mut rx) = tokio::sync::mpsc::channel(4);
        let seen = Arc::new(Mutex::new(String::new()));
        let seen_cb = seen.clone();

        let mut sinks = StreamSinks {
            capture: Some(acc.clone()),
            queue: Some(tx),
            callback: Some(Box::new(move |chunk: OutputChunk| {
                seen_cb.lock().unwrap().push_str(&chunk.to_text());
            })),
            live: false,
        };

        sinks.dispatch(OutputChunk::Text("one ".into())).await;
        sinks.dispatch(OutputChunk::Text("two".into())).await;

        assert_eq!(take_accumulated(&acc), OutputChunk::Text("one two".into()));
        assert_eq!(seen.lock().unwrap().as_str(), "one two");
        assert_eq!(
            rx.recv().await,
            Some(Some(OutputChunk::Text("one ".into())))
        );
        assert_eq!(rx.recv().await, Some(Some(OutputChunk::Text("two".into()))));
    }

    #[tokio::test]
    async fn closed_queue_does_not_block_dispatch() {
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        drop(rx);
        let mut sinks = StreamSinks {
            capture: None,
            queue: Some(tx),
            callback: None,
            live: false,
        };
        sinks.dispatch(OutputChunk::Text("ignored".into())).await;
    }
}
