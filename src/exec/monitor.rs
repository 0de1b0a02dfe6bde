// src/exec/monitor.rs

//! Single-drain reads for the monitor method.
//!
//! The monitor method spawns no reader tasks: while the child runs nobody
//! touches the pipes, and once it has exited (or been killed) each pipe is
//! read to the end in one go. That rules out live sinks (queues and
//! callbacks are rejected up front) but skips all per-chunk bookkeeping
//! for callers who only want the final buffer.
//!
//! A child that fills a pipe beyond the OS buffer while nobody reads will
//! stall until the drain; that is the documented trade-off of this method.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

use crate::exec::sink::SharedSinks;
use crate::types::{Encoding, StreamDecoder};

/// Read everything still available on a pipe and deliver it to the
/// stream's sinks as a single chunk. `deadline` bounds the read on
/// shutdown paths where a straggler could hold the pipe open.
pub(crate) async fn drain_stream<R>(
    stream: Option<R>,
    label: &'static str,
    encoding: Encoding,
    sinks: &SharedSinks,
    deadline: Option<Duration>,
) where
    R: AsyncRead + Unpin,
{
    let Some(mut stream) = stream else {
        return;
    };

    let mut bytes = Vec::new();
    match deadline {
        Some(deadline) => {
            let res = tokio::time::timeout(deadline, stream.read_to_end(&mut bytes)).await;
            match res {
                Ok(Err(err)) => debug!(stream = label, error = %err, "drain read failed"),
                Ok(Ok(_)) => {}
                Err(_) => {
                    debug!(stream = label, "drain deadline hit, keeping partial read")
                }
            }
        }
        None => {
            if let Err(err) = stream.read_to_end(&mut bytes).await {
                debug!(stream = label, error = %err, "drain read failed");
            }
        }
    }

    if bytes.is_empty() {
        return;
    }

    debug!(stream = label, bytes = bytes.len(), "drained stream");
    let mut decoder = StreamDecoder::default();
    let mut chunk = decoder.decode(encoding, &bytes);
    if let Some(tail) = decoder.finish(encoding) {
        chunk.append(&tail);
    }
    if !chunk.is_empty() {
        sinks.lock().await.dispatch(chunk).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::sink::{new_accumulator, take_accumulated, StreamSinks};
    use crate::types::OutputChunk;
    use std::sync::Arc;

    #[tokio::test]
    async fn drain_collects_everything_in_one_chunk() {
        let (reader, mut writer) = tokio::io::duplex(64);
        let acc = new_accumulator(Encoding::Utf8);
        let sinks = Arc::new(tokio::sync::Mutex::new(StreamSinks::capture_only(
            Some(acc.clone()),
            false,
        )));

        use tokio::io::AsyncWriteExt;
        writer.write_all(b"all at once").await.unwrap();
        drop(writer);

        drain_stream(Some(reader), "stdout", Encoding::Utf8, &sinks, None).await;
        assert_eq!(take_accumulated(&acc), OutputChunk::Text("all at once".into()));
    }

    #[tokio::test]
    async fn drain_respects_deadline_on_open_pipe() {
        let (reader, _writer) = tokio::io::duplex(64);
        let acc = new_accumulator(Encoding::Utf8);
        let sinks = Arc::new(tokio::sync::Mutex::new(StreamSinks::capture_only(
            Some(acc.clone()),
            false,
        )));

        let started = std::time::Instant::now();
        drain_stream(
            Some(reader),
            "stdout",
            Encoding::Utf8,
            &sinks,
            Some(Duration::from_millis(100)),
        )
        .await;
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
