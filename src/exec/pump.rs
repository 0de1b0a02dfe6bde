// src/exec/pump.rs

//! Stream pumps: one reader task per captured pipe.
//!
//! A pump reads bounded chunks, decodes them, and hands them to the
//! stream's sinks until EOF. Chunks are cut at read boundaries, never
//! re-split into lines; decoding problems are replaced, logged at debug
//! and never abort the stream. A pump blocked on a slow sink simply stays
//! blocked; the supervisor's own tick keeps running and will abandon the
//! pump at shutdown if it cannot drain in time.

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::exec::sink::SharedSinks;
use crate::types::{Encoding, StreamDecoder};

pub(crate) fn spawn_pump<R>(
    mut stream: R,
    label: &'static str,
    bufsize: usize,
    encoding: Encoding,
    sinks: SharedSinks,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![0u8; bufsize.max(1)];
        let mut decoder = StreamDecoder::default();

        loop {
            match stream.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    debug!(stream = label, bytes = n, "read chunk");
                    let chunk = decoder.decode(encoding, &buf[..n]);
                    if !chunk.is_empty() {
                        sinks.lock().await.dispatch(chunk).await;
                    }
                }
                Err(err) => {
                    debug!(stream = label, error = %err, "pipe read ended with error");
                    break;
                }
            }
        }

        if let Some(tail) = decoder.finish(encoding) {
            sinks.lock().await.dispatch(tail).await;
        }

        debug!(stream = label, "pump finished");
    })
}

/// Wait for pumps to drain, up to `deadline` when one is given. Pumps
/// still running afterwards are abandoned; whatever they already
/// delivered stays delivered.
pub(crate) async fn await_pumps(
    pumps: Vec<JoinHandle<()>>,
    deadline: Option<std::time::Duration>,
) {
    match deadline {
        None => {
            for pump in pumps {
                let _ = pump.await;
            }
        }
        Some(deadline) => {
            let mut pumps = pumps;
            let drain = async {
                for pump in &mut pumps {
                    let _ = pump.await;
                }
            };
            if tokio::time::timeout(deadline, drain).await.is_err() {
                for pump in &pumps {
                    pump.abort();
                }
                debug!("abandoned pumps still blocked at drain deadline");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::sink::{new_accumulator, take_accumulated, StreamSinks};
    use crate::types::OutputChunk;
    use std::sync::Arc;
    use std::time::Duration;

    fn sinks_with_acc() -> (SharedSinks, crate::exec::sink::SharedAccumulator) {
        let acc = new_accumulator(Encoding::Utf8);
        let sinks = Arc::new(tokio::sync::Mutex::new(StreamSinks::capture_only(
            Some(acc.clone()),
            false,
        )));
        (sinks, acc)
    }

    #[tokio::test]
    async fn pump_reads_to_eof_and_captures_everything() {
        let (reader, mut writer) = tokio::io::duplex(64);
        let (sinks, acc) = sinks_with_acc();

        let pump = spawn_pump(reader, "stdout", 16, Encoding::Utf8, sinks);

        use tokio::io::AsyncWriteExt;
        writer.write_all(b"hello ").await.unwrap();
        writer.write_all(b"world").await.unwrap();
        drop(writer);

        pump.await.unwrap();
        assert_eq!(take_accumulated(&acc), OutputChunk::Text("hello world".into()));
    }

    #[tokio::test]
    async fn await_pumps_abandons_blocked_pump_at_deadline() {
        let (reader, mut writer) = tokio::io::duplex(64);
        // Queue of capacity 1 that nobody reads: the pump will block on
        // its second chunk.
        let (tx, _rx_keepalive) = tokio::sync::mpsc::channel(1);
        let sinks = Arc::new(tokio::sync::Mutex::new(StreamSinks {
            capture: None,
            queue: Some(tx),
            callback: None,
            live: false,
        }));

        let pump = spawn_pump(reader, "stdout", 4, Encoding::Utf8, sinks);

        use tokio::io::AsyncWriteExt;
        writer.write_all(b"aaaabbbbcccc").await.unwrap();

        let started = std::time::Instant::now();
        await_pumps(vec![pump], Some(Duration::from_millis(100))).await;
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
