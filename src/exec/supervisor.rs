// src/exec/supervisor.rs

//! Per-run orchestration.
//!
//! One `execute` call owns the whole lifecycle: validate the invocation,
//! wire the stream destinations, spawn the child, supervise it against
//! the deadline / stop predicate / keyboard interrupt, converge every
//! ending on the same shutdown sequence (kill subtree, bounded drain,
//! close sinks), and classify the result. Whatever happens inside, the
//! caller gets a `RunResult`, never a panic and never an error type.
//!
//! Observing a keyboard interrupt installs a SIGINT handler for the whole
//! process (tokio's signal machinery); after the first run the hosting
//! process will no longer die on Ctrl-C while a run is active, it gets a
//! -252 result instead.

use std::io::{Seek, SeekFrom, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::process::Child;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{CommandSpec, Method, RunOptions};
use crate::errors::RunnerError;
use crate::exec::monitor::drain_stream;
use crate::exec::outcome::{classify, Classified, Outcome, EXIT_TIMEOUT};
use crate::exec::pump::{await_pumps, spawn_pump};
use crate::exec::sink::{
    new_accumulator, take_accumulated, SharedAccumulator, SharedSinks, StreamSinks,
};
use crate::exec::spawn::{spawn_child, StdioPlan};
use crate::process::{kill_tree, DEFAULT_KILL_GRACE};
use crate::types::{ChunkSender, Encoding, OutputChunk, RunOutput, RunResult, StreamSpec};

/// Run a command to completion under the configured supervision. The
/// single public entry of the engine; always resolves.
pub(crate) async fn execute(command: CommandSpec, mut options: RunOptions) -> RunResult {
    let on_exit = options.on_exit.take();
    let result = execute_inner(command, options).await;
    if let Some(on_exit) = on_exit {
        on_exit();
    }
    result
}

async fn execute_inner(command: CommandSpec, mut options: RunOptions) -> RunResult {
    // Invocation-time rejections, before anything is spawned.
    if options.method == Method::Monitor
        && (options.stdout.is_live_sink() || options.stderr.is_live_sink())
    {
        let outcome = Outcome::Invalid(
            "queue and callback sinks need live delivery, use the poller method".to_string(),
        );
        return finish_without_streams(&command, &options, outcome);
    }

    let stdout_spec = std::mem::replace(&mut options.stdout, StreamSpec::Capture);
    let stderr_spec = std::mem::replace(&mut options.stderr, StreamSpec::Merge);
    let mut wiring = match wire_streams(stdout_spec, stderr_spec, &options) {
        Ok(wiring) => wiring,
        Err(err) => return finish_without_streams(&command, &options, outcome_of_error(err)),
    };

    let stdout_plan = wiring.stdout_plan.take().expect("stdout plan wired");
    let stderr_plan = wiring.stderr_plan.take().expect("stderr plan wired");
    let spawned = match spawn_child(&command, &mut options, stdout_plan, stderr_plan) {
        Ok(spawned) => spawned,
        Err(err) => {
            // Queues still deserve their end-of-stream marker even though
            // nothing ever ran.
            close_queues(&mut wiring).await;
            return finish_without_streams(&command, &options, outcome_of_error(err));
        }
    };
    let mut child = spawned.child;
    let pid = spawned.pid;

    if let Some(process_callback) = options.process_callback.take() {
        process_callback(pid);
    }
    log_info(
        options.silent,
        format!("Running command '{}' (pid {})", command, pid),
    );

    let mut stdout_pipe = child.stdout.take();
    let mut stderr_pipe = child.stderr.take();

    // Poller: hand the pipes to reader tasks now. Monitor: keep them for
    // the single drain after exit.
    let mut pumps: Vec<JoinHandle<()>> = Vec::new();
    if options.method == Method::Poller {
        if let (Some(pipe), Some(sinks)) = (stdout_pipe.take(), wiring.stdout_sinks.clone()) {
            pumps.push(spawn_pump(
                pipe,
                "stdout",
                options.bufsize,
                options.encoding,
                sinks,
            ));
        }
        if let (Some(pipe), Some(sinks)) = (stderr_pipe.take(), wiring.stderr_sinks.clone()) {
            pumps.push(spawn_pump(
                pipe,
                "stderr",
                options.bufsize,
                options.encoding,
                sinks,
            ));
        }
    }

    let started = Instant::now();
    let deadline = options.timeout.map(|t| started + t);
    let end = drive(&mut child, started, deadline, &options).await;

    let outcome = match end {
        LoopEnd::Exited(status) => {
            // Natural completion: let the pumps (or the one-shot drain)
            // finish delivering buffered output. A configured timeout
            // keeps applying to the drain as well.
            let budget = deadline
                .map(|d| d.saturating_duration_since(Instant::now()).max(options.check_interval));
            if options.method == Method::Poller {
                await_pumps(std::mem::take(&mut pumps), budget).await;
            } else {
                if let Some(sinks) = wiring.stdout_sinks.as_ref() {
                    drain_stream(stdout_pipe.take(), "stdout", options.encoding, sinks, budget)
                        .await;
                }
                if let Some(sinks) = wiring.stderr_sinks.as_ref() {
                    drain_stream(stderr_pipe.take(), "stderr", options.encoding, sinks, budget)
                        .await;
                }
            }
            Outcome::Completed(status)
        }
        other => {
            log_warn(
                options.silent,
                format!("Terminating process tree of command '{}' (pid {})", command, pid),
            );
            // Reap the direct child while the tree is being signalled, so
            // the group probe sees it gone instead of lingering as a
            // zombie.
            tokio::join!(kill_tree(pid, DEFAULT_KILL_GRACE), async {
                let _ = tokio::time::timeout(
                    DEFAULT_KILL_GRACE + Duration::from_secs(1),
                    child.wait(),
                )
                .await;
            });

            // Bounded drain of whatever already sits in the pipes.
            let drain_deadline = Some(options.check_interval);
            if options.method == Method::Poller {
                await_pumps(std::mem::take(&mut pumps), drain_deadline).await;
            } else {
                if let Some(sinks) = wiring.stdout_sinks.as_ref() {
                    drain_stream(
                        stdout_pipe.take(),
                        "stdout",
                        options.encoding,
                        sinks,
                        drain_deadline,
                    )
                    .await;
                }
                if let Some(sinks) = wiring.stderr_sinks.as_ref() {
                    drain_stream(
                        stderr_pipe.take(),
                        "stderr",
                        options.encoding,
                        sinks,
                        drain_deadline,
                    )
                    .await;
                }
            }

            match other {
                LoopEnd::TimedOut(timeout) => Outcome::TimedOut(timeout),
                LoopEnd::Stopped => Outcome::Stopped,
                LoopEnd::Interrupted => Outcome::Interrupted,
                LoopEnd::WaitFailed(err) => Outcome::IoFailure(err),
                LoopEnd::Exited(_) => unreachable!("handled above"),
            }
        }
    };

    close_queues(&mut wiring).await;

    let classified = classify(&outcome, &command);
    log_result(&command, &classified, &options);

    // A timeout message also lands in a file-redirected stdout, so the
    // file tells the whole story on its own.
    if classified.exit_code == EXIT_TIMEOUT {
        if let (Some(file), Some(message)) =
            (wiring.stdout_file.as_mut(), classified.message.as_deref())
        {
            let _ = file.seek(SeekFrom::End(0));
            let _ = file.write_all(message.as_bytes());
        }
    }
    // Engine-opened files are closed before returning.
    drop(wiring.stdout_file.take());
    drop(wiring.stderr_file.take());

    compose_result(&wiring, classified, &options)
}

/// Terminal states of the supervision loop.
enum LoopEnd {
    Exited(std::process::ExitStatus),
    TimedOut(Duration),
    Stopped,
    Interrupted,
    WaitFailed(std::io::Error),
}

async fn drive(
    child: &mut Child,
    started: Instant,
    deadline: Option<Instant>,
    options: &RunOptions,
) -> LoopEnd {
    // interval() panics on a zero period; clamp instead of trusting the
    // caller.
    let tick = options.check_interval.max(Duration::from_millis(1));
    let mut ticker = tokio::time::interval(tick);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    #[cfg(unix)]
    let mut interrupt =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt()).ok();
    #[cfg(windows)]
    let mut interrupt = tokio::signal::windows::ctrl_c().ok();

    let mut last_heartbeat = started;

    loop {
        tokio::select! {
            biased;

            res = child.wait() => {
                return match res {
                    Ok(status) => LoopEnd::Exited(status),
                    Err(err) => LoopEnd::WaitFailed(err),
                };
            }

            _ = wait_for_interrupt(&mut interrupt) => {
                debug!("keyboard interrupt observed");
                return LoopEnd::Interrupted;
            }

            _ = ticker.tick() => {
                if let Some(deadline) = deadline {
                    if Instant::now() >= deadline {
                        return LoopEnd::TimedOut(
                            options.timeout.unwrap_or_default(),
                        );
                    }
                }
                if let Some(stop_on) = options.stop_on.as_ref() {
                    if stop_on() {
                        return LoopEnd::Stopped;
                    }
                }
                if let Some(heartbeat) = options.heartbeat {
                    if last_heartbeat.elapsed() >= heartbeat {
                        last_heartbeat = Instant::now();
                        log_info(
                            options.silent,
                            format!(
                                "Still running command after {} seconds",
                                started.elapsed().as_secs()
                            ),
                        );
                    }
                }
            }
        }
    }
}

#[cfg(unix)]
async fn wait_for_interrupt(interrupt: &mut Option<tokio::signal::unix::Signal>) {
    match interrupt.as_mut() {
        Some(signal) => {
            if signal.recv().await.is_none() {
                std::future::pending::<()>().await;
            }
        }
        None => std::future::pending::<()>().await,
    }
}

#[cfg(windows)]
async fn wait_for_interrupt(interrupt: &mut Option<tokio::signal::windows::CtrlC>) {
    match interrupt.as_mut() {
        Some(signal) => {
            if signal.recv().await.is_none() {
                std::future::pending::<()>().await;
            }
        }
        None => std::future::pending::<()>().await,
    }
}

/// Everything the supervisor needs to keep about the two streams after
/// wiring them up.
struct Wiring {
    stdout_plan: Option<StdioPlan>,
    stderr_plan: Option<StdioPlan>,
    stdout_sinks: Option<SharedSinks>,
    stderr_sinks: Option<SharedSinks>,
    /// Accumulator for merged output (`split_streams = false`).
    merged_acc: Option<SharedAccumulator>,
    /// Per-stream accumulators (`split_streams = true`).
    stdout_acc: Option<SharedAccumulator>,
    stderr_acc: Option<SharedAccumulator>,
    /// Sentinel senders, kept apart from the pump-owned clones.
    stdout_queue: Option<ChunkSender>,
    stderr_queue: Option<ChunkSender>,
    /// Engine-opened files (closed before return).
    stdout_file: Option<std::fs::File>,
    stderr_file: Option<std::fs::File>,
}

fn wire_streams(
    stdout_spec: StreamSpec,
    stderr_spec: StreamSpec,
    options: &RunOptions,
) -> Result<Wiring, RunnerError> {
    let split = options.split_streams;
    let live = options.live_output;
    let encoding = options.encoding;

    let mut wiring = Wiring {
        stdout_plan: None,
        stderr_plan: None,
        stdout_sinks: None,
        stderr_sinks: None,
        merged_acc: None,
        stdout_acc: None,
        stderr_acc: None,
        stdout_queue: None,
        stderr_queue: None,
        stdout_file: None,
        stderr_file: None,
    };

    // stdout
    match stdout_spec {
        StreamSpec::Capture | StreamSpec::Merge => {
            let acc = if split {
                let acc = new_accumulator(encoding);
                wiring.stdout_acc = Some(acc.clone());
                acc
            } else {
                let acc = new_accumulator(encoding);
                wiring.merged_acc = Some(acc.clone());
                acc
            };
            wiring.stdout_plan = Some(StdioPlan::Piped);
            wiring.stdout_sinks = Some(Arc::new(tokio::sync::Mutex::new(
                StreamSinks::capture_only(Some(acc), live),
            )));
        }
        StreamSpec::Queue(sender) => {
            let acc = if split {
                let acc = new_accumulator(encoding);
                wiring.stdout_acc = Some(acc.clone());
                acc
            } else {
                let acc = new_accumulator(encoding);
                wiring.merged_acc = Some(acc.clone());
                acc
            };
            wiring.stdout_queue = Some(sender.clone());
            wiring.stdout_plan = Some(StdioPlan::Piped);
            wiring.stdout_sinks = Some(Arc::new(tokio::sync::Mutex::new(StreamSinks {
                capture: Some(acc),
                queue: Some(sender),
                callback: None,
                live,
            })));
        }
        StreamSpec::Callback(callback) => {
            let acc = if split {
                let acc = new_accumulator(encoding);
                wiring.stdout_acc = Some(acc.clone());
                acc
            } else {
                let acc = new_accumulator(encoding);
                wiring.merged_acc = Some(acc.clone());
                acc
            };
            wiring.stdout_plan = Some(StdioPlan::Piped);
            wiring.stdout_sinks = Some(Arc::new(tokio::sync::Mutex::new(StreamSinks {
                capture: Some(acc),
                queue: None,
                callback: Some(callback),
                live,
            })));
        }
        StreamSpec::Discard => {
            wiring.stdout_plan = Some(StdioPlan::Null);
        }
        StreamSpec::File(path) => {
            let file = std::fs::File::create(&path)?;
            let dup = file.try_clone()?;
            wiring.stdout_file = Some(file);
            wiring.stdout_plan = Some(StdioPlan::ToFile(dup));
        }
    }

    // stderr
    match stderr_spec {
        StreamSpec::Merge if !split => {
            // Merge into whatever stdout does: same pipe sinks, same
            // file, or the same nothing.
            match (&wiring.stdout_sinks, &wiring.stdout_file) {
                (Some(sinks), _) => {
                    wiring.stderr_plan = Some(StdioPlan::Piped);
                    wiring.stderr_sinks = Some(sinks.clone());
                }
                (None, Some(file)) => {
                    wiring.stderr_plan = Some(StdioPlan::ToFile(file.try_clone()?));
                }
                (None, None) => {
                    wiring.stderr_plan = Some(StdioPlan::Null);
                }
            }
        }
        StreamSpec::Merge | StreamSpec::Capture => {
            // With split output, merge degrades to a separate capture.
            let acc = if split {
                let acc = new_accumulator(encoding);
                wiring.stderr_acc = Some(acc.clone());
                acc
            } else {
                let acc = wiring
                    .merged_acc
                    .get_or_insert_with(|| new_accumulator(encoding))
                    .clone();
                acc
            };
            wiring.stderr_plan = Some(StdioPlan::Piped);
            wiring.stderr_sinks = Some(Arc::new(tokio::sync::Mutex::new(
                StreamSinks::capture_only(Some(acc), live),
            )));
        }
        StreamSpec::Queue(sender) => {
            let acc = if split {
                let acc = new_accumulator(encoding);
                wiring.stderr_acc = Some(acc.clone());
                acc
            } else {
                wiring
                    .merged_acc
                    .get_or_insert_with(|| new_accumulator(encoding))
                    .clone()
            };
            wiring.stderr_queue = Some(sender.clone());
            wiring.stderr_plan = Some(StdioPlan::Piped);
            wiring.stderr_sinks = Some(Arc::new(tokio::sync::Mutex::new(StreamSinks {
                capture: Some(acc),
                queue: Some(sender),
                callback: None,
                live,
            })));
        }
        StreamSpec::Callback(callback) => {
            let acc = if split {
                let acc = new_accumulator(encoding);
                wiring.stderr_acc = Some(acc.clone());
                acc
            } else {
                wiring
                    .merged_acc
                    .get_or_insert_with(|| new_accumulator(encoding))
                    .clone()
            };
            wiring.stderr_plan = Some(StdioPlan::Piped);
            wiring.stderr_sinks = Some(Arc::new(tokio::sync::Mutex::new(StreamSinks {
                capture: Some(acc),
                queue: None,
                callback: Some(callback),
                live,
            })));
        }
        StreamSpec::Discard => {
            wiring.stderr_plan = Some(StdioPlan::Null);
        }
        StreamSpec::File(path) => {
            let file = std::fs::File::create(&path)?;
            let dup = file.try_clone()?;
            wiring.stderr_file = Some(file);
            wiring.stderr_plan = Some(StdioPlan::ToFile(dup));
        }
    }

    Ok(wiring)
}

/// Sinks close in deterministic order: stdout first, then stderr; each
/// queue gets its sentinel exactly once.
async fn close_queues(wiring: &mut Wiring) {
    if let Some(queue) = wiring.stdout_queue.take() {
        let _ = queue.send(None).await;
    }
    if let Some(queue) = wiring.stderr_queue.take() {
        let _ = queue.send(None).await;
    }
}

fn outcome_of_error(err: RunnerError) -> Outcome {
    match err {
        RunnerError::Invalid(reason) => Outcome::Invalid(reason),
        RunnerError::Spawn(err) | RunnerError::Io(err) => Outcome::IoFailure(err),
        RunnerError::Other(err) => Outcome::Other(err),
    }
}

/// Classify + report a failure that happened before any stream existed.
fn finish_without_streams(
    command: &CommandSpec,
    options: &RunOptions,
    outcome: Outcome,
) -> RunResult {
    let classified = classify(&outcome, command);
    log_result(command, &classified, options);

    let message = classified
        .message
        .map(|m| message_chunk(m, options.encoding));
    let output = if options.split_streams {
        RunOutput::Split {
            stdout: message,
            stderr: None,
        }
    } else {
        RunOutput::Merged(message)
    };
    RunResult {
        exit_code: classified.exit_code,
        output,
    }
}

fn message_chunk(message: String, encoding: Encoding) -> OutputChunk {
    if encoding.is_raw() {
        OutputChunk::Bytes(message.into_bytes())
    } else {
        OutputChunk::Text(message)
    }
}

/// Assemble the final output tuple from the accumulators and the
/// classification.
fn compose_result(wiring: &Wiring, classified: Classified, options: &RunOptions) -> RunResult {
    let encoding = options.encoding;

    let decorate = |captured: Option<OutputChunk>| -> Option<OutputChunk> {
        match &classified.message {
            None => captured,
            Some(message) => {
                let mut chunk = message_chunk(message.clone(), encoding);
                match captured {
                    Some(partial) if classified.keep_partial_output && !partial.is_empty() => {
                        chunk.append(&message_chunk(
                            " Original output was:\n".to_string(),
                            encoding,
                        ));
                        chunk.append(&partial);
                    }
                    _ => {}
                }
                Some(chunk)
            }
        }
    };

    let output = if options.split_streams {
        let stdout = wiring.stdout_acc.as_ref().map(take_accumulated);
        let stderr = wiring.stderr_acc.as_ref().map(take_accumulated);
        RunOutput::Split {
            stdout: decorate(stdout),
            stderr,
        }
    } else {
        let merged = wiring.merged_acc.as_ref().map(take_accumulated);
        RunOutput::Merged(decorate(merged))
    };

    RunResult {
        exit_code: classified.exit_code,
        output,
    }
}

fn log_result(command: &CommandSpec, classified: &Classified, options: &RunOptions) {
    let code = classified.exit_code;
    if options.valid_exit_codes.covers(code) {
        log_info(
            options.silent,
            format!("Command '{}' returned exit code {}", command, code),
        );
    } else {
        log_error(
            options.silent,
            format!("Command '{}' failed with exit code {}", command, code),
        );
        if let Some(message) = &classified.message {
            log_error(options.silent, message.clone());
        }
    }
}

fn log_info(silent: bool, message: String) {
    if silent {
        debug!("{message}");
    } else {
        info!("{message}");
    }
}

fn log_warn(silent: bool, message: String) {
    if silent {
        debug!("{message}");
    } else {
        warn!("{message}");
    }
}

fn log_error(silent: bool, message: String) {
    if silent {
        debug!("{message}");
    } else {
        error!("{message}");
    }
}
