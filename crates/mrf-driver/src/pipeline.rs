//! Ingestion workers
//!
//! One thread per physical source. The serial and TCP workers own their
//! channel's [`CommStatus`] and run the same supervision cycle:
//!
//! ```text
//! CONNECTING -> open -> CONNECTED -> session ... failure -> ERROR -> backoff -> CONNECTING
//!                  \-> failure -> ERROR -> backoff -> CONNECTING
//! ```
//!
//! Every blocking call is bounded by a per-channel timeout and every timeout
//! path checks `is_running`, so a worker notices shutdown within one timeout.

use crate::clock;
use crate::comm::Backoff;
use crate::context::RobotContext;
use crate::control::{CommandEnvelope, FaultEvent, dispatch_command, signal_fault, status_reply};
use crate::error::DriverError;
use crate::sink::{MotorMailbox, requeue_motor_command, take_motor_command};
use crate::store::{ImageData, SensorData};
use crossbeam_channel::Sender;
use mrf_link::{
    CameraBackend, CommandLink, LinkError, SerialConnector, SerialLink, TcpConnector,
};
use mrf_protocol::{Channel, CommStatus, OperatorCommand, Reply, TelemetryPacket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, trace, warn};

/// Longest uninterrupted sleep while waiting out a backoff delay
const SLEEP_SLICE: Duration = Duration::from_millis(10);

/// Framing errors tolerated before the first valid frame of a session
const MAX_RESYNC_ERRORS: u32 = 64;

/// Raise the current thread's priority (`realtime` feature)
pub(crate) fn raise_thread_priority(thread: &str) {
    #[cfg(feature = "realtime")]
    {
        use thread_priority::*;
        use tracing::info;

        match set_current_thread_priority(ThreadPriority::Max) {
            Ok(_) => {
                info!("{} thread priority set to MAX (realtime)", thread);
            },
            Err(e) => {
                warn!(
                    "Failed to set {} thread priority: {}. \
                    On Linux, you may need to run with CAP_SYS_NICE or use rtkit.",
                    thread, e
                );
            },
        }
    }
    #[cfg(not(feature = "realtime"))]
    let _ = thread;
}

/// Sleep for `duration` in short slices
///
/// # Returns
/// `false` if `is_running` was cleared before the time was up
pub fn sleep_while_running(duration: Duration, is_running: &AtomicBool) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if !is_running.load(Ordering::Acquire) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        spin_sleep::sleep(SLEEP_SLICE.min(deadline - now));
    }
}

/// Why a connected session ended
enum SessionEnd {
    Shutdown,
    Failed(LinkError),
}

fn report_link_error(ctx: &RobotContext, channel: Channel, stage: &str, e: &LinkError) {
    ctx.metrics.link_errors.fetch_add(1, Ordering::Relaxed);
    if e.is_fatal() {
        error!("{} worker: {} failed: {}", channel, stage, e);
    } else {
        warn!("{} worker: {} failed: {}", channel, stage, e);
    }
}

/// Connect / run / back off until shutdown
fn supervise<L>(
    channel: Channel,
    ctx: &RobotContext,
    fault_tx: &Sender<FaultEvent>,
    is_running: &AtomicBool,
    mut open: impl FnMut() -> Result<L, LinkError>,
    mut session: impl FnMut(&mut L) -> SessionEnd,
    mut close: impl FnMut(&mut L),
) {
    let runtime = &ctx.runtime;
    let mut backoff = Backoff::new(
        Duration::from_millis(runtime.backoff_base_ms),
        Duration::from_millis(runtime.backoff_max_ms),
        Duration::from_millis(runtime.backoff_reset_after_ms),
    );

    // Acquire: If we see false, we must see all cleanup writes from other threads
    while is_running.load(Ordering::Acquire) {
        let _ = ctx.set_comm(channel, CommStatus::Connecting);

        match open() {
            Ok(mut link) => {
                let _ = ctx.set_comm(channel, CommStatus::Connected);
                let connected_at = Instant::now();
                let end = session(&mut link);
                close(&mut link);
                backoff.record_connected(connected_at.elapsed());

                match end {
                    SessionEnd::Shutdown => break,
                    SessionEnd::Failed(e) => {
                        report_link_error(ctx, channel, "link", &e);
                        let _ = ctx.set_comm(channel, CommStatus::Error);
                        signal_fault(fault_tx, &ctx.metrics, FaultEvent::link(channel, &e));
                    },
                }
            },
            Err(e) => {
                report_link_error(ctx, channel, "connect", &e);
                let _ = ctx.set_comm(channel, CommStatus::Error);
            },
        }

        let delay = backoff.next_delay();
        debug!(
            "{} worker: retrying in {:?} (consecutive failures: {})",
            channel,
            delay,
            backoff.failures()
        );
        if !sleep_while_running(delay, is_running) {
            break;
        }
    }

    if matches!(
        ctx.comm_status(channel),
        CommStatus::Connected | CommStatus::Error
    ) {
        let _ = ctx.set_comm(channel, CommStatus::Disconnected);
    }
    trace!("{} worker: loop exited", channel);
}

// ============================================================================
// Serial
// ============================================================================

/// Serial worker main loop
///
/// Reads telemetry frames into the sensor slot and writes pending motor
/// commands from the mailbox. Framing errors before a session's first valid
/// frame are resyncs (the port opened mid-frame); after that they end the
/// session. A motor command whose write failed goes back into the mailbox.
///
/// # Parameters
/// - `connector`: opens the port (moved into the thread)
/// - `ctx`: shared context
/// - `mailbox`: motor command mailbox filled by the actuator sink
/// - `fault_tx`: fault events for the control loop
/// - `is_running`: cooperative shutdown flag
pub fn serial_loop<C: SerialConnector>(
    mut connector: C,
    ctx: Arc<RobotContext>,
    mailbox: MotorMailbox,
    fault_tx: Sender<FaultEvent>,
    is_running: Arc<AtomicBool>,
) {
    raise_thread_priority("Serial");

    let port = ctx.config.serial_port.clone();
    let baud_rate = ctx.config.baud_rate;
    supervise(
        Channel::Serial,
        &ctx,
        &fault_tx,
        &is_running,
        || connector.open(&port, baud_rate),
        |link: &mut C::Link| serial_session(link, &ctx, &mailbox, &is_running),
        |link: &mut C::Link| link.close(),
    );
}

fn write_pending_motor(
    link: &mut impl SerialLink,
    ctx: &RobotContext,
    mailbox: &MotorMailbox,
) -> Result<(), LinkError> {
    if let Some(command) = take_motor_command(mailbox) {
        if let Err(e) = link.write_frame(&command.encode()) {
            // Retried on the next session; the sink does not resend unchanged commands
            requeue_motor_command(mailbox, command);
            return Err(e);
        }
        ctx.metrics.motor_frames.fetch_add(1, Ordering::Relaxed);
        trace!(
            "Serial worker: motor left={} right={}",
            command.left, command.right
        );
    }
    Ok(())
}

fn serial_session(
    link: &mut impl SerialLink,
    ctx: &RobotContext,
    mailbox: &MotorMailbox,
    is_running: &AtomicBool,
) -> SessionEnd {
    let read_timeout = ctx.runtime.serial_read_timeout();
    // A port opened mid-transmission starts inside a frame
    let mut synced = false;
    let mut resyncs = 0u32;

    loop {
        if !is_running.load(Ordering::Acquire) {
            trace!("Serial worker: is_running flag is false, exiting");
            // The control loop's final STOP lands in the mailbox just before the flag clears
            if let Err(e) = write_pending_motor(link, ctx, mailbox) {
                warn!("Serial worker: final motor command not sent: {}", e);
            }
            return SessionEnd::Shutdown;
        }

        // Motor output goes out before the read and again after it, so a
        // command never waits longer than one read timeout
        if let Err(e) = write_pending_motor(link, ctx, mailbox) {
            return SessionEnd::Failed(e);
        }

        match link.read_frame(read_timeout) {
            Ok(frame) => {
                if !synced {
                    debug!("Serial worker: stream synced after {} framing errors", resyncs);
                    synced = true;
                }
                if let Err(e) = publish_frame(&frame, ctx) {
                    return SessionEnd::Failed(e);
                }
            },
            Err(LinkError::Framing(e)) if !synced && resyncs < MAX_RESYNC_ERRORS => {
                resyncs += 1;
                ctx.metrics.serial_resyncs.fetch_add(1, Ordering::Relaxed);
                if resyncs == 1 {
                    warn!("Serial worker: resyncing on stream start: {}", e);
                } else {
                    trace!("Serial worker: resyncing: {}", e);
                }
            },
            Err(e) if e.is_timeout() => {
                ctx.metrics.serial_timeouts.fetch_add(1, Ordering::Relaxed);
            },
            Err(e) => return SessionEnd::Failed(e),
        }

        if let Err(e) = write_pending_motor(link, ctx, mailbox) {
            return SessionEnd::Failed(e);
        }
    }
}

/// Decode a well-framed telemetry frame into the sensor slot
///
/// Semantic decode errors drop the frame and keep the prior reading.
fn publish_frame(frame: &[u8], ctx: &RobotContext) -> Result<(), LinkError> {
    match TelemetryPacket::parse(frame) {
        Ok(packet) => {
            let data = SensorData::from_packet(&packet, clock::monotonic_secs());
            let version = ctx.store.publish_sensor(data);
            ctx.metrics.serial_frames.fetch_add(1, Ordering::Relaxed);
            trace!(
                "Serial worker: sensor v{} enc=({}, {})",
                version, data.encoder_left, data.encoder_right
            );
            Ok(())
        },
        Err(e) if e.is_framing() => Err(LinkError::Framing(e)),
        Err(e) => {
            ctx.metrics.decode_errors.fetch_add(1, Ordering::Relaxed);
            warn!("Serial worker: dropped telemetry payload: {}", e);
            Ok(())
        },
    }
}

// ============================================================================
// Operator link (TCP)
// ============================================================================

/// TCP worker main loop
///
/// Receives operator command lines, answers `STATUS` itself and forwards
/// everything else to the control loop, writing back the control loop's reply.
pub fn tcp_loop<C: TcpConnector>(
    mut connector: C,
    ctx: Arc<RobotContext>,
    command_tx: Sender<CommandEnvelope>,
    fault_tx: Sender<FaultEvent>,
    is_running: Arc<AtomicBool>,
) {
    let host = ctx.config.tcp_host.clone();
    let port = ctx.config.tcp_port;
    let connect_timeout = ctx.runtime.tcp_connect_timeout();
    supervise(
        Channel::Tcp,
        &ctx,
        &fault_tx,
        &is_running,
        || connector.connect(&host, port, connect_timeout),
        |link: &mut C::Link| tcp_session(link, &ctx, &command_tx, &is_running),
        |link: &mut C::Link| link.close(),
    );
}

fn tcp_session(
    link: &mut impl CommandLink,
    ctx: &RobotContext,
    command_tx: &Sender<CommandEnvelope>,
    is_running: &AtomicBool,
) -> SessionEnd {
    let recv_timeout = ctx.runtime.tcp_recv_timeout();

    loop {
        if !is_running.load(Ordering::Acquire) {
            trace!("TCP worker: is_running flag is false, exiting");
            return SessionEnd::Shutdown;
        }

        let line = match link.recv(recv_timeout) {
            Ok(line) => line,
            Err(e) if e.is_timeout() => continue,
            Err(e) => return SessionEnd::Failed(e),
        };

        if let Some(reply) = handle_command_line(&line, ctx, command_tx)
            && let Err(e) = link.send_command(&reply.to_line())
        {
            return SessionEnd::Failed(e);
        }
    }
}

/// Parse one command line and produce its reply (`None` for blank lines)
pub fn handle_command_line(
    line: &[u8],
    ctx: &RobotContext,
    command_tx: &Sender<CommandEnvelope>,
) -> Option<Reply> {
    if line.iter().all(u8::is_ascii_whitespace) {
        return None;
    }
    ctx.metrics.commands_received.fetch_add(1, Ordering::Relaxed);

    let command = match OperatorCommand::parse_line(line) {
        Ok(command) => command,
        Err(e) => {
            ctx.metrics.commands_rejected.fetch_add(1, Ordering::Relaxed);
            warn!("TCP worker: rejected command line: {}", e);
            return Some(Reply::Err(e.to_string()));
        },
    };
    debug!("TCP worker: received {}", command.name());

    if command == OperatorCommand::Status {
        return Some(status_reply(ctx));
    }

    let reply = match dispatch_command(command_tx, command, ctx.runtime.command_reply_timeout()) {
        Ok(reply) => reply,
        Err(DriverError::ChannelFull) => Reply::Err("busy".to_string()),
        Err(DriverError::Timeout) => Reply::Err("timeout".to_string()),
        Err(DriverError::ChannelClosed) => Reply::Err("shutting down".to_string()),
        Err(e) => Reply::Err(e.to_string()),
    };
    Some(reply)
}

// ============================================================================
// Camera
// ============================================================================

/// Camera worker main loop
///
/// Every grabbed frame gets the next sequence number; failures are published
/// as invalid images instead of being skipped, then the next grab waits out
/// the reconnect backoff.
pub fn camera_loop<B: CameraBackend>(
    mut backend: B,
    ctx: Arc<RobotContext>,
    is_running: Arc<AtomicBool>,
) {
    raise_thread_priority("Camera");

    let grab_timeout = ctx.runtime.camera_grab_timeout();
    let mut backoff = Backoff::new(
        Duration::from_millis(ctx.runtime.backoff_base_ms),
        Duration::from_millis(ctx.runtime.backoff_max_ms),
        Duration::from_millis(ctx.runtime.backoff_reset_after_ms),
    );
    let mut sequence_number = 0u64;

    loop {
        if !is_running.load(Ordering::Acquire) {
            trace!("Camera worker: is_running flag is false, exiting");
            break;
        }

        let result = backend.grab_frame(grab_timeout);
        let timestamp = clock::monotonic_secs();
        let image = match result {
            Ok(buffer) if !buffer.is_empty() => {
                sequence_number += 1;
                backoff.reset();
                ImageData::valid(buffer, timestamp, sequence_number)
            },
            Ok(_) => {
                sequence_number += 1;
                warn!("Camera worker: frame {} is empty", sequence_number);
                ctx.metrics
                    .camera_invalid_frames
                    .fetch_add(1, Ordering::Relaxed);
                ImageData::invalid(timestamp, sequence_number)
            },
            Err(e) if e.is_timeout() => continue,
            Err(e) => {
                sequence_number += 1;
                warn!("Camera worker: frame {} invalid: {}", sequence_number, e);
                ctx.metrics
                    .camera_invalid_frames
                    .fetch_add(1, Ordering::Relaxed);
                ImageData::invalid(timestamp, sequence_number)
            },
        };

        let failed = !image.is_valid();
        ctx.store.publish_image(image);
        ctx.metrics.camera_frames.fetch_add(1, Ordering::Relaxed);

        if failed {
            let delay = backoff.next_delay();
            trace!("Camera worker: next grab in {:?}", delay);
            if !sleep_while_running(delay, &is_running) {
                break;
            }
        }
    }

    trace!("Camera worker: loop exited");
}
