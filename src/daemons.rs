//! Daemons & queues (spec §4.6): the receive daemon reassembles frames
//! and drives the verify/dispatch pipeline; the event daemon delivers
//! callbacks to the host, serialized per link.
//!
//! Channels are `embassy-sync` bounded MPMC queues the way this
//! codebase's RPC I/O task bridges threads (`rpc/channels.rs`,
//! `rpc/io_task.rs`) — fixed-capacity, no heap, `Send` across a plain
//! `std::thread` boundary. Unlike the embedded original, depth here is a
//! compile-time constant (`CHANNEL_CAPACITY`) rather than the
//! runtime-configurable value [`crate::config::EngineConfig`] validates;
//! the config fields remain for documentation and validation parity with
//! spec §6.3, and a host that needs a different depth recompiles with a
//! different `CHANNEL_CAPACITY` (see DESIGN.md).

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, TrySendError};
use futures_lite::future::{block_on, race};
use log::{debug, trace, warn};

use crate::message::Message;

/// Capacity shared by the receive-byte, decoded-message and event
/// queues (spec §4.6: byte queue ≥ 32, decoded/event queues = 32).
pub const CHANNEL_CAPACITY: usize = 32;

/// How often the receive daemon wakes even with nothing queued, mirroring
/// the source's watchdog-tickle interval (spec §4.6).
pub const WATCHDOG_TICK: Duration = Duration::from_millis(500);

/// Raw bytes from one GATT attribute write, queued for the receive
/// daemon (spec §3 "Receive-byte queue").
pub type RxByteQueue = Channel<CriticalSectionRawMutex, Vec<u8>, CHANNEL_CAPACITY>;

/// Fully assembled, verified inbound messages awaiting `rx_msg` (spec §3
/// "Decoded-message queue").
pub type DecodedQueue = Channel<CriticalSectionRawMutex, Message, CHANNEL_CAPACITY>;

/// Typed events awaiting delivery to the host callback (spec §3 "Event
/// queue").
pub type EventQueue = Channel<CriticalSectionRawMutex, crate::events::HostEvent, CHANNEL_CAPACITY>;

/// A one-shot wake used to unblock a daemon's indefinite wait on
/// `close()` (spec §5 "Cancellation ... any blocked dequeues unblock
/// with an error").
pub type ShutdownSignal = Channel<CriticalSectionRawMutex, (), 1>;

/// The three bounded queues plus the shutdown signal, shared between the
/// host-facing [`crate::core::SecureLink`] and both daemon threads.
pub struct Queues {
    pub rx_bytes: RxByteQueue,
    pub decoded: DecodedQueue,
    pub events: EventQueue,
    pub receive_shutdown: ShutdownSignal,
    pub event_shutdown: ShutdownSignal,
}

impl Queues {
    pub fn new() -> Self {
        Self {
            rx_bytes: Channel::new(),
            decoded: Channel::new(),
            events: Channel::new(),
            receive_shutdown: Channel::new(),
            event_shutdown: Channel::new(),
        }
    }

    /// Wake both daemons out of any blocked wait; idempotent.
    pub fn signal_shutdown(&self) {
        let _ = self.receive_shutdown.try_send(());
        let _ = self.event_shutdown.try_send(());
    }
}

impl Default for Queues {
    fn default() -> Self {
        Self::new()
    }
}

/// Enqueue `item` onto `channel`, retrying on `Full` until it succeeds or
/// `timeout` elapses (spec §4.6 "producers block up to `QUEUE_TIMEOUT`
/// then fail"). Returns the item back on timeout so the caller can decide
/// how to report `QUEUE_FULL`.
pub fn send_with_timeout<T, const N: usize>(
    channel: &Channel<CriticalSectionRawMutex, T, N>,
    mut item: T,
    timeout: Duration,
) -> Result<(), T> {
    let deadline = Instant::now() + timeout;
    loop {
        match channel.try_send(item) {
            Ok(()) => return Ok(()),
            Err(TrySendError::Full(returned)) => {
                item = returned;
                if Instant::now() >= deadline {
                    return Err(item);
                }
                std::thread::sleep(Duration::from_millis(5));
            }
        }
    }
}

/// Spawn a background thread that ticks `tick_queue` every `WATCHDOG_TICK`
/// until `stop` fires once, mirroring the source's watchdog-tickle
/// interval without needing a timer-capable async executor.
fn spawn_ticker(tick_queue: Arc<Channel<CriticalSectionRawMutex, (), 1>>) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name("securelink-rxd-ticker".into())
        .spawn(move || loop {
            std::thread::sleep(WATCHDOG_TICK);
            let _ = tick_queue.try_send(());
        })
        .expect("securelink-rxd-ticker: thread creation failed")
}

/// What the receive daemon's single wait resolved to.
pub(crate) enum RxWake {
    Bytes(Vec<u8>),
    Tick,
    Shutdown,
}

/// Block until bytes arrive, the watchdog tick fires, or shutdown is
/// signaled — whichever comes first (spec §4.6 "Wakes on either a byte
/// arriving or a periodic watchdog-tickle interval").
pub(crate) fn wait_for_rx_wake(queues: &Queues, ticker: &Channel<CriticalSectionRawMutex, (), 1>) -> RxWake {
    let bytes_fut = async { RxWake::Bytes(queues.rx_bytes.receive().await) };
    let tick_fut = async {
        ticker.receive().await;
        RxWake::Tick
    };
    let shutdown_fut = async {
        queues.receive_shutdown.receive().await;
        RxWake::Shutdown
    };
    block_on(race(bytes_fut, race(tick_fut, shutdown_fut)))
}

/// Spawn the receive daemon (spec §4.6): "single task... Runs at the
/// second-highest system priority. Stack ≥ 6 KiB." `handle_frame_bytes`
/// is called with each chunk of raw bytes dequeued; it owns the frame
/// assembler and the verify/dispatch pipeline so this module stays
/// transport- and protocol-agnostic.
pub fn spawn_receive_daemon(
    queues: Arc<Queues>,
    mut handle_bytes: impl FnMut(Vec<u8>) + Send + 'static,
    mut on_tick: impl FnMut() + Send + 'static,
) -> JoinHandle<()> {
    const STACK_BYTES: usize = 8 * 1024;
    std::thread::Builder::new()
        .name("securelink-rxd".into())
        .stack_size(STACK_BYTES)
        .spawn(move || {
            let ticker_queue: Arc<Channel<CriticalSectionRawMutex, (), 1>> = Arc::new(Channel::new());
            let _ticker = spawn_ticker(ticker_queue.clone());
            debug!("receive daemon started");
            loop {
                match wait_for_rx_wake(&queues, &ticker_queue) {
                    RxWake::Bytes(bytes) => handle_bytes(bytes),
                    RxWake::Tick => {
                        trace!("receive daemon watchdog tick");
                        on_tick();
                    }
                    RxWake::Shutdown => break,
                }
            }
            debug!("receive daemon stopped");
        })
        .expect("securelink-rxd: thread creation failed")
}

/// Spawn the event daemon (spec §4.6): "single task... one priority
/// below the receive daemon. Serializes callbacks". `deliver` is the
/// host-provided callback, invoked once per dequeued event in arrival
/// order.
pub fn spawn_event_daemon(
    queues: Arc<Queues>,
    mut deliver: impl FnMut(crate::events::HostEvent) + Send + 'static,
) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name("securelink-evtd".into())
        .spawn(move || {
            debug!("event daemon started");
            loop {
                let event_fut = async { Next::Event(queues.events.receive().await) };
                let shutdown_fut = async {
                    queues.event_shutdown.receive().await;
                    Next::Shutdown
                };
                match block_on(race(event_fut, shutdown_fut)) {
                    Next::Event(event) => deliver(event),
                    Next::Shutdown => break,
                }
            }
            debug!("event daemon stopped");
        })
        .expect("securelink-evtd: thread creation failed")
}

enum Next {
    Event(crate::events::HostEvent),
    Shutdown,
}

/// Post `event` to the event queue, retrying per spec §4.6 ("retry up to
/// `MAX_EVT_RETRY` times with small backoffs, then drop and emit
/// `HANDLING_ERR`"). Returns `false` if all retries were exhausted —
/// the caller posts `HandlingErr` itself to avoid infinite recursion.
pub fn post_event_with_retry(
    queues: &Queues,
    mut event: crate::events::HostEvent,
    max_retries: u8,
) -> bool {
    for attempt in 0..=max_retries {
        match queues.events.try_send(event) {
            Ok(()) => return true,
            Err(TrySendError::Full(returned)) => {
                event = returned;
                if attempt < max_retries {
                    std::thread::sleep(Duration::from_millis(10 * (attempt as u64 + 1)));
                }
            }
        }
    }
    warn!("event daemon: event queue full after retries, dropping event");
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::HostEvent;

    #[test]
    fn send_with_timeout_succeeds_when_space_available() {
        let channel: Channel<CriticalSectionRawMutex, u8, 2> = Channel::new();
        assert!(send_with_timeout(&channel, 1, Duration::from_millis(50)).is_ok());
    }

    #[test]
    fn send_with_timeout_fails_when_full_past_deadline() {
        let channel: Channel<CriticalSectionRawMutex, u8, 1> = Channel::new();
        channel.try_send(1).unwrap();
        let result = send_with_timeout(&channel, 2, Duration::from_millis(20));
        assert_eq!(result, Err(2));
    }

    #[test]
    fn post_event_with_retry_succeeds_immediately_when_space_free() {
        let queues = Queues::new();
        assert!(post_event_with_retry(&queues, HostEvent::LinkSuccess, 3));
    }

    #[test]
    fn post_event_with_retry_drops_after_exhausting_retries() {
        let queues = Queues::new();
        for _ in 0..CHANNEL_CAPACITY {
            queues.events.try_send(HostEvent::LinkSuccess).unwrap();
        }
        assert!(!post_event_with_retry(&queues, HostEvent::LinkSuccess, 1));
    }

    #[test]
    fn shutdown_signal_wakes_receive_wait() {
        let queues = Arc::new(Queues::new());
        queues.signal_shutdown();
        let ticker: Channel<CriticalSectionRawMutex, (), 1> = Channel::new();
        match wait_for_rx_wake(&queues, &ticker) {
            RxWake::Shutdown => {}
            _ => panic!("expected Shutdown"),
        }
    }
}
