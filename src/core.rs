//! Host-facing API (spec §6.2): [`SecureLink`] ties the frame codec,
//! ticket store, transaction state machines and the two daemons together
//! behind one `Mutex<CoreState>`.
//!
//! The source design uses a recursive mutex so a transaction callback can
//! re-enter the core while the lock is held. `std::sync::Mutex` isn't
//! reentrant, so every method here drops the lock before doing anything
//! that could call back in (sending wire bytes, invoking the ticket
//! store, posting an event) — see DESIGN.md for the non-recursive-mutex
//! rationale.

use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use log::warn;

use crate::adapters::{AttributeWriteSink, BleAdapter, ConnectionSink, PairingDelegate};
use crate::codec::{chunk_for_mtu, encode_frame, FrameAssembler};
use crate::config::EngineConfig;
use crate::connection::{ConnectionState, ConnectionStatus, TransactionStatus};
use crate::daemons::{self, Queues};
use crate::engine::{Dispatch, MessageEngine};
use crate::error::{Error, Result};
use crate::events::{EventSink, HostEvent};
use crate::message::{Message, MessageKind};
use crate::ticket::{Ticket, TicketStore};
use crate::transaction::{OpenTransaction, PairingState, PairingTransaction, StatusCheckTransaction};

/// The GATT attribute this crate writes every frame chunk to. A host
/// wiring up a real adapter maps this to whichever characteristic its
/// service description exposes for the messaging channel.
pub const MESSAGE_ATTRIBUTE: crate::adapters::AttributeHandle = 0x0001;

/// Mutable per-link state guarded by [`SecureLink`]'s single mutex (spec
/// §5 "master mutex"): connection/transaction status plus the three
/// transaction state machines, of which at most one is active at a time.
struct CoreState {
    connection: ConnectionState,
    open: OpenTransaction,
    pairing: PairingTransaction,
    status_check: StatusCheckTransaction,
    pairing_enabled: bool,
    status_check_enabled: bool,
    rx_filter: [bool; MessageKind::COUNT as usize],
    consecutive_auth_failures: u8,
}

impl Default for CoreState {
    fn default() -> Self {
        Self {
            connection: ConnectionState::default(),
            open: OpenTransaction::new(),
            pairing: PairingTransaction::new(),
            status_check: StatusCheckTransaction::new(),
            pairing_enabled: true,
            status_check_enabled: true,
            rx_filter: [true; MessageKind::COUNT as usize],
            consecutive_auth_failures: 0,
        }
    }
}

/// One secured BLE link: host-facing entry point for the whole crate
/// (spec §6.2). Construct via [`SecureLink::init_server`] or
/// [`SecureLink::init_client`], drive connections/messages through the
/// `tx_*`/`rx_msg` methods, and call [`SecureLink::close`] to tear down
/// the daemons before dropping.
pub struct SecureLink {
    own_device_id: u64,
    config: EngineConfig,
    engine: MessageEngine,
    adapter: Arc<Mutex<Box<dyn BleAdapter>>>,
    ticket_store: Arc<Mutex<Box<dyn TicketStore>>>,
    state: Arc<Mutex<CoreState>>,
    queues: Arc<Queues>,
    receive_daemon: Option<JoinHandle<()>>,
    event_daemon: Option<JoinHandle<()>>,
}

impl SecureLink {
    /// Wire up a [`SecureLink`] around an already-initialized adapter.
    /// Prefer [`Self::init_server`] / [`Self::init_client`], which also
    /// bring the adapter up first.
    pub fn new(
        own_device_id: u64,
        config: EngineConfig,
        mut adapter: Box<dyn BleAdapter>,
        ticket_store: Box<dyn TicketStore>,
        event_sink: Box<dyn EventSink>,
        link_pairing_delegate: Box<dyn PairingDelegate>,
    ) -> Result<Self> {
        config.validate()?;

        let state: Arc<Mutex<CoreState>> = Arc::new(Mutex::new(CoreState::default()));
        let queues = Arc::new(Queues::new());

        adapter.set_attribute_write_handler(Box::new(RxSink {
            queues: queues.clone(),
            queue_timeout: Duration::from_millis(config.queue_timeout_ms),
        }));
        adapter.set_connection_handler(Box::new(ConnSink {
            state: state.clone(),
            queues: queues.clone(),
            config,
        }));
        adapter.set_pairing_delegate(link_pairing_delegate);

        let adapter = Arc::new(Mutex::new(adapter));
        let ticket_store = Arc::new(Mutex::new(ticket_store));
        let engine = MessageEngine::new(own_device_id, config);

        let mut link = Self {
            own_device_id,
            config,
            engine,
            adapter,
            ticket_store,
            state,
            queues,
            receive_daemon: None,
            event_daemon: None,
        };
        link.spawn_daemons(event_sink);
        Ok(link)
    }

    /// Bring the adapter up as a GATT peripheral, then wire a
    /// [`SecureLink`] around it.
    pub fn init_server(
        own_device_id: u64,
        app_id: u32,
        service_uuid: u128,
        config: EngineConfig,
        mut adapter: Box<dyn BleAdapter>,
        ticket_store: Box<dyn TicketStore>,
        event_sink: Box<dyn EventSink>,
        link_pairing_delegate: Box<dyn PairingDelegate>,
    ) -> Result<Self> {
        adapter.init_server(app_id, service_uuid, config.mtu)?;
        Self::new(own_device_id, config, adapter, ticket_store, event_sink, link_pairing_delegate)
    }

    /// Bring the adapter up as a GATT central, then wire a [`SecureLink`]
    /// around it.
    pub fn init_client(
        own_device_id: u64,
        app_id: u32,
        config: EngineConfig,
        mut adapter: Box<dyn BleAdapter>,
        ticket_store: Box<dyn TicketStore>,
        event_sink: Box<dyn EventSink>,
        link_pairing_delegate: Box<dyn PairingDelegate>,
    ) -> Result<Self> {
        adapter.init_client(app_id, config.mtu)?;
        Self::new(own_device_id, config, adapter, ticket_store, event_sink, link_pairing_delegate)
    }

    fn spawn_daemons(&mut self, event_sink: Box<dyn EventSink>) {
        let event_sink = Arc::new(Mutex::new(event_sink));
        {
            let sink = event_sink.clone();
            self.event_daemon = Some(daemons::spawn_event_daemon(self.queues.clone(), move |event| {
                sink.lock().expect("event sink mutex poisoned").on_event(event);
            }));
        }

        let mut assembler = FrameAssembler::new(self.config.max_length);
        let engine_bytes = self.engine;
        let state_bytes = self.state.clone();
        let store_bytes = self.ticket_store.clone();
        let adapter_bytes = self.adapter.clone();
        let queues_bytes = self.queues.clone();
        let config_bytes = self.config;

        let state_tick = self.state.clone();
        let queues_tick = self.queues.clone();
        let config_tick = self.config;

        self.receive_daemon = Some(daemons::spawn_receive_daemon(
            self.queues.clone(),
            move |bytes| {
                handle_rx_bytes(
                    &mut assembler,
                    &bytes,
                    &engine_bytes,
                    &state_bytes,
                    &store_bytes,
                    &adapter_bytes,
                    &queues_bytes,
                    &config_bytes,
                );
            },
            move || {
                poll_timeouts(&state_tick, &queues_tick, &config_tick);
            },
        ));
    }

    fn wire(&self) -> Wire<'_> {
        Wire {
            engine: &self.engine,
            adapter: &self.adapter,
            ticket_store: &self.ticket_store,
        }
    }

    fn post_event(&self, event: HostEvent) {
        post_event(&self.queues, &self.config, event);
    }

    /// Filter a decoded kind into the decoded-message queue (spec §6.2
    /// "enable_rx"). Only meaningful for `DATA`/`CIPHERTEXT`, the only
    /// kinds the engine ever routes to [`Dispatch::Deliver`].
    pub fn enable_rx(&self, kind: MessageKind) {
        self.state.lock().expect("core state mutex poisoned").rx_filter[kind.tag() as usize] = true;
    }

    pub fn disable_rx(&self, kind: MessageKind) {
        self.state.lock().expect("core state mutex poisoned").rx_filter[kind.tag() as usize] = false;
    }

    /// Enable or disable acceptance of inbound `PAIRING_REQ` (spec §6.2
    /// "configure_pairing").
    pub fn configure_pairing(&self, enabled: bool) {
        self.state.lock().expect("core state mutex poisoned").pairing_enabled = enabled;
    }

    /// Enable or disable acceptance of inbound `STATUS_REQ` (spec §6.2
    /// "configure_status_check").
    pub fn configure_status_check(&self, enabled: bool) {
        self.state.lock().expect("core state mutex poisoned").status_check_enabled = enabled;
    }

    pub fn is_paired(&self, device_id: u64) -> bool {
        self.ticket_store
            .lock()
            .expect("ticket store mutex poisoned")
            .read(device_id)
            .is_ok()
    }

    pub fn connection_sts(&self) -> ConnectionStatus {
        self.state.lock().expect("core state mutex poisoned").connection.connection_sts
    }

    pub fn transaction_sts(&self) -> TransactionStatus {
        self.state.lock().expect("core state mutex poisoned").connection.transaction_sts
    }

    /// Begin the Open transaction (spec §4.5.1): ask the adapter to
    /// connect, tracked with a 90 s timeout enforced by the receive
    /// daemon's watchdog tick.
    pub fn open_server(&self, peer_address: [u8; 6]) -> Result<()> {
        {
            let mut st = self.state.lock().expect("core state mutex poisoned");
            if st.connection.transaction_sts != TransactionStatus::None {
                return Err(Error::InvalidState);
            }
            st.connection.connection_sts = ConnectionStatus::Connecting;
            st.connection.begin_transaction(TransactionStatus::Open);
            st.open.start();
        }
        self.adapter.lock().expect("adapter mutex poisoned").connect(peer_address)
    }

    /// Tear down the link: disconnect the adapter, cancel any running
    /// transaction, signal both daemons to stop and join them. The
    /// `SecureLink` cannot be reused afterwards — build a new one to
    /// reconnect.
    pub fn close(&mut self) -> Result<()> {
        {
            let mut adapter = self.adapter.lock().expect("adapter mutex poisoned");
            adapter.disconnect()?;
        }
        {
            let mut st = self.state.lock().expect("core state mutex poisoned");
            st.connection.on_disconnect();
            st.pairing = PairingTransaction::new();
            st.status_check = StatusCheckTransaction::new();
            st.open = OpenTransaction::new();
        }
        self.queues.signal_shutdown();
        if let Some(handle) = self.receive_daemon.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.event_daemon.take() {
            let _ = handle.join();
        }
        Ok(())
    }

    /// Dequeue the next decoded `DATA`/`CIPHERTEXT` message, waiting up to
    /// `timeout` (spec §6.2 "rx_msg").
    pub fn rx_msg(&self, timeout: Duration) -> Result<Message> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.queues.decoded.try_receive() {
                Ok(msg) => return Ok(msg),
                Err(_) => {
                    if Instant::now() >= deadline {
                        return Err(Error::Timeout);
                    }
                    std::thread::sleep(Duration::from_millis(5));
                }
            }
        }
    }

    /// Send `RESET` and locally clear any running transaction (spec
    /// §4.5: the peer is expected to do the same on receipt).
    pub fn tx_reset(&self) -> Result<()> {
        self.wire().send(MessageKind::Reset, b"", None)?;
        let mut st = self.state.lock().expect("core state mutex poisoned");
        st.connection.end_transaction();
        st.pairing = PairingTransaction::new();
        st.status_check = StatusCheckTransaction::new();
        Ok(())
    }

    /// Send `PING`; the peer auto-replies with `RESPONSE`.
    pub fn tx_ping(&self) -> Result<()> {
        self.wire().send(MessageKind::Ping, b"", None)
    }

    /// Client role: begin application-level pairing (spec §4.5.2).
    /// `proposed_max_seq_no` becomes the resulting ticket's
    /// `max_seq_no` — fixed for the life of the ticket.
    pub fn tx_pairing_request(&self, proposed_max_seq_no: u32) -> Result<()> {
        let payload = {
            let mut st = self.state.lock().expect("core state mutex poisoned");
            if !st.pairing_enabled {
                return Err(Error::InvalidState);
            }
            if st.connection.transaction_sts != TransactionStatus::None {
                return Err(Error::InvalidState);
            }
            let payload = st.pairing.start_as_client(self.own_device_id, proposed_max_seq_no);
            st.connection.begin_transaction(TransactionStatus::Pairing);
            payload
        };
        self.post_event(HostEvent::PairingStart);
        self.wire().send(MessageKind::PairingReq, &payload, None)
    }

    /// Host confirmed (`true`) or rejected (`false`) the digest delivered
    /// via [`HostEvent::PairingDigestReady`] (spec §6.2 "tx_pairing_verdict").
    ///
    /// `max_seq_no` is accepted for parity with the source signature but
    /// unused: the ticket's `max_seq_no` is fixed by the client's
    /// original `PAIRING_REQ` proposal (spec §4.5.2 invariants), not
    /// overridable at verdict time (see DESIGN.md Open Questions).
    pub fn tx_pairing_verdict(&self, ok: bool, _max_seq_no: u32) -> Result<()> {
        let kind = {
            let mut st = self.state.lock().expect("core state mutex poisoned");
            if st.pairing.state() == PairingState::Idle {
                return Err(Error::InvalidState);
            }
            st.pairing.submit_local_verdict(ok)
        };
        self.wire().send(kind, b"", None)?;
        finalize_pairing(&self.state, &self.ticket_store, &self.queues, &self.config);
        Ok(())
    }

    /// Begin a status-check against an already-paired peer (spec
    /// §4.5.3). `remote_device_id` selects which ticket to use — the
    /// source's single-peer state is generalized here since the ticket
    /// store is keyed per peer (see DESIGN.md).
    pub fn tx_status_check(&self, remote_device_id: u64) -> Result<()> {
        let candidate = {
            let mut st = self.state.lock().expect("core state mutex poisoned");
            if !st.status_check_enabled {
                return Err(Error::InvalidState);
            }
            if st.connection.transaction_sts != TransactionStatus::None {
                return Err(Error::InvalidState);
            }
            st.connection.begin_transaction(TransactionStatus::StsChk);
            st.status_check.start_as_initiator()
        };
        self.post_event(HostEvent::StatusCheck);
        self.wire().send(MessageKind::StatusReq, &candidate, Some(remote_device_id))
    }

    /// Send a plaintext, authenticated `DATA` message to `device_id`.
    pub fn tx_plaintext(&self, device_id: u64, bytes: &[u8]) -> Result<()> {
        self.wire().send(MessageKind::Data, bytes, Some(device_id))
    }

    /// Send an AES-256-CBC-encrypted, authenticated `CIPHERTEXT` message
    /// to `device_id`.
    pub fn tx_ciphertext(&self, device_id: u64, bytes: &[u8]) -> Result<()> {
        self.wire().send(MessageKind::Ciphertext, bytes, Some(device_id))
    }

    /// No-op placeholder for host API parity (spec §6.2 "delete_message"):
    /// messages here are owned `Vec`-backed values with no pool to
    /// release back to.
    pub fn delete_message(&self, _msg: Message) {}

    pub fn delete_ticket(&self, device_id: u64) -> Result<()> {
        self.ticket_store
            .lock()
            .expect("ticket store mutex poisoned")
            .delete(device_id)
            .map_err(Into::into)
    }

    /// Regenerate this side's `own_status` nonce for `device_id` outside
    /// of a status-check round (spec §6.2 "clear_status"). This
    /// deliberately desynchronizes `remote_status_hash` on the peer's
    /// ticket until the next successful status-check or re-pairing —
    /// see DESIGN.md for why that's the intended effect.
    pub fn clear_status(&self, device_id: u64) -> Result<()> {
        let mut guard = self.ticket_store.lock().expect("ticket store mutex poisoned");
        let mut ticket = guard.read(device_id).map_err(|_| Error::UnknownPeer)?;
        ticket.own_status = crate::crypto::random_array::<32>();
        guard.update(&ticket).map_err(Into::into)
    }
}

impl Drop for SecureLink {
    fn drop(&mut self) {
        self.queues.signal_shutdown();
    }
}

/// Everything needed to build and transmit one outbound message,
/// bundled so both the host-facing `tx_*` methods and the receive
/// daemon's auto-reply/transaction-reply paths share one code path.
struct Wire<'a> {
    engine: &'a MessageEngine,
    adapter: &'a Arc<Mutex<Box<dyn BleAdapter>>>,
    ticket_store: &'a Arc<Mutex<Box<dyn TicketStore>>>,
}

impl<'a> Wire<'a> {
    fn send(&self, kind: MessageKind, payload: &[u8], device_id: Option<u64>) -> Result<()> {
        let built = if kind.is_authenticated() {
            let device_id = device_id.ok_or(Error::InvalidState)?;
            let mut guard = self.ticket_store.lock().expect("ticket store mutex poisoned");
            let mut ticket = guard.read(device_id).map_err(|_| Error::UnknownPeer)?;
            let store_ref: &mut dyn TicketStore = &mut **guard;
            self.engine.build(kind, payload, Some(&mut ticket), Some(store_ref))?
        } else {
            self.engine.build(kind, payload, None, None)?
        };

        let frame = encode_frame(built.kind, built.seq_no, &built.auth_tag, built.device_id, &built.payload);
        let mut adapter = self.adapter.lock().expect("adapter mutex poisoned");
        let mtu = adapter.negotiated_mtu();
        for chunk in chunk_for_mtu(&frame, mtu) {
            adapter.write_attribute(MESSAGE_ATTRIBUTE, chunk)?;
        }
        Ok(())
    }
}

/// Bridges a GATT attribute write straight onto the receive-byte queue
/// (spec §6.1 `set_attribute_write_handler`): runs on the adapter's
/// callback context, so it must never block on anything but the queue's
/// own bounded wait.
struct RxSink {
    queues: Arc<Queues>,
    queue_timeout: Duration,
}

impl AttributeWriteSink for RxSink {
    fn on_attribute_write(&mut self, _peer_address: [u8; 6], bytes: &[u8]) {
        if daemons::send_with_timeout(&self.queues.rx_bytes, bytes.to_vec(), self.queue_timeout).is_err() {
            warn!("receive-byte queue full, dropping {} bytes from GATT write", bytes.len());
        }
    }
}

/// Bridges adapter connect/disconnect callbacks into [`CoreState`] and
/// the event queue (spec §4.5.1, §3 "Lifecycles").
struct ConnSink {
    state: Arc<Mutex<CoreState>>,
    queues: Arc<Queues>,
    config: EngineConfig,
}

impl ConnectionSink for ConnSink {
    fn on_connected(&mut self, peer_address: [u8; 6]) {
        {
            let mut st = self.state.lock().expect("core state mutex poisoned");
            st.connection.remote_address = peer_address;
            st.connection.connection_sts = ConnectionStatus::Connected;
            st.open.on_linked();
            st.connection.end_transaction();
        }
        post_event(&self.queues, &self.config, HostEvent::GattConnect { remote_address: peer_address });
        post_event(&self.queues, &self.config, HostEvent::OpenSuccess);
        post_event(&self.queues, &self.config, HostEvent::LinkSuccess);
    }

    fn on_disconnected(&mut self, peer_address: [u8; 6]) {
        {
            let mut st = self.state.lock().expect("core state mutex poisoned");
            st.connection.on_disconnect();
        }
        post_event(&self.queues, &self.config, HostEvent::GattDisconnect { remote_address: peer_address });
    }
}

/// Post `event`, retrying per spec §4.6, falling back to `HandlingErr`
/// once retries are exhausted (best-effort: a second full queue just
/// drops it).
fn post_event(queues: &Queues, config: &EngineConfig, event: HostEvent) {
    if !daemons::post_event_with_retry(queues, event, config.max_evt_retry) {
        let _ = queues.events.try_send(HostEvent::HandlingErr);
    }
}

/// The last 32 bytes of a `PAIRING_REQ`/`PAIRING_RSP` payload are always
/// the sender's `own_status` nonce (see `transaction::pairing`'s wire
/// layouts) — needed here because [`PairingTransaction`] only retains
/// the peer's status as a hash, not the raw bytes, once it has used them.
fn extract_trailing_status(payload: &[u8]) -> Option<[u8; 32]> {
    if payload.len() < 32 {
        return None;
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&payload[payload.len() - 32..]);
    Some(out)
}

fn now_ms() -> u64 {
    use std::sync::OnceLock;
    static START: OnceLock<Instant> = OnceLock::new();
    START.get_or_init(Instant::now).elapsed().as_millis() as u64
}

/// The receive daemon's per-chunk callback: feeds the frame assembler,
/// then verifies and dispatches whatever frame completes.
fn handle_rx_bytes(
    assembler: &mut FrameAssembler,
    bytes: &[u8],
    engine: &MessageEngine,
    state: &Arc<Mutex<CoreState>>,
    store: &Arc<Mutex<Box<dyn TicketStore>>>,
    adapter: &Arc<Mutex<Box<dyn BleAdapter>>>,
    queues: &Queues,
    config: &EngineConfig,
) {
    match assembler.feed(bytes) {
        Ok(Some(frame)) => {
            let peer_address = state.lock().expect("core state mutex poisoned").connection.remote_address;
            let rx_time_ms = now_ms();
            let verify_result = {
                let mut guard = store.lock().expect("ticket store mutex poisoned");
                let store_ref: &mut dyn TicketStore = &mut **guard;
                engine.verify(frame, peer_address, rx_time_ms, store_ref)
            };
            match verify_result {
                Ok(dispatch) => {
                    state.lock().expect("core state mutex poisoned").consecutive_auth_failures = 0;
                    let wire = Wire { engine, adapter, ticket_store: store };
                    dispatch_message(dispatch, engine, state, store, &wire, queues, config);
                }
                Err(Error::AuthFail) | Err(Error::Replay) | Err(Error::DecryptFail) => {
                    let exceeded = {
                        let mut st = state.lock().expect("core state mutex poisoned");
                        st.consecutive_auth_failures = st.consecutive_auth_failures.saturating_add(1);
                        let exceeded = st.consecutive_auth_failures >= config.auth_fail_threshold;
                        if exceeded {
                            st.consecutive_auth_failures = 0;
                        }
                        exceeded
                    };
                    if exceeded {
                        post_event(queues, config, HostEvent::HandlingErr);
                    }
                }
                Err(Error::UnknownPeer) => {
                    warn!("message from unknown peer, dropping");
                }
                Err(e) => {
                    warn!("verify failed: {e}");
                }
            }
        }
        Ok(None) => {}
        Err(codec_err) => {
            warn!("frame codec error: {codec_err}");
        }
    }
}

fn dispatch_message(
    dispatch: Dispatch,
    engine: &MessageEngine,
    state: &Arc<Mutex<CoreState>>,
    store: &Arc<Mutex<Box<dyn TicketStore>>>,
    wire: &Wire,
    queues: &Queues,
    config: &EngineConfig,
) {
    match dispatch {
        Dispatch::Deliver(msg) => {
            let allowed = state.lock().expect("core state mutex poisoned").rx_filter[msg.kind.tag() as usize];
            let event = match msg.kind {
                MessageKind::Data => HostEvent::RxData(msg.clone()),
                MessageKind::Ciphertext => HostEvent::RxCiphertext(msg.clone()),
                other => unreachable!("Dispatch::Deliver only produced for Data/Ciphertext, got {other:?}"),
            };
            post_event(queues, config, event);
            if allowed
                && daemons::send_with_timeout(&queues.decoded, msg, Duration::from_millis(config.queue_timeout_ms))
                    .is_err()
            {
                post_event(queues, config, HostEvent::QueueFull);
            }
        }
        Dispatch::AutoReply(msg) => {
            post_event(queues, config, HostEvent::RxPing(msg));
            if let Err(e) = wire.send(MessageKind::Response, b"", None) {
                warn!("failed to auto-reply to PING: {e}");
            }
        }
        Dispatch::Reset(msg) => {
            {
                let mut st = state.lock().expect("core state mutex poisoned");
                st.connection.end_transaction();
                st.pairing = PairingTransaction::new();
                st.status_check = StatusCheckTransaction::new();
            }
            post_event(queues, config, HostEvent::RxReset(msg));
        }
        Dispatch::Response(msg) => {
            post_event(queues, config, HostEvent::RxResponse(msg));
        }
        Dispatch::Transaction(msg) => {
            dispatch_transaction_message(msg, engine, state, store, wire, queues, config);
        }
    }
}

fn dispatch_transaction_message(
    msg: Message,
    engine: &MessageEngine,
    state: &Arc<Mutex<CoreState>>,
    store: &Arc<Mutex<Box<dyn TicketStore>>>,
    wire: &Wire,
    queues: &Queues,
    config: &EngineConfig,
) {
    match msg.kind {
        MessageKind::PairingReq => handle_pairing_req(&msg, engine.own_device_id, state, wire, queues, config),
        MessageKind::PairingRsp => handle_pairing_rsp(&msg, state, queues, config),
        MessageKind::DigestMatch => handle_pairing_verdict(true, state, store, queues, config),
        MessageKind::DigestErr => handle_pairing_verdict(false, state, store, queues, config),
        MessageKind::StatusReq => handle_status_req(&msg, store, wire, state, queues, config),
        MessageKind::StatusRsp1 => handle_status_rsp1(&msg, store, wire, state, queues, config),
        MessageKind::StatusRsp2 => handle_status_rsp2(&msg, store, state, queues, config),
        other => unreachable!("Dispatch::Transaction only produced for pairing/status kinds, got {other:?}"),
    }
}

fn handle_pairing_req(
    msg: &Message,
    own_device_id: u64,
    state: &Arc<Mutex<CoreState>>,
    wire: &Wire,
    queues: &Queues,
    config: &EngineConfig,
) {
    let rsp_payload = {
        let mut st = state.lock().expect("core state mutex poisoned");
        if !st.pairing_enabled {
            return;
        }
        if st.connection.transaction_sts != TransactionStatus::None {
            warn!("PAIRING_REQ while another transaction is active; ignoring");
            return;
        }
        match st.pairing.handle_pairing_req(own_device_id, &msg.payload) {
            Ok(rsp) => {
                st.connection.begin_transaction(TransactionStatus::Pairing);
                rsp
            }
            Err(_) => {
                warn!("malformed PAIRING_REQ, ignoring");
                return;
            }
        }
    };
    post_event(queues, config, HostEvent::PairingStart);
    if wire.send(MessageKind::PairingRsp, &rsp_payload, None).is_err() {
        warn!("failed to send PAIRING_RSP");
        return;
    }

    let client_status = extract_trailing_status(&msg.payload);
    let mut st = state.lock().expect("core state mutex poisoned");
    let server_status = st.pairing.own_status();
    if let (Some(client_status), Some(server_status)) = (client_status, server_status) {
        if let Some(digest) = st.pairing.digest(&client_status, &server_status) {
            let remote_device_id = st.pairing.remote_device_id().unwrap_or(0);
            drop(st);
            post_event(queues, config, HostEvent::PairingDigestReady { remote_device_id, digest });
        }
    }
}

fn handle_pairing_rsp(msg: &Message, state: &Arc<Mutex<CoreState>>, queues: &Queues, config: &EngineConfig) {
    let digest = {
        let mut st = state.lock().expect("core state mutex poisoned");
        let client_status = st.pairing.own_status();
        match st.pairing.handle_pairing_rsp(&msg.payload) {
            Ok(()) => {
                let server_status = extract_trailing_status(&msg.payload);
                match (client_status, server_status) {
                    (Some(c), Some(s)) => st.pairing.digest(&c, &s),
                    _ => None,
                }
            }
            Err(_) => {
                warn!("malformed PAIRING_RSP, ignoring");
                None
            }
        }
    };
    if let Some(digest) = digest {
        let remote_device_id = state
            .lock()
            .expect("core state mutex poisoned")
            .pairing
            .remote_device_id()
            .unwrap_or(0);
        post_event(queues, config, HostEvent::PairingDigestReady { remote_device_id, digest });
    }
}

fn finalize_pairing(
    state: &Arc<Mutex<CoreState>>,
    store: &Arc<Mutex<Box<dyn TicketStore>>>,
    queues: &Queues,
    config: &EngineConfig,
) {
    let finished_state = state.lock().expect("core state mutex poisoned").pairing.state();
    match finished_state {
        PairingState::Complete => {
            let finished = {
                let mut st = state.lock().expect("core state mutex poisoned");
                let finished = std::mem::replace(&mut st.pairing, PairingTransaction::new());
                st.connection.end_transaction();
                finished
            };
            if let Some(ticket) = finished.into_ticket() {
                let remote_device_id = ticket.remote_device_id;
                let created = store.lock().expect("ticket store mutex poisoned").create(&ticket);
                match created {
                    Ok(()) => post_event(queues, config, HostEvent::PairingSuccess { remote_device_id }),
                    Err(_) => post_event(queues, config, HostEvent::HandlingErr),
                }
            }
        }
        PairingState::Failed => {
            {
                let mut st = state.lock().expect("core state mutex poisoned");
                st.pairing = PairingTransaction::new();
                st.connection.end_transaction();
            }
            post_event(queues, config, HostEvent::PairingErr);
        }
        _ => {}
    }
}

fn handle_pairing_verdict(
    peer_ok: bool,
    state: &Arc<Mutex<CoreState>>,
    store: &Arc<Mutex<Box<dyn TicketStore>>>,
    queues: &Queues,
    config: &EngineConfig,
) {
    state.lock().expect("core state mutex poisoned").pairing.handle_peer_verdict(peer_ok);
    finalize_pairing(state, store, queues, config);
}

fn handle_status_req(
    msg: &Message,
    store: &Arc<Mutex<Box<dyn TicketStore>>>,
    wire: &Wire,
    state: &Arc<Mutex<CoreState>>,
    queues: &Queues,
    config: &EngineConfig,
) {
    if msg.payload.len() != 32 {
        warn!("malformed STATUS_REQ payload");
        return;
    }
    let mut candidate = [0u8; 32];
    candidate.copy_from_slice(&msg.payload);

    let ticket = match store.lock().expect("ticket store mutex poisoned").read(msg.device_id) {
        Ok(t) => t,
        Err(_) => {
            warn!("STATUS_REQ from unknown peer {}", msg.device_id);
            return;
        }
    };

    let rsp1 = {
        let mut st = state.lock().expect("core state mutex poisoned");
        if !st.status_check_enabled {
            return;
        }
        if st.connection.transaction_sts != TransactionStatus::None {
            warn!("STATUS_REQ while another transaction is active; ignoring");
            return;
        }
        let proof = st.status_check.handle_status_req(candidate, &ticket);
        let responder_candidate = st
            .status_check
            .own_new_status()
            .expect("handle_status_req always sets own_new_status");
        st.connection.begin_transaction(TransactionStatus::StsChk);
        StatusCheckTransaction::encode_rsp1(responder_candidate, proof)
    };

    post_event(queues, config, HostEvent::StatusCheck);
    if let Err(e) = wire.send(MessageKind::StatusRsp1, &rsp1, Some(msg.device_id)) {
        warn!("failed to send STATUS_RSP1: {e}");
    }
}

fn handle_status_rsp1(
    msg: &Message,
    store: &Arc<Mutex<Box<dyn TicketStore>>>,
    wire: &Wire,
    state: &Arc<Mutex<CoreState>>,
    queues: &Queues,
    config: &EngineConfig,
) {
    let ticket = match store.lock().expect("ticket store mutex poisoned").read(msg.device_id) {
        Ok(t) => t,
        Err(_) => return,
    };

    let proof2 = {
        let mut st = state.lock().expect("core state mutex poisoned");
        match st.status_check.handle_status_rsp1(&msg.payload, &ticket) {
            Ok(p) => p,
            Err(_) => {
                st.status_check = StatusCheckTransaction::new();
                st.connection.end_transaction();
                drop(st);
                post_event(queues, config, HostEvent::StatusErr);
                return;
            }
        }
    };

    if let Err(e) = wire.send(MessageKind::StatusRsp2, &proof2, Some(msg.device_id)) {
        warn!("failed to send STATUS_RSP2: {e}");
    }

    finish_status_check(msg.device_id, ticket, state, store, queues, config);
}

fn handle_status_rsp2(
    msg: &Message,
    store: &Arc<Mutex<Box<dyn TicketStore>>>,
    state: &Arc<Mutex<CoreState>>,
    queues: &Queues,
    config: &EngineConfig,
) {
    if msg.payload.len() != 32 {
        warn!("malformed STATUS_RSP2 payload");
        return;
    }
    let mut proof = [0u8; 32];
    proof.copy_from_slice(&msg.payload);

    let ticket = match store.lock().expect("ticket store mutex poisoned").read(msg.device_id) {
        Ok(t) => t,
        Err(_) => return,
    };

    let result = {
        let mut st = state.lock().expect("core state mutex poisoned");
        st.status_check.handle_status_rsp2(proof, &ticket)
    };

    match result {
        Ok(()) => finish_status_check(msg.device_id, ticket, state, store, queues, config),
        Err(_) => {
            let mut st = state.lock().expect("core state mutex poisoned");
            st.status_check = StatusCheckTransaction::new();
            st.connection.end_transaction();
            drop(st);
            post_event(queues, config, HostEvent::StatusErr);
        }
    }
}

/// Shared tail of both status-check roles once their local half of the
/// handshake has succeeded: pull the agreed rotation out of the
/// transaction, reset transaction state, and persist it to the ticket
/// (spec §4.5.3 step 4).
fn finish_status_check(
    remote_device_id: u64,
    mut ticket: Ticket,
    state: &Arc<Mutex<CoreState>>,
    store: &Arc<Mutex<Box<dyn TicketStore>>>,
    queues: &Queues,
    config: &EngineConfig,
) {
    let rotation = {
        let mut st = state.lock().expect("core state mutex poisoned");
        let rotation = st.status_check.rotation();
        st.status_check = StatusCheckTransaction::new();
        st.connection.end_transaction();
        rotation
    };

    let Some((own_status, remote_status_hash)) = rotation else {
        post_event(queues, config, HostEvent::HandlingErr);
        return;
    };
    ticket.rotate_status(own_status, remote_status_hash);
    match store.lock().expect("ticket store mutex poisoned").update(&ticket) {
        Ok(()) => post_event(queues, config, HostEvent::StatusOk { remote_device_id }),
        Err(_) => post_event(queues, config, HostEvent::HandlingErr),
    }
}

/// Invoked on every ~500 ms receive-daemon watchdog tick: check the one
/// transaction that may currently be running against its configured
/// timeout (spec §4.5.1/.2/.3 "timeout").
fn poll_timeouts(state: &Arc<Mutex<CoreState>>, queues: &Queues, config: &EngineConfig) {
    let fired = {
        let mut st = state.lock().expect("core state mutex poisoned");
        match st.connection.transaction_sts {
            TransactionStatus::Open if st.connection.transaction_timed_out(config.open_timeout_ms) => {
                st.open.on_timeout();
                st.connection.end_transaction();
                Some(HostEvent::OpenTimeout)
            }
            TransactionStatus::Pairing if st.connection.transaction_timed_out(config.pairing_timeout_ms) => {
                st.pairing.on_timeout();
                st.pairing = PairingTransaction::new();
                st.connection.end_transaction();
                Some(HostEvent::PairingTimeout)
            }
            TransactionStatus::StsChk if st.connection.transaction_timed_out(config.status_check_timeout_ms) => {
                st.status_check.on_timeout();
                st.status_check = StatusCheckTransaction::new();
                st.connection.end_transaction();
                Some(HostEvent::StatusTimeout)
            }
            _ => None,
        }
    };
    if let Some(event) = fired {
        post_event(queues, config, event);
    }
}
