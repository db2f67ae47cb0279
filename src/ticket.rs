//! Ticket store (spec §4.2): per-peer authenticated session state, with
//! CRUD delegated to a host-supplied [`TicketStore`] implementation.

use core::fmt;

/// Per-remote-device persistent cryptographic session state (spec §3
/// "Ticket").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
    pub own_device_id: u64,
    pub remote_device_id: u64,
    pub cipher_key: [u8; 32],
    pub own_status: [u8; 32],
    pub remote_status_hash: [u8; 32],
    pub max_seq_no: u32,
    pub tx_seq_no: u32,
    pub rx_seq_no: u32,
    /// Whether `rx_seq_no` has accepted at least one message yet. The first
    /// inbound authenticated message after pairing is accepted
    /// unconditionally (seeding `rx_seq_no`); every message after that
    /// enforces the strict-monotone rule of spec §4.4 step 4. See
    /// SPEC_FULL §9.x for why this flag exists instead of a sentinel value.
    pub rx_initialized: bool,
}

impl Ticket {
    /// A freshly paired ticket: `tx_seq_no`/`rx_seq_no` both start at `0`
    /// (spec §4.5.2 invariants).
    pub fn new_paired(
        own_device_id: u64,
        remote_device_id: u64,
        cipher_key: [u8; 32],
        own_status: [u8; 32],
        remote_status_hash: [u8; 32],
        max_seq_no: u32,
    ) -> Self {
        Self {
            own_device_id,
            remote_device_id,
            cipher_key,
            own_status,
            remote_status_hash,
            max_seq_no,
            tx_seq_no: 0,
            rx_seq_no: 0,
            rx_initialized: false,
        }
    }

    /// `0 < tx_seq_no ≤ max_seq_no + 1` is the spec's bound before a send;
    /// this returns whether a send is currently permitted (spec §3 ticket
    /// invariant 1, §4.5.4 Rekey, §8 boundary behavior).
    pub fn can_send(&self) -> bool {
        self.tx_seq_no <= self.max_seq_no
    }

    /// Whether `candidate` is acceptable as the next inbound `seq_no`
    /// (spec §4.4 step 4: strict monotone, first message seeds the
    /// counter).
    pub fn accepts_seq_no(&self, candidate: u32) -> bool {
        if !self.rx_initialized {
            return true;
        }
        candidate > self.rx_seq_no
    }

    /// Rotate status material after a successful status-check (spec
    /// §4.5.3 step 4). Deliberately the only way `own_status` changes
    /// outside of pairing (SPEC_FULL §9.x).
    pub fn rotate_status(&mut self, new_own_status: [u8; 32], new_remote_status_hash: [u8; 32]) {
        self.own_status = new_own_status;
        self.remote_status_hash = new_remote_status_hash;
    }

    /// Basic shape invariants a store implementation should assert before
    /// persisting (spec §3 ticket invariant 4; §4.2 "enforced at the
    /// moment the core hands a ticket to UPDATE or CREATE").
    pub fn is_well_formed(&self) -> bool {
        self.remote_device_id != self.own_device_id
    }
}

/// The four ticket-store operations the core invokes (spec §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketEvent {
    Create,
    Read,
    Update,
    Delete,
}

/// Storage-layer failure from a [`TicketStore`] callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    NotFound,
    Full,
    IoError,
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => f.write_str("ticket not found"),
            Self::Full => f.write_str("ticket storage full"),
            Self::IoError => f.write_str("ticket storage I/O error"),
        }
    }
}

/// Host-implemented persistence for tickets (spec §4.2, §9 design note
/// "callback-driven ticket persistence → trait/interface").
///
/// The core treats this as authoritative storage and never caches a
/// ticket across transactions — it re-reads on each authenticated
/// operation (spec §4.2). Implementations MUST NOT call back into the
/// core's host-facing API from these methods: the core invokes them with
/// its master mutex held (spec §5).
pub trait TicketStore: Send {
    /// Persist a newly paired ticket. `Err` aborts the pairing transaction.
    fn create(&mut self, ticket: &Ticket) -> Result<(), StorageError>;

    /// Look up a ticket by the remote peer's `device_id`.
    /// `Err(StorageError::NotFound)` means "no ticket for this peer" —
    /// distinct from a real I/O failure.
    fn read(&self, remote_device_id: u64) -> Result<Ticket, StorageError>;

    /// Persist a modified ticket (sequence numbers advanced, status
    /// rotated). The core rolls back any observable effect of the
    /// operation that produced this ticket if this returns `Err`.
    fn update(&mut self, ticket: &Ticket) -> Result<(), StorageError>;

    /// Remove the ticket for `remote_device_id`. Succeeds even if absent.
    fn delete(&mut self, remote_device_id: u64) -> Result<(), StorageError>;
}

/// An in-memory [`TicketStore`] — the reference implementation used by
/// tests and by hosts with no persistent storage requirement.
#[derive(Debug, Default)]
pub struct InMemoryTicketStore {
    tickets: std::collections::HashMap<u64, Ticket>,
}

impl InMemoryTicketStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TicketStore for InMemoryTicketStore {
    fn create(&mut self, ticket: &Ticket) -> Result<(), StorageError> {
        if !ticket.is_well_formed() {
            return Err(StorageError::IoError);
        }
        self.tickets.insert(ticket.remote_device_id, ticket.clone());
        Ok(())
    }

    fn read(&self, remote_device_id: u64) -> Result<Ticket, StorageError> {
        self.tickets
            .get(&remote_device_id)
            .cloned()
            .ok_or(StorageError::NotFound)
    }

    fn update(&mut self, ticket: &Ticket) -> Result<(), StorageError> {
        if !self.tickets.contains_key(&ticket.remote_device_id) {
            return Err(StorageError::NotFound);
        }
        self.tickets.insert(ticket.remote_device_id, ticket.clone());
        Ok(())
    }

    fn delete(&mut self, remote_device_id: u64) -> Result<(), StorageError> {
        self.tickets.remove(&remote_device_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_ticket() -> Ticket {
        Ticket::new_paired(1, 0xF0, [0x42; 32], [1; 32], [2; 32], 0xFFFF_FFFF)
    }

    #[test]
    fn first_inbound_seq_no_is_accepted_unconditionally() {
        let t = sample_ticket();
        assert!(t.accepts_seq_no(0));
    }

    #[test]
    fn strict_monotone_after_first_accept() {
        let mut t = sample_ticket();
        t.rx_initialized = true;
        t.rx_seq_no = 5;
        assert!(!t.accepts_seq_no(5));
        assert!(!t.accepts_seq_no(4));
        assert!(t.accepts_seq_no(6));
    }

    #[test]
    fn can_send_until_max_seq_no() {
        let mut t = sample_ticket();
        t.max_seq_no = 2;
        t.tx_seq_no = 2;
        assert!(t.can_send());
        t.tx_seq_no = 3;
        assert!(!t.can_send());
    }

    #[test]
    fn in_memory_store_round_trips() {
        let mut store = InMemoryTicketStore::new();
        let t = sample_ticket();
        store.create(&t).unwrap();
        let read_back = store.read(t.remote_device_id).unwrap();
        assert_eq!(read_back, t);
        store.delete(t.remote_device_id).unwrap();
        assert_eq!(store.read(t.remote_device_id), Err(StorageError::NotFound));
    }

    #[test]
    fn update_rejects_unknown_ticket() {
        let mut store = InMemoryTicketStore::new();
        let t = sample_ticket();
        assert_eq!(store.update(&t), Err(StorageError::NotFound));
    }
}
