//! Correlation of outstanding requests to responses.
//!
//! The table is the only place correlation ids are minted and matched.
//! Each in-flight request parks on a oneshot channel; a response frame
//! with a matching id completes the slot, an unknown id is dropped, and
//! closing the table wakes every waiter with `EndpointClosed`.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::oneshot;

use crate::error::{Error, Result};
use crate::protocol::Frame;

struct TableInner {
    slots: HashMap<u32, oneshot::Sender<Frame>>,
    next_id: u32,
    closed: bool,
}

/// Pending-request table for one endpoint.
pub struct RequestTable {
    inner: Mutex<TableInner>,
}

impl RequestTable {
    /// Empty table; id zero is reserved for events and never minted.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(TableInner {
                slots: HashMap::new(),
                next_id: 1,
                closed: false,
            }),
        }
    }

    /// Mint a fresh correlation id and register its slot.
    ///
    /// Ids wrap monotonically, skipping zero and any id still in flight.
    pub fn allocate(&self) -> Result<(u32, oneshot::Receiver<Frame>)> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.closed {
            return Err(Error::EndpointClosed);
        }
        loop {
            let id = inner.next_id;
            inner.next_id = inner.next_id.checked_add(1).unwrap_or(1);
            if id != 0 && !inner.slots.contains_key(&id) {
                let (tx, rx) = oneshot::channel();
                inner.slots.insert(id, tx);
                return Ok((id, rx));
            }
        }
    }

    /// Complete the slot for an arriving response. Returns false when no
    /// slot matches; the caller drops the frame.
    pub fn complete(&self, id: u32, frame: Frame) -> bool {
        let sender = {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.slots.remove(&id)
        };
        match sender {
            // A send error means the waiter timed out or was cancelled
            // after the lookup; the late frame is dropped harmlessly.
            Some(tx) => tx.send(frame).is_ok(),
            None => false,
        }
    }

    /// Release a slot whose waiter gave up (timeout or cancellation).
    pub fn cancel(&self, id: u32) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.slots.remove(&id);
    }

    /// Number of requests currently in flight.
    pub fn in_flight(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.slots.len()
    }

    /// Shut the table down: refuse new allocations and wake every
    /// outstanding waiter with `EndpointClosed`.
    pub fn close(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.closed = true;
        // Dropping the senders makes every receiver resolve with an error
        // the waiter maps to EndpointClosed.
        inner.slots.clear();
    }
}

impl Default for RequestTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::OpCode;

    fn response(id: u32) -> Frame {
        Frame::response(id, OpCode::Heartbeat, Vec::new())
    }

    #[test]
    fn test_ids_are_unique_while_in_flight() {
        let table = RequestTable::new();
        let (id1, _rx1) = table.allocate().expect("allocate");
        let (id2, _rx2) = table.allocate().expect("allocate");
        assert_ne!(id1, id2);
        assert_eq!(table.in_flight(), 2);
    }

    #[tokio::test]
    async fn test_complete_wakes_waiter() {
        let table = RequestTable::new();
        let (id, rx) = table.allocate().expect("allocate");
        assert!(table.complete(id, response(id)));
        let frame = rx.await.expect("completed");
        assert_eq!(frame.corr_id, id);
        assert_eq!(table.in_flight(), 0);
    }

    #[test]
    fn test_unknown_id_is_dropped() {
        let table = RequestTable::new();
        assert!(!table.complete(42, response(42)));
    }

    #[test]
    fn test_cancel_releases_id() {
        let table = RequestTable::new();
        let (id, rx) = table.allocate().expect("allocate");
        drop(rx);
        table.cancel(id);
        assert_eq!(table.in_flight(), 0);
        // A late response for the cancelled id is dropped.
        assert!(!table.complete(id, response(id)));
    }

    #[tokio::test]
    async fn test_close_completes_outstanding_with_error() {
        let table = RequestTable::new();
        let (_id, rx) = table.allocate().expect("allocate");
        table.close();
        assert!(rx.await.is_err());
        assert!(matches!(table.allocate(), Err(Error::EndpointClosed)));
    }

    #[test]
    fn test_wrapping_skips_in_use_ids() {
        let table = RequestTable::new();
        {
            let mut inner = table.inner.lock().expect("lock");
            inner.next_id = u32::MAX;
        }
        let (id1, _rx1) = table.allocate().expect("allocate");
        assert_eq!(id1, u32::MAX);
        // Wraps past zero to one.
        let (id2, _rx2) = table.allocate().expect("allocate");
        assert_eq!(id2, 1);
    }
}
