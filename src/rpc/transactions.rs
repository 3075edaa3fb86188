//! Outstanding requests waiting for their response.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use flume::{Receiver, RecvTimeoutError, Sender};
use tracing::trace;

use crate::common::{ErrorSpecific, Id, Message, MessageType};
use crate::{Error, Result};

/// Transaction manager, correlating responses with the requests that caused them.
#[derive(Debug)]
pub struct Transactions {
    timeout: Duration,
    inflight: HashMap<Id, InflightTransaction>,
}

/// The manager's side of a transaction, holding the single use delivery slot.
#[derive(Debug)]
pub struct InflightTransaction {
    id: Id,
    to: SocketAddr,
    sent_at: Instant,
    sender: Sender<Message>,
}

/// The caller's side of a transaction.
#[derive(Debug)]
pub struct Transaction {
    id: Id,
    to: SocketAddr,
    receiver: Receiver<Message>,
}

impl Transactions {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            inflight: HashMap::new(),
        }
    }

    // === Getters ===

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn len(&self) -> usize {
        self.inflight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inflight.is_empty()
    }

    /// Returns true if this transaction is open and not expired.
    pub fn contains(&self, id: &Id) -> bool {
        self.inflight
            .get(id)
            .map(|transaction| !transaction.is_expired(self.timeout))
            .unwrap_or(false)
    }

    // === Public Methods ===

    /// Open a transaction expecting a reply from `to`, under a fresh random id.
    pub fn create(&mut self, to: SocketAddr) -> Transaction {
        let mut id = Id::random();
        while self.inflight.contains_key(&id) {
            id = Id::random();
        }

        let (sender, receiver) = flume::bounded(1);

        self.inflight.insert(
            id,
            InflightTransaction {
                id,
                to,
                sent_at: Instant::now(),
                sender,
            },
        );

        Transaction { id, to, receiver }
    }

    /// Take the transaction matching both the id and the address a reply came from.
    ///
    /// An id match from another address is not a match, and the transaction stays open.
    pub fn find(&mut self, id: &Id, from: &SocketAddr) -> Option<InflightTransaction> {
        let transaction = self.inflight.get(id)?;

        if transaction.to != *from {
            trace!(
                context = "transaction_validation",
                tid = %id.short(),
                expected = ?transaction.to,
                ?from,
                "Response from wrong address"
            );
            return None;
        }

        let transaction = self.inflight.remove(id)?;

        if transaction.is_expired(self.timeout) {
            trace!(
                context = "transaction_validation",
                tid = %id.short(),
                "Response to expired transaction"
            );
            return None;
        }

        Some(transaction)
    }

    /// Drop a transaction, usually after its caller gave up on it.
    pub fn remove(&mut self, id: &Id) -> Option<InflightTransaction> {
        self.inflight.remove(id)
    }

    /// Drop every transaction, releasing their waiters with [Error::Timeout].
    pub fn clear(&mut self) {
        self.inflight.clear();
    }

    /// Drop every expired transaction, disconnecting their waiters.
    pub fn cleanup(&mut self) {
        let timeout = self.timeout;

        self.inflight
            .retain(|_, transaction| !transaction.is_expired(timeout));
    }
}

impl InflightTransaction {
    pub fn id(&self) -> &Id {
        &self.id
    }

    pub fn to(&self) -> SocketAddr {
        self.to
    }

    fn is_expired(&self, timeout: Duration) -> bool {
        self.sent_at.elapsed() >= timeout
    }

    /// Hand the reply to the waiting caller.
    ///
    /// Consumes the transaction so delivery happens at most once.
    /// Returns false if the caller stopped waiting.
    pub fn deliver(self, message: Message) -> bool {
        self.sender.try_send(message).is_ok()
    }
}

impl Transaction {
    pub fn id(&self) -> &Id {
        &self.id
    }

    pub fn to(&self) -> SocketAddr {
        self.to
    }

    /// Block until the reply arrives, or `timeout` elapses.
    ///
    /// A delivered error message becomes [Error::Remote].
    pub fn wait(&self, timeout: Duration) -> Result<Message> {
        match self.receiver.recv_timeout(timeout) {
            Ok(message) => self.reply(message),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                Err(Error::Timeout(self.to))
            }
        }
    }

    /// Wait for the reply without blocking the thread.
    ///
    /// Resolves with [Error::Timeout] once the transaction expires and gets cleaned up,
    /// or when the node shuts down.
    #[cfg(feature = "async")]
    pub async fn wait_async(&self) -> Result<Message> {
        match self.receiver.recv_async().await {
            Ok(message) => self.reply(message),
            Err(_) => Err(Error::Timeout(self.to)),
        }
    }

    fn reply(&self, message: Message) -> Result<Message> {
        match message.message_type {
            MessageType::Error(ErrorSpecific {
                exception_type,
                message,
            }) => Err(Error::Remote {
                exception_type,
                message,
            }),
            _ => Ok(message),
        }
    }
}

#[cfg(test)]
mod test {
    use crate::common::{ResponseSpecific, PING_SUCCESS_RESPONSE};

    use super::*;

    fn pong(transaction_id: Id) -> Message {
        Message {
            transaction_id,
            sender_id: Id::random(),
            message_type: MessageType::Response(ResponseSpecific::Status(
                PING_SUCCESS_RESPONSE.to_string(),
            )),
        }
    }

    fn address(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn create_and_find() {
        let mut transactions = Transactions::new(Duration::from_secs(5));

        let transaction = transactions.create(address(1000));
        assert!(transactions.contains(transaction.id()));
        assert_eq!(transactions.len(), 1);

        let inflight = transactions
            .find(transaction.id(), &address(1000))
            .expect("should match");

        assert_eq!(inflight.id(), transaction.id());
        assert_eq!(inflight.to(), address(1000));
        assert!(transactions.is_empty(), "find removes the transaction");
        assert!(transactions.find(transaction.id(), &address(1000)).is_none());
    }

    #[test]
    fn ids_are_unique() {
        let mut transactions = Transactions::new(Duration::from_secs(5));

        let a = transactions.create(address(1000));
        let b = transactions.create(address(1000));

        assert_ne!(a.id(), b.id());
        assert_eq!(transactions.len(), 2);
    }

    #[test]
    fn wrong_address_does_not_match() {
        let mut transactions = Transactions::new(Duration::from_secs(5));

        let transaction = transactions.create(address(1000));

        assert!(transactions.find(transaction.id(), &address(1001)).is_none());
        assert!(transactions
            .find(transaction.id(), &SocketAddr::from(([127, 0, 0, 2], 1000)))
            .is_none());

        assert!(
            transactions.contains(transaction.id()),
            "mismatch keeps the transaction open"
        );
        assert!(transactions.find(transaction.id(), &address(1000)).is_some());
    }

    #[test]
    fn deliver_once() {
        let mut transactions = Transactions::new(Duration::from_secs(5));

        let transaction = transactions.create(address(1000));
        let inflight = transactions.find(transaction.id(), &address(1000)).unwrap();

        assert!(inflight.deliver(pong(*transaction.id())));

        let message = transaction.wait(Duration::from_millis(10)).unwrap();
        assert_eq!(message.transaction_id, *transaction.id());

        assert!(matches!(
            transaction.wait(Duration::from_millis(10)),
            Err(Error::Timeout(_))
        ));
    }

    #[test]
    fn deliver_after_waiter_left() {
        let mut transactions = Transactions::new(Duration::from_secs(5));

        let transaction = transactions.create(address(1000));
        let id = *transaction.id();
        drop(transaction);

        let inflight = transactions.find(&id, &address(1000)).unwrap();
        assert!(!inflight.deliver(pong(id)));
    }

    #[test]
    fn error_is_remote() {
        let mut transactions = Transactions::new(Duration::from_secs(5));

        let transaction = transactions.create(address(1000));
        let inflight = transactions.find(transaction.id(), &address(1000)).unwrap();

        inflight.deliver(Message {
            transaction_id: *transaction.id(),
            sender_id: Id::random(),
            message_type: MessageType::Error(ErrorSpecific {
                exception_type: "ValueError".to_string(),
                message: "nope".to_string(),
            }),
        });

        match transaction.wait(Duration::from_millis(10)) {
            Err(Error::Remote {
                exception_type,
                message,
            }) => {
                assert_eq!(exception_type, "ValueError");
                assert_eq!(message, "nope");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn expired_transactions() {
        let mut transactions = Transactions::new(Duration::from_millis(10));

        let late = transactions.create(address(1000));
        let swept = transactions.create(address(1000));

        std::thread::sleep(Duration::from_millis(20));

        assert!(!transactions.contains(late.id()));
        assert!(
            transactions.find(late.id(), &address(1000)).is_none(),
            "late reply finds no match"
        );

        transactions.cleanup();
        assert!(transactions.is_empty());

        assert!(matches!(
            swept.wait(Duration::from_secs(1)),
            Err(Error::Timeout(_))
        ));
    }

    #[test]
    fn wait_times_out() {
        let mut transactions = Transactions::new(Duration::from_secs(5));
        let transaction = transactions.create(address(1000));

        assert!(matches!(
            transaction.wait(Duration::from_millis(10)),
            Err(Error::Timeout(to)) if to == address(1000)
        ));
    }

    #[test]
    fn clear_releases_every_waiter() {
        let mut transactions = Transactions::new(Duration::from_secs(5));

        let first = transactions.create(address(1000));
        let second = transactions.create(address(1001));

        transactions.clear();

        assert!(transactions.is_empty());
        assert!(matches!(
            first.wait(Duration::from_secs(1)),
            Err(Error::Timeout(to)) if to == address(1000)
        ));
        assert!(matches!(
            second.wait(Duration::from_secs(1)),
            Err(Error::Timeout(to)) if to == address(1001)
        ));
    }
}
