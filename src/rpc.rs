//! K-RPC implementation: the node context and the inbound dispatcher.

mod config;
mod server;
mod socket;
mod transactions;

use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, trace};

use crate::common::{
    ErrorSpecific, Id, Message, MessageType, Node, RequestSpecific, ResponseSpecific, RoutingTable,
};
use crate::{Error, Result};

pub use config::{Config, DEFAULT_MAX_HOLDERS, DEFAULT_MAX_VALUES, DEFAULT_WORKERS};
pub use server::ValueStore;
pub use socket::udp::Udp;
pub use socket::{KrpcSocket, DEFAULT_PORT, DEFAULT_WRITE_TIMEOUT, MAX_DATAGRAM_SIZE};
pub use transactions::{InflightTransaction, Transaction, Transactions};

/// Default time a caller waits for a response.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Lock a shared structure, recovering it if another thread panicked while holding it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The node context.
///
/// Owns the local identity and socket, and shares the routing table,
/// transaction manager and value store with every thread handling datagrams.
#[derive(Debug)]
pub struct Rpc {
    id: Id,
    socket: KrpcSocket,
    routing_table: Arc<Mutex<RoutingTable>>,
    transactions: Arc<Mutex<Transactions>>,
    values: Arc<Mutex<ValueStore>>,
}

impl Rpc {
    pub fn new(
        id: Id,
        socket: KrpcSocket,
        routing_table: Arc<Mutex<RoutingTable>>,
        transactions: Arc<Mutex<Transactions>>,
        values: Arc<Mutex<ValueStore>>,
    ) -> Self {
        Rpc {
            id,
            socket,
            routing_table,
            transactions,
            values,
        }
    }

    /// Bind a socket and create empty shared state from a [Config].
    pub fn from_config(config: &Config) -> Result<Self> {
        let id = config.id.unwrap_or_else(Id::random);
        let socket = KrpcSocket::bind(config)?;

        Ok(Rpc::new(
            id,
            socket,
            Arc::new(Mutex::new(RoutingTable::new(id))),
            Arc::new(Mutex::new(Transactions::new(config.request_timeout))),
            Arc::new(Mutex::new(ValueStore::new(
                NonZeroUsize::new(config.max_values).unwrap_or(NonZeroUsize::MIN),
                NonZeroUsize::new(config.max_holders).unwrap_or(NonZeroUsize::MIN),
            ))),
        ))
    }

    // === Getters ===

    /// Returns the node's Id
    pub fn id(&self) -> &Id {
        &self.id
    }

    /// Returns the address the server is listening to.
    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr()
    }

    /// A snapshot of the routing table.
    pub fn routing_table(&self) -> RoutingTable {
        lock(&self.routing_table).clone()
    }

    /// Holders stored locally for a key.
    pub fn holders(&self, key: &Id) -> Vec<Node> {
        lock(&self.values).get(key)
    }

    /// Number of transactions waiting for a response.
    pub fn pending_transactions(&self) -> usize {
        lock(&self.transactions).len()
    }

    // === Public Methods ===

    /// Receive one datagram from the socket, see [KrpcSocket::recv_from].
    pub fn recv_from(&self, buf: &mut [u8]) -> Option<(usize, SocketAddr)> {
        self.socket.recv_from(buf)
    }

    /// Drop expired transactions.
    pub fn cleanup_transactions(&self) {
        lock(&self.transactions).cleanup();
    }

    /// Drop every pending transaction, releasing all waiting callers.
    pub fn cancel_all(&self) {
        lock(&self.transactions).clear();
    }

    /// Handle one inbound datagram.
    ///
    /// Requests are answered, responses and errors are delivered to their
    /// transaction. Every valid message from another node refreshes the
    /// routing table with the sender. A returned error means the datagram was
    /// dropped or its reply could not be sent. Nothing is ever sent back for
    /// an invalid datagram.
    pub fn handle_datagram(&self, bytes: &[u8], from: SocketAddr) -> Result<()> {
        let message = Message::from_bytes(bytes).map_err(|error| {
            trace!(
                context = "rpc_decode",
                ?error,
                ?from,
                message = ?String::from_utf8_lossy(bytes),
                "Received invalid message"
            );
            error
        })?;

        trace!(
            context = "rpc_message_receiving",
            tid = %message.transaction_id.short(),
            sender = %message.sender_id.short(),
            ?from,
            message = %message.describe(),
        );

        let sender_id = message.sender_id;

        match message.message_type {
            MessageType::Request(ref request) => {
                if sender_id == self.id {
                    debug!(
                        context = "rpc_validation",
                        ?from,
                        "Request claims our own Id"
                    );
                    return Err(Error::SelfMessage(from));
                }

                let result = server::handle_request(self, from, message.transaction_id, request);

                self.refresh(sender_id, from);

                result
            }
            MessageType::Response(_) | MessageType::Error(_) => {
                self.refresh(sender_id, from);

                let transaction = lock(&self.transactions).find(&message.transaction_id, &from);

                match transaction {
                    Some(transaction) => {
                        if !transaction.deliver(message) {
                            trace!(
                                context = "rpc_delivery",
                                ?from,
                                "Caller stopped waiting for the response"
                            );
                        }
                    }
                    None => {
                        trace!(
                            context = "rpc_delivery",
                            ?from,
                            "No transaction for response"
                        );
                    }
                }

                Ok(())
            }
        }
    }

    /// Send a request and return the transaction to wait on.
    ///
    /// The transaction is dropped again if sending fails.
    pub fn request(&self, to: SocketAddr, request: RequestSpecific) -> Result<Transaction> {
        let transaction = lock(&self.transactions).create(to);

        let message = Message {
            transaction_id: *transaction.id(),
            sender_id: self.id,
            message_type: MessageType::Request(request),
        };

        if let Err(error) = self.socket.send(to, &message) {
            debug!(context = "rpc_request", ?error, ?to, "Failed to send request");
            lock(&self.transactions).remove(transaction.id());

            return Err(error);
        }

        Ok(transaction)
    }

    /// Send a request and block until its reply message arrives.
    ///
    /// The transaction is dropped if the wait fails, so a late reply finds no match.
    pub fn exchange(
        &self,
        to: SocketAddr,
        request: RequestSpecific,
        timeout: Duration,
    ) -> Result<Message> {
        let transaction = self.request(to, request)?;

        transaction.wait(timeout).map_err(|error| {
            lock(&self.transactions).remove(transaction.id());
            error
        })
    }

    /// Send a request and block until its response arrives.
    pub fn call(
        &self,
        to: SocketAddr,
        request: RequestSpecific,
        timeout: Duration,
    ) -> Result<ResponseSpecific> {
        match self.exchange(to, request, timeout)?.message_type {
            MessageType::Response(response) => Ok(response),
            _ => Err(Error::UnexpectedResponse(to)),
        }
    }

    /// Drop a transaction the caller gave up on.
    pub fn cancel(&self, transaction: &Transaction) {
        lock(&self.transactions).remove(transaction.id());
    }

    /// Send a response to a request.
    pub fn respond(
        &self,
        to: SocketAddr,
        transaction_id: Id,
        response: ResponseSpecific,
    ) -> Result<()> {
        self.socket.send(
            to,
            &Message {
                transaction_id,
                sender_id: self.id,
                message_type: MessageType::Response(response),
            },
        )
    }

    /// Send an error in reply to a request.
    pub fn send_error(&self, to: SocketAddr, transaction_id: Id, error: ErrorSpecific) -> Result<()> {
        self.socket.send(
            to,
            &Message {
                transaction_id,
                sender_id: self.id,
                message_type: MessageType::Error(error),
            },
        )
    }

    // === Private Methods ===

    /// Insert or refresh a node we just heard from.
    fn refresh(&self, id: Id, address: SocketAddr) {
        let added = lock(&self.routing_table).update(Node::new(id, address));

        if !added {
            trace!(
                context = "routing_table",
                node = %id.short(),
                ?address,
                "Node not added to routing table"
            );
        }
    }
}
