//! AsyncDht node.

use std::net::SocketAddr;

use crate::{
    common::{FindNodeRequestArguments, FindValueRequestArguments, Id, Message, Node, RequestSpecific},
    dht::{found_nodes, found_value, pong, store_request, stored, Dht, FindValue},
    Error, Result,
};

impl Dht {
    /// Return an async version of the Dht client.
    pub fn as_async(self) -> AsyncDht {
        AsyncDht(self)
    }
}

#[derive(Debug, Clone)]
/// Async version of the Dht node.
///
/// Waiting on a response does not block a thread. A wait resolves with
/// [Error::Timeout] once the node's receive loop expires the transaction.
pub struct AsyncDht(Dht);

impl AsyncDht {
    // === Getters ===

    /// Returns the node's Id
    pub fn id(&self) -> Id {
        self.0.id()
    }

    /// Returns the address the node is listening on.
    pub fn local_addr(&self) -> SocketAddr {
        self.0.local_addr()
    }

    /// Returns a reference to the blocking [Dht].
    pub fn as_sync(&self) -> &Dht {
        &self.0
    }

    // === Public Methods ===

    /// Stop the node and wait for its threads to finish.
    pub async fn shutdown(&self) {
        self.0.shutdown();
    }

    /// Ping a node and return its Id.
    pub async fn ping(&self, address: SocketAddr) -> Result<Id> {
        let message = self.exchange(address, RequestSpecific::Ping).await?;

        pong(address, message)
    }

    /// Announce that this node holds `key`, served on `port`.
    pub async fn store(&self, address: SocketAddr, key: Id, port: u16) -> Result<()> {
        let message = self
            .exchange(address, store_request(self.id(), key, port))
            .await?;

        stored(address, message)
    }

    /// Ask a node for the nodes it knows closest to `target`.
    pub async fn find_node(&self, address: SocketAddr, target: Id) -> Result<Vec<Node>> {
        let message = self
            .exchange(
                address,
                RequestSpecific::FindNode(FindNodeRequestArguments { target }),
            )
            .await?;

        found_nodes(address, message)
    }

    /// Ask a node for holders of `key`, or the closest nodes it knows instead.
    pub async fn find_value(&self, address: SocketAddr, key: Id) -> Result<FindValue> {
        let message = self
            .exchange(
                address,
                RequestSpecific::FindValue(FindValueRequestArguments { key }),
            )
            .await?;

        found_value(address, key, message)
    }

    /// Ping every bootstrap node, and return how many answered.
    pub async fn bootstrap(&self) -> usize {
        let mut responding = 0;

        for address in self.0.bootstrap_addresses() {
            if self.ping(address).await.is_ok() {
                responding += 1;
            }
        }

        responding
    }

    // === Private Methods ===

    async fn exchange(&self, address: SocketAddr, request: RequestSpecific) -> Result<Message> {
        if !self.0.is_running() {
            return Err(Error::Shutdown);
        }

        let rpc = self.0.rpc();
        let transaction = rpc.request(address, request)?;

        // Shutdown may have swept transactions before this one was created.
        if !self.0.is_running() {
            rpc.cancel(&transaction);
            return Err(Error::Shutdown);
        }

        transaction.wait_async().await.map_err(|error| {
            rpc.cancel(&transaction);
            error
        })
    }
}
