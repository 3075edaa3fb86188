//! Dht node.

use std::{
    net::{IpAddr, SocketAddr, ToSocketAddrs},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use tracing::{debug, info, trace};

use crate::{
    common::{
        FindNodeRequestArguments, FindValueRequestArguments, FindValueResponseArguments, Id,
        Message, MessageType, Node, RequestSpecific, ResponseSpecific, RoutingTable,
        StoreRequestArguments, PING_SUCCESS_RESPONSE, STORE_SUCCESS_RESPONSE,
    },
    rpc::{lock, Config, Rpc, MAX_DATAGRAM_SIZE},
    Error, Result,
};

/// Datagrams waiting for a worker before new ones get dropped.
const MAX_QUEUED_DATAGRAMS: usize = 1024;

#[derive(Debug, Clone)]
/// A running DHT node.
///
/// Cloning is cheap, and every clone talks to the same node.
/// The node stops once [Dht::shutdown] is called or the last clone is dropped.
pub struct Dht(Arc<Inner>);

#[derive(Debug)]
struct Inner {
    rpc: Arc<Rpc>,
    bootstrap: Vec<String>,
    request_timeout: Duration,
    running: Arc<AtomicBool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

/// Outcome of a find_value request.
#[derive(Debug, Clone, PartialEq)]
pub enum FindValue {
    /// The remote node knows holders of the key.
    Found(Vec<Node>),
    /// The remote node knows no holder, these are the closest nodes it knows.
    Closest(Vec<Node>),
}

#[derive(Debug, Default, Clone)]
pub struct DhtBuilder(Config);

impl DhtBuilder {
    /// Set this node's Id, instead of a random one.
    pub fn id(mut self, id: Id) -> Self {
        self.0.id = Some(id);

        self
    }

    /// Set the address to bind the UDP socket on.
    pub fn bind_address(mut self, bind_address: IpAddr) -> Self {
        self.0.bind_address = bind_address;

        self
    }

    /// Set the port to listen on.
    pub fn port(mut self, port: u16) -> Self {
        self.0.port = Some(port);

        self
    }

    /// Set bootstrapping nodes.
    pub fn bootstrap(mut self, bootstrap: &[String]) -> Self {
        self.0.bootstrap = bootstrap.to_vec();

        self
    }

    /// Set how long to wait for a response.
    pub fn request_timeout(mut self, request_timeout: Duration) -> Self {
        self.0.request_timeout = request_timeout;

        self
    }

    /// Set the write deadline of outbound datagrams.
    pub fn write_timeout(mut self, write_timeout: Duration) -> Self {
        self.0.write_timeout = write_timeout;

        self
    }

    /// Set the number of threads handling inbound datagrams.
    pub fn workers(mut self, workers: usize) -> Self {
        self.0.workers = workers;

        self
    }

    /// Set the maximum number of keys in the value store.
    pub fn max_values(mut self, max_values: usize) -> Self {
        self.0.max_values = max_values;

        self
    }

    /// Set the maximum number of holders per key in the value store.
    pub fn max_holders(mut self, max_holders: usize) -> Self {
        self.0.max_holders = max_holders;

        self
    }

    /// Create a Dht node.
    pub fn build(self) -> Result<Dht> {
        Dht::new(self.0)
    }
}

impl Dht {
    /// Returns a builder to edit settings before creating a Dht node.
    pub fn builder() -> DhtBuilder {
        DhtBuilder::default()
    }

    /// Bind the socket and start the receive and worker threads.
    pub fn new(config: Config) -> Result<Self> {
        let rpc = Arc::new(Rpc::from_config(&config)?);
        let running = Arc::new(AtomicBool::new(true));

        let (sender, receiver) = flume::bounded::<(Vec<u8>, SocketAddr)>(MAX_QUEUED_DATAGRAMS);

        let mut handles = Vec::with_capacity(config.workers + 1);

        // Workers exit once `sender` drops, including on an early return below.
        for index in 0..config.workers.max(1) {
            let rpc = rpc.clone();
            let receiver = receiver.clone();

            handles.push(
                thread::Builder::new()
                    .name(format!("kadnode-worker-{index}"))
                    .spawn(move || {
                        for (bytes, from) in receiver.iter() {
                            if let Err(error) = rpc.handle_datagram(&bytes, from) {
                                trace!(context = "dht_worker", ?error, ?from, "Dropped datagram");
                            }
                        }
                    })?,
            );
        }

        handles.push({
            let rpc = rpc.clone();
            let running = running.clone();

            thread::Builder::new()
                .name("kadnode-recv".to_string())
                .spawn(move || receive_loop(&rpc, &running, sender))?
        });

        info!(
            id = %rpc.id(),
            local_addr = ?rpc.local_addr(),
            workers = config.workers.max(1),
            "Dht node listening"
        );

        Ok(Dht(Arc::new(Inner {
            rpc,
            bootstrap: config.bootstrap,
            request_timeout: config.request_timeout,
            running,
            handles: Mutex::new(handles),
        })))
    }

    // === Getters ===

    /// Returns the node's Id
    pub fn id(&self) -> Id {
        *self.0.rpc.id()
    }

    /// Returns the address the node is listening on.
    pub fn local_addr(&self) -> SocketAddr {
        self.0.rpc.local_addr()
    }

    /// A snapshot of the routing table.
    pub fn routing_table(&self) -> RoutingTable {
        self.0.rpc.routing_table()
    }

    /// Holders that announced `key` to this node.
    pub fn holders(&self, key: &Id) -> Vec<Node> {
        self.0.rpc.holders(key)
    }

    /// Returns the node context.
    pub fn rpc(&self) -> &Rpc {
        &self.0.rpc
    }

    // === Public Methods ===

    /// Stop the receive loop and wait for every thread to finish.
    ///
    /// Callers still waiting on a response are released with [Error::Timeout].
    pub fn shutdown(&self) {
        self.0.running.store(false, Ordering::Relaxed);

        let handles = std::mem::take(&mut *lock(&self.0.handles));
        for handle in handles {
            let _ = handle.join();
        }

        self.0.rpc.cancel_all();

        debug!(id = %self.id().short(), "Dht node shut down");
    }

    /// Returns true until [Dht::shutdown] is called.
    pub fn is_running(&self) -> bool {
        self.0.running.load(Ordering::Relaxed)
    }

    /// Ping a node and return its Id.
    pub fn ping(&self, address: SocketAddr) -> Result<Id> {
        let message = self.exchange(address, RequestSpecific::Ping)?;

        pong(address, message)
    }

    /// Announce that this node holds `key`, served on `port`.
    pub fn store(&self, address: SocketAddr, key: Id, port: u16) -> Result<()> {
        let message = self.exchange(address, store_request(self.id(), key, port))?;

        stored(address, message)
    }

    /// Ask a node for the nodes it knows closest to `target`.
    pub fn find_node(&self, address: SocketAddr, target: Id) -> Result<Vec<Node>> {
        let message = self.exchange(
            address,
            RequestSpecific::FindNode(FindNodeRequestArguments { target }),
        )?;

        found_nodes(address, message)
    }

    /// Ask a node for holders of `key`, or the closest nodes it knows instead.
    pub fn find_value(&self, address: SocketAddr, key: Id) -> Result<FindValue> {
        let message = self.exchange(
            address,
            RequestSpecific::FindValue(FindValueRequestArguments { key }),
        )?;

        found_value(address, key, message)
    }

    /// Ping every bootstrap node, and return how many answered.
    pub fn bootstrap(&self) -> usize {
        let mut responding = 0;

        for address in self.bootstrap_addresses() {
            match self.ping(address) {
                Ok(id) => {
                    debug!(node = %id.short(), ?address, "Bootstrap node responded");
                    responding += 1;
                }
                Err(error) => {
                    debug!(?error, ?address, "Bootstrap node did not respond");
                }
            }
        }

        responding
    }

    // === Private Methods ===

    fn exchange(&self, address: SocketAddr, request: RequestSpecific) -> Result<Message> {
        if !self.is_running() {
            return Err(Error::Shutdown);
        }

        self.0
            .rpc
            .exchange(address, request, self.0.request_timeout)
    }

    pub(crate) fn bootstrap_addresses(&self) -> Vec<SocketAddr> {
        self.0
            .bootstrap
            .iter()
            .filter_map(|bootstrap| match bootstrap.to_socket_addrs() {
                Ok(mut addresses) => addresses.next(),
                Err(error) => {
                    debug!(?error, ?bootstrap, "Could not resolve bootstrap node");
                    None
                }
            })
            .collect()
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

fn receive_loop(rpc: &Rpc, running: &AtomicBool, sender: flume::Sender<(Vec<u8>, SocketAddr)>) {
    let mut buf = vec![0; MAX_DATAGRAM_SIZE];

    while running.load(Ordering::Relaxed) {
        if let Some((amt, from)) = rpc.recv_from(&mut buf) {
            if sender.try_send((buf[..amt].to_vec(), from)).is_err() {
                debug!(context = "dht_receive", ?from, "Workers are busy, dropping datagram");
            }
        }

        rpc.cleanup_transactions();
    }

    // Dropping the sender lets the workers drain the queue and exit.
}

pub(crate) fn store_request(node_id: Id, key: Id, port: u16) -> RequestSpecific {
    RequestSpecific::Store(StoreRequestArguments { key, node_id, port })
}

pub(crate) fn pong(address: SocketAddr, message: Message) -> Result<Id> {
    match message.message_type {
        MessageType::Response(ResponseSpecific::Status(status))
            if status == PING_SUCCESS_RESPONSE =>
        {
            Ok(message.sender_id)
        }
        _ => Err(Error::UnexpectedResponse(address)),
    }
}

pub(crate) fn stored(address: SocketAddr, message: Message) -> Result<()> {
    match message.message_type {
        MessageType::Response(ResponseSpecific::Status(status))
            if status == STORE_SUCCESS_RESPONSE =>
        {
            Ok(())
        }
        _ => Err(Error::UnexpectedResponse(address)),
    }
}

pub(crate) fn found_nodes(address: SocketAddr, message: Message) -> Result<Vec<Node>> {
    match message.message_type {
        MessageType::Response(ResponseSpecific::Nodes(nodes)) => Ok(nodes),
        _ => Err(Error::UnexpectedResponse(address)),
    }
}

pub(crate) fn found_value(address: SocketAddr, key: Id, message: Message) -> Result<FindValue> {
    match message.message_type {
        MessageType::Response(ResponseSpecific::Value(FindValueResponseArguments {
            key: found,
            peers,
        })) if found == key => Ok(FindValue::Found(peers)),
        MessageType::Response(ResponseSpecific::Nodes(nodes)) => Ok(FindValue::Closest(nodes)),
        _ => Err(Error::UnexpectedResponse(address)),
    }
}

/// Create a testnet of Dht nodes to run tests against instead of the real network.
#[derive(Debug)]
pub struct Testnet {
    pub bootstrap: Vec<String>,
    pub nodes: Vec<Dht>,
}

impl Testnet {
    /// Start `count` nodes on localhost, all bootstrapped to the first one.
    pub fn new(count: usize) -> Result<Testnet> {
        let mut nodes: Vec<Dht> = vec![];
        let mut bootstrap = vec![];

        for i in 0..count {
            let builder = Dht::builder()
                .bind_address(IpAddr::from([127, 0, 0, 1]))
                .port(0)
                .request_timeout(Duration::from_secs(2));

            if i == 0 {
                let node = builder.build()?;
                bootstrap.push(node.local_addr().to_string());
                nodes.push(node);
            } else {
                let node = builder.bootstrap(&bootstrap).build()?;
                node.bootstrap();
                nodes.push(node);
            }
        }

        Ok(Self { bootstrap, nodes })
    }
}
