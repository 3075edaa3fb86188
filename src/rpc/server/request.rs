//! Request handlers

use std::net::SocketAddr;

use tracing::debug;

use crate::common::{
    FindNodeRequestArguments, FindValueRequestArguments, FindValueResponseArguments, Id, Node,
    RequestSpecific, ResponseSpecific, StoreRequestArguments, MAX_BUCKET_SIZE_K,
    PING_SUCCESS_RESPONSE, STORE_SUCCESS_RESPONSE,
};
use crate::{Error, Result};

use super::super::{lock, Rpc};

/// Answer a request that already passed decoding and the self check.
///
/// Returns [Error::EmptyResult] when a find request had nothing to answer with,
/// in which case nothing is sent.
pub fn handle_request(
    rpc: &Rpc,
    from: SocketAddr,
    transaction_id: Id,
    request: &RequestSpecific,
) -> Result<()> {
    match request {
        RequestSpecific::Ping => rpc.respond(
            from,
            transaction_id,
            ResponseSpecific::Status(PING_SUCCESS_RESPONSE.to_string()),
        ),
        RequestSpecific::Store(StoreRequestArguments { key, node_id, port }) => {
            // The port is declared by the holder, the IP is whatever the datagram came from.
            let holder = Node::new(*node_id, SocketAddr::new(from.ip(), *port));

            lock(&rpc.values).upsert(*key, holder);

            rpc.respond(
                from,
                transaction_id,
                ResponseSpecific::Status(STORE_SUCCESS_RESPONSE.to_string()),
            )
        }
        RequestSpecific::FindNode(FindNodeRequestArguments { target }) => {
            handle_find_node(rpc, from, transaction_id, target)
        }
        RequestSpecific::FindValue(FindValueRequestArguments { key }) => {
            let holders = lock(&rpc.values).get(key);

            if holders.is_empty() {
                return handle_find_node(rpc, from, transaction_id, key);
            }

            rpc.respond(
                from,
                transaction_id,
                ResponseSpecific::Value(FindValueResponseArguments {
                    key: *key,
                    peers: holders,
                }),
            )
        }
    }
}

fn handle_find_node(rpc: &Rpc, from: SocketAddr, transaction_id: Id, target: &Id) -> Result<()> {
    let nodes = lock(&rpc.routing_table).closest(target, MAX_BUCKET_SIZE_K);

    if nodes.is_empty() {
        debug!(
            context = "rpc_request",
            target = %target.short(),
            ?from,
            "No nodes to answer find request with"
        );
        return Err(Error::EmptyResult);
    }

    rpc.respond(from, transaction_id, ResponseSpecific::Nodes(nodes))
}
