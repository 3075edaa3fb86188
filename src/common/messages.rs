//! Serialize and deserialize DHT messages.
//!
//! Every datagram is a bencoded dictionary. Key `"0"` selects the message type,
//! `"1"` carries the transaction id and `"2"` the sender id. Requests put the method
//! name under `"3"` and its arguments under `"4"`, responses put their payload under
//! `"3"`, and errors put the exception type and message under `"3"` and `"4"`.

mod internal;

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use serde_bencode::value::Value;

use crate::common::{Id, Node, ID_SIZE};
use crate::{Error, Result};

pub const PING_METHOD: &str = "ping";
pub const STORE_METHOD: &str = "store";
pub const FIND_NODE_METHOD: &str = "find_node";
pub const FIND_VALUE_METHOD: &str = "find_value";

/// Status payload answering a ping.
pub const PING_SUCCESS_RESPONSE: &str = "pong";
/// Status payload answering a store.
pub const STORE_SUCCESS_RESPONSE: &str = "OK";

const STORE_NODE_ID_FIELD: &[u8] = b"node_id";
const STORE_PORT_FIELD: &[u8] = b"port";
const FIND_VALUE_KEY_FIELD: &[u8] = b"key";
const FIND_VALUE_CONTACTS_FIELD: &[u8] = b"contacts";

#[derive(Debug, PartialEq, Clone)]
pub struct Message {
    /// Random id chosen by the requester and echoed by the responder.
    pub transaction_id: Id,

    /// Id of the node that sent this message.
    pub sender_id: Id,

    pub message_type: MessageType,
}

#[derive(Debug, PartialEq, Clone)]
pub enum MessageType {
    Request(RequestSpecific),

    Response(ResponseSpecific),

    Error(ErrorSpecific),
}

#[derive(Debug, PartialEq, Clone)]
pub enum RequestSpecific {
    Ping,
    Store(StoreRequestArguments),
    FindNode(FindNodeRequestArguments),
    FindValue(FindValueRequestArguments),
}

#[derive(Debug, PartialEq, Clone)]
pub enum ResponseSpecific {
    /// Success status of a ping or a store.
    Status(String),
    /// Closest nodes known to the responder.
    Nodes(Vec<Node>),
    /// Holders of a value found by find_value.
    Value(FindValueResponseArguments),
}

#[derive(Debug, PartialEq, Clone)]
pub struct ErrorSpecific {
    pub exception_type: String,
    pub message: String,
}

// === STORE ===

#[derive(Debug, PartialEq, Clone)]
pub struct StoreRequestArguments {
    /// Key of the value being announced.
    pub key: Id,
    /// Id of the node holding the value.
    pub node_id: Id,
    /// Port the holder serves the value on. The IP is taken from the datagram.
    pub port: u16,
}

// === FIND_NODE ===

#[derive(Debug, PartialEq, Clone)]
pub struct FindNodeRequestArguments {
    pub target: Id,
}

// === FIND_VALUE ===

#[derive(Debug, PartialEq, Clone)]
pub struct FindValueRequestArguments {
    pub key: Id,
}

#[derive(Debug, PartialEq, Clone)]
pub struct FindValueResponseArguments {
    pub key: Id,
    pub peers: Vec<Node>,
}

impl RequestSpecific {
    /// Method name on the wire.
    pub fn method(&self) -> &'static str {
        match self {
            RequestSpecific::Ping => PING_METHOD,
            RequestSpecific::Store(_) => STORE_METHOD,
            RequestSpecific::FindNode(_) => FIND_NODE_METHOD,
            RequestSpecific::FindValue(_) => FIND_VALUE_METHOD,
        }
    }

    fn to_args(&self) -> Vec<Value> {
        match self {
            RequestSpecific::Ping => vec![],
            RequestSpecific::Store(StoreRequestArguments { key, node_id, port }) => vec![
                Value::Bytes(key.to_vec()),
                Value::Dict(HashMap::from([
                    (STORE_NODE_ID_FIELD.to_vec(), Value::Bytes(node_id.to_vec())),
                    (STORE_PORT_FIELD.to_vec(), Value::Int(i64::from(*port))),
                ])),
            ],
            RequestSpecific::FindNode(FindNodeRequestArguments { target }) => {
                vec![Value::Bytes(target.to_vec())]
            }
            RequestSpecific::FindValue(FindValueRequestArguments { key }) => {
                vec![Value::Bytes(key.to_vec())]
            }
        }
    }

    fn from_args(method: &str, args: Vec<Value>) -> Result<RequestSpecific> {
        match method {
            PING_METHOD => Ok(RequestSpecific::Ping),
            STORE_METHOD => {
                let mut args = args.into_iter();

                let key = match args.next() {
                    Some(Value::Bytes(key)) if !key.is_empty() => id_field(&key, "store key")?,
                    _ => return Err(violation("store key is empty")),
                };

                let Some(Value::Dict(mut payload)) = args.next() else {
                    return Err(violation("store payload is missing"));
                };

                let node_id = match payload.remove(STORE_NODE_ID_FIELD) {
                    Some(Value::Bytes(node_id)) => id_field(&node_id, "store node_id")?,
                    _ => return Err(violation("store node_id is missing")),
                };

                let port = match payload.remove(STORE_PORT_FIELD) {
                    Some(Value::Int(port)) => u16::try_from(port)
                        .map_err(|_| violation(format!("invalid store port {port}")))?,
                    _ => return Err(violation("store port is missing")),
                };

                Ok(RequestSpecific::Store(StoreRequestArguments {
                    key,
                    node_id,
                    port,
                }))
            }
            FIND_NODE_METHOD => Ok(RequestSpecific::FindNode(FindNodeRequestArguments {
                target: single_id_arg(args)?,
            })),
            FIND_VALUE_METHOD => Ok(RequestSpecific::FindValue(FindValueRequestArguments {
                key: single_id_arg(args)?,
            })),
            other => Err(violation(format!("invalid request method: {other}"))),
        }
    }
}

impl ResponseSpecific {
    fn to_payload(&self) -> Value {
        match self {
            ResponseSpecific::Status(status) => Value::Bytes(status.as_bytes().to_vec()),
            ResponseSpecific::Nodes(nodes) => nodes_to_value(nodes),
            ResponseSpecific::Value(FindValueResponseArguments { key, peers }) => {
                Value::Dict(HashMap::from([
                    (FIND_VALUE_KEY_FIELD.to_vec(), Value::Bytes(key.to_vec())),
                    (FIND_VALUE_CONTACTS_FIELD.to_vec(), nodes_to_value(peers)),
                ]))
            }
        }
    }

    fn from_payload(payload: Value) -> Result<ResponseSpecific> {
        match payload {
            Value::Bytes(status) => String::from_utf8(status)
                .map(ResponseSpecific::Status)
                .map_err(|_| violation("status is not valid utf-8")),
            Value::List(nodes) => Ok(ResponseSpecific::Nodes(value_to_nodes(nodes)?)),
            Value::Dict(mut fields) => {
                let key = match fields.remove(FIND_VALUE_KEY_FIELD) {
                    Some(Value::Bytes(key)) => id_field(&key, "find_value key")?,
                    _ => return Err(violation("find_value key is missing")),
                };

                let peers = match fields.remove(FIND_VALUE_CONTACTS_FIELD) {
                    Some(Value::List(peers)) => value_to_nodes(peers)?,
                    _ => return Err(violation("find_value contacts are missing")),
                };

                Ok(ResponseSpecific::Value(FindValueResponseArguments {
                    key,
                    peers,
                }))
            }
            Value::Int(_) => Err(violation("response payload is an integer")),
        }
    }
}

impl Message {
    fn into_serde_message(self) -> internal::DHTMessage {
        let transaction_id = self.transaction_id.to_vec();
        let node_id = self.sender_id.to_vec();

        match self.message_type {
            MessageType::Request(request) => internal::DHTMessage::Request(internal::DHTRequest {
                message_type: internal::REQUEST_TYPE,
                transaction_id,
                node_id,
                method: request.method().to_string(),
                args: request.to_args(),
            }),
            MessageType::Response(response) => {
                internal::DHTMessage::Response(internal::DHTResponse {
                    message_type: internal::RESPONSE_TYPE,
                    transaction_id,
                    node_id,
                    payload: response.to_payload(),
                })
            }
            MessageType::Error(error) => internal::DHTMessage::Error(internal::DHTError {
                message_type: internal::ERROR_TYPE,
                transaction_id,
                node_id,
                exception_type: error.exception_type,
                message: error.message,
            }),
        }
    }

    fn from_serde_message(msg: internal::DHTMessage) -> Result<Message> {
        Ok(match msg {
            internal::DHTMessage::Request(request) => Message {
                transaction_id: id_field(&request.transaction_id, "transaction id")?,
                sender_id: id_field(&request.node_id, "node id")?,
                message_type: MessageType::Request(RequestSpecific::from_args(
                    &request.method,
                    request.args,
                )?),
            },
            internal::DHTMessage::Response(response) => Message {
                transaction_id: id_field(&response.transaction_id, "transaction id")?,
                sender_id: id_field(&response.node_id, "node id")?,
                message_type: MessageType::Response(ResponseSpecific::from_payload(
                    response.payload,
                )?),
            },
            internal::DHTMessage::Error(error) => Message {
                transaction_id: id_field(&error.transaction_id, "transaction id")?,
                sender_id: id_field(&error.node_id, "node id")?,
                message_type: MessageType::Error(ErrorSpecific {
                    exception_type: error.exception_type,
                    message: error.message,
                }),
            },
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(self.clone().into_serde_message().to_bytes()?)
    }

    /// Decode a datagram.
    ///
    /// Returns [Error::Decode] if the datagram is not bencode or has no valid type
    /// selector, and [Error::ProtocolViolation] if its fields do not fit the type.
    pub fn from_bytes<T: AsRef<[u8]>>(bytes: T) -> Result<Message> {
        let serde_message = internal::DHTMessage::from_bytes(bytes.as_ref()).map_err(|e| match e {
            internal::DHTDecodeError::Header(reason) => Error::Decode(reason),
            internal::DHTDecodeError::Body(e) => violation(e.to_string()),
        })?;

        Message::from_serde_message(serde_message)
    }

    /// Short description for logs.
    pub fn describe(&self) -> String {
        match &self.message_type {
            MessageType::Request(request) => match request {
                RequestSpecific::Ping => PING_METHOD.to_string(),
                RequestSpecific::Store(StoreRequestArguments { key, node_id, port }) => {
                    format!("{STORE_METHOD}({}, {}, {port})", key.short(), node_id.short())
                }
                RequestSpecific::FindNode(FindNodeRequestArguments { target }) => {
                    format!("{FIND_NODE_METHOD}({})", target.short())
                }
                RequestSpecific::FindValue(FindValueRequestArguments { key }) => {
                    format!("{FIND_VALUE_METHOD}({})", key.short())
                }
            },
            MessageType::Response(response) => match response {
                ResponseSpecific::Status(status) => status.clone(),
                ResponseSpecific::Nodes(nodes) => format!("{} nodes", nodes.len()),
                ResponseSpecific::Value(FindValueResponseArguments { key, peers }) => {
                    format!("{} peers for {}", peers.len(), key.short())
                }
            },
            MessageType::Error(ErrorSpecific {
                exception_type,
                message,
            }) => format!("{exception_type}: {message}"),
        }
    }
}

fn violation<T: Into<String>>(reason: T) -> Error {
    Error::ProtocolViolation(reason.into())
}

fn id_field(bytes: &[u8], field: &str) -> Result<Id> {
    Id::from_bytes(bytes)
        .map_err(|_| violation(format!("invalid {field} length {}", bytes.len())))
}

/// The single identifier argument of find_node and find_value.
fn single_id_arg(args: Vec<Value>) -> Result<Id> {
    match args.as_slice() {
        [Value::Bytes(target)] => id_field(target, "target"),
        [] => Err(violation("nothing to find")),
        _ => Err(violation(format!(
            "expected a single target argument, got {}",
            args.len()
        ))),
    }
}

fn bytes_to_sockaddr<T: AsRef<[u8]>>(bytes: T) -> Result<SocketAddr> {
    let bytes = bytes.as_ref();
    match bytes.len() {
        6 => {
            let ip = Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]);
            let port = u16::from_be_bytes([bytes[4], bytes[5]]);

            Ok(SocketAddr::new(IpAddr::V4(ip), port))
        }
        18 => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&bytes[..16]);
            let port = u16::from_be_bytes([bytes[16], bytes[17]]);

            Ok(SocketAddr::new(IpAddr::V6(Ipv6Addr::from(octets)), port))
        }
        _ => Err(violation("Wrong number of bytes for sockaddr")),
    }
}

pub fn sockaddr_to_bytes(sockaddr: &SocketAddr) -> Vec<u8> {
    let mut bytes = Vec::new();

    match sockaddr {
        SocketAddr::V4(v4) => bytes.extend(v4.ip().octets()),
        SocketAddr::V6(v6) => bytes.extend(v6.ip().octets()),
    }

    bytes.extend(sockaddr.port().to_be_bytes());

    bytes
}

/// Compact peer record: id, then ip, then big endian port.
pub fn node_to_bytes(node: &Node) -> Vec<u8> {
    let mut bytes = node.id.to_vec();
    bytes.append(&mut sockaddr_to_bytes(&node.address));
    bytes
}

pub fn bytes_to_node<T: AsRef<[u8]>>(bytes: T) -> Result<Node> {
    let bytes = bytes.as_ref();

    if bytes.len() < ID_SIZE {
        return Err(violation(format!(
            "Wrong number of bytes for compact node ({})",
            bytes.len()
        )));
    }

    let id = id_field(&bytes[..ID_SIZE], "compact node id")?;
    let address = bytes_to_sockaddr(&bytes[ID_SIZE..])?;

    Ok(Node::new(id, address))
}

fn nodes_to_value(nodes: &[Node]) -> Value {
    Value::List(
        nodes
            .iter()
            .map(|node| Value::Bytes(node_to_bytes(node)))
            .collect(),
    )
}

fn value_to_nodes(values: Vec<Value>) -> Result<Vec<Node>> {
    values
        .into_iter()
        .map(|value| match value {
            Value::Bytes(bytes) => bytes_to_node(bytes),
            _ => Err(violation("compact node is not a byte string")),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(request: RequestSpecific) -> Message {
        Message {
            transaction_id: Id::random(),
            sender_id: Id::random(),
            message_type: MessageType::Request(request),
        }
    }

    fn raw_request(method: &str, args: Vec<Value>) -> Vec<u8> {
        internal::DHTMessage::Request(internal::DHTRequest {
            message_type: internal::REQUEST_TYPE,
            transaction_id: Id::random().to_vec(),
            node_id: Id::random().to_vec(),
            method: method.to_string(),
            args,
        })
        .to_bytes()
        .unwrap()
    }

    #[test]
    fn test_ping_request_wire_layout() {
        let message = request(RequestSpecific::Ping);

        let mut expected = b"d1:0i0e1:148:".to_vec();
        expected.extend(message.transaction_id.as_bytes());
        expected.extend(b"1:248:");
        expected.extend(message.sender_id.as_bytes());
        expected.extend(b"1:34:ping1:4lee");

        assert_eq!(message.to_bytes().unwrap(), expected);
    }

    #[test]
    fn test_ping_request() {
        let original_msg = request(RequestSpecific::Ping);

        let parsed_msg = Message::from_bytes(original_msg.to_bytes().unwrap()).unwrap();
        assert_eq!(parsed_msg, original_msg);
    }

    #[test]
    fn test_store_request() {
        let original_msg = request(RequestSpecific::Store(StoreRequestArguments {
            key: Id::random(),
            node_id: Id::random(),
            port: 3333,
        }));

        let parsed_msg = Message::from_bytes(original_msg.to_bytes().unwrap()).unwrap();
        assert_eq!(parsed_msg, original_msg);
    }

    #[test]
    fn test_find_value_request() {
        let original_msg = request(RequestSpecific::FindValue(FindValueRequestArguments {
            key: Id::random(),
        }));

        let parsed_msg = Message::from_bytes(original_msg.to_bytes().unwrap()).unwrap();
        assert_eq!(parsed_msg, original_msg);
    }

    #[test]
    fn test_find_node_response() {
        let original_msg = Message {
            transaction_id: Id::random(),
            sender_id: Id::random(),
            message_type: MessageType::Response(ResponseSpecific::Nodes(vec![
                Node::new(Id::random(), "49.50.52.52:5354".parse().unwrap()),
                Node::new(Id::random(), "[2001:db8::1]:4444".parse().unwrap()),
            ])),
        };

        let parsed_msg = Message::from_bytes(original_msg.to_bytes().unwrap()).unwrap();
        assert_eq!(parsed_msg, original_msg);
    }

    #[test]
    fn test_find_value_response() {
        let key = Id::random();
        let peer = Node::new(Id::random(), "123.123.123.123:123".parse().unwrap());

        let original_msg = Message {
            transaction_id: Id::random(),
            sender_id: Id::random(),
            message_type: MessageType::Response(ResponseSpecific::Value(
                FindValueResponseArguments {
                    key,
                    peers: vec![peer.clone()],
                },
            )),
        };

        let parsed_msg = Message::from_bytes(original_msg.to_bytes().unwrap()).unwrap();

        match parsed_msg.message_type {
            MessageType::Response(ResponseSpecific::Value(args)) => {
                assert_eq!(args.key, key);
                assert_eq!(args.peers, vec![peer]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_status_response_and_error() {
        let pong = Message {
            transaction_id: Id::random(),
            sender_id: Id::random(),
            message_type: MessageType::Response(ResponseSpecific::Status(
                PING_SUCCESS_RESPONSE.to_string(),
            )),
        };
        assert_eq!(Message::from_bytes(pong.to_bytes().unwrap()).unwrap(), pong);

        let error = Message {
            transaction_id: Id::random(),
            sender_id: Id::random(),
            message_type: MessageType::Error(ErrorSpecific {
                exception_type: "ValueError".to_string(),
                message: "bad token".to_string(),
            }),
        };
        assert_eq!(Message::from_bytes(error.to_bytes().unwrap()).unwrap(), error);
    }

    #[test]
    fn test_not_bencode() {
        assert!(matches!(
            Message::from_bytes(b"hello world"),
            Err(Error::Decode(_))
        ));
    }

    #[test]
    fn test_missing_header() {
        assert!(matches!(
            Message::from_bytes(b"d1:1i5ee"),
            Err(Error::Decode(_))
        ));
    }

    #[test]
    fn test_unknown_header() {
        assert!(matches!(
            Message::from_bytes(b"d1:0i7ee"),
            Err(Error::Decode(_))
        ));
    }

    #[test]
    fn test_known_header_missing_fields() {
        assert!(matches!(
            Message::from_bytes(b"d1:0i0ee"),
            Err(Error::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_unknown_method() {
        assert!(matches!(
            Message::from_bytes(raw_request("announce", vec![])),
            Err(Error::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_store_without_key() {
        assert!(matches!(
            Message::from_bytes(raw_request(STORE_METHOD, vec![])),
            Err(Error::ProtocolViolation(_))
        ));
        assert!(matches!(
            Message::from_bytes(raw_request(STORE_METHOD, vec![Value::Bytes(vec![])])),
            Err(Error::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_store_with_invalid_port() {
        let args = vec![
            Value::Bytes(Id::random().to_vec()),
            Value::Dict(HashMap::from([
                (STORE_NODE_ID_FIELD.to_vec(), Value::Bytes(Id::random().to_vec())),
                (STORE_PORT_FIELD.to_vec(), Value::Int(70000)),
            ])),
        ];

        assert!(matches!(
            Message::from_bytes(raw_request(STORE_METHOD, args)),
            Err(Error::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_find_node_argument_validation() {
        for args in [
            vec![],
            vec![Value::Bytes(vec![1; 20])],
            vec![
                Value::Bytes(Id::random().to_vec()),
                Value::Bytes(Id::random().to_vec()),
            ],
            vec![Value::Int(1)],
        ] {
            assert!(matches!(
                Message::from_bytes(raw_request(FIND_NODE_METHOD, args.clone())),
                Err(Error::ProtocolViolation(_))
            ));
            assert!(matches!(
                Message::from_bytes(raw_request(FIND_VALUE_METHOD, args)),
                Err(Error::ProtocolViolation(_))
            ));
        }
    }

    #[test]
    fn test_compact_node_wrong_length() {
        assert!(bytes_to_node(vec![0; ID_SIZE + 5]).is_err());
        assert!(bytes_to_node(vec![0; 10]).is_err());

        let node = Node::new(Id::random(), "10.0.0.1:4444".parse().unwrap());
        let bytes = node_to_bytes(&node);

        assert_eq!(bytes.len(), ID_SIZE + 6);
        assert_eq!(bytes_to_node(bytes).unwrap(), node);
    }
}
