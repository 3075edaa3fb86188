use serde::{Deserialize, Serialize};
use serde_bencode::value::Value;

pub const REQUEST_TYPE: i64 = 0;
pub const RESPONSE_TYPE: i64 = 1;
pub const ERROR_TYPE: i64 = 2;

/// Only the message type selector, decoded before anything else.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct DHTHeader {
    #[serde(rename = "0", default)]
    pub message_type: Option<i64>,
}

impl DHTHeader {
    pub fn from_bytes(bytes: &[u8]) -> Result<DHTHeader, serde_bencode::Error> {
        serde_bencode::from_bytes(bytes)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DHTRequest {
    #[serde(rename = "0")]
    pub message_type: i64,

    #[serde(rename = "1", with = "serde_bytes")]
    pub transaction_id: Vec<u8>,

    #[serde(rename = "2", with = "serde_bytes")]
    pub node_id: Vec<u8>,

    #[serde(rename = "3")]
    pub method: String,

    #[serde(rename = "4", default)]
    pub args: Vec<Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DHTResponse {
    #[serde(rename = "0")]
    pub message_type: i64,

    #[serde(rename = "1", with = "serde_bytes")]
    pub transaction_id: Vec<u8>,

    #[serde(rename = "2", with = "serde_bytes")]
    pub node_id: Vec<u8>,

    #[serde(rename = "3")]
    pub payload: Value,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DHTError {
    #[serde(rename = "0")]
    pub message_type: i64,

    #[serde(rename = "1", with = "serde_bytes")]
    pub transaction_id: Vec<u8>,

    #[serde(rename = "2", with = "serde_bytes")]
    pub node_id: Vec<u8>,

    #[serde(rename = "3")]
    pub exception_type: String,

    #[serde(rename = "4", default)]
    pub message: String,
}

/// One of the three wire documents, after the header selected it.
#[derive(Debug, Clone, PartialEq)]
pub enum DHTMessage {
    Request(DHTRequest),
    Response(DHTResponse),
    Error(DHTError),
}

/// Why a datagram could not be turned into a [DHTMessage].
#[derive(Debug)]
pub enum DHTDecodeError {
    /// Not bencode, or no usable type selector.
    Header(String),
    /// Valid selector, but the document does not fit its shape.
    Body(serde_bencode::Error),
}

impl DHTMessage {
    pub fn from_bytes(bytes: &[u8]) -> Result<DHTMessage, DHTDecodeError> {
        let header =
            DHTHeader::from_bytes(bytes).map_err(|e| DHTDecodeError::Header(e.to_string()))?;

        match header.message_type {
            Some(REQUEST_TYPE) => serde_bencode::from_bytes(bytes)
                .map(DHTMessage::Request)
                .map_err(DHTDecodeError::Body),
            Some(RESPONSE_TYPE) => serde_bencode::from_bytes(bytes)
                .map(DHTMessage::Response)
                .map_err(DHTDecodeError::Body),
            Some(ERROR_TYPE) => serde_bencode::from_bytes(bytes)
                .map(DHTMessage::Error)
                .map_err(DHTDecodeError::Body),
            Some(other) => Err(DHTDecodeError::Header(format!(
                "invalid message type: {other}"
            ))),
            None => Err(DHTDecodeError::Header(
                "decoded data has no message type".to_string(),
            )),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_bencode::Error> {
        match self {
            DHTMessage::Request(request) => serde_bencode::to_bytes(request),
            DHTMessage::Response(response) => serde_bencode::to_bytes(response),
            DHTMessage::Error(error) => serde_bencode::to_bytes(error),
        }
    }
}
