//! Packet payload serializer.
//!
//! The transporter moves opaque byte blobs; this module decides what those
//! bytes look like. JSON is the only built-in format, but the enum leaves
//! room for future ones (MessagePack, CBOR, etc.) without touching callers.

use crate::protocol::{Packet, Result};

/// Serializer for transporter packets.
///
/// # Example
///
/// ```
/// use meshwork_common::serializer::Serializer;
/// use meshwork_common::{Packet, DiscoverPayload};
///
/// let serializer = Serializer::new();
/// let packet = Packet::Discover(DiscoverPayload { sender: "node-1".into() });
///
/// let bytes = serializer.serialize(&packet).unwrap();
/// let decoded = serializer.deserialize(&bytes).unwrap();
/// assert_eq!(decoded, packet);
/// ```
#[derive(Debug, Clone, Default)]
pub enum Serializer {
    /// JSON serializer (currently the only supported format).
    #[default]
    Json,
}

impl Serializer {
    pub fn new() -> Self {
        Serializer::Json
    }

    /// Encodes a packet to bytes.
    pub fn serialize(&self, packet: &Packet) -> Result<Vec<u8>> {
        match self {
            Serializer::Json => Ok(serde_json::to_vec(packet)?),
        }
    }

    /// Decodes a packet from bytes.
    pub fn deserialize(&self, data: &[u8]) -> Result<Packet> {
        match self {
            Serializer::Json => Ok(serde_json::from_slice(data)?),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{DisconnectPayload, HeartbeatPayload};

    #[test]
    fn test_serialize_roundtrip() {
        let serializer = Serializer::new();
        let packet = Packet::Heartbeat(HeartbeatPayload {
            sender: "node-1".to_string(),
            seq: 12,
            cpu: None,
            timestamp: 99,
        });
        let bytes = serializer.serialize(&packet).unwrap();
        assert_eq!(serializer.deserialize(&bytes).unwrap(), packet);
    }

    #[test]
    fn test_deserialize_garbage_is_an_error() {
        let serializer = Serializer::new();
        assert!(serializer.deserialize(b"not json at all").is_err());
    }

    #[test]
    fn test_json_output_is_tagged() {
        let serializer = Serializer::new();
        let packet = Packet::Disconnect(DisconnectPayload {
            sender: "node-9".to_string(),
        });
        let bytes = serializer.serialize(&packet).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("\"DISCONNECT\""));
    }
}
