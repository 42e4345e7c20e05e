//! Meshwork Common Types and Transporter Abstraction
//!
//! This crate provides the protocol definitions, error types, payload
//! serializer and the transporter abstraction shared by every Meshwork
//! component.
//!
//! # Overview
//!
//! Meshwork is a distributed service broker: many identical runtime
//! instances ("nodes") discover each other, exchange service catalogs and
//! route action calls and events between each other as if they were local.
//! This crate contains the pieces all of them agree on:
//!
//! - **Protocol Layer**: discovery and request/event packet payloads,
//!   error handling, and the per-call [`Context`]
//! - **Serializer**: packet payload encoding (JSON)
//! - **Transporter**: the interface the broker uses to move opaque packets
//!   between nodes, plus an in-process channel implementation
//!
//! # Components
//!
//! - [`protocol`] - Packet payloads, [`Packet`], errors, [`Context`]
//! - [`serializer`] - [`Serializer`](serializer::Serializer) for packet bytes
//! - [`transporter`] - [`Transporter`](transporter::Transporter) trait and
//!   the in-process [`ChannelTransporter`](transporter::ChannelTransporter)
//!
//! # Example
//!
//! ```
//! use meshwork_common::{Packet, HeartbeatPayload};
//! use meshwork_common::serializer::Serializer;
//!
//! let packet = Packet::Heartbeat(HeartbeatPayload {
//!     sender: "node-1".to_string(),
//!     seq: 3,
//!     cpu: Some(12.5),
//!     timestamp: 0,
//! });
//!
//! let serializer = Serializer::new();
//! let bytes = serializer.serialize(&packet).unwrap();
//! let decoded = serializer.deserialize(&bytes).unwrap();
//! assert_eq!(decoded.topic(), "HEARTBEAT");
//! ```

pub mod protocol;
pub mod serializer;
pub mod transporter;

pub use protocol::*;
pub use serializer::Serializer;
pub use transporter::{Target, Transporter};
