pub mod context;
pub mod error;
pub mod packets;


pub use context::{CallOptions, Context};
pub use error::{MeshworkError, Result};
pub use packets::{
    ActionInfo, DisconnectPayload, DiscoverPayload, EventInfo, EventPayload, HeartbeatPayload,
    InfoPayload, Packet, RequestPayload, ResponsePayload, ServiceInfo,
};
