pub mod bus;
pub mod engine;
pub mod health;

pub use bus::{BusClient, BusMessage, Heartbeat, MemoryBus, WireRequest, WireResponse};
pub use engine::{Engine, ReadinessCheck};
pub use health::{health_router, serve_health_probes};
