//! HTTP transports and the per-address transport manager.

pub mod cache;
pub mod h2settings;
pub mod roundtripper;
pub mod transport;

pub use h2settings::{H2Settings, Navigator};
pub use roundtripper::{Handshake, ManagerOptions, TransportManager};
pub use transport::{Body, Transport};
