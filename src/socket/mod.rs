//! Socket and connection establishment.
//!
//! - [`dialer`]: direct TCP dials and the [`Dial`](dialer::Dial) seam
//! - [`tunnel`]: CONNECT tunnels over HTTP/1.1 and HTTP/2
//! - [`socks`]: SOCKS4/5 proxies
//! - [`h2stream`]: one HTTP/2 CONNECT exchange as a byte stream
//! - [`tls`]: TLS handshakes with a configurable ClientHello

pub mod dialer;
pub mod h2stream;
pub mod proxy;
pub mod socks;
pub mod stream;
pub mod tls;
pub mod tunnel;

pub use dialer::{Dial, DirectDialer};
pub use proxy::{ProxyEndpoint, ProxyType};
pub use stream::{BoxedSocket, TunnelStream};
pub use tunnel::TunnelDialer;
