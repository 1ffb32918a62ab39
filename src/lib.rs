//! # ja3net
//!
//! HTTP transport core that presents a configurable TLS ClientHello and
//! routes connections through upstream proxies.
//!
//! ## Features
//!
//! - **Fingerprinted TLS**: JA3 strings or named browser profiles compiled
//!   into a BoringSSL configuration
//! - **Proxy tunnels**: CONNECT over HTTP/1.1 and HTTP/2 (with tunnel reuse),
//!   SOCKS4, SOCKS5 and SOCKS5h
//! - **ALPN-driven transports**: HTTP/1.1 or HTTP/2 per address, chosen after
//!   the handshake, with single-flight negotiation under concurrency
//! - **Browser HTTP/2 settings** derived from the user agent
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use ja3net::Client;
//!
//! #[tokio::main]
//! async fn main() {
//!     let client = Client::builder()
//!         .proxy("socks5h://127.0.0.1:9050")
//!         .signature("firefox")
//!         .build()
//!         .unwrap();
//!     let response = client.get("https://example.com").send().await.unwrap();
//!     println!("Status: {}", response.status());
//! }
//! ```
//!
//! ## Modules
//!
//! - [`base`] - Error types and error classification
//! - [`cookies`] - Static cookie descriptors
//! - [`http`] - Transports and the transport manager
//! - [`socket`] - Dialers, proxy tunnels and TLS

pub mod base;
pub mod client;
pub mod cookies;
pub mod http;
pub mod socket;

pub use base::classify::{classify, ErrorReport};
pub use base::neterror::NetError;
pub use client::{BrowserConfig, Client, ClientBuilder};
pub use cookies::CookieDescriptor;
