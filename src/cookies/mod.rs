//! Static cookies attached to outgoing requests.

pub mod descriptor;

pub use descriptor::{cookie_header, CookieDescriptor};
