//! Base types and error handling.
//!
//! - [`NetError`](neterror::NetError): the crate error taxonomy
//! - [`classify`](classify::classify): maps any error onto a status code report

pub mod classify;
pub mod neterror;
