//! API Module
//!
//! REST API exposing operations reports.

pub mod rest;
pub mod server;

pub use rest::*;
pub use server::*;
