//! Domain Module
//!
//! Collaborator contracts (ports) between the expansion core and the cluster.

pub mod ports;

pub use ports::*;
