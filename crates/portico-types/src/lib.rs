//! Core types for the Portico embedded-context RPC protocol.
//!
//! This crate defines the data structures shared by the protocol crate and
//! its consumers: context identities, delivered envelopes, the transmissible
//! error record, the error taxonomy, and connection configuration. It contains
//! no protocol logic.

pub mod config;
pub mod context;
pub mod error;
pub mod record;

/// Serialized origin of a context whose origin is opaque (`file:`, `data:`).
pub const OPAQUE_ORIGIN: &str = "null";

/// Target origin that matches any receiver.
pub const ANY_ORIGIN: &str = "*";
