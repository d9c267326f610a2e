//! HTTP transport layer
//!
//! Exposes import sessions to the presentation layer over REST.

pub mod handlers;
pub mod sessions;
