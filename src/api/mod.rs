//! HTTP handlers for the service surface.

pub mod chat;
pub mod ingest;
pub mod sessions;
