//! Core data models for the gateway.
//!
//! `ContentObject` maps to the `objects` table via `sqlx::FromRow`; the
//! other types are views built from it and serialize as JSON via `serde`.

pub mod car;
pub mod content;
pub mod stat;
