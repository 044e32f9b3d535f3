//! Self-hosted IPFS-style gateway: content-addressed storage on local disk,
//! metadata in SQLite, served over HTTP and driven from the CLI.

pub mod cid;
pub mod commands;
pub mod config;
pub mod db;
pub mod errors;
pub mod handlers;
pub mod mime_type;
pub mod models;
pub mod routes;
pub mod services;
