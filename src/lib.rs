#![doc = include_str!("../README.md")]

/// Control/data command line framing: verb parsing and line reading
pub mod command;
/// Client side of the control/data protocol
mod client;
/// Server configuration and user table
mod config;
/// Client- and server-facing error types
mod error;
/// Wire-level reply encoding/decoding
pub mod reply;
/// Control-channel listener and per-connection session state machine
pub mod server;
/// Chrooted virtual filesystem: path resolution and listing formatting
pub mod vfs;

pub use client::{FtpClient, TransferType};
pub use config::{Permission, ServerConfig, User};
pub use error::{FtpError, Result, ServerError, ServerResult};
pub use reply::Reply;
pub use server::FtpServer;
