//! Server side of the control/data protocol: one session per control
//! connection, plus the listener that accepts and spawns them.

mod listener;
mod session;

pub use listener::FtpServer;
pub use session::Session;
