//! FTP server configuration and user table

/// Per-user permission level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    /// May browse and download but not mutate the filesystem
    ReadOnly,
    /// May also `STOR`, `MKD`, `RMD`, `DELE`, `RNFR`/`RNTO`
    ReadWrite,
}

impl Permission {
    /// `true` for [`Permission::ReadWrite`]
    pub fn can_write(self) -> bool {
        matches!(self, Permission::ReadWrite)
    }
}

/// A user-table entry: `{ name, password, permission }`
///
/// Authentication is a plain string comparison -- no hashing. This is
/// explicit and not a placeholder for something stronger.
#[derive(Debug, Clone)]
pub struct User {
    /// Login name, matched against the `USER` command's argument
    pub name: String,
    /// Login password, matched against the `PASS` command's argument
    pub password: String,
    /// Read-only or read-write
    pub permission: Permission,
}

impl User {
    /// Construct a new user record
    pub fn new(name: impl Into<String>, password: impl Into<String>, permission: Permission) -> Self {
        Self {
            name: name.into(),
            password: password.into(),
            permission,
        }
    }
}

/// Server configuration
///
/// # Example
///
/// ```
/// use ftp_rs::{Permission, ServerConfig, User};
///
/// let config = ServerConfig::new("/srv/ftp")
///     .with_user(User::new("alice", "hunter2", Permission::ReadWrite))
///     .with_user(User::new("guest", "guest", Permission::ReadOnly));
/// ```
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Interface to bind the control-channel listener to
    pub bind_host: String,
    /// Port to bind the control-channel listener to
    pub bind_port: u16,
    /// Real directory that serves as the virtual filesystem root
    pub virtual_root: std::path::PathBuf,
    /// Host to advertise in PASV replies; defaults to the control
    /// connection's local address when `None`
    pub advertised_host: Option<std::net::Ipv4Addr>,
    /// The user table
    pub users: Vec<User>,
    /// Bound on how long the server waits to accept/complete a data
    /// connection before replying 425/426
    pub data_timeout_seconds: u64,
    /// Maximum accepted control-line length before a 500 reply
    pub max_line_bytes: usize,
}

impl ServerConfig {
    /// Construct a configuration rooted at `virtual_root`, bound to
    /// `0.0.0.0:2121` by default with no PASV host override, no users,
    /// a 30s data timeout, and an 8192-byte line cap.
    pub fn new(virtual_root: impl Into<std::path::PathBuf>) -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            bind_port: 2121,
            virtual_root: virtual_root.into(),
            advertised_host: None,
            users: Vec::new(),
            data_timeout_seconds: 30,
            max_line_bytes: 8192,
        }
    }

    /// Set the bind address (host and port)
    pub fn with_bind(mut self, host: impl Into<String>, port: u16) -> Self {
        self.bind_host = host.into();
        self.bind_port = port;
        self
    }

    /// Override the PASV-advertised host (NAT configuration)
    pub fn with_advertised_host(mut self, host: std::net::Ipv4Addr) -> Self {
        self.advertised_host = Some(host);
        self
    }

    /// Append a user to the table
    pub fn with_user(mut self, user: User) -> Self {
        self.users.push(user);
        self
    }

    /// Set the data-channel accept/transfer timeout, in seconds
    pub fn with_data_timeout(mut self, seconds: u64) -> Self {
        self.data_timeout_seconds = seconds;
        self
    }

    /// Set the maximum accepted control-line length
    pub fn with_max_line_bytes(mut self, bytes: usize) -> Self {
        self.max_line_bytes = bytes;
        self
    }

    /// Look up a user by name and password; plain string comparison.
    pub fn authenticate(&self, name: &str, password: &str) -> Option<&User> {
        self.users
            .iter()
            .find(|u| u.name == name && u.password == password)
    }
}
