//! Per-connection session state machine: login stage, dispatch table,
//! command handlers, and PASV listener lifecycle.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::trace;

use crate::command::{self, Command, ReadLine};
use crate::config::{ServerConfig, User};
use crate::error::{FtpError, ServerError, ServerResult};
use crate::reply::{self, Reply};
use crate::vfs;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransferType {
    Ascii,
    Image,
}

#[derive(Debug)]
enum LoginStage {
    AwaitingUser,
    AwaitingPass(String),
    Authenticated,
}

/// A PASV listener the client has not yet connected a data socket to.
struct PendingPasv {
    listener: TcpListener,
}

/// One FTP control connection and its associated session state.
///
/// Holds exactly what one session needs: login stage, current virtual
/// directory, transfer type, at most one pending PASV listener, and at
/// most one pending rename source.
pub struct Session {
    stream: BufReader<TcpStream>,
    peer_addr: SocketAddr,
    local_addr: SocketAddr,
    config: Arc<ServerConfig>,
    login_stage: LoginStage,
    user: Option<User>,
    current_dir: String,
    transfer_type: TransferType,
    pending_pasv: Option<PendingPasv>,
    pending_rename_source: Option<String>,
}

/// Static pre-dispatch requirements for one verb: whether it needs an
/// authenticated session, whether it needs write permission, and whether
/// it needs a non-empty argument. `None` for an unrecognized verb.
struct VerbSpec {
    requires_auth: bool,
    requires_write: bool,
    argument_required: bool,
}

fn verb_spec(verb: &str) -> Option<VerbSpec> {
    let spec = |requires_auth, requires_write, argument_required| {
        Some(VerbSpec { requires_auth, requires_write, argument_required })
    };
    match verb {
        "USER" => spec(false, false, true),
        "PASS" => spec(false, false, true),
        "PWD" => spec(true, false, false),
        "CWD" => spec(true, false, true),
        "CDUP" => spec(true, false, false),
        "TYPE" => spec(true, false, true),
        "PASV" => spec(true, false, false),
        "LIST" => spec(true, false, false),
        "RETR" => spec(true, false, true),
        "STOR" => spec(true, true, true),
        "MKD" => spec(true, true, true),
        "RMD" => spec(true, true, true),
        "DELE" => spec(true, true, true),
        "RNFR" => spec(true, true, true),
        "RNTO" => spec(true, true, true),
        "QUIT" => spec(false, false, false),
        "NOOP" => spec(false, false, false),
        "SYST" => spec(false, false, false),
        _ => None,
    }
}

/// Turn a path-resolution error into the reply it should produce. Every
/// [`FtpError`] this crate's own [`vfs`] module raises is already a
/// [`FtpError::Command`] coded 550; this only needs a fallback for the
/// general case.
fn ftp_error_reply(err: FtpError) -> Reply {
    match err {
        FtpError::Command { code, text } => Reply::new(code, text),
        other => Reply::new(550, other.to_string()),
    }
}

impl Session {
    pub(crate) fn new(
        stream: TcpStream,
        peer_addr: SocketAddr,
        local_addr: SocketAddr,
        config: Arc<ServerConfig>,
    ) -> Self {
        Self {
            stream: BufReader::new(stream),
            peer_addr,
            local_addr,
            config,
            login_stage: LoginStage::AwaitingUser,
            user: None,
            current_dir: "/".to_string(),
            transfer_type: TransferType::Ascii,
            pending_pasv: None,
            pending_rename_source: None,
        }
    }

    /// Send the greeting and drive the command loop until the peer closes
    /// the connection, sends `QUIT`, or the control channel fails.
    pub async fn serve(mut self) -> ServerResult<()> {
        trace!(peer = %self.peer_addr, "session started");
        self.write_reply(Reply::new(220, "Service ready")).await?;

        loop {
            match command::read_command_line(&mut self.stream, self.config.max_line_bytes).await {
                Ok(ReadLine::Eof) => return Ok(()),
                Ok(ReadLine::Empty) => continue,
                Ok(ReadLine::Oversized) => {
                    self.write_reply(Reply::new(500, "Line too long")).await?;
                    continue;
                }
                Ok(ReadLine::Line(line)) => {
                    let cmd = Command::parse(&line);
                    trace!(peer = %self.peer_addr, verb = %cmd.verb, "< command");
                    match self.dispatch(cmd).await {
                        Ok(()) => {}
                        Err(ServerError::ConnectionClosed) => return Ok(()),
                        Err(e) => return Err(e),
                    }
                }
                Err(e) => return Err(ServerError::Io(e)),
            }
        }
    }

    async fn dispatch(&mut self, cmd: Command) -> ServerResult<()> {
        // `pending_rename_source` is cleared by the next command, whatever
        // it turns out to be, regardless of outcome. Only `RNTO` consumes
        // the value taken here; every other verb (including a fresh
        // `RNFR`) just drops it.
        let pending_rename = self.pending_rename_source.take();

        let Some(spec) = verb_spec(&cmd.verb) else {
            return self
                .write_reply(Reply::new(500, format!("Unrecognized command {}", cmd.verb)))
                .await;
        };
        if spec.argument_required && cmd.argument.is_empty() {
            return self.write_reply(Reply::new(501, "Missing argument")).await;
        }
        if spec.requires_auth && !self.is_authenticated() {
            return self.write_reply(Reply::new(530, "Please log in with USER and PASS")).await;
        }
        if spec.requires_write && !self.can_write() {
            return self.write_reply(Reply::new(550, "Permission denied")).await;
        }

        match cmd.verb.as_str() {
            "USER" => self.handle_user(&cmd.argument).await,
            "PASS" => self.handle_pass(&cmd.argument).await,
            "PWD" => self.handle_pwd().await,
            "CWD" => self.handle_cwd(&cmd.argument).await,
            "CDUP" => self.handle_cwd("..").await,
            "TYPE" => self.handle_type(&cmd.argument).await,
            "PASV" => self.handle_pasv().await,
            "LIST" => self.handle_list(&cmd.argument).await,
            "RETR" => self.handle_retr(&cmd.argument).await,
            "STOR" => self.handle_stor(&cmd.argument).await,
            "MKD" => self.handle_mkd(&cmd.argument).await,
            "RMD" => self.handle_rmd(&cmd.argument).await,
            "DELE" => self.handle_dele(&cmd.argument).await,
            "RNFR" => self.handle_rnfr(&cmd.argument).await,
            "RNTO" => self.handle_rnto(&cmd.argument, pending_rename).await,
            "QUIT" => self.handle_quit().await,
            "NOOP" => self.write_reply(Reply::new(200, "OK")).await,
            "SYST" => self.write_reply(Reply::new(215, "UNIX Type: L8")).await,
            _ => unreachable!("verb_spec and this match must stay in sync"),
        }
    }

    fn is_authenticated(&self) -> bool {
        matches!(self.login_stage, LoginStage::Authenticated)
    }

    fn can_write(&self) -> bool {
        self.user.as_ref().is_some_and(|u| u.permission.can_write())
    }

    async fn write_reply(&mut self, reply: Reply) -> ServerResult<()> {
        trace!(peer = %self.peer_addr, code = reply.code, "> reply");
        self.stream.get_mut().write_all(reply.encode().as_bytes()).await?;
        self.stream.get_mut().flush().await?;
        Ok(())
    }

    async fn handle_user(&mut self, name: &str) -> ServerResult<()> {
        // USER is accepted in any login stage and restarts the handshake.
        self.login_stage = LoginStage::AwaitingPass(name.to_string());
        self.user = None;
        self.write_reply(Reply::new(331, "Password required")).await
    }

    async fn handle_pass(&mut self, password: &str) -> ServerResult<()> {
        let name = match &self.login_stage {
            LoginStage::AwaitingPass(name) => name.clone(),
            _ => return self.write_reply(Reply::new(530, "Login with USER first")).await,
        };

        match self.config.authenticate(&name, password) {
            Some(user) => {
                let user = user.clone();
                self.login_stage = LoginStage::Authenticated;
                self.user = Some(user);
                self.write_reply(Reply::new(230, "User logged in, proceed")).await
            }
            None => {
                self.login_stage = LoginStage::AwaitingUser;
                self.write_reply(Reply::new(530, "Login incorrect")).await
            }
        }
    }

    async fn handle_pwd(&mut self) -> ServerResult<()> {
        let text = command::quote_path(&self.current_dir);
        self.write_reply(Reply::new(257, text)).await
    }

    async fn handle_cwd(&mut self, path: &str) -> ServerResult<()> {
        let real_path = match vfs::resolve_existing(&self.config.virtual_root, &self.current_dir, path).await {
            Ok(p) => p,
            Err(e) => return self.write_reply(ftp_error_reply(e)).await,
        };
        match tokio::fs::metadata(&real_path).await {
            Ok(meta) if meta.is_dir() => {
                let (virtual_path, _) = vfs::resolve_virtual(&self.config.virtual_root, &self.current_dir, path);
                self.current_dir = virtual_path;
                self.write_reply(Reply::new(250, "Directory changed")).await
            }
            Ok(_) => self.write_reply(Reply::new(550, "Not a directory")).await,
            Err(e) => self.write_reply(Reply::new(550, format!("{e}"))).await,
        }
    }

    async fn handle_type(&mut self, arg: &str) -> ServerResult<()> {
        if arg.eq_ignore_ascii_case("A") {
            self.transfer_type = TransferType::Ascii;
            self.write_reply(Reply::new(200, "Type set to A")).await
        } else if arg.eq_ignore_ascii_case("I") {
            self.transfer_type = TransferType::Image;
            self.write_reply(Reply::new(200, "Type set to I")).await
        } else {
            self.write_reply(Reply::new(504, "Unsupported type")).await
        }
    }

    async fn handle_pasv(&mut self) -> ServerResult<()> {
        // At most one pending listener per session; opening a new one
        // drops (and so closes) any previous one still waiting.
        self.pending_pasv = None;

        let bind_ip = match self.local_addr.ip() {
            IpAddr::V4(v4) => v4,
            IpAddr::V6(_) => Ipv4Addr::UNSPECIFIED,
        };
        let listener = match bind_pasv_listener(bind_ip) {
            Ok(l) => l,
            Err(e) => return self.write_reply(Reply::new(425, format!("Cannot open data connection: {e}"))).await,
        };
        let port = match listener.local_addr() {
            Ok(addr) => addr.port(),
            Err(e) => return self.write_reply(Reply::new(425, format!("{e}"))).await,
        };
        let advertised = self.config.advertised_host.unwrap_or(bind_ip);

        self.pending_pasv = Some(PendingPasv { listener });
        self.write_reply(Reply::new(227, reply::encode_pasv(advertised, port))).await
    }

    async fn accept_data_connection(&self, pending: PendingPasv) -> std::io::Result<TcpStream> {
        let bound = Duration::from_secs(self.config.data_timeout_seconds);
        match tokio::time::timeout(bound, pending.listener.accept()).await {
            Ok(Ok((stream, _))) => Ok(stream),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "data connection accept timed out")),
        }
    }

    async fn handle_list(&mut self, arg: &str) -> ServerResult<()> {
        // spec.md §4.4 pins LIST's missing-PASV reply to 500 specifically
        // (RETR/STOR have no such pinned code and stay at 503, per §8's
        // "503 or 425" umbrella).
        let Some(pending) = self.pending_pasv.take() else {
            return self.write_reply(Reply::new(500, "PASV must be issued first")).await;
        };

        let path = if arg.is_empty() { self.current_dir.clone() } else { arg.to_string() };
        let real_path = match vfs::resolve_existing(&self.config.virtual_root, &self.current_dir, &path).await {
            Ok(p) => p,
            Err(e) => return self.write_reply(ftp_error_reply(e)).await,
        };

        let mut entries = match tokio::fs::read_dir(&real_path).await {
            Ok(rd) => rd,
            Err(e) => return self.write_reply(Reply::new(550, format!("{e}"))).await,
        };
        let mut listing = String::new();
        loop {
            match entries.next_entry().await {
                Ok(Some(entry)) => {
                    let Ok(metadata) = entry.metadata().await else { continue };
                    let name = entry.file_name().to_string_lossy().into_owned();
                    listing.push_str(&vfs::format_listing_entry(&name, &metadata));
                    listing.push_str("\r\n");
                }
                Ok(None) => break,
                Err(e) => return self.write_reply(Reply::new(550, format!("{e}"))).await,
            }
        }

        let mut data_stream = match self.accept_data_connection(pending).await {
            Ok(s) => s,
            Err(_) => return self.write_reply(Reply::new(425, "No data connection")).await,
        };
        self.write_reply(Reply::new(150, "Opening data connection for directory listing")).await?;

        let result = data_stream.write_all(listing.as_bytes()).await;
        drop(data_stream);
        match result {
            Ok(()) => self.write_reply(Reply::new(226, "Transfer complete")).await,
            Err(e) => self.write_reply(Reply::new(426, format!("{e}"))).await,
        }
    }

    async fn handle_retr(&mut self, arg: &str) -> ServerResult<()> {
        let Some(pending) = self.pending_pasv.take() else {
            return self.write_reply(Reply::new(503, "PASV must be issued first")).await;
        };

        let real_path = match vfs::resolve_existing(&self.config.virtual_root, &self.current_dir, arg).await {
            Ok(p) => p,
            Err(e) => return self.write_reply(ftp_error_reply(e)).await,
        };
        let is_file = tokio::fs::metadata(&real_path).await.map(|m| m.is_file()).unwrap_or(false);
        if !is_file {
            return self.write_reply(Reply::new(550, "File not found")).await;
        }
        let mut file = match tokio::fs::File::open(&real_path).await {
            Ok(f) => f,
            Err(e) => return self.write_reply(Reply::new(550, format!("{e}"))).await,
        };

        let mut data_stream = match self.accept_data_connection(pending).await {
            Ok(s) => s,
            Err(_) => return self.write_reply(Reply::new(425, "No data connection")).await,
        };
        self.write_reply(Reply::new(150, "Opening data connection")).await?;

        let result = tokio::io::copy(&mut file, &mut data_stream).await;
        drop(data_stream);
        match result {
            Ok(_) => self.write_reply(Reply::new(226, "Transfer complete")).await,
            Err(e) => self.write_reply(Reply::new(426, format!("{e}"))).await,
        }
    }

    async fn handle_stor(&mut self, arg: &str) -> ServerResult<()> {
        let Some(pending) = self.pending_pasv.take() else {
            return self.write_reply(Reply::new(503, "PASV must be issued first")).await;
        };

        let real_path = match vfs::resolve_parent(&self.config.virtual_root, &self.current_dir, arg).await {
            Ok(p) => p,
            Err(e) => return self.write_reply(ftp_error_reply(e)).await,
        };
        // Truncate-and-overwrite: STOR never appends to an existing file.
        let mut file = match tokio::fs::File::create(&real_path).await {
            Ok(f) => f,
            Err(e) => return self.write_reply(Reply::new(550, format!("{e}"))).await,
        };

        let mut data_stream = match self.accept_data_connection(pending).await {
            Ok(s) => s,
            Err(_) => return self.write_reply(Reply::new(425, "No data connection")).await,
        };
        self.write_reply(Reply::new(150, "Opening data connection")).await?;

        let result = tokio::io::copy(&mut data_stream, &mut file).await;
        drop(data_stream);
        match result {
            Ok(_) => self.write_reply(Reply::new(226, "Transfer complete")).await,
            Err(e) => self.write_reply(Reply::new(426, format!("{e}"))).await,
        }
    }

    async fn handle_mkd(&mut self, arg: &str) -> ServerResult<()> {
        let real_path = match vfs::resolve_parent(&self.config.virtual_root, &self.current_dir, arg).await {
            Ok(p) => p,
            Err(e) => return self.write_reply(ftp_error_reply(e)).await,
        };
        match tokio::fs::create_dir(&real_path).await {
            Ok(()) => {
                let (virtual_path, _) = vfs::resolve_virtual(&self.config.virtual_root, &self.current_dir, arg);
                self.write_reply(Reply::new(257, command::quote_path(&virtual_path))).await
            }
            Err(e) => self.write_reply(Reply::new(550, format!("{e}"))).await,
        }
    }

    async fn handle_rmd(&mut self, arg: &str) -> ServerResult<()> {
        let real_path = match vfs::resolve_existing(&self.config.virtual_root, &self.current_dir, arg).await {
            Ok(p) => p,
            Err(e) => return self.write_reply(ftp_error_reply(e)).await,
        };
        match tokio::fs::metadata(&real_path).await {
            Ok(meta) if meta.is_dir() => match tokio::fs::remove_dir(&real_path).await {
                Ok(()) => self.write_reply(Reply::new(250, "Directory removed")).await,
                Err(e) => self.write_reply(Reply::new(550, format!("{e}"))).await,
            },
            _ => self.write_reply(Reply::new(550, "Not a directory")).await,
        }
    }

    async fn handle_dele(&mut self, arg: &str) -> ServerResult<()> {
        let real_path = match vfs::resolve_existing(&self.config.virtual_root, &self.current_dir, arg).await {
            Ok(p) => p,
            Err(e) => return self.write_reply(ftp_error_reply(e)).await,
        };
        match tokio::fs::metadata(&real_path).await {
            Ok(meta) if meta.is_file() => match tokio::fs::remove_file(&real_path).await {
                Ok(()) => self.write_reply(Reply::new(250, "File deleted")).await,
                Err(e) => self.write_reply(Reply::new(550, format!("{e}"))).await,
            },
            _ => self.write_reply(Reply::new(550, "Not a regular file")).await,
        }
    }

    async fn handle_rnfr(&mut self, arg: &str) -> ServerResult<()> {
        match vfs::resolve_existing(&self.config.virtual_root, &self.current_dir, arg).await {
            Ok(_) => {
                let (virtual_path, _) = vfs::resolve_virtual(&self.config.virtual_root, &self.current_dir, arg);
                self.pending_rename_source = Some(virtual_path);
                self.write_reply(Reply::new(350, "Ready for RNTO")).await
            }
            Err(e) => self.write_reply(ftp_error_reply(e)).await,
        }
    }

    async fn handle_rnto(&mut self, arg: &str, pending: Option<String>) -> ServerResult<()> {
        let Some(source_virtual) = pending else {
            return self.write_reply(Reply::new(503, "RNFR required first")).await;
        };
        let source_real = match vfs::resolve_existing(&self.config.virtual_root, &self.current_dir, &source_virtual).await {
            Ok(p) => p,
            Err(e) => return self.write_reply(ftp_error_reply(e)).await,
        };
        let dest_real = match vfs::resolve_parent(&self.config.virtual_root, &self.current_dir, arg).await {
            Ok(p) => p,
            Err(e) => return self.write_reply(ftp_error_reply(e)).await,
        };
        match tokio::fs::rename(&source_real, &dest_real).await {
            Ok(()) => self.write_reply(Reply::new(250, "Rename successful")).await,
            Err(e) => self.write_reply(Reply::new(550, format!("{e}"))).await,
        }
    }

    async fn handle_quit(&mut self) -> ServerResult<()> {
        self.write_reply(Reply::new(221, "Goodbye")).await?;
        Err(ServerError::ConnectionClosed)
    }
}

fn bind_pasv_listener(bind_ip: Ipv4Addr) -> std::io::Result<TcpListener> {
    use socket2::{Domain, Socket, Type};

    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(socket2::Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    let addr: SocketAddr = (bind_ip, 0).into();
    socket.bind(&addr.into())?;
    // Exactly one data connection is ever expected per PASV listener.
    socket.listen(1)?;
    socket.set_nonblocking(true)?;
    TcpListener::from_std(socket.into())
}
