//! FTP client: control-channel session driver and data-channel transfers

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::command::{self, parse_quoted_path};
use crate::error::{FtpError, Result};
use crate::reply::{self, Reply};

/// Advertised transfer type; advisory only, bytes always move verbatim
/// regardless of which type is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferType {
    /// `TYPE A`
    Ascii,
    /// `TYPE I`
    Image,
}

/// An FTP client control connection
///
/// All operations are synchronous with respect to the control channel:
/// callers must not issue overlapping commands on one connection.
pub struct FtpClient {
    stream: BufReader<TcpStream>,
    peer_addr: SocketAddr,
    transfer_type: TransferType,
}

impl FtpClient {
    /// Open a TCP connection to `host:port` and consume the greeting.
    ///
    /// Succeeds only on a 220 reply (possibly multi-line); any other
    /// code or an I/O failure is an error.
    pub async fn connect(host: &str, port: u16) -> Result<Self> {
        debug!("connecting to FTP server {host}:{port}");
        let addr = format!("{host}:{port}");
        let socket_addr: SocketAddr = tokio::net::lookup_host(&addr)
            .await?
            .next()
            .ok_or_else(|| FtpError::Connection(format!("could not resolve {addr}")))?;

        let tcp = timeout(DEFAULT_CONNECT_TIMEOUT, TcpStream::connect(socket_addr))
            .await
            .map_err(|_| FtpError::Connection(format!("connect to {addr} timed out")))??;
        let peer_addr = tcp.peer_addr()?;

        let mut client = FtpClient {
            stream: BufReader::new(tcp),
            peer_addr,
            transfer_type: TransferType::Image,
        };

        let reply = client.read_reply().await?;
        if reply.code != 220 {
            return Err(FtpError::Connection(format!(
                "unexpected greeting {}: {}",
                reply.code, reply.text
            )));
        }
        Ok(client)
    }

    /// `USER` then, if requested, `PASS`.
    pub async fn login(&mut self, user: &str, password: &str) -> Result<()> {
        let reply = self.command(&command::build_with_arg("USER", user)).await?;
        match reply.code {
            230 => return Ok(()),
            331 => {}
            code => {
                return Err(FtpError::Auth {
                    code,
                    text: reply.text,
                })
            }
        }

        let reply = self
            .command(&command::build_with_arg("PASS", password))
            .await?;
        if reply.code == 230 {
            Ok(())
        } else {
            Err(FtpError::Auth {
                code: reply.code,
                text: reply.text,
            })
        }
    }

    /// `PWD`: returns the current virtual directory
    pub async fn pwd(&mut self) -> Result<String> {
        let reply = self.command(&command::build("PWD")).await?;
        if reply.code != 257 {
            return Err(FtpError::Command {
                code: reply.code,
                text: reply.text,
            });
        }
        parse_quoted_path(&reply.text)
    }

    /// `CWD path`
    pub async fn cwd(&mut self, path: &str) -> Result<()> {
        self.expect_ok(&command::build_with_arg("CWD", path), &[250])
            .await
    }

    /// `CDUP` (`CWD ..`)
    pub async fn cdup(&mut self) -> Result<()> {
        self.expect_ok(&command::build("CDUP"), &[200, 250]).await
    }

    /// `MKD path`
    pub async fn mkd(&mut self, path: &str) -> Result<String> {
        let reply = self.command(&command::build_with_arg("MKD", path)).await?;
        if reply.code != 257 {
            return Err(FtpError::Command {
                code: reply.code,
                text: reply.text,
            });
        }
        parse_quoted_path(&reply.text)
    }

    /// `RMD path`
    pub async fn rmd(&mut self, path: &str) -> Result<()> {
        self.expect_ok(&command::build_with_arg("RMD", path), &[250])
            .await
    }

    /// `DELE path`
    pub async fn dele(&mut self, path: &str) -> Result<()> {
        self.expect_ok(&command::build_with_arg("DELE", path), &[250])
            .await
    }

    /// `RNFR from` then `RNTO to`. If `RNFR` fails, `RNTO` is not issued.
    pub async fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        self.expect_ok(&command::build_with_arg("RNFR", from), &[350])
            .await?;
        self.expect_ok(&command::build_with_arg("RNTO", to), &[250])
            .await
    }

    /// `TYPE I`
    pub async fn type_binary(&mut self) -> Result<()> {
        self.expect_ok(&command::build_with_arg("TYPE", "I"), &[200])
            .await?;
        self.transfer_type = TransferType::Image;
        Ok(())
    }

    /// `TYPE A`
    pub async fn type_ascii(&mut self) -> Result<()> {
        self.expect_ok(&command::build_with_arg("TYPE", "A"), &[200])
            .await?;
        self.transfer_type = TransferType::Ascii;
        Ok(())
    }

    /// Currently advertised transfer type
    pub fn transfer_type(&self) -> TransferType {
        self.transfer_type
    }

    /// `LIST [path]`: returns the raw listing lines, unparsed.
    pub async fn list(&mut self, path: Option<&str>) -> Result<Vec<String>> {
        let command_line = match path {
            Some(p) => command::build_with_arg("LIST", p),
            None => command::build("LIST"),
        };
        let mut data = self.open_data_connection(&command_line).await?;

        let mut buf = Vec::new();
        data.read_to_end(&mut buf).await?;
        drop(data);

        self.finish_transfer().await?;

        let text = String::from_utf8_lossy(&buf);
        Ok(text
            .split("\r\n")
            .flat_map(|l| l.split('\n'))
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// `RETR path`: streams the file's bytes into `sink` until EOF.
    pub async fn retrieve(&mut self, path: &str, sink: &mut (impl AsyncWrite + Unpin)) -> Result<()> {
        let command_line = command::build_with_arg("RETR", path);
        let mut data = self.open_data_connection(&command_line).await?;

        tokio::io::copy(&mut data, sink).await?;
        drop(data);

        self.finish_transfer().await
    }

    /// `STOR path`: streams `source`'s bytes into the data socket, then
    /// half-closes the write side to signal EOF.
    pub async fn store(&mut self, path: &str, source: &mut (impl AsyncRead + Unpin)) -> Result<()> {
        let command_line = command::build_with_arg("STOR", path);
        let mut data = self.open_data_connection(&command_line).await?;

        tokio::io::copy(source, &mut data).await?;
        data.shutdown().await?;
        drop(data);

        self.finish_transfer().await
    }

    /// `QUIT`: best-effort final reply, socket closed unconditionally.
    pub async fn quit(mut self) {
        let _ = self.send_line(&command::build("QUIT")).await;
        let _ = self.read_reply().await;
    }

    // -- internals --------------------------------------------------

    async fn command(&mut self, line: &str) -> Result<Reply> {
        self.send_line(line).await?;
        self.read_reply().await
    }

    async fn expect_ok(&mut self, line: &str, ok_codes: &[u16]) -> Result<()> {
        let reply = self.command(line).await?;
        if ok_codes.contains(&reply.code) {
            Ok(())
        } else {
            Err(FtpError::Command {
                code: reply.code,
                text: reply.text,
            })
        }
    }

    async fn send_line(&mut self, line: &str) -> Result<()> {
        trace!("> {}", line.trim_end());
        self.stream.get_mut().write_all(line.as_bytes()).await?;
        self.stream.get_mut().flush().await?;
        Ok(())
    }

    async fn read_line(&mut self) -> Result<String> {
        let mut buf = Vec::new();
        let n = self.stream.read_until(b'\n', &mut buf).await?;
        if n == 0 {
            return Err(FtpError::Connection("connection closed".to_string()));
        }
        let text = String::from_utf8_lossy(&buf);
        Ok(text.trim_end_matches('\n').trim_end_matches('\r').to_string())
    }

    /// Read one reply, transparently consuming a multi-line body if the
    /// first line uses the `"{code}-"` continuation form. The returned
    /// `Reply.text` is the first line's text, which is what every
    /// caller that extracts a single value (`PWD`'s quoted path, an
    /// auth error's message) needs; the continuation lines are still
    /// consumed so the next command isn't desynchronized.
    async fn read_reply(&mut self) -> Result<Reply> {
        let line = self.read_line().await?;
        trace!("< {line}");
        let (code, text) = reply::parse_reply_line(&line)?;

        if line.as_bytes().get(3) == Some(&b'-') {
            loop {
                let next = self.read_line().await?;
                trace!("< {next}");
                if next.len() >= 4 && next.as_bytes()[3] == b' ' {
                    if let Ok((terminator_code, _)) = reply::parse_reply_line(&next) {
                        if terminator_code == code {
                            break;
                        }
                    }
                } else if next.len() == 3 {
                    if let Ok((terminator_code, _)) = reply::parse_reply_line(&next) {
                        if terminator_code == code {
                            break;
                        }
                    }
                }
                // anything else is a continuation line; keep reading
            }
        }

        Ok(Reply { code, text })
    }

    /// Establish the data connection and confirm the server accepted the
    /// data-carrying verb. The transfer itself, closing the data socket,
    /// and reading the final reply are the caller's responsibility via
    /// [`FtpClient::finish_transfer`].
    async fn open_data_connection(&mut self, command_line: &str) -> Result<TcpStream> {
        let reply = self.command(&command::build("PASV")).await?;
        if reply.code != 227 {
            return Err(FtpError::Command {
                code: reply.code,
                text: reply.text,
            });
        }
        let (mut addr, port) = reply::parse_pasv(&reply.text)?;

        if is_unroutable(addr) {
            if let IpAddr::V4(peer_v4) = self.peer_addr.ip() {
                debug!("PASV address {addr} is unroutable, substituting control peer {peer_v4}");
                addr = peer_v4;
            }
        }

        let data_stream = TcpStream::connect((addr, port)).await?;

        let reply = self.command(command_line).await?;
        if reply.code >= 400 {
            drop(data_stream);
            return Err(FtpError::Command {
                code: reply.code,
                text: reply.text,
            });
        }

        Ok(data_stream)
    }

    /// Read the final reply after a data transfer's data socket has
    /// already been closed by the caller; 2xx is success, 4xx/5xx a
    /// [`FtpError::Transfer`].
    async fn finish_transfer(&mut self) -> Result<()> {
        let reply = self.read_reply().await?;
        if reply.is_success() {
            Ok(())
        } else {
            Err(FtpError::Transfer {
                code: reply.code,
                text: reply.text,
            })
        }
    }
}

/// `true` for an advertised PASV host the client cannot be expected to
/// reach directly: unspecified (`0.0.0.0`) or an RFC1918 private address.
/// Loopback is deliberately excluded so local test servers stay reachable.
fn is_unroutable(addr: Ipv4Addr) -> bool {
    addr.is_unspecified() || addr.is_private()
}

/// Default control-connection timeout; the server side owns its own
/// `data_timeout_seconds` (see `src/config.rs`).
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(120);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_unroutable() {
        assert!(is_unroutable(Ipv4Addr::new(0, 0, 0, 0)));
        assert!(is_unroutable(Ipv4Addr::new(192, 168, 1, 5)));
        assert!(is_unroutable(Ipv4Addr::new(10, 0, 0, 1)));
        assert!(!is_unroutable(Ipv4Addr::new(127, 0, 0, 1)));
        assert!(!is_unroutable(Ipv4Addr::new(8, 8, 8, 8)));
    }
}
