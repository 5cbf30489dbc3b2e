//! Virtual filesystem: chrooted path resolution and listing formatting

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::error::{FtpError, Result};

/// Resolve a virtual path (as seen by an FTP client) against the current
/// virtual directory and the real filesystem root.
///
/// `input` is absolute iff it starts with `/`; otherwise it is relative
/// to `current_dir` (itself always an absolute virtual path rooted at
/// `/`). Returns the normalized virtual path (always absolute, no `.`/
/// `..` components, no empty components) and the corresponding real
/// path under `root`.
///
/// This can never construct a real path outside `root` by component
/// manipulation alone: `..` pops the virtual stack but can never pop
/// past the virtual root, and the real path is built by joining `root`
/// with the resulting, already-confined virtual components. Symlinks
/// are out of scope for this stack-based step; see
/// [`resolve_existing`]/[`resolve_parent`] for the canonicalization
/// check that catches a symlink escaping `root`.
pub fn resolve_virtual(root: &Path, current_dir: &str, input: &str) -> (String, PathBuf) {
    let mut stack: Vec<String> = if input.starts_with('/') {
        Vec::new()
    } else {
        current_dir
            .split('/')
            .filter(|c| !c.is_empty() && *c != ".")
            .map(String::from)
            .collect()
    };

    for component in input.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                stack.pop();
            }
            other => stack.push(other.to_string()),
        }
    }

    let virtual_path = if stack.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", stack.join("/"))
    };

    let mut real_path = root.to_path_buf();
    for component in &stack {
        real_path.push(component);
    }

    (virtual_path, real_path)
}

/// Confirm that `real_path` (which must already exist) is still under the
/// canonical `root` once symlinks are resolved. Fails with
/// [`FtpError::Command`] coded 550 on escape.
///
/// Uses `tokio::fs::canonicalize`, which runs the underlying syscall on
/// the blocking thread pool, so resolving a path never steals a tokio
/// worker thread from other concurrent sessions.
pub async fn confine_to_root(root: &Path, real_path: &Path) -> Result<PathBuf> {
    let canonical_root = tokio::fs::canonicalize(root)
        .await
        .map_err(|e| FtpError::Command { code: 550, text: format!("virtual root unavailable: {e}") })?;
    let canonical_path = tokio::fs::canonicalize(real_path)
        .await
        .map_err(|e| FtpError::Command { code: 550, text: format!("path unavailable: {e}") })?;

    if canonical_path.starts_with(&canonical_root) {
        Ok(canonical_path)
    } else {
        Err(FtpError::Command {
            code: 550,
            text: "path escapes virtual root".to_string(),
        })
    }
}

/// Resolve and confine a path that is expected to already exist (`CWD`,
/// `RETR`, `RMD`, `DELE`, `RNFR`). Returns the confined real path.
pub async fn resolve_existing(root: &Path, current_dir: &str, input: &str) -> Result<PathBuf> {
    let (_virtual_path, real_path) = resolve_virtual(root, current_dir, input);
    confine_to_root(root, &real_path).await
}

/// Resolve a path whose parent must exist and be confined to `root`, but
/// which may not itself exist yet (`STOR`, `MKD`, `RNTO`). Returns the
/// (unconfirmed, since it may not exist) target real path.
pub async fn resolve_parent(root: &Path, current_dir: &str, input: &str) -> Result<PathBuf> {
    let (_virtual_path, real_path) = resolve_virtual(root, current_dir, input);
    let parent = real_path.parent().ok_or_else(|| FtpError::Command {
        code: 550,
        text: "no parent directory".to_string(),
    })?;
    let confined_parent = confine_to_root(root, parent).await?;
    let file_name = real_path.file_name().ok_or_else(|| FtpError::Command {
        code: 550,
        text: "missing file name".to_string(),
    })?;
    Ok(confined_parent.join(file_name))
}

/// Format one directory entry as a single UNIX-`ls`-style listing line
/// (no trailing CRLF -- the caller joins lines itself).
///
/// Owner/group are rendered as the literal placeholders `"owner"` /
/// `"group"`, since the virtual filesystem has no user/group mapping
/// of its own.
pub fn format_listing_entry(name: &str, metadata: &std::fs::Metadata) -> String {
    let perms = permission_string(metadata);
    let nlink = link_count(metadata);
    let size = metadata.len();
    let mtime = format_mtime(metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH));

    format!("{perms} {nlink} owner group {size} {mtime} {name}")
}

#[cfg(unix)]
fn permission_string(metadata: &std::fs::Metadata) -> String {
    use std::os::unix::fs::PermissionsExt;
    let mode = metadata.permissions().mode();
    let kind = if metadata.is_dir() { 'd' } else { '-' };
    let bit = |shift: u32, ch: char| if mode & (1 << shift) != 0 { ch } else { '-' };
    format!(
        "{kind}{}{}{}{}{}{}{}{}{}",
        bit(8, 'r'),
        bit(7, 'w'),
        bit(6, 'x'),
        bit(5, 'r'),
        bit(4, 'w'),
        bit(3, 'x'),
        bit(2, 'r'),
        bit(1, 'w'),
        bit(0, 'x'),
    )
}

#[cfg(not(unix))]
fn permission_string(metadata: &std::fs::Metadata) -> String {
    let kind = if metadata.is_dir() { 'd' } else { '-' };
    format!("{kind}rwxr-xr-x")
}

#[cfg(unix)]
fn link_count(metadata: &std::fs::Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    metadata.nlink()
}

#[cfg(not(unix))]
fn link_count(_metadata: &std::fs::Metadata) -> u64 {
    1
}

/// Render an mtime the way `ls` does: `"Mon DD HH:MM"` for recent files,
/// `"Mon DD  YYYY"` once the file is more than ~6 months old.
fn format_mtime(mtime: SystemTime) -> String {
    use chrono::{DateTime, Datelike, Utc};

    let datetime: DateTime<Utc> = mtime.into();
    let now: DateTime<Utc> = SystemTime::now().into();

    let six_months_ago = now - chrono::Duration::days(183);
    if datetime > six_months_ago && datetime <= now {
        format!("{}", datetime.format("%b %e %H:%M"))
    } else {
        format!("{} {}", datetime.format("%b %e"), datetime.year())
    }
}
