//! Remote shell boundary: authenticated SSH sessions with pty command
//! execution and SFTP file transfer.
//!
//! The [`RemoteShell`] / [`RemoteSession`] traits are the seam the bootstrap
//! sequencer drives; the production implementation wraps `ssh2` behind
//! `spawn_blocking`. A session owns its TCP connection exclusively and the
//! connection is closed when the session is dropped, on every exit path.

use crate::error::BootstrapError;
use async_trait::async_trait;
use ssh2::Session;
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

const SSH_PORT: u16 = 22;
const TCP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Factory for per-instance remote sessions
#[async_trait]
pub trait RemoteShell: Send + Sync {
    /// Open an authenticated session to the host at `addr`.
    ///
    /// Failures before authentication completes are
    /// [`BootstrapError::ConnectionNotReady`], retryable by the caller's
    /// connect policy.
    async fn connect(&self, addr: &str) -> Result<Box<dyn RemoteSession>, BootstrapError>;
}

/// One open session to one host
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// Run a shell command with a pty attached, blocking until it exits.
    /// Returns captured stdout; a non-zero exit status becomes
    /// [`BootstrapError::RemoteExec`] carrying the captured stderr.
    async fn exec(&self, cmd: &str) -> Result<String, BootstrapError>;

    /// Write `data` to `remote_name` in the login account's home directory
    /// via the session's SFTP sub-channel.
    async fn upload(&self, remote_name: &str, data: &[u8]) -> Result<(), BootstrapError>;
}

/// SSH shell authenticating with a private key file
pub struct Ssh2Shell {
    key_path: PathBuf,
    user: String,
}

impl Ssh2Shell {
    pub fn new(key_path: impl Into<PathBuf>, user: impl Into<String>) -> Self {
        Self {
            key_path: key_path.into(),
            user: user.into(),
        }
    }
}

#[async_trait]
impl RemoteShell for Ssh2Shell {
    async fn connect(&self, addr: &str) -> Result<Box<dyn RemoteSession>, BootstrapError> {
        let addr = addr.to_string();
        let key_path = self.key_path.clone();
        let user = self.user.clone();

        let session = tokio::task::spawn_blocking(move || connect_blocking(&addr, &user, &key_path))
            .await
            .map_err(|e| BootstrapError::ConnectionNotReady(format!("connect task failed: {e}")))??;

        Ok(Box::new(Ssh2Session {
            session: Arc::new(Mutex::new(session)),
        }))
    }
}

fn connect_blocking(addr: &str, user: &str, key_path: &Path) -> Result<Session, BootstrapError> {
    let not_ready = |e: &dyn std::fmt::Display| BootstrapError::ConnectionNotReady(e.to_string());

    let target = format!("{addr}:{SSH_PORT}");
    let sock_addr = target
        .to_socket_addrs()
        .map_err(|e| not_ready(&e))?
        .next()
        .ok_or_else(|| BootstrapError::ConnectionNotReady(format!("no address for {target}")))?;

    let tcp = TcpStream::connect_timeout(&sock_addr, TCP_CONNECT_TIMEOUT).map_err(|e| not_ready(&e))?;

    let mut session = Session::new().map_err(|e| not_ready(&e))?;
    session.set_tcp_stream(tcp);
    session.handshake().map_err(|e| not_ready(&e))?;
    session
        .userauth_pubkey_file(user, None, key_path, None)
        .map_err(|e| not_ready(&e))?;

    debug!(addr = %addr, user = %user, "SSH session established");
    Ok(session)
}

/// Production session; the underlying TCP connection closes on drop.
struct Ssh2Session {
    session: Arc<Mutex<Session>>,
}

#[async_trait]
impl RemoteSession for Ssh2Session {
    async fn exec(&self, cmd: &str) -> Result<String, BootstrapError> {
        let session = Arc::clone(&self.session);
        let cmd = cmd.to_string();

        let stdout = tokio::task::spawn_blocking(move || {
            let session = session.lock().map_err(|e| BootstrapError::RemoteExec {
                status: -1,
                stderr: format!("session lock poisoned: {e}"),
            })?;
            exec_blocking(&session, &cmd)
        })
        .await
        .map_err(|e| BootstrapError::RemoteExec {
            status: -1,
            stderr: format!("exec task failed: {e}"),
        })??;

        debug!(output = %stdout.trim_end(), "Remote command output");
        Ok(stdout)
    }

    async fn upload(&self, remote_name: &str, data: &[u8]) -> Result<(), BootstrapError> {
        let session = Arc::clone(&self.session);
        let remote_name = remote_name.to_string();
        let data = data.to_vec();

        tokio::task::spawn_blocking(move || {
            let session = session
                .lock()
                .map_err(|e| BootstrapError::Transfer(format!("session lock poisoned: {e}")))?;
            upload_blocking(&session, &remote_name, &data)
        })
        .await
        .map_err(|e| BootstrapError::Transfer(format!("upload task failed: {e}")))?
    }
}

fn exec_blocking(session: &Session, cmd: &str) -> Result<String, BootstrapError> {
    let exec_err = |e: &dyn std::fmt::Display| BootstrapError::RemoteExec {
        status: -1,
        stderr: e.to_string(),
    };

    let mut channel = session.channel_session().map_err(|e| exec_err(&e))?;
    channel.request_pty("xterm", None, None).map_err(|e| exec_err(&e))?;
    channel.exec(cmd).map_err(|e| exec_err(&e))?;

    let mut stdout = String::new();
    channel.read_to_string(&mut stdout).map_err(|e| exec_err(&e))?;
    let mut stderr = String::new();
    channel
        .stderr()
        .read_to_string(&mut stderr)
        .map_err(|e| exec_err(&e))?;

    channel.wait_close().map_err(|e| exec_err(&e))?;
    let status = channel.exit_status().map_err(|e| exec_err(&e))?;

    if status != 0 {
        return Err(BootstrapError::RemoteExec { status, stderr });
    }
    Ok(stdout)
}

fn upload_blocking(session: &Session, remote_name: &str, data: &[u8]) -> Result<(), BootstrapError> {
    let transfer_err = |e: &dyn std::fmt::Display| BootstrapError::Transfer(e.to_string());

    let sftp = session.sftp().map_err(|e| transfer_err(&e))?;
    let mut file = sftp
        .create(Path::new(remote_name))
        .map_err(|e| transfer_err(&e))?;
    file.write_all(data).map_err(|e| transfer_err(&e))?;

    debug!(remote_name = %remote_name, bytes = data.len(), "Artifact uploaded");
    Ok(())
}
