// src/core/remote/mod.rs

//! Authenticated command execution on remote hosts, file transfer, and
//! reachability probing. Every call opens a fresh SSH session, honours a
//! cancellation token, and tears the session down before returning, so no
//! zombie sessions survive a caller.

use crate::core::errors::ColdStoreError;
use crate::core::metrics;
use russh::client;
use russh::{ChannelMsg, Disconnect, Sig};
use russh_keys::key::PrivateKeyWithHashAlg;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Where and as whom to connect.
#[derive(Debug, Clone)]
pub struct RemoteTarget {
    pub host: String,
    pub port: u16,
    pub user: String,
}

impl RemoteTarget {
    pub fn addr(&self) -> (String, u16) {
        (self.host.clone(), self.port)
    }
}

/// Key material and/or password. When both are present the key is tried
/// first and the password is the fallback.
#[derive(Debug, Clone, Default)]
pub struct RemoteAuth {
    pub key_path: Option<String>,
    pub password: Option<String>,
}

/// The result of one remote command.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: u32,
    pub duration: Duration,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Promotes a non-zero exit into the distinct error kind callers
    /// branch on.
    pub fn into_result(self) -> Result<ExecOutput, ColdStoreError> {
        if self.success() {
            Ok(self)
        } else {
            Err(ColdStoreError::RemoteCommandFailed {
                exit_code: self.exit_code,
                stderr: self.stderr.trim().to_string(),
            })
        }
    }
}

/// Host key verification policy. Verification is currently permissive, but
/// this enum is the single point where a strict policy plugs in.
#[derive(Debug, Clone, Copy, Default)]
pub enum HostKeyPolicy {
    #[default]
    AcceptAll,
}

struct ClientHandler {
    policy: HostKeyPolicy,
}

#[async_trait::async_trait]
impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh_keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        // The one pluggable host-key decision point.
        Ok(match self.policy {
            HostKeyPolicy::AcceptAll => true,
        })
    }
}

/// Wraps a string in single quotes for a POSIX shell, escaping embedded
/// quotes. Applied exactly once per interpolated value.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// The remote shell service. Stateless apart from policy and timeouts;
/// cheap to share behind an `Arc`.
pub struct RemoteShell {
    policy: HostKeyPolicy,
    connect_timeout: Duration,
}

impl RemoteShell {
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            policy: HostKeyPolicy::default(),
            connect_timeout,
        }
    }

    /// TCP-level reachability probe. No authentication is attempted.
    pub async fn ping(&self, host: &str, port: u16, timeout: Duration) -> bool {
        matches!(
            tokio::time::timeout(timeout, TcpStream::connect((host, port))).await,
            Ok(Ok(_))
        )
    }

    /// Runs a single command and captures stdout, stderr and the exit code.
    pub async fn execute(
        &self,
        target: &RemoteTarget,
        auth: &RemoteAuth,
        command: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<ExecOutput, ColdStoreError> {
        let started = Instant::now();
        let session = self.connect(target, auth, cancel).await?;
        let result = self
            .exec_on(&session, command, None, timeout, cancel, started)
            .await;
        let _ = session
            .disconnect(Disconnect::ByApplication, "", "en")
            .await;
        if let Ok(output) = &result {
            metrics::REMOTE_COMMAND_SECONDS.observe(output.duration.as_secs_f64());
        }
        result
    }

    /// Runs a multi-line script through `sh -c`. The body is quoted exactly
    /// once here; callers must not pre-quote.
    pub async fn execute_script(
        &self,
        target: &RemoteTarget,
        auth: &RemoteAuth,
        script: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<ExecOutput, ColdStoreError> {
        let command = format!("sh -c {}", shell_quote(script));
        self.execute(target, auth, &command, timeout, cancel).await
    }

    /// Success iff a trivial echo round-trips.
    pub async fn test_connection(
        &self,
        target: &RemoteTarget,
        auth: &RemoteAuth,
        cancel: &CancellationToken,
    ) -> Result<(), ColdStoreError> {
        let output = self
            .execute(
                target,
                auth,
                "echo coldstored-ping",
                Duration::from_secs(10),
                cancel,
            )
            .await?
            .into_result()?;
        if output.stdout.trim() == "coldstored-ping" {
            Ok(())
        } else {
            Err(ColdStoreError::RemoteCommandFailed {
                exit_code: 0,
                stderr: "echo round-trip returned unexpected output".to_string(),
            })
        }
    }

    /// Streams bytes to a remote path, creating the parent directory and
    /// setting the file mode.
    pub async fn copy_content(
        &self,
        target: &RemoteTarget,
        auth: &RemoteAuth,
        content: &[u8],
        remote_path: &str,
        mode: u32,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), ColdStoreError> {
        let started = Instant::now();
        let session = self.connect(target, auth, cancel).await?;

        let quoted = shell_quote(remote_path);
        let command = format!(
            "mkdir -p \"$(dirname {quoted})\" && cat > {quoted} && chmod {mode:o} {quoted}"
        );
        let result = self
            .exec_on(&session, &command, Some(content), timeout, cancel, started)
            .await
            .and_then(ExecOutput::into_result);
        let _ = session
            .disconnect(Disconnect::ByApplication, "", "en")
            .await;
        result.map(|_| ())
    }

    /// Copies a local file to a remote path.
    pub async fn copy_file(
        &self,
        target: &RemoteTarget,
        auth: &RemoteAuth,
        local_path: &str,
        remote_path: &str,
        mode: u32,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), ColdStoreError> {
        let content = tokio::fs::read(local_path).await?;
        self.copy_content(target, auth, &content, remote_path, mode, timeout, cancel)
            .await
    }

    /// Returns a normalised `distro=…; version=…` string for the host.
    pub async fn get_os_info(
        &self,
        target: &RemoteTarget,
        auth: &RemoteAuth,
        cancel: &CancellationToken,
    ) -> Result<String, ColdStoreError> {
        let output = self
            .execute(
                target,
                auth,
                "cat /etc/os-release",
                Duration::from_secs(10),
                cancel,
            )
            .await?
            .into_result()?;
        Ok(parse_os_release(&output.stdout))
    }

    async fn connect(
        &self,
        target: &RemoteTarget,
        auth: &RemoteAuth,
        cancel: &CancellationToken,
    ) -> Result<client::Handle<ClientHandler>, ColdStoreError> {
        let config = Arc::new(client::Config::default());
        let handler = ClientHandler {
            policy: self.policy,
        };

        let connect = client::connect(config, target.addr(), handler);
        let mut session = tokio::select! {
            result = tokio::time::timeout(self.connect_timeout, connect) => {
                match result {
                    Ok(Ok(session)) => session,
                    Ok(Err(e)) => {
                        return Err(ColdStoreError::ConnectionRefused(format!(
                            "{}:{}: {e}",
                            target.host, target.port
                        )));
                    }
                    Err(_) => {
                        return Err(ColdStoreError::Timeout(format!(
                            "connecting to {}:{}",
                            target.host, target.port
                        )));
                    }
                }
            }
            _ = cancel.cancelled() => return Err(ColdStoreError::Cancelled),
        };

        let mut authenticated = false;
        if let Some(key_path) = &auth.key_path {
            let key = russh_keys::load_secret_key(key_path, None)
                .map_err(|e| ColdStoreError::Config(format!("ssh key '{key_path}': {e}")))?;
            let key = PrivateKeyWithHashAlg::new(
                Arc::new(key),
                None,
            )
            .map_err(|e| ColdStoreError::Config(format!("ssh key '{key_path}': {e}")))?;
            authenticated = session.authenticate_publickey(&target.user, key).await?;
            if !authenticated {
                debug!(host = %target.host, "public key rejected, trying password");
            }
        }
        if !authenticated {
            if let Some(password) = &auth.password {
                authenticated = session
                    .authenticate_password(&target.user, password)
                    .await?;
            }
        }
        if !authenticated {
            let _ = session
                .disconnect(Disconnect::ByApplication, "", "en")
                .await;
            return Err(ColdStoreError::SshAuthFailed(format!(
                "{}@{}",
                target.user, target.host
            )));
        }
        Ok(session)
    }

    /// Drives one exec channel to completion. On cancellation a HUP is sent
    /// to the remote process group before the channel is dropped.
    async fn exec_on(
        &self,
        session: &client::Handle<ClientHandler>,
        command: &str,
        stdin: Option<&[u8]>,
        timeout: Duration,
        cancel: &CancellationToken,
        started: Instant,
    ) -> Result<ExecOutput, ColdStoreError> {
        let mut channel = session.channel_open_session().await?;
        channel.exec(true, command).await?;

        if let Some(data) = stdin {
            channel.data(data).await?;
            channel.eof().await?;
        }

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_code = 0u32;

        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                msg = channel.wait() => {
                    match msg {
                        Some(ChannelMsg::Data { ref data }) => stdout.extend_from_slice(data),
                        Some(ChannelMsg::ExtendedData { ref data, ext: 1 }) => {
                            stderr.extend_from_slice(data)
                        }
                        Some(ChannelMsg::ExitStatus { exit_status }) => exit_code = exit_status,
                        Some(_) => {}
                        None => break,
                    }
                }
                _ = &mut deadline => {
                    let _ = channel.signal(Sig::KILL).await;
                    return Err(ColdStoreError::Timeout(format!("remote command: {command}")));
                }
                _ = cancel.cancelled() => {
                    let _ = channel.signal(Sig::HUP).await;
                    return Err(ColdStoreError::Cancelled);
                }
            }
        }

        Ok(ExecOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            exit_code,
            duration: started.elapsed(),
        })
    }
}

/// Reduces `/etc/os-release` to `distro=…; version=…`.
pub fn parse_os_release(contents: &str) -> String {
    let mut distro = "unknown".to_string();
    let mut version = "unknown".to_string();
    for line in contents.lines() {
        if let Some(value) = line.strip_prefix("ID=") {
            distro = value.trim_matches('"').to_string();
        } else if let Some(value) = line.strip_prefix("VERSION_ID=") {
            version = value.trim_matches('"').to_string();
        }
    }
    if distro == "unknown" {
        warn!("could not parse /etc/os-release contents");
    }
    format!("distro={distro}; version={version}")
}
