use std::io::Read;
use std::net::{TcpStream, ToSocketAddrs};
use std::process::Stdio;
use std::time::Duration;

use ssh2::Session;
use vigil_core::SshTarget;

/// Captured output of a finished command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    /// Combined stdout+stderr, for attempt logs.
    pub fn combined(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("command timed out after {0:?}")]
    TimedOut(Duration),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SSH error: {0}")]
    Ssh(#[from] ssh2::Error),

    #[error("SSH authentication failed for {0}")]
    AuthFailed(String),

    #[error("cannot resolve {0}")]
    Resolve(String),

    #[error("worker task failed: {0}")]
    Join(String),
}

fn truncate_to(mut s: String, cap: usize) -> String {
    if s.len() > cap {
        // Cut on a char boundary at or below the cap
        let mut end = cap;
        while end > 0 && !s.is_char_boundary(end) {
            end -= 1;
        }
        s.truncate(end);
    }
    s
}

/// Run a shell command locally through `sh -c`, with a hard timeout and an
/// output byte cap. The child is killed when the timeout fires.
///
/// This is the single place in the engine that shells out; the ping probe,
/// resource probes in local mode and the recovery executor all come through
/// here.
pub async fn run_local(
    command: &str,
    timeout: Duration,
    output_cap: usize,
) -> Result<CommandOutput, CommandError> {
    let child = tokio::process::Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    // Dropping the future on timeout drops the child, which kills it
    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| CommandError::TimedOut(timeout))??;

    Ok(CommandOutput {
        stdout: truncate_to(String::from_utf8_lossy(&output.stdout).into_owned(), output_cap),
        stderr: truncate_to(String::from_utf8_lossy(&output.stderr).into_owned(), output_cap),
        exit_code: output.status.code().unwrap_or(-1),
    })
}

/// Run a command on a remote host over SSH.
///
/// ssh2 is a blocking library; the whole exchange runs on the blocking
/// pool with an outer deadline as the safety net (libssh2's own timeout
/// covers individual socket operations, not the full exchange).
pub async fn run_ssh(
    target: &SshTarget,
    command: &str,
    timeout: Duration,
    output_cap: usize,
) -> Result<CommandOutput, CommandError> {
    let target = target.clone();
    let command = command.to_string();

    let work = tokio::task::spawn_blocking(move || -> Result<CommandOutput, CommandError> {
        let addr = (target.host.as_str(), target.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| CommandError::Resolve(target.host.clone()))?;
        let tcp = TcpStream::connect_timeout(&addr, timeout)?;
        tcp.set_read_timeout(Some(timeout))?;
        tcp.set_write_timeout(Some(timeout))?;

        let mut session = Session::new()?;
        session.set_tcp_stream(tcp);
        session.set_timeout(timeout.as_millis().min(u128::from(u32::MAX)) as u32);
        session.handshake()?;

        if let Some(password) = &target.password {
            session.userauth_password(&target.username, password)?;
        } else if let Some(key) = &target.private_key {
            session.userauth_pubkey_memory(&target.username, None, key, None)?;
        }
        if !session.authenticated() {
            return Err(CommandError::AuthFailed(format!(
                "{}@{}",
                target.username, target.host
            )));
        }

        let mut channel = session.channel_session()?;
        channel.exec(&command)?;

        let mut stdout = String::new();
        channel.read_to_string(&mut stdout)?;
        let mut stderr = String::new();
        channel.stderr().read_to_string(&mut stderr)?;

        channel.wait_close()?;
        let exit_code = channel.exit_status()?;

        Ok(CommandOutput {
            stdout: truncate_to(stdout, output_cap),
            stderr: truncate_to(stderr, output_cap),
            exit_code,
        })
    });

    // Outer deadline: libssh2 timeouts are per-operation
    match tokio::time::timeout(timeout.saturating_mul(2), work).await {
        Err(_) => Err(CommandError::TimedOut(timeout)),
        Ok(Err(join)) => Err(CommandError::Join(join.to_string())),
        Ok(Ok(result)) => result,
    }
}

/// Run a command either locally or on the configured remote target.
pub async fn run(
    remote: Option<&SshTarget>,
    command: &str,
    timeout: Duration,
    output_cap: usize,
) -> Result<CommandOutput, CommandError> {
    match remote {
        Some(target) => run_ssh(target, command, timeout, output_cap).await,
        None => run_local(command, timeout, output_cap).await,
    }
}
