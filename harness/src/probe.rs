use std::process::ExitStatus;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::warn;

use crate::error::HarnessError;
use crate::process::signal_group;

/// How long, in total, to keep collecting output after the client exits.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_millis(250);

/// A client invocation that passed the allow-list check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeCommand {
    client: String,
    args: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeStatus {
    Exited(ExitStatus),
    TimedOut(Duration),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOutput {
    /// stdout and stderr interleaved in arrival order.
    pub output: String,
    pub status: ProbeStatus,
}

impl ProbeOutput {
    pub fn success(&self) -> bool {
        matches!(self.status, ProbeStatus::Exited(status) if status.success())
    }
}

impl ProbeCommand {
    /// Splits `command` on whitespace and checks the first token against
    /// `allowed_clients`.
    pub fn parse(command: &str, allowed_clients: &[String]) -> Result<Self, HarnessError> {
        let mut tokens = command.split_whitespace().map(str::to_string);
        let client = tokens
            .next()
            .filter(|client| allowed_clients.iter().any(|allowed| allowed == client))
            .ok_or_else(|| HarnessError::InvalidCommand {
                allowed: allowed_clients.to_vec(),
            })?;
        Ok(Self {
            client,
            args: tokens.collect(),
        })
    }

    pub fn client(&self) -> &str {
        &self.client
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Runs the client to completion or until `timeout` expires, whichever
    /// comes first. A non-zero exit is reported through [`ProbeStatus`], not
    /// as an error, so the captured output is never lost.
    ///
    /// The client leads its own process group. Once it exits or times out the
    /// whole group is killed, so nothing it backgrounded outlives the run or
    /// keeps the output pipes open past the drain deadline.
    pub async fn run(&self, timeout: Duration) -> Result<ProbeOutput, HarnessError> {
        let mut command = Command::new(&self.client);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|err| HarnessError::launch(&self.client, err))?;
        let Some(pgid) = child.id() else {
            let _ = child.start_kill();
            return Err(HarnessError::launch(
                &self.client,
                std::io::Error::other("missing child pid"),
            ));
        };
        debug!(client = %self.client, pid = pgid, "probe started");

        let (output_tx, mut output_rx) = mpsc::channel::<Vec<u8>>(64);
        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_pipe_reader(stdout, output_tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_pipe_reader(stderr, output_tx.clone()));
        }
        drop(output_tx);

        let mut collected = Vec::new();
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        let status = loop {
            tokio::select! {
                Some(chunk) = output_rx.recv() => collected.extend_from_slice(&chunk),
                status = child.wait() => match status {
                    Ok(status) => break ProbeStatus::Exited(status),
                    Err(err) => {
                        let _ = signal_group(pgid, libc::SIGKILL);
                        let _ = child.start_kill();
                        abort_readers(readers);
                        return Err(HarnessError::launch(&self.client, err));
                    }
                },
                _ = &mut deadline => {
                    warn!(
                        client = %self.client,
                        timeout_ms = timeout.as_millis() as u64,
                        "probe timed out; killing"
                    );
                    let _ = signal_group(pgid, libc::SIGKILL);
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                    break ProbeStatus::TimedOut(timeout);
                }
            }
        };

        // Anything the client left running in its group goes now.
        if let Err(err) = signal_group(pgid, libc::SIGKILL)
            && err.raw_os_error() != Some(libc::ESRCH)
        {
            debug!(client = %self.client, error = %err, "failed to kill probe group");
        }

        let drain_deadline = tokio::time::sleep(OUTPUT_DRAIN_TIMEOUT);
        tokio::pin!(drain_deadline);
        loop {
            tokio::select! {
                chunk = output_rx.recv() => match chunk {
                    Some(chunk) => collected.extend_from_slice(&chunk),
                    None => break,
                },
                _ = &mut drain_deadline => break,
            }
        }
        abort_readers(readers);

        Ok(ProbeOutput {
            output: String::from_utf8_lossy(&collected).into_owned(),
            status,
        })
    }
}

fn abort_readers(readers: Vec<JoinHandle<()>>) {
    for reader in readers {
        reader.abort();
    }
}

fn spawn_pipe_reader<R>(mut reader: R, output_tx: mpsc::Sender<Vec<u8>>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![0u8; 8_192];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    if output_tx.send(buf[..n].to_vec()).await.is_err() {
                        break;
                    }
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
    })
}
