use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ProxyError;
use crate::kubeconfig::KUBECONFIG_ENV;
use crate::process_tree::terminate_process_tree;

type Outcome = Result<u16, ProxyError>;

/// Program and arguments used to launch the local API proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl Default for ProxyCommand {
    fn default() -> Self {
        Self { program: PathBuf::from("kubectl"), args: vec!["proxy".into(), "--port=0".into()] }
    }
}

impl From<&clusterlink_config::ProxyConfig> for ProxyCommand {
    fn from(config: &clusterlink_config::ProxyConfig) -> Self {
        let mut command = Self::default();
        if !config.binary.trim().is_empty() {
            command.program = PathBuf::from(config.binary.trim());
        }
        if !config.args.is_empty() {
            command.args = config.args.clone();
        }
        command
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyState {
    Starting,
    Running,
    Stopped,
    Failed,
}

#[derive(Debug)]
pub struct ProxySession {
    generation: u64,
    pid: Option<u32>,
    bound_port: Option<u16>,
    state: ProxyState,
    exited: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl ProxySession {
    fn state(&self) -> ProxyState {
        if self.state == ProxyState::Running && self.exited.load(Ordering::Acquire) {
            ProxyState::Failed
        } else {
            self.state
        }
    }
}

/// A spawned proxy whose port is not known yet.
#[derive(Debug)]
pub struct PendingProxy {
    pub generation: u64,
    outcome: oneshot::Receiver<Outcome>,
}

impl PendingProxy {
    pub async fn wait(self) -> Outcome {
        self.outcome.await.unwrap_or(Err(ProxyError::Cancelled))
    }
}

/// Owns the single local proxy subprocess.
pub struct ProxyProcessManager {
    command: ProxyCommand,
    session: Option<ProxySession>,
    next_generation: u64,
}

impl ProxyProcessManager {
    pub fn new(command: ProxyCommand) -> Self {
        Self { command, session: None, next_generation: 0 }
    }

    /// Launches the proxy for `kubeconfig_path`, replacing any running one.
    ///
    /// The returned [`PendingProxy`] resolves with whichever happens first:
    /// a `host:port` line on stdout, any stderr output, or process exit.
    pub fn spawn(&mut self, kubeconfig_path: &Path) -> Result<PendingProxy, ProxyError> {
        self.stop();
        self.next_generation += 1;
        let generation = self.next_generation;

        let mut cmd = Command::new(&self.command.program);
        cmd.args(&self.command.args)
            .env(KUBECONFIG_ENV, kubeconfig_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!("Failed to spawn proxy {}: {e}", self.command.program.display());
                self.session = Some(ProxySession {
                    generation,
                    pid: None,
                    bound_port: None,
                    state: ProxyState::Failed,
                    exited: Arc::new(AtomicBool::new(true)),
                    cancel: CancellationToken::new(),
                });
                return Err(ProxyError::Spawn(format!("{}: {e}", self.command.program.display())));
            }
        };

        let pid = child.id();
        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            return Err(ProxyError::Spawn("proxy output pipes unavailable".into()));
        };

        info!("Started proxy (pid {pid:?}) for {}", kubeconfig_path.display());

        let (tx, rx) = oneshot::channel();
        let cancel = CancellationToken::new();
        let exited = Arc::new(AtomicBool::new(false));
        tokio::spawn(monitor_proxy(child, stdout, stderr, tx, cancel.clone(), exited.clone()));

        self.session =
            Some(ProxySession { generation, pid, bound_port: None, state: ProxyState::Starting, exited, cancel });
        Ok(PendingProxy { generation, outcome: rx })
    }

    /// Records the result of a [`PendingProxy`]. Outcomes for a session that
    /// has since been replaced or stopped are ignored.
    pub fn complete(&mut self, generation: u64, outcome: &Outcome) -> bool {
        let Some(session) = self.session.as_mut().filter(|s| s.generation == generation) else {
            debug!("Ignoring outcome for stale proxy generation {generation}");
            return false;
        };
        match outcome {
            Ok(port) => {
                session.bound_port = Some(*port);
                session.state = ProxyState::Running;
            }
            Err(_) => {
                session.bound_port = None;
                session.state = ProxyState::Failed;
            }
        }
        true
    }

    pub async fn start(&mut self, kubeconfig_path: &Path) -> Outcome {
        let pending = self.spawn(kubeconfig_path)?;
        let generation = pending.generation;
        let outcome = pending.wait().await;
        self.complete(generation, &outcome);
        outcome
    }

    /// Tears down the proxy. Safe to call any number of times.
    pub fn stop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        if let Some(pid) = session.pid {
            if !session.exited.load(Ordering::Acquire) {
                if let Err(e) = terminate_process_tree(pid) {
                    debug!("terminate_process_tree({pid}) failed: {e}");
                }
            }
        }
        session.cancel.cancel();
        info!("Stopped proxy (pid {:?})", session.pid);
    }

    pub fn bound_port(&self) -> Option<u16> {
        self.session.as_ref().and_then(|s| s.bound_port)
    }

    pub fn pid(&self) -> Option<u32> {
        self.session.as_ref().and_then(|s| s.pid)
    }

    pub fn state(&self) -> ProxyState {
        self.session.as_ref().map(ProxySession::state).unwrap_or(ProxyState::Stopped)
    }

    pub fn current_generation(&self) -> Option<u64> {
        self.session.as_ref().map(|s| s.generation)
    }
}

impl Drop for ProxyProcessManager {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Delivers `outcome` if nothing has been delivered yet.
fn settle(slot: &mut Option<oneshot::Sender<Outcome>>, outcome: Outcome) -> bool {
    match slot.take() {
        Some(tx) => {
            let _ = tx.send(outcome);
            true
        }
        None => {
            debug!("Proxy start already settled; ignoring {outcome:?}");
            false
        }
    }
}

async fn monitor_proxy(
    mut child: Child,
    stdout: ChildStdout,
    mut stderr: ChildStderr,
    tx: oneshot::Sender<Outcome>,
    cancel: CancellationToken,
    exited: Arc<AtomicBool>,
) {
    let mut slot = Some(tx);
    let mut stdout = BufReader::new(stdout).lines();
    let mut stdout_open = true;
    let mut stderr_open = true;
    let mut buf = [0u8; 1024];

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                settle(&mut slot, Err(ProxyError::Cancelled));
                let _ = child.start_kill();
                let _ = child.wait().await;
                exited.store(true, Ordering::Release);
                return;
            }
            line = stdout.next_line(), if stdout_open => match line {
                Ok(Some(line)) => {
                    debug!("proxy stdout: {line}");
                    if let Some(port) = parse_bound_port(&line) {
                        if settle(&mut slot, Ok(port)) {
                            info!("Proxy serving on port {port}");
                        }
                    }
                }
                Ok(None) | Err(_) => stdout_open = false,
            },
            read = stderr.read(&mut buf), if stderr_open => match read {
                Ok(0) | Err(_) => stderr_open = false,
                Ok(n) => {
                    let text = String::from_utf8_lossy(&buf[..n]).trim().to_string();
                    warn!("proxy stderr: {text}");
                    settle(&mut slot, Err(ProxyError::Stderr(text)));
                }
            },
            status = child.wait() => {
                let code = status.ok().and_then(|s| s.code());
                exited.store(true, Ordering::Release);
                info!("Proxy exited with {code:?}");
                settle(&mut slot, Err(ProxyError::Exited(code)));
                return;
            }
        }
    }
}

fn port_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?:[A-Za-z0-9][A-Za-z0-9.\-]*|\[[0-9A-Fa-f:]+\]):(\d{1,5})\b").expect("port pattern must compile")
    })
}

/// Extracts the port from a `host:port` fragment such as kubectl's
/// `Starting to serve on 127.0.0.1:38211`.
pub fn parse_bound_port(line: &str) -> Option<u16> {
    port_pattern()
        .captures_iter(line)
        .filter_map(|caps| caps.get(1)?.as_str().parse::<u16>().ok())
        .find(|port| *port != 0)
}

#[cfg(test)]
mod tests;
