//! Process-backed kernel session.
//!
//! Spawns the configured kernel command and exchanges newline-delimited JSON
//! frames on its stdin/stdout. Every frame is an object tagged by `type`:
//!
//! - client → kernel: `kernel_info`, `execute`, `comm_msg`
//! - kernel → client: `kernel_info`, `execute_reply`, `comm_open`,
//!   `comm_msg`, `comm_close`, `status`
//!
//! A background reader routes execute replies to their waiting request,
//! comm records to the comm they belong to and status frames to status
//! subscribers. Process exit closes every comm and reports
//! [`KernelState::Dead`].

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use kernel_chat_config::KernelSettings;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{broadcast, mpsc, oneshot, watch};

use crate::error::ChatError;
use crate::transport::comm::CommChannel;
use crate::transport::kernel::{
    BoxFuture, CommOpen, CommOpenHandler, ExecuteOutcome, ExecuteRequest, KernelInfo,
    KernelSession, KernelState,
};

/// How long [`KernelSession::ready`] waits for the kernel to describe itself.
const READY_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Wire frames
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientFrame {
    KernelInfo,
    Execute {
        id: u64,
        code: String,
        silent: bool,
        store_history: bool,
        stop_on_error: bool,
    },
    CommMsg {
        comm_id: String,
        data: Value,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum KernelFrame {
    KernelInfo {
        #[serde(default)]
        name: String,
        #[serde(default)]
        language: String,
    },
    ExecuteReply {
        id: u64,
        status: String,
        #[serde(default)]
        ename: String,
        #[serde(default)]
        evalue: String,
        #[serde(default)]
        traceback: Vec<String>,
    },
    CommOpen {
        comm_id: String,
        target_name: String,
    },
    CommMsg {
        comm_id: String,
        #[serde(default)]
        data: Value,
    },
    CommClose {
        comm_id: String,
    },
    Status {
        execution_state: String,
    },
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

type TargetHandler = Arc<dyn Fn(CommOpen) + Send + Sync>;

struct OpenComm {
    inbound: mpsc::UnboundedSender<Value>,
    open: Arc<AtomicBool>,
}

struct Shared {
    frames: mpsc::UnboundedSender<ClientFrame>,
    pending: Mutex<HashMap<u64, oneshot::Sender<ExecuteOutcome>>>,
    targets: Mutex<HashMap<String, TargetHandler>>,
    comms: Mutex<HashMap<String, OpenComm>>,
    info: watch::Sender<Option<KernelInfo>>,
    status: broadcast::Sender<KernelState>,
    fallback: KernelInfo,
}

impl Shared {
    fn handle_frame(&self, frame: KernelFrame) {
        match frame {
            KernelFrame::KernelInfo { name, language } => {
                let info = KernelInfo {
                    name: if name.is_empty() {
                        self.fallback.name.clone()
                    } else {
                        name
                    },
                    language: if language.is_empty() {
                        self.fallback.language.clone()
                    } else {
                        language
                    },
                };
                self.info.send_replace(Some(info));
            }
            KernelFrame::ExecuteReply {
                id,
                status,
                ename,
                evalue,
                traceback,
            } => {
                let outcome = if status == "ok" {
                    ExecuteOutcome::Ok
                } else {
                    ExecuteOutcome::Error {
                        ename,
                        evalue,
                        traceback,
                    }
                };
                match self.pending.lock().remove(&id) {
                    Some(waiter) => {
                        let _ = waiter.send(outcome);
                    }
                    None => log::warn!("Kernel acknowledged unknown execute request {id}"),
                }
            }
            KernelFrame::CommOpen {
                comm_id,
                target_name,
            } => self.open_comm(comm_id, &target_name),
            KernelFrame::CommMsg { comm_id, data } => {
                let delivered = self
                    .comms
                    .lock()
                    .get(&comm_id)
                    .is_some_and(|comm| comm.inbound.send(data).is_ok());
                if !delivered {
                    log::warn!("Dropping record for unknown comm '{comm_id}'");
                }
            }
            KernelFrame::CommClose { comm_id } => {
                if let Some(comm) = self.comms.lock().remove(&comm_id) {
                    comm.open.store(false, Ordering::SeqCst);
                    log::info!("Kernel closed comm '{comm_id}'");
                }
            }
            KernelFrame::Status { execution_state } => {
                match KernelState::from_wire(&execution_state) {
                    Some(state) => {
                        let _ = self.status.send(state);
                    }
                    None => log::debug!("Ignoring kernel status '{execution_state}'"),
                }
            }
        }
    }

    fn open_comm(&self, comm_id: String, target_name: &str) {
        let handler = self.targets.lock().get(target_name).cloned();
        let Some(handler) = handler else {
            log::warn!("Kernel opened comm '{comm_id}' on unregistered target '{target_name}'");
            return;
        };
        let open = Arc::new(AtomicBool::new(true));
        let (sender, inbound) = mpsc::unbounded_channel();
        self.comms.lock().insert(
            comm_id.clone(),
            OpenComm {
                inbound: sender,
                open: Arc::clone(&open),
            },
        );
        log::info!("Kernel opened comm '{comm_id}' on '{target_name}'");
        handler(CommOpen {
            channel: Arc::new(StdioComm {
                comm_id,
                open,
                frames: self.frames.clone(),
            }),
            inbound,
        });
    }

    /// The process is gone: fail every waiter and close every comm.
    fn shut_down(&self) {
        self.pending.lock().clear();
        for (_, comm) in self.comms.lock().drain() {
            comm.open.store(false, Ordering::SeqCst);
        }
        let _ = self.status.send(KernelState::Dead);
    }
}

// ---------------------------------------------------------------------------
// StdioComm
// ---------------------------------------------------------------------------

/// Client end of a comm carried over the kernel process's stdin.
pub struct StdioComm {
    comm_id: String,
    open: Arc<AtomicBool>,
    frames: mpsc::UnboundedSender<ClientFrame>,
}

impl CommChannel for StdioComm {
    fn comm_id(&self) -> &str {
        &self.comm_id
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && !self.frames.is_closed()
    }

    fn send(&self, data: Value) -> Result<(), String> {
        self.frames
            .send(ClientFrame::CommMsg {
                comm_id: self.comm_id.clone(),
                data,
            })
            .map_err(|_| "kernel process has exited".to_string())
    }
}

// ---------------------------------------------------------------------------
// StdioKernel
// ---------------------------------------------------------------------------

/// A kernel running as a child process.
pub struct StdioKernel {
    shared: Arc<Shared>,
    child: Mutex<Option<Child>>,
    next_id: AtomicU64,
}

impl StdioKernel {
    /// Spawn the kernel process and start the reader and writer tasks.
    pub fn spawn(
        settings: &KernelSettings,
        env: &HashMap<String, String>,
    ) -> Result<Arc<Self>, ChatError> {
        log::info!(
            "Spawning kernel '{}' {}",
            settings.command,
            settings.args.join(" ")
        );
        let mut child = Command::new(&settings.command)
            .args(&settings.args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ChatError::Connection(format!("failed to spawn '{}': {e}", settings.command))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ChatError::Connection("failed to capture kernel stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ChatError::Connection("failed to capture kernel stdout".to_string()))?;

        if let Some(stderr) = child.stderr.take() {
            let command = settings.command.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let trimmed = line.trim();
                    if !trimmed.is_empty() {
                        log::warn!("Kernel [{command}] stderr: {trimmed}");
                    }
                }
            });
        }

        let (frames, outgoing) = mpsc::unbounded_channel();
        let (status, _) = broadcast::channel(32);
        let shared = Arc::new(Shared {
            frames,
            pending: Mutex::new(HashMap::new()),
            targets: Mutex::new(HashMap::new()),
            comms: Mutex::new(HashMap::new()),
            info: watch::Sender::new(None),
            status,
            fallback: KernelInfo {
                name: settings.name.clone(),
                language: settings.language.clone(),
            },
        });

        tokio::spawn(write_frames(stdin, outgoing));
        tokio::spawn(read_frames(stdout, Arc::clone(&shared)));

        let _ = shared.frames.send(ClientFrame::KernelInfo);

        Ok(Arc::new(Self {
            shared,
            child: Mutex::new(Some(child)),
            next_id: AtomicU64::new(1),
        }))
    }

    /// Kill the kernel process.
    pub async fn shutdown(&self) {
        let child = self.child.lock().take();
        if let Some(mut child) = child {
            if let Err(e) = child.kill().await {
                log::warn!("Failed to kill kernel process: {e}");
            } else {
                log::info!("Kernel process stopped");
            }
        }
    }
}

impl KernelSession for StdioKernel {
    fn ready(&self) -> BoxFuture<'_, Result<KernelInfo, ChatError>> {
        let mut info = self.shared.info.subscribe();
        Box::pin(async move {
            let waited = tokio::time::timeout(READY_TIMEOUT, async {
                info.wait_for(Option::is_some)
                    .await
                    .map(|info| (*info).clone())
            })
            .await;
            match waited {
                Ok(Ok(Some(info))) => Ok(info),
                Ok(Ok(None)) | Ok(Err(_)) => Err(ChatError::Connection(
                    "kernel process exited before it was ready".to_string(),
                )),
                Err(_) => Err(ChatError::Connection(format!(
                    "kernel did not report ready within {}s",
                    READY_TIMEOUT.as_secs()
                ))),
            }
        })
    }

    fn execute(&self, request: ExecuteRequest) -> BoxFuture<'_, Result<ExecuteOutcome, ChatError>> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (waiter, acknowledged) = oneshot::channel();
        self.shared.pending.lock().insert(id, waiter);
        let queued = self.shared.frames.send(ClientFrame::Execute {
            id,
            code: request.code,
            silent: request.silent,
            store_history: request.store_history,
            stop_on_error: request.stop_on_error,
        });
        if queued.is_err() {
            self.shared.pending.lock().remove(&id);
        }
        Box::pin(async move {
            acknowledged.await.map_err(|_| {
                ChatError::Connection(format!("kernel exited before acknowledging request {id}"))
            })
        })
    }

    fn register_comm_target(&self, target: &str, handler: CommOpenHandler) {
        log::debug!("Registering comm target '{target}'");
        self.shared
            .targets
            .lock()
            .insert(target.to_string(), Arc::from(handler));
    }

    fn status_changes(&self) -> broadcast::Receiver<KernelState> {
        self.shared.status.subscribe()
    }
}

// ---------------------------------------------------------------------------
// Background tasks
// ---------------------------------------------------------------------------

async fn write_frames(mut stdin: ChildStdin, mut frames: mpsc::UnboundedReceiver<ClientFrame>) {
    while let Some(frame) = frames.recv().await {
        let mut line = match serde_json::to_string(&frame) {
            Ok(line) => line,
            Err(e) => {
                log::error!("Failed to encode kernel frame: {e}");
                continue;
            }
        };
        line.push('\n');
        if let Err(e) = stdin.write_all(line.as_bytes()).await {
            log::error!("Failed to write to kernel stdin: {e}");
            break;
        }
        if let Err(e) = stdin.flush().await {
            log::error!("Failed to flush kernel stdin: {e}");
            break;
        }
    }
}

async fn read_frames(stdout: ChildStdout, shared: Arc<Shared>) {
    let mut reader = BufReader::new(stdout);
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                match serde_json::from_str::<KernelFrame>(trimmed) {
                    Ok(frame) => shared.handle_frame(frame),
                    Err(e) => log::error!("Failed to parse kernel frame: {e}"),
                }
            }
            Err(e) => {
                log::error!("Error reading from kernel stdout: {e}");
                break;
            }
        }
    }
    log::warn!("Kernel process closed its output");
    shared.shut_down();
}
