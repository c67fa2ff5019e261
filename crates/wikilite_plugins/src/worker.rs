use crate::error::{PluginError, Result};
use crate::job::{Job, JobKind, JobOutput, JobResult};
use crate::lua_sandbox::{Sandbox, SandboxBlueprint};
use crossbeam_channel::{Receiver, Sender, select};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, info, warn};

/// Lifecycle of a pool worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Initializing,
    Ready,
    Draining,
    Stopped,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Outcome a worker reports once its sandbox is built (or failed to build)
pub(crate) type InitReport = (usize, Result<()>);

/// Handle kept by the dispatcher for one worker thread
pub(crate) struct WorkerHandle {
    pub id: usize,
    pub state: Arc<Mutex<WorkerState>>,
    pub thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn state(&self) -> WorkerState {
        *self.state.lock()
    }
}

/// Start worker `id`. The thread builds its own sandbox, reports on `ready`,
/// then serves jobs until `stop` fires or the job channel closes.
pub(crate) fn spawn(
    id: usize,
    blueprint: Arc<SandboxBlueprint>,
    jobs: Receiver<Job>,
    stop: Receiver<()>,
    ready: Sender<InitReport>,
) -> Result<WorkerHandle> {
    let state = Arc::new(Mutex::new(WorkerState::Initializing));
    let thread_state = Arc::clone(&state);

    let thread = std::thread::Builder::new()
        .name(format!("plugin-worker-{id}"))
        .spawn(move || run(id, &blueprint, &jobs, &stop, ready, &thread_state))?;

    Ok(WorkerHandle {
        id,
        state,
        thread: Some(thread),
    })
}

fn run(
    id: usize,
    blueprint: &SandboxBlueprint,
    jobs: &Receiver<Job>,
    stop: &Receiver<()>,
    ready: Sender<InitReport>,
    state: &Mutex<WorkerState>,
) {
    let sandbox = match Sandbox::new(blueprint) {
        Ok(sandbox) => sandbox,
        Err(e) => {
            warn!("Worker {} failed to initialize: {}", id, e);
            *state.lock() = WorkerState::Stopped;
            let _ = ready.send((
                id,
                Err(PluginError::SandboxInit {
                    worker: id,
                    reason: e.to_string(),
                }),
            ));
            return;
        }
    };

    *state.lock() = WorkerState::Ready;
    let _ = ready.send((id, Ok(())));
    drop(ready);
    debug!("Worker {} ready with {} plugins", id, blueprint.plugins.len());

    loop {
        select! {
            recv(stop) -> _ => break,
            recv(jobs) -> msg => match msg {
                Ok(job) => handle(id, &sandbox, job),
                Err(_) => break,
            },
        }
    }

    *state.lock() = WorkerState::Draining;
    drop(sandbox);
    *state.lock() = WorkerState::Stopped;
    info!("Worker {} stopped", id);
}

fn handle(id: usize, sandbox: &Sandbox, job: Job) {
    let label = job.label();
    debug!("Worker {} running {}", id, label);

    let result = execute(sandbox, &job.kind, job.context_json.as_deref());
    if let Err(e) = &result {
        debug!("Worker {} job {} failed: {}", id, label, e);
    }

    // The caller may have given up already
    if job.reply.send(result).is_err() {
        debug!("Worker {}: caller for {} is gone", id, label);
    }
}

fn execute(sandbox: &Sandbox, kind: &JobKind, context_json: Option<&str>) -> JobResult {
    match kind {
        JobKind::Pipeline { hook, input } => {
            let run = sandbox.run_pipeline(hook, input, context_json)?;
            Ok(JobOutput {
                content: run.content,
                faults: run.faults,
            })
        }
        JobKind::Action {
            plugin_id,
            action,
            payload,
        } => {
            let content = sandbox.run_action(plugin_id, action, payload, context_json)?;
            Ok(JobOutput {
                content,
                faults: Vec::new(),
            })
        }
    }
}
