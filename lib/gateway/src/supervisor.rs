// SPDX-FileCopyrightText: Copyright (c) 2025 Gantry Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Worker process supervision.
//!
//! Each worker is spawned with the write end of a dedicated one-shot pipe
//! and must send exactly one message on it: the literal `init ok`, or a
//! free-text error. Launch succeeds only when every worker reports success
//! (wait-all; arrival order is irrelevant). Any failure tears the whole
//! set down — no partial cluster is left running.

use std::fmt;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use sysinfo::{Pid as SysPid, ProcessesToUpdate, System};
use tokio::io::{AsyncBufReadExt, AsyncReadExt};
use tokio::process::{Child, Command};

/// The literal success token a worker sends on its readiness channel.
pub const READY_MESSAGE: &str = "init ok";

/// Flag carrying the readiness-pipe fd to the worker.
pub const READY_FD_FLAG: &str = "--ready-fd";

/// Bound on how long a worker may take to report readiness. Model loading
/// is slow; CI hangs should still terminate.
const LAUNCH_TIMEOUT: Duration = Duration::from_secs(300);

/// Grace period between asking a process tree to terminate and killing it.
const TEARDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchStage {
    Scheduler,
    Detokenizer,
}

impl fmt::Display for LaunchStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LaunchStage::Scheduler => write!(f, "scheduler"),
            LaunchStage::Detokenizer => write!(f, "detokenizer"),
        }
    }
}

/// Launch-time failures are fatal to the whole server, unlike request
/// errors.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("failed to spawn {stage} worker: {detail}")]
    Spawn { stage: LaunchStage, detail: String },

    #[error("{stage} worker failed readiness: {detail}")]
    Readiness { stage: LaunchStage, detail: String },

    #[error("timed out waiting for {stage} worker readiness")]
    Timeout { stage: LaunchStage },
}

#[derive(Debug, Clone)]
pub struct WorkerSpec {
    pub stage: LaunchStage,
    pub command: PathBuf,
    pub args: Vec<String>,
}

/// One spawned worker. Mutated only by the supervisor, never by
/// request-handling code.
#[derive(Debug)]
pub struct WorkerHandle {
    pub stage: LaunchStage,
    child: Child,
    pid: Option<u32>,
    ready: tokio::fs::File,
}

/// The set of spawned workers; owns their lifecycle.
#[derive(Debug)]
pub struct WorkerSet {
    workers: Vec<WorkerHandle>,
}

/// Spawn every worker, then block until each has reported on its readiness
/// channel. On any failure all spawned processes are killed before the
/// error is returned.
pub async fn launch(specs: Vec<WorkerSpec>) -> Result<WorkerSet, LaunchError> {
    let mut set = WorkerSet {
        workers: Vec::with_capacity(specs.len()),
    };

    for spec in &specs {
        match spawn_worker(spec) {
            Ok(handle) => set.workers.push(handle),
            Err(err) => {
                set.teardown().await;
                return Err(err);
            }
        }
    }

    // Wait-all: collect every state so a failure report names them all.
    let mut failure: Option<LaunchError> = None;
    for worker in &mut set.workers {
        let outcome = wait_ready(worker.stage, &mut worker.ready).await;
        match &outcome {
            Ok(()) => tracing::info!("{} init state: {READY_MESSAGE}", worker.stage),
            Err(err) => tracing::error!("{} init state: {err}", worker.stage),
        }
        if let Err(err) = outcome {
            failure.get_or_insert(err);
        }
    }

    if let Some(err) = failure {
        set.teardown().await;
        return Err(err);
    }

    Ok(set)
}

impl WorkerSet {
    pub fn pids(&self) -> Vec<u32> {
        self.workers.iter().filter_map(|w| w.pid).collect()
    }

    /// Terminate every worker and its descendants: graceful first, then
    /// force-kill after the grace period. Safe to call repeatedly and when
    /// the targets are already gone.
    pub async fn teardown(&mut self) {
        for worker in &mut self.workers {
            let targets = worker.pid.map(process_tree).unwrap_or_default();
            for pid in &targets {
                let _ = send_signal(*pid, Signal::SIGTERM);
            }

            // reap the direct child within the grace period, then escalate
            if tokio::time::timeout(TEARDOWN_GRACE, worker.child.wait())
                .await
                .is_err()
            {
                for pid in &targets {
                    let _ = send_signal(*pid, Signal::SIGKILL);
                }
                let _ = worker.child.wait().await;
            }
        }
    }
}

fn spawn_worker(spec: &WorkerSpec) -> Result<WorkerHandle, LaunchError> {
    let stage = spec.stage;
    let spawn_err = |detail: String| LaunchError::Spawn { stage, detail };

    let (ready_read, ready_write) =
        nix::unistd::pipe().map_err(|e| spawn_err(e.to_string()))?;

    let mut child = Command::new(&spec.command)
        .args(&spec.args)
        .arg(format!("{}={}", READY_FD_FLAG, ready_write.as_raw_fd()))
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| spawn_err(e.to_string()))?;

    // The parent keeps only the read side. Dropping our copy of the write
    // end means the pipe reaches EOF if the worker dies before reporting.
    drop(ready_write);

    let pid = child.id();

    // Forward the worker's output through our own logs, line by line.
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(async move {
            let mut lines = tokio::io::BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::info!("{stage} {line}");
            }
        });
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(async move {
            let mut lines = tokio::io::BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::warn!("{stage} {line}");
            }
        });
    }

    let ready = unsafe { tokio::fs::File::from_raw_fd(ready_read.into_raw_fd()) };

    Ok(WorkerHandle {
        stage,
        child,
        pid,
        ready,
    })
}

/// Consume the single readiness message. EOF, a foreign payload, and the
/// timeout are all failures.
async fn wait_ready(stage: LaunchStage, ready: &mut tokio::fs::File) -> Result<(), LaunchError> {
    tracing::info!("waiting for {stage} worker to signal readiness");

    let mut buf = [0u8; 256];
    let len = match tokio::time::timeout(LAUNCH_TIMEOUT, ready.read(&mut buf)).await {
        Err(_) => return Err(LaunchError::Timeout { stage }),
        Ok(Err(err)) => {
            return Err(LaunchError::Readiness {
                stage,
                detail: format!("failed reading readiness pipe: {err}"),
            })
        }
        Ok(Ok(len)) => len,
    };

    if len == 0 {
        return Err(LaunchError::Readiness {
            stage,
            detail: "worker closed its readiness channel without reporting".to_string(),
        });
    }

    let message = String::from_utf8_lossy(&buf[..len]).trim().to_string();
    if message == READY_MESSAGE {
        Ok(())
    } else {
        Err(LaunchError::Readiness {
            stage,
            detail: message,
        })
    }
}

/// Terminate the process tree rooted at `root`: SIGTERM everything, wait
/// out the grace period, SIGKILL survivors. A target that is already gone
/// is success, so this is idempotent.
pub async fn teardown_tree(root: u32) -> io::Result<()> {
    let targets = process_tree(root);
    if targets.is_empty() {
        return Ok(());
    }

    for pid in &targets {
        send_signal(*pid, Signal::SIGTERM)?;
    }

    let deadline = tokio::time::Instant::now() + TEARDOWN_GRACE;
    let mut survivors = targets;
    while !survivors.is_empty() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(100)).await;
        survivors.retain(|pid| process_alive(*pid));
    }

    for pid in &survivors {
        send_signal(*pid, Signal::SIGKILL)?;
    }

    Ok(())
}

fn send_signal(pid: u32, sig: Signal) -> io::Result<()> {
    match signal::kill(Pid::from_raw(pid as i32), sig) {
        Ok(()) => Ok(()),
        // already gone: treated as already-torn-down, not an error
        Err(Errno::ESRCH) => Ok(()),
        Err(err) => Err(io::Error::other(err)),
    }
}

fn process_alive(pid: u32) -> bool {
    signal::kill(Pid::from_raw(pid as i32), None).is_ok()
}

/// The process and every live descendant, since workers may spawn their
/// own children.
fn process_tree(root: u32) -> Vec<u32> {
    let mut system = System::new_all();
    system.refresh_processes(ProcessesToUpdate::All, false);

    if system.process(SysPid::from_u32(root)).is_none() {
        return Vec::new();
    }

    let mut tree = vec![root];
    let mut cursor = 0;
    while cursor < tree.len() {
        let parent = SysPid::from_u32(tree[cursor]);
        for (pid, process) in system.processes() {
            if process.parent() == Some(parent) {
                tree.push(pid.as_u32());
            }
        }
        cursor += 1;
    }
    tree
}
