//! Lifecycle hook commands.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{info, warn};

/// Shell commands run around a service's lifecycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Hooks {
    pub pre_up: Vec<String>,
    pub post_up: Vec<String>,
    pub pre_down: Vec<String>,
    pub post_down: Vec<String>,
}

impl Hooks {
    pub fn commands(&self, phase: HookPhase) -> &[String] {
        match phase {
            HookPhase::PreUp => &self.pre_up,
            HookPhase::PostUp => &self.post_up,
            HookPhase::PreDown => &self.pre_down,
            HookPhase::PostDown => &self.post_down,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPhase {
    PreUp,
    PostUp,
    PreDown,
    PostDown,
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HookPhase::PreUp => "pre-up",
            HookPhase::PostUp => "post-up",
            HookPhase::PreDown => "pre-down",
            HookPhase::PostDown => "post-down",
        };
        f.write_str(name)
    }
}

/// Runs each command of `phase` in order through `/bin/sh -c`
///
/// Blank entries are skipped. A command that cannot be spawned or exits
/// unsuccessfully is logged and the remaining commands still run.
pub async fn run_hooks(service: &str, phase: HookPhase, hooks: &Hooks) {
    for cmd in hooks.commands(phase) {
        let cmd = cmd.trim();
        if cmd.is_empty() {
            continue;
        }

        info!(service, %phase, cmd, "Running hook command");
        let output = Command::new("/bin/sh")
            .arg("-c")
            .arg(cmd)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await;

        match output {
            Ok(output) if output.status.success() => {}
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                warn!(service, %phase, cmd, status = %output.status, stderr = %stderr.trim(), "Hook command failed");
            }
            Err(e) => warn!(service, %phase, cmd, error = %e, "Failed to spawn hook command"),
        }
    }
}
