// src/exec/process.rs

//! Executor that runs tasks as OS processes.

use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;

use anyhow::{Context, Result, anyhow};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

use crate::dag::{TaskParameters, is_puppet_kind};
use crate::exec::{TaskExecutor, TaskInvocation, TaskOutcome};

/// Environment variable carrying the target node to local commands.
pub const TARGET_ENV: &str = "DEPLOY_TARGET";

/// Runs `puppet` and `shell` tasks.
///
/// Commands go through `sh -c` on this host, or through `remote_shell`
/// followed by the target node when one is configured and the unit has a
/// target. Children are killed when the execution future is dropped, so a
/// timeout or abort never leaves a process behind.
#[derive(Debug, Clone, Default)]
pub struct ProcessExecutor {
    remote_shell: Option<Vec<String>>,
}

impl ProcessExecutor {
    pub fn new(remote_shell: Option<Vec<String>>) -> Self {
        Self { remote_shell }
    }

    /// Program and arguments for one invocation.
    fn argv(&self, script: &str, target: Option<&str>) -> Vec<String> {
        match (&self.remote_shell, target) {
            (Some(prefix), Some(target)) => {
                let mut argv = prefix.clone();
                argv.push(target.to_string());
                argv.push(script.to_string());
                argv
            }
            _ => vec!["sh".to_string(), "-c".to_string(), script.to_string()],
        }
    }

    async fn run(&self, invocation: &TaskInvocation, target: Option<&str>) -> Result<TaskOutcome> {
        let script = command_line(invocation)?;
        let argv = self.argv(&script, target);
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| anyhow!("empty command line"))?;

        info!(
            task = %invocation.task,
            target = target.unwrap_or("local"),
            cmd = %script,
            "starting task process"
        );

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(target) = target {
            cmd.env(TARGET_ENV, target);
        }

        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawning process for task '{}'", invocation.task))?;

        // Always drain both pipes so the child never blocks on a full buffer.
        if let Some(stdout) = child.stdout.take() {
            let task = invocation.task.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(task = %task, "stdout: {}", line);
                }
            });
        }
        if let Some(stderr) = child.stderr.take() {
            let task = invocation.task.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(task = %task, "stderr: {}", line);
                }
            });
        }

        let status = child
            .wait()
            .await
            .with_context(|| format!("waiting for process of task '{}'", invocation.task))?;
        let code = status.code();

        info!(
            task = %invocation.task,
            target = target.unwrap_or("local"),
            exit_code = code.unwrap_or(-1),
            "task process exited"
        );

        Ok(match code {
            Some(code) if exit_ok(&invocation.kind, code) => TaskOutcome::Success,
            Some(code) => TaskOutcome::Failed(format!("exit code {code}")),
            None => TaskOutcome::Failed("terminated by signal".to_string()),
        })
    }
}

impl TaskExecutor for ProcessExecutor {
    fn execute<'a>(
        &'a self,
        invocation: &'a TaskInvocation,
        target: Option<&'a str>,
    ) -> Pin<Box<dyn Future<Output = TaskOutcome> + Send + 'a>> {
        Box::pin(async move {
            match self.run(invocation, target).await {
                Ok(outcome) => outcome,
                Err(err) => TaskOutcome::Failed(format!("{err:#}")),
            }
        })
    }
}

/// Shell command line for an invocation.
pub fn command_line(invocation: &TaskInvocation) -> Result<String> {
    match &invocation.params {
        TaskParameters::Puppet(p) => {
            let mut words = vec!["puppet", "apply", "--detailed-exitcodes"];
            if let Some(modules) = &p.modules {
                words.extend(["--modulepath", modules.as_str()]);
            }
            words.push(&p.manifest);
            Ok(shell_words::join(words))
        }
        TaskParameters::Generic(_) if invocation.kind == "shell" => invocation
            .params
            .value("cmd")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| anyhow!("shell task '{}' has no 'cmd' parameter", invocation.task)),
        TaskParameters::Generic(_) => Err(anyhow!(
            "unsupported task kind '{}' for task '{}'",
            invocation.kind,
            invocation.task
        )),
    }
}

/// `puppet apply --detailed-exitcodes` exits 2 when it applied changes.
fn exit_ok(kind: &str, code: i32) -> bool {
    code == 0 || (is_puppet_kind(kind) && code == 2)
}
