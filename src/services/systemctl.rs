// Written by Paul Clevett
// (C)Copyright Wolf Software Systems Ltd
// https://wolf.uk.com

//! Command-line service backend — `systemctl` and `journalctl`
//!
//! Used whenever the D-Bus path is unavailable or a D-Bus call fails, and
//! always for status text and journal logs, which have no structured
//! equivalent on the manager interface.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use super::parse::{self, UnitRow};
use super::{ServiceBackend, ServiceError, ServiceRecord};

pub const NO_LOGS: &str = "No logs available";

/// Captured result of a finished child process
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// `None` when the process was killed by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Runs an external program to completion or until `timeout` expires
///
/// Only spawn failures and timeouts are errors here; exit codes are judged
/// by the caller.
pub trait CommandRunner: Send + Sync {
    fn run(&self, program: &str, args: &[&str], timeout: Duration) -> Result<CommandOutput, ServiceError>;
}

impl<F> CommandRunner for F
where
    F: Fn(&str, &[&str], Duration) -> Result<CommandOutput, ServiceError> + Send + Sync,
{
    fn run(&self, program: &str, args: &[&str], timeout: Duration) -> Result<CommandOutput, ServiceError> {
        self(program, args, timeout)
    }
}

/// Runs real processes on the host
///
/// Children are spawned on a small runtime owned by the runner, so callers on
/// plain or blocking-pool threads can wait on them with a deadline. A child
/// that outlives its deadline is killed through its handle when the wait is
/// dropped.
pub struct SystemRunner {
    runtime: Option<tokio::runtime::Runtime>,
}

impl SystemRunner {
    pub fn new() -> std::io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("wolfhost-cmd")
            .enable_all()
            .build()?;
        Ok(Self { runtime: Some(runtime) })
    }
}

impl Drop for SystemRunner {
    fn drop(&mut self) {
        // May be dropped from inside the server's async context
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[&str], timeout: Duration) -> Result<CommandOutput, ServiceError> {
        let command = display_command(program, args);
        let runtime = self.runtime.as_ref()
            .ok_or_else(|| ServiceError::Unreachable("command runner has shut down".to_string()))?;

        runtime.block_on(async {
            let child = Command::new(program)
                .args(args)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .spawn()
                .map_err(|e| ServiceError::Unreachable(format!("Failed to run {}: {}", program, e)))?;

            match tokio::time::timeout(timeout, child.wait_with_output()).await {
                Ok(Ok(output)) => Ok(CommandOutput {
                    code: output.status.code(),
                    stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                    stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                }),
                Ok(Err(e)) => Err(ServiceError::Unreachable(format!("Failed to run {}: {}", command, e))),
                Err(_) => {
                    warn!("Command timed out after {:?}: {}", timeout, command);
                    Err(ServiceError::Timeout { command: command.clone() })
                }
            }
        })
    }
}

fn display_command(program: &str, args: &[&str]) -> String {
    std::iter::once(program).chain(args.iter().copied()).collect::<Vec<_>>().join(" ")
}

/// Service backend that shells out to `systemctl`
pub struct SystemctlBackend {
    runner: Box<dyn CommandRunner>,
    command_timeout: Duration,
    enablement_timeout: Duration,
    journal_dir: Option<PathBuf>,
}

impl SystemctlBackend {
    pub fn new(
        runner: Box<dyn CommandRunner>,
        command_timeout: Duration,
        enablement_timeout: Duration,
        journal_dir: Option<PathBuf>,
    ) -> Self {
        Self { runner, command_timeout, enablement_timeout, journal_dir }
    }

    /// Run systemctl; with `check` a non-zero exit becomes `CommandFailed`
    fn systemctl(&self, args: &[&str], timeout: Duration, check: bool) -> Result<CommandOutput, ServiceError> {
        let output = self.runner.run("systemctl", args, timeout)?;
        if check && !output.success() {
            return Err(ServiceError::CommandFailed {
                code: output.code,
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(output)
    }

    fn control(&self, verb: &str, unit: &str) -> Result<(), ServiceError> {
        self.systemctl(&[verb, unit], self.command_timeout, true).map(|_| ())
    }

    /// `is-enabled` exits non-zero for disabled units, so only stdout counts
    fn is_enabled_quiet(&self, unit: &str) -> bool {
        match self.systemctl(&["is-enabled", unit], self.enablement_timeout, false) {
            Ok(output) => parse::is_enabled_state(&output.stdout),
            Err(e) => {
                debug!("is-enabled {} failed: {}", unit, e);
                false
            }
        }
    }

    /// Full `systemctl status` text; inactive units exit non-zero, which is expected
    pub fn status_text(&self, unit: &str) -> Result<String, ServiceError> {
        let output = self.systemctl(&["status", unit, "--no-pager"], self.command_timeout, false)?;
        Ok(output.stdout)
    }

    /// Most recent `lines` journal entries for a unit
    ///
    /// A host journal mounted into this container is preferred over the
    /// container's own live journal. journalctl does not tell a missing unit
    /// apart from a quiet one, so both come back as the no-logs sentinel.
    pub fn journal(&self, unit: &str, lines: u32) -> Result<String, ServiceError> {
        let count = lines.to_string();
        let mut args: Vec<&str> = Vec::new();
        let dir = self.journal_dir.as_deref().filter(|d| has_machine_journals(d));
        let dir_arg = dir.map(|d| d.to_string_lossy().to_string());
        if let Some(d) = dir_arg.as_deref() {
            args.extend(["-D", d]);
        }
        args.extend(["-u", unit, "-n", count.as_str(), "--no-pager"]);

        let output = self.runner.run("journalctl", &args, self.command_timeout)?;
        Ok(last_lines(&output.stdout, lines))
    }

    fn list_rows(&self) -> Result<Vec<UnitRow>, ServiceError> {
        let output = self.systemctl(
            &["list-units", "--type=service", "--all", "--no-pager", "--output=json"],
            self.command_timeout,
            false,
        )?;

        match parse::list_units_json(&output.stdout) {
            Ok(rows) => Ok(rows),
            Err(e) => {
                warn!("systemctl list-units JSON unparseable ({}), reading text columns instead", e);
                let rows = parse::list_units_text(&output.stdout);
                if rows.is_empty() && !output.success() {
                    return Err(ServiceError::CommandFailed {
                        code: output.code,
                        stderr: output.stderr.trim().to_string(),
                    });
                }
                Ok(rows)
            }
        }
    }
}

impl ServiceBackend for SystemctlBackend {
    fn name(&self) -> &'static str {
        "systemctl"
    }

    fn list_units(&self) -> Result<Vec<ServiceRecord>, ServiceError> {
        let rows = self.list_rows()?;
        Ok(rows.into_iter()
            .map(|row| {
                let enabled = self.is_enabled_quiet(&row.unit);
                row.into_record(enabled)
            })
            .collect())
    }

    fn start_unit(&self, unit: &str) -> Result<(), ServiceError> {
        self.control("start", unit)
    }

    fn stop_unit(&self, unit: &str) -> Result<(), ServiceError> {
        self.control("stop", unit)
    }

    fn restart_unit(&self, unit: &str) -> Result<(), ServiceError> {
        self.control("restart", unit)
    }

    fn enable_unit(&self, unit: &str) -> Result<(), ServiceError> {
        self.control("enable", unit)
    }

    fn disable_unit(&self, unit: &str) -> Result<(), ServiceError> {
        self.control("disable", unit)
    }

    fn unit_enabled(&self, unit: &str) -> Result<bool, ServiceError> {
        let output = self.systemctl(&["is-enabled", unit], self.enablement_timeout, false)?;
        Ok(parse::is_enabled_state(&output.stdout))
    }
}

/// A journal directory is usable once journald has created a machine-id folder in it
fn has_machine_journals(dir: &Path) -> bool {
    std::fs::read_dir(dir)
        .map(|entries| entries.flatten().any(|e| e.path().is_dir()))
        .unwrap_or(false)
}

/// Keep at most `limit` trailing lines; older journalctl prints a
/// "-- Logs begin at" header on top of the requested entries
fn last_lines(output: &str, limit: u32) -> String {
    if output.trim().is_empty() {
        return NO_LOGS.to_string();
    }
    let lines: Vec<&str> = output.lines().collect();
    let skip = lines.len().saturating_sub(limit as usize);
    let mut text = lines[skip..].join("\n");
    if text.trim().is_empty() {
        return NO_LOGS.to_string();
    }
    text.push('\n');
    text
}

#[cfg(test)]
impl CommandOutput {
    pub fn exit(code: i32, stdout: &str, stderr: &str) -> Self {
        Self { code: Some(code), stdout: stdout.to_string(), stderr: stderr.to_string() }
    }

    pub fn ok(stdout: &str) -> Self {
        Self::exit(0, stdout, "")
    }
}
