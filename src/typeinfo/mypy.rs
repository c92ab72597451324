// Copyright (C) 2024 Jelmer Vernooij <jelmer@samba.org>
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Mypy daemon backend.
//!
//! Each query is a one-shot `dmypy inspect` subprocess against a shared
//! daemon; checked files are cached so the expensive `dmypy check` runs
//! once per file version.

use anyhow::{anyhow, bail, Context, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use super::{TypeBackend, TypeQuery};

pub struct MypyBackend {
    workspace_root: PathBuf,
    daemon_started: bool,
    checked: HashSet<PathBuf>,
}

impl MypyBackend {
    pub fn new(workspace_root: Option<&Path>) -> Result<Self> {
        let workspace_root = match workspace_root {
            Some(root) => root.to_path_buf(),
            None => std::env::current_dir()?,
        };

        Command::new("dmypy")
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| anyhow!("dmypy not found ({}); install mypy", e))?;

        Ok(Self {
            workspace_root,
            daemon_started: false,
            checked: HashSet::new(),
        })
    }

    fn dmypy(&self) -> Command {
        let mut cmd = Command::new("dmypy");
        cmd.env("PYTHONPATH", &self.workspace_root)
            .current_dir(&self.workspace_root);
        cmd
    }

    fn ensure_daemon(&mut self) -> Result<()> {
        if self.daemon_started {
            return Ok(());
        }

        let status = self.dmypy().arg("status").output()?;
        if !status.status.success() {
            tracing::debug!("starting dmypy daemon");
            let output = self
                .dmypy()
                .args(["start", "--", "--python-executable", "python3"])
                .output()
                .context("failed to start dmypy")?;
            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                if !stderr.contains("alive") && !stderr.contains("already running") {
                    bail!("dmypy start failed: {}", stderr.trim());
                }
            }
        }

        self.daemon_started = true;
        Ok(())
    }

    fn ensure_checked(&mut self, file: &Path, deadline: Duration) -> Result<()> {
        if self.checked.contains(file) {
            return Ok(());
        }

        let mut cmd = self.dmypy();
        cmd.arg("check").arg(file);
        let output = run_with_deadline(cmd, deadline)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("Daemon has died") || stderr.contains("crashed") {
                self.daemon_started = false;
                bail!("dmypy daemon died");
            }
            // Type errors in the file are fine; the daemon still has
            // whatever type information it could derive.
            tracing::debug!("dmypy check reported issues for {}", file.display());
        }

        self.checked.insert(file.to_path_buf());
        Ok(())
    }
}

impl TypeBackend for MypyBackend {
    fn label(&self) -> &'static str {
        "mypy"
    }

    fn open_file(&mut self, _file: &Path, _text: &str) -> Result<()> {
        // dmypy reads from disk; warming happens at the first query.
        Ok(())
    }

    fn update_file(&mut self, file: &Path, _text: &str) -> Result<()> {
        self.checked.remove(file);
        Ok(())
    }

    fn class_of(&mut self, query: &TypeQuery<'_>, deadline: Duration) -> Result<Option<String>> {
        let started = Instant::now();
        self.ensure_daemon()?;
        self.ensure_checked(query.file, deadline)?;

        let remaining = deadline
            .checked_sub(started.elapsed())
            .unwrap_or(Duration::ZERO);
        let location = format!(
            "{}:{}:{}",
            query.file.display(),
            query.line,
            // dmypy inspect columns are 1-based.
            query.column + 1
        );
        let mut cmd = self.dmypy();
        cmd.args(["inspect", "--show", "type", "--limit", "1"]).arg(&location);
        let output = run_with_deadline(cmd, remaining)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("Daemon has died") || stderr.contains("crashed") {
                self.daemon_started = false;
                bail!("dmypy daemon died");
            }
            tracing::debug!("dmypy inspect failed at {}: {}", location, stderr.trim());
            return Ok(None);
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(first_concrete_type(&stdout))
    }

    fn shutdown(&mut self) -> Result<()> {
        // Leave the daemon running: other processes may share it and it
        // times out on its own.
        self.checked.clear();
        Ok(())
    }
}

/// Pick the first usable type out of dmypy's line-per-candidate output.
fn first_concrete_type(stdout: &str) -> Option<String> {
    for line in stdout.lines() {
        let candidate = line.trim().trim_matches('"');
        if candidate.is_empty() || candidate == "None" || candidate == "Any" {
            continue;
        }
        if candidate.contains('.') && !candidate.starts_with("builtins.") {
            let base = candidate.split('|').next().unwrap_or(candidate).trim();
            if base != "Any" {
                return Some(base.to_string());
            }
        }
        return Some(candidate.to_string());
    }
    None
}

/// Run a subprocess with a wall-clock bound, killing it on expiry.
fn run_with_deadline(mut cmd: Command, deadline: Duration) -> Result<std::process::Output> {
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    let mut child = cmd.spawn().context("failed to spawn dmypy")?;
    let limit = Instant::now() + deadline;

    loop {
        match child.try_wait()? {
            Some(_) => return Ok(child.wait_with_output()?),
            None => {
                if Instant::now() >= limit {
                    let _ = child.kill();
                    let _ = child.wait();
                    bail!("dmypy query exceeded {:?}", deadline);
                }
                std::thread::sleep(Duration::from_millis(10));
            }
        }
    }
}
