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

//! Pyright LSP backend.
//!
//! Speaks the language server protocol over the child's stdio.  A reader
//! thread owns stdout and forwards parsed responses over a channel, so
//! request deadlines are enforced with `recv_timeout` rather than by
//! trusting the server to answer.

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use super::{TypeBackend, TypeQuery};

#[derive(Debug, Deserialize)]
struct RpcReply {
    id: Option<u64>,
    result: Option<Value>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    message: String,
}

pub struct PyrightBackend {
    child: Child,
    stdin: ChildStdin,
    replies: Receiver<RpcReply>,
    next_id: u64,
    versions: HashMap<PathBuf, i32>,
    shut_down: bool,
}

impl PyrightBackend {
    /// Start `pyright-langserver --stdio` and run the LSP handshake.
    pub fn start(workspace_root: Option<&Path>) -> Result<Self> {
        let command = ["pyright-langserver", "pyright"]
            .into_iter()
            .find(|cmd| {
                Command::new(*cmd)
                    .arg("--version")
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .status()
                    .is_ok()
            })
            .ok_or_else(|| anyhow!("pyright not found; install it with: pip install pyright"))?;

        tracing::debug!("starting {} --stdio", command);
        let mut child = Command::new(command)
            .arg("--stdio")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("failed to start {}", command))?;

        let stdin = child.stdin.take().ok_or_else(|| anyhow!("no stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| anyhow!("no stdout"))?;

        let (sender, replies) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            let mut reader = BufReader::new(stdout);
            while let Ok(Some(message)) = read_frame(&mut reader) {
                if let Ok(reply) = serde_json::from_slice::<RpcReply>(&message) {
                    if reply.id.is_some() && sender.send(reply).is_err() {
                        break;
                    }
                }
            }
        });

        let mut backend = Self {
            child,
            stdin,
            replies,
            next_id: 0,
            versions: HashMap::new(),
            shut_down: false,
        };
        backend.initialize(workspace_root)?;
        Ok(backend)
    }

    fn initialize(&mut self, workspace_root: Option<&Path>) -> Result<()> {
        let root = match workspace_root {
            Some(root) => root.to_path_buf(),
            None => std::env::current_dir()?,
        };
        let root_uri = file_uri(&root);

        self.request(
            "initialize",
            json!({
                "processId": std::process::id(),
                "clientInfo": { "name": "sundown", "version": env!("CARGO_PKG_VERSION") },
                "rootUri": root_uri.as_str(),
                "capabilities": {
                    "textDocument": {
                        "hover": { "contentFormat": ["plaintext", "markdown"] }
                    }
                },
                "workspaceFolders": [{ "uri": root_uri.as_str(), "name": "workspace" }],
                "initializationOptions": {
                    "autoSearchPaths": true,
                    "useLibraryCodeForTypes": true,
                    "typeCheckingMode": "basic"
                }
            }),
            Duration::from_secs(10),
        )?;
        self.notify("initialized", json!({}))?;
        Ok(())
    }

    fn send(&mut self, payload: &Value) -> Result<()> {
        let content = serde_json::to_string(payload)?;
        write!(self.stdin, "Content-Length: {}\r\n\r\n{}", content.len(), content)?;
        self.stdin.flush()?;
        Ok(())
    }

    fn notify(&mut self, method: &str, params: Value) -> Result<()> {
        self.send(&json!({ "jsonrpc": "2.0", "method": method, "params": params }))
    }

    fn request(&mut self, method: &str, params: Value, deadline: Duration) -> Result<Value> {
        let id = self.next_id;
        self.next_id += 1;
        self.send(&json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params }))?;

        let limit = Instant::now() + deadline;
        loop {
            let remaining = limit
                .checked_duration_since(Instant::now())
                .unwrap_or(Duration::ZERO);
            match self.replies.recv_timeout(remaining) {
                Ok(reply) if reply.id == Some(id) => {
                    if let Some(error) = reply.error {
                        bail!("lsp error: {}", error.message);
                    }
                    return Ok(reply.result.unwrap_or(Value::Null));
                }
                Ok(_) => continue, // stale reply from an abandoned request
                Err(RecvTimeoutError::Timeout) => bail!("{} timed out after {:?}", method, deadline),
                Err(RecvTimeoutError::Disconnected) => bail!("pyright exited"),
            }
        }
    }

    /// Parse pyright's hover rendering into a class name.
    fn type_from_hover(contents: &Value) -> Option<String> {
        let text = match contents {
            Value::String(s) => s.clone(),
            Value::Object(obj) => obj.get("value")?.as_str()?.to_string(),
            _ => return None,
        };

        for prefix in ["(module) ", "(class) "] {
            if let Some(rest) = text.strip_prefix(prefix) {
                let end = rest.find('\n').unwrap_or(rest.len());
                return Some(rest[..end].trim().to_string());
            }
        }

        // Variable form: "(variable) repo: Repo".
        let colon = text.find(':')?;
        let type_part = text[colon + 1..].trim();
        let end = type_part.find('\n').unwrap_or(type_part.len());
        Some(type_part[..end].trim().to_string())
    }
}

impl TypeBackend for PyrightBackend {
    fn label(&self) -> &'static str {
        "pyright"
    }

    fn open_file(&mut self, file: &Path, text: &str) -> Result<()> {
        self.versions.insert(file.to_path_buf(), 1);
        self.notify(
            "textDocument/didOpen",
            json!({
                "textDocument": {
                    "uri": file_uri(file),
                    "languageId": "python",
                    "version": 1,
                    "text": text
                }
            }),
        )
    }

    fn update_file(&mut self, file: &Path, text: &str) -> Result<()> {
        let version = *self
            .versions
            .entry(file.to_path_buf())
            .and_modify(|v| *v += 1)
            .or_insert(1);
        self.notify(
            "textDocument/didChange",
            json!({
                "textDocument": { "uri": file_uri(file), "version": version },
                "contentChanges": [{ "text": text }]
            }),
        )
    }

    fn class_of(&mut self, query: &TypeQuery<'_>, deadline: Duration) -> Result<Option<String>> {
        let result = self.request(
            "textDocument/hover",
            json!({
                "textDocument": { "uri": file_uri(query.file) },
                "position": { "line": query.line - 1, "character": query.column }
            }),
            deadline,
        )?;

        let resolved = result
            .get("contents")
            .and_then(Self::type_from_hover);
        tracing::debug!(
            "pyright hover for '{}' at {}:{}: {:?}",
            query.receiver,
            query.line,
            query.column,
            resolved
        );
        Ok(resolved)
    }

    fn shutdown(&mut self) -> Result<()> {
        if self.shut_down {
            return Ok(());
        }
        self.shut_down = true;
        // Best effort; the process is killed on drop regardless.
        let _ = self.request("shutdown", json!(null), Duration::from_secs(2));
        let _ = self.notify("exit", json!(null));
        Ok(())
    }
}

impl Drop for PyrightBackend {
    fn drop(&mut self) {
        let _ = self.shutdown();
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn file_uri(path: &Path) -> String {
    let absolute = if path.is_relative() {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    } else {
        path.to_path_buf()
    };
    format!("file://{}", absolute.display())
}

fn read_frame(reader: &mut BufReader<impl Read>) -> Result<Option<Vec<u8>>> {
    let mut content_length: Option<usize> = None;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some(value) = line.strip_prefix("Content-Length:") {
            content_length = value.trim().parse().ok();
        }
    }

    let length = content_length.ok_or_else(|| anyhow!("missing Content-Length header"))?;
    let mut content = vec![0u8; length];
    reader.read_exact(&mut content)?;
    Ok(Some(content))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hover_parsing() {
        assert_eq!(
            PyrightBackend::type_from_hover(&json!("(variable) repo: Repo")),
            Some("Repo".to_string())
        );
        assert_eq!(
            PyrightBackend::type_from_hover(&json!({"kind": "markdown", "value": "(class) Repo\ndocs"})),
            Some("Repo".to_string())
        );
        assert_eq!(
            PyrightBackend::type_from_hover(&json!("(module) pkg.repo\nmore")),
            Some("pkg.repo".to_string())
        );
        assert_eq!(PyrightBackend::type_from_hover(&json!(42)), None);
    }

    #[test]
    fn frame_reader_handles_headers() {
        let data = b"Content-Length: 7\r\n\r\n{\"a\":1}";
        let mut reader = BufReader::new(&data[..]);
        let frame = read_frame(&mut reader).unwrap().unwrap();
        assert_eq!(frame, b"{\"a\":1}");
        assert!(read_frame(&mut reader).unwrap().is_none());
    }
}
