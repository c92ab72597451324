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

//! Receiver type resolution.
//!
//! Method call sites are only rewritten when the declaring class of the
//! receiver is known.  That knowledge comes from an external type checker
//! behind the [`TypeBackend`] trait; sessions wrap a backend with a
//! per-query deadline and degrade to "unknown" instead of failing the
//! migration when the backend is absent, slow, or unhealthy.

pub mod mypy;
pub mod pyright;

use anyhow::Result;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Which backend to use for receiver type queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeMethod {
    Pyright,
    Mypy,
    Disabled,
}

/// One positional type query.
#[derive(Debug)]
pub struct TypeQuery<'a> {
    pub file: &'a Path,
    /// 1-based line.
    pub line: u32,
    /// 0-based character column.
    pub column: u32,
    /// Source text of the receiver expression, for backends that resolve
    /// by name rather than position.
    pub receiver: &'a str,
}

/// A type checker that can answer "what class is this expression".
pub trait TypeBackend: Send {
    fn label(&self) -> &'static str;

    fn open_file(&mut self, file: &Path, text: &str) -> Result<()>;

    fn update_file(&mut self, file: &Path, text: &str) -> Result<()>;

    /// Fully qualified (or at least simple) class name of the expression at
    /// the query position, or `None` when the checker has no answer.
    fn class_of(&mut self, query: &TypeQuery<'_>, deadline: Duration) -> Result<Option<String>>;

    fn shutdown(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Fixed-table backend resolving receivers by their source text.  Stands in
/// for a live checker in tests and for driver-injected knowledge.
#[derive(Debug, Default)]
pub struct StaticTableBackend {
    pub by_receiver: HashMap<String, String>,
}

impl StaticTableBackend {
    pub fn new(entries: &[(&str, &str)]) -> Self {
        Self {
            by_receiver: entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

impl TypeBackend for StaticTableBackend {
    fn label(&self) -> &'static str {
        "static-table"
    }

    fn open_file(&mut self, _file: &Path, _text: &str) -> Result<()> {
        Ok(())
    }

    fn update_file(&mut self, _file: &Path, _text: &str) -> Result<()> {
        Ok(())
    }

    fn class_of(&mut self, query: &TypeQuery<'_>, _deadline: Duration) -> Result<Option<String>> {
        Ok(self.by_receiver.get(query.receiver).cloned())
    }
}

enum BackendState {
    Unstarted(TypeMethod),
    Ready(Box<dyn TypeBackend>),
    Unavailable,
}

/// Long-lived resolver owned by one worker.  Backends are started on first
/// use and leased to one file session at a time.
pub struct TypeEngine {
    state: BackendState,
    timeout: Duration,
}

impl TypeEngine {
    pub fn new(method: TypeMethod, timeout: Duration) -> Self {
        let state = match method {
            TypeMethod::Disabled => BackendState::Unavailable,
            other => BackendState::Unstarted(other),
        };
        Self { state, timeout }
    }

    pub fn disabled() -> Self {
        Self::new(TypeMethod::Disabled, DEFAULT_QUERY_TIMEOUT)
    }

    /// Engine backed by an explicit implementation, used by tests.
    pub fn with_backend(backend: Box<dyn TypeBackend>, timeout: Duration) -> Self {
        Self {
            state: BackendState::Ready(backend),
            timeout,
        }
    }

    fn backend(&mut self) -> Option<&mut Box<dyn TypeBackend>> {
        let pending = match &self.state {
            BackendState::Unstarted(method) => Some(*method),
            _ => None,
        };
        if let Some(method) = pending {
            self.state = match start_backend(method) {
                Ok(backend) => BackendState::Ready(backend),
                Err(e) => {
                    // One warning; every later query degrades to unknown.
                    tracing::warn!(
                        "type backend unavailable ({}); migrating without type information",
                        e
                    );
                    BackendState::Unavailable
                }
            };
        }
        match &mut self.state {
            BackendState::Ready(backend) => Some(backend),
            _ => None,
        }
    }

    /// Open a session scoped to one file.
    pub fn session<'e>(&'e mut self, file: &Path, text: &str) -> TypeSession<'e> {
        TypeSession {
            engine: self,
            file: file.to_path_buf(),
            text: text.to_string(),
            opened: false,
            unhealthy: false,
            cache: HashMap::new(),
        }
    }

    pub fn shutdown(&mut self) {
        if let BackendState::Ready(backend) = &mut self.state {
            if let Err(e) = backend.shutdown() {
                tracing::debug!("backend shutdown failed: {}", e);
            }
        }
    }
}

fn start_backend(method: TypeMethod) -> Result<Box<dyn TypeBackend>> {
    match method {
        TypeMethod::Pyright => Ok(Box::new(pyright::PyrightBackend::start(None)?)),
        TypeMethod::Mypy => Ok(Box::new(mypy::MypyBackend::new(None)?)),
        TypeMethod::Disabled => unreachable!("disabled engines never start a backend"),
    }
}

/// Per-file view of the engine.  The file is warmed into the backend on the
/// first query; a timeout marks the session unhealthy and short-circuits
/// every later query in the same file.
pub struct TypeSession<'e> {
    engine: &'e mut TypeEngine,
    file: PathBuf,
    text: String,
    opened: bool,
    unhealthy: bool,
    cache: HashMap<(u32, u32), Option<String>>,
}

impl TypeSession<'_> {
    /// Resolve the class of the receiver at a position; `None` is "unknown".
    pub fn class_of(&mut self, line: u32, column: u32, receiver: &str) -> Option<String> {
        if self.unhealthy {
            return None;
        }
        if let Some(cached) = self.cache.get(&(line, column)) {
            return cached.clone();
        }

        let timeout = self.engine.timeout;
        let file = self.file.clone();
        let needs_open = !self.opened;
        let text = self.text.clone();

        let backend = self.engine.backend()?;
        if needs_open {
            if let Err(e) = backend.open_file(&file, &text) {
                tracing::warn!("cannot open {} in type backend: {}", file.display(), e);
                self.unhealthy = true;
                return None;
            }
            self.opened = true;
        }

        let query = TypeQuery {
            file: &file,
            line,
            column,
            receiver,
        };
        let resolved = match backend.class_of(&query, timeout) {
            Ok(Some(raw)) => normalize_type(&raw),
            Ok(None) => None,
            Err(e) => {
                tracing::debug!(
                    "type query failed at {}:{}:{} ({}); treating the session as unhealthy",
                    file.display(),
                    line,
                    column,
                    e
                );
                self.unhealthy = true;
                None
            }
        };

        self.cache.insert((line, column), resolved.clone());
        resolved
    }
}

/// Reduce a checker's type rendering to a plain class path.
///
/// Handles `Repo`, `pkg.mod.Repo`, `Repo[int]`, `Repo | None` and rejects
/// the non-answers checkers like to give.
pub fn normalize_type(raw: &str) -> Option<String> {
    let first = raw.split('|').next()?.trim();
    let unwrapped = first
        .strip_prefix("type[")
        .and_then(|s| s.strip_suffix(']'))
        .unwrap_or(first);
    let name = unwrapped.split('[').next()?.trim();
    if name.is_empty() {
        return None;
    }
    match name {
        "Any" | "Unknown" | "None" | "object" => None,
        _ => Some(name.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization() {
        assert_eq!(normalize_type("Repo"), Some("Repo".to_string()));
        assert_eq!(
            normalize_type("pkg.repo.Repo | None"),
            Some("pkg.repo.Repo".to_string())
        );
        assert_eq!(normalize_type("dict[str, int]"), Some("dict".to_string()));
        assert_eq!(normalize_type("Any"), None);
        assert_eq!(normalize_type("Unknown"), None);
    }

    #[test]
    fn disabled_engine_answers_unknown() {
        let mut engine = TypeEngine::disabled();
        let mut session = engine.session(Path::new("x.py"), "a = 1\n");
        assert_eq!(session.class_of(1, 0, "a"), None);
    }

    #[test]
    fn table_backend_resolves_by_receiver_text() {
        let backend = StaticTableBackend::new(&[("obj", "mod.C")]);
        let mut engine = TypeEngine::with_backend(Box::new(backend), DEFAULT_QUERY_TIMEOUT);
        let mut session = engine.session(Path::new("x.py"), "");
        assert_eq!(session.class_of(3, 0, "obj"), Some("mod.C".to_string()));
        assert_eq!(session.class_of(3, 4, "other"), None);
    }
}
