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

//! Orchestration across files: discovery, the worker pool, preview vs.
//! write, and exit codes.
//!
//! Files are processed by a bounded pool (one type-resolver engine per
//! worker); reports are emitted sorted by path so runs are reproducible.
//! In-place writes go through a temp file and an atomic rename, so an
//! interrupted run never leaves a half-written source behind.

use anyhow::{Context, Result};
use indexmap::IndexSet;
use rayon::prelude::*;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::cleanup::{strip_deprecated, CleanupPolicy};
use crate::collect;
use crate::engine::{self, MigrateConfig, Prompt};
use crate::model::{AppliedReplacement, UserChoice};
use crate::report;
use crate::scan;
use crate::typeinfo::{TypeEngine, TypeMethod};

/// Cooperative cancellation, honored at file boundaries.
#[derive(Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

pub struct MigrateOptions {
    pub write: bool,
    pub check: bool,
    pub interactive: bool,
    pub type_method: TypeMethod,
    pub timeout: Duration,
    pub jobs: Option<usize>,
    pub cancel: CancelFlag,
}

pub struct CleanupOptions {
    pub write: bool,
    pub check: bool,
    pub policy: CleanupPolicy,
    pub jobs: Option<usize>,
    pub cancel: CancelFlag,
}

enum FileOutcome {
    Unchanged,
    Modified {
        old_text: String,
        new_text: String,
        detail: String,
    },
    Failed(String),
    Cancelled,
}

struct FileReport {
    path: PathBuf,
    outcome: FileOutcome,
}

/// Expand CLI path arguments into a sorted, deduplicated list of Python
/// files.  Directories are searched recursively; glob patterns expand.
pub fn expand_paths(paths: &[String]) -> Result<Vec<PathBuf>> {
    let mut expanded: IndexSet<PathBuf> = IndexSet::new();

    for path in paths {
        let as_path = Path::new(path);
        if as_path.is_file() {
            expanded.insert(as_path.to_path_buf());
        } else if as_path.is_dir() {
            let mut found = Vec::new();
            visit_python_files(as_path, &mut found)?;
            expanded.extend(found);
        } else if path.contains('*') || path.contains('?') || path.contains('[') {
            for entry in glob::glob(path).with_context(|| format!("bad pattern: {}", path))? {
                let entry = entry?;
                if entry.extension().is_some_and(|ext| ext == "py") {
                    expanded.insert(entry);
                }
            }
        } else {
            anyhow::bail!("no such file or directory: {}", path);
        }
    }

    let mut files: Vec<PathBuf> = expanded.into_iter().collect();
    files.sort();
    Ok(files)
}

fn visit_python_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir).with_context(|| format!("cannot read {}", dir.display()))? {
        let path = entry?.path();
        if path.is_dir() {
            let name = path.file_name().unwrap_or_default().to_string_lossy().into_owned();
            if !name.starts_with('.') && name != "__pycache__" {
                visit_python_files(&path, out)?;
            }
        } else if path.extension().is_some_and(|ext| ext == "py") {
            out.push(path);
        }
    }
    Ok(())
}

/// Derive the dotted module name of a file from the surrounding package
/// structure (`__init__.py` chains).
pub fn detect_module_name(file: &Path) -> String {
    let mut parts = Vec::new();
    if let Some(stem) = file.file_stem() {
        if stem != "__init__" {
            parts.push(stem.to_string_lossy().into_owned());
        }
    }

    let mut dir = file.parent();
    while let Some(current) = dir {
        if !current.join("__init__.py").exists() {
            break;
        }
        if let Some(package) = current.file_name() {
            parts.insert(0, package.to_string_lossy().into_owned());
        }
        dir = current.parent();
    }

    if parts.is_empty() {
        file.file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    } else {
        parts.join(".")
    }
}

// ---- migrate ------------------------------------------------------------

pub fn run_migrate(paths: &[String], options: &MigrateOptions) -> Result<i32> {
    let files = expand_paths(paths)?;
    let config = MigrateConfig::default();

    let reports: Vec<FileReport> = if options.interactive || options.jobs == Some(1) {
        let mut engine = TypeEngine::new(options.type_method, options.timeout);
        let reports = files
            .iter()
            .map(|path| migrate_one(path, &mut engine, &config, options))
            .collect();
        engine.shutdown();
        reports
    } else {
        let jobs = options.jobs.unwrap_or_else(num_cpus::get).max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(jobs)
            .build()
            .context("failed to build worker pool")?;
        pool.install(|| {
            files
                .par_iter()
                .map_init(
                    || TypeEngine::new(options.type_method, options.timeout),
                    |engine, path| migrate_one(path, engine, &config, options),
                )
                .collect()
        })
    };

    emit_reports(reports, options.write, options.check, "needs migration")
}

fn migrate_one(
    path: &Path,
    engine: &mut TypeEngine,
    config: &MigrateConfig,
    options: &MigrateOptions,
) -> FileReport {
    if options.cancel.is_cancelled() {
        return FileReport {
            path: path.to_path_buf(),
            outcome: FileOutcome::Cancelled,
        };
    }

    let source = match fs::read_to_string(path) {
        Ok(source) => source,
        Err(e) => {
            return FileReport {
                path: path.to_path_buf(),
                outcome: FileOutcome::Failed(format!("read failed: {}", e)),
            }
        }
    };

    let module_name = detect_module_name(path);
    let mut ask = |record: &AppliedReplacement| prompt_user(path, record);
    let prompt = if options.interactive {
        Prompt::Interactive(&mut ask)
    } else {
        Prompt::Auto
    };

    let outcome = match engine::migrate_source(&source, &module_name, path, engine, config, prompt)
    {
        Ok(outcome) => outcome,
        Err(e) => {
            return FileReport {
                path: path.to_path_buf(),
                outcome: FileOutcome::Failed(e.to_string()),
            }
        }
    };

    for site in &outcome.skipped {
        eprintln!(
            "{}:{}:{}: {} skipped: {}",
            path.display(),
            site.line,
            site.column,
            site.qualified_name,
            site.reason
        );
    }

    FileReport {
        path: path.to_path_buf(),
        outcome: match outcome.new_source {
            Some(new_text) => FileOutcome::Modified {
                old_text: source,
                new_text,
                detail: format!("{} replacement(s)", outcome.applied.len()),
            },
            None => FileOutcome::Unchanged,
        },
    }
}

fn prompt_user(path: &Path, record: &AppliedReplacement) -> UserChoice {
    loop {
        print!(
            "{}:{}:{} replace {} with {}? [y/n/a/q] ",
            path.display(),
            record.line,
            record.column,
            record.old_text,
            record.new_text
        );
        let _ = io::stdout().flush();

        let mut line = String::new();
        match io::stdin().lock().read_line(&mut line) {
            Ok(0) | Err(_) => return UserChoice::Quit,
            Ok(_) => {}
        }
        match line.trim().to_ascii_lowercase().as_str() {
            "y" | "yes" => return UserChoice::Yes,
            "n" | "no" => return UserChoice::No,
            "a" | "all" => return UserChoice::All,
            "q" | "quit" => return UserChoice::Quit,
            _ => println!("Please answer y, n, a or q."),
        }
    }
}

// ---- cleanup ------------------------------------------------------------

pub fn run_cleanup(paths: &[String], options: &CleanupOptions) -> Result<i32> {
    let files = expand_paths(paths)?;

    let jobs = options.jobs.unwrap_or_else(num_cpus::get).max(1);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(jobs)
        .build()
        .context("failed to build worker pool")?;

    let reports: Vec<FileReport> = pool.install(|| {
        files
            .par_iter()
            .map(|path| cleanup_one(path, options))
            .collect()
    });

    emit_reports(reports, options.write, options.check, "needs cleanup")
}

fn cleanup_one(path: &Path, options: &CleanupOptions) -> FileReport {
    if options.cancel.is_cancelled() {
        return FileReport {
            path: path.to_path_buf(),
            outcome: FileOutcome::Cancelled,
        };
    }

    let source = match fs::read_to_string(path) {
        Ok(source) => source,
        Err(e) => {
            return FileReport {
                path: path.to_path_buf(),
                outcome: FileOutcome::Failed(format!("read failed: {}", e)),
            }
        }
    };

    if !scan::might_contain_marker(&source) {
        return FileReport {
            path: path.to_path_buf(),
            outcome: FileOutcome::Unchanged,
        };
    }

    match strip_deprecated(&source, &options.policy) {
        Ok((0, _)) => FileReport {
            path: path.to_path_buf(),
            outcome: FileOutcome::Unchanged,
        },
        Ok((count, new_text)) => FileReport {
            path: path.to_path_buf(),
            outcome: FileOutcome::Modified {
                old_text: source,
                new_text,
                detail: format!("{} definition(s) removed", count),
            },
        },
        Err(e) => FileReport {
            path: path.to_path_buf(),
            outcome: FileOutcome::Failed(e.to_string()),
        },
    }
}

// ---- check / info -------------------------------------------------------

pub fn run_check(paths: &[String]) -> Result<i32> {
    let files = expand_paths(paths)?;
    let mut failed = false;

    for path in &files {
        let source = fs::read_to_string(path)
            .with_context(|| format!("cannot read {}", path.display()))?;
        if !scan::might_contain_marker(&source) {
            continue;
        }

        let module_name = detect_module_name(path);
        match engine::check_source(&source, &module_name) {
            Ok(result) => {
                if result.ok() {
                    if result.checked_count() > 0 {
                        println!(
                            "{}: {} @replace_me function(s) can be replaced",
                            path.display(),
                            result.checked_count()
                        );
                    }
                } else {
                    failed = true;
                    println!("{}: ERRORS found", path.display());
                    for problem in &result.problems {
                        println!(
                            "  {} '{}' cannot be replaced: {} ({})",
                            problem.kind.as_str(),
                            problem.qualified_name,
                            problem.reason.as_str(),
                            problem.message
                        );
                    }
                }
            }
            Err(e) => {
                failed = true;
                println!("{}:{}", path.display(), e);
            }
        }
    }

    Ok(if failed { 1 } else { 0 })
}

pub fn run_info(paths: &[String]) -> Result<i32> {
    let files = expand_paths(paths)?;
    let mut total = 0usize;

    for path in &files {
        let source = fs::read_to_string(path)
            .with_context(|| format!("cannot read {}", path.display()))?;
        if !scan::might_contain_marker(&source) {
            continue;
        }

        let module_name = detect_module_name(path);
        let collected = match collect::collect_module(&source, &module_name) {
            Ok(collected) => collected,
            Err(e) => {
                println!("{}:{}", path.display(), e);
                continue;
            }
        };
        if collected.replacements.is_empty() {
            continue;
        }

        println!(
            "{}: {} deprecated construct(s)",
            path.display(),
            collected.replacements.len()
        );
        let mut entries: Vec<_> = collected.replacements.values().collect();
        entries.sort_by_key(|info| info.qualified_name.as_str());
        total += entries.len();

        for info in entries {
            println!("  - {} [{}]", info.qualified_name, info.kind.as_str());
            println!("    replacement: {}", info.template_source);
            if let Some(since) = &info.since {
                println!("    since: {}", since);
            }
            if let Some(remove_in) = &info.remove_in {
                println!("    remove in: {}", remove_in);
            }
            if let Some(message) = &info.message {
                println!("    message: {}", message);
            }
            for param in &info.parameters {
                let mut note = String::new();
                if param.is_vararg {
                    note.push_str(" (*args)");
                }
                if param.is_kwarg {
                    note.push_str(" (**kwargs)");
                }
                if param.is_kwonly {
                    note.push_str(" (keyword-only)");
                }
                if let Some(default) = &param.default_source {
                    note.push_str(&format!(" (default: {})", default));
                }
                println!("    param: {}{}", param.name, note);
            }
        }
    }

    println!("Total deprecated constructs: {}", total);
    Ok(0)
}

// ---- shared reporting ---------------------------------------------------

fn emit_reports(
    reports: Vec<FileReport>,
    write: bool,
    check: bool,
    check_verb: &str,
) -> Result<i32> {
    let mut reports = reports;
    reports.sort_by(|a, b| a.path.cmp(&b.path));

    let color = report::color_enabled();
    let mut any_changed = false;
    let mut any_failed = false;

    for file_report in reports {
        match file_report.outcome {
            FileOutcome::Unchanged => {
                if check {
                    println!("{}: up to date", file_report.path.display());
                } else if write {
                    println!("Unchanged: {}", file_report.path.display());
                }
            }
            FileOutcome::Modified {
                old_text,
                new_text,
                detail,
            } => {
                any_changed = true;
                if check {
                    println!("{}: {} ({})", file_report.path.display(), check_verb, detail);
                } else if write {
                    write_atomic(&file_report.path, &new_text)?;
                    println!("Modified: {}", file_report.path.display());
                } else {
                    print!(
                        "{}",
                        report::render_diff(&file_report.path, &old_text, &new_text, color)
                    );
                }
            }
            FileOutcome::Failed(message) => {
                any_failed = true;
                eprintln!("{}: {}", file_report.path.display(), message);
            }
            FileOutcome::Cancelled => {}
        }
    }

    Ok(if any_failed || (check && any_changed) {
        1
    } else {
        0
    })
}

/// Replace a file through a temp file and rename, preserving permissions.
fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("cannot create temp file near {}", path.display()))?;
    tmp.write_all(content.as_bytes())?;

    if let Ok(metadata) = fs::metadata(path) {
        let _ = tmp.as_file().set_permissions(metadata.permissions());
    }

    tmp.persist(path)
        .with_context(|| format!("cannot replace {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_name_from_package_layout() {
        let dir = tempfile::tempdir().unwrap();
        let pkg = dir.path().join("pkg");
        let sub = pkg.join("sub");
        fs::create_dir_all(&sub).unwrap();
        fs::write(pkg.join("__init__.py"), "").unwrap();
        fs::write(sub.join("__init__.py"), "").unwrap();
        let module = sub.join("mod.py");
        fs::write(&module, "x = 1\n").unwrap();

        assert_eq!(detect_module_name(&module), "pkg.sub.mod");
        assert_eq!(detect_module_name(&sub.join("__init__.py")), "pkg.sub");

        let loose = dir.path().join("loose.py");
        fs::write(&loose, "").unwrap();
        assert_eq!(detect_module_name(&loose), "loose");
    }

    #[test]
    fn expansion_finds_nested_files_and_skips_caches() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b");
        fs::create_dir_all(&nested).unwrap();
        fs::create_dir_all(dir.path().join("a/__pycache__")).unwrap();
        fs::write(dir.path().join("a/x.py"), "").unwrap();
        fs::write(nested.join("y.py"), "").unwrap();
        fs::write(dir.path().join("a/__pycache__/z.py"), "").unwrap();
        fs::write(dir.path().join("a/notes.txt"), "").unwrap();

        let files = expand_paths(&[dir.path().to_string_lossy().into_owned()]).unwrap();
        assert_eq!(files.len(), 2);
        assert!(files.iter().all(|f| f.extension().unwrap() == "py"));
    }

    #[test]
    fn atomic_write_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f.py");
        fs::write(&file, "old").unwrap();
        write_atomic(&file, "new").unwrap();
        assert_eq!(fs::read_to_string(&file).unwrap(), "new");
    }

    #[test]
    fn cancel_flag_round_trip() {
        let flag = CancelFlag::new();
        assert!(!flag.is_cancelled());
        let clone = flag.clone();
        clone.cancel();
        assert!(flag.is_cancelled());
    }
}
