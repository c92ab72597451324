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

//! Per-file migration and check pipelines.
//!
//! One file flows parse -> collect -> collect imports -> rewrite ->
//! reprint.  Everything before the reprint is pure; the driver decides
//! what to do with the result.

use std::path::Path;

use crate::collect;
use crate::deps::{self, ModuleResolver};
use crate::model::{
    AppliedReplacement, SkippedSite, Unreplaceable, UserChoice,
};
use crate::rewrite;
use crate::source::{apply_edits, ParseError, SourceModule};
use crate::typeinfo::TypeEngine;

/// Knobs for one migration run, shared across files.
pub struct MigrateConfig {
    /// How many levels of imports the collector follows.
    pub import_depth: usize,
}

impl Default for MigrateConfig {
    fn default() -> Self {
        Self {
            import_depth: deps::DEFAULT_IMPORT_DEPTH,
        }
    }
}

/// Per-replacement confirmation hook.
pub enum Prompt<'p> {
    /// Apply everything.
    Auto,
    /// Ask before each replacement, in source order.
    Interactive(&'p mut dyn FnMut(&AppliedReplacement) -> UserChoice),
}

#[derive(Debug, Default)]
pub struct MigrateOutcome {
    /// Rewritten source, or `None` when nothing changed.
    pub new_source: Option<String>,
    pub applied: Vec<AppliedReplacement>,
    pub skipped: Vec<SkippedSite>,
    pub unreplaceable: Vec<Unreplaceable>,
}

/// Migrate one file's source text.
pub fn migrate_source(
    source: &str,
    module_name: &str,
    file_path: &Path,
    types: &mut TypeEngine,
    config: &MigrateConfig,
    prompt: Prompt<'_>,
) -> Result<MigrateOutcome, ParseError> {
    let module = SourceModule::parse(source)?;

    let mut collected = collect::collect_from(&module, module_name);
    let resolver = ModuleResolver::for_file(file_path);
    let dependencies = deps::collect_dependencies(
        &collected.imports,
        module_name,
        &resolver,
        config.import_depth,
    );

    let unreplaceable: Vec<Unreplaceable> = collected.unreplaceable.values().cloned().collect();

    // Locally collected replacements take priority over dependency ones.
    let mut table = std::mem::take(&mut collected.replacements);
    for (name, info) in dependencies.replacements {
        table.entry(name).or_insert(info);
    }
    let mut inheritance = std::mem::take(&mut collected.inheritance);
    for (class, bases) in dependencies.inheritance {
        inheritance.entry(class).or_insert(bases);
    }

    if table.is_empty() {
        return Ok(MigrateOutcome {
            unreplaceable,
            ..Default::default()
        });
    }
    tracing::debug!("{} replacement(s) in scope for {}", table.len(), module_name);

    let mut session = types.session(file_path, source);
    let outcome = rewrite::rewrite_module(&module, module_name, &table, &inheritance, &mut session);

    let (edits, applied) = confirm(outcome.edits, outcome.applied, prompt);

    let mut result = MigrateOutcome {
        new_source: None,
        applied,
        skipped: outcome.skipped,
        unreplaceable,
    };

    if edits.is_empty() {
        return Ok(result);
    }

    let migrated = apply_edits(source, edits);
    if let Err(e) = SourceModule::parse(&migrated) {
        // Never happens for well-formed templates; surfaced loudly when a
        // template produces syntax the author has to fix.
        tracing::error!("rewritten {} does not parse: {}", file_path.display(), e);
    }

    if migrated != source {
        result.new_source = Some(migrated);
    }
    Ok(result)
}

fn confirm(
    edits: Vec<(ruff_text_size::TextRange, String)>,
    applied: Vec<AppliedReplacement>,
    prompt: Prompt<'_>,
) -> (Vec<(ruff_text_size::TextRange, String)>, Vec<AppliedReplacement>) {
    let mut ask = match prompt {
        Prompt::Auto => return (edits, applied),
        Prompt::Interactive(ask) => ask,
    };

    let mut kept_edits = Vec::new();
    let mut kept_applied = Vec::new();
    let mut accept_rest = false;

    for (edit, record) in edits.into_iter().zip(applied) {
        if accept_rest {
            kept_edits.push(edit);
            kept_applied.push(record);
            continue;
        }
        match ask(&record) {
            UserChoice::Yes => {
                kept_edits.push(edit);
                kept_applied.push(record);
            }
            UserChoice::No => {}
            UserChoice::All => {
                accept_rest = true;
                kept_edits.push(edit);
                kept_applied.push(record);
            }
            UserChoice::Quit => break,
        }
    }

    (kept_edits, kept_applied)
}

/// Result of validating the markers declared in one file.
#[derive(Debug, Default)]
pub struct CheckReport {
    /// Qualified names whose templates extracted cleanly.
    pub replaceable: Vec<String>,
    pub problems: Vec<Unreplaceable>,
}

impl CheckReport {
    pub fn ok(&self) -> bool {
        self.problems.is_empty()
    }

    pub fn checked_count(&self) -> usize {
        self.replaceable.len() + self.problems.len()
    }
}

/// Validate that every marker in the file can be processed.
pub fn check_source(source: &str, module_name: &str) -> Result<CheckReport, ParseError> {
    let collected = collect::collect_module(source, module_name)?;

    let mut report = CheckReport::default();
    report.replaceable = collected.replacements.keys().cloned().collect();
    report.replaceable.sort();
    report.problems = collected.unreplaceable.into_values().collect();
    report.problems.sort_by(|a, b| a.qualified_name.cmp(&b.qualified_name));
    Ok(report)
}
