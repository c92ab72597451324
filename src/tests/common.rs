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

//! Shared helpers for the integration tests.
//!
//! Migrations run against the static-table type backend so no external
//! checker is needed; passing an empty table disables receiver typing the
//! same way `--type-method none` does.

use std::path::Path;

use crate::engine::{migrate_source, MigrateConfig, MigrateOutcome, Prompt};
use crate::model::CollectionResult;
use crate::typeinfo::{StaticTableBackend, TypeEngine, DEFAULT_QUERY_TIMEOUT};

pub const TEST_MODULE: &str = "mymod";

pub fn collect(source: &str) -> CollectionResult {
    crate::collect::collect_module(source, TEST_MODULE).unwrap()
}

/// Migrate with receiver typing disabled.
pub fn migrate(source: &str) -> String {
    migrate_with_types(source, &[])
}

/// Migrate with a fixed receiver-text -> class table standing in for the
/// type checker.
pub fn migrate_with_types(source: &str, types: &[(&str, &str)]) -> String {
    let outcome = migrate_outcome(source, types);
    outcome.new_source.unwrap_or_else(|| source.to_string())
}

pub fn migrate_outcome(source: &str, types: &[(&str, &str)]) -> MigrateOutcome {
    let mut engine = test_engine(types);
    migrate_source(
        source,
        TEST_MODULE,
        Path::new("mymod.py"),
        &mut engine,
        &MigrateConfig::default(),
        Prompt::Auto,
    )
    .unwrap()
}

pub fn test_engine(types: &[(&str, &str)]) -> TypeEngine {
    if types.is_empty() {
        TypeEngine::disabled()
    } else {
        TypeEngine::with_backend(
            Box::new(StaticTableBackend::new(types)),
            DEFAULT_QUERY_TIMEOUT,
        )
    }
}

/// Migrate a real file on disk, resolving imports relative to it.
pub fn migrate_file(path: &Path, types: &[(&str, &str)]) -> MigrateOutcome {
    let source = std::fs::read_to_string(path).unwrap();
    let module_name = crate::driver::detect_module_name(path);
    let mut engine = test_engine(types);
    migrate_source(
        &source,
        &module_name,
        path,
        &mut engine,
        &MigrateConfig::default(),
        Prompt::Auto,
    )
    .unwrap()
}
