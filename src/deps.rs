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

//! Transitive collection across imported modules.
//!
//! Imports are resolved to files by path probing in the same order the
//! interpreter would: package `__init__.py`, then a sibling module file,
//! across the configured search roots.  Module results are memoized
//! globally and recursion is bounded, so import cycles terminate.

use once_cell::sync::Lazy;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::collect;
use crate::model::{CollectionResult, ImportBinding, ReplaceInfo};

/// How many levels of imports to follow by default.
pub const DEFAULT_IMPORT_DEPTH: usize = 2;

/// Replacements gathered from a file's reachable imports.
#[derive(Debug, Clone, Default)]
pub struct DependencyTable {
    pub replacements: HashMap<String, ReplaceInfo>,
    pub inheritance: HashMap<String, Vec<String>>,
}

impl DependencyTable {
    fn merge(&mut self, replacements: &HashMap<String, ReplaceInfo>) {
        for (name, info) in replacements {
            self.replacements
                .entry(name.clone())
                .or_insert_with(|| info.clone());
        }
    }
}

/// Per-module analysis cache shared by all workers.
static MODULE_CACHE: Lazy<Mutex<HashMap<PathBuf, Arc<CollectionResult>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

pub fn clear_module_cache() {
    if let Ok(mut cache) = MODULE_CACHE.lock() {
        cache.clear();
    }
}

/// Resolve a possibly-relative module spec against the importing module.
///
/// `.sibling` inside `pkg.mod` resolves to `pkg.sibling`; too many dots
/// resolve to nothing.
pub fn resolve_relative(module: &str, importer: &str) -> Option<String> {
    if !module.starts_with('.') {
        return Some(module.to_string());
    }

    let level = module.chars().take_while(|&c| c == '.').count();
    let rest = &module[level..];

    let mut base: Vec<&str> = importer.split('.').collect();
    if level > base.len() {
        return None;
    }
    base.truncate(base.len() - level);

    match (base.is_empty(), rest.is_empty()) {
        (true, true) => None,
        (true, false) => Some(rest.to_string()),
        (false, true) => Some(base.join(".")),
        (false, false) => Some(format!("{}.{}", base.join("."), rest)),
    }
}

/// Maps dotted module names to files by probing search roots.
pub struct ModuleResolver {
    roots: Vec<PathBuf>,
}

impl ModuleResolver {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }

    /// Roots for a file being migrated: its package root, its own
    /// directory, and everything on `PYTHONPATH`.
    pub fn for_file(file: &Path) -> Self {
        let mut roots = Vec::new();

        if let Some(dir) = file.parent() {
            let mut package_root = dir.to_path_buf();
            while package_root.join("__init__.py").exists() {
                match package_root.parent() {
                    Some(parent) => package_root = parent.to_path_buf(),
                    None => break,
                }
            }
            roots.push(package_root);
            if dir != roots[0] {
                roots.push(dir.to_path_buf());
            }
        }

        if let Some(pythonpath) = std::env::var_os("PYTHONPATH") {
            roots.extend(std::env::split_paths(&pythonpath));
        }

        Self { roots }
    }

    /// Probe for the module file: package `__init__.py` first, then the
    /// plain module file, per root in order.
    pub fn resolve(&self, module: &str) -> Option<PathBuf> {
        let relative: PathBuf = module.split('.').collect();
        for root in &self.roots {
            let base = root.join(&relative);
            let init = base.join("__init__.py");
            if init.is_file() {
                return Some(init);
            }
            let file = base.with_extension("py");
            if file.is_file() {
                return Some(file);
            }
        }
        tracing::debug!("module '{}' not found under {:?}", module, self.roots);
        None
    }
}

/// Collect markers reachable through `imports`, following nested imports
/// up to `depth` levels.
pub fn collect_dependencies(
    imports: &[ImportBinding],
    module_name: &str,
    resolver: &ModuleResolver,
    depth: usize,
) -> DependencyTable {
    let mut table = DependencyTable::default();
    let mut visited = HashSet::new();
    collect_recursive(
        imports,
        module_name,
        resolver,
        depth,
        &mut visited,
        &mut table,
    );
    table
}

fn collect_recursive(
    imports: &[ImportBinding],
    importer: &str,
    resolver: &ModuleResolver,
    depth: usize,
    visited: &mut HashSet<String>,
    table: &mut DependencyTable,
) {
    if depth == 0 {
        return;
    }

    for import in imports {
        let resolved = match resolve_relative(&import.module, importer) {
            Some(resolved) => resolved,
            None => continue,
        };
        if !visited.insert(resolved.clone()) {
            continue;
        }

        let file = match resolver.resolve(&resolved) {
            Some(file) => file,
            None => continue,
        };
        let collected = match module_result(&file, &resolved) {
            Some(collected) => collected,
            None => continue,
        };

        for (class, bases) in &collected.inheritance {
            table
                .inheritance
                .entry(class.clone())
                .or_insert_with(|| bases.clone());
        }

        if import.names.is_empty() || import.names.iter().any(|(n, _)| n == "*") {
            // Whole-module visibility: everything it declares may be used.
            table.merge(&collected.replacements);
        } else {
            for (name, _alias) in &import.names {
                let qualified = format!("{}.{}", resolved, name);
                let prefix = format!("{}.", qualified);
                let mut matched = false;
                for (key, info) in &collected.replacements {
                    if key == &qualified || key.starts_with(&prefix) {
                        matched = true;
                        table
                            .replacements
                            .entry(key.clone())
                            .or_insert_with(|| info.clone());
                    }
                }

                // Re-export: the module imports the name itself.  Alias the
                // origin's entry under the spelling this file binds.
                if !matched && depth > 1 {
                    if let Some(info) =
                        reexport_origin(&collected.imports, &resolved, name, resolver)
                    {
                        table
                            .replacements
                            .entry(qualified.clone())
                            .or_insert(info);
                    }
                }

                // Methods deprecated on base classes apply to imported
                // subclasses as well.
                for base in inheritance_chain(&qualified, &collected.inheritance) {
                    let base_prefix = format!("{}.", base);
                    for (key, info) in &collected.replacements {
                        if key.starts_with(&base_prefix) {
                            table
                                .replacements
                                .entry(key.clone())
                                .or_insert_with(|| info.clone());
                        }
                    }
                }

                // `from pkg import submodule` names a module, not a symbol.
                if let Some(subfile) = resolver.resolve(&qualified) {
                    if let Some(sub) = module_result(&subfile, &qualified) {
                        table.merge(&sub.replacements);
                        for (class, bases) in &sub.inheritance {
                            table
                                .inheritance
                                .entry(class.clone())
                                .or_insert_with(|| bases.clone());
                        }
                    }
                }
            }
        }

        collect_recursive(
            &collected.imports,
            &resolved,
            resolver,
            depth - 1,
            visited,
            table,
        );
    }
}

/// Resolve a re-exported name to its origin's replacement, one hop deep.
fn reexport_origin(
    imports: &[ImportBinding],
    importer: &str,
    name: &str,
    resolver: &ModuleResolver,
) -> Option<ReplaceInfo> {
    for import in imports {
        let original = import
            .names
            .iter()
            .find(|(n, alias)| alias.as_deref().unwrap_or(n) == name)
            .map(|(n, _)| n.clone());
        let original = match original {
            Some(original) => original,
            None => continue,
        };
        let origin_module = resolve_relative(&import.module, importer)?;
        let file = resolver.resolve(&origin_module)?;
        let collected = module_result(&file, &origin_module)?;
        if let Some(info) = collected
            .replacements
            .get(&format!("{}.{}", origin_module, original))
        {
            return Some(info.clone());
        }
    }
    None
}

fn inheritance_chain(class: &str, inheritance: &HashMap<String, Vec<String>>) -> Vec<String> {
    let mut chain = Vec::new();
    let mut queue: VecDeque<&str> = VecDeque::new();
    let mut seen = HashSet::new();
    queue.push_back(class);
    seen.insert(class.to_string());

    while let Some(current) = queue.pop_front() {
        if let Some(bases) = inheritance.get(current) {
            for base in bases {
                if seen.insert(base.clone()) {
                    chain.push(base.clone());
                    queue.push_back(base.as_str());
                }
            }
        }
    }

    chain
}

fn module_result(file: &Path, module_name: &str) -> Option<Arc<CollectionResult>> {
    let key = file.canonicalize().unwrap_or_else(|_| file.to_path_buf());
    if let Ok(cache) = MODULE_CACHE.lock() {
        if let Some(cached) = cache.get(&key) {
            return Some(cached.clone());
        }
    }

    let source = match std::fs::read_to_string(file) {
        Ok(source) => source,
        Err(e) => {
            tracing::warn!("cannot read imported module {}: {}", file.display(), e);
            return None;
        }
    };

    let collected = match collect::collect_module(&source, module_name) {
        Ok(collected) => Arc::new(collected),
        Err(e) => {
            tracing::warn!("cannot parse imported module {}: {}", file.display(), e);
            return None;
        }
    };

    if let Ok(mut cache) = MODULE_CACHE.lock() {
        cache.insert(key, collected.clone());
    }
    Some(collected)
}
