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

//! sundown rewrites Python sources that use APIs marked deprecated with
//! the `@replace_me` marker: call sites are replaced by the construct's
//! inline replacement template, and the constructs themselves can be
//! deleted once their deprecation window closes.

pub mod cleanup;
pub mod collect;
pub mod deps;
pub mod driver;
pub mod engine;
pub mod model;
pub mod report;
pub mod rewrite;
pub mod scan;
pub mod source;
pub mod template;
pub mod typeinfo;
pub mod version;

pub use collect::{collect_from, collect_module};
pub use engine::{check_source, migrate_source, MigrateConfig, MigrateOutcome, Prompt};
pub use model::{
    AppliedReplacement, CollectionResult, ConstructKind, FailureReason, ParamInfo, ReplaceInfo,
    Unreplaceable, UserChoice,
};
pub use source::{apply_edits, ParseError, SourceModule};
pub use version::Version;

#[cfg(test)]
mod tests;
