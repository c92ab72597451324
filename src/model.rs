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

//! Core data types shared by the collector, rewriter and driver.

use std::collections::HashMap;
use thiserror::Error;

/// The kind of construct a deprecation marker is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstructKind {
    Function,
    AsyncFunction,
    Method,
    ClassMethod,
    StaticMethod,
    Property,
    Class,
    ClassAttribute,
    ModuleAttribute,
}

impl ConstructKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConstructKind::Function => "function",
            ConstructKind::AsyncFunction => "async function",
            ConstructKind::Method => "method",
            ConstructKind::ClassMethod => "class method",
            ConstructKind::StaticMethod => "static method",
            ConstructKind::Property => "property",
            ConstructKind::Class => "class",
            ConstructKind::ClassAttribute => "class attribute",
            ConstructKind::ModuleAttribute => "module attribute",
        }
    }

    /// Whether call sites of this construct carry an implicit receiver.
    pub fn has_receiver(&self) -> bool {
        matches!(
            self,
            ConstructKind::Method | ConstructKind::ClassMethod | ConstructKind::Property
        )
    }
}

/// One declared parameter of a deprecated construct.
///
/// For methods the implicit receiver (`self` or `cls`) is recorded as the
/// first entry.
#[derive(Debug, Clone)]
pub struct ParamInfo {
    pub name: String,
    pub has_default: bool,
    /// Source text of the default value, verbatim from the declaration.
    pub default_source: Option<String>,
    pub is_vararg: bool,
    pub is_kwarg: bool,
    pub is_kwonly: bool,
}

impl ParamInfo {
    pub fn positional(name: &str) -> Self {
        Self {
            name: name.to_string(),
            has_default: false,
            default_source: None,
            is_vararg: false,
            is_kwarg: false,
            is_kwonly: false,
        }
    }

    pub fn with_default(name: &str, default: &str) -> Self {
        Self {
            name: name.to_string(),
            has_default: true,
            default_source: Some(default.to_string()),
            is_vararg: false,
            is_kwarg: false,
            is_kwonly: false,
        }
    }

    pub fn vararg(name: &str) -> Self {
        Self {
            name: name.to_string(),
            has_default: false,
            default_source: None,
            is_vararg: true,
            is_kwarg: false,
            is_kwonly: false,
        }
    }

    pub fn kwarg(name: &str) -> Self {
        Self {
            name: name.to_string(),
            has_default: false,
            default_source: None,
            is_vararg: false,
            is_kwarg: true,
            is_kwonly: false,
        }
    }

    /// True for the implicit receiver entry of a method.
    pub fn is_receiver(&self) -> bool {
        self.name == "self" || self.name == "cls"
    }
}

/// Everything known about one deprecated construct.
#[derive(Debug, Clone)]
pub struct ReplaceInfo {
    /// Dotted path, unique within a collection, e.g. `pkg.mod.Class.method`.
    pub qualified_name: String,
    /// Last segment of the dotted path.
    pub simple_name: String,
    pub kind: ConstructKind,
    pub parameters: Vec<ParamInfo>,
    /// The replacement template extracted from the construct body.
    pub template: Box<ruff_python_ast::Expr>,
    /// Canonical serialization of `template`; re-parsing and re-serializing
    /// this text is a fixed point.
    pub template_source: String,
    pub since: Option<String>,
    pub remove_in: Option<String>,
    pub message: Option<String>,
    /// Qualified name of the enclosing class, if any.
    pub declaring_class: Option<String>,
}

/// Why a marked construct could not yield a template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    ComplexBody,
    NoReturn,
    RecursiveCall,
    Lambda,
    DynamicMarkerArgs,
    InvalidTemplate,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::ComplexBody => "complex_body",
            FailureReason::NoReturn => "no_return",
            FailureReason::RecursiveCall => "recursive_call",
            FailureReason::Lambda => "lambda",
            FailureReason::DynamicMarkerArgs => "dynamic_marker_args",
            FailureReason::InvalidTemplate => "syntactically_invalid_template",
        }
    }
}

/// A marked construct the collector saw but could not process.
#[derive(Debug, Clone)]
pub struct Unreplaceable {
    pub qualified_name: String,
    pub kind: ConstructKind,
    pub reason: FailureReason,
    pub message: String,
}

/// One import statement, as recorded by the collector.
///
/// `module` keeps leading dots for relative imports; `names` is empty for a
/// plain `import module` statement.
#[derive(Debug, Clone)]
pub struct ImportBinding {
    pub module: String,
    /// (name, alias) pairs brought into scope; `*` for star imports.
    pub names: Vec<(String, Option<String>)>,
}

/// Result of collecting one module.
#[derive(Debug, Clone, Default)]
pub struct CollectionResult {
    pub replacements: HashMap<String, ReplaceInfo>,
    pub unreplaceable: HashMap<String, Unreplaceable>,
    /// Class qualified name -> base class qualified names.
    pub inheritance: HashMap<String, Vec<String>>,
    pub imports: Vec<ImportBinding>,
}

impl CollectionResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `other` into `self` without overwriting existing entries.
    ///
    /// A qualified name that is already present keeps its first value; the
    /// clash is logged so ambiguous cross-module names are visible.
    pub fn absorb(&mut self, other: CollectionResult) {
        for (name, info) in other.replacements {
            if self.replacements.contains_key(&name) {
                tracing::warn!("duplicate deprecated construct '{}', keeping first", name);
                continue;
            }
            self.replacements.insert(name, info);
        }
        for (name, node) in other.unreplaceable {
            self.unreplaceable.entry(name).or_insert(node);
        }
        for (class, bases) in other.inheritance {
            self.inheritance.entry(class).or_insert(bases);
        }
    }
}

/// One rewrite that was applied to a file, in source order.
#[derive(Debug, Clone)]
pub struct AppliedReplacement {
    pub line: u32,
    pub column: u32,
    pub old_text: String,
    pub new_text: String,
    pub qualified_name: String,
}

/// A call site that matched a marker but could not be rewritten.
#[derive(Debug, Clone)]
pub struct SkippedSite {
    pub line: u32,
    pub column: u32,
    pub qualified_name: String,
    pub reason: String,
}

/// Argument/parameter mismatch at a call site.  Sites that fail to bind are
/// skipped with a warning; they never abort the file.
#[derive(Debug, Error)]
pub enum BindError {
    #[error("too many positional arguments for '{0}'")]
    TooManyPositional(String),
    #[error("unexpected keyword argument '{1}' for '{0}'")]
    UnknownKeyword(String, String),
    #[error("missing required argument '{1}' for '{0}'")]
    MissingArgument(String, String),
    #[error("cannot expand '*{1}' at call of '{0}': template uses individual parameters")]
    SplatAmbiguous(String, String),
    #[error("'{0}' takes no '{1}' expansion")]
    SplatUnsupported(String, String),
}

/// Answer from the interactive prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserChoice {
    Yes,
    No,
    All,
    Quit,
}
