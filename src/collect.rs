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

//! Collection of `@replace_me` markers from one module.
//!
//! The collector walks a parsed module, finds every marked construct, and
//! derives a replacement template from its body.  Constructs whose body
//! does not match the supported shapes are recorded as unreplaceable with
//! the reason; they never abort collection of the rest of the module.

use ruff_python_ast::{
    Decorator, Expr, Mod, Stmt, StmtClassDef, StmtFunctionDef,
};
use ruff_text_size::Ranged;
use std::collections::HashMap;

use crate::model::{
    CollectionResult, ConstructKind, FailureReason, ImportBinding, ParamInfo, ReplaceInfo,
    Unreplaceable,
};
use crate::source::{ParseError, SourceModule};
use crate::template;

pub const MARKER_NAME: &str = "replace_me";

/// Name of the helper call that carries a class replacement template inside
/// a deprecated `__init__`.
pub const CLASS_TEMPLATE_MARKER: &str = "Replacement";

/// Collect every deprecated construct declared in `source`.
pub fn collect_module(source: &str, module_name: &str) -> Result<CollectionResult, ParseError> {
    let module = SourceModule::parse(source)?;
    Ok(collect_from(&module, module_name))
}

/// Collect from an already-parsed module.
pub fn collect_from(module: &SourceModule<'_>, module_name: &str) -> CollectionResult {
    let mut collector = Collector {
        module: module_name.to_string(),
        class_stack: Vec::new(),
        import_aliases: HashMap::new(),
        result: CollectionResult::new(),
        src: module,
    };

    if let Mod::Module(body) = module.ast() {
        for stmt in &body.body {
            collector.visit_stmt(stmt);
        }
    }

    collector.result
}

struct Collector<'a, 'src> {
    module: String,
    class_stack: Vec<String>,
    /// Imported name -> qualified path, for base-class qualification.
    import_aliases: HashMap<String, String>,
    result: CollectionResult,
    src: &'a SourceModule<'src>,
}

/// Literal-only marker arguments.
struct MarkerArgs {
    since: Option<String>,
    remove_in: Option<String>,
    message: Option<String>,
}

enum Extraction {
    Template(Box<Expr>),
    Failed(FailureReason, String),
}

impl Collector<'_, '_> {
    fn visit_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::FunctionDef(func) => self.visit_function(func),
            Stmt::ClassDef(class) => self.visit_class(class),
            Stmt::Assign(assign) => {
                if assign.targets.len() == 1 {
                    if let Expr::Name(target) = &assign.targets[0] {
                        self.visit_attribute_marker(target.id.as_str(), &assign.value);
                    }
                }
            }
            Stmt::AnnAssign(ann) => {
                if let (Expr::Name(target), Some(value)) = (ann.target.as_ref(), &ann.value) {
                    self.visit_attribute_marker(target.id.as_str(), value);
                }
            }
            Stmt::Import(import) => {
                for alias in &import.names {
                    let module = alias.name.to_string();
                    let bound = alias
                        .asname
                        .as_ref()
                        .map(|a| a.to_string())
                        .unwrap_or_else(|| module.clone());
                    self.import_aliases.insert(bound, module.clone());
                    self.result.imports.push(ImportBinding {
                        module,
                        names: Vec::new(),
                    });
                }
            }
            Stmt::ImportFrom(import) => {
                let dots = ".".repeat(import.level as usize);
                let module = match &import.module {
                    Some(name) => format!("{}{}", dots, name),
                    None => dots,
                };
                let names: Vec<(String, Option<String>)> = import
                    .names
                    .iter()
                    .map(|alias| {
                        (
                            alias.name.to_string(),
                            alias.asname.as_ref().map(|a| a.to_string()),
                        )
                    })
                    .collect();
                for (name, alias) in &names {
                    let bound = alias.clone().unwrap_or_else(|| name.clone());
                    self.import_aliases
                        .insert(bound, format!("{}.{}", module, name));
                }
                self.result.imports.push(ImportBinding { module, names });
            }
            _ => {}
        }
    }

    fn qualified(&self, name: &str) -> String {
        let mut parts = Vec::with_capacity(2 + self.class_stack.len());
        parts.push(self.module.as_str());
        parts.extend(self.class_stack.iter().map(|c| c.as_str()));
        parts.push(name);
        parts.join(".")
    }

    fn declaring_class(&self) -> Option<String> {
        if self.class_stack.is_empty() {
            return None;
        }
        let mut parts = vec![self.module.as_str()];
        parts.extend(self.class_stack.iter().map(|c| c.as_str()));
        Some(parts.join("."))
    }

    fn record_failure(
        &mut self,
        qualified: String,
        kind: ConstructKind,
        reason: FailureReason,
        message: String,
    ) {
        tracing::warn!("{} '{}' cannot be processed: {}", kind.as_str(), qualified, message);
        self.result.unreplaceable.insert(
            qualified.clone(),
            Unreplaceable {
                qualified_name: qualified,
                kind,
                reason,
                message,
            },
        );
    }

    fn record_template(
        &mut self,
        qualified: String,
        simple: &str,
        kind: ConstructKind,
        parameters: Vec<ParamInfo>,
        template: Box<Expr>,
        args: MarkerArgs,
    ) {
        let template_source = match template::print_expr(&template) {
            Ok(text) => text,
            Err(e) => {
                self.record_failure(
                    qualified,
                    kind,
                    FailureReason::InvalidTemplate,
                    format!("template cannot be serialized: {}", e),
                );
                return;
            }
        };

        tracing::debug!("collected {} -> {}", qualified, template_source);
        self.result.replacements.insert(
            qualified.clone(),
            ReplaceInfo {
                qualified_name: qualified,
                simple_name: simple.to_string(),
                kind,
                parameters,
                template,
                template_source,
                since: args.since,
                remove_in: args.remove_in,
                message: args.message,
                declaring_class: self.declaring_class(),
            },
        );
    }

    fn visit_function(&mut self, func: &StmtFunctionDef) {
        if !has_marker(&func.decorator_list) {
            return;
        }

        let qualified = self.qualified(func.name.as_str());
        let kind = self.function_kind(func);

        let args = match extract_marker_args(marker_call_keywords(&func.decorator_list)) {
            Ok(args) => args,
            Err(message) => {
                self.record_failure(qualified, kind, FailureReason::DynamicMarkerArgs, message);
                return;
            }
        };

        let parameters = self.extract_parameters(func);
        match self.extract_function_template(func, &parameters) {
            Extraction::Template(template) => {
                self.record_template(qualified, func.name.as_str(), kind, parameters, template, args)
            }
            Extraction::Failed(reason, message) => {
                self.record_failure(qualified, kind, reason, message)
            }
        }
    }

    fn function_kind(&self, func: &StmtFunctionDef) -> ConstructKind {
        if !self.class_stack.is_empty() {
            let decorator_names: Vec<&str> = func
                .decorator_list
                .iter()
                .filter_map(|dec| match &dec.expression {
                    Expr::Name(name) => Some(name.id.as_str()),
                    _ => None,
                })
                .collect();

            if decorator_names.contains(&"property") {
                return ConstructKind::Property;
            }
            if decorator_names.contains(&"classmethod") {
                return ConstructKind::ClassMethod;
            }
            if decorator_names.contains(&"staticmethod") {
                return ConstructKind::StaticMethod;
            }
            if func.is_async {
                return ConstructKind::AsyncFunction;
            }
            return ConstructKind::Method;
        }
        if func.is_async {
            ConstructKind::AsyncFunction
        } else {
            ConstructKind::Function
        }
    }

    fn extract_parameters(&self, func: &StmtFunctionDef) -> Vec<ParamInfo> {
        let mut params = Vec::new();

        for param in func
            .parameters
            .posonlyargs
            .iter()
            .chain(func.parameters.args.iter())
        {
            params.push(ParamInfo {
                name: param.parameter.name.to_string(),
                has_default: param.default.is_some(),
                default_source: param
                    .default
                    .as_ref()
                    .map(|d| self.src.text_at(d.range()).to_string()),
                is_vararg: false,
                is_kwarg: false,
                is_kwonly: false,
            });
        }

        if let Some(vararg) = &func.parameters.vararg {
            params.push(ParamInfo::vararg(vararg.name.as_str()));
        }

        for param in &func.parameters.kwonlyargs {
            params.push(ParamInfo {
                name: param.parameter.name.to_string(),
                has_default: param.default.is_some(),
                default_source: param
                    .default
                    .as_ref()
                    .map(|d| self.src.text_at(d.range()).to_string()),
                is_vararg: false,
                is_kwarg: false,
                is_kwonly: true,
            });
        }

        if let Some(kwarg) = &func.parameters.kwarg {
            params.push(ParamInfo::kwarg(kwarg.name.as_str()));
        }

        params
    }

    /// The body must be exactly one `return` (or `return await`) statement,
    /// ignoring a leading docstring and `pass`.
    fn extract_function_template(
        &self,
        func: &StmtFunctionDef,
        parameters: &[ParamInfo],
    ) -> Extraction {
        let body: Vec<&Stmt> = effective_body(&func.body);

        if body.len() > 1 {
            return Extraction::Failed(
                FailureReason::ComplexBody,
                "body contains more than one statement".to_string(),
            );
        }

        let ret = match body.first() {
            Some(Stmt::Return(ret)) => ret,
            Some(_) => {
                return Extraction::Failed(
                    FailureReason::NoReturn,
                    "body does not end in a return statement".to_string(),
                )
            }
            None => {
                return Extraction::Failed(
                    FailureReason::NoReturn,
                    "body is empty".to_string(),
                )
            }
        };

        let value = match &ret.value {
            Some(value) => value,
            None => {
                return Extraction::Failed(
                    FailureReason::NoReturn,
                    "return statement has no value".to_string(),
                )
            }
        };

        let arity = parameters.iter().filter(|p| !p.is_receiver()).count();
        if calls_own_name(value, func.name.as_str(), arity) {
            return Extraction::Failed(
                FailureReason::RecursiveCall,
                format!("template calls '{}' recursively", func.name),
            );
        }

        Extraction::Template(Box::new((**value).clone()))
    }

    fn visit_class(&mut self, class: &StmtClassDef) {
        let class_name = class.name.to_string();
        let qualified = self.qualified(&class_name);

        let bases: Vec<String> = class
            .bases()
            .iter()
            .filter_map(|base| self.qualify_base(base))
            .collect();
        if !bases.is_empty() {
            tracing::debug!("{} inherits from {:?}", qualified, bases);
            self.result.inheritance.insert(qualified.clone(), bases);
        }

        if has_marker(&class.decorator_list) {
            self.collect_class_marker(class, &qualified, &class_name);
        }

        self.class_stack.push(class_name);
        for stmt in &class.body {
            self.visit_stmt(stmt);
        }
        self.class_stack.pop();
    }

    fn collect_class_marker(&mut self, class: &StmtClassDef, qualified: &str, simple: &str) {
        let args = match extract_marker_args(marker_call_keywords(&class.decorator_list)) {
            Ok(args) => args,
            Err(message) => {
                self.record_failure(
                    qualified.to_string(),
                    ConstructKind::Class,
                    FailureReason::DynamicMarkerArgs,
                    message,
                );
                return;
            }
        };

        let init = class.body.iter().find_map(|stmt| match stmt {
            Stmt::FunctionDef(func) if func.name.as_str() == "__init__" => Some(func),
            _ => None,
        });

        let init = match init {
            Some(init) => init,
            None => {
                self.record_failure(
                    qualified.to_string(),
                    ConstructKind::Class,
                    FailureReason::ComplexBody,
                    "class has no __init__ to derive a replacement from".to_string(),
                );
                return;
            }
        };

        match self.extract_class_template(init) {
            Extraction::Template(template) => {
                let parameters: Vec<ParamInfo> = self
                    .extract_parameters(init)
                    .into_iter()
                    .filter(|p| p.name != "self")
                    .collect();
                self.record_template(
                    qualified.to_string(),
                    simple,
                    ConstructKind::Class,
                    parameters,
                    template,
                    args,
                );
            }
            Extraction::Failed(reason, message) => {
                self.record_failure(qualified.to_string(), ConstructKind::Class, reason, message)
            }
        }
    }

    /// A deprecated class derives its template from `__init__`: either a
    /// single `Replacement(expr)` marker call, or the right-hand side of a
    /// single wrapped-constructor assignment.  Plain `self.X = ...`
    /// bookkeeping assignments are ignored alongside either form.
    fn extract_class_template(&self, init: &StmtFunctionDef) -> Extraction {
        let mut marker_template: Option<&Expr> = None;
        let mut wrapped: Vec<&Expr> = Vec::new();

        for stmt in effective_body(&init.body) {
            match stmt {
                Stmt::Expr(expr_stmt) => {
                    if let Expr::Call(call) = &*expr_stmt.value {
                        if matches!(&*call.func, Expr::Name(n) if n.id.as_str() == CLASS_TEMPLATE_MARKER)
                        {
                            if marker_template.is_some() || call.arguments.args.len() != 1 {
                                return Extraction::Failed(
                                    FailureReason::ComplexBody,
                                    "expected a single Replacement(...) call".to_string(),
                                );
                            }
                            marker_template = Some(&call.arguments.args[0]);
                            continue;
                        }
                    }
                    return Extraction::Failed(
                        FailureReason::ComplexBody,
                        "unsupported statement in __init__".to_string(),
                    );
                }
                Stmt::Assign(assign) => {
                    if assign.targets.len() == 1 {
                        if let Expr::Attribute(attr) = &assign.targets[0] {
                            if matches!(&*attr.value, Expr::Name(n) if n.id.as_str() == "self") {
                                wrapped.push(&assign.value);
                                continue;
                            }
                        }
                    }
                    return Extraction::Failed(
                        FailureReason::ComplexBody,
                        "unsupported assignment in __init__".to_string(),
                    );
                }
                _ => {
                    return Extraction::Failed(
                        FailureReason::ComplexBody,
                        "unsupported statement in __init__".to_string(),
                    )
                }
            }
        }

        if let Some(template) = marker_template {
            return Extraction::Template(Box::new(template.clone()));
        }
        if wrapped.len() == 1 {
            return Extraction::Template(Box::new(wrapped[0].clone()));
        }
        Extraction::Failed(
            FailureReason::ComplexBody,
            "no single wrapped constructor in __init__".to_string(),
        )
    }

    fn visit_attribute_marker(&mut self, name: &str, value: &Expr) {
        let call = match value {
            Expr::Call(call)
                if matches!(&*call.func, Expr::Name(n) if n.id.as_str() == MARKER_NAME) =>
            {
                call
            }
            _ => return,
        };

        let qualified = self.qualified(name);
        let kind = if self.class_stack.is_empty() {
            ConstructKind::ModuleAttribute
        } else {
            ConstructKind::ClassAttribute
        };

        let args = match extract_marker_args(Some(&*call.arguments.keywords)) {
            Ok(args) => args,
            Err(message) => {
                self.record_failure(qualified, kind, FailureReason::DynamicMarkerArgs, message);
                return;
            }
        };

        let value = match call.arguments.args.first() {
            Some(value) => value,
            None => {
                self.record_failure(
                    qualified,
                    kind,
                    FailureReason::InvalidTemplate,
                    "marker call has no value argument".to_string(),
                );
                return;
            }
        };

        if matches!(value, Expr::Lambda(_)) {
            self.record_failure(
                qualified,
                kind,
                FailureReason::Lambda,
                "lambda values cannot be inlined at use sites".to_string(),
            );
            return;
        }

        self.record_template(
            qualified,
            name,
            kind,
            Vec::new(),
            Box::new(value.clone()),
            args,
        );
    }

    fn qualify_base(&self, base: &Expr) -> Option<String> {
        match base {
            Expr::Name(name) => {
                let simple = name.id.as_str();
                match self.import_aliases.get(simple) {
                    Some(qualified) => Some(qualified.clone()),
                    None => Some(format!("{}.{}", self.module, simple)),
                }
            }
            Expr::Attribute(_) => {
                let dotted = dotted_path(base)?;
                // Resolve the leading segment through import aliases so
                // `m.Base` with `import pkg.m as m` becomes `pkg.m.Base`.
                let (first, rest) = dotted.split_once('.')?;
                match self.import_aliases.get(first) {
                    Some(prefix) => Some(format!("{}.{}", prefix, rest)),
                    None => Some(dotted),
                }
            }
            _ => None,
        }
    }
}

/// Body statements that carry meaning: leading docstrings and `pass` are
/// not part of the template shape.
fn effective_body(body: &[Stmt]) -> Vec<&Stmt> {
    body.iter()
        .skip_while(|stmt| {
            matches!(stmt, Stmt::Expr(e)
                if matches!(&*e.value, Expr::StringLiteral(_) | Expr::FString(_)))
        })
        .filter(|stmt| !matches!(stmt, Stmt::Pass(_)))
        .collect()
}

pub fn has_marker(decorators: &[Decorator]) -> bool {
    decorators.iter().any(|dec| is_marker_expr(&dec.expression))
}

fn is_marker_expr(expr: &Expr) -> bool {
    match expr {
        Expr::Name(name) => name.id.as_str() == MARKER_NAME,
        Expr::Attribute(attr) => attr.attr.as_str() == MARKER_NAME,
        Expr::Call(call) => is_marker_expr(&call.func),
        _ => false,
    }
}

fn marker_call_keywords(decorators: &[Decorator]) -> Option<&[ruff_python_ast::Keyword]> {
    decorators.iter().find_map(|dec| match &dec.expression {
        Expr::Call(call) if is_marker_expr(&call.func) => Some(&*call.arguments.keywords),
        _ => None,
    })
}

/// Marker arguments are literal-only: strings, or tuples of int literals
/// for versions.  Anything else poisons the construct.
fn extract_marker_args(
    keywords: Option<&[ruff_python_ast::Keyword]>,
) -> Result<MarkerArgs, String> {
    let mut args = MarkerArgs {
        since: None,
        remove_in: None,
        message: None,
    };

    let keywords = match keywords {
        Some(keywords) => keywords,
        None => return Ok(args),
    };

    for keyword in keywords {
        let name = match &keyword.arg {
            Some(name) => name.as_str(),
            None => return Err("marker does not accept ** arguments".to_string()),
        };
        match name {
            "since" => args.since = Some(version_literal(&keyword.value)?),
            "remove_in" => args.remove_in = Some(version_literal(&keyword.value)?),
            "message" => match &keyword.value {
                Expr::StringLiteral(s) => args.message = Some(s.value.to_str().to_string()),
                _ => return Err("message must be a string literal".to_string()),
            },
            other => {
                tracing::debug!("ignoring unknown marker argument '{}'", other);
            }
        }
    }

    Ok(args)
}

fn version_literal(expr: &Expr) -> Result<String, String> {
    match expr {
        Expr::StringLiteral(s) => Ok(s.value.to_str().to_string()),
        Expr::Tuple(tuple) => {
            let mut parts = Vec::new();
            for elt in &tuple.elts {
                match elt {
                    Expr::NumberLiteral(n) => match &n.value {
                        ruff_python_ast::Number::Int(i) => parts.push(i.to_string()),
                        _ => return Err("version tuple must contain integers".to_string()),
                    },
                    Expr::StringLiteral(s) => parts.push(s.value.to_str().to_string()),
                    _ => return Err("version must be a literal".to_string()),
                }
            }
            Ok(parts.join("."))
        }
        _ => Err("version must be a string or tuple literal".to_string()),
    }
}

/// A template that calls the construct it replaces, directly or through a
/// receiver, with matching arity.
fn calls_own_name(expr: &Expr, name: &str, arity: usize) -> bool {
    if let Expr::Call(call) = expr {
        let callee = match &*call.func {
            Expr::Name(func) => Some(func.id.as_str()),
            Expr::Attribute(attr) => Some(attr.attr.as_str()),
            _ => None,
        };
        if callee == Some(name)
            && call.arguments.args.len() + call.arguments.keywords.len() == arity
        {
            return true;
        }
    }
    template::children(expr)
        .iter()
        .any(|child| calls_own_name(child, name, arity))
}

fn dotted_path(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Name(name) => Some(name.id.to_string()),
        Expr::Attribute(attr) => Some(format!("{}.{}", dotted_path(&attr.value)?, attr.attr)),
        _ => None,
    }
}
