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

//! Call-site identification and rewriting.
//!
//! Walks a module in source order and, for every call, attribute access or
//! builtin dispatch whose target resolves to a collected marker, splices a
//! substituted template over the site.  Resolution is conservative: a site
//! whose binding is shadowed, whose receiver type is unknown, or whose
//! arguments cannot be bound is skipped with a warning and the rest of the
//! file proceeds.

use ruff_python_ast::{
    self as ast,
    visitor::{self, Visitor},
    Expr, Mod, Stmt,
};
use ruff_text_size::{Ranged, TextRange, TextSize};
use std::collections::{HashMap, HashSet, VecDeque};

use crate::collect::has_marker;
use crate::model::{
    AppliedReplacement, BindError, ConstructKind, ReplaceInfo, SkippedSite,
};
use crate::source::SourceModule;
use crate::template::{self, Bindings, BoundArg};
use crate::typeinfo::TypeSession;

/// Builtins that dispatch to a dunder method on their first argument.
const MAGIC_BUILTINS: &[(&str, &str)] = &[
    ("str", "__str__"),
    ("repr", "__repr__"),
    ("len", "__len__"),
    ("bool", "__bool__"),
    ("int", "__int__"),
    ("float", "__float__"),
    ("bytes", "__bytes__"),
    ("hash", "__hash__"),
    ("iter", "__iter__"),
    ("next", "__next__"),
];

#[derive(Debug, Clone)]
struct Edit {
    range: TextRange,
    new_text: String,
    qualified_name: String,
}

#[derive(Debug, Default)]
pub struct RewriteOutcome {
    /// Range edits in source order, ready for splicing.
    pub edits: Vec<(TextRange, String)>,
    /// One record per edit, in source order.
    pub applied: Vec<AppliedReplacement>,
    /// Sites that matched a marker but were left unchanged.
    pub skipped: Vec<SkippedSite>,
}

/// How one module-level name was last bound before a use site.
#[derive(Debug, Clone)]
enum BindingKind {
    /// `from m import name [as alias]` — carries the qualified path.
    ImportedName(String),
    /// `import m [as alias]` — carries the module path.
    ImportedModule(String),
    /// A module-level definition that itself carries the marker.
    DeprecatedDef,
    /// A class defined in this module; usable as a class-literal receiver.
    LocalClass,
    /// Any other local definition or assignment; shadows imports.
    Plain,
}

enum Resolution<'t> {
    Shadowed,
    Unbound,
    Module(String),
    ClassLiteral(String),
    Info(&'t ReplaceInfo),
}

pub fn rewrite_module(
    module: &SourceModule<'_>,
    module_name: &str,
    table: &HashMap<String, ReplaceInfo>,
    inheritance: &HashMap<String, Vec<String>>,
    session: &mut TypeSession<'_>,
) -> RewriteOutcome {
    let mut rewriter = Rewriter {
        module,
        module_name,
        table,
        inheritance,
        session,
        bindings: HashMap::new(),
        star_modules: Vec::new(),
        scope_locals: Vec::new(),
        scope_types: Vec::new(),
        module_types: HashMap::new(),
        class_stack: Vec::new(),
        edits: Vec::new(),
        skipped: Vec::new(),
        reported_cycles: HashSet::new(),
    };

    if let Mod::Module(body) = module.ast() {
        rewriter.scan_module_scope(&body.body);
        for stmt in &body.body {
            rewriter.visit_stmt(stmt);
        }
    }

    rewriter.into_outcome()
}

struct Rewriter<'a, 'e, 'src> {
    module: &'a SourceModule<'src>,
    module_name: &'a str,
    table: &'a HashMap<String, ReplaceInfo>,
    inheritance: &'a HashMap<String, Vec<String>>,
    session: &'a mut TypeSession<'e>,

    /// Module-level bindings per name, ordered by offset.
    bindings: HashMap<String, Vec<(TextSize, BindingKind)>>,
    /// Modules star-imported at module level.
    star_modules: Vec<String>,
    /// Names local to each enclosing function scope, innermost last.
    scope_locals: Vec<HashSet<String>>,
    /// `var -> constructor callee` per function scope.
    scope_types: Vec<HashMap<String, String>>,
    /// `var -> constructor callee` at module level.
    module_types: HashMap<String, String>,
    class_stack: Vec<String>,

    edits: Vec<Edit>,
    skipped: Vec<SkippedSite>,
    reported_cycles: HashSet<String>,
}

impl<'a> Visitor<'a> for Rewriter<'_, '_, '_> {
    fn visit_stmt(&mut self, stmt: &'a Stmt) {
        match stmt {
            Stmt::FunctionDef(func) => {
                // Never rewrite inside a deprecated definition: its body is
                // the template, and substituting there would feed on itself.
                if has_marker(&func.decorator_list) {
                    tracing::debug!("skipping body of deprecated '{}'", func.name);
                    return;
                }
                self.push_function_scope(func);
                visitor::walk_stmt(self, stmt);
                self.scope_locals.pop();
                self.scope_types.pop();
            }
            Stmt::ClassDef(class) => {
                self.class_stack.push(class.name.to_string());
                visitor::walk_stmt(self, stmt);
                self.class_stack.pop();
            }
            _ => visitor::walk_stmt(self, stmt),
        }
    }

    fn visit_expr(&mut self, expr: &'a Expr) {
        match expr {
            Expr::Await(await_expr) => {
                if let Expr::Call(call) = &*await_expr.value {
                    self.visit_call_children(call);
                    self.process_call(call, true);
                    return;
                }
                visitor::walk_expr(self, expr);
            }
            Expr::Call(call) => {
                self.visit_call_children(call);
                self.process_call(call, false);
            }
            Expr::Attribute(attr) => {
                if matches!(attr.ctx, ast::ExprContext::Load) && self.process_attribute(attr) {
                    return;
                }
                visitor::walk_expr(self, expr);
            }
            Expr::Name(name) => {
                if matches!(name.ctx, ast::ExprContext::Load) {
                    self.process_name(name);
                }
            }
            _ => visitor::walk_expr(self, expr),
        }
    }
}

impl<'t> Rewriter<'t, '_, '_> {
    fn into_outcome(self) -> RewriteOutcome {
        let mut edits = self.edits;
        edits.sort_by_key(|e| e.range.start());

        let mut outcome = RewriteOutcome {
            skipped: self.skipped,
            ..Default::default()
        };
        for edit in edits {
            let (line, column) = self.module.line_col(edit.range.start());
            outcome.applied.push(AppliedReplacement {
                line,
                column,
                old_text: self.module.text_at(edit.range).to_string(),
                new_text: edit.new_text.clone(),
                qualified_name: edit.qualified_name,
            });
            outcome.edits.push((edit.range, edit.new_text));
        }
        outcome
    }

    // ---- scope analysis -------------------------------------------------

    fn scan_module_scope(&mut self, body: &[Stmt]) {
        for stmt in body {
            match stmt {
                Stmt::Import(import) => {
                    for alias in &import.names {
                        let module = alias.name.to_string();
                        let (bound, target) = match &alias.asname {
                            Some(asname) => (asname.to_string(), module.clone()),
                            // `import a.b` binds the top-level package name.
                            None => {
                                let first = module.split('.').next().unwrap_or(&module);
                                (first.to_string(), first.to_string())
                            }
                        };
                        self.add_binding(bound, stmt.range().start(), BindingKind::ImportedModule(target));
                    }
                }
                Stmt::ImportFrom(import) => {
                    let raw = {
                        let dots = ".".repeat(import.level as usize);
                        match &import.module {
                            Some(name) => format!("{}{}", dots, name),
                            None => dots,
                        }
                    };
                    let resolved = crate::deps::resolve_relative(&raw, self.module_name)
                        .unwrap_or_else(|| raw.clone());
                    for alias in &import.names {
                        if alias.name.as_str() == "*" {
                            self.star_modules.push(resolved.clone());
                            continue;
                        }
                        let bound = alias
                            .asname
                            .as_ref()
                            .map(|a| a.to_string())
                            .unwrap_or_else(|| alias.name.to_string());
                        self.add_binding(
                            bound,
                            stmt.range().start(),
                            BindingKind::ImportedName(format!("{}.{}", resolved, alias.name)),
                        );
                    }
                }
                Stmt::FunctionDef(func) => {
                    let kind = if has_marker(&func.decorator_list) {
                        BindingKind::DeprecatedDef
                    } else {
                        BindingKind::Plain
                    };
                    self.add_binding(func.name.to_string(), stmt.range().start(), kind);
                }
                Stmt::ClassDef(class) => {
                    let kind = if has_marker(&class.decorator_list) {
                        BindingKind::DeprecatedDef
                    } else {
                        BindingKind::LocalClass
                    };
                    self.add_binding(class.name.to_string(), stmt.range().start(), kind);
                }
                Stmt::Assign(assign) => {
                    let deprecated = is_marker_assignment(&assign.value);
                    for target in &assign.targets {
                        self.record_assignment_binding(target, stmt.range().start(), deprecated);
                    }
                    if let [Expr::Name(target)] = assign.targets.as_slice() {
                        if let Some(callee) = constructor_callee(&assign.value) {
                            self.module_types.insert(target.id.to_string(), callee);
                        }
                    }
                }
                Stmt::AnnAssign(ann) => {
                    let deprecated = ann
                        .value
                        .as_ref()
                        .map(|v| is_marker_assignment(v))
                        .unwrap_or(false);
                    self.record_assignment_binding(&ann.target, stmt.range().start(), deprecated);
                    if let (Expr::Name(target), Some(value)) = (ann.target.as_ref(), &ann.value) {
                        if let Some(callee) = constructor_callee(value) {
                            self.module_types.insert(target.id.to_string(), callee);
                        }
                    }
                }
                Stmt::AugAssign(aug) => {
                    self.record_assignment_binding(&aug.target, stmt.range().start(), false);
                }
                _ => {}
            }
        }
    }

    fn add_binding(&mut self, name: String, offset: TextSize, kind: BindingKind) {
        self.bindings.entry(name).or_default().push((offset, kind));
    }

    fn record_assignment_binding(&mut self, target: &Expr, offset: TextSize, deprecated: bool) {
        match target {
            Expr::Name(name) => {
                let kind = if deprecated {
                    BindingKind::DeprecatedDef
                } else {
                    BindingKind::Plain
                };
                self.add_binding(name.id.to_string(), offset, kind);
            }
            Expr::Tuple(tuple) => {
                for elt in &tuple.elts {
                    self.record_assignment_binding(elt, offset, false);
                }
            }
            _ => {}
        }
    }

    fn push_function_scope(&mut self, func: &ast::StmtFunctionDef) {
        let mut locals = HashSet::new();
        for param in func
            .parameters
            .posonlyargs
            .iter()
            .chain(func.parameters.args.iter())
            .chain(func.parameters.kwonlyargs.iter())
        {
            locals.insert(param.parameter.name.to_string());
        }
        if let Some(vararg) = &func.parameters.vararg {
            locals.insert(vararg.name.to_string());
        }
        if let Some(kwarg) = &func.parameters.kwarg {
            locals.insert(kwarg.name.to_string());
        }
        collect_scope_locals(&func.body, &mut locals);

        let mut types = HashMap::new();
        if !self.class_stack.is_empty() {
            let class = format!("{}.{}", self.module_name, self.class_stack.join("."));
            types.insert("self".to_string(), class.clone());
            types.insert("cls".to_string(), class);
        }
        collect_scope_types(&func.body, &mut types);

        self.scope_locals.push(locals);
        self.scope_types.push(types);
    }

    // ---- name resolution ------------------------------------------------

    fn resolve_name(&self, name: &str, offset: TextSize) -> Resolution<'t> {
        for scope in self.scope_locals.iter().rev() {
            if scope.contains(name) {
                return Resolution::Shadowed;
            }
        }

        let binding = self.bindings.get(name).and_then(|entries| {
            if self.scope_locals.is_empty() {
                // At module level only bindings textually before the use
                // are live.
                entries.iter().filter(|(o, _)| *o < offset).next_back()
            } else {
                // Function bodies run after the module is fully loaded, so
                // the last module-level binding wins.
                entries.last()
            }
        });

        match binding {
            Some((_, BindingKind::Plain)) => Resolution::Shadowed,
            Some((_, BindingKind::LocalClass)) => {
                Resolution::ClassLiteral(format!("{}.{}", self.module_name, name))
            }
            Some((_, BindingKind::DeprecatedDef)) => {
                let qualified = format!("{}.{}", self.module_name, name);
                match self.table.get(&qualified) {
                    Some(info) => Resolution::Info(info),
                    None => Resolution::Unbound,
                }
            }
            Some((_, BindingKind::ImportedName(qualified))) => {
                if let Some(info) = self.table.get(qualified) {
                    return Resolution::Info(info);
                }
                // The imported name may be a class whose methods are
                // deprecated; keep it resolvable as a class literal.
                if self.names_class(qualified) {
                    return Resolution::ClassLiteral(qualified.clone());
                }
                Resolution::Unbound
            }
            Some((_, BindingKind::ImportedModule(module))) => Resolution::Module(module.clone()),
            None => {
                for module in &self.star_modules {
                    let qualified = format!("{}.{}", module, name);
                    if let Some(info) = self.table.get(&qualified) {
                        return Resolution::Info(info);
                    }
                }
                Resolution::Unbound
            }
        }
    }

    /// Whether a qualified name denotes a class we know something about.
    fn names_class(&self, qualified: &str) -> bool {
        if self.inheritance.contains_key(qualified) {
            return true;
        }
        let prefix = format!("{}.", qualified);
        self.table.keys().any(|key| key.starts_with(&prefix))
    }

    fn local_type_of(&self, name: &str) -> Option<String> {
        for scope in self.scope_types.iter().rev() {
            if let Some(callee) = scope.get(name) {
                return Some(callee.clone());
            }
        }
        for scope in self.scope_locals.iter().rev() {
            if scope.contains(name) {
                // Function-local name without a recorded constructor; the
                // module-level map does not apply.
                return None;
            }
        }
        self.module_types.get(name).cloned()
    }

    /// Candidate qualified spellings for a class string a checker or the
    /// local analysis produced.
    fn class_candidates(&self, class: &str) -> Vec<String> {
        let mut candidates = Vec::new();
        if class.contains('.') {
            let (first, rest) = class.split_once('.').unwrap();
            if let Some(entries) = self.bindings.get(first) {
                if let Some((_, BindingKind::ImportedModule(module))) = entries.last() {
                    candidates.push(format!("{}.{}", module, rest));
                }
            }
            candidates.push(class.to_string());
            if let Some(simple) = class.rsplit('.').next() {
                candidates.push(format!("{}.{}", self.module_name, simple));
            }
        } else {
            if let Some(entries) = self.bindings.get(class) {
                if let Some((_, BindingKind::ImportedName(qualified))) = entries.last() {
                    candidates.push(qualified.clone());
                }
            }
            candidates.push(format!("{}.{}", self.module_name, class));
            candidates.push(class.to_string());
        }
        candidates
    }

    /// Walk the inheritance chain of `class` looking for a marked member.
    fn lookup_member(&mut self, class: &str, member: &str) -> Option<&'t ReplaceInfo> {
        let mut queue: VecDeque<String> = VecDeque::new();
        let mut visited = HashSet::new();
        queue.push_back(class.to_string());

        while let Some(current) = queue.pop_front() {
            if !visited.insert(current.clone()) {
                // Cycles are tolerated in the input but broken here.
                if self.reported_cycles.insert(current.clone()) {
                    tracing::warn!("inheritance cycle involving '{}'", current);
                }
                continue;
            }

            let key = format!("{}.{}", current, member);
            if let Some(info) = self.table.get(&key) {
                return Some(info);
            }

            if let Some(bases) = self.inheritance.get(&current) {
                for base in bases {
                    queue.push_back(base.clone());
                    if !base.contains('.') {
                        queue.push_back(format!("{}.{}", self.module_name, base));
                    }
                }
            }
        }
        None
    }

    fn member_exists_anywhere(&self, member: &str) -> bool {
        let suffix = format!(".{}", member);
        self.table.keys().any(|key| key.ends_with(&suffix))
    }

    // ---- receiver typing ------------------------------------------------

    fn receiver_class(&mut self, receiver: &Expr) -> Option<String> {
        if let Expr::Name(name) = receiver {
            if let Some(callee) = self.local_type_of(name.id.as_str()) {
                for candidate in self.class_candidates(&callee) {
                    if self.names_class(&candidate) {
                        return Some(candidate);
                    }
                }
                // An unknown constructor still names the best guess.
                return self.class_candidates(&callee).into_iter().next();
            }
        }

        let query_offset = match receiver {
            Expr::Name(name) => name.range().start(),
            Expr::Attribute(attr) => attr.attr.range().start(),
            // For call receivers the result type lives just inside the
            // closing parenthesis.
            Expr::Call(call) => call.range().end() - TextSize::from(1),
            other => other.range().start(),
        };
        let (line, column) = self.module.line_col(query_offset);
        let receiver_text = self.module.text_at(receiver.range());
        self.session.class_of(line, column, receiver_text)
    }

    // ---- call sites -----------------------------------------------------

    fn visit_call_children(&mut self, call: &ast::ExprCall) {
        match &*call.func {
            Expr::Attribute(attr) => self.visit_expr(&attr.value),
            other => self.visit_expr(other),
        }
        for arg in call.arguments.args.iter() {
            self.visit_expr(arg);
        }
        for keyword in call.arguments.keywords.iter() {
            self.visit_expr(&keyword.value);
        }
    }

    fn process_call(&mut self, call: &ast::ExprCall, is_await: bool) {
        match &*call.func {
            Expr::Name(name) => self.process_direct_call(call, name, is_await),
            Expr::Attribute(attr) => self.process_receiver_call(call, attr, is_await),
            _ => {}
        }
    }

    fn process_direct_call(&mut self, call: &ast::ExprCall, name: &ast::ExprName, is_await: bool) {
        let simple = name.id.as_str();
        match self.resolve_name(simple, name.range().start()) {
            Resolution::Info(info) => {
                if info.kind.has_receiver() {
                    // A method name imported bare cannot be called without
                    // a receiver; nothing sensible to do.
                    return;
                }
                if matches!(
                    info.kind,
                    ConstructKind::ModuleAttribute | ConstructKind::ClassAttribute
                ) {
                    // The callee name itself was already inlined by the
                    // name-access pass; the call expression survives.
                    return;
                }
                self.apply_call(call, info, None, is_await);
            }
            Resolution::Shadowed => {}
            Resolution::Module(_) | Resolution::ClassLiteral(_) => {}
            Resolution::Unbound => {
                if let Some((_, dunder)) = MAGIC_BUILTINS.iter().find(|(b, _)| *b == simple) {
                    self.process_magic_builtin(call, simple, dunder);
                }
            }
        }
    }

    fn process_receiver_call(
        &mut self,
        call: &ast::ExprCall,
        attr: &ast::ExprAttribute,
        is_await: bool,
    ) {
        let member = attr.attr.as_str();
        let receiver = &attr.value;

        // Module-qualified access resolves without type information.
        if let Some(path) = dotted_path(receiver) {
            let (first, rest) = match path.split_once('.') {
                Some((first, rest)) => (first, Some(rest)),
                None => (path.as_str(), None),
            };
            match self.resolve_name(first, receiver.range().start()) {
                Resolution::Module(module) => {
                    let qualified = match rest {
                        Some(rest) => format!("{}.{}.{}", module, rest, member),
                        None => format!("{}.{}", module, member),
                    };
                    if let Some(info) = self.table.get(&qualified) {
                        if !info.kind.has_receiver() {
                            self.apply_call(call, info, None, is_await);
                            return;
                        }
                    }
                    // A module path is never an instance; fall through only
                    // for single-segment paths that may name a class.
                    if rest.is_some() {
                        return;
                    }
                }
                Resolution::ClassLiteral(class) if rest.is_none() => {
                    if let Some(info) = self.lookup_member(&class, member) {
                        let bound = self.bound_arg(receiver);
                        self.apply_call(call, info, Some(bound), is_await);
                    }
                    return;
                }
                // Anything else (including a shadowed base name) means the
                // receiver is an ordinary value; fall through to typing.
                _ => {}
            }
        }

        // Cheap pre-filter: without any candidate member there is no point
        // paying for a type query.
        if !self.member_exists_anywhere(member) {
            return;
        }

        let resolved = self.receiver_class(receiver);
        let class = match resolved {
            Some(class) => class,
            None => {
                self.skip(
                    call.range(),
                    member,
                    "receiver type unknown; call left unchanged",
                );
                return;
            }
        };

        let info = self
            .class_candidates(&class)
            .into_iter()
            .find_map(|candidate| self.lookup_member(&candidate, member));

        match info {
            Some(info) if info.kind.has_receiver() || info.kind == ConstructKind::StaticMethod => {
                let bound = self.bound_arg(receiver);
                self.apply_call(call, info, Some(bound), is_await);
            }
            _ => {}
        }
    }

    fn process_magic_builtin(&mut self, call: &ast::ExprCall, builtin: &str, dunder: &str) {
        if call.arguments.args.is_empty() || !call.arguments.keywords.is_empty() {
            return;
        }
        if !self.member_exists_anywhere(dunder) {
            return;
        }

        let receiver = &call.arguments.args[0];
        let class = match self.receiver_class(receiver) {
            Some(class) => class,
            None => return,
        };

        let info = match self
            .class_candidates(&class)
            .into_iter()
            .find_map(|candidate| self.lookup_member(&candidate, dunder))
        {
            Some(info) => info,
            None => return,
        };

        // `__str__` templates often spell `str(...)` themselves; unwrap so
        // the builtin is not doubled at the call site.
        let template_expr: &Expr = match &*info.template {
            Expr::Call(inner)
                if matches!(&*inner.func, Expr::Name(n) if n.id.as_str() == builtin)
                    && inner.arguments.args.len() == 1
                    && inner.arguments.keywords.is_empty() =>
            {
                &inner.arguments.args[0]
            }
            other => other,
        };

        let receiver_param = info
            .parameters
            .first()
            .filter(|p| p.is_receiver())
            .map(|p| p.name.clone())
            .unwrap_or_else(|| "self".to_string());

        // Refuse when substitution would duplicate a side-effecting
        // receiver expression.
        if template::free_uses(template_expr, &receiver_param) > 1
            && template::contains_call(receiver)
        {
            self.skip(
                call.range(),
                &info.qualified_name,
                "receiver with side effects used more than once in template",
            );
            return;
        }

        let mut bindings = Bindings::empty();
        bindings.bind(&receiver_param, self.bound_arg(receiver));

        // Extra builtin arguments fill the remaining dunder parameters in
        // order.
        let extra_params: Vec<_> = info
            .parameters
            .iter()
            .filter(|p| !p.is_receiver() && !p.is_vararg && !p.is_kwarg)
            .collect();
        for (i, arg) in call.arguments.args.iter().skip(1).enumerate() {
            match extra_params.get(i) {
                Some(param) => {
                    let bound = self.bound_arg(arg);
                    bindings.bind(&param.name, bound);
                }
                None => return,
            }
        }
        for param in extra_params.iter().skip(call.arguments.args.len() - 1) {
            match &param.default_source {
                Some(default) => bindings.bind(&param.name, BoundArg::new(default.clone(), true)),
                None => return,
            }
        }

        match template::render_template(template_expr, &bindings) {
            Ok(new_text) => {
                self.record_edit(call.range(), new_text, info.qualified_name.clone())
            }
            Err(e) => self.skip(call.range(), &info.qualified_name, &e.to_string()),
        }
    }

    // ---- attribute and name accesses ------------------------------------

    /// Rewrite `M.A`, `C.A` and deprecated property accesses.  Returns true
    /// when the attribute was rewritten.
    fn process_attribute(&mut self, attr: &ast::ExprAttribute) -> bool {
        let member = attr.attr.as_str();

        if let Some(path) = dotted_path(&attr.value) {
            let (first, rest) = match path.split_once('.') {
                Some((first, rest)) => (first, Some(rest)),
                None => (path.as_str(), None),
            };
            match self.resolve_name(first, attr.value.range().start()) {
                Resolution::Module(module) => {
                    let qualified = match rest {
                        Some(rest) => format!("{}.{}.{}", module, rest, member),
                        None => format!("{}.{}", module, member),
                    };
                    if let Some(info) = self.table.get(&qualified) {
                        if matches!(
                            info.kind,
                            ConstructKind::ModuleAttribute | ConstructKind::ClassAttribute
                        ) {
                            self.record_edit(
                                attr.range(),
                                Self::attribute_text(info),
                                info.qualified_name.clone(),
                            );
                            return true;
                        }
                    }
                    return false;
                }
                Resolution::ClassLiteral(class) if rest.is_none() => {
                    if let Some(key) = self.attribute_member_key(&class, member) {
                        let info = &self.table[&key];
                        self.record_edit(
                            attr.range(),
                            Self::attribute_text(info),
                            info.qualified_name.clone(),
                        );
                        return true;
                    }
                    return false;
                }
                _ => {}
            }

            if rest.is_none() {
                let qualified = format!("{}.{}", self.module_name, first);
                if self.names_class(&qualified) {
                    if let Some(key) = self.attribute_member_key(&qualified, member) {
                        let info = &self.table[&key];
                        self.record_edit(
                            attr.range(),
                            Self::attribute_text(info),
                            info.qualified_name.clone(),
                        );
                        return true;
                    }
                }
            }
        }

        // Deprecated property on a typed receiver.
        if self.member_exists_anywhere(member) {
            let receiver_range = attr.value.range();
            if let Some(class) = self.receiver_class_for_property(attr) {
                let found = self
                    .class_candidates(&class)
                    .into_iter()
                    .find_map(|candidate| {
                        self.lookup_member(&candidate, member)
                            .filter(|info| info.kind == ConstructKind::Property)
                    });
                if let Some(info) = found {
                    let receiver_bound = self.bound_arg(&attr.value);
                    let mut bindings = Bindings::empty();
                    let receiver_param = info
                        .parameters
                        .first()
                        .filter(|p| p.is_receiver())
                        .map(|p| p.name.clone())
                        .unwrap_or_else(|| "self".to_string());
                    bindings.bind(&receiver_param, receiver_bound);
                    match template::render_template(&info.template, &bindings) {
                        Ok(new_text) => {
                            self.record_edit(attr.range(), new_text, info.qualified_name.clone());
                            return true;
                        }
                        Err(e) => {
                            self.skip(attr.range(), &info.qualified_name, &e.to_string());
                            return false;
                        }
                    }
                }
            }
        }

        false
    }

    fn receiver_class_for_property(&mut self, attr: &ast::ExprAttribute) -> Option<String> {
        // Property lookups only pay for a type query when the receiver is
        // a plain name or attribute chain; anything else is too speculative.
        match &*attr.value {
            Expr::Name(_) | Expr::Attribute(_) => self.receiver_class(&attr.value),
            _ => None,
        }
    }

    fn attribute_member_key(&mut self, class: &str, member: &str) -> Option<String> {
        let found = self
            .class_candidates(class)
            .into_iter()
            .find_map(|candidate| {
                self.lookup_member(&candidate, member)
                    .filter(|info| {
                        matches!(
                            info.kind,
                            ConstructKind::ClassAttribute | ConstructKind::ModuleAttribute
                        )
                    })
                    .map(|info| info.qualified_name.clone())
            });
        found
    }

    fn process_name(&mut self, name: &ast::ExprName) {
        if let Resolution::Info(info) = self.resolve_name(name.id.as_str(), name.range().start()) {
            if matches!(
                info.kind,
                ConstructKind::ModuleAttribute | ConstructKind::ClassAttribute
            ) {
                self.record_edit(
                    name.range(),
                    Self::attribute_text(info),
                    info.qualified_name.clone(),
                );
            }
        }
    }

    // ---- binding and splicing -------------------------------------------

    fn apply_call(
        &mut self,
        call: &ast::ExprCall,
        info: &ReplaceInfo,
        receiver: Option<BoundArg>,
        is_await: bool,
    ) {
        let bindings = match self.bind_arguments(call, info, receiver) {
            Ok(bindings) => bindings,
            Err(e) => {
                self.skip(call.range(), &info.qualified_name, &e.to_string());
                return;
            }
        };

        let rendered = match template::render_template(&info.template, &bindings) {
            Ok(rendered) => rendered,
            Err(e) => {
                self.skip(call.range(), &info.qualified_name, &e.to_string());
                return;
            }
        };

        // An awaited call whose template already awaits would double up.
        let new_text = if is_await {
            rendered
                .strip_prefix("await ")
                .map(|s| s.to_string())
                .unwrap_or(rendered)
        } else {
            rendered
        };

        self.record_edit(call.range(), new_text, info.qualified_name.clone());
    }

    fn bind_arguments(
        &self,
        call: &ast::ExprCall,
        info: &ReplaceInfo,
        receiver: Option<BoundArg>,
    ) -> Result<Bindings, BindError> {
        let name = &info.qualified_name;
        let mut bindings = Bindings::empty();

        if let Some(receiver) = receiver {
            let receiver_param = info
                .parameters
                .first()
                .filter(|p| p.is_receiver())
                .map(|p| p.name.clone());
            match receiver_param {
                Some(param) => bindings.bind(&param, receiver),
                None => {
                    // Static methods have no receiver parameter; drop it.
                }
            }
        }

        let positional: Vec<_> = info
            .parameters
            .iter()
            .filter(|p| !p.is_vararg && !p.is_kwarg && !p.is_kwonly && !p.is_receiver())
            .collect();
        let vararg_param = info.parameters.iter().find(|p| p.is_vararg);
        let kwarg_param = info.parameters.iter().find(|p| p.is_kwarg);

        let mut pos_idx = 0usize;
        let mut overflow: Vec<String> = Vec::new();
        let mut saw_splat = false;

        for arg in call.arguments.args.iter() {
            if let Expr::Starred(_) = arg {
                match vararg_param {
                    Some(_) => {
                        saw_splat = true;
                        overflow.push(self.text_with_edits(arg.range()));
                    }
                    None => {
                        return Err(BindError::SplatUnsupported(
                            name.clone(),
                            self.text_with_edits(arg.range()),
                        ))
                    }
                }
                continue;
            }
            if pos_idx < positional.len() {
                let param = positional[pos_idx];
                bindings.bind(&param.name, self.bound_arg(arg));
                pos_idx += 1;
            } else if vararg_param.is_some() {
                overflow.push(self.text_with_edits(arg.range()));
            } else {
                return Err(BindError::TooManyPositional(name.clone()));
            }
        }

        if saw_splat && pos_idx < positional.len() {
            // The splat might have filled individual parameters the
            // template references; that cannot be reconstructed.
            return Err(BindError::SplatAmbiguous(
                name.clone(),
                positional[pos_idx].name.clone(),
            ));
        }

        let mut kwarg_pairs: Vec<String> = Vec::new();
        for keyword in call.arguments.keywords.iter() {
            let value_text = self.text_with_edits(keyword.value.range());
            match &keyword.arg {
                Some(key) => {
                    let target = info.parameters.iter().find(|p| {
                        !p.is_vararg && !p.is_kwarg && !p.is_receiver() && p.name == key.as_str()
                    });
                    match target {
                        Some(param) if !bindings.by_name.contains_key(&param.name) => {
                            bindings.bind(&param.name, self.bound_arg(&keyword.value));
                        }
                        Some(_) | None if kwarg_param.is_some() => {
                            kwarg_pairs.push(format!("{}={}", key, value_text));
                        }
                        _ => {
                            return Err(BindError::UnknownKeyword(
                                name.clone(),
                                key.to_string(),
                            ))
                        }
                    }
                }
                None => match kwarg_param {
                    Some(_) => kwarg_pairs.push(format!("**{}", value_text)),
                    None => {
                        return Err(BindError::SplatUnsupported(
                            name.clone(),
                            format!("**{}", value_text),
                        ))
                    }
                },
            }
        }

        for param in info.parameters.iter() {
            if param.is_vararg || param.is_kwarg || param.is_receiver() {
                continue;
            }
            if bindings.by_name.contains_key(&param.name) {
                continue;
            }
            match &param.default_source {
                Some(default) => {
                    let atomic = ruff_python_parser::parse_expression(default)
                        .map(|parsed| template::is_atom(&parsed.into_expr()))
                        .unwrap_or(false);
                    bindings.bind(&param.name, BoundArg::new(default.clone(), atomic));
                }
                None => {
                    return Err(BindError::MissingArgument(name.clone(), param.name.clone()))
                }
            }
        }

        if let Some(param) = vararg_param {
            bindings.vararg = Some((param.name.clone(), overflow));
        }
        if let Some(param) = kwarg_param {
            bindings.kwarg = Some((param.name.clone(), kwarg_pairs));
        }

        Ok(bindings)
    }

    /// An argument expression captured as text, with nested edits folded
    /// in.  Atomicity is re-derived from the folded text so a rewritten
    /// argument still gets parenthesized where it must be.
    fn bound_arg(&self, expr: &Expr) -> BoundArg {
        let raw = self.module.text_at(expr.range());
        let text = self.text_with_edits(expr.range());
        let atomic = if text == raw {
            template::is_atom(expr)
        } else {
            ruff_python_parser::parse_expression(&text)
                .map(|parsed| template::is_atom(&parsed.into_expr()))
                .unwrap_or(false)
        };
        BoundArg::new(text, atomic)
    }

    /// Source text of a range with any already-recorded nested edits
    /// applied, offset-shifted to the range.
    fn text_with_edits(&self, range: TextRange) -> String {
        let inner: Vec<_> = self
            .edits
            .iter()
            .filter(|edit| range.contains_range(edit.range))
            .map(|edit| (edit.range, edit.new_text.clone()))
            .collect();
        if inner.is_empty() {
            return self.module.text_at(range).to_string();
        }

        let shifted = inner
            .into_iter()
            .map(|(r, text)| (r - range.start(), text))
            .collect();
        crate::source::apply_edits(self.module.text_at(range), shifted)
    }

    /// Attribute templates splice into arbitrary expression positions, so
    /// compound ones are parenthesized.
    fn attribute_text(info: &ReplaceInfo) -> String {
        if template::is_atom(&info.template) {
            info.template_source.clone()
        } else {
            format!("({})", info.template_source)
        }
    }

    fn record_edit(&mut self, range: TextRange, new_text: String, qualified_name: String) {
        // Edits nested inside this range are folded into the new text by
        // `text_with_edits`; drop them so they are not applied twice.
        self.edits.retain(|edit| !range.contains_range(edit.range));
        tracing::debug!(
            "rewriting '{}' -> '{}'",
            self.module.text_at(range),
            new_text
        );
        self.edits.push(Edit {
            range,
            new_text,
            qualified_name,
        });
    }

    fn skip(&mut self, range: TextRange, name: &str, reason: &str) {
        let (line, column) = self.module.line_col(range.start());
        tracing::warn!("{}:{}: {} not rewritten: {}", line, column, name, reason);
        self.skipped.push(SkippedSite {
            line,
            column,
            qualified_name: name.to_string(),
            reason: reason.to_string(),
        });
    }
}

fn is_marker_assignment(value: &Expr) -> bool {
    matches!(value, Expr::Call(call)
        if matches!(&*call.func, Expr::Name(n) if n.id.as_str() == crate::collect::MARKER_NAME))
}

/// Callee text of a plain constructor call, e.g. `C` from `x = C(...)`.
fn constructor_callee(value: &Expr) -> Option<String> {
    match value {
        Expr::Call(call) => dotted_path(&call.func).filter(|path| {
            path.rsplit('.')
                .next()
                .map(|last| last.chars().next().is_some_and(|c| c.is_uppercase()))
                .unwrap_or(false)
        }),
        _ => None,
    }
}

fn dotted_path(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Name(name) => Some(name.id.to_string()),
        Expr::Attribute(attr) => Some(format!("{}.{}", dotted_path(&attr.value)?, attr.attr)),
        _ => None,
    }
}

/// Names assigned anywhere in a scope body, without descending into nested
/// function or class scopes.
fn collect_scope_locals(body: &[Stmt], out: &mut HashSet<String>) {
    for stmt in body {
        match stmt {
            Stmt::Assign(assign) => {
                for target in &assign.targets {
                    collect_target_locals(target, out);
                }
            }
            Stmt::AnnAssign(ann) => collect_target_locals(&ann.target, out),
            Stmt::AugAssign(aug) => collect_target_locals(&aug.target, out),
            Stmt::FunctionDef(func) => {
                out.insert(func.name.to_string());
            }
            Stmt::ClassDef(class) => {
                out.insert(class.name.to_string());
            }
            Stmt::For(for_stmt) => {
                collect_target_locals(&for_stmt.target, out);
                collect_scope_locals(&for_stmt.body, out);
                collect_scope_locals(&for_stmt.orelse, out);
            }
            Stmt::While(while_stmt) => {
                collect_scope_locals(&while_stmt.body, out);
                collect_scope_locals(&while_stmt.orelse, out);
            }
            Stmt::If(if_stmt) => {
                collect_scope_locals(&if_stmt.body, out);
                for clause in &if_stmt.elif_else_clauses {
                    collect_scope_locals(&clause.body, out);
                }
            }
            Stmt::With(with_stmt) => {
                for item in &with_stmt.items {
                    if let Some(var) = &item.optional_vars {
                        collect_target_locals(var, out);
                    }
                }
                collect_scope_locals(&with_stmt.body, out);
            }
            Stmt::Try(try_stmt) => {
                collect_scope_locals(&try_stmt.body, out);
                for handler in &try_stmt.handlers {
                    let ast::ExceptHandler::ExceptHandler(h) = handler;
                    if let Some(name) = &h.name {
                        out.insert(name.to_string());
                    }
                    collect_scope_locals(&h.body, out);
                }
                collect_scope_locals(&try_stmt.orelse, out);
                collect_scope_locals(&try_stmt.finalbody, out);
            }
            Stmt::Import(import) => {
                for alias in &import.names {
                    let bound = alias
                        .asname
                        .as_ref()
                        .map(|a| a.to_string())
                        .unwrap_or_else(|| {
                            alias
                                .name
                                .split('.')
                                .next()
                                .unwrap_or(alias.name.as_str())
                                .to_string()
                        });
                    out.insert(bound);
                }
            }
            Stmt::ImportFrom(import) => {
                for alias in &import.names {
                    let bound = alias
                        .asname
                        .as_ref()
                        .map(|a| a.to_string())
                        .unwrap_or_else(|| alias.name.to_string());
                    out.insert(bound);
                }
            }
            Stmt::Global(global) => {
                for name in &global.names {
                    out.remove(name.as_str());
                }
            }
            Stmt::Nonlocal(nonlocal) => {
                for name in &nonlocal.names {
                    out.remove(name.as_str());
                }
            }
            _ => {}
        }
    }
}

fn collect_target_locals(target: &Expr, out: &mut HashSet<String>) {
    match target {
        Expr::Name(name) => {
            out.insert(name.id.to_string());
        }
        Expr::Tuple(tuple) => {
            for elt in &tuple.elts {
                collect_target_locals(elt, out);
            }
        }
        Expr::List(list) => {
            for elt in &list.elts {
                collect_target_locals(elt, out);
            }
        }
        Expr::Starred(starred) => collect_target_locals(&starred.value, out),
        _ => {}
    }
}

/// `var -> constructor callee` assignments in a scope body, flat.
fn collect_scope_types(body: &[Stmt], out: &mut HashMap<String, String>) {
    for stmt in body {
        match stmt {
            Stmt::Assign(assign) => {
                if let [Expr::Name(target)] = assign.targets.as_slice() {
                    if let Some(callee) = constructor_callee(&assign.value) {
                        out.insert(target.id.to_string(), callee);
                    }
                }
            }
            Stmt::AnnAssign(ann) => {
                if let (Expr::Name(target), Some(value)) = (ann.target.as_ref(), &ann.value) {
                    if let Some(callee) = constructor_callee(value) {
                        out.insert(target.id.to_string(), callee);
                    }
                }
            }
            Stmt::If(if_stmt) => {
                collect_scope_types(&if_stmt.body, out);
                for clause in &if_stmt.elif_else_clauses {
                    collect_scope_types(&clause.body, out);
                }
            }
            Stmt::With(with_stmt) => collect_scope_types(&with_stmt.body, out),
            Stmt::For(for_stmt) => collect_scope_types(&for_stmt.body, out),
            Stmt::While(while_stmt) => collect_scope_types(&while_stmt.body, out),
            Stmt::Try(try_stmt) => {
                collect_scope_types(&try_stmt.body, out);
                collect_scope_types(&try_stmt.orelse, out);
                collect_scope_types(&try_stmt.finalbody, out);
            }
            _ => {}
        }
    }
}
