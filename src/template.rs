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

//! Template rendering and hygienic argument substitution.
//!
//! A replacement template is an expression tree whose free identifiers are
//! parameter names.  Rendering walks the tree and prints it back to source
//! text, substituting each free parameter reference with the argument text
//! captured at the call site.  Binders inside the template (lambdas,
//! comprehension targets) shield their bodies from substitution of the
//! names they rebind, so an argument can never be captured by a template
//! scope.

use ruff_python_ast::{BoolOp, CmpOp, Comprehension, ConversionFlag, Expr, Operator, UnaryOp};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("unsupported expression: {0}")]
    Unsupported(&'static str),
}

/// The argument text bound to one parameter.
#[derive(Debug, Clone)]
pub struct BoundArg {
    pub text: String,
    /// Whether the expression needs no parentheses in operand position.
    pub atomic: bool,
}

impl BoundArg {
    pub fn new(text: impl Into<String>, atomic: bool) -> Self {
        Self {
            text: text.into(),
            atomic,
        }
    }
}

/// Bound arguments for one call site.
#[derive(Debug, Clone, Default)]
pub struct Bindings {
    pub by_name: HashMap<String, BoundArg>,
    /// Vararg parameter name and the overflow argument texts.
    pub vararg: Option<(String, Vec<String>)>,
    /// Kwarg parameter name and `key=value` / `**expr` texts.
    pub kwarg: Option<(String, Vec<String>)>,
}

impl Bindings {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, name: &str, arg: BoundArg) {
        self.by_name.insert(name.to_string(), arg);
    }
}

/// Print an expression with no substitutions.  Used for the canonical
/// template serialization; the result parses back to an identical print.
pub fn print_expr(expr: &Expr) -> Result<String, RenderError> {
    Renderer {
        bindings: &Bindings::empty(),
        shadowed: Vec::new(),
    }
    .render(expr, Pos::Free)
}

/// Render a template with arguments substituted for its free parameters.
pub fn render_template(expr: &Expr, bindings: &Bindings) -> Result<String, RenderError> {
    Renderer {
        bindings,
        shadowed: Vec::new(),
    }
    .render(expr, Pos::Free)
}

/// Whether an expression stands on its own in operand position.
pub fn is_atom(expr: &Expr) -> bool {
    matches!(
        expr,
        Expr::Name(_)
            | Expr::Attribute(_)
            | Expr::Call(_)
            | Expr::Subscript(_)
            | Expr::StringLiteral(_)
            | Expr::BytesLiteral(_)
            | Expr::FString(_)
            | Expr::NumberLiteral(_)
            | Expr::BooleanLiteral(_)
            | Expr::NoneLiteral(_)
            | Expr::EllipsisLiteral(_)
            | Expr::List(_)
            | Expr::Tuple(_)
            | Expr::Dict(_)
            | Expr::Set(_)
            | Expr::ListComp(_)
            | Expr::SetComp(_)
            | Expr::DictComp(_)
            | Expr::Generator(_)
    )
}

/// Count free (unshadowed) uses of `name` in a template.
pub fn free_uses(expr: &Expr, name: &str) -> usize {
    let mut counter = NameCounter {
        name,
        shadowed: Vec::new(),
        count: 0,
    };
    counter.walk(expr);
    counter.count
}

/// Whether the template contains a call of `name` with the given arity.
pub fn calls_name_with_arity(expr: &Expr, name: &str, arity: usize) -> bool {
    if let Expr::Call(call) = expr {
        if let Expr::Name(func) = &*call.func {
            if func.id.as_str() == name
                && call.arguments.args.len() + call.arguments.keywords.len() == arity
            {
                return true;
            }
        }
    }
    children(expr)
        .iter()
        .any(|child| calls_name_with_arity(child, name, arity))
}

/// Whether the expression contains any call (side-effect heuristic).
pub fn contains_call(expr: &Expr) -> bool {
    if matches!(expr, Expr::Call(_)) {
        return true;
    }
    children(expr).iter().any(|child| contains_call(child))
}

pub(crate) fn children(expr: &Expr) -> Vec<&Expr> {
    let mut out = Vec::new();
    collect_children(expr, &mut out);
    out
}

fn collect_children<'a>(expr: &'a Expr, out: &mut Vec<&'a Expr>) {
    match expr {
        Expr::BoolOp(e) => out.extend(e.values.iter()),
        Expr::Named(e) => out.extend([&*e.target, &*e.value]),
        Expr::BinOp(e) => out.extend([&*e.left, &*e.right]),
        Expr::UnaryOp(e) => out.push(&e.operand),
        Expr::Lambda(e) => out.push(&e.body),
        Expr::If(e) => out.extend([&*e.test, &*e.body, &*e.orelse]),
        Expr::Dict(e) => {
            for item in &e.items {
                if let Some(key) = &item.key {
                    out.push(key);
                }
                out.push(&item.value);
            }
        }
        Expr::Set(e) => out.extend(e.elts.iter()),
        Expr::ListComp(e) => {
            out.push(&e.elt);
            extend_generators(&e.generators, out);
        }
        Expr::SetComp(e) => {
            out.push(&e.elt);
            extend_generators(&e.generators, out);
        }
        Expr::DictComp(e) => {
            out.extend(e.key.as_deref());
            out.push(&e.value);
            extend_generators(&e.generators, out);
        }
        Expr::Generator(e) => {
            out.push(&e.elt);
            extend_generators(&e.generators, out);
        }
        Expr::Await(e) => out.push(&e.value),
        Expr::Yield(e) => {
            if let Some(value) = &e.value {
                out.push(value);
            }
        }
        Expr::YieldFrom(e) => out.push(&e.value),
        Expr::Compare(e) => {
            out.push(&e.left);
            out.extend(e.comparators.iter());
        }
        Expr::Call(e) => {
            out.push(&e.func);
            out.extend(e.arguments.args.iter());
            out.extend(e.arguments.keywords.iter().map(|k| &k.value));
        }
        Expr::FString(e) => {
            for element in e.value.elements() {
                if let ruff_python_ast::InterpolatedStringElement::Interpolation(part) = element {
                    out.push(&part.expression);
                }
            }
        }
        Expr::Attribute(e) => out.push(&e.value),
        Expr::Subscript(e) => out.extend([&*e.value, &*e.slice]),
        Expr::Starred(e) => out.push(&e.value),
        Expr::Slice(e) => {
            out.extend(e.lower.as_deref());
            out.extend(e.upper.as_deref());
            out.extend(e.step.as_deref());
        }
        Expr::List(e) => out.extend(e.elts.iter()),
        Expr::Tuple(e) => out.extend(e.elts.iter()),
        _ => {}
    }
}

fn extend_generators<'a>(generators: &'a [Comprehension], out: &mut Vec<&'a Expr>) {
    for gen in generators {
        out.push(&gen.target);
        out.push(&gen.iter);
        out.extend(gen.ifs.iter());
    }
}

struct NameCounter<'a> {
    name: &'a str,
    shadowed: Vec<String>,
    count: usize,
}

impl NameCounter<'_> {
    fn walk(&mut self, expr: &Expr) {
        match expr {
            Expr::Name(name) => {
                if name.id.as_str() == self.name && !self.shadowed.iter().any(|s| s == self.name) {
                    self.count += 1;
                }
            }
            Expr::Lambda(lambda) => {
                let added = push_lambda_params(lambda, &mut self.shadowed);
                self.walk(&lambda.body);
                self.shadowed.truncate(self.shadowed.len() - added);
            }
            Expr::ListComp(_) | Expr::SetComp(_) | Expr::DictComp(_) | Expr::Generator(_) => {
                // Comprehension targets rebind; approximate by shielding the
                // whole comprehension the same way rendering does.
                let before = self.shadowed.len();
                let (elts, generators): (Vec<&Expr>, &[Comprehension]) = match expr {
                    Expr::ListComp(e) => (vec![&*e.elt], &e.generators),
                    Expr::SetComp(e) => (vec![&*e.elt], &e.generators),
                    Expr::DictComp(e) => {
                        let mut elts: Vec<&Expr> = e.key.as_deref().into_iter().collect();
                        elts.push(&e.value);
                        (elts, &e.generators)
                    }
                    Expr::Generator(e) => (vec![&*e.elt], &e.generators),
                    _ => unreachable!(),
                };
                for gen in generators {
                    self.walk(&gen.iter);
                    collect_target_names(&gen.target, &mut self.shadowed);
                    for cond in &gen.ifs {
                        self.walk(cond);
                    }
                }
                for elt in elts {
                    self.walk(elt);
                }
                self.shadowed.truncate(before);
            }
            _ => {
                for child in children(expr) {
                    self.walk(child);
                }
            }
        }
    }
}

fn push_lambda_params(lambda: &ruff_python_ast::ExprLambda, shadowed: &mut Vec<String>) -> usize {
    let mut added = 0;
    if let Some(params) = &lambda.parameters {
        for p in params.posonlyargs.iter().chain(params.args.iter()) {
            shadowed.push(p.parameter.name.to_string());
            added += 1;
        }
        for p in &params.kwonlyargs {
            shadowed.push(p.parameter.name.to_string());
            added += 1;
        }
        if let Some(vararg) = &params.vararg {
            shadowed.push(vararg.name.to_string());
            added += 1;
        }
        if let Some(kwarg) = &params.kwarg {
            shadowed.push(kwarg.name.to_string());
            added += 1;
        }
    }
    added
}

fn collect_target_names(target: &Expr, out: &mut Vec<String>) {
    match target {
        Expr::Name(name) => out.push(name.id.to_string()),
        Expr::Tuple(tuple) => {
            for elt in &tuple.elts {
                collect_target_names(elt, out);
            }
        }
        Expr::List(list) => {
            for elt in &list.elts {
                collect_target_names(elt, out);
            }
        }
        Expr::Starred(starred) => collect_target_names(&starred.value, out),
        _ => {}
    }
}

/// Where the rendered fragment lands, for parenthesization of substituted
/// compound arguments.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Pos {
    /// Standalone or comma-delimited position; no parentheses needed.
    Free,
    /// Operand of an operator, attribute base, or similar tight position.
    Operand,
}

struct Renderer<'a> {
    bindings: &'a Bindings,
    shadowed: Vec<String>,
}

impl Renderer<'_> {
    fn render(&mut self, expr: &Expr, pos: Pos) -> Result<String, RenderError> {
        Ok(match expr {
            Expr::Name(name) => {
                let id = name.id.as_str();
                if self.shadowed.iter().any(|s| s == id) {
                    id.to_string()
                } else if let Some(bound) = self.bindings.by_name.get(id) {
                    if pos == Pos::Operand && !bound.atomic {
                        format!("({})", bound.text)
                    } else {
                        bound.text.clone()
                    }
                } else {
                    id.to_string()
                }
            }

            Expr::Attribute(attr) => {
                format!("{}.{}", self.render(&attr.value, Pos::Operand)?, attr.attr)
            }

            Expr::Call(call) => {
                let func = self.render(&call.func, Pos::Operand)?;
                let mut args = Vec::new();

                for arg in call.arguments.args.iter() {
                    // A `*params` in the template expands to the overflow
                    // arguments captured at the call site.
                    if let Expr::Starred(starred) = arg {
                        if let Expr::Name(name) = &*starred.value {
                            if let Some((vararg_name, items)) = &self.bindings.vararg {
                                if name.id.as_str() == vararg_name
                                    && !self.shadowed.iter().any(|s| s == vararg_name)
                                {
                                    args.extend(items.iter().cloned());
                                    continue;
                                }
                            }
                        }
                    }
                    args.push(self.render(arg, Pos::Free)?);
                }

                for keyword in call.arguments.keywords.iter() {
                    match &keyword.arg {
                        Some(name) => {
                            args.push(format!("{}={}", name, self.render(&keyword.value, Pos::Free)?))
                        }
                        None => {
                            // `**params` expands to the captured keyword pairs.
                            if let Expr::Name(name) = &keyword.value {
                                if let Some((kwarg_name, items)) = &self.bindings.kwarg {
                                    if name.id.as_str() == kwarg_name
                                        && !self.shadowed.iter().any(|s| s == kwarg_name)
                                    {
                                        args.extend(items.iter().cloned());
                                        continue;
                                    }
                                }
                            }
                            args.push(format!("**{}", self.render(&keyword.value, Pos::Operand)?));
                        }
                    }
                }

                format!("{}({})", func, args.join(", "))
            }

            Expr::StringLiteral(s) => {
                let mut escaped = String::with_capacity(s.value.to_str().len() + 2);
                escaped.push('"');
                for c in s.value.to_str().chars() {
                    match c {
                        '"' => escaped.push_str("\\\""),
                        '\\' => escaped.push_str("\\\\"),
                        '\n' => escaped.push_str("\\n"),
                        '\r' => escaped.push_str("\\r"),
                        '\t' => escaped.push_str("\\t"),
                        c if c.is_control() => {
                            escaped.push_str(&format!("\\u{{{:04x}}}", c as u32))
                        }
                        c => escaped.push(c),
                    }
                }
                escaped.push('"');
                escaped
            }

            Expr::BytesLiteral(b) => {
                let mut out = String::from("b\"");
                for byte in b.value.bytes() {
                    match byte {
                        b'\\' => out.push_str("\\\\"),
                        b'"' => out.push_str("\\\""),
                        b'\n' => out.push_str("\\n"),
                        b'\r' => out.push_str("\\r"),
                        b'\t' => out.push_str("\\t"),
                        0x20..=0x7E => out.push(byte as char),
                        _ => out.push_str(&format!("\\x{:02x}", byte)),
                    }
                }
                out.push('"');
                out
            }

            Expr::FString(fstring) => {
                let mut out = String::from("f\"");
                for element in fstring.value.elements() {
                    match element {
                        ruff_python_ast::InterpolatedStringElement::Literal(lit) => {
                            for c in lit.value.chars() {
                                match c {
                                    '"' => out.push_str("\\\""),
                                    '\\' => out.push_str("\\\\"),
                                    '{' => out.push_str("{{"),
                                    '}' => out.push_str("}}"),
                                    c => out.push(c),
                                }
                            }
                        }
                        ruff_python_ast::InterpolatedStringElement::Interpolation(part) => {
                            out.push('{');
                            out.push_str(&self.render(&part.expression, Pos::Free)?);
                            match part.conversion {
                                ConversionFlag::Str => out.push_str("!s"),
                                ConversionFlag::Repr => out.push_str("!r"),
                                ConversionFlag::Ascii => out.push_str("!a"),
                                ConversionFlag::None => {}
                            }
                            if let Some(spec) = &part.format_spec {
                                out.push(':');
                                for spec_element in &spec.elements {
                                    match spec_element {
                                        ruff_python_ast::InterpolatedStringElement::Literal(lit) => {
                                            out.push_str(&lit.value)
                                        }
                                        ruff_python_ast::InterpolatedStringElement::Interpolation(e) => {
                                            out.push('{');
                                            out.push_str(
                                                &self.render(&e.expression, Pos::Free)?,
                                            );
                                            out.push('}');
                                        }
                                    }
                                }
                            }
                            out.push('}');
                        }
                    }
                }
                out.push('"');
                out
            }

            Expr::NumberLiteral(n) => match &n.value {
                ruff_python_ast::Number::Int(i) => i.to_string(),
                ruff_python_ast::Number::Float(f) => {
                    let text = f.to_string();
                    // Keep floats recognizable as floats.
                    if text.contains('.') || text.contains('e') || text.contains("inf") {
                        text
                    } else {
                        format!("{}.0", text)
                    }
                }
                ruff_python_ast::Number::Complex { real, imag } => {
                    format!("{}+{}j", real, imag)
                }
            },

            Expr::BooleanLiteral(b) => if b.value { "True" } else { "False" }.to_string(),
            Expr::NoneLiteral(_) => "None".to_string(),
            Expr::EllipsisLiteral(_) => "...".to_string(),

            Expr::List(list) => {
                let elements = self.render_all(&list.elts)?;
                format!("[{}]", elements.join(", "))
            }

            Expr::Tuple(tuple) => {
                let elements = self.render_all(&tuple.elts)?;
                if elements.len() == 1 {
                    format!("({},)", elements[0])
                } else {
                    format!("({})", elements.join(", "))
                }
            }

            Expr::Set(set) => {
                let elements = self.render_all(&set.elts)?;
                format!("{{{}}}", elements.join(", "))
            }

            Expr::Dict(dict) => {
                let mut items = Vec::new();
                for item in &dict.items {
                    match &item.key {
                        Some(key) => items.push(format!(
                            "{}: {}",
                            self.render(key, Pos::Free)?,
                            self.render(&item.value, Pos::Free)?
                        )),
                        None => {
                            items.push(format!("**{}", self.render(&item.value, Pos::Operand)?))
                        }
                    }
                }
                format!("{{{}}}", items.join(", "))
            }

            Expr::BinOp(binop) => {
                let rendered = format!(
                    "{} {} {}",
                    self.render(&binop.left, Pos::Operand)?,
                    operator_str(binop.op),
                    self.render(&binop.right, Pos::Operand)?
                );
                self.maybe_paren(rendered, pos)
            }

            Expr::UnaryOp(unary) => {
                let op = match unary.op {
                    UnaryOp::Invert => "~",
                    UnaryOp::Not => "not ",
                    UnaryOp::UAdd => "+",
                    UnaryOp::USub => "-",
                };
                let rendered = format!("{}{}", op, self.render(&unary.operand, Pos::Operand)?);
                self.maybe_paren(rendered, pos)
            }

            Expr::Compare(cmp) => {
                let mut rendered = self.render(&cmp.left, Pos::Operand)?;
                for (op, comparator) in cmp.ops.iter().zip(cmp.comparators.iter()) {
                    rendered.push_str(&format!(
                        " {} {}",
                        cmp_op_str(*op),
                        self.render(comparator, Pos::Operand)?
                    ));
                }
                self.maybe_paren(rendered, pos)
            }

            Expr::BoolOp(boolop) => {
                let joiner = match boolop.op {
                    BoolOp::And => " and ",
                    BoolOp::Or => " or ",
                };
                let values = boolop
                    .values
                    .iter()
                    .map(|v| self.render(v, Pos::Operand))
                    .collect::<Result<Vec<_>, _>>()?;
                self.maybe_paren(values.join(joiner), pos)
            }

            Expr::If(ifexp) => {
                let rendered = format!(
                    "{} if {} else {}",
                    self.render(&ifexp.body, Pos::Operand)?,
                    self.render(&ifexp.test, Pos::Operand)?,
                    self.render(&ifexp.orelse, Pos::Operand)?
                );
                self.maybe_paren(rendered, pos)
            }

            Expr::Lambda(lambda) => {
                let added = push_lambda_params(lambda, &mut self.shadowed);
                let body = self.render(&lambda.body, Pos::Free)?;
                self.shadowed.truncate(self.shadowed.len() - added);

                let params = lambda
                    .parameters
                    .as_ref()
                    .map(|p| self.render_lambda_params(p))
                    .transpose()?
                    .unwrap_or_default();
                let rendered = if params.is_empty() {
                    format!("lambda: {}", body)
                } else {
                    format!("lambda {}: {}", params, body)
                };
                self.maybe_paren(rendered, pos)
            }

            Expr::ListComp(comp) => {
                let (elts, gens) = self.render_comprehension(&[&*comp.elt], &comp.generators)?;
                format!("[{} {}]", elts[0], gens)
            }

            Expr::SetComp(comp) => {
                let (elts, gens) = self.render_comprehension(&[&*comp.elt], &comp.generators)?;
                format!("{{{} {}}}", elts[0], gens)
            }

            Expr::DictComp(comp) => {
                let key = comp.key.as_deref().expect("dict comprehension key");
                let (elts, gens) =
                    self.render_comprehension(&[key, &*comp.value], &comp.generators)?;
                format!("{{{}: {} {}}}", elts[0], elts[1], gens)
            }

            Expr::Generator(comp) => {
                let (elts, gens) = self.render_comprehension(&[&*comp.elt], &comp.generators)?;
                format!("({} {})", elts[0], gens)
            }

            Expr::Subscript(sub) => {
                format!(
                    "{}[{}]",
                    self.render(&sub.value, Pos::Operand)?,
                    self.render(&sub.slice, Pos::Free)?
                )
            }

            Expr::Slice(slice) => {
                let lower = slice
                    .lower
                    .as_deref()
                    .map(|e| self.render(e, Pos::Operand))
                    .transpose()?
                    .unwrap_or_default();
                let upper = slice
                    .upper
                    .as_deref()
                    .map(|e| self.render(e, Pos::Operand))
                    .transpose()?
                    .unwrap_or_default();
                let step = slice
                    .step
                    .as_deref()
                    .map(|e| self.render(e, Pos::Operand))
                    .transpose()?
                    .map(|s| format!(":{}", s))
                    .unwrap_or_default();
                format!("{}:{}{}", lower, upper, step)
            }

            Expr::Starred(starred) => {
                format!("*{}", self.render(&starred.value, Pos::Operand)?)
            }

            Expr::Await(await_expr) => {
                let rendered = format!("await {}", self.render(&await_expr.value, Pos::Operand)?);
                self.maybe_paren(rendered, pos)
            }

            Expr::Named(named) => {
                let rendered = format!(
                    "{} := {}",
                    self.render(&named.target, Pos::Operand)?,
                    self.render(&named.value, Pos::Operand)?
                );
                self.maybe_paren(rendered, pos)
            }

            Expr::Yield(yield_expr) => match &yield_expr.value {
                Some(value) => format!("yield {}", self.render(value, Pos::Operand)?),
                None => "yield".to_string(),
            },

            Expr::YieldFrom(yield_from) => {
                format!("yield from {}", self.render(&yield_from.value, Pos::Operand)?)
            }

            _ => return Err(RenderError::Unsupported("expression kind")),
        })
    }

    fn render_all(&mut self, exprs: &[Expr]) -> Result<Vec<String>, RenderError> {
        exprs.iter().map(|e| self.render(e, Pos::Free)).collect()
    }

    fn maybe_paren(&self, rendered: String, pos: Pos) -> String {
        if pos == Pos::Operand {
            format!("({})", rendered)
        } else {
            rendered
        }
    }

    fn render_lambda_params(
        &mut self,
        params: &ruff_python_ast::Parameters,
    ) -> Result<String, RenderError> {
        let mut parts = Vec::new();
        for p in params.posonlyargs.iter().chain(params.args.iter()) {
            match &p.default {
                Some(default) => parts.push(format!(
                    "{}={}",
                    p.parameter.name,
                    self.render(default, Pos::Free)?
                )),
                None => parts.push(p.parameter.name.to_string()),
            }
        }
        if let Some(vararg) = &params.vararg {
            parts.push(format!("*{}", vararg.name));
        }
        for p in &params.kwonlyargs {
            match &p.default {
                Some(default) => parts.push(format!(
                    "{}={}",
                    p.parameter.name,
                    self.render(default, Pos::Free)?
                )),
                None => parts.push(p.parameter.name.to_string()),
            }
        }
        if let Some(kwarg) = &params.kwarg {
            parts.push(format!("**{}", kwarg.name));
        }
        Ok(parts.join(", "))
    }

    /// Render comprehension heads and generators with the targets shadowed
    /// for exactly the parts that can see them.  The iterable of each
    /// generator is rendered before its own targets come into scope.
    fn render_comprehension(
        &mut self,
        heads: &[&Expr],
        generators: &[Comprehension],
    ) -> Result<(Vec<String>, String), RenderError> {
        let before = self.shadowed.len();
        let mut parts = Vec::new();

        for gen in generators {
            let iter = self.render(&gen.iter, Pos::Operand)?;
            let target = self.render_target(&gen.target)?;
            collect_target_names(&gen.target, &mut self.shadowed);
            let mut clause = format!(
                "{}for {} in {}",
                if gen.is_async { "async " } else { "" },
                target,
                iter
            );
            for cond in &gen.ifs {
                clause.push_str(&format!(" if {}", self.render(cond, Pos::Operand)?));
            }
            parts.push(clause);
        }

        let head_texts = heads
            .iter()
            .map(|head| self.render(head, Pos::Free))
            .collect::<Result<Vec<_>, _>>()?;

        self.shadowed.truncate(before);
        Ok((head_texts, parts.join(" ")))
    }

    /// Comprehension targets print as plain (possibly destructuring) names
    /// and are never substitution points.
    fn render_target(&mut self, target: &Expr) -> Result<String, RenderError> {
        match target {
            Expr::Name(name) => Ok(name.id.to_string()),
            Expr::Tuple(tuple) => {
                let parts = tuple
                    .elts
                    .iter()
                    .map(|e| self.render_target(e))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(parts.join(", "))
            }
            Expr::Starred(starred) => Ok(format!("*{}", self.render_target(&starred.value)?)),
            _ => Err(RenderError::Unsupported("comprehension target")),
        }
    }
}

fn operator_str(op: Operator) -> &'static str {
    match op {
        Operator::Add => "+",
        Operator::Sub => "-",
        Operator::Mult => "*",
        Operator::Div => "/",
        Operator::Mod => "%",
        Operator::Pow => "**",
        Operator::LShift => "<<",
        Operator::RShift => ">>",
        Operator::BitOr => "|",
        Operator::BitXor => "^",
        Operator::BitAnd => "&",
        Operator::FloorDiv => "//",
        Operator::MatMult => "@",
    }
}

fn cmp_op_str(op: CmpOp) -> &'static str {
    match op {
        CmpOp::Eq => "==",
        CmpOp::NotEq => "!=",
        CmpOp::Lt => "<",
        CmpOp::LtE => "<=",
        CmpOp::Gt => ">",
        CmpOp::GtE => ">=",
        CmpOp::Is => "is",
        CmpOp::IsNot => "is not",
        CmpOp::In => "in",
        CmpOp::NotIn => "not in",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ruff_python_parser::parse_expression;

    fn parse(text: &str) -> Expr {
        parse_expression(text).unwrap().into_expr()
    }

    fn subst(template: &str, pairs: &[(&str, &str, bool)]) -> String {
        let expr = parse(template);
        let mut bindings = Bindings::empty();
        for (name, text, atomic) in pairs {
            bindings.bind(name, BoundArg::new(*text, *atomic));
        }
        render_template(&expr, &bindings).unwrap()
    }

    #[test]
    fn print_round_trip() {
        for text in [
            "new_func(x * 2, y + 1)",
            "obj.attr.method(a, b=1, *rest, **extra)",
            "[x for x in items if x > 0]",
            "{k: v for k, v in pairs}",
            "lambda x, y=1: x + y",
            "a if b else c",
            "f\"value: {x!r:>10}\"",
            "await fetch(url, timeout=30)",
            "x[1:2:3]",
            "not (a and b)",
        ] {
            let printed = print_expr(&parse(text)).unwrap();
            let reprinted = print_expr(&parse(&printed)).unwrap();
            assert_eq!(printed, reprinted, "not a fixed point: {}", text);
        }
    }

    #[test]
    fn simple_substitution() {
        assert_eq!(subst("x + 1", &[("x", "3", true)]), "3 + 1");
        assert_eq!(
            subst("new_func(a, b)", &[("a", "1", true), ("b", "2", true)]),
            "new_func(1, 2)"
        );
    }

    #[test]
    fn compound_arguments_get_parenthesized_in_operand_position() {
        assert_eq!(subst("x * 2", &[("x", "a + b", false)]), "(a + b) * 2");
        // Argument position stays bare.
        assert_eq!(subst("f(x)", &[("x", "a + b", false)]), "f(a + b)");
    }

    #[test]
    fn lambda_shields_rebound_names() {
        assert_eq!(
            subst("lambda x: f(x)", &[("x", "E", true)]),
            "lambda x: f(x)"
        );
        // A different free name is still substituted inside the lambda.
        assert_eq!(
            subst("lambda x: f(x, y)", &[("y", "10", true)]),
            "lambda x: f(x, 10)"
        );
    }

    #[test]
    fn comprehension_shields_targets_but_not_iterable() {
        assert_eq!(
            subst("[x for x in xs]", &[("x", "E", true), ("xs", "data", true)]),
            "[x for x in data]"
        );
    }

    #[test]
    fn vararg_and_kwarg_expansion() {
        let expr = parse("new_func(a, *args, **kwargs)");
        let mut bindings = Bindings::empty();
        bindings.bind("a", BoundArg::new("1", true));
        bindings.vararg = Some(("args".to_string(), vec!["2".to_string(), "3".to_string()]));
        bindings.kwarg = Some(("kwargs".to_string(), vec!["x=4".to_string()]));
        assert_eq!(
            render_template(&expr, &bindings).unwrap(),
            "new_func(1, 2, 3, x=4)"
        );

        // Empty expansions disappear.
        let mut empty = Bindings::empty();
        empty.bind("a", BoundArg::new("1", true));
        empty.vararg = Some(("args".to_string(), vec![]));
        empty.kwarg = Some(("kwargs".to_string(), vec![]));
        assert_eq!(render_template(&expr, &empty).unwrap(), "new_func(1)");
    }

    #[test]
    fn counts_free_uses_through_binders() {
        let expr = parse("f(self) + self.g(lambda self: self.x)");
        assert_eq!(free_uses(&expr, "self"), 2);
    }

    #[test]
    fn detects_recursive_calls() {
        assert!(calls_name_with_arity(&parse("old(n - 1)"), "old", 1));
        assert!(!calls_name_with_arity(&parse("other(n - 1)"), "old", 1));
        assert!(!calls_name_with_arity(&parse("old(n, m)"), "old", 1));
    }
}
