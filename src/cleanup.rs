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

//! Removal of deprecated definitions once their window closes.

use ruff_python_ast::{Decorator, Expr, Mod, Stmt};
use ruff_text_size::{Ranged, TextRange};

use crate::collect::{has_marker, MARKER_NAME};
use crate::source::{ParseError, SourceModule};
use crate::version::Version;

/// Which marked definitions cleanup removes.
#[derive(Debug, Clone, Default)]
pub struct CleanupPolicy {
    /// Remove every marked definition.
    pub all: bool,
    /// Remove definitions whose `since` predates this version.
    pub before: Option<Version>,
    /// Remove definitions whose `remove_in` is at or before this version.
    pub current_version: Option<Version>,
}

impl CleanupPolicy {
    pub fn remove_all() -> Self {
        Self {
            all: true,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.all && self.before.is_none() && self.current_version.is_none()
    }

    fn matches(&self, since: Option<&str>, remove_in: Option<&str>) -> bool {
        if self.all {
            return true;
        }
        if let (Some(boundary), Some(since)) = (&self.before, since) {
            if Version::parse(since) < *boundary {
                return true;
            }
        }
        if let (Some(current), Some(remove_in)) = (&self.current_version, remove_in) {
            if Version::parse(remove_in) <= *current {
                return true;
            }
        }
        false
    }
}

/// Delete definitions matching the policy.  Returns the number of removed
/// definitions and the resulting source.
pub fn strip_deprecated(
    source: &str,
    policy: &CleanupPolicy,
) -> Result<(usize, String), ParseError> {
    if policy.is_empty() {
        return Ok((0, source.to_string()));
    }

    let module = SourceModule::parse(source)?;
    let mut ranges: Vec<TextRange> = Vec::new();

    if let Mod::Module(body) = module.ast() {
        collect_removals(&body.body, policy, &mut ranges);
    }

    if ranges.is_empty() {
        return Ok((0, source.to_string()));
    }

    let count = ranges.len();
    ranges.sort_by_key(|range| std::cmp::Reverse(range.start()));

    let mut result = source.to_string();
    for range in ranges {
        let start = range.start().to_usize();
        let end = range.end().to_usize();

        // Remove whole lines so surrounding layout stays intact.
        let line_start = source[..start].rfind('\n').map(|i| i + 1).unwrap_or(0);
        let line_end = source[end..]
            .find('\n')
            .map(|i| end + i + 1)
            .unwrap_or(source.len());
        result.replace_range(line_start..line_end, "");
    }

    Ok((count, result))
}

fn collect_removals(body: &[Stmt], policy: &CleanupPolicy, out: &mut Vec<TextRange>) {
    for stmt in body {
        match stmt {
            Stmt::FunctionDef(func) => {
                if has_marker(&func.decorator_list)
                    && policy_matches_decorators(policy, &func.decorator_list)
                {
                    out.push(definition_range(stmt.range(), &func.decorator_list));
                }
            }
            Stmt::ClassDef(class) => {
                if has_marker(&class.decorator_list) {
                    if policy_matches_decorators(policy, &class.decorator_list) {
                        out.push(definition_range(stmt.range(), &class.decorator_list));
                    }
                    continue;
                }
                collect_removals(&class.body, policy, out);
            }
            Stmt::Assign(assign) => {
                if let Some((since, remove_in)) = assignment_marker_versions(&assign.value) {
                    if policy.matches(since.as_deref(), remove_in.as_deref()) {
                        out.push(stmt.range());
                    }
                }
            }
            Stmt::AnnAssign(ann) => {
                if let Some(value) = &ann.value {
                    if let Some((since, remove_in)) = assignment_marker_versions(value) {
                        if policy.matches(since.as_deref(), remove_in.as_deref()) {
                            out.push(stmt.range());
                        }
                    }
                }
            }
            _ => {}
        }
    }
}

/// Statement range widened to cover decorators, whichever way the parser
/// anchored the definition.
fn definition_range(stmt_range: TextRange, decorators: &[Decorator]) -> TextRange {
    let start = decorators
        .iter()
        .map(|d| d.range().start())
        .min()
        .map(|dec_start| dec_start.min(stmt_range.start()))
        .unwrap_or_else(|| stmt_range.start());
    TextRange::new(start, stmt_range.end())
}

fn policy_matches_decorators(policy: &CleanupPolicy, decorators: &[Decorator]) -> bool {
    let (since, remove_in) = decorator_versions(decorators);
    policy.matches(since.as_deref(), remove_in.as_deref())
}

fn decorator_versions(decorators: &[Decorator]) -> (Option<String>, Option<String>) {
    for decorator in decorators {
        if let Expr::Call(call) = &decorator.expression {
            let is_marker = match &*call.func {
                Expr::Name(name) => name.id.as_str() == MARKER_NAME,
                Expr::Attribute(attr) => attr.attr.as_str() == MARKER_NAME,
                _ => false,
            };
            if is_marker {
                return keyword_versions(&call.arguments.keywords);
            }
        }
    }
    (None, None)
}

fn assignment_marker_versions(value: &Expr) -> Option<(Option<String>, Option<String>)> {
    match value {
        Expr::Call(call) if matches!(&*call.func, Expr::Name(n) if n.id.as_str() == MARKER_NAME) => {
            Some(keyword_versions(&call.arguments.keywords))
        }
        _ => None,
    }
}

fn keyword_versions(
    keywords: &[ruff_python_ast::Keyword],
) -> (Option<String>, Option<String>) {
    let mut since = None;
    let mut remove_in = None;
    for keyword in keywords {
        let name = match &keyword.arg {
            Some(name) => name.as_str(),
            None => continue,
        };
        let value = match &keyword.value {
            Expr::StringLiteral(s) => Some(s.value.to_str().to_string()),
            _ => None,
        };
        match name {
            "since" => since = value,
            "remove_in" => remove_in = value,
            _ => {}
        }
    }
    (since, remove_in)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = r#"from sundown import replace_me

@replace_me(since="1.0.0", remove_in="2.0.0")
def old():
    return new()

def regular():
    return 42

@replace_me(since="3.0.0")
def recent():
    return newer()
"#;

    #[test]
    fn remove_all_takes_everything_marked() {
        let (count, result) = strip_deprecated(SOURCE, &CleanupPolicy::remove_all()).unwrap();
        assert_eq!(count, 2);
        assert!(!result.contains("def old"));
        assert!(!result.contains("def recent"));
        assert!(result.contains("def regular"));
    }

    #[test]
    fn current_version_gates_on_remove_in() {
        let reached = CleanupPolicy {
            current_version: Some(Version::parse("2.0.0")),
            ..Default::default()
        };
        let (count, result) = strip_deprecated(SOURCE, &reached).unwrap();
        assert_eq!(count, 1);
        assert!(!result.contains("def old"));
        assert!(result.contains("def recent"));

        let early = CleanupPolicy {
            current_version: Some(Version::parse("1.9.0")),
            ..Default::default()
        };
        let (count, result) = strip_deprecated(SOURCE, &early).unwrap();
        assert_eq!(count, 0);
        assert!(result.contains("def old"));
    }

    #[test]
    fn before_gates_on_since() {
        let policy = CleanupPolicy {
            before: Some(Version::parse("2.5.0")),
            ..Default::default()
        };
        let (count, result) = strip_deprecated(SOURCE, &policy).unwrap();
        assert_eq!(count, 1);
        assert!(!result.contains("def old"));
        assert!(result.contains("def recent"));
    }

    #[test]
    fn empty_policy_is_identity() {
        let (count, result) = strip_deprecated(SOURCE, &CleanupPolicy::default()).unwrap();
        assert_eq!(count, 0);
        assert_eq!(result, SOURCE);
    }

    #[test]
    fn attribute_markers_are_removed() {
        let source = "A = 1\nOLD = replace_me(\"v\")\nB = 2\n";
        let (count, result) = strip_deprecated(source, &CleanupPolicy::remove_all()).unwrap();
        assert_eq!(count, 1);
        assert_eq!(result, "A = 1\nB = 2\n");
    }

    #[test]
    fn methods_inside_classes_are_removed() {
        let source = r#"class C:
    @replace_me()
    def old(self):
        return self.new()

    def keep(self):
        return 1
"#;
        let (count, result) = strip_deprecated(source, &CleanupPolicy::remove_all()).unwrap();
        assert_eq!(count, 1);
        assert!(!result.contains("def old"));
        assert!(result.contains("def keep"));
    }
}
