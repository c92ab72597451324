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

use super::common::collect;
use crate::model::{ConstructKind, FailureReason};

#[test]
fn collects_simple_function() {
    let result = collect(
        r#"from sundown import replace_me

@replace_me(since="1.0.0", remove_in="2.0.0", message="use new_func")
def old_func(x, y):
    return new_func(x * 2, y + 1)
"#,
    );

    let info = &result.replacements["mymod.old_func"];
    assert_eq!(info.simple_name, "old_func");
    assert_eq!(info.kind, ConstructKind::Function);
    assert_eq!(info.template_source, "new_func(x * 2, y + 1)");
    assert_eq!(info.since.as_deref(), Some("1.0.0"));
    assert_eq!(info.remove_in.as_deref(), Some("2.0.0"));
    assert_eq!(info.message.as_deref(), Some("use new_func"));
    assert!(info.declaring_class.is_none());
    assert_eq!(info.parameters.len(), 2);
}

#[test]
fn tuple_version_literals() {
    let result = collect(
        r#"@replace_me(since=(1, 2, 3))
def old(x):
    return new(x)
"#,
    );
    assert_eq!(
        result.replacements["mymod.old"].since.as_deref(),
        Some("1.2.3")
    );
}

#[test]
fn bare_decorator_without_call() {
    let result = collect(
        r#"@replace_me
def old(x):
    return new(x)
"#,
    );
    assert!(result.replacements.contains_key("mymod.old"));
}

#[test]
fn docstring_and_pass_are_ignored() {
    let result = collect(
        r#"@replace_me()
def old(x):
    """Deprecated; use new."""
    return new(x)
"#,
    );
    assert_eq!(result.replacements["mymod.old"].template_source, "new(x)");
}

#[test]
fn parameter_shapes() {
    let result = collect(
        r#"@replace_me()
def old(a, b=10, *rest, flag=False, **extra):
    return new(a, b, *rest, flag=flag, **extra)
"#,
    );

    let params = &result.replacements["mymod.old"].parameters;
    assert_eq!(params.len(), 5);
    assert!(!params[0].has_default);
    assert_eq!(params[1].default_source.as_deref(), Some("10"));
    assert!(params[2].is_vararg);
    assert!(params[3].is_kwonly);
    assert_eq!(params[3].default_source.as_deref(), Some("False"));
    assert!(params[4].is_kwarg);
}

#[test]
fn multi_statement_body_is_complex() {
    let result = collect(
        r#"@replace_me()
def old(x):
    y = x + 1
    return new(y)
"#,
    );
    assert!(result.replacements.is_empty());
    assert_eq!(
        result.unreplaceable["mymod.old"].reason,
        FailureReason::ComplexBody
    );
}

#[test]
fn missing_return_is_no_return() {
    for body in ["    pass\n", "    print(x)\n", "    return\n"] {
        let source = format!("@replace_me()\ndef old(x):\n{}", body);
        let result = collect(&source);
        assert_eq!(
            result.unreplaceable["mymod.old"].reason,
            FailureReason::NoReturn,
            "body {:?}",
            body
        );
    }
}

#[test]
fn recursive_template_is_rejected() {
    let result = collect(
        r#"@replace_me()
def old(n):
    return old(n - 1)
"#,
    );
    assert_eq!(
        result.unreplaceable["mymod.old"].reason,
        FailureReason::RecursiveCall
    );
    assert!(!result.replacements.contains_key("mymod.old"));
}

#[test]
fn non_literal_marker_args_are_dynamic() {
    let result = collect(
        r#"VERSION = "1.0"

@replace_me(since=VERSION)
def old(x):
    return new(x)
"#,
    );
    assert_eq!(
        result.unreplaceable["mymod.old"].reason,
        FailureReason::DynamicMarkerArgs
    );
}

#[test]
fn method_kinds() {
    let result = collect(
        r#"class C:
    @replace_me()
    def old(self, n):
        return self.new(n)

    @classmethod
    @replace_me()
    def old_cm(cls, n):
        return cls.new_cm(n)

    @staticmethod
    @replace_me()
    def old_sm(n):
        return new_sm(n)

    @property
    @replace_me()
    def old_prop(self):
        return self.new_prop

    @replace_me()
    async def old_async(self, n):
        return await self.new_async(n)
"#,
    );

    assert_eq!(result.replacements["mymod.C.old"].kind, ConstructKind::Method);
    assert_eq!(
        result.replacements["mymod.C.old_cm"].kind,
        ConstructKind::ClassMethod
    );
    assert_eq!(
        result.replacements["mymod.C.old_sm"].kind,
        ConstructKind::StaticMethod
    );
    assert_eq!(
        result.replacements["mymod.C.old_prop"].kind,
        ConstructKind::Property
    );
    assert_eq!(
        result.replacements["mymod.C.old_async"].kind,
        ConstructKind::AsyncFunction
    );
    assert_eq!(
        result.replacements["mymod.C.old"].declaring_class.as_deref(),
        Some("mymod.C")
    );
    // The receiver is recorded as the first parameter.
    assert_eq!(result.replacements["mymod.C.old"].parameters[0].name, "self");
}

#[test]
fn class_wrapping_a_constructor() {
    let result = collect(
        r#"@replace_me(since="2.0.0")
class OldClient:
    def __init__(self, host, port=80):
        self._inner = NewClient(host, port=port)
"#,
    );

    let info = &result.replacements["mymod.OldClient"];
    assert_eq!(info.kind, ConstructKind::Class);
    assert_eq!(info.template_source, "NewClient(host, port=port)");
    assert_eq!(info.parameters.len(), 2);
    assert!(info.parameters.iter().all(|p| p.name != "self"));
}

#[test]
fn class_with_replacement_marker_call() {
    let result = collect(
        r#"@replace_me()
class OldClient:
    def __init__(self, host):
        Replacement(NewClient(host, secure=True))
"#,
    );
    assert_eq!(
        result.replacements["mymod.OldClient"].template_source,
        "NewClient(host, secure=True)"
    );
}

#[test]
fn class_without_init_is_complex() {
    let result = collect(
        r#"@replace_me()
class Old:
    x = 1
"#,
    );
    assert_eq!(
        result.unreplaceable["mymod.Old"].reason,
        FailureReason::ComplexBody
    );
}

#[test]
fn module_and_class_attributes() {
    let result = collect(
        r#"OLD_URL = replace_me("https://example.com/v2")
DEFAULT_TIMEOUT: int = replace_me(30)

class Config:
    OLD_LIMIT = replace_me(100)
"#,
    );

    assert_eq!(
        result.replacements["mymod.OLD_URL"].kind,
        ConstructKind::ModuleAttribute
    );
    assert_eq!(
        result.replacements["mymod.OLD_URL"].template_source,
        "\"https://example.com/v2\""
    );
    assert_eq!(
        result.replacements["mymod.DEFAULT_TIMEOUT"].template_source,
        "30"
    );
    assert_eq!(
        result.replacements["mymod.Config.OLD_LIMIT"].kind,
        ConstructKind::ClassAttribute
    );
}

#[test]
fn lambda_attribute_value_is_rejected() {
    let result = collect("OLD = replace_me(lambda x: x + 1)\n");
    assert_eq!(
        result.unreplaceable["mymod.OLD"].reason,
        FailureReason::Lambda
    );
}

#[test]
fn inheritance_is_recorded_qualified() {
    let result = collect(
        r#"from base import Base

class Child(Base):
    pass

class GrandChild(Child):
    pass
"#,
    );

    assert_eq!(
        result.inheritance["mymod.Child"],
        vec!["base.Base".to_string()]
    );
    assert_eq!(
        result.inheritance["mymod.GrandChild"],
        vec!["mymod.Child".to_string()]
    );
}

#[test]
fn imports_are_recorded_with_relative_dots() {
    let result = collect(
        r#"import os
from sys import path as p
from ..pkg import thing
from . import sibling
"#,
    );

    assert_eq!(result.imports.len(), 4);
    assert_eq!(result.imports[0].module, "os");
    assert_eq!(
        result.imports[1].names,
        vec![("path".to_string(), Some("p".to_string()))]
    );
    assert_eq!(result.imports[2].module, "..pkg");
    assert_eq!(result.imports[3].module, ".");
}

#[test]
fn no_name_in_both_maps() {
    let result = collect(
        r#"@replace_me()
def good(x):
    return new(x)

@replace_me()
def bad(x):
    y = 1
    return new(y)
"#,
    );
    for name in result.replacements.keys() {
        assert!(!result.unreplaceable.contains_key(name));
    }
    assert!(result.replacements.contains_key("mymod.good"));
    assert!(result.unreplaceable.contains_key("mymod.bad"));
}

#[test]
fn template_round_trip_is_fixed_point() {
    let result = collect(
        r#"@replace_me()
def old(a, b):
    return new(a, key=b, items=[x for x in a if x], text=f"v={b}")
"#,
    );
    let info = &result.replacements["mymod.old"];
    let reparsed = ruff_python_parser::parse_expression(&info.template_source)
        .unwrap()
        .into_expr();
    assert_eq!(
        crate::template::print_expr(&reparsed).unwrap(),
        info.template_source
    );
}
