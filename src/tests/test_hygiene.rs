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

//! Hygienic substitution: binders inside templates shield the names they
//! rebind.

use super::common::migrate;

#[test]
fn lambda_parameter_is_not_substituted() {
    let source = r#"@replace_me()
def old(x):
    return apply(lambda x: f(x), x)

r = old(EXPR)
"#;
    let migrated = migrate(source);
    // The binder keeps its own x; only the free use is replaced.
    assert!(migrated.contains("r = apply(lambda x: f(x), EXPR)"));
}

#[test]
fn lambda_over_other_names_still_substitutes() {
    let source = r#"@replace_me()
def old(x, y):
    return apply(lambda x: f(x, y), x)

r = old(A, B)
"#;
    let migrated = migrate(source);
    assert!(migrated.contains("r = apply(lambda x: f(x, B), A)"));
}

#[test]
fn comprehension_target_is_not_substituted() {
    let source = r#"@replace_me()
def old(item, items):
    return [item for item in items]

r = old(E, data)
"#;
    let migrated = migrate(source);
    assert!(migrated.contains("r = [item for item in data]"));
}

#[test]
fn comprehension_condition_respects_binding() {
    let source = r#"@replace_me()
def old(x, limit):
    return [x for x in range(limit) if x < limit]

r = old(V, 10)
"#;
    let migrated = migrate(source);
    assert!(migrated.contains("r = [x for x in range(10) if x < 10]"));
}

#[test]
fn nested_lambda_defaults_are_outside_the_binder() {
    let source = r#"@replace_me()
def old(n):
    return sorted(data, key=lambda item, n=n: item[n])

r = old(2)
"#;
    let migrated = migrate(source);
    // The default value is evaluated outside the lambda scope and is
    // substituted; the body reference is the lambda's own n.
    assert!(migrated.contains("key=lambda item, n=2: item[n]"));
}
