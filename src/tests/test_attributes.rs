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

use super::common::migrate;

#[test]
fn module_attribute_use_site_is_inlined() {
    let source = r#"OLD_URL = replace_me("https://x/v2")

u = OLD_URL
"#;
    let migrated = migrate(source);
    assert!(migrated.contains("u = \"https://x/v2\""));
    // The marker assignment itself stays for cleanup to remove.
    assert!(migrated.contains("OLD_URL = replace_me(\"https://x/v2\")"));
}

#[test]
fn annotated_attribute_marker() {
    let source = r#"DEFAULT_TIMEOUT: int = replace_me(30)

t = DEFAULT_TIMEOUT + 5
"#;
    let migrated = migrate(source);
    assert!(migrated.contains("t = 30 + 5"));
}

#[test]
fn class_attribute_access_via_class_literal() {
    let source = r#"class Config:
    OLD_LIMIT = replace_me(100)

limit = Config.OLD_LIMIT
"#;
    let migrated = migrate(source);
    assert!(migrated.contains("limit = 100"));
}

#[test]
fn attribute_used_inside_expressions() {
    let source = r#"OLD_FACTOR = replace_me(2.5)

def scale(v):
    return v * OLD_FACTOR
"#;
    let migrated = migrate(source);
    assert!(migrated.contains("return v * 2.5"));
}

#[test]
fn assignment_target_is_not_rewritten() {
    let source = r#"OLD = replace_me(1)

OLD2 = OLD
"#;
    let migrated = migrate(source);
    // Only the load on the right-hand side changes.
    assert!(migrated.contains("OLD2 = 1"));
    assert!(migrated.contains("OLD = replace_me(1)"));
}

#[test]
fn callable_attribute_keeps_the_call() {
    let source = r#"HANDLER = replace_me(default_handler)

HANDLER()
"#;
    let migrated = migrate(source);
    assert!(migrated.contains("default_handler()"));
}

#[test]
fn attribute_expression_template() {
    let source = r#"OLD_SETTINGS = replace_me({"timeout": 30, "retries": 3})

s = OLD_SETTINGS
"#;
    let migrated = migrate(source);
    assert!(migrated.contains("s = {\"timeout\": 30, \"retries\": 3}"));
}
