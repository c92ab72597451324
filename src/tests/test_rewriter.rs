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

use super::common::{migrate, migrate_outcome};

#[test]
fn rename_of_a_free_function() {
    let source = r#"@replace_me(since="0.1.0")
def inc(x):
    return x + 1

result = inc(x=3)
"#;
    let migrated = migrate(source);
    assert!(migrated.contains("result = 3 + 1"));
    assert!(!migrated.contains("result = inc(x=3)"));
    // The definition itself is untouched; cleanup removes it later.
    assert!(migrated.contains("def inc(x):"));
}

#[test]
fn positional_arguments_fill_in_order() {
    let source = r#"@replace_me()
def old_add(a, b):
    return new_add(a, b)

result = old_add(1, 2)
"#;
    assert!(migrate(source).contains("result = new_add(1, 2)"));
}

#[test]
fn unfilled_parameters_take_their_defaults() {
    let source = r#"@replace_me()
def process(data, mode="fast", verbose=False):
    return process_v2(data, processing_mode=mode, debug=verbose)

process("x")
process("x", "slow")
process("x", verbose=True)
"#;
    let migrated = migrate(source);
    assert!(migrated.contains("process_v2(\"x\", processing_mode=\"fast\", debug=False)"));
    assert!(migrated.contains("process_v2(\"x\", processing_mode=\"slow\", debug=False)"));
    assert!(migrated.contains("process_v2(\"x\", processing_mode=\"fast\", debug=True)"));
}

#[test]
fn keyword_only_parameters_bind_by_name() {
    let source = r#"@replace_me()
def old(a, *, flag=False):
    return new(a, flag=flag)

old(1, flag=True)
old(2)
"#;
    let migrated = migrate(source);
    assert!(migrated.contains("new(1, flag=True)"));
    assert!(migrated.contains("new(2, flag=False)"));
}

#[test]
fn varargs_and_kwargs_expand_inline() {
    let source = r#"@replace_me()
def old(a, *args, **kwargs):
    return new(a, *args, **kwargs)

old(1)
old(1, 2, 3)
old(1, 2, x=4)
old(1, *rest, **extra)
"#;
    let migrated = migrate(source);
    assert!(migrated.contains("new(1)\n"));
    assert!(migrated.contains("new(1, 2, 3)"));
    assert!(migrated.contains("new(1, 2, x=4)"));
    assert!(migrated.contains("new(1, *rest, **extra)"));
}

#[test]
fn unknown_keyword_skips_the_site_only() {
    let source = r#"@replace_me()
def old(a):
    return new(a)

old(1, bogus=2)
old(3)
"#;
    let outcome = migrate_outcome(source, &[]);
    let migrated = outcome.new_source.unwrap();
    // The bad site is untouched, the good one proceeds.
    assert!(migrated.contains("old(1, bogus=2)"));
    assert!(migrated.contains("new(3)"));
    assert_eq!(outcome.skipped.len(), 1);
    assert!(outcome.skipped[0].reason.contains("bogus"));
}

#[test]
fn excess_positional_arguments_skip_the_site() {
    let source = r#"@replace_me()
def old(a):
    return new(a)

old(1, 2)
"#;
    let outcome = migrate_outcome(source, &[]);
    assert!(outcome.new_source.is_none());
    assert_eq!(outcome.skipped.len(), 1);
}

#[test]
fn missing_required_argument_skips_the_site() {
    let source = r#"@replace_me()
def old(a, b):
    return new(a, b)

old(1)
"#;
    let outcome = migrate_outcome(source, &[]);
    assert!(outcome.new_source.is_none());
    assert_eq!(outcome.skipped.len(), 1);
}

#[test]
fn splat_over_individual_parameters_is_refused() {
    let source = r#"@replace_me()
def old(a, b, *args):
    return new(a, b, *args)

old(1, *rest)
"#;
    let outcome = migrate_outcome(source, &[]);
    assert!(outcome.new_source.is_none());
    assert_eq!(outcome.skipped.len(), 1);
}

#[test]
fn async_call_keeps_a_single_await() {
    let source = r#"@replace_me()
async def old(url):
    return await new(url, timeout=30)

async def main():
    data = await old("u")
"#;
    let migrated = migrate(source);
    assert!(migrated.contains("data = await new(\"u\", timeout=30)"));
    assert!(!migrated.contains("await await"));
}

#[test]
fn nested_deprecated_calls_fold_inside_out() {
    let source = r#"@replace_me()
def inc(x):
    return x + 1

r = inc(inc(3))
"#;
    let migrated = migrate(source);
    assert!(migrated.contains("r = (3 + 1) + 1"));
}

#[test]
fn class_instantiation_is_rewritten() {
    let source = r#"@replace_me()
class OldClient:
    def __init__(self, host, port=80):
        self._c = NewClient(host, port=port)

c = OldClient("h", port=8080)
"#;
    let migrated = migrate(source);
    assert!(migrated.contains("c = NewClient(\"h\", port=8080)"));
}

#[test]
fn local_redefinition_shadows_deprecated_function() {
    let source = r#"@replace_me()
def old(x):
    return new(x)

def old(x):
    return x

r = old(3)
"#;
    let migrated = migrate(source);
    assert!(migrated.contains("r = old(3)"));
}

#[test]
fn assignment_before_use_shadows_in_function_scope() {
    let source = r#"@replace_me()
def old(x):
    return new(x)

def caller():
    old = min
    return old(3)
"#;
    let migrated = migrate(source);
    assert!(migrated.contains("return old(3)"));
}

#[test]
fn deprecated_bodies_are_not_rewritten() {
    let source = r#"@replace_me()
def first(x):
    return second(x)

@replace_me()
def second(x):
    return third(x)

r = first(1)
"#;
    let migrated = migrate(source);
    // The body of `first` still reads second(x); only the call site moved.
    assert!(migrated.contains("    return second(x)"));
    assert!(migrated.contains("r = second(1)"));
}

#[test]
fn applied_records_are_in_source_order() {
    let source = r#"@replace_me()
def old(x):
    return new(x)

a = old(1)
b = old(2)
c = old(3)
"#;
    let outcome = migrate_outcome(source, &[]);
    let lines: Vec<u32> = outcome.applied.iter().map(|r| r.line).collect();
    let mut sorted = lines.clone();
    sorted.sort();
    assert_eq!(lines, sorted);
    assert_eq!(outcome.applied.len(), 3);
    assert_eq!(outcome.applied[0].old_text, "old(1)");
    assert_eq!(outcome.applied[0].new_text, "new(1)");
}

#[test]
fn migration_reports_nothing_without_markers() {
    let outcome = migrate_outcome("def f(x):\n    return x\n\nf(1)\n", &[]);
    assert!(outcome.new_source.is_none());
    assert!(outcome.applied.is_empty());
    assert!(outcome.skipped.is_empty());
}
