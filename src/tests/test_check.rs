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

use crate::engine::check_source;
use crate::model::FailureReason;

#[test]
fn clean_markers_check_out() {
    let report = check_source(
        r#"@replace_me()
def old_a(x):
    return new_a(x)

@replace_me()
def old_b(x):
    return new_b(x)
"#,
        "mymod",
    )
    .unwrap();

    assert!(report.ok());
    assert_eq!(report.checked_count(), 2);
    assert_eq!(
        report.replaceable,
        vec!["mymod.old_a".to_string(), "mymod.old_b".to_string()]
    );
}

#[test]
fn problems_are_reported_and_sorted() {
    let report = check_source(
        r#"@replace_me()
def zz(x):
    y = 1
    return new(y)

@replace_me()
def aa(n):
    return aa(n - 1)

@replace_me()
def fine(x):
    return new(x)
"#,
        "mymod",
    )
    .unwrap();

    assert!(!report.ok());
    assert_eq!(report.checked_count(), 3);
    assert_eq!(report.problems.len(), 2);
    assert_eq!(report.problems[0].qualified_name, "mymod.aa");
    assert_eq!(report.problems[0].reason, FailureReason::RecursiveCall);
    assert_eq!(report.problems[1].qualified_name, "mymod.zz");
    assert_eq!(report.problems[1].reason, FailureReason::ComplexBody);
}

#[test]
fn parse_errors_surface_with_location() {
    let err = check_source("def broken(:\n", "mymod").unwrap_err();
    assert_eq!(err.line, 1);
    assert!(!err.message.is_empty());
}

#[test]
fn files_without_markers_are_trivially_ok() {
    let report = check_source("def f(x):\n    return x\n", "mymod").unwrap();
    assert!(report.ok());
    assert_eq!(report.checked_count(), 0);
}
