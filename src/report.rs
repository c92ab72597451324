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

//! Diff rendering and terminal output helpers.

use similar::{ChangeTag, TextDiff};
use std::path::Path;

const RED: &str = "\x1b[31m";
const GREEN: &str = "\x1b[32m";
const CYAN: &str = "\x1b[36m";
const RESET: &str = "\x1b[0m";

/// Standard opt-out: any value of `NO_COLOR` disables color.
pub fn color_enabled() -> bool {
    std::env::var_os("NO_COLOR").is_none()
}

/// Unified diff between the original and rewritten file.
pub fn render_diff(path: &Path, old: &str, new: &str, color: bool) -> String {
    let diff = TextDiff::from_lines(old, new);
    let mut out = String::new();

    let header = format!("--- a/{0}\n+++ b/{0}\n", path.display());
    if color {
        out.push_str(CYAN);
        out.push_str(&header);
        out.push_str(RESET);
    } else {
        out.push_str(&header);
    }

    for hunk in diff.unified_diff().context_radius(3).iter_hunks() {
        let heading = format!("{}\n", hunk.header());
        if color {
            out.push_str(CYAN);
            out.push_str(&heading);
            out.push_str(RESET);
        } else {
            out.push_str(&heading);
        }

        for change in hunk.iter_changes() {
            let (sign, tint) = match change.tag() {
                ChangeTag::Delete => ("-", RED),
                ChangeTag::Insert => ("+", GREEN),
                ChangeTag::Equal => (" ", ""),
            };
            if color && !tint.is_empty() {
                out.push_str(tint);
            }
            out.push_str(sign);
            out.push_str(change.value());
            if !change.value().ends_with('\n') {
                out.push('\n');
            }
            if color && !tint.is_empty() {
                out.push_str(RESET);
            }
        }
    }

    out
}
