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

//! Fast pre-filter for the deprecation marker.
//!
//! Skips parsing for files that cannot possibly declare a marker.  The
//! check errs toward false positives; it must never miss a real one.

use once_cell::sync::Lazy;
use regex::Regex;

static MARKER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\breplace_me\b").unwrap());

pub fn might_contain_marker(content: &str) -> bool {
    MARKER_RE.is_match(content)
}
