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

//! Formatting-preserving source model on top of Ruff's parser.
//!
//! The parser produces a lossless AST with byte ranges into the original
//! text; rewrites are expressed as range edits and spliced back so that
//! untouched regions reprint byte-identically.

use ruff_python_ast::Mod;
use ruff_python_parser::{parse, Mode, Parsed};
use ruff_text_size::{TextRange, TextSize};
use thiserror::Error;

/// Parse failure with a 1-based line and 0-based column.
#[derive(Debug, Error)]
#[error("{line}:{column}: {message}")]
pub struct ParseError {
    pub line: u32,
    pub column: u32,
    pub message: String,
}

/// A parsed module together with positional indexes into its source.
pub struct SourceModule<'a> {
    source: &'a str,
    parsed: Parsed<Mod>,
    /// Byte offset of the start of each line.
    line_starts: Vec<u32>,
}

impl<'a> SourceModule<'a> {
    /// Parse Python source.  The input is never repaired: any syntax error
    /// fails the whole file.
    pub fn parse(source: &'a str) -> Result<Self, ParseError> {
        let parsed = parse(source, Mode::Module.into()).map_err(|e| {
            let (line, column) = line_col_in(source, e.location.start());
            ParseError {
                line,
                column,
                message: e.error.to_string(),
            }
        })?;

        Ok(Self {
            source,
            parsed,
            line_starts: line_starts(source),
        })
    }

    pub fn source(&self) -> &str {
        self.source
    }

    pub fn ast(&self) -> &Mod {
        self.parsed.syntax()
    }

    /// Text covered by a node range, verbatim.
    pub fn text_at(&self, range: TextRange) -> &str {
        &self.source[range.start().to_usize()..range.end().to_usize()]
    }

    /// 1-based line and 0-based character column of a byte offset.
    pub fn line_col(&self, offset: TextSize) -> (u32, u32) {
        let off = offset.to_u32();
        let line_idx = match self.line_starts.binary_search(&off) {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        let line_start = self.line_starts[line_idx] as usize;
        let column = self.source[line_start..off as usize].chars().count() as u32;
        (line_idx as u32 + 1, column)
    }
}

fn line_starts(source: &str) -> Vec<u32> {
    let mut starts = vec![0u32];
    for (i, b) in source.bytes().enumerate() {
        if b == b'\n' {
            starts.push(i as u32 + 1);
        }
    }
    starts
}

fn line_col_in(source: &str, offset: TextSize) -> (u32, u32) {
    let off = offset.to_usize().min(source.len());
    let before = &source[..off];
    let line = before.bytes().filter(|&b| b == b'\n').count() as u32 + 1;
    let line_start = before.rfind('\n').map(|i| i + 1).unwrap_or(0);
    let column = source[line_start..off].chars().count() as u32;
    (line, column)
}

/// Splice range edits into the source, back to front so earlier offsets stay
/// valid.  With no edits the output is byte-identical to the input.
pub fn apply_edits(source: &str, mut edits: Vec<(TextRange, String)>) -> String {
    edits.sort_by_key(|(range, _)| std::cmp::Reverse(range.start()));

    let mut result = source.to_string();
    for (range, replacement) in edits {
        let start = range.start().to_usize();
        let end = range.end().to_usize();
        tracing::debug!(
            "splicing {}..{}: '{}' -> '{}'",
            start,
            end,
            &source[start..end],
            replacement
        );
        result.replace_range(start..end, &replacement);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_positions() {
        let module = SourceModule::parse("x = 1\ny = 2\n").unwrap();
        assert_eq!(module.line_col(TextSize::new(0)), (1, 0));
        assert_eq!(module.line_col(TextSize::new(6)), (2, 0));
        assert_eq!(module.line_col(TextSize::new(10)), (2, 4));
    }

    #[test]
    fn parse_error_reports_location() {
        let err = SourceModule::parse("def f(:\n    pass\n").unwrap_err();
        assert_eq!(err.line, 1);
    }

    #[test]
    fn no_edits_is_identity() {
        let source = "a = 1\r\n\n# comment\t\nb  =  'x'\n";
        assert_eq!(apply_edits(source, vec![]), source);
    }

    #[test]
    fn edits_apply_in_any_order() {
        let source = "aaa bbb ccc";
        let edits = vec![
            (
                TextRange::new(TextSize::new(0), TextSize::new(3)),
                "X".to_string(),
            ),
            (
                TextRange::new(TextSize::new(8), TextSize::new(11)),
                "Y".to_string(),
            ),
        ];
        assert_eq!(apply_edits(source, edits), "X bbb Y");
    }
}
