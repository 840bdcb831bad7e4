//! Source positions of test cases, inputs and expectations.
//!
//! `serde_yaml` values carry no spans, so block-style suite documents are
//! indexed from the source text. Entries written in flow style (`[...]`)
//! get no position, and their errors fall back to a path-only location.

use systest_core::error::Location;

use crate::document::SuiteDocument;

/// 1-based line and column of a sequence item's `-`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Position {
    pub line: usize,
    pub column: usize,
}

impl Position {
    pub(crate) fn place(position: Option<Self>, at: Location) -> Location {
        match position {
            Some(p) => at.with_position(p.line, p.column),
            None => at,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct Positions {
    cases: Vec<CasePositions>,
}

#[derive(Debug)]
struct CasePositions {
    at: Position,
    inputs: Vec<Position>,
    expectations: Vec<Position>,
}

impl Positions {
    pub(crate) fn index(yaml: &str) -> Self {
        let lines = significant_lines(yaml);
        let Some(tests) = lines
            .iter()
            .position(|l| l.indent == 0 && block_key(l.text, "tests"))
        else {
            return Self::default();
        };

        let cases = items(&lines, tests, 0)
            .into_iter()
            .map(|(item, at)| {
                let keys = item_keys(&lines, item);
                CasePositions {
                    at,
                    inputs: list_under(&lines, &keys, "inputs"),
                    expectations: list_under(&lines, &keys, "expectations"),
                }
            })
            .collect();
        Self { cases }
    }

    /// Drops whatever does not line up one-to-one with `doc`.
    pub(crate) fn aligned(mut self, doc: &SuiteDocument) -> Self {
        if self.cases.len() != doc.tests.len() {
            return Self::default();
        }
        for (case, positions) in doc.tests.iter().zip(&mut self.cases) {
            if positions.inputs.len() != case.inputs.len() {
                positions.inputs.clear();
            }
            if positions.expectations.len() != case.expectations.len() {
                positions.expectations.clear();
            }
        }
        self
    }

    pub(crate) fn case(&self, case: usize) -> Option<Position> {
        self.cases.get(case).map(|c| c.at)
    }

    pub(crate) fn input(&self, case: usize, input: usize) -> Option<Position> {
        self.cases.get(case)?.inputs.get(input).copied()
    }

    pub(crate) fn expectation(&self, case: usize, expectation: usize) -> Option<Position> {
        self.cases.get(case)?.expectations.get(expectation).copied()
    }
}

struct Line<'a> {
    number: usize,
    indent: usize,
    text: &'a str,
}

/// A mapping key inside a sequence item.
struct Key<'a> {
    line: usize,
    indent: usize,
    text: &'a str,
}

fn significant_lines(yaml: &str) -> Vec<Line<'_>> {
    yaml.lines()
        .enumerate()
        .filter_map(|(i, raw)| {
            let text = raw.trim_start_matches(' ');
            let indent = raw.len() - text.len();
            let text = text.trim_end();
            let skip = text.is_empty()
                || text.starts_with('#')
                || (indent == 0 && (text.starts_with("---") || text.starts_with("...")));
            (!skip).then_some(Line {
                number: i + 1,
                indent,
                text,
            })
        })
        .collect()
}

/// `key:` with nothing but a comment after it.
fn block_key(text: &str, key: &str) -> bool {
    let Some(rest) = text.strip_prefix(key).and_then(|r| r.strip_prefix(':')) else {
        return false;
    };
    let rest = rest.trim();
    rest.is_empty() || rest.starts_with('#')
}

fn is_item(text: &str) -> bool {
    text == "-" || text.starts_with("- ")
}

/// Items of the block sequence under the key on `lines[key]`.
fn items(lines: &[Line<'_>], key: usize, key_indent: usize) -> Vec<(usize, Position)> {
    let mut out = Vec::new();
    let Some(first) = lines.get(key + 1) else {
        return out;
    };
    if !is_item(first.text) || first.indent < key_indent {
        return out;
    }

    let indent = first.indent;
    for (i, line) in lines.iter().enumerate().skip(key + 1) {
        if line.indent < indent {
            break;
        }
        if line.indent == indent {
            if !is_item(line.text) {
                break;
            }
            out.push((
                i,
                Position {
                    line: line.number,
                    column: indent + 1,
                },
            ));
        }
    }
    out
}

/// Top-level keys of the mapping that starts at the item on `lines[item]`.
fn item_keys<'a>(lines: &[Line<'a>], item: usize) -> Vec<Key<'a>> {
    let dash = &lines[item];
    let rest = dash.text.strip_prefix('-').unwrap_or_default().trim_start_matches(' ');
    let mut keys = Vec::new();

    let content = if rest.is_empty() {
        match lines.get(item + 1) {
            Some(next) if next.indent > dash.indent => next.indent,
            _ => return keys,
        }
    } else {
        let column = dash.indent + (dash.text.len() - rest.len());
        keys.push(Key {
            line: item,
            indent: column,
            text: rest,
        });
        column
    };

    for (i, line) in lines.iter().enumerate().skip(item + 1) {
        if line.indent <= dash.indent {
            break;
        }
        if line.indent == content {
            keys.push(Key {
                line: i,
                indent: content,
                text: line.text,
            });
        }
    }
    keys
}

fn list_under(lines: &[Line<'_>], keys: &[Key<'_>], name: &str) -> Vec<Position> {
    keys.iter()
        .find(|k| block_key(k.text, name))
        .map(|k| items(lines, k.line, k.indent).into_iter().map(|(_, at)| at).collect())
        .unwrap_or_default()
}
