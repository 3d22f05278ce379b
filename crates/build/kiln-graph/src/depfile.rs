//! Parser for Make-rule dependency listings.
//!
//! Compilers asked for their header dependencies (`-M`, `-MM`) print rules
//! of the form:
//!
//! ```text
//! build/a.o: src/a.c include/a.h \
//!   include/with\ space.h
//! ```
//!
//! Continuation lines are joined, `#` comments are dropped, and the escapes
//! `\ `, `\#` and `$$` are undone inside file names.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

use crate::path::id_for;

/// One parsed rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    /// Names before the separator.
    pub targets: Vec<String>,
    /// Names after the separator.
    pub prerequisites: Vec<String>,
}

/// Parse every rule in a dependency listing.
///
/// Lines without a `:` separator are ignored.
pub fn parse_rules(text: &str) -> Vec<Rule> {
    let joined = text.replace("\\\r\n", " ").replace("\\\n", " ");
    joined.lines().filter_map(parse_line).collect()
}

fn parse_line(line: &str) -> Option<Rule> {
    let mut targets = Vec::new();
    let mut prerequisites = Vec::new();
    let mut separated = false;
    let mut current = String::new();
    let mut chars = line.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '\\' => match chars.peek() {
                Some(&next @ (' ' | '#')) => {
                    current.push(next);
                    chars.next();
                }
                _ => current.push(ch),
            },
            '$' if chars.peek() == Some(&'$') => {
                current.push('$');
                chars.next();
            }
            '#' => break,
            ':' if !separated && chars.peek().is_none_or(|c| c.is_whitespace()) => {
                if !current.is_empty() {
                    targets.push(std::mem::take(&mut current));
                }
                separated = true;
            }
            c if c.is_whitespace() => {
                if !current.is_empty() {
                    let token = std::mem::take(&mut current);
                    if separated {
                        prerequisites.push(token);
                    } else {
                        targets.push(token);
                    }
                }
            }
            c => current.push(c),
        }
    }

    if !separated {
        return None;
    }
    if !current.is_empty() {
        prerequisites.push(current);
    }
    Some(Rule {
        targets,
        prerequisites,
    })
}

/// Extract the prerequisite ids from a dependency listing.
///
/// Absolute names under `root` are made relative to it and `.`/`..` are
/// resolved lexically. The result is deduplicated in first-seen order and
/// never contains `self_id`.
pub fn prerequisites(text: &str, self_id: &str, root: &Path) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut ids = Vec::new();
    for rule in parse_rules(text) {
        for name in rule.prerequisites {
            let id = normalize_id(Path::new(&name), root);
            if id.is_empty() || id == self_id {
                continue;
            }
            if seen.insert(id.clone()) {
                ids.push(id);
            }
        }
    }
    ids
}

fn normalize_id(path: &Path, root: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    id_for(&normalize_lexically(relative))
}

fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if matches!(out.components().next_back(), Some(Component::Normal(_))) {
                    out.pop();
                } else if !out.has_root() || out.parent().is_some() {
                    out.push("..");
                }
            }
            c => out.push(c),
        }
    }
    out
}
