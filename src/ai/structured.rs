//! Defensive JSON extraction for generated text
//!
//! Backends without a native JSON mode often wrap the payload in code fences,
//! surround it with prose, or stop mid-structure when they hit the token
//! limit. Parsing is attempted in stages, each more invasive than the last:
//!
//! 1. strip fences and BOM, parse as-is
//! 2. drop trailing commas, close open strings and brackets
//! 3. pull the first balanced object/array out of surrounding prose

use serde_json::Value;
use tracing::debug;

/// Parse generated content as JSON, repairing common damage
pub fn parse_structured(content: &str) -> Result<Value, String> {
    JsonRepairer::new().parse(content).map(|(value, _)| value)
}

/// Staged JSON repair
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonRepairer;

/// Where a repaired document came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Repair {
    None,
    Patched,
    Extracted,
}

impl JsonRepairer {
    pub fn new() -> Self {
        Self
    }

    pub fn parse(&self, raw: &str) -> Result<(Value, Repair), String> {
        let cleaned = strip_wrapping(raw);
        if cleaned.is_empty() {
            return Err("content is empty".to_string());
        }

        if let Ok(value) = serde_json::from_str::<Value>(cleaned) {
            return Ok((value, Repair::None));
        }

        let patched = close_open_structures(&drop_trailing_commas(cleaned));
        if let Ok(value) = serde_json::from_str::<Value>(&patched) {
            debug!("Structured content repaired");
            return Ok((value, Repair::Patched));
        }

        if let Some(fragment) = first_balanced_fragment(cleaned) {
            let fragment = drop_trailing_commas(fragment);
            if let Ok(value) = serde_json::from_str::<Value>(&fragment) {
                debug!("Structured content extracted from surrounding text");
                return Ok((value, Repair::Extracted));
            }
        }

        Err(format!(
            "content is not valid JSON (preview: {})",
            cleaned.chars().take(200).collect::<String>()
        ))
    }
}

/// Remove BOM, surrounding whitespace and a single markdown fence
fn strip_wrapping(raw: &str) -> &str {
    let mut s = raw.trim().trim_start_matches('\u{feff}').trim();

    if s.starts_with("```") {
        s = match s.find('\n') {
            Some(newline) => &s[newline + 1..],
            None => s.trim_start_matches('`'),
        };
        s = s.trim_end();
        if let Some(stripped) = s.strip_suffix("```") {
            s = stripped;
        }
    }

    s.trim()
}

/// Track string state while walking JSON text
#[derive(Default)]
struct Scanner {
    in_string: bool,
    escaped: bool,
}

impl Scanner {
    /// Returns true if `ch` is structural (outside any string literal)
    fn step(&mut self, ch: char) -> bool {
        if self.escaped {
            self.escaped = false;
            return false;
        }
        match ch {
            '\\' if self.in_string => {
                self.escaped = true;
                false
            }
            '"' => {
                self.in_string = !self.in_string;
                false
            }
            _ => !self.in_string,
        }
    }
}

/// Remove commas directly followed by a closer, ignoring string contents
fn drop_trailing_commas(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut scanner = Scanner::default();
    let mut out = String::with_capacity(s.len());

    for (i, &ch) in chars.iter().enumerate() {
        if scanner.step(ch) && ch == ',' {
            let next = chars[i + 1..].iter().find(|c| !c.is_whitespace());
            if matches!(next, Some(']') | Some('}')) {
                continue;
            }
        }
        out.push(ch);
    }

    out
}

/// Close an unterminated string, then any open arrays/objects in reverse order
fn close_open_structures(s: &str) -> String {
    let mut scanner = Scanner::default();
    let mut stack: Vec<char> = Vec::new();

    for ch in s.chars() {
        if !scanner.step(ch) {
            continue;
        }
        match ch {
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                if stack.last() == Some(&ch) {
                    stack.pop();
                }
            }
            _ => {}
        }
    }

    let mut out = s.trim_end().to_string();
    if scanner.in_string {
        out.push('"');
    }
    // A dangling comma would survive the closers
    if out.ends_with(',') {
        out.pop();
    }
    out.extend(stack.iter().rev());
    out
}

/// First complete `{...}` or `[...]` in mixed content
fn first_balanced_fragment(s: &str) -> Option<&str> {
    let start = s.find(['{', '['])?;
    let mut scanner = Scanner::default();
    let mut depth = 0usize;

    for (offset, ch) in s[start..].char_indices() {
        if !scanner.step(ch) {
            continue;
        }
        match ch {
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&s[start..start + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }

    None
}
