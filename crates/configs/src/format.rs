//! Placeholder substitution for retrieved messages.
//!
//! Templates carry `{name}` slots filled from named placeholders, `{0}`…
//! `{n}` slots filled from positional ones, and a plural selector
//! `{plural:{count}|zero:…|one:…|other:…}` whose branch is picked by the
//! integer value of the referenced placeholder. Unknown placeholders are
//! left literal; substitution never fails.

use std::collections::BTreeMap;
use std::fmt::Display;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Placeholder sets
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The values available to one `format` call. Named and positional slots
/// can be mixed; a numeric token consults the positional list when no
/// named entry shadows it.
#[derive(Debug, Clone, Default)]
pub struct Placeholders {
    named: BTreeMap<String, String>,
    positional: Vec<String>,
}

impl Placeholders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a named placeholder. Values go through `Display` once, here.
    pub fn set(mut self, name: impl Into<String>, value: impl Display) -> Self {
        self.named.insert(name.into(), value.to_string());
        self
    }

    /// Build a positional sequence for `{0}`-style templates.
    pub fn positional<I>(values: I) -> Self
    where
        I: IntoIterator,
        I::Item: Display,
    {
        Self {
            named: BTreeMap::new(),
            positional: values.into_iter().map(|v| v.to_string()).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.named.is_empty() && self.positional.is_empty()
    }

    fn get(&self, token: &str) -> Option<&str> {
        if let Some(value) = self.named.get(token) {
            return Some(value);
        }
        token
            .parse::<usize>()
            .ok()
            .and_then(|index| self.positional.get(index))
            .map(String::as_str)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Substitution
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Substitute every resolvable slot in `template`. Unresolvable slots
/// (unknown names, malformed selectors, unbalanced braces) stay exactly
/// as written.
pub fn apply(template: &str, placeholders: &Placeholders) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open..];
        match matching_brace(tail) {
            Some(close) => {
                let token = &tail[1..close];
                out.push_str(&resolve(token, placeholders));
                rest = &tail[close + 1..];
            }
            None => {
                // Unbalanced: emit the remainder untouched.
                out.push_str(tail);
                return out;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Index of the `}` matching the `{` the slice starts with.
fn matching_brace(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    for (index, ch) in s.char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(index);
                }
            }
            _ => {}
        }
    }
    None
}

fn resolve(token: &str, placeholders: &Placeholders) -> String {
    if let Some(body) = token.strip_prefix("plural:") {
        if let Some(expanded) = plural(body, placeholders) {
            return expanded;
        }
    } else if let Some(value) = placeholders.get(token) {
        return value.to_owned();
    }
    format!("{{{token}}}")
}

/// Expand a plural selector body: `{count}|one:…|other:…`.
///
/// `zero` matches 0, `one` matches ±1, everything else takes `other`; a
/// missing branch falls through to `other`. `None` (selector stays
/// literal) when the placeholder is unknown, not an integer, or no branch
/// applies.
fn plural(body: &str, placeholders: &Placeholders) -> Option<String> {
    let mut parts = split_outside_braces(body, '|');
    if parts.is_empty() {
        return None;
    }
    let selector = parts.remove(0);
    let name = selector
        .strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
        .unwrap_or(selector);
    let count: i64 = placeholders.get(name)?.trim().parse().ok()?;

    let mut zero = None;
    let mut one = None;
    let mut other = None;
    for part in parts {
        let (label, text) = part.split_once(':')?;
        match label.trim() {
            "zero" => zero = Some(text),
            "one" => one = Some(text),
            "other" => other = Some(text),
            _ => {}
        }
    }

    let branch = if count == 0 && zero.is_some() {
        zero
    } else if (count == 1 || count == -1) && one.is_some() {
        one
    } else {
        other
    }?;
    Some(apply(branch, placeholders))
}

/// Split on `sep`, ignoring separators nested inside braces.
fn split_outside_braces(s: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (index, ch) in s.char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => depth = depth.saturating_sub(1),
            c if c == sep && depth == 0 => {
                parts.push(&s[start..index]);
                start = index + sep.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_substitution() {
        let args = Placeholders::new().set("name", "Alex");
        assert_eq!(apply("Welcome, {name}!", &args), "Welcome, Alex!");
    }

    #[test]
    fn unknown_placeholders_stay_literal() {
        let args = Placeholders::new().set("a", "x");
        assert_eq!(apply("{a} {b}", &args), "x {b}");
    }

    #[test]
    fn positional_substitution() {
        let args = Placeholders::positional(["one", "two"]);
        assert_eq!(apply("{0} and {1} and {2}", &args), "one and two and {2}");
    }

    #[test]
    fn display_values_are_rendered_once() {
        let args = Placeholders::new().set("count", 42).set("ok", true);
        assert_eq!(apply("{count}/{ok}", &args), "42/true");
    }

    #[test]
    fn plural_selects_one_branch() {
        let template = "{plural:{count}|one:Found {count} item|other:Found {count} items}";
        let one = Placeholders::new().set("count", 1);
        assert_eq!(apply(template, &one), "Found 1 item");

        let five = Placeholders::new().set("count", 5);
        assert_eq!(apply(template, &five), "Found 5 items");
    }

    #[test]
    fn plural_zero_branch_wins_when_present() {
        let template = "{plural:{n}|zero:none|one:a single one|other:{n} of them}";
        assert_eq!(apply(template, &Placeholders::new().set("n", 0)), "none");
        assert_eq!(
            apply(template, &Placeholders::new().set("n", 3)),
            "3 of them"
        );
    }

    #[test]
    fn plural_without_zero_falls_to_other() {
        let template = "{plural:{n}|one:one|other:{n}}";
        assert_eq!(apply(template, &Placeholders::new().set("n", 0)), "0");
    }

    #[test]
    fn plural_with_unknown_count_stays_literal() {
        let template = "{plural:{n}|one:x|other:y}";
        assert_eq!(apply(template, &Placeholders::new()), template);
    }

    #[test]
    fn plural_with_non_numeric_count_stays_literal() {
        let template = "{plural:{n}|one:x|other:y}";
        let args = Placeholders::new().set("n", "many");
        assert_eq!(apply(template, &args), template);
    }

    #[test]
    fn unbalanced_braces_stay_literal() {
        let args = Placeholders::new().set("a", "x");
        assert_eq!(apply("oops {a", &args), "oops {a");
    }

    #[test]
    fn empty_template_and_no_placeholders() {
        assert_eq!(apply("", &Placeholders::new()), "");
        assert!(Placeholders::new().is_empty());
    }
}
