//! Just enough SQL tokenizing for the fake to follow the reconciler's DDL.

/// Words that start a table-level constraint rather than a column.
const CONSTRAINT_WORDS: &[&str] = &[
    "PRIMARY",
    "UNIQUE",
    "CONSTRAINT",
    "FOREIGN",
    "CHECK",
    "EXCLUDE",
];

pub(super) struct Cursor<'a> {
    rest: &'a str,
}

impl<'a> Cursor<'a> {
    pub(super) fn new(sql: &'a str) -> Self {
        Self { rest: sql }
    }

    pub(super) fn rest(&self) -> &'a str {
        self.rest
    }

    /// Consume all of `words` (case-insensitively) or nothing.
    pub(super) fn keywords(&mut self, words: &[&str]) -> bool {
        let saved = self.rest;
        for word in words {
            if !self.keyword(word) {
                self.rest = saved;
                return false;
            }
        }
        true
    }

    fn keyword(&mut self, word: &str) -> bool {
        let trimmed = self.rest.trim_start();
        let end = trimmed
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(trimmed.len());
        if end > 0 && trimmed[..end].eq_ignore_ascii_case(word) {
            self.rest = &trimmed[end..];
            true
        } else {
            false
        }
    }

    /// A quoted identifier verbatim, or a bare one folded to lower case.
    pub(super) fn ident(&mut self) -> Option<String> {
        let trimmed = self.rest.trim_start();

        if let Some(quoted) = trimmed.strip_prefix('"') {
            let mut name = String::new();
            let mut chars = quoted.char_indices().peekable();
            while let Some((i, c)) = chars.next() {
                if c != '"' {
                    name.push(c);
                    continue;
                }
                if let Some((_, '"')) = chars.peek() {
                    chars.next();
                    name.push('"');
                    continue;
                }
                self.rest = &quoted[i + 1..];
                return Some(name);
            }
            return None;
        }

        let end = trimmed
            .find(|c: char| !(c.is_alphanumeric() || c == '_' || c == '$'))
            .unwrap_or(trimmed.len());
        if end == 0 {
            return None;
        }
        self.rest = &trimmed[end..];
        Some(trimmed[..end].to_lowercase())
    }
}

/// Split the parenthesized body of a `CREATE TABLE` into `(column, definition)`.
pub(super) fn split_columns(body: &str) -> Result<Vec<(String, String)>, String> {
    let body = body.trim().trim_end_matches(';').trim();
    let inner = body
        .strip_prefix('(')
        .and_then(|b| b.strip_suffix(')'))
        .ok_or_else(|| format!("syntax error in table body: {}", body))?;

    let mut columns = Vec::new();
    for item in split_top_level(inner) {
        let mut cursor = Cursor::new(item);
        if CONSTRAINT_WORDS.iter().any(|w| cursor.keywords(&[*w])) {
            continue;
        }
        let name = cursor
            .ident()
            .ok_or_else(|| format!("syntax error at or near \"{}\"", item.trim()))?;
        columns.push((name, cursor.rest().trim().to_string()));
    }
    Ok(columns)
}

fn split_top_level(s: &str) -> Vec<&str> {
    let mut items = Vec::new();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match c {
            '\'' => in_string = !in_string,
            '(' if !in_string => depth += 1,
            ')' if !in_string => depth = depth.saturating_sub(1),
            ',' if !in_string && depth == 0 => {
                items.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    items.push(&s[start..]);
    items.into_iter().filter(|i| !i.trim().is_empty()).collect()
}

/// Reject column definitions Postgres would refuse to parse.
pub(super) fn check_definition(definition: &str) -> Result<(), String> {
    let first = definition
        .chars()
        .next()
        .ok_or("syntax error: missing column type")?;
    if !first.is_alphabetic() {
        return Err(format!("syntax error at or near \"{}\"", first));
    }

    let mut depth = 0i32;
    let mut in_string = false;
    for c in definition.chars() {
        match c {
            '\'' => in_string = !in_string,
            '(' if !in_string => depth += 1,
            ')' if !in_string => {
                depth -= 1;
                if depth < 0 {
                    return Err("syntax error at or near \")\"".to_string());
                }
            }
            _ => {}
        }
    }
    if depth != 0 || in_string {
        return Err("syntax error at end of input".to_string());
    }
    Ok(())
}

/// First word of a definition, upper-cased, without a length/precision suffix.
pub(super) fn type_word(definition: &str) -> String {
    definition
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .split('(')
        .next()
        .unwrap_or_default()
        .to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ident_quoted_and_bare() {
        let mut c = Cursor::new(" \"we\"\"ird\" Users;");
        assert_eq!(c.ident().as_deref(), Some("we\"ird"));
        assert_eq!(c.ident().as_deref(), Some("users"));
        assert_eq!(c.rest(), ";");
    }

    #[test]
    fn test_keywords_all_or_nothing() {
        let mut c = Cursor::new("CREATE TRIGGER x");
        assert!(!c.keywords(&["CREATE", "TABLE"]));
        assert!(c.keywords(&["create", "trigger"]));
        assert_eq!(c.ident().as_deref(), Some("x"));
    }

    #[test]
    fn test_check_definition() {
        assert!(check_definition("TEXT NOT NULL DEFAULT ''").is_ok());
        assert!(check_definition("NUMERIC(3, 0)").is_ok());
        assert!(check_definition("TEXT DEFAULT (").is_err());
        assert!(check_definition("((").is_err());
        assert!(check_definition("").is_err());
    }

    #[test]
    fn test_type_word() {
        assert_eq!(type_word("numeric(3, 0) not null"), "NUMERIC");
        assert_eq!(type_word("SERIAL PRIMARY KEY"), "SERIAL");
    }
}
