//! Identifier quoting and literal escaping per destination dialect.

use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dialect {
    /// Standard SQL (SQLite, PostgreSQL): `"ident"`, quotes doubled.
    #[default]
    Ansi,
    /// MySQL/MariaDB: `` `ident` ``, backslash sequences escaped as well.
    MySql,
}

impl Dialect {
    /// Quote a single identifier.
    pub fn quote_identifier(&self, name: &str) -> String {
        match self {
            Dialect::Ansi => format!("\"{}\"", name.replace('"', "\"\"")),
            Dialect::MySql => format!("`{}`", name.replace('`', "``")),
        }
    }

    /// Quote a possibly schema-qualified table name (`schema.table`).
    pub fn quote_table(&self, table: &str) -> String {
        table
            .split('.')
            .map(|part| self.quote_identifier(part))
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Escape a string into a quoted literal.
    ///
    /// Returns `None` when the value cannot be represented safely.
    pub fn quote_string(&self, value: &str) -> Option<String> {
        match self {
            Dialect::Ansi => {
                // NUL terminates strings in several engines and drivers
                if value.contains('\0') {
                    return None;
                }
                Some(format!("'{}'", value.replace('\'', "''")))
            }
            Dialect::MySql => {
                let mut escaped = String::with_capacity(value.len() + 2);
                escaped.push('\'');
                for c in value.chars() {
                    match c {
                        '\0' => escaped.push_str("\\0"),
                        '\u{8}' => escaped.push_str("\\b"),
                        '\t' => escaped.push_str("\\t"),
                        '\n' => escaped.push_str("\\n"),
                        '\r' => escaped.push_str("\\r"),
                        '\u{1a}' => escaped.push_str("\\Z"),
                        '\\' => escaped.push_str("\\\\"),
                        '"' => escaped.push_str("\\\""),
                        '\'' => escaped.push_str("''"),
                        c => escaped.push(c),
                    }
                }
                escaped.push('\'');
                Some(escaped)
            }
        }
    }

    pub fn boolean_literal(&self, value: bool) -> &'static str {
        if value {
            "TRUE"
        } else {
            "FALSE"
        }
    }

    /// Render a JSON value as a SQL literal.
    ///
    /// Nested objects and arrays are stored as their JSON text.
    pub fn literal(&self, value: &Value) -> Option<String> {
        match value {
            Value::Null => Some("NULL".to_string()),
            Value::Bool(b) => Some(self.boolean_literal(*b).to_string()),
            Value::Number(n) => Some(n.to_string()),
            Value::String(s) => self.quote_string(s),
            Value::Array(_) | Value::Object(_) => self.quote_string(&value.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_quote_doubling() {
        assert_eq!(
            Dialect::Ansi.quote_string("O'Brien").unwrap(),
            "'O''Brien'"
        );
        assert_eq!(
            Dialect::MySql.quote_string("O'Brien").unwrap(),
            "'O''Brien'"
        );
    }

    #[test]
    fn test_mysql_backslash_cannot_break_out() {
        // A trailing backslash would otherwise escape the closing quote
        let literal = Dialect::MySql.quote_string("evil\\' OR 1=1 --").unwrap();
        assert_eq!(literal, "'evil\\\\'' OR 1=1 --'");
        assert_eq!(
            Dialect::MySql.quote_string("a\nb\0c\u{1a}").unwrap(),
            "'a\\nb\\0c\\Z'"
        );
    }

    #[test]
    fn test_ansi_rejects_nul() {
        assert!(Dialect::Ansi.quote_string("bad\0value").is_none());
        // Other control characters are plain data inside a literal
        assert_eq!(
            Dialect::Ansi.quote_string("line\nbreak").unwrap(),
            "'line\nbreak'"
        );
    }

    #[test]
    fn test_identifiers() {
        assert_eq!(Dialect::Ansi.quote_identifier("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(Dialect::MySql.quote_identifier("we`ird"), "`we``ird`");
        assert_eq!(Dialect::Ansi.quote_table("public.items"), "\"public\".\"items\"");
        assert_eq!(Dialect::MySql.quote_table("items"), "`items`");
    }

    #[test]
    fn test_literals() {
        let d = Dialect::Ansi;
        assert_eq!(d.literal(&json!(null)).unwrap(), "NULL");
        assert_eq!(d.literal(&json!(0)).unwrap(), "0");
        assert_eq!(d.literal(&json!(-2.5)).unwrap(), "-2.5");
        assert_eq!(d.literal(&json!("")).unwrap(), "''");
        assert_eq!(d.literal(&json!(false)).unwrap(), "FALSE");
        assert_eq!(
            d.literal(&json!({"k": "it's"})).unwrap(),
            "'{\"k\":\"it''s\"}'"
        );
        assert_eq!(d.literal(&json!([1, 2])).unwrap(), "'[1,2]'");
    }
}
