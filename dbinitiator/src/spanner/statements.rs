//! Splitting migration scripts into the individual statements Spanner accepts.

use crate::error::Error;

/// Whether a batch of statements goes through a schema update or a DML transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StatementKind {
    Ddl,
    Dml,
}

const DML_KEYWORDS: [&str; 3] = ["INSERT", "UPDATE", "DELETE"];

/// Strip comments and split `script` on semicolons that are not inside quotes.
/// Empty statements are dropped.
pub(crate) fn split(script: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut chars = script.chars().peekable();
    let mut quote: Option<char> = None;

    while let Some(ch) = chars.next() {
        if let Some(q) = quote {
            current.push(ch);
            if ch == '\\' {
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
            } else if ch == q {
                quote = None;
            }
            continue;
        }

        match ch {
            '\'' | '"' | '`' => {
                quote = Some(ch);
                current.push(ch);
            }
            '-' if chars.peek() == Some(&'-') => skip_line(&mut chars),
            '#' => skip_line(&mut chars),
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = ' ';
                for c in chars.by_ref() {
                    if prev == '*' && c == '/' {
                        break;
                    }
                    prev = c;
                }
                current.push(' ');
            }
            ';' => push_statement(&mut statements, &mut current),
            _ => current.push(ch),
        }
    }
    push_statement(&mut statements, &mut current);

    statements
}

fn skip_line(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) {
    for c in chars.by_ref() {
        if c == '\n' {
            break;
        }
    }
}

fn push_statement(statements: &mut Vec<String>, current: &mut String) {
    let statement = current.split_whitespace().collect::<Vec<_>>().join(" ");
    if !statement.is_empty() {
        statements.push(statement);
    }
    current.clear();
}

fn kind_of(statement: &str) -> StatementKind {
    let first = statement
        .trim_start_matches('(')
        .split(|c: char| c.is_whitespace() || c == '(')
        .next()
        .unwrap_or_default();
    if DML_KEYWORDS.iter().any(|k| first.eq_ignore_ascii_case(k)) {
        StatementKind::Dml
    } else {
        StatementKind::Ddl
    }
}

/// The single kind shared by every statement, or `None` for an empty batch.
pub(crate) fn classify(statements: &[String]) -> Result<Option<StatementKind>, Error> {
    let mut kinds = statements.iter().map(|s| (s, kind_of(s)));
    let Some((_, kind)) = kinds.next() else {
        return Ok(None);
    };
    if let Some((other, _)) = kinds.find(|(_, k)| *k != kind) {
        return Err(Error::Statement(format!(
            "DDL and DML cannot be mixed in one migration: {other}"
        )));
    }
    Ok(Some(kind))
}
