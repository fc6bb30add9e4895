//! An in-memory Spanner for unit tests.
//!
//! [FakeSpanner] understands the DDL and DML the migration testdata uses, answers the catalog
//! and version-table queries this crate issues, and rejects drops that Spanner would reject.
//! Every batch is atomic: a failing statement leaves the schema as it was before the batch.

use crate::error::Error;
use crate::naming::DatabasePath;
use crate::spanner::catalog::{FOREIGN_KEYS_QUERY, INDEXES_QUERY, TABLES_QUERY, VIEWS_QUERY};
use crate::spanner::driver::table_exists_query;
use crate::spanner::{ColumnKind, Row, SpannerAdmin, SpannerSession, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Punct(char),
}

impl Token {
    fn text(&self) -> String {
        match self {
            Token::Ident(s) | Token::Str(s) => s.clone(),
            Token::Punct(c) => c.to_string(),
        }
    }
}

fn syntax_error(sql: &str, message: &str) -> Error {
    Error::Spanner(format!("Syntax error: {message}: {sql}"))
}

fn tokenize(sql: &str) -> Result<Vec<Token>, Error> {
    let mut tokens = Vec::new();
    let mut chars = sql.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            c if c.is_whitespace() => {}
            '\'' | '"' | '`' => {
                let mut text = String::new();
                let mut closed = false;
                while let Some(c) = chars.next() {
                    if c == '\\' {
                        if let Some(escaped) = chars.next() {
                            text.push(escaped);
                        }
                    } else if c == ch {
                        closed = true;
                        break;
                    } else {
                        text.push(c);
                    }
                }
                if !closed {
                    return Err(syntax_error(sql, "unterminated quote"));
                }
                tokens.push(if ch == '`' {
                    Token::Ident(text)
                } else {
                    Token::Str(text)
                });
            }
            c if c.is_alphanumeric() || c == '_' => {
                let mut ident = c.to_string();
                while let Some(&next) = chars.peek() {
                    if next.is_alphanumeric() || next == '_' {
                        ident.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident));
            }
            c => tokens.push(Token::Punct(c)),
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    sql: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(sql: &'a str) -> Result<Self, Error> {
        Ok(Self {
            sql,
            tokens: tokenize(sql)?,
            pos: 0,
        })
    }

    fn error(&self, message: &str) -> Error {
        syntax_error(self.sql, message)
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(self.tokens.get(self.pos), Some(Token::Ident(s)) if s.eq_ignore_ascii_case(keyword))
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        let found = self.peek_keyword(keyword);
        if found {
            self.pos += 1;
        }
        found
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<(), Error> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            Err(self.error(&format!("expected {keyword}")))
        }
    }

    fn eat_punct(&mut self, punct: char) -> bool {
        let found = self.tokens.get(self.pos) == Some(&Token::Punct(punct));
        if found {
            self.pos += 1;
        }
        found
    }

    /// `name` or `schema.name`.
    fn name(&mut self) -> Result<String, Error> {
        let mut name = match self.tokens.get(self.pos) {
            Some(Token::Ident(s)) => s.clone(),
            _ => return Err(self.error("expected a name")),
        };
        self.pos += 1;
        if self.eat_punct('.') {
            match self.tokens.get(self.pos) {
                Some(Token::Ident(s)) => {
                    name = format!("{name}.{s}");
                    self.pos += 1;
                }
                _ => return Err(self.error("expected a name after '.'")),
            }
        }
        Ok(name)
    }

    /// The tokens between a `(` and its matching `)`.
    fn group(&mut self) -> Result<Vec<Token>, Error> {
        if !self.eat_punct('(') {
            return Err(self.error("expected '('"));
        }
        let start = self.pos;
        let mut depth = 1;
        while let Some(token) = self.tokens.get(self.pos) {
            self.pos += 1;
            match token {
                Token::Punct('(') => depth += 1,
                Token::Punct(')') => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(self.tokens[start..self.pos - 1].to_vec());
                    }
                }
                _ => {}
            }
        }
        Err(self.error("unbalanced parentheses"))
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn expect_end(&self) -> Result<(), Error> {
        if self.at_end() {
            Ok(())
        } else {
            Err(self.error(&format!("unexpected {}", self.tokens[self.pos].text())))
        }
    }

    fn skip_rest(&mut self) {
        self.pos = self.tokens.len();
    }
}

fn not_found(kind: &str, name: &str) -> Error {
    Error::Spanner(format!("{kind} not found: {name}"))
}

fn failed_precondition(message: String) -> Error {
    Error::Spanner(format!("FailedPrecondition: {message}"))
}

fn string(s: &str) -> Value {
    Value::String(s.to_string())
}

fn split_name(key: &str) -> (String, String) {
    match key.split_once('.') {
        Some((schema, name)) => (schema.to_string(), name.to_string()),
        None => (String::new(), key.to_string()),
    }
}

#[derive(Debug, Clone, Default)]
struct FakeTable {
    parent: Option<String>,
    rows: Vec<BTreeMap<String, String>>,
}

#[derive(Debug, Clone)]
struct FakeIndex {
    table: String,
    search: bool,
}

#[derive(Debug, Clone)]
struct FakeForeignKey {
    table: String,
    referenced: String,
}

#[derive(Debug, Clone, Default)]
struct Schema {
    tables: BTreeMap<String, FakeTable>,
    indexes: BTreeMap<String, FakeIndex>,
    /// View name to the tables and views it selects from.
    views: BTreeMap<String, Vec<String>>,
    foreign_keys: BTreeMap<String, FakeForeignKey>,
}

impl Schema {
    fn name_taken(&self, name: &str) -> bool {
        self.tables.contains_key(name)
            || self.indexes.contains_key(name)
            || self.views.contains_key(name)
            || self.foreign_keys.contains_key(name)
    }

    fn require_table(&self, name: &str) -> Result<(), Error> {
        if self.tables.contains_key(name) {
            Ok(())
        } else {
            Err(not_found("Table", name))
        }
    }

    fn add_foreign_key(
        &mut self,
        name: Option<String>,
        table: &str,
        referenced: String,
    ) -> Result<(), Error> {
        if referenced != table {
            self.require_table(&referenced)?;
        }
        let name = name.unwrap_or_else(|| {
            format!("FK_{table}_{referenced}_{}", self.foreign_keys.len() + 1)
        });
        if self.name_taken(&name) {
            return Err(Error::Spanner(format!("Duplicate name in schema: {name}")));
        }
        self.foreign_keys.insert(
            name,
            FakeForeignKey {
                table: table.to_string(),
                referenced,
            },
        );
        Ok(())
    }

    fn apply_ddl(&mut self, sql: &str) -> Result<(), Error> {
        let mut p = Parser::new(sql)?;
        if p.eat_keyword("CREATE") {
            if p.eat_keyword("OR") {
                p.expect_keyword("REPLACE")?;
            }
            p.eat_keyword("UNIQUE");
            p.eat_keyword("NULL_FILTERED");
            if p.eat_keyword("TABLE") {
                self.create_table(&mut p)
            } else if p.eat_keyword("INDEX") {
                self.create_index(&mut p, false)
            } else if p.eat_keyword("SEARCH") {
                p.expect_keyword("INDEX")?;
                self.create_index(&mut p, true)
            } else if p.eat_keyword("VIEW") {
                self.create_view(&mut p)
            } else {
                Err(p.error("unsupported CREATE"))
            }
        } else if p.eat_keyword("ALTER") {
            p.expect_keyword("TABLE")?;
            self.alter_table(&mut p)
        } else if p.eat_keyword("DROP") {
            self.drop(&mut p)
        } else {
            Err(p.error("unsupported statement"))
        }
    }

    fn create_table(&mut self, p: &mut Parser<'_>) -> Result<(), Error> {
        let name = p.name()?;
        if self.name_taken(&name) {
            return Err(Error::Spanner(format!("Duplicate name in schema: {name}")));
        }
        let body = p.group()?;
        p.expect_keyword("PRIMARY")?;
        p.expect_keyword("KEY")?;
        p.group()?;

        let mut parent = None;
        if p.eat_punct(',') {
            p.expect_keyword("INTERLEAVE")?;
            p.expect_keyword("IN")?;
            p.eat_keyword("PARENT");
            let parent_name = p.name()?;
            self.require_table(&parent_name)?;
            if p.eat_keyword("ON") {
                p.expect_keyword("DELETE")?;
                if !p.eat_keyword("CASCADE") {
                    p.expect_keyword("NO")?;
                    p.expect_keyword("ACTION")?;
                }
            }
            parent = Some(parent_name);
        }
        p.expect_end()?;

        let mut foreign_keys = Vec::new();
        for (i, token) in body.iter().enumerate() {
            if !matches!(token, Token::Ident(s) if s.eq_ignore_ascii_case("FOREIGN")) {
                continue;
            }
            let constraint = match (i.checked_sub(2).map(|j| &body[j]), i.checked_sub(1).map(|j| &body[j])) {
                (Some(Token::Ident(kw)), Some(Token::Ident(n))) if kw.eq_ignore_ascii_case("CONSTRAINT") => {
                    Some(n.clone())
                }
                _ => None,
            };
            let referenced = body[i..]
                .iter()
                .position(|t| matches!(t, Token::Ident(s) if s.eq_ignore_ascii_case("REFERENCES")))
                .and_then(|r| body.get(i + r + 1))
                .map(Token::text)
                .ok_or_else(|| p.error("FOREIGN KEY without REFERENCES"))?;
            foreign_keys.push((constraint, referenced));
        }

        self.tables.insert(
            name.clone(),
            FakeTable {
                parent,
                rows: Vec::new(),
            },
        );
        for (constraint, referenced) in foreign_keys {
            self.add_foreign_key(constraint, &name, referenced)?;
        }
        Ok(())
    }

    fn create_index(&mut self, p: &mut Parser<'_>, search: bool) -> Result<(), Error> {
        let name = p.name()?;
        if self.name_taken(&name) {
            return Err(Error::Spanner(format!("Duplicate name in schema: {name}")));
        }
        p.expect_keyword("ON")?;
        let table = p.name()?;
        self.require_table(&table)?;
        p.group()?;
        // STORING, INTERLEAVE IN and OPTIONS clauses do not affect the catalog.
        p.skip_rest();

        self.indexes.insert(name, FakeIndex { table, search });
        Ok(())
    }

    fn create_view(&mut self, p: &mut Parser<'_>) -> Result<(), Error> {
        let name = p.name()?;
        if self.tables.contains_key(&name) || self.indexes.contains_key(&name) {
            return Err(Error::Spanner(format!("Duplicate name in schema: {name}")));
        }
        if p.eat_keyword("SQL") {
            p.expect_keyword("SECURITY")?;
            p.expect_keyword("INVOKER")?;
        }
        p.expect_keyword("AS")?;

        let mut dependencies = Vec::new();
        while !p.at_end() {
            if p.eat_keyword("FROM") || p.eat_keyword("JOIN") {
                let source = p.name()?;
                if !self.tables.contains_key(&source) && !self.views.contains_key(&source) {
                    return Err(not_found("Table", &source));
                }
                dependencies.push(source);
            } else {
                p.pos += 1;
            }
        }
        if dependencies.is_empty() {
            return Err(p.error("view must select from a table"));
        }

        self.views.insert(name, dependencies);
        Ok(())
    }

    fn alter_table(&mut self, p: &mut Parser<'_>) -> Result<(), Error> {
        let table = p.name()?;
        self.require_table(&table)?;

        if p.eat_keyword("ADD") {
            let constraint = if p.eat_keyword("CONSTRAINT") {
                Some(p.name()?)
            } else {
                None
            };
            if p.eat_keyword("FOREIGN") {
                p.expect_keyword("KEY")?;
                p.group()?;
                p.expect_keyword("REFERENCES")?;
                let referenced = p.name()?;
                p.group()?;
                p.skip_rest();
                return self.add_foreign_key(constraint, &table, referenced);
            }
            if constraint.is_some() {
                return Err(p.error("unsupported constraint"));
            }
            p.eat_keyword("COLUMN");
            p.name()?;
            p.skip_rest();
            Ok(())
        } else if p.eat_keyword("DROP") {
            if p.eat_keyword("CONSTRAINT") {
                let name = p.name()?;
                p.expect_end()?;
                match self.foreign_keys.get(&name) {
                    Some(fk) if fk.table == table => {
                        self.foreign_keys.remove(&name);
                        Ok(())
                    }
                    _ => Err(not_found("Constraint", &name)),
                }
            } else {
                p.eat_keyword("COLUMN");
                p.name()?;
                p.expect_end()
            }
        } else if p.eat_keyword("ALTER") {
            p.skip_rest();
            Ok(())
        } else {
            Err(p.error("unsupported ALTER TABLE"))
        }
    }

    fn drop(&mut self, p: &mut Parser<'_>) -> Result<(), Error> {
        if p.eat_keyword("VIEW") {
            let name = p.name()?;
            p.expect_end()?;
            if self.views.remove(&name).is_none() {
                return Err(not_found("View", &name));
            }
            return Ok(());
        }

        if p.eat_keyword("SEARCH") || p.peek_keyword("INDEX") {
            p.expect_keyword("INDEX")?;
            let if_exists = p.eat_keyword("IF");
            if if_exists {
                p.expect_keyword("EXISTS")?;
            }
            let name = p.name()?;
            p.expect_end()?;
            if self.indexes.remove(&name).is_none() && !if_exists {
                return Err(not_found("Index", &name));
            }
            return Ok(());
        }

        p.expect_keyword("TABLE")?;
        let name = p.name()?;
        p.expect_end()?;
        self.require_table(&name)?;

        if let Some((child, _)) = self
            .tables
            .iter()
            .find(|(_, t)| t.parent.as_deref() == Some(name.as_str()))
        {
            return Err(failed_precondition(format!(
                "Cannot drop table {name} with interleaved tables: {child}"
            )));
        }
        if let Some((index, _)) = self
            .indexes
            .iter()
            .find(|(_, i)| !i.search && i.table == name)
        {
            return Err(failed_precondition(format!(
                "Cannot drop table {name} with indices: {index}"
            )));
        }
        if let Some((fk, _)) = self
            .foreign_keys
            .iter()
            .find(|(_, fk)| fk.table == name || fk.referenced == name)
        {
            return Err(failed_precondition(format!(
                "Cannot drop table {name}: it is referenced by foreign key {fk}"
            )));
        }
        if let Some((view, _)) = self.views.iter().find(|(_, deps)| deps.contains(&name)) {
            return Err(failed_precondition(format!(
                "Cannot drop table {name} on which there are dependent views: {view}"
            )));
        }

        self.indexes.retain(|_, i| i.table != name);
        self.tables.remove(&name);
        Ok(())
    }

    fn apply_dml(&mut self, sql: &str) -> Result<(), Error> {
        let mut p = Parser::new(sql)?;
        if p.eat_keyword("INSERT") {
            p.eat_keyword("INTO");
            let name = p.name()?;
            let columns: Vec<String> = split_values(&p.group()?)
                .into_iter()
                .map(|c| c.concat())
                .collect();
            p.expect_keyword("VALUES")?;

            let mut rows: Vec<BTreeMap<String, String>> = Vec::new();
            loop {
                let values = split_values(&p.group()?);
                if values.len() != columns.len() {
                    return Err(p.error("column and value counts differ"));
                }
                rows.push(
                    columns
                        .iter()
                        .cloned()
                        .zip(values.into_iter().map(|v| v.concat()))
                        .collect(),
                );
                if !p.eat_punct(',') {
                    break;
                }
            }
            p.expect_end()?;

            let table = self.tables.get_mut(&name).ok_or_else(|| not_found("Table", &name))?;
            table.rows.extend(rows);
            Ok(())
        } else if p.eat_keyword("DELETE") {
            p.eat_keyword("FROM");
            let name = p.name()?;
            p.expect_keyword("WHERE")?;
            p.expect_keyword("true")?;
            p.expect_end()?;

            let table = self.tables.get_mut(&name).ok_or_else(|| not_found("Table", &name))?;
            table.rows.clear();
            Ok(())
        } else {
            Err(p.error("unsupported DML"))
        }
    }
}

/// Split the tokens of a parenthesized list on top-level commas.
fn split_values(tokens: &[Token]) -> Vec<Vec<String>> {
    let mut values = vec![Vec::new()];
    let mut depth = 0;
    for token in tokens {
        match token {
            Token::Punct('(') => depth += 1,
            Token::Punct(')') => depth -= 1,
            Token::Punct(',') if depth == 0 => {
                values.push(Vec::new());
                continue;
            }
            _ => {}
        }
        if let Some(last) = values.last_mut() {
            last.push(token.text());
        }
    }
    values
}

#[derive(Debug, Default)]
struct State {
    schema: Schema,
    ddl_batches: Vec<Vec<String>>,
    dml_batches: Vec<Vec<String>>,
    closed: bool,
}

/// One in-memory database.
#[derive(Debug, Default)]
pub(crate) struct FakeSpanner {
    state: Mutex<State>,
}

impl FakeSpanner {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn open_state(&self) -> Result<MutexGuard<'_, State>, Error> {
        let state = self.state();
        if state.closed {
            return Err(Error::Spanner("session is closed".to_string()));
        }
        Ok(state)
    }

    /// DDL batches that were applied, in order.
    pub(crate) fn ddl_batches(&self) -> Vec<Vec<String>> {
        self.state().ddl_batches.clone()
    }

    /// DML batches that were committed, in order.
    pub(crate) fn dml_batches(&self) -> Vec<Vec<String>> {
        self.state().dml_batches.clone()
    }

    pub(crate) fn has_table(&self, name: &str) -> bool {
        self.state().schema.tables.contains_key(name)
    }

    pub(crate) fn row_count(&self, table: &str) -> usize {
        self.state()
            .schema
            .tables
            .get(table)
            .map_or(0, |t| t.rows.len())
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state().closed
    }

    fn catalog_rows(schema: &Schema, sql: &str) -> Option<Vec<Row>> {
        let rows = if sql == VIEWS_QUERY {
            schema
                .views
                .keys()
                .map(|key| {
                    let (s, n) = split_name(key);
                    Row::new(vec![string(&s), string(&n)])
                })
                .collect()
        } else if sql == FOREIGN_KEYS_QUERY {
            schema
                .foreign_keys
                .iter()
                .map(|(name, fk)| {
                    let (s, t) = split_name(&fk.table);
                    Row::new(vec![string(&s), string(&t), string(name)])
                })
                .collect()
        } else if sql == INDEXES_QUERY {
            schema
                .indexes
                .iter()
                .map(|(key, index)| {
                    let (s, t) = split_name(&index.table);
                    let (_, n) = split_name(key);
                    let kind = if index.search { "SEARCH" } else { "INDEX" };
                    Row::new(vec![string(&s), string(&t), string(&n), string(kind)])
                })
                .collect()
        } else if sql == TABLES_QUERY {
            schema
                .tables
                .iter()
                .map(|(key, table)| {
                    let (s, n) = split_name(key);
                    let parent = table
                        .parent
                        .as_deref()
                        .map_or(Value::Null, |p| string(&split_name(p).1));
                    Row::new(vec![string(&s), string(&n), parent])
                })
                .collect()
        } else {
            return None;
        };
        Some(rows)
    }

    fn version_rows(schema: &Schema, sql: &str) -> Option<Result<Vec<Row>, Error>> {
        let table = sql
            .strip_prefix("SELECT Version, Dirty FROM `")?
            .strip_suffix("` LIMIT 1")?;
        let Some(t) = schema.tables.get(table) else {
            return Some(Err(not_found("Table", table)));
        };
        let rows = t
            .rows
            .first()
            .map(|row| {
                let version = row.get("Version").and_then(|v| v.parse::<i64>().ok());
                let dirty = row.get("Dirty").map(|d| d.eq_ignore_ascii_case("true"));
                match (version, dirty) {
                    (Some(v), Some(d)) => Ok(vec![Row::new(vec![Value::Int64(v), Value::Bool(d)])]),
                    _ => Err(Error::Spanner(format!("malformed version row in {table}"))),
                }
            })
            .unwrap_or(Ok(Vec::new()));
        Some(rows)
    }
}

impl SpannerSession for FakeSpanner {
    fn query(&self, sql: &str, _columns: &[ColumnKind]) -> Result<Vec<Row>, Error> {
        let state = self.open_state()?;
        let schema = &state.schema;

        if let Some(rows) = Self::catalog_rows(schema, sql) {
            return Ok(rows);
        }
        let exists_query = table_exists_query("");
        let exists_prefix = exists_query.strip_suffix('\'').unwrap_or(&exists_query);
        if let Some(name) = sql
            .strip_prefix(exists_prefix)
            .and_then(|rest| rest.strip_suffix('\''))
        {
            return Ok(if schema.tables.contains_key(name) {
                vec![Row::new(vec![Value::String(name.to_string())])]
            } else {
                Vec::new()
            });
        }
        if let Some(rows) = Self::version_rows(schema, sql) {
            return rows;
        }

        let mut p = Parser::new(sql)?;
        if p.eat_keyword("SELECT") && p.eat_keyword("COUNT") {
            p.group()?;
            p.expect_keyword("FROM")?;
            let name = p.name()?;
            p.expect_end()?;
            let table = schema.tables.get(&name).ok_or_else(|| not_found("Table", &name))?;
            let count = i64::try_from(table.rows.len()).unwrap_or(i64::MAX);
            return Ok(vec![Row::new(vec![Value::Int64(count)])]);
        }
        Err(Error::Spanner(format!("unsupported query: {sql}")))
    }

    fn execute_dml(&self, statements: &[String]) -> Result<(), Error> {
        let mut state = self.open_state()?;
        let mut schema = state.schema.clone();
        for sql in statements {
            schema.apply_dml(sql)?;
        }
        state.schema = schema;
        state.dml_batches.push(statements.to_vec());
        Ok(())
    }

    fn update_ddl(&self, statements: &[String]) -> Result<(), Error> {
        let mut state = self.open_state()?;
        let mut schema = state.schema.clone();
        for sql in statements {
            schema.apply_ddl(sql)?;
        }
        state.schema = schema;
        state.ddl_batches.push(statements.to_vec());
        Ok(())
    }

    fn close(&self) -> Result<(), Error> {
        self.state().closed = true;
        Ok(())
    }
}

impl SpannerSession for Arc<FakeSpanner> {
    fn query(&self, sql: &str, columns: &[ColumnKind]) -> Result<Vec<Row>, Error> {
        (**self).query(sql, columns)
    }

    fn execute_dml(&self, statements: &[String]) -> Result<(), Error> {
        (**self).execute_dml(statements)
    }

    fn update_ddl(&self, statements: &[String]) -> Result<(), Error> {
        (**self).update_ddl(statements)
    }

    fn close(&self) -> Result<(), Error> {
        (**self).close()
    }
}

/// Instances and databases held in memory. Sessions on one database share its state.
#[derive(Debug, Default)]
pub(crate) struct FakeAdmin {
    instances: Mutex<BTreeSet<String>>,
    databases: Mutex<BTreeMap<String, Arc<FakeSpanner>>>,
    closed: Mutex<bool>,
}

impl FakeAdmin {
    fn ensure_open(&self) -> Result<(), Error> {
        if *self.closed.lock().unwrap_or_else(PoisonError::into_inner) {
            return Err(Error::Spanner("admin client is closed".to_string()));
        }
        Ok(())
    }

    pub(crate) fn has_database(&self, path: &DatabasePath) -> bool {
        self.databases
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&path.to_string())
    }
}

impl SpannerAdmin for FakeAdmin {
    type Session = Arc<FakeSpanner>;

    fn create_instance(&self, project_id: &str, instance_id: &str) -> Result<(), Error> {
        self.ensure_open()?;
        let path = format!("projects/{project_id}/instances/{instance_id}");
        let mut instances = self.instances.lock().unwrap_or_else(PoisonError::into_inner);
        if !instances.insert(path.clone()) {
            return Err(Error::Spanner(format!("AlreadyExists: {path}")));
        }
        Ok(())
    }

    fn create_database(&self, path: &DatabasePath) -> Result<(), Error> {
        self.ensure_open()?;
        let instances = self.instances.lock().unwrap_or_else(PoisonError::into_inner);
        if !instances.contains(&path.instance_path()) {
            return Err(not_found("Instance", &path.instance_path()));
        }
        let mut databases = self.databases.lock().unwrap_or_else(PoisonError::into_inner);
        if databases.contains_key(&path.to_string()) {
            return Err(Error::Spanner(format!("AlreadyExists: {path}")));
        }
        databases.insert(path.to_string(), Arc::default());
        Ok(())
    }

    fn drop_database(&self, path: &DatabasePath) -> Result<(), Error> {
        self.ensure_open()?;
        self.databases
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&path.to_string())
            .map(|_| ())
            .ok_or_else(|| not_found("Database", &path.to_string()))
    }

    fn connect(&self, path: &DatabasePath) -> Result<Arc<FakeSpanner>, Error> {
        self.ensure_open()?;
        self.databases
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&path.to_string())
            .cloned()
            .ok_or_else(|| not_found("Database", &path.to_string()))
    }

    fn close(&self) -> Result<(), Error> {
        *self.closed.lock().unwrap_or_else(PoisonError::into_inner) = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_admin_keeps_open_sessions() {
        let admin = FakeAdmin::default();
        admin.create_instance("unit-testing", "test-instance").unwrap();
        let path = DatabasePath::new("unit-testing", "test-instance", "orders");
        admin.create_database(&path).unwrap();
        let session = admin.connect(&path).unwrap();

        admin.close().unwrap();
        let err = admin.connect(&path).unwrap_err();
        assert!(err.to_string().contains("admin client is closed"));
        assert!(admin.drop_database(&path).is_err());

        session
            .update_ddl(&["CREATE TABLE A (Id INT64 NOT NULL) PRIMARY KEY (Id)".to_string()])
            .unwrap();
        assert!(session.has_table("A"));
    }

    #[test]
    fn interleaved_parent_cannot_be_dropped_first() {
        let spanner = FakeSpanner::default();
        spanner
            .update_ddl(&[
                "CREATE TABLE Singers (SingerId INT64 NOT NULL) PRIMARY KEY (SingerId)".to_string(),
                "CREATE TABLE Albums (SingerId INT64 NOT NULL, AlbumId INT64 NOT NULL) PRIMARY KEY (SingerId, AlbumId), INTERLEAVE IN PARENT Singers ON DELETE CASCADE".to_string(),
            ])
            .unwrap();

        assert!(spanner.update_ddl(&["DROP TABLE Singers".to_string()]).is_err());
        spanner
            .update_ddl(&["DROP TABLE Albums".to_string(), "DROP TABLE Singers".to_string()])
            .unwrap();
        assert!(!spanner.has_table("Singers"));
    }

    #[test]
    fn failed_batch_changes_nothing() {
        let spanner = FakeSpanner::default();
        let err = spanner
            .update_ddl(&[
                "CREATE TABLE A (Id INT64 NOT NULL) PRIMARY KEY (Id)".to_string(),
                "CREATE TABLE B (Id INT64 NOT NULL PRIMARY KEY (Id)".to_string(),
            ])
            .unwrap_err();

        assert!(err.to_string().contains("Syntax error"));
        assert!(!spanner.has_table("A"));
        assert!(spanner.ddl_batches().is_empty());
    }

    #[test]
    fn dml_requires_the_table() {
        let spanner = FakeSpanner::default();
        assert!(spanner
            .execute_dml(&["INSERT INTO Users (Id) VALUES ('1')".to_string()])
            .is_err());

        spanner
            .update_ddl(&["CREATE TABLE Users (Id STRING(36) NOT NULL) PRIMARY KEY (Id)".to_string()])
            .unwrap();
        spanner
            .execute_dml(&["INSERT INTO Users (Id) VALUES ('1'), ('2')".to_string()])
            .unwrap();
        assert_eq!(spanner.row_count("Users"), 2);

        let rows = spanner
            .query("SELECT COUNT(*) FROM Users", &[ColumnKind::Int64])
            .unwrap();
        assert_eq!(rows[0].int64(0).unwrap(), 2);
    }
}
