//!
//! # Schema teardown
//!
//! Spanner refuses to drop an object while another live object depends on it: a table that is
//! referenced by a foreign key or a view, a table that still has an index, or a parent table that
//! still has interleaved children. [SchemaCatalog::drop_statements] orders the drops so that every
//! dependent goes first:
//!
//! 1. views, by name;
//! 2. foreign keys, by schema, table and constraint name;
//! 3. plain indexes, by schema, table and index name;
//! 4. tables, deepest interleaved children first, then by name.
//!
//! Search indexes are read but not dropped explicitly; they go away with their owning table.

use super::{ColumnKind, SpannerSession};
use crate::error::Error;
use std::collections::HashMap;

/// Spanner allows at most seven levels of interleaving.
pub const MAX_INTERLEAVE_DEPTH: usize = 7;

pub(crate) const VIEWS_QUERY: &str = "SELECT TABLE_SCHEMA, TABLE_NAME \
    FROM information_schema.tables \
    WHERE NOT TABLE_SCHEMA IN ('INFORMATION_SCHEMA', 'SPANNER_SYS') AND TABLE_TYPE = 'VIEW' \
    ORDER BY TABLE_NAME";

pub(crate) const FOREIGN_KEYS_QUERY: &str = "SELECT TABLE_SCHEMA, TABLE_NAME, CONSTRAINT_NAME \
    FROM information_schema.table_constraints \
    WHERE CONSTRAINT_TYPE = 'FOREIGN KEY' \
    AND NOT CONSTRAINT_SCHEMA IN ('INFORMATION_SCHEMA', 'SPANNER_SYS') \
    ORDER BY TABLE_SCHEMA, TABLE_NAME, CONSTRAINT_NAME";

pub(crate) const INDEXES_QUERY: &str = "SELECT TABLE_SCHEMA, TABLE_NAME, INDEX_NAME, INDEX_TYPE \
    FROM information_schema.indexes \
    WHERE INDEX_TYPE IN ('INDEX', 'SEARCH') \
    AND NOT TABLE_SCHEMA IN ('INFORMATION_SCHEMA', 'SPANNER_SYS') \
    ORDER BY TABLE_SCHEMA, TABLE_NAME, INDEX_NAME";

pub(crate) const TABLES_QUERY: &str = "SELECT TABLE_SCHEMA, TABLE_NAME, PARENT_TABLE_NAME \
    FROM information_schema.tables \
    WHERE NOT TABLE_SCHEMA IN ('INFORMATION_SCHEMA', 'SPANNER_SYS') AND TABLE_TYPE = 'BASE TABLE' \
    ORDER BY TABLE_NAME";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogView {
    pub schema: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogForeignKey {
    pub schema: String,
    pub table: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    /// `INDEX`: a secondary index, including the ones Spanner manages for foreign keys.
    Plain,
    /// `SEARCH`: a full-text search index.
    Search,
}

impl IndexKind {
    fn from_catalog(index_type: &str) -> Option<Self> {
        match index_type {
            "INDEX" => Some(Self::Plain),
            "SEARCH" => Some(Self::Search),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogIndex {
    pub schema: String,
    pub table: String,
    pub name: String,
    pub kind: IndexKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogTable {
    pub schema: String,
    pub name: String,
    /// The table this one is interleaved in.
    pub parent: Option<String>,
}

/// A snapshot of the user objects in one database.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaCatalog {
    pub views: Vec<CatalogView>,
    pub foreign_keys: Vec<CatalogForeignKey>,
    pub indexes: Vec<CatalogIndex>,
    pub tables: Vec<CatalogTable>,
}

/// `` `name` `` in the default schema, `` `schema`.`name` `` otherwise.
fn qualified(schema: &str, name: &str) -> String {
    if schema.is_empty() {
        format!("`{name}`")
    } else {
        format!("`{schema}`.`{name}`")
    }
}

impl SchemaCatalog {
    /// Read every user view, foreign key, index and table from the live catalog.
    pub fn load<S: SpannerSession + ?Sized>(session: &S) -> Result<Self, Error> {
        let strings = |n: usize| vec![ColumnKind::String; n];

        let views = session
            .query(VIEWS_QUERY, &strings(2))
            .map_err(|e| e.context("querying views"))?
            .iter()
            .map(|row| {
                Ok(CatalogView {
                    schema: row.string(0)?.to_string(),
                    name: row.string(1)?.to_string(),
                })
            })
            .collect::<Result<Vec<_>, Error>>()?;

        let foreign_keys = session
            .query(FOREIGN_KEYS_QUERY, &strings(3))
            .map_err(|e| e.context("querying foreign keys"))?
            .iter()
            .map(|row| {
                Ok(CatalogForeignKey {
                    schema: row.string(0)?.to_string(),
                    table: row.string(1)?.to_string(),
                    name: row.string(2)?.to_string(),
                })
            })
            .collect::<Result<Vec<_>, Error>>()?;

        let mut indexes = Vec::new();
        for row in session
            .query(INDEXES_QUERY, &strings(4))
            .map_err(|e| e.context("querying indexes"))?
        {
            let index_type = row.string(3)?;
            let Some(kind) = IndexKind::from_catalog(index_type) else {
                #[cfg(feature = "tracing")]
                tracing::debug!(index_type, "Skipping index of unknown type");
                continue;
            };
            indexes.push(CatalogIndex {
                schema: row.string(0)?.to_string(),
                table: row.string(1)?.to_string(),
                name: row.string(2)?.to_string(),
                kind,
            });
        }

        let tables = session
            .query(TABLES_QUERY, &strings(3))
            .map_err(|e| e.context("querying tables"))?
            .iter()
            .map(|row| {
                Ok(CatalogTable {
                    schema: row.string(0)?.to_string(),
                    name: row.string(1)?.to_string(),
                    parent: row
                        .opt_string(2)?
                        .filter(|p| !p.is_empty())
                        .map(str::to_string),
                })
            })
            .collect::<Result<Vec<_>, Error>>()?;

        Ok(Self {
            views,
            foreign_keys,
            indexes,
            tables,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
            && self.foreign_keys.is_empty()
            && self.indexes.is_empty()
            && self.tables.is_empty()
    }

    pub fn search_indexes(&self) -> impl Iterator<Item = &CatalogIndex> {
        self.indexes.iter().filter(|i| i.kind == IndexKind::Search)
    }

    /// Number of ancestors of `table`, following parent links for at most
    /// [MAX_INTERLEAVE_DEPTH] levels. A parent that is not in the catalog ends the chain.
    pub fn depth(&self, table: &CatalogTable) -> usize {
        let by_name: HashMap<(&str, &str), &CatalogTable> = self
            .tables
            .iter()
            .map(|t| ((t.schema.as_str(), t.name.as_str()), t))
            .collect();
        depth_in(&by_name, table)
    }

    /// The statements that drop every object in the catalog, in an order Spanner accepts.
    pub fn drop_statements(&self) -> Vec<String> {
        let mut views: Vec<&CatalogView> = self.views.iter().collect();
        views.sort_by(|a, b| (&a.name, &a.schema).cmp(&(&b.name, &b.schema)));

        let mut foreign_keys: Vec<&CatalogForeignKey> = self.foreign_keys.iter().collect();
        foreign_keys.sort_by(|a, b| (&a.schema, &a.table, &a.name).cmp(&(&b.schema, &b.table, &b.name)));

        let mut indexes: Vec<&CatalogIndex> = self
            .indexes
            .iter()
            .filter(|i| i.kind == IndexKind::Plain)
            .collect();
        indexes.sort_by(|a, b| (&a.schema, &a.table, &a.name).cmp(&(&b.schema, &b.table, &b.name)));

        let by_name: HashMap<(&str, &str), &CatalogTable> = self
            .tables
            .iter()
            .map(|t| ((t.schema.as_str(), t.name.as_str()), t))
            .collect();
        let mut tables: Vec<(usize, &CatalogTable)> = self
            .tables
            .iter()
            .map(|t| (depth_in(&by_name, t), t))
            .collect();
        tables.sort_by(|(da, a), (db, b)| {
            db.cmp(da)
                .then_with(|| a.name.cmp(&b.name))
                .then_with(|| a.schema.cmp(&b.schema))
        });

        let mut statements = Vec::with_capacity(
            views.len() + foreign_keys.len() + indexes.len() + tables.len(),
        );
        statements.extend(
            views
                .iter()
                .map(|v| format!("DROP VIEW {}", qualified(&v.schema, &v.name))),
        );
        statements.extend(foreign_keys.iter().map(|fk| {
            format!(
                "ALTER TABLE {} DROP CONSTRAINT `{}`",
                qualified(&fk.schema, &fk.table),
                fk.name
            )
        }));
        // Indexes that back a foreign key disappear with the constraint, hence IF EXISTS.
        statements.extend(
            indexes
                .iter()
                .map(|i| format!("DROP INDEX IF EXISTS {}", qualified(&i.schema, &i.name))),
        );
        statements.extend(
            tables
                .iter()
                .map(|(_, t)| format!("DROP TABLE {}", qualified(&t.schema, &t.name))),
        );

        #[cfg(feature = "tracing")]
        tracing::debug!(
            views = views.len(),
            foreign_keys = foreign_keys.len(),
            indexes = indexes.len(),
            tables = tables.len(),
            search_indexes = self.search_indexes().count(),
            "Planned schema drop"
        );

        statements
    }
}

fn depth_in(by_name: &HashMap<(&str, &str), &CatalogTable>, table: &CatalogTable) -> usize {
    let mut depth = 0;
    let mut current = table;
    while depth < MAX_INTERLEAVE_DEPTH {
        let parent = current
            .parent
            .as_deref()
            .and_then(|p| by_name.get(&(current.schema.as_str(), p)));
        match parent {
            Some(parent) => {
                depth += 1;
                current = parent;
            }
            None => break,
        }
    }
    depth
}

/// Drop every view, foreign key, index and table in the database behind `session` as one DDL
/// batch. Returns the number of statements submitted; an empty schema submits nothing.
pub fn drop_all_schema_objects<S: SpannerSession + ?Sized>(session: &S) -> Result<usize, Error> {
    let catalog = SchemaCatalog::load(session)?;

    #[cfg(feature = "tracing")]
    for index in catalog.search_indexes() {
        tracing::debug!(index = %index.name, table = %index.table, "Search index is dropped with its table");
    }

    let statements = catalog.drop_statements();
    if statements.is_empty() {
        #[cfg(feature = "tracing")]
        tracing::debug!("Schema is already empty");
        return Ok(0);
    }

    #[cfg(feature = "tracing")]
    tracing::info!(statements = statements.len(), "Dropping all schema objects");

    session
        .update_ddl(&statements)
        .map_err(|e| e.context("applying drop statements"))?;
    Ok(statements.len())
}
