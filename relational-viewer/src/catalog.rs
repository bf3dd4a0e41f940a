//! Catalog reader
//!
//! Reads a snapshot of the database schema: tables and views, their columns,
//! primary keys, declared foreign keys and row counts. Foreign keys are only
//! ever taken from what the database declares; nothing is inferred from
//! column names.

use crate::config::ViewerConfig;
use crate::database::traits::{RawColumn, RawForeignKey, StorageError, StorageHandle};
use crate::planner;
use crate::schema::{
    Column, DeclaredForeignKey, RowCount, SchemaWarning, Table, TableInfo, TableKind,
    TypeAffinity,
};
use crate::{Error, OpenError, Result};
use std::collections::HashMap;

/// In-memory snapshot of a database's schema
///
/// Built once when a session opens and never modified afterwards.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    tables: Vec<Table>,
    index: HashMap<String, usize>,
    warnings: Vec<SchemaWarning>,
}

impl Catalog {
    /// Read the schema through a storage handle
    ///
    /// Metadata is read first, bounded as a whole by the query timeout; only a
    /// failure to list the schema at all is an error. Row counts follow, each
    /// under its own timeout. Per-object problems (unreadable view
    /// definitions, failed counts, unrecognized types) become warnings.
    pub async fn read<S: StorageHandle + ?Sized>(
        storage: &S,
        config: &ViewerConfig,
    ) -> std::result::Result<Self, OpenError> {
        let schema = Self::read_schema(storage, config);
        let mut catalog = tokio::time::timeout(config.query_timeout, schema)
            .await
            .map_err(|_| OpenError::Timeout)?
            .map_err(OpenError::Schema)?;

        catalog.estimate_row_counts(storage, config).await;

        tracing::debug!(
            tables = catalog.tables.len(),
            warnings = catalog.warnings.len(),
            "catalog read"
        );
        Ok(catalog)
    }

    async fn read_schema<S: StorageHandle + ?Sized>(
        storage: &S,
        config: &ViewerConfig,
    ) -> std::result::Result<Self, StorageError> {
        let objects = storage.schema_objects(config.include_views).await?;
        let mut tables = Vec::with_capacity(objects.len());
        let mut warnings = Vec::new();

        for object in objects {
            let raw_columns = match storage.columns(&object.name).await {
                Ok(columns) if !columns.is_empty() => columns,
                Ok(_) | Err(_) => {
                    tracing::warn!(table = %object.name, "skipping object with unreadable columns");
                    warnings.push(SchemaWarning::UnreadableTable {
                        table: object.name.clone(),
                    });
                    continue;
                }
            };

            let raw_foreign_keys = match object.kind {
                TableKind::Table => match storage.foreign_keys(&object.name).await {
                    Ok(foreign_keys) => foreign_keys,
                    Err(error) => {
                        tracing::warn!(
                            table = %object.name,
                            error = %error,
                            "foreign keys unreadable"
                        );
                        warnings.push(SchemaWarning::ForeignKeysUnavailable {
                            table: object.name.clone(),
                        });
                        Vec::new()
                    }
                },
                TableKind::View => Vec::new(),
            };

            let has_rowid = rowid_for(object.kind, object.sql.as_deref());
            let mut table =
                build_table(object.name, object.kind, has_rowid, raw_columns, &mut warnings);
            table.foreign_keys = group_foreign_keys(raw_foreign_keys);
            tables.push(table);
        }

        Ok(Self::from_tables(tables, warnings))
    }

    /// Fill in capped row counts; a count that fails or times out leaves the
    /// table without one
    async fn estimate_row_counts<S: StorageHandle + ?Sized>(
        &mut self,
        storage: &S,
        config: &ViewerConfig,
    ) {
        let ceiling = config.count_ceiling();

        for table in &mut self.tables {
            let statement = planner::count_statement(&table.name, &[], ceiling);
            let counted =
                tokio::time::timeout(config.query_timeout, storage.count(&statement)).await;
            table.row_count = match counted {
                Ok(Ok(count)) => Some(capped(count, ceiling)),
                Ok(Err(error)) => {
                    tracing::warn!(table = %table.name, error = %error, "row count unavailable");
                    None
                }
                Err(_) => {
                    tracing::warn!(table = %table.name, "row count timed out");
                    None
                }
            };

            if table.row_count.is_none() {
                self.warnings.push(SchemaWarning::RowCountUnavailable {
                    table: table.name.clone(),
                });
            }
        }
    }

    /// Build a catalog from tables that were already read
    pub fn from_tables(tables: Vec<Table>, warnings: Vec<SchemaWarning>) -> Self {
        let mut tables = tables;
        tables.sort_by(|a, b| a.name.cmp(&b.name));

        let index = tables
            .iter()
            .enumerate()
            .map(|(position, table)| (table.name.to_ascii_lowercase(), position))
            .collect();

        Self {
            tables,
            index,
            warnings,
        }
    }

    /// All tables, ordered by name
    pub fn list_tables(&self) -> Vec<TableInfo> {
        self.tables.iter().map(Table::info).collect()
    }

    /// Full description of one table
    pub fn describe_table(&self, name: &str) -> Result<&Table> {
        self.table(name)
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    /// Look up a table by name, ignoring ASCII case
    pub fn table(&self, name: &str) -> Option<&Table> {
        self.index
            .get(&name.to_ascii_lowercase())
            .map(|&position| &self.tables[position])
    }

    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Warnings recorded while reading the schema
    pub fn warnings(&self) -> &[SchemaWarning] {
        &self.warnings
    }
}

/// Interpret the result of a count-capped scan
pub(crate) fn capped(count: u64, ceiling: u64) -> RowCount {
    if count > ceiling {
        RowCount::AtLeast(count)
    } else {
        RowCount::Exact(count)
    }
}

#[cfg(feature = "sqlite")]
fn rowid_for(kind: TableKind, sql: Option<&str>) -> bool {
    crate::database::sqlite::has_rowid(kind, sql)
}

#[cfg(not(feature = "sqlite"))]
fn rowid_for(kind: TableKind, _sql: Option<&str>) -> bool {
    kind == TableKind::Table
}

fn build_table(
    name: String,
    kind: TableKind,
    has_rowid: bool,
    raw_columns: Vec<RawColumn>,
    warnings: &mut Vec<SchemaWarning>,
) -> Table {
    let mut primary_key_columns = Vec::new();
    let mut columns = Vec::with_capacity(raw_columns.len());

    for raw in raw_columns {
        let affinity = TypeAffinity::classify(&raw.declared_type).unwrap_or_else(|| {
            warnings.push(SchemaWarning::UnresolvableType {
                table: name.clone(),
                column: raw.name.clone(),
                declared_type: raw.declared_type.clone(),
            });
            TypeAffinity::Opaque
        });

        let is_primary_key = raw.primary_key_position > 0;
        if is_primary_key {
            primary_key_columns.push((raw.primary_key_position, raw.name.clone()));
        }

        let declared_type = Some(raw.declared_type).filter(|declared| !declared.trim().is_empty());
        columns.push(Column {
            name: raw.name,
            declared_type,
            affinity,
            nullable: !raw.not_null,
            is_primary_key,
        });
    }

    // Sort primary key columns by their pk order and extract names
    primary_key_columns.sort_by_key(|(order, _)| *order);

    Table {
        name,
        kind,
        columns,
        primary_key: primary_key_columns.into_iter().map(|(_, name)| name).collect(),
        has_rowid,
        foreign_keys: Vec::new(),
        row_count: None,
    }
}

/// Group per-column foreign key rows into one constraint per id
///
/// When any `to` column is missing the constraint refers to the target's
/// primary key as a whole.
fn group_foreign_keys(rows: Vec<RawForeignKey>) -> Vec<DeclaredForeignKey> {
    let mut constraints: Vec<(DeclaredForeignKey, bool)> = Vec::new();

    for row in rows {
        let position = match constraints.iter().position(|(fk, _)| fk.id == row.id) {
            Some(position) => position,
            None => {
                constraints.push((
                    DeclaredForeignKey {
                        id: row.id,
                        columns: Vec::new(),
                        references_table: row.table.clone(),
                        references_columns: Vec::new(),
                    },
                    false,
                ));
                constraints.len() - 1
            }
        };

        let (constraint, implicit_target) = &mut constraints[position];
        constraint.columns.push(row.from);
        match row.to {
            Some(to) if !to.is_empty() => constraint.references_columns.push(to),
            _ => *implicit_target = true,
        }
    }

    constraints
        .into_iter()
        .map(|(mut constraint, implicit_target)| {
            if implicit_target {
                constraint.references_columns.clear();
            }
            constraint
        })
        .collect()
}
