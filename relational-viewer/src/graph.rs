//! Relationship graph
//!
//! Resolves declared foreign keys against the catalog and indexes the
//! surviving edges for one-hop lookups in both directions. The graph may be
//! cyclic (self-references, mutual references); it is only ever consulted
//! one edge at a time and offers no traversal.

use crate::catalog::Catalog;
use crate::schema::{DanglingReason, DeclaredForeignKey, SchemaWarning, Table};
use serde::Serialize;
use std::collections::HashMap;

/// One source/target column pair of an edge
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnPair {
    pub source: String,
    pub target: String,
}

/// A resolved foreign key
///
/// Composite keys are a single edge with several pairs. All names are the
/// catalog's own spelling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForeignKeyEdge {
    pub source_table: String,
    pub target_table: String,
    pub pairs: Vec<ColumnPair>,
}

impl ForeignKeyEdge {
    pub fn is_self_reference(&self) -> bool {
        self.source_table.eq_ignore_ascii_case(&self.target_table)
    }

    pub fn source_columns(&self) -> impl Iterator<Item = &str> {
        self.pairs.iter().map(|pair| pair.source.as_str())
    }
}

/// Directed graph of inter-table references
#[derive(Debug, Clone, Default)]
pub struct RelationshipGraph {
    edges: Vec<ForeignKeyEdge>,
    outgoing: HashMap<String, Vec<usize>>,
    incoming: HashMap<String, Vec<usize>>,
    by_column: HashMap<(String, String), Vec<usize>>,
    warnings: Vec<SchemaWarning>,
}

impl RelationshipGraph {
    /// Build the graph for a catalog
    ///
    /// Never fails. A constraint that cannot be resolved is left out and
    /// reported with exactly one warning.
    pub fn build(catalog: &Catalog) -> Self {
        let mut graph = Self::default();

        for table in catalog.tables() {
            for declared in &table.foreign_keys {
                match resolve(catalog, table, declared) {
                    Ok(edge) => graph.insert(edge),
                    Err(warning) => {
                        tracing::warn!(%warning, "dropping foreign key");
                        graph.warnings.push(warning);
                    }
                }
            }
        }

        tracing::debug!(
            edges = graph.edges.len(),
            warnings = graph.warnings.len(),
            "relationship graph built"
        );
        graph
    }

    fn insert(&mut self, edge: ForeignKeyEdge) {
        let id = self.edges.len();
        let source = edge.source_table.to_ascii_lowercase();

        self.outgoing.entry(source.clone()).or_default().push(id);
        self.incoming
            .entry(edge.target_table.to_ascii_lowercase())
            .or_default()
            .push(id);
        for pair in &edge.pairs {
            self.by_column
                .entry((source.clone(), pair.source.to_ascii_lowercase()))
                .or_default()
                .push(id);
        }

        self.edges.push(edge);
    }

    pub fn edges(&self) -> &[ForeignKeyEdge] {
        &self.edges
    }

    /// Edges whose source is `table` (child → parent)
    pub fn edges_from(&self, table: &str) -> impl Iterator<Item = &ForeignKeyEdge> {
        self.lookup(&self.outgoing, &table.to_ascii_lowercase())
    }

    /// Edges whose target is `table` (parent ← children)
    pub fn edges_to(&self, table: &str) -> impl Iterator<Item = &ForeignKeyEdge> {
        self.lookup(&self.incoming, &table.to_ascii_lowercase())
    }

    /// Edges in which `table.column` is a source column
    pub fn edges_for_column(
        &self,
        table: &str,
        column: &str,
    ) -> impl Iterator<Item = &ForeignKeyEdge> {
        let key = (table.to_ascii_lowercase(), column.to_ascii_lowercase());
        self.by_column
            .get(&key)
            .into_iter()
            .flatten()
            .map(|&id| &self.edges[id])
    }

    fn lookup<'a>(
        &'a self,
        index: &'a HashMap<String, Vec<usize>>,
        key: &str,
    ) -> impl Iterator<Item = &'a ForeignKeyEdge> {
        index
            .get(key)
            .into_iter()
            .flatten()
            .map(|&id| &self.edges[id])
    }

    /// Warnings for constraints that were left out
    pub fn warnings(&self) -> &[SchemaWarning] {
        &self.warnings
    }
}

fn resolve(
    catalog: &Catalog,
    table: &Table,
    declared: &DeclaredForeignKey,
) -> Result<ForeignKeyEdge, SchemaWarning> {
    let dangling = |reason: DanglingReason| SchemaWarning::DanglingForeignKey {
        table: table.name.clone(),
        columns: declared.columns.clone(),
        references_table: declared.references_table.clone(),
        reason,
    };

    let target = catalog
        .table(&declared.references_table)
        .ok_or_else(|| dangling(DanglingReason::MissingTable))?;

    let target_columns = if declared.references_columns.is_empty() {
        if target.primary_key.is_empty() {
            return Err(dangling(DanglingReason::NoTargetKey));
        }
        target.primary_key.clone()
    } else {
        declared.references_columns.clone()
    };

    if target_columns.len() != declared.columns.len() {
        return Err(SchemaWarning::ForeignKeyArity {
            table: table.name.clone(),
            columns: declared.columns.clone(),
            references_table: target.name.clone(),
            expected: declared.columns.len(),
            found: target_columns.len(),
        });
    }

    let mut pairs = Vec::with_capacity(target_columns.len());
    for (source, target_column) in declared.columns.iter().zip(&target_columns) {
        let source = table
            .column(source)
            .ok_or_else(|| dangling(DanglingReason::MissingSourceColumn(source.clone())))?;
        let target_column = target
            .column(target_column)
            .ok_or_else(|| dangling(DanglingReason::MissingTargetColumn(target_column.clone())))?;

        pairs.push(ColumnPair {
            source: source.name.clone(),
            target: target_column.name.clone(),
        });
    }

    Ok(ForeignKeyEdge {
        source_table: table.name.clone(),
        target_table: target.name.clone(),
        pairs,
    })
}
