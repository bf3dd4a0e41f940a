//! Row materialization
//!
//! Executes a [`QueryPlan`] and turns raw values into [`Row`]s. Cells of
//! foreign key columns are annotated with a [`LinkDescriptor`] naming the
//! referenced row. Whether that row actually exists is not checked here;
//! doing so would cost one query per cell.

use crate::catalog::capped;
use crate::database::traits::{RawRowStream, StorageError, StorageHandle};
use crate::graph::RelationshipGraph;
use crate::planner::{BrowseRequest, QueryPlan};
use crate::schema::{RowCount, Value};
use crate::{Error, Result};
use futures::stream::{Stream, StreamExt};
use serde::Serialize;
use std::pin::Pin;
use std::task::{Context, Poll};

/// A single result row, cells in column order
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Row {
    cells: Vec<Cell>,
}

impl Row {
    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn into_cells(self) -> Vec<Cell> {
        self.cells
    }

    /// Cell for a column, ignoring ASCII case
    pub fn get(&self, column: &str) -> Option<&Cell> {
        self.cells
            .iter()
            .find(|cell| cell.column.eq_ignore_ascii_case(column))
    }

    pub fn value(&self, column: &str) -> Option<&Value> {
        self.get(column).map(|cell| &cell.value)
    }

    /// Plain JSON object of column name to value
    pub fn to_json(&self) -> serde_json::Value {
        let map = self
            .cells
            .iter()
            .map(|cell| (cell.column.clone(), cell.value.to_json()))
            .collect::<serde_json::Map<_, _>>();
        serde_json::Value::Object(map)
    }
}

/// One value of a row, with its relationship annotation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Cell {
    pub column: String,
    pub value: Value,
    pub reference: Reference,
}

/// Relationship annotation of a cell
///
/// `None` means the column takes part in no foreign key (or the key's
/// values are NULL). `Unchecked` means the cell refers to a row elsewhere
/// that has not been looked up yet; see [`crate::Session::follow`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", content = "links", rename_all = "camelCase")]
pub enum Reference {
    None,
    Unchecked(Vec<LinkDescriptor>),
}

impl Reference {
    pub fn links(&self) -> &[LinkDescriptor] {
        match self {
            Reference::None => &[],
            Reference::Unchecked(links) => links,
        }
    }
}

/// Where a foreign key value points
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkDescriptor {
    pub target_table: String,
    pub pairs: Vec<LinkPair>,
}

/// One column of a link; every pair must match for the target row to match
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkPair {
    pub source_column: String,
    pub target_column: String,
    pub value: Value,
}

impl LinkDescriptor {
    /// Request that browses to the referenced row
    pub fn browse_request(&self) -> BrowseRequest {
        self.pairs
            .iter()
            .fold(BrowseRequest::new(self.target_table.clone()), |request, pair| {
                request.filter(pair.target_column.clone(), pair.value.clone())
            })
    }
}

/// Per-plan link layout: which selected columns feed which edge
struct LinkTemplate {
    target_table: String,
    /// (position in the row, source column, target column)
    columns: Vec<(usize, String, String)>,
}

/// Applies link templates to raw rows
struct Annotator {
    columns: Vec<String>,
    templates: Vec<LinkTemplate>,
}

impl Annotator {
    fn new(plan: &QueryPlan, graph: &RelationshipGraph) -> Self {
        let columns = plan.columns().to_vec();
        let position = |name: &str| columns.iter().position(|c| c.eq_ignore_ascii_case(name));

        let templates = graph
            .edges_from(plan.table())
            .filter_map(|edge| {
                let columns = edge
                    .pairs
                    .iter()
                    .map(|pair| {
                        let index = position(&pair.source)?;
                        Some((index, pair.source.clone(), pair.target.clone()))
                    })
                    .collect::<Option<Vec<_>>>()?;
                Some(LinkTemplate {
                    target_table: edge.target_table.clone(),
                    columns,
                })
            })
            .collect();

        Self { columns, templates }
    }

    fn annotate(&self, values: Vec<Value>) -> Result<Row> {
        if values.len() != self.columns.len() {
            return Err(Error::Storage(StorageError::Decode));
        }

        let mut links: Vec<Vec<LinkDescriptor>> = vec![Vec::new(); values.len()];
        for template in &self.templates {
            // Composite keys only link when every part is present
            if template
                .columns
                .iter()
                .any(|(position, _, _)| values[*position].is_null())
            {
                continue;
            }

            let descriptor = LinkDescriptor {
                target_table: template.target_table.clone(),
                pairs: template
                    .columns
                    .iter()
                    .map(|(position, source, target)| LinkPair {
                        source_column: source.clone(),
                        target_column: target.clone(),
                        value: values[*position].clone(),
                    })
                    .collect(),
            };
            for (position, _, _) in &template.columns {
                links[*position].push(descriptor.clone());
            }
        }

        let cells = self
            .columns
            .iter()
            .zip(values)
            .zip(links)
            .map(|((column, value), links)| Cell {
                column: column.clone(),
                value,
                reference: if links.is_empty() {
                    Reference::None
                } else {
                    Reference::Unchecked(links)
                },
            })
            .collect();

        Ok(Row { cells })
    }
}

/// Lazy, single-use sequence of rows from one executed plan
///
/// The underlying connection is held by the stream and released as soon as
/// the stream is dropped, whether it was drained, abandoned or failed.
pub struct RowStream {
    columns: Vec<String>,
    inner: Pin<Box<dyn Stream<Item = Result<Row>> + Send>>,
}

impl RowStream {
    /// Column names of the rows this stream yields
    pub fn columns(&self) -> &[String] {
        &self.columns
    }
}

impl Stream for RowStream {
    type Item = Result<Row>;

    fn poll_next(mut self: Pin<&mut Self>, context: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(context)
    }
}

/// Execute a plan
///
/// # Arguments
///
/// * `storage` - Storage handle to run the query on
/// * `plan` - Validated plan; consumed
/// * `graph` - Relationship graph used to annotate link cells
pub fn execute<S: StorageHandle + ?Sized>(
    storage: &S,
    plan: QueryPlan,
    graph: &RelationshipGraph,
) -> RowStream {
    let annotator = Annotator::new(&plan, graph);
    let columns = annotator.columns.clone();
    let raw: RawRowStream = storage.fetch(plan.statement());

    let inner = raw.map(move |values| {
        let values = values.map_err(Error::from)?;
        annotator.annotate(values)
    });

    RowStream {
        columns,
        inner: Box::pin(inner),
    }
}

/// Count the rows a plan selects, ignoring its paging
///
/// The scan stops after `ceiling` rows; beyond that the result is
/// [`RowCount::AtLeast`].
pub async fn count_estimate<S: StorageHandle + ?Sized>(
    storage: &S,
    plan: &QueryPlan,
    ceiling: u64,
) -> Result<RowCount> {
    let count = storage.count(&plan.count_statement(ceiling)).await?;
    Ok(capped(count, ceiling))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::config::ViewerConfig;
    use crate::planner::plan;
    use crate::schema::{Column, DeclaredForeignKey, Table, TableKind, TypeAffinity};

    fn table(name: &str, columns: &[&str], foreign_keys: Vec<DeclaredForeignKey>) -> Table {
        Table {
            name: name.to_string(),
            kind: TableKind::Table,
            columns: columns
                .iter()
                .map(|column| Column {
                    name: column.to_string(),
                    declared_type: None,
                    affinity: TypeAffinity::Opaque,
                    nullable: true,
                    is_primary_key: *column == "id" || *column == "region" || *column == "number",
                })
                .collect(),
            primary_key: Vec::new(),
            has_rowid: true,
            foreign_keys,
            row_count: None,
        }
    }

    fn shipments_annotator() -> Annotator {
        let catalog = Catalog::from_tables(
            vec![
                table("orders", &["region", "number"], Vec::new()),
                table("customers", &["id"], Vec::new()),
                table(
                    "shipments",
                    &["id", "customer_id", "region", "number"],
                    vec![
                        DeclaredForeignKey {
                            id: 0,
                            columns: vec!["customer_id".into()],
                            references_table: "customers".into(),
                            references_columns: vec!["id".into()],
                        },
                        DeclaredForeignKey {
                            id: 1,
                            columns: vec!["region".into(), "number".into()],
                            references_table: "orders".into(),
                            references_columns: vec!["region".into(), "number".into()],
                        },
                    ],
                ),
            ],
            Vec::new(),
        );
        let graph = RelationshipGraph::build(&catalog);
        let request = BrowseRequest::new("shipments");
        let plan = plan(&catalog, &request, &ViewerConfig::default()).unwrap();
        Annotator::new(&plan, &graph)
    }

    #[test]
    fn test_annotates_single_and_composite_links() {
        let annotator = shipments_annotator();
        let row = annotator
            .annotate(vec![
                Value::Integer(1),
                Value::Integer(42),
                Value::from("eu"),
                Value::Integer(7),
            ])
            .unwrap();

        assert_eq!(row.get("id").unwrap().reference, Reference::None);

        let customer_links = row.get("customer_id").unwrap().reference.links();
        assert_eq!(customer_links.len(), 1);
        assert_eq!(customer_links[0].target_table, "customers");
        assert_eq!(customer_links[0].pairs[0].value, Value::Integer(42));

        let region_links = row.get("region").unwrap().reference.links();
        assert_eq!(region_links.len(), 1);
        assert_eq!(region_links[0].pairs.len(), 2);
        assert_eq!(region_links, row.get("number").unwrap().reference.links());

        let request = region_links[0].browse_request();
        assert_eq!(request.table, "orders");
        assert_eq!(request.filters.len(), 2);
        assert_eq!(request.filters[1].value, Value::Integer(7));
    }

    #[test]
    fn test_partial_composite_key_has_no_link() {
        let annotator = shipments_annotator();
        let row = annotator
            .annotate(vec![Value::Integer(1), Value::Null, Value::from("eu"), Value::Null])
            .unwrap();

        assert_eq!(row.get("customer_id").unwrap().reference, Reference::None);
        assert_eq!(row.get("region").unwrap().reference, Reference::None);
        assert_eq!(row.value("region"), Some(&Value::from("eu")));
    }

    #[test]
    fn test_mismatched_width_is_a_decode_error() {
        let annotator = shipments_annotator();
        assert!(matches!(
            annotator.annotate(vec![Value::Integer(1)]),
            Err(Error::Storage(StorageError::Decode))
        ));
    }

    #[test]
    fn test_row_to_json() {
        let annotator = shipments_annotator();
        let row = annotator
            .annotate(vec![Value::Integer(1), Value::Null, Value::from("eu"), Value::Integer(2)])
            .unwrap();
        assert_eq!(
            row.to_json(),
            serde_json::json!({ "id": 1, "customer_id": null, "region": "eu", "number": 2 })
        );
    }
}
