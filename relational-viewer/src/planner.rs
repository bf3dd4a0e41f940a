//! Query planning
//!
//! Turns a [`BrowseRequest`], which comes from an untrusted caller, into a
//! [`QueryPlan`]. Every identifier in the plan is the catalog's own spelling
//! of a table or column that was found in the live schema; every value ends
//! up as a bound parameter. No part of the request is ever pasted into SQL
//! text.

use crate::catalog::Catalog;
use crate::config::ViewerConfig;
use crate::database::traits::SqlStatement;
use crate::schema::{Table, Value};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A structured request for one page of a table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowseRequest {
    /// Table (or view) to browse
    pub table: String,

    /// Equality filters, combined with AND
    #[serde(default)]
    pub filters: Vec<Filter>,

    /// Column to sort by; the primary key (or rowid) when absent
    #[serde(default)]
    pub sort_by: Option<String>,

    /// Sort order
    #[serde(default)]
    pub sort_order: SortOrder,

    /// Zero-based page index; negative values are treated as zero
    #[serde(default)]
    pub page: i64,

    /// Rows per page; the configured default when absent
    #[serde(default)]
    pub page_size: Option<i64>,
}

impl BrowseRequest {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            filters: Vec::new(),
            sort_by: None,
            sort_order: SortOrder::Ascending,
            page: 0,
            page_size: None,
        }
    }

    /// Add an equality filter; [`Value::Null`] matches NULL cells
    pub fn filter(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(Filter {
            column: column.into(),
            value: value.into(),
        });
        self
    }

    pub fn sort_by(mut self, column: impl Into<String>, order: SortOrder) -> Self {
        self.sort_by = Some(column.into());
        self.sort_order = order;
        self
    }

    pub fn page(mut self, page: i64) -> Self {
        self.page = page;
        self
    }

    pub fn page_size(mut self, page_size: i64) -> Self {
        self.page_size = Some(page_size);
        self
    }
}

/// Column equality filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Filter {
    pub column: String,
    pub value: Value,
}

/// Sort order for row queries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

impl SortOrder {
    fn keyword(self) -> &'static str {
        match self {
            SortOrder::Ascending => "ASC",
            SortOrder::Descending => "DESC",
        }
    }
}

/// Comparison applied by a predicate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Operator {
    /// `column = ?`
    Equals,
    /// `column IS NULL`; the predicate's value is [`Value::Null`] and is not bound
    IsNull,
}

/// A validated filter, ready for parameter binding
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Predicate {
    pub column: String,
    pub operator: Operator,
    pub value: Value,
}

/// One term of the ORDER BY clause
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum OrderTerm {
    Column(String),
    /// The implicit rowid, under an alias no declared column shadows
    Rowid(&'static str),
}

/// Reasons a browse request is rejected
///
/// Checks run in a fixed order and the first failure wins.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("unknown table '{0}'")]
    UnknownTable(String),

    #[error("unknown filter column '{column}' in table '{table}'")]
    UnknownFilterColumn { table: String, column: String },

    #[error("unknown sort column '{column}' in table '{table}'")]
    UnknownSortColumn { table: String, column: String },

    #[error("column '{column}' in table '{table}' is NOT NULL and cannot be filtered for NULL")]
    NullFilterOnRequiredColumn { table: String, column: String },
}

/// A validated, parameterizable read query for one page of a table
///
/// A plan is consumed when executed; build a new one to run the query again.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryPlan {
    table: String,
    columns: Vec<String>,
    predicates: Vec<Predicate>,
    order: Vec<OrderTerm>,
    sort_order: SortOrder,
    page: u64,
    page_size: u64,
}

/// Validate a request against the catalog and build its plan
///
/// # Arguments
///
/// * `catalog` - Schema snapshot the request is checked against
/// * `request` - Untrusted browse request
/// * `config` - Page size defaults and bounds
pub fn plan(
    catalog: &Catalog,
    request: &BrowseRequest,
    config: &ViewerConfig,
) -> Result<QueryPlan, ValidationError> {
    let table = catalog
        .table(&request.table)
        .ok_or_else(|| ValidationError::UnknownTable(request.table.clone()))?;

    let mut resolved_filters = Vec::with_capacity(request.filters.len());
    for filter in &request.filters {
        let column = table.column(&filter.column).ok_or_else(|| {
            ValidationError::UnknownFilterColumn {
                table: table.name.clone(),
                column: filter.column.clone(),
            }
        })?;
        resolved_filters.push((column, &filter.value));
    }

    let sort_column = match &request.sort_by {
        Some(name) => Some(
            table
                .column(name)
                .ok_or_else(|| ValidationError::UnknownSortColumn {
                    table: table.name.clone(),
                    column: name.clone(),
                })?
                .name
                .clone(),
        ),
        None => None,
    };

    let mut predicates = Vec::with_capacity(resolved_filters.len());
    for (column, value) in resolved_filters {
        let operator = if value.is_null() {
            if !column.nullable {
                return Err(ValidationError::NullFilterOnRequiredColumn {
                    table: table.name.clone(),
                    column: column.name.clone(),
                });
            }
            Operator::IsNull
        } else {
            Operator::Equals
        };
        predicates.push(Predicate {
            column: column.name.clone(),
            operator,
            value: value.clone(),
        });
    }

    let page_size = request
        .page_size
        .map(|size| size.max(1) as u64)
        .unwrap_or(config.default_page_size)
        .clamp(1, config.page_size_bound());
    let page = request.page.max(0) as u64;

    Ok(QueryPlan {
        table: table.name.clone(),
        columns: table.column_names(),
        predicates,
        order: order_terms(table, sort_column),
        sort_order: request.sort_order,
        page,
        page_size,
    })
}

/// ORDER BY terms: the requested column, then the primary key (or rowid) so
/// that page boundaries are stable
fn order_terms(table: &Table, sort_column: Option<String>) -> Vec<OrderTerm> {
    let mut terms: Vec<OrderTerm> = sort_column.into_iter().map(OrderTerm::Column).collect();

    if table.primary_key.is_empty() {
        if let Some(alias) = rowid_alias(table) {
            terms.push(OrderTerm::Rowid(alias));
        }
    } else {
        for key_column in &table.primary_key {
            let term = OrderTerm::Column(key_column.clone());
            if !terms.contains(&term) {
                terms.push(term);
            }
        }
    }

    terms
}

/// First rowid alias not taken by a declared column; `None` for tables
/// without a rowid or with every alias shadowed
fn rowid_alias(table: &Table) -> Option<&'static str> {
    if !table.has_rowid {
        return None;
    }
    ["rowid", "_rowid_", "oid"]
        .into_iter()
        .find(|alias| table.column(alias).is_none())
}

impl QueryPlan {
    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    pub fn order(&self) -> &[OrderTerm] {
        &self.order
    }

    pub fn sort_order(&self) -> SortOrder {
        self.sort_order
    }

    pub fn page(&self) -> u64 {
        self.page
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    pub fn limit(&self) -> u64 {
        self.page_size
    }

    pub fn offset(&self) -> u64 {
        self.page.saturating_mul(self.page_size)
    }

    /// The same query, targeting another page
    pub fn at_page(mut self, page: u64) -> Self {
        self.page = page;
        self
    }

    /// Render the page query
    pub fn statement(&self) -> SqlStatement {
        let column_list = self
            .columns
            .iter()
            .map(|column| quote_identifier(column))
            .collect::<Vec<_>>()
            .join(", ");

        let (where_clause, mut params) = build_where_clause(&self.predicates);
        let order_clause = self.build_order_clause();

        let sql = format!(
            "SELECT {} FROM {}{}{} LIMIT ? OFFSET ?",
            column_list,
            quote_identifier(&self.table),
            where_clause,
            order_clause
        );
        params.push(to_parameter(self.limit()));
        params.push(to_parameter(self.offset()));

        SqlStatement { sql, params }
    }

    /// Render the count-capped scan over this plan's rows, ignoring paging
    pub fn count_statement(&self, ceiling: u64) -> SqlStatement {
        count_statement(&self.table, &self.predicates, ceiling)
    }

    fn build_order_clause(&self) -> String {
        if self.order.is_empty() {
            return String::new();
        }

        let direction = self.sort_order.keyword();
        let terms = self
            .order
            .iter()
            .map(|term| match term {
                OrderTerm::Column(column) => format!("{} {}", quote_identifier(column), direction),
                OrderTerm::Rowid(alias) => format!("{} {}", alias, direction),
            })
            .collect::<Vec<_>>()
            .join(", ");

        format!(" ORDER BY {}", terms)
    }
}

/// Render a scan that counts at most `ceiling + 1` matching rows
///
/// A result above `ceiling` means the scan was cut short.
pub(crate) fn count_statement(table: &str, predicates: &[Predicate], ceiling: u64) -> SqlStatement {
    let (where_clause, mut params) = build_where_clause(predicates);
    let sql = format!(
        "SELECT COUNT(*) FROM (SELECT 1 FROM {}{} LIMIT ?)",
        quote_identifier(table),
        where_clause
    );
    params.push(to_parameter(ceiling.saturating_add(1)));

    SqlStatement { sql, params }
}

/// Quote an identifier (table or column name)
///
/// SQLite uses double quotes for identifiers. Any double quote inside the
/// identifier is doubled. Only catalog-provided names are ever quoted here.
pub(crate) fn quote_identifier(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

/// Build a WHERE clause from predicates
fn build_where_clause(predicates: &[Predicate]) -> (String, Vec<Value>) {
    if predicates.is_empty() {
        return (String::new(), Vec::new());
    }

    let mut conditions = Vec::with_capacity(predicates.len());
    let mut values = Vec::new();

    for predicate in predicates {
        let quoted_column = quote_identifier(&predicate.column);
        match predicate.operator {
            Operator::Equals => {
                conditions.push(format!("{} = ?", quoted_column));
                values.push(predicate.value.clone());
            }
            Operator::IsNull => conditions.push(format!("{} IS NULL", quoted_column)),
        }
    }

    (format!(" WHERE {}", conditions.join(" AND ")), values)
}

fn to_parameter(value: u64) -> Value {
    Value::Integer(i64::try_from(value).unwrap_or(i64::MAX))
}
