//! Table existence check and the branch it drives.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;

use dualtrain_core::{Branch, GraphError, RemoteError, TaskGraph, TaskRef};

use crate::services::CatalogService;
use crate::table::TableRef;

/// Outcome of one existence lookup. Never cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableExistence {
    TableExists,
    TableMissing,
}

impl TableExistence {
    pub fn exists(self) -> bool {
        self == TableExistence::TableExists
    }
}

impl From<bool> for TableExistence {
    fn from(exists: bool) -> Self {
        if exists {
            TableExistence::TableExists
        } else {
            TableExistence::TableMissing
        }
    }
}

impl fmt::Display for TableExistence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableExistence::TableExists => write!(f, "table_exists"),
            TableExistence::TableMissing => write!(f, "table_missing"),
        }
    }
}

/// Ask the catalog whether `table` exists. Transport and auth failures are
/// returned as errors, never as `TableMissing`.
pub async fn check_table_exists(
    catalog: &dyn CatalogService,
    table: &TableRef,
) -> Result<TableExistence, RemoteError> {
    let existence = TableExistence::from(catalog.table_exists(table).await?);
    info!(table = %table, result = %existence, "Checked table existence");
    Ok(existence)
}

/// Chooses between computing statistics on an existing table and creating
/// the table first.
#[derive(Debug, Clone)]
pub struct StatsBranch {
    branch: Branch,
}

impl StatsBranch {
    /// Both targets must be tasks of `graph`.
    pub fn new<T>(
        graph: &TaskGraph<T>,
        statistics: &TaskRef,
        create: &TaskRef,
    ) -> Result<Self, GraphError> {
        Ok(Self {
            branch: Branch::new(graph, statistics.clone(), create.clone())?,
        })
    }

    /// Successor for a given existence result.
    pub fn successor(&self, existence: TableExistence) -> &TaskRef {
        self.branch.select(existence.exists())
    }

    /// The successor that is not taken.
    pub fn skipped(&self, existence: TableExistence) -> &TaskRef {
        self.branch.skipped(existence.exists())
    }

    /// Check `table` and return the successor to run.
    pub async fn decide(
        &self,
        catalog: &dyn CatalogService,
        table: &TableRef,
    ) -> Result<&TaskRef, RemoteError> {
        let existence = check_table_exists(catalog, table).await?;
        Ok(self.successor(existence))
    }
}
