//! The contract index: operations and schemas built together from one contract.

use serde_json::Value;

use crate::error::IndexError;
use crate::operation_index::OperationIndex;
use crate::schema_index::SchemaIndex;

/// Immutable, queryable view of a contract.
///
/// Produced by [`ContractIndex::build`]; re-initialising means building a
/// new one and swapping it in.
#[derive(Debug, Clone, Default)]
pub struct ContractIndex {
    operations: OperationIndex,
    schemas: SchemaIndex,
    issues: Vec<IndexError>,
}

impl ContractIndex {
    /// Index a contract.
    ///
    /// Never fails: indexing problems are collected in [`issues`](Self::issues)
    /// and whatever could be indexed is kept.
    pub fn build(contract: &Value) -> Self {
        let mut issues = Vec::new();
        let schemas = SchemaIndex::build(contract, &mut issues);
        let operations = OperationIndex::build(contract, &mut issues);

        for issue in &issues {
            log::warn!("contract: {}", issue);
        }

        Self {
            operations,
            schemas,
            issues,
        }
    }

    pub fn operations(&self) -> &OperationIndex {
        &self.operations
    }

    pub fn schemas(&self) -> &SchemaIndex {
        &self.schemas
    }

    /// Problems found while indexing, in discovery order.
    pub fn issues(&self) -> &[IndexError] {
        &self.issues
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}
