//! Data-registry interface for out-of-band array data.
//!
//! Detectors that write large arrays to files register the file as a
//! *resource* and each acquired point as a *datum* referencing it.

use crate::{Error, Result};
use serde_json::{Map, Value as JsonValue};
use std::sync::{Mutex, PoisonError};

/// Identifier assigned to an inserted resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceId(pub String);

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Resource/datum registry.
pub trait DataRegistry: Send + Sync {
    /// Registers a file handled by `handler`.
    fn insert_resource(
        &self,
        handler: &str,
        path: &str,
        kwargs: Map<String, JsonValue>,
    ) -> Result<ResourceId>;

    /// Registers one datum inside `resource`.
    fn insert_datum(
        &self,
        resource: &ResourceId,
        datum_id: &str,
        kwargs: Map<String, JsonValue>,
    ) -> Result<()>;
}

/// Resource as recorded by [`MemoryRegistry`].
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceRecord {
    pub id: ResourceId,
    pub handler: String,
    pub path: String,
    pub kwargs: Map<String, JsonValue>,
}

/// Datum as recorded by [`MemoryRegistry`].
#[derive(Debug, Clone, PartialEq)]
pub struct DatumRecord {
    pub resource: ResourceId,
    pub datum_id: String,
    pub kwargs: Map<String, JsonValue>,
}

#[derive(Debug, Default)]
struct Records {
    resources: Vec<ResourceRecord>,
    datums: Vec<DatumRecord>,
}

/// In-memory registry, numbering resources sequentially.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    records: Mutex<Records>,
}

impl MemoryRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All inserted resources.
    #[must_use]
    pub fn resources(&self) -> Vec<ResourceRecord> {
        self.lock().resources.clone()
    }

    /// All inserted datums.
    #[must_use]
    pub fn datums(&self) -> Vec<DatumRecord> {
        self.lock().datums.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Records> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DataRegistry for MemoryRegistry {
    fn insert_resource(
        &self,
        handler: &str,
        path: &str,
        kwargs: Map<String, JsonValue>,
    ) -> Result<ResourceId> {
        let mut records = self.lock();
        let id = ResourceId(format!("resource-{}", records.resources.len() + 1));
        records.resources.push(ResourceRecord {
            id: id.clone(),
            handler: handler.to_string(),
            path: path.to_string(),
            kwargs,
        });
        Ok(id)
    }

    fn insert_datum(
        &self,
        resource: &ResourceId,
        datum_id: &str,
        kwargs: Map<String, JsonValue>,
    ) -> Result<()> {
        let mut records = self.lock();
        if !records.resources.iter().any(|r| &r.id == resource) {
            return Err(Error::Registry(format!("unknown resource {resource}")));
        }
        records.datums.push(DatumRecord {
            resource: resource.clone(),
            datum_id: datum_id.to_string(),
            kwargs,
        });
        Ok(())
    }
}
