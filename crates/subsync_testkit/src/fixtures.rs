//! Test fixtures and store helpers.
//!
//! Provides a small sample schema and convenience functions for setting up
//! subscription stores in tests.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use subsync_core::{
    CoreResult, FieldDef, FieldKind, ObjectModel, ObjectSchema, Schema, StoreConfig,
    SubscriptionStore,
};
use subsync_storage::{FileBackend, InMemoryBackend};
use tempfile::TempDir;

/// Object type name of [`Person`].
pub const PERSON: &str = "Person";
/// Object type name of [`Pet`].
pub const PET: &str = "Pet";
/// Object type name of [`Dog`].
pub const DOG: &str = "Dog";

/// Sample model type with a name and an age.
#[derive(Debug, Clone, PartialEq)]
pub struct Person {
    /// Name.
    pub name: String,
    /// Age in years.
    pub age: i64,
}

impl ObjectModel for Person {
    const OBJECT_TYPE: &'static str = PERSON;
}

/// Sample model type owned by a [`Person`].
#[derive(Debug, Clone, PartialEq)]
pub struct Pet {
    /// Name.
    pub name: String,
    /// Species.
    pub kind: String,
}

impl ObjectModel for Pet {
    const OBJECT_TYPE: &'static str = PET;
}

/// Model type that is deliberately left out of [`sample_schema`].
#[derive(Debug, Clone, PartialEq)]
pub struct Dog {
    /// Name.
    pub name: String,
}

impl ObjectModel for Dog {
    const OBJECT_TYPE: &'static str = DOG;
}

/// Returns the schema used across tests: `Person` and `Pet`, but not `Dog`.
pub fn sample_schema() -> Schema {
    Schema::new()
        .with_object(
            ObjectSchema::of::<Person>()
                .field(FieldDef::required("name", FieldKind::String))
                .field(FieldDef::required("age", FieldKind::Int))
                .field(FieldDef::optional(
                    "pets",
                    FieldKind::List(Box::new(FieldKind::Link(PET.into()))),
                )),
        )
        .with_object(
            ObjectSchema::of::<Pet>()
                .field(FieldDef::required("name", FieldKind::String))
                .field(FieldDef::required("kind", FieldKind::String)),
        )
}

/// Store type returned by [`memory_store`].
pub type MemoryStore = SubscriptionStore<InMemoryBackend>;

/// Store type returned by [`TempStoreDir::open`].
pub type FileStore = SubscriptionStore<FileBackend>;

/// Creates an in-memory store over [`sample_schema`].
pub fn memory_store() -> Arc<MemoryStore> {
    Arc::new(
        SubscriptionStore::in_memory(sample_schema()).expect("Failed to open in-memory store"),
    )
}

/// An in-memory log that outlives the stores opened over it.
///
/// Opening a second store over the same log simulates a restart without
/// touching the filesystem.
#[derive(Debug, Default)]
pub struct SharedLog {
    backend: InMemoryBackend,
}

impl SharedLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a store over the log with the default configuration.
    pub fn open(&self) -> Arc<MemoryStore> {
        self.open_with(StoreConfig::default())
    }

    /// Opens a store over the log.
    pub fn open_with(&self, config: StoreConfig) -> Arc<MemoryStore> {
        Arc::new(
            SubscriptionStore::open(self.backend.share(), sample_schema(), config)
                .expect("Failed to open store over shared log"),
        )
    }

    /// Returns a copy of the raw log bytes.
    pub fn bytes(&self) -> Vec<u8> {
        self.backend.data()
    }
}

/// A temporary directory holding a store log, removed on drop.
pub struct TempStoreDir {
    dir: TempDir,
}

impl TempStoreDir {
    /// Creates a new temporary directory.
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// Returns the path of the log file.
    pub fn path(&self) -> PathBuf {
        self.dir.path().join("subscriptions.log")
    }

    /// Returns the directory.
    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// Opens the store over [`sample_schema`].
    ///
    /// The log is locked exclusively; drop the previous store before
    /// reopening.
    pub fn open(&self) -> CoreResult<FileStore> {
        SubscriptionStore::open_file(&self.path(), sample_schema(), StoreConfig::default())
    }
}

impl Default for TempStoreDir {
    fn default() -> Self {
        Self::new()
    }
}
