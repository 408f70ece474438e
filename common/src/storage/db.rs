use crate::error::AppError;

use super::types::StoredObject;
use surrealdb::{
    engine::any::{connect, Any},
    opt::auth::Root,
    Error, Surreal,
};

/// Statements defining the document registry. All of them are safe to re-run.
const REGISTRY_SCHEMA: &[&str] = &[
    "DEFINE TABLE IF NOT EXISTS document_reference SCHEMALESS",
    "DEFINE INDEX IF NOT EXISTS idx_document_source ON document_reference FIELDS source_uri",
    "DEFINE INDEX IF NOT EXISTS idx_document_status ON document_reference FIELDS status",
];

/// Connection to the document registry.
#[derive(Clone)]
pub struct SurrealDbClient {
    pub client: Surreal<Any>,
}

impl SurrealDbClient {
    /// Connects to `address` (`mem://`, `rocksdb://...`, `ws://...`).
    ///
    /// Embedded `mem://` engines run without authentication, so sign-in is skipped for them.
    pub async fn new(
        address: &str,
        username: &str,
        password: &str,
        namespace: &str,
        database: &str,
    ) -> Result<Self, Error> {
        let db = connect(address).await?;

        if !address.starts_with("mem://") && !username.is_empty() {
            db.signin(Root { username, password }).await?;
        }

        db.use_ns(namespace).use_db(database).await?;

        Ok(SurrealDbClient { client: db })
    }

    pub async fn ensure_initialized(&self) -> Result<(), AppError> {
        self.define_registry_schema().await?;

        Ok(())
    }

    pub async fn define_registry_schema(&self) -> Result<(), Error> {
        for statement in REGISTRY_SCHEMA {
            self.client.query(*statement).await?.check()?;
        }

        Ok(())
    }

    /// Cheap round trip used by readiness probes.
    pub async fn ping(&self) -> Result<(), Error> {
        self.client.query("RETURN true").await?.check()?;
        Ok(())
    }

    /// Creates the record under its own id. Fails if the id is already taken.
    pub async fn store_item<T>(&self, item: T) -> Result<Option<T>, Error>
    where
        T: StoredObject + Send + Sync + 'static,
    {
        self.client
            .create((T::table_name(), item.get_id()))
            .content(item)
            .await
    }

    pub async fn get_item<T>(&self, id: &str) -> Result<Option<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.select((T::table_name(), id)).await
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl SurrealDbClient {
    /// Create an in-memory SurrealDB client for testing.
    pub async fn memory(namespace: &str, database: &str) -> Result<Self, Error> {
        let db = connect("mem://").await?;

        db.use_ns(namespace).use_db(database).await?;

        Ok(SurrealDbClient { client: db })
    }
}
