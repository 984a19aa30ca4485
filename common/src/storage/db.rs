use std::ops::Deref;

use surrealdb::{
    engine::any::{connect, Any},
    opt::auth::Root,
    Error, Surreal,
};

use super::types::StoredObject;

/// Connected SurrealDB handle. Typed CRUD goes through the `StoredObject`
/// helpers; ad-hoc queries reach the raw client via `Deref`.
#[derive(Clone)]
pub struct SurrealDbClient {
    pub client: Surreal<Any>,
}

impl SurrealDbClient {
    pub async fn new(
        address: &str,
        username: &str,
        password: &str,
        namespace: &str,
        database: &str,
    ) -> Result<Self, Error> {
        let client = connect(address).await?;
        client.signin(Root { username, password }).await?;
        client.use_ns(namespace).use_db(database).await?;
        Ok(Self { client })
    }

    /// Index definitions are idempotent; safe to run at every startup.
    pub async fn ensure_initialized(&self) -> Result<(), Error> {
        self.client
            .query("DEFINE INDEX IF NOT EXISTS idx_document_status ON document FIELDS status")
            .await?;
        self.client
            .query(
                "DEFINE INDEX IF NOT EXISTS idx_conversation_updated ON conversation FIELDS updated_at",
            )
            .await?;
        Ok(())
    }

    /// Creates the record if missing, replaces it otherwise.
    pub async fn upsert_item<T>(&self, item: T) -> Result<Option<T>, Error>
    where
        T: StoredObject + Send + Sync + 'static,
    {
        self.client
            .upsert((T::table_name(), item.get_id()))
            .content(item)
            .await
    }

    /// Fetches one record by id from the type's table.
    pub async fn get_item<T>(&self, id: &str) -> Result<Option<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.select((T::table_name(), id)).await
    }

    /// Deletes one record by id, returning it when it existed.
    pub async fn delete_item<T>(&self, id: &str) -> Result<Option<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.delete((T::table_name(), id)).await
    }
}

impl Deref for SurrealDbClient {
    type Target = Surreal<Any>;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl SurrealDbClient {
    /// In-memory instance for tests; no credentials involved.
    pub async fn memory(namespace: &str, database: &str) -> Result<Self, Error> {
        let client = connect("mem://").await?;
        client.use_ns(namespace).use_db(database).await?;
        Ok(Self { client })
    }
}
