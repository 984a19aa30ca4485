use serde::{Deserialize, Serialize};
pub mod chunk;
pub mod conversation;
pub mod document;
pub mod query;

pub trait StoredObject: Serialize + for<'de> Deserialize<'de> {
    fn table_name() -> &'static str;
    fn get_id(&self) -> &str;
}

/// Declares a persisted record type. Every stored object carries an `id`
/// plus `created_at`/`updated_at` timestamps; the id deserializer accepts
/// both a plain string and a SurrealDB record `Thing`, so the same types
/// round-trip through either metadata backend.
#[macro_export]
macro_rules! stored_object {
    ($name:ident, $table:expr, {$($(#[$attr:meta])* $field:ident: $ty:ty),*}) => {
        use chrono::{DateTime, Utc};
        use serde::{Deserialize, Deserializer, Serialize};
        use $crate::storage::types::StoredObject;

        pub fn deserialize_record_id<'de, D>(deserializer: D) -> Result<String, D::Error>
        where
            D: Deserializer<'de>,
        {
            #[derive(Deserialize)]
            #[serde(untagged)]
            enum RecordId {
                Raw(String),
                Record(surrealdb::sql::Thing),
            }

            Ok(match RecordId::deserialize(deserializer)? {
                RecordId::Raw(id) => id,
                RecordId::Record(thing) => thing.id.to_raw(),
            })
        }

        #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
        pub struct $name {
            #[serde(deserialize_with = "deserialize_record_id")]
            pub id: String,
            #[serde(default)]
            pub created_at: DateTime<Utc>,
            #[serde(default)]
            pub updated_at: DateTime<Utc>,
            $( $(#[$attr])* pub $field: $ty),*
        }

        impl StoredObject for $name {
            fn table_name() -> &'static str {
                $table
            }

            fn get_id(&self) -> &str {
                &self.id
            }
        }
    };
}
