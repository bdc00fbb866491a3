use std::path::Path;

use async_trait::async_trait;
use sqlx::{migrate::MigrateDatabase, sqlite::SqlitePoolOptions, Sqlite, SqlitePool};
use tokio::sync::Mutex;

use crate::error::{Error, Result};

use super::attendee::AttendeeRecord;

/// Key of the slot holding the attendee list.
pub const ATTENDEES_SLOT: &str = "tea-gathering-attendees";

/// Durable list of attendee records.
///
/// `load` only fails when the backend itself cannot be read. An absent slot
/// loads as an empty list, and so does a malformed one (after logging).
/// `save` overwrites the whole list. There is no locking between processes:
/// two writers sharing one backend can overwrite each other's last save.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn load(&self) -> Result<Vec<AttendeeRecord>>;

    async fn save(&self, records: &[AttendeeRecord]) -> Result<()>;
}

/// Decode a persisted blob, treating malformed content as an empty store.
pub fn decode_records(blob: Option<&str>) -> Vec<AttendeeRecord> {
    let Some(blob) = blob else {
        return vec![];
    };

    match serde_json::from_str::<Vec<AttendeeRecord>>(blob) {
        Ok(records) => records,
        Err(e) => {
            log::error!("Error parsing attendees data, treating store as empty: {}", e);
            vec![]
        }
    }
}

pub fn encode_records(records: &[AttendeeRecord]) -> Result<String> {
    Ok(serde_json::to_string(records)?)
}

/// Find a record by id in the store.
pub async fn find_attendee(store: &dyn RecordStore, id: &str) -> Result<AttendeeRecord> {
    store
        .load()
        .await?
        .into_iter()
        .find(|a| a.id == id)
        .ok_or_else(|| Error::NotFound(id.to_owned()))
}

/// A key-value slot table in SQLite, the device-local equivalent of browser storage.
pub struct SqliteStore {
    db: SqlitePool,
}

impl SqliteStore {
    pub async fn open(file: &Path) -> Result<Self> {
        let url = format!("sqlite://{}", file.display());
        if !Sqlite::database_exists(&url).await? {
            log::info!("Creating attendee database {}", file.display());
            Sqlite::create_database(&url).await?;
        }

        let db = SqlitePool::connect(&url).await?;
        Self::init(db).await
    }

    /// A private in-memory database. One connection, since every
    /// `:memory:` connection is a separate database.
    pub async fn in_memory() -> Result<Self> {
        let db = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::init(db).await
    }

    async fn init(db: SqlitePool) -> Result<Self> {
        sqlx::query(
            "create table if not exists kv_slots(
                        key text primary key not null,
                        value text not null
                    );",
        )
        .execute(&db)
        .await?;

        Ok(SqliteStore { db })
    }

    pub async fn read_slot(&self, key: &str) -> Result<Option<String>> {
        Ok(
            sqlx::query_scalar::<_, String>("select value from kv_slots where key = ?")
                .bind(key)
                .fetch_optional(&self.db)
                .await?,
        )
    }

    pub async fn write_slot(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "insert into kv_slots(key, value) values(?, ?)
                on conflict(key) do update set value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.db)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn load(&self) -> Result<Vec<AttendeeRecord>> {
        let blob = self.read_slot(ATTENDEES_SLOT).await?;
        let records = decode_records(blob.as_deref());
        log::debug!("Loaded {} attendees", records.len());
        Ok(records)
    }

    async fn save(&self, records: &[AttendeeRecord]) -> Result<()> {
        log::debug!("Saving {} attendees", records.len());
        self.write_slot(ATTENDEES_SLOT, &encode_records(records)?)
            .await
    }
}

/// Keeps the serialized blob in memory, so tests see the same decode path as real storage.
#[derive(Default)]
pub struct MemoryStore {
    blob: Mutex<Option<String>>,
}

impl MemoryStore {
    pub fn with_blob(blob: impl Into<String>) -> Self {
        MemoryStore {
            blob: Mutex::new(Some(blob.into())),
        }
    }

    pub async fn blob(&self) -> Option<String> {
        self.blob.lock().await.clone()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn load(&self) -> Result<Vec<AttendeeRecord>> {
        Ok(decode_records(self.blob.lock().await.as_deref()))
    }

    async fn save(&self, records: &[AttendeeRecord]) -> Result<()> {
        let encoded = encode_records(records)?;
        *self.blob.lock().await = Some(encoded);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::attendee::tests::sample_record;

    #[tokio::test]
    async fn test_empty_store() {
        assert!(MemoryStore::default().load().await.unwrap().is_empty());
        assert!(SqliteStore::in_memory().await.unwrap().load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupted_blob_loads_empty() {
        let store = MemoryStore::with_blob("[{\"id\": \"1\", \"fullName\":");
        assert!(store.load().await.unwrap().is_empty());

        let store = MemoryStore::with_blob("{\"not\": \"a list\"}");
        assert!(store.load().await.unwrap().is_empty());

        let store = SqliteStore::in_memory().await.unwrap();
        store.write_slot(ATTENDEES_SLOT, "definitely not json").await.unwrap();
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_overwrites_whole_list() {
        let store = SqliteStore::in_memory().await.unwrap();
        let first = vec![
            sample_record("1", "Jane Doe", "033"),
            sample_record("2", "John Smith", "045"),
        ];
        store.save(&first).await.unwrap();
        assert_eq!(store.load().await.unwrap(), first);

        let second = vec![sample_record("3", "Jim Beam", "050")];
        store.save(&second).await.unwrap();
        assert_eq!(store.load().await.unwrap(), second);
    }

    #[tokio::test]
    async fn test_dates_survive_reload() {
        let store = MemoryStore::default();
        let records = vec![sample_record("1", "Jane Doe", "033")];
        store.save(&records).await.unwrap();

        let blob = store.blob().await.unwrap();
        assert!(blob.contains("\"registrationDate\":\"2025-03-07T09:30:00Z\""));
        assert_eq!(
            store.load().await.unwrap()[0].registration_date,
            records[0].registration_date
        );
    }

    #[tokio::test]
    async fn test_file_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("attendees.db");
        let records = vec![sample_record("1", "Jane Doe", "033")];

        SqliteStore::open(&file).await.unwrap().save(&records).await.unwrap();
        let reopened = SqliteStore::open(&file).await.unwrap();
        assert_eq!(reopened.load().await.unwrap(), records);
    }

    #[tokio::test]
    async fn test_find_attendee() {
        let store = MemoryStore::default();
        store
            .save(&[sample_record("1", "Jane Doe", "033")])
            .await
            .unwrap();

        assert_eq!(find_attendee(&store, "1").await.unwrap().full_name, "Jane Doe");
        assert!(matches!(
            find_attendee(&store, "missing").await,
            Err(Error::NotFound(id)) if id == "missing"
        ));
    }
}
