//! Per-user conversation documents.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use rand::seq::SliceRandom;
use rusqlite::{params, Connection, OptionalExtension};
use scriptbot_config::Store as StoreConfig;
use scriptbot_contracts::{ListField, ListItem, Projection, ProjectionSpec, UserRecord};
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no user document for {0}")]
    NotFound(String),
    #[error("store backend error: {0}")]
    Backend(String),
    #[error("stored document is corrupt: {0}")]
    Corrupt(String),
}

/// A field write requested by a compound status. Values are ciphertext.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    Name(String),
    AddToList(ListField, String),
}

#[derive(Clone)]
pub struct UserStore {
    backend: Arc<Mutex<StoreBackend>>,
}

impl UserStore {
    pub fn from_config(cfg: &StoreConfig) -> Result<Self, StoreError> {
        if cfg.kind == "sqlite" {
            let path = cfg.sqlite_path.as_deref().ok_or_else(|| {
                StoreError::Backend("store.sqlite_path is required for sqlite store".to_string())
            })?;
            Self::sqlite(path)
        } else {
            Ok(Self::memory())
        }
    }

    pub fn memory() -> Self {
        Self::with_backend(StoreBackend::Memory(MemoryStore::default()))
    }

    pub fn sqlite(path: &str) -> Result<Self, StoreError> {
        Ok(Self::with_backend(StoreBackend::Sqlite(SqliteStore::new(
            path,
        )?)))
    }

    fn with_backend(backend: StoreBackend) -> Self {
        Self {
            backend: Arc::new(Mutex::new(backend)),
        }
    }

    pub async fn get_status(&self, user_id: &str) -> Result<String, StoreError> {
        let store = self.backend.lock().await;
        store
            .load(user_id)?
            .map(|record| record.status)
            .ok_or_else(|| StoreError::NotFound(user_id.to_string()))
    }

    /// Overwrites `status`. A missing document is created only when
    /// `create_if_missing` is set.
    pub async fn set_status(
        &self,
        user_id: &str,
        status: &str,
        create_if_missing: bool,
    ) -> Result<UserRecord, StoreError> {
        let mut store = self.backend.lock().await;
        let mut record = match store.load(user_id)? {
            Some(record) => record,
            None if create_if_missing => UserRecord::new(user_id, status),
            None => return Err(StoreError::NotFound(user_id.to_string())),
        };
        record.status = status.to_string();
        store.save(&record)?;
        Ok(record)
    }

    /// Applies `mutation` and moves `status` to `new_status` in one write.
    pub async fn mutate(
        &self,
        user_id: &str,
        mutation: Mutation,
        new_status: &str,
    ) -> Result<UserRecord, StoreError> {
        let mut store = self.backend.lock().await;
        let mut record = store
            .load(user_id)?
            .ok_or_else(|| StoreError::NotFound(user_id.to_string()))?;
        match mutation {
            Mutation::Name(name) => record.name = Some(name),
            Mutation::AddToList(field, name) => {
                let list = record.list_mut(field);
                if !list.iter().any(|item| item.name == name) {
                    list.push(ListItem::new(name));
                }
            }
        }
        record.status = new_status.to_string();
        store.save(&record)?;
        Ok(record)
    }

    /// Reads `name` and a random sample of each requested list. Lists shorter
    /// than the requested count come back whole.
    pub async fn project(
        &self,
        user_id: &str,
        spec: ProjectionSpec,
    ) -> Result<Projection, StoreError> {
        let record = {
            let store = self.backend.lock().await;
            store
                .load(user_id)?
                .ok_or_else(|| StoreError::NotFound(user_id.to_string()))?
        };
        let mut projection = Projection {
            name: if spec.name { record.name.clone() } else { None },
            ..Projection::default()
        };
        let mut rng = rand::thread_rng();
        for field in ListField::ALL {
            let wanted = spec.count(field);
            if wanted == 0 {
                continue;
            }
            *projection.list_mut(field) = record
                .list(field)
                .choose_multiple(&mut rng, wanted)
                .cloned()
                .collect();
        }
        Ok(projection)
    }

    pub async fn get_all(&self, user_id: &str) -> Result<UserRecord, StoreError> {
        let store = self.backend.lock().await;
        store
            .load(user_id)?
            .ok_or_else(|| StoreError::NotFound(user_id.to_string()))
    }
}

#[derive(Default)]
struct MemoryStore {
    users: HashMap<String, UserRecord>,
}

enum StoreBackend {
    Memory(MemoryStore),
    Sqlite(SqliteStore),
}

struct SqliteStore {
    conn: Connection,
}

impl StoreBackend {
    fn load(&self, user_id: &str) -> Result<Option<UserRecord>, StoreError> {
        match self {
            StoreBackend::Memory(store) => Ok(store.users.get(user_id).cloned()),
            StoreBackend::Sqlite(store) => store.load(user_id),
        }
    }

    fn save(&mut self, record: &UserRecord) -> Result<(), StoreError> {
        match self {
            StoreBackend::Memory(store) => {
                store
                    .users
                    .insert(record.user_id.clone(), record.clone());
                Ok(())
            }
            StoreBackend::Sqlite(store) => store.save(record),
        }
    }
}

impl SqliteStore {
    fn new(path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(|e| StoreError::Backend(e.to_string()))?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS user_docs (
                user_id TEXT PRIMARY KEY,
                doc_json TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            ",
        )
        .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(Self { conn })
    }

    fn load(&self, user_id: &str) -> Result<Option<UserRecord>, StoreError> {
        let doc_json: Option<String> = self
            .conn
            .query_row(
                "SELECT doc_json FROM user_docs WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        match doc_json {
            Some(v) => {
                let record: UserRecord =
                    serde_json::from_str(&v).map_err(|e| StoreError::Corrupt(e.to_string()))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    fn save(&mut self, record: &UserRecord) -> Result<(), StoreError> {
        let json = serde_json::to_string(record).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        self.conn
            .execute(
                "
                INSERT INTO user_docs(user_id, doc_json, updated_at)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(user_id) DO UPDATE SET
                    doc_json=excluded.doc_json,
                    updated_at=excluded.updated_at
                ",
                params![record.user_id, json, Utc::now().to_rfc3339()],
            )
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }
}
