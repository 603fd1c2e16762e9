use crate::types::{CodeFile, EntityId, Question};
use async_trait::async_trait;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::RwLock;

/// Collaborator lookups - the sandbox never owns code files or questions,
/// it only reads them by id. Key layout is shared with whatever service
/// writes them, so keep these deterministic.

pub const CODE_FILE_PREFIX: &str = "judgebox:codefile";
pub const QUESTION_PREFIX: &str = "judgebox:question";

pub fn code_file_key(id: &EntityId) -> String {
    format!("{}:{}", CODE_FILE_PREFIX, id)
}

pub fn question_key(id: &EntityId) -> String {
    format!("{}:{}", QUESTION_PREFIX, id)
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("store backend error: {0}")]
    Backend(#[from] redis::RedisError),

    #[error("malformed record at {key}: {source}")]
    Malformed {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to read fixtures: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait CodeFileStore: Send + Sync {
    async fn code_file(&self, id: &EntityId) -> Result<CodeFile, StoreError>;
}

#[async_trait]
pub trait QuestionStore: Send + Sync {
    async fn question(&self, id: &EntityId) -> Result<Question, StoreError>;
}

/// Records stored as JSON strings under the keys above
#[derive(Clone)]
pub struct RedisStore {
    conn: redis::aio::ConnectionManager,
}

impl RedisStore {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let conn = redis::aio::ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        key: String,
        kind: &'static str,
        id: &EntityId,
    ) -> Result<T, StoreError> {
        let mut conn = self.conn.clone();
        let payload: Option<String> = conn.get(&key).await?;
        let payload = payload.ok_or_else(|| StoreError::NotFound {
            kind,
            id: id.to_string(),
        })?;
        serde_json::from_str(&payload).map_err(|source| StoreError::Malformed { key, source })
    }

    async fn put_json<T: Serialize>(&self, key: String, value: &T) -> Result<(), StoreError> {
        let payload = serde_json::to_string(value).map_err(|source| StoreError::Malformed {
            key: key.clone(),
            source,
        })?;
        let mut conn = self.conn.clone();
        let _: () = conn.set(&key, payload).await?;
        Ok(())
    }

    pub async fn put_code_file(&self, id: &EntityId, file: &CodeFile) -> Result<(), StoreError> {
        self.put_json(code_file_key(id), file).await
    }

    pub async fn put_question(&self, id: &EntityId, question: &Question) -> Result<(), StoreError> {
        self.put_json(question_key(id), question).await
    }

    /// Write every fixture record; returns (code files, questions) written
    pub async fn seed(&self, fixtures: &Fixtures) -> Result<(usize, usize), StoreError> {
        for (id, file) in &fixtures.code_files {
            self.put_code_file(&EntityId(id.clone()), file).await?;
        }
        for (id, question) in &fixtures.questions {
            self.put_question(&EntityId(id.clone()), question).await?;
        }
        Ok((fixtures.code_files.len(), fixtures.questions.len()))
    }
}

#[async_trait]
impl CodeFileStore for RedisStore {
    async fn code_file(&self, id: &EntityId) -> Result<CodeFile, StoreError> {
        self.get_json(code_file_key(id), "code file", id).await
    }
}

#[async_trait]
impl QuestionStore for RedisStore {
    async fn question(&self, id: &EntityId) -> Result<Question, StoreError> {
        self.get_json(question_key(id), "question", id).await
    }
}

/// Seed data for the in-memory store, keyed by id
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fixtures {
    #[serde(default)]
    pub code_files: HashMap<String, CodeFile>,
    #[serde(default)]
    pub questions: HashMap<String, Question>,
}

impl Fixtures {
    pub fn from_json(raw: &str) -> Result<Self, StoreError> {
        serde_json::from_str(raw).map_err(|source| StoreError::Malformed {
            key: "fixtures".to_string(),
            source,
        })
    }

    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }
}

/// Process-local store used for development and tests
#[derive(Default)]
pub struct MemoryStore {
    code_files: RwLock<HashMap<String, CodeFile>>,
    questions: RwLock<HashMap<String, Question>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fixtures(fixtures: Fixtures) -> Self {
        Self {
            code_files: RwLock::new(fixtures.code_files),
            questions: RwLock::new(fixtures.questions),
        }
    }

    pub async fn insert_code_file(&self, id: impl Into<EntityId>, file: CodeFile) {
        self.code_files.write().await.insert(id.into().0, file);
    }

    pub async fn insert_question(&self, id: impl Into<EntityId>, question: Question) {
        self.questions.write().await.insert(id.into().0, question);
    }
}

#[async_trait]
impl CodeFileStore for MemoryStore {
    async fn code_file(&self, id: &EntityId) -> Result<CodeFile, StoreError> {
        self.code_files
            .read()
            .await
            .get(id.as_str())
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                kind: "code file",
                id: id.to_string(),
            })
    }
}

#[async_trait]
impl QuestionStore for MemoryStore {
    async fn question(&self, id: &EntityId) -> Result<Question, StoreError> {
        self.questions
            .read()
            .await
            .get(id.as_str())
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                kind: "question",
                id: id.to_string(),
            })
    }
}
