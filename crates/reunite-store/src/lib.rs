//! reunite-store — SQLite persistence for cases and officer credentials.
//!
//! Embeddings are stored as AES-256-GCM-sealed JSON blobs; a NULL blob
//! marks an unprocessed case. Snapshot reads filter on "embedding
//! present" and tolerate rows vanishing or failing to unseal while
//! writers run concurrently; a bad row is skipped, never an error.

pub mod crypto;

pub use crypto::{CipherError, EmbeddingCipher};

use chrono::Utc;
use reunite_core::{Embedding, RegistryCase};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS cases (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    missing_full_name TEXT NOT NULL,
    gender            TEXT,
    age               TEXT,
    missing_state     TEXT,
    missing_city      TEXT,
    pin_code          TEXT,
    missing_date      TEXT,
    missing_time      TEXT,
    description       TEXT,
    image_path        TEXT NOT NULL,
    embedding         BLOB,
    complainant_name  TEXT,
    relationship      TEXT,
    complainant_phone TEXT,
    address_line1     TEXT,
    created_at        TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS officers (
    username        TEXT PRIMARY KEY,
    password_sha256 TEXT NOT NULL,
    contact_phone   TEXT
);
";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),
    #[error("embedding cipher error: {0}")]
    Cipher(#[from] CipherError),
}

/// Fields of a new missing-person report.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewCase {
    pub missing_full_name: String,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub age: Option<String>,
    #[serde(default)]
    pub missing_state: Option<String>,
    #[serde(default)]
    pub missing_city: Option<String>,
    #[serde(default)]
    pub pin_code: Option<String>,
    #[serde(default)]
    pub missing_date: Option<String>,
    #[serde(default)]
    pub missing_time: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Stored image filename relative to the upload directory. Assigned
    /// by the daemon; ignored when a report submission carries one.
    #[serde(default)]
    pub image_path: String,
    #[serde(default)]
    pub complainant_name: Option<String>,
    #[serde(default)]
    pub relationship: Option<String>,
    #[serde(default)]
    pub complainant_phone: Option<String>,
    #[serde(default)]
    pub address_line1: Option<String>,
}

/// A stored case as listed to officers (embedding elided).
#[derive(Debug, Clone, Serialize)]
pub struct CaseRecord {
    pub id: i64,
    pub missing_full_name: String,
    pub gender: Option<String>,
    pub age: Option<String>,
    pub missing_state: Option<String>,
    pub missing_city: Option<String>,
    pub description: Option<String>,
    pub image_path: String,
    pub complainant_name: Option<String>,
    pub complainant_phone: Option<String>,
    pub has_embedding: bool,
    pub created_at: String,
}

/// A case awaiting an embedding, as fed to the re-embed job.
#[derive(Debug, Clone)]
pub struct PendingCase {
    pub id: i64,
    pub name: String,
    pub image_path: String,
}

#[derive(Debug, Clone)]
pub struct Officer {
    pub username: String,
    pub contact_phone: Option<String>,
}

/// Unique stored filename for an uploaded case photo.
pub fn stored_image_name(ext: &str) -> String {
    format!("{}.{}", Uuid::new_v4(), ext)
}

fn sha256_hex(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

fn encode_embedding(cipher: &EmbeddingCipher, embedding: &Embedding) -> Result<Vec<u8>, CipherError> {
    // Embeddings persist as a plain JSON float array.
    let json = serde_json::to_vec(&embedding.values).expect("vec of f32 serializes");
    cipher.seal(&json)
}

fn decode_embedding(cipher: &EmbeddingCipher, blob: &[u8]) -> Option<Embedding> {
    let json = cipher.open(blob).ok()?;
    let values: Vec<f32> = serde_json::from_slice(&json).ok()?;
    Some(Embedding::new(values))
}

/// Async handle to the case database. Cheap to clone.
#[derive(Clone)]
pub struct CaseStore {
    conn: tokio_rusqlite::Connection,
    cipher: Arc<EmbeddingCipher>,
}

impl CaseStore {
    pub async fn open(db_path: &Path, cipher: EmbeddingCipher) -> Result<Self, StoreError> {
        let conn = tokio_rusqlite::Connection::open(db_path).await?;
        Self::init(conn, cipher).await
    }

    pub async fn open_in_memory(cipher: EmbeddingCipher) -> Result<Self, StoreError> {
        let conn = tokio_rusqlite::Connection::open_in_memory().await?;
        Self::init(conn, cipher).await
    }

    async fn init(
        conn: tokio_rusqlite::Connection,
        cipher: EmbeddingCipher,
    ) -> Result<Self, StoreError> {
        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;
        Ok(Self {
            conn,
            cipher: Arc::new(cipher),
        })
    }

    /// Insert a new case; the embedding is attached when extraction
    /// succeeded at report time, otherwise the case stays unprocessed.
    pub async fn insert_case(
        &self,
        case: &NewCase,
        embedding: Option<&Embedding>,
    ) -> Result<i64, StoreError> {
        let blob = match embedding {
            Some(e) => Some(encode_embedding(&self.cipher, e)?),
            None => None,
        };
        let case = case.clone();
        let created_at = Utc::now().to_rfc3339();

        let id = self
            .conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO cases (
                        missing_full_name, gender, age, missing_state, missing_city,
                        pin_code, missing_date, missing_time, description, image_path,
                        embedding, complainant_name, relationship, complainant_phone,
                        address_line1, created_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
                    params![
                        case.missing_full_name,
                        case.gender,
                        case.age,
                        case.missing_state,
                        case.missing_city,
                        case.pin_code,
                        case.missing_date,
                        case.missing_time,
                        case.description,
                        case.image_path,
                        blob,
                        case.complainant_name,
                        case.relationship,
                        case.complainant_phone,
                        case.address_line1,
                        created_at,
                    ],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;
        Ok(id)
    }

    /// All cases with a usable embedding, read fresh for one scan.
    ///
    /// Rows that fail to unseal or parse are skipped with a warning so a
    /// concurrent writer can never poison a scan.
    pub async fn snapshot(&self) -> Result<Vec<RegistryCase>, StoreError> {
        let cipher = Arc::clone(&self.cipher);
        let cases = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, missing_full_name, complainant_phone, embedding
                     FROM cases WHERE embedding IS NOT NULL",
                )?;
                let rows = stmt.query_map([], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Vec<u8>>(3)?,
                    ))
                })?;

                let mut cases = Vec::new();
                for row in rows {
                    let (id, name, complainant_phone, blob) = row?;
                    match decode_embedding(&cipher, &blob) {
                        Some(embedding) => cases.push(RegistryCase {
                            id,
                            name,
                            complainant_phone,
                            embedding,
                        }),
                        None => {
                            tracing::warn!(case_id = id, "skipping case with unreadable embedding blob");
                        }
                    }
                }
                Ok(cases)
            })
            .await?;
        Ok(cases)
    }

    /// Attach an embedding to a previously-unprocessed case.
    pub async fn attach_embedding(
        &self,
        case_id: i64,
        embedding: &Embedding,
    ) -> Result<(), StoreError> {
        let blob = encode_embedding(&self.cipher, embedding)?;
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE cases SET embedding = ?1 WHERE id = ?2",
                    params![blob, case_id],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Cases still waiting for an embedding, oldest first.
    pub async fn unprocessed(&self) -> Result<Vec<PendingCase>, StoreError> {
        let pending = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, missing_full_name, image_path
                     FROM cases WHERE embedding IS NULL ORDER BY id",
                )?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok(PendingCase {
                            id: row.get(0)?,
                            name: row.get(1)?,
                            image_path: row.get(2)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, rusqlite::Error>>()?;
                Ok(rows)
            })
            .await?;
        Ok(pending)
    }

    /// Hard delete. Returns false when the case was already gone.
    pub async fn delete_case(&self, case_id: i64) -> Result<bool, StoreError> {
        let deleted = self
            .conn
            .call(move |conn| {
                let n = conn.execute("DELETE FROM cases WHERE id = ?1", params![case_id])?;
                Ok(n > 0)
            })
            .await?;
        Ok(deleted)
    }

    pub async fn recent_cases(&self, limit: u32) -> Result<Vec<CaseRecord>, StoreError> {
        let cases = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, missing_full_name, gender, age, missing_state, missing_city,
                            description, image_path, complainant_name, complainant_phone,
                            embedding IS NOT NULL, created_at
                     FROM cases ORDER BY created_at DESC, id DESC LIMIT ?1",
                )?;
                let rows = stmt
                    .query_map(params![limit], map_case_record)?
                    .collect::<Result<Vec<_>, rusqlite::Error>>()?;
                Ok(rows)
            })
            .await?;
        Ok(cases)
    }

    pub async fn get_case(&self, case_id: i64) -> Result<Option<CaseRecord>, StoreError> {
        let case = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, missing_full_name, gender, age, missing_state, missing_city,
                            description, image_path, complainant_name, complainant_phone,
                            embedding IS NOT NULL, created_at
                     FROM cases WHERE id = ?1",
                )?;
                let mut rows = stmt
                    .query_map(params![case_id], map_case_record)?
                    .collect::<Result<Vec<_>, rusqlite::Error>>()?;
                Ok(rows.pop())
            })
            .await?;
        Ok(case)
    }

    /// Number of cases visible to the matcher.
    pub async fn registry_size(&self) -> Result<i64, StoreError> {
        let n = self
            .conn
            .call(|conn| {
                let n: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM cases WHERE embedding IS NOT NULL",
                    [],
                    |row| row.get(0),
                )?;
                Ok(n)
            })
            .await?;
        Ok(n)
    }

    /// Create or replace an officer login.
    pub async fn upsert_officer(
        &self,
        username: &str,
        password: &str,
        contact_phone: Option<&str>,
    ) -> Result<(), StoreError> {
        let username = username.to_string();
        let hash = sha256_hex(password);
        let phone = contact_phone.map(|p| p.to_string());
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO officers (username, password_sha256, contact_phone)
                     VALUES (?1, ?2, ?3)
                     ON CONFLICT(username) DO UPDATE SET
                         password_sha256 = excluded.password_sha256,
                         contact_phone = excluded.contact_phone",
                    params![username, hash, phone],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Check a login against the credential table.
    pub async fn verify_officer(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<Officer>, StoreError> {
        let username = username.to_string();
        let hash = sha256_hex(password);
        let officer = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT username, contact_phone FROM officers
                     WHERE username = ?1 AND password_sha256 = ?2",
                )?;
                let mut rows = stmt
                    .query_map(params![username, hash], |row| {
                        Ok(Officer {
                            username: row.get(0)?,
                            contact_phone: row.get(1)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, rusqlite::Error>>()?;
                Ok(rows.pop())
            })
            .await?;
        Ok(officer)
    }
}

fn map_case_record(row: &rusqlite::Row<'_>) -> Result<CaseRecord, rusqlite::Error> {
    Ok(CaseRecord {
        id: row.get(0)?,
        missing_full_name: row.get(1)?,
        gender: row.get(2)?,
        age: row.get(3)?,
        missing_state: row.get(4)?,
        missing_city: row.get(5)?,
        description: row.get(6)?,
        image_path: row.get(7)?,
        complainant_name: row.get(8)?,
        complainant_phone: row.get(9)?,
        has_embedding: row.get(10)?,
        created_at: row.get(11)?,
    })
}
