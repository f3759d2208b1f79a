//! Encrypted credential storage using SQLite.
//!
//! One row per credential ref. Access and refresh tokens are sealed separately.

use super::{Credential, MasterKey, SealedValue};
use crate::device::ProviderType;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// A decrypted credential together with its owner.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredCredential {
    pub user_id: String,
    pub provider: ProviderType,
    pub credential: Credential,
}

/// Encrypted credential storage backed by SQLite.
///
/// # Schema
/// ```sql
/// CREATE TABLE credentials (
///     credential_ref      TEXT PRIMARY KEY,
///     user_id             TEXT NOT NULL,
///     provider            TEXT NOT NULL,
///     access_token        TEXT NOT NULL,  -- Encrypted
///     access_token_nonce  TEXT NOT NULL,
///     refresh_token       TEXT,           -- Encrypted (optional)
///     refresh_token_nonce TEXT,
///     expires_at          TEXT NOT NULL,  -- RFC 3339
///     created_at          TEXT NOT NULL,
///     updated_at          TEXT NOT NULL
/// );
/// ```
pub struct CredentialStore {
    conn: Mutex<Connection>,
    key: MasterKey,
}

impl CredentialStore {
    /// Creates or opens a credential store.
    ///
    /// # Arguments
    /// * `db_path` - Path to SQLite database file (`":memory:"` for tests)
    /// * `encryption_key` - Base64-encoded 32-byte master key
    pub fn new<P: AsRef<Path>>(db_path: P, encryption_key: &str) -> Result<Self> {
        let key = MasterKey::from_base64(encryption_key).context("Invalid encryption key")?;

        let conn = Connection::open(db_path).context("Failed to open credentials database")?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS credentials (
                credential_ref TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                provider TEXT NOT NULL,
                access_token TEXT NOT NULL,
                access_token_nonce TEXT NOT NULL,
                refresh_token TEXT,
                refresh_token_nonce TEXT,
                expires_at TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_credentials_user ON credentials(user_id);
            "#,
        )
        .context("Failed to create credentials table")?;

        Ok(Self {
            conn: Mutex::new(conn),
            key,
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Credential store connection lock poisoned"))
    }

    /// Stores a credential under `credential_ref`, replacing any previous value.
    pub fn put(
        &self,
        credential_ref: &str,
        user_id: &str,
        provider: ProviderType,
        credential: &Credential,
    ) -> Result<()> {
        let access = self
            .key
            .seal(&credential.access_token)
            .context("Failed to encrypt access token")?;

        let refresh = credential
            .refresh_token
            .as_deref()
            .map(|token| self.key.seal(token))
            .transpose()
            .context("Failed to encrypt refresh token")?;
        let (refresh_token, refresh_nonce) = match refresh {
            Some(sealed) => (Some(sealed.ciphertext), Some(sealed.nonce)),
            None => (None, None),
        };

        let now = Utc::now().to_rfc3339();

        self.conn()?
            .execute(
                r#"
                INSERT INTO credentials (
                    credential_ref, user_id, provider,
                    access_token, access_token_nonce,
                    refresh_token, refresh_token_nonce,
                    expires_at, created_at, updated_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                ON CONFLICT(credential_ref) DO UPDATE SET
                    access_token = excluded.access_token,
                    access_token_nonce = excluded.access_token_nonce,
                    refresh_token = excluded.refresh_token,
                    refresh_token_nonce = excluded.refresh_token_nonce,
                    expires_at = excluded.expires_at,
                    updated_at = excluded.updated_at
                "#,
                params![
                    credential_ref,
                    user_id,
                    provider.as_str(),
                    access.ciphertext,
                    access.nonce,
                    refresh_token,
                    refresh_nonce,
                    credential.expires_at.to_rfc3339(),
                    now,
                    now,
                ],
            )
            .context("Failed to store credential")?;

        Ok(())
    }

    /// Retrieves and decrypts a credential.
    ///
    /// # Returns
    /// * `Ok(Some(..))` - Credential found and decrypted
    /// * `Ok(None)` - No credential under this ref
    /// * `Err` - Decryption or database failure
    pub fn get(&self, credential_ref: &str) -> Result<Option<StoredCredential>> {
        let row = self
            .conn()?
            .query_row(
                r#"
                SELECT user_id, provider,
                       access_token, access_token_nonce,
                       refresh_token, refresh_token_nonce,
                       expires_at
                FROM credentials
                WHERE credential_ref = ?1
                "#,
                params![credential_ref],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        SealedValue {
                            ciphertext: row.get(2)?,
                            nonce: row.get(3)?,
                        },
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, Option<String>>(5)?,
                        row.get::<_, String>(6)?,
                    ))
                },
            )
            .optional()
            .context("Failed to query credential")?;

        let Some((user_id, provider, access, refresh, refresh_nonce, expires_at)) = row else {
            return Ok(None);
        };

        let access_token = self
            .key
            .open(&access)
            .context("Failed to decrypt access token")?;

        let refresh_token = match (refresh, refresh_nonce) {
            (Some(ciphertext), Some(nonce)) => Some(
                self.key
                    .open(&SealedValue { ciphertext, nonce })
                    .context("Failed to decrypt refresh token")?,
            ),
            _ => None,
        };

        let expires_at = DateTime::parse_from_rfc3339(&expires_at)
            .map(|dt| dt.with_timezone(&Utc))
            .context("Failed to parse expires_at timestamp")?;

        let provider = provider
            .parse::<ProviderType>()
            .map_err(|e| anyhow!("Stored credential has invalid provider: {}", e))?;

        Ok(Some(StoredCredential {
            user_id,
            provider,
            credential: Credential {
                access_token,
                refresh_token,
                expires_at,
            },
        }))
    }

    /// Deletes a credential.
    ///
    /// # Returns
    /// * `Ok(true)` - Credential deleted
    /// * `Ok(false)` - Nothing stored under this ref
    pub fn delete(&self, credential_ref: &str) -> Result<bool> {
        let rows_affected = self
            .conn()?
            .execute(
                "DELETE FROM credentials WHERE credential_ref = ?1",
                params![credential_ref],
            )
            .context("Failed to delete credential")?;

        Ok(rows_affected > 0)
    }

    /// Lists credential refs owned by a user.
    pub fn list_by_user(&self, user_id: &str) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT credential_ref FROM credentials WHERE user_id = ?1 ORDER BY created_at",
            )
            .context("Failed to prepare query")?;

        let refs = stmt
            .query_map(params![user_id], |row| row.get(0))
            .context("Failed to execute query")?
            .collect::<Result<Vec<String>, _>>()
            .context("Failed to read results")?;

        Ok(refs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
    use chrono::Duration;

    fn create_test_store() -> CredentialStore {
        let key = BASE64.encode([0u8; 32]);
        CredentialStore::new(":memory:", &key).expect("Failed to create test store")
    }

    fn create_test_credential() -> Credential {
        Credential {
            access_token: "access-token-12345".to_string(),
            refresh_token: Some("refresh-token-67890".to_string()),
            expires_at: Utc::now() + Duration::hours(1),
        }
    }

    #[test]
    fn test_put_and_get() {
        let store = create_test_store();
        let cred = create_test_credential();

        store.put("cred-1", "u1", ProviderType::Ring, &cred).unwrap();

        let stored = store.get("cred-1").unwrap().expect("Credential not found");
        assert_eq!(stored.user_id, "u1");
        assert_eq!(stored.provider, ProviderType::Ring);
        assert_eq!(stored.credential.access_token, cred.access_token);
        assert_eq!(stored.credential.refresh_token, cred.refresh_token);
        assert_eq!(
            stored.credential.expires_at.timestamp(),
            cred.expires_at.timestamp()
        );
    }

    #[test]
    fn test_get_nonexistent() {
        let store = create_test_store();
        assert!(store.get("cred-missing").unwrap().is_none());
    }

    #[test]
    fn test_put_replaces() {
        let store = create_test_store();
        store
            .put("cred-1", "u1", ProviderType::Band, &create_test_credential())
            .unwrap();

        let rotated = Credential {
            access_token: "new-access".to_string(),
            refresh_token: None,
            expires_at: Utc::now() + Duration::hours(2),
        };
        store.put("cred-1", "u1", ProviderType::Band, &rotated).unwrap();

        let stored = store.get("cred-1").unwrap().unwrap();
        assert_eq!(stored.credential.access_token, "new-access");
        assert!(stored.credential.refresh_token.is_none());
    }

    #[test]
    fn test_delete() {
        let store = create_test_store();
        store
            .put("cred-1", "u1", ProviderType::Ring, &create_test_credential())
            .unwrap();

        assert!(store.delete("cred-1").unwrap());
        assert!(store.get("cred-1").unwrap().is_none());
        assert!(!store.delete("cred-1").unwrap());
    }

    #[test]
    fn test_list_by_user() {
        let store = create_test_store();
        let cred = create_test_credential();
        store.put("cred-1", "u1", ProviderType::Ring, &cred).unwrap();
        store.put("cred-2", "u1", ProviderType::Band, &cred).unwrap();
        store.put("cred-3", "u2", ProviderType::Ring, &cred).unwrap();

        let refs = store.list_by_user("u1").unwrap();
        assert_eq!(refs.len(), 2);
        assert!(refs.contains(&"cred-1".to_string()));
        assert!(refs.contains(&"cred-2".to_string()));
        assert!(store.list_by_user("u3").unwrap().is_empty());
    }

    #[test]
    fn test_tokens_encrypted_at_rest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.db");
        let key = BASE64.encode([7u8; 32]);

        let store = CredentialStore::new(&path, &key).unwrap();
        store
            .put("cred-1", "u1", ProviderType::Ring, &create_test_credential())
            .unwrap();
        drop(store);

        let conn = Connection::open(&path).unwrap();
        let raw: String = conn
            .query_row(
                "SELECT access_token FROM credentials WHERE credential_ref = 'cred-1'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_ne!(raw, "access-token-12345");

        // Reopening with the same key decrypts
        let store = CredentialStore::new(&path, &key).unwrap();
        let stored = store.get("cred-1").unwrap().unwrap();
        assert_eq!(stored.credential.access_token, "access-token-12345");
    }

    #[test]
    fn test_wrong_key_cannot_decrypt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.db");

        let store = CredentialStore::new(&path, &BASE64.encode([1u8; 32])).unwrap();
        store
            .put("cred-1", "u1", ProviderType::Ring, &create_test_credential())
            .unwrap();
        drop(store);

        let store = CredentialStore::new(&path, &BASE64.encode([2u8; 32])).unwrap();
        assert!(store.get("cred-1").is_err());
    }

    #[test]
    fn test_invalid_encryption_key() {
        assert!(CredentialStore::new(":memory:", "short").is_err());
        assert!(CredentialStore::new(":memory:", "not-valid-base64!@#$").is_err());
    }
}
