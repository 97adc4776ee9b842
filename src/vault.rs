// 🔐 Credential Vault - durable home for exported sessions
// Primary path: `<sessions_dir>/<name>.session`, published by hard link so the
// name is claimed atomically. Fallback path: the `credentials` table.

use crate::db::{self, Event, Store};
use crate::error::{Result, StewardError};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Where a credential ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredAt {
    File(PathBuf),
    Database,
}

pub struct CredentialVault {
    sessions_dir: PathBuf,
}

/// Session names double as file names
pub fn validate_session_name(raw: &str) -> Result<String> {
    let name = raw.trim();

    if name.is_empty() {
        return Err(StewardError::Validation("Session name cannot be empty.".to_string()));
    }
    let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.');
    if name.len() > 64 || name.starts_with('.') || !name.chars().all(allowed) {
        return Err(StewardError::Validation(
            "Session name may only use letters, digits, '-', '_' and '.' (max 64, not starting with '.').".to_string(),
        ));
    }

    Ok(name.to_string())
}

impl CredentialVault {
    pub fn new(sessions_dir: impl Into<PathBuf>) -> Self {
        CredentialVault {
            sessions_dir: sessions_dir.into(),
        }
    }

    pub fn session_path(&self, session_name: &str) -> PathBuf {
        self.sessions_dir.join(format!("{}.session", session_name))
    }

    /// Persist a credential, trying the file first and the database second.
    /// Errors only when neither path holds the blob afterwards.
    pub fn store(&self, store: &Store, session_name: &str, blob: &str) -> Result<StoredAt> {
        // A name parked in the fallback table is taken too
        if db::get_credential(&*db::lock(store)?, session_name)?.is_some() {
            return Err(StewardError::SessionNameTaken(session_name.to_string()));
        }

        let stored = match self.write_file(session_name, blob) {
            Ok(path) => StoredAt::File(path),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(StewardError::SessionNameTaken(session_name.to_string()));
            }
            Err(file_err) => {
                warn!(session = session_name, error = %file_err, "session file write failed, using database fallback");

                let fallback = db::lock(store)
                    .and_then(|conn| db::insert_credential(&conn, session_name, blob));
                match fallback {
                    Ok(()) => StoredAt::Database,
                    Err(StewardError::SessionNameTaken(name)) => {
                        return Err(StewardError::SessionNameTaken(name));
                    }
                    Err(db_err) => {
                        return Err(StewardError::CredentialNotSaved {
                            session_name: session_name.to_string(),
                            reason: format!("file: {}; database: {}", file_err, db_err),
                        });
                    }
                }
            }
        };

        if let Ok(conn) = db::lock(store) {
            db::record_event(
                &conn,
                Event::new(
                    "credential_stored",
                    "account",
                    session_name,
                    serde_json::json!({ "location": match &stored {
                        StoredAt::File(path) => path.display().to_string(),
                        StoredAt::Database => "database".to_string(),
                    }}),
                    "vault",
                ),
            );
        }
        info!(session = session_name, location = ?stored, "credential stored");

        Ok(stored)
    }

    /// Whether either path already holds this name
    pub fn exists(&self, store: &Store, session_name: &str) -> Result<bool> {
        if self.session_path(session_name).exists() {
            return Ok(true);
        }
        let conn = db::lock(store)?;
        Ok(db::get_credential(&conn, session_name)?.is_some())
    }

    fn write_file(&self, session_name: &str, blob: &str) -> io::Result<PathBuf> {
        // A blocked directory must not read as "name already taken"
        fs::create_dir_all(&self.sessions_dir)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

        let final_path = self.session_path(session_name);
        let tmp_path = self
            .sessions_dir
            .join(format!(".{}.{}.tmp", session_name, uuid::Uuid::new_v4()));

        let result = write_and_publish(&tmp_path, &final_path, blob);
        let _ = fs::remove_file(&tmp_path);
        result.map(|_| final_path)
    }
}

/// Full content lands in `tmp`, then `hard_link` publishes it; the link fails
/// with `AlreadyExists` if another flow claimed the name first.
fn write_and_publish(tmp: &Path, final_path: &Path, blob: &str) -> io::Result<()> {
    let mut file = fs::OpenOptions::new().write(true).create_new(true).open(tmp)?;
    file.write_all(blob.as_bytes())?;
    file.sync_all()?;
    drop(file);

    fs::hard_link(tmp, final_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_memory_store;

    #[test]
    fn test_validate_session_name() {
        assert_eq!(validate_session_name("  acc1 ").unwrap(), "acc1");
        assert_eq!(validate_session_name("work-2.main_b").unwrap(), "work-2.main_b");

        for bad in ["", "   ", "../escape", "a/b", ".hidden", "with space"] {
            assert!(validate_session_name(bad).unwrap_err().is_validation(), "{:?}", bad);
        }
    }

    #[test]
    fn test_store_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_memory_store().unwrap();
        let vault = CredentialVault::new(dir.path().join("sessions"));

        let stored = vault.store(&store, "acc1", "1AbCdEf==").unwrap();

        let path = dir.path().join("sessions").join("acc1.session");
        assert_eq!(stored, StoredAt::File(path.clone()));
        assert_eq!(fs::read_to_string(&path).unwrap(), "1AbCdEf==");
        assert!(vault.exists(&store, "acc1").unwrap());

        // No temp files left behind
        let entries = fs::read_dir(dir.path().join("sessions")).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn test_store_refuses_taken_name() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_memory_store().unwrap();
        let vault = CredentialVault::new(dir.path());

        vault.store(&store, "acc1", "first").unwrap();
        let err = vault.store(&store, "acc1", "second").unwrap_err();

        assert!(matches!(err, StewardError::SessionNameTaken(_)));
        assert_eq!(fs::read_to_string(vault.session_path("acc1")).unwrap(), "first");
    }

    #[test]
    fn test_falls_back_to_database() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the directory should be makes every file write fail
        let blocked = dir.path().join("sessions");
        fs::write(&blocked, "not a directory").unwrap();

        let store = open_memory_store().unwrap();
        let vault = CredentialVault::new(&blocked);

        assert_eq!(vault.store(&store, "acc1", "blob").unwrap(), StoredAt::Database);
        assert!(vault.exists(&store, "acc1").unwrap());

        let conn = db::lock(&store).unwrap();
        assert_eq!(db::get_credential(&conn, "acc1").unwrap().as_deref(), Some("blob"));
    }
}
