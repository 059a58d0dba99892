use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::StoreError;
use crate::model::AccessCredential;

/// Key under which the session credential is stored.
pub const CREDENTIAL_KEY: &str = "access_credential";

/// Durable key/value storage for secrets.
pub trait CredentialStore: Send + Sync {
    fn save(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn get(&self, key: &str) -> Result<String, StoreError>;
    fn delete(&self, key: &str) -> Result<(), StoreError>;
}

pub fn save_credential(store: &dyn CredentialStore, credential: &AccessCredential) -> Result<(), StoreError> {
    let raw = serde_json::to_string(credential)?;
    store.save(CREDENTIAL_KEY, &raw)
}

/// Loads the stored credential; `Ok(None)` when nothing was saved.
pub fn load_credential(store: &dyn CredentialStore) -> Result<Option<AccessCredential>, StoreError> {
    match store.get(CREDENTIAL_KEY) {
        Ok(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        Err(StoreError::NotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

/// One file per key under a private directory (`~/.cloud-tui` by default).
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    base_dir: PathBuf,
}

impl FileCredentialStore {
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn new_default() -> Self {
        Self::new(default_dir())
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.base_dir.join(normalize_key(key))
    }

    fn ensure_parent(path: &Path) -> Result<(), StoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

impl CredentialStore for FileCredentialStore {
    fn save(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let path = self.path_for(key);
        Self::ensure_parent(&path)?;
        write_private(&path, value.as_bytes())?;
        debug!("Stored '{}' at {}", key, path.display());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<String, StoreError> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(raw) => Ok(raw),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(StoreError::NotFound(key.to_string())),
            Err(err) => Err(err.into()),
        }
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Writes through a 0600 temp file renamed over `path`, so the value is never
/// readable by others, not even briefly.
fn write_private(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let file_name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    let temp_path = path.with_file_name(format!(".{}.tmp-{}", file_name, std::process::id()));
    match fs::remove_file(&temp_path) {
        Err(err) if err.kind() != ErrorKind::NotFound => return Err(err),
        _ => {}
    }

    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let written = (|| -> std::io::Result<()> {
        let mut file = options.open(&temp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
        fs::rename(&temp_path, path)
    })();
    if written.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    written
}

fn default_dir() -> PathBuf {
    directories::UserDirs::new()
        .map(|dirs| dirs.home_dir().join(".cloud-tui"))
        .unwrap_or_else(|| PathBuf::from(".cloud-tui"))
}

fn normalize_key(key: &str) -> String {
    let cleaned: String = key
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .collect();
    if cleaned.trim_matches('-').is_empty() {
        "default".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
pub mod memory {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    /// In-memory store that counts writes.
    #[derive(Default)]
    pub struct MemoryStore {
        values: Mutex<HashMap<String, String>>,
        saves: Mutex<Vec<String>>,
    }

    impl MemoryStore {
        pub fn saved_values(&self) -> Vec<String> {
            self.saves.lock().unwrap().clone()
        }
    }

    impl CredentialStore for MemoryStore {
        fn save(&self, key: &str, value: &str) -> Result<(), StoreError> {
            self.values.lock().unwrap().insert(key.to_string(), value.to_string());
            self.saves.lock().unwrap().push(value.to_string());
            Ok(())
        }

        fn get(&self, key: &str) -> Result<String, StoreError> {
            self.values
                .lock()
                .unwrap()
                .get(key)
                .cloned()
                .ok_or_else(|| StoreError::NotFound(key.to_string()))
        }

        fn delete(&self, key: &str) -> Result<(), StoreError> {
            self.values.lock().unwrap().remove(key);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use time::OffsetDateTime;

    fn temp_store() -> (TempDir, FileCredentialStore) {
        let dir = TempDir::new().unwrap();
        let store = FileCredentialStore::new(dir.path().join("creds"));
        (dir, store)
    }

    #[test]
    fn test_credential_round_trip() {
        let (_dir, store) = temp_store();
        assert!(load_credential(&store).unwrap().is_none());

        let cred = AccessCredential::issued(
            "access".into(),
            Some("refresh".into()),
            3600,
            OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap(),
        )
        .unwrap();
        save_credential(&store, &cred).unwrap();
        assert_eq!(load_credential(&store).unwrap(), Some(cred));
    }

    #[test]
    fn test_get_missing_is_not_found() {
        let (_dir, store) = temp_store();
        assert!(matches!(store.get("nope"), Err(StoreError::NotFound(k)) if k == "nope"));
    }

    #[test]
    fn test_delete_is_idempotent() {
        let (_dir, store) = temp_store();
        store.save("k", "v").unwrap();
        store.delete("k").unwrap();
        store.delete("k").unwrap();
        assert!(matches!(store.get("k"), Err(StoreError::NotFound(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_file_is_private() {
        use std::os::unix::fs::PermissionsExt;
        let (_dir, store) = temp_store();
        store.save(CREDENTIAL_KEY, "{}").unwrap();
        let mode = fs::metadata(store.path_for(CREDENTIAL_KEY)).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[cfg(unix)]
    #[test]
    fn test_overwrite_replaces_readable_file_with_private_one() {
        use std::os::unix::fs::PermissionsExt;
        let (dir, store) = temp_store();
        let path = store.path_for(CREDENTIAL_KEY);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "old").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();

        store.save(CREDENTIAL_KEY, "new").unwrap();
        assert_eq!(store.get(CREDENTIAL_KEY).unwrap(), "new");
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        let leftovers: Vec<_> = fs::read_dir(dir.path().join("creds")).unwrap().collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[test]
    fn test_corrupt_credential_is_an_error() {
        let (_dir, store) = temp_store();
        store.save(CREDENTIAL_KEY, "not json").unwrap();
        assert!(matches!(load_credential(&store), Err(StoreError::Serialization(_))));
    }

    #[test]
    fn test_keys_are_normalized() {
        assert_eq!(normalize_key("a/b c"), "a-b-c");
        assert_eq!(normalize_key("  "), "default");
    }
}
