// databasebackup/src/config/credentials.rs
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{info, warn};

use super::{CredentialSettings, EnvSnapshot, ExecutionMode};
use crate::errors::{BackupError, Result};

pub const ACCESS_KEY_VAR: &str = "AWS_ACCESS_KEY_ID";
pub const SECRET_KEY_VAR: &str = "AWS_SECRET_ACCESS_KEY";
pub const SESSION_TOKEN_VAR: &str = "AWS_SESSION_TOKEN";
pub const REGION_VAR: &str = "AWS_REGION";
pub const ENDPOINT_VAR: &str = "AWS_ENDPOINT_URL";
/// Holds the secret JSON document when no secret file is mounted.
pub const SECRETS_VAR: &str = "STORAGE_SECRETS";

/// Credentials for the object storage upload.
pub struct StorageCredentials {
    pub access_key_id: String,
    secret_access_key: SecretString,
    session_token: Option<SecretString>,
    pub region: Option<String>,
    pub endpoint_url: Option<String>,
}

impl StorageCredentials {
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        StorageCredentials {
            access_key_id: access_key_id.into(),
            secret_access_key: SecretString::from(secret_access_key.into()),
            session_token: None,
            region: None,
            endpoint_url: None,
        }
    }

    pub fn secret_access_key(&self) -> &str {
        self.secret_access_key.expose_secret()
    }

    pub fn session_token(&self) -> Option<&str> {
        self.session_token.as_ref().map(|t| t.expose_secret())
    }
}

impl fmt::Debug for StorageCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"[REDACTED]")
            .field("region", &self.region)
            .field("endpoint_url", &self.endpoint_url)
            .finish()
    }
}

#[derive(Deserialize)]
struct SecretDocument {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
    region: Option<String>,
    endpoint_url: Option<String>,
}

impl From<SecretDocument> for StorageCredentials {
    fn from(doc: SecretDocument) -> Self {
        StorageCredentials {
            access_key_id: doc.access_key_id,
            secret_access_key: SecretString::from(doc.secret_access_key),
            session_token: doc.session_token.map(SecretString::from),
            region: doc.region,
            endpoint_url: doc.endpoint_url,
        }
    }
}

/// Credentials written to disk for the duration of a managed run.
/// The file is removed when this value is dropped.
#[derive(Debug)]
pub struct MaterializedSecret {
    path: PathBuf,
}

impl MaterializedSecret {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for MaterializedSecret {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => info!(path = %self.path.display(), "removed materialized credentials"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "failed to remove materialized credentials"),
        }
    }
}

#[derive(Debug)]
pub struct ResolvedCredentials {
    pub credentials: StorageCredentials,
    pub materialized: Option<MaterializedSecret>,
}

/// Resolves upload credentials for the given execution mode.
pub fn resolve(
    mode: ExecutionMode,
    settings: &CredentialSettings,
    env: &EnvSnapshot,
) -> Result<ResolvedCredentials> {
    match mode {
        ExecutionMode::Local => {
            info!("job running in normal mode, reading storage credentials from environment");
            Ok(ResolvedCredentials { credentials: from_env(env)?, materialized: None })
        }
        ExecutionMode::Managed => {
            info!("job running in managed mode, saving credentials file");
            let document = read_secret_document(settings, env)?;
            let materialized = materialize(&settings.credentials_path, &document)?;
            let credentials = load_from_file(materialized.path())?;
            info!(path = %materialized.path().display(), "credentials saved successfully");
            Ok(ResolvedCredentials { credentials, materialized: Some(materialized) })
        }
    }
}

fn from_env(env: &EnvSnapshot) -> Result<StorageCredentials> {
    let required = |key: &str| {
        env.get(key)
            .map(str::to_string)
            .ok_or_else(|| BackupError::config(format!("{} must be set for local runs", key)))
    };
    let mut credentials = StorageCredentials::new(required(ACCESS_KEY_VAR)?, required(SECRET_KEY_VAR)?);
    credentials.session_token = env.get(SESSION_TOKEN_VAR).map(|t| SecretString::from(t.to_string()));
    credentials.region = env.get(REGION_VAR).map(str::to_string);
    credentials.endpoint_url = env.get(ENDPOINT_VAR).map(str::to_string);
    Ok(credentials)
}

fn read_secret_document(settings: &CredentialSettings, env: &EnvSnapshot) -> Result<String> {
    if settings.secret_file.is_file() {
        return fs::read_to_string(&settings.secret_file).map_err(|e| {
            BackupError::config(format!(
                "Failed to read secret file {}: {}",
                settings.secret_file.display(),
                e
            ))
        });
    }
    env.get(SECRETS_VAR).map(str::to_string).ok_or_else(|| {
        BackupError::config(format!(
            "managed mode needs a secret file at {} or {} in the environment",
            settings.secret_file.display(),
            SECRETS_VAR
        ))
    })
}

fn materialize(path: &Path, document: &str) -> Result<MaterializedSecret> {
    let write_err = |e: std::io::Error| {
        BackupError::config(format!("Failed to write credentials file {}: {}", path.display(), e))
    };

    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path).map_err(write_err)?;
    // From here on the guard owns the file, so a failed write still removes it.
    let secret = MaterializedSecret { path: path.to_path_buf() };
    file.write_all(document.as_bytes()).map_err(write_err)?;
    Ok(secret)
}

fn load_from_file(path: &Path) -> Result<StorageCredentials> {
    let content = fs::read_to_string(path).map_err(|e| {
        BackupError::config(format!("Failed to read credentials file {}: {}", path.display(), e))
    })?;
    let document: SecretDocument = serde_json::from_str(&content)
        .map_err(|e| BackupError::config(format!("Malformed storage credentials: {}", e)))?;
    Ok(document.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET_JSON: &str = r#"{
        "access_key_id": "AKIAMANAGED",
        "secret_access_key": "managed-secret",
        "region": "eu-west-1",
        "endpoint_url": "https://storage.example.com"
    }"#;

    fn settings_in(dir: &Path) -> CredentialSettings {
        CredentialSettings {
            secret_file: dir.join("mounted/storage.json"),
            credentials_path: dir.join("storage-credentials.json"),
        }
    }

    #[test]
    fn test_local_mode_reads_snapshot_and_writes_nothing() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let env: EnvSnapshot = [
            (ACCESS_KEY_VAR, "AKIALOCAL"),
            (SECRET_KEY_VAR, "local-secret"),
            (REGION_VAR, "us-east-2"),
        ]
        .into_iter()
        .collect();

        let resolved = resolve(ExecutionMode::Local, &settings_in(dir.path()), &env)?;
        assert_eq!(resolved.credentials.access_key_id, "AKIALOCAL");
        assert_eq!(resolved.credentials.secret_access_key(), "local-secret");
        assert_eq!(resolved.credentials.region.as_deref(), Some("us-east-2"));
        assert_eq!(resolved.credentials.session_token(), None);
        assert!(resolved.materialized.is_none());
        assert!(!dir.path().join("storage-credentials.json").exists());
        Ok(())
    }

    #[test]
    fn test_local_mode_missing_key_is_config_error() {
        let env: EnvSnapshot = [(ACCESS_KEY_VAR, "AKIALOCAL")].into_iter().collect();
        let settings = settings_in(Path::new("/nonexistent"));
        let err = resolve(ExecutionMode::Local, &settings, &env).unwrap_err();
        assert!(matches!(err, BackupError::Config(_)));
    }

    #[test]
    fn test_managed_mode_materializes_mounted_secret_for_the_run() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let settings = settings_in(dir.path());
        fs::create_dir_all(settings.secret_file.parent().unwrap())?;
        fs::write(&settings.secret_file, SECRET_JSON)?;

        let resolved = resolve(ExecutionMode::Managed, &settings, &EnvSnapshot::default())?;
        assert_eq!(resolved.credentials.access_key_id, "AKIAMANAGED");
        assert_eq!(resolved.credentials.endpoint_url.as_deref(), Some("https://storage.example.com"));
        let written = resolved.materialized.as_ref().unwrap().path().to_path_buf();
        assert_eq!(written, settings.credentials_path);
        assert!(written.exists());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            assert_eq!(fs::metadata(&written)?.permissions().mode() & 0o777, 0o600);
        }

        drop(resolved);
        assert!(!written.exists());
        Ok(())
    }

    #[test]
    fn test_managed_mode_falls_back_to_env_secret() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let env: EnvSnapshot = [(SECRETS_VAR, SECRET_JSON)].into_iter().collect();
        let resolved = resolve(ExecutionMode::Managed, &settings_in(dir.path()), &env)?;
        assert_eq!(resolved.credentials.secret_access_key(), "managed-secret");
        Ok(())
    }

    #[test]
    fn test_managed_mode_without_any_secret_is_config_error() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let err = resolve(ExecutionMode::Managed, &settings_in(dir.path()), &EnvSnapshot::default())
            .unwrap_err();
        assert!(matches!(err, BackupError::Config(_)));
        Ok(())
    }

    #[test]
    fn test_malformed_secret_is_config_error_and_file_is_removed() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let settings = settings_in(dir.path());
        let env: EnvSnapshot = [(SECRETS_VAR, "{ not json")].into_iter().collect();
        let err = resolve(ExecutionMode::Managed, &settings, &env).unwrap_err();
        assert!(matches!(err, BackupError::Config(_)));
        assert!(!settings.credentials_path.exists());
        Ok(())
    }

    #[test]
    fn test_debug_redacts_secret() {
        let credentials = StorageCredentials::new("AKIA", "very-secret");
        assert!(!format!("{:?}", credentials).contains("very-secret"));
    }
}
