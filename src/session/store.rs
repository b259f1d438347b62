//! Saved session configuration.
//!
//! The last configuration a user saved is kept as JSON so it can be offered
//! again the next time the rig starts. A missing file means "never saved" and
//! yields [`SessionConfig::default`].

use super::SessionConfig;
use crate::error::RigResult;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// JSON file holding the last saved [`SessionConfig`].
#[derive(Debug, Clone)]
pub struct SessionConfigStore {
    path: PathBuf,
}

impl SessionConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Saved configuration, or the default one if nothing was saved yet.
    pub async fn load(&self) -> RigResult<SessionConfig> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No saved session config; using defaults");
                Ok(SessionConfig::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Validate and persist `config`. Invalid configurations are not written.
    pub async fn save(&self, config: &SessionConfig) -> RigResult<()> {
        config.validate()?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec_pretty(config)?;
        tokio::fs::write(&self.path, json).await?;
        info!(path = %self.path.display(), name = %config.name, "Session config saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RigError;
    use std::time::Duration;

    #[tokio::test]
    async fn test_missing_file_gives_default() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionConfigStore::new(dir.path().join("session.json"));
        assert_eq!(store.load().await.unwrap(), SessionConfig::default());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionConfigStore::new(dir.path().join("nested/session.json"));
        let config = SessionConfig::timed("andromeda", Duration::from_secs(600))
            .with_interval(Duration::from_secs(20));

        store.save(&config).await.unwrap();
        assert_eq!(store.load().await.unwrap(), config);
    }

    #[tokio::test]
    async fn test_invalid_config_not_saved() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionConfigStore::new(dir.path().join("session.json"));
        let err = store.save(&SessionConfig::count("bad", 0)).await.unwrap_err();
        assert!(matches!(err, RigError::InvalidSessionConfig(_)));
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, b"{not json").unwrap();
        let err = SessionConfigStore::new(path).load().await.unwrap_err();
        assert!(matches!(err, RigError::Serialization(_)));
    }
}
