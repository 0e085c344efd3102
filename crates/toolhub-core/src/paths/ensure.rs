//! Directory creation.

use std::path::Path;

use super::error::PathError;

/// Ensure `path` exists as a directory, creating it and its parents if missing.
pub async fn ensure_directory(path: &Path) -> Result<(), PathError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(PathError::NotADirectory(path.to_path_buf())),
        Err(_) => {
            tokio::fs::create_dir_all(path)
                .await
                .map_err(|e| PathError::CreateFailed {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                })?;
            tracing::debug!(path = %path.display(), "Created settings directory");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_creates_nested_directory() {
        let temp = tempdir().unwrap();
        let nested = temp.path().join("a").join("b");

        ensure_directory(&nested).await.unwrap();
        assert!(nested.is_dir());

        // Idempotent
        ensure_directory(&nested).await.unwrap();
    }

    #[tokio::test]
    async fn test_rejects_file() {
        let temp = tempdir().unwrap();
        let file = temp.path().join("file");
        std::fs::write(&file, "x").unwrap();

        let result = ensure_directory(&file).await;
        assert!(matches!(result, Err(PathError::NotADirectory(_))));
    }
}
