use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use rapport_core::knowledge::{ReferenceLibrary, SourceError};

/// Reference documents stored as files under a directory.
#[derive(Clone, Debug)]
pub struct DirectoryLibrary {
    root: PathBuf,
}

impl DirectoryLibrary {
    /// Creates a library reading documents under `root`.
    #[inline]
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    /// Returns the directory the documents are read from.
    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl ReferenceLibrary for DirectoryLibrary {
    async fn read_text(&self, path: &str) -> Result<String, SourceError> {
        let relative = Path::new(path);
        if !relative
            .components()
            .all(|component| matches!(component, Component::Normal(_)))
        {
            return Err(format!("document path escapes the library: {path}").into());
        }
        let text = tokio::fs::read_to_string(self.root.join(relative)).await?;
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_text() {
        let root = std::env::temp_dir().join(format!(
            "rapport-library-{}",
            uuid::Uuid::new_v4().simple()
        ));
        std::fs::create_dir_all(root.join("knowledge")).unwrap();
        std::fs::write(root.join("knowledge/instructions.txt"), "Be kind.").unwrap();

        let library = DirectoryLibrary::new(&root);
        assert_eq!(
            library.read_text("knowledge/instructions.txt").await.unwrap(),
            "Be kind."
        );
        assert!(library.read_text("knowledge/missing.txt").await.is_err());
        assert!(library.read_text("../instructions.txt").await.is_err());
        assert!(library.read_text("/etc/hostname").await.is_err());

        std::fs::remove_dir_all(&root).ok();
    }
}
