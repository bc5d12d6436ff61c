//! The server's flat shared directory.
//!
//! Names coming off the wire are untrusted. Every lookup goes through
//! [`validate_file_name`] first and is then re-checked against the
//! canonical directory root, so neither `..` nor a symlink can reach a file
//! outside the shared directory.

use crate::error::FilesError;
use std::path::{Component, Path, PathBuf};
use tokio::fs::File;

/// A file visible in the shared directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedFile {
    /// Bare file name
    pub name: String,
    /// Size in bytes at scan time
    pub size: u64,
}

/// Check that `name` is a bare file name.
///
/// Rejects empty names, `.` and `..`, names containing a path separator,
/// a NUL byte or a line break, and anything the platform would parse as
/// more than one normal path component (absolute paths, drive prefixes).
///
/// # Errors
///
/// Returns `FilesError::UnsafeName` when the name is rejected.
pub fn validate_file_name(name: &str) -> Result<(), FilesError> {
    let unsafe_name = || FilesError::UnsafeName(name.to_string());

    if name.is_empty() || name == "." || name == ".." {
        return Err(unsafe_name());
    }
    if name.contains(['/', '\\', '\0', '\n', '\r']) {
        return Err(unsafe_name());
    }

    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(part)), None) if part == name => Ok(()),
        _ => Err(unsafe_name()),
    }
}

/// Read-only view of the shared directory
#[derive(Debug, Clone)]
pub struct SharedDirectory {
    root: PathBuf,
}

impl SharedDirectory {
    /// Open an existing directory for sharing.
    ///
    /// The directory is never created here; a missing directory is an error.
    ///
    /// # Errors
    ///
    /// Returns `FilesError::NotADirectory` if `root` does not exist or is not
    /// a directory.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, FilesError> {
        let root = root.as_ref();
        let canonical = std::fs::canonicalize(root)
            .map_err(|_| FilesError::NotADirectory(root.to_path_buf()))?;
        if !canonical.is_dir() {
            return Err(FilesError::NotADirectory(root.to_path_buf()));
        }
        Ok(Self { root: canonical })
    }

    /// Canonical path of the shared directory
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// List the regular files directly inside the shared directory.
    ///
    /// Subdirectories and other non-file entries are skipped. Entries are
    /// returned sorted by name so repeated listings are stable.
    ///
    /// # Errors
    ///
    /// Returns `FilesError::Io` if the directory cannot be read.
    pub async fn scan(&self) -> Result<Vec<SharedFile>, FilesError> {
        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| FilesError::io(&self.root, e))?;

        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| FilesError::io(&self.root, e))?
        {
            // Follows symlinks; a dangling link is simply not listed
            let metadata = match tokio::fs::metadata(entry.path()).await {
                Ok(m) => m,
                Err(e) => {
                    tracing::debug!("Skipping {:?}: {}", entry.path(), e);
                    continue;
                }
            };
            if !metadata.is_file() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                tracing::debug!("Skipping non UTF-8 file name {:?}", entry.file_name());
                continue;
            };
            files.push(SharedFile {
                name,
                size: metadata.len(),
            });
        }

        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    /// Resolve a requested name to a path strictly inside the directory.
    ///
    /// # Errors
    ///
    /// - `FilesError::UnsafeName` if `name` is not a bare file name or the
    ///   resolved path leaves the directory (symlink escape)
    /// - `FilesError::NotFound` if nothing exists under that name
    pub async fn resolve(&self, name: &str) -> Result<PathBuf, FilesError> {
        validate_file_name(name)?;

        let candidate = self.root.join(name);
        let canonical = tokio::fs::canonicalize(&candidate)
            .await
            .map_err(|_| FilesError::NotFound(candidate.clone()))?;

        if !canonical.starts_with(&self.root) {
            tracing::warn!("Rejected {:?}: resolves outside shared directory", name);
            return Err(FilesError::UnsafeName(name.to_string()));
        }
        Ok(canonical)
    }

    /// Open a shared file for reading and return it with its current size.
    ///
    /// Existence is checked now, not trusted from an earlier listing.
    ///
    /// # Errors
    ///
    /// Any error from [`resolve`](Self::resolve), `FilesError::NotAFile` for
    /// directories, or `FilesError::Io` if the file cannot be opened.
    pub async fn open_file(&self, name: &str) -> Result<(File, u64), FilesError> {
        let path = self.resolve(name).await?;
        let file = File::open(&path)
            .await
            .map_err(|e| FilesError::io(&path, e))?;
        let metadata = file
            .metadata()
            .await
            .map_err(|e| FilesError::io(&path, e))?;
        if !metadata.is_file() {
            return Err(FilesError::NotAFile(path));
        }
        Ok((file, metadata.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn shared_with(files: &[(&str, &[u8])]) -> (TempDir, SharedDirectory) {
        let dir = TempDir::new().unwrap();
        for (name, contents) in files {
            std::fs::write(dir.path().join(name), contents).unwrap();
        }
        let shared = SharedDirectory::open(dir.path()).unwrap();
        (dir, shared)
    }

    #[test]
    fn test_validate_accepts_bare_names() {
        assert!(validate_file_name("a.txt").is_ok());
        assert!(validate_file_name("archive.tar.gz").is_ok());
        assert!(validate_file_name(".hidden").is_ok());
        assert!(validate_file_name("with space.bin").is_ok());
        assert!(validate_file_name("a..b").is_ok());
    }

    #[test]
    fn test_validate_rejects_paths() {
        let rejected = [
            "", ".", "..", "../x", "a/b", "/etc/passwd", "..\\x", "a\\b", "nul\0", "two\nlines",
        ];
        for name in rejected {
            assert!(
                matches!(validate_file_name(name), Err(FilesError::UnsafeName(_))),
                "{name:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_open_missing_directory() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(
            SharedDirectory::open(&missing),
            Err(FilesError::NotADirectory(_))
        ));
        assert!(!missing.exists());
    }

    #[test]
    fn test_open_rejects_regular_file() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("f");
        std::fs::write(&file, b"x").unwrap();
        assert!(SharedDirectory::open(&file).is_err());
    }

    #[tokio::test]
    async fn test_scan_lists_files_sorted() {
        let (dir, shared) = shared_with(&[("b.bin", b"12345"), ("a.txt", b"hello")]);
        std::fs::create_dir(dir.path().join("subdir")).unwrap();

        let files = shared.scan().await.unwrap();
        assert_eq!(
            files,
            vec![
                SharedFile {
                    name: "a.txt".into(),
                    size: 5
                },
                SharedFile {
                    name: "b.bin".into(),
                    size: 5
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_scan_empty_directory() {
        let (_dir, shared) = shared_with(&[]);
        assert!(shared.scan().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_resolve_and_open() {
        let (_dir, shared) = shared_with(&[("a.txt", b"hello world!")]);
        let (_file, size) = shared.open_file("a.txt").await.unwrap();
        assert_eq!(size, 12);
    }

    #[tokio::test]
    async fn test_open_missing_file() {
        let (_dir, shared) = shared_with(&[]);
        assert!(matches!(
            shared.open_file("missing.txt").await,
            Err(FilesError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_open_traversal_is_unsafe() {
        let (_dir, shared) = shared_with(&[]);
        assert!(matches!(
            shared.open_file("../../etc/passwd").await,
            Err(FilesError::UnsafeName(_))
        ));
    }

    #[tokio::test]
    async fn test_open_directory_is_not_a_file() {
        let (dir, shared) = shared_with(&[]);
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        assert!(matches!(
            shared.open_file("sub").await,
            Err(FilesError::NotAFile(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_escape_is_unsafe() {
        let outside = TempDir::new().unwrap();
        std::fs::write(outside.path().join("secret"), b"s").unwrap();
        let (dir, shared) = shared_with(&[]);
        std::os::unix::fs::symlink(outside.path().join("secret"), dir.path().join("link"))
            .unwrap();

        assert!(matches!(
            shared.open_file("link").await,
            Err(FilesError::UnsafeName(_))
        ));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn names_with_separators_rejected(
                head in "[a-z]{0,8}",
                sep in prop::sample::select(vec!['/', '\\', '\0', '\n', '\r']),
                tail in "[a-z]{0,8}",
            ) {
                let name = format!("{head}{sep}{tail}");
                prop_assert!(validate_file_name(&name).is_err());
            }

            #[test]
            fn plain_names_accepted(name in "[a-zA-Z0-9_-][a-zA-Z0-9._-]{0,30}") {
                prop_assume!(name != "." && name != "..");
                prop_assert!(validate_file_name(&name).is_ok());
            }
        }
    }
}
