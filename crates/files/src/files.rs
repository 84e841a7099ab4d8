//! Content-addressed file store
//!
//! This module provides [`FileStore`], the storage behind shared records. Patients upload
//! documents (reports, scans, prescriptions); each is stored once under its SHA-256 hash and
//! that hash is the opaque file reference later handed to the locator resolver.
//!
//! # Content Addressing
//!
//! Files are stored using their SHA-256 hash as the identifier. This provides:
//!
//! - **Deduplication**: Identical files are stored once
//! - **Integrity**: File content can be verified against its hash
//! - **Immutability**: Files cannot be modified after creation
//! - **Safe references**: A reference is validated as 64 hex characters before it ever becomes
//!   a path, so scanned or user-supplied references cannot traverse the filesystem
//!
//! # Implementation Notes
//!
//! - The store performs minimal I/O in the constructor (validation only)
//! - Shard directories are created on first write
//! - Creation uses `create_new`, so two concurrent uploads of the same content cannot both
//!   succeed

use crate::{FilesError, FILES_FOLDER_NAME, HASH_ALGORITHM};
use chrono::{DateTime, Utc};
use recordlink_types::{NonEmptyText, Sha256Hash};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Fallback name for uploads that arrive without one.
const UNNAMED_UPLOAD: &str = "upload";

/// Metadata for a stored file
///
/// Returned from every successful add. Contains no patient identifiers; the link between a
/// patient and a file exists only inside the tokens the patient issues.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct FileMetadata {
    /// Hashing algorithm used (always "sha256" for current implementation)
    pub hash_algorithm: NonEmptyText,

    /// Hexadecimal digest of the file content
    pub hash: Sha256Hash,

    /// Path relative to the store root where the file is stored
    pub relative_path: NonEmptyText,

    /// Size of the file in bytes
    pub size_bytes: u64,

    /// Detected media type (MIME type), if available
    ///
    /// This is a best-effort detection and should not be considered authoritative.
    pub media_type: Option<NonEmptyText>,

    /// Original filename supplied by the uploader (final path component only)
    pub original_filename: NonEmptyText,

    /// UTC timestamp when the file was stored
    pub stored_at: DateTime<Utc>,
}

/// Content-addressed file store rooted at one directory
#[derive(Debug)]
pub struct FileStore {
    /// Canonicalised store root
    root_directory: PathBuf,
}

impl FileStore {
    /// Opens a store rooted at `root_directory`
    ///
    /// # Errors
    ///
    /// Returns `FilesError::InvalidRootDirectory` if the directory does not exist, is not a
    /// directory, or cannot be canonicalised.
    pub fn new(root_directory: &Path) -> Result<Self, FilesError> {
        if !root_directory.is_dir() {
            return Err(FilesError::InvalidRootDirectory(format!(
                "Directory does not exist or is not a directory: {}",
                root_directory.display()
            )));
        }

        let root_directory = root_directory.canonicalize().map_err(|e| {
            FilesError::InvalidRootDirectory(format!(
                "Cannot canonicalize path {}: {}",
                root_directory.display(),
                e
            ))
        })?;

        Ok(Self { root_directory })
    }

    /// Adds a file from the local filesystem
    ///
    /// # Errors
    ///
    /// Returns `FilesError` if the source cannot be read or [`Self::add_bytes`] fails.
    pub fn add(&self, source_path: &Path) -> Result<FileMetadata, FilesError> {
        let buffer = fs::read(source_path).map_err(|e| {
            FilesError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to read source file {}: {}", source_path.display(), e),
            ))
        })?;

        let name = source_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(UNNAMED_UPLOAD);

        self.add_bytes(name, &buffer)
    }

    /// Stores `bytes` under their SHA-256 hash
    ///
    /// # Storage Location
    ///
    /// `<root>/files/sha256/<h[0..2]>/<h[2..4]>/<h>`
    ///
    /// # Errors
    ///
    /// Returns `FilesError` if:
    /// - Identical content is already stored (`FileAlreadyExists`)
    /// - Directory creation or the write fails (`Io`)
    pub fn add_bytes(
        &self,
        original_filename: &str,
        bytes: &[u8],
    ) -> Result<FileMetadata, FilesError> {
        let digest: [u8; 32] = Sha256::digest(bytes).into();
        let hash = Sha256Hash::from_bytes(&digest);

        let relative_path = NonEmptyText::new(compute_relative_path(&hash))?;
        let storage_path = self.root_directory.join(relative_path.as_str());

        if let Some(parent) = storage_path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                FilesError::Io(std::io::Error::new(
                    e.kind(),
                    format!(
                        "Failed to create storage directory {}: {}",
                        parent.display(),
                        e
                    ),
                ))
            })?;
        }

        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&storage_path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(FilesError::FileAlreadyExists(hash.to_string()));
            }
            Err(e) => return Err(FilesError::Io(e)),
        };

        if let Err(e) = file.write_all(bytes).and_then(|()| file.sync_all()) {
            // Leave no truncated file behind to be served under a valid hash.
            let _ = fs::remove_file(&storage_path);
            return Err(FilesError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to write file to {}: {}", storage_path.display(), e),
            )));
        }

        tracing::info!(hash = %hash, size_bytes = bytes.len(), "stored file");

        Ok(FileMetadata {
            hash_algorithm: NonEmptyText::new(HASH_ALGORITHM)?,
            hash,
            relative_path,
            size_bytes: bytes.len() as u64,
            media_type: detect_media_type(bytes),
            original_filename: sanitise_filename(original_filename)?,
            stored_at: Utc::now(),
        })
    }

    /// Reads a stored file
    ///
    /// # Errors
    ///
    /// Returns `FilesError::NotFound` if no file is stored under `hash`, or `Io` on read failure.
    pub fn read(&self, hash: &Sha256Hash) -> Result<Vec<u8>, FilesError> {
        let storage_path = self.compute_storage_path(hash);

        fs::read(&storage_path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => FilesError::NotFound(hash.to_string()),
            _ => FilesError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to read file from {}: {}", storage_path.display(), e),
            )),
        })
    }

    /// Whether a file is stored under `hash`
    pub fn contains(&self, hash: &Sha256Hash) -> Result<bool, FilesError> {
        Ok(self.compute_storage_path(hash).try_exists()?)
    }

    /// Detected media type of a stored file, if recognisable
    ///
    /// # Errors
    ///
    /// Returns `FilesError::NotFound` if no file is stored under `hash`.
    pub fn media_type(&self, hash: &Sha256Hash) -> Result<Option<NonEmptyText>, FilesError> {
        let storage_path = self.compute_storage_path(hash);

        match infer::get_from_path(&storage_path) {
            Ok(kind) => Ok(kind.and_then(|k| NonEmptyText::new(k.mime_type()).ok())),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(FilesError::NotFound(hash.to_string())),
            Err(e) => Err(FilesError::Io(e)),
        }
    }

    /// Returns the canonicalised store root
    #[must_use]
    pub fn root_directory(&self) -> &Path {
        &self.root_directory
    }

    fn compute_storage_path(&self, hash: &Sha256Hash) -> PathBuf {
        self.root_directory.join(compute_relative_path(hash))
    }
}

/// `files/sha256/<shard1>/<shard2>/<hash>`
fn compute_relative_path(hash: &Sha256Hash) -> String {
    let (shard1, shard2) = hash.shards();
    format!(
        "{}/{}/{}/{}/{}",
        FILES_FOLDER_NAME, HASH_ALGORITHM, shard1, shard2, hash
    )
}

/// Best-effort media type from magic bytes
pub fn detect_media_type(bytes: &[u8]) -> Option<NonEmptyText> {
    infer::get(bytes).and_then(|kind| NonEmptyText::new(kind.mime_type()).ok())
}

/// Keeps only the final path component of an uploaded name.
fn sanitise_filename(name: &str) -> Result<NonEmptyText, FilesError> {
    let base = Path::new(name.trim())
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(UNNAMED_UPLOAD);

    Ok(NonEmptyText::new(base).or_else(|_| NonEmptyText::new(UNNAMED_UPLOAD))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, FileStore) {
        let temp = TempDir::new().unwrap();
        let store = FileStore::new(temp.path()).unwrap();
        (temp, store)
    }

    #[test]
    fn test_new_rejects_missing_root() {
        let temp = TempDir::new().unwrap();
        let result = FileStore::new(&temp.path().join("missing"));
        assert!(matches!(result, Err(FilesError::InvalidRootDirectory(_))));
    }

    #[test]
    fn test_new_rejects_file_as_root() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("plain.txt");
        fs::write(&file, b"x").unwrap();
        assert!(FileStore::new(&file).is_err());
    }

    #[test]
    fn test_add_bytes_success() {
        let (_temp, store) = store();
        let metadata = store.add_bytes("test.txt", b"Hello, World!").unwrap();

        assert_eq!(metadata.hash_algorithm.as_str(), "sha256");
        assert_eq!(metadata.size_bytes, 13);
        assert_eq!(metadata.original_filename.as_str(), "test.txt");
        assert_eq!(
            metadata.hash.as_str(),
            "dffd6021bb2bd5b0af676290809ec3a53191dd81c7f70a4b28688a362182986f"
        );

        let stored_path = store.root_directory().join(metadata.relative_path.as_str());
        assert_eq!(fs::read(stored_path).unwrap(), b"Hello, World!");
    }

    #[test]
    fn test_add_bytes_immutability() {
        let (_temp, store) = store();

        assert!(store.add_bytes("a.txt", b"Same content").is_ok());
        let second = store.add_bytes("b.txt", b"Same content");
        assert!(matches!(second, Err(FilesError::FileAlreadyExists(_))));
    }

    #[test]
    fn test_add_from_path() {
        let (temp, store) = store();
        let source = temp.path().join("scan.png");
        let png_header = vec![0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
        fs::write(&source, png_header).unwrap();

        let metadata = store.add(&source).unwrap();
        assert_eq!(metadata.original_filename.as_str(), "scan.png");
        assert_eq!(
            metadata.media_type.as_ref().map(|t| t.as_str()),
            Some("image/png")
        );

        let stored = store.media_type(&metadata.hash).unwrap();
        assert_eq!(stored.as_ref().map(|t| t.as_str()), Some("image/png"));
    }

    #[test]
    fn test_media_type_of_missing_file() {
        let (_temp, store) = store();
        let missing = Sha256Hash::from_bytes(&[3; 32]);
        assert!(matches!(
            store.media_type(&missing),
            Err(FilesError::NotFound(_))
        ));
    }

    #[test]
    fn test_add_nonexistent_source() {
        let (_temp, store) = store();
        assert!(matches!(
            store.add(Path::new("/non-existent/file.txt")),
            Err(FilesError::Io(_))
        ));
    }

    #[test]
    fn test_relative_path_is_sharded() {
        let (_temp, store) = store();
        let metadata = store.add_bytes("x.bin", &[0x00, 0xFF, 0xAA]).unwrap();
        let hash = metadata.hash.as_str();

        assert_eq!(
            metadata.relative_path.as_str(),
            format!("files/sha256/{}/{}/{}", &hash[0..2], &hash[2..4], hash)
        );
    }

    #[test]
    fn test_filename_is_reduced_to_final_component() {
        let (_temp, store) = store();
        let metadata = store.add_bytes("../../etc/passwd", b"not really").unwrap();
        assert_eq!(metadata.original_filename.as_str(), "passwd");

        let unnamed = store.add_bytes("   ", b"anonymous").unwrap();
        assert_eq!(unnamed.original_filename.as_str(), "upload");
    }

    #[test]
    fn test_read_round_trip_and_contains() {
        let (_temp, store) = store();
        let binary: Vec<u8> = (0..=255).collect();
        let metadata = store.add_bytes("binary.dat", &binary).unwrap();

        assert!(store.contains(&metadata.hash).unwrap());
        assert_eq!(store.read(&metadata.hash).unwrap(), binary);
    }

    #[test]
    fn test_read_not_found() {
        let (_temp, store) = store();
        let missing = Sha256Hash::from_bytes(&[7; 32]);

        assert!(!store.contains(&missing).unwrap());
        assert!(matches!(store.read(&missing), Err(FilesError::NotFound(_))));
    }

    #[test]
    fn test_file_metadata_serialization() {
        let (_temp, store) = store();
        let metadata = store.add_bytes("document.txt", b"notes").unwrap();

        let json = serde_json::to_string(&metadata).unwrap();
        assert!(json.contains("sha256"));
        assert!(json.contains(metadata.hash.as_str()));

        let back: FileMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(back, metadata);
    }
}
