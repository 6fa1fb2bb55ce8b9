//! Directory of sequentially-suffixed chunk files.
//!
//! Chunks are named `<base>.<ext>`, `<base> 1.<ext>`, `<base> 2.<ext>`, ...
//! A non-overwriting write claims the first name that does not exist yet.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::debug;

/// Chunk files of one archive.
#[derive(Debug, Clone)]
pub struct ChunkStore {
    directory: PathBuf,
    base: String,
    extension: Option<String>,
}

impl ChunkStore {
    /// Chunk store in `directory` with names derived from `file_name`.
    ///
    /// `"Chunk.garc"` yields `Chunk.garc`, `Chunk 1.garc`, ...; a name without
    /// an extension yields `Chunk`, `Chunk 1`, ...
    pub fn new(directory: impl Into<PathBuf>, file_name: &str) -> Self {
        let (base, extension) = match file_name.rsplit_once('.') {
            Some((base, ext)) if !base.is_empty() => (base.to_string(), Some(ext.to_string())),
            _ => (file_name.to_string(), None),
        };
        Self {
            directory: directory.into(),
            base,
            extension,
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// File name for the chunk with the given suffix; 0 means no suffix.
    pub fn file_name(&self, suffix: usize) -> String {
        let stem = if suffix == 0 {
            self.base.clone()
        } else {
            format!("{} {}", self.base, suffix)
        };
        match &self.extension {
            Some(ext) => format!("{stem}.{ext}"),
            None => stem,
        }
    }

    /// Suffix encoded in `name`, or `None` if it is not one of our chunk names.
    pub fn suffix_of(&self, name: &str) -> Option<usize> {
        let stem = match &self.extension {
            Some(ext) => name.strip_suffix(ext.as_str())?.strip_suffix('.')?,
            None => name,
        };
        if stem == self.base {
            return Some(0);
        }
        let digits = stem.strip_prefix(self.base.as_str())?.strip_prefix(' ')?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) || digits.starts_with('0') {
            return None;
        }
        digits.parse().ok().filter(|&n| n > 0)
    }

    /// Writes one chunk and returns its path.
    ///
    /// With `overwrite`, the unsuffixed name is replaced atomically. Without
    /// it, a new file is created under the first free suffix.
    pub fn write(&self, bytes: &[u8], overwrite: bool) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.directory)?;

        if overwrite {
            let path = self.directory.join(self.file_name(0));
            let mut tmp = NamedTempFile::new_in(&self.directory)?;
            tmp.write_all(bytes)?;
            tmp.as_file().sync_all()?;
            tmp.persist(&path).map_err(|e| e.error)?;
            return Ok(path);
        }

        let mut suffix = 0;
        loop {
            let path = self.directory.join(self.file_name(suffix));
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(bytes)?;
                    file.sync_all()?;
                    return Ok(path);
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    debug!(path = %path.display(), "chunk name taken, trying next suffix");
                    suffix += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Chunk files present on disk, in write order.
    ///
    /// Files that do not follow the chunk naming scheme are ignored. A
    /// missing directory has no chunks.
    pub fn existing_files(&self) -> io::Result<Vec<PathBuf>> {
        let entries = match fs::read_dir(&self.directory) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut chunks = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let Some(suffix) = name.to_str().and_then(|n| self.suffix_of(n)) else {
                continue;
            };
            chunks.push((suffix, entry.path()));
        }
        chunks.sort_by_key(|(suffix, _)| *suffix);
        Ok(chunks.into_iter().map(|(_, path)| path).collect())
    }

    /// Returns true if at least one chunk file exists.
    pub fn has_chunks(&self) -> bool {
        self.existing_files().is_ok_and(|files| !files.is_empty())
    }

    /// Removes everything inside the directory, keeping the directory itself.
    pub fn clean(&self) -> io::Result<()> {
        let entries = match fs::read_dir(&self.directory) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                fs::remove_dir_all(entry.path())?;
            } else {
                fs::remove_file(entry.path())?;
            }
        }
        Ok(())
    }

    /// Removes the directory and everything in it.
    pub fn delete(&self) -> io::Result<()> {
        match fs::remove_dir_all(&self.directory) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_names() {
        let store = ChunkStore::new("/tmp/a", "Chunk.garc");
        assert_eq!(store.file_name(0), "Chunk.garc");
        assert_eq!(store.file_name(1), "Chunk 1.garc");
        assert_eq!(store.file_name(12), "Chunk 12.garc");

        let bare = ChunkStore::new("/tmp/a", "Chunk");
        assert_eq!(bare.file_name(0), "Chunk");
        assert_eq!(bare.file_name(2), "Chunk 2");
    }

    #[test]
    fn test_suffix_of() {
        let store = ChunkStore::new("/tmp/a", "Chunk.garc");
        assert_eq!(store.suffix_of("Chunk.garc"), Some(0));
        assert_eq!(store.suffix_of("Chunk 3.garc"), Some(3));
        assert_eq!(store.suffix_of("Chunk 03.garc"), None);
        assert_eq!(store.suffix_of("Chunk 0.garc"), None);
        assert_eq!(store.suffix_of("Chunk x.garc"), None);
        assert_eq!(store.suffix_of("Chunk 1.txt"), None);
        assert_eq!(store.suffix_of("Other.garc"), None);
        assert_eq!(store.suffix_of(".DS_Store"), None);
    }

    #[test]
    fn test_write_probes_for_free_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChunkStore::new(dir.path().join("Archive"), "Chunk.garc");
        assert!(!store.has_chunks());

        for i in 0..12u8 {
            store.write(&[i], false).unwrap();
        }
        let files = store.existing_files().unwrap();
        assert_eq!(files.len(), 12);
        for (i, path) in files.iter().enumerate() {
            assert_eq!(fs::read(path).unwrap(), vec![i as u8]);
        }
        assert!(files[10].ends_with("Chunk 10.garc"));
    }

    #[test]
    fn test_overwrite_replaces_base_name() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChunkStore::new(dir.path(), "Chunk.garc");
        store.write(b"one", true).unwrap();
        let path = store.write(b"two", true).unwrap();
        assert!(path.ends_with("Chunk.garc"));
        assert_eq!(fs::read(&path).unwrap(), b"two");
        assert_eq!(store.existing_files().unwrap().len(), 1);
    }

    #[test]
    fn test_ignores_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChunkStore::new(dir.path(), "Chunk.garc");
        fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        store.write(b"a", false).unwrap();
        assert_eq!(store.existing_files().unwrap().len(), 1);
    }

    #[test]
    fn test_clean_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChunkStore::new(dir.path().join("Archive"), "Chunk.garc");
        store.write(b"a", false).unwrap();
        store.write(b"b", false).unwrap();
        fs::create_dir(store.directory().join("nested")).unwrap();

        store.clean().unwrap();
        assert!(store.directory().exists());
        assert!(!store.has_chunks());

        store.write(b"c", false).unwrap();
        store.delete().unwrap();
        assert!(!store.directory().exists());
        // deleting twice is fine
        store.delete().unwrap();
    }
}
