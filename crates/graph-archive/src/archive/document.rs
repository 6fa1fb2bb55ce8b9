//! Archive façade: containers, single files and chunked archive directories.

use std::error::Error;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::archive::store::ChunkStore;
use crate::archive::template::ArchiveTemplate;
use crate::codec::{decode_archive, encode_archive, EncodeOptions, ValueCoder};
use crate::error::{ArchiveError, EncodeError, SchemaError};
use crate::graph::{duplicate, encode_roots, insert_objects};
use crate::model::{Context, Dictionary, Node, RecordId, Schema};

/// Where and how archives are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveOptions {
    /// Directory created under the archive root.
    pub directory_name: String,
    /// Chunk file name; later chunks get a numeric suffix before the extension.
    pub file_name: String,
    pub encode: EncodeOptions,
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        Self {
            directory_name: "GraphArchive".to_string(),
            file_name: "Chunk.garc".to_string(),
            encode: EncodeOptions::default(),
        }
    }
}

/// Outcome of [`Archiver::save_from_archive`].
#[derive(Debug, Default)]
pub struct RestoreReport {
    /// Chunk files found.
    pub chunks: usize,
    /// Records handed to the commit callback.
    pub restored: usize,
    /// Chunks that could not be read or decoded.
    pub failed: Vec<(PathBuf, ArchiveError)>,
}

/// Archives records of one schema under one template.
#[derive(Debug)]
pub struct Archiver<T> {
    schema: Arc<Schema>,
    template: T,
    coder: ValueCoder,
    options: ArchiveOptions,
}

impl<T: ArchiveTemplate> Archiver<T> {
    pub fn new(schema: Arc<Schema>, template: T) -> Self {
        Self {
            schema,
            template,
            coder: ValueCoder::new(),
            options: ArchiveOptions::default(),
        }
    }

    /// Replaces the value coder, e.g. to register transformers.
    pub fn with_coder(mut self, coder: ValueCoder) -> Self {
        self.coder = coder;
        self
    }

    pub fn with_options(mut self, options: ArchiveOptions) -> Self {
        self.options = options;
        self
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn template(&self) -> &T {
        &self.template
    }

    pub fn coder(&self) -> &ValueCoder {
        &self.coder
    }

    pub fn options(&self) -> &ArchiveOptions {
        &self.options
    }

    /// Checks every attribute of the schema against the value coder.
    pub fn validate(&self) -> Result<(), SchemaError> {
        for entity in self.schema.entities() {
            for attribute in entity.attributes() {
                self.coder.check(attribute)?;
            }
        }
        Ok(())
    }

    // =========================================================================
    // Containers
    // =========================================================================

    /// Builds a container holding `records`, each encoded with a fresh traversal.
    pub fn archive(&self, context: &Context, records: &[RecordId]) -> Result<Dictionary, EncodeError> {
        let mut container = self.template.template();
        let objects = encode_roots(context, &self.coder, records)?;
        container.insert(self.template.objects_key(), objects);
        Ok(container)
    }

    /// Builds a container and encodes it into a blob.
    pub fn archive_to_bytes(&self, context: &Context, records: &[RecordId]) -> Result<Vec<u8>, EncodeError> {
        encode_archive(&self.archive(context, records)?, self.options.encode)
    }

    /// Writes `records` to `path`, replacing any existing file atomically.
    pub fn write_archive(&self, context: &Context, records: &[RecordId], path: &Path) -> Result<(), ArchiveError> {
        let bytes = self.archive_to_bytes(context, records)?;
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }

    /// Decodes a blob and inserts its records into `context`.
    ///
    /// A container the template rejects is not decoded further and leaves
    /// `context` untouched.
    pub fn inserted_objects(&self, bytes: &[u8], context: &mut Context) -> Result<Vec<RecordId>, ArchiveError> {
        let container = decode_archive(bytes)?;
        self.insert_container(&container, context)
    }

    /// Inserts the records of an already decoded container into `context`.
    pub fn insert_container(&self, container: &Dictionary, context: &mut Context) -> Result<Vec<RecordId>, ArchiveError> {
        if !self.template.is_valid(container) {
            return Err(ArchiveError::Rejected);
        }
        let key = self.template.objects_key();
        let objects = container
            .get(key)
            .and_then(Node::as_array)
            .ok_or_else(|| ArchiveError::MissingObjects { key: key.to_string() })?;

        let records = insert_objects(context, &self.coder, objects)?;
        self.template.post_process(context, &records);
        Ok(records)
    }

    /// Reads a blob from `path` and inserts its records into `context`.
    pub fn read_archive(&self, path: &Path, context: &mut Context) -> Result<Vec<RecordId>, ArchiveError> {
        let bytes = fs::read(path)?;
        self.inserted_objects(&bytes, context)
    }

    /// Deep-copies `record` within `context`.
    pub fn duplicate(&self, context: &mut Context, record: RecordId) -> Result<RecordId, ArchiveError> {
        duplicate(context, &self.coder, record)
    }

    // =========================================================================
    // Chunked archives
    // =========================================================================

    /// Chunk store for the archive directory under `root`.
    pub fn store(&self, root: &Path) -> ChunkStore {
        ChunkStore::new(root.join(&self.options.directory_name), &self.options.file_name)
    }

    /// Replaces the archive under `root` with `records`.
    ///
    /// A `chunk_size` of 0 writes a single chunk. Otherwise records are split
    /// into ordered groups of `chunk_size`, each written as its own chunk,
    /// and `progress` receives the running count after each one.
    pub fn create_archive(
        &self,
        context: &Context,
        records: &[RecordId],
        chunk_size: usize,
        root: &Path,
        mut progress: impl FnMut(usize),
    ) -> Result<Vec<PathBuf>, ArchiveError> {
        let store = self.store(root);
        store.clean()?;

        let total = records.len();
        if chunk_size == 0 {
            let bytes = self.archive_to_bytes(context, records)?;
            let path = store.write(&bytes, true)?;
            info!(path = %path.display(), records = total, "wrote archive");
            progress(total);
            return Ok(vec![path]);
        }

        let mut paths = Vec::with_capacity(total.div_ceil(chunk_size));
        for (i, group) in records.chunks(chunk_size).enumerate() {
            let bytes = self.archive_to_bytes(context, group)?;
            let path = store.write(&bytes, false)?;
            info!(
                path = %path.display(),
                records = group.len(),
                bytes = bytes.len(),
                "wrote archive chunk"
            );
            paths.push(path);
            progress(total.min((i + 1) * chunk_size));
        }
        Ok(paths)
    }

    /// Restores every chunk under `root`, then deletes the archive directory.
    ///
    /// Each chunk is decoded into a fresh [`Context`] which is handed to
    /// `commit` and dropped before the next chunk. Chunks that fail to read
    /// or decode are logged, reported and skipped. A failing `commit` stops
    /// the restore. The directory is deleted in every case.
    pub fn save_from_archive<F, E>(
        &self,
        root: &Path,
        mut commit: F,
        mut progress: impl FnMut(usize),
    ) -> Result<RestoreReport, ArchiveError>
    where
        F: FnMut(Context, Vec<RecordId>) -> Result<(), E>,
        E: Into<Box<dyn Error + Send + Sync>>,
    {
        let store = self.store(root);
        let _cleanup = DeleteOnDrop(&store);

        let files = store.existing_files()?;
        let mut report = RestoreReport {
            chunks: files.len(),
            ..RestoreReport::default()
        };

        for path in files {
            let mut context = Context::new(self.schema.clone());
            let records = match self.read_archive(&path, &mut context) {
                Ok(records) => records,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        code = e.severity().code(),
                        error = %e,
                        "skipping archive chunk"
                    );
                    report.failed.push((path, e));
                    continue;
                }
            };

            let count = records.len();
            commit(context, records).map_err(|e| ArchiveError::Commit(e.into()))?;
            report.restored += count;
            debug!(path = %path.display(), records = count, "committed archive chunk");
            progress(report.restored);
        }

        info!(
            chunks = report.chunks,
            restored = report.restored,
            failed = report.failed.len(),
            "restored archive"
        );
        Ok(report)
    }

    /// Returns true if the archive under `root` has at least one chunk.
    pub fn has_archive(&self, root: &Path) -> bool {
        self.store(root).has_chunks()
    }

    /// Deletes the archive directory under `root`.
    pub fn clear_archive(&self, root: &Path) -> Result<(), ArchiveError> {
        self.store(root).delete()?;
        Ok(())
    }
}

struct DeleteOnDrop<'a>(&'a ChunkStore);

impl Drop for DeleteOnDrop<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.0.delete() {
            warn!(path = %self.0.directory().display(), error = %e, "failed to delete archive directory");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::template::{VersionedTemplate, VERSION_KEY};
    use crate::model::{AttributeKind, Value};
    use std::cell::Cell;

    fn schema() -> Arc<Schema> {
        Arc::new(
            Schema::builder()
                .entity("Note", |e| {
                    e.attribute("title", AttributeKind::String)
                        .attribute("pinned", AttributeKind::Boolean)
                })
                .build()
                .unwrap(),
        )
    }

    fn archiver() -> Archiver<VersionedTemplate> {
        Archiver::new(schema(), VersionedTemplate::new("com.example.notes", "1"))
    }

    fn notes(ctx: &mut Context, n: usize) -> Vec<RecordId> {
        (0..n)
            .map(|i| {
                let id = ctx.insert("Note").unwrap();
                ctx.set_attribute(id, "title", format!("note {i}")).unwrap();
                id
            })
            .collect()
    }

    #[test]
    fn test_bytes_roundtrip() {
        let archiver = archiver();
        let mut ctx = Context::new(schema());
        let records = notes(&mut ctx, 3);

        let bytes = archiver.archive_to_bytes(&ctx, &records).unwrap();
        let mut restored = Context::new(schema());
        let ids = archiver.inserted_objects(&bytes, &mut restored).unwrap();
        assert_eq!(ids.len(), 3);
        assert_eq!(
            restored.attribute(ids[2], "title").unwrap(),
            Some(&Value::from("note 2"))
        );
        assert_eq!(restored.attribute(ids[2], "pinned").unwrap(), None);
    }

    #[test]
    fn test_rejected_container_has_no_effect() {
        let writer = Archiver::new(schema(), VersionedTemplate::new("com.example.notes", "9"));
        let mut ctx = Context::new(schema());
        let records = notes(&mut ctx, 2);
        let bytes = writer.archive_to_bytes(&ctx, &records).unwrap();

        let mut restored = Context::new(schema());
        let result = archiver().inserted_objects(&bytes, &mut restored);
        assert!(matches!(result, Err(ArchiveError::Rejected)));
        assert!(restored.is_empty());
        assert!(restored.inserted_objects().is_empty());
    }

    #[test]
    fn test_missing_objects_key() {
        let archiver = archiver();
        let mut container = archiver.template().template();
        assert_eq!(container.get(VERSION_KEY).and_then(Node::as_str), Some("1"));
        container.insert("other", Vec::<Node>::new());

        let mut ctx = Context::new(schema());
        let result = archiver.insert_container(&container, &mut ctx);
        assert!(matches!(result, Err(ArchiveError::MissingObjects { .. })));
    }

    #[test]
    fn test_post_process_runs_after_insert() {
        struct Pinning(VersionedTemplate);

        impl ArchiveTemplate for Pinning {
            fn template(&self) -> Dictionary {
                self.0.template()
            }
            fn is_valid(&self, container: &Dictionary) -> bool {
                self.0.is_valid(container)
            }
            fn post_process(&self, context: &mut Context, records: &[RecordId]) {
                for &id in records {
                    context.set_attribute(id, "pinned", true).unwrap();
                }
            }
        }

        let archiver = Archiver::new(schema(), Pinning(VersionedTemplate::new("com.example.notes", "1")));
        let mut ctx = Context::new(schema());
        let records = notes(&mut ctx, 2);
        let bytes = archiver.archive_to_bytes(&ctx, &records).unwrap();

        let mut restored = Context::new(schema());
        let ids = archiver.inserted_objects(&bytes, &mut restored).unwrap();
        for id in ids {
            assert_eq!(restored.attribute(id, "pinned").unwrap(), Some(&Value::Bool(true)));
        }
    }

    #[test]
    fn test_write_and_read_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.garc");
        let archiver = archiver();
        let mut ctx = Context::new(schema());
        let records = notes(&mut ctx, 4);

        archiver.write_archive(&ctx, &records, &path).unwrap();
        archiver.write_archive(&ctx, &records[..1], &path).unwrap();

        let mut restored = Context::new(schema());
        let ids = archiver.read_archive(&path, &mut restored).unwrap();
        assert_eq!(ids.len(), 1);
    }

    #[test]
    fn test_single_chunk_archive() {
        let dir = tempfile::tempdir().unwrap();
        let archiver = archiver();
        let mut ctx = Context::new(schema());
        let records = notes(&mut ctx, 5);

        let mut calls = Vec::new();
        let paths = archiver
            .create_archive(&ctx, &records, 0, dir.path(), |n| calls.push(n))
            .unwrap();
        assert_eq!(paths.len(), 1);
        assert_eq!(calls, [5]);
        assert!(archiver.has_archive(dir.path()));

        // a second single-chunk archive replaces the first
        archiver.create_archive(&ctx, &records[..2], 0, dir.path(), |_| {}).unwrap();
        assert_eq!(archiver.store(dir.path()).existing_files().unwrap().len(), 1);
    }

    #[test]
    fn test_chunked_archive_and_restore() {
        let dir = tempfile::tempdir().unwrap();
        let archiver = archiver();
        let mut ctx = Context::new(schema());
        let records = notes(&mut ctx, 7);

        let mut written = Vec::new();
        let paths = archiver
            .create_archive(&ctx, &records, 3, dir.path(), |n| written.push(n))
            .unwrap();
        assert_eq!(paths.len(), 3);
        assert_eq!(written, [3, 6, 7]);

        let mut titles = Vec::new();
        let mut restored = Vec::new();
        let report = archiver
            .save_from_archive(
                dir.path(),
                |ctx, ids| {
                    for id in &ids {
                        if let Some(Value::String(t)) = ctx.attribute(*id, "title").unwrap() {
                            titles.push(t.clone());
                        }
                    }
                    Ok::<_, std::io::Error>(())
                },
                |n| restored.push(n),
            )
            .unwrap();

        assert_eq!(report.chunks, 3);
        assert_eq!(report.restored, 7);
        assert!(report.failed.is_empty());
        assert_eq!(restored, [3, 6, 7]);
        let expected: Vec<_> = (0..7).map(|i| format!("note {i}")).collect();
        assert_eq!(titles, expected);
        assert!(!archiver.has_archive(dir.path()));
        assert!(!archiver.store(dir.path()).directory().exists());
    }

    #[test]
    fn test_restore_skips_corrupt_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let archiver = archiver();
        let mut ctx = Context::new(schema());
        let records = notes(&mut ctx, 4);
        archiver.create_archive(&ctx, &records, 2, dir.path(), |_| {}).unwrap();
        archiver.store(dir.path()).write(b"garbage", false).unwrap();

        let report = archiver
            .save_from_archive(dir.path(), |_, _| Ok::<_, std::io::Error>(()), |_| {})
            .unwrap();
        assert_eq!(report.chunks, 3);
        assert_eq!(report.restored, 4);
        assert_eq!(report.failed.len(), 1);
        assert!(matches!(report.failed[0].1, ArchiveError::Decode(_)));
    }

    #[test]
    fn test_failed_commit_still_deletes_directory() {
        let dir = tempfile::tempdir().unwrap();
        let archiver = archiver();
        let mut ctx = Context::new(schema());
        let records = notes(&mut ctx, 4);
        archiver.create_archive(&ctx, &records, 2, dir.path(), |_| {}).unwrap();

        let commits = Cell::new(0);
        let result = archiver.save_from_archive(
            dir.path(),
            |_, _| {
                commits.set(commits.get() + 1);
                Err(std::io::Error::other("disk full"))
            },
            |_| {},
        );
        assert!(matches!(result, Err(ArchiveError::Commit(_))));
        assert_eq!(commits.get(), 1);
        assert!(!archiver.has_archive(dir.path()));
    }

    #[test]
    fn test_create_archive_cleans_previous_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let archiver = archiver();
        let mut ctx = Context::new(schema());
        let records = notes(&mut ctx, 6);

        archiver.create_archive(&ctx, &records, 1, dir.path(), |_| {}).unwrap();
        archiver.create_archive(&ctx, &records, 4, dir.path(), |_| {}).unwrap();
        assert_eq!(archiver.store(dir.path()).existing_files().unwrap().len(), 2);

        archiver.clear_archive(dir.path()).unwrap();
        assert!(!archiver.has_archive(dir.path()));
    }

    #[test]
    fn test_restore_without_archive() {
        let dir = tempfile::tempdir().unwrap();
        let report = archiver()
            .save_from_archive(dir.path(), |_, _| Ok::<_, std::io::Error>(()), |_| {})
            .unwrap();
        assert_eq!(report.chunks, 0);
        assert_eq!(report.restored, 0);
    }

    #[test]
    fn test_validate_reports_missing_transformer() {
        let schema = Arc::new(
            Schema::builder()
                .entity("Swatch", |e| e.transformable("color", "rgb"))
                .build()
                .unwrap(),
        );
        let unregistered = Archiver::new(schema, VersionedTemplate::new("x", "1"));
        assert!(unregistered.validate().is_err());
        assert!(archiver().validate().is_ok());
    }
}
