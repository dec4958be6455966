//! Chunk Assembler
//!
//! Persists upload parts under a per-upload working area and concatenates
//! them into the final artifact once the last part has arrived.
//!
//! Layout:
//! - working area: `<chunks_dir>/<upload_id>/<filename>/<part_index>`
//! - final artifact: `<upload_dir>/<upload_id>/<filename>`
//!
//! There is no metadata store; the state of an upload is whatever part files
//! exist in its working area.

use std::collections::HashMap;
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::UploadConfig;
use super::types::{validate_segment, FinalizeOutcome, PartUpload, UploadError};

// ============================================================================
// Chunk Assembler
// ============================================================================

/// Filesystem-backed chunk reassembly
#[derive(Clone)]
pub struct ChunkAssembler {
    inner: Arc<ChunkAssemblerInner>,
}

struct ChunkAssemblerInner {
    upload_dir: PathBuf,
    chunks_dir: PathBuf,
    verify_total_size: bool,
    max_total_parts: u32,

    /// upload id -> critical section for finalize/delete
    locks: LockTable,
}

type LockTable = parking_lot::Mutex<HashMap<String, Arc<Mutex<()>>>>;

impl ChunkAssembler {
    pub fn new(config: &UploadConfig) -> Self {
        Self {
            inner: Arc::new(ChunkAssemblerInner {
                upload_dir: config.upload_dir.clone(),
                chunks_dir: config.chunks_dir.clone(),
                verify_total_size: config.verify_total_size,
                max_total_parts: config.max_total_parts,
                locks: parking_lot::Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Final artifact location; depends only on the roots, id and filename.
    pub fn final_path(&self, upload_id: &str, filename: &str) -> Result<PathBuf, UploadError> {
        let upload_id = validate_segment("upload id", upload_id)?;
        let filename = validate_segment("filename", filename)?;
        Ok(self.artifact_path(upload_id, filename))
    }

    fn artifact_path(&self, upload_id: &str, filename: &str) -> PathBuf {
        self.inner.upload_dir.join(upload_id).join(filename)
    }

    fn part_dir(&self, upload_id: &str, filename: &str) -> PathBuf {
        self.inner.chunks_dir.join(upload_id).join(filename)
    }

    /// Store one part. Unchunked uploads go straight to the final location.
    ///
    /// Rewriting an existing part replaces it atomically, so retries and
    /// concurrent writers of the same index never leave a torn blob.
    pub async fn write_part(&self, part: &PartUpload, data: &[u8]) -> Result<PathBuf, UploadError> {
        let upload_id = validate_segment("upload id", &part.upload_id)?;
        let filename = validate_segment("filename", &part.filename)?;

        if !part.is_chunked() {
            let dest = self.artifact_path(upload_id, filename);
            write_atomic(&dest, data).await?;

            tracing::debug!(
                upload_id = %upload_id,
                size = data.len(),
                path = %dest.display(),
                "Stored unchunked upload"
            );
            return Ok(dest);
        }

        if part.part_index >= part.total_parts || part.total_parts > self.inner.max_total_parts {
            return Err(UploadError::InvalidPart {
                index: part.part_index,
                total: part.total_parts,
            });
        }

        let dest = self
            .part_dir(upload_id, filename)
            .join(part.part_index.to_string());
        write_atomic(&dest, data).await?;

        tracing::debug!(
            upload_id = %upload_id,
            part_index = part.part_index,
            total_parts = part.total_parts,
            size = data.len(),
            "Stored part"
        );

        Ok(dest)
    }

    /// Concatenate parts `0..total_parts` into the final artifact if all of
    /// them are present, then remove the working area.
    ///
    /// Returns [`FinalizeOutcome::Pending`] without touching anything when a
    /// part is missing, and [`UploadError::NotFound`] when the working area
    /// is already gone (e.g. a second finalize of the same upload).
    pub async fn maybe_finalize(
        &self,
        upload_id: &str,
        filename: &str,
        total_parts: u32,
        declared_size: Option<u64>,
    ) -> Result<FinalizeOutcome, UploadError> {
        let upload_id = validate_segment("upload id", upload_id)?;
        let filename = validate_segment("filename", filename)?;

        if total_parts > self.inner.max_total_parts {
            return Err(UploadError::InvalidPart {
                index: total_parts.saturating_sub(1),
                total: total_parts,
            });
        }

        self.with_upload_lock(
            upload_id,
            self.finalize_locked(upload_id, filename, total_parts, declared_size),
        )
        .await
    }

    async fn finalize_locked(
        &self,
        upload_id: &str,
        filename: &str,
        total_parts: u32,
        declared_size: Option<u64>,
    ) -> Result<FinalizeOutcome, UploadError> {
        let dest = self.artifact_path(upload_id, filename);

        // Unchunked uploads were written in place by write_part
        if total_parts <= 1 {
            return match tokio::fs::metadata(&dest).await {
                Ok(meta) => Ok(FinalizeOutcome::Finalized {
                    path: dest,
                    size: meta.len(),
                }),
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    Err(UploadError::NotFound(upload_id.to_string()))
                }
                Err(e) => Err(e.into()),
            };
        }

        let working_area = self.inner.chunks_dir.join(upload_id);
        let part_dir = working_area.join(filename);

        if !tokio::fs::try_exists(&part_dir).await? {
            return Err(UploadError::NotFound(upload_id.to_string()));
        }

        // One directory listing instead of a probe per index
        let mut present = vec![false; total_parts as usize];
        let mut entries = tokio::fs::read_dir(&part_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let index = entry.file_name().to_str().and_then(|name| name.parse::<usize>().ok());
            if let Some(slot) = index.and_then(|index| present.get_mut(index)) {
                *slot = true;
            }
        }

        let missing: Vec<u32> = (0..total_parts)
            .zip(present)
            .filter_map(|(index, found)| (!found).then_some(index))
            .collect();

        if !missing.is_empty() {
            tracing::debug!(
                upload_id = %upload_id,
                total_parts = total_parts,
                missing = missing.len(),
                "Finalize deferred, parts missing"
            );
            return Ok(FinalizeOutcome::Pending { missing });
        }

        tracing::info!(
            upload_id = %upload_id,
            filename = %filename,
            parts = total_parts,
            "Assembling file from parts"
        );

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut out = tokio::fs::File::create(&dest).await?;
        let mut size = 0u64;
        for index in 0..total_parts {
            let mut part = tokio::fs::File::open(part_dir.join(index.to_string())).await?;
            size += tokio::io::copy(&mut part, &mut out).await?;
        }
        out.flush().await?;
        out.sync_all().await?;
        drop(out);

        if let Some(declared) = declared_size.filter(|declared| *declared != size) {
            if self.inner.verify_total_size {
                tokio::fs::remove_file(&dest).await?;
                return Err(UploadError::SizeMismatch {
                    declared,
                    actual: size,
                });
            }
            tracing::warn!(
                upload_id = %upload_id,
                declared = declared,
                actual = size,
                "Assembled size differs from declared size"
            );
        }

        tokio::fs::remove_dir_all(&working_area).await?;

        tracing::info!(
            upload_id = %upload_id,
            size = size,
            path = %dest.display(),
            "Upload assembled"
        );

        Ok(FinalizeOutcome::Finalized { path: dest, size })
    }

    /// Remove everything stored for an upload: the final artifact directory
    /// and any leftover working area.
    pub async fn delete_upload(&self, upload_id: &str) -> Result<(), UploadError> {
        let upload_id = validate_segment("upload id", upload_id)?;

        self.with_upload_lock(upload_id, async {
            let mut removed = false;
            for root in [&self.inner.upload_dir, &self.inner.chunks_dir] {
                match tokio::fs::remove_dir_all(root.join(upload_id)).await {
                    Ok(()) => removed = true,
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(UploadError::Io(e)),
                }
            }

            if !removed {
                return Err(UploadError::NotFound(upload_id.to_string()));
            }

            tracing::info!(upload_id = %upload_id, "Upload deleted");
            Ok(())
        })
        .await
    }

    async fn with_upload_lock<F, T>(&self, upload_id: &str, fut: F) -> T
    where
        F: Future<Output = T>,
    {
        // Declaration order matters: the guard drops first, then our clone,
        // then the release, even when this future is dropped mid-await.
        let release = LockRelease {
            locks: &self.inner.locks,
            upload_id,
        };
        let lock = release.acquire();
        let _guard = lock.lock().await;
        fut.await
    }
}

/// Removes an upload's lock table entry once nobody holds or waits on it.
struct LockRelease<'a> {
    locks: &'a LockTable,
    upload_id: &'a str,
}

impl LockRelease<'_> {
    fn acquire(&self) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock();
        locks.entry(self.upload_id.to_string()).or_default().clone()
    }
}

impl Drop for LockRelease<'_> {
    fn drop(&mut self) {
        // Every caller drops its clone before its release runs, so the last
        // release to run sees only the table's own reference.
        let mut locks = self.locks.lock();
        if locks
            .get(self.upload_id)
            .is_some_and(|entry| Arc::strong_count(entry) == 1)
        {
            locks.remove(self.upload_id);
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Write to a uniquely named sibling, then rename over `dest`.
async fn write_atomic(dest: &Path, data: &[u8]) -> Result<(), UploadError> {
    let parent = dest
        .parent()
        .ok_or_else(|| UploadError::NotFound(dest.display().to_string()))?;
    tokio::fs::create_dir_all(parent).await?;

    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = parent.join(format!(".{}.{}.tmp", name, Uuid::new_v4()));

    if let Err(e) = write_then_rename(&tmp, dest, data).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }

    Ok(())
}

async fn write_then_rename(tmp: &Path, dest: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(tmp).await?;
    file.write_all(data).await?;
    file.sync_all().await?;
    tokio::fs::rename(tmp, dest).await
}

// ============================================================================
// Tests
// ============================================================================
