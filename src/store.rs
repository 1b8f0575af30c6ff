//! Location and lifecycle of persisted index files
//!
//! Every index built by this crate is a sidecar of the file it describes: the
//! sidecar path is the source path with a fixed extension appended. An
//! [`IndexStore`] decides where sidecars live, writes them atomically, and
//! deletes them on request so that the next build starts from a fresh scan.
//!
//! Concurrent builders of the same sidecar are not coordinated. The last
//! rename wins; callers that share a source across processes must serialize
//! index builds themselves.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use log::debug;

use crate::error::{IndexError, Result};

/// Suffix used for temporary files while a sidecar is being written
const TMP_SUFFIX: &str = "tmp";

/// Path-keyed store for persisted indices
///
/// By default sidecars are co-located with their source. A store can also be
/// pointed at a separate directory, which is useful when the source lives on
/// a read-only mount.
#[derive(Debug, Clone, Default)]
pub struct IndexStore {
    /// Directory that holds sidecars, or `None` for co-located sidecars
    dir: Option<PathBuf>,
}
impl IndexStore {
    /// Creates a store that writes sidecars next to their source files
    #[must_use]
    pub fn colocated() -> Self {
        Self::default()
    }

    /// Creates a store that writes all sidecars into `dir`
    ///
    /// Sidecars are keyed by the source file name only, so two sources with the
    /// same file name in different directories will share a sidecar path.
    pub fn in_dir<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: Some(dir.as_ref().to_path_buf()),
        }
    }

    /// Returns the sidecar path for `source` with the given extension
    pub fn sidecar<P: AsRef<Path>>(&self, source: P, extension: &str) -> Result<PathBuf> {
        let source = source.as_ref();
        let Some(file_name) = source.file_name() else {
            return Err(IndexError::InvalidSourcePath(source.to_string_lossy().to_string()).into());
        };
        let mut name = OsString::from(file_name);
        name.push(".");
        name.push(extension);
        let parent = match &self.dir {
            Some(dir) => dir.as_path(),
            None => source.parent().unwrap_or_else(|| Path::new("")),
        };
        Ok(parent.join(name))
    }

    /// Writes a sidecar through a temporary file, fsyncs it, and renames it into place
    pub fn persist<F>(&self, path: &Path, write: F) -> Result<()>
    where
        F: FnOnce(&mut BufWriter<File>) -> Result<()>,
    {
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".");
        tmp.push(TMP_SUFFIX);
        let tmp = PathBuf::from(tmp);

        let written = Self::write_synced(&tmp, write).and_then(|()| Ok(fs::rename(&tmp, path)?));
        if let Err(e) = written {
            // best effort, the write error is the one reported
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }
        debug!("Persisted index {}", path.display());
        Ok(())
    }

    /// Creates `path`, fills it with `write`, and syncs it to disk
    fn write_synced<F>(path: &Path, write: F) -> Result<()>
    where
        F: FnOnce(&mut BufWriter<File>) -> Result<()>,
    {
        let mut writer = File::create(path).map(BufWriter::new)?;
        write(&mut writer)?;
        writer.flush()?;
        let file = writer.into_inner().map_err(std::io::IntoInnerError::into_error)?;
        file.sync_all()?;
        Ok(())
    }

    /// Removes the sidecar of `source` with the given extension, if it exists
    ///
    /// Returns whether a file was removed.
    pub fn invalidate<P: AsRef<Path>>(&self, source: P, extension: &str) -> Result<bool> {
        let path = self.sidecar(source, extension)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!("Invalidated index {}", path.display());
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Returns the size in bytes of the source file as stored on disk
    ///
    /// This is recorded in every sidecar header and used to detect stale indices.
    pub fn source_size<P: AsRef<Path>>(source: P) -> Result<u64> {
        let metadata = fs::metadata(source)?;
        Ok(metadata.len())
    }
}

#[cfg(test)]
mod testing {
    use super::*;
    use anyhow::Result;
    use std::io::Read;

    #[test]
    fn test_sidecar_colocated() -> Result<()> {
        let store = IndexStore::colocated();
        let path = store.sidecar("/data/reads.fq.gz", "offsets")?;
        assert_eq!(path, PathBuf::from("/data/reads.fq.gz.offsets"));
        Ok(())
    }

    #[test]
    fn test_sidecar_in_dir() -> Result<()> {
        let store = IndexStore::in_dir("/scratch");
        let path = store.sidecar("/data/reads.paf", "lookup")?;
        assert_eq!(path, PathBuf::from("/scratch/reads.paf.lookup"));
        Ok(())
    }

    #[test]
    fn test_sidecar_rejects_dir_like_source() {
        let store = IndexStore::colocated();
        assert!(store.sidecar("/", "offsets").is_err());
    }

    #[test]
    fn test_persist_and_invalidate() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let source = dir.path().join("reads.fq");
        fs::write(&source, b"@r\nA\n+\n!\n")?;

        let store = IndexStore::colocated();
        let sidecar = store.sidecar(&source, "offsets")?;
        store.persist(&sidecar, |w| {
            w.write_all(b"payload")?;
            Ok(())
        })?;

        let mut contents = Vec::new();
        File::open(&sidecar)?.read_to_end(&mut contents)?;
        assert_eq!(contents, b"payload");
        assert!(!dir.path().join("reads.fq.offsets.tmp").exists());

        assert!(store.invalidate(&source, "offsets")?);
        assert!(!sidecar.exists());
        assert!(!store.invalidate(&source, "offsets")?);
        Ok(())
    }

    #[test]
    fn test_failed_persist_leaves_no_files() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = IndexStore::colocated();
        let sidecar = store.sidecar(dir.path().join("reads.fq"), "offsets")?;

        let result = store.persist(&sidecar, |w| {
            w.write_all(b"partial")?;
            Err(IndexError::Corrupt("write interrupted".into()).into())
        });
        assert!(matches!(
            result,
            Err(crate::Error::IndexError(IndexError::Corrupt(_)))
        ));
        assert!(!sidecar.exists());
        assert!(!dir.path().join("reads.fq.offsets.tmp").exists());
        assert_eq!(fs::read_dir(dir.path())?.count(), 0);
        Ok(())
    }
}
