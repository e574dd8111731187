//! Atomic corpus output files.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

/// Path for a corpus shard keyed by content hash.
///
/// Uses a two-level layout so no directory grows unbounded:
/// `{dir}/{hash[0..2]}/{hash[0..16]}.{extension}`
pub fn shard_path(dir: &Path, content_hash: &str, extension: &str) -> PathBuf {
    let prefix = content_hash.get(..2).unwrap_or(content_hash);
    let stem = content_hash.get(..16).unwrap_or(content_hash);
    dir.join(prefix).join(format!("{}.{}", stem, extension))
}

/// A file that becomes visible at its destination only on [`commit`].
///
/// Writes go to a temp file in the destination directory, so the final
/// rename never crosses filesystems. Dropping without committing removes
/// the temp file.
///
/// [`commit`]: AtomicOutput::commit
#[derive(Debug)]
pub struct AtomicOutput {
    dest: PathBuf,
    tmp: NamedTempFile,
}

impl AtomicOutput {
    pub fn create(dest: impl Into<PathBuf>) -> io::Result<Self> {
        let dest = dest.into();
        let dir = match dest.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;
        let tmp = tempfile::Builder::new()
            .prefix(".partial-")
            .tempfile_in(&dir)?;
        Ok(Self { dest, tmp })
    }

    pub fn destination(&self) -> &Path {
        &self.dest
    }

    /// Flush, fsync and rename into place, replacing any existing file.
    pub fn commit(mut self) -> io::Result<PathBuf> {
        self.tmp.flush()?;
        self.tmp.as_file().sync_all()?;
        self.tmp.persist(&self.dest).map_err(|e| e.error)?;
        Ok(self.dest)
    }
}

impl Write for AtomicOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.tmp.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.tmp.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shard_path_layout() {
        let path = shard_path(Path::new("/corpus"), "abcdef0123456789ffff", "jsonl");
        assert_eq!(path, PathBuf::from("/corpus/ab/abcdef0123456789.jsonl"));
        assert_eq!(
            shard_path(Path::new("/corpus"), "a", "txt"),
            PathBuf::from("/corpus/a/a.txt")
        );
    }

    #[test]
    fn test_output_invisible_until_commit() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("shards").join("out.jsonl");

        let mut out = AtomicOutput::create(&dest).unwrap();
        writeln!(out, "{{\"text\":\"hello\"}}").unwrap();
        assert!(!dest.exists());

        let committed = out.commit().unwrap();
        assert_eq!(committed, dest);
        assert_eq!(fs::read_to_string(&dest).unwrap(), "{\"text\":\"hello\"}\n");
    }

    #[test]
    fn test_dropped_output_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.jsonl");
        {
            let mut out = AtomicOutput::create(&dest).unwrap();
            out.write_all(b"partial").unwrap();
        }
        assert!(!dest.exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_commit_replaces_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.txt");
        fs::write(&dest, "old").unwrap();

        let mut out = AtomicOutput::create(&dest).unwrap();
        out.write_all(b"new").unwrap();
        out.commit().unwrap();
        assert_eq!(fs::read_to_string(&dest).unwrap(), "new");
    }
}
