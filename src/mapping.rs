use std::{
    fs::File,
    path::{Path, PathBuf},
};

use anyhow::{Context, Error};
use memmap2::Mmap;

/// A trace file mapped read-only into memory.
///
/// Empty files are not mapped at all and expose an empty buffer.
#[derive(Debug)]
pub struct TraceFile {
    path: PathBuf,
    map: Option<Mmap>,
}

impl TraceFile {
    /// Opens and maps the file at `path`.
    ///
    /// # Errors
    ///
    /// This function fails if the file cannot be opened, its metadata cannot
    /// be read or the mapping itself fails.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("Unable to open {} for reading", path.display()))?;
        let len = file.metadata()?.len();

        let map = if len == 0 {
            None
        } else {
            // Safety: the mapping is read-only and lives no longer than `self`.
            // Truncating the file from another process while it is mapped is
            // not guarded against.
            let map = unsafe { Mmap::map(&file) }
                .with_context(|| format!("Unable to map {} into memory", path.display()))?;
            Some(map)
        };

        log::debug!("Mapped {len} byte(s) of {}", path.display());

        Ok(Self {
            path: path.to_path_buf(),
            map,
        })
    }

    /// The complete contents of the file.
    pub fn bytes(&self) -> &[u8] {
        self.map.as_deref().unwrap_or(&[])
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use anyhow::Error;
    use tempfile::NamedTempFile;

    use super::TraceFile;

    #[test]
    fn map_file_contents() -> Result<(), Error> {
        let mut file = NamedTempFile::new()?;
        file.write_all(&[0x01, 0x05, 0x05])?;
        file.flush()?;

        let trace = TraceFile::open(file.path())?;
        assert_eq!(trace.bytes(), [0x01, 0x05, 0x05]);
        assert_eq!(trace.path(), file.path());

        Ok(())
    }

    #[test]
    fn map_empty_file() -> Result<(), Error> {
        let file = NamedTempFile::new()?;

        let trace = TraceFile::open(file.path())?;
        assert!(trace.bytes().is_empty());

        Ok(())
    }

    #[test]
    fn fail_on_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let error = TraceFile::open(dir.path().join("missing.trace")).unwrap_err();

        assert!(error.to_string().starts_with("Unable to open"));
    }

    #[test]
    fn debug_names_the_file() -> Result<(), Error> {
        let file = NamedTempFile::new()?;
        let trace = TraceFile::open(file.path())?;
        let debug = format!("{trace:?}");

        assert!(debug.contains(&format!("{:?}", file.path())));
        assert!(debug.contains("map: None"));

        Ok(())
    }
}
