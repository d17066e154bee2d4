use std::path::{Path, PathBuf};

/// Settings for tables stored in a file.
///
/// ```
/// use resultstore::{Column, StreamOptions, Table};
///
/// let dir = tempfile::tempdir().unwrap();
/// let options = StreamOptions::new().scratch_dir(dir.path());
/// let path = dir.path().join("runs/first.jdf");
/// let table = Table::binary_stream_with(&path, vec![Column::float("x")], &options).unwrap();
/// table.set_attribute("sample", "A1").unwrap();
/// assert!(path.exists());
/// ```
#[derive(Debug, Clone)]
pub struct StreamOptions {
    create_parent_dirs: bool,
    scratch_dir: Option<PathBuf>,
}

impl Default for StreamOptions {
    fn default() -> Self {
        StreamOptions {
            create_parent_dirs: true,
            scratch_dir: None,
        }
    }
}

impl StreamOptions {
    /// The default options
    pub fn new() -> Self {
        Self::default()
    }

    /// Create missing parent directories of a new stream file (default: true).
    pub fn create_parent_dirs(mut self, create: bool) -> Self {
        self.create_parent_dirs = create;
        self
    }

    /// Where binary header rewrites buffer the row data (default: the system
    /// temporary directory).
    pub fn scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    pub(crate) fn prepare(&self, path: &Path) -> std::io::Result<()> {
        match path.parent() {
            Some(parent) if self.create_parent_dirs && !parent.as_os_str().is_empty() => {
                std::fs::create_dir_all(parent)
            }
            _ => Ok(()),
        }
    }

    pub(crate) fn temp_dir(&self) -> Option<&Path> {
        self.scratch_dir.as_deref()
    }

    /// An anonymous file that is deleted when dropped.
    pub(crate) fn scratch_file(&self) -> std::io::Result<std::fs::File> {
        match &self.scratch_dir {
            Some(dir) => tempfile::tempfile_in(dir),
            None => tempfile::tempfile(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::StreamOptions;

    #[test]
    fn parents_are_created_unless_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b/c.csv");
        StreamOptions::new()
            .create_parent_dirs(false)
            .prepare(&nested)
            .unwrap();
        assert!(!dir.path().join("a").exists());
        StreamOptions::new().prepare(&nested).unwrap();
        assert!(dir.path().join("a/b").is_dir());
    }

    #[test]
    fn scratch_files_land_in_the_scratch_dir() {
        let dir = tempfile::tempdir().unwrap();
        let options = StreamOptions::new().scratch_dir(dir.path());
        assert!(options.scratch_file().is_ok());
        let missing = StreamOptions::new().scratch_dir(dir.path().join("missing"));
        assert!(missing.scratch_file().is_err());
    }
}
