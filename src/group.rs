//! Trees of tables, saved as one tar+gzip archive.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::observability::{log_info, log_warn};
use crate::{Context, Error, Result, Table};

const CSV: &str = ".csv";
const BINARY: &str = ".jdf";

/// A named tree of tables and sub-groups.
///
/// Paths are slash-separated, as in `"run1/sweeps/up"`. Adding creates any
/// missing groups along the way; looking up never does.
#[derive(Debug, Default)]
pub struct Group {
    tables: BTreeMap<String, Table>,
    groups: BTreeMap<String, Group>,
}

/// Split a path into its parent segments and final name.
fn split_path(path: &str) -> Result<(Vec<&str>, &str)> {
    let mut segments: Vec<&str> = path.trim_matches('/').split('/').collect();
    if segments
        .iter()
        .any(|s| s.is_empty() || *s == "." || *s == "..")
    {
        return Err(Error::InvalidPath(path.to_string()));
    }
    let name = segments
        .pop()
        .ok_or_else(|| Error::InvalidPath(path.to_string()))?;
    Ok((segments, name))
}

impl Group {
    /// An empty group
    pub fn new() -> Group {
        Group::default()
    }

    /// Are there no tables or groups here?
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty() && self.groups.is_empty()
    }

    fn walk(&self, segments: &[&str], path: &str) -> Result<&Group> {
        let mut group = self;
        for s in segments {
            group = group
                .groups
                .get(*s)
                .ok_or_else(|| Error::NotFound(path.to_string()))?;
        }
        Ok(group)
    }

    fn walk_mut(&mut self, segments: &[&str], path: &str) -> Result<&mut Group> {
        let mut group = self;
        for s in segments {
            group = group
                .groups
                .get_mut(*s)
                .ok_or_else(|| Error::NotFound(path.to_string()))?;
        }
        Ok(group)
    }

    fn walk_or_create(&mut self, segments: &[&str]) -> &mut Group {
        let mut group = self;
        for s in segments {
            group = group.groups.entry(s.to_string()).or_default();
        }
        group
    }

    /// Add a table, replacing any table already at `path`.
    pub fn add_table(&mut self, path: &str, table: Table) -> Result<()> {
        let (parents, name) = split_path(path)?;
        self.walk_or_create(&parents)
            .tables
            .insert(name.to_string(), table);
        Ok(())
    }

    /// Add a group, replacing any group already at `path`.
    pub fn add_group(&mut self, path: &str, group: Group) -> Result<()> {
        let (parents, name) = split_path(path)?;
        self.walk_or_create(&parents)
            .groups
            .insert(name.to_string(), group);
        Ok(())
    }

    /// Take a table out of the tree.
    pub fn remove_table(&mut self, path: &str) -> Result<Table> {
        let (parents, name) = split_path(path)?;
        self.walk_mut(&parents, path)?
            .tables
            .remove(name)
            .ok_or_else(|| Error::NotFound(path.to_string()))
    }

    /// Take a group out of the tree.
    pub fn remove_group(&mut self, path: &str) -> Result<Group> {
        let (parents, name) = split_path(path)?;
        self.walk_mut(&parents, path)?
            .groups
            .remove(name)
            .ok_or_else(|| Error::NotFound(path.to_string()))
    }

    /// The table at `path`
    pub fn table(&self, path: &str) -> Result<&Table> {
        let (parents, name) = split_path(path)?;
        self.walk(&parents, path)?
            .tables
            .get(name)
            .ok_or_else(|| Error::NotFound(path.to_string()))
    }

    /// The table at `path`, mutably
    pub fn table_mut(&mut self, path: &str) -> Result<&mut Table> {
        let (parents, name) = split_path(path)?;
        self.walk_mut(&parents, path)?
            .tables
            .get_mut(name)
            .ok_or_else(|| Error::NotFound(path.to_string()))
    }

    /// The group at `path`
    pub fn group(&self, path: &str) -> Result<&Group> {
        let (parents, name) = split_path(path)?;
        self.walk(&parents, path)?
            .groups
            .get(name)
            .ok_or_else(|| Error::NotFound(path.to_string()))
    }

    /// The group at `path`, mutably
    pub fn group_mut(&mut self, path: &str) -> Result<&mut Group> {
        let (parents, name) = split_path(path)?;
        self.walk_mut(&parents, path)?
            .groups
            .get_mut(name)
            .ok_or_else(|| Error::NotFound(path.to_string()))
    }

    /// Is there a table at `path`?
    pub fn contains_table(&self, path: &str) -> bool {
        self.table(path).is_ok()
    }

    /// Is there a group at `path`?
    pub fn contains_group(&self, path: &str) -> bool {
        self.group(path).is_ok()
    }

    /// Names of the tables directly in this group
    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    /// Names of the groups directly in this group
    pub fn group_names(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }

    /// Every table in the tree, with its full path.
    pub fn all_tables(&self) -> Vec<(String, &Table)> {
        let mut all = Vec::new();
        self.collect_tables("", &mut all);
        all
    }

    fn collect_tables<'a>(&'a self, prefix: &str, all: &mut Vec<(String, &'a Table)>) {
        for (name, table) in self.tables.iter() {
            all.push((format!("{prefix}{name}"), table));
        }
        for (name, group) in self.groups.iter() {
            group.collect_tables(&format!("{prefix}{name}/"), all);
        }
    }

    /// Write every table as CSV into a tar+gzip archive.
    pub fn write_csv_archive(&self, out: impl Write) -> Result<()> {
        self.write_archive(out, CSV, |table, bytes| table.write_csv(bytes))
    }

    /// Write every table in the binary format into a tar+gzip archive.
    pub fn write_binary_archive(&self, out: impl Write) -> Result<()> {
        self.write_archive(out, BINARY, |table, bytes| table.write_binary(bytes))
    }

    /// Save a CSV archive to a file.
    pub fn save_csv_archive(&self, path: impl AsRef<Path>) -> Result<()> {
        self.write_csv_archive(BufWriter::new(File::create(path)?))
    }

    /// Save a binary archive to a file.
    pub fn save_binary_archive(&self, path: impl AsRef<Path>) -> Result<()> {
        self.write_binary_archive(BufWriter::new(File::create(path)?))
    }

    fn write_archive<W: Write>(
        &self,
        out: W,
        extension: &str,
        encode: impl Fn(&Table, &mut Vec<u8>) -> Result<()>,
    ) -> Result<()> {
        let mut builder = tar::Builder::new(GzEncoder::new(out, Compression::default()));
        let tables = self.all_tables();
        for (path, table) in tables.iter() {
            let mut bytes = Vec::new();
            encode(table, &mut bytes)?;
            let mut header = tar::Header::new_ustar();
            header.set_size(bytes.len() as u64);
            header.set_mode(0o644);
            header.set_mtime(0);
            header.set_entry_type(tar::EntryType::Regular);
            builder.append_data(&mut header, format!("{path}{extension}"), bytes.as_slice())?;
        }
        builder.into_inner()?.finish()?.flush()?;
        log_info!(event = "archive_written", tables = tables.len(), format = extension);
        Ok(())
    }

    /// Read an archive written by [`Group::write_csv_archive`] or
    /// [`Group::write_binary_archive`].
    ///
    /// Entries ending in `.csv` or `.jdf` become in-memory tables; anything
    /// else is skipped.
    pub fn read_archive(input: impl Read) -> Result<Group> {
        let mut archive = tar::Archive::new(GzDecoder::new(input));
        let mut group = Group::new();
        let mut count = 0;
        for entry in archive.entries()? {
            let mut entry = entry?;
            let kind = entry.header().entry_type();
            if kind.is_dir() {
                continue;
            }
            let name = entry.path()?.to_string_lossy().into_owned();
            if !kind.is_file() {
                log_warn!(event = "archive_entry_skipped", entry = %name, reason = "not a file");
                continue;
            }
            let path: Vec<&str> = name.split('/').filter(|s| !s.is_empty() && *s != ".").collect();
            let path = path.join("/");
            let (stem, table) = if let Some(stem) = path.strip_suffix(CSV) {
                (stem, Table::read_csv(&mut entry).context(&name)?)
            } else if let Some(stem) = path.strip_suffix(BINARY) {
                (stem, Table::read_binary(&mut entry).context(&name)?)
            } else {
                log_warn!(event = "archive_entry_skipped", entry = %name, reason = "unknown extension");
                continue;
            };
            group.add_table(stem, table)?;
            count += 1;
        }
        log_info!(event = "archive_read", tables = count);
        Ok(group)
    }

    /// Load an archive file.
    pub fn load_archive(path: impl AsRef<Path>) -> Result<Group> {
        Group::read_archive(BufReader::new(File::open(path)?))
    }
}
