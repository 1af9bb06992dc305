//! Restoring output properties from a tar stream

use super::{
    ArchiveStats, DEFAULT_DIRECTORY_MODE, EntryTarget, FileAttributes, OutputKind,
    OutputProperties, OutputProperty, TarTaskOutputPacker,
};
use crate::{Error, Result};
use filetime::FileTime;
use std::cmp::Reverse;
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tar::{Archive, Entry, EntryType};

/// Attributes to apply once every entry has been materialized
#[derive(Debug)]
struct Stamp {
    path: PathBuf,
    mode: u32,
    mtime: Option<FileTime>,
}

impl<A: FileAttributes> TarTaskOutputPacker<A> {
    /// Restore the outputs stored in `source` onto the roots of `properties`
    ///
    /// Existing content at a restored root is removed first. Permissions and
    /// modification times are applied after all content is written, deepest
    /// paths first, so creating a child never disturbs its parent's mtime
    /// and a read-only directory can still be filled.
    ///
    /// On [`Error::Restore`] the outputs on disk are in an undefined state.
    pub fn unpack<R: Read>(&self, properties: &OutputProperties, source: R) -> Result<ArchiveStats> {
        let mut archive = Archive::new(source);
        let mut stats = ArchiveStats::default();
        let mut stamps = Vec::new();
        let mut trees = HashSet::new();

        let entries = archive
            .entries()
            .map_err(|e| read_failure(e, "<archive>", "read"))?;
        for entry in entries {
            let mut entry = entry.map_err(|e| read_failure(e, "<archive>", "read entry of"))?;
            let path = entry
                .path()
                .map_err(|e| Error::restore_io(e, "<archive>", "decode entry path of"))?
                .into_owned();
            let entry_type = entry.header().entry_type();
            let mode = entry
                .header()
                .mode()
                .map_err(|e| Error::restore_io(e, &path, "decode mode of"))?;
            let mtime = entry_mtime(&mut entry, &path)?;
            stats.entries += 1;

            match EntryTarget::parse(&path)? {
                EntryTarget::Missing(name) => {
                    let property = resolve(properties, name, None)?;
                    remove_existing(property.root())
                        .map_err(|e| Error::restore_io(e, property.root(), "remove"))?;
                    tracing::trace!(property = name, "Restored missing output");
                }
                EntryTarget::File(name) => {
                    let property = resolve(properties, name, Some(OutputKind::File))?;
                    expect_type(entry_type, EntryType::Regular, &path)?;
                    let root = property.root();
                    remove_existing(root).map_err(|e| Error::restore_io(e, root, "remove"))?;
                    stats.bytes += write_file(root, &mut entry)?;
                    stats.files += 1;
                    stamps.push(Stamp {
                        path: root.to_path_buf(),
                        mode,
                        mtime: Some(mtime),
                    });
                }
                EntryTarget::TreeRoot(name) => {
                    let property = resolve(properties, name, Some(OutputKind::Directory))?;
                    expect_type(entry_type, EntryType::Directory, &path)?;
                    let root = property.root();
                    remove_existing(root).map_err(|e| Error::restore_io(e, root, "remove"))?;
                    fs::create_dir_all(root).map_err(|e| Error::restore_io(e, root, "create"))?;
                    stamps.push(Stamp {
                        path: root.to_path_buf(),
                        mode: DEFAULT_DIRECTORY_MODE,
                        mtime: None,
                    });
                    trees.insert(name.to_string());
                }
                EntryTarget::TreeEntry(name, relative) => {
                    let property = resolve(properties, name, Some(OutputKind::Directory))?;
                    if !trees.contains(name) {
                        return Err(Error::restore(format!(
                            "archive entry {} precedes its property marker",
                            path.display()
                        )));
                    }
                    let target = property.root().join(&relative);
                    if entry_type.is_dir() {
                        fs::create_dir_all(&target)
                            .map_err(|e| Error::restore_io(e, &target, "create"))?;
                        stats.directories += 1;
                    } else {
                        expect_type(entry_type, EntryType::Regular, &path)?;
                        stats.bytes += write_file(&target, &mut entry)?;
                        stats.files += 1;
                    }
                    stamps.push(Stamp {
                        path: target,
                        mode,
                        mtime: Some(mtime),
                    });
                }
            }
        }

        stamps.sort_by_key(|stamp| Reverse(stamp.path.components().count()));
        for stamp in &stamps {
            self.attributes
                .set_permissions(&stamp.path, stamp.mode)
                .map_err(|e| Error::restore_io(e, &stamp.path, "set permissions of"))?;
            if let Some(mtime) = stamp.mtime {
                self.attributes
                    .set_modified(&stamp.path, mtime)
                    .map_err(|e| Error::restore_io(e, &stamp.path, "set mtime of"))?;
            }
        }

        tracing::debug!(
            entries = stats.entries,
            files = stats.files,
            directories = stats.directories,
            bytes = stats.bytes,
            "Unpacked task outputs"
        );
        Ok(stats)
    }
}

fn resolve<'p>(
    properties: &'p OutputProperties,
    name: &str,
    kind: Option<OutputKind>,
) -> Result<&'p OutputProperty> {
    let property = properties
        .get(name)
        .ok_or_else(|| Error::restore(format!("archive contains unknown property '{name}'")))?;
    if let Some(kind) = kind
        && property.kind() != kind
    {
        return Err(Error::restore(format!(
            "archive stores property '{name}' as a {kind}, but it is declared as a {}",
            property.kind()
        )));
    }
    Ok(property)
}

fn expect_type(actual: EntryType, expected: EntryType, path: &Path) -> Result<()> {
    if actual == expected {
        Ok(())
    } else {
        Err(Error::restore(format!(
            "archive entry {} has type {actual:?}, expected {expected:?}",
            path.display()
        )))
    }
}

fn remove_existing(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(metadata) if metadata.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

fn write_file<R: Read>(target: &Path, entry: &mut Entry<'_, R>) -> Result<u64> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::restore_io(e, parent, "create"))?;
    }
    let expected = entry.size();
    let mut file = File::create(target).map_err(|e| Error::restore_io(e, target, "create"))?;
    let written = io::copy(entry, &mut file).map_err(|e| read_failure(e, target, "write"))?;
    if written != expected {
        return Err(Error::restore(format!(
            "archive ended after {written} of {expected} bytes of {}",
            target.display()
        )));
    }
    Ok(written)
}

/// Map an error hit while reading the archive to a restore failure
///
/// A cache error travelling inside the `io::Error`, such as a corrupted
/// [`StreamBuffer`](crate::StreamBuffer) source, is handed back unchanged.
fn read_failure(e: io::Error, path: impl AsRef<Path>, operation: &str) -> Error {
    if !e.get_ref().is_some_and(|inner| inner.is::<Error>()) {
        return Error::restore_io(e, path, operation);
    }
    match e.into_inner().map(|inner| inner.downcast::<Error>()) {
        Some(Ok(inner)) => *inner,
        _ => Error::restore(format!("{operation} {} failed", path.as_ref().display())),
    }
}

/// Modification time of an entry, preferring the nanosecond PAX record
fn entry_mtime<R: Read>(entry: &mut Entry<'_, R>, path: &Path) -> Result<FileTime> {
    if let Some(extensions) = entry
        .pax_extensions()
        .map_err(|e| read_failure(e, path, "read extensions of"))?
    {
        for extension in extensions {
            let extension =
                extension.map_err(|e| read_failure(e, path, "read extensions of"))?;
            if matches!(extension.key(), Ok("mtime")) {
                let value = extension.value().map_err(|_| {
                    Error::restore(format!("mtime of {} is not valid UTF-8", path.display()))
                })?;
                return parse_mtime(value).ok_or_else(|| {
                    Error::restore(format!("mtime '{value}' of {} is malformed", path.display()))
                });
            }
        }
    }

    let seconds = entry
        .header()
        .mtime()
        .map_err(|e| Error::restore_io(e, path, "decode mtime of"))?;
    Ok(FileTime::from_unix_time(
        i64::try_from(seconds).unwrap_or(i64::MAX),
        0,
    ))
}

fn parse_mtime(value: &str) -> Option<FileTime> {
    let (seconds, fraction) = value.split_once('.').unwrap_or((value, ""));
    let seconds = seconds.parse::<i64>().ok()?;
    if !fraction.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let digits: String = fraction.chars().chain(std::iter::repeat('0')).take(9).collect();
    let nanos = digits.parse::<u32>().ok()?;
    Some(FileTime::from_unix_time(seconds, nanos))
}
