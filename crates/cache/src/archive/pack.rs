//! Writing output properties into a tar stream

use super::{
    ArchiveStats, FILE_PREFIX, FileAttributes, MISSING_PREFIX, OutputKind, OutputProperties,
    OutputProperty, TREE_PREFIX, TarTaskOutputPacker,
};
use crate::{Error, Result};
use filetime::FileTime;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tar::{Builder, EntryType, Header};
use walkdir::WalkDir;

const MARKER_MODE: u32 = 0o644;

impl<A: FileAttributes> TarTaskOutputPacker<A> {
    /// Write every property of `properties` to `sink` as one tar stream
    ///
    /// Fails with [`Error::Capture`] when a property is not cacheable, when
    /// its root has the wrong shape, or when anything below it cannot be
    /// read. Whatever was already written to `sink` must then be discarded.
    pub fn pack<W: Write>(&self, properties: &OutputProperties, sink: W) -> Result<ArchiveStats> {
        let mut builder = Builder::new(sink);
        let mut stats = ArchiveStats::default();

        for property in properties.iter() {
            if !property.is_cacheable() {
                return Err(Error::capture(
                    property.name(),
                    "property is not backed by a single file or directory",
                ));
            }
            self.pack_property(&mut builder, property, &mut stats)?;
        }

        builder
            .into_inner()
            .map_err(|e| Error::capture_io("<archive>", e, "<sink>", "finish"))?;

        tracing::debug!(
            entries = stats.entries,
            files = stats.files,
            directories = stats.directories,
            bytes = stats.bytes,
            "Packed task outputs"
        );
        Ok(stats)
    }

    fn pack_property<W: Write>(
        &self,
        builder: &mut Builder<W>,
        property: &OutputProperty,
        stats: &mut ArchiveStats,
    ) -> Result<()> {
        let name = property.name();
        let root = property.root();

        let metadata = match fs::metadata(root) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::trace!(property = name, root = %root.display(), "Output missing");
                let marker = format!("{MISSING_PREFIX}{name}");
                append_entry(builder, &marker, EntryType::Regular, MARKER_MODE, None, io::empty(), 0)
                    .map_err(|e| Error::capture_io(name, e, root, "write marker for"))?;
                stats.entries += 1;
                return Ok(());
            }
            Err(e) => return Err(Error::capture_io(name, e, root, "stat")),
        };

        match property.kind() {
            OutputKind::File => {
                if !metadata.is_file() {
                    return Err(Error::capture(
                        name,
                        format!("expected a regular file at {}", root.display()),
                    ));
                }
                let path = PathBuf::from(format!("{FILE_PREFIX}{name}"));
                self.append_file(builder, name, root, &path, metadata.len(), stats)
            }
            OutputKind::Directory => {
                if !metadata.is_dir() {
                    return Err(Error::capture(
                        name,
                        format!("expected a directory at {}", root.display()),
                    ));
                }
                self.pack_tree(builder, name, root, stats)
            }
        }
    }

    fn pack_tree<W: Write>(
        &self,
        builder: &mut Builder<W>,
        name: &str,
        root: &Path,
        stats: &mut ArchiveStats,
    ) -> Result<()> {
        let base = PathBuf::from(format!("{TREE_PREFIX}{name}"));
        let marker = format!("{}/", base.display());
        let mtime = self
            .attributes
            .modified(root)
            .map_err(|e| Error::capture_io(name, e, root, "read mtime of"))?;
        append_entry(
            builder,
            &marker,
            EntryType::Directory,
            super::DEFAULT_DIRECTORY_MODE,
            Some(mtime),
            io::empty(),
            0,
        )
        .map_err(|e| Error::capture_io(name, e, root, "write marker for"))?;
        stats.entries += 1;

        let walker = WalkDir::new(root)
            .min_depth(1)
            .follow_links(true)
            .sort_by_file_name();
        for entry in walker {
            let entry = entry.map_err(|e| {
                let path = e.path().map_or_else(|| root.to_path_buf(), Path::to_path_buf);
                Error::capture_io(name, e.into(), path, "walk")
            })?;
            let path = entry.path();
            let relative = path.strip_prefix(root).map_err(|_| {
                Error::capture(name, format!("{} is outside the output root", path.display()))
            })?;
            let archive_path = base.join(relative);
            let file_type = entry.file_type();

            if file_type.is_dir() {
                let mode = self
                    .attributes
                    .permissions(path)
                    .map_err(|e| Error::capture_io(name, e, path, "read permissions of"))?;
                let mtime = self
                    .attributes
                    .modified(path)
                    .map_err(|e| Error::capture_io(name, e, path, "read mtime of"))?;
                append_entry(
                    builder,
                    &archive_path,
                    EntryType::Directory,
                    mode,
                    Some(mtime),
                    io::empty(),
                    0,
                )
                .map_err(|e| Error::capture_io(name, e, path, "archive"))?;
                stats.entries += 1;
                stats.directories += 1;
            } else if file_type.is_file() {
                let len = entry
                    .metadata()
                    .map_err(|e| Error::capture_io(name, e.into(), path, "stat"))?
                    .len();
                self.append_file(builder, name, path, &archive_path, len, stats)?;
            } else {
                return Err(Error::capture(
                    name,
                    format!("{} is neither a file nor a directory", path.display()),
                ));
            }
        }
        Ok(())
    }

    fn append_file<W: Write>(
        &self,
        builder: &mut Builder<W>,
        name: &str,
        source: &Path,
        archive_path: &Path,
        len: u64,
        stats: &mut ArchiveStats,
    ) -> Result<()> {
        let mode = self
            .attributes
            .permissions(source)
            .map_err(|e| Error::capture_io(name, e, source, "read permissions of"))?;
        let mtime = self
            .attributes
            .modified(source)
            .map_err(|e| Error::capture_io(name, e, source, "read mtime of"))?;
        let file = File::open(source).map_err(|e| Error::capture_io(name, e, source, "open"))?;

        append_entry(
            builder,
            archive_path,
            EntryType::Regular,
            mode,
            Some(mtime),
            file,
            len,
        )
        .map_err(|e| Error::capture_io(name, e, source, "archive"))?;

        stats.entries += 1;
        stats.files += 1;
        stats.bytes += len;
        Ok(())
    }
}

/// Append one entry, preceded by its PAX mtime record
fn append_entry<W: Write, R: Read>(
    builder: &mut Builder<W>,
    path: impl AsRef<Path>,
    entry_type: EntryType,
    mode: u32,
    mtime: Option<FileTime>,
    data: R,
    size: u64,
) -> io::Result<()> {
    let mut header = Header::new_gnu();
    header.set_entry_type(entry_type);
    header.set_mode(mode);
    header.set_size(size);
    header.set_uid(0);
    header.set_gid(0);

    if let Some(mtime) = mtime {
        header.set_mtime(u64::try_from(mtime.unix_seconds()).unwrap_or(0));
        append_pax_mtime(builder, mtime)?;
    } else {
        header.set_mtime(0);
    }

    builder.append_data(
        &mut header,
        path,
        ExactReader {
            inner: data.take(size),
            remaining: size,
        },
    )
}

/// Yields exactly the length recorded in the header
///
/// A file that grows while being packed is cut at the recorded length; one
/// that shrinks fails with `UnexpectedEof` instead of corrupting the archive.
struct ExactReader<R> {
    inner: io::Take<R>,
    remaining: u64,
}

impl<R: Read> Read for ExactReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n == 0 && self.remaining > 0 && !buf.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "file shrank while it was being archived",
            ));
        }
        self.remaining -= n as u64;
        Ok(n)
    }
}

fn append_pax_mtime<W: Write>(builder: &mut Builder<W>, mtime: FileTime) -> io::Result<()> {
    let record = pax_record("mtime", &format_mtime(mtime));
    let mut header = Header::new_ustar();
    header.set_entry_type(EntryType::XHeader);
    header.set_mode(MARKER_MODE);
    header.set_size(record.len() as u64);
    builder.append_data(&mut header, "././@PaxHeader", record.as_slice())
}

/// Encode one `"<len> <key>=<value>\n"` record; `len` counts itself
fn pax_record(key: &str, value: &str) -> Vec<u8> {
    let body = format!(" {key}={value}\n");
    let mut len = body.len() + 1;
    loop {
        let candidate = len.to_string().len() + body.len();
        if candidate == len {
            break;
        }
        len = candidate;
    }
    format!("{len}{body}").into_bytes()
}

pub(super) fn format_mtime(mtime: FileTime) -> String {
    format!("{}.{:09}", mtime.unix_seconds(), mtime.nanoseconds())
}
