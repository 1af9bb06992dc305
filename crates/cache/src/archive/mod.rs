//! Packing task outputs into a single archive and restoring them
//!
//! A task declares its outputs as named [`OutputProperty`] values, each rooted
//! at a single file or a directory tree. [`TarTaskOutputPacker`] turns the
//! whole set into one tar stream and back again, preserving file content,
//! permission bits and modification times.
//!
//! ## Wire format
//!
//! Properties are written in name order. Each one starts with a marker entry:
//!
//! ```text
//! file-<name>             regular entry: the property's single file
//! tree-<name>/            directory entry: start of a directory property
//! tree-<name>/<rel path>  files and directories below that root
//! missing-<name>          empty entry: the root did not exist
//! ```
//!
//! Every entry is preceded by a PAX `mtime` record carrying nanoseconds.
//! Paths longer than the 100-byte tar name field use GNU long-name records.

pub mod attrs;
mod pack;
mod unpack;

use crate::{Error, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub use attrs::{FileAttributes, NativeAttributes};
pub use filetime::FileTime;

const FILE_PREFIX: &str = "file-";
const TREE_PREFIX: &str = "tree-";
const MISSING_PREFIX: &str = "missing-";

/// Mode given to the root directory of a restored directory property
pub const DEFAULT_DIRECTORY_MODE: u32 = 0o755;

/// Shape of an output property's root
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputKind {
    /// A single regular file
    File,
    /// A directory tree
    Directory,
}

impl std::fmt::Display for OutputKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File => write!(f, "file"),
            Self::Directory => write!(f, "directory"),
        }
    }
}

/// A named output declared by a task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputProperty {
    name: String,
    kind: OutputKind,
    root: PathBuf,
    cacheable: bool,
}

impl OutputProperty {
    /// Declare a single-file output
    #[must_use]
    pub fn file(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            kind: OutputKind::File,
            root: root.into(),
            cacheable: true,
        }
    }

    /// Declare a directory output
    #[must_use]
    pub fn directory(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            kind: OutputKind::Directory,
            root: root.into(),
            cacheable: true,
        }
    }

    /// Mark the output as not reproducible from the cache
    ///
    /// Used for outputs that are not backed by one file or one tree, such as
    /// an arbitrary file collection. A set containing one cannot be packed.
    #[must_use]
    pub fn non_cacheable(mut self) -> Self {
        self.cacheable = false;
        self
    }

    /// Property name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// File or directory
    #[must_use]
    pub const fn kind(&self) -> OutputKind {
        self.kind
    }

    /// Location of the output on disk
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether the output may be stored in the cache
    #[must_use]
    pub const fn is_cacheable(&self) -> bool {
        self.cacheable
    }
}

/// The outputs of one task, keyed and ordered by property name
#[derive(Debug, Clone, Default)]
pub struct OutputProperties {
    properties: BTreeMap<String, OutputProperty>,
}

impl OutputProperties {
    /// Create an empty set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a property, rejecting invalid or repeated names
    pub fn declare(&mut self, property: OutputProperty) -> Result<()> {
        validate_name(property.name())?;
        if self.properties.contains_key(property.name()) {
            return Err(Error::DuplicateProperty {
                name: property.name.clone(),
            });
        }
        self.properties.insert(property.name.clone(), property);
        Ok(())
    }

    /// Builder-style [`declare`](Self::declare)
    pub fn with(mut self, property: OutputProperty) -> Result<Self> {
        self.declare(property)?;
        Ok(self)
    }

    /// Look up a property by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&OutputProperty> {
        self.properties.get(name)
    }

    /// Properties in name order
    pub fn iter(&self) -> impl Iterator<Item = &OutputProperty> {
        self.properties.values()
    }

    /// Number of declared properties
    #[must_use]
    pub fn len(&self) -> usize {
        self.properties.len()
    }

    /// Whether nothing was declared
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    /// Whether every property may be cached
    #[must_use]
    pub fn is_cacheable(&self) -> bool {
        self.properties.values().all(OutputProperty::is_cacheable)
    }
}

impl FromIterator<OutputProperty> for Result<OutputProperties> {
    fn from_iter<I: IntoIterator<Item = OutputProperty>>(iter: I) -> Self {
        let mut properties = OutputProperties::new();
        for property in iter {
            properties.declare(property)?;
        }
        Ok(properties)
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::configuration("output property name must not be empty"));
    }
    if name.contains(['/', '\\', '\0']) {
        return Err(Error::configuration(format!(
            "output property name '{name}' must not contain path separators or NUL"
        )));
    }
    Ok(())
}

/// Counts collected while packing or unpacking
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiveStats {
    /// Archive entries written or read, markers included
    pub entries: usize,
    /// Regular files
    pub files: usize,
    /// Directories below property roots
    pub directories: usize,
    /// Bytes of file content
    pub bytes: u64,
}

/// Tar-based codec between [`OutputProperties`] and an archive stream
#[derive(Debug, Clone, Default)]
pub struct TarTaskOutputPacker<A = NativeAttributes> {
    attributes: A,
}

impl TarTaskOutputPacker<NativeAttributes> {
    /// Packer using the platform's own permission and timestamp handling
    #[must_use]
    pub fn new() -> Self {
        Self {
            attributes: NativeAttributes,
        }
    }
}

impl<A: FileAttributes> TarTaskOutputPacker<A> {
    /// Packer with a custom attribute implementation
    #[must_use]
    pub const fn with_attributes(attributes: A) -> Self {
        Self { attributes }
    }

    /// Attribute implementation in use
    #[must_use]
    pub const fn attributes(&self) -> &A {
        &self.attributes
    }
}

/// Where an archive entry belongs, decoded from its path
#[derive(Debug, PartialEq, Eq)]
enum EntryTarget<'a> {
    File(&'a str),
    Missing(&'a str),
    TreeRoot(&'a str),
    TreeEntry(&'a str, PathBuf),
}

impl<'a> EntryTarget<'a> {
    fn parse(path: &'a Path) -> Result<Self> {
        use std::path::Component;

        let mut components = path.components();
        let head = match components.next() {
            Some(Component::Normal(head)) => head.to_str().ok_or_else(|| {
                Error::restore(format!("archive entry {} is not valid UTF-8", path.display()))
            })?,
            _ => {
                return Err(Error::restore(format!(
                    "archive entry {} has no property marker",
                    path.display()
                )));
            }
        };

        let mut rest = PathBuf::new();
        for component in components {
            match component {
                Component::Normal(part) => rest.push(part),
                Component::CurDir => {}
                _ => {
                    return Err(Error::restore(format!(
                        "archive entry {} escapes its property root",
                        path.display()
                    )));
                }
            }
        }

        if let Some(name) = head.strip_prefix(TREE_PREFIX) {
            if rest.as_os_str().is_empty() {
                return Ok(Self::TreeRoot(name));
            }
            return Ok(Self::TreeEntry(name, rest));
        }
        if !rest.as_os_str().is_empty() {
            return Err(Error::restore(format!(
                "archive entry {} nests below a non-directory marker",
                path.display()
            )));
        }
        if let Some(name) = head.strip_prefix(FILE_PREFIX) {
            return Ok(Self::File(name));
        }
        if let Some(name) = head.strip_prefix(MISSING_PREFIX) {
            return Ok(Self::Missing(name));
        }
        Err(Error::restore(format!(
            "unrecognized archive entry {}",
            path.display()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn properties_iterate_in_name_order() {
        let props = OutputProperties::new()
            .with(OutputProperty::directory("zeta", "/out/z"))
            .unwrap()
            .with(OutputProperty::file("alpha", "/out/a.txt"))
            .unwrap()
            .with(OutputProperty::file("mid", "/out/m.txt"))
            .unwrap();
        let names: Vec<_> = props.iter().map(OutputProperty::name).collect();
        assert_eq!(names, ["alpha", "mid", "zeta"]);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut props = OutputProperties::new();
        props.declare(OutputProperty::file("out", "/a")).unwrap();
        let err = props
            .declare(OutputProperty::directory("out", "/b"))
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateProperty { name } if name == "out"));
        assert_eq!(props.len(), 1);
    }

    #[test]
    fn invalid_names_are_rejected() {
        let mut props = OutputProperties::new();
        assert!(props.declare(OutputProperty::file("", "/a")).is_err());
        assert!(props.declare(OutputProperty::file("a/b", "/a")).is_err());
        assert!(props.declare(OutputProperty::file("a\0b", "/a")).is_err());
        assert!(props.is_empty());
    }

    #[test]
    fn collect_into_result() {
        let props: Result<OutputProperties> = [
            OutputProperty::file("a", "/a"),
            OutputProperty::file("a", "/b"),
        ]
        .into_iter()
        .collect();
        assert!(props.is_err());
    }

    #[test]
    fn non_cacheable_property_taints_the_set() {
        let props = OutputProperties::new()
            .with(OutputProperty::file("a", "/a"))
            .unwrap();
        assert!(props.is_cacheable());
        let props = props
            .with(OutputProperty::directory("b", "/b").non_cacheable())
            .unwrap();
        assert!(!props.is_cacheable());
    }

    #[test]
    fn parse_entry_targets() {
        assert_eq!(
            EntryTarget::parse(Path::new("file-report")).unwrap(),
            EntryTarget::File("report")
        );
        assert_eq!(
            EntryTarget::parse(Path::new("missing-report")).unwrap(),
            EntryTarget::Missing("report")
        );
        assert_eq!(
            EntryTarget::parse(Path::new("tree-classes/")).unwrap(),
            EntryTarget::TreeRoot("classes")
        );
        assert_eq!(
            EntryTarget::parse(Path::new("tree-classes/a/b.class")).unwrap(),
            EntryTarget::TreeEntry("classes", PathBuf::from("a/b.class"))
        );
    }

    #[test]
    fn parse_rejects_escapes_and_garbage() {
        assert!(EntryTarget::parse(Path::new("tree-classes/../../etc/passwd")).is_err());
        assert!(EntryTarget::parse(Path::new("/file-abs")).is_err());
        assert!(EntryTarget::parse(Path::new("file-x/nested")).is_err());
        assert!(EntryTarget::parse(Path::new("other-x")).is_err());
    }
}
