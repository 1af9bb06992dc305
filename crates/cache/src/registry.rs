//! Registry of included builds and the projects they contain
//!
//! Builds are registered up front by name; their projects are discovered
//! lazily through a [`MetadataProvider`] the first time anything asks about
//! them. Projects are addressed by a composite path `<build>::<project>`.

use crate::{Error, Result};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

const BUILD_SEPARATOR: &str = "::";

/// A build taking part in the composite
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludedBuild {
    name: String,
    root_dir: PathBuf,
}

impl IncludedBuild {
    /// Build name, the prefix of its projects' composite paths
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Root directory of the build
    #[must_use]
    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }
}

/// A project as reported by a [`MetadataProvider`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectMetadata {
    /// Path of the project inside its build, e.g. `:core`
    pub path: String,
    /// Project directory
    pub directory: PathBuf,
}

/// Discovers the projects of a build
pub trait MetadataProvider {
    /// List every project of `build`
    fn projects(&self, build: &IncludedBuild) -> Result<Vec<ProjectMetadata>>;
}

impl<F> MetadataProvider for F
where
    F: Fn(&IncludedBuild) -> Result<Vec<ProjectMetadata>>,
{
    fn projects(&self, build: &IncludedBuild) -> Result<Vec<ProjectMetadata>> {
        self(build)
    }
}

/// Keyed arena of builds and projects
#[derive(Debug)]
pub struct BuildRegistry<P> {
    provider: P,
    builds: BTreeMap<String, IncludedBuild>,
    projects: BTreeMap<String, PathBuf>,
    configured: HashSet<PathBuf>,
}

impl<P: MetadataProvider> BuildRegistry<P> {
    /// Empty registry discovering projects through `provider`
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            builds: BTreeMap::new(),
            projects: BTreeMap::new(),
            configured: HashSet::new(),
        }
    }

    /// Add or replace the build called `name`
    pub fn register_build(&mut self, name: impl Into<String>, root_dir: impl Into<PathBuf>) {
        let name = name.into();
        let build = IncludedBuild {
            name: name.clone(),
            root_dir: root_dir.into(),
        };
        tracing::debug!(build = %name, root = %build.root_dir.display(), "Registering build");
        self.builds.insert(name, build);
    }

    /// Record a project under its composite path
    pub fn register_project(&mut self, path: impl Into<String>, directory: impl Into<PathBuf>) -> Result<()> {
        let path = path.into();
        if self.projects.contains_key(&path) {
            return Err(Error::DuplicateProject { path });
        }
        tracing::info!(project = %path, "Registering project in composite build");
        self.projects.insert(path, directory.into());
        Ok(())
    }

    /// Discover the projects of build `name` unless its directory was
    /// already configured
    pub fn ensure_registered(&mut self, name: &str) -> Result<()> {
        let build = self
            .builds
            .get(name)
            .cloned()
            .ok_or_else(|| Error::configuration(format!("No build named '{name}' is registered")))?;
        self.ensure_build_registered(&build)
    }

    fn ensure_build_registered(&mut self, build: &IncludedBuild) -> Result<()> {
        if self.configured.contains(build.root_dir()) {
            return Ok(());
        }
        for project in self.provider.projects(build)? {
            let path = format!("{}{BUILD_SEPARATOR}{}", build.name(), project.path);
            self.register_project(path, project.directory)?;
        }
        self.configured.insert(build.root_dir.clone());
        Ok(())
    }

    /// Directory of the project at composite `path`
    ///
    /// The owning build is configured first if needed. Asking for a project
    /// that no build provides is an [`Error::UnknownProject`].
    pub fn project_directory(&mut self, path: &str) -> Result<PathBuf> {
        if !self.projects.contains_key(path)
            && let Some(build) = self.owning_build(path).cloned()
        {
            self.ensure_build_registered(&build)?;
        }
        self.projects
            .get(path)
            .cloned()
            .ok_or_else(|| Error::UnknownProject {
                path: path.to_string(),
            })
    }

    /// Composite paths of every project, configuring all builds first
    pub fn all_projects(&mut self) -> Result<Vec<String>> {
        let builds: Vec<_> = self.builds.values().cloned().collect();
        for build in &builds {
            self.ensure_build_registered(build)?;
        }
        Ok(self.projects.keys().cloned().collect())
    }

    /// Registered builds in name order
    pub fn builds(&self) -> impl Iterator<Item = &IncludedBuild> {
        self.builds.values()
    }

    fn owning_build(&self, path: &str) -> Option<&IncludedBuild> {
        let (build, _) = path.split_once(BUILD_SEPARATOR)?;
        self.builds.get(build)
    }
}
