mod properties;
pub mod action_plan;
pub mod catalog;
pub mod installed;
pub mod refresh;

#[cfg(test)]
mod tests;
#[cfg(test)]
mod installed_tests;

use crate::actions::Manifest;
use crate::fmri::Fmri;
use crate::search::{SearchError, SearchIndex, SearchOutcome, MAX_FAST_INDEXED_PKGS};
use catalog::{CatalogError, ImageCatalog, PackageInfo};
use fs2::FileExt;
use ini::Ini;
use installed::{InstalledError, InstalledPackageInfo, InstalledPackages};
use miette::Diagnostic;
pub use properties::*;
use redb::{Database, TableDefinition};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

/// Advisory lock held for the duration of a solve+execute sequence (see
/// the distilled spec's concurrency model: "Holding the lock for the
/// entire solver+execute sequence is required"). Dropping it releases the
/// lock.
pub struct ImageLock {
    _file: File,
}

/// Whether an image owns a full `var/pkg` metadata tree or sits inside a
/// parent's, using the partial `.pkg` layout (linked-image children).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum ImageType {
    Full,
    Partial,
}

/// A configured package source for an image.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Publisher {
    pub name: String,
    pub origin: String,
    pub mirrors: Vec<String>,
    pub sticky: bool,
    pub enabled: bool,
    pub is_default: bool,
}

impl Publisher {
    pub fn new(name: impl Into<String>, origin: impl Into<String>, mirrors: Vec<String>, is_default: bool) -> Self {
        Publisher {
            name: name.into(),
            origin: origin.into(),
            mirrors,
            sticky: true,
            enabled: true,
            is_default,
        }
    }
}

/// How this image is related to a parent image, if at all. Populated by the
/// linked-image controller; an image with no parent has `parent_path: None`
/// and no children.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LinkedImageMetadata {
    pub parent_path: Option<PathBuf>,
    pub name: Option<String>,
    pub children: Vec<LinkedChildRef>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LinkedChildRef {
    pub name: String,
    pub path: PathBuf,
}

#[derive(Debug, Error, Diagnostic)]
pub enum ImageError {
    #[error("I/O error: {0}")]
    #[diagnostic(code(ips::image_error::io), help("Check system resources and permissions"))]
    IO(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    #[diagnostic(code(ips::image_error::json), help("Check the JSON format and try again"))]
    Json(#[from] serde_json::Error),

    #[error("Catalog error: {0}")]
    #[diagnostic(code(ips::image_error::catalog))]
    Catalog(#[from] CatalogError),

    #[error("Installed packages error: {0}")]
    #[diagnostic(code(ips::image_error::installed))]
    Installed(#[from] InstalledError),

    #[error("Transport error: {0}")]
    #[diagnostic(code(ips::image_error::transport))]
    Transport(#[from] crate::transport::TransportError),

    #[error("Publisher not found: {0}")]
    #[diagnostic(code(ips::image_error::publisher_not_found), help("Use pkg6 set-publisher to add it first"))]
    PublisherNotFound(String),

    #[error("No publisher configured as default")]
    #[diagnostic(code(ips::image_error::no_default_publisher))]
    NoDefaultPublisher,

    #[error("Database error: {0}")]
    #[diagnostic(code(ips::image_error::database))]
    Database(String),

    #[error("Legacy pkg5 image config error: {0}")]
    #[diagnostic(code(ips::image_error::legacy_config), help("The image's var/pkg/cfg_cache file is malformed"))]
    LegacyConfig(String),

    #[error("Search error: {0}")]
    #[diagnostic(code(ips::image_error::search))]
    Search(#[from] SearchError),

    #[error("image at {0} is locked by another operation")]
    #[diagnostic(
        code(ips::image_error::locked),
        help("Wait for the other pkg6 invocation against this image to finish and retry")
    )]
    Locked(PathBuf),
}

pub type Result<T> = std::result::Result<T, ImageError>;

/// Table of installed, user-requested "avoid" package stems (`pkg avoid`).
pub const AVOID_TABLE: TableDefinition<&str, ()> = TableDefinition::new("avoid");

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Image {
    path: PathBuf,
    image_type: ImageType,
    props: Vec<ImageProperty>,
    version: i32,
    variants: HashMap<String, String>,
    mediators: HashMap<String, String>,
    pub publishers: Vec<Publisher>,
    pub avoid_set: HashSet<String>,
    pub obsolete_set: HashSet<String>,
    pub linked: LinkedImageMetadata,
}

impl Image {
    pub fn new<P: Into<PathBuf>>(path: P) -> Image {
        Image {
            path: path.into(),
            image_type: ImageType::Full,
            props: vec![],
            version: 1,
            variants: HashMap::new(),
            mediators: HashMap::new(),
            publishers: Vec::new(),
            avoid_set: HashSet::new(),
            obsolete_set: HashSet::new(),
            linked: LinkedImageMetadata::default(),
        }
    }

    fn props_path(path: &Path) -> PathBuf {
        path.join("pkg6.image.json")
    }

    /// Read an existing image's metadata from `path`. Falls back to
    /// parsing a pkg5-era `cfg_cache` INI file (`[image]`/`[variants]`/
    /// `[mediators]` sections) when `pkg6.image.json` isn't present yet,
    /// so an image created by the old tooling and never re-saved by this
    /// one still loads instead of erroring.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Image> {
        let props_path = Self::props_path(path.as_ref());
        if !props_path.exists() {
            if let Some(image) = Self::open_legacy_ini(path.as_ref())? {
                return Ok(image);
            }
        }
        let mut f = File::open(props_path)?;
        let mut image: Image = serde_json::from_reader(&mut f)?;
        image.path = path.as_ref().to_path_buf();
        Ok(image)
    }

    fn legacy_cfg_cache_path(path: &Path) -> PathBuf {
        path.join("var/pkg/cfg_cache")
    }

    /// Parse a pkg5 `cfg_cache` INI file into an [`Image`], migrating
    /// `[image]`'s `version`/`type` and the `[variants]`/`[mediators]`
    /// sections verbatim. Publisher configuration isn't representable in
    /// this reduced migration path; callers are expected to re-run
    /// `pkg6 publisher` afterwards. Returns `Ok(None)` when no legacy
    /// config file exists at all.
    fn open_legacy_ini(path: &Path) -> Result<Option<Image>> {
        let cfg_path = Self::legacy_cfg_cache_path(path);
        if !cfg_path.exists() {
            return Ok(None);
        }
        let cfg = Ini::load_from_file(&cfg_path).map_err(|e| ImageError::LegacyConfig(e.to_string()))?;

        let mut image = Image::new(path);
        if let Some(section) = cfg.section(Some("image")) {
            if let Some(v) = section.get("version").and_then(|v| v.parse::<i32>().ok()) {
                image.version = v;
            }
            if section.get("type") == Some("partial") {
                image.image_type = ImageType::Partial;
            }
        }
        if let Some(section) = cfg.section(Some("variants")) {
            for (k, v) in section.iter() {
                image.variants.insert(k.to_string(), v.to_string());
            }
        }
        if let Some(section) = cfg.section(Some("mediators")) {
            for (k, v) in section.iter() {
                image.mediators.insert(k.to_string(), v.to_string());
            }
        }
        info!(?cfg_path, "migrated image metadata from legacy pkg5 cfg_cache");
        Ok(Some(image))
    }

    /// Alias of [`Image::open`], matching the CLI's vocabulary.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Image> {
        Self::open(path)
    }

    /// Default image path when the caller supplies none: `$PKG_IMAGE` if
    /// set, else `$HOME/.pkg` if it exists, else `/`.
    pub fn default_path() -> PathBuf {
        if let Ok(p) = std::env::var("PKG_IMAGE") {
            if !p.is_empty() {
                return PathBuf::from(p);
            }
        }
        if let Ok(home) = std::env::var("HOME") {
            let home_pkg = PathBuf::from(home).join(".pkg");
            if home_pkg.exists() {
                return home_pkg;
            }
        }
        PathBuf::from("/")
    }

    pub fn open_default<P: AsRef<Path>>(path: P) -> Image {
        Self::open(&path).unwrap_or_else(|_| Image::new(path.as_ref()))
    }

    /// Lay out a brand new image's metadata tree and initialize its
    /// catalog and installed-package databases.
    pub fn create_image<P: Into<PathBuf>>(path: P, image_type: ImageType) -> Result<Image> {
        let path = path.into();
        let mut image = Image::new(&path);
        image.image_type = image_type;

        fs::create_dir_all(&path)?;
        fs::create_dir_all(image.metadata_dir())?;
        fs::create_dir_all(image.catalog_dir())?;

        let catalog = ImageCatalog::new(image.catalog_dir(), image.catalog_db_path(), image.obsoleted_db_path());
        catalog.init_db()?;

        let installed = InstalledPackages::new(image.installed_db_path());
        installed.init_db()?;

        if let Some(parent) = image.avoid_db_path().parent() {
            fs::create_dir_all(parent)?;
        }
        let db = Database::create(image.avoid_db_path()).map_err(|e| ImageError::Database(e.to_string()))?;
        let tx = db.begin_write().map_err(|e| ImageError::Database(e.to_string()))?;
        {
            tx.open_table(AVOID_TABLE).map_err(|e| ImageError::Database(e.to_string()))?;
        }
        tx.commit().map_err(|e| ImageError::Database(e.to_string()))?;

        image.save()?;
        info!(?path, "created image");
        Ok(image)
    }

    /// Persist this image's metadata to `pkg6.image.json` under its path.
    pub fn save(&self) -> Result<()> {
        fs::create_dir_all(&self.path)?;
        let props_path = Self::props_path(&self.path);
        let f = File::create(props_path)?;
        serde_json::to_writer_pretty(f, self)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn image_type(&self) -> ImageType {
        self.image_type
    }

    pub fn metadata_dir(&self) -> PathBuf {
        match self.image_type {
            ImageType::Full => self.path.join("var/pkg"),
            ImageType::Partial => self.path.join(".pkg"),
        }
    }

    pub fn catalog_dir(&self) -> PathBuf {
        self.metadata_dir().join("catalog")
    }

    pub fn catalog_db_path(&self) -> PathBuf {
        self.metadata_dir().join("catalog.redb")
    }

    pub fn obsoleted_db_path(&self) -> PathBuf {
        self.metadata_dir().join("obsoleted.redb")
    }

    /// Alias of [`Image::obsoleted_db_path`]; both spellings show up in the
    /// CLI and tests.
    pub fn obsolete_db_path(&self) -> PathBuf {
        self.obsoleted_db_path()
    }

    pub fn installed_db_path(&self) -> PathBuf {
        self.metadata_dir().join("installed.db")
    }

    /// Alias of [`Image::installed_db_path`], used where the installed
    /// database is referred to as the image's "active" package state.
    pub fn active_db_path(&self) -> PathBuf {
        self.installed_db_path()
    }

    pub fn avoid_db_path(&self) -> PathBuf {
        self.metadata_dir().join("avoid.redb")
    }

    fn lock_path(&self) -> PathBuf {
        self.metadata_dir().join("lock")
    }

    /// Path of the plan executor's rollback journal (see
    /// [`crate::actions::executors::Journal`]). Lives alongside the other
    /// image metadata so a leftover journal from an aborted operation is
    /// found the same way the lock and databases are: by image path.
    pub fn journal_path(&self) -> PathBuf {
        self.metadata_dir().join("journal")
    }

    fn open_lock_file(&self) -> Result<File> {
        fs::create_dir_all(self.metadata_dir())?;
        Ok(fs::OpenOptions::new()
            .create(true)
            .write(true)
            .open(self.lock_path())?)
    }

    /// Acquire the image's exclusive advisory lock, blocking other mutating
    /// operations (install/update/uninstall, linked-image attach/detach,
    /// catalog refresh). Callers should hold the returned guard for the
    /// whole solve+execute sequence and drop it only once the plan has
    /// been fully applied (or abandoned).
    pub fn lock_exclusive(&self) -> Result<ImageLock> {
        let file = self.open_lock_file()?;
        file.try_lock_exclusive()
            .map_err(|_| ImageError::Locked(self.path.clone()))?;
        Ok(ImageLock { _file: file })
    }

    /// Acquire the image's shared advisory lock, for read-only operations
    /// that must not run concurrently with a mutating one.
    pub fn lock_shared(&self) -> Result<ImageLock> {
        let file = self.open_lock_file()?;
        file.try_lock_shared()
            .map_err(|_| ImageError::Locked(self.path.clone()))?;
        Ok(ImageLock { _file: file })
    }

    pub fn search_dir(&self) -> PathBuf {
        self.metadata_dir().join("search")
    }

    fn search_index(&self) -> SearchIndex {
        SearchIndex::new(self.search_dir())
    }

    fn installed_manifests(&self) -> Result<Vec<(Fmri, Manifest)>> {
        let mut out = Vec::new();
        for info in self.query_installed_packages(None)? {
            if let Some(manifest) = self.get_manifest_from_installed(&info.fmri)? {
                out.push((info.fmri, manifest));
            }
        }
        Ok(out)
    }

    /// Build (or rebuild) this image's search index from scratch over every
    /// currently installed package.
    pub fn build_search_index(&self) -> Result<()> {
        let manifests = self.installed_manifests()?;
        self.search_index().build(&manifests)?;
        Ok(())
    }

    /// Run a search query against this image's installed packages, using the
    /// on-disk index when it's present and current and falling back to a
    /// direct manifest scan otherwise (see [`crate::search`]).
    pub fn search(&self, query: &str) -> Result<SearchOutcome> {
        let manifests = self.installed_manifests()?;
        Ok(self.search_index().search(query, &manifests)?)
    }

    pub fn publishers(&self) -> &Vec<Publisher> {
        &self.publishers
    }

    /// Add a publisher, or replace an existing one with the same name. When
    /// `is_default` is set, every other publisher is demoted.
    pub fn add_publisher(
        &mut self,
        name: &str,
        origin: &str,
        mirrors: Vec<String>,
        is_default: bool,
    ) -> Result<()> {
        self.publishers.retain(|p| p.name != name);
        if is_default {
            for p in self.publishers.iter_mut() {
                p.is_default = false;
            }
        }
        self.publishers.push(Publisher::new(name, origin, mirrors, is_default));
        self.save()?;
        Ok(())
    }

    pub fn remove_publisher(&mut self, name: &str) -> Result<()> {
        let before = self.publishers.len();
        self.publishers.retain(|p| p.name != name);
        if self.publishers.len() == before {
            return Err(ImageError::PublisherNotFound(name.to_string()));
        }
        self.save()?;
        Ok(())
    }

    pub fn get_publisher(&self, name: &str) -> Result<Publisher> {
        self.publishers
            .iter()
            .find(|p| p.name == name)
            .cloned()
            .ok_or_else(|| ImageError::PublisherNotFound(name.to_string()))
    }

    pub fn default_publisher(&self) -> Result<Publisher> {
        self.publishers
            .iter()
            .find(|p| p.is_default)
            .cloned()
            .or_else(|| self.publishers.first().cloned())
            .ok_or(ImageError::NoDefaultPublisher)
    }

    fn image_catalog(&self) -> ImageCatalog {
        ImageCatalog::new(self.catalog_dir(), self.catalog_db_path(), self.obsoleted_db_path())
    }

    fn installed_packages(&self) -> InstalledPackages {
        InstalledPackages::new(self.installed_db_path())
    }

    pub fn build_catalog(&self) -> Result<()> {
        let names: Vec<String> = self.publishers.iter().map(|p| p.name.clone()).collect();
        self.image_catalog().build_catalog(&names)?;
        Ok(())
    }

    pub fn query_catalog(&self, pattern: Option<&str>) -> Result<Vec<PackageInfo>> {
        Ok(self.image_catalog().query_packages(pattern)?)
    }

    pub fn get_manifest_from_catalog(&self, fmri: &Fmri) -> Result<Option<Manifest>> {
        Ok(self.image_catalog().get_manifest(fmri)?)
    }

    /// Fetch a manifest straight from a publisher's repository, bypassing
    /// the local catalog. Used by the solver/executor when a manifest body
    /// referenced by the catalog hasn't been cached locally yet.
    pub fn get_manifest_from_repository(&self, fmri: &Fmri) -> Result<Manifest> {
        let publisher = match &fmri.publisher {
            Some(p) => self.get_publisher(p)?,
            None => self.default_publisher()?,
        };
        Ok(crate::transport::fetch_manifest(&publisher, fmri)?)
    }

    /// Download a single publisher's catalog files and (re)build the merged
    /// local catalog database.
    pub fn download_publisher_catalog(&self, name: &str) -> Result<()> {
        let publisher = self.get_publisher(name)?;
        refresh::refresh_publisher_catalog(self, &publisher, false)?;
        self.build_catalog()
    }

    /// Download every configured publisher's catalog files and rebuild the
    /// merged local catalog database.
    pub fn download_catalogs(&self) -> Result<()> {
        for publisher in self.publishers.clone() {
            refresh::refresh_publisher_catalog(self, &publisher, false)?;
        }
        self.build_catalog()
    }

    /// Refresh the named publishers (or all, if `publishers` is empty),
    /// optionally forcing a full (rather than incremental) re-download.
    pub fn refresh_catalogs(&self, publishers: Vec<String>, full: bool) -> Result<()> {
        let targets: Vec<Publisher> = if publishers.is_empty() {
            self.publishers.clone()
        } else {
            publishers
                .iter()
                .map(|name| self.get_publisher(name))
                .collect::<Result<Vec<_>>>()?
        };
        for publisher in targets {
            refresh::refresh_publisher_catalog(self, &publisher, full)?;
        }
        self.build_catalog()
    }

    pub fn install_package(&self, fmri: &Fmri, manifest: &Manifest) -> Result<()> {
        self.installed_packages().add_package(fmri, manifest)?;
        self.index_package_installed(fmri, manifest)?;
        Ok(())
    }

    /// Alias of [`Image::install_package`]; used by code that thinks of the
    /// operation as persisting a manifest rather than installing a package.
    pub fn save_manifest(&self, fmri: &Fmri, manifest: &Manifest) -> Result<()> {
        self.install_package(fmri, manifest)
    }

    pub fn uninstall_package(&self, fmri: &Fmri) -> Result<()> {
        self.installed_packages().remove_package(fmri)?;
        self.index_package_removed(fmri)?;
        Ok(())
    }

    /// Fold a newly installed package into the search index: append it to
    /// the fast-add log, or fall back to a full rebuild once that log grows
    /// past [`MAX_FAST_INDEXED_PKGS`] entries.
    fn index_package_installed(&self, fmri: &Fmri, manifest: &Manifest) -> Result<()> {
        let index = self.search_index();
        if !index.exists() {
            // First package ever installed into a fresh image: a full
            // build is no more expensive than an incremental add and
            // avoids ever searching in degraded mode unnecessarily.
            return self.build_search_index();
        }
        index.add_incremental(fmri, manifest)?;
        if index.pending_fast_add_count()? > MAX_FAST_INDEXED_PKGS {
            self.build_search_index()?;
        }
        Ok(())
    }

    fn index_package_removed(&self, fmri: &Fmri) -> Result<()> {
        let index = self.search_index();
        if !index.exists() {
            return Ok(());
        }
        index.remove_incremental(fmri)?;
        if index.pending_fast_remove_count()? > MAX_FAST_INDEXED_PKGS {
            self.build_search_index()?;
        }
        Ok(())
    }

    pub fn is_package_installed(&self, fmri: &Fmri) -> Result<bool> {
        Ok(self.installed_packages().is_installed(fmri)?)
    }

    pub fn query_installed_packages(&self, pattern: Option<&str>) -> Result<Vec<InstalledPackageInfo>> {
        Ok(self.installed_packages().query_packages(pattern)?)
    }

    pub fn get_manifest_from_installed(&self, fmri: &Fmri) -> Result<Option<Manifest>> {
        Ok(self.installed_packages().get_manifest(fmri)?)
    }

    /// Look up a package stem in the parent image's installed-package set,
    /// used by the solver's `parent` dependency check. Returns `Ok(None)`
    /// when this image has no parent.
    pub fn parent_installed_version(&self, stem: &str) -> Result<Option<Fmri>> {
        let parent_path = match &self.linked.parent_path {
            Some(p) => p,
            None => return Ok(None),
        };
        let parent = Image::open(parent_path)?;
        let packages = parent.query_installed_packages(Some(stem))?;
        Ok(packages
            .into_iter()
            .find(|p| p.fmri.stem() == stem)
            .map(|p| p.fmri))
    }
}
