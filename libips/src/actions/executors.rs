use std::fs::{self, File as FsFile};
use std::io::{self, Write};
use std::os::unix::fs as unix_fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::actions::{Group as GroupAction, User as UserAction};
use crate::actions::{Link as LinkAction, Manifest, ManifestDelta};
use crate::actions::{Dir as DirAction, File as FileAction};

#[derive(Error, Debug, Diagnostic)]
pub enum InstallerError {
    #[error("I/O error while operating on {path}")]
    #[diagnostic(code(ips::installer_error::io))]
    Io {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    #[error("Absolute paths are forbidden in actions: {path}")]
    #[diagnostic(code(ips::installer_error::absolute_path_forbidden), help("Provide paths relative to the image root"))]
    AbsolutePathForbidden { path: String },

    #[error("Path escapes image root via traversal: {rel}")]
    #[diagnostic(code(ips::installer_error::path_outside_image), help("Remove '..' components that escape the image root"))]
    PathTraversalOutsideImage { rel: String },

    #[error("Unsupported or not yet implemented action: {action} ({reason})")]
    #[diagnostic(code(ips::installer_error::unsupported_action))]
    UnsupportedAction { action: &'static str, reason: String },

    #[error("rollback journal error: {0}")]
    #[diagnostic(code(ips::installer_error::journal))]
    Journal(String),
}

fn parse_mode(mode: &str, default: u32) -> u32 {
    if mode.is_empty() || mode.eq("0") {
        return default;
    }
    // Accept strings like "0755" or "755"
    let trimmed = mode.trim_start_matches('0');
    u32::from_str_radix(if trimmed.is_empty() { "0" } else { trimmed }, 8).unwrap_or(default)
}

/// Join a manifest-provided path (must be relative) under image_root.
/// - Rejects absolute paths
/// - Rejects traversal that would escape the image root
pub fn safe_join(image_root: &Path, rel: &str) -> Result<PathBuf, InstallerError> {
    if rel.is_empty() {
        return Ok(image_root.to_path_buf());
    }
    let rel_path = Path::new(rel);
    if rel_path.is_absolute() {
        return Err(InstallerError::AbsolutePathForbidden {
            path: rel.to_string(),
        });
    }

    let mut stack: Vec<PathBuf> = Vec::new();
    for c in rel_path.components() {
        match c {
            Component::CurDir => {}
            Component::Normal(seg) => stack.push(PathBuf::from(seg)),
            Component::ParentDir => {
                if stack.pop().is_none() {
                    return Err(InstallerError::PathTraversalOutsideImage {
                        rel: rel.to_string(),
                    });
                }
            }
            // Prefixes shouldn't appear on Unix; treat conservatively
            Component::Prefix(_) | Component::RootDir => {
                return Err(InstallerError::AbsolutePathForbidden {
                    path: rel.to_string(),
                })
            }
        }
    }

    let mut out = PathBuf::from(image_root);
    for seg in stack {
        out.push(seg);
    }
    Ok(out)
}

/// Install ordering within a single plan step, re-exported from the action
/// model's `ActionKind::ordinality`. Directories before files before links
/// before drivers, consistently with the fixed action precedence the
/// packaging client enforces.
pub use crate::actions::ActionKind as ActionOrder;

/// Fetches payload content for a file/hardlink action by its content hash.
/// Plugged in by callers that have a publisher/transport context available;
/// when absent, files are written with empty content (useful for dry runs
/// and tests that don't care about payload bytes).
pub type ContentFetcher<'a> = dyn Fn(&str) -> Result<Vec<u8>, InstallerError> + 'a;

/// One completed step of the executor's rollback journal: the action kind
/// and key-attr-value it applied or removed on disk. Recorded as each
/// action completes so a plan aborted mid-execution leaves behind exactly
/// enough information for the next invocation to finish or reverse it,
/// rather than rediscovering what happened from filesystem state alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JournalStep {
    Applied { kind: String, key: String },
    Removed { kind: String, key: String },
}

/// Append-only log of [`JournalStep`]s, one JSON object per line, written
/// under the image's metadata directory. Unlike the catalog writer's
/// write-to-temp-then-rename (whole-file replace), the journal is
/// append-per-step: a plan can be aborted between actions, so the file
/// must always reflect exactly what has happened on disk so far, never a
/// batch that might itself be interrupted.
#[derive(Clone)]
pub struct Journal {
    path: PathBuf,
}

impl Journal {
    pub fn at(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn record(&self, step: JournalStep) -> Result<(), InstallerError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| InstallerError::Io { source: e, path: parent.to_path_buf() })?;
        }
        let mut line = serde_json::to_string(&step).map_err(|e| InstallerError::Journal(e.to_string()))?;
        line.push('\n');
        let mut f = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| InstallerError::Io { source: e, path: self.path.clone() })?;
        f.write_all(line.as_bytes())
            .map_err(|e| InstallerError::Io { source: e, path: self.path.clone() })?;
        f.sync_data().map_err(|e| InstallerError::Io { source: e, path: self.path.clone() })
    }

    /// Read back every step recorded so far, in the order they were applied.
    pub fn read(path: &Path) -> Result<Vec<JournalStep>, InstallerError> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(path).map_err(|e| InstallerError::Io { source: e, path: path.to_path_buf() })?;
        content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).map_err(|e| InstallerError::Journal(e.to_string())))
            .collect()
    }

    /// Drop the journal file. Called once a plan has fully applied (or
    /// been fully reconciled by [`reconcile_stale_journal`]) — there is
    /// nothing left to resume.
    pub fn clear(path: &Path) -> Result<(), InstallerError> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(InstallerError::Io { source: e, path: path.to_path_buf() }),
        }
    }
}

/// Recover from a journal left behind by a plan that was aborted between
/// actions (distilled spec §5: "leaving a rollback journal that the next
/// invocation uses to finish or reverse"). The original plan itself isn't
/// preserved, so finishing it isn't possible; instead this reverses the
/// `Applied` steps (deleting what a partial install wrote, since the
/// installed-packages database was never updated for an aborted plan, so
/// nothing else references that content) and leaves `Removed` steps as a
/// logged warning, since their content can't be reconstructed from the
/// journal and a subsequent uninstall/update would target the same paths
/// again regardless. Returns the steps it found, for the caller to report.
pub fn reconcile_stale_journal(image_root: &Path, journal_path: &Path) -> Result<Vec<JournalStep>, InstallerError> {
    let steps = Journal::read(journal_path)?;
    if steps.is_empty() {
        return Ok(steps);
    }
    warn!(count = steps.len(), ?journal_path, "found rollback journal from an aborted operation, reconciling");
    let opts = ApplyOptions::default();
    for step in steps.iter().rev() {
        match step {
            JournalStep::Applied { kind, key } => {
                if kind == "dir" {
                    remove_dir_if_empty(image_root, key, &opts)?;
                } else {
                    remove_path(image_root, key, &opts)?;
                }
            }
            JournalStep::Removed { kind, key } => {
                warn!(kind, key, "journal recorded a removal that can't be un-done automatically");
            }
        }
    }
    Journal::clear(journal_path)?;
    Ok(steps)
}

#[derive(Default, Clone, Copy, Debug, PartialEq, Eq)]
pub enum InstallPhase {
    #[default]
    PreInstall,
    Install,
    PostInstall,
}

impl std::fmt::Display for InstallPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            InstallPhase::PreInstall => "preinstall",
            InstallPhase::Install => "install",
            InstallPhase::PostInstall => "postinstall",
        })
    }
}

/// A suspension point the caller is notified at (distilled spec §5:
/// "every filesystem write of an action, every progress callback" is a
/// suspension point). `current`/`total` count actions applied within the
/// phase, not bytes.
#[derive(Clone, Copy, Debug)]
pub enum ProgressEvent {
    StartingPhase { phase: InstallPhase, total: usize },
    Progress {
        phase: InstallPhase,
        current: usize,
        total: usize,
    },
    FinishedPhase { phase: InstallPhase, total: usize },
}

pub type ProgressCallback = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

#[derive(Default)]
pub struct ApplyOptions<'a> {
    pub dry_run: bool,
    pub content_fetcher: Option<&'a ContentFetcher<'a>>,
    pub progress: Option<ProgressCallback>,
    /// Report a `Progress` event every this-many actions within a phase
    /// (in addition to the `StartingPhase`/`FinishedPhase` events, which
    /// always fire). `0` means "only start/finish events".
    pub progress_interval: usize,
    /// When set, every completed filesystem action is recorded here so an
    /// abort mid-plan can be finished or reversed on the next invocation.
    /// Not consulted in `dry_run` mode, since nothing actually happens.
    pub journal: Option<Journal>,
}

impl std::fmt::Debug for ApplyOptions<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApplyOptions")
            .field("dry_run", &self.dry_run)
            .field("content_fetcher", &self.content_fetcher.is_some())
            .field("progress", &self.progress.is_some())
            .field("progress_interval", &self.progress_interval)
            .field("journal", &self.journal.is_some())
            .finish()
    }
}

fn report(opts: &ApplyOptions, event: ProgressEvent) {
    if let Some(cb) = &opts.progress {
        cb(event);
    }
}

/// Apply a manifest to the filesystem rooted at image_root.
///
/// Runs in three phases mirroring the action model's ordinality:
/// pre-install (attrs, dependencies, groups, users — bookkeeping, no
/// filesystem writes), install (dirs, files, hardlinks, links, drivers —
/// the actual filesystem mutation), and post-install (license, legacy,
/// signature — verification and record-keeping). Within `install`,
/// directories land before files before hardlinks before symlinks so a
/// hardlink's target always exists by the time it's created.
pub fn apply_manifest(image_root: &Path, manifest: &Manifest, opts: &ApplyOptions) -> Result<(), InstallerError> {
    apply_phase(image_root, manifest, opts, InstallPhase::PreInstall)?;
    apply_phase(image_root, manifest, opts, InstallPhase::Install)?;
    apply_phase(image_root, manifest, opts, InstallPhase::PostInstall)?;
    Ok(())
}

/// Remove a manifest's filesystem footprint from `image_root`, used by
/// uninstall. Runs in the reverse of `apply_manifest`'s install order
/// (links/hardlinks/files before directories, so a directory empties out
/// before its own removal is attempted) and tolerates paths that are
/// already gone.
pub fn remove_manifest(image_root: &Path, manifest: &Manifest, opts: &ApplyOptions) -> Result<(), InstallerError> {
    let total = manifest.links.len()
        + manifest.hardlinks.len()
        + manifest.files.len()
        + manifest.directories.len();
    report(opts, ProgressEvent::StartingPhase { phase: InstallPhase::Install, total });
    let mut done = 0usize;
    let mut tick = |done: usize| {
        if opts.progress_interval > 0 && done % opts.progress_interval == 0 {
            report(opts, ProgressEvent::Progress { phase: InstallPhase::Install, current: done, total });
        }
    };
    for l in &manifest.links {
        remove_path(image_root, &l.path, opts)?;
        journal_step(opts, JournalStep::Removed { kind: "link".into(), key: l.path.clone() })?;
        done += 1;
        tick(done);
    }
    for h in &manifest.hardlinks {
        remove_path(image_root, &h.path, opts)?;
        journal_step(opts, JournalStep::Removed { kind: "hardlink".into(), key: h.path.clone() })?;
        done += 1;
        tick(done);
    }
    for f in &manifest.files {
        remove_path(image_root, &f.path, opts)?;
        journal_step(opts, JournalStep::Removed { kind: "file".into(), key: f.path.clone() })?;
        done += 1;
        tick(done);
    }
    for d in &manifest.directories {
        remove_dir_if_empty(image_root, &d.path, opts)?;
        journal_step(opts, JournalStep::Removed { kind: "dir".into(), key: d.path.clone() })?;
        done += 1;
        tick(done);
    }
    report(opts, ProgressEvent::FinishedPhase { phase: InstallPhase::Install, total });
    Ok(())
}

fn journal_step(opts: &ApplyOptions, step: JournalStep) -> Result<(), InstallerError> {
    if opts.dry_run {
        return Ok(());
    }
    match &opts.journal {
        Some(j) => j.record(step),
        None => Ok(()),
    }
}

/// Apply a [`ManifestDelta`] to `image_root`: removes everything that's
/// gone or superseded (`delta.removed` plus the old side of `delta.changed`)
/// before writing out everything that's new or replacing it (`delta.added`
/// plus the new side of `delta.changed`), so a changed file's old content
/// never lingers alongside its replacement.
pub fn apply_manifest_delta(
    image_root: &Path,
    delta: &ManifestDelta,
    opts: &ApplyOptions,
) -> Result<(), InstallerError> {
    let mut gone = Manifest::new();
    gone.directories = delta.directories.removed.clone();
    gone.files = delta.files.removed.clone();
    gone.links = delta.links.removed.clone();
    gone.hardlinks = delta.hardlinks.removed.clone();
    gone.files.extend(delta.files.changed.iter().map(|(old, _)| old.clone()));
    gone.links.extend(delta.links.changed.iter().map(|(old, _)| old.clone()));
    gone.hardlinks.extend(delta.hardlinks.changed.iter().map(|(old, _)| old.clone()));
    remove_manifest(image_root, &gone, opts)?;

    let mut fresh = Manifest::new();
    fresh.directories = delta.directories.added.clone();
    fresh.directories.extend(delta.directories.changed.iter().map(|(_, new)| new.clone()));
    fresh.files = delta.files.added.clone();
    fresh.files.extend(delta.files.changed.iter().map(|(_, new)| new.clone()));
    fresh.links = delta.links.added.clone();
    fresh.links.extend(delta.links.changed.iter().map(|(_, new)| new.clone()));
    fresh.hardlinks = delta.hardlinks.added.clone();
    fresh.hardlinks.extend(delta.hardlinks.changed.iter().map(|(_, new)| new.clone()));
    fresh.users = delta.users.added.clone();
    fresh.users.extend(delta.users.changed.iter().map(|(_, new)| new.clone()));
    fresh.groups = delta.groups.added.clone();
    fresh.groups.extend(delta.groups.changed.iter().map(|(_, new)| new.clone()));
    fresh.drivers = delta.drivers.added.clone();
    fresh.drivers.extend(delta.drivers.changed.iter().map(|(_, new)| new.clone()));
    fresh.licenses = delta.licenses.added.clone();
    fresh.licenses.extend(delta.licenses.changed.iter().map(|(_, new)| new.clone()));
    fresh.legacies = delta.legacies.added.clone();
    fresh.legacies.extend(delta.legacies.changed.iter().map(|(_, new)| new.clone()));
    fresh.signatures = delta.signatures.added.clone();
    fresh.signatures.extend(delta.signatures.changed.iter().map(|(_, new)| new.clone()));
    apply_manifest(image_root, &fresh, opts)
}

fn remove_path(image_root: &Path, rel: &str, opts: &ApplyOptions) -> Result<(), InstallerError> {
    let full = safe_join(image_root, rel)?;
    info!(?full, "removing path");
    if opts.dry_run {
        return Ok(());
    }
    match fs::remove_file(&full) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(InstallerError::Io { source: e, path: full }),
    }
}

/// Removes `rel` only if it's an empty directory; a directory still
/// holding entries (another installed package's files, or unpackaged
/// content a user dropped in) is left alone.
/// Removes `rel` only if it's an empty directory. A directory that still
/// holds entries is salvaged rather than left in place or deleted outright:
/// its content might be another installed package's files (legitimately
/// left alone) or content a user dropped in unpackaged (which would
/// otherwise vanish silently once nothing references the directory
/// anymore), so it's moved aside into the image's `lost+found` the way the
/// teacher's directory-removal salvage does.
fn remove_dir_if_empty(image_root: &Path, rel: &str, opts: &ApplyOptions) -> Result<(), InstallerError> {
    let full = safe_join(image_root, rel)?;
    if opts.dry_run {
        return Ok(());
    }
    if !full.exists() {
        return Ok(());
    }
    let is_empty = fs::read_dir(&full).map(|mut it| it.next().is_none()).unwrap_or(false);
    if !is_empty {
        return salvage(image_root, rel, &full);
    }
    fs::remove_dir(&full).map_err(|e| InstallerError::Io { source: e, path: full })
}

/// Moves `full` (a non-empty directory slated for removal) into
/// `<image_root>/var/pkg/lost+found/<rel>-<pid>`, preserving its content
/// instead of leaving it orphaned under a path no manifest references
/// anymore. The pid suffix keeps repeated salvages of the same path from
/// colliding within one run.
fn salvage(image_root: &Path, rel: &str, full: &Path) -> Result<(), InstallerError> {
    let lost_found = image_root.join("var/pkg/lost+found");
    fs::create_dir_all(&lost_found).map_err(|e| InstallerError::Io { source: e, path: lost_found.clone() })?;
    let flat_name = rel.trim_start_matches('/').replace('/', "-");
    let dest = lost_found.join(format!("{}-{}", flat_name, std::process::id()));
    warn!(?full, ?dest, "directory not empty, salvaging its content instead of removing it");
    fs::rename(full, &dest).map_err(|e| InstallerError::Io { source: e, path: dest })
}

fn phase_size(manifest: &Manifest, phase: InstallPhase) -> usize {
    match phase {
        InstallPhase::PreInstall => manifest.groups.len() + manifest.users.len(),
        InstallPhase::Install => {
            manifest.directories.len()
                + manifest.files.len()
                + manifest.hardlinks.len()
                + manifest.links.len()
                + manifest.drivers.len()
        }
        InstallPhase::PostInstall => {
            manifest.licenses.len() + manifest.legacies.len() + manifest.signatures.len()
        }
    }
}

fn apply_phase(
    image_root: &Path,
    manifest: &Manifest,
    opts: &ApplyOptions,
    phase: InstallPhase,
) -> Result<(), InstallerError> {
    let total = phase_size(manifest, phase);
    report(opts, ProgressEvent::StartingPhase { phase, total });
    let mut done = 0usize;
    let mut tick = |done: usize| {
        if opts.progress_interval > 0 && done % opts.progress_interval == 0 {
            report(opts, ProgressEvent::Progress { phase, current: done, total });
        }
    };
    match phase {
        InstallPhase::PreInstall => {
            for g in &manifest.groups {
                apply_group(g);
                done += 1;
                tick(done);
            }
            for u in &manifest.users {
                apply_user(u);
                done += 1;
                tick(done);
            }
        }
        InstallPhase::Install => {
            for d in &manifest.directories {
                apply_dir(image_root, d, opts)?;
                journal_step(opts, JournalStep::Applied { kind: "dir".into(), key: d.path.clone() })?;
                done += 1;
                tick(done);
            }
            for f in &manifest.files {
                apply_file(image_root, f, opts)?;
                journal_step(opts, JournalStep::Applied { kind: "file".into(), key: f.path.clone() })?;
                done += 1;
                tick(done);
            }
            for h in &manifest.hardlinks {
                apply_hardlink(image_root, h, opts)?;
                journal_step(opts, JournalStep::Applied { kind: "hardlink".into(), key: h.path.clone() })?;
                done += 1;
                tick(done);
            }
            for l in &manifest.links {
                apply_link(image_root, l, opts)?;
                journal_step(opts, JournalStep::Applied { kind: "link".into(), key: l.path.clone() })?;
                done += 1;
                tick(done);
            }
            for drv in &manifest.drivers {
                debug!(driver = %drv.name, "driver action recorded (device node setup not performed by this executor)");
                done += 1;
                tick(done);
            }
        }
        InstallPhase::PostInstall => {
            for lic in &manifest.licenses {
                debug!(license = ?lic.payload, "license action recorded");
                done += 1;
                tick(done);
            }
            for leg in &manifest.legacies {
                debug!(pkgname = %leg.pkg, "legacy action recorded");
                done += 1;
                tick(done);
            }
            for sig in &manifest.signatures {
                debug!(algorithm = %sig.algorithm, "signature action recorded (verification not performed by this executor)");
                done += 1;
                tick(done);
            }
        }
    }
    report(opts, ProgressEvent::FinishedPhase { phase, total });
    Ok(())
}

/// User/group actions don't map to OS-level accounts on the executing host;
/// this just logs the declaration so `apply_manifest` accounts for every
/// action kind ordinality defines rather than silently skipping it.
fn apply_group(g: &GroupAction) {
    info!(groupname = %g.groupname, gid = %g.gid, "group action recorded");
}

fn apply_user(u: &UserAction) {
    info!(username = %u.username, uid = %u.uid, "user action recorded");
}

fn apply_dir(image_root: &Path, d: &DirAction, opts: &ApplyOptions) -> Result<(), InstallerError> {
    let full = safe_join(image_root, &d.path)?;
    info!(?full, "creating directory");
    if opts.dry_run {
        return Ok(());
    }

    if !full.exists() && !d.salvage_from.is_empty() {
        let old = safe_join(image_root, &d.salvage_from)?;
        if old.exists() {
            if let Some(parent) = full.parent() {
                fs::create_dir_all(parent).map_err(|e| InstallerError::Io { source: e, path: parent.to_path_buf() })?;
            }
            info!(?old, ?full, "salvaging directory content from its former path");
            fs::rename(&old, &full).map_err(|e| InstallerError::Io { source: e, path: full.clone() })?;
        }
    }

    fs::create_dir_all(&full).map_err(|e| InstallerError::Io {
        source: e,
        path: full.clone(),
    })?;

    // Set permissions if provided
    let mode = parse_mode(&d.mode, 0o755);
    let perm = fs::Permissions::from_mode(mode);
    fs::set_permissions(&full, perm).map_err(|e| InstallerError::Io {
        source: e,
        path: full.clone(),
    })?;

    Ok(())
}

fn ensure_parent(image_root: &Path, p: &str, opts: &ApplyOptions) -> Result<(), InstallerError> {
    let full = safe_join(image_root, p)?;
    if let Some(parent) = full.parent() {
        if opts.dry_run {
            return Ok(());
        }
        fs::create_dir_all(parent).map_err(|e| InstallerError::Io {
            source: e,
            path: parent.to_path_buf(),
        })?;
    }
    Ok(())
}

fn apply_file(image_root: &Path, f: &FileAction, opts: &ApplyOptions) -> Result<(), InstallerError> {
    let full = safe_join(image_root, &f.path)?;

    // Ensure parent exists (directories should already be applied, but be robust)
    ensure_parent(image_root, &f.path, opts)?;

    info!(?full, "creating file");
    if opts.dry_run {
        return Ok(());
    }

    let content = fetch_payload(f.payload.as_ref(), opts)?;

    let mut file = FsFile::create(&full).map_err(|e| InstallerError::Io {
        source: e,
        path: full.clone(),
    })?;
    file.write_all(&content).map_err(|e| InstallerError::Io {
        source: e,
        path: full.clone(),
    })?;

    // Set permissions if provided
    let mode = parse_mode(&f.mode, 0o644);
    let perm = fs::Permissions::from_mode(mode);
    fs::set_permissions(&full, perm).map_err(|e| InstallerError::Io {
        source: e,
        path: full.clone(),
    })?;

    Ok(())
}

/// Resolve a file action's payload to real bytes via the configured content
/// fetcher, keyed by the primary content hash. No fetcher or no payload both
/// fall back to empty content, which is correct for zero-length files and
/// the only option available in dry runs and contexts with no transport.
fn fetch_payload(
    payload: Option<&crate::actions::Payload>,
    opts: &ApplyOptions,
) -> Result<Vec<u8>, InstallerError> {
    let Some(payload) = payload else {
        return Ok(Vec::new());
    };
    let hash = &payload.primary_identifier.hash;
    if hash.is_empty() {
        return Ok(Vec::new());
    }
    match opts.content_fetcher {
        Some(fetcher) => fetcher(hash),
        None => {
            warn!(%hash, "no content fetcher configured, writing empty content for file with a payload");
            Ok(Vec::new())
        }
    }
}

/// Creates a hard link. `hardlink` actions are parsed as a distinct
/// `ActionKind` from `link`, so unlike the old combined path this is always
/// reached for a genuinely-declared `hardlink path=... target=...` action.
fn apply_hardlink(image_root: &Path, l: &LinkAction, opts: &ApplyOptions) -> Result<(), InstallerError> {
    let link_path = safe_join(image_root, &l.path)?;
    if opts.dry_run {
        return Ok(());
    }
    let target_full = safe_join(image_root, &l.target)?;
    fs::hard_link(&target_full, &link_path).map_err(|e| InstallerError::Io {
        source: e,
        path: link_path.clone(),
    })?;
    Ok(())
}

fn apply_link(image_root: &Path, l: &LinkAction, opts: &ApplyOptions) -> Result<(), InstallerError> {
    let link_path = safe_join(image_root, &l.path)?;

    if opts.dry_run {
        return Ok(());
    }

    // Symlink: require non-absolute target to avoid embedding full host paths
    if Path::new(&l.target).is_absolute() {
        return Err(InstallerError::AbsolutePathForbidden { path: l.target.clone() });
    }
    // Create relative symlink as provided (do not convert to absolute to avoid embedding full paths)
    #[cfg(target_family = "unix")]
    {
        unix_fs::symlink(&l.target, &link_path).map_err(|e| InstallerError::Io {
            source: e,
            path: link_path.clone(),
        })?;
    }
    #[cfg(not(target_family = "unix"))]
    {
        return Err(InstallerError::UnsupportedAction {
            action: "link",
            reason: "symlink not supported on this platform".to_string(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_join_rejects_absolute() {
        let root = Path::new("/tmp/image");
        let err = safe_join(root, "/etc/passwd").unwrap_err();
        match err {
            InstallerError::AbsolutePathForbidden { .. } => {}
            _ => panic!("expected AbsolutePathForbidden"),
        }
    }

    #[test]
    fn safe_join_rejects_escape() {
        let root = Path::new("/tmp/image");
        let err = safe_join(root, "../../etc").unwrap_err();
        match err {
            InstallerError::PathTraversalOutsideImage { .. } => {}
            _ => panic!("expected PathTraversalOutsideImage"),
        }
    }

    #[test]
    fn safe_join_ok() {
        let root = Path::new("/tmp/image");
        let p = safe_join(root, "etc/pkg").unwrap();
        assert!(p.starts_with(root));
        assert!(p.ends_with("pkg"));
    }

    #[test]
    fn apply_manifest_reports_start_and_finish_for_empty_phases() {
        use std::sync::Mutex;

        let events: Arc<Mutex<Vec<ProgressEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let events_cb = events.clone();
        let opts = ApplyOptions {
            dry_run: true,
            progress: Some(Arc::new(move |evt| events_cb.lock().unwrap().push(evt))),
            progress_interval: 1,
            ..Default::default()
        };

        let manifest = Manifest::new();
        let root = Path::new("/tmp/ips_executor_progress_test_root");
        apply_manifest(root, &manifest, &opts).unwrap();

        let recorded = events.lock().unwrap();
        // Three phases, each empty: only Starting/Finished fire, no Progress ticks.
        assert_eq!(recorded.len(), 6);
        assert!(matches!(recorded[0], ProgressEvent::StartingPhase { phase: InstallPhase::PreInstall, total: 0 }));
        assert!(matches!(recorded[1], ProgressEvent::FinishedPhase { phase: InstallPhase::PreInstall, total: 0 }));
    }

    #[test]
    fn journal_records_applied_steps_and_clears_on_success() {
        let tmp = tempfile::tempdir().unwrap();
        let journal_path = tmp.path().join("var/pkg/journal");
        let mut manifest = Manifest::new();
        manifest.directories.push(DirAction {
            path: "opt/app".to_string(),
            ..Default::default()
        });
        manifest.files.push(FileAction {
            path: "opt/app/readme.txt".to_string(),
            ..Default::default()
        });

        let opts = ApplyOptions {
            journal: Some(Journal::at(journal_path.clone())),
            ..Default::default()
        };
        apply_manifest(tmp.path(), &manifest, &opts).unwrap();

        let steps = Journal::read(&journal_path).unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0], JournalStep::Applied { kind: "dir".into(), key: "opt/app".into() });
        assert_eq!(steps[1], JournalStep::Applied { kind: "file".into(), key: "opt/app/readme.txt".into() });

        Journal::clear(&journal_path).unwrap();
        assert!(Journal::read(&journal_path).unwrap().is_empty());
    }

    #[test]
    fn reconcile_stale_journal_removes_partially_applied_content() {
        let tmp = tempfile::tempdir().unwrap();
        let journal_path = tmp.path().join("var/pkg/journal");
        let journal = Journal::at(journal_path.clone());

        fs::create_dir_all(tmp.path().join("opt/app")).unwrap();
        fs::write(tmp.path().join("opt/app/readme.txt"), b"hello").unwrap();
        journal.record(JournalStep::Applied { kind: "dir".into(), key: "opt/app".into() }).unwrap();
        journal.record(JournalStep::Applied { kind: "file".into(), key: "opt/app/readme.txt".into() }).unwrap();

        let steps = reconcile_stale_journal(tmp.path(), &journal_path).unwrap();
        assert_eq!(steps.len(), 2);
        assert!(!tmp.path().join("opt/app/readme.txt").exists());
        assert!(!tmp.path().join("opt/app").exists());
        assert!(!journal_path.exists());
    }

    #[test]
    fn remove_dir_if_empty_salvages_nonempty_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("etc/app.conf.d");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("user-added.conf"), b"local edits").unwrap();

        let opts = ApplyOptions::default();
        remove_dir_if_empty(tmp.path(), "etc/app.conf.d", &opts).unwrap();

        assert!(!dir.exists());
        let lost_found = tmp.path().join("var/pkg/lost+found");
        let salvaged: Vec<_> = fs::read_dir(&lost_found).unwrap().collect();
        assert_eq!(salvaged.len(), 1);
        let salvaged_dir = salvaged.into_iter().next().unwrap().unwrap().path();
        assert!(salvaged_dir.join("user-added.conf").exists());
    }

    #[test]
    fn apply_dir_salvages_content_from_salvage_from_path() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("old/path")).unwrap();
        fs::write(tmp.path().join("old/path/data.txt"), b"keep me").unwrap();

        let d = DirAction {
            path: "new/path".to_string(),
            salvage_from: "old/path".to_string(),
            ..Default::default()
        };
        let opts = ApplyOptions::default();
        apply_dir(tmp.path(), &d, &opts).unwrap();

        assert!(tmp.path().join("new/path/data.txt").exists());
        assert!(!tmp.path().join("old/path").exists());
    }
}
