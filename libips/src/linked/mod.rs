//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

//! Linked-image controller.
//!
//! A linked image is an image whose package set is partly governed by a
//! parent image: a global zone and its non-global zones, for instance.
//! `kind` is purely a naming facet (`system:` vs `zone:`, per
//! [`LinkedImageName`]'s `"{kind}:{name}"` form) and never changes which
//! invariants apply — every child, regardless of kind, is held to the same
//! two sync invariants:
//!
//! - **Parent-sync**: for each package installed in the child that carries
//!   a `depend type=parent` action, the parent must have the dependency's
//!   target installed at a version that satisfies it (exact match when the
//!   target is the package's own stem, otherwise any successor release).
//!   This mirrors [`crate::solver`]'s `check_parent_dependencies`, which
//!   enforces the same rule at plan time.
//! - **Publisher-sync**: every publisher the parent has configured with
//!   `sticky = true` must either be absent from the child, or present with
//!   the same origin and mirrors. Non-sticky publishers are never
//!   constrained.
//!
//! This module manages the linkage metadata, these invariant checks, and
//! resyncing a child's parent-tracking packages; it does not itself decide
//! what to install beyond that (see [`crate::solver`] for the `parent`
//! dependency type, and [`crate::actions::executors`] for applying a plan).

use crate::fmri::{ConstraintKind, Fmri};
use crate::image::{Image, LinkedChildRef, LinkedImageMetadata};
use crate::solver::{self, Operation, UpdateTarget};
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum LinkedImageKind {
    System,
    Zone,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct LinkedImageName {
    pub kind: LinkedImageKind,
    pub name: String,
}

impl LinkedImageName {
    pub fn new(kind: LinkedImageKind, name: impl Into<String>) -> Self {
        LinkedImageName { kind, name: name.into() }
    }
}

impl std::fmt::Display for LinkedImageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefix = match self.kind {
            LinkedImageKind::System => "system",
            LinkedImageKind::Zone => "zone",
        };
        write!(f, "{}:{}", prefix, self.name)
    }
}

#[derive(Debug, Error, Diagnostic)]
pub enum LinkedImageError {
    #[error("malformed linked image name: {0}")]
    #[diagnostic(code(ips::linked_error::malformed))]
    LinMalformed(String),

    #[error("linked image command failed: {0}")]
    #[diagnostic(code(ips::linked_error::cmd_failed))]
    CmdFailed(String),

    #[error("linked image publisher mismatch: {0}")]
    #[diagnostic(code(ips::linked_error::publisher_mismatch))]
    LinkedPubError(String),

    #[error("{} linked image error(s) occurred", .0.len())]
    #[diagnostic(code(ips::linked_error::bundle))]
    LixBundle(Vec<LinkedImageError>),

    #[error("image error: {0}")]
    #[diagnostic(transparent)]
    Image(#[from] crate::image::ImageError),

    #[error("linking would create a cycle: {0}")]
    #[diagnostic(code(ips::linked_error::cycle))]
    Cycle(String),
}

pub type Result<T> = std::result::Result<T, LinkedImageError>;

/// A single parent-sync violation: a package installed in the child whose
/// `depend type=parent` target is missing or at the wrong version in the
/// parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutOfSyncPackage {
    pub child_pkg: String,
    pub parent_target_stem: String,
    pub required_version: String,
    pub found_version: Option<String>,
}

/// Options accepted by [`attach_child`] / [`attach_parent`].
#[derive(Debug, Clone)]
pub struct AttachOptions {
    /// Record the linkage metadata only; skip the post-attach package sync.
    pub md_only: bool,
    /// Refresh the child's catalogs before syncing packages into it.
    pub refresh_catalogs: bool,
    /// Package stems to force-drop from the child even if the parent has
    /// them and a naive sync would otherwise pull them in.
    pub reject_list: Vec<String>,
}

impl Default for AttachOptions {
    fn default() -> Self {
        AttachOptions {
            md_only: false,
            refresh_catalogs: true,
            reject_list: Vec::new(),
        }
    }
}

fn would_cycle(parent: &Image, child_path: &Path) -> bool {
    let mut cur = parent.linked.parent_path.clone();
    while let Some(p) = cur {
        if p == child_path {
            return true;
        }
        cur = Image::open(&p).ok().and_then(|i| i.linked.parent_path);
    }
    false
}

/// Record `child` as linked under `parent`, and `parent` as the child's
/// parent. Rejects a link that would introduce a cycle in the parent
/// chain. Unless `options.md_only` is set, immediately syncs the child's
/// parent-tracking packages (see [`sync`]).
pub fn attach_child(
    parent: &mut Image,
    child: &mut Image,
    name: LinkedImageName,
    options: &AttachOptions,
) -> Result<Vec<Fmri>> {
    if name.name.is_empty() {
        return Err(LinkedImageError::LinMalformed(name.to_string()));
    }
    if would_cycle(parent, child.path()) || child.path() == parent.path() {
        return Err(LinkedImageError::Cycle(name.to_string()));
    }

    parent.linked.children.push(LinkedChildRef {
        name: name.name.clone(),
        path: child.path().to_path_buf(),
    });
    parent.save()?;

    child.linked.parent_path = Some(parent.path().to_path_buf());
    child.linked.name = Some(name.name);
    child.save()?;

    if options.md_only {
        return Ok(Vec::new());
    }
    if options.refresh_catalogs {
        let _ = child.refresh_catalogs(Vec::new(), false);
    }
    sync(parent, child, &options.reject_list)
}

pub fn attach_parent(child: &mut Image, parent_path: PathBuf) -> Result<()> {
    let parent = Image::open(&parent_path)?;
    if would_cycle(&parent, child.path()) {
        return Err(LinkedImageError::Cycle(parent_path.display().to_string()));
    }
    child.linked.parent_path = Some(parent_path);
    child.save()?;
    Ok(())
}

pub fn detach(image: &mut Image) -> Result<()> {
    if let Some(parent_path) = image.linked.parent_path.take() {
        if let Ok(mut parent) = Image::open(&parent_path) {
            parent.linked.children.retain(|c| c.path != image.path());
            parent.save()?;
        }
    }
    image.linked.name = None;
    image.save()?;
    Ok(())
}

/// Find every parent-sync violation: child-installed packages whose
/// `depend type=parent` action isn't satisfied by what's currently
/// installed in `parent`. Mirrors `solver::check_parent_dependencies`'s
/// version-match rule exactly, but runs over the child's whole installed
/// set rather than just a pending plan.
pub fn out_of_sync_packages(parent: &Image, child: &Image) -> Result<Vec<OutOfSyncPackage>> {
    let mut violations = Vec::new();
    let child_pkgs = child.query_installed_packages(None)?;
    for pkg in &child_pkgs {
        let manifest = match child.get_manifest_from_installed(&pkg.fmri)? {
            Some(m) => m,
            None => continue,
        };
        for dep in &manifest.dependencies {
            if dep.dependency_type != "parent" {
                continue;
            }
            let Some(target) = &dep.fmri else { continue };
            let parent_fmri = parent.query_installed_packages(Some(target.stem()))?
                .into_iter()
                .find(|p| p.fmri.stem() == target.stem())
                .map(|p| p.fmri);
            let Some(parent_fmri) = parent_fmri else {
                violations.push(OutOfSyncPackage {
                    child_pkg: pkg.fmri.to_string(),
                    parent_target_stem: target.stem().to_string(),
                    required_version: target.version(),
                    found_version: None,
                });
                continue;
            };
            let is_self = target.stem() == pkg.fmri.stem();
            let satisfied = match (&parent_fmri.version, &target.version) {
                (Some(pv), Some(tv)) => {
                    if is_self {
                        *pv == *tv
                    } else {
                        *pv == *tv || pv.is_successor(tv, ConstraintKind::None)
                    }
                }
                (None, None) => true,
                _ => false,
            };
            if !satisfied {
                violations.push(OutOfSyncPackage {
                    child_pkg: pkg.fmri.to_string(),
                    parent_target_stem: target.stem().to_string(),
                    required_version: target.version(),
                    found_version: Some(parent_fmri.version()),
                });
            }
        }
    }
    Ok(violations)
}

/// Verify that `child` satisfies both sync invariants against `parent`,
/// returning every violation found (not just the first). `kind` no longer
/// changes which invariants are checked; it is accepted only so callers
/// can attribute the failure to a particular linkage name.
pub fn audit(parent: &Image, child: &Image, _kind: LinkedImageKind) -> Result<()> {
    let mut errors = Vec::new();

    for parent_pub in parent.publishers.iter().filter(|p| p.sticky) {
        if let Some(child_pub) = child.publishers.iter().find(|p| p.name == parent_pub.name) {
            if child_pub.origin != parent_pub.origin || child_pub.mirrors != parent_pub.mirrors {
                errors.push(LinkedImageError::LinkedPubError(format!(
                    "sticky publisher {} differs between parent ({}, {:?}) and child ({}, {:?})",
                    parent_pub.name, parent_pub.origin, parent_pub.mirrors, child_pub.origin, child_pub.mirrors
                )));
            }
        }
    }

    match out_of_sync_packages(parent, child) {
        Ok(violations) => {
            for v in violations {
                errors.push(LinkedImageError::CmdFailed(match &v.found_version {
                    Some(found) => format!(
                        "{} requires parent's {} to match version {}, found {}",
                        v.child_pkg, v.parent_target_stem, v.required_version, found
                    ),
                    None => format!(
                        "{} requires parent to have {} installed, but it is absent",
                        v.child_pkg, v.parent_target_stem
                    ),
                }));
            }
        }
        Err(e) => errors.push(LinkedImageError::Image(e)),
    }

    if errors.is_empty() {
        Ok(())
    } else if errors.len() == 1 {
        Err(errors.into_iter().next().unwrap())
    } else {
        Err(LinkedImageError::LixBundle(errors))
    }
}

/// Bring `child`'s parent-tracking packages back into sync: for every
/// package flagged by [`out_of_sync_packages`], ask the solver for an
/// update plan scoped to just that stem and apply it. Stems in `reject`
/// are force-dropped from the child instead of updated, matching
/// `attach_child`'s `reject_list` option.
pub fn sync(parent: &Image, child: &Image, reject: &[String]) -> Result<Vec<Fmri>> {
    let violations = out_of_sync_packages(parent, child)?;
    if violations.is_empty() {
        return Ok(Vec::new());
    }

    let stems: Vec<String> = violations
        .iter()
        .map(|v| v.child_pkg.split('@').next().unwrap_or(&v.child_pkg).to_string())
        .collect::<std::collections::BTreeSet<_>>()
        .into_iter()
        .collect();

    let target = UpdateTarget::Packages(
        stems
            .iter()
            .map(|stem| solver::Constraint {
                stem: stem.clone(),
                ..Default::default()
            })
            .collect(),
    );
    let plan = solver::resolve(child, &Operation::Update(target), reject)
        .map_err(|e| LinkedImageError::CmdFailed(e.to_string()))?;

    let mut synced = Vec::new();
    for (old, new) in &plan.update {
        let delta = crate::actions::Manifest::diff_from(&old.manifest, &new.manifest);
        crate::actions::executors::apply_manifest_delta(
            child.path(),
            &delta,
            &crate::actions::executors::ApplyOptions::default(),
        )
        .map_err(|e| LinkedImageError::CmdFailed(e.to_string()))?;
        child.install_package(&new.fmri, &new.manifest).map_err(LinkedImageError::Image)?;
        synced.push(new.fmri.clone());
    }
    for pkg in &plan.add {
        child.install_package(&pkg.fmri, &pkg.manifest).map_err(LinkedImageError::Image)?;
        synced.push(pkg.fmri.clone());
    }
    Ok(synced)
}

/// A plan computed for one image in a parent/child family, paired with
/// the path that identifies which image it's for.
#[derive(Debug, Clone)]
pub struct FamilyPlan {
    pub image_path: PathBuf,
    pub plan: crate::solver::InstallPlan,
}

/// Resolve `operation` against `image`, then recursively resolve an
/// update plan for each of its children so their parent-tracking packages
/// stay consistent with whatever the root plan is about to install.
/// Per-child failures that are bundle-able (publisher mismatch, missing
/// parent dependency) are collected and surfaced together as a single
/// [`LinkedImageError::LixBundle`] rather than aborting on the first one.
pub fn plan_recursive(
    image: &Image,
    operation: &Operation,
    reject: &[String],
) -> Result<Vec<FamilyPlan>> {
    let root_plan = solver::resolve(image, operation, reject)
        .map_err(|e| LinkedImageError::CmdFailed(e.to_string()))?;
    let mut plans = vec![FamilyPlan {
        image_path: image.path().to_path_buf(),
        plan: root_plan,
    }];

    let mut bundle_errors = Vec::new();
    for child_ref in &image.linked.children {
        let child = match Image::open(&child_ref.path) {
            Ok(child) => child,
            Err(e) => {
                bundle_errors.push(LinkedImageError::Image(e));
                continue;
            }
        };
        match solver::resolve(&child, &Operation::Update(UpdateTarget::All), reject) {
            Ok(child_plan) if !child_plan.add.is_empty() || !child_plan.update.is_empty() || !child_plan.remove.is_empty() => {
                plans.push(FamilyPlan {
                    image_path: child.path().to_path_buf(),
                    plan: child_plan,
                });
            }
            Ok(_) => {}
            Err(e) => bundle_errors.push(LinkedImageError::CmdFailed(format!(
                "{}: {}",
                child_ref.path.display(),
                e
            ))),
        }
    }

    if !bundle_errors.is_empty() {
        return Err(LinkedImageError::LixBundle(bundle_errors));
    }
    Ok(plans)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::ImageType;
    use tempfile::tempdir;

    #[test]
    fn attach_and_detach_roundtrip() {
        let dir = tempdir().unwrap();
        let mut parent = Image::create_image(dir.path().join("parent"), ImageType::Full).unwrap();
        let mut child = Image::create_image(dir.path().join("child"), ImageType::Partial).unwrap();

        attach_child(
            &mut parent,
            &mut child,
            LinkedImageName::new(LinkedImageKind::Zone, "z1"),
            &AttachOptions::default(),
        )
        .unwrap();
        assert_eq!(parent.linked.children.len(), 1);
        assert_eq!(child.linked.parent_path, Some(parent.path().to_path_buf()));

        detach(&mut child).unwrap();
        assert!(child.linked.parent_path.is_none());
    }

    #[test]
    fn rejects_self_cycle() {
        let dir = tempdir().unwrap();
        let mut parent = Image::create_image(dir.path().join("p"), ImageType::Full).unwrap();
        let mut same = Image::open(parent.path()).unwrap();
        let err = attach_child(
            &mut parent,
            &mut same,
            LinkedImageName::new(LinkedImageKind::System, "s1"),
            &AttachOptions::default(),
        );
        assert!(err.is_err());
    }

    #[test]
    fn audit_is_clean_when_sticky_publisher_absent_from_child() {
        // Absence, not mismatch, satisfies publisher-sync: the child is
        // simply not tracking that publisher at all.
        let dir = tempdir().unwrap();
        let mut parent = Image::create_image(dir.path().join("parent"), ImageType::Full).unwrap();
        parent.add_publisher("test", "http://example.com/repo", vec![], true).unwrap();
        let child = Image::create_image(dir.path().join("child"), ImageType::Partial).unwrap();

        let res = audit(&parent, &child, LinkedImageKind::Zone);
        assert!(res.is_ok());
    }

    #[test]
    fn audit_flags_sticky_publisher_origin_mismatch() {
        let dir = tempdir().unwrap();
        let mut parent = Image::create_image(dir.path().join("parent"), ImageType::Full).unwrap();
        parent.add_publisher("test", "http://example.com/repo", vec![], true).unwrap();
        let mut child = Image::create_image(dir.path().join("child"), ImageType::Partial).unwrap();
        child.add_publisher("test", "http://mirror.example.com/repo", vec![], true).unwrap();

        let res = audit(&parent, &child, LinkedImageKind::Zone);
        assert!(matches!(res, Err(LinkedImageError::LinkedPubError(_))));
    }

    #[test]
    fn out_of_sync_packages_is_empty_with_no_parent_deps() {
        let dir = tempdir().unwrap();
        let parent = Image::create_image(dir.path().join("parent"), ImageType::Full).unwrap();
        let child = Image::create_image(dir.path().join("child"), ImageType::Partial).unwrap();
        assert!(out_of_sync_packages(&parent, &child).unwrap().is_empty());
    }
}
