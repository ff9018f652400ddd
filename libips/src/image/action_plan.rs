use std::path::Path;

use crate::actions::executors::{apply_manifest, remove_manifest, ApplyOptions, InstallerError};
use crate::actions::Manifest;
use crate::solver::{InstallPlan, ResolvedPkg};

/// ActionPlan represents a merged list of actions across all manifests
/// that are to be installed together. It intentionally does not preserve
/// per-package boundaries; executors will run with proper ordering.
#[derive(Debug, Default, Clone)]
pub struct ActionPlan {
    pub manifest: Manifest,
}

impl ActionPlan {
    /// Build an ActionPlan by merging all actions from the install plan's
    /// `add` set plus the new side of its `update` pairs — everything that
    /// needs its filesystem content written out.
    pub fn from_install_plan(plan: &InstallPlan) -> Self {
        let new_pkgs: Vec<ResolvedPkg> = plan
            .add
            .iter()
            .cloned()
            .chain(plan.update.iter().map(|(_, new)| new.clone()))
            .collect();
        Self::from_resolved(&new_pkgs)
    }

    /// Build an ActionPlan from a list of resolved packages (an install
    /// plan's `remove` set, or the "old" side of its `update` pairs),
    /// merging every action-kind vector the same way `from_install_plan` does.
    pub fn from_resolved(pkgs: &[ResolvedPkg]) -> Self {
        let mut merged = Manifest::new();
        for rp in pkgs {
            merged.directories.extend(rp.manifest.directories.iter().cloned());
            merged.files.extend(rp.manifest.files.iter().cloned());
            merged.links.extend(rp.manifest.links.iter().cloned());
            merged.hardlinks.extend(rp.manifest.hardlinks.iter().cloned());
            merged.users.extend(rp.manifest.users.iter().cloned());
            merged.groups.extend(rp.manifest.groups.iter().cloned());
            merged.drivers.extend(rp.manifest.drivers.iter().cloned());
            merged.licenses.extend(rp.manifest.licenses.iter().cloned());
            merged.legacies.extend(rp.manifest.legacies.iter().cloned());
            merged.signatures.extend(rp.manifest.signatures.iter().cloned());
        }
        Self { manifest: merged }
    }

    /// Execute the action plan using the executors relative to the provided image root.
    pub fn apply(&self, image_root: &Path, opts: &ApplyOptions) -> Result<(), InstallerError> {
        apply_manifest(image_root, &self.manifest, opts)
    }

    /// Remove this plan's filesystem footprint from `image_root`, used to
    /// execute an install plan's `remove` set (or the "old" side of an
    /// `update` pair) during uninstall/update.
    pub fn remove(&self, image_root: &Path, opts: &ApplyOptions) -> Result<(), InstallerError> {
        remove_manifest(image_root, &self.manifest, opts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::InstallPlan as SInstallPlan;

    #[test]
    fn build_and_apply_empty_plan_dry_run() {
        // Empty install plan should produce empty action plan and apply should be no-op.
        let plan = SInstallPlan { add: vec![], remove: vec![], update: vec![], reasons: vec![] };
        let ap = ActionPlan::from_install_plan(&plan);
        assert!(ap.manifest.directories.is_empty());
        assert!(ap.manifest.files.is_empty());
        assert!(ap.manifest.links.is_empty());
        let opts = ApplyOptions { dry_run: true, ..Default::default() };
        let root = Path::new("/tmp/ips_image_test_nonexistent_root");
        // Even if root doesn't exist, dry_run should not perform any IO and succeed.
        let res = ap.apply(root, &opts);
        assert!(res.is_ok());
    }
}
