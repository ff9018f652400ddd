//! Client-side catalog refresh: fetches a publisher's catalog.attrs and
//! only the catalog parts that changed since the local copy was written.
//!
//! A full refresh clears the publisher's local catalog directory and
//! re-downloads every part named in the remote catalog.attrs. An
//! incremental refresh instead replays the update logs (`update.<ts>.C`)
//! the remote catalog.attrs lists that the local copy hasn't applied yet,
//! in chronological order (update log names sort chronologically since
//! they're ISO-8601 basic timestamps), re-verifying each log's SHA-1
//! signature against the bytes fetched for it before trusting its
//! `+FMRI`/`-FMRI` entries. Any signature mismatch, or a remote catalog
//! with no update-log history the local copy can pick up from, falls back
//! to a full refresh rather than risk applying a corrupt or unverifiable
//! delta.
//!
//! Falls back to a full refresh whenever the local catalog's last-modified
//! timestamp is newer than the remote's: that's the signal a publisher's
//! catalog was rebuilt from scratch at an earlier point than what we
//! already hold (a "rollback"), and a partial local copy could otherwise
//! end up straddling two unrelated catalog generations.

use super::{Image, Publisher};
use crate::fmri::{Fmri, Version};
use crate::repository::catalog::{CatalogAttrs, CatalogOperationType, CatalogPart};
use crate::transport;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use super::ImageError;

fn sha1_hex(bytes: &[u8]) -> String {
    use sha1::Digest as _;
    let mut hasher = sha1::Sha1::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn publisher_catalog_dir(image: &Image, publisher: &Publisher) -> std::path::PathBuf {
    image.catalog_dir().join(&publisher.name)
}

fn local_attrs(dir: &std::path::Path) -> Option<CatalogAttrs> {
    let attrs_path = dir.join("catalog.attrs");
    if !attrs_path.exists() {
        return None;
    }
    CatalogAttrs::load(&attrs_path).ok()
}

/// Download every part named in `remote_attrs` and overwrite `dir` with it.
fn full_refresh(
    publisher: &Publisher,
    dir: &Path,
    remote_attrs: &CatalogAttrs,
    remote_attrs_text: &str,
) -> super::Result<()> {
    if dir.exists() {
        fs::remove_dir_all(dir)?;
    }
    fs::create_dir_all(dir)?;

    let part_names: Vec<String> = remote_attrs.parts.keys().cloned().collect();
    let rel_paths: Vec<String> = part_names
        .iter()
        .map(|n| format!("{}/{}", publisher.name, n))
        .collect();
    for (rel_path, result) in transport::fetch_many_bytes(publisher, &rel_paths, true) {
        let bytes = result?;
        let name = rel_path
            .rsplit('/')
            .next()
            .unwrap_or(&rel_path)
            .to_string();
        verify_part_signature(&name, &bytes, remote_attrs)?;
        fs::write(dir.join(&name), bytes)?;
    }
    fs::write(dir.join("catalog.attrs"), remote_attrs_text)?;
    Ok(())
}

fn verify_part_signature(part_name: &str, bytes: &[u8], remote_attrs: &CatalogAttrs) -> super::Result<()> {
    if let Some(info) = remote_attrs.parts.get(part_name) {
        if let Some(expected) = &info.signature_sha1 {
            let actual = sha1_hex(bytes);
            if &actual != expected {
                return Err(ImageError::Database(format!(
                    "catalog part {} failed SHA-1 signature verification (expected {}, got {})",
                    part_name, expected, actual
                )));
            }
        }
    }
    Ok(())
}

/// Refresh one publisher's local catalog files from its origins.
pub fn refresh_publisher_catalog(image: &Image, publisher: &Publisher, force_full: bool) -> super::Result<()> {
    let dir = publisher_catalog_dir(image, publisher);
    fs::create_dir_all(&dir)?;

    let rel_attrs = format!("{}/catalog.attrs", publisher.name);
    let remote_attrs_text = transport::fetch_text(publisher, &rel_attrs, force_full)?;
    let remote_attrs: CatalogAttrs = serde_json::from_str(&remote_attrs_text)?;

    let existing = local_attrs(&dir);
    // Rollback: the local copy's last-modified is *ahead* of the server's,
    // meaning the server's catalog regressed to an earlier generation.
    let rollback = existing
        .as_ref()
        .map(|a| a.last_modified > remote_attrs.last_modified)
        .unwrap_or(false);
    let full = force_full || existing.is_none() || rollback;

    if full {
        return full_refresh(publisher, &dir, &remote_attrs, &remote_attrs_text);
    }

    let local = existing.ok_or_else(|| ImageError::Database("local catalog.attrs missing after existence check".to_string()))?;
    if local.last_modified == remote_attrs.last_modified {
        // Already current.
        return Ok(());
    }

    let mut new_log_names: Vec<String> = remote_attrs
        .updates
        .keys()
        .filter(|name| !local.updates.contains_key(*name))
        .cloned()
        .collect();
    new_log_names.sort();

    if new_log_names.is_empty() {
        // The remote has no update-log history we can pick up from (e.g. the
        // local copy predates update-log tracking, or the publisher doesn't
        // retain logs back that far) - re-download the parts whose
        // last-modified changed, verifying each against catalog.attrs.
        return refresh_changed_parts_wholesale(publisher, &dir, &local, &remote_attrs, &remote_attrs_text);
    }

    let mut loaded_parts: BTreeMap<String, CatalogPart> = BTreeMap::new();
    for name in &new_log_names {
        let rel = format!("{}/{}", publisher.name, name);
        let bytes = transport::fetch_bytes(publisher, &rel, false)?;

        if let Some(info) = remote_attrs.updates.get(name) {
            if let Some(expected) = &info.signature_sha1 {
                let actual = sha1_hex(&bytes);
                if &actual != expected {
                    // Don't trust a partial incremental replay built on an
                    // update log that failed verification.
                    return full_refresh(publisher, &dir, &remote_attrs, &remote_attrs_text);
                }
            }
        }

        let log: crate::repository::catalog::UpdateLog =
            serde_json::from_slice(&bytes).map_err(ImageError::Json)?;

        for stems in log.updates.values() {
            for (stem, entries) in stems {
                for entry in entries {
                    let Ok(version) = Version::parse(&entry.version) else {
                        continue;
                    };
                    let fmri = Fmri::with_publisher(&publisher.name, stem, Some(version));
                    for (part_name, stem_map) in &entry.catalog_parts {
                        let part = loaded_parts.entry(part_name.clone()).or_insert_with(|| {
                            CatalogPart::load(dir.join(part_name)).unwrap_or_else(|_| CatalogPart::new())
                        });
                        match entry.op_type {
                            CatalogOperationType::Add => {
                                let actions = stem_map.get(stem).cloned();
                                part.add_package(&publisher.name, &fmri, actions, entry.signature_sha1.clone());
                            }
                            CatalogOperationType::Remove => {
                                part.remove_package(&publisher.name, stem, &entry.version);
                            }
                        }
                    }
                }
            }
        }
    }

    for (part_name, part) in &loaded_parts {
        let bytes = serde_json::to_vec_pretty(part)?;
        verify_part_signature(part_name, &bytes, &remote_attrs)?;
        fs::write(dir.join(part_name), bytes)?;
    }
    fs::write(dir.join("catalog.attrs"), &remote_attrs_text)?;
    Ok(())
}

/// Fallback used when there's no update-log trail to replay: re-download
/// whichever parts' `last-modified` changed, still verifying each against
/// the remote catalog.attrs's recorded SHA-1 before writing it to disk.
fn refresh_changed_parts_wholesale(
    publisher: &Publisher,
    dir: &Path,
    local: &CatalogAttrs,
    remote_attrs: &CatalogAttrs,
    remote_attrs_text: &str,
) -> super::Result<()> {
    let changed_names: Vec<String> = remote_attrs
        .parts
        .iter()
        .filter(|(name, remote_info)| {
            local
                .parts
                .get(*name)
                .map(|local_info| local_info.last_modified != remote_info.last_modified)
                .unwrap_or(true)
        })
        .map(|(name, _)| name.clone())
        .collect();

    let rel_paths: Vec<String> = changed_names
        .iter()
        .map(|n| format!("{}/{}", publisher.name, n))
        .collect();
    for (rel_path, result) in transport::fetch_many_bytes(publisher, &rel_paths, false) {
        let bytes = result?;
        let name = rel_path.rsplit('/').next().unwrap_or(&rel_path).to_string();
        verify_part_signature(&name, &bytes, remote_attrs)?;
        fs::write(dir.join(&name), bytes)?;
    }
    fs::write(dir.join("catalog.attrs"), remote_attrs_text)?;
    Ok(())
}
