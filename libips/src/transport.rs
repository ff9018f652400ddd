//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

//! HTTP transport façade used by the image's catalog refresh and manifest
//! fetch paths. Every origin on a publisher is tried in order; the first
//! one to answer with a successful response wins.

use crate::actions::Manifest;
use crate::fmri::Fmri;
use crate::image::Publisher;
use miette::Diagnostic;
use reqwest::blocking::Client;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// `PKG_DEBUG` raises every request-URL log line from `debug` to `info`, the
/// same knob the image and transport layers share for "tell me what you're
/// doing on the wire without turning on full trace logging".
fn pkg_debug() -> bool {
    std::env::var("PKG_DEBUG").is_ok()
}

fn log_fetching(url: &str) {
    if pkg_debug() {
        info!(%url, "fetching (PKG_DEBUG)");
    } else {
        debug!(%url, "fetching");
    }
}

#[derive(Debug, Error, Diagnostic)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    #[diagnostic(code(ips::transport_error::http))]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    #[diagnostic(code(ips::transport_error::json))]
    Json(#[from] serde_json::Error),

    #[error("publisher {publisher} has no reachable origin ({last_error})")]
    #[diagnostic(code(ips::transport_error::no_origin), help("Check network connectivity and the publisher's configured origins"))]
    NoOrigin { publisher: String, last_error: String },

    #[error("{url} returned status {status}")]
    #[diagnostic(code(ips::transport_error::status))]
    Status { url: String, status: u16 },

    #[error("failed to parse manifest for {fmri}: {message}")]
    #[diagnostic(code(ips::transport_error::manifest_parse))]
    ManifestParse { fmri: String, message: String },
}

pub type Result<T> = std::result::Result<T, TransportError>;

fn env_duration(var: &str, default_secs: u64) -> Duration {
    std::env::var(var)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or_else(|| Duration::from_secs(default_secs))
}

fn client() -> Client {
    Client::builder()
        .connect_timeout(env_duration("PKG_CLIENT_CONNECT_TIMEOUT", 30))
        .timeout(env_duration("PKG_CLIENT_READ_TIMEOUT", 60))
        .build()
        .unwrap_or_else(|_| Client::new())
}

fn no_cache_headers(force_full: bool) -> reqwest::header::HeaderMap {
    let mut headers = reqwest::header::HeaderMap::new();
    if force_full || std::env::var("PKG_NO_NETWORK_CACHE").is_ok() {
        headers.insert("Cache-Control", "no-cache".parse().unwrap());
        headers.insert("Pragma", "no-cache".parse().unwrap());
    }
    headers
}

/// Origin list in preference order: primary origin first, then mirrors.
fn origins(publisher: &Publisher) -> Vec<String> {
    let mut v = vec![publisher.origin.clone()];
    v.extend(publisher.mirrors.clone());
    v
}

/// Fetch `rel_path` relative to each of a publisher's origins in turn,
/// returning the first successful response body as raw bytes.
pub fn fetch_bytes(publisher: &Publisher, rel_path: &str, force_full: bool) -> Result<Vec<u8>> {
    let c = client();
    let headers = no_cache_headers(force_full);
    let mut last_error = String::new();
    for origin in origins(publisher) {
        let url = format!("{}/{}", origin.trim_end_matches('/'), rel_path.trim_start_matches('/'));
        log_fetching(&url);
        match c.get(&url).headers(headers.clone()).send() {
            Ok(resp) if resp.status().is_success() => {
                return Ok(resp.bytes().map_err(TransportError::Http)?.to_vec());
            }
            Ok(resp) => {
                last_error = format!("{} -> {}", url, resp.status());
                warn!(%url, status = %resp.status(), "non-success response, trying next origin");
            }
            Err(e) => {
                last_error = format!("{}: {}", url, e);
                warn!(%url, error = %e, "request failed, trying next origin");
            }
        }
    }
    Err(TransportError::NoOrigin {
        publisher: publisher.name.clone(),
        last_error,
    })
}

/// Like [`fetch_bytes`], but a 404 from every origin is reported as `Ok(None)`
/// instead of a `NoOrigin` error: the catalog refresh protocol treats a
/// publisher with no `catalog.attrs` yet as an empty publisher, not a
/// transport failure.
pub fn fetch_bytes_opt(publisher: &Publisher, rel_path: &str, force_full: bool) -> Result<Option<Vec<u8>>> {
    let c = client();
    let headers = no_cache_headers(force_full);
    let mut last_error = String::new();
    let mut all_404 = true;
    for origin in origins(publisher) {
        let url = format!("{}/{}", origin.trim_end_matches('/'), rel_path.trim_start_matches('/'));
        log_fetching(&url);
        match c.get(&url).headers(headers.clone()).send() {
            Ok(resp) if resp.status().is_success() => {
                return Ok(Some(resp.bytes().map_err(TransportError::Http)?.to_vec()));
            }
            Ok(resp) => {
                if resp.status() != reqwest::StatusCode::NOT_FOUND {
                    all_404 = false;
                }
                last_error = format!("{} -> {}", url, resp.status());
                warn!(%url, status = %resp.status(), "non-success response, trying next origin");
            }
            Err(e) => {
                all_404 = false;
                last_error = format!("{}: {}", url, e);
                warn!(%url, error = %e, "request failed, trying next origin");
            }
        }
    }
    if all_404 {
        return Ok(None);
    }
    Err(TransportError::NoOrigin {
        publisher: publisher.name.clone(),
        last_error,
    })
}

pub fn fetch_text(publisher: &Publisher, rel_path: &str, force_full: bool) -> Result<String> {
    let bytes = fetch_bytes(publisher, rel_path, force_full)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Fetch a package manifest from a publisher's repository by FMRI.
pub fn fetch_manifest(publisher: &Publisher, fmri: &Fmri) -> Result<Manifest> {
    let rel_path = format!("manifest/0/{}", fmri.stem());
    let text = fetch_text(publisher, &rel_path, false)?;
    Manifest::parse_string(text).map_err(|e| TransportError::ManifestParse {
        fmri: fmri.to_string(),
        message: e.to_string(),
    })
}

/// Fetch one named catalog part (`catalog.base.C`, `catalog.dependency.C`, ...)
/// relative to a publisher's catalog directory.
pub fn fetch_catalog_part(publisher: &Publisher, part_name: &str, force_full: bool) -> Result<Vec<u8>> {
    fetch_bytes(publisher, &format!("{}/{}", publisher.name, part_name), force_full)
}

fn max_concurrency() -> usize {
    std::env::var("PKG_CLIENT_MAX_CONCURRENCY")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|&n| n > 0)
        .unwrap_or(4)
}

/// Fetch several relative paths from one publisher concurrently, bounded to
/// `PKG_CLIENT_MAX_CONCURRENCY` (default 4) requests in flight across the
/// publisher's origins/mirrors at once. Results come back paired with the
/// `rel_path` that produced them, in no particular order — callers that
/// need per-path results should match on the path, not positionally.
pub fn fetch_many_bytes(
    publisher: &Publisher,
    rel_paths: &[String],
    force_full: bool,
) -> Vec<(String, Result<Vec<u8>>)> {
    use std::sync::mpsc;
    use std::sync::{Arc, Mutex};
    use std::thread;

    if rel_paths.is_empty() {
        return Vec::new();
    }

    let worker_count = max_concurrency().min(rel_paths.len());
    let queue: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(rel_paths.to_vec()));
    let (tx, rx) = mpsc::channel();

    let mut handles = Vec::with_capacity(worker_count);
    for _ in 0..worker_count {
        let queue = queue.clone();
        let tx = tx.clone();
        let publisher = publisher.clone();
        handles.push(thread::spawn(move || loop {
            let rel_path = {
                let mut q = queue.lock().unwrap();
                q.pop()
            };
            let Some(rel_path) = rel_path else { break };
            let result = fetch_bytes(&publisher, &rel_path, force_full);
            if tx.send((rel_path, result)).is_err() {
                break;
            }
        }));
    }
    drop(tx);

    let results: Vec<(String, Result<Vec<u8>>)> = rx.into_iter().collect();
    for h in handles {
        let _ = h.join();
    }
    results
}

/// Fetch a payload file by content hash, the form every file/license action
/// ultimately resolves to when the plan executor downloads content.
pub fn fetch_file(publisher: &Publisher, hash: &str) -> Result<Vec<u8>> {
    let rel_path = format!("file/0/{}", hash);
    fetch_bytes(publisher, &rel_path, false)
}
