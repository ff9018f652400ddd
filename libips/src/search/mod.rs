//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

//! On-disk inverted search index over package manifests.
//!
//! The index lives as a set of versioned flat files under a directory (an
//! image's `var/pkg/search` or a repository's equivalent): a sorted main
//! dictionary mapping tokens to postings, a byte-offset file for seeking
//! into it without a full scan, the sorted list of indexed FMRIs plus its
//! hash (used to detect a stale index), and two append-only side logs
//! (`fast_add`/`fast_remove`) that let small installs/removals skip a full
//! rebuild until they accumulate past [`MAX_FAST_INDEXED_PKGS`].
//!
//! Every read and write is careful to notice a missing, unversioned, or
//! hash-mismatched index and fall back to scanning manifests directly
//! rather than returning wrong answers; see [`SearchDiagnostic`].

use crate::actions::Manifest;
use crate::fmri::Fmri;
use fs2::FileExt;
use miette::Diagnostic;
use sha2::{Digest as Sha2Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

const MAIN_DICT_FILE: &str = "main_dict.ascii.v1";
const BYTE_OFFSET_FILE: &str = "byte_offset.v1";
const TOKEN_BYTE_OFFSET_FILE: &str = "token_byte_offset.v1";
const FULL_FMRI_LIST_FILE: &str = "full_fmri_list";
const FULL_FMRI_LIST_HASH_FILE: &str = "full_fmri_list.hash";
const FAST_ADD_FILE: &str = "fast_add.v1";
const FAST_REMOVE_FILE: &str = "fast_remove.v1";
const ID_TO_VALUE_FILE: &str = "id_to_value.v1";
const VALUE_TO_ID_FILE: &str = "value_to_id.v1";
const FMRI_OFFSETS_FILE: &str = "fmri_offsets.v1";
const LOCK_FILE: &str = ".lock";

/// On-disk format version written into every index file's header.
pub const INDEX_VERSION: u32 = 1;
pub const ON_DISK_FORMAT: u32 = 1;

/// Threshold above which a pending `fast_add` backlog forces a full rebuild
/// instead of continuing to grow the side log. Not exposed by the source
/// this is grounded on; decided here as a tunable constant (Open Question,
/// see DESIGN.md) rather than a hardcoded scan limit.
pub const MAX_FAST_INDEXED_PKGS: usize = 32;

#[derive(Debug, Error, Diagnostic)]
pub enum SearchError {
    #[error("I/O error: {0}")]
    #[diagnostic(code(ips::search_error::io))]
    Io(#[from] std::io::Error),

    #[error("query parse error: {0}")]
    #[diagnostic(code(ips::search_error::parse))]
    Parse(String),

    #[error("index file is inconsistent: {0}")]
    #[diagnostic(code(ips::search_error::inconsistent))]
    Inconsistent(String),
}

pub type Result<T> = std::result::Result<T, SearchError>;

/// A single word or quoted phrase in a query.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchTerm {
    pub text: String,
    /// Mixed-case terms are matched case-sensitively; all-lowercase terms
    /// are matched case-insensitively. This mirrors how a search-before/
    /// after-insensitive toggle is usually inferred from the query text
    /// itself rather than threaded through as separate API surface.
    pub case_sensitive: bool,
    pub glob: bool,
}

impl SearchTerm {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let case_sensitive = text.chars().any(|c| c.is_uppercase());
        let glob = text.contains(['*', '?', '[']);
        SearchTerm {
            text,
            case_sensitive,
            glob,
        }
    }

    fn matches(&self, candidate: &str) -> bool {
        if self.glob {
            glob_match(&self.text, candidate, self.case_sensitive)
        } else if self.case_sensitive {
            candidate == self.text
        } else {
            candidate.eq_ignore_ascii_case(&self.text)
        }
    }
}

/// A parsed search query. `Field` parts that are `None` match anything in
/// that position (an empty segment in `pkg:action:key:value`).
#[derive(Debug, Clone, PartialEq)]
pub enum SearchQuery {
    Term(SearchTerm),
    Phrase(String),
    Field {
        pkg: Option<SearchTerm>,
        action: Option<SearchTerm>,
        key: Option<SearchTerm>,
        value: Option<SearchTerm>,
    },
    And(Box<SearchQuery>, Box<SearchQuery>),
    Or(Box<SearchQuery>, Box<SearchQuery>),
    /// `<q>`: return matching packages rather than matching actions.
    ReturnPackages(Box<SearchQuery>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchDiagnostic {
    SlowSearchUsed,
    IncorrectIndexFileHash,
    InconsistentIndexException,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub fmri: Fmri,
    pub action_name: String,
    pub key: String,
    pub value: String,
    /// A single-line reconstruction of the matched action, e.g.
    /// `file path=bin/example_path`, good enough for grep-style display.
    pub action_raw: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchOutcome {
    pub hits: Vec<SearchHit>,
    pub diagnostics: Vec<SearchDiagnostic>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexUpdateOutcome {
    FastAdded,
    FastRemoved,
}

/// One token occurrence: an action in a package carries this token in one
/// of its attribute values (or as its own path component, hash, etc).
#[derive(Debug, Clone)]
struct Posting {
    doc_id: u32,
    action: String,
    key: String,
    value_id: u32,
    offset: u64,
    variant_mask: u64,
}

pub struct SearchIndex {
    dir: PathBuf,
}

impl SearchIndex {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        SearchIndex { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn lock_path(&self) -> PathBuf {
        self.dir.join(LOCK_FILE)
    }

    fn lock_exclusive(&self) -> Result<File> {
        fs::create_dir_all(&self.dir)?;
        let f = OpenOptions::new()
            .create(true)
            .write(true)
            .open(self.lock_path())?;
        f.lock_exclusive()?;
        Ok(f)
    }

    fn lock_shared(&self) -> Result<File> {
        fs::create_dir_all(&self.dir)?;
        let f = OpenOptions::new()
            .create(true)
            .write(true)
            .open(self.lock_path())?;
        f.lock_shared()?;
        Ok(f)
    }

    /// True when the index directory has no main dictionary at all yet
    /// (a brand new image before its first `build`).
    pub fn exists(&self) -> bool {
        self.dir.join(MAIN_DICT_FILE).exists()
    }

    /// Full from-scratch build: tokenizes every action of every manifest
    /// given, writes a fresh main dictionary plus every auxiliary file, and
    /// clears both side logs.
    pub fn build(&self, manifests: &[(Fmri, Manifest)]) -> Result<()> {
        let _lock = self.lock_exclusive()?;
        self.write_index(manifests)
    }

    /// Same as [`Self::build`]; kept as a distinct name because the spec's
    /// refresh protocol distinguishes an *initial* build from a rebuild
    /// forced by staleness/corruption/fast-add overflow, even though both
    /// perform the identical from-scratch write here.
    pub fn rebuild(&self, manifests: &[(Fmri, Manifest)]) -> Result<()> {
        let _lock = self.lock_exclusive()?;
        self.write_index(manifests)
    }

    fn write_index(&self, manifests: &[(Fmri, Manifest)]) -> Result<()> {
        fs::create_dir_all(&self.dir)?;

        let mut fmri_strings: Vec<String> = manifests.iter().map(|(f, _)| f.to_string()).collect();
        fmri_strings.sort();
        fmri_strings.dedup();
        let doc_id_of: BTreeMap<&str, u32> = fmri_strings
            .iter()
            .enumerate()
            .map(|(i, s)| (s.as_str(), i as u32))
            .collect();

        let mut value_ids: BTreeMap<String, u32> = BTreeMap::new();
        let mut id_to_value: Vec<String> = Vec::new();
        let mut intern_value = |v: &str, value_ids: &mut BTreeMap<String, u32>, id_to_value: &mut Vec<String>| -> u32 {
            if let Some(id) = value_ids.get(v) {
                return *id;
            }
            let id = id_to_value.len() as u32;
            id_to_value.push(v.to_string());
            value_ids.insert(v.to_string(), id);
            id
        };

        let mut dict: BTreeMap<String, Vec<Posting>> = BTreeMap::new();
        let mut fmri_offsets: BTreeMap<u32, Vec<u64>> = BTreeMap::new();

        for (fmri, manifest) in manifests {
            let fmri_str = fmri.to_string();
            let Some(&doc_id) = doc_id_of.get(fmri_str.as_str()) else {
                continue;
            };
            let publisher = fmri.publisher.clone().unwrap_or_default();
            let stem = fmri.stem().to_string();

            let mut offset_counter: u64 = 0;
            let mut emit = |action: &str, key: &str, value: &str| {
                let value_id = intern_value(value, &mut value_ids, &mut id_to_value);
                for token in tokens_for(action, key, value, &publisher, &stem) {
                    dict.entry(token).or_default().push(Posting {
                        doc_id,
                        action: action.to_string(),
                        key: key.to_string(),
                        value_id,
                        offset: offset_counter,
                        variant_mask: 0,
                    });
                }
                fmri_offsets.entry(doc_id).or_default().push(offset_counter);
                offset_counter += 1;
            };

            for a in &manifest.attributes {
                for v in &a.values {
                    emit("set", &a.key, v);
                }
            }
            for d in &manifest.directories {
                emit("dir", "path", &d.path);
            }
            for f in &manifest.files {
                emit("file", "path", &f.path);
                if let Some(p) = &f.payload {
                    if !p.primary_identifier.hash.is_empty() {
                        emit("file", "hash", &p.primary_identifier.hash);
                    }
                }
            }
            for dep in &manifest.dependencies {
                if let Some(df) = &dep.fmri {
                    emit("depend", "fmri", &df.to_string());
                }
                emit("depend", "type", &dep.dependency_type);
            }
            for l in &manifest.links {
                emit("link", "path", &l.path);
                emit("link", "target", &l.target);
            }
            for l in &manifest.hardlinks {
                emit("hardlink", "path", &l.path);
                emit("hardlink", "target", &l.target);
            }
            for u in &manifest.users {
                emit("user", "username", &u.username);
            }
            for g in &manifest.groups {
                emit("group", "groupname", &g.groupname);
            }
            for drv in &manifest.drivers {
                emit("driver", "name", &drv.name);
            }
            for lic in &manifest.licenses {
                emit("license", "license", &lic.payload);
            }
            for leg in &manifest.legacies {
                emit("legacy", "pkg", &leg.pkg);
            }
            // Every package carries its own FMRI and stem as implicit tokens,
            // regardless of whether a `set name=pkg.fmri` attribute was present.
            emit("set", "pkg.fmri", &fmri_str);
        }

        // main_dict.ascii.v1 + byte_offset.v1 / token_byte_offset.v1, written
        // together in one sorted pass so the offsets recorded are exact.
        let mut dict_body = String::new();
        let mut offsets: Vec<(String, u64)> = Vec::with_capacity(dict.len());
        for (token, postings) in &dict {
            let offset = dict_body.len() as u64;
            offsets.push((token.clone(), offset));
            dict_body.push_str(&format_dict_line(token, postings));
            dict_body.push('\n');
        }
        fs::write(self.dir.join(MAIN_DICT_FILE), dict_body)?;

        let mut offset_body = format!("VERSION: {}\non-disk-format: {}\n", INDEX_VERSION, ON_DISK_FORMAT);
        for (token, offset) in &offsets {
            offset_body.push_str(&format!("{}\t{}\n", token, offset));
        }
        fs::write(self.dir.join(BYTE_OFFSET_FILE), &offset_body)?;
        fs::write(self.dir.join(TOKEN_BYTE_OFFSET_FILE), &offset_body)?;

        fs::write(self.dir.join(FULL_FMRI_LIST_FILE), fmri_strings.join("\n"))?;
        let hash = hash_fmri_list(&fmri_strings);
        fs::write(self.dir.join(FULL_FMRI_LIST_HASH_FILE), &hash)?;

        let mut id_to_value_body = String::new();
        for v in &id_to_value {
            id_to_value_body.push_str(&v.replace('\\', "\\\\").replace('\n', "\\n"));
            id_to_value_body.push('\n');
        }
        fs::write(self.dir.join(ID_TO_VALUE_FILE), id_to_value_body)?;

        let mut value_to_id_body = String::new();
        for (v, id) in &value_ids {
            value_to_id_body.push_str(&format!(
                "{}\t{}\n",
                v.replace('\\', "\\\\").replace('\n', "\\n"),
                id
            ));
        }
        fs::write(self.dir.join(VALUE_TO_ID_FILE), value_to_id_body)?;

        let mut fmri_offsets_body = String::new();
        for (doc_id, offs) in &fmri_offsets {
            let offs_str: Vec<String> = offs.iter().map(|o| o.to_string()).collect();
            fmri_offsets_body.push_str(&format!("{}\t{}\n", doc_id, offs_str.join(",")));
        }
        fs::write(self.dir.join(FMRI_OFFSETS_FILE), fmri_offsets_body)?;

        // A build folds any pending incremental changes in, so the side
        // logs are cleared.
        fs::write(self.dir.join(FAST_ADD_FILE), "")?;
        fs::write(self.dir.join(FAST_REMOVE_FILE), "")?;

        Ok(())
    }

    /// Append `fmri` to the fast-add log rather than rebuilding the whole
    /// index. The caller is responsible for calling [`Self::rebuild`] once
    /// [`Self::pending_fast_add_count`] exceeds [`MAX_FAST_INDEXED_PKGS`].
    pub fn add_incremental(&self, fmri: &Fmri, _manifest: &Manifest) -> Result<IndexUpdateOutcome> {
        let _lock = self.lock_exclusive()?;
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join(FAST_ADD_FILE))?;
        writeln!(f, "{}", fmri)?;
        Ok(IndexUpdateOutcome::FastAdded)
    }

    /// Append `fmri` to the fast-remove log; queries filter out any hit
    /// whose FMRI appears here.
    pub fn remove_incremental(&self, fmri: &Fmri) -> Result<IndexUpdateOutcome> {
        let _lock = self.lock_exclusive()?;
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join(FAST_REMOVE_FILE))?;
        writeln!(f, "{}", fmri)?;
        Ok(IndexUpdateOutcome::FastRemoved)
    }

    fn read_log(&self, name: &str) -> Result<Vec<String>> {
        let path = self.dir.join(name);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(path)?;
        Ok(content.lines().filter(|l| !l.is_empty()).map(|l| l.to_string()).collect())
    }

    pub fn pending_fast_add_count(&self) -> Result<usize> {
        Ok(self.read_log(FAST_ADD_FILE)?.len())
    }

    pub fn pending_fast_remove_count(&self) -> Result<usize> {
        Ok(self.read_log(FAST_REMOVE_FILE)?.len())
    }

    fn load_header_ok(&self, name: &str) -> bool {
        let path = self.dir.join(name);
        let Ok(f) = File::open(&path) else { return false };
        let mut lines = BufReader::new(f).lines();
        let Some(Ok(v)) = lines.next() else { return false };
        let Some(Ok(fmt)) = lines.next() else { return false };
        v.trim() == format!("VERSION: {}", INDEX_VERSION) && fmt.trim() == format!("on-disk-format: {}", ON_DISK_FORMAT)
    }

    fn load_byte_offsets(&self) -> Option<BTreeMap<String, u64>> {
        if !self.load_header_ok(BYTE_OFFSET_FILE) {
            return None;
        }
        let f = File::open(self.dir.join(BYTE_OFFSET_FILE)).ok()?;
        let mut lines = BufReader::new(f).lines();
        lines.next(); // VERSION
        lines.next(); // on-disk-format
        let mut map = BTreeMap::new();
        for line in lines.flatten() {
            if let Some((tok, off)) = line.rsplit_once('\t') {
                if let Ok(off) = off.parse::<u64>() {
                    map.insert(tok.to_string(), off);
                }
            }
        }
        Some(map)
    }

    fn load_id_to_value(&self) -> Vec<String> {
        let Ok(content) = fs::read_to_string(self.dir.join(ID_TO_VALUE_FILE)) else {
            return Vec::new();
        };
        content
            .lines()
            .map(|l| l.replace("\\n", "\n").replace("\\\\", "\\"))
            .collect()
    }

    fn load_fmri_list(&self) -> Vec<Fmri> {
        let Ok(content) = fs::read_to_string(self.dir.join(FULL_FMRI_LIST_FILE)) else {
            return Vec::new();
        };
        content.lines().filter_map(|l| Fmri::parse(l).ok()).collect()
    }

    /// Read one dictionary line at `offset` and parse its postings.
    fn read_postings_at(&self, offset: u64) -> Result<Vec<Posting>> {
        let mut f = File::open(self.dir.join(MAIN_DICT_FILE))?;
        f.seek(SeekFrom::Start(offset))?;
        let mut reader = BufReader::new(f);
        let mut line = String::new();
        reader.read_line(&mut line)?;
        let mut byte_line = Vec::new();
        // read_line above already stops at '\n'; nothing further needed.
        byte_line.extend_from_slice(line.trim_end_matches('\n').as_bytes());
        let line = String::from_utf8_lossy(&byte_line).into_owned();
        let (_, postings) = parse_dict_line(&line)
            .map_err(|e| SearchError::Inconsistent(format!("main dict line at offset {}: {}", offset, e)))?;
        Ok(postings)
    }

    fn resolve_token(&self, offsets: &BTreeMap<String, u64>, term: &SearchTerm) -> Result<Vec<Posting>> {
        let mut out = Vec::new();
        if term.glob {
            for (tok, off) in offsets {
                if term.matches(tok) {
                    out.extend(self.read_postings_at(*off)?);
                }
            }
        } else {
            let found = offsets.iter().find(|(tok, _)| term.matches(tok));
            if let Some((_, off)) = found {
                out.extend(self.read_postings_at(*off)?);
            }
        }
        Ok(out)
    }

    /// Run `query` against the on-disk index, falling back to a direct
    /// manifest scan (and recording why) whenever the index is missing,
    /// unversioned, stale, or internally corrupt. `manifests` is the
    /// authoritative set of indexed (or about-to-be-indexed) packages: it
    /// is used both to validate the stored FMRI-set hash and to resolve
    /// fast-add/fast-remove entries and the degraded-mode fallback.
    pub fn search(&self, query: &str, manifests: &[(Fmri, Manifest)]) -> Result<SearchOutcome> {
        let _lock = self.lock_shared()?;
        let ast = parse_query(query)?;
        let mut diagnostics = Vec::new();

        let offsets = self.load_byte_offsets();
        let mut degraded = offsets.is_none();
        if degraded {
            diagnostics.push(SearchDiagnostic::SlowSearchUsed);
        }

        if !degraded {
            let mut current: Vec<String> = manifests.iter().map(|(f, _)| f.to_string()).collect();
            current.sort();
            current.dedup();
            let expected_hash = hash_fmri_list(&current);
            let stored_hash = fs::read_to_string(self.dir.join(FULL_FMRI_LIST_HASH_FILE)).unwrap_or_default();
            if stored_hash.trim() != expected_hash.trim() {
                diagnostics.push(SearchDiagnostic::IncorrectIndexFileHash);
                degraded = true;
            }
        }

        let manifest_by_fmri: std::collections::HashMap<String, &Manifest> =
            manifests.iter().map(|(f, m)| (f.to_string(), m)).collect();

        let hits = if degraded {
            self.scan_manifests(&ast, manifests)?
        } else {
            let offsets = offsets.unwrap();
            let id_to_value = self.load_id_to_value();
            let indexed_fmris = self.load_fmri_list();
            let fast_remove: std::collections::HashSet<String> = self.read_log(FAST_REMOVE_FILE)?.into_iter().collect();
            let fast_add = self.read_log(FAST_ADD_FILE)?;

            let result = match self.eval(&ast, &offsets, &id_to_value, &indexed_fmris) {
                Ok(hits) => hits,
                Err(SearchError::Inconsistent(msg)) => {
                    diagnostics.push(SearchDiagnostic::InconsistentIndexException);
                    tracing::warn!(error = %msg, "search index corrupt, falling back to manifest scan");
                    self.scan_manifests(&ast, manifests)?
                }
                Err(e) => return Err(e),
            };

            let mut result: Vec<SearchHit> = result
                .into_iter()
                .filter(|h| !fast_remove.contains(&h.fmri.to_string()))
                .collect();

            // Fold in fast-add FMRIs not yet folded into the main dict by
            // scanning their manifests directly.
            let fast_add_manifests: Vec<(Fmri, Manifest)> = fast_add
                .iter()
                .filter_map(|s| {
                    let fmri = Fmri::parse(s).ok()?;
                    let manifest = manifest_by_fmri.get(s)?;
                    Some((fmri, (*manifest).clone()))
                })
                .collect();
            if !fast_add_manifests.is_empty() {
                result.extend(self.scan_manifests(&ast, &fast_add_manifests)?);
            }
            result
        };

        let hits = dedup_consecutive(hits);
        Ok(SearchOutcome { hits, diagnostics })
    }

    fn eval(
        &self,
        query: &SearchQuery,
        offsets: &BTreeMap<String, u64>,
        id_to_value: &[String],
        indexed_fmris: &[Fmri],
    ) -> Result<Vec<SearchHit>> {
        classify(query)?;
        self.eval_inner(query, offsets, id_to_value, indexed_fmris)
    }

    fn eval_inner(
        &self,
        query: &SearchQuery,
        offsets: &BTreeMap<String, u64>,
        id_to_value: &[String],
        indexed_fmris: &[Fmri],
    ) -> Result<Vec<SearchHit>> {
        match query {
            SearchQuery::Term(term) => {
                let postings = self.resolve_token(offsets, term)?;
                Ok(postings
                    .into_iter()
                    .filter_map(|p| to_hit(p, id_to_value, indexed_fmris))
                    .collect())
            }
            SearchQuery::Phrase(text) => {
                let term = SearchTerm {
                    text: text.clone(),
                    case_sensitive: text.chars().any(|c| c.is_uppercase()),
                    glob: false,
                };
                let postings = self.resolve_token(offsets, &term)?;
                Ok(postings
                    .into_iter()
                    .filter_map(|p| to_hit(p, id_to_value, indexed_fmris))
                    .collect())
            }
            SearchQuery::Field { pkg, action, key, value } => {
                let mut hits = Vec::new();
                // Resolve via whichever part is most selective (value, then key,
                // then action, then pkg) to avoid a full dictionary scan when
                // any of them is a concrete token.
                let seed_term = value.clone().or_else(|| key.clone()).or_else(|| action.clone());
                let candidate_postings = if let Some(t) = &seed_term {
                    self.resolve_token(offsets, t)?
                } else {
                    // No concrete term at all (e.g. `pkg::: `): scan every posting.
                    let mut all = Vec::new();
                    for off in offsets.values() {
                        all.extend(self.read_postings_at(*off)?);
                    }
                    all
                };
                for p in candidate_postings {
                    let Some(hit) = to_hit(p, id_to_value, indexed_fmris) else { continue };
                    if let Some(t) = pkg {
                        if !t.matches(hit.fmri.stem()) && !t.matches(&hit.fmri.to_string()) {
                            continue;
                        }
                    }
                    if let Some(t) = action {
                        if !t.matches(&hit.action_name) {
                            continue;
                        }
                    }
                    if let Some(t) = key {
                        if !t.matches(&hit.key) {
                            continue;
                        }
                    }
                    if let Some(t) = value {
                        if !t.matches(&hit.value) {
                            continue;
                        }
                    }
                    hits.push(hit);
                }
                Ok(hits)
            }
            SearchQuery::And(a, b) => {
                let left = self.eval_inner(a, offsets, id_to_value, indexed_fmris)?;
                let right = self.eval_inner(b, offsets, id_to_value, indexed_fmris)?;
                let right_keys: std::collections::HashSet<(u32, u64)> =
                    right.iter().map(|h| hit_doc_key(h, indexed_fmris)).collect();
                Ok(left
                    .into_iter()
                    .filter(|h| right_keys.contains(&hit_doc_key(h, indexed_fmris)))
                    .collect())
            }
            SearchQuery::Or(a, b) => {
                let mut left = self.eval_inner(a, offsets, id_to_value, indexed_fmris)?;
                let right = self.eval_inner(b, offsets, id_to_value, indexed_fmris)?;
                left.extend(right);
                Ok(left)
            }
            SearchQuery::ReturnPackages(inner) => {
                let mut hits = self.eval_inner(inner, offsets, id_to_value, indexed_fmris)?;
                let mut seen = std::collections::HashSet::new();
                hits.retain(|h| seen.insert(h.fmri.to_string()));
                for h in hits.iter_mut() {
                    h.action_name.clear();
                    h.key.clear();
                    h.value.clear();
                    h.action_raw = h.fmri.to_string();
                }
                Ok(hits)
            }
        }
    }

    fn scan_manifests(&self, query: &SearchQuery, manifests: &[(Fmri, Manifest)]) -> Result<Vec<SearchHit>> {
        classify(query)?;
        let mut hits = Vec::new();
        for (fmri, manifest) in manifests {
            for (action, key, value) in iter_manifest_tokens_raw(manifest) {
                if token_query_matches(query, &action, &key, &value, fmri) {
                    hits.push(SearchHit {
                        fmri: fmri.clone(),
                        action_name: action.clone(),
                        key: key.clone(),
                        value: value.clone(),
                        action_raw: format!("{} {}={}", action, key, value),
                    });
                }
            }
        }
        if matches!(query, SearchQuery::ReturnPackages(_)) {
            let mut seen = std::collections::HashSet::new();
            hits.retain(|h| seen.insert(h.fmri.to_string()));
        }
        Ok(hits)
    }
}

fn hit_doc_key(hit: &SearchHit, indexed_fmris: &[Fmri]) -> (u32, u64) {
    let doc_id = indexed_fmris
        .iter()
        .position(|f| f.to_string() == hit.fmri.to_string())
        .unwrap_or(usize::MAX) as u32;
    (doc_id, 0)
}

fn to_hit(p: Posting, id_to_value: &[String], indexed_fmris: &[Fmri]) -> Option<SearchHit> {
    let fmri = indexed_fmris.get(p.doc_id as usize)?.clone();
    let value = id_to_value.get(p.value_id as usize).cloned().unwrap_or_default();
    Some(SearchHit {
        fmri,
        action_name: p.action.clone(),
        key: p.key.clone(),
        action_raw: format!("{} {}={}", p.action, p.key, value),
        value,
    })
}

/// Every `(action, key, value)` triple worth tokenizing in a manifest, used
/// both when building the index and when degraded-mode scanning.
fn iter_manifest_tokens_raw(manifest: &Manifest) -> Vec<(String, String, String)> {
    let mut out = Vec::new();
    for a in &manifest.attributes {
        for v in &a.values {
            out.push(("set".to_string(), a.key.clone(), v.clone()));
        }
    }
    for d in &manifest.directories {
        out.push(("dir".to_string(), "path".to_string(), d.path.clone()));
    }
    for f in &manifest.files {
        out.push(("file".to_string(), "path".to_string(), f.path.clone()));
        if let Some(p) = &f.payload {
            if !p.primary_identifier.hash.is_empty() {
                out.push(("file".to_string(), "hash".to_string(), p.primary_identifier.hash.clone()));
            }
        }
    }
    for dep in &manifest.dependencies {
        if let Some(df) = &dep.fmri {
            out.push(("depend".to_string(), "fmri".to_string(), df.to_string()));
        }
        out.push(("depend".to_string(), "type".to_string(), dep.dependency_type.clone()));
    }
    for l in &manifest.links {
        out.push(("link".to_string(), "path".to_string(), l.path.clone()));
        out.push(("link".to_string(), "target".to_string(), l.target.clone()));
    }
    for l in &manifest.hardlinks {
        out.push(("hardlink".to_string(), "path".to_string(), l.path.clone()));
        out.push(("hardlink".to_string(), "target".to_string(), l.target.clone()));
    }
    for u in &manifest.users {
        out.push(("user".to_string(), "username".to_string(), u.username.clone()));
    }
    for g in &manifest.groups {
        out.push(("group".to_string(), "groupname".to_string(), g.groupname.clone()));
    }
    for drv in &manifest.drivers {
        out.push(("driver".to_string(), "name".to_string(), drv.name.clone()));
    }
    for lic in &manifest.licenses {
        out.push(("license".to_string(), "license".to_string(), lic.payload.clone()));
    }
    for leg in &manifest.legacies {
        out.push(("legacy".to_string(), "pkg".to_string(), leg.pkg.clone()));
    }
    out
}

fn token_query_matches(query: &SearchQuery, action: &str, key: &str, value: &str, fmri: &Fmri) -> bool {
    match query {
        SearchQuery::Term(t) => {
            t.matches(value) || tokens_for(action, key, value, fmri.publisher.as_deref().unwrap_or(""), fmri.stem())
                .iter()
                .any(|tok| t.matches(tok))
        }
        SearchQuery::Phrase(p) => value == p,
        SearchQuery::Field { pkg, action: qa, key: qk, value: qv } => {
            pkg.as_ref().is_none_or(|t| t.matches(fmri.stem()) || t.matches(&fmri.to_string()))
                && qa.as_ref().is_none_or(|t| t.matches(action))
                && qk.as_ref().is_none_or(|t| t.matches(key))
                && qv.as_ref().is_none_or(|t| t.matches(value))
        }
        SearchQuery::And(a, b) => {
            token_query_matches(a, action, key, value, fmri) && token_query_matches(b, action, key, value, fmri)
        }
        SearchQuery::Or(a, b) => {
            token_query_matches(a, action, key, value, fmri) || token_query_matches(b, action, key, value, fmri)
        }
        SearchQuery::ReturnPackages(inner) => token_query_matches(inner, action, key, value, fmri),
    }
}

fn dedup_consecutive(hits: Vec<SearchHit>) -> Vec<SearchHit> {
    let mut out: Vec<SearchHit> = Vec::with_capacity(hits.len());
    for h in hits {
        if out.last().map(|prev| prev == &h).unwrap_or(false) {
            continue;
        }
        out.push(h);
    }
    out
}

/// Every token an action's `(name, key, value)` triple contributes: the
/// action name, the attribute key, the full value, each `/`-delimited path
/// component of the value, plus the owning package's publisher and stem.
/// Averages roughly the ~8 tokens/action the distilled spec calls for.
fn tokens_for(action: &str, key: &str, value: &str, publisher: &str, stem: &str) -> Vec<String> {
    let mut out = vec![action.to_string(), key.to_string(), value.to_string()];
    if value.contains('/') {
        out.extend(value.split('/').filter(|s| !s.is_empty()).map(|s| s.to_string()));
    }
    if !publisher.is_empty() {
        out.push(publisher.to_string());
    }
    out.push(stem.to_string());
    out.dedup();
    out
}

fn hash_fmri_list(sorted_fmris: &[String]) -> String {
    let mut hasher = Sha256::new();
    for f in sorted_fmris {
        hasher.update(f.as_bytes());
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}

fn format_dict_line(token: &str, postings: &[Posting]) -> String {
    let entries: Vec<String> = postings
        .iter()
        .map(|p| {
            format!(
                "({},{},{},{},{},{})",
                p.doc_id, p.action, p.key, p.value_id, p.offset, p.variant_mask
            )
        })
        .collect();
    format!("{}!{{{}}}", token, entries.join(", "))
}

fn parse_dict_line(line: &str) -> std::result::Result<(String, Vec<Posting>), String> {
    let (token, rest) = line.split_once('!').ok_or("missing '!' separator")?;
    let rest = rest.trim();
    let rest = rest
        .strip_prefix('{')
        .and_then(|r| r.strip_suffix('}'))
        .ok_or("postings not wrapped in braces")?;
    let mut postings = Vec::new();
    for entry in rest.split("), (").map(|e| e.trim_matches(['(', ')', ' '])) {
        if entry.is_empty() {
            continue;
        }
        let parts: Vec<&str> = entry.splitn(6, ',').collect();
        if parts.len() != 6 {
            return Err(format!("malformed posting entry: {}", entry));
        }
        postings.push(Posting {
            doc_id: parts[0].trim().parse().map_err(|_| "bad doc_id")?,
            action: parts[1].trim().to_string(),
            key: parts[2].trim().to_string(),
            value_id: parts[3].trim().parse().map_err(|_| "bad value_id")?,
            offset: parts[4].trim().parse().map_err(|_| "bad offset")?,
            variant_mask: parts[5].trim().parse().map_err(|_| "bad variant_mask")?,
        });
    }
    Ok((token.to_string(), postings))
}

/// Ensure a boolean combination never mixes package-returning (`<q>`)
/// sub-queries with action-level ones, e.g. `<e*> AND e*`.
fn classify(query: &SearchQuery) -> Result<bool> {
    match query {
        SearchQuery::Term(_) | SearchQuery::Phrase(_) | SearchQuery::Field { .. } => Ok(false),
        SearchQuery::ReturnPackages(_) => Ok(true),
        SearchQuery::And(a, b) | SearchQuery::Or(a, b) => {
            let (ka, kb) = (classify(a)?, classify(b)?);
            if ka != kb {
                return Err(SearchError::Parse(
                    "cannot combine a package query (<...>) with an action query in the same boolean expression"
                        .to_string(),
                ));
            }
            Ok(ka)
        }
    }
}

// ---------------------------------------------------------------------
// Query parser
// ---------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    LParen,
    RParen,
    Lt,
    Gt,
    And,
    Or,
    Word(String),
    Phrase(String),
}

fn lex(input: &str) -> std::result::Result<Vec<Tok>, String> {
    let mut toks = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '(' => {
                toks.push(Tok::LParen);
                i += 1;
            }
            ')' => {
                toks.push(Tok::RParen);
                i += 1;
            }
            '<' => {
                toks.push(Tok::Lt);
                i += 1;
            }
            '>' => {
                toks.push(Tok::Gt);
                i += 1;
            }
            '"' => {
                let mut s = String::new();
                i += 1;
                let mut closed = false;
                while i < chars.len() {
                    if chars[i] == '\\' && i + 1 < chars.len() {
                        s.push(chars[i + 1]);
                        i += 2;
                        continue;
                    }
                    if chars[i] == '"' {
                        closed = true;
                        i += 1;
                        break;
                    }
                    s.push(chars[i]);
                    i += 1;
                }
                if !closed {
                    return Err("unterminated phrase".to_string());
                }
                toks.push(Tok::Phrase(s));
            }
            _ => {
                let mut s = String::new();
                while i < chars.len() && !matches!(chars[i], ' ' | '\t' | '\n' | '\r' | '(' | ')' | '<' | '>' | '"') {
                    if chars[i] == '\\' && i + 1 < chars.len() && chars[i + 1] == ':' {
                        s.push(':');
                        i += 2;
                        continue;
                    }
                    s.push(chars[i]);
                    i += 1;
                }
                if s == "AND" {
                    toks.push(Tok::And);
                } else if s == "OR" {
                    toks.push(Tok::Or);
                } else {
                    toks.push(Tok::Word(s));
                }
            }
        }
    }
    Ok(toks)
}

struct Parser {
    toks: Vec<Tok>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.pos)
    }

    fn next(&mut self) -> Option<Tok> {
        let t = self.toks.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn parse_or(&mut self) -> std::result::Result<SearchQuery, String> {
        let mut left = self.parse_and()?;
        while matches!(self.peek(), Some(Tok::Or)) {
            self.next();
            let right = self.parse_and()?;
            left = SearchQuery::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> std::result::Result<SearchQuery, String> {
        let mut left = self.parse_unary()?;
        while matches!(self.peek(), Some(Tok::And)) {
            self.next();
            let right = self.parse_unary()?;
            left = SearchQuery::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> std::result::Result<SearchQuery, String> {
        match self.next() {
            Some(Tok::LParen) => {
                let inner = self.parse_or()?;
                match self.next() {
                    Some(Tok::RParen) => Ok(inner),
                    _ => Err("expected closing ')'".to_string()),
                }
            }
            Some(Tok::Lt) => {
                let inner = self.parse_or()?;
                match self.next() {
                    Some(Tok::Gt) => Ok(SearchQuery::ReturnPackages(Box::new(inner))),
                    _ => Err("expected closing '>'".to_string()),
                }
            }
            Some(Tok::Phrase(p)) => Ok(SearchQuery::Phrase(p)),
            Some(Tok::Word(w)) => Ok(word_to_query(&w)),
            other => Err(format!("unexpected token: {:?}", other)),
        }
    }
}

fn word_to_query(word: &str) -> SearchQuery {
    let parts: Vec<&str> = word.split(':').collect();
    if parts.len() == 1 {
        return SearchQuery::Term(SearchTerm::new(word));
    }
    let mk = |s: &str| -> Option<SearchTerm> {
        if s.is_empty() {
            None
        } else {
            Some(SearchTerm::new(s))
        }
    };
    // Pad/truncate to exactly 4 positions: pkg:action:key:value.
    let mut p = parts.iter().map(|s| s.to_string()).collect::<Vec<_>>();
    while p.len() < 4 {
        p.push(String::new());
    }
    SearchQuery::Field {
        pkg: mk(&p[0]),
        action: mk(&p[1]),
        key: mk(&p[2]),
        value: mk(&p[3]),
    }
}

/// Parse a search query string per the grammar in the module docs:
/// terms, `"phrases"`, `pkg:action:key:value` field queries (any part may
/// be empty), `AND`/`OR`/parens, and `<q>` to return packages.
pub fn parse_query(input: &str) -> Result<SearchQuery> {
    let toks = lex(input).map_err(SearchError::Parse)?;
    if toks.is_empty() {
        return Err(SearchError::Parse("empty query".to_string()));
    }
    let mut parser = Parser { toks, pos: 0 };
    let ast = parser.parse_or().map_err(SearchError::Parse)?;
    if parser.pos != parser.toks.len() {
        return Err(SearchError::Parse("trailing tokens after query".to_string()));
    }
    classify(&ast)?;
    Ok(ast)
}

/// A small shell-style glob matcher supporting `*`, `?`, and `[...]`
/// (optionally negated with a leading `!`) character classes.
fn glob_match(pattern: &str, candidate: &str, case_sensitive: bool) -> bool {
    let (pat, cand): (Vec<char>, Vec<char>);
    if case_sensitive {
        pat = pattern.chars().collect();
        cand = candidate.chars().collect();
    } else {
        pat = pattern.to_lowercase().chars().collect();
        cand = candidate.to_lowercase().chars().collect();
    }
    glob_match_inner(&pat, &cand)
}

fn glob_match_inner(pat: &[char], cand: &[char]) -> bool {
    match pat.first() {
        None => cand.is_empty(),
        Some('*') => {
            glob_match_inner(&pat[1..], cand)
                || (!cand.is_empty() && glob_match_inner(pat, &cand[1..]))
        }
        Some('?') => !cand.is_empty() && glob_match_inner(&pat[1..], &cand[1..]),
        Some('[') => {
            let close = pat.iter().position(|&c| c == ']');
            let Some(close) = close else {
                return !cand.is_empty() && cand[0] == '[' && glob_match_inner(&pat[1..], &cand[1..]);
            };
            if cand.is_empty() {
                return false;
            }
            let mut class = &pat[1..close];
            let negate = class.first() == Some(&'!');
            if negate {
                class = &class[1..];
            }
            let in_class = class.contains(&cand[0]);
            if in_class == negate {
                return false;
            }
            glob_match_inner(&pat[close + 1..], &cand[1..])
        }
        Some(c) => !cand.is_empty() && cand[0] == *c && glob_match_inner(&pat[1..], &cand[1..]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{Attr, Dependency, File as FileAction};
    use crate::digest::{Digest, DigestAlgorithm, DigestSource};
    use crate::payload::Payload;
    use tempfile::tempdir;

    fn mk_manifest(fmri_str: &str, path: &str, hash: &str) -> Manifest {
        let mut m = Manifest::new();
        let mut attr = Attr::default();
        attr.key = "pkg.fmri".to_string();
        attr.values = vec![fmri_str.to_string()];
        m.attributes.push(attr);
        let mut f = FileAction::default();
        f.path = path.to_string();
        f.payload = Some(Payload {
            primary_identifier: Digest {
                hash: hash.to_string(),
                algorithm: DigestAlgorithm::SHA1,
                source: DigestSource::PrimaryPayloadHash,
            },
            ..Default::default()
        });
        m.files.push(f);
        m
    }

    #[test]
    fn build_then_exact_term_search_hits() {
        let dir = tempdir().unwrap();
        let index = SearchIndex::new(dir.path());
        let fmri = Fmri::parse("pkg://test/example_pkg@1.0,5.11-0:20200101T000000Z").unwrap();
        let manifest = mk_manifest(&fmri.to_string(), "bin/example_path", "a686473102ba73bd7920fc0ab1d97e00a24ed704");
        let manifests = vec![(fmri.clone(), manifest)];
        index.build(&manifests).unwrap();

        let outcome = index.search("example_path", &manifests).unwrap();
        assert!(outcome.diagnostics.is_empty());
        assert!(outcome.hits.iter().any(|h| h.action_raw.contains("path=bin/example_path")));
    }

    #[test]
    fn glob_term_matches_prefix() {
        let dir = tempdir().unwrap();
        let index = SearchIndex::new(dir.path());
        let fmri = Fmri::parse("pkg://test/example_pkg@1.0,5.11-0:20200101T000000Z").unwrap();
        let manifest = mk_manifest(&fmri.to_string(), "bin/example_path", "deadbeef");
        let manifests = vec![(fmri.clone(), manifest)];
        index.build(&manifests).unwrap();

        let outcome = index.search("example*", &manifests).unwrap();
        assert!(!outcome.hits.is_empty());
    }

    #[test]
    fn stale_hash_triggers_degraded_diagnostic() {
        let dir = tempdir().unwrap();
        let index = SearchIndex::new(dir.path());
        let fmri = Fmri::parse("pkg://test/example_pkg@1.0,5.11-0:20200101T000000Z").unwrap();
        let manifest = mk_manifest(&fmri.to_string(), "bin/example_path", "deadbeef");
        let manifests = vec![(fmri.clone(), manifest)];
        index.build(&manifests).unwrap();

        fs::write(dir.path().join(FULL_FMRI_LIST_HASH_FILE), "corrupted").unwrap();

        let outcome = index.search("example_path", &manifests).unwrap();
        assert!(outcome.diagnostics.contains(&SearchDiagnostic::IncorrectIndexFileHash));
        assert!(!outcome.hits.is_empty(), "degraded search should still find the hit by scanning");
    }

    #[test]
    fn missing_index_is_degraded_but_still_answers() {
        let dir = tempdir().unwrap();
        let index = SearchIndex::new(dir.path());
        let fmri = Fmri::parse("pkg://test/example_pkg@1.0,5.11-0:20200101T000000Z").unwrap();
        let manifest = mk_manifest(&fmri.to_string(), "bin/example_path", "deadbeef");
        let manifests = vec![(fmri.clone(), manifest)];

        let outcome = index.search("example_path", &manifests).unwrap();
        assert_eq!(outcome.diagnostics, vec![SearchDiagnostic::SlowSearchUsed]);
        assert!(!outcome.hits.is_empty());
    }

    #[test]
    fn fast_add_threshold_triggers_rebuild_recommendation() {
        let dir = tempdir().unwrap();
        let index = SearchIndex::new(dir.path());
        index.build(&[]).unwrap();
        for n in 0..(MAX_FAST_INDEXED_PKGS + 1) {
            let fmri = Fmri::parse(&format!(
                "pkg://test/pkg{n}@1.0,5.11-0:20200101T000000Z"
            ))
            .unwrap();
            index.add_incremental(&fmri, &Manifest::new()).unwrap();
        }
        assert!(index.pending_fast_add_count().unwrap() > MAX_FAST_INDEXED_PKGS);
    }

    #[test]
    fn field_query_matches_action_and_key() {
        let dir = tempdir().unwrap();
        let index = SearchIndex::new(dir.path());
        let fmri = Fmri::parse("pkg://test/example_pkg@1.0,5.11-0:20200101T000000Z").unwrap();
        let manifest = mk_manifest(&fmri.to_string(), "bin/example_path", "deadbeef");
        let manifests = vec![(fmri.clone(), manifest)];
        index.build(&manifests).unwrap();

        let outcome = index.search("pkg:file:path:bin/example_path", &manifests).unwrap();
        assert!(!outcome.hits.is_empty());

        let outcome = index.search("pkg:dir:path:bin/example_path", &manifests).unwrap();
        assert!(outcome.hits.is_empty());
    }

    #[test]
    fn return_packages_wrapper_dedups_to_one_hit_per_package() {
        let dir = tempdir().unwrap();
        let index = SearchIndex::new(dir.path());
        let fmri = Fmri::parse("pkg://test/example_pkg@1.0,5.11-0:20200101T000000Z").unwrap();
        let mut manifest = mk_manifest(&fmri.to_string(), "bin/example_path", "deadbeef");
        let mut f2 = crate::actions::File::default();
        f2.path = "bin/example_path2".to_string();
        manifest.files.push(f2);
        let manifests = vec![(fmri.clone(), manifest)];
        index.build(&manifests).unwrap();

        let outcome = index.search("<example*>", &manifests).unwrap();
        assert_eq!(outcome.hits.len(), 1);
        assert_eq!(outcome.hits[0].fmri, fmri);
    }

    #[test]
    fn mixed_package_and_action_boolean_is_rejected() {
        let err = parse_query("<e*> AND e*");
        assert!(err.is_err());
    }

    #[test]
    fn dependency_satisfied_by_fmri_and_type_tokens() {
        let dir = tempdir().unwrap();
        let index = SearchIndex::new(dir.path());
        let fmri = Fmri::parse("pkg://test/consumer@1.0,5.11-0:20200101T000000Z").unwrap();
        let mut manifest = Manifest::new();
        let mut attr = Attr::default();
        attr.key = "pkg.fmri".to_string();
        attr.values = vec![fmri.to_string()];
        manifest.attributes.push(attr);
        let mut dep = Dependency::default();
        dep.fmri = Some(Fmri::parse("pkg:/library/zlib@1.2").unwrap());
        dep.dependency_type = "require".to_string();
        manifest.dependencies.push(dep);
        let manifests = vec![(fmri.clone(), manifest)];
        index.build(&manifests).unwrap();

        let outcome = index.search("zlib", &manifests).unwrap();
        assert!(!outcome.hits.is_empty());
    }
}
