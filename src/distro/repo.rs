// src/distro/repo.rs

//! Repo abstraction and binary package records (spec §4.4).
//!
//! Grounded in the teacher's `repository/sync.rs` control flow (format
//! detection, native-then-fallback sync) and `packages/arch.rs`'s
//! tar+compression decoding, but dropping `rusqlite` entirely: package
//! state lives in an in-memory table plus the on-disk repo-db tarball,
//! per SPEC_FULL.md §G.

use std::collections::HashMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tracing::{debug, warn};

use super::desc::{self, DescBlock};
use crate::error::{Error, Result};

/// A package record parsed out of a repo database. `remote()` determines
/// whether `url` (when present) is a `file://` path or an HTTPS URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryPackageRecord {
    pub name: String,
    pub version: String,
    pub arch: String,
    pub filename: String,
    pub channel: String,
    pub url: Option<String>,
    pub sha256sum: Option<String>,
}

impl BinaryPackageRecord {
    pub fn is_remote(&self) -> bool {
        matches!(&self.url, Some(u) if !u.starts_with("file://"))
    }

    fn from_desc(block: &DescBlock, channel: &str) -> Option<Self> {
        Some(BinaryPackageRecord {
            name: block.name()?.to_string(),
            version: block.version()?.to_string(),
            arch: block.arch().unwrap_or("any").to_string(),
            filename: block.filename()?.to_string(),
            channel: channel.to_string(),
            url: None,
            sha256sum: block.sha256sum().map(|s| s.to_string()),
        })
    }
}

/// Where a repo's package database physically lives.
#[derive(Debug, Clone)]
pub enum RepoLocation {
    /// Resolves to a filesystem directory.
    Local(PathBuf),
    /// Resolves to an HTTPS base URL.
    Remote(String),
}

/// One channel's repository for one target architecture.
pub struct Repo {
    pub name: String,
    pub arch: String,
    /// URL template with `$arch`/`$repo` placeholders (spec §4.4/§6).
    pub url_template: String,
    pub location: RepoLocation,
    pub packages: HashMap<String, BinaryPackageRecord>,
    pub scanned: bool,
}

impl Repo {
    pub fn new_local(name: &str, arch: &str, dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Repo {
            name: name.to_string(),
            arch: arch.to_string(),
            url_template: format!("file://{}", dir.display()),
            location: RepoLocation::Local(dir),
            packages: HashMap::new(),
            scanned: false,
        }
    }

    pub fn new_remote(name: &str, arch: &str, url_template: &str) -> Self {
        let resolved = substitute_template(url_template, arch, name);
        Repo {
            name: name.to_string(),
            arch: arch.to_string(),
            url_template: url_template.to_string(),
            location: RepoLocation::Remote(resolved),
            packages: HashMap::new(),
            scanned: false,
        }
    }

    fn db_filename(&self) -> String {
        format!("{}.db.tar.gz", self.name)
    }

    /// Downloads (remote) or reads (local) the repo database — a gzipped
    /// tar of per-package `desc` files — and populates the package table.
    pub fn scan(&mut self) -> Result<()> {
        let bytes = match &self.location {
            RepoLocation::Local(dir) => {
                let db_path = dir.join(self.db_filename());
                if !db_path.exists() {
                    debug!(path = %db_path.display(), "no local repo db yet, treating as empty");
                    self.scanned = true;
                    return Ok(());
                }
                fs::read(&db_path).map_err(|e| Error::io(&db_path, e))?
            }
            RepoLocation::Remote(base) => {
                let url = format!("{base}/{}", self.db_filename());
                fetch_bytes(&url)?
            }
        };

        let decoder = GzDecoder::new(bytes.as_slice());
        let mut archive = tar::Archive::new(decoder);
        let entries = archive
            .entries()
            .map_err(|e| Error::io(PathBuf::from(self.db_filename()), e))?;

        for entry in entries {
            let mut entry = entry.map_err(|e| Error::io(PathBuf::from(self.db_filename()), e))?;
            let path = entry.path().map_err(|e| Error::io(PathBuf::from("desc"), e))?.into_owned();
            if path.file_name().and_then(|f| f.to_str()) != Some("desc") {
                continue;
            }
            let mut text = String::new();
            entry
                .read_to_string(&mut text)
                .map_err(|e| Error::io(&path, e))?;
            let block = desc::parse(&text);
            match BinaryPackageRecord::from_desc(&block, &self.name) {
                Some(mut record) => {
                    record.url = Some(self.resolve_url(&record.filename));
                    self.packages.insert(record.name.clone(), record);
                }
                None => warn!(path = %path.display(), "desc block missing required fields, skipping"),
            }
        }
        self.scanned = true;
        Ok(())
    }

    /// `file://{dir}/{filename}` for a local package, `{base}/{filename}`
    /// for a remote one.
    pub fn resolve_url(&self, filename: &str) -> String {
        match &self.location {
            RepoLocation::Local(dir) => format!("file://{}/{}", dir.display(), filename),
            RepoLocation::Remote(base) => format!("{base}/{filename}"),
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self.location, RepoLocation::Local(_))
    }
}

fn substitute_template(template: &str, arch: &str, repo: &str) -> String {
    template.replace("$arch", arch).replace("$repo", repo)
}

fn fetch_bytes(url: &str) -> Result<Vec<u8>> {
    let response = reqwest::blocking::get(url).map_err(|e| Error::NetworkFailure {
        url: url.to_string(),
        source: e,
    })?;
    let response = response.error_for_status().map_err(|e| Error::NetworkFailure {
        url: url.to_string(),
        source: e,
    })?;
    response.bytes().map(|b| b.to_vec()).map_err(|e| Error::NetworkFailure {
        url: url.to_string(),
        source: e,
    })
}

/// Groups one repo per channel for one architecture.
pub struct Distro {
    pub arch: String,
    /// Insertion order is preserved — `get_pacman_conf` must emit channels
    /// in the same order they were added.
    pub channels: Vec<Repo>,
}

impl Distro {
    pub fn new(arch: &str) -> Self {
        Distro {
            arch: arch.to_string(),
            channels: Vec::new(),
        }
    }

    pub fn add_channel(&mut self, repo: Repo) {
        self.channels.push(repo);
    }

    pub fn channel(&self, name: &str) -> Option<&Repo> {
        self.channels.iter().find(|r| r.name == name)
    }

    pub fn channel_mut(&mut self, name: &str) -> Option<&mut Repo> {
        self.channels.iter_mut().find(|r| r.name == name)
    }

    /// Emits a pacman-conf fragment: one `[options]` section, one section
    /// per channel with `Server = <url>` lines, channel order preserved.
    /// When `for_host` is set, local `file://` URLs are rewritten to plain
    /// absolute paths (usable outside a chroot).
    pub fn get_pacman_conf(&self, for_host: bool) -> String {
        let mut out = String::new();
        out.push_str("[options]\n");
        out.push_str(&format!("Architecture = {}\n\n", self.arch));
        for repo in &self.channels {
            out.push_str(&format!("[{}]\n", repo.name));
            let url = substitute_template(&repo.url_template, &self.arch, &repo.name);
            let url = if for_host {
                url.strip_prefix("file://").map(|p| p.to_string()).unwrap_or(url)
            } else {
                url
            };
            out.push_str(&format!("Server = {url}\n\n"));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pacman_conf_preserves_channel_order_and_placeholders() {
        let mut distro = Distro::new("aarch64");
        distro.add_channel(Repo::new_local("main", "aarch64", "/packages/aarch64/main"));
        distro.add_channel(Repo::new_remote(
            "cross",
            "aarch64",
            "https://mirror.example/$repo/$arch",
        ));
        let conf = distro.get_pacman_conf(false);
        let main_idx = conf.find("[main]").unwrap();
        let cross_idx = conf.find("[cross]").unwrap();
        assert!(main_idx < cross_idx);
        assert!(conf.contains("Server = file:///packages/aarch64/main"));
        assert!(conf.contains("Server = https://mirror.example/cross/aarch64"));
    }

    #[test]
    fn for_host_rewrites_local_urls_to_plain_paths() {
        let mut distro = Distro::new("x86_64");
        distro.add_channel(Repo::new_local("main", "x86_64", "/packages/x86_64/main"));
        let conf = distro.get_pacman_conf(true);
        assert!(conf.contains("Server = /packages/x86_64/main"));
        assert!(!conf.contains("file://"));
    }

    #[test]
    fn resolve_url_local_vs_remote() {
        let local = Repo::new_local("main", "x86_64", "/packages/x86_64/main");
        assert_eq!(
            local.resolve_url("foo-1.0-1-x86_64.pkg.tar.zst"),
            "file:///packages/x86_64/main/foo-1.0-1-x86_64.pkg.tar.zst"
        );
        let remote = Repo::new_remote("main", "x86_64", "https://mirror.example/$repo/$arch");
        assert_eq!(
            remote.resolve_url("foo-1.0-1-x86_64.pkg.tar.zst"),
            "https://mirror.example/main/x86_64/foo-1.0-1-x86_64.pkg.tar.zst"
        );
    }

    #[test]
    fn binary_package_record_remote_detection() {
        let local_pkg = BinaryPackageRecord {
            name: "foo".into(),
            version: "1.0-1".into(),
            arch: "x86_64".into(),
            filename: "foo-1.0-1-x86_64.pkg.tar.zst".into(),
            channel: "main".into(),
            url: Some("file:///packages/x86_64/main/foo-1.0-1-x86_64.pkg.tar.zst".into()),
            sha256sum: None,
        };
        assert!(!local_pkg.is_remote());
        let remote_pkg = BinaryPackageRecord {
            url: Some("https://mirror.example/foo-1.0-1-x86_64.pkg.tar.zst".into()),
            ..local_pkg
        };
        assert!(remote_pkg.is_remote());
    }
}
