// src/freshness/mod.rs

//! Artifact Freshness (spec §4.10): decides whether a package is already
//! built for an architecture before the orchestrator dispatches a build.
//!
//! Grounded in `original_source/packages/build.py`'s
//! `check_package_version_built`, `try_download_package`, and
//! `strip_compression_extension`. The DB-entry verification step is split
//! out as `verify_db_entry` so it can be unit-tested without a real
//! `repo-add`-maintained database on disk.

use std::collections::BTreeSet;
use std::path::PathBuf;

use tracing::{debug, info};

use crate::config::KupferPaths;
use crate::distro::{Arch, BinaryPackageRecord, Repo};
use crate::error::{Error, Result};
use crate::fsops;
use crate::repoindex;

/// `<name>-<version>-<arch-or-any>.pkg.tar.zst` per spec §6's filename
/// grammar, always emitted with the `zst` extension — the freshness
/// protocol itself treats compression as interchangeable. `arch` is the
/// build target; it's only used when `arches` isn't the arch-independent
/// `{any}` set.
pub fn expected_filename(name: &str, version: &str, arches: &BTreeSet<Arch>, arch: Arch) -> String {
    let label = if is_any_arch(arches) { Arch::Any.as_str() } else { arch.as_str() };
    format!("{name}-{version}-{label}.pkg.tar.zst")
}

fn is_any_arch(arches: &BTreeSet<Arch>) -> bool {
    arches.len() == 1 && arches.contains(&Arch::Any)
}

/// Checks the local DB's claim about `name` against the filesystem:
/// matching version, matching (or `any`) architecture, matching filename
/// stem, the file present on disk, and its SHA-256 equal to the DB's
/// recorded checksum. Returns the verified file's path, or the reason it
/// didn't satisfy freshness.
fn verify_db_entry(
    binpkg: &BinaryPackageRecord,
    version: &str,
    arch: Arch,
    any_arch: bool,
    filename_stripped: &str,
) -> std::result::Result<PathBuf, String> {
    if binpkg.version != version {
        return Err(format!("version differs: db has {}, expected {version}", binpkg.version));
    }
    let expected_arch = if any_arch { "any" } else { arch.as_str() };
    if binpkg.arch != expected_arch {
        return Err(format!("wrong architecture: db has {}, expected {expected_arch}", binpkg.arch));
    }
    if repoindex::strip_compression_extension(&binpkg.filename) != filename_stripped {
        return Err(format!(
            "filename {} doesn't match expected stem {filename_stripped}",
            binpkg.filename
        ));
    }
    let url = binpkg.url.as_deref().ok_or_else(|| "db entry has no resolved url".to_string())?;
    let path_str = url.strip_prefix("file://").ok_or_else(|| "db entry url is not local".to_string())?;
    let path = PathBuf::from(path_str);
    if !path.exists() {
        return Err(format!("file {} missing from disk", path.display()));
    }
    let checksum = binpkg.sha256sum.as_deref().ok_or_else(|| "db entry has no checksum".to_string())?;
    let actual = fsops::sha256sum(&path).map_err(|e| e.to_string())?;
    if actual != checksum {
        return Err("checksum doesn't match db entry".to_string());
    }
    Ok(path)
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

/// Attempts an HTTPS fetch of `name`@`version` from `remote_url_template`,
/// accepting only an exact filename match or one that differs only by
/// compression extension. Network failures are logged and treated as "not
/// found" per spec §7 ("Network-failure during optional downloads: logged
/// ... not fatal").
fn try_download_package(
    paths: &KupferPaths,
    channel: &str,
    arch: Arch,
    name: &str,
    version: &str,
    filename: &str,
    remote_url_template: &str,
) -> Option<PathBuf> {
    let mut remote = Repo::new_remote(channel, arch.as_str(), remote_url_template);
    if let Err(e) = remote.scan() {
        debug!(name, error = %e, "remote repo scan failed, building instead");
        return None;
    }
    let binpkg = remote.packages.get(name)?;
    if binpkg.version != version {
        debug!(name, local = version, remote = %binpkg.version, "remote version differs, building instead");
        return None;
    }
    let filename_stripped = repoindex::strip_compression_extension(filename);
    if binpkg.filename != filename && repoindex::strip_compression_extension(&binpkg.filename) != filename_stripped {
        debug!(name, local = filename, remote = %binpkg.filename, "remote filename doesn't match, building instead");
        return None;
    }
    let url = binpkg.url.clone()?;
    let bytes = match fetch_bytes(&url) {
        Ok(bytes) => bytes,
        Err(e) => {
            debug!(name, %url, error = %e, "download failed, building instead");
            return None;
        }
    };
    let dest_dir = paths.channel_dir(arch.as_str(), channel);
    if fsops::ensure_dir(&dest_dir, None, None).is_err() {
        return None;
    }
    let dest = dest_dir.join(&binpkg.filename);
    match fsops::write_file(&dest, &bytes, None, None) {
        Ok(()) => {
            info!(name, path = %dest.display(), "downloaded package from https mirror");
            Some(dest)
        }
        Err(e) => {
            debug!(name, error = %e, "failed to write downloaded package");
            None
        }
    }
}

/// `check_package_version_built(recipe, arch, try_download) → bool` (spec
/// §4.10). Implements the full decision tree: DB-first, then on-disk
/// stem probe with compression-extension fallback, then any-arch
/// cross-channel lookup, then (if `try_download`) an HTTPS fetch, then
/// any-arch propagation to sibling channels. Idempotent: a repeated call
/// against unchanged state makes no filesystem writes beyond re-scanning
/// the (already current) local DB.
pub fn check_package_version_built(
    paths: &KupferPaths,
    name: &str,
    version: &str,
    arches: &BTreeSet<Arch>,
    channel: &str,
    arch: Arch,
    try_download: bool,
    remote_url_template: Option<&str>,
) -> Result<bool> {
    info!(name, %arch, "checking freshness");
    repoindex::init_local_repo(paths, channel, arch)?;

    let any_arch = is_any_arch(arches);
    let filename = expected_filename(name, version, arches, arch);
    let filename_stripped = repoindex::strip_compression_extension(&filename);
    if !filename_stripped.ends_with(".pkg.tar") {
        return Err(Error::Other(format!("{name}: stripped filename has unknown extension: {filename}")));
    }

    let mut local_repo = Repo::new_local(channel, arch.as_str(), paths.channel_dir(arch.as_str(), channel));
    local_repo.scan()?;

    let mut missing = true;
    let mut resolved_file: Option<PathBuf> = None;
    let mut resolved_filename = filename.clone();

    if let Some(binpkg) = local_repo.packages.get(name) {
        match verify_db_entry(binpkg, version, arch, any_arch, &filename_stripped) {
            Ok(path) => {
                debug!(name, "found in local db with matching checksum");
                missing = false;
                resolved_filename = binpkg.filename.clone();
                resolved_file = Some(path);
            }
            Err(reason) => debug!(name, reason, "local db entry does not satisfy freshness"),
        }
    }

    for ext in ["xz", "zst"] {
        if !missing {
            break;
        }
        let channel_dir = paths.channel_dir(arch.as_str(), channel);
        let mut candidate = channel_dir.join(format!("{filename_stripped}.{ext}"));

        if !candidate.exists() && any_arch {
            let same_channel = channel_dir.join(&filename);
            if same_channel.exists() {
                candidate = same_channel;
            } else {
                for sibling in Arch::ALL_REAL {
                    if sibling == arch {
                        continue;
                    }
                    let other = paths.channel_dir(sibling.as_str(), channel).join(&filename);
                    if other.exists() {
                        info!(name, %sibling, "any-arch package found in sibling channel");
                        candidate = other;
                        break;
                    }
                }
            }
        }

        if !candidate.exists() && try_download {
            if let Some(template) = remote_url_template {
                if let Some(downloaded) = try_download_package(paths, channel, arch, name, version, &filename, template) {
                    candidate = downloaded;
                }
            }
        }

        if candidate.exists() {
            missing = false;
            resolved_filename = candidate
                .file_name()
                .map(|f| f.to_string_lossy().into_owned())
                .unwrap_or(filename.clone());
            resolved_file = Some(candidate.clone());
            repoindex::add_file_to_repo(paths, &candidate, channel, arch, false)?;
            local_repo.scan()?;
        }
    }

    if any_arch && !missing {
        let file = resolved_file.as_ref().expect("missing=false implies file resolved");
        for sibling in Arch::ALL_REAL {
            if sibling == arch {
                continue;
            }
            let copy_target = paths.channel_dir(sibling.as_str(), channel).join(&resolved_filename);
            if !copy_target.exists() {
                info!(name, %sibling, "propagating any-arch package to sibling channel");
                repoindex::add_file_to_repo(paths, file, channel, sibling, false)?;
            }
        }
    }

    Ok(!missing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn expected_filename_any_arch_ignores_build_target() {
        let arches = BTreeSet::from([Arch::Any]);
        assert_eq!(
            expected_filename("foo", "1.0-1", &arches, Arch::Aarch64),
            "foo-1.0-1-any.pkg.tar.zst"
        );
    }

    #[test]
    fn expected_filename_real_arch_uses_build_target() {
        let arches = BTreeSet::from([Arch::X86_64, Arch::Aarch64]);
        assert_eq!(
            expected_filename("foo", "1.0-1", &arches, Arch::Aarch64),
            "foo-1.0-1-aarch64.pkg.tar.zst"
        );
    }

    #[test]
    fn verify_db_entry_rejects_version_mismatch() {
        let record = BinaryPackageRecord {
            name: "foo".into(),
            version: "1.0-1".into(),
            arch: "x86_64".into(),
            filename: "foo-1.0-1-x86_64.pkg.tar.zst".into(),
            channel: "main".into(),
            url: Some("file:///tmp/foo-1.0-1-x86_64.pkg.tar.zst".into()),
            sha256sum: Some("deadbeef".into()),
        };
        let err = verify_db_entry(&record, "2.0-1", Arch::X86_64, false, "foo-2.0-1-x86_64.pkg.tar").unwrap_err();
        assert!(err.contains("version differs"));
    }

    #[test]
    fn verify_db_entry_accepts_matching_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("foo-1.0-1-x86_64.pkg.tar.zst");
        fs::write(&file, b"package contents").unwrap();
        let checksum = fsops::sha256sum(&file).unwrap();
        let record = BinaryPackageRecord {
            name: "foo".into(),
            version: "1.0-1".into(),
            arch: "x86_64".into(),
            filename: "foo-1.0-1-x86_64.pkg.tar.zst".into(),
            channel: "main".into(),
            url: Some(format!("file://{}", file.display())),
            sha256sum: Some(checksum),
        };
        let resolved = verify_db_entry(&record, "1.0-1", Arch::X86_64, false, "foo-1.0-1-x86_64.pkg.tar").unwrap();
        assert_eq!(resolved, file);
    }

    #[test]
    fn verify_db_entry_rejects_checksum_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("foo-1.0-1-x86_64.pkg.tar.zst");
        fs::write(&file, b"package contents").unwrap();
        let record = BinaryPackageRecord {
            name: "foo".into(),
            version: "1.0-1".into(),
            arch: "x86_64".into(),
            filename: "foo-1.0-1-x86_64.pkg.tar.zst".into(),
            channel: "main".into(),
            url: Some(format!("file://{}", file.display())),
            sha256sum: Some("0000000000000000000000000000000000000000000000000000000000000".into()),
        };
        let err = verify_db_entry(&record, "1.0-1", Arch::X86_64, false, "foo-1.0-1-x86_64.pkg.tar").unwrap_err();
        assert!(err.contains("checksum"));
    }
}
