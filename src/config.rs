// src/config.rs

//! Path resolution and the device/flavour profile record.
//!
//! The interactive config editor is out of scope (spec §1); this module is
//! the record type and validator both it and the thin CLI would call
//! through — modeled on `original_source/config/__init__.py` and
//! `config/profile.py`, expressed the teacher's way: a `serde`-derived
//! record with `#[serde(default)]` on optional fields (see
//! `recipe/format.rs`'s `Recipe` in the teacher for the same idiom).

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};

/// Base directories referenced throughout spec §6's on-disk layout.
#[derive(Debug, Clone, Deserialize)]
pub struct KupferPaths {
    #[serde(default = "default_pkgbuilds")]
    pub pkgbuilds: PathBuf,
    #[serde(default = "default_packages")]
    pub packages: PathBuf,
    #[serde(default = "default_chroots")]
    pub chroots: PathBuf,
    #[serde(default = "default_pacman_cache")]
    pub pacman_cache: PathBuf,
}

fn default_pkgbuilds() -> PathBuf {
    PathBuf::from("/pkgbuilds")
}
fn default_packages() -> PathBuf {
    PathBuf::from("/packages")
}
fn default_chroots() -> PathBuf {
    PathBuf::from("/chroots")
}
fn default_pacman_cache() -> PathBuf {
    PathBuf::from("/pacman")
}

impl Default for KupferPaths {
    fn default() -> Self {
        KupferPaths {
            pkgbuilds: default_pkgbuilds(),
            packages: default_packages(),
            chroots: default_chroots(),
            pacman_cache: default_pacman_cache(),
        }
    }
}

impl KupferPaths {
    pub fn pkgbuild_dir(&self, relative: &str) -> PathBuf {
        self.pkgbuilds.join(relative)
    }

    pub fn channel_dir(&self, arch: &str, channel: &str) -> PathBuf {
        self.packages.join(arch).join(channel)
    }

    pub fn chroot_dir(&self, kind: &str, name: &str) -> PathBuf {
        self.chroots.join(format!("{kind}_{name}"))
    }

    pub fn pacman_cache_dir(&self, arch: &str) -> PathBuf {
        self.pacman_cache.join(arch)
    }
}

/// The active device/flavour selection. Both fields are optional on disk
/// (forward-compat with a partially-configured profile) but required at
/// operation entry — missing either raises `Error::ConfigIncomplete`
/// rather than silently defaulting, per spec §7.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Profile {
    pub device: Option<String>,
    pub flavour: Option<String>,
    #[serde(default)]
    pub paths: KupferPaths,
}

impl Profile {
    pub fn require_device(&self) -> Result<&str> {
        self.device.as_deref().ok_or_else(|| Error::ConfigIncomplete {
            field: "device".to_string(),
        })
    }

    pub fn require_flavour(&self) -> Result<&str> {
        self.flavour.as_deref().ok_or_else(|| Error::ConfigIncomplete {
            field: "flavour".to_string(),
        })
    }
}

/// Top-level on-disk config: a table of named profiles plus which one is
/// active, mirroring `original_source/config/__init__.py`'s `profiles` +
/// `profile` keys.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct KupferConfig {
    pub profile: Option<String>,
    #[serde(default)]
    pub profiles: std::collections::HashMap<String, Profile>,
}

impl KupferConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        toml::from_str(&text).map_err(|e| Error::Toml(e.to_string()))
    }

    pub fn active_profile(&self) -> Result<&Profile> {
        let name = self.profile.as_deref().ok_or_else(|| Error::ConfigIncomplete {
            field: "profile".to_string(),
        })?;
        self.profiles.get(name).ok_or_else(|| Error::ConfigIncomplete {
            field: format!("profiles.{name}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_device_is_config_incomplete() {
        let profile = Profile::default();
        let err = profile.require_device().unwrap_err();
        assert!(matches!(err, Error::ConfigIncomplete { field } if field == "device"));
    }

    #[test]
    fn present_device_is_returned() {
        let profile = Profile {
            device: Some("oneplus-enchilada".to_string()),
            ..Default::default()
        };
        assert_eq!(profile.require_device().unwrap(), "oneplus-enchilada");
    }

    #[test]
    fn default_paths_match_spec_layout() {
        let paths = KupferPaths::default();
        assert_eq!(paths.pkgbuild_dir("main/foo"), PathBuf::from("/pkgbuilds/main/foo"));
        assert_eq!(
            paths.channel_dir("aarch64", "main"),
            PathBuf::from("/packages/aarch64/main")
        );
    }
}
