// src/session.rs

//! Scoped session object (spec §9's "at-exit cleanup" and "global mutable
//! caches" redesign notes): owns the mount ledger (via the chroot
//! registry each chroot's own `active_mounts` belongs to), the temp-dir
//! ledger, the recipe index, and the emulation-enabled map the source
//! keeps as process-wide state. `teardown()` replaces the at-exit hook:
//! it deactivates every chroot (unmounting LIFO within each) and drops
//! every scoped temp dir.

use std::collections::HashMap;

use tracing::warn;

use crate::chroot::ChrootRegistry;
use crate::config::KupferPaths;
use crate::distro::Arch;
use crate::error::Result;
use crate::fsops::TempDir;
use crate::recipe::{discover_pkgbuilds, RecipeIndex};

/// Everything a `build_packages` run needs to carry between calls instead
/// of reading it back off ambient process state: the chroot registry
/// (and through it, every chroot's mount ledger), the discovered recipe
/// index, scoped temp dirs, and the emulation idempotency cache.
pub struct Session {
    pub paths: KupferPaths,
    pub host_arch: Arch,
    pub chroots: ChrootRegistry,
    pub recipes: RecipeIndex,
    temp_dirs: Vec<TempDir>,
    emulation_registered: HashMap<Arch, bool>,
}

impl Session {
    pub fn new(paths: KupferPaths, host_arch: Arch) -> Self {
        Session {
            paths,
            host_arch,
            chroots: ChrootRegistry::default(),
            recipes: RecipeIndex::default(),
            temp_dirs: Vec::new(),
            emulation_registered: HashMap::new(),
        }
    }

    /// Populates `recipes` by scanning the configured pkgbuilds tree
    /// (spec §4.6).
    pub fn discover(&mut self, lazy: bool) -> Result<()> {
        self.recipes = discover_pkgbuilds(&self.paths.pkgbuilds, lazy)?;
        Ok(())
    }

    /// Hands out a fresh scoped temp dir, keeping it alive (and tracked
    /// for teardown) for the remainder of the session.
    pub fn scoped_temp_dir(&mut self) -> Result<&std::path::Path> {
        self.temp_dirs.push(TempDir::new()?);
        Ok(self.temp_dirs.last().expect("just pushed").path())
    }

    /// Idempotency cache for `orchestrator::build_enable_qemu_binfmt`
    /// (spec §4.13): a process-wide `HashMap` in the source becomes this
    /// field, queried and mutated only through these two accessors.
    pub fn is_emulation_registered(&self, arch: Arch) -> bool {
        self.emulation_registered.get(&arch).copied().unwrap_or(false)
    }

    pub fn mark_emulation_registered(&mut self, arch: Arch) {
        self.emulation_registered.insert(arch, true);
    }

    /// Deactivates every held chroot (each one's own `deactivate` already
    /// unmounts in reverse-acquisition order) and drops every scoped temp
    /// dir, replacing the at-exit hook the source installs per mount/temp
    /// dir with a single explicit drain.
    pub fn teardown(&mut self) {
        for name in self.chroots.names() {
            if let Some(chroot) = self.chroots.get_mut(&name) {
                if chroot.active {
                    if let Err(e) = chroot.deactivate(false) {
                        warn!(chroot = %name, error = %e, "failed to deactivate chroot during session teardown");
                    }
                }
            }
        }
        self.temp_dirs.clear();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emulation_cache_is_per_arch() {
        let mut session = Session::new(KupferPaths::default(), Arch::X86_64);
        assert!(!session.is_emulation_registered(Arch::Aarch64));
        session.mark_emulation_registered(Arch::Aarch64);
        assert!(session.is_emulation_registered(Arch::Aarch64));
        assert!(!session.is_emulation_registered(Arch::Armv7h));
    }

    #[test]
    fn scoped_temp_dir_persists_until_teardown() {
        let mut session = Session::new(KupferPaths::default(), Arch::X86_64);
        let path = session.scoped_temp_dir().unwrap().to_path_buf();
        assert!(path.exists());
        session.teardown();
        assert!(!path.exists());
    }
}
