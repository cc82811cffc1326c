// src/chroot/mod.rs

//! Chroot lifecycle and mount-graph bookkeeping (spec §4.7).
//!
//! Grounded in `original_source/chroot/abstract.py`'s `Chroot`: every
//! mount this crate performs inside a chroot is recorded in
//! `active_mounts`, the single source of truth `initialize`/`activate`/
//! `deactivate` consult before calling the external `mount`/`umount`
//! tools (via [`crate::fsops`]) — never the kernel mount table directly,
//! except to detect a leak. `uuid` replaces the Python's `uuid4()`
//! instance tag with the `uuid` crate, matching how the teacher tags
//! ephemeral resources (see `repository/sync.rs`'s transaction ids).

pub mod build;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::distro::Arch;
use crate::error::{Error, Result};
use crate::exec::{Exec, RunAs, ScriptBody};
use crate::fsops::{self, MountOptions};

/// `/dev`, `/sys`, `/proc` bind/virtfs mounts every active chroot carries
/// (spec §4.7's "basic mounts"), mirroring
/// `original_source/chroot/helpers.py`'s `BASIC_MOUNTS` (not present in
/// the retrieval pack; reconstructed from its call sites in
/// `abstract.py::activate`/`deactivate_core`).
struct BasicMount {
    dest: &'static str,
    src: &'static str,
    fs_type: Option<&'static str>,
    options: &'static [&'static str],
}

const BASIC_MOUNTS: &[BasicMount] = &[
    BasicMount { dest: "dev", src: "/dev", fs_type: None, options: &[] },
    BasicMount { dest: "dev/pts", src: "devpts", fs_type: Some("devpts"), options: &[] },
    BasicMount { dest: "sys", src: "/sys", fs_type: None, options: &[] },
    BasicMount { dest: "proc", src: "proc", fs_type: Some("proc"), options: &[] },
];

fn make_abs_path(relative: &str) -> String {
    format!("/{}", relative.trim_start_matches('/'))
}

pub fn base_chroot_name(arch: Arch) -> String {
    format!("base_{arch}")
}

/// A chroot rooted at `<chroots_dir>/<name>` for `arch`. `active_mounts`
/// holds pseudo-absolute (leading-`/`) relative paths — the single source
/// of truth `mount`/`umount` consult before trusting or distrusting the
/// kernel's own mount table.
pub struct Chroot {
    pub uuid: Uuid,
    pub name: String,
    pub arch: Arch,
    pub root: PathBuf,
    pub initialized: bool,
    pub active: bool,
    pub active_mounts: Vec<String>,
    pub base_packages: Vec<String>,
}

impl Chroot {
    pub fn new(name: impl Into<String>, arch: Arch, root: impl Into<PathBuf>) -> Self {
        Chroot {
            uuid: Uuid::new_v4(),
            name: name.into(),
            arch,
            root: root.into(),
            initialized: false,
            active: false,
            active_mounts: Vec::new(),
            base_packages: vec!["base".into(), "base-devel".into(), "git".into()],
        }
    }

    pub fn get_path(&self, relative: &str) -> PathBuf {
        self.root.join(relative.trim_start_matches('/'))
    }

    /// Binds or mounts `absolute_source` at `relative_destination`, raising
    /// [`Error::MountLeaked`] if the kernel already shows a mount there
    /// that `active_mounts` doesn't know about — spec §4.7's mount-graph
    /// consistency invariant.
    pub fn mount(&mut self, absolute_source: &str, relative_destination: &str, opts: MountOptions) -> Result<PathBuf> {
        let relative = relative_destination.trim_start_matches('/');
        let absolute_destination = self.get_path(relative);
        let pseudo_absolute = make_abs_path(relative);

        if fsops::is_mounted(&absolute_destination) {
            if !self.active_mounts.contains(&pseudo_absolute) {
                return Err(Error::MountLeaked {
                    path: absolute_destination,
                    detail: format!("{}: mount point active but untracked", self.name),
                });
            }
            debug!(chroot = %self.name, path = %absolute_destination.display(), "already mounted, skipping");
            return Ok(absolute_destination);
        }
        if self.active_mounts.contains(&pseudo_absolute) {
            warn!(chroot = %self.name, path = %absolute_destination.display(), "tracked mount is not actually mounted");
        }
        if Path::new(absolute_source).is_dir() {
            fsops::ensure_dir(&absolute_destination, None, None)?;
        }
        let result = fsops::mount(absolute_source, &absolute_destination, opts)?;
        if !result.status_success {
            return Err(Error::subprocess_failed(
                "mount",
                &[absolute_source.to_string(), absolute_destination.to_string_lossy().into_owned()],
                None,
                result.stderr,
            ));
        }
        self.active_mounts.push(pseudo_absolute);
        Ok(absolute_destination)
    }

    pub fn umount(&mut self, relative_path: &str) -> Result<()> {
        let path = self.get_path(relative_path);
        let result = fsops::umount(&path, false)?;
        if result.status_success {
            self.active_mounts.retain(|m| m != &make_abs_path(relative_path));
        }
        Ok(())
    }

    /// Unmounts `relative_paths` in reverse-sorted order so nested mounts
    /// come off before their parents, deferring `/proc` to last (same
    /// ordering quirk as the Python's `umount_many`).
    pub fn umount_many(&mut self, relative_paths: &[String]) -> Result<()> {
        let mut mounts: Vec<String> = relative_paths.iter().map(|p| make_abs_path(p)).collect();
        mounts.sort();
        mounts.reverse();
        let had_proc = mounts.iter().any(|m| m == "/proc");
        for m in &mounts {
            if m == "/proc" {
                continue;
            }
            self.umount(m)?;
        }
        if had_proc {
            self.umount("/proc")?;
        }
        Ok(())
    }

    pub fn initialize(&mut self, reset: bool) -> Result<()> {
        if self.initialized && !reset {
            debug!(chroot = %self.name, "already initialized");
            return Ok(());
        }
        if self.active {
            self.deactivate(true)?;
        }
        if reset {
            info!(chroot = %self.name, "resetting chroot");
            fsops::remove_path(&self.root, true)?;
        }
        fsops::ensure_dir(&self.root, None, None)?;
        self.create_rootfs()?;
        self.initialized = true;
        Ok(())
    }

    /// Pacstraps the base package set into an empty root (spec §4.7's
    /// "create rootfs" operation), grounded in
    /// `original_source/chroot/base.py::BaseChroot.create_rootfs`.
    fn create_rootfs(&self) -> Result<()> {
        info!(chroot = %self.name, packages = ?self.base_packages, "pacstrapping chroot");
        let pacman_conf = self.get_path("etc/pacman.conf");
        let exec = Exec::default();
        let mut spec = exec
            .build("pacstrap", RunAs::Root)
            .arg("-C")
            .arg(pacman_conf.to_string_lossy().into_owned())
            .arg("-c")
            .arg("-G")
            .arg(self.root.to_string_lossy().into_owned());
        spec = spec.args(self.base_packages.clone());
        spec = spec.args(["--needed", "--overwrite=*", "-yyuu"]);
        spec.run()?;
        Ok(())
    }

    /// Mounts `/dev`, `/sys`, `/proc`, initializing first if necessary.
    pub fn activate(&mut self, fail_if_active: bool) -> Result<()> {
        if self.active && fail_if_active {
            return Err(Error::Other(format!("chroot {} already active", self.name)));
        }
        if !self.initialized {
            self.initialize(false)?;
        }
        for m in BASIC_MOUNTS {
            self.mount(
                m.src,
                m.dest,
                MountOptions {
                    fs_type: m.fs_type,
                    options: m.options,
                    bind: m.fs_type.is_none(),
                },
            )?;
        }
        self.active = true;
        Ok(())
    }

    /// Unmounts every tracked mount except `/` and `/boot` when
    /// `ignore_rootfs` is set — used from `initialize(reset)` where the
    /// rootfs itself is about to be wiped anyway.
    pub fn deactivate(&mut self, ignore_rootfs: bool) -> Result<()> {
        let to_unmount: Vec<String> = self
            .active_mounts
            .iter()
            .filter(|m| !ignore_rootfs || (m.as_str() != "/" && m.as_str() != "/boot"))
            .cloned()
            .collect();
        self.umount_many(&to_unmount)?;
        self.active = false;
        Ok(())
    }

    /// Runs `script` inside the chroot via `chroot <path> bash -c …`,
    /// injecting `QEMU_LD_PREFIX` when this chroot's arch differs from
    /// `native` (spec §4.7's emulated-foreign support). `run_as`'s
    /// `User(name)` wraps the inner script in `su <name> -c '…'`, matching
    /// `original_source/chroot/abstract.py::run_cmd`'s `switch_user`.
    pub fn run_cmd(
        &self,
        native: Arch,
        script: ScriptBody,
        cwd: Option<&str>,
        run_as: RunAs,
    ) -> Result<std::process::Output> {
        if !self.active {
            return Err(Error::Other(format!("chroot {} is inactive", self.name)));
        }
        let mut flat = match script {
            ScriptBody::Argv(parts) => parts.join(" "),
            ScriptBody::Shell(s) => s,
        };
        if let Some(cwd) = cwd {
            flat = format!("cd {cwd} && ( {flat} )");
        }
        let inner = match run_as {
            RunAs::User(user) => format!("su {user} -c '{flat}'"),
            RunAs::Caller | RunAs::Root => flat,
        };

        let exec = Exec::default();
        let mut outer = exec.build("chroot", RunAs::Root).arg(self.root.to_string_lossy().into_owned());
        if self.arch != native {
            outer = outer.env("QEMU_LD_PREFIX", qemu_ld_prefix(native, self.arch));
        }
        outer = outer.arg("bash").arg("-c").arg(inner);
        outer.run()
    }

    pub fn mount_pkgbuilds(&mut self, pkgbuilds_dir: &Path) -> Result<PathBuf> {
        self.mount(
            &pkgbuilds_dir.to_string_lossy(),
            "pkgbuilds",
            MountOptions { bind: true, ..Default::default() },
        )
    }

    pub fn mount_pacman_cache(&mut self, pacman_cache_dir: &Path) -> Result<PathBuf> {
        let shared = pacman_cache_dir.join(self.arch.as_str());
        fsops::ensure_dir(&shared, None, None)?;
        self.mount(
            &shared.to_string_lossy(),
            "var/cache/pacman/pkg",
            MountOptions { bind: true, ..Default::default() },
        )
    }

    pub fn mount_packages(&mut self, packages_dir: &Path) -> Result<PathBuf> {
        self.mount(
            &packages_dir.to_string_lossy(),
            "prebuilts",
            MountOptions { bind: true, ..Default::default() },
        )
    }

    pub fn mount_chroots(&mut self, chroots_dir: &Path) -> Result<PathBuf> {
        self.mount(
            &chroots_dir.to_string_lossy(),
            "chroot",
            MountOptions { bind: true, ..Default::default() },
        )
    }
}

/// `/usr/<gcc-hostspec>` QEMU dynamic-linker prefix for running a foreign
/// binary on `native` under user-mode emulation, mirroring
/// `original_source/constants.py`'s `GCC_HOSTSPECS` table.
pub fn qemu_ld_prefix(native: Arch, target: Arch) -> String {
    let hostspec = match (native, target) {
        (Arch::X86_64, Arch::X86_64) => "x86_64-pc-linux-gnu",
        (Arch::X86_64, Arch::Aarch64) => "aarch64-linux-gnu",
        (Arch::X86_64, Arch::Armv7h) => "arm-linux-gnueabihf",
        (Arch::Aarch64, Arch::Aarch64) => "aarch64-unknown-linux-gnu",
        (Arch::Aarch64, Arch::X86_64) => "x86_64-linux-gnu",
        (Arch::Aarch64, Arch::Armv7h) => "arm-linux-gnueabihf",
        _ => "",
    };
    format!("/usr/{hostspec}")
}

#[derive(Default)]
pub struct ChrootRegistry {
    chroots: std::collections::HashMap<String, Chroot>,
}

impl ChrootRegistry {
    pub fn get_or_create(&mut self, name: &str, arch: Arch, chroots_dir: &Path) -> &mut Chroot {
        self.chroots
            .entry(name.to_string())
            .or_insert_with(|| Chroot::new(name, arch, chroots_dir.join(name)))
    }

    pub fn get(&self, name: &str) -> Option<&Chroot> {
        self.chroots.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Chroot> {
        self.chroots.get_mut(name)
    }

    /// Removes and returns a chroot so callers needing two chroots at
    /// once (e.g. mounting one inside the other) can hold an owned value
    /// alongside a borrow of the registry, then [`insert`] it back.
    pub fn take(&mut self, name: &str) -> Option<Chroot> {
        self.chroots.remove(name)
    }

    pub fn insert(&mut self, chroot: Chroot) {
        self.chroots.insert(chroot.name.clone(), chroot);
    }

    pub fn names(&self) -> BTreeSet<String> {
        self.chroots.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_chroot_name_is_arch_scoped() {
        assert_eq!(base_chroot_name(Arch::Aarch64), "base_aarch64");
    }

    #[test]
    fn make_abs_path_always_has_leading_slash() {
        assert_eq!(make_abs_path("dev"), "/dev");
        assert_eq!(make_abs_path("/dev"), "/dev");
    }

    #[test]
    fn qemu_ld_prefix_resolves_known_pairs() {
        assert_eq!(qemu_ld_prefix(Arch::X86_64, Arch::Aarch64), "/usr/aarch64-linux-gnu");
        assert_eq!(qemu_ld_prefix(Arch::Aarch64, Arch::X86_64), "/usr/x86_64-linux-gnu");
    }

    #[test]
    fn mount_detects_leaked_untracked_mount() {
        let dir = tempfile::tempdir().unwrap();
        let mut chroot = Chroot::new("test", Arch::X86_64, dir.path());
        fsops::ensure_dir(&chroot.root, None, None).unwrap();
        // Can't actually mount in a test sandbox; exercise the bookkeeping
        // path instead by asserting a clean chroot starts with no mounts.
        assert!(chroot.active_mounts.is_empty());
        chroot.active_mounts.push("/dev".to_string());
        assert!(chroot.active_mounts.contains(&"/dev".to_string()));
    }
}
