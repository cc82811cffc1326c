// src/binfmt/mod.rs

//! Emulation Enablement (spec §4.13): registers `qemu-user-static`'s
//! binfmt_misc handlers so foreign-arch binaries can run under the host
//! kernel.
//!
//! Grounded in `original_source/binfmt.py` (itself adapted from
//! pmbootstrap's `binfmt.py`). The chroot-scoped registration variant the
//! Python supports (`Optional[Chroot]` on every function) is dropped —
//! spec §4.13 only calls for host-level registration ahead of an
//! emulated-foreign build, never a registration confined to a chroot's own
//! `/proc` view (see DESIGN.md).
//!
//! This module is deliberately stateless: spec §9's redesign note calls
//! for the "emulation-enabled map" global the source keeps to become a
//! field of [`crate::session::Session`] instead of ambient process state.
//! `is_registered`/`register`/`unregister` here just probe and mutate
//! actual kernel state; the idempotency cache lives on `Session`.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use tracing::{debug, info};

use crate::distro::Arch;
use crate::error::{Error, Result};
use crate::fsops::{self, MountOptions};

const BINFMT_INFO_PATH: &str = "/usr/lib/binfmt.d/qemu-static.conf";
const BINFMT_MISC_DIR: &str = "/proc/sys/fs/binfmt_misc";

/// The `qemu-<suffix>` binfmt handler name for each supported target, per
/// `qemu-user-static`'s packaging convention (`armv7h` registers under the
/// 32-bit `qemu-arm` handler, not `qemu-armv7h`).
fn qemu_suffix(arch: Arch) -> Option<&'static str> {
    match arch {
        Arch::X86_64 => Some("x86_64"),
        Arch::Aarch64 => Some("aarch64"),
        Arch::Armv7h => Some("arm"),
        Arch::Any => None,
    }
}

/// One parsed line of `qemu-static.conf`: `:name:type:offset:magic:mask:
/// interpreter:flags` (see <https://en.wikipedia.org/wiki/Binfmt_misc>).
#[derive(Debug, Clone)]
pub struct BinfmtEntry {
    pub name: String,
    pub entry_type: String,
    pub offset: String,
    pub magic: String,
    pub mask: String,
    pub interpreter: String,
    pub flags: String,
    pub line: String,
}

/// Parses `qemu-static.conf`'s colon-delimited registration lines into a
/// map keyed by the suffix after `qemu-` (e.g. `aarch64`, `arm`). Lines
/// that don't start with a recognized `qemu-` handler name are logged and
/// skipped, matching the Python's `logging.fatal` call (which, being a
/// log level rather than a `raise`, does not actually abort the loop).
pub fn binfmt_info(path: &Path) -> Result<HashMap<String, BinfmtEntry>> {
    debug!(path = %path.display(), "parsing binfmt info file");
    let text = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    let mut full = HashMap::new();
    for line in text.lines() {
        if line.starts_with('#') || !line.contains(':') {
            continue;
        }
        let parts: Vec<&str> = line.split(':').collect();
        if parts.len() < 8 {
            continue;
        }
        let name = parts[1].to_string();
        if !name.starts_with("qemu-") {
            tracing::error!(name, "unknown binfmt handler, skipping");
            continue;
        }
        let suffix = name.trim_start_matches("qemu-").to_string();
        full.insert(
            suffix,
            BinfmtEntry {
                name,
                entry_type: parts[2].to_string(),
                offset: parts[3].to_string(),
                magic: parts[4].to_string(),
                mask: parts[5].to_string(),
                interpreter: parts[6].to_string(),
                flags: parts[7].to_string(),
                line: line.to_string(),
            },
        );
    }
    Ok(full)
}

fn is_arch_known(arch: Arch) -> Result<&'static str> {
    qemu_suffix(arch).ok_or_else(|| Error::Other(format!("binfmt: unsupported architecture {arch}")))
}

/// Mounts `binfmt_misc` at `/proc/sys/fs/binfmt_misc` if its control file
/// isn't present yet.
pub fn ensure_mounted() -> Result<()> {
    let register_path = Path::new(BINFMT_MISC_DIR).join("register");
    if register_path.exists() {
        return Ok(());
    }
    info!("mounting binfmt_misc");
    let result = fsops::mount(
        "binfmt_misc",
        Path::new(BINFMT_MISC_DIR),
        MountOptions {
            fs_type: Some("binfmt_misc"),
            ..Default::default()
        },
    )?;
    if !result.status_success {
        return Err(Error::subprocess_failed(
            "mount",
            &["binfmt_misc".to_string(), BINFMT_MISC_DIR.to_string()],
            None,
            result.stderr,
        ));
    }
    Ok(())
}

/// `binfmt_is_registered(arch)`: true iff
/// `/proc/sys/fs/binfmt_misc/qemu-<suffix>` exists (ensures the
/// filesystem is mounted first).
pub fn is_registered(arch: Arch) -> Result<bool> {
    let suffix = is_arch_known(arch)?;
    ensure_mounted()?;
    Ok(Path::new(BINFMT_MISC_DIR).join(format!("qemu-{suffix}")).exists())
}

/// Registers the `qemu-<suffix>` binfmt handler for `arch`, parsed from
/// `/usr/lib/binfmt.d/qemu-static.conf`. No-op when `arch` is the host
/// architecture or already registered per the kernel's own state
/// (`Session::ensure_emulation` is the idempotent, cached entry point
/// callers outside this module should prefer).
pub fn register(arch: Arch, host: Arch) -> Result<()> {
    if arch == host {
        return Ok(());
    }
    if is_registered(arch)? {
        return Ok(());
    }

    let suffix = is_arch_known(arch)?;
    let entries = binfmt_info(Path::new(BINFMT_INFO_PATH))?;
    let entry = entries
        .get(suffix)
        .ok_or_else(|| Error::Other(format!("no binfmt entry for qemu-{suffix} in {BINFMT_INFO_PATH}")))?;

    ensure_mounted()?;

    info!(%arch, "registering qemu binfmt handler");
    let register_path = Path::new(BINFMT_MISC_DIR).join("register");
    fsops::write_file(&register_path, entry.line.trim_end().as_bytes(), None, None)?;

    if !is_registered(arch)? {
        return Err(Error::Other(format!(
            "failed to register qemu-user for {arch}: {BINFMT_MISC_DIR}/{} not found after registration",
            entry.name
        )));
    }
    Ok(())
}

/// Unregisters `arch`'s binfmt handler (writes `-1` to its control file).
/// No-op if it isn't registered.
pub fn unregister(arch: Arch) -> Result<()> {
    let suffix = is_arch_known(arch)?;
    ensure_mounted()?;
    let binfmt_file = Path::new(BINFMT_MISC_DIR).join(format!("qemu-{suffix}"));
    if !binfmt_file.exists() {
        return Ok(());
    }
    info!(%arch, "unregistering qemu binfmt handler");
    fsops::write_file(&binfmt_file, b"-1", None, None)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_conf() -> String {
        let aarch64_line = ":qemu-aarch64:M::\\x7fELF\\x02\\x01\\x01\\x00\\x00\\x00\\x00\\x00\\x00\\x00\\x00\\x00\\x02\\x00\\xb7\\x00:\\xff\\xff\\xff\\xff\\xff\\xfe\\xfe\\xff\\xff\\xff\\xff\\xff\\xff\\xff\\xff\\xfa\\xff\\xff\\xff:/usr/bin/qemu-aarch64-static:CF\n";
        let arm_line = ":qemu-arm:M::\\x7fELF\\x01\\x01\\x01\\x00\\x00\\x00\\x00\\x00\\x00\\x00\\x00\\x00\\x02\\x00\\x28\\x00:\\xff\\xff\\xff\\xff\\xff\\xfe\\xff\\xff\\xff\\xff\\xff\\xff\\xff\\xff\\xff\\xff\\xfe\\xff:/usr/bin/qemu-arm-static:CF\n";
        format!("# autogenerated\n{aarch64_line}{arm_line}")
    }

    #[test]
    fn binfmt_info_parses_known_handlers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("qemu-static.conf");
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(sample_conf().as_bytes()).unwrap();

        let parsed = binfmt_info(&path).unwrap();
        assert!(parsed.contains_key("aarch64"));
        assert!(parsed.contains_key("arm"));
        assert_eq!(parsed["aarch64"].interpreter, "/usr/bin/qemu-aarch64-static");
    }

    #[test]
    fn binfmt_info_skips_comments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("qemu-static.conf");
        fs::write(&path, "# just a comment\nno colon here\n").unwrap();
        let parsed = binfmt_info(&path).unwrap();
        assert!(parsed.is_empty());
    }

    #[test]
    fn qemu_suffix_maps_armv7h_to_arm() {
        assert_eq!(qemu_suffix(Arch::Armv7h), Some("arm"));
        assert_eq!(qemu_suffix(Arch::Any), None);
    }

    #[test]
    fn register_is_noop_for_host_arch() {
        register(Arch::X86_64, Arch::X86_64).unwrap();
    }
}
