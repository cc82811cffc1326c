// src/distro/mod.rs

//! Distro & Repo (spec §4.4) plus the closed architecture/channel sets
//! named in spec §6. Kept as typed enums rather than bare strings,
//! matching the teacher's preference for domain types over stringly-typed
//! data (e.g. `version/mod.rs`'s `VersionConstraint`).

pub mod desc;
pub mod repo;

pub use desc::DescBlock;
pub use repo::{BinaryPackageRecord, Distro, Repo, RepoLocation};

use std::fmt;
use std::str::FromStr;

/// Target architectures (spec §6), plus the pseudo-arch `any` for
/// architecture-independent packages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arch {
    X86_64,
    Aarch64,
    Armv7h,
    Any,
}

impl Arch {
    pub const ALL_REAL: [Arch; 3] = [Arch::X86_64, Arch::Aarch64, Arch::Armv7h];

    pub fn as_str(&self) -> &'static str {
        match self {
            Arch::X86_64 => "x86_64",
            Arch::Aarch64 => "aarch64",
            Arch::Armv7h => "armv7h",
            Arch::Any => "any",
        }
    }

    pub fn matches(&self, target: Arch) -> bool {
        *self == Arch::Any || *self == target
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownArch(pub String);

impl fmt::Display for UnknownArch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown architecture: {}", self.0)
    }
}
impl std::error::Error for UnknownArch {}

impl FromStr for Arch {
    type Err = UnknownArch;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "x86_64" => Ok(Arch::X86_64),
            "aarch64" => Ok(Arch::Aarch64),
            "armv7h" => Ok(Arch::Armv7h),
            "any" => Ok(Arch::Any),
            other => Err(UnknownArch(other.to_string())),
        }
    }
}

/// Closed set of repository channels (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Boot,
    Cross,
    Device,
    Firmware,
    Linux,
    Main,
    Phosh,
}

impl Channel {
    pub const ALL: [Channel; 7] = [
        Channel::Boot,
        Channel::Cross,
        Channel::Device,
        Channel::Firmware,
        Channel::Linux,
        Channel::Main,
        Channel::Phosh,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Boot => "boot",
            Channel::Cross => "cross",
            Channel::Device => "device",
            Channel::Firmware => "firmware",
            Channel::Linux => "linux",
            Channel::Main => "main",
            Channel::Phosh => "phosh",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownChannel(pub String);

impl fmt::Display for UnknownChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown channel: {}", self.0)
    }
}
impl std::error::Error for UnknownChannel {}

impl FromStr for Channel {
    type Err = UnknownChannel;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "boot" => Ok(Channel::Boot),
            "cross" => Ok(Channel::Cross),
            "device" => Ok(Channel::Device),
            "firmware" => Ok(Channel::Firmware),
            "linux" => Ok(Channel::Linux),
            "main" => Ok(Channel::Main),
            "phosh" => Ok(Channel::Phosh),
            other => Err(UnknownChannel(other.to_string())),
        }
    }
}

/// Build mode extracted from a PKGBUILD's `_mode=` (spec §6). Any value
/// other than `host`/`cross` is fatal; an absent `_mode` is not fatal —
/// per spec §9's Open Question resolution it warns and defaults to
/// `Host`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildMode {
    Host,
    Cross,
}

impl Default for BuildMode {
    fn default() -> Self {
        BuildMode::Host
    }
}

impl FromStr for BuildMode {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "host" => Ok(BuildMode::Host),
            "cross" => Ok(BuildMode::Cross),
            other => Err(format!("invalid _mode: {other}")),
        }
    }
}

impl fmt::Display for BuildMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildMode::Host => write!(f, "host"),
            BuildMode::Cross => write!(f, "cross"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arch_any_matches_every_target() {
        assert!(Arch::Any.matches(Arch::X86_64));
        assert!(Arch::Any.matches(Arch::Aarch64));
        assert!(!Arch::X86_64.matches(Arch::Aarch64));
    }

    #[test]
    fn arch_round_trips_through_str() {
        for a in Arch::ALL_REAL {
            assert_eq!(Arch::from_str(a.as_str()), Ok(a));
        }
    }

    #[test]
    fn unknown_arch_is_rejected() {
        assert!(Arch::from_str("riscv64").is_err());
    }

    #[test]
    fn build_mode_invalid_value_is_error() {
        assert!(BuildMode::from_str("chroot").is_err());
        assert_eq!(BuildMode::from_str("cross").unwrap(), BuildMode::Cross);
    }
}
