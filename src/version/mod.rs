// src/version/mod.rs

//! RPM/alpm-style version comparison.
//!
//! Ports the segment-walking algorithm from libalpm's `version.c` (as
//! carried in pmbootstrap/kupfer's `rpm_version_compare`): versions are
//! split into alternating runs of alphanumeric characters, walked pairwise,
//! numeric runs compare numerically (after stripping leading zeros) and
//! always outrank an absent run, and a dangling alpha run never beats an
//! empty one.

use std::cmp::Ordering;
use std::fmt;

/// Parsed `[epoch:]pkgver[-pkgrel]` version string.
///
/// `pkgrel` is almost always a plain integer but PKGBUILDs occasionally use
/// `major.minor` release numbers (e.g. `3.2`), so it is kept as the raw
/// string and compared the same way a pkgver segment would be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlpmVersion {
    pub epoch: u64,
    pub pkgver: String,
    pub pkgrel: String,
}

impl AlpmVersion {
    pub fn parse(input: &str) -> Self {
        let mut rest = input;
        let mut epoch = 0u64;
        if let Some((maybe_epoch, tail)) = input.split_once(':') {
            if let Ok(e) = maybe_epoch.parse::<u64>() {
                epoch = e;
                rest = tail;
            }
        }

        let (pkgver, pkgrel) = match rest.rsplit_once('-') {
            Some((v, r)) => (v.to_string(), r.to_string()),
            None => (rest.to_string(), "1".to_string()),
        };

        AlpmVersion {
            epoch,
            pkgver,
            pkgrel,
        }
    }
}

impl fmt::Display for AlpmVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.epoch != 0 {
            write!(f, "{}:", self.epoch)?;
        }
        write!(f, "{}-{}", self.pkgver, self.pkgrel)
    }
}

/// Result of comparing two version strings: `cmp(a, b)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerComp {
    /// `a` is newer than `b`.
    LeftNewer,
    Equal,
    /// `b` is newer than `a`.
    RightNewer,
}

impl VerComp {
    pub fn to_ordering(self) -> Ordering {
        match self {
            VerComp::LeftNewer => Ordering::Greater,
            VerComp::Equal => Ordering::Equal,
            VerComp::RightNewer => Ordering::Less,
        }
    }
}

/// Compare two full version strings (`[epoch:]pkgver[-pkgrel]`).
pub fn compare(a: &str, b: &str) -> VerComp {
    let pa = AlpmVersion::parse(a);
    let pb = AlpmVersion::parse(b);
    compare_parsed(&pa, &pb)
}

fn compare_parsed(a: &AlpmVersion, b: &AlpmVersion) -> VerComp {
    match a.epoch.cmp(&b.epoch) {
        Ordering::Greater => return VerComp::LeftNewer,
        Ordering::Less => return VerComp::RightNewer,
        Ordering::Equal => {}
    }
    let ver_cmp = segment_compare(&a.pkgver, &b.pkgver);
    if ver_cmp != VerComp::Equal {
        return ver_cmp;
    }
    segment_compare(&a.pkgrel, &b.pkgrel)
}

/// Core alpm segment-walking algorithm, applied to a single `pkgver` or
/// `pkgrel` string. Mirrors `rpm_version_compare` in
/// `examples/original_source/distro/version.py`.
fn segment_compare(a: &str, b: &str) -> VerComp {
    if a == b {
        return VerComp::Equal;
    }

    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut one = 0usize;
    let mut two = 0usize;

    loop {
        while one < a.len() && !a[one].is_alphanumeric() {
            one += 1;
        }
        while two < b.len() && !b[two].is_alphanumeric() {
            two += 1;
        }

        if one >= a.len() || two >= b.len() {
            break;
        }

        let is_num = a[one].is_ascii_digit();
        let str_fn: fn(char) -> bool = if is_num {
            |c: char| c.is_ascii_digit()
        } else {
            |c: char| c.is_alphabetic()
        };

        let start_one = one;
        let start_two = two;
        let mut end_one = one;
        let mut end_two = two;
        while end_one < a.len() && str_fn(a[end_one]) {
            end_one += 1;
        }
        while end_two < b.len() && str_fn(b[end_two]) {
            end_two += 1;
        }

        // one side ran out of matching-type characters entirely: numeric
        // always outranks an absent/alpha segment.
        if start_two == end_two {
            return if is_num {
                VerComp::LeftNewer
            } else {
                VerComp::RightNewer
            };
        }

        let one_cut: String = a[start_one..end_one].iter().collect();
        let two_cut: String = b[start_two..end_two].iter().collect();

        if is_num {
            let one_trimmed = one_cut.trim_start_matches('0');
            let two_trimmed = two_cut.trim_start_matches('0');
            if one_trimmed.len() != two_trimmed.len() {
                return if one_trimmed.len() > two_trimmed.len() {
                    VerComp::LeftNewer
                } else {
                    VerComp::RightNewer
                };
            }
            match one_trimmed.cmp(two_trimmed) {
                Ordering::Greater => return VerComp::LeftNewer,
                Ordering::Less => return VerComp::RightNewer,
                Ordering::Equal => {}
            }
        } else {
            match one_cut.cmp(&two_cut) {
                Ordering::Greater => return VerComp::LeftNewer,
                Ordering::Less => return VerComp::RightNewer,
                Ordering::Equal => {}
            }
        }

        one = end_one;
        two = end_two;
    }

    // All paired segments compared equal; whichever side still has
    // characters left over decides it, but which way depends on the kind
    // of leftover: a dangling numeric segment means more version, so that
    // side is newer, while a dangling alpha segment (pre-release suffixes
    // like "a"/"rc") makes that side older — the well-known rpmvercmp
    // quirk where "1.0a" is older than "1.0".
    let one_done = one >= a.len();
    let two_done = two >= b.len();
    match (one_done, two_done) {
        (true, true) => VerComp::Equal,
        (true, false) => {
            if b[two].is_alphabetic() {
                VerComp::LeftNewer
            } else {
                VerComp::RightNewer
            }
        }
        (false, true) => {
            if a[one].is_alphabetic() {
                VerComp::RightNewer
            } else {
                VerComp::LeftNewer
            }
        }
        (false, false) => VerComp::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_strings_are_equal() {
        assert_eq!(compare("1.0-1", "1.0-1"), VerComp::Equal);
        assert_eq!(compare("1:2.0-3", "1:2.0-3"), VerComp::Equal);
    }

    #[test]
    fn epoch_dominates() {
        assert_eq!(compare("1:1.0-1", "2.0-1"), VerComp::LeftNewer);
        assert_eq!(compare("0:1.0-1", "2.0-1"), VerComp::RightNewer);
    }

    #[test]
    fn numeric_segment_length_breaks_ties() {
        assert_eq!(compare("1.10-1", "1.9-1"), VerComp::LeftNewer);
        assert_eq!(compare("1.05-1", "1.6-1"), VerComp::RightNewer);
    }

    #[test]
    fn leading_zeros_are_ignored() {
        assert_eq!(compare("1.001-1", "1.1-1"), VerComp::Equal);
    }

    #[test]
    fn pkgrel_breaks_ties() {
        assert_eq!(compare("1.0-2", "1.0-1"), VerComp::LeftNewer);
        assert_eq!(compare("1.0-1", "1.0-2"), VerComp::RightNewer);
    }

    #[test]
    fn trailing_segment_alpha_is_older_numeric_is_newer() {
        // well-known rpmvercmp quirk: once all paired segments compare
        // equal, a dangling alpha segment (e.g. a "rc"/"a" suffix) makes
        // that side *older*; a dangling numeric segment makes it newer.
        assert_eq!(compare("1.0a-1", "1.0-1"), VerComp::RightNewer);
        assert_eq!(compare("1.0-1", "1.0a-1"), VerComp::LeftNewer);
        // "1.0" vs "1.0.1": numeric continuation beats a bare stop.
        assert_eq!(compare("1.0-1", "1.0.1-1"), VerComp::RightNewer);
        assert_eq!(compare("1.0.1-1", "1.0-1"), VerComp::LeftNewer);
    }

    #[test]
    fn antisymmetric_and_reflexive() {
        let pairs = [("1.2-3", "1.3-1"), ("2:1-1", "1:9-9"), ("1.0a-1", "1.0-5")];
        for (a, b) in pairs {
            let fwd = compare(a, b);
            let back = compare(b, a);
            assert_eq!(fwd.to_ordering(), back.to_ordering().reverse());
            assert_eq!(compare(a, a), VerComp::Equal);
        }
    }
}
