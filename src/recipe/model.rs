// src/recipe/model.rs

//! Recipe data model (spec §3).
//!
//! Flattened per the "cyclic data" redesign note in spec §9: recipes are
//! owned by a single arena keyed by canonical name
//! ([`crate::recipe::discovery::RecipeIndex`]); a [`Subrecipe`] carries its
//! base's directory path rather than a pointer to it, and a
//! [`crate::recipe::srcinfo_cache::SrcinfoMeta`] is a stand-alone record
//! keyed by that same path. Structurally this replaces the teacher's
//! `recipe/format.rs::Recipe` (a generic TOML build spec) with the
//! PKGBUILD/SRCINFO-derived shape spec.md actually calls for.

use std::collections::BTreeSet;

use crate::distro::{Arch, BuildMode, Channel};

/// A dependency as written in SRCINFO, with any version constraint and
/// description already stripped (spec §4.6).
pub type DepName = String;

/// A split-package belonging to a base recipe. Shares `pkgver`/`pkgrel`
/// and `path` with the base; carries its own name, arches, and deps.
#[derive(Debug, Clone)]
pub struct Subrecipe {
    pub name: String,
    pub arches: BTreeSet<Arch>,
    pub depends: Vec<DepName>,
    pub provides: Vec<String>,
    pub replaces: Vec<String>,
    /// Dependencies resolved against the global index (spec §4.6's
    /// second pass); populated after discovery, empty until then.
    pub local_depends: BTreeSet<String>,
}

impl Subrecipe {
    /// {own name} ∪ provides ∪ replaces — the set of names this subrecipe
    /// answers to for dependency matching.
    pub fn name_set(&self) -> BTreeSet<String> {
        let mut set: BTreeSet<String> = self.provides.iter().cloned().collect();
        set.extend(self.replaces.iter().cloned());
        set.insert(self.name.clone());
        set
    }
}

/// A recipe base: directory-relative path, pkgbase, version, and the
/// subrecipes it produces.
#[derive(Debug, Clone)]
pub struct Recipe {
    /// Directory-relative path under the pkgbuilds tree, e.g.
    /// `main/linux-megi`.
    pub path: String,
    pub pkgbase: String,
    pub pkgver: String,
    pub pkgrel: String,
    pub arches: BTreeSet<Arch>,
    pub build_mode: BuildMode,
    pub nodeps: bool,
    pub channel: Channel,
    pub make_depends: Vec<DepName>,
    pub check_depends: Vec<DepName>,
    pub subrecipes: Vec<Subrecipe>,
}

impl Recipe {
    /// The union of every subrecipe's name-set — everything this base
    /// answers to for dependency matching.
    pub fn name_set(&self) -> BTreeSet<String> {
        let mut set = BTreeSet::new();
        for sub in &self.subrecipes {
            set.extend(sub.name_set());
        }
        set
    }

    /// Build-time deps: each subrecipe's own `depends`, plus the base's
    /// `make_depends`/`check_depends` (spec §3: "three dependency
    /// collections: build-time deps, make-time deps, provides/replaces
    /// aliases").
    pub fn build_depends(&self) -> BTreeSet<String> {
        let mut set: BTreeSet<String> = self.make_depends.iter().cloned().collect();
        for sub in &self.subrecipes {
            set.extend(sub.depends.iter().cloned());
        }
        set
    }

    pub fn full_version(&self) -> String {
        format!("{}-{}", self.pkgver, self.pkgrel)
    }

    /// Every local dependency across all subrecipes (populated after the
    /// index's second pass, spec §4.6).
    pub fn local_depends(&self) -> BTreeSet<String> {
        let mut set = BTreeSet::new();
        for sub in &self.subrecipes {
            set.extend(sub.local_depends.iter().cloned());
        }
        set
    }

    pub fn supports_arch(&self, target: Arch) -> bool {
        self.arches.contains(&target) || self.arches.contains(&Arch::Any)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_sub(name: &str, provides: &[&str]) -> Subrecipe {
        Subrecipe {
            name: name.to_string(),
            arches: BTreeSet::from([Arch::X86_64]),
            depends: vec![],
            provides: provides.iter().map(|s| s.to_string()).collect(),
            replaces: vec![],
            local_depends: BTreeSet::new(),
        }
    }

    #[test]
    fn name_set_is_union_over_subrecipes() {
        let recipe = Recipe {
            path: "main/foo".into(),
            pkgbase: "foo".into(),
            pkgver: "1.0".into(),
            pkgrel: "1".into(),
            arches: BTreeSet::from([Arch::X86_64]),
            build_mode: BuildMode::Host,
            nodeps: false,
            channel: Channel::Main,
            make_depends: vec![],
            check_depends: vec![],
            subrecipes: vec![sample_sub("foo", &["foo-provider"]), sample_sub("foo-libs", &[])],
        };
        let names = recipe.name_set();
        assert!(names.contains("foo"));
        assert!(names.contains("foo-provider"));
        assert!(names.contains("foo-libs"));
    }

    #[test]
    fn supports_arch_honors_any() {
        let mut recipe_arches = BTreeSet::new();
        recipe_arches.insert(Arch::Any);
        let recipe = Recipe {
            path: "main/foo".into(),
            pkgbase: "foo".into(),
            pkgver: "1.0".into(),
            pkgrel: "1".into(),
            arches: recipe_arches,
            build_mode: BuildMode::Host,
            nodeps: false,
            channel: Channel::Main,
            make_depends: vec![],
            check_depends: vec![],
            subrecipes: vec![],
        };
        assert!(recipe.supports_arch(Arch::Aarch64));
    }
}
