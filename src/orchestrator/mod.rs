// src/orchestrator/mod.rs

//! Build Orchestrator (spec §4.11): per-recipe strategy routing,
//! emulation enablement, and repo-index update — the operation every
//! other module in this crate ultimately serves.
//!
//! Grounded in `original_source/packages/build.py`'s `build_packages` and
//! the strategy table it picks inline from `_mode`/`enable_crosscompile`/
//! `enable_crossdirect`; structured here as a router function plus a
//! per-recipe build pipeline rather than one long procedure, the way the
//! teacher's `transaction/planner.rs` separates planning from execution.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use tracing::{info, warn};

use crate::binfmt;
use crate::chroot::build::{CROSSDIRECT_PKGS, MAKEPKG_CMD};
use crate::distro::{Arch, BuildMode, Channel};
use crate::error::{Error, Result};
use crate::exec::{Exec, RunAs, ScriptBody};
use crate::freshness;
use crate::recipe::{self, Recipe};
use crate::repoindex;
use crate::session::Session;

/// The unprivileged user every `makepkg` invocation runs as inside a
/// build chroot (spec §4.2's `RunAs::User`, named after the convention
/// already used in this crate's exec/srcinfo_cache tests).
const BUILDER_USER: &str = "builder";

/// Arguments to [`build_packages`] (spec §4.11's parameter list).
#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub force: bool,
    pub rebuild_dependants: bool,
    pub try_download: bool,
    pub enable_crosscompile: bool,
    pub enable_crossdirect: bool,
    pub enable_ccache: bool,
    pub clean_chroot: bool,
    /// HTTPS mirror template consulted during freshness's optional
    /// download fallback; `None` disables it even if `try_download` is
    /// set.
    pub remote_url_template: Option<String>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        BuildOptions {
            force: false,
            rebuild_dependants: false,
            try_download: false,
            enable_crosscompile: true,
            enable_crossdirect: true,
            enable_ccache: true,
            clean_chroot: false,
            remote_url_template: None,
        }
    }
}

/// One of the four build strategies a recipe is routed through (spec
/// §4.11's table).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Native,
    Cross,
    Crossdirect,
    EmulatedForeign,
}

fn build_chroot_name(arch: Arch) -> String {
    format!("build_{arch}")
}

/// True iff `recipe` itself provides the crossdirect toolchain — never
/// routed through crossdirect, which would make it depend on itself.
fn is_crossdirect_toolchain(recipe: &Recipe) -> bool {
    recipe.name_set().iter().any(|name| CROSSDIRECT_PKGS.contains(&name.as_str()))
}

/// Chooses a strategy for building `recipe` targeting `target` when the
/// host is `host` (spec §4.11's table, evaluated top to bottom).
pub fn choose_strategy(host: Arch, target: Arch, recipe: &Recipe, opts: &BuildOptions) -> Strategy {
    if target == host {
        return Strategy::Native;
    }
    if recipe.build_mode == BuildMode::Cross && opts.enable_crosscompile {
        return Strategy::Cross;
    }
    if opts.enable_crossdirect && !is_crossdirect_toolchain(recipe) {
        return Strategy::Crossdirect;
    }
    Strategy::EmulatedForeign
}

/// Top-level build operation (spec §4.11). Computes the dependency plan
/// for `seeds` against `arch`, then walks it level by level, skipping
/// recipes already built (tracked per-base so split packages build once)
/// and otherwise routing each through the Build Strategy Router.
/// Re-scans the local repo DBs between levels so later levels see freshly
/// built dependencies.
pub fn build_packages(session: &mut Session, seeds: &[String], arch: Arch, opts: &BuildOptions) -> Result<Vec<PathBuf>> {
    for channel in Channel::ALL {
        repoindex::init_local_repo(&session.paths, channel.as_str(), arch)?;
    }

    let mut working_seeds: BTreeSet<String> = seeds.iter().cloned().collect();
    if opts.rebuild_dependants {
        let dependants = crate::solver::get_dependants(&session.recipes, &working_seeds, arch, true);
        working_seeds.extend(dependants);
    }
    let seed_vec: Vec<String> = working_seeds.into_iter().collect();
    let levels = crate::solver::generate_dependency_chain(&session.recipes, &seed_vec)?;

    let mut built_for: BTreeMap<String, BTreeSet<Arch>> = BTreeMap::new();
    let mut produced = Vec::new();

    for level in &levels {
        for path in level {
            let Some(recipe) = session.recipes.by_path.get(path).cloned() else {
                warn!(path, "level references unknown recipe, skipping");
                continue;
            };
            if built_for.get(&recipe.pkgbase).map(|done| done.contains(&arch)).unwrap_or(false) {
                continue;
            }

            if let Some(files) = build_one(session, &recipe, arch, opts)? {
                produced.extend(files);
            }
            mark_built(&mut built_for, &recipe, arch);
        }

        for channel in Channel::ALL {
            let repo_dir = session.paths.channel_dir(arch.as_str(), channel.as_str());
            if repo_dir.exists() {
                let mut repo = crate::distro::Repo::new_local(channel.as_str(), arch.as_str(), repo_dir);
                repo.scan()?;
            }
        }
    }

    Ok(produced)
}

/// An `any`-arch recipe is considered built for every real architecture
/// once produced; anything else is marked only for the arch just built.
fn mark_built(built_for: &mut BTreeMap<String, BTreeSet<Arch>>, recipe: &Recipe, arch: Arch) {
    let entry = built_for.entry(recipe.pkgbase.clone()).or_default();
    if recipe.arches.contains(&Arch::Any) {
        entry.extend(Arch::ALL_REAL);
    } else {
        entry.insert(arch);
    }
}

/// Builds (or skips) a single recipe for `arch`: sets up the routed
/// chroot(s), materializes sources, re-parses to pick up a refreshed
/// `pkgver()`, checks freshness, and — if still not built — runs
/// `makepkg` and inserts the result into the local repo (spec §4.11
/// steps 4-5). Returns `None` when the recipe was already fresh.
fn build_one(session: &mut Session, recipe: &Recipe, arch: Arch, opts: &BuildOptions) -> Result<Option<Vec<PathBuf>>> {
    let strategy = choose_strategy(session.host_arch, arch, recipe, opts);
    info!(path = %recipe.path, %arch, ?strategy, "processing recipe");

    if strategy != Strategy::Native {
        ensure_emulation(session, arch)?;
    }

    let host_arch = session.host_arch;
    let target_name = build_chroot_name(arch);
    let native_name = build_chroot_name(host_arch);
    let needs_native = matches!(strategy, Strategy::Cross | Strategy::Crossdirect);

    setup_chroot(session, &target_name, arch, opts)?;
    if needs_native {
        setup_chroot(session, &native_name, host_arch, opts)?;
    }
    match strategy {
        Strategy::Cross => overlay_crosscompile(session, &native_name, &target_name)?,
        Strategy::Crossdirect => overlay_crossdirect(session, &target_name, &native_name)?,
        Strategy::Native | Strategy::EmulatedForeign => {}
    }

    let build_chroot_name_for_run = if strategy == Strategy::Cross { &native_name } else { &target_name };
    let pkgdir = format!("/pkgbuilds/{}", recipe.path);

    materialize_sources(session, build_chroot_name_for_run, recipe, &pkgdir)?;

    let refreshed = recipe::reparse_recipe(&session.paths.pkgbuilds, &recipe.path).unwrap_or_else(|e| {
        warn!(path = %recipe.path, error = %e, "could not re-parse after source materialization, using prior version");
        recipe.clone()
    });

    let already_built = if opts.force {
        false
    } else {
        freshness::check_package_version_built(
            &session.paths,
            &refreshed.pkgbase,
            &refreshed.full_version(),
            &refreshed.arches,
            refreshed.channel.as_str(),
            arch,
            opts.try_download,
            opts.remote_url_template.as_deref(),
        )?
    };
    if already_built {
        info!(path = %recipe.path, "already built at current version, skipping");
        return Ok(None);
    }

    run_makepkg(session, build_chroot_name_for_run, &refreshed, arch, strategy, &pkgdir)?;

    let files = repoindex::add_package_to_repo(&session.paths, &refreshed, arch)?;
    Ok(Some(files))
}

fn ensure_emulation(session: &mut Session, arch: Arch) -> Result<()> {
    build_enable_qemu_binfmt(session, session.host_arch, arch)
}

/// `build_enable_qemu_binfmt(arch)` (spec §4.13). No-op for the host
/// arch or once already registered this session. Otherwise builds (or
/// downloads) the emulator and binfmt-registration packages for `host`
/// via a recursive, toolchain-disabled `build_packages` call, installs
/// them with the package manager, and registers the kernel handler.
pub fn build_enable_qemu_binfmt(session: &mut Session, host: Arch, arch: Arch) -> Result<()> {
    if arch == host {
        return Ok(());
    }
    if session.is_emulation_registered(arch) {
        return Ok(());
    }

    info!(%arch, "enabling qemu-user binfmt emulation");
    let recursive_opts = BuildOptions {
        enable_crosscompile: false,
        enable_crossdirect: false,
        enable_ccache: false,
        ..Default::default()
    };
    let emulator_pkgs = ["qemu-user-static-bin".to_string(), "binfmt-qemu-static".to_string()];
    build_packages(session, &emulator_pkgs, host, &recursive_opts)?;

    let channel_dir = session.paths.channel_dir(host.as_str(), Channel::Cross.as_str());
    let exec = Exec::default();
    if let Ok(entries) = std::fs::read_dir(&channel_dir) {
        for entry in entries.flatten() {
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else { continue };
            let matches_emulator = emulator_pkgs.iter().any(|pkg| name.starts_with(&format!("{pkg}-")));
            if matches_emulator && name.contains(".pkg.tar") {
                exec.build("pacman", RunAs::Root)
                    .arg("-U")
                    .arg("--noconfirm")
                    .arg(entry.path().to_string_lossy().into_owned())
                    .run()?;
            }
        }
    }

    binfmt::register(arch, host)?;
    session.mark_emulation_registered(arch);
    Ok(())
}

/// Initializes (if needed), activates, and mounts the canonical set of
/// host directories into a build chroot (spec §4.8).
fn setup_chroot(session: &mut Session, name: &str, arch: Arch, opts: &BuildOptions) -> Result<()> {
    let paths = session.paths.clone();
    let chroot = session.chroots.get_or_create(name, arch, &paths.chroots);
    if opts.clean_chroot {
        chroot.initialize(true)?;
    }
    chroot.activate(false)?;
    chroot.mount_pkgbuilds(&paths.pkgbuilds)?;
    chroot.mount_pacman_cache(&paths.pacman_cache)?;
    chroot.mount_packages(&paths.packages)?;
    chroot.mount_chroots(&paths.chroots)?;
    if opts.enable_ccache {
        chroot.mount_ccache(&paths.packages, BUILDER_USER)?;
    }
    Ok(())
}

/// Nests the target chroot inside the native one at `/chroot/<name>` for
/// the **cross** strategy (spec §4.8's `mount_crosscompile`).
fn overlay_crosscompile(session: &mut Session, native_name: &str, target_name: &str) -> Result<()> {
    let Some(mut native) = session.chroots.take(native_name) else {
        return Err(Error::Other(format!("missing native chroot {native_name}")));
    };
    let result = match session.chroots.get(target_name) {
        Some(target) => native.mount_crosscompile(target),
        None => Err(Error::Other(format!("missing target chroot {target_name}"))),
    };
    session.chroots.insert(native);
    result
}

/// Overlays the native chroot at `/native` inside the target chroot for
/// the **crossdirect** strategy (spec §4.8's `mount_crossdirect`).
fn overlay_crossdirect(session: &mut Session, target_name: &str, native_name: &str) -> Result<()> {
    let Some(mut target) = session.chroots.take(target_name) else {
        return Err(Error::Other(format!("missing target chroot {target_name}")));
    };
    let result = match session.chroots.get(native_name) {
        Some(native) => target.mount_crossdirect(native),
        None => Err(Error::Other(format!("missing native chroot {native_name}"))),
    };
    session.chroots.insert(target);
    result
}

/// Materializes sources without building, so `pkgver()` can be re-read
/// (spec §4.11: `makepkg --nobuild --nodeps --noprepare --skippgpcheck`),
/// and flips the SRCINFO cache's `src_initialised` flag (spec §4.5).
fn materialize_sources(session: &Session, chroot_name: &str, recipe: &Recipe, pkgdir_in_chroot: &str) -> Result<()> {
    let chroot = session
        .chroots
        .get(chroot_name)
        .ok_or_else(|| Error::Other(format!("missing chroot {chroot_name}")))?;
    chroot.run_cmd(
        session.host_arch,
        ScriptBody::Argv(vec![
            "makepkg".into(),
            "--nobuild".into(),
            "--nodeps".into(),
            "--noprepare".into(),
            "--skippgpcheck".into(),
        ]),
        Some(pkgdir_in_chroot),
        RunAs::User(BUILDER_USER),
    )?;
    recipe::SrcinfoMeta::mark_src_initialised(&session.paths.pkgbuilds, &recipe.path, &recipe.full_version())?;
    Ok(())
}

/// Writes the routed `makepkg.conf` and runs the actual build (spec
/// §4.11's router composition: `--config <conf>`, always
/// `--skippgpcheck`, and `--nodeps` for cross or `--syncdeps` for
/// host/crossdirect/emulated-foreign unless the recipe declares
/// `_nodeps`).
fn run_makepkg(
    session: &Session,
    chroot_name: &str,
    recipe: &Recipe,
    arch: Arch,
    strategy: Strategy,
    pkgdir_in_chroot: &str,
) -> Result<()> {
    let cross = strategy == Strategy::Cross;
    let cross_sysroot = if cross { Some(format!("/chroot/{}", build_chroot_name(arch))) } else { None };

    let chroot = session
        .chroots
        .get(chroot_name)
        .ok_or_else(|| Error::Other(format!("missing chroot {chroot_name}")))?;
    let conf_relative = chroot.write_makepkg_conf(arch, cross_sysroot.as_deref(), cross)?;
    let conf_in_chroot = format!("/{conf_relative}");

    let mut argv: Vec<String> = MAKEPKG_CMD.iter().map(|s| s.to_string()).collect();
    argv.push("--config".into());
    argv.push(conf_in_chroot);
    argv.push("--skippgpcheck".into());
    if cross {
        argv.push("--nodeps".into());
    } else if !recipe.nodeps {
        argv.push("--syncdeps".into());
    }

    info!(path = %recipe.path, %arch, ?strategy, "running makepkg");
    chroot.run_cmd(session.host_arch, ScriptBody::Argv(argv), Some(pkgdir_in_chroot), RunAs::User(BUILDER_USER))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distro::Channel;
    use crate::recipe::Subrecipe;
    use std::collections::BTreeSet as Set;

    fn sample_recipe(build_mode: BuildMode) -> Recipe {
        Recipe {
            path: "main/foo".into(),
            pkgbase: "foo".into(),
            pkgver: "1.0".into(),
            pkgrel: "1".into(),
            arches: Set::from([Arch::X86_64, Arch::Aarch64]),
            build_mode,
            nodeps: false,
            channel: Channel::Main,
            make_depends: vec![],
            check_depends: vec![],
            subrecipes: vec![Subrecipe {
                name: "foo".into(),
                arches: Set::from([Arch::X86_64, Arch::Aarch64]),
                depends: vec![],
                provides: vec![],
                replaces: vec![],
                local_depends: Set::new(),
            }],
        }
    }

    #[test]
    fn native_when_target_equals_host() {
        let recipe = sample_recipe(BuildMode::Host);
        let strategy = choose_strategy(Arch::X86_64, Arch::X86_64, &recipe, &BuildOptions::default());
        assert_eq!(strategy, Strategy::Native);
    }

    #[test]
    fn cross_mode_recipe_routes_to_cross_when_enabled() {
        let recipe = sample_recipe(BuildMode::Cross);
        let strategy = choose_strategy(Arch::X86_64, Arch::Aarch64, &recipe, &BuildOptions::default());
        assert_eq!(strategy, Strategy::Cross);
    }

    #[test]
    fn host_mode_recipe_routes_to_crossdirect_when_enabled() {
        let recipe = sample_recipe(BuildMode::Host);
        let strategy = choose_strategy(Arch::X86_64, Arch::Aarch64, &recipe, &BuildOptions::default());
        assert_eq!(strategy, Strategy::Crossdirect);
    }

    #[test]
    fn falls_back_to_emulated_foreign_when_crossdirect_disabled() {
        let recipe = sample_recipe(BuildMode::Host);
        let opts = BuildOptions { enable_crossdirect: false, ..Default::default() };
        let strategy = choose_strategy(Arch::X86_64, Arch::Aarch64, &recipe, &opts);
        assert_eq!(strategy, Strategy::EmulatedForeign);
    }

    #[test]
    fn crossdirect_toolchain_recipe_never_self_routes() {
        let mut recipe = sample_recipe(BuildMode::Host);
        recipe.subrecipes[0].name = "crossdirect".into();
        recipe.pkgbase = "crossdirect".into();
        let strategy = choose_strategy(Arch::X86_64, Arch::Aarch64, &recipe, &BuildOptions::default());
        assert_eq!(strategy, Strategy::EmulatedForeign);
    }

    #[test]
    fn mark_built_any_arch_covers_all_real_arches() {
        let mut recipe = sample_recipe(BuildMode::Host);
        recipe.arches = Set::from([Arch::Any]);
        let mut built_for = BTreeMap::new();
        mark_built(&mut built_for, &recipe, Arch::X86_64);
        let done = &built_for["foo"];
        assert!(done.contains(&Arch::X86_64));
        assert!(done.contains(&Arch::Aarch64));
        assert!(done.contains(&Arch::Armv7h));
    }

    #[test]
    fn mark_built_specific_arch_covers_only_that_arch() {
        let recipe = sample_recipe(BuildMode::Host);
        let mut built_for = BTreeMap::new();
        mark_built(&mut built_for, &recipe, Arch::Aarch64);
        let done = &built_for["foo"];
        assert!(done.contains(&Arch::Aarch64));
        assert!(!done.contains(&Arch::X86_64));
    }
}
