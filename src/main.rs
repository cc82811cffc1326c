// src/main.rs

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use kupferbootstrap::{
    build_enable_qemu_binfmt, build_packages, Arch, BuildOptions, KupferConfig, KupferPaths,
    Result, Session,
};
use tracing::error;

/// Thin CLI glue around the build core (spec §1: the interactive config
/// editor and the full `kupferbootstrap` command tree live outside this
/// crate). Only the operations this crate actually implements are exposed.
#[derive(Parser)]
#[command(name = "kupferbootstrap")]
#[command(author, version, about = "Cross-architecture pacman package build core", long_about = None)]
struct Cli {
    /// Path to the TOML config file holding device/flavour profiles.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Target architecture (defaults to the active profile's paths arch detection is skipped for).
    #[arg(long, global = true, value_name = "ARCH")]
    arch: Option<Arch>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build one or more recipes (and their dependencies) for an architecture.
    Build {
        /// Recipe paths to build, or "all".
        #[arg(required = true)]
        packages: Vec<String>,

        /// Also rebuild everything that depends on the requested packages.
        #[arg(long)]
        rebuild_dependants: bool,

        /// Rebuild even if a matching version is already in the local repo.
        #[arg(long)]
        force: bool,

        /// Probe the remote repo mirror before assuming a package is stale.
        #[arg(long)]
        try_download: bool,
    },
    /// Register QEMU user-mode emulation for a foreign architecture.
    EnableEmulation {
        arch: Arch,
    },
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    let (paths, host_arch) = match &cli.config {
        Some(path) => {
            let config = KupferConfig::load(path)?;
            let profile = config.active_profile()?;
            (profile.paths.clone(), detect_host_arch())
        }
        None => (KupferPaths::default(), detect_host_arch()),
    };

    let mut session = Session::new(paths, host_arch);
    session.discover(false)?;

    match cli.command {
        Commands::Build {
            packages,
            rebuild_dependants,
            force,
            try_download,
        } => {
            let arch = cli.arch.unwrap_or(host_arch);
            let opts = BuildOptions {
                force,
                rebuild_dependants,
                try_download,
                ..BuildOptions::default()
            };
            let built = build_packages(&mut session, &packages, arch, &opts)?;
            for path in built {
                println!("{}", path.display());
            }
        }
        Commands::EnableEmulation { arch } => {
            build_enable_qemu_binfmt(&mut session, host_arch, arch)?;
        }
    }

    Ok(())
}

fn detect_host_arch() -> Arch {
    std::env::consts::ARCH.parse().unwrap_or(Arch::X86_64)
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "command failed");
            ExitCode::FAILURE
        }
    }
}
