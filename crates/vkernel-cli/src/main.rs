//! vkernel CLI - Runtime hook and operator tool for the vkernel module

use anyhow::{Context, Result};
use caps::{CapSet, Capability};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use vkernel_core::config::default_modules_root;
use vkernel_core::{ControllerConfig, HostKernel, ModuleController, ModuleInitFlags, MountEntry};

#[derive(Parser)]
#[command(name = "vkernel")]
#[command(author, version, about = "Locate, mount and load the vkernel module for containers")]
struct Cli {
    /// Modules root (defaults to VKERNEL_MODULES_ROOT env var or /lib/modules)
    #[arg(long, global = true)]
    modules_root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the running kernel release
    Release,

    /// Print the module directory and image path
    Path,

    /// Append the module bind mount to a JSON mount list
    Mounts {
        /// JSON array of existing mount entries (or - for stdin)
        #[arg(short, long)]
        existing: Option<PathBuf>,
    },

    /// Load the module into the kernel
    Load {
        /// Module parameters, passed verbatim
        #[arg(short, long, default_value = "")]
        params: String,

        /// Raw MODULE_INIT_* flags
        #[arg(short, long, default_value = "0")]
        flags: u32,

        /// Ignore symbol version hashes
        #[arg(long)]
        ignore_modversions: bool,

        /// Ignore kernel version magic
        #[arg(long)]
        ignore_vermagic: bool,
    },

    /// Unload the module from the kernel
    Unload,

    /// Report whether the module is loaded
    Status,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("vkernel=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = ControllerConfig::builder()
        .modules_root(cli.modules_root.unwrap_or_else(default_modules_root))
        .build();
    let controller = ModuleController::with_config(HostKernel, &config)
        .context("failed to set up module controller")?;

    match cli.command {
        Commands::Release => {
            println!("{}", controller.release());
        }

        Commands::Path => {
            println!("{}", controller.host_path().display());
            println!("{}", controller.descriptor().module_file().display());
        }

        Commands::Mounts { existing } => {
            let existing = match existing {
                Some(path) => read_mounts(&path)?,
                None => Vec::new(),
            };
            let mounts = controller.contribute_mount(existing);
            println!("{}", serde_json::to_string_pretty(&mounts)?);
        }

        Commands::Load {
            params,
            mut flags,
            ignore_modversions,
            ignore_vermagic,
        } => {
            if ignore_modversions {
                flags |= ModuleInitFlags::MODULE_INIT_IGNORE_MODVERSIONS.bits();
            }
            if ignore_vermagic {
                flags |= ModuleInitFlags::MODULE_INIT_IGNORE_VERMAGIC.bits();
            }
            warn_without_sys_module();

            let image = controller.descriptor().module_file();
            tracing::info!(path = ?image, flags, "loading module");
            controller.load(&params, flags)?;
            tracing::info!(release = %controller.release(), "module loaded");
        }

        Commands::Unload => {
            warn_without_sys_module();
            controller.unload()?;
            tracing::info!("module unloaded");
        }

        Commands::Status => {
            println!("{}", controller.state()?);
        }
    }

    Ok(())
}

fn read_mounts(path: &std::path::Path) -> Result<Vec<MountEntry>> {
    let json = if path.as_os_str() == "-" {
        std::io::read_to_string(std::io::stdin()).context("failed to read mounts from stdin")?
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?
    };
    serde_json::from_str(&json).context("invalid mount list")
}

/// The kernel decides; this only makes EPERM less surprising.
fn warn_without_sys_module() {
    match caps::has_cap(None, CapSet::Effective, Capability::CAP_SYS_MODULE) {
        Ok(true) => {}
        Ok(false) => {
            tracing::warn!("CAP_SYS_MODULE not in effective set, kernel will likely refuse");
        }
        Err(e) => tracing::debug!(error = %e, "could not read capabilities"),
    }
}
