//! kvm-disk-backup command-line entry point.

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};

use kvm_disk_backup::config::{BackupConfig, ErrorPolicy};
use kvm_disk_backup::paths::AppPaths;
use kvm_disk_backup::vm::{Backend, Hypervisor, LibvirtClient, VirshClient};
use kvm_disk_backup::logging::{self, Console};
use kvm_disk_backup::{Orchestrator, RunReport, SystemRunner, VolumeOps};

/// Snapshot, compress and verify the LVM volumes backing KVM virtual machines
#[derive(Parser, Debug)]
#[command(name = "kvm-disk-backup", version, about)]
struct Cli {
    /// Config file (default: ~/.config/kvm-disk-backup/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Back up every disk of the given VMs
    Run(RunArgs),
    /// Print the backing source path of each disk of the given VMs
    Disks {
        #[command(flatten)]
        hypervisor: HypervisorArgs,

        #[arg(value_name = "VM", required = true)]
        vms: Vec<String>,
    },
    /// Find logical volume paths containing HINT (snapshots excluded)
    Locate {
        #[arg(value_name = "HINT")]
        hint: String,
    },
}

#[derive(Args, Debug)]
struct HypervisorArgs {
    /// Hypervisor connection URI (e.g. qemu:///system)
    #[arg(long)]
    uri: Option<String>,

    /// How to talk to the hypervisor
    #[arg(long, value_enum)]
    backend: Option<Backend>,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// VM names, processed in order (overrides `vms` from the config file)
    #[arg(value_name = "VM")]
    vms: Vec<String>,

    /// Directory receiving one <volume>.gz per disk
    #[arg(short, long)]
    backup_dir: Option<PathBuf>,

    /// Copy-on-write space reserved for each snapshot, in GiB
    #[arg(short, long, value_name = "GB")]
    snapshot_size: Option<u64>,

    /// Free space required in the backup directory, in GiB (default: snapshot size)
    #[arg(long, value_name = "GB")]
    min_free: Option<u64>,

    /// dd block size in bytes
    #[arg(long, value_name = "BYTES")]
    block_size: Option<u64>,

    #[command(flatten)]
    hypervisor: HypervisorArgs,

    /// What to do when a disk fails
    #[arg(long, value_enum)]
    on_error: Option<ErrorPolicy>,

    /// Do not lock the backup directory
    #[arg(long)]
    no_lock: bool,

    /// Print the run report as JSON
    #[arg(long)]
    json: bool,
}

impl Cli {
    /// Whether stdout is reserved for the JSON report.
    fn json_output(&self) -> bool {
        matches!(&self.command, Commands::Run(args) if args.json)
    }
}

impl HypervisorArgs {
    fn apply(&self, config: &mut BackupConfig) {
        if let Some(uri) = &self.uri {
            config.libvirt_uri = uri.clone();
        }
        if let Some(backend) = self.backend {
            config.backend = backend;
        }
    }
}

impl RunArgs {
    fn apply(&self, config: &mut BackupConfig) {
        if !self.vms.is_empty() {
            config.vms = self.vms.clone();
        }
        if let Some(dir) = &self.backup_dir {
            config.backup_dir = dir.clone();
        }
        if let Some(size) = self.snapshot_size {
            config.snapshot_size_gb = size;
        }
        if let Some(min_free) = self.min_free {
            config.min_free_gb = Some(min_free);
        }
        if let Some(block_size) = self.block_size {
            config.block_size = block_size;
        }
        if let Some(policy) = self.on_error {
            config.on_error = policy;
        }
        if self.no_lock {
            config.lock = false;
        }
        self.hypervisor.apply(config);
    }
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let paths = AppPaths::resolve();
    let _log_guard = logging::init(&paths.logs, Console::for_output(cli.json_output()));

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to create Tokio runtime")?;

    runtime.block_on(run_cli(cli, paths))
}

async fn run_cli(cli: Cli, paths: AppPaths) -> Result<ExitCode> {
    let mut config = BackupConfig::load(cli.config.as_deref(), Some(&paths.config_file))?;

    match cli.command {
        Commands::Run(args) => {
            args.apply(&mut config);
            config.validate()?;

            let uri = config.libvirt_uri.clone();
            let report = match config.backend {
                Backend::Libvirt => backup(config, LibvirtClient::connect(&uri)?).await?,
                Backend::Virsh => backup(config, VirshClient::connect(&uri).await?).await?,
            };

            if args.json {
                write_report(&mut std::io::stdout().lock(), &report)?;
            }
            if report.has_failures() {
                warn!(failed = report.failed(), "Some disks were not backed up");
                return Ok(ExitCode::FAILURE);
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Disks { hypervisor, vms } => {
            hypervisor.apply(&mut config);
            let uri = config.libvirt_uri.clone();
            match config.backend {
                Backend::Libvirt => print_disks(&LibvirtClient::connect(&uri)?, &vms).await?,
                Backend::Virsh => print_disks(&VirshClient::connect(&uri).await?, &vms).await?,
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Locate { hint } => {
            let found = VolumeOps::new(&SystemRunner).locate(&hint).await?;
            if found.is_empty() {
                warn!(hint = %hint, "No logical volume matches");
                return Ok(ExitCode::FAILURE);
            }
            for path in found {
                println!("{path}");
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Run the backup; the hypervisor connection is closed when the
/// orchestrator goes out of scope, on success and on error alike.
async fn backup<H: Hypervisor>(config: BackupConfig, hypervisor: H) -> Result<RunReport> {
    info!(
        vms = config.vms.len(),
        backup_dir = %config.backup_dir.display(),
        snapshot_size_gb = config.snapshot_size_gb,
        "Starting backup run"
    );
    let orchestrator = Orchestrator::new(config, SystemRunner, hypervisor);
    Ok(orchestrator.run().await?)
}

/// The report is the only thing written to `out`.
fn write_report(out: &mut impl Write, report: &RunReport) -> Result<()> {
    writeln!(out, "{}", report.to_json()?)?;
    Ok(())
}

async fn print_disks<H: Hypervisor>(hypervisor: &H, vms: &[String]) -> Result<()> {
    for vm in vms {
        let domain = hypervisor.lookup(vm).await?;
        for source in hypervisor.disk_sources(&domain).await? {
            println!("{vm}\t{source}");
        }
    }
    Ok(())
}
