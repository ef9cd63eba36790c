//! Pure HANA Snapshot
//!
//! Command line front end: takes application-consistent or crash-consistent
//! storage snapshots of an SAP HANA system on a FlashArray, and restores
//! the HANA data volume from a snapshot listed in the backup catalog.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use pure_hana_snapshot::adapters::{
    FlashArrayClient, HdbsqlClient, SshExecutor, SshSettings, TerminalPrompt, VSphereClient,
};
use pure_hana_snapshot::domain::ports::VCenterLookupRef;
use pure_hana_snapshot::{
    AppConfig, BackupOutcome, BackupRequest, Collaborators, DeploymentMode, Error, RestoreOutcome, RestoreRequest,
    Result, SnapshotOrchestrator,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Storage snapshot backup and recovery for SAP HANA on FlashArray
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file with non-secret settings
    #[arg(long, env = "PURE_HANA_CONFIG")]
    config: Option<PathBuf>,

    /// HANA host to start from
    #[arg(long, env = "HANA_HOST")]
    hana_host: Option<String>,

    /// HANA instance number
    #[arg(long, env = "HANA_INSTANCE_NUMBER")]
    instance_number: Option<String>,

    /// Database user for the snapshot and catalog commands
    #[arg(long, env = "HANA_DB_USER")]
    db_user: Option<String>,

    #[arg(long, env = "HANA_DB_PASSWORD", hide_env_values = true)]
    db_password: Option<String>,

    /// hdbuserstore key for the database logon, keeps the password out of
    /// the process list
    #[arg(long, env = "HANA_DB_USER_KEY")]
    db_user_key: Option<String>,

    /// OS user for mount, freeze and rescan commands
    #[arg(long, env = "HANA_OS_USER")]
    os_user: Option<String>,

    #[arg(long, env = "HANA_OS_PASSWORD", hide_env_values = true)]
    os_password: Option<String>,

    /// Password of <sid>adm, needed to recover the system database
    #[arg(long, env = "HANA_SIDADM_PASSWORD", hide_env_values = true)]
    sidadm_password: Option<String>,

    /// FlashArray management address
    #[arg(long, env = "FLASHARRAY")]
    flasharray: Option<String>,

    #[arg(long, env = "FLASHARRAY_USER")]
    flasharray_user: Option<String>,

    #[arg(long, env = "FLASHARRAY_PASSWORD", hide_env_values = true)]
    flasharray_password: Option<String>,

    /// vCenter address, needed when a persistence volume is a vVol disk
    #[arg(long, env = "VCENTER")]
    vcenter: Option<String>,

    #[arg(long, env = "VCENTER_USER")]
    vcenter_user: Option<String>,

    #[arg(long, env = "VCENTER_PASSWORD", hide_env_values = true)]
    vcenter_password: Option<String>,

    /// DNS domain of a scale-out system; selects scale-out mode
    #[arg(long, env = "HANA_DOMAIN")]
    domain: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Take a storage snapshot backup
    Backup {
        /// Snapshot data and log volumes through a protection group without
        /// involving the database
        #[arg(long)]
        crash_consistent: bool,

        /// Freeze the filesystems around the storage snapshot
        #[arg(long)]
        freeze_filesystem: bool,
    },
    /// Restore the data volume from a snapshot in the backup catalog
    Restore {
        /// Overwrite the data volume in place instead of restoring to a new
        /// volume
        #[arg(long)]
        overwrite_volume: bool,
    },
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() {
    let args = Args::parse();

    init_logging(&args);

    if let Err(e) = run(args).await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let config = load_config(&args)?;
    config.validate()?;

    info!("Starting Pure HANA Snapshot");
    info!("  Version: {}", pure_hana_snapshot::VERSION);
    info!("  HANA host: {} (instance {})", config.hana.host, config.hana.instance_number);
    info!("  FlashArray: {}", config.flasharray.endpoint);
    if let DeploymentMode::ScaleOut { domain } = &config.hana.deployment {
        info!("  Scale-out domain: {}", domain);
    }

    let orchestrator = build_orchestrator(&config).await?;

    match args.command {
        Command::Backup {
            crash_consistent,
            freeze_filesystem,
        } => {
            let request = BackupRequest {
                crash_consistent,
                freeze: freeze_filesystem,
            };
            match orchestrator.backup(&request).await? {
                BackupOutcome::ApplicationConsistent(record) => {
                    println!(
                        "Backup {} {}, FlashArray snapshot serial(s): {}",
                        record.backup_id,
                        record.state,
                        record.storage_snapshot_ids.join(", ")
                    );
                }
                BackupOutcome::CrashConsistent { group, snapshot } => {
                    println!(
                        "Crash consistent snapshot {} of protection group {} ({} volumes)",
                        snapshot.name,
                        group.name,
                        group.members.len()
                    );
                }
            }
        }
        Command::Restore { overwrite_volume } => {
            let request = RestoreRequest {
                overwrite: overwrite_volume,
            };
            match orchestrator.restore(&request).await? {
                RestoreOutcome::Restored {
                    backup_id,
                    strategy,
                    volume,
                    tenants_recovered,
                    fstab_update_required,
                } => {
                    println!("Restored backup {} ({}) onto volume {}", backup_id, strategy, volume);
                    if !tenants_recovered.is_empty() {
                        println!("Recovered tenants: {}", tenants_recovered.join(", "));
                    }
                    if fstab_update_required {
                        warn!("The data volume changed, update /etc/fstab on the HANA host");
                    }
                }
                RestoreOutcome::Cancelled => println!("Restore cancelled, nothing was changed"),
            }
        }
    }

    Ok(())
}

// =============================================================================
// Configuration
// =============================================================================

fn load_config(args: &Args) -> Result<AppConfig> {
    let mut config = match &args.config {
        Some(path) => AppConfig::from_file(path)?,
        None => AppConfig::default(),
    };

    if let Some(host) = &args.hana_host {
        config.hana.host = host.clone();
    }
    if let Some(nr) = &args.instance_number {
        config.hana.instance_number = nr.clone();
    }
    if let Some(user) = &args.db_user {
        config.hana.sql.user = user.clone();
    }
    if let Some(key) = &args.db_user_key {
        config.hana.sql.user_store_key = Some(key.clone());
    }
    if let Some(user) = &args.os_user {
        config.host.user = user.clone();
    }
    if let Some(endpoint) = &args.flasharray {
        config.flasharray.endpoint = endpoint.clone();
    }
    if let Some(user) = &args.flasharray_user {
        config.flasharray.user = user.clone();
    }
    if let Some(address) = &args.vcenter {
        config.vsphere.address = Some(address.clone());
    }
    if let Some(user) = &args.vcenter_user {
        config.vsphere.user = Some(user.clone());
    }
    if let Some(domain) = &args.domain {
        config.hana.deployment = DeploymentMode::ScaleOut { domain: domain.clone() };
    }

    config.hana.sql.password = args.db_password.clone().unwrap_or_default();
    config.host.password = args.os_password.clone().unwrap_or_default();
    config.host.sidadm_password = args.sidadm_password.clone();
    config.flasharray.password = args.flasharray_password.clone().unwrap_or_default();
    config.vsphere.password = args.vcenter_password.clone();

    if config.hana.sql.password.is_empty() && config.hana.sql.user_store_key.is_none() {
        return Err(Error::Configuration(
            "database password is not set (HANA_DB_PASSWORD or HANA_DB_USER_KEY)".into(),
        ));
    }
    if config.flasharray.password.is_empty() {
        return Err(Error::Configuration("FlashArray password is not set (FLASHARRAY_PASSWORD)".into()));
    }
    Ok(config)
}

async fn build_orchestrator(config: &AppConfig) -> Result<SnapshotOrchestrator> {
    let array = FlashArrayClient::connect(&config.flasharray).await?;

    let vcenter: Option<VCenterLookupRef> = match config.vsphere.credentials() {
        Some(_) => Some(Arc::new(VSphereClient::new(config.vsphere.clone())?)),
        None => None,
    };

    let collaborators = Collaborators {
        database: Arc::new(HdbsqlClient::new(config.hdbsql())),
        shell: Arc::new(SshExecutor::new(SshSettings {
            port: config.host.ssh_port,
            ..Default::default()
        })),
        array: Arc::new(array),
        vcenter,
        prompt: Arc::new(TerminalPrompt::new()),
    };

    Ok(SnapshotOrchestrator::new(config.orchestrator(), collaborators))
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for noisy in ["russh=warn", "reqwest=warn", "hyper=warn"] {
        if let Ok(directive) = noisy.parse() {
            filter = filter.add_directive(directive);
        }
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}
