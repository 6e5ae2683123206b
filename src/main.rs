use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use vmbootstrap::cli::{Cli, Command, ProvisionArgs, RemoveArgs};
use vmbootstrap::config::{self, Overrides};
use vmbootstrap::error::BootstrapError;
use vmbootstrap::machine::MachineSpec;
use vmbootstrap::{distro, provision, remove, virsh};

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("vmbootstrap=info")),
        )
        .init();

    match cli.command {
        Command::Provision(args) => run_provision(args).await.map_err(Into::into),
        Command::Remove(args) => run_remove(args).await.map_err(Into::into),
    }
}

async fn run_provision(args: ProvisionArgs) -> Result<(), BootstrapError> {
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(config::default_config_path);
    let file = config::load_file(&config_path)?;
    let overrides = Overrides {
        vcpu: args.vcpu,
        memory: args.memory,
        disk: args.disk.clone(),
        bridge: args.bridge.clone(),
        address: args.address.clone(),
        hostname: args.hostname.clone(),
        network_config: args.network_config.clone(),
        host_keys: args.host_keys.clone(),
        public_keys: args.keys.clone(),
    };
    let effective = config::resolve(&file, args.profile.as_deref(), &overrides)?;
    let distro = distro::lookup(&args.distribution, args.variant.as_deref())?;
    let spec = MachineSpec::new(&args.name, distro, &effective)?;

    if spec.disk_path.exists() && !args.run {
        return Err(BootstrapError::Precondition {
            message: format!(
                "{} already exists; pass --run to reuse the disk",
                spec.disk_path.display()
            ),
        });
    }

    ensure_root()?;

    if !args.run && virsh::domain_defined(&spec.name).await {
        return Err(BootstrapError::Precondition {
            message: format!(
                "domain {} is already defined; pass --run to continue anyway",
                spec.name
            ),
        });
    }

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Interrupted, cleaning up");
            signal_token.cancel();
        }
    });

    let result = tokio::select! {
        r = provision::provision(&spec, &effective, args.run, args.no_bootstrap, &cancel) => r,
        _ = cancel.cancelled() => Err(BootstrapError::Interrupted),
    };

    match result {
        Ok(()) => Ok(()),
        Err(e) if e.is_preflight() => Err(e),
        Err(e) if args.no_rollback => {
            eprintln!("Provisioning failed; leaving artifacts in place (--no-rollback)");
            Err(e)
        }
        Err(e) => {
            eprintln!("Provisioning failed, rolling back: {e}");
            remove::remove(&spec.name, false, &effective).await;
            match e {
                BootstrapError::Interrupted => Ok(()),
                other => Err(other),
            }
        }
    }
}

async fn run_remove(args: RemoveArgs) -> Result<(), BootstrapError> {
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(config::default_config_path);
    let file = config::load_file(&config_path)?;
    let effective = config::resolve(&file, None, &Overrides::default())?;

    ensure_root()?;

    for name in &args.names {
        remove::remove(name, args.step, &effective).await;
    }
    Ok(())
}

/// Storage paths and the hosts file are root-owned; fail early with a clear
/// message instead of part-way through.
fn ensure_root() -> Result<(), BootstrapError> {
    // geteuid never fails
    let euid = unsafe { libc::geteuid() };
    if euid != 0 {
        return Err(BootstrapError::Precondition {
            message: "administrator privileges are required; run as root".into(),
        });
    }
    Ok(())
}
