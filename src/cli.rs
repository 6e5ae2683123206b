use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "vmbootstrap", version, about = "Provision and tear down libvirt virtual machines")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Provision a new virtual machine
    Provision(ProvisionArgs),
    /// Tear down virtual machines and their artifacts
    Remove(RemoveArgs),
}

#[derive(Parser, Debug)]
pub struct ProvisionArgs {
    /// Machine name, also used as the libvirt domain name
    pub name: String,

    /// Distribution to install
    #[arg(short, long, default_value = "ubuntu")]
    pub distribution: String,

    /// Distribution variant (release); defaults per distribution
    #[arg(long)]
    pub variant: Option<String>,

    /// Reuse an existing disk instead of refusing to overwrite it
    #[arg(short, long)]
    pub run: bool,

    /// Path to the config document
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Named profile from the config document
    #[arg(short, long)]
    pub profile: Option<String>,

    /// Bridge interface for static networking
    #[arg(short, long)]
    pub bridge: Option<String>,

    /// Static address for the machine (requires --bridge)
    #[arg(long)]
    pub address: Option<String>,

    /// Fully-qualified hostname, overriding <name>.<domain>
    #[arg(long)]
    pub hostname: Option<String>,

    /// Network-config template for static networking
    #[arg(long)]
    pub network_config: Option<PathBuf>,

    /// Number of virtual CPUs
    #[arg(long)]
    pub vcpu: Option<u32>,

    /// Memory in KiB
    #[arg(long)]
    pub memory: Option<u64>,

    /// Disk resize target, e.g. 20G
    #[arg(long)]
    pub disk: Option<String>,

    /// Directory with pre-generated SSH host keys to place on the machine
    #[arg(long)]
    pub host_keys: Option<PathBuf>,

    /// Extra authorized public key (repeatable)
    #[arg(short = 'k', long = "key")]
    pub keys: Vec<String>,

    /// On failure, leave partial artifacts in place instead of removing them
    #[arg(long)]
    pub no_rollback: bool,

    /// Skip the baseline package installation over SSH
    #[arg(long)]
    pub no_bootstrap: bool,
}

#[derive(Parser, Debug)]
pub struct RemoveArgs {
    /// Names of the machines to tear down
    #[arg(required = true)]
    pub names: Vec<String>,

    /// Confirm each teardown step interactively
    #[arg(long)]
    pub step: bool,

    /// Path to the config document
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}
