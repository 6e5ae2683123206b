//! Teardown: best-effort removal of every artifact provisioning creates.
//! Each step runs regardless of earlier failures so a half-provisioned
//! machine still gets cleaned up.

use std::path::Path;

use crate::config::EffectiveConfig;
use crate::lineinfile::{self, Matcher};
use crate::virsh;

const HOSTS_FILE: &str = "/etc/hosts";
const KNOWN_HOSTS_FILE: &str = "/root/.ssh/known_hosts";

/// Tear down the named machine. Failures are logged and skipped, never
/// raised; removing a machine that does not exist is a no-op with warnings.
/// With `interactive` set, each step asks for confirmation first.
pub async fn remove(name: &str, interactive: bool, config: &EffectiveConfig) {
    remove_at(
        name,
        interactive,
        config,
        Path::new(HOSTS_FILE),
        Path::new(KNOWN_HOSTS_FILE),
    )
    .await
}

/// Teardown against explicit hosts/known-hosts locations.
pub async fn remove_at(
    name: &str,
    interactive: bool,
    config: &EffectiveConfig,
    hosts_file: &Path,
    known_hosts: &Path,
) {
    let hostname = format!("{name}.{}", config.domain);
    // Resolve the address while the lease may still exist
    let address = lookup_address(name, config).await;
    let commands = teardown_commands(name, &hostname, address.as_deref(), config, known_hosts);

    for command in commands {
        let printable = command.join(" ");
        println!("Running: {printable}");
        if interactive && !confirm(&printable) {
            continue;
        }
        run_step(&command).await;
    }

    let printable = format!("removing {hostname} from {}", hosts_file.display());
    println!("Running: {printable}");
    if interactive && !confirm(&printable) {
        return;
    }
    match Matcher::pattern(&format!("{}$", regex::escape(&hostname))) {
        Ok(matcher) => {
            if let Err(e) = lineinfile::absent(hosts_file, &matcher) {
                tracing::warn!(error = %e, "hosts file cleanup failed, skipping");
            }
        }
        Err(e) => tracing::warn!(error = %e, "hosts file cleanup failed, skipping"),
    }
}

/// The known-hosts entry is keyed by whatever the bootstrap step connected
/// to, which is the address; find it so the purge can cover both names.
async fn lookup_address(name: &str, config: &EffectiveConfig) -> Option<String> {
    if let Some(address) = &config.address {
        return Some(address.clone());
    }
    match virsh::dhcp_leases("default").await {
        Ok(table) => virsh::find_lease(&table, name),
        Err(_) => None,
    }
}

fn teardown_commands(
    name: &str,
    hostname: &str,
    address: Option<&str>,
    config: &EffectiveConfig,
    known_hosts: &Path,
) -> Vec<Vec<String>> {
    let disk = config.images_path.join(format!("{name}.img"));
    let iso = config.iso_path.join(format!("{name}.iso"));
    let known_hosts = known_hosts.display().to_string();

    let mut commands = vec![
        vec!["virsh".into(), "destroy".into(), name.into()],
        vec!["virsh".into(), "undefine".into(), name.into()],
        vec!["rm".into(), disk.display().to_string()],
        vec!["rm".into(), iso.display().to_string()],
        vec![
            "ssh-keygen".into(),
            "-f".into(),
            known_hosts.clone(),
            "-R".into(),
            hostname.into(),
        ],
    ];
    if let Some(address) = address {
        commands.push(vec![
            "ssh-keygen".into(),
            "-f".into(),
            known_hosts,
            "-R".into(),
            address.into(),
        ]);
    }
    commands
}

async fn run_step(command: &[String]) {
    let result = tokio::process::Command::new(&command[0])
        .args(&command[1..])
        .kill_on_drop(true)
        .output()
        .await;
    match result {
        Ok(output) if output.status.success() => {}
        Ok(output) => {
            tracing::warn!(
                command = %command.join(" "),
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "step failed, skipping"
            );
        }
        Err(e) => {
            tracing::warn!(command = %command.join(" "), error = %e, "step failed, skipping");
        }
    }
}

fn confirm(step: &str) -> bool {
    inquire::Confirm::new(&format!("Run `{step}`?"))
        .with_default(true)
        .prompt()
        .unwrap_or(false)
}
