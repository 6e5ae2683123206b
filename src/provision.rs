//! Lifecycle orchestrator: disk materialization, boot media, domain
//! definition, address discovery, hosts reconciliation, and the optional
//! package bootstrap.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::EffectiveConfig;
use crate::error::BootstrapError;
use crate::lineinfile::{self, Matcher};
use crate::machine::{MachineSpec, NetworkMode};
use crate::retry::Poller;
use crate::{domain_xml, image, seed, virsh};

const POLL_INTERVAL: Duration = Duration::from_secs(1);
const HOSTS_FILE: &str = "/etc/hosts";

/// Run the full provisioning sequence. Rollback is the caller's concern;
/// this function only reports what failed.
pub async fn provision(
    spec: &MachineSpec,
    config: &EffectiveConfig,
    reuse_disk: bool,
    no_bootstrap: bool,
    cancel: &CancellationToken,
) -> Result<(), BootstrapError> {
    if !reuse_disk {
        let base = image::ensure_image(spec.distro, &config.images_path).await?;
        image::verify(spec.distro, &base).await?;

        println!("Copying base image to {}", spec.disk_path.display());
        tokio::fs::copy(&base, &spec.disk_path)
            .await
            .map_err(|e| BootstrapError::Io {
                context: format!("copying base image to {}", spec.disk_path.display()),
                source: e,
            })?;

        if let Some(size) = &spec.disk_size {
            resize_disk(&spec.disk_path, size).await?;
        }
    }

    println!("Generating boot media");
    seed::build_seed(spec, &config.iso_path).await?;

    println!("Defining domain {}", spec.name);
    define_and_start(spec).await?;

    let address = discover_address(spec, cancel).await?;
    let hostname = spec.hostname(&config.domain);
    println!("The address for {hostname} is {address}");

    if spec.hostname_override.is_none() {
        println!("Registering {hostname} in {HOSTS_FILE}");
        let matcher = Matcher::pattern(&format!("{}$", regex::escape(&hostname)))?;
        lineinfile::present(
            Path::new(HOSTS_FILE),
            &matcher,
            &format!("{address} {hostname}"),
        )?;
    }

    if !no_bootstrap {
        bootstrap_packages(&address, &config.initial_packages, cancel).await?;
    }

    println!("You have access to the (sudo enabled) user `ubuntu` by default");
    Ok(())
}

/// Resize the per-machine disk to its configured size.
async fn resize_disk(disk: &Path, size: &str) -> Result<(), BootstrapError> {
    let output = tokio::process::Command::new("qemu-img")
        .arg("resize")
        .arg(disk)
        .arg(size)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| BootstrapError::Io {
            context: "running qemu-img".into(),
            source: e,
        })?;
    if !output.status.success() {
        return Err(BootstrapError::ExternalTool {
            command: format!("qemu-img resize {} {size}", disk.display()),
            message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    tracing::info!(path = %disk.display(), size, "resized disk");
    Ok(())
}

/// Render the descriptor to a temp file scoped to the define/create calls,
/// then mark the domain for autostart.
async fn define_and_start(spec: &MachineSpec) -> Result<(), BootstrapError> {
    let xml = domain_xml::render(spec);
    let descriptor = tempfile::Builder::new()
        .suffix(".xml")
        .tempfile()
        .map_err(|e| BootstrapError::Io {
            context: "creating descriptor temp file".into(),
            source: e,
        })?;
    std::fs::write(descriptor.path(), &xml).map_err(|e| BootstrapError::Io {
        context: format!("writing descriptor to {}", descriptor.path().display()),
        source: e,
    })?;

    virsh::define(descriptor.path()).await?;
    virsh::create(descriptor.path()).await?;
    drop(descriptor);

    virsh::autostart(&spec.name).await
}

/// Static mode returns the configured address immediately; DHCP mode polls
/// the lease table until the machine shows up. There is no timeout; only
/// cancellation breaks the wait.
async fn discover_address(
    spec: &MachineSpec,
    cancel: &CancellationToken,
) -> Result<String, BootstrapError> {
    if let NetworkMode::Static { address, .. } = &spec.network {
        return Ok(address.clone());
    }

    println!("Waiting for an address");
    let poller = Poller::new(POLL_INTERVAL, cancel.clone());
    let name = spec.name.clone();
    poller
        .poll_until(move || {
            let name = name.clone();
            async move {
                match virsh::dhcp_leases("default").await {
                    Ok(table) => virsh::find_lease(&table, &name),
                    Err(e) => {
                        tracing::warn!(error = %e, "lease table query failed");
                        None
                    }
                }
            }
        })
        .await
}

enum BootstrapOutcome {
    Installed,
    Failed,
}

/// Install baseline packages over SSH. Connection-level failures retry
/// forever; any other failure prints a manual fallback command and skips
/// the step. The machine stays up either way.
async fn bootstrap_packages(
    address: &str,
    packages: &[String],
    cancel: &CancellationToken,
) -> Result<(), BootstrapError> {
    println!("Installing baseline packages on the virtual machine");

    let install = format!(
        "(test -e /usr/bin/python3 && echo 'python is installed') || \
         (sudo DEBIAN_FRONTEND=noninteractive apt-get -qy update && \
         sudo DEBIAN_FRONTEND=noninteractive apt-get install -qy {})",
        packages.join(" ")
    );
    let args: Vec<String> = vec![
        "-o".into(),
        "StrictHostKeyChecking=no".into(),
        format!("ubuntu@{address}"),
        "--".into(),
        install,
    ];

    let poller = Poller::new(POLL_INTERVAL, cancel.clone());
    let attempt_args = args.clone();
    let outcome = poller
        .poll_until(move || {
            let args = attempt_args.clone();
            async move {
                let result = tokio::process::Command::new("ssh")
                    .args(&args)
                    .stdin(Stdio::inherit())
                    .stdout(Stdio::inherit())
                    .stderr(Stdio::piped())
                    .kill_on_drop(true)
                    .output()
                    .await;

                let output = match result {
                    Ok(output) => output,
                    Err(e) => {
                        eprintln!("Installing packages failed, error: {e}");
                        return Some(BootstrapOutcome::Failed);
                    }
                };

                if output.status.success() {
                    return Some(BootstrapOutcome::Installed);
                }

                let stderr = String::from_utf8_lossy(&output.stderr);
                if is_transient(&stderr) {
                    return None;
                }

                eprintln!("Installing packages failed, error: {}", stderr.trim());
                println!("Maybe you can run the command manually:");
                println!();
                println!("sudo ssh {}", printable_command(&args));
                println!();
                Some(BootstrapOutcome::Failed)
            }
        })
        .await?;

    if let BootstrapOutcome::Installed = outcome {
        tracing::info!("baseline packages installed");
    }
    Ok(())
}

/// Connectivity errors that mean the guest simply is not up yet.
fn is_transient(stderr: &str) -> bool {
    stderr.contains("Connection refused") || stderr.contains("No route to host")
}

/// Join command parts, quoting any part containing whitespace so the
/// printed command can be pasted into a shell.
fn printable_command(parts: &[String]) -> String {
    parts
        .iter()
        .map(|p| {
            if p.contains(' ') {
                format!("\"{p}\"")
            } else {
                p.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_recognized() {
        assert!(is_transient("ssh: connect to host 10.0.0.5 port 22: Connection refused"));
        assert!(is_transient("ssh: connect to host 10.0.0.5 port 22: No route to host"));
        assert!(!is_transient("Permission denied (publickey)"));
        assert!(!is_transient(""));
    }

    #[test]
    fn printable_command_quotes_spaced_parts() {
        let parts = vec![
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "ubuntu@10.0.0.5".to_string(),
            "--".to_string(),
            "apt-get install -qy curl".to_string(),
        ];
        assert_eq!(
            printable_command(&parts),
            "-o StrictHostKeyChecking=no ubuntu@10.0.0.5 -- \"apt-get install -qy curl\""
        );
    }
}
