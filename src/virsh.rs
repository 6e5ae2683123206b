//! Interface to the virtualization daemon, driven through the `virsh`
//! command line tool.

use std::path::Path;
use std::process::Output;

use crate::error::BootstrapError;

async fn run(args: &[String]) -> Result<Output, BootstrapError> {
    let output = tokio::process::Command::new("virsh")
        .args(args)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| BootstrapError::Io {
            context: "running virsh".into(),
            source: e,
        })?;

    if !output.status.success() {
        return Err(BootstrapError::ExternalTool {
            command: format!("virsh {}", args.join(" ")),
            message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(output)
}

pub async fn define(descriptor: &Path) -> Result<(), BootstrapError> {
    run(&["define".into(), descriptor.display().to_string()]).await?;
    Ok(())
}

pub async fn create(descriptor: &Path) -> Result<(), BootstrapError> {
    run(&["create".into(), descriptor.display().to_string()]).await?;
    Ok(())
}

pub async fn autostart(name: &str) -> Result<(), BootstrapError> {
    run(&["autostart".into(), name.into()]).await?;
    Ok(())
}

/// Whether a domain with this name is currently defined. Errors (daemon
/// unreachable, unknown domain) count as "not defined".
pub async fn domain_defined(name: &str) -> bool {
    match tokio::process::Command::new("virsh")
        .args(["dominfo", name])
        .kill_on_drop(true)
        .output()
        .await
    {
        Ok(output) => output.status.success(),
        Err(_) => false,
    }
}

/// Raw DHCP lease table for a libvirt network.
pub async fn dhcp_leases(network: &str) -> Result<String, BootstrapError> {
    let output = run(&["net-dhcp-leases".into(), network.into()]).await?;
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Extract the machine's address from `virsh net-dhcp-leases` output.
///
/// The first two lines are the table header. When a machine has several
/// lease entries, the most recently issued one wins; lines start with the
/// expiry timestamp, so the lexicographically last line is the newest.
pub fn find_lease(output: &str, name: &str) -> Option<String> {
    let mut entries: Vec<&str> = output.lines().skip(2).collect();
    entries.sort_unstable();
    for line in entries.iter().rev() {
        let words: Vec<&str> = line.split_whitespace().collect();
        if words.get(5) == Some(&name) {
            let ip = words[4];
            return Some(ip.split('/').next().unwrap_or(ip).to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEASES: &str = "\
 Expiry Time           MAC address         Protocol   IP address           Hostname   Client ID or client certificate
-------------------------------------------------------------------------------------------------------------------
 2026-08-30 11:03:44   52:54:00:aa:bb:cc   ipv4       192.168.122.10/24    web01      -
 2026-08-30 12:41:02   52:54:00:aa:bb:cc   ipv4       192.168.122.23/24    web01      -
 2026-08-30 09:17:55   52:54:00:11:22:33   ipv4       192.168.122.7/24     db01       -
";

    #[test]
    fn finds_address_without_prefix() {
        assert_eq!(find_lease(LEASES, "db01").as_deref(), Some("192.168.122.7"));
    }

    #[test]
    fn prefers_most_recent_lease() {
        // Two entries for web01; the later expiry timestamp sorts last
        assert_eq!(
            find_lease(LEASES, "web01").as_deref(),
            Some("192.168.122.23")
        );
    }

    #[test]
    fn unknown_name_yields_none() {
        assert_eq!(find_lease(LEASES, "ghost"), None);
    }

    #[test]
    fn empty_table_yields_none() {
        let empty = " Expiry Time   MAC address   Protocol   IP address   Hostname   Client ID\n----\n\n";
        assert_eq!(find_lease(empty, "web01"), None);
    }

    #[test]
    fn short_lines_are_skipped() {
        let odd = "header\n-----\n one two\n";
        assert_eq!(find_lease(odd, "two"), None);
    }
}
