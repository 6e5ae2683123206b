use std::path::PathBuf;

use rand_core::{OsRng, RngCore};

use crate::config::EffectiveConfig;
use crate::distro::DistroSpec;
use crate::error::BootstrapError;

/// How the machine gets its address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkMode {
    /// Default libvirt network, address discovered from the DHCP lease table.
    Dhcp,
    /// Bridged interface with a pre-assigned address.
    Static { bridge: String, address: String },
}

/// Resolved description of one machine to provision. Immutable once built;
/// in particular the MAC address is generated exactly once and reused by
/// every document derived from this spec.
#[derive(Debug, Clone)]
pub struct MachineSpec {
    pub name: String,
    pub distro: &'static DistroSpec,
    pub vcpu: u32,
    /// Memory in KiB.
    pub memory: u64,
    pub disk_size: Option<String>,
    pub network: NetworkMode,
    pub hostname_override: Option<String>,
    pub network_config: Option<PathBuf>,
    pub host_keys: Option<PathBuf>,
    pub mac_address: String,
    pub public_keys: Vec<String>,
    /// Cached base image for the selected distribution/variant.
    pub image_path: PathBuf,
    /// Per-machine disk.
    pub disk_path: PathBuf,
    /// Per-machine cloud-init seed ISO.
    pub iso_path: PathBuf,
}

impl MachineSpec {
    pub fn new(
        name: &str,
        distro: &'static DistroSpec,
        config: &EffectiveConfig,
    ) -> Result<Self, BootstrapError> {
        validate_name(name)?;

        let network = match (&config.bridge, &config.address) {
            (Some(bridge), Some(address)) => NetworkMode::Static {
                bridge: bridge.clone(),
                address: address.clone(),
            },
            (Some(_), None) => {
                return Err(BootstrapError::Config {
                    message: "static network mode requires an address (set --address or the profile's address)".into(),
                });
            }
            (None, Some(_)) => {
                return Err(BootstrapError::Config {
                    message: "a static address requires a bridge (set --bridge or the profile's bridge)".into(),
                });
            }
            (None, None) => NetworkMode::Dhcp,
        };

        Ok(Self {
            name: name.to_string(),
            distro,
            vcpu: config.vcpu,
            memory: config.memory,
            disk_size: config.disk.clone(),
            network,
            hostname_override: config.hostname.clone(),
            network_config: config.network_config.clone(),
            host_keys: config.host_keys.clone(),
            mac_address: generate_mac(),
            public_keys: gather_public_keys(&config.public_keys),
            image_path: config.images_path.join(distro.image_cache_name()),
            disk_path: config.images_path.join(format!("{name}.img")),
            iso_path: config.iso_path.join(format!("{name}.iso")),
        })
    }

    /// Target fully-qualified hostname: explicit override, or
    /// `<name>.<domain>`.
    pub fn hostname(&self, domain: &str) -> String {
        self.hostname_override
            .clone()
            .unwrap_or_else(|| format!("{}.{domain}", self.name))
    }
}

/// Locally-administered QEMU/KVM MAC: fixed 52:54:00 vendor prefix, random
/// low three bytes.
fn generate_mac() -> String {
    let mut bytes = [0u8; 3];
    OsRng.fill_bytes(&mut bytes);
    format!(
        "52:54:00:{:02x}:{:02x}:{:02x}",
        bytes[0], bytes[1], bytes[2]
    )
}

/// Authorized keys for the new machine: the local user's authorized_keys
/// file, root's default public key, then config/profile/CLI keys. Order is
/// preserved, duplicates collapse.
fn gather_public_keys(configured: &[String]) -> Vec<String> {
    let mut sources = Vec::new();

    if let Some(home) = dirs::home_dir() {
        let authorized = home.join(".ssh").join("authorized_keys");
        if let Ok(contents) = std::fs::read_to_string(&authorized) {
            sources.extend(contents.lines().map(str::to_string));
        }
    }
    if let Ok(root_key) = std::fs::read_to_string("/root/.ssh/id_ed25519.pub") {
        sources.push(root_key);
    }
    sources.extend(configured.iter().cloned());

    merge_keys(sources)
}

/// Collapse a key list: trim, drop empties and comment lines, dedupe while
/// preserving first-seen order.
pub fn merge_keys(sources: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut keys: Vec<String> = Vec::new();
    for entry in sources {
        for line in entry.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if !keys.iter().any(|k| k == line) {
                keys.push(line.to_string());
            }
        }
    }
    keys
}

fn validate_name(name: &str) -> Result<(), BootstrapError> {
    let valid = !name.is_empty()
        && name.chars().next().is_some_and(|c| c.is_ascii_alphanumeric())
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-');
    if !valid {
        return Err(BootstrapError::Config {
            message: format!("machine name must match [a-zA-Z0-9][a-zA-Z0-9._-]* (got '{name}')"),
        });
    }
    Ok(())
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::config::tests::test_effective_config;
    use crate::distro;

    /// A MachineSpec for other modules' tests.
    pub fn test_machine_spec(name: &str) -> MachineSpec {
        let config = test_effective_config();
        let distro = distro::lookup("ubuntu", None).unwrap();
        MachineSpec::new(name, distro, &config).unwrap()
    }

    #[test]
    fn mac_has_vendor_prefix_and_format() {
        let mac = generate_mac();
        assert!(mac.starts_with("52:54:00:"));
        assert_eq!(mac.len(), 17);
        assert_eq!(mac.split(':').count(), 6);
    }

    #[test]
    fn paths_derive_from_name() {
        let spec = test_machine_spec("web01");
        assert_eq!(
            spec.disk_path,
            PathBuf::from("/var/lib/libvirt/images/web01.img")
        );
        assert_eq!(spec.iso_path, PathBuf::from("/var/lib/libvirt/iso/web01.iso"));
        assert_eq!(
            spec.image_path,
            PathBuf::from("/var/lib/libvirt/images/ubuntu-noble.img")
        );
    }

    #[test]
    fn static_mode_requires_both_bridge_and_address() {
        let distro = distro::lookup("ubuntu", None).unwrap();
        let mut config = test_effective_config();
        config.bridge = Some("br0".into());
        let err = MachineSpec::new("web01", distro, &config).unwrap_err();
        assert!(err.to_string().contains("requires an address"));

        config.bridge = None;
        config.address = Some("10.0.0.5".into());
        let err = MachineSpec::new("web01", distro, &config).unwrap_err();
        assert!(err.to_string().contains("requires a bridge"));
    }

    #[test]
    fn static_mode_resolves() {
        let distro = distro::lookup("ubuntu", None).unwrap();
        let mut config = test_effective_config();
        config.bridge = Some("br0".into());
        config.address = Some("10.0.0.5".into());
        let spec = MachineSpec::new("web01", distro, &config).unwrap();
        assert_eq!(
            spec.network,
            NetworkMode::Static {
                bridge: "br0".into(),
                address: "10.0.0.5".into()
            }
        );
    }

    #[test]
    fn hostname_uses_domain_suffix() {
        let spec = test_machine_spec("web01");
        assert_eq!(spec.hostname("test"), "web01.test");
    }

    #[test]
    fn hostname_override_wins() {
        let mut spec = test_machine_spec("web01");
        spec.hostname_override = Some("custom.example.org".into());
        assert_eq!(spec.hostname("test"), "custom.example.org");
    }

    #[test]
    fn merge_keys_dedupes_and_trims() {
        let merged = merge_keys([
            "ssh-ed25519 AAAA-one\nssh-rsa BBBB-two\n".to_string(),
            "  ssh-ed25519 AAAA-one  ".to_string(),
            "\n".to_string(),
            "# comment".to_string(),
            "ssh-ed25519 CCCC-three".to_string(),
        ]);
        assert_eq!(
            merged,
            vec![
                "ssh-ed25519 AAAA-one".to_string(),
                "ssh-rsa BBBB-two".to_string(),
                "ssh-ed25519 CCCC-three".to_string(),
            ]
        );
    }

    #[test]
    fn invalid_names_rejected() {
        for name in ["", "-bad", ".bad", "a/b", "has space"] {
            assert!(validate_name(name).is_err(), "expected '{name}' rejected");
        }
    }

    #[test]
    fn valid_names_accepted() {
        for name in ["web01", "db-1", "vm.dev", "A_2"] {
            validate_name(name).unwrap();
        }
    }
}
