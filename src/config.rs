use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use facet::Facet;

use crate::error::BootstrapError;

pub const APP_NAME: &str = "vmbootstrap";

const DEFAULT_PACKAGES: &[&str] = &["qemu-guest-agent", "python3", "python3-apt"];
const DEFAULT_VCPU: u32 = 1;
const DEFAULT_MEMORY_KIB: u64 = 1_048_576;
const DEFAULT_DOMAIN: &str = "test";
const DEFAULT_BASE_PATH: &str = "/var/lib/libvirt";

/// On-disk site configuration. Every key is optional; resolution fills in
/// built-in defaults so an absent config file still produces a valid
/// `EffectiveConfig`.
#[derive(Debug, Clone, Default, Facet)]
#[facet(default)]
pub struct ConfigFile {
    pub initial_packages: Option<Vec<String>>,
    pub vcpu: Option<u32>,
    /// Memory in KiB.
    pub memory: Option<u64>,
    /// Disk resize target, e.g. "20G". No resize when unset.
    pub disk: Option<String>,
    /// Hostname suffix for provisioned machines.
    pub domain: Option<String>,
    pub base_path: Option<String>,
    pub images_path: Option<String>,
    pub iso_path: Option<String>,
    /// Default network-config template path (static mode).
    pub network_config: Option<String>,
    /// Default directory holding pre-generated SSH host keys.
    pub host_keys: Option<String>,
    #[facet(default)]
    pub public_keys: Vec<String>,
    #[facet(default)]
    pub profiles: BTreeMap<String, Profile>,
}

/// A named, reusable bundle of overrides.
#[derive(Debug, Clone, Default, Facet)]
#[facet(default)]
pub struct Profile {
    pub bridge: Option<String>,
    pub address: Option<String>,
    pub hostname: Option<String>,
    pub vcpu: Option<u32>,
    pub memory: Option<u64>,
    pub disk: Option<String>,
    pub domain: Option<String>,
    pub network_config: Option<String>,
    pub host_keys: Option<String>,
    pub initial_packages: Option<Vec<String>>,
    #[facet(default)]
    pub public_keys: Vec<String>,
}

/// CLI-level overrides, the highest-precedence layer.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub vcpu: Option<u32>,
    pub memory: Option<u64>,
    pub disk: Option<String>,
    pub bridge: Option<String>,
    pub address: Option<String>,
    pub hostname: Option<String>,
    pub network_config: Option<PathBuf>,
    pub host_keys: Option<PathBuf>,
    pub public_keys: Vec<String>,
}

/// The fully resolved configuration, read-only after construction.
#[derive(Debug, Clone)]
pub struct EffectiveConfig {
    pub initial_packages: Vec<String>,
    pub vcpu: u32,
    pub memory: u64,
    pub disk: Option<String>,
    pub domain: String,
    pub images_path: PathBuf,
    pub iso_path: PathBuf,
    pub network_config: Option<PathBuf>,
    pub host_keys: Option<PathBuf>,
    pub public_keys: Vec<String>,
    pub bridge: Option<String>,
    pub address: Option<String>,
    pub hostname: Option<String>,
}

/// Default config document location: first `XDG_CONFIG_DIRS` entry, else
/// `/etc`, joined with the app name.
pub fn default_config_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_DIRS")
        .ok()
        .and_then(|dirs| dirs.split(':').next().map(str::to_string))
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/etc"));
    base.join(APP_NAME).join("config.toml")
}

/// Load the config document. A missing file is not an error; it yields the
/// built-in defaults.
pub fn load_file(path: &Path) -> Result<ConfigFile, BootstrapError> {
    if !path.is_file() {
        return Ok(ConfigFile::default());
    }
    let contents = std::fs::read_to_string(path).map_err(|source| BootstrapError::ConfigLoad {
        path: path.display().to_string(),
        source,
    })?;
    facet_toml::from_str(&contents).map_err(|e| BootstrapError::ConfigParse {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

/// Merge the four layers into one `EffectiveConfig`. Scalar fields resolve
/// CLI > profile > file > default, independently per field; `public_keys`
/// is a duplicate-free union across all layers.
pub fn resolve(
    file: &ConfigFile,
    profile_name: Option<&str>,
    cli: &Overrides,
) -> Result<EffectiveConfig, BootstrapError> {
    let profile = match profile_name {
        Some(name) => Some(file.profiles.get(name).ok_or_else(|| {
            BootstrapError::Config {
                message: format!("profile '{name}' not found in config"),
            }
        })?),
        None => None,
    };
    let prof = |f: fn(&Profile) -> Option<&String>| profile.and_then(f).cloned();

    let base_path = file
        .base_path
        .clone()
        .unwrap_or_else(|| DEFAULT_BASE_PATH.to_string());
    let images_path = file
        .images_path
        .clone()
        .map(PathBuf::from)
        .unwrap_or_else(|| Path::new(&base_path).join("images"));
    let iso_path = file
        .iso_path
        .clone()
        .map(PathBuf::from)
        .unwrap_or_else(|| Path::new(&base_path).join("iso"));

    let initial_packages = profile
        .and_then(|p| p.initial_packages.clone())
        .or_else(|| file.initial_packages.clone())
        .unwrap_or_else(|| DEFAULT_PACKAGES.iter().map(|s| s.to_string()).collect());

    let mut public_keys = Vec::new();
    for key in file
        .public_keys
        .iter()
        .chain(profile.map(|p| p.public_keys.iter()).unwrap_or_default())
        .chain(cli.public_keys.iter())
    {
        let key = key.trim();
        if !key.is_empty() && !public_keys.iter().any(|k| k == key) {
            public_keys.push(key.to_string());
        }
    }

    Ok(EffectiveConfig {
        initial_packages,
        vcpu: cli
            .vcpu
            .or(profile.and_then(|p| p.vcpu))
            .or(file.vcpu)
            .unwrap_or(DEFAULT_VCPU),
        memory: cli
            .memory
            .or(profile.and_then(|p| p.memory))
            .or(file.memory)
            .unwrap_or(DEFAULT_MEMORY_KIB),
        disk: cli
            .disk
            .clone()
            .or_else(|| prof(|p| p.disk.as_ref()))
            .or_else(|| file.disk.clone()),
        domain: prof(|p| p.domain.as_ref())
            .or_else(|| file.domain.clone())
            .unwrap_or_else(|| DEFAULT_DOMAIN.to_string()),
        images_path,
        iso_path,
        network_config: cli
            .network_config
            .clone()
            .or_else(|| prof(|p| p.network_config.as_ref()).map(PathBuf::from))
            .or_else(|| file.network_config.clone().map(PathBuf::from)),
        host_keys: cli
            .host_keys
            .clone()
            .or_else(|| prof(|p| p.host_keys.as_ref()).map(PathBuf::from))
            .or_else(|| file.host_keys.clone().map(PathBuf::from)),
        public_keys,
        bridge: cli.bridge.clone().or_else(|| prof(|p| p.bridge.as_ref())),
        address: cli
            .address
            .clone()
            .or_else(|| prof(|p| p.address.as_ref())),
        hostname: cli
            .hostname
            .clone()
            .or_else(|| prof(|p| p.hostname.as_ref())),
    })
}

#[cfg(test)]
pub mod tests {
    use super::*;

    fn file_with_profile() -> ConfigFile {
        let mut file = ConfigFile {
            vcpu: Some(2),
            memory: Some(2_097_152),
            domain: Some("example.org".into()),
            public_keys: vec!["ssh-ed25519 AAAA-global".into()],
            ..Default::default()
        };
        file.profiles.insert(
            "dmz".into(),
            Profile {
                bridge: Some("br0".into()),
                address: Some("10.0.0.5".into()),
                vcpu: Some(4),
                public_keys: vec!["ssh-ed25519 AAAA-profile".into()],
                ..Default::default()
            },
        );
        file
    }

    /// A resolved config for other modules' tests.
    pub fn test_effective_config() -> EffectiveConfig {
        resolve(&ConfigFile::default(), None, &Overrides::default()).unwrap()
    }

    #[test]
    fn absent_file_yields_defaults() {
        let effective = resolve(&ConfigFile::default(), None, &Overrides::default()).unwrap();
        assert_eq!(effective.vcpu, 1);
        assert_eq!(effective.memory, 1_048_576);
        assert_eq!(effective.domain, "test");
        assert_eq!(effective.images_path, Path::new("/var/lib/libvirt/images"));
        assert_eq!(effective.iso_path, Path::new("/var/lib/libvirt/iso"));
        assert!(effective.disk.is_none());
        assert!(!effective.initial_packages.is_empty());
    }

    #[test]
    fn file_layer_overrides_defaults() {
        let effective = resolve(&file_with_profile(), None, &Overrides::default()).unwrap();
        assert_eq!(effective.vcpu, 2);
        assert_eq!(effective.domain, "example.org");
    }

    #[test]
    fn profile_layer_overrides_file() {
        let effective = resolve(&file_with_profile(), Some("dmz"), &Overrides::default()).unwrap();
        assert_eq!(effective.vcpu, 4);
        assert_eq!(effective.bridge.as_deref(), Some("br0"));
        assert_eq!(effective.address.as_deref(), Some("10.0.0.5"));
        // Field set only at the file layer keeps its file value
        assert_eq!(effective.memory, 2_097_152);
    }

    #[test]
    fn cli_layer_overrides_profile() {
        let cli = Overrides {
            vcpu: Some(8),
            bridge: Some("br1".into()),
            ..Default::default()
        };
        let effective = resolve(&file_with_profile(), Some("dmz"), &cli).unwrap();
        assert_eq!(effective.vcpu, 8);
        assert_eq!(effective.bridge.as_deref(), Some("br1"));
    }

    #[test]
    fn public_keys_are_a_union_across_layers() {
        let cli = Overrides {
            public_keys: vec![
                "ssh-ed25519 AAAA-cli".into(),
                // Duplicate of the global key, must collapse
                "ssh-ed25519 AAAA-global".into(),
            ],
            ..Default::default()
        };
        let effective = resolve(&file_with_profile(), Some("dmz"), &cli).unwrap();
        assert_eq!(
            effective.public_keys,
            vec![
                "ssh-ed25519 AAAA-global".to_string(),
                "ssh-ed25519 AAAA-profile".to_string(),
                "ssh-ed25519 AAAA-cli".to_string(),
            ]
        );
    }

    #[test]
    fn missing_profile_fails_fast() {
        let err = resolve(&file_with_profile(), Some("nope"), &Overrides::default()).unwrap_err();
        assert!(err.is_preflight());
        assert!(err.to_string().contains("profile 'nope' not found"));
    }

    #[test]
    fn base_path_derives_storage_paths() {
        let file = ConfigFile {
            base_path: Some("/srv/virt".into()),
            ..Default::default()
        };
        let effective = resolve(&file, None, &Overrides::default()).unwrap();
        assert_eq!(effective.images_path, Path::new("/srv/virt/images"));
        assert_eq!(effective.iso_path, Path::new("/srv/virt/iso"));
    }

    #[test]
    fn explicit_storage_paths_win_over_base_path() {
        let file = ConfigFile {
            base_path: Some("/srv/virt".into()),
            images_path: Some("/data/images".into()),
            ..Default::default()
        };
        let effective = resolve(&file, None, &Overrides::default()).unwrap();
        assert_eq!(effective.images_path, Path::new("/data/images"));
        assert_eq!(effective.iso_path, Path::new("/srv/virt/iso"));
    }

    #[test]
    fn parse_config_document() {
        let toml = r#"
initial_packages = ["qemu-guest-agent"]
vcpu = 2
memory = 2097152
domain = "example.org"
images_path = "/data/images"
public_keys = ["ssh-ed25519 AAAA-one"]

[profiles.dmz]
bridge = "br0"
address = "10.0.0.5"
hostname = "web.example.org"
"#;
        let file: ConfigFile = facet_toml::from_str(toml).unwrap();
        assert_eq!(file.vcpu, Some(2));
        assert_eq!(file.images_path.as_deref(), Some("/data/images"));
        let dmz = &file.profiles["dmz"];
        assert_eq!(dmz.bridge.as_deref(), Some("br0"));
        assert_eq!(dmz.hostname.as_deref(), Some("web.example.org"));
    }

    #[test]
    fn load_missing_file_is_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let file = load_file(&dir.path().join("config.toml")).unwrap();
        assert!(file.vcpu.is_none());
        assert!(file.profiles.is_empty());
    }

    #[test]
    fn load_malformed_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "vcpu = [not toml").unwrap();
        let err = load_file(&path).unwrap_err();
        assert!(matches!(err, BootstrapError::ConfigParse { .. }));
    }
}
