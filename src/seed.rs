//! Cloud-init seed dataset: meta-data, optional user-data with host key
//! material, optional network-config, packed into an ISO by the external
//! `genisoimage` tool.

use std::path::{Path, PathBuf};

use crate::error::BootstrapError;
use crate::machine::{MachineSpec, NetworkMode};

const HOST_KEY_TYPES: [&str; 3] = ["ed25519", "rsa", "ecdsa"];

/// Instance metadata: hostname plus the full authorized-keys list.
pub fn build_meta_data(spec: &MachineSpec) -> String {
    let mut out = format!("local-hostname: {}\npublic-keys:\n", spec.name);
    for key in &spec.public_keys {
        out.push_str("  - ");
        out.push_str(key);
        out.push('\n');
    }
    out
}

/// Cloud-config document carrying pre-generated SSH host keys, formatted
/// for the guest's first-boot agent. Returns `None` when the directory
/// yields no key material at all; the document is then omitted from the
/// seed rather than shipped empty.
pub fn build_user_data(host_keys: &Path) -> Result<Option<String>, BootstrapError> {
    let mut body = String::new();

    for keytype in HOST_KEY_TYPES {
        let private = host_keys.join(format!("ssh_host_{keytype}_key"));
        if private.is_file() {
            append_key_block(&mut body, &format!("{keytype}_private"), &private)?;
        }
        let public = host_keys.join(format!("ssh_host_{keytype}_key.pub"));
        if public.is_file() {
            append_key_block(&mut body, &format!("{keytype}_public"), &public)?;
        }
    }

    if body.is_empty() {
        Ok(None)
    } else {
        Ok(Some(format!("#cloud-config\n\nssh_keys:\n{body}")))
    }
}

fn append_key_block(out: &mut String, label: &str, path: &Path) -> Result<(), BootstrapError> {
    let contents = std::fs::read_to_string(path).map_err(|e| BootstrapError::Io {
        context: format!("reading host key {}", path.display()),
        source: e,
    })?;
    out.push_str(&format!("  {label}: |\n"));
    for line in contents.lines() {
        out.push_str("    ");
        out.push_str(line);
        out.push('\n');
    }
    out.push('\n');
    Ok(())
}

/// Render a network-config template, substituting the generated MAC.
pub fn render_network_config(template: &str, mac_address: &str) -> String {
    template.replace("{macaddress}", mac_address)
}

/// Build the seed dataset and pack it into `spec.iso_path`. Documents are
/// staged next to the ISO; only the documents that exist are packed.
pub async fn build_seed(spec: &MachineSpec, iso_dir: &Path) -> Result<PathBuf, BootstrapError> {
    tokio::fs::create_dir_all(iso_dir)
        .await
        .map_err(|e| BootstrapError::Io {
            context: format!("creating iso dir {}", iso_dir.display()),
            source: e,
        })?;

    let mut documents: Vec<PathBuf> = Vec::new();

    let meta_data = iso_dir.join("meta-data");
    write_document(&meta_data, &build_meta_data(spec)).await?;
    documents.push(meta_data);

    if let Some(host_keys) = &spec.host_keys
        && let Some(user_data) = build_user_data(host_keys)?
    {
        println!("Placing host keys from {}", host_keys.display());
        let path = iso_dir.join("user-data");
        write_document(&path, &user_data).await?;
        documents.push(path);
    }

    if let NetworkMode::Static { .. } = spec.network
        && let Some(template_path) = &spec.network_config
    {
        let template =
            std::fs::read_to_string(template_path).map_err(|e| BootstrapError::Io {
                context: format!("reading network template {}", template_path.display()),
                source: e,
            })?;
        let path = iso_dir.join("network-config");
        write_document(&path, &render_network_config(&template, &spec.mac_address)).await?;
        documents.push(path);
    }

    pack_iso(&spec.iso_path, &documents).await?;
    tracing::info!(path = %spec.iso_path.display(), "generated cloud-init seed ISO");
    Ok(spec.iso_path.clone())
}

async fn write_document(path: &Path, contents: &str) -> Result<(), BootstrapError> {
    tokio::fs::write(path, contents)
        .await
        .map_err(|e| BootstrapError::Io {
            context: format!("writing {}", path.display()),
            source: e,
        })
}

async fn pack_iso(iso_path: &Path, documents: &[PathBuf]) -> Result<(), BootstrapError> {
    let output = tokio::process::Command::new("genisoimage")
        .arg("-o")
        .arg(iso_path)
        .args(["-V", "cidata", "-r", "-J"])
        .args(documents)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| BootstrapError::Io {
            context: "running genisoimage".into(),
            source: e,
        })?;

    if !output.status.success() {
        return Err(BootstrapError::ExternalTool {
            command: "genisoimage".into(),
            message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(())
}
