use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use futures_util::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::distro::DistroSpec;
use crate::error::BootstrapError;

/// Cached base images older than this are re-downloaded.
const STALENESS_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

/// Ensure the base image for the distribution/variant is cached under
/// `images_path`, downloading when absent or stale. Returns the cache path.
pub async fn ensure_image(
    distro: &DistroSpec,
    images_path: &Path,
) -> Result<PathBuf, BootstrapError> {
    tokio::fs::create_dir_all(images_path)
        .await
        .map_err(|e| BootstrapError::Io {
            context: format!("creating images dir {}", images_path.display()),
            source: e,
        })?;

    let dest = images_path.join(distro.image_cache_name());
    if is_fresh(&dest) {
        tracing::info!(path = %dest.display(), "using cached base image");
        return Ok(dest);
    }

    tracing::info!(url = %distro.image_url, "downloading base image");

    let response = reqwest::get(distro.image_url)
        .await
        .map_err(|e| BootstrapError::Download {
            url: distro.image_url.into(),
            message: e.to_string(),
        })?;
    if !response.status().is_success() {
        return Err(BootstrapError::Download {
            url: distro.image_url.into(),
            message: format!("HTTP {}", response.status()),
        });
    }

    let total_size = response.content_length().unwrap_or(0);
    let pb = ProgressBar::new(total_size);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
            .expect("valid progress template")
            .progress_chars("#>-"),
    );

    let tmp_path = dest.with_extension("part");
    // Remove any stale .part file from a previous failed download
    let _ = tokio::fs::remove_file(&tmp_path).await;

    if let Err(e) = download_to_file(&tmp_path, response, &pb).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(e);
    }

    tokio::fs::rename(&tmp_path, &dest)
        .await
        .map_err(|e| BootstrapError::Io {
            context: format!("renaming {} to {}", tmp_path.display(), dest.display()),
            source: e,
        })?;

    pb.finish_and_clear();
    tracing::info!(path = %dest.display(), "base image cached");
    Ok(dest)
}

/// Verify a downloaded base image: fetch the checksum manifest and its
/// detached signature, check the signature with the external `gpg` tool,
/// then compare the manifest digest for the source filename against the
/// local file. Runs on every provisioning pass, cached or not.
pub async fn verify(distro: &DistroSpec, image_path: &Path) -> Result<(), BootstrapError> {
    println!("Verifying {}", image_path.display());

    let manifest = fetch_text(distro.checksum_url).await?;
    let signature = fetch_bytes(distro.signature_url).await?;

    let manifest_file = write_temp(manifest.as_bytes())?;
    let signature_file = write_temp(&signature)?;

    let output = tokio::process::Command::new("gpg")
        .arg("--verify")
        .arg(signature_file.path())
        .arg(manifest_file.path())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| BootstrapError::Io {
            context: "running gpg".into(),
            source: e,
        })?;
    if !output.status.success() {
        return Err(BootstrapError::Verification {
            message: format!(
                "checksum manifest signature rejected: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }

    let filename = distro.source_filename();
    let expected = manifest_digest(&manifest, filename).ok_or_else(|| {
        BootstrapError::Verification {
            message: format!("no manifest entry for {filename}"),
        }
    })?;

    let actual = sha256_file(image_path).await?;
    if !actual.eq_ignore_ascii_case(expected) {
        return Err(BootstrapError::Verification {
            message: format!(
                "digest mismatch for {}: expected {expected}, got {actual}",
                image_path.display()
            ),
        });
    }

    tracing::info!(path = %image_path.display(), "image verified");
    Ok(())
}

/// Find the digest column of the manifest line for `filename`.
/// Manifest lines look like `<hex digest> *<filename>` or
/// `<hex digest>  <filename>`.
pub fn manifest_digest<'a>(manifest: &'a str, filename: &str) -> Option<&'a str> {
    manifest
        .lines()
        .map(str::trim)
        .find(|line| line.ends_with(filename))
        .and_then(|line| line.split_whitespace().next())
}

/// Hex-encoded SHA-256 of a file, streamed in chunks.
pub async fn sha256_file(path: &Path) -> Result<String, BootstrapError> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| BootstrapError::Io {
            context: format!("opening {}", path.display()),
            source: e,
        })?;

    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 1024 * 1024];
    loop {
        let n = file.read(&mut buf).await.map_err(|e| BootstrapError::Io {
            context: format!("reading {}", path.display()),
            source: e,
        })?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    let digest = hasher.finalize();
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        hex.push_str(&format!("{byte:02x}"));
    }
    Ok(hex)
}

fn is_fresh(path: &Path) -> bool {
    let Ok(meta) = std::fs::metadata(path) else {
        return false;
    };
    let Ok(created) = meta.created().or_else(|_| meta.modified()) else {
        return false;
    };
    SystemTime::now()
        .duration_since(created)
        .map(|age| age < STALENESS_WINDOW)
        .unwrap_or(true)
}

async fn download_to_file(
    path: &Path,
    response: reqwest::Response,
    pb: &ProgressBar,
) -> Result<(), BootstrapError> {
    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(|e| BootstrapError::Io {
            context: format!("creating temp file {}", path.display()),
            source: e,
        })?;

    let url = response.url().to_string();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| BootstrapError::Download {
            url: url.clone(),
            message: format!("error reading response body: {e}"),
        })?;
        file.write_all(&chunk).await.map_err(|e| BootstrapError::Io {
            context: "writing image data".into(),
            source: e,
        })?;
        pb.inc(chunk.len() as u64);
    }

    file.flush().await.map_err(|e| BootstrapError::Io {
        context: "flushing image file".into(),
        source: e,
    })?;
    Ok(())
}

async fn fetch_text(url: &str) -> Result<String, BootstrapError> {
    let response = reqwest::get(url).await.map_err(|e| BootstrapError::Download {
        url: url.into(),
        message: e.to_string(),
    })?;
    if !response.status().is_success() {
        return Err(BootstrapError::Download {
            url: url.into(),
            message: format!("HTTP {}", response.status()),
        });
    }
    response.text().await.map_err(|e| BootstrapError::Download {
        url: url.into(),
        message: e.to_string(),
    })
}

async fn fetch_bytes(url: &str) -> Result<Vec<u8>, BootstrapError> {
    let response = reqwest::get(url).await.map_err(|e| BootstrapError::Download {
        url: url.into(),
        message: e.to_string(),
    })?;
    if !response.status().is_success() {
        return Err(BootstrapError::Download {
            url: url.into(),
            message: format!("HTTP {}", response.status()),
        });
    }
    Ok(response
        .bytes()
        .await
        .map_err(|e| BootstrapError::Download {
            url: url.into(),
            message: e.to_string(),
        })?
        .to_vec())
}

fn write_temp(data: &[u8]) -> Result<tempfile::NamedTempFile, BootstrapError> {
    let file = tempfile::NamedTempFile::new().map_err(|e| BootstrapError::Io {
        context: "creating temp file".into(),
        source: e,
    })?;
    std::fs::write(file.path(), data).map_err(|e| BootstrapError::Io {
        context: format!("writing temp file {}", file.path().display()),
        source: e,
    })?;
    Ok(file)
}
