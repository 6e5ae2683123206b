//! Distribution/variant table. Each row carries the four facts the image
//! provider needs; adding a variant means adding a row here.

use crate::error::BootstrapError;

#[derive(Debug, PartialEq, Eq)]
pub struct DistroSpec {
    pub distribution: &'static str,
    pub variant: &'static str,
    pub image_url: &'static str,
    pub checksum_url: &'static str,
    pub signature_url: &'static str,
    pub os_variant_id: &'static str,
}

impl DistroSpec {
    /// Filename of the upstream image, as it appears in the checksum manifest.
    pub fn source_filename(&self) -> &'static str {
        self.image_url.rsplit('/').next().unwrap_or(self.image_url)
    }

    /// Cache filename for the downloaded base image.
    pub fn image_cache_name(&self) -> String {
        format!("{}-{}.img", self.distribution, self.variant)
    }
}

/// First row per distribution is its default variant.
const DISTRIBUTIONS: &[DistroSpec] = &[
    DistroSpec {
        distribution: "ubuntu",
        variant: "noble",
        image_url: "https://cloud-images.ubuntu.com/noble/current/noble-server-cloudimg-amd64.img",
        checksum_url: "https://cloud-images.ubuntu.com/noble/current/SHA256SUMS",
        signature_url: "https://cloud-images.ubuntu.com/noble/current/SHA256SUMS.gpg",
        os_variant_id: "http://ubuntu.com/ubuntu/24.04",
    },
    DistroSpec {
        distribution: "ubuntu",
        variant: "jammy",
        image_url: "https://cloud-images.ubuntu.com/jammy/current/jammy-server-cloudimg-amd64.img",
        checksum_url: "https://cloud-images.ubuntu.com/jammy/current/SHA256SUMS",
        signature_url: "https://cloud-images.ubuntu.com/jammy/current/SHA256SUMS.gpg",
        os_variant_id: "http://ubuntu.com/ubuntu/22.04",
    },
    DistroSpec {
        distribution: "ubuntu",
        variant: "focal",
        image_url: "https://cloud-images.ubuntu.com/focal/current/focal-server-cloudimg-amd64.img",
        checksum_url: "https://cloud-images.ubuntu.com/focal/current/SHA256SUMS",
        signature_url: "https://cloud-images.ubuntu.com/focal/current/SHA256SUMS.gpg",
        os_variant_id: "http://ubuntu.com/ubuntu/20.04",
    },
];

/// Look up a distribution row; `variant = None` selects the distribution's
/// default variant.
pub fn lookup(
    distribution: &str,
    variant: Option<&str>,
) -> Result<&'static DistroSpec, BootstrapError> {
    let dist = distribution.to_ascii_lowercase();
    let mut rows = DISTRIBUTIONS.iter().filter(|d| d.distribution == dist);

    let Some(first) = rows.next() else {
        return Err(BootstrapError::Config {
            message: format!("unknown distribution {distribution}"),
        });
    };

    match variant {
        None => Ok(first),
        Some(v) if first.variant == v => Ok(first),
        Some(v) => rows.find(|d| d.variant == v).ok_or_else(|| {
            BootstrapError::Config {
                message: format!("unknown variant {v} for {distribution}"),
            }
        }),
    }
}
