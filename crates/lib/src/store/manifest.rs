//! Image manifests in the three shapes the store accepts.
//!
//! - registry schema 1: `fsLayers[].blobSum`, listed top layer first
//! - registry schema 2 / OCI: `layers[].digest` (+ `size`), base layer first
//! - docker archive: `Layers` (plain strings), base layer first
//!
//! [`ImageManifest`] normalizes all of them to one base-first layer list.

use std::collections::BTreeMap;

use serde::Deserialize;

use super::reference::drop_sha256_prefix;

#[derive(Debug, Deserialize)]
struct FsLayer {
  #[serde(rename = "blobSum")]
  blob_sum: String,
}

#[derive(Debug, Deserialize)]
struct Descriptor {
  digest: String,
  #[serde(default)]
  size: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct RawManifest {
  #[serde(rename = "fsLayers", default)]
  fs_layers: Option<Vec<FsLayer>>,
  #[serde(default)]
  layers: Option<Vec<Descriptor>>,
  #[serde(rename = "Layers", default)]
  archive_layers: Option<Vec<String>>,
  #[serde(default)]
  config: Option<Descriptor>,
  #[serde(rename = "Digest", default)]
  digest: Option<String>,
  #[serde(rename = "Labels", default)]
  labels: Option<BTreeMap<String, String>>,
  #[serde(default)]
  annotations: Option<BTreeMap<String, String>>,
}

/// One layer of an image, in checkout order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerRef {
  pub digest: String,
  pub size: Option<u64>,
}

/// A normalized manifest. `text` keeps the stored JSON verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageManifest {
  pub text: String,
  pub layers: Vec<LayerRef>,
  /// Image id without the `sha256:` prefix, when the manifest names one.
  pub image_id: Option<String>,
  pub labels: BTreeMap<String, String>,
}

impl ImageManifest {
  pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
    let raw: RawManifest = serde_json::from_str(text)?;

    let layers = match (raw.fs_layers, raw.layers, raw.archive_layers) {
      (Some(fs_layers), _, _) if !fs_layers.is_empty() => fs_layers
        .into_iter()
        .rev()
        .map(|l| LayerRef {
          digest: l.blob_sum,
          size: None,
        })
        .collect(),
      (_, Some(layers), _) => layers
        .into_iter()
        .map(|l| LayerRef {
          digest: l.digest,
          size: l.size,
        })
        .collect(),
      (_, _, Some(archive)) => archive
        .into_iter()
        .map(|digest| LayerRef { digest, size: None })
        .collect(),
      _ => Vec::new(),
    };

    let image_id = raw
      .digest
      .or(raw.config.map(|c| c.digest))
      .map(|id| drop_sha256_prefix(&id).to_string());

    Ok(Self {
      text: text.to_string(),
      layers,
      image_id,
      labels: raw.labels.or(raw.annotations).unwrap_or_default(),
    })
  }

  pub fn layer_digests(&self) -> impl Iterator<Item = &str> {
    self.layers.iter().map(|l| l.digest.as_str())
  }

  /// Sum of the declared layer sizes; `None` if any layer lacks one.
  pub fn virtual_size(&self) -> Option<u64> {
    self.layers.iter().map(|l| l.size).sum()
  }
}
