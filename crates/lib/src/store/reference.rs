//! Image references and their encoding as content-store refs.
//!
//! Image names contain characters (`/`, `:`, `@`) that are awkward in ref
//! names, so every character outside `[A-Za-z0-9.-]` is written as `_XX`
//! (uppercase hex of the byte). Layers are stored under their bare sha256.

use std::fmt;

use crate::consts::OCI_IMAGE_PREFIX;

/// How the user asked for the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
  Oci,
  Docker,
  /// A raw content-store ref (`ostree:<ref>`).
  Ostree,
}

/// A parsed, user-supplied image name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
  pub transport: Transport,
  /// Registry host, only when the first path component looks like a domain.
  pub registry: Option<String>,
  pub name: String,
  pub tag: String,
  pub digest: Option<String>,
}

impl ImageRef {
  pub fn parse(input: &str) -> Self {
    let (transport, rest) = if let Some(rest) = input.strip_prefix("oci:") {
      (Transport::Oci, rest)
    } else if let Some(rest) = input.strip_prefix("docker:") {
      (Transport::Docker, rest)
    } else if let Some(rest) = input.strip_prefix("ostree:") {
      (Transport::Ostree, rest)
    } else {
      (Transport::Oci, input)
    };

    let (rest, digest) = match rest.split_once("@sha256:") {
      Some((name, hex)) => (name, Some(format!("sha256:{}", hex))),
      None => (rest, None),
    };

    let (registry, image) = match rest.split_once('/') {
      Some((reg, image)) if reg.contains('.') => (Some(reg.to_string()), image),
      _ => (None, rest),
    };

    let (name, tag) = match image.find(':') {
      Some(sep) if sep > 0 => (&image[..sep], &image[sep + 1..]),
      _ => (image, "latest"),
    };

    Self {
      transport,
      registry,
      name: name.to_string(),
      tag: tag.to_string(),
      digest,
    }
  }

  /// `registry/name:tag`, the form the store encodes into ref names.
  pub fn full_name(&self) -> String {
    match &self.registry {
      Some(reg) => format!("{}/{}:{}", reg, self.name, self.tag),
      None => format!("{}:{}", self.name, self.tag),
    }
  }

  /// Name a container gets when the user does not choose one: the last path
  /// component, suffixed with the tag unless it is `latest`.
  pub fn default_container_name(&self) -> String {
    let base = self.name.rsplit('/').next().unwrap_or(&self.name);
    if self.tag == "latest" {
      base.to_string()
    } else {
      format!("{}-{}", base, self.tag)
    }
  }
}

impl fmt::Display for ImageRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.digest {
      Some(digest) => match &self.registry {
        Some(reg) => write!(f, "{}/{}@{}", reg, self.name, digest),
        None => write!(f, "{}@{}", self.name, digest),
      },
      None => f.write_str(&self.full_name()),
    }
  }
}

/// Encode an image name as the tail of a ref.
pub fn encode_ref(name: &str) -> String {
  let mut encoded = String::with_capacity(name.len());
  for byte in name.bytes() {
    if byte.is_ascii_alphanumeric() || byte == b'.' || byte == b'-' {
      encoded.push(byte as char);
    } else {
      encoded.push_str(&format!("_{:02X}", byte));
    }
  }
  encoded
}

/// Reverse [`encode_ref`]. Malformed escapes return the input unchanged.
pub fn decode_ref(encoded: &str) -> String {
  let bytes = encoded.as_bytes();
  let mut decoded = Vec::with_capacity(bytes.len());
  let mut i = 0;

  while i < bytes.len() {
    if bytes[i] == b'_' {
      let Some(byte) = encoded
        .get(i + 1..i + 3)
        .and_then(|hex| u8::from_str_radix(hex, 16).ok())
      else {
        return encoded.to_string();
      };
      decoded.push(byte);
      i += 3;
    } else {
      decoded.push(bytes[i]);
      i += 1;
    }
  }

  String::from_utf8(decoded).unwrap_or_else(|_| encoded.to_string())
}

/// Strip a leading `sha256:`.
pub fn drop_sha256_prefix(id: &str) -> &str {
  id.strip_prefix("sha256:").unwrap_or(id)
}

/// True for a bare 64-character hex digest (layer refs, untagged images).
pub fn is_digest(name: &str) -> bool {
  name.len() == 64 && name.bytes().all(|b| b.is_ascii_hexdigit())
}

/// The ref under which an image is stored.
pub fn image_branch(image: &str) -> String {
  if let Some(raw) = image.strip_prefix("ostree:") {
    return raw.to_string();
  }
  let image = drop_sha256_prefix(image);
  let parsed = ImageRef::parse(image);
  let tail = match &parsed.digest {
    Some(_) => parsed.to_string(),
    None => parsed.full_name(),
  };
  format!("{}{}", OCI_IMAGE_PREFIX, encode_ref(&tail))
}

/// The ref under which a layer is stored.
///
/// Accepts `sha256:<hex>`, a bare hex digest, or a docker-archive entry
/// (`<hex>/layer.tar`).
pub fn layer_branch(digest: &str) -> String {
  format!("{}{}", OCI_IMAGE_PREFIX, layer_id(digest))
}

pub fn layer_id(digest: &str) -> &str {
  let digest = drop_sha256_prefix(digest);
  digest.split('/').next().unwrap_or(digest)
}
