/// Application name, used for config file names and package prefixes.
pub const APP_NAME: &str = "hostctr";

/// Prefix of every image and layer ref in the content store.
pub const OCI_IMAGE_PREFIX: &str = "ociimage/";

/// Default configuration file for privileged callers.
pub const DEFAULT_CONFIG_FILE: &str = "/etc/hostctr.conf";

/// Prefix of generated rpm package names (`<prefix>-<container name>`).
pub const RPM_NAME_PREFIX: &str = "hostctr-container";

/// Name of the metadata file written into every deployment slot.
pub const INFO_FILENAME: &str = "info";

/// Marker present on image-based (ostree) hosts, where rpm installs are refused.
pub const OSTREE_BOOTED_MARKER: &str = "/run/ostree-booted";
