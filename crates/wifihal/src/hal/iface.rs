//! WiFi interface discovery through sysfs.

use std::path::Path;

use crate::error::{Error, Result};

/// Where the kernel lists network interfaces.
pub const DEFAULT_SYSFS_NET: &str = "/sys/class/net";

/// Maximum interface name length (including null terminator).
pub const IFNAMSIZ: usize = 16;

/// A WiFi interface known to the HAL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WifiInterface {
    name: String,
    index: u32,
}

impl WifiInterface {
    pub fn new(name: impl Into<String>, index: u32) -> Self {
        Self {
            name: name.into(),
            index,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn index(&self) -> u32 {
        self.index
    }
}

/// Validate an interface name.
pub fn validate(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidArgs("empty interface name".to_string()));
    }

    if name.len() >= IFNAMSIZ {
        return Err(Error::InvalidArgs(format!(
            "interface name {} too long (max {} chars)",
            name,
            IFNAMSIZ - 1
        )));
    }

    if name.contains('/') || name.contains('\0') || name.chars().any(char::is_whitespace) {
        return Err(Error::InvalidArgs(format!(
            "interface name {:?} contains invalid characters",
            name
        )));
    }

    Ok(())
}

/// Convert an interface name to its index by reading `<sysfs>/<name>/ifindex`.
pub fn ifindex(sysfs: impl AsRef<Path>, name: &str) -> Result<u32> {
    validate(name)?;

    let path = sysfs.as_ref().join(name).join("ifindex");
    let not_found = || Error::InterfaceNotFound {
        name: name.to_string(),
    };
    let content = std::fs::read_to_string(&path).map_err(|_| not_found())?;
    content.trim().parse().map_err(|_| not_found())
}

/// List interfaces under `sysfs` whose names satisfy `is_wifi`, sorted by
/// name. Entries without a readable index are skipped.
pub fn discover(sysfs: impl AsRef<Path>, is_wifi: impl Fn(&str) -> bool) -> Result<Vec<WifiInterface>> {
    let sysfs = sysfs.as_ref();
    let mut found = Vec::new();

    for entry in std::fs::read_dir(sysfs)?.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        if !is_wifi(&name) {
            continue;
        }
        match ifindex(sysfs, &name) {
            Ok(index) => {
                tracing::debug!(iface = %name, index, "found wifi interface");
                found.push(WifiInterface::new(name, index));
            }
            Err(e) => tracing::warn!(iface = %name, error = %e, "skipping interface"),
        }
    }

    found.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(found)
}
