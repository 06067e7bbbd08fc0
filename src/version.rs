//! API version compatibility.
//!
//! The facades are generated against a published API version. A running
//! server is compatible when it speaks the same major version and at least
//! the same minor version. Patch levels are never compared.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::VersionError;

/// A `major.minor.patch` version triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ApiVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ApiVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Whether a server reporting `remote` can serve clients built for `self`.
    pub fn is_compatible_with(&self, remote: &ApiVersion) -> bool {
        remote.major == self.major && remote.minor >= self.minor
    }
}

impl From<[u32; 3]> for ApiVersion {
    fn from([major, minor, patch]: [u32; 3]) -> Self {
        ApiVersion::new(major, minor, patch)
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for ApiVersion {
    type Err = VersionError;

    /// Parse `major.minor[.patch]`.
    ///
    /// The patch component may carry a suffix (`1.18.0-dev`); only its
    /// leading digits are kept, and a missing patch reads as 0.
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| VersionError {
            input: input.to_string(),
            reason: reason.to_string(),
        };

        let mut parts = input.trim().splitn(3, '.');
        let major = parts
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| invalid("missing major component"))?
            .parse::<u32>()
            .map_err(|_| invalid("major component is not a number"))?;
        let minor = parts
            .next()
            .ok_or_else(|| invalid("missing minor component"))?
            .parse::<u32>()
            .map_err(|_| invalid("minor component is not a number"))?;
        let patch = match parts.next() {
            None => 0,
            Some(rest) => {
                let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
                digits
                    .parse::<u32>()
                    .map_err(|_| invalid("patch component is not a number"))?
            }
        };

        Ok(ApiVersion::new(major, minor, patch))
    }
}

/// Check a server-reported version string against `local`.
///
/// Unparsable versions are reported as incompatible.
pub fn check_version(local: &ApiVersion, remote: &str) -> bool {
    match remote.parse::<ApiVersion>() {
        Ok(remote) => local.is_compatible_with(&remote),
        Err(e) => {
            tracing::debug!("Treating unparsable server version as incompatible: {}", e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const LOCAL: ApiVersion = ApiVersion::new(1, 6, 2);

    #[test]
    fn test_check_version_examples() {
        assert!(check_version(&LOCAL, "1.6.5"));
        assert!(!check_version(&LOCAL, "2.0.0"));
        assert!(!check_version(&LOCAL, "1.5.9"));
    }

    #[test]
    fn test_patch_is_never_compared() {
        assert!(check_version(&LOCAL, "1.6.0"));
        assert!(check_version(&LOCAL, "1.7.0"));
        assert!(check_version(&LOCAL, "1.18.4"));
    }

    #[test]
    fn test_parse_variants() {
        assert_eq!("1.6.2".parse::<ApiVersion>().unwrap(), LOCAL);
        assert_eq!(
            "1.18".parse::<ApiVersion>().unwrap(),
            ApiVersion::new(1, 18, 0)
        );
        assert_eq!(
            "1.18.0-dev.1".parse::<ApiVersion>().unwrap(),
            ApiVersion::new(1, 18, 0)
        );
        assert_eq!(ApiVersion::from([1, 6, 2]), LOCAL);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("".parse::<ApiVersion>().is_err());
        assert!("1".parse::<ApiVersion>().is_err());
        assert!("one.two.three".parse::<ApiVersion>().is_err());
        assert!(!check_version(&LOCAL, "unknown"));
    }

    #[test]
    fn test_display() {
        assert_eq!(LOCAL.to_string(), "1.6.2");
    }
}
