//! Shared domain types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Closed set of cloud providers the console can talk to.
///
/// Stored as a plain text tag in the registry mirror so rows survive
/// re-deploys; parsing an unknown tag is a hard error rather than a fallthrough.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Nimbus,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Nimbus => "nimbus",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "nimbus" => Ok(ProviderKind::Nimbus),
            other => Err(UnknownProvider(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown provider tag: {0}")]
pub struct UnknownProvider(pub String);

/// Cluster status a tenant handle requires before it can be joined.
pub const PROVISIONED: &str = "PROVISIONED";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_tag_round_trips() {
        let kind: ProviderKind = "nimbus".parse().unwrap();
        assert_eq!(kind, ProviderKind::Nimbus);
        assert_eq!(kind.to_string(), "nimbus");
    }

    #[test]
    fn unknown_provider_tag_is_rejected() {
        assert!("cumulus".parse::<ProviderKind>().is_err());
    }
}
