use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::PkiError;

/// Reference that resolves to the configured default key or issuer.
pub const DEFAULT_REF: &str = "default";

/// Sentinel identifiers returned alongside failed resolutions. Never persisted.
pub mod sentinel {
    pub const NOT_FOUND: &str = "not-found";
    pub const CONFIG_ERROR: &str = "config-error";
    pub const LIST_ERROR: &str = "list-error";
    pub const KEY_READ: &str = "key-read";
    pub const ISSUER_READ: &str = "issuer-read";
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Mints a fresh random identifier.
            pub fn generate() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Identifier of a stored private key.
    KeyId
);
string_id!(
    /// Identifier of a stored CA certificate.
    IssuerId
);
string_id!(
    /// Identifier of a CRL document shared by equivalent issuers.
    CrlId
);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrivateKeyType {
    Rsa,
    Ec,
    Ed25519,
    #[default]
    Unknown,
}

impl fmt::Display for PrivateKeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PrivateKeyType::Rsa => "rsa",
            PrivateKeyType::Ec => "ec",
            PrivateKeyType::Ed25519 => "ed25519",
            PrivateKeyType::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// What to do when a leaf would outlive its issuer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotAfterBehavior {
    #[default]
    Err,
    Truncate,
    Permit,
}

impl fmt::Display for NotAfterBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NotAfterBehavior::Err => "err",
            NotAfterBehavior::Truncate => "truncate",
            NotAfterBehavior::Permit => "permit",
        };
        f.write_str(name)
    }
}

impl FromStr for NotAfterBehavior {
    type Err = PkiError;

    fn from_str(value: &str) -> Result<Self, PkiError> {
        match value {
            "err" => Ok(NotAfterBehavior::Err),
            "truncate" => Ok(NotAfterBehavior::Truncate),
            "permit" => Ok(NotAfterBehavior::Permit),
            _ => Err(PkiError::user(
                "Unknown value for field `leaf_not_after_behavior`. \
                 Possible values are `err`, `truncate`, and `permit`.",
            )),
        }
    }
}

/// A stored private key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyEntry {
    pub id: KeyId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub private_key_type: PrivateKeyType,
    pub private_key: String,
}

/// A stored CA certificate and its chain metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuerEntry {
    pub id: IssuerId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub key_id: KeyId,
    pub certificate: String,
    #[serde(default)]
    pub ca_chain: Vec<String>,
    #[serde(default)]
    pub manual_chain: Vec<IssuerId>,
    #[serde(default)]
    pub serial_number: String,
    #[serde(default, rename = "not_after_behavior")]
    pub leaf_not_after_behavior: NotAfterBehavior,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyConfig {
    #[serde(default, rename = "default")]
    pub default_key_id: KeyId,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuerConfig {
    #[serde(default, rename = "default")]
    pub default_issuer_id: IssuerId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_transparent_strings() {
        let id = IssuerId::from("abc");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"abc\"");
        assert_eq!(id.to_string(), "abc");

        let generated = KeyId::generate();
        assert!(Uuid::parse_str(generated.as_str()).is_ok());
        assert_ne!(generated, KeyId::generate());
        assert!(CrlId::default().is_empty());
    }

    #[test]
    fn test_not_after_behavior_parsing() {
        assert_eq!("truncate".parse::<NotAfterBehavior>().unwrap(), NotAfterBehavior::Truncate);
        assert_eq!("permit".parse::<NotAfterBehavior>().unwrap(), NotAfterBehavior::Permit);
        assert!("never".parse::<NotAfterBehavior>().unwrap_err().is_user());
        assert_eq!(NotAfterBehavior::default().to_string(), "err");
    }

    #[test]
    fn test_issuer_entry_json_layout() {
        let entry = IssuerEntry {
            id: IssuerId::from("i1"),
            name: "root".into(),
            key_id: KeyId::from("k1"),
            certificate: "PEM\n".into(),
            serial_number: "01:02".into(),
            leaf_not_after_behavior: NotAfterBehavior::Permit,
            ..Default::default()
        };
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["key_id"], "k1");
        assert_eq!(value["not_after_behavior"], "permit");
        assert_eq!(value["manual_chain"], serde_json::json!([]));

        let config: KeyConfig = serde_json::from_str(r#"{"default":"k1"}"#).unwrap();
        assert_eq!(config.default_key_id, KeyId::from("k1"));
        let empty: IssuerConfig = serde_json::from_str("{}").unwrap();
        assert!(empty.default_issuer_id.is_empty());
    }
}
