//! Certificate authority core: keys, issuers, revocation and CRLs.

pub mod backend;
pub mod certutil;
pub mod crl;
pub mod crl_config;
pub mod errors;
pub mod fetch;
pub mod import;
pub mod issuers;
pub mod keys;
pub mod revocation;
pub mod system;
pub mod types;

#[cfg(test)]
pub(crate) mod test_fixtures;

pub use backend::{ImportedBundle, PkiBackend};
pub use errors::{PkiError, PkiResult, ResolveError};
pub use fetch::{RawFormat, RawResponse};
pub use revocation::{RevocationInfo, RevocationResponse};
pub use system::{StaticSystemView, SystemView};
pub use types::{CrlId, IssuerEntry, IssuerId, KeyEntry, KeyId, NotAfterBehavior};
