mod build;
mod builder;
mod settings;

pub use build::{
    IssuerSigner, RevokedCertEntries, RevokedEntry, build_crl, build_crls,
    get_revoked_cert_entries,
};
pub use builder::CrlBuilder;
pub use settings::{CRL_SETTINGS_PATH, CrlSettings, get_crl_settings, set_crl_settings};
