pub mod certs;
pub mod crl;
pub mod health;
pub mod issuers;
pub mod keys;
pub mod revoke;

use std::collections::BTreeMap;

use serde::Serialize;

/// Listing shape shared by the key and issuer endpoints.
#[derive(Debug, Serialize)]
pub struct ListResponse<T: Serialize> {
    pub keys: Vec<String>,
    pub key_info: BTreeMap<String, T>,
}

impl<T: Serialize> FromIterator<(String, T)> for ListResponse<T> {
    fn from_iter<I: IntoIterator<Item = (String, T)>>(iter: I) -> Self {
        let mut keys = Vec::new();
        let mut key_info = BTreeMap::new();
        for (id, info) in iter {
            keys.push(id.clone());
            key_info.insert(id, info);
        }
        Self { keys, key_info }
    }
}
