#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use pki_engine::{
    config::Config,
    pki::{PkiBackend, StaticSystemView},
    server::{Server, ServerConfig},
    storage::MemoryStorage,
    telemetry,
};
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, Issuer, KeyPair,
    KeyUsagePurpose, SerialNumber,
};
use uuid::Uuid;

pub struct TestCa {
    pub cert_pem: String,
    pub key_pem: String,
    pub issuer: Issuer<'static, KeyPair>,
}

impl TestCa {
    pub fn bundle(&self) -> String {
        format!("{}{}", self.cert_pem, self.key_pem)
    }
}

fn ca_params(name: &str) -> CertificateParams {
    let mut params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, name);
    params.distinguished_name = dn;
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
    params.serial_number = Some(SerialNumber::from_slice(Uuid::new_v4().as_bytes()));
    params
}

pub fn generate_ca(name: &str) -> TestCa {
    let key_pem = KeyPair::generate().unwrap().serialize_pem();
    generate_ca_with_key(name, &key_pem)
}

/// A second self-signed certificate for an existing key, with a fresh serial.
pub fn generate_ca_with_key(name: &str, key_pem: &str) -> TestCa {
    let key_pair = KeyPair::from_pem(key_pem).unwrap();
    let params = ca_params(name);
    let cert = params.self_signed(&key_pair).unwrap();
    TestCa {
        cert_pem: cert.pem(),
        key_pem: key_pem.to_string(),
        issuer: Issuer::new(params, key_pair),
    }
}

/// DER of a leaf certificate signed by `ca`.
pub fn generate_leaf(ca: &TestCa, serial: &[u8]) -> Vec<u8> {
    let mut params = CertificateParams::new(vec!["leaf.example.com".to_string()]).unwrap();
    params.serial_number = Some(SerialNumber::from_slice(serial));
    let key_pair = KeyPair::generate().unwrap();
    params.signed_by(&key_pair, &ca.issuer).unwrap().der().to_vec()
}

pub fn memory_backend() -> (PkiBackend, MemoryStorage) {
    let storage = MemoryStorage::new();
    let backend = PkiBackend::new(
        Arc::new(storage.clone()),
        Arc::new(StaticSystemView::default()),
        Duration::from_secs(3600),
    );
    (backend, storage)
}

// Helper function to spawn a test server on a random port
pub async fn spawn_server() -> (String, PkiBackend) {
    telemetry::init_tracing();

    let config = {
        let mut config = Config::load().unwrap();
        config.server.host = "localhost".to_string();
        // Use a random OS port
        config.server.port = 0;
        config
    };
    let (backend, _) = memory_backend();

    let server_config = ServerConfig {
        host: &config.server.host,
        port: config.server.port,
    };

    let server = Server::new(backend.clone(), server_config).await.unwrap();

    let port = server.port().unwrap();
    tokio::spawn(async move {
        server.run().await.expect("failed to run server");
    });

    (format!("http://{}:{}", server_config.host, port), backend)
}
