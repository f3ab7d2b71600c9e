use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, Issuer, KeyPair,
    KeyUsagePurpose, SerialNumber,
};
use uuid::Uuid;

pub(crate) struct CaFixture {
    pub cert_pem: String,
    pub key_pem: String,
    pub issuer: Issuer<'static, KeyPair>,
}

pub(crate) struct LeafFixture {
    pub der: Vec<u8>,
}

fn ca_params(name: &str) -> CertificateParams {
    let mut params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, name);
    dn.push(DnType::OrganizationName, "Test Organization");
    params.distinguished_name = dn;
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];
    params.serial_number = Some(SerialNumber::from_slice(Uuid::new_v4().as_bytes()));
    params
}

pub(crate) fn generate_ca(name: &str) -> CaFixture {
    let key_pair = KeyPair::generate().unwrap();
    let key_pem = key_pair.serialize_pem();
    generate_ca_with_key(name, &key_pem)
}

/// Self-signed CA reusing an existing key, with a fresh serial.
pub(crate) fn generate_ca_with_key(name: &str, key_pem: &str) -> CaFixture {
    let key_pair = KeyPair::from_pem(key_pem).unwrap();
    let params = ca_params(name);
    let cert = params.self_signed(&key_pair).unwrap();
    CaFixture {
        cert_pem: cert.pem(),
        key_pem: key_pem.to_string(),
        issuer: Issuer::new(params, key_pair),
    }
}

pub(crate) fn generate_intermediate(parent: &CaFixture, name: &str) -> CaFixture {
    let key_pair = KeyPair::generate().unwrap();
    let key_pem = key_pair.serialize_pem();
    let params = ca_params(name);
    let cert = params.signed_by(&key_pair, &parent.issuer).unwrap();
    CaFixture {
        cert_pem: cert.pem(),
        key_pem,
        issuer: Issuer::new(params, key_pair),
    }
}

pub(crate) fn generate_leaf(ca: &CaFixture, serial: &[u8]) -> LeafFixture {
    let mut params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, "test.example.com");
    params.distinguished_name = dn;
    params.is_ca = IsCa::NoCa;
    params.serial_number = Some(SerialNumber::from_slice(serial));
    let key_pair = KeyPair::generate().unwrap();
    let cert = params.signed_by(&key_pair, &ca.issuer).unwrap();
    LeafFixture {
        der: cert.der().to_vec(),
    }
}

pub(crate) fn generate_expired_leaf(ca: &CaFixture, serial: &[u8]) -> LeafFixture {
    let mut params = CertificateParams::default();
    params.not_before = rcgen::date_time_ymd(1999, 1, 1);
    params.not_after = rcgen::date_time_ymd(2000, 1, 1);
    params.serial_number = Some(SerialNumber::from_slice(serial));
    let key_pair = KeyPair::generate().unwrap();
    let cert = params.signed_by(&key_pair, &ca.issuer).unwrap();
    LeafFixture {
        der: cert.der().to_vec(),
    }
}
