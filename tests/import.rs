mod common;

use pki_engine::pki::import::{import_issuer, import_key};
use pki_engine::pki::issuers::{
    delete_issuer, fetch_issuer_by_id, get_issuers_config, resolve_issuer_reference,
};
use pki_engine::pki::keys::{delete_key, fetch_key_by_id, get_keys_config, list_keys};
use pki_engine::pki::types::IssuerId;

use common::{generate_ca, generate_ca_with_key, memory_backend};

#[tokio::test]
async fn test_import_key_keeps_first_name() {
    let (_, storage) = memory_backend();
    let ca = generate_ca("Root");

    let (first, existed) = import_key(&storage, &ca.key_pem, "n1").await.unwrap();
    assert!(!existed);

    for _ in 0..2 {
        let (again, existed) = import_key(&storage, &ca.key_pem, "n2").await.unwrap();
        assert!(existed);
        assert_eq!(again.id, first.id);
        assert_eq!(again.name, "n1");
    }

    let stored = fetch_key_by_id(&storage, &first.id).await.unwrap();
    assert_eq!(stored.name, "n1");
    assert_eq!(list_keys(&storage).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_key_then_issuer_links() {
    let (_, storage) = memory_backend();
    let ca = generate_ca("Root");

    let (key, _) = import_key(&storage, &ca.key_pem, "").await.unwrap();
    let (issuer, _) = import_issuer(&storage, &ca.cert_pem, "").await.unwrap();

    assert_eq!(issuer.key_id, key.id);
    let stored = fetch_issuer_by_id(&storage, &issuer.id).await.unwrap();
    assert_eq!(stored.key_id, key.id);
}

#[tokio::test]
async fn test_issuer_then_key_links() {
    let (_, storage) = memory_backend();
    let ca = generate_ca("Root");

    let (issuer, _) = import_issuer(&storage, &ca.cert_pem, "").await.unwrap();
    assert!(issuer.key_id.is_empty());

    let (key, _) = import_key(&storage, &ca.key_pem, "").await.unwrap();
    let stored = fetch_issuer_by_id(&storage, &issuer.id).await.unwrap();
    assert_eq!(stored.key_id, key.id);
}

#[tokio::test]
async fn test_certificates_sharing_a_key_link_to_it() {
    let (_, storage) = memory_backend();
    let ca = generate_ca("Root");
    let twin = generate_ca_with_key("Root", &ca.key_pem);

    let (first, _) = import_issuer(&storage, &ca.cert_pem, "").await.unwrap();
    let (second, _) = import_issuer(&storage, &twin.cert_pem, "").await.unwrap();
    assert_ne!(first.id, second.id);

    let (key, existed) = import_key(&storage, &ca.key_pem, "").await.unwrap();
    assert!(!existed);
    for issuer_id in [&first.id, &second.id] {
        let stored = fetch_issuer_by_id(&storage, issuer_id).await.unwrap();
        assert_eq!(stored.key_id, key.id);
    }

    // Re-importing the key leaves the links alone
    let (again, existed) = import_key(&storage, &ca.key_pem, "").await.unwrap();
    assert!(existed);
    assert_eq!(again.id, key.id);
}

#[tokio::test]
async fn test_first_import_becomes_default() {
    let (_, storage) = memory_backend();
    let first = generate_ca("First");
    let second = generate_ca("Second");

    let (first_key, _) = import_key(&storage, &first.key_pem, "").await.unwrap();
    let (first_issuer, _) = import_issuer(&storage, &first.cert_pem, "").await.unwrap();
    import_key(&storage, &second.key_pem, "").await.unwrap();
    import_issuer(&storage, &second.cert_pem, "").await.unwrap();

    assert_eq!(
        get_keys_config(&storage).await.unwrap().default_key_id,
        first_key.id
    );
    assert_eq!(
        get_issuers_config(&storage).await.unwrap().default_issuer_id,
        first_issuer.id
    );
    assert_eq!(
        resolve_issuer_reference(&storage, "default").await.unwrap(),
        first_issuer.id
    );
}

#[tokio::test]
async fn test_delete_reports_default() {
    let (_, storage) = memory_backend();
    let first = generate_ca("First");
    let second = generate_ca("Second");

    let (first_key, _) = import_key(&storage, &first.key_pem, "").await.unwrap();
    let (second_key, _) = import_key(&storage, &second.key_pem, "").await.unwrap();
    let (first_issuer, _) = import_issuer(&storage, &first.cert_pem, "").await.unwrap();
    let (second_issuer, _) = import_issuer(&storage, &second.cert_pem, "").await.unwrap();

    assert!(!delete_key(&storage, &second_key.id).await.unwrap());
    assert_eq!(
        get_keys_config(&storage).await.unwrap().default_key_id,
        first_key.id
    );
    assert!(delete_key(&storage, &first_key.id).await.unwrap());
    assert!(
        get_keys_config(&storage)
            .await
            .unwrap()
            .default_key_id
            .is_empty()
    );

    assert!(!delete_issuer(&storage, &second_issuer.id).await.unwrap());
    assert!(delete_issuer(&storage, &first_issuer.id).await.unwrap());
    assert_eq!(
        get_issuers_config(&storage).await.unwrap().default_issuer_id,
        IssuerId::default()
    );
    assert!(resolve_issuer_reference(&storage, "default").await.is_err());
}
