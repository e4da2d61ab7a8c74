//! Process-wide publications caches used by `KtsClient::from_config`

use std::sync::Arc;

use kts_calendar::testutil::TestServer;
use kts_client::{ClientConfig, ClientError, KtsClient};
use kts_types::PublicKey;

fn config_for(server: &TestServer) -> ClientConfig {
    ClientConfig::for_base_url(&server.url()).expect("valid URL")
}

#[tokio::test]
async fn test_pinned_client_does_not_reuse_unpinned_publications() {
    let server = TestServer::start().await;
    let config = config_for(&server);

    let open = KtsClient::from_config(&config).expect("client builds");
    let token = open.sign_data(b"doc").await.expect("sign failed");
    let v = open.verify_data(b"doc", &token).await.expect("verify failed");
    assert!(v.is_valid(), "{}", v.code);

    let pinned_config = ClientConfig {
        publications_key: Some(PublicKey::new([99u8; 32]).to_hex()),
        ..config.clone()
    };
    let pinned = KtsClient::from_config(&pinned_config).expect("client builds");
    assert!(!Arc::ptr_eq(open.verifier().cache(), pinned.verifier().cache()));

    let err = pinned
        .verify_data(b"doc", &token)
        .await
        .expect_err("foreign publications key must be rejected");
    assert!(
        matches!(err, ClientError::Untrusted(_)),
        "Expected Untrusted, got: {}",
        err
    );
    assert!(pinned.verifier().cache().current().is_none());

    // The correct pin gets its own cache and accepts the file
    let correct_config = ClientConfig {
        publications_key: Some(server.publications_key().to_hex()),
        ..config
    };
    let correct = KtsClient::from_config(&correct_config).expect("client builds");
    let v = correct.verify_data(b"doc", &token).await.expect("verify failed");
    assert!(v.is_valid(), "{}", v.code);
}

#[tokio::test]
async fn test_clients_of_different_calendars_use_their_own_publications() {
    let server_a = TestServer::start().await;
    let server_b = TestServer::start().await;

    let client_a = KtsClient::from_config(&config_for(&server_a)).expect("client builds");
    let token_a = client_a.sign_data(b"doc").await.expect("sign failed");
    let v = client_a.verify_data(b"doc", &token_a).await.expect("verify failed");
    assert!(v.is_valid(), "{}", v.code);

    let client_b = KtsClient::from_config(&config_for(&server_b)).expect("client builds");
    assert!(!Arc::ptr_eq(client_a.verifier().cache(), client_b.verifier().cache()));

    let token_b = client_b.sign_data(b"doc").await.expect("sign failed");
    let v = client_b.verify_data(b"doc", &token_b).await.expect("verify failed");
    assert!(v.is_valid(), "{}", v.code);
    assert_eq!(server_b.publication_requests(), 1);
    assert_eq!(server_a.publication_requests(), 1);
}

#[tokio::test]
async fn test_clients_of_one_calendar_share_a_cache() {
    let server = TestServer::start().await;
    let config = config_for(&server);

    let first = KtsClient::from_config(&config).expect("client builds");
    let second = KtsClient::from_config(&config).expect("client builds");
    assert!(Arc::ptr_eq(first.verifier().cache(), second.verifier().cache()));

    let token = first.sign_data(b"doc").await.expect("sign failed");
    first.verify_data(b"doc", &token).await.expect("verify failed");
    second.verify_data(b"doc", &token).await.expect("verify failed");

    assert_eq!(server.publication_requests(), 1);
}
