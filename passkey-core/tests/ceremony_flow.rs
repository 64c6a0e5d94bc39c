//! End-to-end ceremonies through `PasskeyService` with a software authenticator.

use std::sync::Arc;
use std::time::Duration;

use passkey_core::model::base64url_decode;
use passkey_core::{
    CeremonyError, CeremonyVerifier, ChallengeStore, ChallengeStoreConfig, CredentialRegistry,
    MemoryCredentialRegistry, PasskeyService, RelyingParty, SoftAuthenticator,
};

const RP_ID: &str = "example.com";
const ORIGIN: &str = "https://example.com";

struct Harness {
    service: Arc<PasskeyService>,
    registry: Arc<MemoryCredentialRegistry>,
}

fn harness_with_store(config: ChallengeStoreConfig) -> Harness {
    let registry = Arc::new(MemoryCredentialRegistry::new());
    let rp = RelyingParty::new(RP_ID, "Example", ORIGIN).unwrap();
    let service = PasskeyService::new(
        registry.clone(),
        Arc::new(ChallengeStore::new(config)),
        CeremonyVerifier::with_rust_crypto(rp),
    );
    Harness {
        service: Arc::new(service),
        registry,
    }
}

fn harness() -> Harness {
    harness_with_store(ChallengeStoreConfig::default())
}

fn challenge_bytes(encoded: &str) -> Vec<u8> {
    base64url_decode(encoded).expect("challenge is base64url")
}

async fn register(service: &PasskeyService, handle: &str, authenticator: &SoftAuthenticator) {
    let options = service.start_registration(handle, handle).await.unwrap();
    let response = authenticator.register(&challenge_bytes(&options.challenge));
    service
        .finish_registration(
            handle,
            authenticator.credential_id(),
            &response.client_data_json,
            &response.attestation_object,
        )
        .await
        .unwrap();
}

async fn authenticate(
    service: &PasskeyService,
    handle: Option<&str>,
    authenticator: &SoftAuthenticator,
    counter: u32,
) -> passkey_core::Result<passkey_core::Identity> {
    let options = service.start_authentication(handle).await?;
    let assertion = authenticator.assert(&challenge_bytes(&options.challenge), counter);
    service
        .finish_authentication(
            authenticator.credential_id(),
            &assertion.client_data_json,
            &assertion.authenticator_data,
            &assertion.signature,
        )
        .await
}

#[tokio::test]
async fn test_alice_register_authenticate_and_replay() {
    let Harness { service, registry } = harness();
    let authenticator = SoftAuthenticator::new(RP_ID, ORIGIN);

    // Registration: 32-byte challenge, stored counter 0
    let options = service.start_registration("alice", "Alice").await.unwrap();
    let challenge = challenge_bytes(&options.challenge);
    assert_eq!(challenge.len(), 32);

    let response = authenticator.register(&challenge);
    let credential = service
        .finish_registration(
            "alice",
            authenticator.credential_id(),
            &response.client_data_json,
            &response.attestation_object,
        )
        .await
        .unwrap();
    assert_eq!(credential.sign_count, 0);

    // Authentication with counter 1
    let identity = authenticate(&service, Some("alice"), &authenticator, 1)
        .await
        .unwrap();
    assert_eq!(identity.handle, "alice");
    assert_eq!(identity.display_name, "Alice");

    let (stored, _) = registry
        .find_by_credential_id(authenticator.credential_id())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.sign_count, 1);
    assert!(stored.last_used_at.is_some());

    // Same counter again: cloned authenticator signal
    let err = authenticate(&service, Some("alice"), &authenticator, 1)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CeremonyError::ReplayDetected {
            stored: 1,
            presented: 1
        }
    ));

    let (stored, _) = registry
        .find_by_credential_id(authenticator.credential_id())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.sign_count, 1, "rejected assertion must not touch the counter");
}

#[tokio::test]
async fn test_non_counting_authenticator_is_accepted() {
    let Harness { service, .. } = harness();
    let authenticator = SoftAuthenticator::new(RP_ID, ORIGIN);
    register(&service, "carol", &authenticator).await;

    for _ in 0..3 {
        authenticate(&service, Some("carol"), &authenticator, 0)
            .await
            .unwrap();
    }

    // Once counting starts it is enforced
    authenticate(&service, Some("carol"), &authenticator, 5)
        .await
        .unwrap();
    let err = authenticate(&service, Some("carol"), &authenticator, 0)
        .await
        .unwrap_err();
    assert!(matches!(err, CeremonyError::ReplayDetected { .. }));
}

#[tokio::test]
async fn test_allow_list_lists_registered_credentials() {
    let Harness { service, .. } = harness();
    let first = SoftAuthenticator::new(RP_ID, ORIGIN);
    let second = SoftAuthenticator::new(RP_ID, ORIGIN);
    register(&service, "dave", &first).await;
    register(&service, "dave", &second).await;

    let options = service.start_authentication(Some("dave")).await.unwrap();
    let mut ids: Vec<_> = options
        .allow_credentials
        .iter()
        .map(|d| d.id.clone())
        .collect();
    ids.sort();
    let mut expected = vec![
        first.credential_id().to_base64url(),
        second.credential_id().to_base64url(),
    ];
    expected.sort();
    assert_eq!(ids, expected);
    assert_eq!(options.user_verification, "preferred");

    let registration = service.start_registration("dave", "Dave").await.unwrap();
    assert_eq!(registration.exclude_credentials.len(), 2);
}

#[tokio::test]
async fn test_discoverable_flow() {
    let Harness { service, .. } = harness();
    let authenticator = SoftAuthenticator::new(RP_ID, ORIGIN);
    register(&service, "erin", &authenticator).await;

    let options = service.start_authentication(None).await.unwrap();
    assert!(options.allow_credentials.is_empty());
    assert_eq!(options.rp_id, RP_ID);

    let assertion = authenticator.assert(&challenge_bytes(&options.challenge), 1);
    let identity = service
        .finish_authentication(
            authenticator.credential_id(),
            &assertion.client_data_json,
            &assertion.authenticator_data,
            &assertion.signature,
        )
        .await
        .unwrap();
    assert_eq!(identity.handle, "erin");

    // The anonymous challenge was single use
    let replay = authenticator.assert(&challenge_bytes(&options.challenge), 2);
    let err = service
        .finish_authentication(
            authenticator.credential_id(),
            &replay.client_data_json,
            &replay.authenticator_data,
            &replay.signature,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CeremonyError::NotFound(_)));
}

#[tokio::test]
async fn test_stale_challenge_is_rejected_after_reissue() {
    let Harness { service, .. } = harness();
    let authenticator = SoftAuthenticator::new(RP_ID, ORIGIN);

    let stale = service.start_registration("frank", "Frank").await.unwrap();
    let _fresh = service.start_registration("frank", "Frank").await.unwrap();

    let response = authenticator.register(&challenge_bytes(&stale.challenge));
    let err = service
        .finish_registration(
            "frank",
            authenticator.credential_id(),
            &response.client_data_json,
            &response.attestation_object,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CeremonyError::VerificationFailed { .. }));
}

#[tokio::test]
async fn test_expired_challenge() {
    let Harness { service, .. } = harness_with_store(ChallengeStoreConfig {
        ttl: Duration::ZERO,
        capacity: 16,
    });
    let authenticator = SoftAuthenticator::new(RP_ID, ORIGIN);

    let options = service.start_registration("gina", "Gina").await.unwrap();
    let response = authenticator.register(&challenge_bytes(&options.challenge));
    let err = service
        .finish_registration(
            "gina",
            authenticator.credential_id(),
            &response.client_data_json,
            &response.attestation_object,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CeremonyError::Expired));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_registration_same_credential_id() {
    let Harness { service, registry } = harness();
    let authenticator = Arc::new(SoftAuthenticator::new(RP_ID, ORIGIN));

    let mut tasks = Vec::new();
    for handle in ["henry", "irene"] {
        let options = service.start_registration(handle, handle).await.unwrap();
        let response = authenticator.register(&challenge_bytes(&options.challenge));
        let service = Arc::clone(&service);
        let authenticator = Arc::clone(&authenticator);
        tasks.push(tokio::spawn(async move {
            service
                .finish_registration(
                    handle,
                    authenticator.credential_id(),
                    &response.client_data_json,
                    &response.attestation_object,
                )
                .await
        }));
    }

    let mut successes = 0;
    let mut conflicts = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => successes += 1,
            Err(CeremonyError::Conflict(_)) => conflicts += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!((successes, conflicts), (1, 1));
    assert_eq!(registry.credential_count(), 1);
}

#[tokio::test]
async fn test_sweep_reclaims_expired_challenges() {
    let Harness { service, .. } = harness_with_store(ChallengeStoreConfig {
        ttl: Duration::ZERO,
        capacity: 16,
    });
    service.start_registration("jack", "Jack").await.unwrap();
    service.start_authentication(None).await.unwrap();

    assert_eq!(service.sweep_expired_challenges(), 2);
    assert!(service.challenges().is_empty());
}
