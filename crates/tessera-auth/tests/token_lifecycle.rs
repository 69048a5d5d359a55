//! Token lifecycle integration tests
//!
//! Issue, verify, rotate and revoke through the public API with the
//! in-memory revocation store:
//! - Rotation chains within one family
//! - Refresh token reuse revoking the family
//! - Concurrent rotation of the same refresh token
//! - Expiry and explicit revocation

mod common;

use std::time::Duration;

use tessera_auth::claims::{RotateOptions, TokenRequest, TokenType, VerifyOptions};
use tessera_auth::{AuthError, SecurityEvent};

use common::{test_config, token_service};

#[tokio::test]
async fn test_issue_verify_rotate_chain() {
    let tokens = token_service(&test_config());
    let request = TokenRequest::new("user-1")
        .email("user@example.com")
        .roles(vec!["admin".into()]);

    let mut pair = tokens.issue(request).unwrap();
    let first = tokens
        .verify(&pair.refresh_token, &VerifyOptions::refresh())
        .await
        .unwrap();
    let family = first.claims.token_family.clone().expect("refresh has family");

    for _ in 0..3 {
        let next = tokens
            .rotate_refresh(&pair.refresh_token, &RotateOptions::default())
            .await
            .unwrap();
        let claims = tokens
            .verify(&next.refresh_token, &VerifyOptions::refresh())
            .await
            .unwrap()
            .claims;
        assert_eq!(claims.token_family.as_deref(), Some(family.as_str()));
        assert_eq!(claims.sub, "user-1");
        assert_eq!(claims.roles, vec!["admin".to_string()]);

        let access = tokens
            .verify(&next.access_token, &VerifyOptions::access())
            .await
            .unwrap();
        assert_eq!(access.claims.token_type, TokenType::Access);
        assert_eq!(access.claims.email.as_deref(), Some("user@example.com"));
        pair = next;
    }
}

#[tokio::test]
async fn test_refresh_reuse_revokes_family() {
    let mut config = test_config();
    config.tokens.revoke_family_on_reuse = true;
    let tokens = token_service(&config);
    let mut events = tokens.events().subscribe();

    let original = tokens.issue(TokenRequest::new("victim")).unwrap();
    let rotated = tokens
        .rotate_refresh(&original.refresh_token, &RotateOptions::default())
        .await
        .unwrap();

    // Attacker replays the stolen, already-rotated refresh token.
    let replay = tokens
        .rotate_refresh(&original.refresh_token, &RotateOptions::default())
        .await;
    assert_eq!(replay, Err(AuthError::TokenRevoked));

    // The legitimate client's newer refresh token is dead too.
    let legit = tokens
        .rotate_refresh(&rotated.refresh_token, &RotateOptions::default())
        .await;
    assert_eq!(legit, Err(AuthError::TokenFamilyRevoked));

    let mut saw_reuse = false;
    while let Ok(record) = events.try_recv() {
        if let SecurityEvent::RefreshReuseDetected { family_revoked, .. } = record.event {
            assert!(family_revoked);
            saw_reuse = true;
        }
    }
    assert!(saw_reuse, "reuse must be published as a security event");
}

#[tokio::test]
async fn test_reuse_without_family_revocation() {
    let mut config = test_config();
    config.tokens.revoke_family_on_reuse = false;
    let tokens = token_service(&config);

    let original = tokens.issue(TokenRequest::new("u")).unwrap();
    let rotated = tokens
        .rotate_refresh(&original.refresh_token, &RotateOptions::default())
        .await
        .unwrap();
    assert!(
        tokens
            .rotate_refresh(&original.refresh_token, &RotateOptions::default())
            .await
            .is_err()
    );
    assert!(
        tokens
            .rotate_refresh(&rotated.refresh_token, &RotateOptions::default())
            .await
            .is_ok()
    );
}

#[tokio::test]
async fn test_concurrent_rotation_single_winner() {
    let tokens = token_service(&test_config());
    let pair = tokens.issue(TokenRequest::new("racer")).unwrap();

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let tokens = tokens.clone();
            let refresh = pair.refresh_token.clone();
            tokio::spawn(async move {
                tokens
                    .rotate_refresh(&refresh, &RotateOptions::default())
                    .await
            })
        })
        .collect();

    let mut winners = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => winners += 1,
            Err(e) => assert!(matches!(
                e,
                AuthError::TokenRevoked | AuthError::TokenFamilyRevoked
            )),
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn test_revoked_access_token_rejected() {
    let tokens = token_service(&test_config());
    let pair = tokens.issue(TokenRequest::new("u")).unwrap();

    tokens.revoke(&pair.access_token).await.unwrap();
    assert_eq!(
        tokens
            .verify(&pair.access_token, &VerifyOptions::access())
            .await
            .unwrap_err(),
        AuthError::TokenRevoked
    );
    // Revoking twice is harmless.
    tokens.revoke(&pair.access_token).await.unwrap();
}

#[tokio::test]
async fn test_logout_revokes_refresh_family() {
    let tokens = token_service(&test_config());
    let pair = tokens.issue(TokenRequest::new("u")).unwrap();
    let rotated = tokens
        .rotate_refresh(&pair.refresh_token, &RotateOptions::default())
        .await
        .unwrap();

    tokens
        .revoke_refresh_family(&rotated.refresh_token)
        .await
        .unwrap();
    assert!(
        tokens
            .verify(&rotated.refresh_token, &VerifyOptions::refresh())
            .await
            .is_err()
    );
}

#[tokio::test]
async fn test_expired_token_rejected() {
    let mut config = test_config();
    config.signing.access_token_ttl_secs = 1;
    let tokens = token_service(&config);
    let pair = tokens.issue(TokenRequest::new("u")).unwrap();

    tokio::time::sleep(Duration::from_millis(2100)).await;
    assert_eq!(
        tokens
            .verify(&pair.access_token, &VerifyOptions::access())
            .await
            .unwrap_err(),
        AuthError::TokenExpired
    );
    // Expired tokens need no revocation entry.
    tokens.revoke(&pair.access_token).await.unwrap();
}

#[tokio::test]
async fn test_near_expiry_flag() {
    let mut config = test_config();
    config.signing.access_token_ttl_secs = 60;
    config.tokens.near_expiry_threshold_secs = 120;
    let tokens = token_service(&config);
    let pair = tokens.issue(TokenRequest::new("u")).unwrap();

    let verified = tokens
        .verify(&pair.access_token, &VerifyOptions::access())
        .await
        .unwrap();
    assert!(verified.is_near_expiry);
    assert!(verified.remaining <= Duration::from_secs(60));
}

#[tokio::test]
async fn test_rotation_keeps_fingerprint_binding() {
    let tokens = token_service(&test_config());
    let pair = tokens
        .issue(TokenRequest::new("u").fingerprint("fp-old"))
        .unwrap();

    let rotated = tokens
        .rotate_refresh(
            &pair.refresh_token,
            &RotateOptions {
                fingerprint: Some("fp-old".into()),
                require_fingerprint_match: true,
                new_family: true,
            },
        )
        .await
        .unwrap();

    let claims = tokens
        .verify(
            &rotated.access_token,
            &VerifyOptions::access().with_fingerprint("fp-old"),
        )
        .await
        .unwrap()
        .claims;
    assert_eq!(claims.fingerprint.as_deref(), Some("fp-old"));
}
