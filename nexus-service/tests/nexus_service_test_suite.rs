use std::collections::{HashMap, HashSet};
use std::time::Duration;

use axum_test::TestServer;
use http::StatusCode;
use nexus_core::material::KeyShard;
use nexus_service::backing_store::memory::MemoryBackingStore;
use nexus_types::api::v1::{
    EncryptRequest, EncryptResponse, DecryptRequest, DecryptResponse, OperatorShard,
    PolicyCreateRequest, PolicyCreateResponse, PolicyGetResponse, PolicyListResponse,
    RecoverResponse, RestoreRequest, RestoreResponse, SecretGetRequest, SecretGetResponse,
    SecretListResponse, SecretMetadataRequest, SecretMetadataResponse, SecretPutRequest,
    SecretPutResponse, SecretVersionsRequest,
};
use nexus_types::policy::Permission;

use crate::setup::{
    CountingBackingStore, LITE_WORKLOAD, OTHER_WORKLOAD, PILOT, TEST_SPIFFE_HEADER, WORKLOAD,
    spawn_keepers, start_memory_nexus, start_nexus, start_nexus_with_store, test_config,
    wait_for_ready, wait_until,
};

mod setup;

fn values(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Grants read/write/list on every path to the nexus.internal workloads.
async fn create_workload_policy(server: &TestServer) {
    let response = server
        .post("/v1/acl/policy")
        .add_header(TEST_SPIFFE_HEADER, PILOT)
        .json(&PolicyCreateRequest {
            name: "workloads".to_owned(),
            spiffe_id_pattern: "spiffe://nexus\\.internal/workload/.*".to_owned(),
            path_pattern: ".*".to_owned(),
            permissions: HashSet::from([Permission::Read, Permission::Write, Permission::List]),
        })
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
}

async fn put_secret(server: &TestServer, path: &str, data: HashMap<String, String>) -> u32 {
    let response = server
        .post("/v1/store/secrets")
        .add_header(TEST_SPIFFE_HEADER, WORKLOAD)
        .json(&SecretPutRequest {
            path: path.parse().unwrap(),
            values: data,
        })
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    response.json::<SecretPutResponse>().version
}

async fn get_secret(server: &TestServer, path: &str, version: u32) -> HashMap<String, String> {
    let response = server
        .post("/v1/store/secrets")
        .add_query_param("action", "get")
        .add_header(TEST_SPIFFE_HEADER, WORKLOAD)
        .json(&SecretGetRequest {
            path: path.parse().unwrap(),
            version,
        })
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    response.json::<SecretGetResponse>().data
}

async fn metadata_current_version(server: &TestServer, path: &str) -> u32 {
    let response = server
        .post("/v1/store/secrets/metadata")
        .add_query_param("action", "get")
        .add_header(TEST_SPIFFE_HEADER, WORKLOAD)
        .json(&SecretMetadataRequest {
            path: path.parse().unwrap(),
            version: 0,
        })
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    response.json::<SecretMetadataResponse>().metadata.current_version
}

#[tokio::test]
async fn day_zero_distributes_one_distinct_shard_per_keeper() {
    let keepers = spawn_keepers(3).await;
    let dir = tempfile::tempdir().unwrap();
    let nexus = start_nexus(test_config(dir.path(), &keepers)).await;
    wait_for_ready(&nexus).await;

    // every keeper eventually holds a shard and the marker appears
    wait_until("all keepers armed", || {
        keepers.iter().all(|keeper| keeper.held_shard().is_some())
    })
    .await;
    wait_until("bootstrap marker", || {
        dir.path().join("bootstrap.tombstone").exists()
    })
    .await;

    // shards are pairwise distinct ...
    let shards: Vec<KeyShard> = keepers
        .iter()
        .enumerate()
        .map(|(i, keeper)| KeyShard {
            index: nexus_core::material::ShareIndex::new(i as u8 + 1).unwrap(),
            secret: keeper.held_shard().unwrap(),
        })
        .collect();
    assert!(!shards[0].secret.ct_eq(&shards[1].secret));
    assert!(!shards[1].secret.ct_eq(&shards[2].secret));

    // ... and mutually consistent: any two reconstruct the same secret
    let a = nexus_core::shamir::recover(&shards[0..2], 2).unwrap();
    let b = nexus_core::shamir::recover(&shards[1..3], 2).unwrap();
    assert_eq!(a, b);

    // the store starts out empty
    create_workload_policy(&nexus.server).await;
    let response = nexus
        .server
        .post("/v1/store/secrets")
        .add_query_param("action", "list")
        .add_header(TEST_SPIFFE_HEADER, WORKLOAD)
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert!(response.json::<SecretListResponse>().keys.is_empty());

    nexus.shutdown().await;
}

#[tokio::test]
async fn marker_waits_for_the_last_keeper_ack() {
    let keepers = spawn_keepers(3).await;
    keepers[2].set_reachable(false);
    let dir = tempfile::tempdir().unwrap();
    let nexus = start_nexus(test_config(dir.path(), &keepers)).await;

    // the data plane goes live while distribution is still incomplete
    wait_for_ready(&nexus).await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!dir.path().join("bootstrap.tombstone").exists());

    keepers[2].set_reachable(true);
    wait_until("bootstrap marker", || {
        dir.path().join("bootstrap.tombstone").exists()
    })
    .await;

    nexus.shutdown().await;
}

#[tokio::test]
async fn secrets_versioning_roundtrip() {
    let keepers = spawn_keepers(3).await;
    let dir = tempfile::tempdir().unwrap();
    let nexus = start_nexus(test_config(dir.path(), &keepers)).await;
    wait_for_ready(&nexus).await;
    create_workload_policy(&nexus.server).await;

    let first = values(&[("user", "u"), ("pass", "p")]);
    assert_eq!(put_secret(&nexus.server, "app/db", first.clone()).await, 1);
    assert_eq!(get_secret(&nexus.server, "app/db", 0).await, first);
    assert_eq!(metadata_current_version(&nexus.server, "app/db").await, 1);

    let second = values(&[("user", "u2"), ("pass", "p2")]);
    assert_eq!(put_secret(&nexus.server, "app/db", second.clone()).await, 2);

    // soft-delete version 1, current stays 2
    let response = nexus
        .server
        .post("/v1/store/secrets")
        .add_query_param("action", "delete")
        .add_header(TEST_SPIFFE_HEADER, WORKLOAD)
        .json(&SecretVersionsRequest {
            path: "app/db".parse().unwrap(),
            versions: vec![1],
        })
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(metadata_current_version(&nexus.server, "app/db").await, 2);

    // a deleted version answers 404 and keeps its data for undelete
    let response = nexus
        .server
        .post("/v1/store/secrets")
        .add_query_param("action", "get")
        .add_header(TEST_SPIFFE_HEADER, WORKLOAD)
        .json(&SecretGetRequest {
            path: "app/db".parse().unwrap(),
            version: 1,
        })
        .await;
    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);

    let response = nexus
        .server
        .post("/v1/store/secrets")
        .add_query_param("action", "undelete")
        .add_header(TEST_SPIFFE_HEADER, WORKLOAD)
        .json(&SecretVersionsRequest {
            path: "app/db".parse().unwrap(),
            versions: vec![1],
        })
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(get_secret(&nexus.server, "app/db", 1).await, first);
    assert_eq!(metadata_current_version(&nexus.server, "app/db").await, 2);

    nexus.shutdown().await;
}

#[tokio::test]
async fn cipher_roundtrip_octet_stream_and_json() {
    let nexus = start_memory_nexus().await;
    wait_for_ready(&nexus).await;

    let plaintext: Vec<u8> = (0x01..=0x20).collect();

    // octet-stream shape
    let response = nexus
        .server
        .post("/v1/cipher/encrypt")
        .add_header(TEST_SPIFFE_HEADER, LITE_WORKLOAD)
        .content_type("application/octet-stream")
        .bytes(plaintext.clone().into())
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let sealed = response.as_bytes().to_vec();
    assert_eq!(sealed[0], b'1');

    let response = nexus
        .server
        .post("/v1/cipher/decrypt")
        .add_header(TEST_SPIFFE_HEADER, LITE_WORKLOAD)
        .content_type("application/octet-stream")
        .bytes(sealed.clone().into())
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.as_bytes().to_vec(), plaintext);

    // any flipped byte is rejected with 400
    for position in [0, 1, 13, sealed.len() - 1] {
        let mut tampered = sealed.clone();
        tampered[position] ^= 0x01;
        let response = nexus
            .server
            .post("/v1/cipher/decrypt")
            .add_header(TEST_SPIFFE_HEADER, LITE_WORKLOAD)
            .content_type("application/octet-stream")
            .bytes(tampered.into())
            .await;
        assert_eq!(
            response.status_code(),
            StatusCode::BAD_REQUEST,
            "tampered byte {position}"
        );
    }

    // JSON shape
    use base64::Engine as _;
    let b64 = base64::engine::general_purpose::STANDARD;
    let response = nexus
        .server
        .post("/v1/cipher/encrypt")
        .add_header(TEST_SPIFFE_HEADER, LITE_WORKLOAD)
        .json(&EncryptRequest {
            plaintext: b64.encode(&plaintext),
        })
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let sealed: EncryptResponse = response.json();
    assert_eq!(sealed.version, "1");

    let response = nexus
        .server
        .post("/v1/cipher/decrypt")
        .add_header(TEST_SPIFFE_HEADER, LITE_WORKLOAD)
        .json(&DecryptRequest {
            version: sealed.version,
            nonce: sealed.nonce,
            ciphertext: sealed.ciphertext,
        })
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(
        b64.decode(response.json::<DecryptResponse>().plaintext).unwrap(),
        plaintext
    );

    nexus.shutdown().await;
}

#[tokio::test]
async fn denied_requests_never_touch_the_store() {
    let keepers = spawn_keepers(3).await;
    let dir = tempfile::tempdir().unwrap();
    let (store, data_calls) = CountingBackingStore::service(MemoryBackingStore::service(10));
    let nexus = start_nexus_with_store(test_config(dir.path(), &keepers), store).await;
    wait_for_ready(&nexus).await;

    // no policies exist: every secrets action is denied for the workload
    for action in ["default", "get", "delete", "undelete", "list"] {
        let response = nexus
            .server
            .post("/v1/store/secrets")
            .add_query_param("action", action)
            .add_header(TEST_SPIFFE_HEADER, WORKLOAD)
            .json(&serde_json::json!({"path": "app/db", "values": {"k": "v"}}))
            .await;
        assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED, "action {action}");
    }
    let response = nexus
        .server
        .post("/v1/store/secrets/metadata")
        .add_query_param("action", "get")
        .add_header(TEST_SPIFFE_HEADER, WORKLOAD)
        .json(&serde_json::json!({"path": "app/db"}))
        .await;
    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);

    // non-lite peers need an execute policy for the cipher routes
    let response = nexus
        .server
        .post("/v1/cipher/encrypt")
        .add_header(TEST_SPIFFE_HEADER, WORKLOAD)
        .content_type("application/octet-stream")
        .bytes(vec![1, 2, 3].into())
        .await;
    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);

    // policy admin is closed to non-pilots
    let response = nexus
        .server
        .post("/v1/acl/policy")
        .add_query_param("action", "list")
        .add_header(TEST_SPIFFE_HEADER, WORKLOAD)
        .await;
    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);

    // a request with no identity at all is equally dead
    let response = nexus.server.post("/v1/store/secrets").await;
    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);

    assert_eq!(data_calls.load(std::sync::atomic::Ordering::Relaxed), 0);

    nexus.shutdown().await;
}

#[tokio::test]
async fn restart_recovers_from_a_keeper_quorum() {
    let keepers = spawn_keepers(3).await;
    let dir = tempfile::tempdir().unwrap();

    // first life: day zero, one secret written
    let nexus = start_nexus(test_config(dir.path(), &keepers)).await;
    wait_for_ready(&nexus).await;
    create_workload_policy(&nexus.server).await;
    let data = values(&[("user", "u"), ("pass", "p")]);
    put_secret(&nexus.server, "app/db", data.clone()).await;
    wait_until("all keepers armed", || {
        keepers.iter().all(|keeper| keeper.held_shard().is_some())
    })
    .await;
    let original_third_shard = keepers[2].held_shard().unwrap();
    nexus.shutdown().await;

    // second life: keeper 3 lost its shard, the other two suffice
    keepers[2].clear_shard();
    let nexus = start_nexus(test_config(dir.path(), &keepers)).await;
    wait_for_ready(&nexus).await;

    // the sealed store opens with the reconstructed key
    create_workload_policy(&nexus.server).await;
    assert_eq!(get_secret(&nexus.server, "app/db", 0).await, data);

    // the periodic re-split re-arms keeper 3 with its original shard
    wait_until("keeper 3 re-armed", || keepers[2].held_shard().is_some()).await;
    assert!(
        keepers[2]
            .held_shard()
            .unwrap()
            .ct_eq(&original_third_shard)
    );

    nexus.shutdown().await;
}

#[tokio::test]
async fn recovery_blocks_below_quorum_and_completes_once_reached() {
    let keepers = spawn_keepers(3).await;
    let dir = tempfile::tempdir().unwrap();

    // first life: arm all keepers, then go away
    let nexus = start_nexus(test_config(dir.path(), &keepers)).await;
    wait_for_ready(&nexus).await;
    wait_until("all keepers armed", || {
        keepers.iter().all(|keeper| keeper.held_shard().is_some())
    })
    .await;
    nexus.shutdown().await;

    // second life: only keeper 1 answers, one shard is not a quorum
    keepers[1].set_reachable(false);
    keepers[2].set_reachable(false);
    let nexus = start_nexus(test_config(dir.path(), &keepers)).await;
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(
        nexus.server.get("/ready").await.status_code(),
        StatusCode::SERVICE_UNAVAILABLE
    );
    let response = nexus
        .server
        .post("/v1/store/secrets")
        .add_query_param("action", "list")
        .add_header(TEST_SPIFFE_HEADER, WORKLOAD)
        .await;
    assert_eq!(response.status_code(), StatusCode::SERVICE_UNAVAILABLE);

    // keeper 2 comes back: the engine reaches quorum on its next sweep
    keepers[1].set_reachable(true);
    wait_for_ready(&nexus).await;

    nexus.shutdown().await;
}

#[tokio::test]
async fn operator_restore_rescues_a_dead_keeper_set() {
    let keepers = spawn_keepers(3).await;
    let dir = tempfile::tempdir().unwrap();

    // first life: bootstrap, one secret, export the operator shards
    let nexus = start_nexus(test_config(dir.path(), &keepers)).await;
    wait_for_ready(&nexus).await;
    create_workload_policy(&nexus.server).await;
    let data = values(&[("user", "u")]);
    put_secret(&nexus.server, "app/db", data.clone()).await;
    let response = nexus
        .server
        .post("/v1/operator/recover")
        .add_header(TEST_SPIFFE_HEADER, PILOT)
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let exported: RecoverResponse = response.json();
    assert_eq!(exported.shards.len(), 3);
    assert_eq!(exported.threshold, 2);
    nexus.shutdown().await;

    // disaster: the whole keeper set is gone
    let dead_keepers = spawn_keepers(3).await;
    let nexus = start_nexus(test_config(dir.path(), &dead_keepers)).await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    // everything non-emergency answers 503 while recovering
    assert_eq!(
        nexus.server.get("/ready").await.status_code(),
        StatusCode::SERVICE_UNAVAILABLE
    );
    for (path, action) in [
        ("/v1/store/secrets", "get"),
        ("/v1/store/secrets/metadata", "get"),
        ("/v1/acl/policy", "list"),
    ] {
        let response = nexus
            .server
            .post(path)
            .add_query_param("action", action)
            .add_header(TEST_SPIFFE_HEADER, PILOT)
            .json(&serde_json::json!({"path": "app/db"}))
            .await;
        assert_eq!(
            response.status_code(),
            StatusCode::SERVICE_UNAVAILABLE,
            "{path}"
        );
    }
    let response = nexus
        .server
        .post("/v1/cipher/encrypt")
        .add_header(TEST_SPIFFE_HEADER, LITE_WORKLOAD)
        .content_type("application/octet-stream")
        .bytes(vec![1].into())
        .await;
    assert_eq!(response.status_code(), StatusCode::SERVICE_UNAVAILABLE);

    // the break-glass routes stay reachable: recover reports a caller
    // error (nothing to export), not the 503 gate
    let response = nexus
        .server
        .post("/v1/operator/recover")
        .add_header(TEST_SPIFFE_HEADER, PILOT)
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);

    // feed two exported shards back in
    let restore = |shard: OperatorShard| {
        let server = &nexus.server;
        async move {
            let response = server
                .post("/v1/operator/restore")
                .add_header(TEST_SPIFFE_HEADER, PILOT)
                .json(&RestoreRequest {
                    id: shard.id,
                    shard: shard.shard,
                })
                .await;
            assert_eq!(response.status_code(), StatusCode::OK);
            response.json::<RestoreResponse>()
        }
    };
    let status = restore(exported.shards[0].clone()).await;
    assert!(!status.restored);
    assert_eq!(status.collected, 1);
    let status = restore(exported.shards[2].clone()).await;
    assert!(status.restored);

    wait_for_ready(&nexus).await;
    create_workload_policy(&nexus.server).await;
    assert_eq!(get_secret(&nexus.server, "app/db", 0).await, data);

    // steady state re-arms the replacement keeper set
    wait_until("replacement keepers armed", || {
        dead_keepers.iter().all(|keeper| keeper.held_shard().is_some())
    })
    .await;

    nexus.shutdown().await;
}

#[tokio::test]
async fn policy_admin_flow() {
    let nexus = start_memory_nexus().await;
    wait_for_ready(&nexus).await;

    let response = nexus
        .server
        .post("/v1/acl/policy")
        .add_header(TEST_SPIFFE_HEADER, PILOT)
        .json(&PolicyCreateRequest {
            name: "cipher-users".to_owned(),
            spiffe_id_pattern: "spiffe://nexus\\.internal/workload/.*".to_owned(),
            path_pattern: "cipher/.*".to_owned(),
            permissions: HashSet::from([Permission::Execute]),
        })
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let id = response.json::<PolicyCreateResponse>().id;

    // the policy now lets a plain workload use the cipher routes
    let response = nexus
        .server
        .post("/v1/cipher/encrypt")
        .add_header(TEST_SPIFFE_HEADER, WORKLOAD)
        .content_type("application/octet-stream")
        .bytes(vec![1, 2, 3].into())
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    // but grants nothing on paths outside its path pattern
    let response = nexus
        .server
        .post("/v1/store/secrets")
        .add_query_param("action", "get")
        .add_header(TEST_SPIFFE_HEADER, OTHER_WORKLOAD)
        .json(&SecretGetRequest {
            path: "app/db".parse().unwrap(),
            version: 0,
        })
        .await;
    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);

    let response = nexus
        .server
        .post("/v1/acl/policy")
        .add_query_param("action", "get")
        .add_header(TEST_SPIFFE_HEADER, PILOT)
        .json(&serde_json::json!({ "id": id }))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.json::<PolicyGetResponse>().policy.name, "cipher-users");

    let response = nexus
        .server
        .post("/v1/acl/policy")
        .add_query_param("action", "list")
        .add_header(TEST_SPIFFE_HEADER, PILOT)
        .await;
    assert_eq!(response.json::<PolicyListResponse>().policies.len(), 1);

    let response = nexus
        .server
        .post("/v1/acl/policy")
        .add_query_param("action", "delete")
        .add_header(TEST_SPIFFE_HEADER, PILOT)
        .json(&serde_json::json!({ "id": id }))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);

    let response = nexus
        .server
        .post("/v1/acl/policy")
        .add_query_param("action", "get")
        .add_header(TEST_SPIFFE_HEADER, PILOT)
        .json(&serde_json::json!({ "id": id }))
        .await;
    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);

    // with the policy gone the workload is locked out again
    let response = nexus
        .server
        .post("/v1/cipher/encrypt")
        .add_header(TEST_SPIFFE_HEADER, WORKLOAD)
        .content_type("application/octet-stream")
        .bytes(vec![1, 2, 3].into())
        .await;
    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);

    nexus.shutdown().await;
}

#[tokio::test]
async fn caller_input_is_validated() {
    let nexus = start_memory_nexus().await;
    wait_for_ready(&nexus).await;
    create_workload_policy(&nexus.server).await;

    // malformed path
    let response = nexus
        .server
        .post("/v1/store/secrets")
        .add_header(TEST_SPIFFE_HEADER, WORKLOAD)
        .json(&serde_json::json!({"path": "../escape", "values": {"k": "v"}}))
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);

    // malformed key name
    let response = nexus
        .server
        .post("/v1/store/secrets")
        .add_header(TEST_SPIFFE_HEADER, WORKLOAD)
        .json(&serde_json::json!({"path": "app/db", "values": {"bad key": "v"}}))
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);

    // garbage body
    let response = nexus
        .server
        .post("/v1/store/secrets")
        .add_header(TEST_SPIFFE_HEADER, WORKLOAD)
        .bytes("not json".into())
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);

    // unknown version string on decrypt
    let response = nexus
        .server
        .post("/v1/cipher/decrypt")
        .add_header(TEST_SPIFFE_HEADER, LITE_WORKLOAD)
        .json(&DecryptRequest {
            version: "9".to_owned(),
            nonce: "AAAAAAAAAAAAAAAA".to_owned(),
            ciphertext: "AAAA".to_owned(),
        })
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);

    // unknown secret path is a 404, not a 400
    let response = nexus
        .server
        .post("/v1/store/secrets")
        .add_query_param("action", "get")
        .add_header(TEST_SPIFFE_HEADER, WORKLOAD)
        .json(&SecretGetRequest {
            path: "no/such/path".parse().unwrap(),
            version: 0,
        })
        .await;
    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);

    nexus.shutdown().await;
}

#[tokio::test]
async fn oversized_cipher_payloads_are_rejected() {
    let keepers = spawn_keepers(3).await;
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path(), &keepers);
    config.max_plaintext_size = 16;
    config.max_ciphertext_size = 16 + 29;
    let nexus = start_nexus(config).await;
    wait_for_ready(&nexus).await;

    let response = nexus
        .server
        .post("/v1/cipher/encrypt")
        .add_header(TEST_SPIFFE_HEADER, LITE_WORKLOAD)
        .content_type("application/octet-stream")
        .bytes(vec![0u8; 17].into())
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);

    let response = nexus
        .server
        .post("/v1/cipher/encrypt")
        .add_header(TEST_SPIFFE_HEADER, LITE_WORKLOAD)
        .content_type("application/octet-stream")
        .bytes(vec![0u8; 16].into())
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);

    // the JSON shape counts the whole sealed record against the same cap:
    // version(1) + nonce(12) + this 33-byte ciphertext exceeds 16 + 29
    use base64::Engine as _;
    let b64 = base64::engine::general_purpose::STANDARD;
    let response = nexus
        .server
        .post("/v1/cipher/decrypt")
        .add_header(TEST_SPIFFE_HEADER, LITE_WORKLOAD)
        .json(&DecryptRequest {
            version: "1".to_owned(),
            nonce: b64.encode([0u8; 12]),
            ciphertext: b64.encode([0u8; 33]),
        })
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    assert!(response.text().contains("too large"));

    // a record sealed at the plaintext cap sits exactly on the ciphertext
    // cap and still decrypts
    let response = nexus
        .server
        .post("/v1/cipher/encrypt")
        .add_header(TEST_SPIFFE_HEADER, LITE_WORKLOAD)
        .json(&EncryptRequest {
            plaintext: b64.encode([7u8; 16]),
        })
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let sealed: EncryptResponse = response.json();
    let response = nexus
        .server
        .post("/v1/cipher/decrypt")
        .add_header(TEST_SPIFFE_HEADER, LITE_WORKLOAD)
        .json(&DecryptRequest {
            version: sealed.version,
            nonce: sealed.nonce,
            ciphertext: sealed.ciphertext,
        })
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(
        b64.decode(response.json::<DecryptResponse>().plaintext).unwrap(),
        [7u8; 16]
    );

    nexus.shutdown().await;
}
