use std::sync::Arc;

use malsync_core::tokens::{
    KEY_ACCESS_TOKEN, KEY_CLIENT_ID, KEY_CLIENT_SECRET, KEY_EXPIRES_AT, KEY_REFRESH_TOKEN,
};
use malsync_core::{
    KeyValueStore, MalClient, MalError, MalListUpdate, MalPacing, MemoryStore, OAuthClient,
    SystemClock, TokenManager,
};
use serde_json::{Value, json};
use wiremock::matchers::{body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn tokens_for(server: &MockServer, expires_at: i64) -> Arc<TokenManager> {
    let store = Arc::new(MemoryStore::new());
    store.set(KEY_CLIENT_ID, json!("cid")).await.unwrap();
    store.set(KEY_CLIENT_SECRET, json!("secret")).await.unwrap();
    store.set(KEY_ACCESS_TOKEN, json!("test-token")).await.unwrap();
    store.set(KEY_REFRESH_TOKEN, json!("refresh")).await.unwrap();
    store.set(KEY_EXPIRES_AT, json!(expires_at)).await.unwrap();
    let oauth = OAuthClient::with_base_url(&server.uri()).unwrap();
    Arc::new(
        TokenManager::load(store, oauth, Arc::new(SystemClock))
            .await
            .unwrap(),
    )
}

async fn client_for(server: &MockServer) -> MalClient {
    let tokens = tokens_for(server, i64::MAX).await;
    MalClient::with_base_url(&server.uri(), tokens)
        .unwrap()
        .with_pacing(MalPacing::immediate())
        .with_page_size(2)
}

fn item(id: u64, title: &str, status: &str) -> Value {
    json!({
        "node": { "id": id, "title": title },
        "list_status": {
            "status": status,
            "score": 8,
            "num_episodes_watched": 3,
            "is_rewatching": false,
            "num_times_rewatched": 0
        }
    })
}

#[tokio::test]
async fn fetch_full_list_walks_pages_until_short_page() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/users/@me/animelist"))
        .and(query_param("limit", "2"))
        .and(query_param("offset", "0"))
        .and(query_param("nsfw", "true"))
        .and(header("authorization", "Bearer test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [item(1, "One", "watching"), item(2, "Two", "completed")]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/users/@me/animelist"))
        .and(query_param("offset", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [item(3, "Three", "on_hold")]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let items = client.fetch_full_list().await.unwrap();

    let ids: Vec<u64> = items.iter().map(|i| i.node.id).collect();
    assert_eq!(ids, vec![1, 2, 3]);
    let status = items[2].list_status.as_ref().unwrap();
    assert_eq!(status.status.as_deref(), Some("on_hold"));
    assert_eq!(status.score, 8);
}

#[tokio::test]
async fn fetch_full_list_stops_on_empty_page() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/users/@me/animelist"))
        .and(query_param("offset", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [item(1, "One", "watching"), item(2, "Two", "completed")]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/users/@me/animelist"))
        .and(query_param("offset", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": [] })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/users/@me/animelist"))
        .and(query_param("offset", "4"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": [] })))
        .expect(0)
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    assert_eq!(client.fetch_full_list().await.unwrap().len(), 2);
}

#[tokio::test]
async fn fetch_full_list_retries_same_page_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/users/@me/animelist"))
        .and(query_param("offset", "0"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/users/@me/animelist"))
        .and(query_param("offset", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [item(5, "Five", "dropped")]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let items = client.fetch_full_list().await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].node.title, "Five");
}

#[tokio::test]
async fn fetch_full_list_gives_up_after_second_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/users/@me/animelist"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let err = client.fetch_full_list().await.unwrap_err();
    assert!(matches!(err, MalError::Api { status, .. } if status.as_u16() == 503));
}

#[tokio::test]
async fn fetch_full_list_does_not_retry_permanent_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/users/@me/animelist"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    assert!(client.fetch_full_list().await.is_err());
}

#[tokio::test]
async fn upsert_entry_puts_present_fields_as_form() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/v2/anime/100/my_list_status"))
        .and(header("authorization", "Bearer test-token"))
        .and(body_string_contains("status=completed"))
        .and(body_string_contains("score=9"))
        .and(body_string_contains("num_watched_episodes=12"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "completed" })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let update = MalListUpdate {
        status: Some("completed".into()),
        score: Some(9),
        num_watched_episodes: Some(12),
        ..Default::default()
    };
    client.upsert_entry(100, &update).await.unwrap();

    let requests = server.received_requests().await.unwrap();
    let body = String::from_utf8_lossy(&requests[0].body).to_string();
    assert!(!body.contains("num_times_rewatched"));
    assert!(!body.contains("is_rewatching"));
}

#[tokio::test]
async fn upsert_entry_surfaces_last_error_after_three_attempts() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/v2/anime/7/my_list_status"))
        .respond_with(ResponseTemplate::new(400).set_body_string("invalid score"))
        .expect(3)
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let err = client
        .upsert_entry(7, &MalListUpdate::default())
        .await
        .unwrap_err();
    match err {
        MalError::Api { status, body } => {
            assert_eq!(status.as_u16(), 400);
            assert_eq!(body, "invalid score");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn upsert_entry_recovers_on_second_attempt() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/v2/anime/7/my_list_status"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/v2/anime/7/my_list_status"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    client
        .upsert_entry(7, &MalListUpdate::default())
        .await
        .unwrap();
}

#[tokio::test]
async fn delete_entry_treats_not_found_as_success() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/v2/anime/9/my_list_status"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/v2/anime/10/my_list_status"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    client.delete_entry(9).await.unwrap();
    assert!(client.delete_entry(10).await.is_err());
}

#[tokio::test]
async fn fetch_entry_reads_my_list_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/anime/21"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 21,
            "my_list_status": {
                "status": "watching",
                "score": 7,
                "num_episodes_watched": 40,
                "is_rewatching": true,
                "num_times_rewatched": 1
            }
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/anime/22"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": 22 })))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let status = client.fetch_entry(21).await.unwrap().unwrap();
    assert_eq!(status.num_episodes_watched, 40);
    assert!(status.is_rewatching);
    assert!(client.fetch_entry(22).await.unwrap().is_none());
}

#[tokio::test]
async fn expired_token_is_refreshed_before_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/oauth2/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "fresh-token",
            "expires_in": 3600,
            "refresh_token": "refresh-2"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/v2/anime/3/my_list_status"))
        .and(header("authorization", "Bearer fresh-token"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let tokens = tokens_for(&server, 0).await;
    let client = MalClient::with_base_url(&server.uri(), tokens.clone())
        .unwrap()
        .with_pacing(MalPacing::immediate());
    client.delete_entry(3).await.unwrap();
    assert_eq!(tokens.access_token().await.as_deref(), Some("fresh-token"));
}
