//! Integration tests using wiremock to simulate the FamilySearch API.

use async_trait::async_trait;
use lineage::transport::{
    RawResponse, RequestDescriptor, Transport, TransportError, TransportErrorKind,
};
use lineage::{
    AccessToken, AuthGrant, Backoff, ChangeObject, Client, ConvenienceRegistry, DeleteOptions,
    Endpoint, Error, FileTokenStore, Kind, LifecycleState, RetryPolicy, SaveOptions,
    ThrottleConfig, TokenSource, TokenStore,
};
use http::StatusCode;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PERSON_BODY: &str = r#"{"persons":[{"id":"KWQS-BBQ","living":false,"display":{"name":"Anastasia Aleksandrova","lifespan":"1890-1961"}}]}"#;

fn client_for(server: &MockServer) -> lineage::ClientBuilder {
    Client::builder()
        .base_url(server.uri())
        .unwrap()
        .access_token("token")
        .retry_delay(Duration::from_millis(10))
        .registry(Arc::new(ConvenienceRegistry::with_builtins()))
}

/// Transport that plays back a fixed list of outcomes and records every send.
struct Scripted {
    outcomes: Mutex<VecDeque<Result<RawResponse, TransportError>>>,
    sends: AtomicUsize,
}

impl Scripted {
    fn new(outcomes: Vec<Result<RawResponse, TransportError>>) -> Arc<Self> {
        Arc::new(Self {
            outcomes: Mutex::new(outcomes.into()),
            sends: AtomicUsize::new(0),
        })
    }

    fn sends(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for Scripted {
    async fn send(&self, _request: &RequestDescriptor) -> Result<RawResponse, TransportError> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(RawResponse::new(StatusCode::OK, "{}")))
    }
}

fn scripted_client(transport: &Arc<Scripted>, max_retries: usize) -> Client {
    Client::builder()
        .transport(Arc::clone(transport) as Arc<dyn Transport>)
        .access_token("token")
        .max_retries(max_retries)
        .retry_delay(Duration::from_millis(10))
        .build()
        .unwrap()
}

fn connect_error() -> Result<RawResponse, TransportError> {
    Err(TransportError::new(TransportErrorKind::Connect, "connection refused"))
}

#[tokio::test]
async fn test_successful_get_request() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/platform/tree/persons/KWQS-BBQ"))
        .and(header("Accept", "application/x-fs-v1+json"))
        .and(header("Authorization", "Bearer token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(PERSON_BODY)
                .insert_header("X-Request-Id", "abc-123"),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server).build().unwrap();
    let response = client
        .get("/platform/tree/persons/KWQS-BBQ", &Kind::PERSON_RESPONSE)
        .await
        .unwrap();

    assert_eq!(response.status.as_u16(), 200);
    assert_eq!(response.attempts, 1);
    assert!(!response.was_retried());
    assert_eq!(response.raw_body, PERSON_BODY);
    assert_eq!(response.header("x-request-id"), Some("abc-123"));
    assert_eq!(response.request.url().path(), "/platform/tree/persons/KWQS-BBQ");
    assert_eq!(response.request.header("authorization"), Some("Bearer token"));

    let person = response.get("person").unwrap();
    assert_eq!(person["id"], "KWQS-BBQ");
    let person = client.mapper().map_value(person, &Kind::PERSON);
    assert_eq!(person.get("display_name"), Some(json!("Anastasia Aleksandrova")));
    assert_eq!(person.get("lifespan"), Some(json!("1890-1961")));
}

#[tokio::test]
async fn test_throttled_twice_then_success() {
    let mock_server = MockServer::start().await;
    let attempt_count = Arc::new(AtomicUsize::new(0));
    let attempt_count_clone = attempt_count.clone();

    Mock::given(method("GET"))
        .and(path("/platform/tree/persons/KWQS-BBQ"))
        .respond_with(move |_req: &wiremock::Request| {
            let count = attempt_count_clone.fetch_add(1, Ordering::SeqCst);
            if count < 2 {
                ResponseTemplate::new(429).set_body_string("Slow down")
            } else {
                ResponseTemplate::new(200).set_body_string(PERSON_BODY)
            }
        })
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server)
        .max_retries(2)
        .retry_delay(Duration::from_millis(100))
        .build()
        .unwrap();

    let started = Instant::now();
    let response = client
        .get("/platform/tree/persons/KWQS-BBQ", &Kind::PERSON_RESPONSE)
        .await
        .unwrap();

    assert_eq!(attempt_count.load(Ordering::SeqCst), 3);
    assert_eq!(response.attempts, 3);
    assert_eq!(response.strip(), serde_json::from_str::<Value>(PERSON_BODY).unwrap());
    assert!(started.elapsed() >= Duration::from_millis(200));
    assert!(response.latency >= Duration::from_millis(200));
}

#[tokio::test]
async fn test_throttling_exhausted_keeps_hint() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/platform/users/current"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("Retry-After", "0")
                .set_body_string("Throttled"),
        )
        .expect(2)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server).max_retries(1).build().unwrap();
    let result = client.get("/platform/users/current", &Kind::USER_RESPONSE).await;

    match result {
        Err(Error::ThrottledExhausted {
            attempts,
            status,
            raw_response,
            throttle_hint,
            ..
        }) => {
            assert_eq!(attempts, 2);
            assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
            assert_eq!(raw_response, "Throttled");
            assert_eq!(throttle_hint.unwrap().retry_after, Some(Duration::ZERO));
        }
        other => panic!("Expected ThrottledExhausted, got {:?}", other),
    }
}

#[tokio::test]
async fn test_retry_after_hint_is_honored() {
    let mock_server = MockServer::start().await;
    let attempt_count = Arc::new(AtomicUsize::new(0));
    let attempt_count_clone = attempt_count.clone();

    Mock::given(method("GET"))
        .and(path("/platform/users/current"))
        .respond_with(move |_req: &wiremock::Request| {
            if attempt_count_clone.fetch_add(1, Ordering::SeqCst) == 0 {
                ResponseTemplate::new(429).insert_header("Retry-After", "1")
            } else {
                ResponseTemplate::new(200).set_body_json(json!({"users": [{"id": "U1"}]}))
            }
        })
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server)
        .throttle_config(ThrottleConfig {
            max_wait: Duration::from_millis(300),
            respect_hints: true,
        })
        .build()
        .unwrap();

    let started = Instant::now();
    let response = client
        .get("/platform/users/current", &Kind::USER_RESPONSE)
        .await
        .unwrap();

    // The one second hint is capped at max_wait.
    assert!(started.elapsed() >= Duration::from_millis(300));
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(response.get("user"), Some(json!({"id": "U1"})));
}

#[tokio::test]
async fn test_post_not_retried_after_server_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/platform/tree/persons"))
        .respond_with(ResponseTemplate::new(503).set_body_string("Unavailable"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server).build().unwrap();
    let result = client
        .post("/platform/tree/persons", &json!({"persons": []}), &Kind::EMPTY)
        .await;

    match result {
        Err(Error::ServerError {
            status,
            raw_response,
            request,
            ..
        }) => {
            assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
            assert_eq!(raw_response, "Unavailable");
            assert_eq!(request.body(), Some(r#"{"persons":[]}"#));
            assert_eq!(request.header("content-type"), Some("application/x-fs-v1+json"));
        }
        other => panic!("Expected ServerError, got {:?}", other),
    }
}

#[tokio::test]
async fn test_get_retried_after_server_error() {
    let mock_server = MockServer::start().await;
    let attempt_count = Arc::new(AtomicUsize::new(0));
    let attempt_count_clone = attempt_count.clone();

    Mock::given(method("GET"))
        .and(path("/platform/tree/persons/KWQS-BBQ"))
        .respond_with(move |_req: &wiremock::Request| {
            if attempt_count_clone.fetch_add(1, Ordering::SeqCst) < 2 {
                ResponseTemplate::new(500).set_body_string("Server error")
            } else {
                ResponseTemplate::new(200).set_body_string(PERSON_BODY)
            }
        })
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server).build().unwrap();
    let response = client
        .get("/platform/tree/persons/KWQS-BBQ", &Kind::PERSON_RESPONSE)
        .await
        .unwrap();

    assert_eq!(response.attempts, 3);
    assert!(response.was_retried());
    assert_eq!(attempt_count.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_throttled_post_is_retried() {
    let mock_server = MockServer::start().await;
    let attempt_count = Arc::new(AtomicUsize::new(0));
    let attempt_count_clone = attempt_count.clone();

    Mock::given(method("POST"))
        .and(path("/platform/tree/persons"))
        .respond_with(move |_req: &wiremock::Request| {
            if attempt_count_clone.fetch_add(1, Ordering::SeqCst) < 2 {
                ResponseTemplate::new(429)
            } else {
                ResponseTemplate::new(201).insert_header("X-Entity-Id", "KWQS-NEW")
            }
        })
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server).build().unwrap();
    let response = client
        .post("/platform/tree/persons", &json!({"persons": [{}]}), &Kind::EMPTY)
        .await
        .unwrap();

    assert_eq!(attempt_count.load(Ordering::SeqCst), 3);
    assert_eq!(response.status, StatusCode::CREATED);
    assert_eq!(response.annotation("entity_id"), Some(&json!("KWQS-NEW")));
}

#[tokio::test]
async fn test_max_retries_ceiling() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/platform/users/current"))
        .respond_with(ResponseTemplate::new(502).set_body_string("Bad gateway"))
        .expect(5)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server)
        .retry_delay(Duration::from_millis(1))
        .build()
        .unwrap();
    let err = client
        .get("/platform/users/current", &Kind::USER_RESPONSE)
        .await
        .unwrap_err();

    assert_eq!(err.status(), Some(StatusCode::BAD_GATEWAY));
    assert_eq!(err.raw_response(), Some("Bad gateway"));
}

#[tokio::test]
async fn test_unauthorized_clears_token() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/platform/users/current"))
        .respond_with(ResponseTemplate::new(401).set_body_string("Token expired"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server).build().unwrap();

    let err = client
        .get("/platform/users/current", &Kind::USER_RESPONSE)
        .await
        .unwrap_err();
    match err {
        Error::Auth {
            status,
            raw_response,
            ..
        } => {
            assert_eq!(status, Some(StatusCode::UNAUTHORIZED));
            assert_eq!(raw_response.as_deref(), Some("Token expired"));
        }
        other => panic!("Expected Auth, got {:?}", other),
    }

    assert!(client.tokens().current_token().is_none());
    assert!(matches!(
        client.get("/platform/users/current", &Kind::USER_RESPONSE).await,
        Err(Error::AuthRequired)
    ));
}

#[tokio::test]
async fn test_no_token_sends_nothing() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let client = Client::builder()
        .base_url(mock_server.uri())
        .unwrap()
        .build()
        .unwrap();

    let result = client.get("/platform/users/current", &Kind::USER_RESPONSE).await;
    assert!(matches!(result, Err(Error::AuthRequired)));
}

#[tokio::test]
async fn test_password_grant_then_call() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/cis-web/oauth2/v3/token"))
        .and(body_string_contains("grant_type=password"))
        .and(body_string_contains("client_id=APP-KEY"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"access_token": "fresh", "token_type": "Bearer"})),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/platform/users/current"))
        .and(header("Authorization", "Bearer fresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"users": [{"id": "U1"}]})))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = Client::builder()
        .base_url(mock_server.uri())
        .unwrap()
        .app_key("APP-KEY")
        .build()
        .unwrap();

    let token = client
        .acquire_token(AuthGrant::Password {
            username: "anastasia".into(),
            password: "secret".into(),
        })
        .await
        .unwrap();
    assert_eq!(token.value(), "fresh");

    let response = client
        .get("/platform/users/current", &Kind::USER_RESPONSE)
        .await
        .unwrap();
    assert_eq!(response.get("user"), Some(json!({"id": "U1"})));
}

#[tokio::test]
async fn test_rejected_credentials() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/cis-web/oauth2/v3/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(
            json!({"error": "invalid_grant", "error_description": "Invalid user credentials"}),
        ))
        .mount(&mock_server)
        .await;

    let client = Client::builder()
        .base_url(mock_server.uri())
        .unwrap()
        .app_key("APP-KEY")
        .build()
        .unwrap();

    let err = client
        .acquire_token(AuthGrant::Password {
            username: "anastasia".into(),
            password: "wrong".into(),
        })
        .await
        .unwrap_err();

    match err {
        Error::Auth { message, .. } => assert_eq!(message, "Invalid user credentials"),
        other => panic!("Expected Auth, got {:?}", other),
    }
    assert!(!client.tokens().is_authenticated());
}

#[tokio::test]
async fn test_malformed_response() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/platform/tree/persons/KWQS-BBQ"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server).build().unwrap();
    let result = client
        .get("/platform/tree/persons/KWQS-BBQ", &Kind::PERSON_RESPONSE)
        .await;

    match result {
        Err(Error::MalformedResponse {
            raw_response,
            status,
            request,
            ..
        }) => {
            assert_eq!(raw_response, "<html>maintenance</html>");
            assert_eq!(status, StatusCode::OK);
            assert_eq!(request.url().path(), "/platform/tree/persons/KWQS-BBQ");
        }
        other => panic!("Expected MalformedResponse, got {:?}", other),
    }
}

#[tokio::test]
async fn test_accessors_registered_later_apply_to_later_responses() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/platform/tree/persons/KWQS-BBQ"))
        .respond_with(ResponseTemplate::new(200).set_body_string(PERSON_BODY))
        .mount(&mock_server)
        .await;

    let registry = Arc::new(ConvenienceRegistry::with_builtins());
    let client = client_for(&mock_server)
        .registry(Arc::clone(&registry))
        .build()
        .unwrap();

    let first = client
        .get("/platform/tree/persons/KWQS-BBQ", &Kind::PERSON_RESPONSE)
        .await
        .unwrap();

    registry.register(&Kind::PERSON_RESPONSE, "person_count", |payload| {
        payload
            .get("persons")
            .and_then(Value::as_array)
            .map(|persons| Value::from(persons.len()))
    });

    let second = client
        .get("/platform/tree/persons/KWQS-BBQ", &Kind::PERSON_RESPONSE)
        .await
        .unwrap();

    assert!(!first.has_accessor("person_count"));
    assert_eq!(first.get("person_count"), None);
    assert_eq!(second.get("person_count"), Some(json!(1)));
    assert_eq!(first.strip(), second.strip());
}

#[tokio::test]
async fn test_strip_reproduces_body() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/platform/tree/persons/KWQS-BBQ"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(PERSON_BODY)
                .insert_header("Location", "/platform/tree/persons/KWQS-BBQ"),
        )
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server).build().unwrap();
    let mut response = client
        .get("/platform/tree/persons/KWQS-BBQ", &Kind::PERSON_RESPONSE)
        .await
        .unwrap();
    response.data.annotate("fetched_by", json!("tests"));

    assert_eq!(serde_json::to_string(&response.strip()).unwrap(), PERSON_BODY);
    assert_eq!(response.strip(), response.strip());
    assert_eq!(response.annotation("status"), Some(&json!(200)));
    assert_eq!(response.annotation("fetched_by"), Some(&json!("tests")));
}

#[tokio::test]
async fn test_query_params_and_absolute_urls() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/platform/tree/search"))
        .and(wiremock::matchers::query_param("q", "givenName:Anastasia"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"entries": []})))
        .expect(2)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server).build().unwrap();
    let metadata = lineage::metadata::RequestMetadata::new(http::Method::GET, "/platform/tree/search")
        .with_query_param("q", "givenName:Anastasia");
    let response = client
        .execute(metadata, None, &Kind::new("search-results"))
        .await
        .unwrap();
    assert_eq!(response.field("entries"), Some(&json!([])));

    let absolute = format!("{}/platform/tree/search?q=givenName%3AAnastasia", mock_server.uri());
    client
        .get(absolute, &Kind::new("search-results"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_transport_failure_retried_for_get_only() {
    let transport = Scripted::new(vec![
        connect_error(),
        connect_error(),
        Ok(RawResponse::new(StatusCode::OK, r#"{"users":[{"id":"U1"}]}"#)),
    ]);
    let client = scripted_client(&transport, 4);
    let response = client
        .get("/platform/users/current", &Kind::USER_RESPONSE)
        .await
        .unwrap();
    assert_eq!(transport.sends(), 3);
    assert_eq!(response.attempts, 3);

    let transport = Scripted::new(vec![connect_error()]);
    let client = scripted_client(&transport, 4);
    let err = client
        .post("/platform/tree/persons", &json!({}), &Kind::EMPTY)
        .await
        .unwrap_err();
    assert_eq!(transport.sends(), 1);
    assert!(matches!(err, Error::Transport { .. }));
    assert_eq!(err.request().unwrap().method(), http::Method::POST);
}

#[tokio::test]
async fn test_attempt_observer_sees_every_attempt() {
    let transport = Scripted::new(vec![
        Ok(RawResponse::new(StatusCode::SERVICE_UNAVAILABLE, "")),
        Ok(RawResponse::new(StatusCode::OK, "{}")),
    ]);
    let events = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&events);

    let client = Client::builder()
        .transport(Arc::clone(&transport) as Arc<dyn Transport>)
        .access_token("token")
        .retry_policy(RetryPolicy {
            max_retries: 2,
            backoff: Backoff::Fixed(Duration::from_millis(5)),
            throttle: ThrottleConfig::default(),
        })
        .on_attempt(move |event| {
            seen.lock()
                .unwrap()
                .push((event.attempt, event.status, event.retry_in));
        })
        .build()
        .unwrap();

    client.get("/platform/users/current", &Kind::USER_RESPONSE).await.unwrap();

    let events = events.lock().unwrap();
    assert_eq!(
        *events,
        vec![
            (1, Some(StatusCode::SERVICE_UNAVAILABLE), Some(Duration::from_millis(5))),
            (2, Some(StatusCode::OK), None),
        ]
    );
}

#[tokio::test]
async fn test_concurrent_delete_sends_once() {
    let mock_server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/platform/tree/persons/KWQS-BBQ"))
        .and(header("X-Reason", "Duplicate record"))
        .respond_with(ResponseTemplate::new(204).set_delay(Duration::from_millis(100)))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server).build().unwrap();
    let object = client
        .mapper()
        .map_value(json!({"id": "KWQS-BBQ"}), &Kind::PERSON);
    let person = ChangeObject::persisted(
        Endpoint::new("/platform/tree/persons", Kind::PERSON_RESPONSE).envelope("persons"),
        object,
        "KWQS-BBQ",
    );
    let options = DeleteOptions {
        change_message: Some("Duplicate record".into()),
    };

    let (first, second) = tokio::join!(
        person.delete(&client, options.clone()),
        person.delete(&client, options.clone())
    );

    assert!(first.is_ok());
    assert!(matches!(second, Err(Error::ObjectDeleted)));
    assert_eq!(person.state(), LifecycleState::Deleted);
}

#[tokio::test]
async fn test_save_new_object_with_refresh() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/platform/tree/persons"))
        .and(body_string_contains("\"changeMessage\":\"From the 1900 census\""))
        .respond_with(ResponseTemplate::new(201).insert_header(
            "Location",
            format!("{}/platform/tree/persons/KWQS-NEW", mock_server.uri()).as_str(),
        ))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/platform/tree/persons/KWQS-NEW"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "persons": [{
                "id": "KWQS-NEW",
                "living": true,
                "gender": {"type": "http://gedcomx.org/Female"},
                "display": {"name": "Anastasia Aleksandrova"}
            }]
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server).build().unwrap();
    let object = client.mapper().map_value(
        json!({"living": true, "gender": {"type": "http://gedcomx.org/Female"}}),
        &Kind::PERSON,
    );
    let endpoint = Endpoint::new("/platform/tree/persons", Kind::PERSON_RESPONSE)
        .envelope("persons")
        .change_messages(true)
        .require("gender");
    let person = ChangeObject::new(endpoint, object);

    person
        .save(
            &client,
            SaveOptions {
                refresh: true,
                change_message: Some("From the 1900 census".into()),
            },
        )
        .await
        .unwrap();

    assert_eq!(person.state(), LifecycleState::Persisted);
    assert_eq!(person.id().as_deref(), Some("KWQS-NEW"));
    let object = person.object();
    assert_eq!(object.field("id"), Some(&json!("KWQS-NEW")));
    assert_eq!(object.get("display_name"), Some(json!("Anastasia Aleksandrova")));
    assert_eq!(object.field("attribution"), None);
}

#[tokio::test]
async fn test_failed_update_keeps_changes() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/platform/tree/persons/KWQS-BBQ"))
        .respond_with(ResponseTemplate::new(409).set_body_string("Conflict"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server).build().unwrap();
    let object = client
        .mapper()
        .map_value(json!({"id": "KWQS-BBQ", "living": true}), &Kind::PERSON);
    let person = ChangeObject::persisted(
        Endpoint::new("/platform/tree/persons", Kind::PERSON_RESPONSE).envelope("persons"),
        object,
        "KWQS-BBQ",
    );

    person.set("living", json!(false)).unwrap();
    let err = person.save(&client, SaveOptions::default()).await.unwrap_err();

    assert_eq!(err.status(), Some(StatusCode::CONFLICT));
    assert_eq!(person.state(), LifecycleState::Dirty);
    assert_eq!(person.dirty_fields(), vec!["living".to_string()]);
    assert_eq!(person.get("living"), Some(json!(false)));
}

#[tokio::test]
async fn test_unauthorized_keeps_challenge_header() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/platform/users/current"))
        .respond_with(
            ResponseTemplate::new(401)
                .insert_header("WWW-Authenticate", r#"Bearer realm="FamilySearch""#)
                .set_body_string("Unauthorized"),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server).build().unwrap();

    let err = client
        .get("/platform/users/current", &Kind::USER_RESPONSE)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Auth { .. }));
    assert!(err.headers().is_some());
    assert_eq!(err.header("www-authenticate"), Some(r#"Bearer realm="FamilySearch""#));
}

#[tokio::test]
async fn test_stored_token_used_by_fresh_client() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/platform/users/current"))
        .and(header("Authorization", "Bearer saved"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"users":[{"id":"U1"}]}"#))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&mock_server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let token_file = dir.path().join("token.json");
    FileTokenStore::new(token_file.clone())
        .save(&AccessToken::new("saved", None, TokenSource::Credentials))
        .await
        .unwrap();

    let client = Client::builder()
        .base_url(mock_server.uri())
        .unwrap()
        .token_store(Arc::new(FileTokenStore::new(token_file)))
        .build()
        .unwrap();
    assert!(client.tokens().current_token().is_none());

    let response = client
        .get("/platform/users/current", &Kind::USER_RESPONSE)
        .await
        .unwrap();

    assert_eq!(response.status, StatusCode::OK);
    let token = client.tokens().current_token().unwrap();
    assert_eq!(token.value(), "saved");
    assert_eq!(token.source(), TokenSource::Restored);
}

#[tokio::test]
async fn test_save_then_delete_run_in_order() {
    let mock_server = MockServer::start().await;
    let started = Instant::now();
    let delete_at = Arc::new(Mutex::new(None));
    let delete_at_clone = delete_at.clone();

    Mock::given(method("POST"))
        .and(path("/platform/tree/persons/KWQS-BBQ"))
        .respond_with(ResponseTemplate::new(204).set_delay(Duration::from_millis(100)))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("DELETE"))
        .and(path("/platform/tree/persons/KWQS-BBQ"))
        .respond_with(move |_req: &wiremock::Request| {
            *delete_at_clone.lock().unwrap() = Some(started.elapsed());
            ResponseTemplate::new(204)
        })
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server).build().unwrap();
    let object = client
        .mapper()
        .map_value(json!({"id": "KWQS-BBQ", "living": true}), &Kind::PERSON);
    let person = ChangeObject::persisted(
        Endpoint::new("/platform/tree/persons", Kind::PERSON_RESPONSE).envelope("persons"),
        object,
        "KWQS-BBQ",
    );
    person.set("living", json!(false)).unwrap();

    let (saved, deleted) = tokio::join!(
        person.save(&client, SaveOptions::default()),
        person.delete(&client, DeleteOptions::default())
    );

    assert!(saved.is_ok());
    assert!(deleted.is_ok());
    assert_eq!(person.state(), LifecycleState::Deleted);
    assert!(person.dirty_fields().is_empty());

    let methods: Vec<String> = mock_server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .map(|request| request.method.to_string())
        .collect();
    assert_eq!(methods, vec!["POST", "DELETE"]);

    // The delete went out only after the delayed save had been answered.
    let delete_at = delete_at.lock().unwrap().unwrap();
    assert!(delete_at >= Duration::from_millis(100));
}
