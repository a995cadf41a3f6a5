use std::sync::{Arc, Mutex};

use relaychat_client::chat::{APOLOGY_MESSAGE, ChatSession, RelayClient, Role, TurnOutcome};
use relaychat_llm::{
    CHAT_RESPONSE_CONTENT_TYPE, LlmProvider, ProviderError, ProviderMessage, ProviderResult,
    ProviderStreamHandle, StreamEvent, StreamRequest, make_event_stream,
};
use relaychat_server::relay::RELAY_FAILURE_BODY;
use relaychat_storage::{GuardedStorage, MemoryStore};
use reqwest::header::CONTENT_TYPE;
use serde_json::json;
use tokio::net::TcpListener;

const MODEL_ID: &str = "gpt-4o-mini";

#[derive(Clone)]
enum Script {
    Reply(Vec<&'static str>),
    BreakAfter(Vec<&'static str>),
    RefuseToOpen,
}

struct ScriptedProvider {
    script: Script,
    requests: Mutex<Vec<StreamRequest>>,
}

impl ScriptedProvider {
    fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            requests: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<StreamRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl LlmProvider for ScriptedProvider {
    fn id(&self) -> &str {
        "scripted"
    }

    fn name(&self) -> &str {
        "Scripted"
    }

    fn default_model(&self) -> &str {
        MODEL_ID
    }

    fn stream_chat(&self, request: StreamRequest) -> ProviderResult<ProviderStreamHandle> {
        self.requests.lock().unwrap().push(request);

        let events = match &self.script {
            Script::Reply(parts) => {
                let mut events = deltas(parts);
                events.push(StreamEvent::Done);
                events
            }
            Script::BreakAfter(parts) => {
                let mut events = deltas(parts);
                events.push(StreamEvent::Error("upstream connection reset".into()));
                events
            }
            Script::RefuseToOpen => {
                return Err(ProviderError::EmptyMessageSet { stage: "scripted" });
            }
        };

        let (event_tx, stream, _cancel_rx) = make_event_stream();
        let worker = Box::pin(async move {
            for event in events {
                if event_tx.send(event).is_err() {
                    break;
                }
            }
        });
        Ok(ProviderStreamHandle { stream, worker })
    }
}

fn deltas(parts: &[&'static str]) -> Vec<StreamEvent> {
    parts
        .iter()
        .map(|part| StreamEvent::Delta(part.to_string()))
        .collect()
}

async fn spawn_relay(provider: Arc<ScriptedProvider>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    tokio::spawn(relaychat_server::serve_with(
        listener,
        provider,
        MODEL_ID.to_string(),
    ));
    format!("http://{address}")
}

fn chat_url(base_url: &str) -> String {
    format!("{base_url}/api/chat")
}

#[tokio::test]
async fn relays_concatenated_deltas_as_plain_text() {
    let provider = ScriptedProvider::new(Script::Reply(vec!["Hello", " there", "!"]));
    let base_url = spawn_relay(provider.clone()).await;

    let response = reqwest::Client::new()
        .post(chat_url(&base_url))
        .json(&json!({ "messages": [{ "role": "user", "content": "hi" }] }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(
        response.headers()[CONTENT_TYPE].to_str().unwrap(),
        CHAT_RESPONSE_CONTENT_TYPE
    );
    assert_eq!(response.text().await.unwrap(), "Hello there!");

    let requests = provider.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].model_id, MODEL_ID);
    assert_eq!(
        requests[0].messages,
        vec![ProviderMessage::new(Role::User, "hi")]
    );
}

#[tokio::test]
async fn empty_deltas_are_not_forwarded() {
    let provider = ScriptedProvider::new(Script::Reply(vec!["", "a", "", "b", ""]));
    let base_url = spawn_relay(provider).await;

    let body = reqwest::Client::new()
        .post(chat_url(&base_url))
        .json(&json!({ "messages": [{ "role": "user", "content": "x" }] }))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    assert_eq!(body, "ab");
}

#[tokio::test]
async fn failure_before_streaming_is_a_plain_500() {
    let provider = ScriptedProvider::new(Script::RefuseToOpen);
    let base_url = spawn_relay(provider).await;

    let response = reqwest::Client::new()
        .post(chat_url(&base_url))
        .json(&json!({ "messages": [] }))
        .send()
        .await
        .unwrap();

    assert_eq!(
        response.status(),
        reqwest::StatusCode::INTERNAL_SERVER_ERROR
    );
    assert_eq!(response.text().await.unwrap(), RELAY_FAILURE_BODY);
}

#[tokio::test]
async fn upstream_failure_before_the_first_delta_is_a_plain_500() {
    let provider = ScriptedProvider::new(Script::BreakAfter(vec![]));
    let base_url = spawn_relay(provider.clone()).await;

    let response = reqwest::Client::new()
        .post(chat_url(&base_url))
        .json(&json!({ "messages": [{ "role": "user", "content": "hi" }] }))
        .send()
        .await
        .unwrap();

    assert_eq!(
        response.status(),
        reqwest::StatusCode::INTERNAL_SERVER_ERROR
    );
    assert_eq!(response.text().await.unwrap(), RELAY_FAILURE_BODY);
    assert_eq!(provider.requests().len(), 1);
}

#[tokio::test]
async fn empty_reply_is_an_empty_200() {
    let provider = ScriptedProvider::new(Script::Reply(vec!["", ""]));
    let base_url = spawn_relay(provider).await;

    let response = reqwest::Client::new()
        .post(chat_url(&base_url))
        .json(&json!({ "messages": [{ "role": "user", "content": "hi" }] }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "");
}

#[tokio::test]
async fn malformed_bodies_are_rejected_before_the_provider() {
    let provider = ScriptedProvider::new(Script::Reply(vec!["unused"]));
    let base_url = spawn_relay(provider.clone()).await;
    let client = reqwest::Client::new();

    let not_json = client
        .post(chat_url(&base_url))
        .header(CONTENT_TYPE, "application/json")
        .body("not json")
        .send()
        .await
        .unwrap();
    assert!(not_json.status().is_client_error());

    let missing_messages = client
        .post(chat_url(&base_url))
        .json(&json!({ "history": [] }))
        .send()
        .await
        .unwrap();
    assert!(missing_messages.status().is_client_error());

    let unknown_role = client
        .post(chat_url(&base_url))
        .json(&json!({ "messages": [{ "role": "system", "content": "x" }] }))
        .send()
        .await
        .unwrap();
    assert!(unknown_role.status().is_client_error());

    assert!(provider.requests().is_empty());
}

#[tokio::test]
async fn client_session_streams_a_reply_through_the_relay() {
    let provider = ScriptedProvider::new(Script::Reply(vec!["¡Hola", ", ", "mundo!"]));
    let base_url = spawn_relay(provider).await;
    let backend = Arc::new(MemoryStore::new());
    let mut session = ChatSession::open(
        GuardedStorage::new(backend.clone()),
        Arc::new(RelayClient::new(&base_url).unwrap()),
    );

    let outcome = session.submit("hi", |_| {}).await;

    assert_eq!(outcome, Ok(TurnOutcome::Completed));
    let messages = session.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].content, "hi");
    assert_eq!(messages[1].role, Role::Assistant);
    assert_eq!(messages[1].content, "¡Hola, mundo!");

    let reopened = ChatSession::open(
        GuardedStorage::new(backend),
        Arc::new(RelayClient::new(&base_url).unwrap()),
    );
    assert_eq!(reopened.messages(), session.messages());
}

#[tokio::test]
async fn mid_stream_failure_surfaces_as_apology_in_the_client() {
    let provider = ScriptedProvider::new(Script::BreakAfter(vec!["partial"]));
    let base_url = spawn_relay(provider).await;
    let mut session = ChatSession::open(
        GuardedStorage::new(Arc::new(MemoryStore::new())),
        Arc::new(RelayClient::new(&base_url).unwrap()),
    );

    let outcome = session.submit("hi", |_| {}).await;

    assert_eq!(outcome, Ok(TurnOutcome::Failed));
    let messages = session.messages();
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[1].role, Role::Assistant);
    assert_eq!(messages[2].content, APOLOGY_MESSAGE);
    assert!(!session.is_loading());
}

#[tokio::test]
async fn upstream_failure_before_the_first_delta_surfaces_as_apology_in_the_client() {
    let provider = ScriptedProvider::new(Script::BreakAfter(vec![]));
    let base_url = spawn_relay(provider).await;
    let mut session = ChatSession::open(
        GuardedStorage::new(Arc::new(MemoryStore::new())),
        Arc::new(RelayClient::new(&base_url).unwrap()),
    );

    let outcome = session.submit("hi", |_| {}).await;

    assert_eq!(outcome, Ok(TurnOutcome::Failed));
    let last = session.messages().last().cloned().unwrap();
    assert_eq!(last.content, APOLOGY_MESSAGE);
    assert!(!session.is_loading());
}
