use chatlink::backoff::BackoffPolicy;
use chatlink::session::Transport;
use chatlink::state::ChatEvent;
use chatlink::supervisor::{Supervisor, SupervisorConfig};
use chatlink::transport::websocket::WsConnector;
use futures_util::{SinkExt, StreamExt};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;

/// How the test server treats each accepted connection, in order.
#[derive(Clone, Copy)]
enum Behaviour {
    /// Read one question, then vanish without a close frame.
    DropAfterQuestion,
    /// Answer every question with `{"text": "echo: <question>"}`.
    Echo,
}

struct Server {
    url: String,
    questions: Arc<Mutex<Vec<String>>>,
    api_keys: Arc<Mutex<Vec<Option<String>>>>,
}

async fn serve(behaviours: Vec<Behaviour>) -> Server {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/ws", listener.local_addr().unwrap());
    let questions = Arc::new(Mutex::new(Vec::new()));
    let api_keys = Arc::new(Mutex::new(Vec::new()));

    let seen = questions.clone();
    let keys = api_keys.clone();
    tokio::spawn(async move {
        for behaviour in behaviours {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let keys = keys.clone();
            let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                let key = req
                    .headers()
                    .get("x-api-key")
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                keys.lock().unwrap().push(key);
                Ok(resp)
            };
            let mut ws = tokio_tungstenite::accept_hdr_async(stream, callback)
                .await
                .unwrap();
            let seen = seen.clone();
            tokio::spawn(async move {
                while let Some(Ok(msg)) = ws.next().await {
                    let Message::Text(text) = msg else { continue };
                    let body: serde_json::Value = serde_json::from_str(&text).unwrap();
                    let question = body["question"].as_str().unwrap_or_default().to_string();
                    seen.lock().unwrap().push(text.to_string());
                    match behaviour {
                        Behaviour::DropAfterQuestion => return,
                        Behaviour::Echo => {
                            let reply = serde_json::json!({ "text": format!("echo: {question}") });
                            if ws.send(Message::Text(reply.to_string())).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            });
        }
    });

    Server {
        url,
        questions,
        api_keys,
    }
}

fn spawn(connector: WsConnector) -> (Supervisor, mpsc::UnboundedReceiver<ChatEvent>) {
    Supervisor::spawn(
        Transport::Streaming(Arc::new(connector)),
        SupervisorConfig {
            policy: BackoffPolicy::new(Duration::from_millis(50), 5),
            ..Default::default()
        },
    )
}

async fn next_outcome(events: &mut mpsc::UnboundedReceiver<ChatEvent>) -> ChatEvent {
    let wait = async {
        loop {
            match events.recv().await.expect("supervisor event") {
                ChatEvent::Status { .. } => continue,
                other => return other,
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(10), wait)
        .await
        .expect("timed out waiting for supervisor")
}

#[tokio::test]
async fn question_round_trip_over_websocket() {
    let server = serve(vec![Behaviour::Echo]).await;
    let (supervisor, mut events) = spawn(WsConnector::new(&server.url).with_header("x-api-key", "k1"));

    let submitted = supervisor.submit("hello").await.unwrap();
    match next_outcome(&mut events).await {
        ChatEvent::Reply { request, message } => {
            assert_eq!(request, Some(submitted.id));
            assert_eq!(message.text, "echo: hello");
        }
        other => panic!("expected reply, got {:?}", other),
    }
    assert_eq!(
        *server.questions.lock().unwrap(),
        vec![r#"{"question":"hello"}"#.to_string()]
    );
    assert_eq!(*server.api_keys.lock().unwrap(), vec![Some("k1".to_string())]);
    supervisor.shutdown().await;
}

#[tokio::test]
async fn dropped_connection_is_retried_with_same_question() {
    let server = serve(vec![Behaviour::DropAfterQuestion, Behaviour::Echo]).await;
    let (supervisor, mut events) = spawn(WsConnector::new(&server.url));

    let submitted = supervisor.submit("hello").await.unwrap();
    match next_outcome(&mut events).await {
        ChatEvent::Retrying { attempt, delay, .. } => {
            assert_eq!(attempt, 1);
            assert_eq!(delay, Duration::from_millis(50));
        }
        other => panic!("expected retry, got {:?}", other),
    }
    match next_outcome(&mut events).await {
        ChatEvent::Reply { request, message } => {
            assert_eq!(request, Some(submitted.id));
            assert_eq!(message.text, "echo: hello");
        }
        other => panic!("expected reply, got {:?}", other),
    }

    let questions = server.questions.lock().unwrap().clone();
    assert_eq!(questions.len(), 2);
    assert!(questions.iter().all(|q| q == r#"{"question":"hello"}"#));
    supervisor.shutdown().await;
}

#[tokio::test]
async fn unreachable_endpoint_exhausts_retries() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/ws", listener.local_addr().unwrap());
    drop(listener);

    let (supervisor, mut events) = spawn(WsConnector::new(url));
    supervisor.submit("anyone there?").await.unwrap();

    let mut retries = 0;
    let failure = loop {
        match next_outcome(&mut events).await {
            ChatEvent::Retrying { .. } => retries += 1,
            other => break other,
        }
    };
    assert_eq!(retries, 4);
    match failure {
        ChatEvent::Failed { error, .. } => {
            assert!(error.to_string().starts_with("giving up after 5 attempts"));
        }
        other => panic!("expected failure, got {:?}", other),
    }
}
