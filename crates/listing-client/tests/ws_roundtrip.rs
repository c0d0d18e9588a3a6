use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    http::{header, HeaderMap},
    response::IntoResponse,
    routing::get,
    Router,
};
use listing_client::{
    ClientConfig, Collaborators, ErrorNotice, ErrorSurface, ListingClient, ListingPhase,
    SessionControl, WsConnector,
};
use listing_proto::{
    decode_request, encode_frame, ListMode, ListRequest, ObjectEntry, PermissionResource,
    ResponseFrame,
};
use parking_lot::Mutex;
use url::Url;

const WAIT: Duration = Duration::from_secs(5);

/// Console stand-in: answers listings from a fixed table and refuses the
/// `locked` bucket.
#[derive(Default)]
struct Console {
    listings: HashMap<String, Vec<ObjectEntry>>,
    requests: Mutex<Vec<ListRequest>>,
    cookies: Mutex<Vec<String>>,
}

impl Console {
    fn with_listing(mut self, bucket: &str, prefix: &str, names: &[&str]) -> Self {
        self.listings.insert(
            format!("{bucket}/{prefix}"),
            names.iter().map(|n| ObjectEntry::named(*n)).collect(),
        );
        self
    }

    fn respond(&self, request: &ListRequest) -> Vec<ResponseFrame> {
        if request.bucket_name == "locked" {
            return vec![ResponseFrame {
                bucket_name: Some(request.bucket_name.clone()),
                prefix: Some(request.prefix.clone()),
                ..ResponseFrame::error(request.request_id, 403, "Access Denied.", "")
            }];
        }
        let key = format!("{}/{}", request.bucket_name, request.prefix);
        let entries = self.listings.get(&key).cloned().unwrap_or_default();
        vec![
            ResponseFrame::batch(request.request_id, entries),
            ResponseFrame::end(request.request_id),
        ]
    }
}

async fn ws_handler(
    State(console): State<Arc<Console>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    if let Some(cookie) = headers.get(header::COOKIE).and_then(|v| v.to_str().ok()) {
        console.cookies.lock().push(cookie.to_string());
    }
    ws.on_upgrade(move |socket| serve(socket, console))
}

async fn serve(mut socket: WebSocket, console: Arc<Console>) {
    while let Some(Ok(message)) = socket.recv().await {
        let Message::Text(text) = message else {
            continue;
        };
        let Ok(request) = decode_request(&text) else {
            continue;
        };
        console.requests.lock().push(request.clone());
        if !matches!(request.mode, ListMode::Objects | ListMode::Rewind) {
            continue;
        }
        for frame in console.respond(&request) {
            let Ok(text) = encode_frame(&frame) else {
                continue;
            };
            if socket.send(Message::Text(text)).await.is_err() {
                return;
            }
        }
    }
}

async fn spawn_console(console: Console) -> (SocketAddr, Arc<Console>) {
    let console = Arc::new(console);
    let app = Router::new()
        .route("/ws/objectManager", get(ws_handler))
        .with_state(console.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, console)
}

#[derive(Default)]
struct Recorder {
    notices: Mutex<Vec<ErrorNotice>>,
}

impl ErrorSurface for Recorder {
    fn notify(&self, notice: ErrorNotice) {
        self.notices.lock().push(notice);
    }
}

impl SessionControl for Recorder {
    fn force_reload(&self) {}
}

fn spawn_client(addr: SocketAddr, recorder: Arc<Recorder>) -> ListingClient {
    let config = ClientConfig::new(Url::parse(&format!("http://{addr}")).unwrap())
        .with_session_token("jwt-value");
    let connector = Arc::new(WsConnector::from_config(&config));
    ListingClient::spawn(&config, connector, Collaborators::new(recorder.clone(), recorder))
        .unwrap()
}

fn names(state: &listing_client::ListingState) -> Vec<String> {
    state.records.iter().map(|e| e.name.clone()).collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn lists_folder_over_websocket() {
    let (addr, console) = spawn_console(
        Console::default().with_listing("photos", "", &["2024/", "cover.png"]),
    )
    .await;
    let client = spawn_client(addr, Arc::new(Recorder::default()));

    client.navigate("photos", "").unwrap();
    let state = client
        .state()
        .wait_for(WAIT, |s| s.phase == ListingPhase::Ready { request_id: 1 })
        .await
        .unwrap();
    assert_eq!(names(&state), ["2024/", "cover.png"]);
    assert_eq!(console.cookies.lock().first().map(String::as_str), Some("token=jwt-value"));

    client.teardown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn later_navigation_wins() {
    let (addr, _console) = spawn_console(
        Console::default()
            .with_listing("photos", "", &["2024/"])
            .with_listing("photos", "2024/", &["2024/cat.png", "2024/dog.png"]),
    )
    .await;
    let client = spawn_client(addr, Arc::new(Recorder::default()));

    client.navigate("photos", "").unwrap();
    client.navigate("photos", "2024/dog.png").unwrap();
    let state = client
        .state()
        .wait_for(WAIT, |s| s.current_path == "2024/" && s.phase.is_terminal())
        .await
        .unwrap();
    assert_eq!(names(&state), ["2024/cat.png", "2024/dog.png"]);

    client.teardown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn forbidden_folder_shows_allow_listed_objects() {
    let (addr, _console) = spawn_console(Console::default()).await;
    let recorder = Arc::new(Recorder::default());
    let client = spawn_client(addr, recorder.clone());

    client
        .set_allowed_resources(vec![PermissionResource::new(
            "arn:aws:s3:::locked/docs/readme.txt",
        )])
        .unwrap();
    client.navigate("locked", "docs/").unwrap();
    let state = client
        .state()
        .wait_for(WAIT, |s| s.phase.is_terminal())
        .await
        .unwrap();
    assert_eq!(names(&state), ["docs/readme.txt"]);
    assert!(recorder.notices.lock().is_empty());

    client.navigate("locked", "private/").unwrap();
    let state = client
        .state()
        .wait_for(WAIT, |s| s.current_path == "private/" && s.phase.is_terminal())
        .await
        .unwrap();
    assert!(state.records.is_empty());
    assert_eq!(recorder.notices.lock()[0].message, "Access Denied.");

    client.teardown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn teardown_cancels_current_request() {
    let (addr, console) =
        spawn_console(Console::default().with_listing("photos", "", &["a.png"])).await;
    let client = spawn_client(addr, Arc::new(Recorder::default()));

    client.navigate("photos", "").unwrap();
    client
        .state()
        .wait_for(WAIT, |s| s.phase.is_terminal())
        .await
        .unwrap();
    client.teardown().await;

    let cancelled = tokio::time::timeout(WAIT, async {
        loop {
            let seen = console
                .requests
                .lock()
                .iter()
                .any(|r| r.mode == ListMode::Cancel && r.request_id == 1);
            if seen {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(cancelled.is_ok());
}
