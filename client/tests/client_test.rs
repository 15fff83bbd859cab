//! End-to-end tests: real server on a random port, driven through `ChatClient`.

use axum::extract::ws::{CloseFrame, Message as WsMessage};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use wanderchat_client::{
    ChatClient, ConnectionStatus, OpenError, RealtimeClient, RealtimeConfig, SessionState,
};
use wanderchat_server::state::AppState;
use wanderchat_shared::models::is_temporary_id;
use wanderchat_shared::{resolve, ChatError, ConversationId, Role, ServerEvent, UserIdentity};

struct TestServer {
    base_url: String,
    addr: SocketAddr,
    state: AppState,
    task: JoinHandle<()>,
    _data_dir: tempfile::TempDir,
}

impl TestServer {
    fn client(&self, user: &UserIdentity) -> ChatClient {
        ChatClient::connect(&self.base_url, &token_for(user), user.clone())
    }

    /// Stop accepting and close the realtime sockets of `users` with 1012
    /// (service restart). Returns the freed address.
    async fn shut_down(self, users: &[&str]) -> SocketAddr {
        self.task.abort();
        let _ = self.task.await;
        for user_id in users {
            for handle in self.state.connections.connections_for(user_id) {
                handle.send(WsMessage::Close(Some(CloseFrame {
                    code: 1012,
                    reason: "restarting".into(),
                })));
            }
        }
        self.addr
    }
}

const TEST_SECRET: [u8; 32] = [7; 32];

fn token_for(user: &UserIdentity) -> String {
    wanderchat_server::auth::jwt::issue_access_token(&TEST_SECRET, user, 900)
        .expect("Failed to issue token")
}

async fn serve(listener: TcpListener) -> TestServer {
    let data_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let db = wanderchat_server::db::init_db(data_dir.path().to_str().unwrap())
        .expect("Failed to init DB");
    let state = AppState::new(
        db,
        TEST_SECRET.to_vec(),
        wanderchat_server::config::ChatConfig::default(),
    );
    let app = wanderchat_server::routes::build_router(state.clone());
    let addr = listener.local_addr().unwrap();

    let task = tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    TestServer {
        base_url: format!("http://{}", addr),
        addr,
        state,
        task,
        _data_dir: data_dir,
    }
}

/// TCP relay in front of a server whose links can all be cut at once.
struct Relay {
    base_url: String,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Relay {
    async fn start(upstream: SocketAddr) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let tasks: Arc<Mutex<Vec<JoinHandle<()>>>> = Arc::new(Mutex::new(Vec::new()));

        let links = tasks.clone();
        let accept = tokio::spawn(async move {
            while let Ok((mut inbound, _)) = listener.accept().await {
                let link = tokio::spawn(async move {
                    if let Ok(mut outbound) = TcpStream::connect(upstream).await {
                        let _ = tokio::io::copy_bidirectional(&mut inbound, &mut outbound).await;
                    }
                });
                links.lock().unwrap().push(link);
            }
        });
        tasks.lock().unwrap().push(accept);

        Self { base_url, tasks }
    }

    /// Drop every open link and stop accepting new ones.
    async fn cut(&self) {
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().unwrap().drain(..).collect();
        for task in tasks {
            task.abort();
            let _ = task.await;
        }
    }
}

async fn start_test_server() -> TestServer {
    serve(TcpListener::bind("127.0.0.1:0").await.unwrap()).await
}

fn user(id: &str, name: &str, role: Role) -> UserIdentity {
    UserIdentity {
        id: id.to_string(),
        name: name.to_string(),
        email: format!("{}@example.com", id),
        role,
        avatar_url: None,
    }
}

fn ana() -> UserIdentity {
    user("traveler-1", "Ana", Role::Traveler)
}

fn marta() -> UserIdentity {
    user("guide-1", "Marta", Role::Guide)
}

/// Poll `check` until it holds or five seconds pass.
async fn eventually<F: Fn() -> bool>(what: &str, check: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {}", what);
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Room joins are fire-and-forget; give them time to reach the server.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(200)).await;
}

async fn connected(client: &ChatClient) {
    assert!(
        client.wait_connected(Duration::from_secs(5)).await,
        "realtime channel for {} never connected",
        client.identity().id
    );
}

fn bodies(client: &ChatClient, conversation: &ConversationId) -> Vec<String> {
    client
        .messages(conversation)
        .into_iter()
        .map(|m| m.body)
        .collect()
}

#[tokio::test]
async fn test_hello_reaches_both_sides_exactly_once() {
    let server = start_test_server().await;
    let (a, b) = (server.client(&ana()), server.client(&marta()));
    connected(&a).await;
    connected(&b).await;

    let cid = a.open("guide-1").await.unwrap();
    assert_eq!(b.open("traveler-1").await.unwrap(), cid);
    settle().await;

    let sent = a.send(&cid, "Hello").await.unwrap();
    assert!(!is_temporary_id(&sent.id));

    eventually("Marta to see Hello", || bodies(&b, &cid) == vec!["Hello"]).await;
    settle().await;

    for client in [&a, &b] {
        let messages = client.messages(&cid);
        assert_eq!(messages.len(), 1, "{} has {:?}", client.identity().id, messages);
        assert_eq!(messages[0].id, sent.id);
        assert_eq!(messages[0].sender.name(), "Ana");
    }

    a.shutdown().await;
    b.shutdown().await;
}

#[tokio::test]
async fn test_send_failure_removes_entry_and_restores_body() {
    let server = start_test_server().await;
    let (a, b) = (server.client(&ana()), server.client(&marta()));
    connected(&a).await;
    connected(&b).await;
    let cid = a.open("guide-1").await.unwrap();
    b.open("traveler-1").await.unwrap();
    settle().await;

    let too_long = "x".repeat(4001);
    let failure = a.send(&cid, &too_long).await.unwrap_err();
    assert!(matches!(failure.error, ChatError::Validation(_)));
    assert_eq!(failure.body, too_long);

    assert!(a.messages(&cid).is_empty());
    assert!(matches!(a.take_error(&cid), Some(ChatError::Validation(_))));

    settle().await;
    assert!(b.messages(&cid).is_empty());
}

#[tokio::test]
async fn test_delete_propagates_to_viewers_and_to_reopened_surfaces() {
    let server = start_test_server().await;
    let (a, b) = (server.client(&ana()), server.client(&marta()));
    connected(&a).await;
    connected(&b).await;
    let cid = a.open("guide-1").await.unwrap();
    b.open("traveler-1").await.unwrap();
    settle().await;

    let first = a.send(&cid, "first").await.unwrap();
    let second = a.send(&cid, "second").await.unwrap();
    a.send(&cid, "third").await.unwrap();
    eventually("Marta to see three messages", || b.messages(&cid).len() == 3).await;

    // Live deletion while Marta is viewing
    a.delete(&cid, &first.id).await.unwrap();
    assert_eq!(bodies(&a, &cid), vec!["second", "third"]);
    eventually("Marta to drop 'first'", || bodies(&b, &cid) == vec!["second", "third"]).await;

    // Marta moves to another conversation, then Ana deletes again
    b.close(&cid);
    let other = b.open("traveler-2").await.unwrap();
    settle().await;
    a.delete(&cid, &second.id).await.unwrap();
    settle().await;
    assert!(b.messages(&other).is_empty());

    b.open("traveler-1").await.unwrap();
    assert_eq!(bodies(&b, &cid), vec!["third"]);
}

#[tokio::test]
async fn test_second_tab_gets_the_push_and_never_an_optimistic_entry() {
    let server = start_test_server().await;
    let tab_one = server.client(&ana());
    let tab_two = server.client(&ana());
    let b = server.client(&marta());
    for client in [&tab_one, &tab_two, &b] {
        connected(client).await;
    }

    let cid = tab_one.open("guide-1").await.unwrap();
    tab_two.open("guide-1").await.unwrap();
    b.open("traveler-1").await.unwrap();
    settle().await;

    let sent = tab_one.send(&cid, "Booked the kayak tour").await.unwrap();

    eventually("tab two to see the message", || tab_two.messages(&cid).len() == 1).await;
    assert_eq!(tab_two.messages(&cid)[0].id, sent.id);
    eventually("Marta to see the message", || b.messages(&cid).len() == 1).await;
    settle().await;

    assert_eq!(tab_one.messages(&cid).len(), 1);
    for client in [&tab_one, &tab_two, &b] {
        assert!(client.messages(&cid).iter().all(|m| !is_temporary_id(&m.id)));
    }
}

#[tokio::test]
async fn test_deleting_someone_elses_message_is_refused_locally() {
    let server = start_test_server().await;
    let (a, b) = (server.client(&ana()), server.client(&marta()));
    connected(&a).await;
    connected(&b).await;
    let cid = a.open("guide-1").await.unwrap();
    b.open("traveler-1").await.unwrap();
    settle().await;

    let sent = a.send(&cid, "mine").await.unwrap();
    eventually("Marta to see the message", || b.messages(&cid).len() == 1).await;

    assert!(matches!(
        b.delete(&cid, &sent.id).await,
        Err(ChatError::NotAuthorized(_))
    ));
    assert_eq!(b.messages(&cid).len(), 1);
    assert_eq!(a.messages(&cid).len(), 1);
}

#[tokio::test]
async fn test_closed_surface_receives_notifications() {
    let server = start_test_server().await;
    let (a, b) = (server.client(&ana()), server.client(&marta()));
    connected(&a).await;
    connected(&b).await;

    let cid = a.open("guide-1").await.unwrap();
    a.send(&cid, "Is the 9am pickup still on?").await.unwrap();

    eventually("Marta to be notified", || {
        // Each poll drains; check the first non-empty batch
        let notes = b.take_notifications();
        if notes.is_empty() {
            return false;
        }
        assert_eq!(notes[0].sender_name, "Ana");
        assert_eq!(notes[0].conversation_id, cid);
        true
    })
    .await;
    assert_eq!(b.session_state(&cid), SessionState::Closed);
    assert!(b.messages(&cid).is_empty());
}

#[tokio::test]
async fn test_failed_open_leaves_surface_closed_and_empty() {
    let server = start_test_server().await;
    let stranger = ChatClient::connect(&server.base_url, "not-a-token", ana());

    let err = stranger.open("guide-1").await.unwrap_err();
    assert!(matches!(err, OpenError::Failed(ChatError::Auth(_))));

    let cid = resolve("traveler-1", "guide-1").unwrap();
    assert_eq!(stranger.session_state(&cid), SessionState::Closed);
    assert!(stranger.messages(&cid).is_empty());
}

#[tokio::test]
async fn test_bad_token_is_rejected_without_retry() {
    let server = start_test_server().await;
    let (client, _events) =
        RealtimeClient::connect(RealtimeConfig::new(&server.base_url, "garbage", "traveler-1"));

    assert!(client.wait_for(ConnectionStatus::Rejected, Duration::from_secs(5)).await);
}

#[tokio::test]
async fn test_rooms_joined_while_degraded_are_joined_on_connect() {
    // Reserve a port and free it, so the client starts with nothing listening
    let addr = TcpListener::bind("127.0.0.1:0").await.unwrap().local_addr().unwrap();
    let base_url = format!("http://{}", addr);

    let mut config = RealtimeConfig::new(&base_url, &token_for(&marta()), "guide-1");
    config.reconnect_delay = Duration::from_millis(100);
    let (marta_rt, mut events) = RealtimeClient::connect(config);
    assert!(marta_rt.wait_for(ConnectionStatus::Degraded, Duration::from_secs(5)).await);

    let cid = resolve("guide-1", "traveler-1").unwrap();
    marta_rt.join_room(&cid);

    let server = serve(TcpListener::bind(addr).await.unwrap()).await;
    assert!(marta_rt.wait_for(ConnectionStatus::Connected, Duration::from_secs(5)).await);

    let a = server.client(&ana());
    connected(&a).await;
    let a_cid = a.open("guide-1").await.unwrap();
    settle().await;
    a.send(&a_cid, "Are you there?").await.unwrap();

    // The room was re-joined on connect, so a room push arrives (not a notification)
    expect_room_push(&mut events, "Are you there?").await;

    marta_rt.shutdown().await;
}

/// Wait for a `newMessage` with `body`, failing on a notification for it.
async fn expect_room_push(events: &mut mpsc::UnboundedReceiver<ServerEvent>, body: &str) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let event = tokio::time::timeout_at(deadline, events.recv())
            .await
            .expect("timed out waiting for the push")
            .expect("event stream closed");
        match event {
            ServerEvent::NewMessage(message) => {
                assert_eq!(message.body, body);
                return;
            }
            ServerEvent::MessageNotification(_) => panic!("room was not re-joined"),
            _ => continue,
        }
    }
}

#[tokio::test]
async fn test_rooms_are_rejoined_after_server_restart() {
    let server = start_test_server().await;
    let mut config = RealtimeConfig::new(&server.base_url, &token_for(&marta()), "guide-1");
    config.reconnect_delay = Duration::from_millis(100);
    let (marta_rt, mut events) = RealtimeClient::connect(config);
    assert!(marta_rt.wait_for(ConnectionStatus::Connected, Duration::from_secs(5)).await);

    let cid = resolve("guide-1", "traveler-1").unwrap();
    marta_rt.join_room(&cid);
    settle().await;
    assert_eq!(server.state.rooms.members_of(&cid).len(), 1);

    let addr = server.shut_down(&["guide-1"]).await;
    assert!(marta_rt.wait_for(ConnectionStatus::Degraded, Duration::from_secs(5)).await);

    let server = serve(TcpListener::bind(addr).await.unwrap()).await;
    assert!(marta_rt.wait_for(ConnectionStatus::Connected, Duration::from_secs(5)).await);
    settle().await;
    assert_eq!(server.state.connections.connections_for("guide-1").len(), 1);
    assert_eq!(server.state.rooms.members_of(&cid).len(), 1);

    let a = server.client(&ana());
    connected(&a).await;
    let a_cid = a.open("guide-1").await.unwrap();
    settle().await;
    a.send(&a_cid, "Back online?").await.unwrap();
    expect_room_push(&mut events, "Back online?").await;

    marta_rt.shutdown().await;
}

#[tokio::test]
async fn test_reopen_while_opening_keeps_the_room() {
    let server = start_test_server().await;
    let (a, b) = (server.client(&ana()), server.client(&marta()));
    connected(&a).await;
    connected(&b).await;
    let cid = resolve("traveler-1", "guide-1").unwrap();

    let (first, second) = tokio::join!(a.open("guide-1"), async {
        a.close(&cid);
        a.open("guide-1").await
    });
    assert_eq!(first, Err(OpenError::Superseded(cid.clone())));
    assert_eq!(second, Ok(cid.clone()));
    assert_eq!(a.session_state(&cid), SessionState::Active);

    b.open("traveler-1").await.unwrap();
    settle().await;
    assert_eq!(server.state.rooms.members_of(&cid).len(), 2);

    b.send(&cid, "ping from marta").await.unwrap();
    eventually("Ana to see the ping", || bodies(&a, &cid) == vec!["ping from marta"]).await;
}

#[tokio::test]
async fn test_deleting_a_send_in_flight_removes_it_everywhere() {
    let server = start_test_server().await;
    let (a, b) = (server.client(&ana()), server.client(&marta()));
    connected(&a).await;
    connected(&b).await;
    let cid = a.open("guide-1").await.unwrap();
    b.open("traveler-1").await.unwrap();
    settle().await;

    let (sent, deleted) = tokio::join!(a.send(&cid, "typo"), async {
        let temp_id = a
            .messages(&cid)
            .into_iter()
            .find(|m| is_temporary_id(&m.id))
            .map(|m| m.id)
            .expect("optimistic entry to be listed");
        a.delete(&cid, &temp_id).await
    });
    deleted.unwrap();
    sent.unwrap();
    assert!(a.messages(&cid).is_empty());

    settle().await;
    assert!(a.messages(&cid).is_empty());
    assert!(b.messages(&cid).is_empty());

    a.close(&cid);
    a.open("guide-1").await.unwrap();
    assert!(a.messages(&cid).is_empty());
}

#[tokio::test]
async fn test_send_over_a_dead_network_reverts_and_restores_body() {
    let server = start_test_server().await;
    let relay = Relay::start(server.addr).await;
    let b = server.client(&marta());
    let a = ChatClient::with_realtime(
        &relay.base_url,
        &token_for(&ana()),
        ana(),
        RealtimeConfig::new(&server.base_url, &token_for(&ana()), ""),
    );
    connected(&a).await;
    connected(&b).await;
    let cid = a.open("guide-1").await.unwrap();
    b.open("traveler-1").await.unwrap();
    a.send(&cid, "before the outage").await.unwrap();
    eventually("Marta to see the first message", || b.messages(&cid).len() == 1).await;

    relay.cut().await;
    let failure = a.send(&cid, " are we still on? ").await.unwrap_err();
    assert!(matches!(failure.error, ChatError::Network(_)), "{:?}", failure.error);
    assert_eq!(failure.body, " are we still on? ");

    assert_eq!(bodies(&a, &cid), vec!["before the outage"]);
    assert!(a.messages(&cid).iter().all(|m| !is_temporary_id(&m.id)));
    assert!(matches!(a.take_error(&cid), Some(ChatError::Network(_))));

    settle().await;
    assert_eq!(bodies(&b, &cid), vec!["before the outage"]);
}
