//! Integration tests for the history, online-users and chat-list endpoints.

use serde_json::Value;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;

use agora_server::auth::session::create_session;
use agora_server::chat::messages::save_message;
use agora_server::chat::presence::set_user_status;
use agora_server::config::ChatSettings;
use agora_server::db::{users::create_user, DbPool, UserId};
use agora_server::state::AppState;

/// Helper: start the server on a random port and return (base_url, db).
async fn start_test_server() -> (String, DbPool, tempfile::TempDir) {
    let tmp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let data_dir = tmp_dir.path().to_str().unwrap().to_string();

    let db = agora_server::db::init_db(&data_dir).expect("Failed to init DB");
    let state = AppState::new(db.clone(), ChatSettings::default());

    let app = agora_server::routes::build_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}", addr), db, tmp_dir)
}

fn create_user_with_session(db: &DbPool, username: &str) -> (UserId, String) {
    let conn = db.lock().unwrap();
    let user_id = create_user(&conn, username, &format!("{}@example.com", username)).unwrap();
    let token = create_session(&conn, user_id, chrono::Duration::hours(1)).unwrap();
    (user_id, token)
}

fn send(db: &DbPool, from: UserId, to: UserId, content: &str) {
    let conn = db.lock().unwrap();
    save_message(&conn, from, to, content).unwrap();
}

async fn get_json(url: &str, token: &str) -> Value {
    let resp = reqwest::Client::new()
        .get(url)
        .header("Cookie", format!("session_id={}", token))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200, "GET {} failed", url);
    resp.json().await.unwrap()
}

#[tokio::test]
async fn test_health_check() {
    let (base_url, _db, _tmp) = start_test_server().await;

    let resp = reqwest::get(format!("{}/health", base_url)).await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "ok");
}

#[tokio::test]
async fn test_history_requires_session() {
    let (base_url, db, _tmp) = start_test_server().await;
    let (bob, _) = create_user_with_session(&db, "bob");

    let client = reqwest::Client::new();
    let resp = client
        .get(format!("{}/api/messages?with={}", base_url, bob))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    let resp = client
        .get(format!("{}/api/messages?with={}", base_url, bob))
        .header("Cookie", "session_id=forged")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn test_history_rejects_bad_counterpart() {
    let (base_url, db, _tmp) = start_test_server().await;
    let (_, token) = create_user_with_session(&db, "alice");

    let client = reqwest::Client::new();
    for query in ["", "?with=", "?with=abc"] {
        let resp = client
            .get(format!("{}/api/messages{}", base_url, query))
            .header("Cookie", format!("session_id={}", token))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400, "query {:?}", query);
    }
}

#[tokio::test]
async fn test_history_pages_oldest_first() {
    let (base_url, db, _tmp) = start_test_server().await;
    let (alice, alice_token) = create_user_with_session(&db, "alice");
    let (bob, _) = create_user_with_session(&db, "bob");

    for i in 0..12 {
        if i % 2 == 0 {
            send(&db, alice, bob, &format!("m{}", i));
        } else {
            send(&db, bob, alice, &format!("m{}", i));
        }
    }

    let page = get_json(
        &format!("{}/api/messages?with={}&offset=0", base_url, bob),
        &alice_token,
    )
    .await;
    let contents: Vec<&str> = page
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["content"].as_str().unwrap())
        .collect();
    assert_eq!(contents.len(), 10);
    assert_eq!(contents.first(), Some(&"m2"));
    assert_eq!(contents.last(), Some(&"m11"));

    let older = get_json(
        &format!("{}/api/messages?with={}&offset=10", base_url, bob),
        &alice_token,
    )
    .await;
    let contents: Vec<&str> = older
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["content"].as_str().unwrap())
        .collect();
    assert_eq!(contents, vec!["m0", "m1"]);

    let first = &older[0];
    assert_eq!(first["senderId"], alice);
    assert_eq!(first["receiverId"], bob);
    assert_eq!(first["senderUsername"], "alice");
    assert!(first["createdAt"].is_string());
}

#[tokio::test]
async fn test_fetching_history_marks_incoming_read() {
    let (base_url, db, _tmp) = start_test_server().await;
    let (alice, alice_token) = create_user_with_session(&db, "alice");
    let (bob, bob_token) = create_user_with_session(&db, "bob");

    send(&db, bob, alice, "one");
    send(&db, bob, alice, "two");
    send(&db, alice, bob, "reply");

    let chats = get_json(&format!("{}/api/users", base_url), &alice_token).await;
    let with_bob = &chats.as_array().unwrap()[0];
    assert_eq!(with_bob["userId"], bob);
    assert_eq!(with_bob["unreadCount"], 2);
    assert_eq!(with_bob["lastMessage"], "reply");

    get_json(
        &format!("{}/api/messages?with={}", base_url, bob),
        &alice_token,
    )
    .await;

    // The read marker is applied in the background.
    let cleared = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let chats = get_json(&format!("{}/api/users", base_url), &alice_token).await;
            if chats[0]["unreadCount"] == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(cleared.is_ok(), "unread count never cleared");

    // Only bob's messages to alice were marked; alice's reply is still unread for bob.
    let bob_chats = get_json(&format!("{}/api/users", base_url), &bob_token).await;
    assert_eq!(bob_chats[0]["userId"], alice);
    assert_eq!(bob_chats[0]["unreadCount"], 1);
}

#[tokio::test]
async fn test_chat_list_orders_by_recent_activity() {
    let (base_url, db, _tmp) = start_test_server().await;
    let (alice, alice_token) = create_user_with_session(&db, "alice");
    let (bob, _) = create_user_with_session(&db, "bob");
    let (carol, _) = create_user_with_session(&db, "carol");
    let (dave, _) = create_user_with_session(&db, "dave");

    send(&db, alice, carol, "earlier");
    tokio::time::sleep(Duration::from_millis(5)).await;
    send(&db, bob, alice, "latest");

    let chats = get_json(&format!("{}/api/users", base_url), &alice_token).await;
    let ids: Vec<i64> = chats
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["userId"].as_i64().unwrap())
        .collect();
    assert_eq!(ids, vec![bob, carol, dave]);

    let quiet = &chats[2];
    assert_eq!(quiet["lastMessage"], "No messages yet");
    assert!(quiet["lastMessageTime"].is_null());
    assert_eq!(quiet["unreadCount"], 0);
}

#[tokio::test]
async fn test_online_users_excludes_caller() {
    let (base_url, db, _tmp) = start_test_server().await;
    let (alice, alice_token) = create_user_with_session(&db, "alice");
    let (bob, _) = create_user_with_session(&db, "bob");
    let (carol, _) = create_user_with_session(&db, "carol");

    {
        let conn = db.lock().unwrap();
        set_user_status(&conn, alice, true).unwrap();
        set_user_status(&conn, bob, true).unwrap();
        set_user_status(&conn, carol, false).unwrap();
    }

    let online = get_json(&format!("{}/api/users/online", base_url), &alice_token).await;
    let online = online.as_array().unwrap();
    assert_eq!(online.len(), 1);
    assert_eq!(online[0]["userId"], bob);
    assert_eq!(online[0]["username"], "bob");
    assert!(online[0]["lastSeen"].is_string());
}
