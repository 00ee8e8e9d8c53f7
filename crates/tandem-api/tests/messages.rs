mod common;

use axum::http::{Method, StatusCode};
use serde_json::{Value, json};

use common::{app, request, signup};

#[tokio::test]
async fn replayed_message_is_stored_once() {
    let app = app();
    let (a, a_cookie) = signup(&app, "a@x.com").await;
    let (b, b_cookie) = signup(&app, "b@x.com").await;

    let first = request(Method::POST, "/api/messages")
        .cookie(&a_cookie)
        .json(json!({ "receiverId": b, "content": "ola", "streamMsgId": "stream-1" }))
        .send(&app)
        .await;
    assert_eq!(first.status, StatusCode::CREATED);
    let conversation_id = first.json()["conversationId"].as_str().unwrap().to_string();

    let second = request(Method::POST, "/api/messages")
        .cookie(&a_cookie)
        .json(json!({ "receiverId": b, "content": "ola!", "streamMsgId": "stream-1", "messageType": "voice" }))
        .send(&app)
        .await;
    assert_eq!(second.status, StatusCode::CREATED);
    assert_eq!(second.json()["message"]["id"], first.json()["message"]["id"]);

    assert_eq!(app.db.count_messages(&conversation_id).unwrap(), 1);

    let history = request(Method::GET, &format!("/api/messages/{}", a))
        .cookie(&b_cookie)
        .send(&app)
        .await;
    assert_eq!(history.status, StatusCode::OK);
    let history = history.json();
    assert_eq!(history["conversationId"], conversation_id.as_str());
    assert_eq!(history["messages"].as_array().unwrap().len(), 1);
    assert_eq!(history["messages"][0]["content"], "ola!");
    assert_eq!(history["messages"][0]["messageType"], "voice");
    assert_eq!(history["messages"][0]["sender"]["id"], a.as_str());
}

#[tokio::test]
async fn history_without_conversation_is_empty() {
    let app = app();
    let (_, a_cookie) = signup(&app, "a@x.com").await;
    let (b, _) = signup(&app, "b@x.com").await;

    let resp = request(Method::GET, &format!("/api/messages/{}", b))
        .cookie(&a_cookie)
        .send(&app)
        .await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.json(), json!({ "messages": [], "conversationId": null }));
}

#[tokio::test]
async fn history_pages_oldest_first_with_a_cursor() {
    let app = app();
    let (_, a_cookie) = signup(&app, "a@x.com").await;
    let (b, _) = signup(&app, "b@x.com").await;

    for i in 0..5 {
        request(Method::POST, "/api/messages")
            .cookie(&a_cookie)
            .json(json!({ "receiverId": b, "content": format!("m{}", i) }))
            .send(&app)
            .await;
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    }

    let all = request(Method::GET, &format!("/api/messages/{}", b))
        .cookie(&a_cookie)
        .send(&app)
        .await
        .json();
    assert_eq!(contents(&all), vec!["m0", "m1", "m2", "m3", "m4"]);

    let first_two = request(Method::GET, &format!("/api/messages/{}?limit=2", b))
        .cookie(&a_cookie)
        .send(&app)
        .await
        .json();
    assert_eq!(contents(&first_two), vec!["m0", "m1"]);

    let cursor = all["messages"][3]["createdAt"].as_str().unwrap();
    let older = request(Method::GET, &format!("/api/messages/{}?before={}", b, urlencode(cursor)))
        .cookie(&a_cookie)
        .send(&app)
        .await
        .json();
    assert_eq!(contents(&older), vec!["m0", "m1", "m2"]);

    let conversations = request(Method::GET, "/api/messages/conversations")
        .cookie(&a_cookie)
        .send(&app)
        .await
        .json();
    assert_eq!(conversations[0]["lastMessage"], "m4");
}

#[tokio::test]
async fn stream_id_of_another_user_is_not_overwritten() {
    let app = app();
    let (a, a_cookie) = signup(&app, "a@x.com").await;
    let (b, b_cookie) = signup(&app, "b@x.com").await;
    let (c, _) = signup(&app, "c@x.com").await;

    let owned = request(Method::POST, "/api/messages")
        .cookie(&a_cookie)
        .json(json!({ "receiverId": b, "content": "for b only", "streamMsgId": "s-1" }))
        .send(&app)
        .await;
    assert_eq!(owned.status, StatusCode::CREATED);

    let takeover = request(Method::POST, "/api/messages")
        .cookie(&b_cookie)
        .json(json!({ "receiverId": c, "content": "rewritten", "streamMsgId": "s-1" }))
        .send(&app)
        .await;
    assert_eq!(takeover.status, StatusCode::BAD_REQUEST);

    let history = request(Method::GET, &format!("/api/messages/{}", a))
        .cookie(&b_cookie)
        .send(&app)
        .await
        .json();
    assert_eq!(contents(&history), vec!["for b only"]);
    assert_eq!(history["messages"][0]["id"], owned.json()["message"]["id"]);
    assert_eq!(history["messages"][0]["receiver"]["id"], b.as_str());

    let conversations = request(Method::GET, "/api/messages/conversations")
        .cookie(&b_cookie)
        .send(&app)
        .await
        .json();
    assert_eq!(conversations.as_array().unwrap().len(), 1);
}

fn contents(page: &Value) -> Vec<&str> {
    page["messages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["content"].as_str().unwrap())
        .collect()
}

/// Offsets in RFC 3339 timestamps may carry a `+`, which a query string reads as a space.
fn urlencode(raw: &str) -> String {
    raw.replace('+', "%2B")
}

#[tokio::test]
async fn invalid_messages_are_rejected() {
    let app = app();
    let (a, a_cookie) = signup(&app, "a@x.com").await;

    let to_self = request(Method::POST, "/api/messages")
        .cookie(&a_cookie)
        .json(json!({ "receiverId": a, "content": "hi" }))
        .send(&app)
        .await;
    assert_eq!(to_self.status, StatusCode::BAD_REQUEST);

    let bad_id = request(Method::POST, "/api/messages")
        .cookie(&a_cookie)
        .json(json!({ "receiverId": "../../etc", "content": "hi" }))
        .send(&app)
        .await;
    assert_eq!(bad_id.status, StatusCode::BAD_REQUEST);

    let unauthenticated = request(Method::POST, "/api/messages")
        .json(json!({ "receiverId": a, "content": "hi" }))
        .send(&app)
        .await;
    assert_eq!(unauthenticated.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn chat_token_for_current_user() {
    let app = app();
    let (a, cookie) = signup(&app, "a@x.com").await;

    let resp = request(Method::GET, "/api/chat/token").cookie(&cookie).send(&app).await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.json()["token"], format!("chat-token-{}", a));
}
