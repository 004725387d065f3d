mod common;

use axum::http::StatusCode;
use bonlivre::types::{Chat, MessageRole, UpdateProfileRequest};
use common::mocks::{MockLLMClient, SentMail};
use common::{TestApp, TestAppBuilder, PASSWORD};
use serde_json::{json, Value};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ============= Health Check Tests =============

#[tokio::test]
async fn test_health_check() {
    let app = TestApp::new().await;

    let response = app.server.get("/health").await;
    response.assert_status_ok();
    response.assert_text("OK");
}

#[tokio::test]
async fn test_openapi_document_lists_routes() {
    let app = TestApp::new().await;

    let doc: Value = app.server.get("/api-docs/openapi.json").await.json();
    assert!(doc["paths"]["/api/chats/{id}"].is_object());
    assert!(doc["paths"]["/api/wordpress/order"].is_object());
}

// ============= Authentication Tests =============

#[tokio::test]
async fn test_register_and_login() {
    let app = TestApp::new().await;
    app.register("leserin@bonlivre.ch").await;

    let response = app
        .server
        .post("/api/login")
        .json(&json!({ "email": "Leserin@Bonlivre.ch", "password": PASSWORD }))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert!(body["token"].is_string());
    assert_eq!(body["expires_in"], 3600);
}

#[tokio::test]
async fn test_register_rejects_duplicates_and_short_passwords() {
    let app = TestApp::new().await;
    app.register("doppelt@bonlivre.ch").await;

    app.server
        .post("/api/register")
        .json(&json!({ "email": "doppelt@bonlivre.ch", "password": PASSWORD }))
        .await
        .assert_status_bad_request();

    app.server
        .post("/api/register")
        .json(&json!({ "email": "kurz@bonlivre.ch", "password": "1234" }))
        .await
        .assert_status_bad_request();
}

#[tokio::test]
async fn test_login_distinguishes_unknown_user_and_wrong_password() {
    let app = TestApp::new().await;
    app.register("leser@bonlivre.ch").await;

    app.server
        .post("/api/login")
        .json(&json!({ "email": "niemand@bonlivre.ch", "password": PASSWORD }))
        .await
        .assert_status_not_found();

    app.server
        .post("/api/login")
        .json(&json!({ "email": "leser@bonlivre.ch", "password": "falsch-falsch" }))
        .await
        .assert_status_unauthorized();
}

#[tokio::test]
async fn test_protected_routes_require_token() {
    let app = TestApp::new().await;

    app.server.get("/api/chats").await.assert_status_unauthorized();
    app.server
        .get("/api/chats")
        .authorization_bearer("not-a-jwt")
        .await
        .assert_status_unauthorized();
}

#[tokio::test]
async fn test_logout_revokes_token() {
    let app = TestApp::new().await;
    let token = app.register("weg@bonlivre.ch").await;

    app.server
        .get("/api/verify-token")
        .authorization_bearer(&token)
        .await
        .assert_status_ok();

    app.server
        .post("/api/logout")
        .authorization_bearer(&token)
        .await
        .assert_status_ok();

    app.server
        .get("/api/verify-token")
        .authorization_bearer(&token)
        .await
        .assert_status_unauthorized();
}

#[tokio::test]
async fn test_refresh_token_issues_working_token() {
    let app = TestApp::new().await;
    let token = app.register("frisch@bonlivre.ch").await;

    let response = app
        .server
        .get("/api/refresh-token")
        .authorization_bearer(&token)
        .await;
    response.assert_status_ok();
    let renewed = response.json::<Value>()["token"].as_str().unwrap().to_string();
    assert_ne!(renewed, token);

    let status: Value = app
        .server
        .get("/api/user-status")
        .authorization_bearer(&renewed)
        .await
        .json();
    assert_eq!(status["user"]["email"], "frisch@bonlivre.ch");
    assert_eq!(status["user"]["name"], "Leserin");
    assert_eq!(status["user"]["is_verified"], false);
}

#[tokio::test]
async fn test_verify_token_omits_name() {
    let app = TestApp::new().await;
    let token = app.register("name@bonlivre.ch").await;

    let body: Value = app
        .server
        .get("/api/verify-token")
        .authorization_bearer(&token)
        .await
        .json();
    assert_eq!(body["user"]["email"], "name@bonlivre.ch");
    assert!(body["user"].get("name").is_none());
}

// ============= E-mail Verification Tests =============

#[tokio::test]
async fn test_verify_email_is_idempotent() {
    let app = TestApp::new().await;
    let token = app.register("verify@bonlivre.ch").await;

    let mail = app.mailer.last().expect("verification mail");
    assert!(matches!(&mail, SentMail::Verification { email, .. } if email == "verify@bonlivre.ch"));

    let first: Value = app
        .server
        .get("/api/verify-email")
        .add_query_param("token", mail.token())
        .await
        .json();
    assert_eq!(first["already_verified"], false);

    let second: Value = app
        .server
        .get("/api/verify-email")
        .add_query_param("token", mail.token())
        .await
        .json();
    assert_eq!(second["already_verified"], true);

    let status: Value = app
        .server
        .get("/api/user-status")
        .authorization_bearer(&token)
        .await
        .json();
    assert_eq!(status["user"]["is_verified"], true);
}

#[tokio::test]
async fn test_verify_email_rejects_bad_tokens() {
    let app = TestApp::new().await;

    app.server.get("/api/verify-email").await.assert_status_bad_request();
    app.server
        .get("/api/verify-email")
        .add_query_param("token", "unbekannt")
        .await
        .assert_status_bad_request();
}

#[tokio::test]
async fn test_resend_verification() {
    let app = TestApp::new().await;
    app.register("nochmal@bonlivre.ch").await;
    let first = app.mailer.last().unwrap().token();

    app.server
        .post("/api/resend-verification")
        .json(&json!({ "email": "nochmal@bonlivre.ch" }))
        .await
        .assert_status_ok();

    let second = app.mailer.last().unwrap().token();
    assert_ne!(first, second);

    app.server
        .post("/api/resend-verification")
        .json(&json!({ "email": "unbekannt@bonlivre.ch" }))
        .await
        .assert_status_not_found();

    app.server
        .get("/api/verify-email")
        .add_query_param("token", second)
        .await
        .assert_status_ok();
    app.server
        .post("/api/resend-verification")
        .json(&json!({ "email": "nochmal@bonlivre.ch" }))
        .await
        .assert_status_bad_request();
}

// ============= Password Reset Tests =============

#[tokio::test]
async fn test_password_reset_flow() {
    let app = TestApp::new().await;
    app.register("vergesslich@bonlivre.ch").await;

    app.server
        .post("/api/reset-password/request")
        .json(&json!({ "email": "vergesslich@bonlivre.ch" }))
        .await
        .assert_status_ok();

    let mail = app.mailer.last().unwrap();
    assert!(matches!(mail, SentMail::PasswordReset { .. }));
    let reset_token = mail.token();

    app.server
        .post("/api/reset-password")
        .json(&json!({ "token": reset_token, "new_password": "neues-passwort" }))
        .await
        .assert_status_ok();

    app.server
        .post("/api/login")
        .json(&json!({ "email": "vergesslich@bonlivre.ch", "password": PASSWORD }))
        .await
        .assert_status_unauthorized();
    app.server
        .post("/api/login")
        .json(&json!({ "email": "vergesslich@bonlivre.ch", "password": "neues-passwort" }))
        .await
        .assert_status_ok();

    // Reset tokens are single use
    app.server
        .post("/api/reset-password")
        .json(&json!({ "token": reset_token, "new_password": "noch-ein-passwort" }))
        .await
        .assert_status_bad_request();
}

#[tokio::test]
async fn test_password_reset_request_does_not_reveal_accounts() {
    let app = TestApp::new().await;

    app.server
        .post("/api/reset-password/request")
        .json(&json!({ "email": "gibtsnicht@bonlivre.ch" }))
        .await
        .assert_status_ok();

    assert!(app.mailer.sent().is_empty());
}

// ============= Profile Tests =============

#[tokio::test]
async fn test_profile_of_verified_user_is_cached() {
    let app = TestApp::new().await;
    let token = app.register_verified("cache@bonlivre.ch").await;
    let user_id = app
        .state
        .auth
        .verify_token(&token)
        .unwrap()
        .sub;

    let profile: Value = app.server.get("/api/profile").authorization_bearer(&token).await.json();
    assert_eq!(profile["name"], "Leserin");
    assert_eq!(profile["is_verified"], true);

    // Changed behind the handler's back: the cached copy is still served
    app.state
        .db
        .update_profile(
            &user_id,
            &UpdateProfileRequest {
                name: Some("Direkt".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let profile: Value = app.server.get("/api/profile").authorization_bearer(&token).await.json();
    assert_eq!(profile["name"], "Leserin");

    // Updates through the API invalidate the entry
    let updated: Value = app
        .server
        .put("/api/profile")
        .authorization_bearer(&token)
        .json(&json!({ "name": "Neu", "bio": "Liest gern Krimis" }))
        .await
        .json();
    assert_eq!(updated["name"], "Neu");

    let profile: Value = app.server.get("/api/profile").authorization_bearer(&token).await.json();
    assert_eq!(profile["name"], "Neu");
    assert_eq!(profile["bio"], "Liest gern Krimis");
}

#[tokio::test]
async fn test_profile_of_unverified_user_is_not_cached() {
    let app = TestApp::new().await;
    let token = app.register("offen@bonlivre.ch").await;
    let user_id = app.state.auth.verify_token(&token).unwrap().sub;

    app.server.get("/api/profile").authorization_bearer(&token).await.assert_status_ok();
    assert!(app.state.profile_cache.is_empty());

    app.state
        .db
        .update_profile(
            &user_id,
            &UpdateProfileRequest {
                name: Some("Direkt".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let profile: Value = app.server.get("/api/profile").authorization_bearer(&token).await.json();
    assert_eq!(profile["name"], "Direkt");
}

#[tokio::test]
async fn test_profile_email_must_be_unique() {
    let app = TestApp::new().await;
    app.register("belegt@bonlivre.ch").await;
    let token = app.register("andere@bonlivre.ch").await;

    app.server
        .put("/api/profile")
        .authorization_bearer(&token)
        .json(&json!({ "email": "belegt@bonlivre.ch" }))
        .await
        .assert_status_bad_request();
}

// ============= Chat CRUD Tests =============

#[tokio::test]
async fn test_chat_lifecycle() {
    let app = TestApp::new().await;
    let token = app.register("chat@bonlivre.ch").await;

    let untitled: Chat = app
        .server
        .post("/api/chats")
        .authorization_bearer(&token)
        .await
        .json();
    assert_eq!(untitled.title, "Neuer Chat");
    assert!(untitled.messages.is_empty());

    let titled: Chat = app
        .server
        .post("/api/chats")
        .authorization_bearer(&token)
        .json(&json!({ "title": "Krimis" }))
        .await
        .json();
    assert_eq!(titled.title, "Krimis");

    let updated: Chat = app
        .server
        .post(&format!("/api/chats/{}", titled.id))
        .authorization_bearer(&token)
        .json(&json!({ "message": "Was empfiehlst du?" }))
        .await
        .json();
    assert_eq!(updated.messages.len(), 2);
    assert_eq!(updated.messages[0].role, MessageRole::User);
    assert_eq!(updated.messages[1].role, MessageRole::Assistant);
    assert_eq!(updated.messages[1].content, "Gerne helfe ich Ihnen weiter.");

    let chats: Vec<Chat> = app.server.get("/api/chats").authorization_bearer(&token).await.json();
    assert_eq!(chats.len(), 2);
    assert_eq!(chats[0].id, titled.id);

    app.server
        .delete(&format!("/api/chats/{}", titled.id))
        .authorization_bearer(&token)
        .await
        .assert_status_ok();
    app.server
        .get(&format!("/api/chats/{}", titled.id))
        .authorization_bearer(&token)
        .await
        .assert_status_not_found();
}

#[tokio::test]
async fn test_chats_are_private() {
    let app = TestApp::new().await;
    let owner = app.register("owner@bonlivre.ch").await;
    let intruder = app.register("intruder@bonlivre.ch").await;

    let chat: Chat = app
        .server
        .post("/api/chats")
        .authorization_bearer(&owner)
        .await
        .json();
    let url = format!("/api/chats/{}", chat.id);

    app.server.get(&url).authorization_bearer(&intruder).await.assert_status_not_found();
    app.server
        .post(&url)
        .authorization_bearer(&intruder)
        .json(&json!({ "message": "Hallo" }))
        .await
        .assert_status_not_found();
    app.server.delete(&url).authorization_bearer(&intruder).await.assert_status_not_found();
    app.server
        .get(&format!("{}/products", url))
        .authorization_bearer(&intruder)
        .await
        .assert_status_not_found();

    let chats: Vec<Chat> = app.server.get("/api/chats").authorization_bearer(&intruder).await.json();
    assert!(chats.is_empty());
    app.server.get(&url).authorization_bearer(&owner).await.assert_status_ok();
}

#[tokio::test]
async fn test_send_empty_message_is_rejected() {
    let app = TestApp::new().await;
    let token = app.register("leer@bonlivre.ch").await;
    let chat: Chat = app.server.post("/api/chats").authorization_bearer(&token).await.json();

    app.server
        .post(&format!("/api/chats/{}", chat.id))
        .authorization_bearer(&token)
        .json(&json!({ "message": "   " }))
        .await
        .assert_status_bad_request();
    assert!(app.llm.calls().is_empty());
}

#[tokio::test]
async fn test_llm_failure_stores_nothing() {
    let app = TestAppBuilder::new().llm(MockLLMClient::failing()).build().await;
    let token = app.register("fehler@bonlivre.ch").await;
    let chat: Chat = app.server.post("/api/chats").authorization_bearer(&token).await.json();

    app.server
        .post(&format!("/api/chats/{}", chat.id))
        .authorization_bearer(&token)
        .json(&json!({ "message": "Hallo" }))
        .await
        .assert_status(StatusCode::INTERNAL_SERVER_ERROR);

    let stored: Chat = app
        .server
        .get(&format!("/api/chats/{}", chat.id))
        .authorization_bearer(&token)
        .await
        .json();
    assert!(stored.messages.is_empty());
}

#[tokio::test]
async fn test_replace_products() {
    let app = TestApp::new().await;
    let token = app.register("produkte@bonlivre.ch").await;
    let chat: Chat = app.server.post("/api/chats").authorization_bearer(&token).await.json();
    let url = format!("/api/chats/{}/products", chat.id);

    app.server
        .post(&url)
        .authorization_bearer(&token)
        .json(&json!({ "products": [{ "id": 1, "name": "Heidi", "price": "9.00" }] }))
        .await
        .assert_status_ok();
    app.server
        .post(&url)
        .authorization_bearer(&token)
        .json(&json!({ "products": [{ "id": 2, "name": "Der Richter und sein Henker", "price": "12.00" }] }))
        .await
        .assert_status_ok();

    let body: Value = app.server.get(&url).authorization_bearer(&token).await.json();
    let products = body["products"].as_array().unwrap();
    assert_eq!(products.len(), 1);
    assert_eq!(products[0]["id"], 2);
}

// ============= Stateless Completion Tests =============

#[tokio::test]
async fn test_chat_trims_history_to_budget() {
    let app = TestAppBuilder::new()
        .config(|c| {
            c.context.max_budget = 500;
            c.context.chars_per_token = 1.0;
        })
        .build()
        .await;
    let token = app.register("budget@bonlivre.ch").await;

    let response = app
        .server
        .post("/api/chat")
        .authorization_bearer(&token)
        .json(&json!({
            "messages": [
                { "role": "user", "content": "a".repeat(400) },
                { "role": "assistant", "content": "b".repeat(400) },
                { "role": "user", "content": "c".repeat(400) }
            ]
        }))
        .await;
    response.assert_status_ok();

    let sent = app.llm.last_call();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].role, MessageRole::System);
    assert!(sent[0].content.contains("Buchberater"));
    assert_eq!(sent[1].content, "c".repeat(400));

    // The last two submitted messages and the reply are stored
    let chat_id = response.json::<Value>()["chat_id"].as_str().unwrap().to_string();
    let chat: Chat = app
        .server
        .get(&format!("/api/chats/{}", chat_id))
        .authorization_bearer(&token)
        .await
        .json();
    assert_eq!(chat.messages.len(), 3);
    assert_eq!(chat.messages[0].content, "b".repeat(400));
    assert_eq!(chat.messages[2].role, MessageRole::Assistant);
}

#[tokio::test]
async fn test_chat_appends_product_directive_last() {
    let app = TestApp::new().await;
    let token = app.register("direktive@bonlivre.ch").await;

    app.server
        .post("/api/chat")
        .authorization_bearer(&token)
        .json(&json!({
            "messages": [{ "role": "user", "content": "Etwas von Dürrenmatt?" }],
            "products": [{ "id": 7, "name": "Der Besuch der alten Dame", "price": "14.90" }]
        }))
        .await
        .assert_status_ok();

    let sent = app.llm.last_call();
    let last = sent.last().unwrap();
    assert_eq!(last.role, MessageRole::System);
    assert!(last.content.contains("Der Besuch der alten Dame (14.90)"));
}

#[tokio::test]
async fn test_chat_product_command_without_products() {
    let app = TestApp::new().await;
    let token = app.register("leerlauf@bonlivre.ch").await;

    app.server
        .post("/api/chat")
        .authorization_bearer(&token)
        .json(&json!({ "messages": [{ "role": "user", "content": "Bonlivre produkt: Einhorn" }] }))
        .await
        .assert_status_ok();

    let last = app.llm.last_call().pop().unwrap();
    assert!(last.content.contains("keine spezifischen Produkte"));
}

#[tokio::test]
async fn test_chat_rejects_empty_and_malformed_requests() {
    let app = TestApp::new().await;
    let token = app.register("kaputt@bonlivre.ch").await;

    app.server
        .post("/api/chat")
        .authorization_bearer(&token)
        .json(&json!({ "messages": [] }))
        .await
        .assert_status_bad_request();

    let response = app
        .server
        .post("/api/chat")
        .authorization_bearer(&token)
        .json(&json!({ "messages": [{ "role": "tool", "content": "x" }] }))
        .await;
    assert!(response.status_code().is_client_error());
    assert!(app.llm.calls().is_empty());
}

// ============= Shop Tests =============

fn wc_product(id: i64, name: &str) -> Value {
    json!({
        "id": id,
        "name": name,
        "price": "9.00",
        "short_description": "<p>Ein Klassiker</p>",
        "permalink": format!("https://bonlivre.ch/p/{}", id),
        "images": [],
        "categories": [{ "id": 3, "name": "Kinderbuch" }]
    })
}

#[tokio::test]
async fn test_product_command_in_chat_stores_products() {
    let shop = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/wp-json/wc/v3/products"))
        .and(query_param("search", "Heidi"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([wc_product(1, "Heidi")])))
        .mount(&shop)
        .await;

    let app = TestAppBuilder::new().shop(shop.uri()).build().await;
    let token = app.register("shop@bonlivre.ch").await;
    let chat: Chat = app.server.post("/api/chats").authorization_bearer(&token).await.json();

    app.server
        .post(&format!("/api/chats/{}", chat.id))
        .authorization_bearer(&token)
        .json(&json!({ "message": "bonlivre produkt: Heidi" }))
        .await
        .assert_status_ok();

    let last = app.llm.last_call().pop().unwrap();
    assert_eq!(last.role, MessageRole::System);
    assert!(last.content.contains("Heidi (9.00)"));

    let body: Value = app
        .server
        .get(&format!("/api/chats/{}/products", chat.id))
        .authorization_bearer(&token)
        .await
        .json();
    assert_eq!(body["products"][0]["name"], "Heidi");
    assert_eq!(body["products"][0]["description"], "Ein Klassiker");
}

#[tokio::test]
async fn test_shop_outage_degrades_to_not_found_directive() {
    let shop = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/wp-json/wc/v3/products"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&shop)
        .await;

    let app = TestAppBuilder::new().shop(shop.uri()).build().await;
    let token = app.register("ausfall@bonlivre.ch").await;
    let chat: Chat = app.server.post("/api/chats").authorization_bearer(&token).await.json();

    app.server
        .post(&format!("/api/chats/{}", chat.id))
        .authorization_bearer(&token)
        .json(&json!({ "message": "bonlivre produkt: Heidi" }))
        .await
        .assert_status_ok();

    let last = app.llm.last_call().pop().unwrap();
    assert!(last.content.contains("keine spezifischen Produkte"));
}

#[tokio::test]
async fn test_product_search_route() {
    let shop = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/wp-json/wc/v3/products"))
        .and(query_param("search", "Heidi"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([wc_product(1, "Heidi")])))
        .mount(&shop)
        .await;

    let app = TestAppBuilder::new().shop(shop.uri()).build().await;
    let token = app.register("suche@bonlivre.ch").await;

    let body: Value = app
        .server
        .get("/api/wordpress")
        .authorization_bearer(&token)
        .add_query_param("search", "Heidi")
        .await
        .json();
    assert_eq!(body["products"].as_array().unwrap().len(), 1);

    app.server
        .get("/api/wordpress")
        .add_query_param("search", "Heidi")
        .await
        .assert_status_unauthorized();
}

#[tokio::test]
async fn test_order_lookup_route() {
    let shop = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/wp-json/wc/v3/orders"))
        .and(query_param("number", "1234"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "number": "1234",
            "status": "completed",
            "date_created": "2024-03-01T10:00:00",
            "total": "29.80",
            "currency": "CHF",
            "billing": { "postcode": "8001" },
            "line_items": [{ "name": "Heidi", "quantity": 2, "total": "18.00" }]
        }])))
        .mount(&shop)
        .await;

    let app = TestAppBuilder::new().shop(shop.uri()).build().await;

    let order: Value = app
        .server
        .get("/api/wordpress/order")
        .add_query_param("orderNumber", "1234")
        .add_query_param("postcode", "8001")
        .await
        .json();
    assert_eq!(order["number"], "1234");
    assert_eq!(order["shipped"], true);

    app.server
        .get("/api/wordpress/order")
        .add_query_param("orderNumber", "1234")
        .add_query_param("postcode", "3000")
        .await
        .assert_status_not_found();

    app.server
        .get("/api/wordpress/order")
        .add_query_param("orderNumber", "1234")
        .await
        .assert_status_bad_request();
}

#[tokio::test]
async fn test_shop_routes_without_shop_configured() {
    let app = TestApp::new().await;

    app.server
        .get("/api/wordpress/order")
        .add_query_param("orderNumber", "1234")
        .add_query_param("postcode", "8001")
        .await
        .assert_status(StatusCode::BAD_GATEWAY);

    let token = app.register("ohneshop@bonlivre.ch").await;
    let chat: Chat = app.server.post("/api/chats").authorization_bearer(&token).await.json();
    app.server
        .post(&format!("/api/chats/{}", chat.id))
        .authorization_bearer(&token)
        .json(&json!({ "message": "bonlivre bestellung: 1234 8001" }))
        .await
        .assert_status_ok();

    let last = app.llm.last_call().pop().unwrap();
    assert!(last.content.contains("Bestellnummer 1234"));
}
