use std::str::FromStr;
use std::sync::Once;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use chrono::{Duration, TimeZone, Utc};
use serde_json::{Value, json};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tower::ServiceExt;

use spoonify_backend::{app, db};

static INIT: Once = Once::new();

fn init_env() {
    INIT.call_once(|| {
        // Safety: every test gates on this Once before reading the variable.
        unsafe { std::env::set_var("SECRET_KEY", "test-secret-key") };
    });
}

/// One in-memory database per test. A single connection keeps the
/// `:memory:` schema alive for the whole test.
async fn setup() -> (Router, SqlitePool) {
    init_env();

    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .unwrap()
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .unwrap();
    db::create_schema(&pool).await.unwrap();

    (app(pool.clone()), pool)
}

async fn send_json(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let request = match body {
        Some(value) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(value.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

const BOUNDARY: &str = "test-boundary";

fn multipart_body(fields: &[(&str, &str)]) -> Body {
    let mut body = String::new();
    for (name, value) in fields {
        body.push_str(&format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
        ));
    }
    body.push_str(&format!("--{BOUNDARY}--\r\n"));
    Body::from(body)
}

async fn send_multipart(
    app: &Router,
    method: &str,
    uri: &str,
    token: &str,
    fields: &[(&str, &str)],
) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(multipart_body(fields))
        .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn register_and_login(app: &Router, email: &str, full_name: &str) -> String {
    let (status, body) = send_json(
        app,
        "POST",
        "/api/auth/register",
        None,
        Some(json!({"email": email, "password": "password123", "full_name": full_name})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);

    let (status, body) = send_json(
        app,
        "POST",
        "/api/auth/login",
        None,
        Some(json!({"email": email, "password": "password123"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    body["access_token"].as_str().unwrap().to_string()
}

async fn current_user_id(app: &Router, token: &str) -> i64 {
    let (status, body) = send_json(app, "GET", "/api/auth/me", Some(token), None).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    body["id"].as_i64().unwrap()
}

async fn create_recipe(app: &Router, token: &str, title: &str) -> i64 {
    let (status, body) = send_multipart(
        app,
        "POST",
        "/api/recipes",
        token,
        &[
            ("title", title),
            ("description", "A recipe used by the tests"),
            ("category", "Dinner"),
            ("difficulty", "Easy"),
            ("cooking_time", "30"),
            ("ingredients", r#"["Salt", "Pepper"]"#),
            ("steps", r#"["Mix everything", "Serve"]"#),
        ],
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    body["id"].as_i64().unwrap()
}

/// Inserts a comment row with a pinned timestamp so ordering is exact.
async fn insert_comment(
    pool: &SqlitePool,
    recipe_id: i64,
    author_id: i64,
    parent_id: Option<i64>,
    content: &str,
    minute: i64,
) -> i64 {
    let created_at =
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + Duration::minutes(minute);
    let result = sqlx::query(
        "INSERT INTO comments (recipe_id, author_id, parent_id, content, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(recipe_id)
    .bind(author_id)
    .bind(parent_id)
    .bind(content)
    .bind(created_at)
    .execute(pool)
    .await
    .unwrap();
    result.last_insert_rowid()
}

fn visible_ids(tree: &Value) -> Vec<i64> {
    let mut ids = Vec::new();
    for root in tree.as_array().unwrap() {
        ids.push(root["id"].as_i64().unwrap());
        for reply in root["replies"].as_array().unwrap() {
            ids.push(reply["id"].as_i64().unwrap());
        }
    }
    ids
}

#[tokio::test]
async fn register_login_and_me_round_trip() {
    let (app, _pool) = setup().await;

    let (status, body) = send_json(
        &app,
        "POST",
        "/api/auth/register",
        None,
        Some(json!({"email": "alice@example.com", "password": "password123", "full_name": "Alice Chef"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    assert_eq!(body["username"], "alice");
    assert!(body.get("hashed_password").is_none());

    let (status, body) = send_json(
        &app,
        "POST",
        "/api/auth/login",
        None,
        Some(json!({"email": "alice@example.com", "password": "password123"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["token_type"], "bearer");

    let token = body["access_token"].as_str().unwrap();
    let (status, body) = send_json(&app, "GET", "/api/auth/me", Some(token), None).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["email"], "alice@example.com");
    assert_eq!(body["full_name"], "Alice Chef");
}

#[tokio::test]
async fn register_rejects_duplicate_email_and_short_password() {
    let (app, _pool) = setup().await;
    register_and_login(&app, "alice@example.com", "Alice").await;

    let (status, body) = send_json(
        &app,
        "POST",
        "/api/auth/register",
        None,
        Some(json!({"email": "alice@example.com", "password": "password123"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "Email already registered");

    let (status, body) = send_json(
        &app,
        "POST",
        "/api/auth/register",
        None,
        Some(json!({"email": "bob@example.com", "password": "abc"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "Password must be at least 6 characters");
}

#[tokio::test]
async fn login_with_wrong_password_is_rejected() {
    let (app, _pool) = setup().await;
    register_and_login(&app, "alice@example.com", "Alice").await;

    let (status, body) = send_json(
        &app,
        "POST",
        "/api/auth/login",
        None,
        Some(json!({"email": "alice@example.com", "password": "wrong-password"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["detail"], "Incorrect email or password");
}

#[tokio::test]
async fn usernames_get_numeric_suffixes_on_collision() {
    let (app, _pool) = setup().await;

    let (_, body) = send_json(
        &app,
        "POST",
        "/api/auth/register",
        None,
        Some(json!({"email": "casey@example.com", "password": "password123"})),
    )
    .await;
    assert_eq!(body["username"], "casey");

    let (_, body) = send_json(
        &app,
        "POST",
        "/api/auth/register",
        None,
        Some(json!({"email": "casey@other.net", "password": "password123"})),
    )
    .await;
    assert_eq!(body["username"], "casey1");
}

#[tokio::test]
async fn comment_tree_groups_replies_and_marks_viewer_likes() {
    let (app, pool) = setup().await;
    let token_a = register_and_login(&app, "alice@example.com", "Alice").await;
    let token_b = register_and_login(&app, "bob@example.com", "Bob").await;
    let user_a = current_user_id(&app, &token_a).await;
    let user_b = current_user_id(&app, &token_b).await;

    let recipe_id = create_recipe(&app, &token_a, "Tree Stew").await;

    let c1 = insert_comment(&pool, recipe_id, user_a, None, "first root", 10).await;
    let c2 = insert_comment(&pool, recipe_id, user_b, Some(c1), "a reply", 11).await;
    let c3 = insert_comment(&pool, recipe_id, user_a, None, "second root", 12).await;

    let (status, body) = send_json(
        &app,
        "POST",
        &format!("/api/comments/{}/like", c1),
        Some(&token_a),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["liked"], true);
    assert_eq!(body["likes_count"], 1);

    let (status, tree) = send_json(
        &app,
        "GET",
        &format!("/api/recipes/{}/comments", recipe_id),
        Some(&token_a),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", tree);

    let roots = tree.as_array().unwrap();
    assert_eq!(roots.len(), 2);
    assert_eq!(roots[0]["id"], c3);
    assert_eq!(roots[1]["id"], c1);

    assert_eq!(roots[0]["likes_count"], 0);
    assert_eq!(roots[0]["user_liked"], false);
    assert_eq!(roots[0]["replies"].as_array().unwrap().len(), 0);

    assert_eq!(roots[1]["likes_count"], 1);
    assert_eq!(roots[1]["user_liked"], true);
    let replies = roots[1]["replies"].as_array().unwrap();
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0]["id"], c2);
    assert_eq!(replies[0]["author_name"], "Bob");
}

#[tokio::test]
async fn anonymous_viewer_sees_likes_but_no_liked_flags() {
    let (app, pool) = setup().await;
    let token = register_and_login(&app, "alice@example.com", "Alice").await;
    let user_id = current_user_id(&app, &token).await;
    let recipe_id = create_recipe(&app, &token, "Anonymous Soup").await;

    let c1 = insert_comment(&pool, recipe_id, user_id, None, "root", 0).await;
    send_json(
        &app,
        "POST",
        &format!("/api/comments/{}/like", c1),
        Some(&token),
        None,
    )
    .await;

    let (status, tree) = send_json(
        &app,
        "GET",
        &format!("/api/recipes/{}/comments", recipe_id),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", tree);

    let roots = tree.as_array().unwrap();
    assert_eq!(roots[0]["likes_count"], 1);
    assert_eq!(roots[0]["user_liked"], false);
}

#[tokio::test]
async fn reply_to_reply_is_stored_but_not_shown() {
    let (app, pool) = setup().await;
    let token = register_and_login(&app, "alice@example.com", "Alice").await;
    let user_id = current_user_id(&app, &token).await;
    let recipe_id = create_recipe(&app, &token, "Nested Noodles").await;

    let c1 = insert_comment(&pool, recipe_id, user_id, None, "root", 0).await;
    let c2 = insert_comment(&pool, recipe_id, user_id, Some(c1), "reply", 1).await;

    let (status, tree) = send_json(
        &app,
        "POST",
        &format!("/api/recipes/{}/comments", recipe_id),
        Some(&token),
        Some(json!({"content": "reply to the reply", "parent_id": c2})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", tree);

    let stored: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM comments WHERE recipe_id = ?")
        .bind(recipe_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(stored, 3);

    let ids = visible_ids(&tree);
    assert_eq!(ids.len(), 2);
    assert!(ids.contains(&c1));
    assert!(ids.contains(&c2));
}

#[tokio::test]
async fn comment_validation_rejects_blank_and_foreign_parents() {
    let (app, pool) = setup().await;
    let token = register_and_login(&app, "alice@example.com", "Alice").await;
    let user_id = current_user_id(&app, &token).await;
    let recipe_a = create_recipe(&app, &token, "Recipe A").await;
    let recipe_b = create_recipe(&app, &token, "Recipe B").await;

    let (status, body) = send_json(
        &app,
        "POST",
        &format!("/api/recipes/{}/comments", recipe_a),
        Some(&token),
        Some(json!({"content": "   "})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "Comment content is required");

    let (status, body) = send_json(
        &app,
        "POST",
        "/api/recipes/999/comments",
        Some(&token),
        Some(json!({"content": "hello"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND, "{}", body);

    let parent_on_a = insert_comment(&pool, recipe_a, user_id, None, "on recipe A", 0).await;
    let (status, body) = send_json(
        &app,
        "POST",
        &format!("/api/recipes/{}/comments", recipe_b),
        Some(&token),
        Some(json!({"content": "wrong thread", "parent_id": parent_on_a})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "Parent comment does not belong to this recipe");

    let (status, body) = send_json(
        &app,
        "POST",
        &format!("/api/recipes/{}/comments", recipe_a),
        Some(&token),
        Some(json!({"content": "orphan", "parent_id": 12345})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["detail"], "Parent comment not found");
}

#[tokio::test]
async fn only_the_author_deletes_a_comment_and_replies_cascade() {
    let (app, pool) = setup().await;
    let token_a = register_and_login(&app, "alice@example.com", "Alice").await;
    let token_b = register_and_login(&app, "bob@example.com", "Bob").await;
    let user_a = current_user_id(&app, &token_a).await;
    let user_b = current_user_id(&app, &token_b).await;
    let recipe_id = create_recipe(&app, &token_a, "Cascade Casserole").await;

    let c1 = insert_comment(&pool, recipe_id, user_a, None, "root", 0).await;
    insert_comment(&pool, recipe_id, user_b, Some(c1), "reply", 1).await;

    let (status, body) = send_json(
        &app,
        "DELETE",
        &format!("/api/recipes/{}/comments/{}", recipe_id, c1),
        Some(&token_b),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["detail"], "Not authorized to delete this comment");

    let (status, _) = send_json(
        &app,
        "DELETE",
        &format!("/api/recipes/{}/comments/{}", recipe_id, c1),
        Some(&token_a),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM comments WHERE recipe_id = ?")
        .bind(recipe_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(remaining, 0);
}

#[tokio::test]
async fn like_toggle_flips_state_and_requires_auth() {
    let (app, pool) = setup().await;
    let token = register_and_login(&app, "alice@example.com", "Alice").await;
    let user_id = current_user_id(&app, &token).await;
    let recipe_id = create_recipe(&app, &token, "Toggle Toast").await;
    let c1 = insert_comment(&pool, recipe_id, user_id, None, "root", 0).await;

    let uri = format!("/api/comments/{}/like", c1);

    let (status, _) = send_json(&app, "POST", &uri, None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (_, body) = send_json(&app, "POST", &uri, Some(&token), None).await;
    assert_eq!(body["liked"], true);
    assert_eq!(body["likes_count"], 1);

    let (_, body) = send_json(&app, "POST", &uri, Some(&token), None).await;
    assert_eq!(body["liked"], false);
    assert_eq!(body["likes_count"], 0);

    let (status, body) = send_json(&app, "POST", "/api/comments/999/like", Some(&token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND, "{}", body);
}

#[tokio::test]
async fn recipe_creation_validates_fields() {
    let (app, _pool) = setup().await;
    let token = register_and_login(&app, "alice@example.com", "Alice").await;

    let (status, body) = send_multipart(
        &app,
        "POST",
        "/api/recipes",
        &token,
        &[
            ("description", "No title here"),
            ("category", "Dinner"),
            ("difficulty", "Easy"),
            ("cooking_time", "30"),
            ("ingredients", r#"["Salt"]"#),
            ("steps", r#"["Mix"]"#),
        ],
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "Title is required");

    let (status, body) = send_multipart(
        &app,
        "POST",
        "/api/recipes",
        &token,
        &[
            ("title", "Mystery Meal"),
            ("description", "desc"),
            ("category", "Astrogastronomy"),
            ("difficulty", "Easy"),
            ("cooking_time", "30"),
            ("ingredients", r#"["Salt"]"#),
            ("steps", r#"["Mix"]"#),
        ],
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "Unknown category");

    let (status, body) = send_multipart(
        &app,
        "POST",
        "/api/recipes",
        &token,
        &[
            ("title", "Empty Lists"),
            ("description", "desc"),
            ("category", "Dinner"),
            ("difficulty", "Easy"),
            ("cooking_time", "30"),
            ("ingredients", r#"["   "]"#),
            ("steps", r#"["Mix"]"#),
        ],
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "At least one ingredient is required");

    let (status, body) = send_multipart(
        &app,
        "POST",
        "/api/recipes",
        &token,
        &[
            ("title", "Slow Food"),
            ("description", "desc"),
            ("category", "Dinner"),
            ("difficulty", "Easy"),
            ("cooking_time", "0"),
            ("ingredients", r#"["Salt"]"#),
            ("steps", r#"["Mix"]"#),
        ],
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "Cooking time must be greater than 0");
}

#[tokio::test]
async fn the_sixth_recipe_is_rejected() {
    let (app, _pool) = setup().await;
    let token = register_and_login(&app, "alice@example.com", "Alice").await;

    for i in 1..=5 {
        create_recipe(&app, &token, &format!("Recipe {}", i)).await;
    }

    let (status, body) = send_multipart(
        &app,
        "POST",
        "/api/recipes",
        &token,
        &[
            ("title", "One Too Many"),
            ("description", "desc"),
            ("category", "Dinner"),
            ("difficulty", "Easy"),
            ("cooking_time", "30"),
            ("ingredients", r#"["Salt"]"#),
            ("steps", r#"["Mix"]"#),
        ],
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "You've reached the maximum limit of 5 recipes");
}

#[tokio::test]
async fn recipe_list_filters_combine() {
    let (app, _pool) = setup().await;
    let token = register_and_login(&app, "alice@example.com", "Alice").await;

    create_recipe(&app, &token, "Weeknight Pasta").await;

    let (status, body) = send_multipart(
        &app,
        "POST",
        "/api/recipes",
        &token,
        &[
            ("title", "Chocolate Cake"),
            ("description", "Rich dessert"),
            ("category", "Dessert"),
            ("difficulty", "Hard"),
            ("cooking_time", "90"),
            ("ingredients", r#"["Chocolate", "Flour"]"#),
            ("steps", r#"["Bake"]"#),
        ],
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);

    let (_, body) = send_json(&app, "GET", "/api/recipes", None, None).await;
    assert_eq!(body.as_array().unwrap().len(), 2);

    let (_, body) = send_json(&app, "GET", "/api/recipes?category=Dessert", None, None).await;
    let list = body.as_array().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["title"], "Chocolate Cake");

    let (_, body) = send_json(&app, "GET", "/api/recipes?search=chocolate", None, None).await;
    assert_eq!(body.as_array().unwrap().len(), 1);

    let (_, body) = send_json(&app, "GET", "/api/recipes?difficulty=Easy", None, None).await;
    let list = body.as_array().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["title"], "Weeknight Pasta");

    let (_, body) = send_json(&app, "GET", "/api/recipes?max_cooking_time=60", None, None).await;
    assert_eq!(body.as_array().unwrap().len(), 1);

    let (_, body) = send_json(
        &app,
        "GET",
        "/api/recipes?category=Dessert&difficulty=Easy",
        None,
        None,
    )
    .await;
    assert_eq!(body.as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn rating_upsert_updates_the_average() {
    let (app, _pool) = setup().await;
    let token_a = register_and_login(&app, "alice@example.com", "Alice").await;
    let token_b = register_and_login(&app, "bob@example.com", "Bob").await;
    let recipe_id = create_recipe(&app, &token_a, "Rated Risotto").await;
    let uri = format!("/api/recipes/{}/rating", recipe_id);

    let (status, body) =
        send_json(&app, "PUT", &uri, Some(&token_a), Some(json!({"rating": 6}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "Rating must be between 1 and 5");

    let (status, body) =
        send_json(&app, "PUT", &uri, Some(&token_a), Some(json!({"rating": 5}))).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["average_rating"], 5.0);
    assert_eq!(body["total_ratings"], 1);

    // Re-rating replaces, never duplicates.
    let (_, body) =
        send_json(&app, "PUT", &uri, Some(&token_a), Some(json!({"rating": 3}))).await;
    assert_eq!(body["average_rating"], 3.0);
    assert_eq!(body["total_ratings"], 1);

    let (_, body) =
        send_json(&app, "PUT", &uri, Some(&token_b), Some(json!({"rating": 5}))).await;
    assert_eq!(body["average_rating"], 4.0);
    assert_eq!(body["total_ratings"], 2);

    let (_, body) = send_json(&app, "GET", &uri, Some(&token_a), None).await;
    assert_eq!(body["rating"], 3);

    let (_, body) = send_json(
        &app,
        "GET",
        &format!("/api/recipes/{}", recipe_id),
        Some(&token_a),
        None,
    )
    .await;
    assert_eq!(body["average_rating"], 4.0);
    assert_eq!(body["user_rating"], 3);
}

#[tokio::test]
async fn favorite_toggle_and_listing() {
    let (app, _pool) = setup().await;
    let token = register_and_login(&app, "alice@example.com", "Alice").await;
    let recipe_id = create_recipe(&app, &token, "Favorite Falafel").await;
    let uri = format!("/api/recipes/{}/favorite", recipe_id);

    let (status, body) = send_json(&app, "POST", &uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["is_favorite"], true);

    let (_, body) = send_json(&app, "GET", "/api/favorites", Some(&token), None).await;
    let list = body.as_array().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["title"], "Favorite Falafel");

    let (_, body) = send_json(
        &app,
        "GET",
        &format!("/api/recipes/{}", recipe_id),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(body["is_favorite"], true);

    let (_, body) = send_json(&app, "POST", &uri, Some(&token), None).await;
    assert_eq!(body["is_favorite"], false);

    let (_, body) = send_json(&app, "GET", "/api/favorites", Some(&token), None).await;
    assert_eq!(body.as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn username_availability_and_profile_update() {
    let (app, _pool) = setup().await;
    let token = register_and_login(&app, "alice@example.com", "Alice").await;
    register_and_login(&app, "bob@example.com", "Bob").await;

    let (_, body) = send_json(
        &app,
        "GET",
        "/api/users/username-available?username=fresh_name",
        None,
        None,
    )
    .await;
    assert_eq!(body["available"], true);

    // Case-insensitive collision.
    let (_, body) = send_json(
        &app,
        "GET",
        "/api/users/username-available?username=ALICE",
        None,
        None,
    )
    .await;
    assert_eq!(body["available"], false);

    let (status, body) = send_json(
        &app,
        "PUT",
        "/api/users/me",
        Some(&token),
        Some(json!({"username": "Bob"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT, "{}", body);
    assert_eq!(body["detail"], "Username is already taken");

    let (status, body) = send_json(
        &app,
        "PUT",
        "/api/users/me",
        Some(&token),
        Some(json!({"username": "alice_cooks", "full_name": "Alice C."})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["username"], "alice_cooks");
    assert_eq!(body["full_name"], "Alice C.");
}

#[tokio::test]
async fn chefs_lists_only_users_with_recipes() {
    let (app, _pool) = setup().await;
    let token_a = register_and_login(&app, "alice@example.com", "Alice").await;
    register_and_login(&app, "bob@example.com", "Bob").await;
    create_recipe(&app, &token_a, "Chef Special").await;

    let (status, body) = send_json(&app, "GET", "/api/users", None, None).await;
    assert_eq!(status, StatusCode::OK, "{}", body);

    let chefs = body.as_array().unwrap();
    assert_eq!(chefs.len(), 1);
    assert_eq!(chefs[0]["username"], "alice");
    assert_eq!(chefs[0]["recipe_count"], 1);
}

#[tokio::test]
async fn public_profile_hides_email_and_counts_activity() {
    let (app, _pool) = setup().await;
    let token = register_and_login(&app, "alice@example.com", "Alice").await;
    let user_id = current_user_id(&app, &token).await;
    let recipe_id = create_recipe(&app, &token, "Counted Curry").await;

    send_json(
        &app,
        "PUT",
        &format!("/api/recipes/{}/rating", recipe_id),
        Some(&token),
        Some(json!({"rating": 4})),
    )
    .await;
    send_json(
        &app,
        "POST",
        &format!("/api/recipes/{}/favorite", recipe_id),
        Some(&token),
        None,
    )
    .await;

    let (status, body) = send_json(
        &app,
        "GET",
        &format!("/api/users/{}", user_id),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert!(body.get("email").is_none());
    assert_eq!(body["recipe_count"], 1);
    assert_eq!(body["favorite_count"], 1);
    assert_eq!(body["rating_count"], 1);

    let (status, body) = send_json(
        &app,
        "GET",
        &format!("/api/users/{}/recipes", user_id),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn recipe_update_and_delete_enforce_ownership() {
    let (app, _pool) = setup().await;
    let token_a = register_and_login(&app, "alice@example.com", "Alice").await;
    let token_b = register_and_login(&app, "bob@example.com", "Bob").await;
    let recipe_id = create_recipe(&app, &token_a, "Owned Omelette").await;

    let (status, body) = send_multipart(
        &app,
        "PUT",
        &format!("/api/recipes/{}", recipe_id),
        &token_b,
        &[("title", "Hijacked")],
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN, "{}", body);

    let (status, body) = send_multipart(
        &app,
        "PUT",
        &format!("/api/recipes/{}", recipe_id),
        &token_a,
        &[("title", "Renamed Omelette"), ("cooking_time", "45")],
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["title"], "Renamed Omelette");
    assert_eq!(body["cooking_time"], 45);
    // Untouched fields keep their stored values.
    assert_eq!(body["ingredients"].as_array().unwrap().len(), 2);

    let (status, _) = send_json(
        &app,
        "DELETE",
        &format!("/api/recipes/{}", recipe_id),
        Some(&token_b),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send_json(
        &app,
        "DELETE",
        &format!("/api/recipes/{}", recipe_id),
        Some(&token_a),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send_json(
        &app,
        "GET",
        &format!("/api/recipes/{}", recipe_id),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn categories_are_seeded_alphabetically() {
    let (app, _pool) = setup().await;

    let (status, body) = send_json(&app, "GET", "/api/categories", None, None).await;
    assert_eq!(status, StatusCode::OK, "{}", body);

    let categories = body.as_array().unwrap();
    assert_eq!(categories.len(), 6);
    assert_eq!(categories[0]["name"], "Breakfast");
    assert_eq!(categories[5]["name"], "Vegetarian");
}

#[tokio::test]
async fn stats_reflect_stored_rows() {
    let (app, _pool) = setup().await;
    let token_a = register_and_login(&app, "alice@example.com", "Alice").await;
    let token_b = register_and_login(&app, "bob@example.com", "Bob").await;

    create_recipe(&app, &token_a, "Stat Stew").await;
    let second = {
        let (status, body) = send_multipart(
            &app,
            "POST",
            "/api/recipes",
            &token_a,
            &[
                ("title", "Long Braise"),
                ("description", "desc"),
                ("category", "Dinner"),
                ("difficulty", "Medium"),
                ("cooking_time", "60"),
                ("ingredients", r#"["Beef"]"#),
                ("steps", r#"["Braise"]"#),
            ],
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        body["id"].as_i64().unwrap()
    };

    send_json(
        &app,
        "PUT",
        &format!("/api/recipes/{}/rating", second),
        Some(&token_b),
        Some(json!({"rating": 5})),
    )
    .await;

    let (status, body) = send_json(&app, "GET", "/api/stats", None, None).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["total_recipes"], 2);
    assert_eq!(body["total_users"], 2);
    assert_eq!(body["total_ratings"], 1);
    assert_eq!(body["total_categories"], 6);
    assert_eq!(body["avg_cooking_time"], 45);
}

#[tokio::test]
async fn health_endpoint_responds() {
    let (app, _pool) = setup().await;

    let (status, body) = send_json(&app, "GET", "/api/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}
