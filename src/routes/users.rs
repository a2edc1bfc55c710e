use axum::{
    Router,
    extract::{Json, Multipart, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, put},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

use crate::models::{RecipeResponse, RecipeSummaryRow, User, UserResponse};
use crate::routes::auth::extract_current_user;
use crate::routes::recipes::{RECIPE_SUMMARY_FIELDS, RECIPE_SUMMARY_JOINS};
use crate::storage;

#[derive(Debug, Deserialize)]
pub struct UpdateProfile {
    pub username: Option<String>,
    pub full_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsernameQuery {
    username: Option<String>,
}

/// One row of the public chef directory.
#[derive(Debug, FromRow, Serialize)]
struct ChefRow {
    id: i64,
    username: String,
    full_name: Option<String>,
    avatar_url: Option<String>,
    recipe_count: i64,
    average_rating: f64,
    created_at: DateTime<Utc>,
}

pub fn users_routes() -> Router<SqlitePool> {
    Router::new()
        .route("/", get(list_chefs))
        .route("/username-available", get(check_username))
        .route("/me", put(update_profile))
        .route("/me/avatar", axum::routing::post(upload_avatar).delete(remove_avatar))
        .route("/{user_id}", get(get_user_profile))
        .route("/{user_id}/recipes", get(get_user_recipes))
}

fn internal_error<E: ToString>(error: E) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({"detail": error.to_string()})),
    )
}

/// Users with at least one recipe, newest members first.
async fn list_chefs(
    State(pool): State<SqlitePool>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    let chefs = sqlx::query_as::<_, ChefRow>(
        r#"SELECT u.id, u.username, u.full_name, u.avatar_url,
                  COUNT(DISTINCT r.id) AS recipe_count,
                  ROUND(COALESCE(AVG(rt.rating), 0.0), 1) AS average_rating,
                  u.created_at
           FROM users u
           JOIN recipes r ON r.author_id = u.id
           LEFT JOIN ratings rt ON rt.recipe_id = r.id
           GROUP BY u.id
           ORDER BY u.created_at DESC"#,
    )
    .fetch_all(&pool)
    .await
    .map_err(internal_error)?;

    Ok(Json(chefs))
}

async fn check_username(
    State(pool): State<SqlitePool>,
    Query(query): Query<UsernameQuery>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    let username = query.username.as_deref().unwrap_or("").trim().to_string();
    if username.is_empty() {
        return Ok(Json(serde_json::json!({"available": false})));
    }

    let taken = sqlx::query("SELECT id FROM users WHERE LOWER(username) = LOWER(?)")
        .bind(&username)
        .fetch_optional(&pool)
        .await
        .map_err(internal_error)?;

    Ok(Json(serde_json::json!({"available": taken.is_none()})))
}

async fn update_profile(
    State(pool): State<SqlitePool>,
    headers: HeaderMap,
    Json(input): Json<UpdateProfile>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    let current_user = extract_current_user(&pool, &headers).await?;

    let username = match input.username.as_deref().map(str::trim) {
        Some("") => {
            return Err((
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"detail": "Username cannot be empty"})),
            ));
        }
        Some(name) => {
            let taken =
                sqlx::query("SELECT id FROM users WHERE LOWER(username) = LOWER(?) AND id != ?")
                    .bind(name)
                    .bind(current_user.id)
                    .fetch_optional(&pool)
                    .await
                    .map_err(internal_error)?;
            if taken.is_some() {
                return Err((
                    StatusCode::CONFLICT,
                    Json(serde_json::json!({"detail": "Username is already taken"})),
                ));
            }
            name.to_string()
        }
        None => current_user.username.clone(),
    };

    let full_name = match &input.full_name {
        Some(name) => {
            let trimmed = name.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        None => current_user.full_name.clone(),
    };

    sqlx::query("UPDATE users SET username = ?, full_name = ?, updated_at = ? WHERE id = ?")
        .bind(&username)
        .bind(&full_name)
        .bind(Utc::now())
        .bind(current_user.id)
        .execute(&pool)
        .await
        .map_err(internal_error)?;

    let updated_user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
        .bind(current_user.id)
        .fetch_one(&pool)
        .await
        .map_err(internal_error)?;

    Ok(Json(UserResponse::from(updated_user)))
}

async fn upload_avatar(
    State(pool): State<SqlitePool>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    let current_user = extract_current_user(&pool, &headers).await?;

    let mut avatar_url: Option<String> = None;
    while let Some(field) = multipart.next_field().await.map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"detail": e.to_string()})),
        )
    })? {
        if field.name() != Some("avatar") {
            continue;
        }
        let Some(original_name) = field.file_name().map(ToString::to_string) else {
            continue;
        };
        let data = field.bytes().await.map_err(|e| {
            (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"detail": e.to_string()})),
            )
        })?;

        let url = storage::save_image(&original_name, &data).await.map_err(|e| {
            (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"detail": e.to_string()})),
            )
        })?;
        avatar_url = Some(url);
    }

    let avatar_url = avatar_url.ok_or_else(|| {
        (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"detail": "Avatar file is required"})),
        )
    })?;

    sqlx::query("UPDATE users SET avatar_url = ?, updated_at = ? WHERE id = ?")
        .bind(&avatar_url)
        .bind(Utc::now())
        .bind(current_user.id)
        .execute(&pool)
        .await
        .map_err(internal_error)?;

    if let Some(old_url) = current_user.avatar_url.as_deref() {
        storage::remove_image(old_url).await;
    }

    let updated_user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
        .bind(current_user.id)
        .fetch_one(&pool)
        .await
        .map_err(internal_error)?;

    Ok(Json(UserResponse::from(updated_user)))
}

async fn remove_avatar(
    State(pool): State<SqlitePool>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    let current_user = extract_current_user(&pool, &headers).await?;

    if let Some(old_url) = current_user.avatar_url.as_deref() {
        storage::remove_image(old_url).await;
    }

    sqlx::query("UPDATE users SET avatar_url = NULL, updated_at = ? WHERE id = ?")
        .bind(Utc::now())
        .bind(current_user.id)
        .execute(&pool)
        .await
        .map_err(internal_error)?;

    let updated_user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
        .bind(current_user.id)
        .fetch_one(&pool)
        .await
        .map_err(internal_error)?;

    Ok(Json(UserResponse::from(updated_user)))
}

/// Public profile with activity counts. The email stays private.
async fn get_user_profile(
    State(pool): State<SqlitePool>,
    Path(user_id): Path<i64>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_optional(&pool)
        .await
        .map_err(internal_error)?
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({"detail": "User not found"})),
            )
        })?;

    let recipe_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM recipes WHERE author_id = ?")
        .bind(user_id)
        .fetch_one(&pool)
        .await
        .map_err(internal_error)?;

    let favorite_count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM favorites WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(&pool)
            .await
            .map_err(internal_error)?;

    let rating_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM ratings WHERE user_id = ?")
        .bind(user_id)
        .fetch_one(&pool)
        .await
        .map_err(internal_error)?;

    Ok(Json(serde_json::json!({
        "id": user.id,
        "username": user.username,
        "full_name": user.full_name,
        "avatar_url": user.avatar_url,
        "created_at": user.created_at,
        "recipe_count": recipe_count,
        "favorite_count": favorite_count,
        "rating_count": rating_count,
    })))
}

async fn get_user_recipes(
    State(pool): State<SqlitePool>,
    Path(user_id): Path<i64>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    let found = sqlx::query("SELECT id FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_optional(&pool)
        .await
        .map_err(internal_error)?;

    if found.is_none() {
        return Err((
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"detail": "User not found"})),
        ));
    }

    let sql = format!(
        "SELECT {RECIPE_SUMMARY_FIELDS} {RECIPE_SUMMARY_JOINS} WHERE r.author_id = ? GROUP BY r.id ORDER BY r.created_at DESC, r.id DESC"
    );
    let rows = sqlx::query_as::<_, RecipeSummaryRow>(&sql)
        .bind(user_id)
        .fetch_all(&pool)
        .await
        .map_err(internal_error)?;

    let recipes: Vec<RecipeResponse> = rows.into_iter().map(RecipeResponse::from).collect();
    Ok(Json(recipes))
}
