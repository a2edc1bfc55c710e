use std::collections::HashMap;

use axum::{
    Router,
    extract::{Json, Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
};
use chrono::Utc;
use sqlx::SqlitePool;

use crate::comment_tree::{CommentNode, build_comment_tree};
use crate::models::{Comment, CommentAuthor, CommentLike, CreateComment};
use crate::routes::auth::{extract_current_user, extract_optional_user};

pub fn comments_routes() -> Router<SqlitePool> {
    Router::new()
        .route(
            "/{recipe_id}/comments",
            get(list_comments).post(create_comment),
        )
        .route(
            "/{recipe_id}/comments/{comment_id}",
            axum::routing::delete(delete_comment),
        )
}

/// Routes addressed by comment id rather than recipe id.
pub fn comment_like_routes() -> Router<SqlitePool> {
    Router::new().route("/{comment_id}/like", post(toggle_comment_like))
}

fn internal_error<E: ToString>(error: E) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({"detail": error.to_string()})),
    )
}

async fn ensure_recipe_exists(
    pool: &SqlitePool,
    recipe_id: i64,
) -> Result<(), (StatusCode, Json<serde_json::Value>)> {
    let found = sqlx::query("SELECT id FROM recipes WHERE id = ?")
        .bind(recipe_id)
        .fetch_optional(pool)
        .await
        .map_err(internal_error)?;

    if found.is_none() {
        return Err((
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"detail": "Recipe not found"})),
        ));
    }
    Ok(())
}

/// Loads everything the tree builder needs for one recipe and assembles the
/// nested view. Comments come back newest first so the builder can keep
/// encounter order.
pub async fn load_comment_tree(
    pool: &SqlitePool,
    recipe_id: i64,
    viewer_id: Option<i64>,
) -> Result<Vec<CommentNode>, sqlx::Error> {
    let comments = sqlx::query_as::<_, Comment>(
        r#"SELECT id, recipe_id, author_id, parent_id, content, created_at
           FROM comments
           WHERE recipe_id = ?
           ORDER BY created_at DESC, id DESC"#,
    )
    .bind(recipe_id)
    .fetch_all(pool)
    .await?;

    let likes = sqlx::query_as::<_, CommentLike>(
        r#"SELECT cl.comment_id, cl.user_id
           FROM comment_likes cl
           JOIN comments c ON c.id = cl.comment_id
           WHERE c.recipe_id = ?"#,
    )
    .bind(recipe_id)
    .fetch_all(pool)
    .await?;

    let authors = sqlx::query_as::<_, CommentAuthor>(
        r#"SELECT DISTINCT u.id, u.full_name, u.email, u.avatar_url
           FROM users u
           JOIN comments c ON c.author_id = u.id
           WHERE c.recipe_id = ?"#,
    )
    .bind(recipe_id)
    .fetch_all(pool)
    .await?;

    let authors: HashMap<i64, CommentAuthor> = authors.into_iter().map(|a| (a.id, a)).collect();

    Ok(build_comment_tree(comments, &likes, &authors, viewer_id))
}

async fn list_comments(
    State(pool): State<SqlitePool>,
    headers: HeaderMap,
    Path(recipe_id): Path<i64>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    ensure_recipe_exists(&pool, recipe_id).await?;

    let viewer = extract_optional_user(&pool, &headers).await?;
    let tree = load_comment_tree(&pool, recipe_id, viewer.map(|u| u.id))
        .await
        .map_err(internal_error)?;

    Ok(Json(tree))
}

async fn create_comment(
    State(pool): State<SqlitePool>,
    headers: HeaderMap,
    Path(recipe_id): Path<i64>,
    Json(input): Json<CreateComment>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    let current_user = extract_current_user(&pool, &headers).await?;
    ensure_recipe_exists(&pool, recipe_id).await?;

    let content = input.content.trim();
    if content.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"detail": "Comment content is required"})),
        ));
    }

    if let Some(parent_id) = input.parent_id {
        let parent_row = sqlx::query_as::<_, (i64, i64)>(
            "SELECT id, recipe_id FROM comments WHERE id = ?",
        )
        .bind(parent_id)
        .fetch_optional(&pool)
        .await
        .map_err(internal_error)?
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({"detail": "Parent comment not found"})),
            )
        })?;

        if parent_row.1 != recipe_id {
            return Err((
                StatusCode::BAD_REQUEST,
                Json(
                    serde_json::json!({"detail": "Parent comment does not belong to this recipe"}),
                ),
            ));
        }
    }

    sqlx::query(
        "INSERT INTO comments (recipe_id, author_id, parent_id, content, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(recipe_id)
    .bind(current_user.id)
    .bind(input.parent_id)
    .bind(content)
    .bind(Utc::now())
    .execute(&pool)
    .await
    .map_err(internal_error)?;

    let tree = load_comment_tree(&pool, recipe_id, Some(current_user.id))
        .await
        .map_err(internal_error)?;

    Ok((StatusCode::CREATED, Json(tree)))
}

async fn delete_comment(
    State(pool): State<SqlitePool>,
    headers: HeaderMap,
    Path((recipe_id, comment_id)): Path<(i64, i64)>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    let current_user = extract_current_user(&pool, &headers).await?;

    let comment = sqlx::query_as::<_, Comment>(
        r#"SELECT id, recipe_id, author_id, parent_id, content, created_at
           FROM comments WHERE id = ? AND recipe_id = ?"#,
    )
    .bind(comment_id)
    .bind(recipe_id)
    .fetch_optional(&pool)
    .await
    .map_err(internal_error)?
    .ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"detail": "Comment not found"})),
        )
    })?;

    if comment.author_id != current_user.id {
        return Err((
            StatusCode::FORBIDDEN,
            Json(serde_json::json!({"detail": "Not authorized to delete this comment"})),
        ));
    }

    // Replies and likes go with it through the FK cascades.
    sqlx::query("DELETE FROM comments WHERE id = ?")
        .bind(comment_id)
        .execute(&pool)
        .await
        .map_err(internal_error)?;

    Ok(StatusCode::NO_CONTENT)
}

async fn toggle_comment_like(
    State(pool): State<SqlitePool>,
    headers: HeaderMap,
    Path(comment_id): Path<i64>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    let current_user = extract_current_user(&pool, &headers).await?;

    let found = sqlx::query("SELECT id FROM comments WHERE id = ?")
        .bind(comment_id)
        .fetch_optional(&pool)
        .await
        .map_err(internal_error)?;

    if found.is_none() {
        return Err((
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"detail": "Comment not found"})),
        ));
    }

    let removed = sqlx::query("DELETE FROM comment_likes WHERE comment_id = ? AND user_id = ?")
        .bind(comment_id)
        .bind(current_user.id)
        .execute(&pool)
        .await
        .map_err(internal_error)?;

    let liked = if removed.rows_affected() == 0 {
        // Nothing removed, so this press turns the like on. The unique index
        // absorbs a racing duplicate insert.
        sqlx::query(
            r#"INSERT INTO comment_likes (comment_id, user_id, created_at)
               VALUES (?, ?, ?)
               ON CONFLICT(comment_id, user_id) DO NOTHING"#,
        )
        .bind(comment_id)
        .bind(current_user.id)
        .bind(Utc::now())
        .execute(&pool)
        .await
        .map_err(internal_error)?;
        true
    } else {
        false
    };

    let likes_count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM comment_likes WHERE comment_id = ?")
            .bind(comment_id)
            .fetch_one(&pool)
            .await
            .map_err(internal_error)?;

    Ok(Json(serde_json::json!({
        "liked": liked,
        "likes_count": likes_count,
    })))
}
