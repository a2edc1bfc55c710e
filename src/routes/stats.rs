use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use sqlx::SqlitePool;

pub fn stats_routes() -> Router<SqlitePool> {
    Router::new().route("/", get(get_stats))
}

fn internal_error<E: ToString>(error: E) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({"detail": error.to_string()})),
    )
}

/// Site-wide counters, recomputed on every request.
async fn get_stats(
    State(pool): State<SqlitePool>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    let total_recipes: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM recipes")
        .fetch_one(&pool)
        .await
        .map_err(internal_error)?;

    let total_users: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
        .fetch_one(&pool)
        .await
        .map_err(internal_error)?;

    let total_ratings: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM ratings")
        .fetch_one(&pool)
        .await
        .map_err(internal_error)?;

    let total_categories: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM categories")
        .fetch_one(&pool)
        .await
        .map_err(internal_error)?;

    let avg_cooking_time: f64 =
        sqlx::query_scalar("SELECT COALESCE(AVG(cooking_time), 0.0) FROM recipes")
            .fetch_one(&pool)
            .await
            .map_err(internal_error)?;

    Ok(Json(serde_json::json!({
        "total_recipes": total_recipes,
        "total_users": total_users,
        "total_ratings": total_ratings,
        "total_categories": total_categories,
        "avg_cooking_time": avg_cooking_time.round() as i64,
    })))
}
