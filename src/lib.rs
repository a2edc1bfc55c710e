pub mod comment_tree;
pub mod db;
pub mod models;
pub mod routes;
pub mod storage;

use axum::{Router, response::IntoResponse, routing::get};
use sqlx::SqlitePool;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};

use routes::{
    auth_routes, categories_routes, comment_like_routes, comments_routes, favorites_routes,
    recipes_routes, stats_routes, users_routes,
};

/// Builds the full application router around one database pool.
pub fn app(pool: SqlitePool) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .nest("/api/auth", auth_routes())
        .nest("/api/users", users_routes())
        .nest("/api/recipes", recipes_routes())
        .nest("/api/recipes", comments_routes())
        .nest("/api/comments", comment_like_routes())
        .nest("/api/favorites", favorites_routes())
        .nest("/api/categories", categories_routes())
        .nest("/api/stats", stats_routes())
        .route("/api/health", get(health_check));

    Router::new()
        .merge(api_routes)
        .nest_service("/uploads", ServeDir::new(storage::UPLOAD_DIR))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(pool)
}

async fn health_check() -> impl IntoResponse {
    axum::Json(serde_json::json!({"status": "healthy"}))
}
