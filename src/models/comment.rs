use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Comment {
    pub id: i64,
    pub recipe_id: i64,
    pub author_id: i64,
    pub parent_id: Option<i64>,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// A single like row, keyed on (comment, user).
#[derive(Debug, Clone, FromRow)]
pub struct CommentLike {
    pub comment_id: i64,
    pub user_id: i64,
}

/// The profile fields needed to label a comment's author.
#[derive(Debug, Clone, FromRow)]
pub struct CommentAuthor {
    pub id: i64,
    pub full_name: Option<String>,
    pub email: String,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateComment {
    pub content: String,
    pub parent_id: Option<i64>,
}
