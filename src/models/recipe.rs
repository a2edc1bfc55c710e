use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Recipe {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub ingredients: String,
    pub steps: String,
    pub cooking_time: i64,
    pub difficulty: String,
    pub category_id: i64,
    pub image_url: Option<String>,
    pub nutritional_info: Option<String>,
    pub author_id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct RecipeQuery {
    pub category: Option<String>,
    pub difficulty: Option<String>,
    pub max_cooking_time: Option<i64>,
    pub search: Option<String>,
    pub author_id: Option<i64>,
}

/// One recipe joined with its category, author and rating aggregates.
#[derive(Debug, FromRow)]
pub struct RecipeSummaryRow {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub ingredients: String,
    pub steps: String,
    pub cooking_time: i64,
    pub difficulty: String,
    pub category: String,
    pub image_url: Option<String>,
    pub nutritional_info: Option<String>,
    pub author_id: i64,
    pub author_username: String,
    pub author_full_name: Option<String>,
    pub average_rating: f64,
    pub total_ratings: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct RecipeResponse {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub ingredients: Vec<String>,
    pub steps: Vec<String>,
    pub cooking_time: i64,
    pub difficulty: String,
    pub category: String,
    pub image_url: Option<String>,
    pub nutritional_info: Option<serde_json::Value>,
    pub author_id: i64,
    pub author_name: String,
    pub average_rating: f64,
    pub total_ratings: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    /// The viewer's own rating, only filled in on the detail endpoint.
    pub user_rating: Option<i64>,
    /// Whether the viewer favorited this recipe, only filled in on the detail endpoint.
    pub is_favorite: Option<bool>,
}

impl From<RecipeSummaryRow> for RecipeResponse {
    fn from(row: RecipeSummaryRow) -> Self {
        let author_name = row
            .author_full_name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(row.author_username);

        Self {
            id: row.id,
            title: row.title,
            description: row.description,
            ingredients: parse_string_list_json(Some(row.ingredients)),
            steps: parse_string_list_json(Some(row.steps)),
            cooking_time: row.cooking_time,
            difficulty: row.difficulty,
            category: row.category,
            image_url: row.image_url,
            nutritional_info: parse_json_value(row.nutritional_info),
            author_id: row.author_id,
            author_name,
            average_rating: row.average_rating,
            total_ratings: row.total_ratings,
            created_at: row.created_at,
            updated_at: row.updated_at,
            user_rating: None,
            is_favorite: None,
        }
    }
}

fn parse_string_list_json(raw: Option<String>) -> Vec<String> {
    raw.and_then(|json_text| serde_json::from_str::<Vec<String>>(&json_text).ok())
        .unwrap_or_default()
}

fn parse_json_value(raw: Option<String>) -> Option<serde_json::Value> {
    raw.and_then(|json_text| serde_json::from_str::<serde_json::Value>(&json_text).ok())
}
