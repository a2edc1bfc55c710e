use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct RateRecipe {
    pub rating: i64,
}

#[derive(Debug, Serialize)]
pub struct RatingSummary {
    pub average_rating: f64,
    pub total_ratings: i64,
    pub user_rating: i64,
}
