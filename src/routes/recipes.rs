use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
};
use chrono::Utc;
use sqlx::SqlitePool;

use crate::models::{RateRecipe, RatingSummary, Recipe, RecipeQuery, RecipeResponse, RecipeSummaryRow};
use crate::routes::auth::{extract_current_user, extract_optional_user};
use crate::storage;

const DIFFICULTY_LEVELS: [&str; 3] = ["Easy", "Medium", "Hard"];
const MAX_RECIPES_PER_USER: i64 = 5;

pub(crate) const RECIPE_SUMMARY_FIELDS: &str = r#"
    r.id, r.title, r.description, r.ingredients, r.steps,
    r.cooking_time, r.difficulty,
    c.name AS category,
    r.image_url, r.nutritional_info,
    r.author_id,
    u.username AS author_username,
    u.full_name AS author_full_name,
    ROUND(COALESCE(AVG(rt.rating), 0.0), 1) AS average_rating,
    COUNT(rt.id) AS total_ratings,
    r.created_at, r.updated_at"#;

pub(crate) const RECIPE_SUMMARY_JOINS: &str = r#"
    FROM recipes r
    JOIN categories c ON c.id = r.category_id
    JOIN users u ON u.id = r.author_id
    LEFT JOIN ratings rt ON rt.recipe_id = r.id"#;

pub fn recipes_routes() -> Router<SqlitePool> {
    Router::new()
        .route("/", get(list_recipes).post(create_recipe))
        .route(
            "/{recipe_id}",
            get(get_recipe).put(update_recipe).delete(delete_recipe),
        )
        .route("/{recipe_id}/rating", get(get_my_rating).put(rate_recipe))
        .route("/{recipe_id}/favorite", post(toggle_favorite))
        // The default axum body cap is 2 MB, below the image limit.
        .layer(DefaultBodyLimit::max(10 * 1024 * 1024))
}

pub fn favorites_routes() -> Router<SqlitePool> {
    Router::new().route("/", get(list_favorites))
}

fn internal_error<E: ToString>(error: E) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({"detail": error.to_string()})),
    )
}

fn bad_request(message: &str) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({"detail": message})),
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

async fn fetch_recipe_summary(
    pool: &SqlitePool,
    recipe_id: i64,
) -> Result<Option<RecipeSummaryRow>, sqlx::Error> {
    let sql = format!(
        "SELECT {RECIPE_SUMMARY_FIELDS} {RECIPE_SUMMARY_JOINS} WHERE r.id = ? GROUP BY r.id"
    );
    sqlx::query_as::<_, RecipeSummaryRow>(&sql)
        .bind(recipe_id)
        .fetch_optional(pool)
        .await
}

async fn list_recipes(
    State(pool): State<SqlitePool>,
    Query(query): Query<RecipeQuery>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    let mut builder = sqlx::QueryBuilder::<sqlx::Sqlite>::new(format!(
        "SELECT {RECIPE_SUMMARY_FIELDS} {RECIPE_SUMMARY_JOINS} WHERE 1=1"
    ));

    if let Some(category) = query
        .category
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        builder.push(" AND c.name = ");
        builder.push_bind(category.to_string());
    }

    if let Some(difficulty) = query
        .difficulty
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        builder.push(" AND r.difficulty = ");
        builder.push_bind(difficulty.to_string());
    }

    if let Some(max_cooking_time) = query.max_cooking_time {
        builder.push(" AND r.cooking_time <= ");
        builder.push_bind(max_cooking_time);
    }

    if let Some(search) = query
        .search
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        let pattern = format!("%{}%", search);
        builder.push(" AND (r.title LIKE ");
        builder.push_bind(pattern.clone());
        builder.push(" OR r.description LIKE ");
        builder.push_bind(pattern);
        builder.push(")");
    }

    if let Some(author_id) = query.author_id {
        builder.push(" AND r.author_id = ");
        builder.push_bind(author_id);
    }

    builder.push(" GROUP BY r.id ORDER BY r.created_at DESC, r.id DESC");

    let rows = builder
        .build_query_as::<RecipeSummaryRow>()
        .fetch_all(&pool)
        .await
        .map_err(internal_error)?;

    let recipes: Vec<RecipeResponse> = rows.into_iter().map(RecipeResponse::from).collect();
    Ok(Json(recipes))
}

async fn get_recipe(
    State(pool): State<SqlitePool>,
    headers: HeaderMap,
    Path(recipe_id): Path<i64>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    let row = fetch_recipe_summary(&pool, recipe_id)
        .await
        .map_err(internal_error)?
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({"detail": "Recipe not found"})),
            )
        })?;

    let mut response = RecipeResponse::from(row);

    if let Some(viewer) = extract_optional_user(&pool, &headers).await? {
        response.user_rating =
            sqlx::query_scalar("SELECT rating FROM ratings WHERE recipe_id = ? AND user_id = ?")
                .bind(recipe_id)
                .bind(viewer.id)
                .fetch_optional(&pool)
                .await
                .map_err(internal_error)?;

        let favorite = sqlx::query("SELECT id FROM favorites WHERE recipe_id = ? AND user_id = ?")
            .bind(recipe_id)
            .bind(viewer.id)
            .fetch_optional(&pool)
            .await
            .map_err(internal_error)?;
        response.is_favorite = Some(favorite.is_some());
    }

    Ok(Json(response))
}

/// The multipart fields of a create or update request, collected as sent.
#[derive(Debug, Default)]
struct RecipeForm {
    title: Option<String>,
    description: Option<String>,
    category: Option<String>,
    difficulty: Option<String>,
    cooking_time: Option<String>,
    ingredients: Option<String>,
    steps: Option<String>,
    nutritional_info: Option<String>,
    image_url: Option<String>,
}

async fn collect_recipe_form(
    mut multipart: Multipart,
) -> Result<RecipeForm, (StatusCode, Json<serde_json::Value>)> {
    let mut form = RecipeForm::default();

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"detail": e.to_string()})),
        )
    })? {
        let name = field.name().unwrap_or_default().to_string();

        match name.as_str() {
            "title" => form.title = Some(field_text(field).await?),
            "description" => form.description = Some(field_text(field).await?),
            "category" => form.category = Some(field_text(field).await?),
            "difficulty" => form.difficulty = Some(field_text(field).await?),
            "cooking_time" => form.cooking_time = Some(field_text(field).await?),
            "ingredients" => form.ingredients = Some(field_text(field).await?),
            "steps" => form.steps = Some(field_text(field).await?),
            "nutritional_info" => form.nutritional_info = Some(field_text(field).await?),
            "image" => {
                let Some(original_name) = field.file_name().map(ToString::to_string) else {
                    continue;
                };
                let data = field.bytes().await.map_err(|e| {
                    (
                        StatusCode::BAD_REQUEST,
                        Json(serde_json::json!({"detail": e.to_string()})),
                    )
                })?;

                // A bad image never blocks the recipe itself.
                match storage::save_image(&original_name, &data).await {
                    Ok(url) => form.image_url = Some(url),
                    Err(e) => {
                        tracing::warn!("Image upload failed, continuing without image: {}", e);
                    }
                }
            }
            _ => {}
        }
    }

    Ok(form)
}

async fn field_text(
    field: axum::extract::multipart::Field<'_>,
) -> Result<String, (StatusCode, Json<serde_json::Value>)> {
    field.text().await.map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"detail": e.to_string()})),
        )
    })
}

fn parse_list_field(raw: &str) -> Vec<String> {
    serde_json::from_str::<Vec<String>>(raw)
        .unwrap_or_default()
        .into_iter()
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

/// Removes an image saved for a request that is being rejected.
async fn discard_image(form: &RecipeForm) {
    if let Some(url) = form.image_url.as_deref() {
        storage::remove_image(url).await;
    }
}

async fn resolve_category_id(
    pool: &SqlitePool,
    name: &str,
) -> Result<Option<i64>, sqlx::Error> {
    sqlx::query_scalar("SELECT id FROM categories WHERE name = ?")
        .bind(name)
        .fetch_optional(pool)
        .await
}

async fn create_recipe(
    State(pool): State<SqlitePool>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    let current_user = extract_current_user(&pool, &headers).await?;

    let recipe_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM recipes WHERE author_id = ?")
        .bind(current_user.id)
        .fetch_one(&pool)
        .await
        .map_err(internal_error)?;

    if recipe_count >= MAX_RECIPES_PER_USER {
        return Err(bad_request(
            "You've reached the maximum limit of 5 recipes",
        ));
    }

    let form = collect_recipe_form(multipart).await?;

    let title = form.title.as_deref().unwrap_or("").trim().to_string();
    if title.is_empty() {
        discard_image(&form).await;
        return Err(bad_request("Title is required"));
    }

    let description = form.description.as_deref().unwrap_or("").trim().to_string();
    if description.is_empty() {
        discard_image(&form).await;
        return Err(bad_request("Description is required"));
    }

    let category_name = form.category.as_deref().unwrap_or("").trim().to_string();
    if category_name.is_empty() {
        discard_image(&form).await;
        return Err(bad_request("Please select a category"));
    }
    let category_id = match resolve_category_id(&pool, &category_name).await {
        Ok(Some(id)) => id,
        Ok(None) => {
            discard_image(&form).await;
            return Err(bad_request("Unknown category"));
        }
        Err(e) => {
            discard_image(&form).await;
            return Err(internal_error(e));
        }
    };

    let ingredients = parse_list_field(form.ingredients.as_deref().unwrap_or(""));
    if ingredients.is_empty() {
        discard_image(&form).await;
        return Err(bad_request("At least one ingredient is required"));
    }

    let steps = parse_list_field(form.steps.as_deref().unwrap_or(""));
    if steps.is_empty() {
        discard_image(&form).await;
        return Err(bad_request("At least one step is required"));
    }

    let difficulty = form.difficulty.as_deref().unwrap_or("").trim().to_string();
    if !DIFFICULTY_LEVELS.contains(&difficulty.as_str()) {
        discard_image(&form).await;
        return Err(bad_request("Difficulty must be one of Easy, Medium or Hard"));
    }

    let cooking_time: i64 = form
        .cooking_time
        .as_deref()
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(0);
    if cooking_time <= 0 {
        discard_image(&form).await;
        return Err(bad_request("Cooking time must be greater than 0"));
    }

    let ingredients_json = serde_json::to_string(&ingredients).map_err(internal_error)?;
    let steps_json = serde_json::to_string(&steps).map_err(internal_error)?;
    let nutritional_info = form
        .nutritional_info
        .as_deref()
        .map(str::trim)
        .filter(|raw| !raw.is_empty())
        .and_then(|raw| serde_json::from_str::<serde_json::Value>(raw).ok())
        .map(|value| value.to_string());

    let now = Utc::now();
    let result = sqlx::query(
        r#"INSERT INTO recipes
           (title, description, ingredients, steps, cooking_time, difficulty, category_id, image_url, nutritional_info, author_id, created_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(&title)
    .bind(&description)
    .bind(&ingredients_json)
    .bind(&steps_json)
    .bind(cooking_time)
    .bind(&difficulty)
    .bind(category_id)
    .bind(&form.image_url)
    .bind(&nutritional_info)
    .bind(current_user.id)
    .bind(now)
    .execute(&pool)
    .await
    .map_err(internal_error)?;

    let recipe_id = result.last_insert_rowid();
    let row = fetch_recipe_summary(&pool, recipe_id)
        .await
        .map_err(internal_error)?
        .ok_or_else(|| internal_error("Recipe missing after insert"))?;

    Ok((StatusCode::CREATED, Json(RecipeResponse::from(row))))
}

async fn update_recipe(
    State(pool): State<SqlitePool>,
    headers: HeaderMap,
    Path(recipe_id): Path<i64>,
    multipart: Multipart,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    let current_user = extract_current_user(&pool, &headers).await?;

    let existing = sqlx::query_as::<_, Recipe>("SELECT * FROM recipes WHERE id = ?")
        .bind(recipe_id)
        .fetch_optional(&pool)
        .await
        .map_err(internal_error)?
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({"detail": "Recipe not found"})),
            )
        })?;

    if existing.author_id != current_user.id {
        return Err((
            StatusCode::FORBIDDEN,
            Json(serde_json::json!({"detail": "Not authorized to update this recipe"})),
        ));
    }

    let form = collect_recipe_form(multipart).await?;

    // Fields the caller omitted keep their stored values.
    let title = form
        .title
        .as_deref()
        .map(str::trim)
        .map(ToString::to_string)
        .unwrap_or(existing.title);
    if title.is_empty() {
        discard_image(&form).await;
        return Err(bad_request("Title is required"));
    }

    let description = form
        .description
        .as_deref()
        .map(str::trim)
        .map(ToString::to_string)
        .unwrap_or(existing.description);
    if description.is_empty() {
        discard_image(&form).await;
        return Err(bad_request("Description is required"));
    }

    let category_id = match form.category.as_deref().map(str::trim) {
        Some("") => {
            discard_image(&form).await;
            return Err(bad_request("Please select a category"));
        }
        Some(name) => match resolve_category_id(&pool, name).await {
            Ok(Some(id)) => id,
            Ok(None) => {
                discard_image(&form).await;
                return Err(bad_request("Unknown category"));
            }
            Err(e) => {
                discard_image(&form).await;
                return Err(internal_error(e));
            }
        },
        None => existing.category_id,
    };

    let ingredients_json = match form.ingredients.as_deref() {
        Some(raw) => {
            let ingredients = parse_list_field(raw);
            if ingredients.is_empty() {
                discard_image(&form).await;
                return Err(bad_request("At least one ingredient is required"));
            }
            serde_json::to_string(&ingredients).map_err(internal_error)?
        }
        None => existing.ingredients,
    };

    let steps_json = match form.steps.as_deref() {
        Some(raw) => {
            let steps = parse_list_field(raw);
            if steps.is_empty() {
                discard_image(&form).await;
                return Err(bad_request("At least one step is required"));
            }
            serde_json::to_string(&steps).map_err(internal_error)?
        }
        None => existing.steps,
    };

    let difficulty = form
        .difficulty
        .as_deref()
        .map(str::trim)
        .map(ToString::to_string)
        .unwrap_or(existing.difficulty);
    if !DIFFICULTY_LEVELS.contains(&difficulty.as_str()) {
        discard_image(&form).await;
        return Err(bad_request("Difficulty must be one of Easy, Medium or Hard"));
    }

    let cooking_time = match form.cooking_time.as_deref() {
        Some(raw) => raw.trim().parse::<i64>().unwrap_or(0),
        None => existing.cooking_time,
    };
    if cooking_time <= 0 {
        discard_image(&form).await;
        return Err(bad_request("Cooking time must be greater than 0"));
    }

    let nutritional_info = match form.nutritional_info.as_deref().map(str::trim) {
        Some("") => None,
        Some(raw) => serde_json::from_str::<serde_json::Value>(raw)
            .ok()
            .map(|value| value.to_string()),
        None => existing.nutritional_info,
    };

    let image_url = form.image_url.clone().or(existing.image_url.clone());

    sqlx::query(
        r#"UPDATE recipes
           SET title = ?, description = ?, ingredients = ?, steps = ?, cooking_time = ?,
               difficulty = ?, category_id = ?, image_url = ?, nutritional_info = ?, updated_at = ?
           WHERE id = ?"#,
    )
    .bind(&title)
    .bind(&description)
    .bind(&ingredients_json)
    .bind(&steps_json)
    .bind(cooking_time)
    .bind(&difficulty)
    .bind(category_id)
    .bind(&image_url)
    .bind(&nutritional_info)
    .bind(Utc::now())
    .bind(recipe_id)
    .execute(&pool)
    .await
    .map_err(internal_error)?;

    // A replaced image leaves its old file behind; drop it now.
    if form.image_url.is_some() {
        if let Some(old_url) = existing.image_url.as_deref() {
            storage::remove_image(old_url).await;
        }
    }

    let row = fetch_recipe_summary(&pool, recipe_id)
        .await
        .map_err(internal_error)?
        .ok_or_else(|| internal_error("Recipe missing after update"))?;

    Ok(Json(RecipeResponse::from(row)))
}

async fn delete_recipe(
    State(pool): State<SqlitePool>,
    headers: HeaderMap,
    Path(recipe_id): Path<i64>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    let current_user = extract_current_user(&pool, &headers).await?;

    let recipe = sqlx::query_as::<_, Recipe>("SELECT * FROM recipes WHERE id = ?")
        .bind(recipe_id)
        .fetch_optional(&pool)
        .await
        .map_err(internal_error)?
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({"detail": "Recipe not found"})),
            )
        })?;

    if recipe.author_id != current_user.id {
        return Err((
            StatusCode::FORBIDDEN,
            Json(serde_json::json!({"detail": "Not authorized to delete this recipe"})),
        ));
    }

    if let Some(image_url) = recipe.image_url.as_deref() {
        storage::remove_image(image_url).await;
    }

    // Ratings, favorites, comments and their likes follow via CASCADE.
    sqlx::query("DELETE FROM recipes WHERE id = ?")
        .bind(recipe_id)
        .execute(&pool)
        .await
        .map_err(internal_error)?;

    Ok(Json(serde_json::json!({"message": "Recipe deleted successfully"})))
}

async fn rate_recipe(
    State(pool): State<SqlitePool>,
    headers: HeaderMap,
    Path(recipe_id): Path<i64>,
    Json(input): Json<RateRecipe>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    let current_user = extract_current_user(&pool, &headers).await?;
    ensure_recipe_exists(&pool, recipe_id).await?;

    if !(1..=5).contains(&input.rating) {
        return Err(bad_request("Rating must be between 1 and 5"));
    }

    let now = Utc::now();
    sqlx::query(
        r#"INSERT INTO ratings (recipe_id, user_id, rating, created_at, updated_at)
           VALUES (?, ?, ?, ?, ?)
           ON CONFLICT(recipe_id, user_id) DO UPDATE SET rating = excluded.rating, updated_at = excluded.updated_at"#,
    )
    .bind(recipe_id)
    .bind(current_user.id)
    .bind(input.rating)
    .bind(now)
    .bind(now)
    .execute(&pool)
    .await
    .map_err(internal_error)?;

    let (average_rating, total_ratings): (f64, i64) = sqlx::query_as(
        "SELECT ROUND(COALESCE(AVG(rating), 0.0), 1), COUNT(id) FROM ratings WHERE recipe_id = ?",
    )
    .bind(recipe_id)
    .fetch_one(&pool)
    .await
    .map_err(internal_error)?;

    Ok(Json(RatingSummary {
        average_rating,
        total_ratings,
        user_rating: input.rating,
    }))
}

async fn get_my_rating(
    State(pool): State<SqlitePool>,
    headers: HeaderMap,
    Path(recipe_id): Path<i64>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    let current_user = extract_current_user(&pool, &headers).await?;
    ensure_recipe_exists(&pool, recipe_id).await?;

    let rating: Option<i64> =
        sqlx::query_scalar("SELECT rating FROM ratings WHERE recipe_id = ? AND user_id = ?")
            .bind(recipe_id)
            .bind(current_user.id)
            .fetch_optional(&pool)
            .await
            .map_err(internal_error)?;

    Ok(Json(serde_json::json!({"rating": rating})))
}

async fn toggle_favorite(
    State(pool): State<SqlitePool>,
    headers: HeaderMap,
    Path(recipe_id): Path<i64>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    let current_user = extract_current_user(&pool, &headers).await?;
    ensure_recipe_exists(&pool, recipe_id).await?;

    let removed = sqlx::query("DELETE FROM favorites WHERE recipe_id = ? AND user_id = ?")
        .bind(recipe_id)
        .bind(current_user.id)
        .execute(&pool)
        .await
        .map_err(internal_error)?;

    let is_favorite = if removed.rows_affected() == 0 {
        sqlx::query(
            r#"INSERT INTO favorites (recipe_id, user_id, created_at)
               VALUES (?, ?, ?)
               ON CONFLICT(recipe_id, user_id) DO NOTHING"#,
        )
        .bind(recipe_id)
        .bind(current_user.id)
        .bind(Utc::now())
        .execute(&pool)
        .await
        .map_err(internal_error)?;
        true
    } else {
        false
    };

    Ok(Json(serde_json::json!({"is_favorite": is_favorite})))
}

async fn list_favorites(
    State(pool): State<SqlitePool>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    let current_user = extract_current_user(&pool, &headers).await?;

    let sql = format!(
        r#"SELECT {RECIPE_SUMMARY_FIELDS} {RECIPE_SUMMARY_JOINS}
           JOIN favorites f ON f.recipe_id = r.id
           WHERE f.user_id = ?
           GROUP BY r.id
           ORDER BY f.created_at DESC, r.id DESC"#
    );

    let rows = sqlx::query_as::<_, RecipeSummaryRow>(&sql)
        .bind(current_user.id)
        .fetch_all(&pool)
        .await
        .map_err(internal_error)?;

    let recipes: Vec<RecipeResponse> = rows.into_iter().map(RecipeResponse::from).collect();
    Ok(Json(recipes))
}
