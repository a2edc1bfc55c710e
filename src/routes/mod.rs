pub mod auth;
pub mod categories;
pub mod comments;
pub mod recipes;
pub mod stats;
pub mod users;

pub use auth::auth_routes;
pub use categories::categories_routes;
pub use comments::{comment_like_routes, comments_routes};
pub use recipes::{favorites_routes, recipes_routes};
pub use stats::stats_routes;
pub use users::users_routes;
