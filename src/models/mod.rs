pub mod category;
pub mod comment;
pub mod rating;
pub mod recipe;
pub mod user;

pub use category::*;
pub use comment::*;
pub use rating::*;
pub use recipe::*;
pub use user::*;
