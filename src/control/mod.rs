// Frontend control surface: directive recognition and per-query driving.

pub mod user_query;
pub mod user_query_type;

pub use user_query::{QueryDriver, QueryOutcome};
pub use user_query_type::UserQueryKind;
