pub mod handlers;
pub mod routes;
pub mod visits;

pub use handlers::{AnalyticsInfo, AppState};
pub use routes::create_router;
