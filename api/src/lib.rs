pub mod auth;
pub mod metrics;
pub mod schema;
pub mod seed;
