pub mod auth;
pub mod config;
pub mod error;
pub mod lock;
pub mod models;
pub mod preview;
pub mod routes;
pub mod source;
pub mod state;
pub mod votes;
pub mod warmer;
pub mod week;

pub use preview::PreviewCache;
pub use source::ContentStore;
pub use warmer::{CacheWarmer, WarmupReport};
pub use week::CalendarWeek;
