pub mod config;
pub mod error;
pub mod ids;
pub mod normalize;
pub mod singleflight;

pub use config::AppConfig;
pub use error::AppError;
