mod health;
mod landing;
mod metrics;

pub use health::health;
pub use landing::landing;
pub use metrics::metrics;
