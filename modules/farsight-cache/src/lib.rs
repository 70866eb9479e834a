pub mod cache;
pub mod singleflight;

pub use cache::{Cache, CacheKey, FillToken, Lookup};
pub use singleflight::Group;
