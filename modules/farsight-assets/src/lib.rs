pub mod adapter;
pub mod family;
pub mod loader;

pub use adapter::AssetBackedAdapter;
pub use family::AssetFamily;
pub use loader::AssetLoader;
