pub mod catalog;
pub mod handwritten;
pub mod init;
pub mod probe;
pub mod projects;

pub use init::{initialize_with_retry, InitDeps};
