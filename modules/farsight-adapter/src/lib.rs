pub mod adapter;
pub mod linker;
pub mod metadata;
pub mod stream;

pub use adapter::{Adapter, AdapterHandle, ListableAdapter, SearchableAdapter};
pub use linker::{BlastRegistry, LinkSpec, Linker};
pub use metadata::{AdapterMetadata, TerraformMapping};
pub use stream::{collect_stream, ItemSink, StreamEvent};
