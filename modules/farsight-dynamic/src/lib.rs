pub mod adapter;
pub mod descriptor;
pub mod http;
pub mod normalise;

pub use adapter::DynamicAdapter;
pub use descriptor::{EndpointBuilder, Flavour, HealthTable, ResourceDescriptor};
pub use http::{HttpClient, HttpError, TokenSource};
pub use normalise::{external_to_item, Normaliser};
