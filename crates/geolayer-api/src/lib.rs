// geolayer-api: Retrying, cache-aware GeoJSON fetch layer with a streaming parser

pub mod error;
pub mod fetch;
pub mod geojson;
pub mod parser;
pub mod response_cache;
pub mod transport;

pub use error::Error;
pub use fetch::{FetchOptions, FetchStats, RetryPolicy, RetryingFetcher, backoff_delay};
pub use geojson::{Feature, FeatureCollection, Geometry, Position, Ring};
pub use parser::{StreamingFeatureParser, parse_stream};
pub use response_cache::{DiskResponseStore, MemoryResponseStore, ResponseStore};
pub use transport::TransportConfig;
