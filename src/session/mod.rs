pub mod cache;
pub mod store;

pub use cache::SessionCache;
pub use store::{ByteStore, FileByteStore, JsonSeriesStore, MemoryByteStore, SeriesStore};
