pub mod chart;
pub mod index;
pub mod listing;

pub use chart::{CacheStatus, CachedChart, ChartCache, ChartRef};
pub use index::{FetchedIndex, IndexArtifact, IndexCache, IndexFetcher};
pub use listing::{ListingEntry, ListingRenderer};
