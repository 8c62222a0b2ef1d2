//! Origin handling: which upstream image sources are trusted, and how their
//! bytes are pulled onto local disk.

pub mod allowlist;
pub mod fetcher;

pub use allowlist::{OriginAllowList, WhitelistEntry};
pub use fetcher::{image_extension, FetchedOriginal, OriginFetcher};
