// Constants module - centralized default values for configuration
//
// This module defines all default values used throughout the codebase.
// Using constants instead of magic numbers keeps the config layer, the
// fetcher and the codec table in agreement.

// =============================================================================
// Server defaults
// =============================================================================

/// Default bind address
pub const DEFAULT_ADDRESS: &str = "0.0.0.0";

/// Default listen port
pub const DEFAULT_PORT: u16 = 80;

/// Default number of worker threads
pub const DEFAULT_THREADS: usize = 4;

// =============================================================================
// Origin defaults
// =============================================================================

/// Default maximum origin response size (3 MiB)
pub const DEFAULT_MAX_ORIGIN_BYTES: u64 = 3 * 1024 * 1024;

/// Default origin connect/stall timeout in milliseconds
pub const DEFAULT_ORIGIN_TIMEOUT_MS: u64 = 10_000;

/// User agent sent to origins
pub const DEFAULT_USER_AGENT: &str = concat!("imgsrv/", env!("CARGO_PKG_VERSION"));

// =============================================================================
// Request parameter defaults
// =============================================================================

/// Width used when `w` is missing or unparseable
pub const DEFAULT_WIDTH: u32 = 500;

/// Smallest accepted target width
pub const MIN_WIDTH: u32 = 2;

/// Largest accepted target width
pub const MAX_WIDTH: u32 = 2400;

// =============================================================================
// Codec defaults
// =============================================================================

/// Default per-invocation codec timeout in milliseconds (0 disables)
pub const DEFAULT_CODEC_TIMEOUT_MS: u64 = 30_000;

/// pngquant quality range
pub const PNG_QUALITY_RANGE: &str = "65-80";

/// jpegoptim maximum quality
pub const JPEG_QUALITY: u8 = 80;

/// cwebp quality
pub const WEBP_QUALITY: u8 = 80;

/// ImageMagick jp2 rate
pub const JP2_RATE: u32 = 32;

/// JxrEncApp quality
pub const JXR_QUALITY: &str = "0.4";

// =============================================================================
// Delivery defaults
// =============================================================================

/// Cache lifetime for optimized images (~1 year)
pub const CACHE_MAX_AGE_SECS: u64 = 31_449_600;

/// Chunk size used when streaming the winning file to the client
pub const DELIVERY_CHUNK_SIZE: usize = 64 * 1024;

// =============================================================================
// Misc defaults
// =============================================================================

/// Default temp working directory
pub const DEFAULT_TEMP_DIR: &str = "./tmp";

/// Default source tag for request logs
pub const DEFAULT_SOURCE_NAME: &str = "imgsrv";
