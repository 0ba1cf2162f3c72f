pub mod catalog;
pub mod config;
pub mod decoder;
pub mod delivery;
pub mod error;
pub mod registry;
pub mod remote;
pub mod scanner;
pub mod thumbnails;
pub mod windows;

pub use catalog::{ClipCatalog, ClipResources, ClipUrlBuilder, EndpointUrls, VideoClip};
pub use config::{CacheConfig, ClipserveConfig, DeviceConfig, ServerConfig, SourceKind};
pub use decoder::{decode_filename, DecodedRecording, DeviceFamily};
pub use delivery::{DeliveryServer, DeliveryServerBuilder};
pub use error::{ClipserveError, Result};
pub use registry::{ClipSource, DeviceHandler, DeviceRegistry};
pub use remote::RemoteSearchSource;
pub use scanner::FilesystemScanSource;
pub use thumbnails::{FfmpegExtractor, FrameExtractor, MediaSource, ThumbnailCache};
pub use windows::{split_into_days, SearchWindow};
