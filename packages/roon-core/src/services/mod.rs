//! Roon services built on the session's extension points.
//!
//! - [`status`]: the `status:1` service this extension provides
//! - [`transport`]: zone subscription against the core's `transport:2`
//! - [`image`]: binary image fetches from `image:1`

pub mod image;
pub mod status;
pub mod transport;

pub use image::{get_image, ImageFormat, ImageOptions, ImageScale};
pub use status::{StatusMessage, StatusService};
pub use transport::{
    subscribe_zones, DisplayLines, NowPlaying, Zone, ZoneEvent, ZoneState, ZoneTable, ZonesUpdate,
};
