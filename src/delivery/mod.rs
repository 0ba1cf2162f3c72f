//! HTTP delivery layer: per-device webhook endpoints for clip listings,
//! range-aware clip byte delivery, and thumbnails.

pub mod handlers;
pub mod range;
pub mod server;

#[cfg(test)]
mod tests;

pub use range::{parse_range, ByteRange};
pub use server::{DeliveryServer, DeliveryServerBuilder, ServerState};
