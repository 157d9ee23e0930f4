//! API implementation submodules.
//!
//! Each submodule contains `impl AssetDelivery` blocks that extend the public
//! API with one area of functionality. The struct definition remains in
//! `lib.rs`.

mod assets;
mod builder;
mod migration;
mod monitoring;

pub use builder::AssetDeliveryBuilder;
