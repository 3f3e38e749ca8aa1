//! notepost renderer
//!
//! Rewrites vault-flavoured markdown (metadata headers, `%%comments%%`, wiki
//! links, embeds, inline tags) into plain markdown the publishing service can
//! render, uploading local images along the way.

pub mod code;
pub mod images;
pub mod passes;
pub mod tags;
pub mod title;
pub mod transform;
pub mod utils;

pub use code::CodeRegions;
pub use images::{ImageRef, ImageUploader, find_image_refs};
pub use title::{extract_title, starts_with_h1};
pub use transform::Transformer;
