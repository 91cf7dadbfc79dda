#[cfg(feature = "codec")]
mod codec;
mod frame;
mod model;

#[cfg(feature = "codec")]
pub use codec::Swp08Codec;
pub use frame::{FrameError, RawFrame};
pub use model::*;
