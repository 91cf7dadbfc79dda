#[cfg(feature = "codec")]
mod codec;
mod model;

#[cfg(feature = "codec")]
pub use codec::GvNativeCodec;
pub use model::*;
