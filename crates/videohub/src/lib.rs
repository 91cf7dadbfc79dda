#[cfg(feature = "codec")]
mod codec;
mod helpers;
mod model;
mod parser;
mod writer;

#[cfg(feature = "codec")]
pub use codec::VideohubCodec;
pub use model::*;
