mod model;
mod projection;

pub use model::*;
pub use projection::*;
