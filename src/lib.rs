//! unimatrix — two broadcast routers presented as one virtual matrix.
//!
//! A pool of tie-line cables between the routers is allocated, shared
//! and released transparently whenever a route crosses them.

pub mod backend;
pub mod frontend;
pub mod matrix;
pub mod orchestrator;
pub mod settings;
pub mod tieline;
