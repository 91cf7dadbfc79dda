mod videohub;

pub use videohub::{BridgeStatus, VideohubBridge};
