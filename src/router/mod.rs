//! Router Module
//!
//! Decides which API key serves each outbound request and tracks key health.

pub mod clock;
pub mod key_manager;
pub mod rate_limit;

pub use clock::{Clock, ManualClock, SystemClock};
pub use key_manager::{
    mask_credential, KeyHandle, KeyManager, KeySnapshot, KeyState, KeyStats, Lease,
};
pub use rate_limit::{is_rate_limit_response, looks_like_rate_limit_error};
