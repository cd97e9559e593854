pub mod message;
pub mod normalize;

pub use message::{SseMessage, TokenUsage};
pub use normalize::normalize_payload;
