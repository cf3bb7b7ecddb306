pub mod normalize;

pub use normalize::{normalize, EMPTY_REPLY_PLACEHOLDER};
