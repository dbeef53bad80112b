pub mod client;
pub mod decode;
pub mod prompts;
pub mod split;

pub use client::{ModelClient, OllamaClient};
pub use decode::{decode, decode_str};
pub use split::{split, SplitStrategy, Splitter};
