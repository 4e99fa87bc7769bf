//! # Cache
//!
//! The generic bounded LRU ([`lru::LruCache`]) and the token-aware wrapper
//! built on top of it ([`token_cache::TokenCache`]), per §4.2/§4.3.

pub mod lru;
pub mod token_cache;

pub use lru::LruCache;
pub use token_cache::{SharedTokenCache, TokenCache};
