mod filter;
mod storage;
mod txt;

pub use filter::{hashable_subdomains, HashPrefixConfig, HashPrefixFilter};
pub use storage::HashStorage;
pub use txt::TxtMatcher;
