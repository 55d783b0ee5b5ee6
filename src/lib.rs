pub mod admin;
pub mod cache;
pub mod cache_manager;
pub mod config;
pub mod dns;
pub mod errcoll;
pub mod filter;
pub mod metrics;
pub mod profiledb;
pub mod psl;
pub mod refreshable;
pub mod refresher;
pub mod resolver;
