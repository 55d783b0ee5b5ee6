use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
};

use crate::dns::RecordType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey(u64);

impl CacheKey {
    pub fn new(host: &str, qtype: RecordType, qclass: u16, partial: bool) -> Self {
        let mut h = DefaultHasher::new();
        for b in host.bytes() {
            h.write_u8(b.to_ascii_lowercase());
        }
        h.write_u8(0);
        qtype.0.hash(&mut h);
        qclass.hash(&mut h);
        partial.hash(&mut h);
        Self(h.finish())
    }
}
