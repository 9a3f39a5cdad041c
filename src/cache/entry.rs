/// A cached value with its insertion and expiry stamps (clock milliseconds)
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub data: T,
    pub inserted_at_ms: u64,
    pub expires_at_ms: u64,
    /// Global insertion sequence; the smallest is evicted first
    pub(crate) seq: u64,
}

impl<T> CacheEntry<T> {
    /// Fresh strictly before the expiry stamp
    pub fn is_fresh(&self, now_ms: u64) -> bool {
        now_ms < self.expires_at_ms
    }

    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.inserted_at_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_freshness_boundary_is_exclusive() {
        let entry = CacheEntry {
            data: 1,
            inserted_at_ms: 0,
            expires_at_ms: 100,
            seq: 0,
        };
        assert!(entry.is_fresh(99));
        assert!(!entry.is_fresh(100));
        assert!(!entry.is_fresh(101));
        assert_eq!(entry.age_ms(40), 40);
    }
}
