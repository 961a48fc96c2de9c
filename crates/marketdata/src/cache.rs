//! Fingerprinted cache over rates, marks, depth and the funding schedule.

use exchange_core::StreamEvent;
use model::{DepthLevel, InstrumentSnapshot};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::HashMap;

/// What a cache entry describes. Together with the symbol this forms the
/// entry's fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Kind {
    FundingRate,
    MarkPrice,
    SpotPrice,
    NextFundingTime,
    Volume24h,
    BookTicker,
    Depth { is_spot: bool },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Fingerprint {
    symbol: String,
    kind: Kind,
}

impl Fingerprint {
    fn new(symbol: &str, kind: Kind) -> Self {
        Self {
            symbol: symbol.to_string(),
            kind,
        }
    }
}

#[derive(Debug, Clone)]
enum Value {
    Price(Decimal),
    Time(i64),
    BidAsk(Decimal, Decimal),
    Depth(Vec<DepthLevel>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    written_at_ms: i64,
}

/// Point-in-time cache occupancy.
#[derive(Debug, Clone, Copy)]
pub struct CacheStats {
    pub entries: usize,
    pub stale_entries: usize,
}

/// Per-symbol market data store with staleness tracking.
pub struct MarketDataCache {
    ttl_ms: i64,
    entries: RwLock<HashMap<Fingerprint, Entry>>,
}

impl MarketDataCache {
    /// Create a cache whose entries go stale after `ttl_ms`.
    pub fn new(ttl_ms: i64) -> Self {
        Self {
            ttl_ms,
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn put(&self, symbol: &str, kind: Kind, value: Value, now_ms: i64) {
        self.entries.write().insert(
            Fingerprint::new(symbol, kind),
            Entry {
                value,
                written_at_ms: now_ms,
            },
        );
    }

    fn get(&self, symbol: &str, kind: Kind, now_ms: i64) -> Option<Value> {
        let entries = self.entries.read();
        let entry = entries.get(&Fingerprint::new(symbol, kind))?;
        if now_ms - entry.written_at_ms > self.ttl_ms {
            return None;
        }
        Some(entry.value.clone())
    }

    pub fn put_funding_rate(&self, symbol: &str, rate: Decimal, now_ms: i64) {
        self.put(symbol, Kind::FundingRate, Value::Price(rate), now_ms);
    }

    pub fn funding_rate(&self, symbol: &str, now_ms: i64) -> Option<Decimal> {
        match self.get(symbol, Kind::FundingRate, now_ms)? {
            Value::Price(p) => Some(p),
            _ => None,
        }
    }

    pub fn put_mark_price(&self, symbol: &str, price: Decimal, now_ms: i64) {
        self.put(symbol, Kind::MarkPrice, Value::Price(price), now_ms);
    }

    pub fn mark_price(&self, symbol: &str, now_ms: i64) -> Option<Decimal> {
        match self.get(symbol, Kind::MarkPrice, now_ms)? {
            Value::Price(p) => Some(p),
            _ => None,
        }
    }

    pub fn put_spot_price(&self, symbol: &str, price: Decimal, now_ms: i64) {
        self.put(symbol, Kind::SpotPrice, Value::Price(price), now_ms);
    }

    pub fn spot_price(&self, symbol: &str, now_ms: i64) -> Option<Decimal> {
        match self.get(symbol, Kind::SpotPrice, now_ms)? {
            Value::Price(p) => Some(p),
            _ => None,
        }
    }

    pub fn put_next_funding_time(&self, symbol: &str, time_ms: i64, now_ms: i64) {
        self.put(symbol, Kind::NextFundingTime, Value::Time(time_ms), now_ms);
    }

    pub fn next_funding_time(&self, symbol: &str, now_ms: i64) -> Option<i64> {
        match self.get(symbol, Kind::NextFundingTime, now_ms)? {
            Value::Time(t) => Some(t),
            _ => None,
        }
    }

    pub fn put_volume_24h(&self, symbol: &str, volume: Decimal, now_ms: i64) {
        self.put(symbol, Kind::Volume24h, Value::Price(volume), now_ms);
    }

    pub fn volume_24h(&self, symbol: &str, now_ms: i64) -> Option<Decimal> {
        match self.get(symbol, Kind::Volume24h, now_ms)? {
            Value::Price(p) => Some(p),
            _ => None,
        }
    }

    pub fn put_best_bid_ask(&self, symbol: &str, bid: Decimal, ask: Decimal, now_ms: i64) {
        self.put(symbol, Kind::BookTicker, Value::BidAsk(bid, ask), now_ms);
    }

    pub fn best_bid_ask(&self, symbol: &str, now_ms: i64) -> Option<(Decimal, Decimal)> {
        match self.get(symbol, Kind::BookTicker, now_ms)? {
            Value::BidAsk(b, a) => Some((b, a)),
            _ => None,
        }
    }

    pub fn put_depth(&self, symbol: &str, is_spot: bool, levels: Vec<DepthLevel>, now_ms: i64) {
        self.put(symbol, Kind::Depth { is_spot }, Value::Depth(levels), now_ms);
    }

    pub fn depth(&self, symbol: &str, is_spot: bool, now_ms: i64) -> Option<Vec<DepthLevel>> {
        match self.get(symbol, Kind::Depth { is_spot }, now_ms)? {
            Value::Depth(levels) => Some(levels),
            _ => None,
        }
    }

    /// Ingest a stream tick into the relevant entries.
    pub fn apply_event(&self, event: &StreamEvent, now_ms: i64) {
        match event {
            StreamEvent::MarkPrice(e) => {
                self.put_mark_price(&e.symbol, e.mark_price, now_ms);
            }
            StreamEvent::FundingRate(e) => {
                self.put_funding_rate(&e.symbol, e.funding_rate, now_ms);
                self.put_next_funding_time(&e.symbol, e.next_funding_time_ms, now_ms);
            }
            StreamEvent::BookTicker(e) => {
                self.put_best_bid_ask(&e.symbol, e.bid_price, e.ask_price, now_ms);
            }
            // Order, account and position updates belong to their owners
            _ => {}
        }
    }

    /// Assemble an immutable snapshot from fresh entries.
    ///
    /// Returns None when any constituent is missing or stale; a tick never
    /// trades on partial data.
    pub fn snapshot(
        &self,
        symbol: &str,
        liquidity_score: Decimal,
        now_ms: i64,
    ) -> Option<InstrumentSnapshot> {
        let spot_price = self.spot_price(symbol, now_ms)?;
        let futures_price = self.mark_price(symbol, now_ms)?;
        let funding_rate = self.funding_rate(symbol, now_ms)?;
        let next_funding_time_ms = self.next_funding_time(symbol, now_ms)?;
        let volume_24h = self.volume_24h(symbol, now_ms)?;
        let (bid, ask) = self.best_bid_ask(symbol, now_ms)?;

        Some(InstrumentSnapshot::new(
            symbol,
            spot_price,
            futures_price,
            funding_rate,
            next_funding_time_ms,
            volume_24h,
            ask - bid,
            liquidity_score,
        ))
    }

    /// Drop entries older than the TTL.
    pub fn evict_stale(&self, now_ms: i64) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, e| now_ms - e.written_at_ms <= self.ttl_ms);
        before - entries.len()
    }

    pub fn stats(&self, now_ms: i64) -> CacheStats {
        let entries = self.entries.read();
        let stale = entries
            .values()
            .filter(|e| now_ms - e.written_at_ms > self.ttl_ms)
            .count();
        CacheStats {
            entries: entries.len(),
            stale_entries: stale,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exchange_core::MarkPriceEvent;
    use rust_decimal_macros::dec;

    fn fill(cache: &MarketDataCache, now_ms: i64) {
        cache.put_spot_price("BTCUSDT", dec!(50000), now_ms);
        cache.put_mark_price("BTCUSDT", dec!(50050), now_ms);
        cache.put_funding_rate("BTCUSDT", dec!(0.001), now_ms);
        cache.put_next_funding_time("BTCUSDT", now_ms + 1_800_000, now_ms);
        cache.put_volume_24h("BTCUSDT", dec!(10000000), now_ms);
        cache.put_best_bid_ask("BTCUSDT", dec!(50048), dec!(50053), now_ms);
    }

    #[test]
    fn test_snapshot_assembly() {
        let cache = MarketDataCache::new(10_000);
        fill(&cache, 1000);

        let snap = cache.snapshot("BTCUSDT", dec!(0.9), 1000).unwrap();
        assert_eq!(snap.spot_price, dec!(50000));
        assert_eq!(snap.basis, dec!(0.001));
        assert_eq!(snap.bid_ask_spread, dec!(5));
    }

    #[test]
    fn test_snapshot_refuses_partial_data() {
        let cache = MarketDataCache::new(10_000);
        cache.put_spot_price("BTCUSDT", dec!(50000), 1000);

        assert!(cache.snapshot("BTCUSDT", dec!(1), 1000).is_none());
    }

    #[test]
    fn test_staleness() {
        let cache = MarketDataCache::new(5_000);
        fill(&cache, 1000);

        assert!(cache.funding_rate("BTCUSDT", 6000).is_some());
        assert!(cache.funding_rate("BTCUSDT", 6001).is_none());
        assert!(cache.snapshot("BTCUSDT", dec!(1), 7000).is_none());
    }

    #[test]
    fn test_fingerprints_keep_sides_apart() {
        let cache = MarketDataCache::new(10_000);
        cache.put_depth("BTCUSDT", true, vec![DepthLevel::new(dec!(1), dec!(1))], 0);

        assert!(cache.depth("BTCUSDT", true, 0).is_some());
        assert!(cache.depth("BTCUSDT", false, 0).is_none());
    }

    #[test]
    fn test_apply_stream_event() {
        let cache = MarketDataCache::new(10_000);
        cache.apply_event(
            &StreamEvent::MarkPrice(MarkPriceEvent {
                symbol: "ETHUSDT".into(),
                mark_price: dec!(3000),
                event_time_ms: 1,
            }),
            1,
        );

        assert_eq!(cache.mark_price("ETHUSDT", 1), Some(dec!(3000)));
    }

    #[test]
    fn test_evict_stale() {
        let cache = MarketDataCache::new(1_000);
        fill(&cache, 0);
        cache.put_spot_price("ETHUSDT", dec!(3000), 2000);

        let evicted = cache.evict_stale(2000);
        assert_eq!(evicted, 6);
        assert_eq!(cache.stats(2000).entries, 1);
    }
}
