// =============================================================================
// Feature providers — feature vectors for a symbol at inference time
// =============================================================================

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use tracing::debug;

use crate::error::CoreResult;

/// Named numeric features. `price` doubles as the notional for quota checks.
pub type FeatureVector = BTreeMap<String, f64>;

#[async_trait]
pub trait FeatureProvider: Send + Sync {
    async fn features(&self, symbol: &str) -> CoreResult<FeatureVector>;
}

/// Random-walk prices for demos and paper trading when no market-data
/// source is wired in. Each symbol walks independently from `start_price`.
pub struct SyntheticFeatureProvider {
    start_price: f64,
    /// Per-step volatility as a fraction of price.
    volatility: f64,
    prices: Mutex<HashMap<String, f64>>,
}

impl SyntheticFeatureProvider {
    pub fn new(start_price: f64, volatility: f64) -> Self {
        Self {
            start_price,
            volatility,
            prices: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for SyntheticFeatureProvider {
    fn default() -> Self {
        Self::new(100.0, 0.01)
    }
}

#[async_trait]
impl FeatureProvider for SyntheticFeatureProvider {
    async fn features(&self, symbol: &str) -> CoreResult<FeatureVector> {
        let shock: f64 = rand::thread_rng().gen_range(-1.0_f64..=1.0) * self.volatility;

        let (prev, price) = {
            let mut prices = self.prices.lock();
            let entry = prices.entry(symbol.to_string()).or_insert(self.start_price);
            let prev = *entry;
            *entry = (prev * (1.0 + shock)).max(0.01);
            (prev, *entry)
        };

        let mut fv = FeatureVector::new();
        fv.insert("price".into(), price);
        fv.insert("return_1".into(), (price / prev).ln());
        fv.insert("symbol_hash".into(), symbol_hash(symbol));
        debug!(symbol, price, "synthetic features generated");
        Ok(fv)
    }
}

/// Stable value in `[0, 1)` identifying the symbol (FNV-1a, top bits).
fn symbol_hash(symbol: &str) -> f64 {
    let mut h: u64 = 0xcbf2_9ce4_8422_2325;
    for b in symbol.bytes() {
        h ^= u64::from(b);
        h = h.wrapping_mul(0x0000_0100_0000_01b3);
    }
    (h >> 11) as f64 / (1u64 << 53) as f64
}
