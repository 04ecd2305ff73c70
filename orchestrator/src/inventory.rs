//! Inventory helper (component H): tracks this node's balances of
//! `token_out` and, when short, sources a swap from another holding.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;

use crate::error::OrchestratorError;

/// How stale a cached balance may be before `get_balance` refreshes it.
const BALANCE_TTL: Duration = Duration::from_secs(30);

/// Default slippage buffer, in basis points, applied on top of the venue's
/// quoted amount.
const DEFAULT_SLIPPAGE_BPS: u64 = 50;

/// The 0.3% fee the external swap venue charges, expressed as the factor
/// `1000/997` needed to recover a post-fee target amount.
const VENUE_FEE_NUMERATOR: u64 = 1000;
const VENUE_FEE_DENOMINATOR: u64 = 997;

const BPS_DENOMINATOR: u64 = 10_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Balance {
    pub amount: u64,
}

/// The external token-swap venue; an excluded collaborator specified only
/// via this interface.
#[async_trait]
pub trait SwapVenue: Send + Sync {
    async fn balance_of(&self, token: &str) -> Result<u64, OrchestratorError>;

    /// Execute a swap from `source_token` into `target_token`, requesting
    /// exactly `amount_in` of the source and requiring at least `min_out`
    /// of the target. Returns the amount actually received.
    async fn swap(
        &self,
        source_token: &str,
        target_token: &str,
        amount_in: u64,
        min_out: u64,
    ) -> Result<u64, OrchestratorError>;
}

struct CachedBalance {
    amount: u64,
    last_updated: SystemTime,
}

/// Tracks local token balances and bridges shortfalls via [`SwapVenue`].
pub struct InventoryHelper<V> {
    venue: V,
    cache: Mutex<HashMap<String, CachedBalance>>,
    slippage_bps: u64,
}

impl<V: SwapVenue> InventoryHelper<V> {
    pub fn new(venue: V) -> Self {
        InventoryHelper {
            venue,
            cache: Mutex::new(HashMap::new()),
            slippage_bps: DEFAULT_SLIPPAGE_BPS,
        }
    }

    pub fn with_slippage_bps(venue: V, slippage_bps: u64) -> Self {
        InventoryHelper {
            venue,
            cache: Mutex::new(HashMap::new()),
            slippage_bps,
        }
    }

    /// A cached balance for `token`, refreshed if `force` or the cache entry
    /// is older than 30s.
    pub async fn get_balance(&self, token: &str, force: bool) -> Result<Balance, OrchestratorError> {
        let token = token.to_lowercase();
        let needs_refresh = {
            let cache = self.cache.lock().expect("inventory cache poisoned");
            match cache.get(&token) {
                Some(entry) => {
                    force
                        || SystemTime::now()
                            .duration_since(entry.last_updated)
                            .unwrap_or(Duration::MAX)
                            >= BALANCE_TTL
                }
                None => true,
            }
        };

        if needs_refresh {
            let amount = self.venue.balance_of(&token).await?;
            let mut cache = self.cache.lock().expect("inventory cache poisoned");
            cache.insert(
                token.clone(),
                CachedBalance {
                    amount,
                    last_updated: SystemTime::now(),
                },
            );
        }

        let cache = self.cache.lock().expect("inventory cache poisoned");
        Ok(Balance {
            amount: cache.get(&token).map(|entry| entry.amount).unwrap_or(0),
        })
    }

    /// The non-target, non-excluded holding with the largest cached
    /// balance, if any is positive.
    pub fn find_swap_source(&self, target_token: &str, exclude: &[String]) -> Option<String> {
        let target_token = target_token.to_lowercase();
        let cache = self.cache.lock().expect("inventory cache poisoned");
        cache
            .iter()
            .filter(|(token, entry)| {
                **token != target_token && !exclude.contains(token) && entry.amount > 0
            })
            .max_by_key(|(_, entry)| entry.amount)
            .map(|(token, _)| token.clone())
    }

    /// Ensure the node holds at least `target_amount` of `target_token`,
    /// swapping from the largest other holding if it doesn't, with a
    /// slippage buffer and the venue's 0.3% fee priced in.
    pub async fn fulfill_requirement(
        &self,
        target_token: &str,
        target_amount: u64,
    ) -> Result<Balance, OrchestratorError> {
        let current = self.get_balance(target_token, false).await?;
        if current.amount >= target_amount {
            return Ok(current);
        }

        let need = target_amount - current.amount;
        let source_token = self
            .find_swap_source(target_token, &[])
            .ok_or_else(|| OrchestratorError::NoSwapSource(target_token.to_string()))?;

        // required input = need * (10000+slippage)/10000 * 1000/997
        let with_slippage = (need as u128 * (BPS_DENOMINATOR + self.slippage_bps) as u128)
            / BPS_DENOMINATOR as u128;
        let amount_in = (with_slippage * VENUE_FEE_NUMERATOR as u128 / VENUE_FEE_DENOMINATOR as u128) as u64;

        let source_balance = self.get_balance(&source_token, false).await?;
        if source_balance.amount < amount_in {
            return Err(OrchestratorError::NoSwapSource(target_token.to_string()));
        }

        let min_out = (need as u128 * (BPS_DENOMINATOR - self.slippage_bps) as u128
            / BPS_DENOMINATOR as u128) as u64;

        let received = self
            .venue
            .swap(&source_token, target_token, amount_in, min_out)
            .await?;

        let mut cache = self.cache.lock().expect("inventory cache poisoned");
        cache.entry(target_token.to_lowercase()).and_modify(|entry| {
            entry.amount += received;
            entry.last_updated = SystemTime::now();
        });
        cache.entry(source_token).and_modify(|entry| {
            entry.amount = entry.amount.saturating_sub(amount_in);
            entry.last_updated = SystemTime::now();
        });

        Ok(Balance {
            amount: current.amount + received,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct FakeVenue {
        balances: Mutex<HashMap<String, u64>>,
        swaps_executed: AtomicU64,
    }

    #[async_trait]
    impl SwapVenue for FakeVenue {
        async fn balance_of(&self, token: &str) -> Result<u64, OrchestratorError> {
            Ok(*self.balances.lock().unwrap().get(token).unwrap_or(&0))
        }

        async fn swap(
            &self,
            source_token: &str,
            _target_token: &str,
            amount_in: u64,
            min_out: u64,
        ) -> Result<u64, OrchestratorError> {
            self.swaps_executed.fetch_add(1, Ordering::SeqCst);
            let mut balances = self.balances.lock().unwrap();
            let source = balances.entry(source_token.to_string()).or_insert(0);
            *source = source.saturating_sub(amount_in);
            Ok(min_out)
        }
    }

    fn venue(balances: &[(&str, u64)]) -> FakeVenue {
        FakeVenue {
            balances: Mutex::new(balances.iter().map(|(t, a)| (t.to_string(), *a)).collect()),
            swaps_executed: AtomicU64::new(0),
        }
    }

    #[tokio::test]
    async fn get_balance_caches_and_reports_the_queried_amount() {
        let helper = InventoryHelper::new(venue(&[("usdc", 500)]));
        let balance = helper.get_balance("USDC", false).await.unwrap();
        assert_eq!(balance.amount, 500);
    }

    #[tokio::test]
    async fn fulfill_requirement_is_a_no_op_when_balance_suffices() {
        let helper = InventoryHelper::new(venue(&[("usdc", 1000)]));
        let balance = helper.fulfill_requirement("usdc", 500).await.unwrap();
        assert_eq!(balance.amount, 1000);
    }

    #[tokio::test]
    async fn fulfill_requirement_swaps_from_the_largest_other_holding() {
        let helper = InventoryHelper::with_slippage_bps(
            venue(&[("usdc", 100), ("weth", 50), ("dai", 5000)]),
            50,
        );
        // Prime the cache for every token so find_swap_source has something
        // to compare.
        helper.get_balance("usdc", false).await.unwrap();
        helper.get_balance("weth", false).await.unwrap();
        helper.get_balance("dai", false).await.unwrap();

        let balance = helper.fulfill_requirement("usdc", 500).await.unwrap();
        assert!(balance.amount >= 500);
    }

    #[tokio::test]
    async fn fulfill_requirement_fails_with_no_swap_source() {
        let helper = InventoryHelper::new(venue(&[("usdc", 0)]));
        let err = helper.fulfill_requirement("usdc", 500).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::NoSwapSource(_)));
    }
}
