//! Protocol engine (component D): the four operations the orchestrator
//! drives an intent through, layered on top of the sharing kernel.

use std::future::Future;

use crate::error::CoreError;
use crate::sharing::{reconstruct_from_two, PartyView};
use crate::{next_party, Field, PartyId};

/// A peer's sum view, tagged with the party it came from.
#[derive(Clone, Debug)]
pub struct PartyShare {
    pub party_id: PartyId,
    pub view: PartyView,
}

/// Fold of [`PartyView::add`] over `views`; an empty list is a view of zero.
pub fn sum_views(views: &[PartyView]) -> PartyView {
    views
        .iter()
        .fold(PartyView::zero(), |acc, view| acc.add(view))
}

/// `true` if the total capacity represented by `my_sum_view` and the peers'
/// matching views is at least `threshold`.
///
/// `peer_exchange` broadcasts `my_sum_view` to both peers and returns their
/// sum views; any single peer's view suffices for reconstruction, so only
/// the first is used. This deliberately reveals the reconstructed total (one
/// bit more than the boolean answer) but keeps per-party capacities hidden.
pub async fn check_sufficient_capacity<F, Fut>(
    my_sum_view: &PartyView,
    my_party_id: PartyId,
    threshold: &Field,
    peer_exchange: F,
) -> Result<bool, CoreError>
where
    F: FnOnce(PartyView) -> Fut,
    Fut: Future<Output = Result<Vec<PartyShare>, CoreError>>,
{
    let peer_shares = peer_exchange(my_sum_view.clone()).await?;
    let peer = peer_shares
        .first()
        .expect("peer_exchange must return at least one peer view");
    let (total, mismatch) =
        reconstruct_from_two(my_sum_view, &peer.view, my_party_id, peer.party_id);
    if let Some(mismatch) = mismatch {
        tracing::warn!(%mismatch, "overlap mismatch while checking sufficient capacity");
    }
    Ok(total >= *threshold)
}

/// A party's share of `order_size`, per [`compute_allocations`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Allocation {
    pub party_id: PartyId,
    pub amount: u64,
}

/// Split `order_size` across three capacities in proportion to each party's
/// share of the total, absorbing rounding remainder into the last party so
/// the allocations always sum to exactly `order_size`.
pub fn compute_allocations(
    capacities: [u64; 3],
    order_size: u64,
) -> Result<[Allocation; 3], CoreError> {
    let total: u128 = capacities.iter().map(|&c| c as u128).sum();
    if total < order_size as u128 {
        return Err(CoreError::InsufficientCapacity {
            available: total.to_string(),
            required: order_size.to_string(),
        });
    }

    let mut amounts = [0u64; 3];
    if total == 0 {
        // order_size must also be 0 here, handled by the sum invariant below.
    } else {
        for i in 0..2 {
            amounts[i] = ((capacities[i] as u128 * order_size as u128) / total) as u64;
        }
    }
    amounts[2] = order_size - amounts[0] - amounts[1];

    Ok([
        Allocation {
            party_id: 0,
            amount: amounts[0],
        },
        Allocation {
            party_id: 1,
            amount: amounts[1],
        },
        Allocation {
            party_id: 2,
            amount: amounts[2],
        },
    ])
}

/// Resolve the counterparty to request a reconstruction from for variable
/// `capacity_i`: party `i` itself, or its ring successor if `i` is `self`.
pub fn reconstruction_counterparty(capacity_owner: PartyId, my_party_id: PartyId) -> PartyId {
    if capacity_owner == my_party_id {
        next_party(my_party_id)
    } else {
        capacity_owner
    }
}

/// Reconstruct `name` (e.g. `"capacity_1"`) using this party's view plus a
/// response fetched from the counterparty resolved by
/// [`reconstruction_counterparty`].
pub async fn reconstruct_value<F, Fut>(
    my_view: &PartyView,
    my_party_id: PartyId,
    capacity_owner: PartyId,
    request_response: F,
) -> Result<Field, CoreError>
where
    F: FnOnce(PartyId) -> Fut,
    Fut: Future<Output = Result<PartyView, CoreError>>,
{
    let counterparty = reconstruction_counterparty(capacity_owner, my_party_id);
    let peer_view = request_response(counterparty).await?;
    let (value, mismatch) =
        reconstruct_from_two(my_view, &peer_view, my_party_id, counterparty);
    if let Some(mismatch) = mismatch {
        tracing::warn!(%mismatch, variable = capacity_owner, "overlap mismatch while reconstructing value");
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sharing::RssTriple;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    #[test]
    fn sum_views_folds_with_zero_identity() {
        assert_eq!(sum_views(&[]), PartyView::zero());

        let mut rng = SmallRng::seed_from_u64(20);
        let a = RssTriple::share(&Field::from_u64(10), &mut rng);
        let b = RssTriple::share(&Field::from_u64(20), &mut rng);
        let summed = sum_views(&[a.view(0), b.view(0)]);
        assert_eq!(summed, a.view(0).add(&b.view(0)));
    }

    #[tokio::test]
    async fn sufficiency_check_reports_true_when_total_meets_threshold() {
        let mut rng = SmallRng::seed_from_u64(21);
        let total_secret = Field::from_u64(1200);
        let triple = RssTriple::share(&total_secret, &mut rng);
        let my_view = triple.view(0);
        let peer_view = triple.view(1);

        let result = check_sufficient_capacity(&my_view, 0, &Field::from_u64(1000), |_| async {
            Ok(vec![PartyShare {
                party_id: 1,
                view: peer_view,
            }])
        })
        .await
        .unwrap();
        assert!(result);
    }

    #[tokio::test]
    async fn sufficiency_check_reports_false_when_total_below_threshold() {
        let mut rng = SmallRng::seed_from_u64(22);
        let total_secret = Field::from_u64(700);
        let triple = RssTriple::share(&total_secret, &mut rng);
        let my_view = triple.view(0);
        let peer_view = triple.view(1);

        let result = check_sufficient_capacity(&my_view, 0, &Field::from_u64(1000), |_| async {
            Ok(vec![PartyShare {
                party_id: 1,
                view: peer_view,
            }])
        })
        .await
        .unwrap();
        assert!(!result);
    }

    #[test]
    fn compute_allocations_scenario_a_sufficient_unequal() {
        let allocations = compute_allocations([300, 500, 400], 1000).unwrap();
        assert_eq!(allocations[0].amount, 250);
        assert_eq!(allocations[1].amount, 416);
        assert_eq!(allocations[2].amount, 334);
        assert_eq!(
            allocations.iter().map(|a| a.amount).sum::<u64>(),
            1000
        );
    }

    #[test]
    fn compute_allocations_scenario_b_insufficient() {
        let err = compute_allocations([200, 300, 200], 1000).unwrap_err();
        assert_eq!(
            err,
            CoreError::InsufficientCapacity {
                available: "700".to_string(),
                required: "1000".to_string(),
            }
        );
    }

    #[test]
    fn compute_allocations_scenario_c_zero_from_one_party() {
        let allocations = compute_allocations([0, 600, 400], 1000).unwrap();
        assert_eq!(allocations[0].amount, 0);
        assert_eq!(allocations[1].amount, 600);
        assert_eq!(allocations[2].amount, 400);
    }

    #[test]
    fn compute_allocations_scenario_d_equal_split() {
        let allocations = compute_allocations([500, 500, 500], 1500).unwrap();
        assert_eq!(allocations[0].amount, 500);
        assert_eq!(allocations[1].amount, 500);
        assert_eq!(allocations[2].amount, 500);
    }

    #[test]
    fn compute_allocations_party_order_is_fixed() {
        let allocations = compute_allocations([1, 1, 1], 3).unwrap();
        assert_eq!(allocations[0].party_id, 0);
        assert_eq!(allocations[1].party_id, 1);
        assert_eq!(allocations[2].party_id, 2);
    }

    #[test]
    fn reconstruction_counterparty_follows_the_newer_rule() {
        // capacity_i: request from party i, unless i is self then ring successor.
        assert_eq!(reconstruction_counterparty(1, 0), 1);
        assert_eq!(reconstruction_counterparty(0, 0), 1);
        assert_eq!(reconstruction_counterparty(2, 2), 0);
    }
}
