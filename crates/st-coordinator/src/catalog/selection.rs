//! Target selection
//!
//! In round `R` a listed target is eligible while it has fewer than `R`
//! attempts (measurements plus timeouts). When no target qualifies, targets
//! that have timed out but were measured fewer than `R` times are retried,
//! so a target that keeps timing out cannot stall the round.

use std::cmp::Ordering;

use st_core::config::PriorityOrder;
use st_core::TargetId;

use super::{Catalog, Target};

/// Which rule made the returned targets eligible
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    /// Fewer attempts than the round number
    Strict,
    /// Fewer completed measurements than the round number
    Fallback,
}

fn compare(order: PriorityOrder, a: (&TargetId, &Target), b: (&TargetId, &Target)) -> Ordering {
    let by_priority = match order {
        PriorityOrder::Ascending => a.1.priority.cmp(&b.1.priority),
        PriorityOrder::Descending => b.1.priority.cmp(&a.1.priority),
    };
    by_priority.then_with(|| a.0.cmp(b.0))
}

/// Eligible targets for `round`, in pick order.
///
/// Ties in priority are broken by ascending id. An empty list means every
/// listed target has been measured `round` times.
pub fn eligible(
    catalog: &Catalog,
    round: u32,
    order: PriorityOrder,
) -> (Eligibility, Vec<(&TargetId, &Target)>) {
    let mut strict: Vec<_> = catalog
        .listed()
        .filter(|(_, t)| t.attempts() < round)
        .collect();

    if !strict.is_empty() {
        strict.sort_by(|a, b| compare(order, *a, *b));
        return (Eligibility::Strict, strict);
    }

    let mut fallback: Vec<_> = catalog
        .listed()
        .filter(|(_, t)| t.measured_count < round)
        .collect();
    fallback.sort_by(|a, b| compare(order, *a, *b));
    (Eligibility::Fallback, fallback)
}

/// Pick the next target to measure in `round`
pub fn select_next(
    catalog: &Catalog,
    round: u32,
    order: PriorityOrder,
) -> Option<(TargetId, Eligibility)> {
    let (eligibility, targets) = eligible(catalog, round, order);
    targets
        .first()
        .map(|(id, _)| ((*id).clone(), eligibility))
}

/// Listed targets that still need a first attempt in `round`
pub fn remaining(catalog: &Catalog, round: u32) -> usize {
    catalog
        .listed()
        .filter(|(_, t)| t.attempts() < round)
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::TargetFilter;
    use st_core::CatalogEntry;

    fn catalog(entries: &[(&str, u64)]) -> Catalog {
        let mut catalog = Catalog::new();
        catalog.refresh(
            entries
                .iter()
                .map(|(id, priority)| CatalogEntry::new(*id, *priority))
                .collect(),
            &TargetFilter::default(),
        );
        catalog
    }

    #[test]
    fn test_lower_priority_first_when_ascending() {
        let catalog = catalog(&[("A", 10), ("B", 5)]);

        let (id, eligibility) = select_next(&catalog, 1, PriorityOrder::Ascending).unwrap();

        assert_eq!(id, TargetId::new("B"));
        assert_eq!(eligibility, Eligibility::Strict);
    }

    #[test]
    fn test_higher_priority_first_when_descending() {
        let catalog = catalog(&[("A", 10), ("B", 5)]);

        let (id, _) = select_next(&catalog, 1, PriorityOrder::Descending).unwrap();

        assert_eq!(id, TargetId::new("A"));
    }

    #[test]
    fn test_ties_broken_by_id() {
        let catalog = catalog(&[("C", 5), ("A", 5), ("B", 5)]);

        let (_, order) = eligible(&catalog, 1, PriorityOrder::Descending);
        let ids: Vec<_> = order.iter().map(|(id, _)| id.as_str()).collect();

        assert_eq!(ids, vec!["A", "B", "C"]);
    }

    #[test]
    fn test_attempted_targets_are_not_eligible() {
        let mut catalog = catalog(&[("A", 10), ("B", 5)]);
        catalog.record_measured(&TargetId::new("B"));

        let (id, _) = select_next(&catalog, 1, PriorityOrder::Ascending).unwrap();

        assert_eq!(id, TargetId::new("A"));
        assert_eq!(remaining(&catalog, 1), 1);
    }

    #[test]
    fn test_fallback_retries_timeouts() {
        let mut catalog = catalog(&[("A", 10), ("B", 5)]);
        catalog.record_measured(&TargetId::new("B"));
        catalog.record_timeout(&TargetId::new("A"));

        let (id, eligibility) = select_next(&catalog, 1, PriorityOrder::Ascending).unwrap();

        assert_eq!(id, TargetId::new("A"));
        assert_eq!(eligibility, Eligibility::Fallback);
        assert_eq!(remaining(&catalog, 1), 0);
    }

    #[test]
    fn test_nothing_left_when_all_measured() {
        let mut catalog = catalog(&[("A", 10)]);
        catalog.record_measured(&TargetId::new("A"));

        assert!(select_next(&catalog, 1, PriorityOrder::Ascending).is_none());
        assert!(select_next(&catalog, 2, PriorityOrder::Ascending).is_some());
    }

    #[test]
    fn test_unlisted_targets_are_skipped() {
        let mut catalog = catalog(&[("A", 10), ("B", 5)]);
        catalog.refresh(vec![CatalogEntry::new("A", 10)], &TargetFilter::default());

        let (id, _) = select_next(&catalog, 1, PriorityOrder::Ascending).unwrap();

        assert_eq!(id, TargetId::new("A"));
    }
}
