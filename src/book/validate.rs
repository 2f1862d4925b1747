//! Post-apply integrity checks and the localized cross repair.

use tracing::warn;

use super::side::{Ladder, Side};

/// An integrity violation the validator could not repair.
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum IntegrityViolation {
    #[error("{side:?} ladder out of order at index {index}")]
    OutOfOrder { side: Side, index: usize },
    #[error("{side:?} ladder holds an invalid level at index {index}")]
    InvalidLevel { side: Side, index: usize },
    #[error("book crossed: best bid {best_bid} >= best ask {best_ask}")]
    Crossed { best_bid: f64, best_ask: f64 },
}

/// Strict best-first ordering (which also rules out duplicate prices) and
/// storable levels only.
fn check_ladder(ladder: &Ladder) -> Result<(), IntegrityViolation> {
    let side = ladder.side();
    for (index, level) in ladder.iter().enumerate() {
        if !level.is_storable() {
            return Err(IntegrityViolation::InvalidLevel { side, index });
        }
    }
    for (index, pair) in ladder.levels().windows(2).enumerate() {
        if side.cmp_prices(pair[0].price, pair[1].price) != std::cmp::Ordering::Less {
            return Err(IntegrityViolation::OutOfOrder {
                side,
                index: index + 1,
            });
        }
    }
    Ok(())
}

/// Validate both sides after a mutation.
///
/// Depth overruns are truncated rather than reported. When the book is
/// crossed and `repair_crossed` is set, exactly one repair is attempted:
/// every ask priced at or below the best bid is removed. A repair that
/// would empty the ask side counts as a failure; ordering and finiteness
/// violations are always irreparable.
///
/// Returns the number of ask levels removed by the repair (zero when the
/// book was already consistent).
pub fn validate_book(
    bids: &mut Ladder,
    asks: &mut Ladder,
    repair_crossed: bool,
) -> Result<usize, IntegrityViolation> {
    bids.enforce_depth();
    asks.enforce_depth();

    check_ladder(bids)?;
    check_ladder(asks)?;

    let (Some(bid), Some(ask)) = (bids.best(), asks.best()) else {
        return Ok(0);
    };
    if bid.price < ask.price {
        return Ok(0);
    }

    let crossed = IntegrityViolation::Crossed {
        best_bid: bid.price,
        best_ask: ask.price,
    };
    if !repair_crossed {
        return Err(crossed);
    }

    let best_bid = bid.price;
    let Some(cut) = asks.iter().position(|level| level.price > best_bid) else {
        // Every ask is at or below the best bid; nothing sane remains.
        return Err(crossed);
    };
    asks.remove_best(cut);
    warn!(
        removed = cut,
        best_bid,
        new_best_ask = asks.best().map(|level| level.price),
        "repaired crossed book by dropping ask levels"
    );

    match (bids.best(), asks.best()) {
        (Some(bid), Some(ask)) if bid.price >= ask.price => Err(crossed),
        _ => Ok(cut),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::book::side::PriceLevel;

    fn ladder(side: Side, levels: &[(f64, f64)]) -> Ladder {
        let mut ladder = Ladder::new(side, 100);
        ladder.load(
            levels
                .iter()
                .map(|&(p, q)| PriceLevel::new(p, q))
                .collect(),
        );
        ladder
    }

    #[test]
    fn consistent_book_passes() {
        let mut bids = ladder(Side::Bid, &[(10.0, 1.0), (9.0, 2.0)]);
        let mut asks = ladder(Side::Ask, &[(11.0, 1.0), (12.0, 3.0)]);
        assert_eq!(validate_book(&mut bids, &mut asks, true), Ok(0));
    }

    #[test]
    fn one_sided_book_is_legal() {
        let mut bids = ladder(Side::Bid, &[(10.0, 1.0)]);
        let mut asks = Ladder::new(Side::Ask, 100);
        assert_eq!(validate_book(&mut bids, &mut asks, true), Ok(0));
    }

    #[test]
    fn crossed_book_repairs_by_dropping_asks() {
        let mut bids = ladder(Side::Bid, &[(11.5, 1.0), (10.0, 1.0)]);
        let mut asks = ladder(Side::Ask, &[(11.0, 1.0), (11.4, 2.0), (12.0, 3.0)]);

        let removed = validate_book(&mut bids, &mut asks, true).unwrap();
        assert_eq!(removed, 2);
        assert_eq!(asks.best().map(|level| level.price), Some(12.0));
    }

    #[test]
    fn repair_that_empties_asks_is_a_failure() {
        let mut bids = ladder(Side::Bid, &[(13.0, 1.0)]);
        let mut asks = ladder(Side::Ask, &[(11.0, 1.0), (12.0, 2.0)]);

        assert_eq!(
            validate_book(&mut bids, &mut asks, true),
            Err(IntegrityViolation::Crossed {
                best_bid: 13.0,
                best_ask: 11.0
            })
        );
    }

    #[test]
    fn repair_can_be_disabled() {
        let mut bids = ladder(Side::Bid, &[(11.5, 1.0)]);
        let mut asks = ladder(Side::Ask, &[(11.0, 1.0), (12.0, 1.0)]);

        assert!(matches!(
            validate_book(&mut bids, &mut asks, false),
            Err(IntegrityViolation::Crossed { .. })
        ));
    }

    #[test]
    fn depth_overrun_truncates_without_error() {
        let mut bids = Ladder::new(Side::Bid, 2);
        bids.load(vec![PriceLevel::new(10.0, 1.0), PriceLevel::new(9.0, 1.0)]);
        let mut asks = Ladder::new(Side::Ask, 2);
        asks.load(vec![
            PriceLevel::new(11.0, 1.0),
            PriceLevel::new(12.0, 1.0),
        ]);

        assert_eq!(validate_book(&mut bids, &mut asks, true), Ok(0));
        assert!(bids.len() <= 2 && asks.len() <= 2);
    }
}
