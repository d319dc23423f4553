//! Density transfer and decay formulas
//!
//! Pair exchange moves a quarter of the density gap per unit weight: the
//! half-gap `(d_self - d_other) / 2` scaled by the direction weight, split
//! evenly between losing and gaining. Seeding an empty neighbour moves
//! `d_self / 7` per unit weight, the share of one of the seven cells a
//! particle can spread into besides its own.

/// Fraction of the density gap moved by one pair exchange at weight 1.
pub const PAIR_EXCHANGE_FRACTION: f32 = 0.25;

/// Divisor applied when seeding an empty neighbour.
pub const EMPTY_CELL_DIVISOR: f32 = 7.0;

/// Signed transfer from a particle into an occupied neighbour.
///
/// `own_start` is the particle's density when its processing began this
/// tick; `own_now` is what it holds at this point of its pass. A positive
/// result flows out of the particle, a negative one flows in. The result
/// never exceeds what the giving side currently holds.
#[inline]
pub fn pair_exchange(own_start: f32, own_now: f32, other: f32, weight: f32) -> f32 {
    let delta = (own_start - other) * PAIR_EXCHANGE_FRACTION * weight;
    if delta >= 0.0 {
        delta.min(own_now)
    } else {
        delta.max(-other)
    }
}

/// Amount seeded into an empty neighbour, capped by what the particle holds.
#[inline]
pub fn empty_cell_seed(own_start: f32, own_now: f32, weight: f32) -> f32 {
    (own_start / EMPTY_CELL_DIVISOR * weight).min(own_now).max(0.0)
}

/// Density lost in one bucket visit.
///
/// Rates are per second; a particle is visited once every `bucket_count`
/// ticks, so each visit applies `bucket_count / ticks_per_second` seconds
/// worth of decay. Outdoors, wind above `wind_threshold` accelerates
/// dispersal by `sqrt(strength)`.
pub fn decay_amount(
    rate_roofed: f32,
    rate_unroofed: f32,
    roofed: bool,
    wind_strength: f32,
    wind_threshold: f32,
    seconds_per_visit: f32,
) -> f32 {
    let rate = if roofed {
        rate_roofed
    } else if wind_strength > wind_threshold {
        rate_unroofed * wind_strength.sqrt()
    } else {
        rate_unroofed
    };
    rate * seconds_per_visit
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_pair_exchange_halves_the_gap() {
        // 100 next to 0 at weight 1 ends at 75 / 25
        let delta = pair_exchange(100.0, 100.0, 0.0, 1.0);
        assert_eq!(delta, 25.0);
        assert_eq!(100.0 - delta, 75.0);
        assert_eq!(0.0 + delta, 25.0);
    }

    #[test]
    fn test_pair_exchange_flows_both_ways() {
        let delta = pair_exchange(20.0, 20.0, 100.0, 0.96);
        assert_relative_eq!(delta, -19.2, epsilon = 1e-5);
    }

    #[test]
    fn test_pair_exchange_capped_by_holdings() {
        // Started at 100 but has already given most of it away
        assert_eq!(pair_exchange(100.0, 5.0, 0.0, 1.0), 5.0);
        // The neighbour cannot give more than it has
        assert_eq!(pair_exchange(0.0, 0.0, 8.0, 10.0), -8.0);
    }

    #[test]
    fn test_empty_cell_seed() {
        assert_relative_eq!(empty_cell_seed(70.0, 70.0, 0.66), 6.6, epsilon = 1e-5);
        assert_eq!(empty_cell_seed(70.0, 3.0, 1.0), 3.0);
    }

    #[test]
    fn test_decay_amount() {
        let per_visit = 30.0 / 60.0;
        assert_eq!(decay_amount(90.0, 15.0, true, 9.0, 2.5, per_visit), 45.0);
        assert_eq!(decay_amount(90.0, 15.0, false, 1.0, 2.5, per_visit), 7.5);
        // Strong wind outdoors scales by sqrt(strength)
        assert_eq!(decay_amount(90.0, 15.0, false, 9.0, 2.5, per_visit), 22.5);
    }
}
