//! Buyer-facing pricing formula.
//!
//! The spread is 20% margin compounded with a 6% guarantee fee, and the
//! buyer rate is always rounded UP to the cent so the spread never rounds
//! against the house.

/// 20% margin on the supplier rate.
pub const MARGIN_MULTIPLIER: f64 = 1.20;

/// 6% occupancy-guarantee fee on top of the margin.
pub const GUARANTEE_MULTIPLIER: f64 = 1.06;

/// `ceil(supplier_rate * 1.20 * 1.06 * 100) / 100`
pub fn buyer_rate_from_supplier(supplier_rate: f64) -> f64 {
    (supplier_rate * MARGIN_MULTIPLIER * GUARANTEE_MULTIPLIER * 100.0).ceil() / 100.0
}

/// Spread between buyer and supplier rate, as a percentage of the buyer rate.
pub fn spread_pct(buyer_rate: f64, supplier_rate: f64) -> f64 {
    if buyer_rate <= 0.0 {
        return 0.0;
    }
    (buyer_rate - supplier_rate) / buyer_rate * 100.0
}

/// Monthly totals for a given allocation: (buyer_total, supplier_payout),
/// rounded to cents.
pub fn monthly_totals(sqft: i64, supplier_rate: f64) -> (f64, f64) {
    let buyer_rate = buyer_rate_from_supplier(supplier_rate);
    let buyer_total = (sqft as f64 * buyer_rate * 100.0).round() / 100.0;
    let supplier_payout = (sqft as f64 * supplier_rate * 100.0).round() / 100.0;
    (buyer_total, supplier_payout)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boundary_rate() {
        // $5.00 supplier -> 5.00 * 1.272 = 6.36 exactly
        assert_eq!(buyer_rate_from_supplier(5.00), 6.36);
    }

    #[test]
    fn test_always_rounds_up() {
        for supplier in [5.00, 7.50, 7.53, 10.00, 12.99] {
            let buyer = buyer_rate_from_supplier(supplier);
            let raw = supplier * MARGIN_MULTIPLIER * GUARANTEE_MULTIPLIER;
            assert!(buyer >= raw, "supplier={supplier} buyer={buyer} raw={raw}");
            // Effective markup floor of 27.2%
            assert!(buyer >= supplier * 1.272 - 1e-9);
        }
    }

    #[test]
    fn test_cent_precision() {
        let buyer = buyer_rate_from_supplier(7.53);
        let cents = (buyer * 100.0).round();
        assert!((buyer * 100.0 - cents).abs() < 1e-9);
    }

    #[test]
    fn test_monthly_totals() {
        let (buyer_total, supplier_payout) = monthly_totals(10_000, 5.00);
        assert_eq!(buyer_total, 63_600.0);
        assert_eq!(supplier_payout, 50_000.0);
        // The spread is the clearinghouse take
        assert!(buyer_total > supplier_payout);
    }

    #[test]
    fn test_spread_pct() {
        let buyer = buyer_rate_from_supplier(5.00);
        let pct = spread_pct(buyer, 5.00);
        assert!(pct > 21.0 && pct < 22.0);
        assert_eq!(spread_pct(0.0, 5.0), 0.0);
    }
}
