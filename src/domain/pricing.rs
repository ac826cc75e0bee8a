//! Checkout pricing
//!
//! Pure pipeline that turns cart-derived and directly requested items into
//! priced order lines and totals. All mutation (stock, coupon usage, cart)
//! happens in the order route on top of these results.

use rust_decimal::Decimal;
use uuid::Uuid;

use super::value_objects::round2;

/// One requested item, tagged with its source. The same product may arrive
/// from the cart and the request body at once; [`merge_lines`] collapses
/// the duplicates.
#[derive(Debug, Clone)]
pub struct LineSource {
    pub product_id: Uuid,
    pub seller_id: Uuid,
    pub product_name: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub discount_per_unit: Decimal,
    pub from_cart: bool,
}

/// A merged, priced order line.
#[derive(Debug, Clone)]
pub struct OrderLine {
    pub product_id: Uuid,
    pub seller_id: Uuid,
    pub product_name: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub discount_per_unit: Decimal,
    /// How much of `quantity` came from the buyer's cart; the cart lines are
    /// reduced by this amount after the order is persisted.
    pub cart_quantity: i32,
}

impl OrderLine {
    pub fn base_subtotal(&self) -> Decimal {
        round2(self.unit_price * Decimal::from(self.quantity))
    }

    pub fn discount_total(&self) -> Decimal {
        round2(self.discount_per_unit * Decimal::from(self.quantity))
    }

    pub fn line_total(&self) -> Decimal {
        self.base_subtotal() - self.discount_total()
    }
}

/// Deduplicate on product, summing quantities. When a product appears in
/// both sources the unit price and discount-per-unit are recomputed as the
/// quantity-weighted average of the contributions.
pub fn merge_lines(sources: Vec<LineSource>) -> Vec<OrderLine> {
    let mut merged: Vec<OrderLine> = Vec::new();
    for source in sources {
        if source.quantity <= 0 {
            continue;
        }
        match merged.iter_mut().find(|line| line.product_id == source.product_id) {
            Some(line) => {
                let prev_qty = Decimal::from(line.quantity);
                let add_qty = Decimal::from(source.quantity);
                let total_qty = prev_qty + add_qty;
                line.unit_price =
                    round2((line.unit_price * prev_qty + source.unit_price * add_qty) / total_qty);
                line.discount_per_unit = round2(
                    (line.discount_per_unit * prev_qty + source.discount_per_unit * add_qty) / total_qty,
                );
                line.quantity += source.quantity;
                if source.from_cart {
                    line.cart_quantity += source.quantity;
                }
            }
            None => merged.push(OrderLine {
                product_id: source.product_id,
                seller_id: source.seller_id,
                product_name: source.product_name,
                quantity: source.quantity,
                unit_price: source.unit_price,
                discount_per_unit: source.discount_per_unit,
                cart_quantity: if source.from_cart { source.quantity } else { 0 },
            }),
        }
    }
    merged
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderTotals {
    pub total_before_discount: Decimal,
    pub product_discount: Decimal,
    pub coupon_discount: Decimal,
    pub final_price: Decimal,
}

/// `final_price = total_before_discount - (coupon + product discounts)`,
/// floored at zero.
pub fn compute_totals(lines: &[OrderLine], coupon_discount: Decimal) -> OrderTotals {
    let total_before_discount: Decimal = lines.iter().map(OrderLine::base_subtotal).sum();
    let product_discount: Decimal = lines.iter().map(OrderLine::discount_total).sum();
    let final_price =
        (total_before_discount - product_discount - coupon_discount).max(Decimal::ZERO);
    OrderTotals {
        total_before_discount,
        product_discount,
        coupon_discount,
        final_price: round2(final_price),
    }
}

/// Shipping address resolution order: explicit request value, then the
/// cart's stored default, then the buyer profile. Placeholder strings do
/// not count as an address.
pub fn resolve_shipping_address(
    request: Option<&str>,
    cart_default: Option<&str>,
    profile: Option<&str>,
) -> Option<String> {
    [request, cart_default, profile]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|candidate| !is_placeholder(candidate))
        .map(str::to_string)
}

fn is_placeholder(value: &str) -> bool {
    value.is_empty() || matches!(value.to_lowercase().as_str(), "n/a" | "na" | "none" | "null")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn source(product: Uuid, qty: i32, price: Decimal, discount: Decimal, from_cart: bool) -> LineSource {
        LineSource {
            product_id: product,
            seller_id: Uuid::new_v4(),
            product_name: "Widget".into(),
            quantity: qty,
            unit_price: price,
            discount_per_unit: discount,
            from_cart,
        }
    }

    #[test]
    fn merge_sums_quantities_and_tracks_cart_share() {
        let p = Uuid::new_v4();
        let lines = merge_lines(vec![
            source(p, 2, dec!(20), dec!(0), true),
            source(p, 3, dec!(20), dec!(0), false),
        ]);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].quantity, 5);
        assert_eq!(lines[0].cart_quantity, 2);
        assert_eq!(lines[0].unit_price, dec!(20));
    }

    #[test]
    fn merge_weights_unit_price_by_quantity() {
        let p = Uuid::new_v4();
        let lines = merge_lines(vec![
            source(p, 1, dec!(10), dec!(0), true),
            source(p, 3, dec!(20), dec!(0), false),
        ]);
        // (10*1 + 20*3) / 4 = 17.50
        assert_eq!(lines[0].unit_price, dec!(17.50));
    }

    #[test]
    fn merge_drops_non_positive_quantities() {
        let lines = merge_lines(vec![source(Uuid::new_v4(), 0, dec!(10), dec!(0), false)]);
        assert!(lines.is_empty());
    }

    #[test]
    fn totals_never_negative() {
        let p = Uuid::new_v4();
        let lines = merge_lines(vec![source(p, 1, dec!(10), dec!(0), false)]);
        let totals = compute_totals(&lines, dec!(50));
        assert_eq!(totals.final_price, Decimal::ZERO);
    }

    #[test]
    fn coupon_scenario_ten_percent_off_sixty() {
        // Buyer carts qty 3 of a 20.00 product, applies a 10% coupon.
        let p = Uuid::new_v4();
        let lines = merge_lines(vec![source(p, 3, dec!(20), dec!(0), true)]);
        assert_eq!(lines[0].base_subtotal(), dec!(60.00));
        let coupon = dec!(6.00); // 10% of 60
        let totals = compute_totals(&lines, coupon);
        assert_eq!(totals.total_before_discount, dec!(60.00));
        assert_eq!(totals.final_price, dec!(54.00));
    }

    #[test]
    fn fixed_product_discount_scenario() {
        // Fixed discount of 5 on a 20.00 product, qty 2.
        let p = Uuid::new_v4();
        let lines = merge_lines(vec![source(p, 2, dec!(20), dec!(5), false)]);
        assert_eq!(lines[0].base_subtotal(), dec!(40.00));
        assert_eq!(lines[0].discount_total(), dec!(10.00));
        assert_eq!(lines[0].line_total(), dec!(30.00));
        let totals = compute_totals(&lines, Decimal::ZERO);
        assert_eq!(totals.final_price, dec!(30.00));
    }

    #[test]
    fn address_resolution_order() {
        assert_eq!(
            resolve_shipping_address(Some("12 High St"), Some("cart addr"), Some("profile addr")),
            Some("12 High St".to_string())
        );
        assert_eq!(
            resolve_shipping_address(None, Some("cart addr"), Some("profile addr")),
            Some("cart addr".to_string())
        );
        assert_eq!(
            resolve_shipping_address(Some("  "), Some("n/a"), Some("profile addr")),
            Some("profile addr".to_string())
        );
        assert_eq!(resolve_shipping_address(None, None, Some("None")), None);
    }
}
