//! Locally tracked open positions, keyed by the opening order.

use std::collections::BTreeMap;

use solat_core::{OpenPosition, OrderId, Size};

#[derive(Debug, Default, Clone)]
pub struct PositionBook {
    positions: BTreeMap<OrderId, OpenPosition>,
}

impl PositionBook {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&mut self, position: OpenPosition) {
        self.positions.insert(position.order_id.clone(), position);
    }

    #[must_use]
    pub fn get(&self, order_id: &OrderId) -> Option<&OpenPosition> {
        self.positions.get(order_id)
    }

    /// Reduce a position by `size`, removing it when flat.
    /// Returns the size actually removed.
    pub fn reduce(&mut self, order_id: &OrderId, size: Size) -> Size {
        let Some(position) = self.positions.get_mut(order_id) else {
            return Size::ZERO;
        };
        let closed = size.min(position.size);
        position.size = position.size.saturating_sub(closed);
        if position.size.is_zero() {
            self.positions.remove(order_id);
        }
        closed
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &OpenPosition> {
        self.positions.values()
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<OpenPosition> {
        self.positions.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use solat_core::{Direction, Price};

    fn position(id: &str, symbol: &str, size: Decimal) -> OpenPosition {
        OpenPosition {
            order_id: OrderId::new(id),
            symbol: symbol.to_string(),
            direction: Direction::Buy,
            size: Size::new(size),
            entry_price: Price::new(dec!(10)),
            opened_at: Utc::now(),
        }
    }

    #[test]
    fn test_partial_then_full_reduce() {
        let mut book = PositionBook::new();
        book.open(position("A", "EURUSD", dec!(3)));
        assert_eq!(book.reduce(&OrderId::new("A"), Size::new(dec!(1))), Size::new(dec!(1)));
        assert_eq!(book.get(&OrderId::new("A")).unwrap().size, Size::new(dec!(2)));
        assert_eq!(book.reduce(&OrderId::new("A"), Size::new(dec!(5))), Size::new(dec!(2)));
        assert!(book.is_empty());
    }
}
