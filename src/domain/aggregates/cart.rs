//! Cart Aggregate
//!
//! Client-held and never persisted; consumed once at checkout.

use std::collections::BTreeMap;
use uuid::Uuid;
use crate::domain::value_objects::Quantity;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Cart {
    items: Vec<CartItem>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CartItem {
    pub product_id: Uuid,
    pub quantity: Quantity,
}

impl Cart {
    pub const MAX_LINES: usize = 50;

    pub fn new() -> Self { Self::default() }

    pub fn items(&self) -> &[CartItem] { &self.items }
    pub fn item_count(&self) -> usize { self.items.len() }

    /// Adds a line, merging quantities with an existing line for the same product.
    pub fn add_item(&mut self, item: CartItem) {
        if let Some(existing) = self.items.iter_mut().find(|i| i.product_id == item.product_id) {
            existing.quantity = existing.quantity.add(item.quantity);
        } else {
            self.items.push(item);
        }
    }

    /// Lines ordered by product id. Stock rows are always touched in this order.
    pub fn lines_by_product(&self) -> Vec<CartItem> {
        let merged: BTreeMap<Uuid, Quantity> = self.items.iter().map(|i| (i.product_id, i.quantity)).collect();
        merged.into_iter().map(|(product_id, quantity)| CartItem { product_id, quantity }).collect()
    }
}

impl FromIterator<CartItem> for Cart {
    fn from_iter<T: IntoIterator<Item = CartItem>>(iter: T) -> Self {
        let mut cart = Cart::new();
        iter.into_iter().for_each(|i| cart.add_item(i));
        cart
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cart_merges_lines() {
        let p1 = Uuid::now_v7();
        let mut cart = Cart::new();
        cart.add_item(CartItem { product_id: p1, quantity: Quantity::new(2) });
        assert_eq!(cart.item_count(), 1);
        cart.add_item(CartItem { product_id: p1, quantity: Quantity::new(1) });
        assert_eq!(cart.items()[0].quantity.value(), 3); // Merged
    }

    #[test]
    fn test_lines_by_product_are_sorted() {
        let (a, b) = (Uuid::now_v7(), Uuid::now_v7());
        let cart: Cart = [CartItem { product_id: b, quantity: Quantity::new(1) }, CartItem { product_id: a, quantity: Quantity::new(4) }].into_iter().collect();
        let lines = cart.lines_by_product();
        assert_eq!(lines.iter().map(|l| l.product_id).collect::<Vec<_>>(), vec![a, b]);
    }
}
