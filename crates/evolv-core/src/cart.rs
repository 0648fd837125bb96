//! # Cart
//!
//! The customer's shopping cart as an explicit value. It is loaded from the
//! database per customer, mutated here, and handed to the pricing calculator;
//! nothing reads it from ambient state.
//!
//! ## Cart Operations Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Cart Operations                                      │
//! │                                                                         │
//! │  Storefront Action        Cart method              State Change         │
//! │  ─────────────────        ───────────              ────────────         │
//! │                                                                         │
//! │  Add to bag ─────────────► add_line() ───────────► push or merge qty    │
//! │                                                                         │
//! │  Change quantity ────────► update_quantity() ────► lines[i].qty = n     │
//! │                                                                         │
//! │  Remove ─────────────────► remove_line() ────────► lines.remove(i)      │
//! │                                                                         │
//! │  Order placed ───────────► (row deleted in the order transaction)       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::money::Money;
use crate::{MAX_CART_LINES, MAX_LINE_QUANTITY};

/// A line in the cart.
///
/// A line is identified by product + size + colour: the same shirt in two
/// sizes is two lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CartLine {
    pub product_id: String,
    /// Product name when added (frozen for display)
    pub name: String,
    pub size: String,
    pub color: String,
    /// Tax-inclusive unit price as displayed to the customer.
    pub unit_price: Money,
    pub quantity: u32,
}

impl CartLine {
    /// Tax-inclusive line total (unit price × quantity).
    pub fn line_total(&self) -> Money {
        self.unit_price * self.quantity
    }

    fn matches(&self, product_id: &str, size: &str, color: &str) -> bool {
        self.product_id == product_id && self.size == size && self.color == color
    }
}

/// A customer's cart.
///
/// ## Invariants
/// - Lines are unique by (product_id, size, color)
/// - Quantity is 1..=MAX_LINE_QUANTITY (setting 0 removes the line)
/// - At most MAX_CART_LINES lines
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Cart {
    pub customer_id: String,
    lines: Vec<CartLine>,
}

impl Cart {
    /// Creates a new empty cart.
    pub fn new(customer_id: impl Into<String>) -> Self {
        Cart {
            customer_id: customer_id.into(),
            lines: Vec::new(),
        }
    }

    /// Rebuilds a cart from persisted lines.
    pub fn from_lines(customer_id: impl Into<String>, lines: Vec<CartLine>) -> Self {
        Cart {
            customer_id: customer_id.into(),
            lines,
        }
    }

    /// Adds a line or increases quantity if the same product/size/colour exists.
    pub fn add_line(
        &mut self,
        product_id: &str,
        name: &str,
        size: &str,
        color: &str,
        unit_price: Money,
        quantity: u32,
    ) -> CoreResult<()> {
        if quantity == 0 {
            return Err(ValidationError::MustBePositive {
                field: "quantity".to_string(),
            }
            .into());
        }
        if unit_price.is_negative() {
            return Err(ValidationError::MustBePositive {
                field: "unit_price".to_string(),
            }
            .into());
        }

        if let Some(line) = self
            .lines
            .iter_mut()
            .find(|l| l.matches(product_id, size, color))
        {
            let new_qty = line.quantity + quantity;
            if new_qty > MAX_LINE_QUANTITY {
                return Err(CoreError::QuantityTooLarge {
                    requested: new_qty,
                    max: MAX_LINE_QUANTITY,
                });
            }
            line.quantity = new_qty;
            return Ok(());
        }

        if quantity > MAX_LINE_QUANTITY {
            return Err(CoreError::QuantityTooLarge {
                requested: quantity,
                max: MAX_LINE_QUANTITY,
            });
        }
        if self.lines.len() >= MAX_CART_LINES {
            return Err(CoreError::CartTooLarge {
                max: MAX_CART_LINES,
            });
        }

        self.lines.push(CartLine {
            product_id: product_id.to_string(),
            name: name.to_string(),
            size: size.to_string(),
            color: color.to_string(),
            unit_price,
            quantity,
        });
        Ok(())
    }

    /// Sets the quantity of a line. Quantity 0 removes it.
    pub fn update_quantity(
        &mut self,
        product_id: &str,
        size: &str,
        color: &str,
        quantity: u32,
    ) -> CoreResult<()> {
        if quantity == 0 {
            return self.remove_line(product_id, size, color);
        }
        if quantity > MAX_LINE_QUANTITY {
            return Err(CoreError::QuantityTooLarge {
                requested: quantity,
                max: MAX_LINE_QUANTITY,
            });
        }

        match self
            .lines
            .iter_mut()
            .find(|l| l.matches(product_id, size, color))
        {
            Some(line) => {
                line.quantity = quantity;
                Ok(())
            }
            None => Err(not_in_cart(product_id, size, color)),
        }
    }

    /// Removes a line.
    pub fn remove_line(&mut self, product_id: &str, size: &str, color: &str) -> CoreResult<()> {
        let before = self.lines.len();
        self.lines.retain(|l| !l.matches(product_id, size, color));
        if self.lines.len() == before {
            return Err(not_in_cart(product_id, size, color));
        }
        Ok(())
    }

    /// Empties the cart.
    pub fn clear(&mut self) {
        self.lines.clear();
    }

    pub fn lines(&self) -> &[CartLine] {
        &self.lines
    }

    pub fn into_lines(self) -> Vec<CartLine> {
        self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Total number of units across lines.
    pub fn item_count(&self) -> u32 {
        self.lines.iter().map(|l| l.quantity).sum()
    }

    /// Tax-inclusive subtotal.
    pub fn subtotal(&self) -> Money {
        self.lines.iter().map(CartLine::line_total).sum()
    }
}

fn not_in_cart(product_id: &str, size: &str, color: &str) -> CoreError {
    CoreError::LineNotInCart {
        product_id: product_id.to_string(),
        size: size.to_string(),
        color: color.to_string(),
    }
}
