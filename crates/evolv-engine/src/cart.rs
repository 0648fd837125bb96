//! # Cart Service
//!
//! The customer's cart, persisted server-side. Prices are copied from the
//! catalogue when a line is added, never taken from the browser; checkout
//! re-checks them anyway in case the catalogue moved in between.

use evolv_core::cart::Cart;
use evolv_core::CoreError;
use evolv_db::Database;
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

use crate::catalog::CatalogStore;
use crate::clock::Clock;
use crate::error::EngineResult;

/// A line to add. The unit price comes from the catalogue.
#[derive(Debug, Clone, Deserialize)]
pub struct AddToCart {
    pub product_id: String,
    pub size: String,
    pub color: String,
    pub quantity: u32,
}

#[derive(Clone)]
pub struct CartService {
    db: Database,
    catalog: Arc<dyn CatalogStore>,
    clock: Arc<dyn Clock>,
}

impl CartService {
    pub fn new(db: Database, catalog: Arc<dyn CatalogStore>, clock: Arc<dyn Clock>) -> Self {
        CartService { db, catalog, clock }
    }

    pub async fn get(&self, customer_id: &str) -> EngineResult<Cart> {
        Ok(self.db.carts().get(customer_id).await?)
    }

    /// Adds a line (merging with an identical size/colour) after a stock check.
    pub async fn add(&self, customer_id: &str, item: AddToCart) -> EngineResult<Cart> {
        let product = self
            .catalog
            .product(&item.product_id)
            .await?
            .ok_or_else(|| CoreError::ProductNotFound(item.product_id.clone()))?;

        let mut cart = self.db.carts().get(customer_id).await?;
        let in_cart: u32 = cart
            .lines()
            .iter()
            .filter(|l| l.product_id == item.product_id && l.size == item.size && l.color == item.color)
            .map(|l| l.quantity)
            .sum();
        let available = product.stock_for(&item.size, &item.color);
        if in_cart + item.quantity > available {
            return Err(CoreError::InsufficientStock {
                product_id: item.product_id,
                size: item.size,
                available,
                requested: in_cart + item.quantity,
            }
            .into());
        }

        cart.add_line(
            &product.id,
            &product.name,
            &item.size,
            &item.color,
            product.price,
            item.quantity,
        )?;
        self.db.carts().save(&cart, self.clock.now()).await?;
        debug!(customer_id, product_id = %product.id, quantity = item.quantity, "Added to cart");
        Ok(cart)
    }

    /// Sets a line's quantity; zero removes it.
    pub async fn update_quantity(
        &self,
        customer_id: &str,
        product_id: &str,
        size: &str,
        color: &str,
        quantity: u32,
    ) -> EngineResult<Cart> {
        let mut cart = self.db.carts().get(customer_id).await?;
        cart.update_quantity(product_id, size, color, quantity)?;
        self.db.carts().save(&cart, self.clock.now()).await?;
        Ok(cart)
    }

    pub async fn remove(&self, customer_id: &str, product_id: &str, size: &str, color: &str) -> EngineResult<Cart> {
        let mut cart = self.db.carts().get(customer_id).await?;
        cart.remove_line(product_id, size, color)?;
        self.db.carts().save(&cart, self.clock.now()).await?;
        Ok(cart)
    }

    pub async fn clear(&self, customer_id: &str) -> EngineResult<()> {
        Ok(self.db.carts().delete(customer_id).await?)
    }
}
