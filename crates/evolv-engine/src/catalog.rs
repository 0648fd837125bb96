//! # Catalogue Lookups
//!
//! Read-only price and stock at checkout time. The engine never decrements
//! stock; that belongs to the inventory system behind this trait.

use async_trait::async_trait;
use evolv_core::Money;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;
use tracing::info;

use crate::error::{EngineError, EngineResult};

/// Stock for one size/colour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    pub size: String,
    pub color: String,
    pub stock: u32,
}

/// A product as the catalogue sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogProduct {
    pub id: String,
    pub name: String,
    /// Tax-inclusive price.
    pub price: Money,
    #[serde(default)]
    pub variants: Vec<Variant>,
}

impl CatalogProduct {
    /// Units available for a size/colour; 0 when the variant is unknown.
    pub fn stock_for(&self, size: &str, color: &str) -> u32 {
        self.variants
            .iter()
            .find(|v| v.size == size && v.color == color)
            .map_or(0, |v| v.stock)
    }
}

#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn product(&self, product_id: &str) -> EngineResult<Option<CatalogProduct>>;
}

/// In-memory catalogue, loaded from a JSON array of products.
#[derive(Debug, Default)]
pub struct StaticCatalog {
    products: RwLock<HashMap<String, CatalogProduct>>,
}

impl StaticCatalog {
    pub fn new(products: impl IntoIterator<Item = CatalogProduct>) -> Self {
        StaticCatalog {
            products: RwLock::new(products.into_iter().map(|p| (p.id.clone(), p)).collect()),
        }
    }

    pub fn from_file(path: &Path) -> EngineResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let products: Vec<CatalogProduct> = serde_json::from_str(&contents)
            .map_err(|e| EngineError::Config(format!("catalogue {}: {e}", path.display())))?;
        info!(path = %path.display(), count = products.len(), "Catalogue loaded");
        Ok(Self::new(products))
    }

    /// Adds or replaces a product.
    pub fn upsert(&self, product: CatalogProduct) {
        if let Ok(mut products) = self.products.write() {
            products.insert(product.id.clone(), product);
        }
    }
}

#[async_trait]
impl CatalogStore for StaticCatalog {
    async fn product(&self, product_id: &str) -> EngineResult<Option<CatalogProduct>> {
        let products = self
            .products
            .read()
            .map_err(|_| EngineError::Config("catalogue lock poisoned".into()))?;
        Ok(products.get(product_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lookup_and_stock() {
        let catalog = StaticCatalog::new([CatalogProduct {
            id: "kurta-7".to_string(),
            name: "Linen Kurta".to_string(),
            price: Money::from_rupees(1000),
            variants: vec![Variant {
                size: "M".to_string(),
                color: "Indigo".to_string(),
                stock: 3,
            }],
        }]);

        let product = catalog.product("kurta-7").await.unwrap().unwrap();
        assert_eq!(product.stock_for("M", "Indigo"), 3);
        assert_eq!(product.stock_for("XL", "Indigo"), 0);
        assert!(catalog.product("saree-1").await.unwrap().is_none());

        catalog.upsert(CatalogProduct {
            price: Money::from_rupees(900),
            ..product
        });
        let repriced = catalog.product("kurta-7").await.unwrap().unwrap();
        assert_eq!(repriced.price, Money::from_rupees(900));
    }
}
