//! Core domain model for the stock monitor: products, snapshots and change sets.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "stockwatch-core";

/// Sentinel category for products listed before any category header.
pub const UNCATEGORIZED: &str = "Uncategorized";

/// One catalog entry as extracted from a listing page.
///
/// The absolute `url` is the identity of a product; two records with the same
/// URL describe the same product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub name: String,
    pub url: String,
    pub in_stock: bool,
    pub category: String,
}

/// Snapshot of a catalog keyed by absolute product URL.
///
/// Serializes as a JSON object `{ url: { name, url, inStock, category } }`,
/// which is also the persisted state layout.
pub type ProductSet = BTreeMap<String, Product>;

/// Why a product shows up in a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    New,
    Restocked,
}

/// Result of comparing two snapshots. Only ever holds in-stock products.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub new_products: Vec<Product>,
    pub restocked: Vec<Product>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.new_products.is_empty() && self.restocked.is_empty()
    }

    pub fn len(&self) -> usize {
        self.new_products.len() + self.restocked.len()
    }

    /// New products first, then restocks, each in extraction order.
    pub fn iter(&self) -> impl Iterator<Item = (ChangeKind, &Product)> {
        self.new_products
            .iter()
            .map(|p| (ChangeKind::New, p))
            .chain(self.restocked.iter().map(|p| (ChangeKind::Restocked, p)))
    }
}
