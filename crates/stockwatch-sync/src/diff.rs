use stockwatch_core::{ChangeSet, ProductSet};

/// Compares the current extraction against the previous snapshot.
///
/// Only in-stock products can be reported. A URL missing from `previous` is a
/// new product, except on the first run (empty `previous`) where it is part of
/// the baseline. A URL that was out of stock before is a restock. Products that
/// disappear or go out of stock produce nothing.
pub fn detect_changes(previous: &ProductSet, current: &ProductSet) -> ChangeSet {
    let first_run = previous.is_empty();
    let mut changes = ChangeSet::default();

    for (url, product) in current {
        if !product.in_stock {
            continue;
        }
        match previous.get(url) {
            None if first_run => {}
            None => changes.new_products.push(product.clone()),
            Some(before) if !before.in_stock => changes.restocked.push(product.clone()),
            Some(_) => {}
        }
    }

    changes
}
