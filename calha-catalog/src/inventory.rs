use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use calha_core::{CoreError, CoreResult, Page, Store};
use chrono::Utc;
use serde_json::json;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

use crate::product::{Product, ProductDraft};

/// Table of per-product locks. Entries are created on first use and dropped
/// again once nobody holds or waits on them.
#[derive(Default)]
struct StockLocks {
    table: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl StockLocks {
    async fn acquire(&self, product_id: &str) -> ProductGuard<'_> {
        let handle = {
            let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
            table.entry(product_id.to_string()).or_default().clone()
        };
        ProductGuard {
            locks: self,
            product_id: product_id.to_string(),
            guard: Some(handle.lock_owned().await),
        }
    }

    // Only the table's own handle left: nobody holds or awaits the lock.
    fn release(&self, product_id: &str) {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        if table.get(product_id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            table.remove(product_id);
        }
    }
}

/// Held lock on one product, pruned from the table on drop
struct ProductGuard<'a> {
    locks: &'a StockLocks,
    product_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for ProductGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks.release(&self.product_id);
    }
}

/// Product catalog and sole owner of stock mutations.
///
/// Every stock change is a read-modify-write performed while holding the
/// product's lock, so concurrent consumers cannot oversell.
pub struct ProductCatalog {
    store: Arc<dyn Store<Product>>,
    locks: StockLocks,
}

impl ProductCatalog {
    pub fn new(store: Arc<dyn Store<Product>>) -> Self {
        Self {
            store,
            locks: StockLocks::default(),
        }
    }

    pub async fn get_by_id(&self, id: &str) -> CoreResult<Product> {
        debug!(product_id = %id, "Fetching product");
        self.store
            .get(id)
            .await?
            .ok_or_else(|| CoreError::not_found("Product", id))
    }

    pub async fn list(&self, page: usize, limit: usize) -> CoreResult<Page<Product>> {
        let products = self.store.find(&|_: &Product| true).await?;
        Ok(Page::paginate(products, page, limit))
    }

    pub async fn create(&self, draft: ProductDraft) -> CoreResult<Product> {
        let product = Product::from_valid(draft.validate()?);
        let product = self.store.create(product).await?;
        info!(product_id = %product.id, name = %product.name, stock = product.stock, "Product created");
        Ok(product)
    }

    /// Merge `draft` over the stored product and persist it if the result validates.
    pub async fn update(&self, id: &str, draft: ProductDraft) -> CoreResult<Product> {
        let _guard = self.locks.acquire(id).await;
        let current = self.get_by_id(id).await?;
        let valid = draft.merged_over(&current).validate()?;

        let partial = json!({
            "name": valid.name,
            "material": valid.material,
            "dimensions": valid.dimensions,
            "unit_price": valid.unit_price,
            "stock": valid.stock,
            "product_type": valid.product_type,
            "updated_at": Utc::now(),
        });
        let updated = self
            .store
            .update_fields(id, partial)
            .await?
            .ok_or_else(|| CoreError::not_found("Product", id))?;

        info!(product_id = %id, "Product updated");
        Ok(updated)
    }

    pub async fn delete(&self, id: &str) -> CoreResult<()> {
        let _guard = self.locks.acquire(id).await;
        if !self.store.delete(id).await? {
            return Err(CoreError::not_found("Product", id));
        }
        info!(product_id = %id, "Product deleted");
        Ok(())
    }

    /// Apply `delta` to the product's stock atomically.
    ///
    /// Negative deltas consume stock, positive deltas restock. Fails with
    /// `InsufficientStock` and leaves the product untouched when the result
    /// would go below zero.
    pub async fn update_stock(&self, id: &str, delta: i64) -> CoreResult<Product> {
        let _guard = self.locks.acquire(id).await;
        self.apply_stock_delta(id, delta).await
    }

    /// Lock every product in `ids` for the lifetime of the returned lease.
    ///
    /// Locks are taken in sorted order with duplicates removed, so two
    /// leases over overlapping products cannot deadlock.
    pub async fn lock_products<'a, I>(&self, ids: I) -> StockLease<'_>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut held: Vec<String> = ids.into_iter().map(str::to_string).collect();
        held.sort();
        held.dedup();

        let mut guards = Vec::with_capacity(held.len());
        for id in &held {
            guards.push(self.locks.acquire(id).await);
        }
        debug!(products = ?held, "Stock lease acquired");

        StockLease {
            catalog: self,
            held,
            _guards: guards,
        }
    }

    // Caller must hold the product's lock.
    async fn apply_stock_delta(&self, id: &str, delta: i64) -> CoreResult<Product> {
        let product = self.get_by_id(id).await?;
        let current = i64::from(product.stock);
        let next = current + delta;

        if next < 0 {
            return Err(CoreError::InsufficientStock {
                product_id: id.to_string(),
                requested: delta.unsigned_abs(),
                available: u64::from(product.stock),
            });
        }
        let next = u32::try_from(next)
            .map_err(|_| CoreError::InvalidRequest(format!("stock of product {id} would overflow")))?;

        let updated = self
            .store
            .update_fields(id, json!({ "stock": next, "updated_at": Utc::now() }))
            .await?
            .ok_or_else(|| CoreError::not_found("Product", id))?;

        info!(product_id = %id, delta, stock = updated.stock, "Stock adjusted");
        Ok(updated)
    }
}

/// Exclusive hold on a set of products' stock. Dropping the lease releases
/// every lock.
pub struct StockLease<'a> {
    catalog: &'a ProductCatalog,
    held: Vec<String>,
    _guards: Vec<ProductGuard<'a>>,
}

impl StockLease<'_> {
    pub fn holds(&self, id: &str) -> bool {
        self.held.binary_search_by(|held| held.as_str().cmp(id)).is_ok()
    }

    pub async fn product(&self, id: &str) -> CoreResult<Product> {
        self.ensure_held(id)?;
        self.catalog.get_by_id(id).await
    }

    /// Same semantics as [`ProductCatalog::update_stock`], under the lease's lock.
    pub async fn adjust(&self, id: &str, delta: i64) -> CoreResult<Product> {
        self.ensure_held(id)?;
        self.catalog.apply_stock_delta(id, delta).await
    }

    fn ensure_held(&self, id: &str) -> CoreResult<()> {
        if self.holds(id) {
            Ok(())
        } else {
            Err(CoreError::Internal(format!("product {id} is not locked by this lease")))
        }
    }
}

impl std::fmt::Debug for StockLease<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StockLease").field("held", &self.held).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::product::DimensionsInput;
    use calha_core::MemoryStore;
    use std::time::Duration;

    fn catalog() -> Arc<ProductCatalog> {
        Arc::new(ProductCatalog::new(Arc::new(MemoryStore::<Product>::new())))
    }

    fn draft(stock: i64) -> ProductDraft {
        ProductDraft {
            name: Some("Condutor redondo".to_string()),
            material: Some("alumínio".to_string()),
            dimensions: Some(DimensionsInput::Text("100x300cm".to_string())),
            unit_price: Some(32.5),
            stock: Some(stock),
            product_type: Some("condutor".to_string()),
        }
    }

    #[tokio::test]
    async fn test_update_stock_both_directions() {
        let catalog = catalog();
        let product = catalog.create(draft(5)).await.unwrap();

        let after = catalog.update_stock(&product.id, -3).await.unwrap();
        assert_eq!(after.stock, 2);
        let after = catalog.update_stock(&product.id, 4).await.unwrap();
        assert_eq!(after.stock, 6);
    }

    #[tokio::test]
    async fn test_overdraw_fails_without_effect() {
        let catalog = catalog();
        let product = catalog.create(draft(5)).await.unwrap();

        let err = catalog.update_stock(&product.id, -6).await.unwrap_err();
        match err {
            CoreError::InsufficientStock { product_id, requested, available } => {
                assert_eq!(product_id, product.id);
                assert_eq!(requested, 6);
                assert_eq!(available, 5);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(catalog.get_by_id(&product.id).await.unwrap().stock, 5);
    }

    #[tokio::test]
    async fn test_missing_product() {
        let catalog = catalog();
        assert!(matches!(
            catalog.update_stock("nope", 1).await,
            Err(CoreError::NotFound { .. })
        ));
        assert!(matches!(catalog.delete("nope").await, Err(CoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_update_validates_merged_product() {
        let catalog = catalog();
        let product = catalog.create(draft(5)).await.unwrap();

        let updated = catalog
            .update(&product.id, ProductDraft { unit_price: Some(40.0), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(updated.unit_price, 40.0);
        assert_eq!(updated.stock, 5);
        assert_eq!(updated.created_at, product.created_at);

        let err = catalog
            .update(&product.id, ProductDraft { material: Some("ouro".to_string()), ..Default::default() })
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
        assert_eq!(catalog.get_by_id(&product.id).await.unwrap().unit_price, 40.0);
    }

    #[tokio::test]
    async fn test_list_paginates() {
        let catalog = catalog();
        for stock in 0..12 {
            catalog.create(draft(stock)).await.unwrap();
        }
        let page = catalog.list(2, 10).await.unwrap();
        assert_eq!(page.data.len(), 2);
        assert_eq!(page.total, 12);
        assert_eq!(page.total_pages, 2);
    }

    #[tokio::test]
    async fn test_lease_rejects_unlocked_products() {
        let catalog = catalog();
        let a = catalog.create(draft(5)).await.unwrap();
        let b = catalog.create(draft(5)).await.unwrap();

        let lease = catalog.lock_products([a.id.as_str(), a.id.as_str()]).await;
        assert!(lease.holds(&a.id));
        assert_eq!(lease.adjust(&a.id, -1).await.unwrap().stock, 4);
        assert!(matches!(lease.adjust(&b.id, -1).await, Err(CoreError::Internal(_))));
    }

    #[tokio::test]
    async fn test_lease_blocks_direct_updates_until_dropped() {
        let catalog = catalog();
        let product = catalog.create(draft(5)).await.unwrap();

        let lease = catalog.lock_products([product.id.as_str()]).await;
        let blocked = tokio::time::timeout(
            Duration::from_millis(50),
            catalog.update_stock(&product.id, -1),
        )
        .await;
        assert!(blocked.is_err(), "update_stock must wait for the lease");

        drop(lease);
        assert_eq!(catalog.update_stock(&product.id, -1).await.unwrap().stock, 4);
    }

    fn tracked_locks(catalog: &ProductCatalog) -> usize {
        catalog.locks.table.lock().unwrap().len()
    }

    #[tokio::test]
    async fn test_lock_table_is_pruned_after_use() {
        let catalog = catalog();
        let product = catalog.create(draft(5)).await.unwrap();

        assert!(matches!(
            catalog.update_stock("ghost", -1).await,
            Err(CoreError::NotFound { .. })
        ));
        catalog.update_stock(&product.id, -1).await.unwrap();
        assert_eq!(tracked_locks(&catalog), 0);

        let lease = catalog.lock_products([product.id.as_str(), "ghost"]).await;
        assert_eq!(tracked_locks(&catalog), 2);
        drop(lease);
        assert_eq!(tracked_locks(&catalog), 0);

        catalog.delete(&product.id).await.unwrap();
        assert_eq!(tracked_locks(&catalog), 0);
    }

    #[tokio::test]
    async fn test_concurrent_consumers_never_oversell() {
        let catalog = catalog();
        let product = catalog.create(draft(10)).await.unwrap();

        let mut tasks = Vec::new();
        for _ in 0..25 {
            let catalog = catalog.clone();
            let id = product.id.clone();
            tasks.push(tokio::spawn(async move { catalog.update_stock(&id, -1).await }));
        }

        let mut succeeded = 0;
        for task in tasks {
            if task.await.unwrap().is_ok() {
                succeeded += 1;
            }
        }
        assert_eq!(succeeded, 10);
        assert_eq!(catalog.get_by_id(&product.id).await.unwrap().stock, 0);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig { cases: 64, ..ProptestConfig::default() })]

            /// Property: stock equals the initial stock plus every applied delta
            /// and is never negative after any call.
            #[test]
            fn stock_tracks_applied_deltas(
                initial in 0i64..50,
                deltas in proptest::collection::vec(-20i64..20, 0..30)
            ) {
                let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
                rt.block_on(async {
                    let catalog = catalog();
                    let product = catalog.create(draft(initial)).await.unwrap();
                    let mut expected = initial;

                    for delta in deltas {
                        match catalog.update_stock(&product.id, delta).await {
                            Ok(updated) => {
                                expected += delta;
                                assert_eq!(i64::from(updated.stock), expected);
                            }
                            Err(CoreError::InsufficientStock { .. }) => {
                                assert!(expected + delta < 0);
                            }
                            Err(other) => panic!("unexpected error: {other:?}"),
                        }
                        let stored = catalog.get_by_id(&product.id).await.unwrap().stock;
                        assert_eq!(i64::from(stored), expected);
                    }
                });
            }
        }
    }
}
