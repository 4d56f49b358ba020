use std::sync::Arc;

use calha_catalog::{PricingConfig, PricingEngine, Product, ProductCatalog};
use calha_core::identity::User;
use calha_core::{MemoryStore, Store, UserRegistry};
use calha_order::{Order, OrderWorkflow, ReportAggregator};
use calha_store::JsonFileStore;
use tracing::info;

use crate::app_config::{Config, StorageBackend};

/// Every component of the process, constructed once at startup and handed
/// to whoever needs it.
#[derive(Clone)]
pub struct Services {
    pub users: Arc<UserRegistry>,
    pub catalog: Arc<ProductCatalog>,
    pub pricing: Arc<PricingEngine>,
    pub orders: OrderWorkflow,
    pub reports: Arc<ReportAggregator>,
}

impl Services {
    pub fn build(config: &Config) -> Self {
        match config.storage.backend {
            StorageBackend::Memory => {
                info!("Using in-memory storage");
                Self::with_stores(
                    Arc::new(MemoryStore::<Product>::new()),
                    Arc::new(MemoryStore::<Order>::new()),
                    Arc::new(MemoryStore::<User>::new()),
                    config.pricing.clone(),
                )
            }
            StorageBackend::File => {
                let dir = &config.storage.data_dir;
                info!("Using flat-file storage in {}", dir.display());
                Self::with_stores(
                    Arc::new(JsonFileStore::<Product>::new(dir)),
                    Arc::new(JsonFileStore::<Order>::new(dir)),
                    Arc::new(JsonFileStore::<User>::new(dir)),
                    config.pricing.clone(),
                )
            }
        }
    }

    pub fn with_stores(
        products: Arc<dyn Store<Product>>,
        orders: Arc<dyn Store<Order>>,
        users: Arc<dyn Store<User>>,
        pricing: PricingConfig,
    ) -> Self {
        let catalog = Arc::new(ProductCatalog::new(products));
        let pricing = Arc::new(PricingEngine::new(pricing));
        let workflow = OrderWorkflow::new(catalog.clone(), pricing.clone(), orders.clone());
        let reports = Arc::new(ReportAggregator::new(orders, catalog.clone()));

        Self {
            users: Arc::new(UserRegistry::new(users)),
            catalog,
            pricing,
            orders: workflow,
            reports,
        }
    }
}
