use std::collections::HashMap;
use std::sync::Arc;

use calha_catalog::ProductCatalog;
use calha_core::{CoreError, CoreResult, Store};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::{Order, OrderStatus};

/// Revenue and production figures over a set of completed orders
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderReport {
    pub total_orders: usize,
    pub total_revenue: f64,
    pub average_order_value: f64,
    pub average_production_time: f64,
}

impl OrderReport {
    /// Averages are zero for an empty set.
    pub fn summarize(orders: &[Order]) -> Self {
        if orders.is_empty() {
            return Self::default();
        }

        let count = orders.len() as f64;
        let total_revenue: f64 = orders.iter().map(|o| o.total).sum();
        let total_time: f64 = orders.iter().map(|o| o.estimated_production_time).sum();

        Self {
            total_orders: orders.len(),
            total_revenue,
            average_order_value: total_revenue / count,
            average_production_time: total_time / count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductSales {
    pub product_id: String,
    /// `None` when the product has since been removed from the catalog
    pub product_name: Option<String>,
    pub quantity_sold: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SalesReport {
    #[serde(flatten)]
    pub summary: OrderReport,
    pub products_sold: Vec<ProductSales>,
}

/// Per-product quantities across `orders`, in first-seen order
pub fn tally_products(orders: &[Order]) -> Vec<ProductSales> {
    let mut sales: Vec<ProductSales> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();

    for line in orders.iter().flat_map(|o| &o.lines) {
        match index.get(line.product_id.as_str()) {
            Some(&i) => sales[i].quantity_sold += u64::from(line.quantity),
            None => {
                index.insert(&line.product_id, sales.len());
                sales.push(ProductSales {
                    product_id: line.product_id.clone(),
                    product_name: None,
                    quantity_sold: u64::from(line.quantity),
                });
            }
        }
    }
    sales
}

/// Completed orders with `order_date` in `[start, end]`. A reversed range
/// selects nothing.
pub(crate) async fn completed_between(
    orders: &dyn Store<Order>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> CoreResult<Vec<Order>> {
    let matching = orders
        .find(&|o: &Order| {
            o.status == OrderStatus::Concluido && o.order_date >= start && o.order_date <= end
        })
        .await?;
    debug!(count = matching.len(), %start, %end, "Completed orders selected for report");
    Ok(matching)
}

/// Read-only reporting over the order store
pub struct ReportAggregator {
    orders: Arc<dyn Store<Order>>,
    catalog: Arc<ProductCatalog>,
}

impl ReportAggregator {
    pub fn new(orders: Arc<dyn Store<Order>>, catalog: Arc<ProductCatalog>) -> Self {
        Self { orders, catalog }
    }

    pub async fn generate_report(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> CoreResult<OrderReport> {
        let orders = completed_between(self.orders.as_ref(), start, end).await?;
        Ok(OrderReport::summarize(&orders))
    }

    /// [`Self::generate_report`] plus quantities sold per product
    pub async fn sales_report(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> CoreResult<SalesReport> {
        let orders = completed_between(self.orders.as_ref(), start, end).await?;
        let mut products_sold = tally_products(&orders);

        for entry in &mut products_sold {
            entry.product_name = match self.catalog.get_by_id(&entry.product_id).await {
                Ok(product) => Some(product.name),
                Err(CoreError::NotFound { .. }) => None,
                Err(e) => return Err(e),
            };
        }

        Ok(SalesReport {
            summary: OrderReport::summarize(&orders),
            products_sold,
        })
    }
}
