use std::collections::HashMap;
use std::sync::Arc;

use calha_catalog::{PricedLine, PricingEngine, Product, ProductCatalog, StockLease};
use calha_core::{CoreError, CoreResult, OrderLine, Page, Store};
use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::Mutex;
use tokio::task::JoinError;
use tracing::{error, info, warn};

use crate::models::{Order, OrderStatus};
use crate::report::{completed_between, OrderReport};

/// Orchestrates the order lifecycle: placement with stock consumption,
/// status transitions, deletion with restock, and reporting.
///
/// Placement and deletion each run as one transaction under the lines'
/// product locks. When a step fails after stock has moved, the stock already
/// moved is put back before the error is returned.
#[derive(Clone)]
pub struct OrderWorkflow {
    catalog: Arc<ProductCatalog>,
    pricing: Arc<PricingEngine>,
    orders: Arc<dyn Store<Order>>,
    // serializes status changes and deletions
    mutations: Arc<Mutex<()>>,
}

fn join_failure(e: JoinError) -> CoreError {
    CoreError::Internal(format!("order transaction aborted: {e}"))
}

impl OrderWorkflow {
    pub fn new(
        catalog: Arc<ProductCatalog>,
        pricing: Arc<PricingEngine>,
        orders: Arc<dyn Store<Order>>,
    ) -> Self {
        Self {
            catalog,
            pricing,
            orders,
            mutations: Arc::new(Mutex::new(())),
        }
    }

    /// Place an order: validate stock, price it, consume stock, persist it.
    ///
    /// The transaction runs on its own task, so a caller that gives up
    /// waiting never leaves stock half-consumed.
    pub async fn create(&self, customer_id: &str, lines: Vec<OrderLine>) -> CoreResult<Order> {
        let customer_id = customer_id.trim();
        if customer_id.is_empty() {
            return Err(CoreError::InvalidRequest("customer_id is required".to_string()));
        }
        if lines.is_empty() {
            return Err(CoreError::InvalidRequest("an order needs at least one line".to_string()));
        }
        if let Some(line) = lines.iter().find(|l| l.quantity == 0) {
            return Err(CoreError::InvalidRequest(format!(
                "quantity for product {} must be at least 1",
                line.product_id
            )));
        }

        let workflow = self.clone();
        let customer_id = customer_id.to_string();
        tokio::spawn(async move { workflow.place(customer_id, lines).await })
            .await
            .map_err(join_failure)?
    }

    async fn place(&self, customer_id: String, lines: Vec<OrderLine>) -> CoreResult<Order> {
        let lease = self
            .catalog
            .lock_products(lines.iter().map(|l| l.product_id.as_str()))
            .await;

        // (a) snapshot and check stock, summing quantities of repeated products
        let mut snapshot: HashMap<&str, Product> = HashMap::new();
        let mut requested: Vec<(&str, u64)> = Vec::new();
        for line in &lines {
            let id = line.product_id.as_str();
            if !snapshot.contains_key(id) {
                snapshot.insert(id, lease.product(id).await?);
                requested.push((id, 0));
            }
            if let Some(entry) = requested.iter_mut().find(|(pid, _)| *pid == id) {
                entry.1 += u64::from(line.quantity);
            }
        }
        for (id, quantity) in &requested {
            let available = snapshot.get(id).map_or(0, |p| u64::from(p.stock));
            if available < *quantity {
                return Err(CoreError::InsufficientStock {
                    product_id: (*id).to_string(),
                    requested: *quantity,
                    available,
                });
            }
        }

        // (b) price against the pre-decrement snapshot
        let priced = lines
            .iter()
            .map(|line| {
                snapshot
                    .get(line.product_id.as_str())
                    .map(|product| PricedLine {
                        product,
                        quantity: line.quantity,
                    })
                    .ok_or_else(|| CoreError::Internal(format!("no snapshot for {}", line.product_id)))
            })
            .collect::<CoreResult<Vec<_>>>()?;
        let total = self.pricing.total(&priced);
        let estimated_production_time = self.pricing.production_time(&priced);

        // (c) consume stock
        let mut consumed: Vec<&OrderLine> = Vec::with_capacity(lines.len());
        for line in &lines {
            if let Err(e) = lease.adjust(&line.product_id, -i64::from(line.quantity)).await {
                self.restore(&lease, &consumed, 1).await;
                return Err(e);
            }
            consumed.push(line);
        }

        // (d) persist
        let order = Order::new(customer_id, lines.clone(), total, estimated_production_time);
        match self.orders.create(order).await {
            Ok(order) => {
                info!(
                    order_id = %order.id,
                    customer_id = %order.customer_id,
                    lines = order.lines.len(),
                    total = order.total,
                    minutes = order.estimated_production_time,
                    "Order created"
                );
                Ok(order)
            }
            Err(e) => {
                self.restore(&lease, &consumed, 1).await;
                Err(e.into())
            }
        }
    }

    /// Compensation: move `lines`' quantities back in the opposite direction
    /// (`sign` 1 restocks, -1 consumes again). Failures are logged; the
    /// caller returns the error that triggered compensation.
    async fn restore(&self, lease: &StockLease<'_>, lines: &[&OrderLine], sign: i64) {
        for line in lines.iter().rev() {
            let delta = sign * i64::from(line.quantity);
            warn!(product_id = %line.product_id, delta, "Compensating stock change");
            if let Err(e) = lease.adjust(&line.product_id, delta).await {
                error!(product_id = %line.product_id, delta, error = %e, "Stock compensation failed");
            }
        }
    }

    pub async fn get(&self, id: &str) -> CoreResult<Order> {
        self.orders
            .get(id)
            .await?
            .ok_or_else(|| CoreError::not_found("Order", id))
    }

    pub async fn list(&self, page: usize, limit: usize) -> CoreResult<Page<Order>> {
        let orders = self.orders.find(&|_: &Order| true).await?;
        Ok(Page::paginate(orders, page, limit))
    }

    pub async fn list_for_customer(&self, customer_id: &str) -> CoreResult<Vec<Order>> {
        Ok(self.orders.find(&|o: &Order| o.customer_id == customer_id).await?)
    }

    /// Move an order to `status`.
    ///
    /// Unknown values fail with `InvalidStatus` before the order is looked
    /// up. Status changes never move stock; only [`Self::delete`] restocks.
    pub async fn update_status(&self, id: &str, status: &str) -> CoreResult<Order> {
        let next: OrderStatus = status.parse()?;

        let workflow = self.clone();
        let id = id.to_string();
        tokio::spawn(async move { workflow.transition(&id, next).await })
            .await
            .map_err(join_failure)?
    }

    async fn transition(&self, id: &str, next: OrderStatus) -> CoreResult<Order> {
        let _guard = self.mutations.lock().await;
        let order = self.get(id).await?;

        if order.status == next {
            return Ok(order);
        }
        if !order.status.can_transition_to(next) {
            return Err(CoreError::InvalidTransition {
                from: order.status.to_string(),
                to: next.to_string(),
            });
        }

        let updated = self
            .orders
            .update_fields(id, json!({ "status": next, "updated_at": Utc::now() }))
            .await?
            .ok_or_else(|| CoreError::not_found("Order", id))?;

        info!(order_id = %id, from = %order.status, to = %next, "Order status changed");
        Ok(updated)
    }

    /// Delete an order, returning every line's quantity to stock first.
    pub async fn delete(&self, id: &str) -> CoreResult<Order> {
        let workflow = self.clone();
        let id = id.to_string();
        tokio::spawn(async move { workflow.remove(&id).await })
            .await
            .map_err(join_failure)?
    }

    async fn remove(&self, id: &str) -> CoreResult<Order> {
        let _guard = self.mutations.lock().await;
        let order = self.get(id).await?;

        let lease = self
            .catalog
            .lock_products(order.lines.iter().map(|l| l.product_id.as_str()))
            .await;
        let mut restocked: Vec<&OrderLine> = Vec::with_capacity(order.lines.len());
        for line in &order.lines {
            if let Err(e) = lease.adjust(&line.product_id, i64::from(line.quantity)).await {
                self.restore(&lease, &restocked, -1).await;
                return Err(e);
            }
            restocked.push(line);
        }

        match self.orders.delete(id).await {
            Ok(true) => {
                info!(order_id = %id, restocked_lines = restocked.len(), "Order deleted");
                Ok(order)
            }
            Ok(false) => {
                self.restore(&lease, &restocked, -1).await;
                Err(CoreError::not_found("Order", id))
            }
            Err(e) => {
                self.restore(&lease, &restocked, -1).await;
                Err(e.into())
            }
        }
    }

    /// Revenue and production averages over completed orders placed in
    /// `[start, end]`.
    pub async fn generate_report(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> CoreResult<OrderReport> {
        let orders = completed_between(self.orders.as_ref(), start, end).await?;
        Ok(OrderReport::summarize(&orders))
    }
}
