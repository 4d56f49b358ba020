use calha_core::{CoreResult, OrderLine};
use serde::{Deserialize, Serialize};

use crate::inventory::ProductCatalog;
use crate::product::{Material, Product};

/// Per-material scalar table with a fallback for materials left unset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialFactors {
    pub aco: Option<f64>,
    pub aluminio: Option<f64>,
    pub galvanizado: Option<f64>,
    pub pvc: Option<f64>,
    pub fallback: f64,
}

impl MaterialFactors {
    pub fn factor(&self, material: Material) -> f64 {
        let configured = match material {
            Material::Aco => self.aco,
            Material::Aluminio => self.aluminio,
            Material::Galvanizado => self.galvanizado,
            Material::Pvc => self.pvc,
        };
        configured.unwrap_or(self.fallback)
    }

    /// Production-time multipliers. PVC has no entry and uses the fallback.
    pub fn production_defaults() -> Self {
        Self {
            aco: Some(1.2),
            aluminio: Some(1.0),
            galvanizado: Some(1.5),
            pvc: None,
            fallback: 1.0,
        }
    }

    /// Manufacturing cost factors. Some deployments price PVC at 1.0
    /// instead of 0.8; override `pricing.cost_factors.pvc` for those.
    pub fn cost_defaults() -> Self {
        Self {
            aco: Some(1.2),
            aluminio: Some(1.5),
            galvanizado: Some(1.0),
            pvc: Some(0.8),
            fallback: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingConfig {
    /// Minutes per unit of area before material adjustment
    pub base_production_time: f64,

    pub production_multipliers: MaterialFactors,

    /// Raw material cost per unit of area
    pub cost_per_area_unit: f64,

    pub cost_factors: MaterialFactors,

    /// Multiplier applied on top of manufacturing cost
    pub profit_margin: f64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            base_production_time: 10.0,
            production_multipliers: MaterialFactors::production_defaults(),
            cost_per_area_unit: 0.01,
            cost_factors: MaterialFactors::cost_defaults(),
            profit_margin: 1.3,
        }
    }
}

/// A resolved order line: the product snapshot and the requested quantity
#[derive(Debug, Clone, Copy)]
pub struct PricedLine<'a> {
    pub product: &'a Product,
    pub quantity: u32,
}

/// Derives order totals, production estimates and manufacturing costs
#[derive(Debug, Clone)]
pub struct PricingEngine {
    config: PricingConfig,
}

impl PricingEngine {
    pub fn new(config: PricingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PricingConfig {
        &self.config
    }

    /// Estimated minutes to produce `lines`:
    /// Σ base_time × material multiplier × area × quantity
    pub fn production_time(&self, lines: &[PricedLine<'_>]) -> f64 {
        lines.iter().fold(0.0, |acc, line| {
            let multiplier = self.config.production_multipliers.factor(line.product.material);
            acc + self.config.base_production_time
                * multiplier
                * line.product.dimensions.area()
                * f64::from(line.quantity)
        })
    }

    /// Σ unit_price × quantity
    pub fn total(&self, lines: &[PricedLine<'_>]) -> f64 {
        lines.iter().fold(0.0, |acc, line| {
            acc + line.product.unit_price * f64::from(line.quantity)
        })
    }

    /// Resolve each line against the catalog, then compute the production time.
    pub async fn compute_production_time(
        &self,
        catalog: &ProductCatalog,
        lines: &[OrderLine],
    ) -> CoreResult<f64> {
        let products = resolve(catalog, lines).await?;
        Ok(self.production_time(&priced(&products, lines)))
    }

    /// Resolve each line against the catalog, then sum the line prices.
    /// Fails with `NotFound` on the first line whose product is missing.
    pub async fn compute_total(&self, catalog: &ProductCatalog, lines: &[OrderLine]) -> CoreResult<f64> {
        let products = resolve(catalog, lines).await?;
        Ok(self.total(&priced(&products, lines)))
    }

    /// Cost to fabricate one unit, margin included. Not part of order totals.
    pub fn manufacturing_cost(&self, product: &Product) -> f64 {
        let base_cost = product.dimensions.area() * self.config.cost_per_area_unit;
        base_cost * self.config.cost_factors.factor(product.material) * self.config.profit_margin
    }
}

impl Default for PricingEngine {
    fn default() -> Self {
        Self::new(PricingConfig::default())
    }
}

async fn resolve(catalog: &ProductCatalog, lines: &[OrderLine]) -> CoreResult<Vec<Product>> {
    let mut products = Vec::with_capacity(lines.len());
    for line in lines {
        products.push(catalog.get_by_id(&line.product_id).await?);
    }
    Ok(products)
}

fn priced<'a>(products: &'a [Product], lines: &[OrderLine]) -> Vec<PricedLine<'a>> {
    products
        .iter()
        .zip(lines)
        .map(|(product, line)| PricedLine {
            product,
            quantity: line.quantity,
        })
        .collect()
}
