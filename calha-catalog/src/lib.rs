pub mod product;
pub mod pricing;
pub mod inventory;

pub use product::{Dimensions, DimensionsInput, Material, Product, ProductDraft, ProductType};
pub use pricing::{MaterialFactors, PricedLine, PricingConfig, PricingEngine};
pub use inventory::{ProductCatalog, StockLease};
