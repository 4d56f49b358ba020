pub mod models;
pub mod workflow;
pub mod report;

pub use calha_core::OrderLine;
pub use models::{Order, OrderStatus};
pub use workflow::OrderWorkflow;
pub use report::{OrderReport, ProductSales, ReportAggregator, SalesReport};
