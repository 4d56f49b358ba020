pub mod repository;
pub mod identity;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use repository::{MemoryStore, Record, StorageError, Store};
pub use identity::{NewUser, Role, UserProfile, UserRegistry, UserUpdate};

/// A single field-level validation failure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn join_fields(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Error kinds shared by the catalog, order and identity components.
///
/// Inner components raise these directly and the order workflow hands them
/// back to its caller untouched.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {}", join_fields(.0))]
    Validation(Vec<FieldError>),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: String,
        requested: u64,
        available: u64,
    },

    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid credentials")]
    Unauthorized,

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Internal service error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

/// A (product, quantity) pairing inside an order
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrderLine {
    pub product_id: String,
    pub quantity: u32,
}

impl OrderLine {
    pub fn new(product_id: impl Into<String>, quantity: u32) -> Self {
        Self {
            product_id: product_id.into(),
            quantity,
        }
    }
}

pub const DEFAULT_PAGE: usize = 1;
pub const DEFAULT_PAGE_LIMIT: usize = 10;

/// One page of a listing. Pages are 1-based.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub total: usize,
    pub page: usize,
    pub total_pages: usize,
}

impl<T> Page<T> {
    /// Slice `items` into the requested page. A zero page or limit falls back to the defaults.
    pub fn paginate(items: Vec<T>, page: usize, limit: usize) -> Self {
        let page = if page == 0 { DEFAULT_PAGE } else { page };
        let limit = if limit == 0 { DEFAULT_PAGE_LIMIT } else { limit };
        let total = items.len();
        let data = items
            .into_iter()
            .skip((page - 1).saturating_mul(limit))
            .take(limit)
            .collect();

        Self {
            data,
            total,
            page,
            total_pages: total.div_ceil(limit),
        }
    }
}
