use std::fmt;
use std::str::FromStr;

use calha_core::{CoreError, CoreResult, FieldError, Record};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Sheet material a product is fabricated from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(try_from = "String")]
pub enum Material {
    #[serde(rename = "aço")]
    Aco,
    #[serde(rename = "alumínio")]
    Aluminio,
    #[serde(rename = "galvanizado")]
    Galvanizado,
    #[serde(rename = "pvc")]
    Pvc,
}

impl Material {
    pub const ALL: [Material; 4] = [
        Material::Aco,
        Material::Aluminio,
        Material::Galvanizado,
        Material::Pvc,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Material::Aco => "aço",
            Material::Aluminio => "alumínio",
            Material::Galvanizado => "galvanizado",
            Material::Pvc => "pvc",
        }
    }
}

impl fmt::Display for Material {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Matching is case-insensitive and accepts the unaccented spellings.
impl FromStr for Material {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "aço" | "aco" => Ok(Material::Aco),
            "alumínio" | "aluminio" => Ok(Material::Aluminio),
            "galvanizado" => Ok(Material::Galvanizado),
            "pvc" => Ok(Material::Pvc),
            _ => Err(ParseEnumError {
                value: s.to_string(),
                expected: "aço, alumínio, galvanizado, pvc",
            }),
        }
    }
}

impl TryFrom<String> for Material {
    type Error = ParseEnumError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(try_from = "String", rename_all = "lowercase")]
pub enum ProductType {
    Calha,
    Rufo,
    Condutor,
    Outro,
}

impl ProductType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductType::Calha => "calha",
            ProductType::Rufo => "rufo",
            ProductType::Condutor => "condutor",
            ProductType::Outro => "outro",
        }
    }
}

impl fmt::Display for ProductType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProductType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "calha" => Ok(ProductType::Calha),
            "rufo" => Ok(ProductType::Rufo),
            "condutor" => Ok(ProductType::Condutor),
            "outro" => Ok(ProductType::Outro),
            _ => Err(ParseEnumError {
                value: s.to_string(),
                expected: "calha, rufo, condutor, outro",
            }),
        }
    }
}

impl TryFrom<String> for ProductType {
    type Error = ParseEnumError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid value {value:?}, expected one of: {expected}")]
pub struct ParseEnumError {
    pub value: String,
    pub expected: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthUnit {
    Millimeter,
    Centimeter,
    Meter,
}

impl LengthUnit {
    pub fn suffix(&self) -> &'static str {
        match self {
            LengthUnit::Millimeter => "mm",
            LengthUnit::Centimeter => "cm",
            LengthUnit::Meter => "m",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DimensionsError {
    #[error("dimensions must look like \"200x50mm\" (unit mm, cm or m), got {0:?}")]
    Format(String),

    #[error("width and length must be positive numbers")]
    NonPositive,
}

/// Width × length of a product.
///
/// Areas are computed from the numbers as written; units are carried along
/// for display only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "DimensionsInput", into = "DimensionsInput")]
pub struct Dimensions {
    pub width: f64,
    pub length: f64,
    pub unit: Option<LengthUnit>,
}

impl Dimensions {
    pub fn new(width: f64, length: f64) -> Result<Self, DimensionsError> {
        if !(width.is_finite() && length.is_finite() && width > 0.0 && length > 0.0) {
            return Err(DimensionsError::NonPositive);
        }
        Ok(Self {
            width,
            length,
            unit: None,
        })
    }

    pub fn area(&self) -> f64 {
        self.width * self.length
    }
}

impl FromStr for Dimensions {
    type Err = DimensionsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let format_err = || DimensionsError::Format(s.to_string());

        let (numbers, unit) = if let Some(rest) = s.strip_suffix("mm") {
            (rest, LengthUnit::Millimeter)
        } else if let Some(rest) = s.strip_suffix("cm") {
            (rest, LengthUnit::Centimeter)
        } else if let Some(rest) = s.strip_suffix('m') {
            (rest, LengthUnit::Meter)
        } else {
            return Err(format_err());
        };

        let (width, length) = numbers.split_once('x').ok_or_else(format_err)?;
        let parse = |digits: &str| -> Result<f64, DimensionsError> {
            if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return Err(format_err());
            }
            digits.parse::<f64>().map_err(|_| format_err())
        };

        let mut dimensions = Dimensions::new(parse(width)?, parse(length)?)?;
        dimensions.unit = Some(unit);
        Ok(dimensions)
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.length)?;
        if let Some(unit) = self.unit {
            f.write_str(unit.suffix())?;
        }
        Ok(())
    }
}

/// Wire form of [`Dimensions`]: a `"WxH<unit>"` string or a `{width, length}` object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DimensionsInput {
    Text(String),
    Structured { width: f64, length: f64 },
}

impl TryFrom<DimensionsInput> for Dimensions {
    type Error = DimensionsError;

    fn try_from(input: DimensionsInput) -> Result<Self, Self::Error> {
        match input {
            DimensionsInput::Text(text) => text.parse(),
            DimensionsInput::Structured { width, length } => Dimensions::new(width, length),
        }
    }
}

impl From<Dimensions> for DimensionsInput {
    fn from(dimensions: Dimensions) -> Self {
        if dimensions.unit.is_some() {
            DimensionsInput::Text(dimensions.to_string())
        } else {
            DimensionsInput::Structured {
                width: dimensions.width,
                length: dimensions.length,
            }
        }
    }
}

/// Catalog product
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub material: Material,
    pub dimensions: Dimensions,
    pub unit_price: f64,
    pub stock: u32,
    pub product_type: ProductType,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Record for Product {
    const COLLECTION: &'static str = "products";

    fn id(&self) -> &str {
        &self.id
    }
}

/// Unvalidated product fields, as received from the boundary.
///
/// Used both for creation (every field required) and for updates, where the
/// draft is first merged over the stored product.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProductDraft {
    pub name: Option<String>,
    pub material: Option<String>,
    pub dimensions: Option<DimensionsInput>,
    pub unit_price: Option<f64>,
    pub stock: Option<i64>,
    pub product_type: Option<String>,
}

/// Field values that passed validation
#[derive(Debug, Clone, PartialEq)]
pub struct ValidProduct {
    pub name: String,
    pub material: Material,
    pub dimensions: Dimensions,
    pub unit_price: f64,
    pub stock: u32,
    pub product_type: ProductType,
}

impl ProductDraft {
    /// Fill every field this draft leaves unset from `current`
    pub fn merged_over(self, current: &Product) -> ProductDraft {
        ProductDraft {
            name: self.name.or_else(|| Some(current.name.clone())),
            material: self.material.or_else(|| Some(current.material.to_string())),
            dimensions: self
                .dimensions
                .or_else(|| Some(current.dimensions.clone().into())),
            unit_price: self.unit_price.or(Some(current.unit_price)),
            stock: self.stock.or(Some(i64::from(current.stock))),
            product_type: self
                .product_type
                .or_else(|| Some(current.product_type.to_string())),
        }
    }

    /// Check every field and report all violations at once
    pub fn validate(self) -> CoreResult<ValidProduct> {
        let mut errors = Vec::new();

        let name = match self.name.map(|n| n.trim().to_string()) {
            Some(name) if !name.is_empty() => Some(name),
            _ => {
                errors.push(FieldError::new("name", "is required"));
                None
            }
        };

        let material = match self.material {
            None => {
                errors.push(FieldError::new("material", "is required"));
                None
            }
            Some(raw) => match raw.parse::<Material>() {
                Ok(material) => Some(material),
                Err(e) => {
                    errors.push(FieldError::new("material", e.to_string()));
                    None
                }
            },
        };

        let dimensions = match self.dimensions {
            None => {
                errors.push(FieldError::new("dimensions", "is required"));
                None
            }
            Some(input) => match Dimensions::try_from(input) {
                Ok(dimensions) => Some(dimensions),
                Err(e) => {
                    errors.push(FieldError::new("dimensions", e.to_string()));
                    None
                }
            },
        };

        let unit_price = match self.unit_price {
            None => {
                errors.push(FieldError::new("unit_price", "is required"));
                None
            }
            Some(price) if !price.is_finite() || price < 0.0 => {
                errors.push(FieldError::new("unit_price", "must be a non-negative number"));
                None
            }
            Some(price) => Some(price),
        };

        let stock = match self.stock {
            None => {
                errors.push(FieldError::new("stock", "is required"));
                None
            }
            Some(stock) => match u32::try_from(stock) {
                Ok(stock) => Some(stock),
                Err(_) if stock < 0 => {
                    errors.push(FieldError::new("stock", "must not be negative"));
                    None
                }
                Err(_) => {
                    errors.push(FieldError::new("stock", "is too large"));
                    None
                }
            },
        };

        let product_type = match self.product_type {
            None => {
                errors.push(FieldError::new("product_type", "is required"));
                None
            }
            Some(raw) => match raw.parse::<ProductType>() {
                Ok(product_type) => Some(product_type),
                Err(e) => {
                    errors.push(FieldError::new("product_type", e.to_string()));
                    None
                }
            },
        };

        match (name, material, dimensions, unit_price, stock, product_type) {
            (
                Some(name),
                Some(material),
                Some(dimensions),
                Some(unit_price),
                Some(stock),
                Some(product_type),
            ) if errors.is_empty() => Ok(ValidProduct {
                name,
                material,
                dimensions,
                unit_price,
                stock,
                product_type,
            }),
            _ => Err(CoreError::Validation(errors)),
        }
    }
}

impl Product {
    pub fn from_valid(valid: ValidProduct) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: valid.name,
            material: valid.material,
            dimensions: valid.dimensions,
            unit_price: valid.unit_price,
            stock: valid.stock,
            product_type: valid.product_type,
            created_at: now,
            updated_at: now,
        }
    }
}
