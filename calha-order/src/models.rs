use std::fmt;
use std::str::FromStr;

use calha_core::{CoreError, OrderLine, Record};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Order status in the production lifecycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum OrderStatus {
    #[serde(rename = "pendente")]
    Pendente,
    #[serde(rename = "em produção")]
    EmProducao,
    #[serde(rename = "concluído")]
    Concluido,
    #[serde(rename = "cancelado")]
    Cancelado,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pendente => "pendente",
            OrderStatus::EmProducao => "em produção",
            OrderStatus::Concluido => "concluído",
            OrderStatus::Cancelado => "cancelado",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Concluido | OrderStatus::Cancelado)
    }

    /// pendente → em produção → concluído, pendente → cancelado.
    /// Staying in the same status is always allowed.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;

        *self == next
            || matches!(
                (self, next),
                (Pendente, EmProducao) | (EmProducao, Concluido) | (Pendente, Cancelado)
            )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "pendente" => Ok(OrderStatus::Pendente),
            "em produção" => Ok(OrderStatus::EmProducao),
            "concluído" => Ok(OrderStatus::Concluido),
            "cancelado" => Ok(OrderStatus::Cancelado),
            other => Err(CoreError::InvalidStatus(other.to_string())),
        }
    }
}

/// A customer's production order.
///
/// `total` and `estimated_production_time` are computed once, from the
/// product snapshot taken when the order was placed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    pub id: String,
    pub customer_id: String,
    pub lines: Vec<OrderLine>,
    pub status: OrderStatus,
    pub order_date: DateTime<Utc>,
    /// Minutes
    pub estimated_production_time: f64,
    pub total: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn new(
        customer_id: String,
        lines: Vec<OrderLine>,
        total: f64,
        estimated_production_time: f64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            customer_id,
            lines,
            status: OrderStatus::Pendente,
            order_date: now,
            estimated_production_time,
            total,
            created_at: now,
            updated_at: now,
        }
    }
}

impl Record for Order {
    const COLLECTION: &'static str = "orders";

    fn id(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_wire_values() {
        assert_eq!(serde_json::to_value(OrderStatus::EmProducao).unwrap(), json!("em produção"));
        let parsed: OrderStatus = serde_json::from_value(json!("concluído")).unwrap();
        assert_eq!(parsed, OrderStatus::Concluido);
        assert_eq!("cancelado".parse::<OrderStatus>().unwrap(), OrderStatus::Cancelado);
        assert!(matches!("xyz".parse::<OrderStatus>(), Err(CoreError::InvalidStatus(_))));
    }

    #[test]
    fn test_transitions() {
        use OrderStatus::*;

        assert!(Pendente.can_transition_to(EmProducao));
        assert!(EmProducao.can_transition_to(Concluido));
        assert!(Pendente.can_transition_to(Cancelado));
        assert!(EmProducao.can_transition_to(EmProducao));

        assert!(!Pendente.can_transition_to(Concluido));
        assert!(!EmProducao.can_transition_to(Cancelado));
        assert!(!Concluido.can_transition_to(Cancelado));
        assert!(!Cancelado.can_transition_to(Pendente));
    }

    #[test]
    fn test_new_order_is_pending() {
        let order = Order::new("c1".to_string(), vec![OrderLine::new("p1", 2)], 20.0, 120.0);
        assert_eq!(order.status, OrderStatus::Pendente);
        assert_eq!(order.order_date, order.created_at);
        assert_eq!(order.lines.len(), 1);
    }
}
