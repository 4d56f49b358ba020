use anyhow::{bail, Context};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;

use calha_core::NewUser;

use crate::app_config::Config;
use crate::state::Services;

#[derive(Debug, Parser)]
#[command(name = "calha", about = "Order and stock tooling for the calha catalog")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List catalog products
    Products {
        #[arg(long, default_value_t = calha_core::DEFAULT_PAGE)]
        page: usize,
        #[arg(long, default_value_t = calha_core::DEFAULT_PAGE_LIMIT)]
        limit: usize,
    },
    /// Show one product with its manufacturing cost
    Product { id: String },
    /// List orders
    Orders {
        #[arg(long, default_value_t = calha_core::DEFAULT_PAGE)]
        page: usize,
        #[arg(long, default_value_t = calha_core::DEFAULT_PAGE_LIMIT)]
        limit: usize,
    },
    /// List registered users
    Users {
        #[arg(long, default_value_t = calha_core::DEFAULT_PAGE)]
        page: usize,
        #[arg(long, default_value_t = calha_core::DEFAULT_PAGE_LIMIT)]
        limit: usize,
    },
    /// Create the configured admin user unless an admin already exists
    Install,
    /// Revenue and production averages of completed orders
    Report {
        /// RFC 3339 timestamp or YYYY-MM-DD (start of day)
        #[arg(long)]
        from: String,
        /// RFC 3339 timestamp or YYYY-MM-DD (end of day)
        #[arg(long)]
        to: String,
    },
    /// Report plus quantities sold per product
    Sales {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
    },
}

#[derive(Debug, Serialize)]
struct ProductWithCost {
    #[serde(flatten)]
    product: calha_catalog::Product,
    manufacturing_cost: f64,
}

/// Parse a report bound. Date-only values cover the whole day, so
/// `--from 2024-01-01 --to 2024-01-31` includes orders placed on the 31st.
pub fn parse_bound(value: &str, end_of_day: bool) -> anyhow::Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(ts.with_timezone(&Utc));
    }

    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .with_context(|| format!("{value:?} is neither RFC 3339 nor YYYY-MM-DD"))?;
    let time = if end_of_day {
        NaiveTime::from_hms_nano_opt(23, 59, 59, 999_999_999)
    } else {
        Some(NaiveTime::MIN)
    };
    let Some(time) = time else {
        bail!("invalid time of day");
    };
    Ok(date.and_time(time).and_utc())
}

pub async fn run(cli: Cli, config: &Config, services: &Services) -> anyhow::Result<String> {
    let output = match cli.command {
        Command::Products { page, limit } => to_json(&services.catalog.list(page, limit).await?)?,
        Command::Product { id } => {
            let product = services.catalog.get_by_id(&id).await?;
            let manufacturing_cost = services.pricing.manufacturing_cost(&product);
            to_json(&ProductWithCost {
                product,
                manufacturing_cost,
            })?
        }
        Command::Orders { page, limit } => to_json(&services.orders.list(page, limit).await?)?,
        Command::Users { page, limit } => to_json(&services.users.list(page, limit).await?)?,
        Command::Install => {
            let admin = NewUser {
                full_name: config.admin.full_name.clone(),
                email: config.admin.email.clone(),
                password: config.admin.password.clone(),
                role: Default::default(),
            };
            match services.users.ensure_admin(admin).await? {
                Some(profile) => to_json(&profile)?,
                None => "Admin user already exists".to_string(),
            }
        }
        Command::Report { from, to } => {
            let (start, end) = (parse_bound(&from, false)?, parse_bound(&to, true)?);
            to_json(&services.reports.generate_report(start, end).await?)?
        }
        Command::Sales { from, to } => {
            let (start, end) = (parse_bound(&from, false)?, parse_bound(&to, true)?);
            to_json(&services.reports.sales_report(start, end).await?)?
        }
    };
    Ok(output)
}

fn to_json<T: Serialize>(value: &T) -> anyhow::Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_config::{Config, StorageBackend};
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_parse_bound() {
        let start = parse_bound("2024-03-01", false).unwrap();
        assert_eq!((start.day(), start.hour(), start.minute()), (1, 0, 0));

        let end = parse_bound("2024-03-31", true).unwrap();
        assert_eq!((end.day(), end.hour(), end.minute(), end.second()), (31, 23, 59, 59));

        let exact = parse_bound("2024-03-10T12:30:00-03:00", false).unwrap();
        assert_eq!(exact.hour(), 15);

        assert!(parse_bound("31/03/2024", false).is_err());
    }

    #[test]
    fn test_cli_parses_report_args() {
        let cli = Cli::try_parse_from(["calha", "report", "--from", "2024-01-01", "--to", "2024-01-31"]).unwrap();
        assert!(matches!(cli.command, Command::Report { .. }));

        let cli = Cli::try_parse_from(["calha", "products"]).unwrap();
        assert!(matches!(cli.command, Command::Products { page: 1, limit: 10 }));
    }

    #[tokio::test]
    async fn test_report_on_empty_store() {
        let mut config = Config::default();
        config.storage.backend = StorageBackend::Memory;
        let services = Services::build(&config);

        let cli = Cli::try_parse_from(["calha", "report", "--from", "2024-01-01", "--to", "2024-01-31"]).unwrap();
        let output: serde_json::Value = serde_json::from_str(&run(cli, &config, &services).await.unwrap()).unwrap();
        assert_eq!(output["total_orders"], 0);
        assert_eq!(output["average_order_value"], 0.0);
    }

    #[tokio::test]
    async fn test_install_is_idempotent() {
        let mut config = Config::default();
        config.storage.backend = StorageBackend::Memory;
        let services = Services::build(&config);

        let install = || Cli::try_parse_from(["calha", "install"]).unwrap();
        let created: serde_json::Value =
            serde_json::from_str(&run(install(), &config, &services).await.unwrap()).unwrap();
        assert_eq!(created["role"], "admin");
        assert_eq!(created["email"], "admin@admin.com");

        let again = run(install(), &config, &services).await.unwrap();
        assert_eq!(again, "Admin user already exists");

        let users = Cli::try_parse_from(["calha", "users"]).unwrap();
        let listed: serde_json::Value =
            serde_json::from_str(&run(users, &config, &services).await.unwrap()).unwrap();
        assert_eq!(listed["total"], 1);
    }
}
