use anyhow::{Context, Result};
use orderflow_core::Catalog;

use crate::config::ServiceConfig;

const SEED_CATALOG: &str = include_str!("../data/catalog.json");

/// The catalog at `CATALOG_PATH`, or the bundled seed data.
pub fn load_catalog(config: &ServiceConfig) -> Result<Catalog> {
    match &config.catalog_path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read catalog {path}"))?;
            parse_catalog(&raw).with_context(|| format!("invalid catalog {path}"))
        }
        None => parse_catalog(SEED_CATALOG).context("invalid bundled catalog"),
    }
}

pub fn parse_catalog(raw: &str) -> Result<Catalog> {
    Ok(serde_json::from_str(raw)?)
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::*;

    fn config(catalog_path: Option<String>) -> ServiceConfig {
        let mut config = ServiceConfig::from_lookup("order-service", "0.0.0.0:3001", |key| {
            (key == "REDIS_URL").then(|| "redis://localhost:6379".to_string())
        })
        .unwrap();
        config.catalog_path = catalog_path;
        config
    }

    #[test]
    fn bundled_catalog_loads() {
        let catalog = load_catalog(&config(None)).unwrap();
        assert_eq!(catalog.restaurants.len(), 3);
        assert_eq!(
            catalog.menu_item("rest-2", "item-3").map(|item| item.price),
            Some(Decimal::new(600, 2))
        );
        assert_eq!(
            catalog.user("user-1").map(|user| user.address.as_str()),
            Some("221 River Street")
        );
    }

    #[test]
    fn catalog_path_overrides_the_seed() {
        let path = std::env::temp_dir().join(format!("orderflow-catalog-{}.json", std::process::id()));
        std::fs::write(
            &path,
            r#"{ "restaurants": [{ "id": "r", "name": "Solo", "menu": [] }] }"#,
        )
        .unwrap();

        let catalog = load_catalog(&config(Some(path.display().to_string()))).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(catalog.restaurants.len(), 1);
        assert!(catalog.users.is_empty());
    }

    #[test]
    fn unreadable_catalog_is_an_error() {
        let err = load_catalog(&config(Some("/nonexistent/catalog.json".to_string()))).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/catalog.json"));
    }
}
