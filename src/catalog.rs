use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fs, path::Path};
use uuid::Uuid;

use crate::error::CatalogError;
use crate::types::ServiceOffering;

/// Durations and prices of a barber's offerings.
#[cfg_attr(test, mockall::automock)]
pub trait ServiceCatalog: Send + Sync + 'static {
    /// Offerings for `services`, in request order. Any unknown id fails the
    /// whole lookup.
    fn resolve(
        &self,
        barber_id: Uuid,
        services: &[String],
    ) -> Result<Vec<ServiceOffering>, CatalogError>;

    /// The shortest bookable offering of the barber, if it has any.
    fn minimum_duration(&self, barber_id: Uuid) -> Result<Option<u32>, CatalogError>;
}

/// Catalog read once from a JSON file:
///
/// ```json
/// { "default": [ { "id": "cut", "name": "Haircut", "duration_minutes": 30, "price_cents": 2500 } ],
///   "barbers": { "<barber uuid>": [ ... ] } }
/// ```
///
/// Barbers without an own entry offer the `default` list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileServiceCatalog {
    #[serde(default)]
    default: Vec<ServiceOffering>,
    #[serde(default)]
    barbers: HashMap<Uuid, Vec<ServiceOffering>>,
}

impl FileServiceCatalog {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read service catalog {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse service catalog {}", path.display()))
    }

    pub fn from_offerings(default: Vec<ServiceOffering>) -> Self {
        Self {
            default,
            barbers: HashMap::new(),
        }
    }

    pub fn with_barber(mut self, barber_id: Uuid, offerings: Vec<ServiceOffering>) -> Self {
        self.barbers.insert(barber_id, offerings);
        self
    }

    fn offerings(&self, barber_id: Uuid) -> &[ServiceOffering] {
        self.barbers
            .get(&barber_id)
            .map(Vec::as_slice)
            .unwrap_or(self.default.as_slice())
    }
}

impl ServiceCatalog for FileServiceCatalog {
    fn resolve(
        &self,
        barber_id: Uuid,
        services: &[String],
    ) -> Result<Vec<ServiceOffering>, CatalogError> {
        let offerings = self.offerings(barber_id);
        services
            .iter()
            .map(|service| {
                offerings
                    .iter()
                    .find(|offering| offering.id == *service)
                    .cloned()
                    .ok_or_else(|| CatalogError::UnknownService {
                        barber_id,
                        service: service.clone(),
                    })
            })
            .collect()
    }

    fn minimum_duration(&self, barber_id: Uuid) -> Result<Option<u32>, CatalogError> {
        Ok(self
            .offerings(barber_id)
            .iter()
            .map(|offering| offering.duration_minutes)
            .filter(|duration| *duration > 0)
            .min())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;

    fn offering(id: &str, duration_minutes: u32, price_cents: i64) -> ServiceOffering {
        ServiceOffering {
            id: id.into(),
            name: id.to_uppercase(),
            duration_minutes,
            price_cents,
        }
    }

    #[test]
    fn test_resolve_keeps_request_order() {
        let catalog =
            FileServiceCatalog::from_offerings(vec![offering("cut", 30, 2500), offering("beard", 15, 1200)]);

        let resolved = catalog
            .resolve(Uuid::new_v4(), &["beard".into(), "cut".into()])
            .unwrap();
        assert_eq!(resolved[0].id, "beard");
        assert_eq!(resolved[1].id, "cut");
        assert_eq!(catalog.minimum_duration(Uuid::new_v4()).unwrap(), Some(15));
    }

    #[test]
    fn test_unknown_service_fails_lookup() {
        let barber_id = Uuid::new_v4();
        let catalog = FileServiceCatalog::from_offerings(vec![offering("cut", 30, 2500)]);

        assert_eq!(
            catalog.resolve(barber_id, &["cut".into(), "perm".into()]),
            Err(CatalogError::UnknownService {
                barber_id,
                service: "perm".into()
            })
        );
    }

    #[test]
    fn test_barber_entry_replaces_default() {
        let barber_id = Uuid::new_v4();
        let catalog = FileServiceCatalog::from_offerings(vec![offering("cut", 30, 2500)])
            .with_barber(barber_id, vec![offering("fade", 45, 3500)]);

        assert!(catalog.resolve(barber_id, &["cut".into()]).is_err());
        assert_eq!(catalog.minimum_duration(barber_id).unwrap(), Some(45));
        assert_eq!(catalog.minimum_duration(Uuid::new_v4()).unwrap(), Some(30));
    }

    #[test]
    fn test_load_from_file() {
        let barber_id = Uuid::new_v4();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "default": [{{ "id": "cut", "name": "Haircut", "duration_minutes": 30, "price_cents": 2500 }}],
                "barbers": {{ "{barber_id}": [{{ "id": "shave", "name": "Shave", "duration_minutes": 20, "price_cents": 1500 }}] }}
            }}"#
        )
        .unwrap();

        let catalog = FileServiceCatalog::load(file.path()).unwrap();
        assert_eq!(catalog.resolve(barber_id, &["shave".into()]).unwrap()[0].price_cents, 1500);
        assert_eq!(catalog.minimum_duration(Uuid::new_v4()).unwrap(), Some(30));
    }

    #[test]
    fn test_load_rejects_malformed_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(FileServiceCatalog::load(file.path()).is_err());
    }
}
