use crate::configuration::Configuration;
use chrono::NaiveTime;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(version, about = "Barber slot scheduling and booking service")]
pub struct ConfigurationHandler {
    /// Password barbers send in the x-admin-password header
    #[arg(long, env = "ADMIN_PASSWORD", default_value = "123")]
    pub password: String,

    #[arg(long, env = "PORT", default_value = "3000")]
    pub port: String,

    /// PostgreSQL connection url, slots are kept in memory without it
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    /// End of the working day as HH:MM
    #[arg(long, env = "END_OF_DAY", default_value = "20:00", value_parser = parse_time)]
    pub end_of_day: NaiveTime,

    /// JSON file with the service offerings
    #[arg(long, env = "CATALOG_PATH")]
    pub catalog_path: Option<PathBuf>,

    #[arg(long, env = "MINIMUM_SERVICE_MINUTES", default_value_t = 30)]
    pub minimum_service_minutes: u32,
}

fn parse_time(value: &str) -> Result<NaiveTime, chrono::ParseError> {
    NaiveTime::parse_from_str(value, "%H:%M")
}

impl ConfigurationHandler {
    pub fn parse_arguments() -> Self {
        Self::parse()
    }
}

impl Configuration for ConfigurationHandler {
    fn password(&self) -> String {
        self.password.clone()
    }

    fn port(&self) -> String {
        self.port.clone()
    }

    fn database_url(&self) -> Option<String> {
        self.database_url.clone()
    }

    fn end_of_day(&self) -> NaiveTime {
        self.end_of_day
    }

    fn catalog_path(&self) -> Option<PathBuf> {
        self.catalog_path.clone()
    }

    fn minimum_service_minutes(&self) -> u32 {
        self.minimum_service_minutes
    }
}
