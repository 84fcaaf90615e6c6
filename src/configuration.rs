use chrono::NaiveTime;
use std::path::PathBuf;

pub trait Configuration: Clone + Send + Sync + 'static {
    fn password(&self) -> String;
    fn port(&self) -> String;
    fn database_url(&self) -> Option<String>;
    /// Latest end of any free window when a day has no later slot.
    fn end_of_day(&self) -> NaiveTime;
    fn catalog_path(&self) -> Option<PathBuf>;
    /// Minimum gap worth keeping for barbers without catalog offerings.
    fn minimum_service_minutes(&self) -> u32;
}
