//! Installed apps. An app contributes model declarations and an ordered list
//! of seed CSV files under `data/<app>/`. The core app is always installed;
//! further apps are enabled by name through `INSTALLED_APPS`.

pub mod logistics;

use crate::error::ConfigError;
use crate::model::{ModelDef, ModelRegistry};
use crate::settings::Settings;

pub struct App {
    pub name: &'static str,
    pub models: fn() -> Vec<ModelDef>,
    pub import_order: &'static [&'static str],
}

const CORE: App = App {
    name: "core",
    models: crate::models::core_models,
    import_order: &["organization.csv", "user.csv", "role.csv", "cron.csv"],
};

const LOGISTICS: App = App {
    name: "logistics",
    models: logistics::models,
    import_order: &["depot.csv", "vehicle.csv"],
};

pub fn installed(settings: &Settings) -> Vec<App> {
    let mut apps = vec![CORE];
    for name in &settings.installed_apps {
        match name.as_str() {
            "logistics" => apps.push(LOGISTICS),
            other => tracing::warn!(app = other, "unknown app in INSTALLED_APPS"),
        }
    }
    apps
}

/// Build the model registry from every installed app.
pub fn build_registry(settings: &Settings) -> Result<ModelRegistry, ConfigError> {
    let mut models = Vec::new();
    for app in installed(settings) {
        models.extend((app.models)());
    }
    ModelRegistry::build(models)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings_with(apps: &[&str]) -> Settings {
        Settings {
            database_url: String::new(),
            bind_addr: String::new(),
            app_secret: String::new(),
            access_token_expire_minutes: 60,
            default_org_id: 1,
            installed_apps: apps.iter().map(|s| s.to_string()).collect(),
            data_dir: "data".into(),
            upload_size_limit: 5 * 1024 * 1024,
        }
    }

    #[test]
    fn core_registry_builds() {
        let registry = build_registry(&settings_with(&[])).unwrap();
        assert!(registry.get("user").is_some());
        assert!(registry.get("vehicle").is_none());
    }

    #[test]
    fn logistics_app_adds_models() {
        let registry = build_registry(&settings_with(&["logistics"])).unwrap();
        assert!(registry.get("vehicle").is_some());
        assert!(registry.get("scan").is_some());
        // demo models carry the ownership pair
        assert!(registry.get("vehicle").unwrap().has_column("owner_id"));
    }
}
