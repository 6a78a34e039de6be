use secrecy::SecretString;
use serde::Deserialize;

use crate::shared::ValidationError;

/// Connection settings for the search engine receiving the documents.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ElasticsearchConfig {
    /// Base url, e.g. `http://localhost:9200`.
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<SecretString>,
    /// Refresh interval restored once an init has finished bulk loading.
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: String,
}

impl ElasticsearchConfig {
    pub const DEFAULT_REFRESH_INTERVAL: &'static str = "1s";

    pub fn validate(&self) -> Result<(), ValidationError> {
        if !(self.url.starts_with("http://") || self.url.starts_with("https://")) {
            return Err(ValidationError::InvalidFieldValue {
                field: "elasticsearch.url".to_string(),
                constraint: "must start with http:// or https://".to_string(),
            });
        }

        if self.password.is_some() && self.username.is_none() {
            return Err(ValidationError::InvalidFieldValue {
                field: "elasticsearch.username".to_string(),
                constraint: "must be set when a password is configured".to_string(),
            });
        }

        Ok(())
    }
}

fn default_refresh_interval() -> String {
    ElasticsearchConfig::DEFAULT_REFRESH_INTERVAL.to_string()
}
