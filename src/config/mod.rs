use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub summary_server: ServerConfig,
    pub database: DatabaseConfig,
    pub artifacts: ArtifactsConfig,
    pub recommendation: RecommendationConfig,
    pub summary: SummaryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: usize,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        let addr = format!("{}:{}", self.host, self.port).parse()?;
        Ok(addr)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

/// Locations of the exported training artifacts. Relative file names are
/// resolved against `dir`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactsConfig {
    pub dir: PathBuf,
    pub model_file: String,
    pub item_features_file: String,
    pub user_features_file: String,
    pub interactions_file: String,
    pub item_columns_file: String,
    pub user_columns_file: String,
    pub item_scaler_file: String,
    pub user_scaler_file: String,
    pub amenity_classes_file: String,
    pub top_amenities_file: String,
}

impl ArtifactsConfig {
    pub fn path(&self, file: &str) -> PathBuf {
        self.dir.join(file)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationConfig {
    pub default_top_n: usize,
    pub max_top_n: usize,
    pub k_similar_users: usize,
    pub min_interaction_weight: f32,
    pub positive_label: i64,
    pub predict_batch_size: usize,
    pub currency_suffix: String,
    pub strict_schema: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryConfig {
    pub inference_url: String,
    pub api_token: Option<String>,
    pub sentiment_model: String,
    pub summarization_model: String,
    pub max_input_chars: usize,
    pub max_summary_length: usize,
    pub min_summary_length: usize,
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 5000,
                workers: num_cpus::get(),
            },
            summary_server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 4000,
                workers: num_cpus::get(),
            },
            database: DatabaseConfig {
                url: "mysql://root@localhost:3306/test_accomodation".to_string(),
                max_connections: 10,
            },
            artifacts: ArtifactsConfig {
                dir: PathBuf::from("./model_data"),
                model_file: "ncf_model.onnx".to_string(),
                item_features_file: "item_features_ohe.csv".to_string(),
                user_features_file: "user_features_encoded_ohe.csv".to_string(),
                interactions_file: "interactions.csv".to_string(),
                item_columns_file: "item_feature_cols_ohe.json".to_string(),
                user_columns_file: "user_feature_cols_ohe.json".to_string(),
                item_scaler_file: "item_scaler_ohe.json".to_string(),
                user_scaler_file: "user_scaler_ohe.json".to_string(),
                amenity_classes_file: "amenity_classes_ohe.json".to_string(),
                top_amenities_file: "top_amenities_set_ohe.json".to_string(),
            },
            recommendation: RecommendationConfig {
                default_top_n: 10,
                max_top_n: 1000,
                k_similar_users: 30,
                min_interaction_weight: 0.5,
                positive_label: 1,
                predict_batch_size: 1024,
                currency_suffix: "VND".to_string(),
                strict_schema: false,
            },
            summary: SummaryConfig {
                inference_url: "https://api-inference.huggingface.co".to_string(),
                api_token: None,
                sentiment_model: "distilbert-base-uncased-finetuned-sst-2-english".to_string(),
                summarization_model: "facebook/bart-large-cnn".to_string(),
                max_input_chars: 1024,
                max_summary_length: 150,
                min_summary_length: 30,
                request_timeout_secs: 60,
            },
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let defaults = config::Config::try_from(&Config::default())?;
        let settings = config::Config::builder()
            .add_source(defaults)
            .add_source(config::File::with_name(path))
            .add_source(
                config::Environment::with_prefix("STAYREC")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Loads `path` when it exists, otherwise the defaults.
    pub fn load_or_default(path: &str) -> anyhow::Result<Self> {
        if std::path::Path::new(path).exists() {
            Self::from_file(path)
        } else {
            tracing::info!("Config file {} not found, using default configuration", path);
            Ok(Self::default())
        }
    }
}
