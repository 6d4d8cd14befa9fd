use clap::Parser;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::catalog::SchemaCatalog;

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub connection_string: String,
    pub pool_size: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            connection_string: "nl-query.duckdb".to_string(),
            pool_size: 5,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    pub backend: String, // "remote" or "ollama"
    pub model: String,   // Chat model name
    // Without an embedding model the table selector passes every declared table through
    #[serde(default)]
    pub embedding_model: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_url: Option<String>,
    #[serde(default)]
    pub embedding_url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

fn default_temperature() -> f32 {
    0.1
}

fn default_llm_timeout() -> u64 {
    60
}

/// Tunables of the question-to-SQL pipeline
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PipelineSettings {
    pub max_attempts: usize,
    pub similarity_threshold: f32,
    pub max_tables: usize,
    pub statement_timeout_secs: u64,
    pub embedding_cache: bool,
    pub read_only: bool,
    pub sql_dialect: String,
    pub summary_row_limit: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            similarity_threshold: 0.20,
            max_tables: 2,
            statement_timeout_secs: 30,
            embedding_cache: true,
            read_only: true,
            sql_dialect: "DuckDB".to_string(),
            summary_row_limit: 50,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub web: WebConfig,
    pub llm: LlmConfig,
    #[serde(default)]
    pub pipeline: PipelineSettings,
    #[serde(default)]
    pub catalog: SchemaCatalog,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to
    #[arg(short, long)]
    pub port: Option<u16>,

    /// DuckDB database file to query
    #[arg(long)]
    pub database: Option<String>,

    /// Answer a single question, print the reply as JSON and exit
    #[arg(long, value_name = "QUESTION")]
    pub ask: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub log_json: bool,
}

impl AppConfig {
    pub fn new(args: &CliArgs) -> Result<Self, ConfigError> {
        let mut config_builder = Config::builder();

        // Add configuration from file if specified
        if let Some(config_path) = &args.config {
            config_builder = config_builder.add_source(File::from(config_path.as_path()));
        } else {
            // Check for config in default locations
            let default_locations = vec![
                "config.toml",
                "config/config.toml",
                "/etc/nl-query/config.toml",
            ];

            for location in default_locations {
                if Path::new(location).exists() {
                    config_builder =
                        config_builder.add_source(File::new(location, config::FileFormat::Toml));
                    break;
                }
            }
        }

        // NLQ_LLM__API_KEY overrides llm.api_key
        config_builder = config_builder.add_source(
            Environment::with_prefix("NLQ")
                .prefix_separator("_")
                .separator("__"),
        );

        let mut config: AppConfig = config_builder.build()?.try_deserialize()?;

        // Override with command line args if provided
        if let Some(host) = &args.host {
            config.web.host = host.clone();
        }
        if let Some(port) = args.port {
            config.web.port = port;
        }
        if let Some(database) = &args.database {
            config.database.connection_string = database.clone();
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let pipeline = &self.pipeline;
        if pipeline.max_attempts == 0 {
            return Err(ConfigError::Message(
                "pipeline.max_attempts must be at least 1".to_string(),
            ));
        }
        if pipeline.max_tables == 0 {
            return Err(ConfigError::Message(
                "pipeline.max_tables must be at least 1".to_string(),
            ));
        }
        if !(-1.0..=1.0).contains(&pipeline.similarity_threshold) {
            return Err(ConfigError::Message(format!(
                "pipeline.similarity_threshold must be within [-1, 1], got {}",
                pipeline.similarity_threshold
            )));
        }
        if pipeline.statement_timeout_secs == 0 {
            return Err(ConfigError::Message(
                "pipeline.statement_timeout_secs must be positive".to_string(),
            ));
        }
        if self.database.pool_size == 0 {
            return Err(ConfigError::Message(
                "database.pool_size must be at least 1".to_string(),
            ));
        }

        validate_catalog(&self.catalog)?;
        validate_catalog_name(&self.database.connection_string, &self.catalog)
    }
}

/// DuckDB names the attached catalog after the file stem; a schema with the
/// same name makes `name.table` ambiguous.
fn validate_catalog_name(connection_string: &str, catalog: &SchemaCatalog) -> Result<(), ConfigError> {
    if connection_string == ":memory:" {
        return Ok(());
    }

    let Some(stem) = Path::new(connection_string).file_stem().and_then(|s| s.to_str()) else {
        return Ok(());
    };

    match catalog
        .schemas
        .iter()
        .find(|schema| schema.name.eq_ignore_ascii_case(stem))
    {
        Some(schema) => Err(ConfigError::Message(format!(
            "schema '{}' has the same name as database file '{}'; rename the file or the schema",
            schema.name, connection_string
        ))),
        None => Ok(()),
    }
}

fn validate_catalog(catalog: &SchemaCatalog) -> Result<(), ConfigError> {
    if catalog.schemas.is_empty() {
        return Err(ConfigError::Message(
            "catalog must declare at least one schema".to_string(),
        ));
    }

    let mut schema_names = HashSet::new();
    for schema in &catalog.schemas {
        if !schema_names.insert(schema.name.as_str()) {
            return Err(ConfigError::Message(format!(
                "schema '{}' is declared twice",
                schema.name
            )));
        }
        if schema.tables.is_empty() {
            return Err(ConfigError::Message(format!(
                "schema '{}' declares no tables",
                schema.name
            )));
        }

        let mut table_names = HashSet::new();
        for table in &schema.tables {
            if table.trim().is_empty() {
                return Err(ConfigError::Message(format!(
                    "schema '{}' contains an empty table name",
                    schema.name
                )));
            }
            if !table_names.insert(table.as_str()) {
                return Err(ConfigError::Message(format!(
                    "table '{}.{}' is declared twice",
                    schema.name, table
                )));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::SchemaDescriptor;
    use config::FileFormat;

    const SAMPLE: &str = r#"
        [llm]
        backend = "ollama"
        model = "llama3"
        embedding_model = "nomic-embed-text"

        [pipeline]
        max_tables = 3

        [catalog]
        description = "Formula 1 statistics"

        [[catalog.schemas]]
        name = "f1"
        tables = ["drivers", "constructor_championships"]
    "#;

    fn parse(toml: &str) -> AppConfig {
        Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_defaults_fill_missing_sections() {
        let config = parse(SAMPLE);

        assert_eq!(config.database.pool_size, 5);
        assert_eq!(config.web.port, 3000);
        assert_eq!(config.llm.temperature, 0.1);
        assert_eq!(config.llm.embedding_model.as_deref(), Some("nomic-embed-text"));
        assert_eq!(config.pipeline.max_tables, 3);
        assert_eq!(config.pipeline.max_attempts, 3);
        assert_eq!(config.pipeline.statement_timeout_secs, 30);
        assert!((config.pipeline.similarity_threshold - 0.20).abs() < f32::EPSILON);
        assert_eq!(config.catalog.tables().len(), 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_catalog() {
        let mut config = parse(SAMPLE);
        config.catalog.schemas.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_duplicate_tables() {
        let mut config = parse(SAMPLE);
        config.catalog.schemas.push(SchemaDescriptor {
            name: "other".to_string(),
            description: None,
            tables: vec!["laps".to_string(), "laps".to_string()],
        });
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("other.laps"));
    }

    #[test]
    fn test_validate_rejects_schema_named_like_database_file() {
        let mut config = parse(SAMPLE);
        config.database.connection_string = "data/F1.duckdb".to_string();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("'f1'"));

        config.database.connection_string = "data/stats.duckdb".to_string();
        assert!(config.validate().is_ok());

        config.database.connection_string = ":memory:".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_attempts_and_bad_threshold() {
        let mut config = parse(SAMPLE);
        config.pipeline.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = parse(SAMPLE);
        config.pipeline.similarity_threshold = 1.5;
        assert!(config.validate().is_err());
    }
}
