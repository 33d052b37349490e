use anyhow::{Context, Result};
use serde::Deserialize;
use std::net::{SocketAddr, ToSocketAddrs};

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen_addr: SocketAddr,
    pub clickhouse: ClickHouseConfig,
    pub api_key: Option<String>,
    pub default_limit: u32,
    pub max_limit: u32,
    pub tables: TableConfig,
}

#[derive(Debug, Clone)]
pub struct ClickHouseConfig {
    pub url: String,
    pub user: String,
    pub password: String,
    pub database: String,
}

/// Physical names of the warehouse tables each report reads from.
#[derive(Debug, Clone)]
pub struct TableConfig {
    pub funnel: String,
    pub conversion: String,
    pub cancellations: String,
    pub cities: String,
    pub cancellations_time_column: String,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    ops_metrics_listen_addr: Option<String>,
    #[serde(default)]
    ops_metrics_listen_host: Option<String>,
    #[serde(default)]
    ops_metrics_listen_port: Option<u16>,
    #[serde(default)]
    clickhouse_url: Option<String>,
    #[serde(default = "default_clickhouse_host")]
    clickhouse_host: String,
    #[serde(default = "default_clickhouse_port")]
    clickhouse_port: u16,
    #[serde(default = "default_clickhouse_user")]
    clickhouse_user: String,
    #[serde(default)]
    clickhouse_password: String,
    #[serde(default)]
    clickhouse_database: Option<String>,
    #[serde(default)]
    ops_metrics_api_key: Option<String>,
    #[serde(default = "default_limit")]
    ops_metrics_default_limit: u32,
    #[serde(default = "default_max_limit")]
    ops_metrics_max_limit: u32,
    #[serde(default = "default_funnel_table")]
    ops_metrics_funnel_table: String,
    #[serde(default = "default_conversion_table")]
    ops_metrics_conversion_table: String,
    #[serde(default = "default_cancellations_table")]
    ops_metrics_cancellations_table: String,
    #[serde(default = "default_cities_table")]
    ops_metrics_cities_table: String,
    #[serde(default = "default_cancellations_time_column")]
    ops_metrics_cancellations_time_column: String,
}

fn default_clickhouse_host() -> String {
    "localhost".to_string()
}

const fn default_clickhouse_port() -> u16 {
    8123
}

fn default_clickhouse_user() -> String {
    "default".to_string()
}

const fn default_limit() -> u32 {
    50
}

const fn default_max_limit() -> u32 {
    1000
}

fn default_funnel_table() -> String {
    "ride_funnel_hourly".to_string()
}

fn default_conversion_table() -> String {
    "master_conversion_hourly".to_string()
}

fn default_cancellations_table() -> String {
    "ride_cancellations_hourly".to_string()
}

fn default_cities_table() -> String {
    "city_registry".to_string()
}

fn default_cancellations_time_column() -> String {
    "local_time".to_string()
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let raw: RawConfig = envy::from_env()
            .context("failed to parse OPS_METRICS_* / CLICKHOUSE_* environment variables")?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Self> {
        let listen_addr = resolve_addr(
            raw.ops_metrics_listen_addr,
            raw.ops_metrics_listen_host,
            raw.ops_metrics_listen_port,
        )?;

        let database = raw
            .clickhouse_database
            .filter(|value| !value.trim().is_empty())
            .context("CLICKHOUSE_DATABASE must be set")?;
        validate_identifier("CLICKHOUSE_DATABASE", &database)?;

        let url = raw
            .clickhouse_url
            .unwrap_or_else(|| format!("http://{}:{}", raw.clickhouse_host, raw.clickhouse_port));

        let tables = TableConfig {
            funnel: raw.ops_metrics_funnel_table,
            conversion: raw.ops_metrics_conversion_table,
            cancellations: raw.ops_metrics_cancellations_table,
            cities: raw.ops_metrics_cities_table,
            cancellations_time_column: raw.ops_metrics_cancellations_time_column,
        };
        tables.validate()?;

        let default_limit = raw.ops_metrics_default_limit.max(1);
        Ok(Self {
            listen_addr,
            clickhouse: ClickHouseConfig {
                url,
                user: raw.clickhouse_user,
                password: raw.clickhouse_password,
                database,
            },
            api_key: raw.ops_metrics_api_key.filter(|key| !key.is_empty()),
            default_limit,
            max_limit: raw.ops_metrics_max_limit.max(default_limit),
            tables,
        })
    }

    /// Configuration with default tables and no API key, pointed at `url`.
    pub fn embedded(url: String, database: String) -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            clickhouse: ClickHouseConfig {
                url,
                user: default_clickhouse_user(),
                password: String::new(),
                database,
            },
            api_key: None,
            default_limit: default_limit(),
            max_limit: default_max_limit(),
            tables: TableConfig::default(),
        }
    }
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            funnel: default_funnel_table(),
            conversion: default_conversion_table(),
            cancellations: default_cancellations_table(),
            cities: default_cities_table(),
            cancellations_time_column: default_cancellations_time_column(),
        }
    }
}

impl TableConfig {
    fn validate(&self) -> Result<()> {
        validate_identifier("OPS_METRICS_FUNNEL_TABLE", &self.funnel)?;
        validate_identifier("OPS_METRICS_CONVERSION_TABLE", &self.conversion)?;
        validate_identifier("OPS_METRICS_CANCELLATIONS_TABLE", &self.cancellations)?;
        validate_identifier("OPS_METRICS_CITIES_TABLE", &self.cities)?;

        // The cancellations table carries both a `date` and a `local_time` column.
        match self.cancellations_time_column.as_str() {
            "local_time" | "date" => Ok(()),
            other => anyhow::bail!(
                "OPS_METRICS_CANCELLATIONS_TIME_COLUMN must be 'local_time' or 'date', got '{other}'"
            ),
        }
    }
}

/// Table and database names are spliced into SQL text, so only `[A-Za-z0-9_]`
/// segments joined by at most one `.` are accepted.
fn validate_identifier(var: &str, value: &str) -> Result<()> {
    let segments: Vec<&str> = value.split('.').collect();
    let valid = segments.len() <= 2
        && segments.iter().all(|segment| {
            !segment.is_empty()
                && segment
                    .chars()
                    .all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
        });

    if valid {
        Ok(())
    } else {
        anyhow::bail!("{var} is not a valid identifier: '{value}'")
    }
}

fn resolve_addr(
    addr: Option<String>,
    host: Option<String>,
    port: Option<u16>,
) -> Result<SocketAddr> {
    if let Some(addr) = addr {
        return addr
            .to_socket_addrs()
            .context("invalid OPS_METRICS_LISTEN_ADDR value")?
            .next()
            .context("OPS_METRICS_LISTEN_ADDR resolved to no addresses");
    }

    let host = host.unwrap_or_else(|| "0.0.0.0".to_string());
    let port = port.unwrap_or(3001);
    let combined = format!("{}:{}", host, port);
    combined
        .to_socket_addrs()
        .context("invalid listen host/port combination")?
        .next()
        .context("listen address resolved to no targets")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(vars: &[(&str, &str)]) -> Result<AppConfig> {
        let raw: RawConfig = envy::from_iter(
            vars.iter()
                .map(|(key, value)| (key.to_string(), value.to_string())),
        )?;
        AppConfig::from_raw(raw)
    }

    #[test]
    fn applies_defaults() {
        let config = parse(&[("CLICKHOUSE_DATABASE", "analytics")]).unwrap();
        assert_eq!(config.listen_addr.port(), 3001);
        assert_eq!(config.clickhouse.url, "http://localhost:8123");
        assert_eq!(config.clickhouse.user, "default");
        assert_eq!(config.clickhouse.database, "analytics");
        assert_eq!(config.default_limit, 50);
        assert_eq!(config.tables.cancellations_time_column, "local_time");
        assert!(config.api_key.is_none());
    }

    #[test]
    fn requires_database() {
        let err = parse(&[("CLICKHOUSE_HOST", "ch")]).unwrap_err();
        assert!(err.to_string().contains("CLICKHOUSE_DATABASE"));
    }

    #[test]
    fn rejects_non_numeric_port() {
        assert!(parse(&[("CLICKHOUSE_DATABASE", "analytics"), ("CLICKHOUSE_PORT", "http")]).is_err());
    }

    #[test]
    fn builds_url_from_host_and_port() {
        let config = parse(&[
            ("CLICKHOUSE_DATABASE", "analytics"),
            ("CLICKHOUSE_HOST", "warehouse.internal"),
            ("CLICKHOUSE_PORT", "18123"),
        ])
        .unwrap();
        assert_eq!(config.clickhouse.url, "http://warehouse.internal:18123");
    }

    #[test]
    fn rejects_table_names_with_sql() {
        let err = parse(&[
            ("CLICKHOUSE_DATABASE", "analytics"),
            ("OPS_METRICS_FUNNEL_TABLE", "funnel; DROP TABLE x"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("OPS_METRICS_FUNNEL_TABLE"));
    }

    #[test]
    fn rejects_unknown_time_column() {
        assert!(parse(&[
            ("CLICKHOUSE_DATABASE", "analytics"),
            ("OPS_METRICS_CANCELLATIONS_TIME_COLUMN", "inserted_at"),
        ])
        .is_err());
    }

    #[test]
    fn max_limit_never_below_default() {
        let config = parse(&[
            ("CLICKHOUSE_DATABASE", "analytics"),
            ("OPS_METRICS_DEFAULT_LIMIT", "200"),
            ("OPS_METRICS_MAX_LIMIT", "10"),
        ])
        .unwrap();
        assert_eq!(config.max_limit, 200);
    }
}
