use culler_core::AppError;

/// Configuration for the database connection pool.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    /// Rows are scoped by namespace so several accounts can share a database.
    pub namespace: String,
}

impl DatabaseConfig {
    /// Read configuration from environment variables.
    ///
    /// - `DATABASE_URL` (required)
    /// - `DATABASE_MAX_CONNECTIONS` (optional, defaults to 5)
    /// - `CULLER_STATE_NAMESPACE` (optional, defaults to `default`)
    pub fn from_env() -> Result<Self, AppError> {
        let url = std::env::var("DATABASE_URL").map_err(|_| {
            AppError::ConfigError("DATABASE_URL not set. Required for the Postgres store.".into())
        })?;
        Self::from_parts(
            url,
            std::env::var("DATABASE_MAX_CONNECTIONS").ok(),
            std::env::var("CULLER_STATE_NAMESPACE").ok(),
        )
    }

    fn from_parts(
        url: String,
        max_connections: Option<String>,
        namespace: Option<String>,
    ) -> Result<Self, AppError> {
        let max_connections = match max_connections {
            None => 5,
            Some(raw) => {
                let parsed: u32 = raw.parse().map_err(|_| {
                    AppError::ConfigError(format!(
                        "Invalid DATABASE_MAX_CONNECTIONS '{raw}': must be a positive integer"
                    ))
                })?;
                if parsed == 0 {
                    return Err(AppError::ConfigError(
                        "DATABASE_MAX_CONNECTIONS must be at least 1".into(),
                    ));
                }
                parsed
            }
        };

        let namespace = namespace
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| "default".to_string());

        Ok(Self {
            url,
            max_connections,
            namespace,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "postgresql://localhost/culler";

    #[test]
    fn defaults() {
        let config = DatabaseConfig::from_parts(URL.into(), None, None).unwrap();
        assert_eq!(config.max_connections, 5);
        assert_eq!(config.namespace, "default");
    }

    #[test]
    fn rejects_zero_connections() {
        let err = DatabaseConfig::from_parts(URL.into(), Some("0".into()), None).unwrap_err();
        assert!(matches!(err, AppError::ConfigError(_)));
        assert!(DatabaseConfig::from_parts(URL.into(), Some("many".into()), None).is_err());
    }

    #[test]
    fn blank_namespace_falls_back() {
        let config =
            DatabaseConfig::from_parts(URL.into(), Some("2".into()), Some("  ".into())).unwrap();
        assert_eq!(config.namespace, "default");
        assert_eq!(config.max_connections, 2);
    }
}
