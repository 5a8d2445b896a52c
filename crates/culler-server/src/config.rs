use culler_core::AppError;

/// Server settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub api_key: String,
    pub port: u16,
}

impl ServerConfig {
    /// Read configuration from environment variables.
    ///
    /// - `CULLER_SERVER_API_KEY` (required)
    /// - `CULLER_SERVER_PORT` (optional, defaults to 3000)
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_parts(
            std::env::var("CULLER_SERVER_API_KEY").ok(),
            std::env::var("CULLER_SERVER_PORT").ok(),
        )
    }

    fn from_parts(api_key: Option<String>, port: Option<String>) -> Result<Self, AppError> {
        let api_key = api_key.filter(|k| !k.trim().is_empty()).ok_or_else(|| {
            AppError::ConfigError("CULLER_SERVER_API_KEY must be set".into())
        })?;
        let port = match port {
            None => 3000,
            Some(raw) => raw.parse().map_err(|_| {
                AppError::ConfigError(format!("Invalid CULLER_SERVER_PORT '{raw}'"))
            })?,
        };
        Ok(Self { api_key, port })
    }

    pub fn addr(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requires_api_key() {
        assert!(ServerConfig::from_parts(None, None).is_err());
        assert!(ServerConfig::from_parts(Some("  ".into()), None).is_err());
    }

    #[test]
    fn port_defaults_and_validates() {
        let config = ServerConfig::from_parts(Some("k".into()), None).unwrap();
        assert_eq!(config.addr(), "0.0.0.0:3000");
        assert!(ServerConfig::from_parts(Some("k".into()), Some("99999".into())).is_err());
    }
}
