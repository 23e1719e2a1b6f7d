//! Application configuration, environment-driven.

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub port: u16,
    pub jwt_secret: String,
    pub frontend_url: String,
    pub llm_api_key: Option<String>,
    pub llm_model: Option<String>,
    pub geocoding_api_key: Option<String>,
    pub admin_email: String,
    pub admin_password: String,
    pub scheduler_enabled: bool,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let database_path =
            std::env::var("DATABASE_PATH").unwrap_or_else(|_| "./wex.db".to_string());

        let port = std::env::var("PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .unwrap_or(8080);

        let jwt_secret = std::env::var("JWT_SECRET")
            .unwrap_or_else(|_| "dev-secret-change-in-production".to_string());

        let frontend_url = std::env::var("FRONTEND_URL")
            .unwrap_or_else(|_| "http://localhost:3000".to_string());

        let llm_api_key = std::env::var("LLM_API_KEY")
            .or_else(|_| std::env::var("GEMINI_API_KEY"))
            .ok();
        let llm_model = std::env::var("LLM_MODEL").ok();

        let geocoding_api_key = std::env::var("GOOGLE_MAPS_API_KEY").ok();

        let admin_email =
            std::env::var("ADMIN_EMAIL").unwrap_or_else(|_| "admin@wex.local".to_string());
        let admin_password =
            std::env::var("ADMIN_PASSWORD").unwrap_or_else(|_| "admin123".to_string());

        let scheduler_enabled = std::env::var("SCHEDULER_ENABLED")
            .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "on" | "ON"))
            .unwrap_or(true);

        Ok(Self {
            database_path,
            port,
            jwt_secret,
            frontend_url,
            llm_api_key,
            llm_model,
            geocoding_api_key,
            admin_email,
            admin_password,
            scheduler_enabled,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = Config::from_env().unwrap();
        assert!(config.port > 0);
        assert!(!config.database_path.is_empty());
        assert!(!config.jwt_secret.is_empty());
    }
}
