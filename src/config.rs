use std::net::IpAddr;

use ipnet::IpNet;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub host: IpAddr,
    pub port: u16,
    pub base_url: String,
    pub registration: RegistrationMode,
    pub max_body_size: usize,
    pub trusted_proxies: Vec<IpNet>,
    pub submission_rate_limit: u32,
    pub submission_rate_window_secs: u64,
    pub log_level: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RegistrationMode {
    Open,
    Closed,
}

impl std::str::FromStr for RegistrationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "open" => Ok(RegistrationMode::Open),
            "closed" => Ok(RegistrationMode::Closed),
            other => Err(format!("'{other}' (expected 'open' or 'closed')")),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let database_url = env_required("DATABASE_URL")?;
        let jwt_secret = env_required("JWT_SECRET")?;

        let host: IpAddr = env_or("SURVEYDATA_HOST", "0.0.0.0")
            .parse()
            .map_err(|e| format!("Invalid SURVEYDATA_HOST: {e}"))?;

        let port: u16 = env_or("SURVEYDATA_PORT", "3000")
            .parse()
            .map_err(|e| format!("Invalid SURVEYDATA_PORT: {e}"))?;

        let base_url = env_or("SURVEYDATA_BASE_URL", &format!("http://{host}:{port}"))
            .trim_end_matches('/')
            .to_string();

        let registration: RegistrationMode = env_or("SURVEYDATA_REGISTRATION", "closed")
            .parse()
            .map_err(|e| format!("Invalid SURVEYDATA_REGISTRATION: {e}"))?;

        let max_body_size: usize = env_or("SURVEYDATA_MAX_BODY_SIZE", "10485760")
            .parse()
            .map_err(|e| format!("Invalid SURVEYDATA_MAX_BODY_SIZE: {e}"))?;

        let trusted_proxies: Vec<IpNet> = env_or("SURVEYDATA_TRUSTED_PROXIES", "")
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(|s| {
                s.trim()
                    .parse()
                    .map_err(|e| format!("Invalid SURVEYDATA_TRUSTED_PROXIES entry '{s}': {e}"))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let submission_rate_limit: u32 = env_or("SURVEYDATA_SUBMISSION_RATE_LIMIT", "60")
            .parse()
            .map_err(|e| format!("Invalid SURVEYDATA_SUBMISSION_RATE_LIMIT: {e}"))?;

        let submission_rate_window_secs: u64 =
            env_or("SURVEYDATA_SUBMISSION_RATE_WINDOW_SECS", "60")
                .parse()
                .map_err(|e| format!("Invalid SURVEYDATA_SUBMISSION_RATE_WINDOW_SECS: {e}"))?;

        let log_level = env_or("SURVEYDATA_LOG_LEVEL", "info");

        Ok(Config {
            database_url,
            jwt_secret,
            host,
            port,
            base_url,
            registration,
            max_body_size,
            trusted_proxies,
            submission_rate_limit,
            submission_rate_window_secs,
            log_level,
        })
    }
}

fn env_required(key: &str) -> Result<String, String> {
    std::env::var(key).map_err(|_| format!("Missing required environment variable: {key}"))
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_mode_parses_known_values() {
        assert_eq!("open".parse::<RegistrationMode>(), Ok(RegistrationMode::Open));
        assert_eq!("Closed".parse::<RegistrationMode>(), Ok(RegistrationMode::Closed));
    }

    #[test]
    fn registration_mode_rejects_typos() {
        let err = "opne".parse::<RegistrationMode>().unwrap_err();
        assert!(err.contains("opne"));
    }
}
