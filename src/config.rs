use std::env;

/// Runtime settings resolved once at startup. Everything comes from the
/// environment, same as the rest of the plant services.
#[derive(Debug, Clone)]
pub struct Settings {
    pub port: u16,
    pub allowed_origins: Vec<String>,
    /// Largest downward counter jump (absolute) still treated as sensor
    /// jitter instead of a reset. 0 disables noise handling entirely.
    pub noise_threshold: i64,
}

impl Settings {
    pub fn from_env() -> Result<Settings, String> {
        let port = match env::var("PORT") {
            Ok(value) => value
                .parse::<u16>()
                .map_err(|_| format!("PORT is not a valid port number: '{}'", value))?,
            Err(_) => 3030,
        };

        let allowed_origins = match env::var("ALLOWED_ORIGINS") {
            Ok(value) => parse_origins(&value),
            Err(_) => vec!["*".to_string()],
        };

        let noise_threshold = match env::var("NOISE_THRESHOLD") {
            Ok(value) => value
                .parse::<i64>()
                .map_err(|_| format!("NOISE_THRESHOLD is not a number: '{}'", value))?,
            Err(_) => 0,
        };

        if noise_threshold < 0 {
            return Err(format!(
                "NOISE_THRESHOLD must not be negative (got {})",
                noise_threshold
            ));
        }

        Ok(Settings {
            port,
            allowed_origins,
            noise_threshold,
        })
    }
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|origin| origin.trim().to_string())
        .filter(|origin| !origin.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::parse_origins;

    #[test]
    fn origins_are_split_and_trimmed() {
        let origins = parse_origins("http://a.local, http://b.local ,");
        assert_eq!(origins, vec!["http://a.local", "http://b.local"]);
    }

    #[test]
    fn wildcard_passes_through() {
        assert_eq!(parse_origins("*"), vec!["*"]);
    }
}
