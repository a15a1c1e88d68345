//! Config command implementation.

use std::path::Path;
use xspool_core::Config;

/// Loads a configuration file: JSON when the extension is `.json`, key/value
/// properties otherwise.
pub fn load(path: &Path) -> Result<Config, Box<dyn std::error::Error>> {
    let config = if path.extension().is_some_and(|ext| ext == "json") {
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text)?
    } else {
        Config::load_properties(path)?
    };
    Ok(config)
}

/// Builds the effective configuration from an optional file and `key=value`
/// overrides.
pub fn resolve(file: Option<&Path>, overrides: &[String]) -> Result<Config, Box<dyn std::error::Error>> {
    let mut config = match file {
        Some(path) => load(path)?,
        None => Config::default(),
    };
    for pair in overrides {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| format!("Expected key=value, got {:?}", pair))?;
        config.set(key.trim(), value)?;
    }
    config.validate()?;
    Ok(config)
}

/// Runs the config command.
pub fn run(config: &Config, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(config)?),
        _ => print!("{}", config.to_properties()),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn overrides_apply_on_defaults() {
        let config = resolve(
            None,
            &[
                "content.in-memory-size=1024".to_string(),
                "binary.cache.class = file".to_string(),
            ],
        )
        .unwrap();
        assert_eq!(config.in_memory_size, 1024);
        assert_eq!(config.cache_kind, "file");
    }

    #[test]
    fn bad_override_is_a_config_error() {
        let err = resolve(None, &["content.pool.size=zero".to_string()]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<xspool_core::CoreError>(),
            Some(xspool_core::CoreError::InvalidConfig { .. })
        ));
        assert!(resolve(None, &["no-equals".to_string()]).is_err());
    }

    #[test]
    fn loads_json_and_properties() {
        let dir = tempdir().unwrap();

        let json = dir.path().join("spool.json");
        std::fs::write(&json, r#"{"content.pool.size": 3, "binary.cache.class": "mmap"}"#).unwrap();
        let config = load(&json).unwrap();
        assert_eq!(config.pool_size, 3);
        assert_eq!(config.cache_kind, "mmap");

        let props = dir.path().join("spool.properties");
        std::fs::write(&props, "# comment\ncontent.pool.max-idle = 2\n").unwrap();
        assert_eq!(load(&props).unwrap().pool_max_idle, 2);
    }
}
