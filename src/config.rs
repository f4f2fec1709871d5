use crate::core::{SyncConfig, SyncError};

// this file will be baked into binary as default if no --config option is used
const DEFAULT_CONFIG_STR: &str = include_str!("../config/default.toml");

/// load config file
///
/// # Errors
///
/// Returns [`SyncError::Configuration`] if the file cannot be read or is not valid TOML.
pub fn load_config(user_path: Option<std::path::PathBuf>) -> Result<SyncConfig, SyncError> {
    let config_content = match &user_path {
        Some(path) => std::fs::read_to_string(path).map_err(|e| {
            SyncError::Configuration(format!("cannot read config file {}: {e}", path.display()))
        })?,
        None => DEFAULT_CONFIG_STR.to_string(),
    };

    let config: SyncConfig = toml::from_str(&config_content).map_err(|e| {
        SyncError::Configuration(format!(
            "invalid config file {}: {e}",
            get_config_file_path(user_path)
        ))
    })?;
    Ok(config)
}

#[must_use]
pub fn get_config_file_path(user_path: Option<std::path::PathBuf>) -> String {
    match user_path {
        Some(path) => path.to_string_lossy().to_string(),
        None => "<built-in default>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{CodeBuffer, Granularity};
    use std::io::Write;

    #[test]
    fn test_default_config_matches_struct_defaults() {
        let config = load_config(None).unwrap();
        let defaults = SyncConfig::default();

        assert_eq!(config.general.granularity, defaults.general.granularity);
        assert_eq!(config.general.lookahead_days, defaults.general.lookahead_days);
        assert_eq!(config.general.daily_pin_days, defaults.general.daily_pin_days);
        assert_eq!(config.code_buffer().unwrap(), defaults.code_buffer().unwrap());
        assert_eq!(config.code_buffer().unwrap(), CodeBuffer::default());
        assert_eq!(config.igloo.scopes, defaults.igloo.scopes);
        assert_eq!(config.play_by_point.base_url, defaults.play_by_point.base_url);
    }

    #[test]
    fn test_partial_user_config_keeps_defaults() {
        let path = std::env::temp_dir().join(format!("lock-automation-{}.toml", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "[general]\ngranularity = \"day\"\n\n[window]\nbuffer_before_minutes = 30").unwrap();

        let config = load_config(Some(path.clone())).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.general.granularity, Granularity::Day);
        assert_eq!(config.window.buffer_before_minutes, 30);
        assert_eq!(config.window.buffer_after_minutes, 15);
        assert_eq!(config.general.daily_pin_days, 14);
    }

    #[test]
    fn test_missing_config_file_is_configuration_error() {
        let err = load_config(Some("/nonexistent/lock-automation.toml".into())).unwrap_err();
        assert!(matches!(err, SyncError::Configuration(_)));
    }
}
