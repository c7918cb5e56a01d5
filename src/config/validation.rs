use super::models::Config;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("{field} must be positive")]
    MustBePositive { field: &'static str },

    #[error("{field} must not be empty")]
    Empty { field: &'static str },
}

/// Validate the entire configuration
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_downloads(config)?;
    validate_webhooks(config)?;
    validate_telemetry(config)?;
    Ok(())
}

fn validate_downloads(config: &Config) -> Result<(), ValidationError> {
    let downloads = &config.downloads;
    positive("downloads.max_concurrent", downloads.max_concurrent as u64)?;
    positive("downloads.timeout_secs", downloads.timeout_secs)?;
    positive("downloads.progress_persist_ms", downloads.progress_persist_ms)?;
    positive("downloads.queue_capacity", downloads.queue_capacity as u64)?;

    if config.storage.data_dir.as_os_str().is_empty() {
        return Err(ValidationError::Empty {
            field: "storage.data_dir",
        });
    }
    Ok(())
}

fn validate_webhooks(config: &Config) -> Result<(), ValidationError> {
    positive("webhooks.timeout_secs", config.webhooks.timeout_secs)?;
    positive("webhooks.queue_capacity", config.webhooks.queue_capacity as u64)?;
    if config.webhooks.user_agent.trim().is_empty() {
        return Err(ValidationError::Empty {
            field: "webhooks.user_agent",
        });
    }
    Ok(())
}

fn validate_telemetry(config: &Config) -> Result<(), ValidationError> {
    if config.telemetry.log_level.trim().is_empty() {
        return Err(ValidationError::Empty {
            field: "telemetry.log_level",
        });
    }
    Ok(())
}

fn positive(field: &'static str, value: u64) -> Result<(), ValidationError> {
    if value == 0 {
        return Err(ValidationError::MustBePositive { field });
    }
    Ok(())
}
