//! 配置校验模块
//!
//! 校验规则：
//! - 字段范围 (validator derive)：max_len / max_flushes / parallelism / interval_ms >= 1
//! - label key 非空且不含 ':' (标签以 `key:value` 形式导出)
//! - file handler 的 params 只允许 path / base_path，且二者不能同时出现

use contracts::{AutoflushError, HandlerKind, RunConfig};
use validator::Validate;

const FILE_PARAMS: [&str; 2] = ["path", "base_path"];

/// 校验 RunConfig
///
/// 返回第一个遇到的错误，或 Ok(())。
pub fn validate(config: &RunConfig) -> Result<(), AutoflushError> {
    config
        .validate()
        .map_err(|e| AutoflushError::config("config", e.to_string()))?;
    validate_labels(config)?;
    validate_handler(config)?;
    Ok(())
}

/// 校验 label
fn validate_labels(config: &RunConfig) -> Result<(), AutoflushError> {
    for key in config.load.labels.keys() {
        if key.is_empty() {
            return Err(AutoflushError::config(
                "load.labels",
                "label key cannot be empty",
            ));
        }
        if key.contains(':') {
            return Err(AutoflushError::config(
                format!("load.labels.{key}"),
                "label key cannot contain ':'",
            ));
        }
    }
    Ok(())
}

/// 校验 handler 参数
fn validate_handler(config: &RunConfig) -> Result<(), AutoflushError> {
    let params = &config.handler.params;
    if config.handler.kind != HandlerKind::File {
        return Ok(());
    }

    if let Some(unknown) = params.keys().find(|k| !FILE_PARAMS.contains(&k.as_str())) {
        return Err(AutoflushError::config(
            format!("handler.params.{unknown}"),
            format!("unknown file handler parameter, expected one of {FILE_PARAMS:?}"),
        ));
    }
    if params.contains_key("path") && params.contains_key("base_path") {
        return Err(AutoflushError::config(
            "handler.params",
            "set either path or base_path, not both",
        ));
    }
    if params.values().any(|v| v.trim().is_empty()) {
        return Err(AutoflushError::config(
            "handler.params",
            "file handler path cannot be empty",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_valid() {
        assert!(validate(&RunConfig::default()).is_ok());
    }

    #[test]
    fn test_range_violation() {
        let mut config = RunConfig::default();
        config.buffer.max_flushes = 0;
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("max_flushes"), "{err}");
    }

    #[test]
    fn test_label_key_with_colon() {
        let mut config = RunConfig::default();
        config
            .load
            .labels
            .insert("a:b".to_string(), "c".to_string());
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("load.labels.a:b"));
    }

    #[test]
    fn test_file_params() {
        let mut config = RunConfig::default();
        config.handler.kind = HandlerKind::File;
        assert!(validate(&config).is_ok());

        config
            .handler
            .params
            .insert("path".to_string(), "out.jsonl".to_string());
        config
            .handler
            .params
            .insert("base_path".to_string(), "out".to_string());
        assert!(validate(&config).is_err());

        config.handler.params.remove("base_path");
        config
            .handler
            .params
            .insert("topic".to_string(), "x".to_string());
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("handler.params.topic"));
    }

    #[test]
    fn test_log_handler_ignores_params() {
        let mut config = RunConfig::default();
        config
            .handler
            .params
            .insert("anything".to_string(), "goes".to_string());
        assert!(validate(&config).is_ok());
    }
}
