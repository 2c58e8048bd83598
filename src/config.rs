//! Filter configuration and backend selection.
//!
//! ```yaml
//! backend: simple
//! byte_range_parse_limit: 8
//! max_range_header_len: 100
//! range_unit_header: range-unit
//! ```

use std::path::Path;
use std::sync::Arc;

use http::HeaderName;
use serde::{Deserialize, Serialize};

use crate::cache::{HttpCache, HttpCacheFactory, SIMPLE_CACHE_NAME};
use crate::range::{RangeParser, DEFAULT_RANGE_UNIT_HEADER, MAX_RANGE_HEADER_LEN};
use crate::{Error, ErrorContext, Result};

/// Environment variable naming a configuration file for [`CacheFilterConfig::from_env`].
pub const CONFIG_PATH_ENV: &str = "PROXY_HTTP_CACHE_CONFIG";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheFilterConfig {
    /// Name of the storage backend factory to use.
    pub backend: String,
    /// Maximum number of ranges accepted from one Range header.
    pub byte_range_parse_limit: Option<usize>,
    /// Maximum Range header length; longer headers are ignored.
    pub max_range_header_len: Option<usize>,
    pub range_unit_header: String,
}

impl Default for CacheFilterConfig {
    fn default() -> Self {
        Self {
            backend: SIMPLE_CACHE_NAME.to_string(),
            byte_range_parse_limit: None,
            max_range_header_len: Some(MAX_RANGE_HEADER_LEN),
            range_unit_header: DEFAULT_RANGE_UNIT_HEADER.to_string(),
        }
    }
}

impl CacheFilterConfig {
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file; `.json` files are parsed as JSON, anything else as YAML.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            Self::from_json_str(&content)
        } else {
            Self::from_yaml_str(&content)
        }
    }

    /// Load from the file named by `PROXY_HTTP_CACHE_CONFIG`, or defaults when unset.
    pub fn from_env() -> Result<Self> {
        match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) if !path.is_empty() => Self::from_file(path),
            _ => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.backend.trim().is_empty() {
            return Err(Error::validation_with_context(
                "backend name must not be empty",
                ErrorContext::new()
                    .with_field_path("backend")
                    .with_source("config_validation"),
            ));
        }
        if self.byte_range_parse_limit == Some(0) {
            return Err(Error::validation_with_context(
                "byte range parse limit must be positive",
                ErrorContext::new()
                    .with_field_path("byte_range_parse_limit")
                    .with_details("omit the field for no limit")
                    .with_source("config_validation"),
            ));
        }
        if self.max_range_header_len == Some(0) {
            return Err(Error::validation_with_context(
                "range header length cap must be positive",
                ErrorContext::new()
                    .with_field_path("max_range_header_len")
                    .with_details("omit the field for no cap")
                    .with_source("config_validation"),
            ));
        }
        self.unit_header_name()?;
        Ok(())
    }

    /// The Range header parser described by this configuration.
    pub fn range_parser(&self) -> Result<RangeParser> {
        Ok(RangeParser::new()
            .with_unit_header(self.unit_header_name()?)
            .with_max_ranges(self.byte_range_parse_limit)
            .with_max_header_len(self.max_range_header_len))
    }

    fn unit_header_name(&self) -> Result<HeaderName> {
        HeaderName::from_bytes(self.range_unit_header.to_ascii_lowercase().as_bytes()).map_err(
            |e| {
                Error::validation_with_context(
                    format!("invalid range unit header name '{}'", self.range_unit_header),
                    ErrorContext::new()
                        .with_field_path("range_unit_header")
                        .with_details(e.to_string())
                        .with_source("config_validation"),
                )
            },
        )
    }
}

/// Pick the backend named by `config.backend` from an explicit list of factories.
pub fn select_cache(
    config: &CacheFilterConfig,
    factories: &[Arc<dyn HttpCacheFactory>],
) -> Result<Arc<dyn HttpCache>> {
    if let Some(factory) = factories.iter().find(|f| f.name() == config.backend) {
        tracing::debug!(backend = %config.backend, "selected cache backend");
        return Ok(factory.get_cache());
    }
    let available: Vec<&str> = factories.iter().map(|f| f.name()).collect();
    Err(Error::configuration_with_context(
        format!("no cache backend named '{}'", config.backend),
        ErrorContext::new()
            .with_field_path("backend")
            .with_details(format!("available: [{}]", available.join(", ")))
            .with_source("backend_selection"),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::SimpleHttpCacheFactory;

    #[test]
    fn test_defaults() {
        let config = CacheFilterConfig::from_yaml_str("{}").unwrap();
        assert_eq!(config, CacheFilterConfig::default());
        assert_eq!(config.backend, "simple");
        assert_eq!(config.max_range_header_len, Some(100));
    }

    #[test]
    fn test_yaml_and_json_agree() {
        let yaml = "backend: simple\nbyte_range_parse_limit: 4\nrange_unit_header: X-Range-Unit\n";
        let json = r#"{
            "backend": "simple",
            "byte_range_parse_limit": 4,
            "range_unit_header": "X-Range-Unit"
        }"#;
        let from_yaml = CacheFilterConfig::from_yaml_str(yaml).unwrap();
        let from_json = CacheFilterConfig::from_json_str(json).unwrap();
        assert_eq!(from_yaml, from_json);
        assert_eq!(from_yaml.byte_range_parse_limit, Some(4));
    }

    #[test]
    fn test_validation_errors_name_the_field() {
        let cases = [
            ("backend: ''", "backend"),
            ("byte_range_parse_limit: 0", "byte_range_parse_limit"),
            ("max_range_header_len: 0", "max_range_header_len"),
            ("range_unit_header: 'bad header'", "range_unit_header"),
        ];
        for (yaml, field) in cases {
            let err = CacheFilterConfig::from_yaml_str(yaml).unwrap_err();
            assert!(matches!(err, Error::Validation { .. }), "{}", yaml);
            assert_eq!(err.context().and_then(|c| c.field_path.as_deref()), Some(field));
        }
    }

    #[test]
    fn test_malformed_documents() {
        assert!(matches!(
            CacheFilterConfig::from_yaml_str("backend: [unclosed"),
            Err(Error::Yaml(_))
        ));
        assert!(matches!(
            CacheFilterConfig::from_json_str("{"),
            Err(Error::Json(_))
        ));
    }

    #[test]
    fn test_from_file_picks_format_by_extension() {
        let dir = std::env::temp_dir();
        let json_path = dir.join(format!("proxy-http-cache-{}.json", std::process::id()));
        std::fs::write(&json_path, r#"{"byte_range_parse_limit": 2}"#).unwrap();
        let config = CacheFilterConfig::from_file(&json_path).unwrap();
        assert_eq!(config.byte_range_parse_limit, Some(2));
        std::fs::remove_file(&json_path).unwrap();

        let yaml_path = dir.join(format!("proxy-http-cache-{}.yaml", std::process::id()));
        std::fs::write(&yaml_path, "byte_range_parse_limit: 3\n").unwrap();
        let config = CacheFilterConfig::from_file(&yaml_path).unwrap();
        assert_eq!(config.byte_range_parse_limit, Some(3));
        std::fs::remove_file(&yaml_path).unwrap();

        assert!(matches!(
            CacheFilterConfig::from_file(dir.join("proxy-http-cache-missing.yaml")),
            Err(Error::Io(_))
        ));
    }

    #[test]
    fn test_range_parser_uses_limits() {
        let config = CacheFilterConfig {
            byte_range_parse_limit: Some(1),
            ..Default::default()
        };
        let parser = config.range_parser().unwrap();
        assert_eq!(parser.parse("bytes", "bytes=0-1").len(), 1);
        assert!(parser.parse("bytes", "bytes=0-1,2-3").is_empty());
    }

    #[test]
    fn test_select_cache() {
        let factories: Vec<Arc<dyn HttpCacheFactory>> =
            vec![Arc::new(SimpleHttpCacheFactory::new())];
        let cache = select_cache(&CacheFilterConfig::default(), &factories).unwrap();
        assert_eq!(cache.cache_info().name, "SimpleHttpCache");

        let config = CacheFilterConfig {
            backend: "disk".into(),
            ..Default::default()
        };
        let err = select_cache(&config, &factories).err().unwrap();
        assert!(matches!(err, Error::Configuration { .. }));
        assert!(err.to_string().contains("available: [simple]"));
    }
}
