//! Configuração do queryflow carregada a partir de `queryflow.toml`.
//!
//! A struct [`FlowConfig`] contém todos os parâmetros configuráveis.
//! Valores não presentes no arquivo usam defaults sensíveis.
//! As variáveis de ambiente `QUERYFLOW_API_KEY` e `QUERYFLOW_ENDPOINT` têm
//! precedência sobre o arquivo.

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use serde::Deserialize;

use crate::error::ConfigError;
use crate::workflow::{
    EncryptionMode, EngineConfig, OutputDestination, RetryConfig, UnknownStatusPolicy, WaitPolicy,
};

pub const CONFIG_FILE: &str = "queryflow.toml";

/// Limite superior de qualquer intervalo ou prazo: uma semana.
pub const MAX_DURATION_SECS: u64 = 7 * 24 * 60 * 60;

/// Estratégia de espera entre consultas de status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    /// Intervalo fixo de `wait_interval_secs`.
    #[default]
    Fixed,
    /// Dobra a cada ciclo a partir de `wait_interval_secs`, até `max_wait_secs`.
    Exponential,
}

/// Destino padrão da saída das consultas.
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_bucket")]
    pub bucket: String,

    #[serde(default = "default_key")]
    pub key: String,

    /// "SSE_S3", "SSE_KMS" ou "CSE_KMS".
    #[serde(default = "default_encryption")]
    pub encryption: String,

    /// Chave KMS, usada apenas pelos modos KMS.
    #[serde(default)]
    pub kms_key: Option<String>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            bucket: default_bucket(),
            key: default_key(),
            encryption: default_encryption(),
            kms_key: None,
        }
    }
}

impl OutputConfig {
    pub fn destination(&self) -> Result<OutputDestination> {
        let encryption = parse_encryption(&self.encryption, self.kms_key.clone())?;
        Ok(OutputDestination::new(&self.bucket, &self.key).with_encryption(encryption))
    }
}

/// Converte o nome do modo de criptografia para [`EncryptionMode`].
pub fn parse_encryption(mode: &str, kms_key: Option<String>) -> Result<EncryptionMode> {
    match mode.to_ascii_uppercase().as_str() {
        "SSE_S3" => Ok(EncryptionMode::S3Managed),
        "SSE_KMS" => Ok(EncryptionMode::KmsManaged { key_id: kms_key }),
        "CSE_KMS" => Ok(EncryptionMode::ClientSideKms { key_id: kms_key }),
        other => anyhow::bail!("unknown encryption mode: {other}"),
    }
}

/// Configuração de nível superior carregada de `queryflow.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct FlowConfig {
    /// URL base do serviço de consultas.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Chave de API enviada como bearer token.
    #[serde(default)]
    pub api_key: String,

    /// Intervalo entre consultas de status, em segundos.
    #[serde(default = "default_wait_interval_secs")]
    pub wait_interval_secs: u64,

    #[serde(default)]
    pub backoff: Backoff,

    /// Teto da espera no modo exponencial, em segundos.
    #[serde(default = "default_max_wait_secs")]
    pub max_wait_secs: u64,

    /// Prazo global de uma execução, em segundos.
    #[serde(default = "default_global_timeout_secs")]
    pub global_timeout_secs: u64,

    /// Falhas consecutivas de consulta toleradas antes de falhar a execução.
    #[serde(default = "default_poll_retry_budget")]
    pub poll_retry_budget: u32,

    /// Atraso base em milissegundos para o backoff das retentativas.
    #[serde(default = "default_poll_retry_base_delay_ms")]
    pub poll_retry_base_delay_ms: u64,

    /// Limite de cada chamada ao serviço, em segundos.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// O que fazer com status desconhecidos: "retry" ou "fail".
    #[serde(default)]
    pub unknown_status: UnknownStatusPolicy,

    #[serde(default)]
    pub output: OutputConfig,
}

// Valor padrão para o endpoint: serviço local.
fn default_endpoint() -> String {
    "http://localhost:8080".to_string()
}

// Valor padrão para o intervalo de espera: 30s.
fn default_wait_interval_secs() -> u64 {
    30
}

fn default_max_wait_secs() -> u64 {
    300
}

// Valor padrão para o prazo global: 5 minutos.
fn default_global_timeout_secs() -> u64 {
    300
}

fn default_poll_retry_budget() -> u32 {
    3
}

fn default_poll_retry_base_delay_ms() -> u64 {
    1000
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_bucket() -> String {
    "sdl-athena-query-results".to_string()
}

fn default_key() -> String {
    "guardduty".to_string()
}

fn default_encryption() -> String {
    "SSE_S3".to_string()
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            api_key: String::new(),
            wait_interval_secs: default_wait_interval_secs(),
            backoff: Backoff::default(),
            max_wait_secs: default_max_wait_secs(),
            global_timeout_secs: default_global_timeout_secs(),
            poll_retry_budget: default_poll_retry_budget(),
            poll_retry_base_delay_ms: default_poll_retry_base_delay_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            unknown_status: UnknownStatusPolicy::default(),
            output: OutputConfig::default(),
        }
    }
}

impl FlowConfig {
    /// Carrega a configuração de `queryflow.toml` no diretório atual.
    /// Usa valores padrão se o arquivo não existir.
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(CONFIG_FILE))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str::<FlowConfig>(&contents)?
        } else {
            Self::default()
        };

        // Variáveis de ambiente têm precedência sobre o arquivo.
        if let Ok(key) = std::env::var("QUERYFLOW_API_KEY")
            && !key.is_empty()
        {
            config.api_key = key;
        }
        if let Ok(endpoint) = std::env::var("QUERYFLOW_ENDPOINT")
            && !endpoint.is_empty()
        {
            config.endpoint = endpoint;
        }

        config.validate()?;
        Ok(config)
    }

    /// Rejeita intervalos e prazos nulos ou acima de [`MAX_DURATION_SECS`],
    /// e endpoints sem esquema HTTP.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("wait_interval_secs", self.wait_interval_secs),
            ("max_wait_secs", self.max_wait_secs),
            ("global_timeout_secs", self.global_timeout_secs),
            ("request_timeout_secs", self.request_timeout_secs),
            ("connect_timeout_secs", self.connect_timeout_secs),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::Zero { field });
            }
            if value > MAX_DURATION_SECS {
                return Err(ConfigError::TooLarge {
                    field,
                    max: MAX_DURATION_SECS,
                });
            }
        }
        if !(self.endpoint.starts_with("http://") || self.endpoint.starts_with("https://")) {
            return Err(ConfigError::Endpoint(self.endpoint.clone()));
        }
        Ok(())
    }

    pub fn wait_policy(&self) -> WaitPolicy {
        let interval = Duration::from_secs(self.wait_interval_secs);
        match self.backoff {
            Backoff::Fixed => WaitPolicy::Fixed { interval },
            Backoff::Exponential => WaitPolicy::Exponential {
                base: interval,
                cap: Duration::from_secs(self.max_wait_secs.max(self.wait_interval_secs)),
            },
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            wait: self.wait_policy(),
            global_timeout: Duration::from_secs(self.global_timeout_secs),
            poll_retry: RetryConfig {
                max_retries: self.poll_retry_budget,
                base_delay_ms: self.poll_retry_base_delay_ms,
            },
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            unknown_status: self.unknown_status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_values() {
        let config = FlowConfig::default();
        assert_eq!(config.wait_interval_secs, 30);
        assert_eq!(config.global_timeout_secs, 300);
        assert_eq!(config.poll_retry_budget, 3);
        assert_eq!(config.backoff, Backoff::Fixed);
        assert_eq!(config.unknown_status, UnknownStatusPolicy::Retry);
        assert_eq!(config.output.bucket, "sdl-athena-query-results");
        assert_eq!(config.output.key, "guardduty");
        assert!(config.api_key.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn deserialize_partial_toml() {
        let toml_str = r#"
            endpoint = "https://queries.internal"
            wait_interval_secs = 5
            backoff = "exponential"
            unknown_status = "fail"

            [output]
            bucket = "results"
            encryption = "SSE_KMS"
            kms_key = "alias/sdl"
        "#;
        let config: FlowConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.endpoint, "https://queries.internal");
        assert_eq!(config.wait_interval_secs, 5);
        assert_eq!(config.backoff, Backoff::Exponential);
        assert_eq!(config.unknown_status, UnknownStatusPolicy::Fail);
        assert_eq!(config.global_timeout_secs, 300);
        assert_eq!(config.output.key, "guardduty");

        let dest = config.output.destination().unwrap();
        assert_eq!(dest.location(), "s3://results/guardduty");
        assert_eq!(
            dest.encryption,
            EncryptionMode::KmsManaged {
                key_id: Some("alias/sdl".into())
            }
        );
    }

    #[test]
    fn engine_config_from_file_values() {
        let config = FlowConfig {
            wait_interval_secs: 2,
            backoff: Backoff::Exponential,
            max_wait_secs: 20,
            global_timeout_secs: 60,
            poll_retry_budget: 5,
            ..Default::default()
        };
        let engine = config.engine_config();
        assert_eq!(engine.global_timeout, Duration::from_secs(60));
        assert_eq!(engine.poll_retry.max_retries, 5);
        assert_eq!(
            engine.wait,
            WaitPolicy::Exponential {
                base: Duration::from_secs(2),
                cap: Duration::from_secs(20),
            }
        );
    }

    #[test]
    fn validate_rejects_zero_timeout() {
        let config = FlowConfig {
            global_timeout_secs: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Zero {
                field: "global_timeout_secs"
            })
        ));
    }

    #[test]
    fn validate_rejects_oversized_timeout() {
        let config = FlowConfig {
            global_timeout_secs: u64::MAX,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::TooLarge {
                field: "global_timeout_secs",
                max: MAX_DURATION_SECS
            })
        ));

        let config = FlowConfig {
            request_timeout_secs: MAX_DURATION_SECS,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_non_http_endpoint() {
        let config = FlowConfig {
            endpoint: "ftp://example".into(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Endpoint(_))));
    }

    #[test]
    fn unknown_encryption_mode_is_an_error() {
        assert!(parse_encryption("ROT13", None).is_err());
        assert_eq!(parse_encryption("sse_s3", None).unwrap(), EncryptionMode::S3Managed);
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "global_timeout_secs = 120").unwrap();
        writeln!(file, "poll_retry_budget = 1").unwrap();

        let config = FlowConfig::load_from(file.path()).unwrap();
        assert_eq!(config.global_timeout_secs, 120);
        assert_eq!(config.poll_retry_budget, 1);
        assert_eq!(config.wait_interval_secs, 30);
    }

    #[test]
    fn load_from_invalid_file_fails() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "wait_interval_secs = 0").unwrap();
        assert!(FlowConfig::load_from(file.path()).is_err());
    }

    #[test]
    fn load_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = FlowConfig::load_from(&dir.path().join(CONFIG_FILE)).unwrap();
        assert_eq!(config.poll_retry_budget, 3);
    }
}
