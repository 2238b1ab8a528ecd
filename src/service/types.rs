//! Tipos de dados para requisições e respostas do serviço de consultas.
//!
//! Todas as structs derivam `Serialize` e `Deserialize` para conversão JSON
//! no formato camelCase esperado pelos endpoints `/queries`.

use serde::{Deserialize, Serialize};

use crate::workflow::{JobRequest, Row};

/// Corpo da requisição para `POST /queries`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartQueryRequest {
    /// Expressão da consulta a executar.
    pub query_string: String,
    /// Banco de dados (contexto) onde a consulta roda.
    pub database: String,
    /// Destino e criptografia da saída.
    pub result_configuration: ResultConfiguration,
}

/// Local de saída e modo de criptografia, repassados sem interpretação.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultConfiguration {
    /// Ex.: "s3://sdl-athena-query-results/guardduty".
    pub output_location: String,
    /// "SSE_S3", "SSE_KMS" ou "CSE_KMS".
    pub encryption_option: String,
    /// Chave KMS, apenas para os modos KMS.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kms_key: Option<String>,
}

impl From<&JobRequest> for StartQueryRequest {
    fn from(req: &JobRequest) -> Self {
        Self {
            query_string: req.query.clone(),
            database: req.context.clone(),
            result_configuration: ResultConfiguration {
                output_location: req.output.location(),
                encryption_option: req.output.encryption.as_str().to_string(),
                kms_key: req.output.encryption.key_id().map(str::to_string),
            },
        }
    }
}

/// Resposta de `POST /queries`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartQueryResponse {
    pub query_execution_id: String,
}

/// Resposta de `GET /queries/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryExecutionResponse {
    pub query_execution_id: String,
    pub status: QueryExecutionStatus,
}

/// Estado atual da execução, como reportado pelo serviço.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryExecutionStatus {
    /// "QUEUED", "RUNNING", "SUCCEEDED", "FAILED", "CANCELLED" ou outro valor.
    pub state: String,
    /// Motivo da última mudança de estado, quando houver.
    #[serde(default)]
    pub state_change_reason: Option<String>,
}

/// Resposta de `GET /queries/{id}/results`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResultsResponse {
    /// Linhas do resultado; cada linha é um objeto coluna → valor.
    pub rows: Vec<Row>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{EncryptionMode, OutputDestination};

    #[test]
    fn start_request_uses_service_field_names() {
        let req = JobRequest::new(
            "SELECT 1",
            "db1",
            OutputDestination::new("results", "guardduty"),
        );
        let json = serde_json::to_value(StartQueryRequest::from(&req)).unwrap();
        assert_eq!(json["queryString"], "SELECT 1");
        assert_eq!(json["database"], "db1");
        assert_eq!(
            json["resultConfiguration"]["outputLocation"],
            "s3://results/guardduty"
        );
        assert_eq!(json["resultConfiguration"]["encryptionOption"], "SSE_S3");
        assert!(json["resultConfiguration"].get("kmsKey").is_none());
    }

    #[test]
    fn start_request_carries_kms_key() {
        let req = JobRequest::new(
            "SELECT 1",
            "db1",
            OutputDestination::new("results", "guardduty").with_encryption(
                EncryptionMode::KmsManaged {
                    key_id: Some("alias/sdl".into()),
                },
            ),
        );
        let json = serde_json::to_value(StartQueryRequest::from(&req)).unwrap();
        assert_eq!(json["resultConfiguration"]["encryptionOption"], "SSE_KMS");
        assert_eq!(json["resultConfiguration"]["kmsKey"], "alias/sdl");
    }

    #[test]
    fn execution_response_deserialize_from_service_format() {
        let json = r#"{
            "queryExecutionId": "q-1",
            "status": {"state": "FAILED", "stateChangeReason": "SYNTAX_ERROR"}
        }"#;
        let resp: QueryExecutionResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.query_execution_id, "q-1");
        assert_eq!(resp.status.state, "FAILED");
        assert_eq!(resp.status.state_change_reason.as_deref(), Some("SYNTAX_ERROR"));
    }

    #[test]
    fn execution_response_without_reason() {
        let json = r#"{"queryExecutionId": "q-2", "status": {"state": "RUNNING"}}"#;
        let resp: QueryExecutionResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.status.state_change_reason, None);
    }
}
