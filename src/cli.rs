//! Interface de linha de comando do queryflow baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (run, status, results,
//! demo) e flags globais (--timeout-secs, --interval-secs, --verbose).

use clap::{Parser, Subcommand, ValueEnum};

/// queryflow: submete consultas longas, acompanha até o fim e coleta o resultado.
#[derive(Debug, Parser)]
#[command(name = "queryflow", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Prazo global de cada execução, em segundos.
    #[arg(long, global = true)]
    pub timeout_secs: Option<u64>,

    /// Intervalo entre consultas de status, em segundos.
    #[arg(long, global = true)]
    pub interval_secs: Option<u64>,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,

    /// Emite logs em JSON.
    #[arg(long, global = true, default_value_t = false)]
    pub json_logs: bool,
}

/// Modo de criptografia aceito pela CLI, mapeado para
/// [`EncryptionMode`](crate::workflow::EncryptionMode) internamente.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum EncryptionArg {
    /// Chaves gerenciadas pelo provedor de armazenamento.
    SseS3,
    /// Chave KMS no servidor.
    SseKms,
    /// Chave KMS no cliente.
    CseKms,
}

impl EncryptionArg {
    pub fn as_str(self) -> &'static str {
        match self {
            EncryptionArg::SseS3 => "SSE_S3",
            EncryptionArg::SseKms => "SSE_KMS",
            EncryptionArg::CseKms => "CSE_KMS",
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Submete uma consulta e espera pelo resultado.
    Run {
        /// Expressão da consulta.
        query: Option<String>,

        /// Banco de dados (contexto) alvo.
        #[arg(long, short)]
        context: Option<String>,

        /// Caminho para um arquivo JSON com uma lista de requisições,
        /// executadas em paralelo.
        #[arg(long, conflicts_with = "query")]
        file: Option<String>,

        /// Bucket de saída (sobrepõe a configuração).
        #[arg(long)]
        bucket: Option<String>,

        /// Prefixo de saída dentro do bucket.
        #[arg(long)]
        key: Option<String>,

        #[arg(long, value_enum)]
        encryption: Option<EncryptionArg>,

        #[arg(long)]
        kms_key: Option<String>,
    },

    /// Consulta o status atual de um job já submetido.
    Status {
        /// Identificador retornado na submissão.
        job_id: String,
    },

    /// Busca o resultado de um job concluído.
    Results {
        job_id: String,
    },

    /// Executa a demonstração com um serviço simulado em memória.
    Demo {
        /// Simula um job que termina em FAILED.
        #[arg(long, conflicts_with = "hang")]
        fail: bool,

        /// Simula um job que nunca termina, até estourar o prazo.
        #[arg(long)]
        hang: bool,
    },
}
