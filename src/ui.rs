//! Interface de terminal do queryflow: spinners e saída colorida.
//!
//! Usa as crates `indicatif` para spinners de progresso e `console` para
//! estilização com cores. O [`RunProgress`] acompanha visualmente as
//! execuções no terminal e recebe eventos do motor via [`RunObserver`].

use std::time::Duration;

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};
use uuid::Uuid;

use crate::error::PollError;
use crate::workflow::{JobHandle, Outcome, RunObserver, RunReport, State};

/// Indicador visual de progresso para execuções no terminal.
///
/// Exibe um spinner animado durante a execução e mensagens coloridas para
/// sucesso (verde), falha (vermelho) e retentativa (amarelo).
pub struct RunProgress {
    // Spinner do indicatif.
    pb: ProgressBar,
    // Estilo verde para mensagens de sucesso.
    green: Style,
    // Estilo vermelho para mensagens de falha.
    red: Style,
    // Estilo amarelo para mensagens de retentativa.
    yellow: Style,
}

impl RunProgress {
    /// Inicia o spinner com um rótulo e retorna a instância de progresso.
    pub fn start(label: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} [{elapsed}] {msg}") {
            pb.set_style(style);
        }
        pb.set_message(format!("SUBMITTING: {label}"));
        pb.enable_steady_tick(Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
        }
    }

    /// Finaliza o spinner e exibe o resultado de uma execução.
    ///
    /// Sucesso é mostrado em verde com checkmark; falha em vermelho com X e
    /// a categoria da causa.
    pub fn complete(&self, report: &RunReport) {
        self.pb.finish_and_clear();
        let handle = report
            .handle
            .as_ref()
            .map(JobHandle::to_string)
            .unwrap_or_else(|| "-".to_string());
        match &report.outcome {
            Outcome::Success(rows) => {
                println!(
                    "  {} {handle}: {} row(s) after {} poll(s)",
                    self.green.apply_to("✓"),
                    rows.len(),
                    report.poll_count
                );
            }
            Outcome::Failure(cause) => {
                println!(
                    "  {} {handle}: {} failure: {cause}",
                    self.red.apply_to("✗"),
                    cause.category()
                );
            }
        }
    }

    /// Imprime o registro da execução formatado em JSON com estilo colorido.
    pub fn print_report(&self, report: &RunReport) {
        let style = if report.is_success() { &self.green } else { &self.red };
        println!();
        println!("{}", style.apply_to("─── Run Report ───"));
        println!("{}", serde_json::to_string_pretty(report).unwrap_or_default());
    }
}

impl RunObserver for RunProgress {
    fn on_state(&self, _run_id: Uuid, state: State, handle: Option<&JobHandle>) {
        match handle {
            Some(h) => self.pb.set_message(format!("{state}: {h}")),
            None => self.pb.set_message(format!("{state}")),
        }
    }

    fn on_poll_retry(&self, _run_id: Uuid, attempt: u32, max: u32, reason: &PollError, delay: Duration) {
        self.pb.println(format!(
            "  {} Retry {attempt}/{max}: {reason} (waiting {}ms)",
            self.yellow.apply_to("↻"),
            delay.as_millis()
        ));
    }
}
