//! Interface de terminal do enrich: spinners e saída colorida.
//!
//! Usa as crates `indicatif` para o spinner de progresso e `console` para
//! estilização com cores. O [`StageSpinner`] acompanha visualmente as
//! etapas do pipeline no terminal.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use enrichrun::pipeline::PipelineOutcome;
use enrichrun::runner::RunSummary;
use enrichrun::state_machine::ProcessingStage;

/// Indicador visual da etapa em execução.
///
/// Exibe um spinner animado durante o processamento e mensagens
/// coloridas para sucesso (verde) e falha (vermelho).
pub struct StageSpinner {
    // Spinner do indicatif; clonável para o hook de etapas.
    pb: ProgressBar,
    green: Style,
    red: Style,
}

impl StageSpinner {
    /// Inicia o spinner com uma mensagem inicial.
    pub fn start(message: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
            pb.set_style(style);
        }
        pb.set_message(message.to_string());
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
        }
    }

    /// Retorna um callback que atualiza o spinner a cada nova etapa.
    pub fn stage_hook(&self) -> impl Fn(ProcessingStage) + 'static {
        let pb = self.pb.clone();
        move |stage| pb.set_message(format!("{}", stage.as_str().to_uppercase()))
    }

    /// Finaliza o spinner e mostra o resumo da execução.
    pub fn complete(&self, outcome: &PipelineOutcome) {
        self.pb.finish_and_clear();
        println!(
            "  {} Run {} completed",
            self.green.apply_to("✓"),
            outcome.run_id
        );
        print_stage_summary("translation", outcome.translation.as_ref());
        print_stage_summary("generation", outcome.generation.as_ref());
        println!("  Consolidated records: {}", outcome.consolidated);
        println!("  Exported to: {}", outcome.export_location);
        println!("  Stats: {}", outcome.stats_path.display());
        println!("  Error report: {}", outcome.error_report_path.display());
    }

    /// Finaliza o spinner exibindo a falha que encerrou a execução.
    pub fn fail(&self, reason: &str) {
        self.pb.finish_and_clear();
        println!("  {} Run stopped: {reason}", self.red.apply_to("✗"));
    }
}

/// Imprime o resumo de uma etapa; etapas puladas por recuperação são indicadas.
pub fn print_stage_summary(label: &str, summary: Option<&RunSummary>) {
    let dim = Style::new().dim();
    let Some(summary) = summary else {
        println!("  {}", dim.apply_to(format!("{label}: already done in recovered run")));
        return;
    };

    let counts = format!(
        "{label}: {} ok, {} failed, {} skipped in {} batch(es)",
        summary.succeeded, summary.failed, summary.skipped, summary.batches
    );
    if summary.failed == 0 {
        println!("  {}", Style::new().green().apply_to(counts));
        return;
    }

    println!("  {}", Style::new().yellow().apply_to(counts));
    let mut ids = summary.failed_ids.join(", ");
    if summary.omitted_failed > 0 {
        ids.push_str(&format!(" (+{} more)", summary.omitted_failed));
    }
    println!("    failed ids: {ids}");
}

/// Imprime um bloco de texto com cabeçalho destacado.
pub fn print_section(title: &str, body: &str) {
    println!("{}", Style::new().cyan().bold().apply_to(format!("─── {title} ───")));
    println!("{body}");
}
