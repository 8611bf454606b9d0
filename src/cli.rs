//! Interface de linha de comando do enrich baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (status, report, demo)
//! e flags globais (--config, --batch-size, --seed, --verbose).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use enrichrun::config::DEFAULT_CONFIG_FILE;

/// enrich: execução retomável de lotes de enriquecimento de registros.
#[derive(Debug, Parser)]
#[command(name = "enrich", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Caminho do arquivo de configuração.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Itens por lote (sobrescreve o arquivo de configuração).
    #[arg(long, global = true)]
    pub batch_size: Option<usize>,

    /// Semente da seleção aleatória (sobrescreve o arquivo de configuração).
    #[arg(long, global = true)]
    pub seed: Option<u64>,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Mostra o estado recuperável do último checkpoint.
    Status,

    /// Gera os relatórios de estatísticas e erros a partir do último checkpoint.
    Report,

    /// Executa o pipeline completo com colaboradores simulados.
    Demo {
        /// Quantidade de registros sintéticos no pool.
        #[arg(long, default_value_t = 120)]
        pool: usize,

        /// Cada N-ésimo registro falha em um dos colaboradores (0 desativa).
        #[arg(long, default_value_t = 7)]
        fail_every: usize,
    },
}
