//! Configuração do enrich carregada a partir de `enrich.toml`.
//!
//! A struct [`EnrichConfig`] contém todos os parâmetros configuráveis.
//! Valores não presentes no arquivo usam defaults sensíveis.
//! A variável de ambiente `ENRICH_CHECKPOINT_DIR` tem precedência sobre o arquivo.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{EnrichError, Result};

/// Nome do arquivo de configuração procurado por padrão.
pub const DEFAULT_CONFIG_FILE: &str = "enrich.toml";

/// Variável de ambiente que sobrescreve `checkpoint_dir`.
pub const CHECKPOINT_DIR_ENV: &str = "ENRICH_CHECKPOINT_DIR";

/// Configuração de nível superior carregada de `enrich.toml`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EnrichConfig {
    /// Diretório onde os snapshots de checkpoint são gravados.
    #[serde(default = "default_checkpoint_dir")]
    pub checkpoint_dir: PathBuf,

    /// Diretório dos relatórios de estatísticas e erros.
    #[serde(default = "default_report_dir")]
    pub report_dir: PathBuf,

    /// Itens processados entre dois checkpoints.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Tamanho do conjunto enviado para tradução.
    #[serde(default = "default_sample_count")]
    pub translation_count: usize,

    /// Tamanho do conjunto enviado para geração.
    #[serde(default = "default_sample_count")]
    pub generation_count: usize,

    /// Semente da seleção aleatória. Sem semente, cada execução sorteia outra.
    #[serde(default)]
    pub random_seed: Option<u64>,

    /// Interrompe a execução após um erro crítico (o lote atual é concluído e salvo).
    #[serde(default = "default_stop_on_critical")]
    pub stop_on_critical: bool,

    /// Máximo de ids com falha listados no resumo final.
    #[serde(default = "default_failed_id_cap")]
    pub failed_id_cap: usize,
}

// Valor padrão para o diretório de checkpoints: "checkpoints".
fn default_checkpoint_dir() -> PathBuf {
    PathBuf::from("checkpoints")
}

// Valor padrão para o diretório de relatórios: "reports".
fn default_report_dir() -> PathBuf {
    PathBuf::from("reports")
}

fn default_batch_size() -> usize {
    10
}

fn default_sample_count() -> usize {
    50
}

fn default_stop_on_critical() -> bool {
    true
}

fn default_failed_id_cap() -> usize {
    20
}

impl Default for EnrichConfig {
    fn default() -> Self {
        Self {
            checkpoint_dir: default_checkpoint_dir(),
            report_dir: default_report_dir(),
            batch_size: default_batch_size(),
            translation_count: default_sample_count(),
            generation_count: default_sample_count(),
            random_seed: None,
            stop_on_critical: default_stop_on_critical(),
            failed_id_cap: default_failed_id_cap(),
        }
    }
}

impl EnrichConfig {
    /// Carrega a configuração de `path` e aplica a variável de ambiente.
    /// Usa valores padrão se o arquivo não existir. Não valida: chame
    /// [`validate`](Self::validate) depois de aplicar as flags da CLI.
    pub fn load(path: &Path) -> Result<Self> {
        Ok(Self::from_file(path)?
            .with_checkpoint_dir_override(std::env::var(CHECKPOINT_DIR_ENV).ok()))
    }

    /// Lê apenas o arquivo, sem ambiente nem validação.
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str::<EnrichConfig>(&contents)?)
    }

    /// Valor vazio é ignorado.
    pub fn with_checkpoint_dir_override(mut self, dir: Option<String>) -> Self {
        if let Some(dir) = dir
            && !dir.is_empty()
        {
            self.checkpoint_dir = PathBuf::from(dir);
        }
        self
    }

    /// Flags da CLI têm precedência sobre arquivo e ambiente.
    pub fn with_cli_overrides(mut self, batch_size: Option<usize>, seed: Option<u64>) -> Self {
        if let Some(batch_size) = batch_size {
            self.batch_size = batch_size;
        }
        if seed.is_some() {
            self.random_seed = seed;
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(EnrichError::Config("batch_size must be at least 1".into()));
        }
        Ok(())
    }
}
