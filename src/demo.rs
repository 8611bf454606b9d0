//! Built-in simulated run: a synthetic pool plus stand-in collaborators
//! that fail on a fixed schedule.

use std::time::Duration;

use tokio::time::sleep;

use enrichrun::error::{Fault, FaultKind};
use enrichrun::record::Record;
use enrichrun::runner::ItemProcessor;

const DATASETS: [&str; 3] = ["medqa", "pubmedqa", "medmcqa"];

/// `size` records spread round-robin over three source datasets.
pub fn synthetic_pool(size: usize) -> Vec<Record> {
    (1..=size)
        .map(|n| {
            let dataset = DATASETS[n % DATASETS.len()];
            Record::new(
                format!("rec-{n:04}"),
                dataset,
                format!("Sample question {n} from {dataset}"),
            )
        })
        .collect()
}

/// Numeric part of a `rec-NNNN` id.
fn ordinal(record: &Record) -> Option<usize> {
    record.id.strip_prefix("rec-")?.parse().ok()
}

fn scheduled_to_fail(record: &Record, every: usize) -> bool {
    every > 0 && ordinal(record).is_some_and(|n| n % every == 0)
}

/// Pretends to translate; every `fail_every`-th record hits a rate limit.
pub struct SimulatedTranslator {
    pub fail_every: usize,
    pub latency: Duration,
}

impl ItemProcessor<Record> for SimulatedTranslator {
    type Output = Record;

    async fn process(&self, item: &Record) -> Result<Record, Fault> {
        sleep(self.latency).await;
        if scheduled_to_fail(item, self.fail_every) {
            return Err(Fault::rate_limited(format!(
                "translation quota exhausted at {}",
                item.id
            )));
        }
        let mut out = item.clone();
        out.text = format!("[pt-BR] {}", item.text);
        out.fields
            .insert("language".into(), serde_json::json!("pt-BR"));
        Ok(out)
    }
}

/// Pretends to generate a new item; every `fail_every`-th record (offset by
/// one so it differs from the translator) gets a malformed response.
pub struct SimulatedGenerator {
    pub fail_every: usize,
    pub latency: Duration,
}

impl ItemProcessor<Record> for SimulatedGenerator {
    type Output = Record;

    async fn process(&self, item: &Record) -> Result<Record, Fault> {
        sleep(self.latency).await;
        let shifted = ordinal(item).is_some_and(|n| self.fail_every > 0 && (n + 1) % self.fail_every == 0);
        if shifted {
            return Err(Fault::new(
                FaultKind::InvalidResponse,
                format!("generation returned no content for {}", item.id),
            ));
        }
        let mut out = item.clone();
        out.id = format!("{}-gen", item.id);
        out.text = format!("Generated variant of: {}", item.text);
        out.fields
            .insert("derived_from".into(), serde_json::json!(item.id));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_ids_are_unique_and_spread_over_datasets() {
        let pool = synthetic_pool(9);
        let ids: std::collections::HashSet<_> = pool.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids.len(), 9);
        for dataset in DATASETS {
            assert_eq!(pool.iter().filter(|r| r.source_dataset == dataset).count(), 3);
        }
    }

    #[tokio::test]
    async fn translator_fails_on_schedule() {
        let translator = SimulatedTranslator {
            fail_every: 3,
            latency: Duration::ZERO,
        };
        let pool = synthetic_pool(6);

        let mut failed = Vec::new();
        for record in &pool {
            if let Err(fault) = translator.process(record).await {
                assert_eq!(fault.kind, FaultKind::RateLimited);
                failed.push(record.id.clone());
            }
        }
        assert_eq!(failed, vec!["rec-0003", "rec-0006"]);
    }

    #[tokio::test]
    async fn generator_derives_new_record() {
        let generator = SimulatedGenerator {
            fail_every: 0,
            latency: Duration::ZERO,
        };
        let record = &synthetic_pool(1)[0];
        let out = generator.process(record).await.unwrap();
        assert_eq!(out.id, "rec-0001-gen");
        assert_eq!(out.fields["derived_from"], "rec-0001");
    }

    #[tokio::test]
    async fn generator_schedule_is_offset_from_translator() {
        let generator = SimulatedGenerator {
            fail_every: 3,
            latency: Duration::ZERO,
        };
        let pool = synthetic_pool(3);
        assert!(generator.process(&pool[1]).await.is_err());
        assert!(generator.process(&pool[2]).await.is_ok());
    }
}
