//! External entropy acquisition with bounded timeouts and local fallback.
//!
//! Two independent sources feed the hybrid seed: a true-random HTTP API and a
//! public blockchain block hash. Both are fetched concurrently under hard
//! deadlines; a round is never stalled waiting on either. If a source fails,
//! the commitment degrades (and records that it degraded) rather than
//! blocking play.

use crate::config::EntropyConfig;
use crate::errors::{EngineError, EngineResult};
use crate::seed::{EntropyProvenance, SeedCommitment};
use async_trait::async_trait;
use std::time::Duration;

/// A source of external randomness. Implementations must return lowercase
/// hex strings and fail (not hang) on unreachable backends.
#[async_trait]
pub trait EntropyProvider: Send + Sync {
    async fn fetch_external_random(&self) -> EngineResult<String>;
    async fn fetch_block_hash(&self) -> EngineResult<String>;
}

/// HTTP-backed provider querying a random-number API and a blockchain
/// explorer. Both endpoints are expected to answer JSON with a hex field.
pub struct HttpEntropySource {
    client: reqwest::Client,
    config: EntropyConfig,
}

impl HttpEntropySource {
    pub fn new(config: EntropyConfig) -> EngineResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| EngineError::ExternalEntropyUnavailable(e.to_string()))?;
        Ok(Self { client, config })
    }

    async fn fetch_hex_field(&self, url: &str, field: &str) -> EngineResult<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| EngineError::ExternalEntropyUnavailable(format!("{}: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(EngineError::ExternalEntropyUnavailable(format!(
                "{}: status {}",
                url,
                response.status()
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| EngineError::ExternalEntropyUnavailable(format!("{}: {}", url, e)))?;

        let value = body
            .get(field)
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                EngineError::ExternalEntropyUnavailable(format!(
                    "{}: missing field '{}'",
                    url, field
                ))
            })?
            .trim()
            .trim_start_matches("0x")
            .to_lowercase();

        if value.is_empty() || !value.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(EngineError::ExternalEntropyUnavailable(format!(
                "{}: field '{}' is not hex",
                url, field
            )));
        }

        Ok(value)
    }
}

#[async_trait]
impl EntropyProvider for HttpEntropySource {
    async fn fetch_external_random(&self) -> EngineResult<String> {
        self.fetch_hex_field(&self.config.random_api_url, &self.config.random_field)
            .await
    }

    async fn fetch_block_hash(&self) -> EngineResult<String> {
        self.fetch_hex_field(&self.config.block_hash_url, &self.config.hash_field)
            .await
    }
}

#[async_trait]
impl EntropyProvider for Box<dyn EntropyProvider> {
    async fn fetch_external_random(&self) -> EngineResult<String> {
        (**self).fetch_external_random().await
    }

    async fn fetch_block_hash(&self) -> EngineResult<String> {
        (**self).fetch_block_hash().await
    }
}

/// Builds seed commitments from whatever entropy the provider can deliver.
/// Owned by the orchestrator; injected, never a process-wide singleton.
pub struct HybridSeedGenerator<P: EntropyProvider> {
    provider: P,
    timeout: Duration,
}

impl<P: EntropyProvider> HybridSeedGenerator<P> {
    pub fn new(provider: P, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    /// Fetch both sources concurrently and build a commitment. Succeeds with
    /// degraded provenance on partial failure and falls back to local CSPRNG
    /// entropy only when both sources fail. Total wall time is bounded by the
    /// configured timeout, not the sum of both fetches.
    pub async fn generate(&self) -> SeedCommitment {
        let (external, block) = tokio::join!(
            tokio::time::timeout(self.timeout, self.provider.fetch_external_random()),
            tokio::time::timeout(self.timeout, self.provider.fetch_block_hash()),
        );

        let external = flatten_fetch(external, "external random");
        let block = flatten_fetch(block, "block hash");

        let provenance = match (&external, &block) {
            (Some(_), Some(_)) => EntropyProvenance::Hybrid,
            (Some(_), None) => EntropyProvenance::ExternalOnly,
            (None, Some(_)) => EntropyProvenance::BlockOnly,
            (None, None) => EntropyProvenance::LocalFallback,
        };

        let (external, block) = match provenance {
            EntropyProvenance::LocalFallback => {
                tracing::warn!("both entropy sources failed; using local fallback seed");
                // Locally generated entropy of equivalent length keeps the
                // commitment scheme intact but is auditable as degraded.
                (Some(crate::seed::generate_server_seed()), None)
            }
            _ => (external, block),
        };

        SeedCommitment::new(crate::seed::generate_server_seed(), external, block, provenance)
    }
}

fn flatten_fetch(
    result: Result<EngineResult<String>, tokio::time::error::Elapsed>,
    source: &str,
) -> Option<String> {
    match result {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            tracing::warn!("{} fetch failed: {}", source, e);
            None
        }
        Err(_) => {
            tracing::warn!("{} fetch timed out", source);
            None
        }
    }
}

/// Fixed-value provider for tests and offline operation.
pub struct StaticEntropy {
    pub external: Option<String>,
    pub block: Option<String>,
}

#[async_trait]
impl EntropyProvider for StaticEntropy {
    async fn fetch_external_random(&self) -> EngineResult<String> {
        self.external
            .clone()
            .ok_or_else(|| EngineError::ExternalEntropyUnavailable("static: no external".into()))
    }

    async fn fetch_block_hash(&self) -> EngineResult<String> {
        self.block
            .clone()
            .ok_or_else(|| EngineError::ExternalEntropyUnavailable("static: no block".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generator(external: Option<&str>, block: Option<&str>) -> HybridSeedGenerator<StaticEntropy> {
        HybridSeedGenerator::new(
            StaticEntropy {
                external: external.map(String::from),
                block: block.map(String::from),
            },
            Duration::from_millis(100),
        )
    }

    #[tokio::test]
    async fn test_full_hybrid_provenance() {
        let commitment = generator(Some("aabb"), Some("ccdd")).generate().await;
        assert_eq!(commitment.provenance, EntropyProvenance::Hybrid);
        assert_eq!(commitment.external_random.as_deref(), Some("aabb"));
        assert_eq!(commitment.block_hash.as_deref(), Some("ccdd"));
    }

    #[tokio::test]
    async fn test_single_source_degrades_not_fails() {
        let commitment = generator(Some("aabb"), None).generate().await;
        assert_eq!(commitment.provenance, EntropyProvenance::ExternalOnly);

        let commitment = generator(None, Some("ccdd")).generate().await;
        assert_eq!(commitment.provenance, EntropyProvenance::BlockOnly);
    }

    #[tokio::test]
    async fn test_total_failure_falls_back_locally() {
        let commitment = generator(None, None).generate().await;
        assert_eq!(commitment.provenance, EntropyProvenance::LocalFallback);
        // Fallback entropy still contributes to the hybrid seed.
        assert!(commitment.external_random.is_some());
        assert!(!commitment.hybrid_seed.is_empty());
    }

    #[tokio::test]
    async fn test_slow_source_is_abandoned() {
        struct SlowEntropy;

        #[async_trait]
        impl EntropyProvider for SlowEntropy {
            async fn fetch_external_random(&self) -> EngineResult<String> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok("never".into())
            }

            async fn fetch_block_hash(&self) -> EngineResult<String> {
                Ok("ccdd".into())
            }
        }

        let generator = HybridSeedGenerator::new(SlowEntropy, Duration::from_millis(50));
        let started = std::time::Instant::now();
        let commitment = generator.generate().await;
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(commitment.provenance, EntropyProvenance::BlockOnly);
    }
}
