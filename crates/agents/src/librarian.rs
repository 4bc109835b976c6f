//! Librarian Agent - Turns flowchart images into graph fragments
//!
//! Each image is tiled into overlapping sections, every section is sent to
//! the oracle independently (bounded concurrency), the resulting fragment is
//! tagged with its source image and merged into the store as soon as it
//! arrives. A failing section is logged and dropped without affecting its
//! siblings.

use crate::config::PipelineConfig;
use crate::oracle::{parse_reply, ExtractionOracle, OracleMessage};
use crate::prompts::Prompts;
use crate::{AgentError, GardenerAgent, Result};
use flowgraph_core::tiling::tile_base64;
use flowgraph_core::{BoundingBox, Graph, TilingParams};
use flowgraph_db::{DbError, Repository};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// One section ready to be sent to the oracle
#[derive(Debug, Clone)]
pub struct SectionJob {
    /// Source image identifier, used as provenance
    pub image_name: String,
    pub bounds: BoundingBox,
    /// JPEG crop, base64-encoded
    pub jpeg_base64: String,
}

/// A section that did not make it into the store
#[derive(Debug, Clone, Serialize)]
pub struct SectionFailure {
    pub image_name: String,
    pub bounds: BoundingBox,
    pub reason: String,
}

/// Outcome of dispatching a set of sections
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub batch_id: Uuid,
    pub sections_total: usize,
    pub sections_merged: usize,
    pub failures: Vec<SectionFailure>,
}

impl IngestReport {
    pub fn sections_dropped(&self) -> usize {
        self.failures.len()
    }
}

/// Repaired graph plus what happened to each section
#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
    pub graph: Graph,
    pub report: IngestReport,
}

enum SectionStatus {
    Merged,
    Dropped(String),
    StoreFailed(DbError),
}

/// The Librarian agent handles image ingestion
pub struct LibrarianAgent {
    repo: Repository,
    oracle: Arc<dyn ExtractionOracle>,
    prompts: Arc<Prompts>,
    gardener: GardenerAgent,
    max_concurrency: usize,
}

impl LibrarianAgent {
    /// Create a new Librarian agent
    pub fn new(
        repo: Repository,
        oracle: Arc<dyn ExtractionOracle>,
        prompts: Arc<Prompts>,
        config: &PipelineConfig,
    ) -> Self {
        let gardener = GardenerAgent::new(repo.clone(), oracle.clone(), prompts.clone())
            .with_retry(config.fix_retry);
        Self {
            repo,
            oracle,
            prompts,
            gardener,
            max_concurrency: config.max_concurrency.max(1),
        }
    }

    /// Ingest a batch of base64 images, then run the fix pass.
    ///
    /// All images are decoded and tiled before anything is sent to the
    /// oracle, so a bad image fails the whole batch up front.
    #[instrument(skip(self, images, names), fields(images = images.len()))]
    pub async fn ingest_images(
        &self,
        images: &[String],
        names: &[String],
        params: TilingParams,
    ) -> Result<IngestOutcome> {
        if images.len() != names.len() {
            return Err(AgentError::InvalidInput(format!(
                "got {} images but {} image names",
                images.len(),
                names.len()
            )));
        }

        let mut jobs = Vec::new();
        for (data, name) in images.iter().zip(names) {
            jobs.extend(prepare_sections(name.clone(), data.clone(), params).await?);
        }

        let report = self.dispatch_sections(jobs).await?;
        let graph = self.gardener.fix_graph().await?;

        info!(
            batch = %report.batch_id,
            merged = report.sections_merged,
            dropped = report.sections_dropped(),
            nodes = graph.nodes.len(),
            relationships = graph.relationships.len(),
            "Ingestion complete"
        );

        Ok(IngestOutcome { graph, report })
    }

    /// Tile one image and merge its sections, without a fix pass
    #[instrument(skip(self, data))]
    pub async fn ingest_image(
        &self,
        image_name: &str,
        data: &str,
        params: TilingParams,
    ) -> Result<IngestReport> {
        let jobs = prepare_sections(image_name.to_string(), data.to_string(), params).await?;
        self.dispatch_sections(jobs).await
    }

    /// Send every section to the oracle and merge the fragments.
    ///
    /// Oracle and validation failures drop only their section. Store errors
    /// are also isolated, but the first one is returned once every section
    /// has finished.
    #[instrument(skip(self, jobs), fields(sections = jobs.len()))]
    pub async fn dispatch_sections(&self, jobs: Vec<SectionJob>) -> Result<IngestReport> {
        let batch_id = Uuid::new_v4();
        let sections_total = jobs.len();
        info!(batch = %batch_id, sections = sections_total, "Dispatching sections");

        let outcomes: Vec<(SectionJob, SectionStatus)> = stream::iter(jobs)
            .map(|job| async move {
                let status = self.process_section(&job).await;
                (job, status)
            })
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;

        let mut report = IngestReport {
            batch_id,
            sections_total,
            sections_merged: 0,
            failures: Vec::new(),
        };
        let mut store_error = None;

        for (job, status) in outcomes {
            match status {
                SectionStatus::Merged => report.sections_merged += 1,
                SectionStatus::Dropped(reason) => {
                    warn!(
                        batch = %batch_id,
                        image = %job.image_name,
                        section = %job.bounds,
                        %reason,
                        "Dropped section"
                    );
                    report.failures.push(SectionFailure {
                        image_name: job.image_name,
                        bounds: job.bounds,
                        reason,
                    });
                }
                SectionStatus::StoreFailed(err) => {
                    error!(
                        batch = %batch_id,
                        image = %job.image_name,
                        section = %job.bounds,
                        "Failed to merge section: {}",
                        err
                    );
                    report.failures.push(SectionFailure {
                        image_name: job.image_name,
                        bounds: job.bounds,
                        reason: err.to_string(),
                    });
                    if store_error.is_none() {
                        store_error = Some(err);
                    }
                }
            }
        }

        if let Some(err) = store_error {
            return Err(err.into());
        }

        Ok(report)
    }

    async fn process_section(&self, job: &SectionJob) -> SectionStatus {
        let fragment = match self.extract_fragment(job).await {
            Ok(fragment) => fragment,
            Err(reason) => return SectionStatus::Dropped(reason),
        };

        match self.repo.upsert_graph(&fragment).await {
            Ok(()) => {
                debug!(
                    image = %job.image_name,
                    section = %job.bounds,
                    nodes = fragment.nodes.len(),
                    relationships = fragment.relationships.len(),
                    "Merged section"
                );
                SectionStatus::Merged
            }
            Err(DbError::Validation(e)) => SectionStatus::Dropped(format!("invalid fragment: {e}")),
            Err(e) => SectionStatus::StoreFailed(e),
        }
    }

    /// Ask the oracle for this section's fragment and tag it with provenance
    async fn extract_fragment(&self, job: &SectionJob) -> std::result::Result<Graph, String> {
        let messages = vec![
            OracleMessage::system(self.prompts.image_to_graph.clone()),
            OracleMessage::user_with_image(
                job.jpeg_base64.clone(),
                format!("Section coordinates: {}.", job.bounds),
            ),
        ];

        let reply = match self.oracle.complete(messages).await {
            Ok(Some(reply)) => reply,
            Ok(None) => return Err("no response from oracle".into()),
            Err(e) => return Err(format!("oracle error: {e}")),
        };

        let mut fragment: Graph =
            parse_reply(&reply).map_err(|e| format!("unparseable oracle reply: {e}"))?;
        fragment.tag_provenance(&job.image_name);
        Ok(fragment.consolidated())
    }
}

/// Decode, tile and JPEG-encode one image on the blocking pool
async fn prepare_sections(
    image_name: String,
    data: String,
    params: TilingParams,
) -> Result<Vec<SectionJob>> {
    let name = image_name.clone();
    let sections = tokio::task::spawn_blocking(move || -> flowgraph_core::Result<Vec<SectionJob>> {
        tile_base64(&data, params)?
            .iter()
            .map(|section| {
                Ok(SectionJob {
                    image_name: image_name.clone(),
                    bounds: section.bounds,
                    jpeg_base64: section.to_jpeg_base64()?,
                })
            })
            .collect()
    })
    .await
    .map_err(|e| AgentError::Processing(format!("tiling task failed: {e}")))?
    .map_err(|e| AgentError::InvalidInput(format!("image '{name}': {e}")))?;

    debug!(image = %name, sections = sections.len(), "Prepared sections");
    Ok(sections)
}
