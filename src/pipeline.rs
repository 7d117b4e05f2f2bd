//! One generation request end to end:
//! `ingesting → rendering → saved → publishing → done`, or `failed`.
//!
//! [`Pipeline::generate`] never returns an error. Failures come back inside
//! the response, tagged with the stage that was running.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use crate::aggregator::{IngestionCoordinator, IngestionRequest};
use crate::config::{Config, Credentials};
use crate::error::{Error, Result};
use crate::model::{DataSummary, IngestionMetadata};
use crate::publish::{AggregatePublishResult, PublishMetadata, PublishingCoordinator};
use crate::render::{
    renderer_for, Audience, CommandGenerator, RenderMetadata, RenderRequest, Renderer, TextGenerator,
};
use crate::sources::local_releases::file_version;
use crate::sources::{CommitQuery, IssueQuery, ReleaseQuery, SourceSelector};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Ingesting,
    Rendering,
    Saved,
    Publishing,
    Done,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageError {
    pub stage: Stage,
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationMetadata {
    #[serde(flatten)]
    pub render: RenderMetadata,
    #[serde(flatten)]
    pub ingestion: IngestionMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResponse {
    pub status: Status,
    pub stage: Stage,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<StageError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rendered_document: Option<String>,
    pub sections: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_summary: Option<DataSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publish_result: Option<AggregatePublishResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<GenerationMetadata>,
}

impl GenerationResponse {
    fn started(version: &str) -> Self {
        Self {
            status: Status::Success,
            stage: Stage::Ingesting,
            version: version.to_string(),
            error: None,
            rendered_document: None,
            sections: BTreeMap::new(),
            data_summary: None,
            document_path: None,
            publish_result: None,
            metadata: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }
}

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub version: String,
    pub audience: String,
    pub ingestion: IngestionRequest,
    /// Section headings; empty means the audience's configured defaults.
    pub sections: Vec<String>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    /// `None` skips publishing. An empty list publishes to every configured
    /// destination.
    pub publish_to: Option<Vec<String>>,
}

impl GenerationRequest {
    /// Auto commits, auto previous releases, no issues, users audience.
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            audience: Audience::Users.as_str().to_string(),
            ingestion: IngestionRequest {
                repo: None,
                commit_source: SourceSelector::Auto,
                issue_source: None,
                release_source: Some(SourceSelector::Auto),
                commits: CommitQuery::default(),
                issues: IssueQuery::default(),
                releases: ReleaseQuery::default(),
            },
            sections: Vec::new(),
            model: None,
            temperature: None,
            publish_to: None,
        }
    }
}

/// Flat directory of generated documents, one file per version.
#[derive(Debug, Clone)]
pub struct DocumentStore {
    dir: PathBuf,
}

impl DocumentStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn path_for(&self, version: &str) -> PathBuf {
        self.dir.join(format!("release_{}.md", file_version(version)))
    }

    pub async fn save(&self, version: &str, text: &str) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(Error::from_io)?;
        let path = self.path_for(version);
        tokio::fs::write(&path, text).await.map_err(Error::from_io)?;
        Ok(path)
    }

    pub async fn load(&self, version: &str) -> Result<String> {
        let path = self.path_for(version);
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Error::not_found(
                "filesystem",
                format!("no saved document at {}", path.display()),
            )),
            Err(e) => Err(Error::from_io(e)),
        }
    }
}

/// Everything [`Pipeline::run`] needs once the request has been checked.
struct Plan {
    version: String,
    audience: Audience,
    sections: Vec<String>,
    model: String,
    temperature: f32,
    renderer: Box<dyn Renderer>,
}

pub struct Pipeline {
    config: Config,
    ingestion: IngestionCoordinator,
    publishing: PublishingCoordinator,
    generator: Option<Arc<dyn TextGenerator>>,
    store: DocumentStore,
}

impl Pipeline {
    pub fn new(config: Config, ingestion: IngestionCoordinator, publishing: PublishingCoordinator) -> Self {
        let store = DocumentStore::new(&config.ingestion.releases_dir);
        Self {
            config,
            ingestion,
            publishing,
            generator: None,
            store,
        }
    }

    /// Wires every built-in adapter and the `[llm] command` generator, if any.
    pub fn from_config(config: Config, credentials: &Credentials) -> Result<Self> {
        let ingestion = IngestionCoordinator::from_config(&config, credentials);
        let publishing = PublishingCoordinator::from_config(&config, credentials);
        let generator = match config.llm.command.as_deref() {
            Some(command) => Some(Arc::new(CommandGenerator::parse(command)?) as Arc<dyn TextGenerator>),
            None => None,
        };
        let mut pipeline = Self::new(config, ingestion, publishing);
        pipeline.generator = generator;
        Ok(pipeline)
    }

    pub fn with_generator(mut self, generator: Arc<dyn TextGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn with_store(mut self, store: DocumentStore) -> Self {
        self.store = store;
        self
    }

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    pub fn publishing(&self) -> &PublishingCoordinator {
        &self.publishing
    }

    pub fn ingestion(&self) -> &IngestionCoordinator {
        &self.ingestion
    }

    pub async fn generate(&self, request: GenerationRequest) -> GenerationResponse {
        let mut response = GenerationResponse::started(&request.version);
        let mut stage = Stage::Ingesting;

        match self.run(request, &mut stage, &mut response).await {
            Ok(()) => {
                response.stage = Stage::Done;
                info!(version = %response.version, "generation done");
            }
            Err(e) => {
                error!(version = %response.version, stage = ?stage, error = %e, "generation failed");
                response.status = Status::Error;
                response.stage = Stage::Failed;
                response.error = Some(StageError {
                    stage,
                    kind: e.kind().to_string(),
                    message: e.to_string(),
                });
            }
        }
        response
    }

    /// Checks everything that can be checked without I/O and fills defaults.
    fn prepare(&self, request: &mut GenerationRequest) -> Result<Plan> {
        let version = request.version.trim().to_string();
        if version.is_empty() {
            return Err(Error::validation("version is required"));
        }
        let audience: Audience = request.audience.parse()?;
        self.ingestion.validate(&request.ingestion)?;

        let model = request
            .model
            .clone()
            .unwrap_or_else(|| self.config.llm.model.clone());
        let renderer = renderer_for(&model, self.generator.clone())?;

        let sections = if request.sections.is_empty() {
            self.config.sections_for(audience.as_str())
        } else {
            request.sections.clone()
        };

        let ingestion = &mut request.ingestion;
        if ingestion.repo.is_none() {
            ingestion.repo = self.config.repo.clone();
        }
        for slot in [
            &mut ingestion.commits.repo,
            &mut ingestion.issues.repo,
            &mut ingestion.releases.repo,
        ] {
            if slot.is_none() {
                *slot = ingestion.repo.clone();
            }
        }
        if ingestion.releases.count == 0 {
            ingestion.releases.count = self.config.ingestion.previous_release_count;
        }
        if ingestion.releases.current_version.is_none() {
            ingestion.releases.current_version = Some(version.clone());
        }

        Ok(Plan {
            version,
            audience,
            sections,
            temperature: request.temperature.unwrap_or(self.config.llm.temperature),
            model,
            renderer,
        })
    }

    fn advance(stage: &mut Stage, next: Stage, version: &str) {
        *stage = next;
        info!(version, stage = ?next, "pipeline stage");
    }

    async fn run(
        &self,
        mut request: GenerationRequest,
        stage: &mut Stage,
        response: &mut GenerationResponse,
    ) -> Result<()> {
        let plan = self.prepare(&mut request)?;
        response.version = plan.version.clone();

        Self::advance(stage, Stage::Ingesting, &plan.version);
        let data = self.ingestion.ingest_all(&request.ingestion).await?;
        response.data_summary = Some(data.summary());

        Self::advance(stage, Stage::Rendering, &plan.version);
        let render_request = RenderRequest {
            version: &plan.version,
            data: &data,
            audience: plan.audience,
            sections: plan.sections.clone(),
            model: &plan.model,
            temperature: plan.temperature,
        };
        let limit = Duration::from_secs(self.config.llm.generation_timeout_secs);
        let document = tokio::time::timeout(limit, plan.renderer.render(&render_request))
            .await
            .map_err(|_| Error::timeout("llm", limit))??;
        response.rendered_document = Some(document.text.clone());
        response.sections = document.sections.clone();
        response.metadata = Some(GenerationMetadata {
            render: document.metadata.clone(),
            ingestion: data.metadata.clone(),
        });

        Self::advance(stage, Stage::Saved, &plan.version);
        let path = self.store.save(&plan.version, &document.text).await?;
        response.document_path = Some(path.clone());

        if let Some(destinations) = &request.publish_to {
            Self::advance(stage, Stage::Publishing, &plan.version);
            let mut metadata = PublishMetadata {
                repo: request.ingestion.repo.clone(),
                document_path: Some(path),
                extra: BTreeMap::new(),
            };
            metadata
                .extra
                .insert("audience".to_string(), plan.audience.as_str().into());
            metadata
                .extra
                .insert("model".to_string(), plan.model.clone().into());
            metadata.extra.insert(
                "commits_count".to_string(),
                data.commits.len().into(),
            );
            let result = self
                .publishing
                .publish(&plan.version, &document.text, destinations, &metadata)
                .await;
            response.publish_result = Some(result);
        }
        Ok(())
    }
}
