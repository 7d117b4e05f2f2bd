use async_trait::async_trait;
use chrono::Utc;
use pretty_assertions::assert_eq;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use release_notes::aggregator::IngestionCoordinator;
use release_notes::model::Commit;
use release_notes::pipeline::{DocumentStore, Stage, Status};
use release_notes::publish::{
    Destination, PublishMetadata, PublishReceipt, Publisher, PublishingCoordinator,
};
use release_notes::render::TextGenerator;
use release_notes::sources::local_releases::LocalReleaseSource;
use release_notes::sources::{
    CommitQuery, CommitSource, ReleaseQuery, SourceKind, SourceSelector,
};
use release_notes::{Config, Error, GenerationRequest, Pipeline, Result};

struct StaticCommits(Vec<Commit>);

#[async_trait]
impl CommitSource for StaticCommits {
    fn is_configured(&self) -> bool {
        true
    }

    async fn fetch_commits(&self, _query: &CommitQuery) -> Result<Vec<Commit>> {
        Ok(self.0.clone())
    }
}

struct Outcome(std::result::Result<&'static str, &'static str>);

#[async_trait]
impl Publisher for Outcome {
    fn display_name(&self) -> &'static str {
        "test"
    }

    fn is_configured(&self) -> bool {
        true
    }

    fn required_env(&self) -> &'static [&'static str] {
        &[]
    }

    async fn publish(&self, _: &str, _: &str, _: &PublishMetadata) -> Result<PublishReceipt> {
        match self.0 {
            Ok(url) => Ok(PublishReceipt {
                url: Some(url.to_string()),
                ..PublishReceipt::default()
            }),
            Err(message) => Err(Error::transient("confluence", message)),
        }
    }
}

struct Canned(&'static str);

#[async_trait]
impl TextGenerator for Canned {
    async fn generate(&self, _prompt: &str, _model: &str, _temperature: f32) -> Result<String> {
        Ok(self.0.to_string())
    }
}

fn commit(hash: &str, subject: &str) -> Commit {
    Commit {
        hash: hash.to_string(),
        full_hash: format!("{hash}0000000000"),
        author: "Ada".to_string(),
        subject: subject.to_string(),
        body: String::new(),
        authored_at: Utc::now(),
        committed_at: Utc::now(),
        url: None,
        author_login: None,
    }
}

fn pipeline(dir: &Path, commits: Vec<Commit>, publishing: PublishingCoordinator) -> Pipeline {
    let mut config = Config::default();
    config.ingestion.releases_dir = dir.to_path_buf();
    let ingestion = IngestionCoordinator::new(Duration::from_secs(5))
        .with_commit_source(SourceKind::Local, Arc::new(StaticCommits(commits)))
        .with_release_source(SourceKind::Local, Arc::new(LocalReleaseSource::new(dir)));
    Pipeline::new(config, ingestion, publishing)
}

fn no_publishing() -> PublishingCoordinator {
    PublishingCoordinator::new(Duration::from_secs(5))
}

#[tokio::test]
async fn single_fix_ends_up_in_the_user_notes() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline(
        dir.path(),
        vec![commit("abc1234", "Fix crash on startup")],
        no_publishing(),
    );

    let response = pipeline.generate(GenerationRequest::new("1.2.0")).await;

    assert_eq!(response.status, Status::Success);
    assert_eq!(response.stage, Stage::Done);
    let document = response.rendered_document.unwrap();
    assert!(!document.is_empty());
    assert!(document.contains("Fix crash on startup"));
    assert!(response.sections["bug_fixes"].contains("Fix crash on startup"));
    let summary = response.data_summary.unwrap();
    assert_eq!(summary.commits_count, 1);
    assert_eq!(summary.issues_count, 0);
}

#[tokio::test]
async fn local_releases_are_newest_first_without_the_current_version() {
    let dir = tempfile::tempdir().unwrap();
    let base = SystemTime::now() - Duration::from_secs(3600);
    for (i, version) in ["1.0.0", "1.1.0", "1.2.0"].iter().enumerate() {
        let path = dir.path().join(format!("release_{version}.md"));
        std::fs::write(&path, format!("# Release {version}\n\n- notes\n")).unwrap();
        File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(base + Duration::from_secs(60 * i as u64))
            .unwrap();
    }

    let pipeline = pipeline(dir.path(), vec![], no_publishing());
    let query = |current: &str| ReleaseQuery {
        repo: None,
        count: 2,
        current_version: Some(current.to_string()),
    };

    let newest = pipeline
        .ingestion()
        .ingest_previous_releases(SourceSelector::Named(SourceKind::Local), &query("1.3.0"))
        .await
        .unwrap();
    let versions: Vec<_> = newest.records.iter().map(|r| r.version.as_str()).collect();
    assert_eq!(versions, vec!["1.2.0", "1.1.0"]);

    let skipping_current = pipeline
        .ingestion()
        .ingest_previous_releases(SourceSelector::Named(SourceKind::Local), &query("1.2.0"))
        .await
        .unwrap();
    let versions: Vec<_> = skipping_current.records.iter().map(|r| r.version.as_str()).collect();
    assert_eq!(versions, vec!["1.1.0", "1.0.0"]);
    assert_eq!(skipping_current.records[0].name, "Release 1.1.0");
}

#[tokio::test]
async fn failed_destination_does_not_fail_the_generation() {
    let dir = tempfile::tempdir().unwrap();
    let publishing = no_publishing()
        .with_publisher(Destination::Wiki, Arc::new(Outcome(Err("503 Service Unavailable"))))
        .with_publisher(Destination::Chat, Arc::new(Outcome(Ok("https://chat.test/msg/1"))));
    let pipeline = pipeline(dir.path(), vec![commit("1111111", "feat: export")], publishing);

    let mut request = GenerationRequest::new("2.0.0");
    request.publish_to = Some(vec!["wiki".to_string(), "chat".to_string()]);
    let response = pipeline.generate(request).await;

    assert!(response.is_success());
    let result = response.publish_result.unwrap();
    assert_eq!(result.published, vec!["chat"]);
    assert_eq!(result.failed, vec!["wiki"]);
}

#[tokio::test]
async fn saved_notes_feed_the_next_generation() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline(dir.path(), vec![commit("2222222", "fix: typo")], no_publishing());

    let first = pipeline.generate(GenerationRequest::new("1.0.0")).await;
    assert!(first.is_success());
    let store = DocumentStore::new(dir.path());
    assert_eq!(
        store.load("1.0.0").await.unwrap(),
        first.rendered_document.unwrap()
    );

    let mut request = GenerationRequest::new("1.1.0");
    request.ingestion.release_source = Some(SourceSelector::Named(SourceKind::Local));
    let second = pipeline.generate(request).await;

    assert_eq!(second.data_summary.unwrap().previous_releases_count, 1);
    assert!(second.sections["technical_details"].contains("Previous release: 1.0.0"));
    assert_eq!(second.metadata.unwrap().ingestion.sources["releases"], "local");
}

#[tokio::test]
async fn model_output_is_used_when_a_generator_is_attached() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline(dir.path(), vec![commit("3333333", "perf: faster sync")], no_publishing())
        .with_generator(Arc::new(Canned("# 3.0.0\n\n## Highlights\n- Sync is twice as fast\n")));

    let mut request = GenerationRequest::new("3.0.0");
    request.model = Some("llama3".to_string());
    request.audience = "managers".to_string();
    let response = pipeline.generate(request).await;

    assert!(response.is_success(), "{:?}", response.error);
    assert_eq!(response.sections["highlights"], "- Sync is twice as fast");
    let metadata = response.metadata.unwrap();
    assert_eq!(metadata.render.model, "llama3");
    assert!(metadata.render.prompt_length > 0);
    assert!(response
        .rendered_document
        .unwrap()
        .ends_with("*Generated with AI model: llama3*\n"));
}

#[tokio::test]
async fn explicit_source_without_an_adapter_fails_validation() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline(dir.path(), vec![], no_publishing());

    let mut request = GenerationRequest::new("1.0.0");
    request.ingestion.commit_source = SourceSelector::Named(SourceKind::Github);
    let response = pipeline.generate(request).await;

    assert_eq!(response.status, Status::Error);
    let error = response.error.unwrap();
    assert_eq!(error.kind, "validation_error");
    assert!(!dir.path().join("release_1.0.0.md").exists());
}

#[tokio::test]
async fn regenerating_a_branch_version_does_not_cite_itself() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline(dir.path(), vec![commit("4444444", "feat: preview")], no_publishing());

    let mut request = GenerationRequest::new("feature/2.0");
    request.ingestion.release_source = Some(SourceSelector::Named(SourceKind::Local));
    let first = pipeline.generate(request.clone()).await;
    assert!(first.is_success(), "{:?}", first.error);
    assert!(dir.path().join("release_feature_2.0.md").exists());

    let again = pipeline.generate(request).await;
    assert!(again.is_success(), "{:?}", again.error);
    assert_eq!(again.data_summary.unwrap().previous_releases_count, 0);
}
