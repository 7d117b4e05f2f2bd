use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use release_notes::publish::PublishMetadata;
use release_notes::sources::{self, ReleaseQuery, SourceSelector};
use release_notes::{Config, Credentials, GenerationRequest, Pipeline};

#[derive(Parser)]
#[command(name = "release-notes")]
#[command(about = "Generate release notes from commits and issues and publish them")]
struct Cli {
    /// Config file (defaults to ./release-notes.toml when present)
    #[arg(short, long, env = "RELEASE_NOTES_CONFIG")]
    config: Option<PathBuf>,

    /// Forge repository as owner/name, overriding the config file
    #[arg(short, long, global = true)]
    repo: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate release notes for a version and optionally publish them
    Generate {
        #[arg(short, long)]
        version: String,

        /// users, developers or managers
        #[arg(short, long, default_value = "users")]
        audience: String,

        /// auto, github or local
        #[arg(long, default_value = "auto")]
        commit_source: String,

        /// github, jira or json; issues are skipped when omitted
        #[arg(long)]
        issue_source: Option<String>,

        /// auto, github, local, changelog or none
        #[arg(long, default_value = "auto")]
        release_source: String,

        #[arg(long)]
        from_tag: Option<String>,

        #[arg(long)]
        to_tag: Option<String>,

        #[arg(long, value_parser = parse_date)]
        since: Option<DateTime<Utc>>,

        #[arg(long, value_parser = parse_date)]
        until: Option<DateTime<Utc>>,

        #[arg(long)]
        branch: Option<String>,

        #[arg(long)]
        milestone: Option<String>,

        #[arg(long, value_delimiter = ',')]
        labels: Vec<String>,

        /// Jira project key
        #[arg(long)]
        project_key: Option<String>,

        /// JSON file of issues, for --issue-source json
        #[arg(long)]
        issues_file: Option<PathBuf>,

        /// Section headings, overriding the audience defaults
        #[arg(long, value_delimiter = ',')]
        sections: Vec<String>,

        #[arg(long)]
        model: Option<String>,

        #[arg(long)]
        temperature: Option<f32>,

        /// Publish after generating; with no names, every configured destination
        #[arg(long, value_delimiter = ',', num_args = 0..)]
        publish: Option<Vec<String>>,

        /// Print the whole response as JSON instead of the document
        #[arg(long)]
        json: bool,
    },

    /// Publish a document that was already generated
    Publish {
        #[arg(short, long)]
        version: String,

        /// Document to publish (defaults to the saved release_<version>.md)
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Destinations; every configured one when omitted
        #[arg(short, long, value_delimiter = ',')]
        to: Vec<String>,
    },

    /// Show which destinations are configured
    Platforms,

    /// List previous releases from a source
    Releases {
        /// auto, github, local or changelog
        #[arg(long, default_value = "auto")]
        source: String,

        #[arg(long, default_value = "10")]
        limit: usize,

        /// Version to leave out of the list
        #[arg(long)]
        current_version: Option<String>,
    },
}

fn parse_date(raw: &str) -> std::result::Result<DateTime<Utc>, String> {
    sources::parse_date(raw).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if cli.repo.is_some() {
        config.repo = cli.repo.clone();
    }
    let credentials = Credentials::from_env();
    tracing::debug!(?credentials, "credentials loaded");
    let pipeline = Pipeline::from_config(config, &credentials)?;

    match cli.command {
        Commands::Generate {
            version,
            audience,
            commit_source,
            issue_source,
            release_source,
            from_tag,
            to_tag,
            since,
            until,
            branch,
            milestone,
            labels,
            project_key,
            issues_file,
            sections,
            model,
            temperature,
            publish,
            json,
        } => {
            let mut request = GenerationRequest::new(version);
            request.audience = audience;
            request.ingestion.repo = cli.repo;
            request.ingestion.commit_source = commit_source.parse()?;
            request.ingestion.issue_source = issue_source.map(|s| s.parse()).transpose()?;
            request.ingestion.release_source = match release_source.as_str() {
                "none" => None,
                other => Some(other.parse()?),
            };
            request.ingestion.commits.from_tag = from_tag;
            request.ingestion.commits.to_tag = to_tag;
            request.ingestion.commits.since = since;
            request.ingestion.commits.until = until;
            request.ingestion.commits.branch = branch;
            request.ingestion.issues.milestone = milestone;
            request.ingestion.issues.labels = labels;
            request.ingestion.issues.since = since;
            request.ingestion.issues.project_key = project_key;
            request.ingestion.issues.json_file = issues_file;
            request.sections = sections;
            request.model = model;
            request.temperature = temperature;
            request.publish_to = publish;

            let response = pipeline.generate(request).await;

            if json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else if let Some(document) = &response.rendered_document {
                println!("{document}");
            }

            if let Some(path) = &response.document_path {
                eprintln!("Saved to {}", path.display());
            }
            if let Some(result) = &response.publish_result {
                for name in &result.published {
                    eprintln!("✓ {name}");
                }
                for name in &result.failed {
                    let error = result.details.get(name).and_then(|d| d.error.as_deref());
                    eprintln!("✗ {name}: {}", error.unwrap_or("failed"));
                }
            }
            if let Some(error) = &response.error {
                eprintln!("Generation failed while {:?}: {}", error.stage, error.message);
                std::process::exit(1);
            }
        }
        Commands::Publish { version, file, to } => {
            let (document, path) = match file {
                Some(path) => {
                    let text = std::fs::read_to_string(&path)
                        .with_context(|| format!("reading {}", path.display()))?;
                    (text, path)
                }
                None => {
                    let text = pipeline.store().load(&version).await?;
                    (text, pipeline.store().path_for(&version))
                }
            };

            let metadata = PublishMetadata {
                repo: cli.repo,
                document_path: Some(path),
                ..PublishMetadata::default()
            };
            let result = pipeline
                .publishing()
                .publish(&version, &document, &to, &metadata)
                .await;

            for name in &result.published {
                let url = result.details[name]
                    .receipt
                    .as_ref()
                    .and_then(|r| r.url.as_deref())
                    .unwrap_or("");
                println!("✓ {name} {url}");
            }
            for name in &result.failed {
                let error = result.details[name].error.as_deref().unwrap_or("failed");
                println!("✗ {name}: {error}");
            }
            if !result.failed.is_empty() {
                std::process::exit(1);
            }
        }
        Commands::Platforms => {
            for status in pipeline.publishing().platform_status() {
                let mark = if status.configured { "✓" } else { "✗" };
                println!(
                    "{mark} {:<11} {:<16} needs {}",
                    status.name,
                    status.display_name,
                    status.required_env.join(", ")
                );
            }
        }
        Commands::Releases {
            source,
            limit,
            current_version,
        } => {
            let selector: SourceSelector = source.parse()?;
            let query = ReleaseQuery {
                repo: cli.repo,
                count: limit,
                current_version,
            };
            let releases = pipeline
                .ingestion()
                .ingest_previous_releases(selector, &query)
                .await?;

            println!("Previous releases from {}:", releases.source);
            if releases.records.is_empty() {
                println!("  No releases found");
            }
            for release in releases.records {
                let published = release
                    .published_at
                    .map(|at| at.format("%Y-%m-%d").to_string())
                    .unwrap_or_else(|| "unpublished".to_string());
                println!("  - {}: {} ({published})", release.version, release.name);
            }
        }
    }

    Ok(())
}
