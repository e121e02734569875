use anyhow::Context;
use clap::Parser;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;
use summary_ingest::{
    api, config, logging,
    extraction::PdfTextExtractor,
    pipeline::{IngestionPipeline, PipelineComponents, PipelineSettings},
    registry::PgTenantRegistry,
    storage::LocalFileStore,
    summarization::HuggingFaceClient,
    workspace::QdrantWorkspaceStore,
};
use tokio::net::TcpListener;

#[derive(Parser)]
#[command(
    name = "summary-ingest",
    version,
    about = "Tenant-aware document ingestion server"
)]
struct Cli {
    /// Port to listen on; overrides SERVER_PORT.
    #[arg(long)]
    port: Option<u16>,
    /// Environment file to load instead of `.env`.
    #[arg(long)]
    env_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = config::init_config(cli.env_file.as_deref())?;
    logging::init_tracing(&config.log_file);
    config.log_loaded();

    let registry = PgTenantRegistry::connect(
        &config.database_url,
        config.database_max_connections,
        config.store_timeout(),
    )
    .await
    .context("Failed to connect to the tenant registry")?;
    registry
        .ensure_schema()
        .await
        .context("Failed to prepare the tenant registry schema")?;

    let workspaces = QdrantWorkspaceStore::from_config(&config)
        .context("Failed to configure the workspace store")?;
    let summarizer = HuggingFaceClient::from_config(&config)
        .context("Failed to configure the summarization client")?;
    tracing::info!(
        model = %config.summarizer_model,
        retention = ?config.text_retention,
        upload_dir = %config.upload_dir.display(),
        "Components initialized"
    );

    let pipeline = IngestionPipeline::new(
        PipelineComponents {
            files: Arc::new(LocalFileStore::new(
                &config.upload_dir,
                config.store_timeout(),
            )),
            extractor: Arc::new(PdfTextExtractor),
            summarizer: Arc::new(summarizer),
            registry: Arc::new(registry),
            workspaces: Arc::new(workspaces),
        },
        PipelineSettings::from_config(&config),
    );
    let app = api::create_router(Arc::new(pipeline));

    let port = cli.port.unwrap_or(config.server_port);
    let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
        .await
        .with_context(|| format!("Failed to bind port {port}"))?;
    tracing::info!("Listening on http://0.0.0.0:{}", port);
    axum::serve(listener, app).await?;
    Ok(())
}
