use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use animatch::config::Config;
use animatch::logging;
use animatch::pipeline::UpdatePipeline;
use animatch::recommend::{Recommendation, RecommendationService};
use animatch::server::RecommenderService;
use animatch::source::CatalogSource;
use animatch::source::file::FileSource;
use animatch::source::jikan::JikanSource;
use animatch::store::ArtifactStore;
use animatch::store::sqlite::SqliteArtifactStore;
use rmcp::ServiceExt;

#[derive(Parser)]
#[command(name = "animatch", version, about = "Content-similarity anime recommender with an MCP server")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations and exit
    Migrate,
    /// Fetch the current season, merge it into the catalog, rebuild and publish a new generation
    Update {
        /// Read the batch from a saved source response instead of the HTTP API
        #[arg(long)]
        from_file: Option<PathBuf>,
        /// Rebuild and report without publishing
        #[arg(long)]
        dry_run: bool,
    },
    /// Print recommendations for a catalog title
    Recommend {
        /// Exact catalog title
        title: String,
        /// Number of recommendations (1-10)
        #[arg(short, long)]
        k: Option<usize>,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Print the trending snapshot of the live generation
    Trending {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Show what the artifact store holds
    Stats,
}

async fn open_store(config: &Config) -> Result<SqliteArtifactStore> {
    let store = SqliteArtifactStore::new(&config.db_path)
        .await
        .with_context(|| format!("Failed to open artifact store at {}", config.db_path))?;
    Ok(store.with_retention(config.index.keep_generations))
}

/// Recommendation service over the live generation, or a hint to seed the store first.
async fn load_recommender(config: &Config, store: &SqliteArtifactStore) -> Result<RecommendationService> {
    let generation = store.load_current().await?.ok_or_else(|| {
        anyhow::anyhow!(
            "No catalog generation published in {}. Run 'animatch update' first.",
            config.db_path
        )
    })?;
    tracing::info!(
        generation_id = %generation.id,
        items = generation.catalog.len(),
        created_at = %generation.created_at.to_rfc3339(),
        "Loaded live generation"
    );
    Ok(RecommendationService::new(Arc::new(generation), config.recommend.default_k))
}

fn print_table(items: &[Recommendation]) {
    for (rank, r) in items.iter().enumerate() {
        let score = r
            .score
            .map(|s| format!("{:.2}", s))
            .unwrap_or_else(|| "-".to_string());
        println!("{:>2}. {:<50} {:>5}  {}", rank + 1, r.title, score, r.detail_url);
        if let Some(synopsis) = &r.synopsis {
            println!("    {}", synopsis);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Parse CLI args
    let cli = Cli::parse();

    // 2. Load configuration
    let config = Config::load().unwrap_or_else(|e| {
        eprintln!("Config error (using defaults): {}", e);
        Config::default()
    });

    // 3. Initialize logging FIRST (before any other output)
    // stdout is reserved for JSON-RPC and command output
    logging::init_logging(&config);

    match cli.command {
        Some(Commands::Migrate) => {
            tracing::info!("Running database migrations...");
            open_store(&config).await?;
            println!("Migrations completed successfully.");
        }

        Some(Commands::Update { from_file, dry_run }) => {
            let store = Arc::new(open_store(&config).await?);
            let source: Arc<dyn CatalogSource> = match from_file {
                Some(path) => Arc::new(FileSource::new(path)),
                None => Arc::new(JikanSource::new(&config.source)?),
            };

            let mut pipeline = UpdatePipeline::new(source, store, config.index.clone())
                .with_dry_run(dry_run);
            let report = pipeline.run().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Some(Commands::Recommend { title, k, json }) => {
            let store = open_store(&config).await?;
            let recommender = load_recommender(&config, &store).await?;
            let recs = recommender.recommend(&title, k)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&recs)?);
            } else if recs.is_empty() {
                println!("No other titles in the catalog yet.");
            } else {
                print_table(&recs);
            }
        }

        Some(Commands::Trending { json }) => {
            let store = open_store(&config).await?;
            let recommender = load_recommender(&config, &store).await?;
            let items = recommender.trending();
            if json {
                println!("{}", serde_json::to_string_pretty(&items)?);
            } else {
                print_table(&items);
            }
        }

        Some(Commands::Stats) => {
            let store = open_store(&config).await?;
            let stats = store.stats().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }

        None => {
            // Default: start the MCP server
            tracing::info!(
                version = env!("CARGO_PKG_VERSION"),
                "animatch server starting"
            );

            let store = open_store(&config).await?;
            let recommender = load_recommender(&config, &store).await?;
            let service = RecommenderService::new(Arc::new(recommender));

            // Serve via stdio transport
            let (stdin, stdout) = rmcp::transport::io::stdio();
            let server = service.serve((stdin, stdout)).await?;

            tracing::info!("animatch server running, awaiting tool calls via stdio");

            // Wait for shutdown (client disconnects or signal)
            server.waiting().await?;

            tracing::info!("animatch server stopped");
        }
    }

    Ok(())
}
