//! CLI command definitions and handlers.
//!
//! Each subcommand is implemented as a function that takes the parsed
//! arguments and returns an exit code through `anyhow::Result`.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;

use crate::audio::{AudioProvider, UnavailableFetcher};
use crate::audio::ytdlp::YtDlpFetcher;
use crate::cache::store::StateStore;
use crate::config::Config;
use crate::downloader::TrackDownloader;
use crate::error::Error;
use crate::history::HistoryTracker;
use crate::plan::executor::PlanExecutor;
use crate::plan::generator::PlanGenerator;
use crate::plan::{m3u, optimizer, Plan, PlanStatistics};
use crate::ratelimit::{RateLimitTracker, SlidingWindowLimiter};
use crate::spotify::api::SpotifyApi;
use crate::spotify::MetadataClient;
use crate::tagger::Tagger;

/// Exit code reported after a cancelled run.
const EXIT_CANCELLED: i32 = 130;

/// Music Courier CLI
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand)]
pub enum Commands {
    /// Run the full pipeline: generate, optimize, execute
    Download {
        /// Path to the config file
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,
    },
    /// Generate (and optimize) a plan without executing it
    Plan {
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,
        /// Where to write the plan (defaults to download.plan_path)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Resume a previously saved plan
    Resume {
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,
        /// Plan file to resume (defaults to download.plan_path)
        #[arg(short, long)]
        plan: Option<PathBuf>,
        /// Execute even if the plan was generated under a different config
        #[arg(long)]
        force: bool,
    },
    /// Show recent run history
    History {
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,
        /// Number of runs to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
    /// Check the config file and exit
    Validate {
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,
    },
}

/// Run the specified CLI command; returns the process exit code.
pub fn run_command(cli: &Cli) -> anyhow::Result<i32> {
    let rt = Runtime::new()?;
    match &cli.command {
        Commands::Download { config } => cmd_download(&rt, config),
        Commands::Plan { config, output } => cmd_plan(&rt, config, output.as_deref()),
        Commands::Resume {
            config,
            plan,
            force,
        } => cmd_resume(&rt, config, plan.as_deref(), *force),
        Commands::History { config, limit } => cmd_history(config, *limit),
        Commands::Validate { config } => cmd_validate(config),
    }
}

// ============================================================================
// Engine assembly
// ============================================================================

/// All long-lived collaborators, wired per the config.
struct Engine {
    config: Config,
    store: Arc<StateStore>,
    spotify: Arc<MetadataClient>,
    audio: Arc<AudioProvider>,
    downloader: Arc<TrackDownloader>,
    history: Arc<HistoryTracker>,
    tracker: Arc<RateLimitTracker>,
}

fn build_engine(config: Config) -> Engine {
    let store = Arc::new(StateStore::load(&config.cache.directory));
    let tracker = Arc::new(RateLimitTracker::new());
    let general_limiter = config
        .rate_limits
        .download
        .enabled
        .then(|| Arc::new(SlidingWindowLimiter::from_config(&config.rate_limits.download)));

    let api = Arc::new(SpotifyApi::new(
        config.download.client_id.clone(),
        config.download.client_secret.clone(),
    ));
    let spotify = Arc::new(MetadataClient::new(
        api,
        &config,
        Arc::clone(&tracker),
        general_limiter.clone(),
        Some(Arc::clone(&store)),
    ));

    let fetcher: Arc<dyn crate::audio::AudioFetcher> = match YtDlpFetcher::locate() {
        Some(ytdlp) => {
            if let Some(version) = ytdlp.version() {
                tracing::info!(version, "Using yt-dlp");
            }
            Arc::new(ytdlp)
        }
        None => {
            tracing::warn!("yt-dlp not found; audio operations will fail until it is installed");
            Arc::new(UnavailableFetcher)
        }
    };
    let audio = Arc::new(AudioProvider::new(
        fetcher,
        &config,
        Arc::clone(&tracker),
        general_limiter,
        Some(Arc::clone(&store)),
    ));

    let history = Arc::new(HistoryTracker::new(&config.history));
    let downloader = Arc::new(
        TrackDownloader::new(
            Arc::clone(&spotify),
            Arc::clone(&audio),
            Arc::new(Tagger::new()),
            Some(Arc::clone(&store)),
            &config,
        )
        .with_history(Arc::clone(&history)),
    );

    Engine {
        config,
        store,
        spotify,
        audio,
        downloader,
        history,
        tracker,
    }
}

/// Periodically sweep expired entries out of the in-memory caches.
fn spawn_cache_sweeper(engine: &Engine, cancel: CancellationToken) {
    let interval_secs = engine.config.cache.sweep_interval_seconds;
    if interval_secs == 0 {
        return;
    }
    let spotify = Arc::clone(&engine.spotify);
    let audio = Arc::clone(&engine.audio);
    tokio::spawn(async move {
        let interval = std::time::Duration::from_secs(interval_secs);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {
                    let removed = spotify.evict_expired() + audio.evict_expired();
                    if removed > 0 {
                        tracing::debug!(removed, "Cache sweep dropped expired entries");
                    }
                }
            }
        }
    });
}

/// Wire ctrl-c to the cancellation token; a second ctrl-c aborts.
fn spawn_ctrl_c_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing in-flight items (ctrl-c again to abort)");
            cancel.cancel();
            if tokio::signal::ctrl_c().await.is_ok() {
                std::process::exit(EXIT_CANCELLED);
            }
        }
    });
}

// ============================================================================
// Individual command implementations
// ============================================================================

fn cmd_download(rt: &Runtime, config_path: &Path) -> anyhow::Result<i32> {
    let config = Config::load(config_path)?;
    if !config.has_sources() {
        println!("Nothing to do: the manifest lists no songs, albums, playlists, or artists.");
        return Ok(0);
    }
    let engine = build_engine(config);

    rt.block_on(async {
        let cancel = CancellationToken::new();
        spawn_ctrl_c_handler(cancel.clone());
        spawn_cache_sweeper(&engine, cancel.clone());

        let run_id = chrono::Utc::now().format("%Y%m%d-%H%M%S").to_string();
        engine.history.start_run(&run_id).await;

        let result = run_pipeline(&engine, &cancel).await;

        if let Err(e) = engine.store.save() {
            tracing::warn!(error = %e, "Failed to persist caches");
        }

        match result {
            Ok(stats) => {
                engine
                    .history
                    .stop_run("completed", "execute", &stats, None)
                    .await
                    .ok();
                print_summary(&stats);
                for (name, cache_stats) in engine.spotify.cache_stats() {
                    tracing::debug!(
                        cache = name,
                        hits = cache_stats.hits,
                        misses = cache_stats.misses,
                        hit_rate = cache_stats.hit_rate,
                        "Metadata cache stats"
                    );
                }
                Ok(if stats.failed == 0 { 0 } else { 1 })
            }
            Err(Error::Cancelled) => {
                engine
                    .history
                    .stop_run("cancelled", "execute", &PlanStatistics::default(), Some("cancelled"))
                    .await
                    .ok();
                println!("\nCancelled.");
                Ok(EXIT_CANCELLED)
            }
            Err(e) => {
                engine
                    .history
                    .stop_run("failed", "execute", &PlanStatistics::default(), Some(&e.to_string()))
                    .await
                    .ok();
                Err(e.into())
            }
        }
    })
}

/// Generate → optimize → persist → execute → sidecars.
async fn run_pipeline(
    engine: &Engine,
    cancel: &CancellationToken,
) -> crate::error::Result<PlanStatistics> {
    let features = &engine.config.features;

    let mut plan = if features.generate_plan {
        let generator = PlanGenerator::new(&engine.spotify, &engine.audio, &engine.config);
        generator.generate(cancel).await?
    } else {
        Plan::load(&engine.config.download.plan_path)?
    };

    optimizer::optimize(&mut plan, features);

    if features.persist_plan {
        plan.save(&engine.config.download.plan_path)?;
    }

    if !features.execute_plan {
        println!("Execution disabled; plan has {} items.", plan.items.len());
        return Ok(plan.statistics.clone());
    }

    let stats = execute_plan(engine, &mut plan, cancel).await?;
    let sidecar_dir = sidecar_directory(&engine.config.download.output);
    if let Err(e) = m3u::write_sidecars(&plan, &sidecar_dir) {
        tracing::warn!(error = %e, "Sidecar generation failed");
    }
    Ok(stats)
}

async fn execute_plan(
    engine: &Engine,
    plan: &mut Plan,
    cancel: &CancellationToken,
) -> crate::error::Result<PlanStatistics> {
    let mut executor = PlanExecutor::new(
        Arc::clone(&engine.downloader),
        engine.config.download.threads,
    )
    .with_history(Arc::clone(&engine.history));
    if !engine.config.download.allow_partial_containers {
        executor = executor.with_strict_containers();
    }
    if engine.config.features.persist_plan {
        executor = executor.with_persistence(&engine.config.download.plan_path);
    }
    if engine.config.features.status_reporting {
        let tracker = Arc::clone(&engine.tracker);
        executor = executor.with_progress(Arc::new(move |stats: &PlanStatistics| {
            let throttled = tracker
                .get_info()
                .map(|info| format!("  [rate-limited {:.0}s]", info.remaining_seconds))
                .unwrap_or_default();
            print!(
                "\r{:>5.1}%  {} done, {} failed, {} pending{}   ",
                stats.progress_percent,
                stats.completed + stats.skipped,
                stats.failed,
                stats.pending + stats.in_progress,
                throttled,
            );
            use std::io::Write;
            std::io::stdout().flush().ok();
        }));
    }

    let result = executor.execute(plan, cancel).await;
    if engine.config.features.status_reporting {
        println!();
    }
    result
}

/// Sidecars land next to the output tree: the template's leading literal
/// directory, or the working directory when the template starts with a
/// placeholder.
fn sidecar_directory(output_template: &str) -> PathBuf {
    match output_template.split('/').next() {
        Some(first) if !first.is_empty() && !first.contains('{') => PathBuf::from(first),
        _ => PathBuf::from("."),
    }
}

fn print_summary(stats: &PlanStatistics) {
    println!("\nRun summary");
    println!("===========");
    println!("  Completed: {}", stats.completed);
    println!("  Skipped:   {}", stats.skipped);
    println!("  Failed:    {}", stats.failed);
    println!("  Pending:   {}", stats.pending);
    println!("  Total:     {}", stats.total);
}

fn cmd_plan(rt: &Runtime, config_path: &Path, output: Option<&Path>) -> anyhow::Result<i32> {
    let config = Config::load(config_path)?;
    let output = output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| config.download.plan_path.clone());
    let engine = build_engine(config);

    rt.block_on(async {
        let cancel = CancellationToken::new();
        spawn_ctrl_c_handler(cancel.clone());

        let generator = PlanGenerator::new(&engine.spotify, &engine.audio, &engine.config);
        let mut plan = generator.generate(&cancel).await?;
        optimizer::optimize(&mut plan, &engine.config.features);
        plan.save(&output)?;
        engine.store.save().ok();

        println!("Plan written to {} ({} items).", output.display(), plan.items.len());
        anyhow::Ok(0)
    })
}

fn cmd_resume(
    rt: &Runtime,
    config_path: &Path,
    plan_path: Option<&Path>,
    force: bool,
) -> anyhow::Result<i32> {
    let config = Config::load(config_path)?;
    let plan_path = plan_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| config.download.plan_path.clone());

    let mut plan = Plan::load(&plan_path)?;
    if plan.is_stale(&config.hash()) {
        if !force {
            anyhow::bail!(
                "plan {} was generated under a different config; re-run `plan` or pass --force",
                plan_path.display()
            );
        }
        tracing::warn!("Executing a stale plan (--force)");
    }
    plan.reset_in_progress();

    let engine = build_engine(config);
    rt.block_on(async {
        let cancel = CancellationToken::new();
        spawn_ctrl_c_handler(cancel.clone());
        spawn_cache_sweeper(&engine, cancel.clone());

        let run_id = chrono::Utc::now().format("%Y%m%d-%H%M%S").to_string();
        engine.history.start_run(&run_id).await;

        let result = execute_plan(&engine, &mut plan, &cancel).await;
        engine.store.save().ok();

        match result {
            Ok(stats) => {
                let sidecar_dir = sidecar_directory(&engine.config.download.output);
                m3u::write_sidecars(&plan, &sidecar_dir).ok();
                engine
                    .history
                    .stop_run("completed", "execute", &stats, None)
                    .await
                    .ok();
                print_summary(&stats);
                Ok(if stats.failed == 0 { 0 } else { 1 })
            }
            Err(Error::Cancelled) => {
                engine
                    .history
                    .stop_run("cancelled", "execute", &plan.statistics, Some("cancelled"))
                    .await
                    .ok();
                println!("\nCancelled; resume again to continue.");
                Ok(EXIT_CANCELLED)
            }
            Err(e) => Err(e.into()),
        }
    })
}

fn cmd_history(config_path: &Path, limit: usize) -> anyhow::Result<i32> {
    let config = Config::load(config_path)?;
    let tracker = HistoryTracker::new(&config.history);
    let runs = tracker.list_runs();

    if runs.is_empty() {
        println!("No run history found in {}.", config.history.directory.display());
        return Ok(0);
    }
    for run in runs.iter().take(limit) {
        let finished = run
            .completed_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}  {:>9}  {:>5.1}%  {} ok / {} failed  (finished {})",
            run.run_id,
            run.final_state,
            run.statistics.progress_percent,
            run.statistics.completed,
            run.statistics.failed,
            finished,
        );
        if let Some(error) = &run.error {
            println!("    error: {}", error);
        }
    }
    Ok(0)
}

fn cmd_validate(config_path: &Path) -> anyhow::Result<i32> {
    let config = Config::load(config_path)?;
    println!("Config OK ({} sources).", {
        config.songs.len() + config.albums.len() + config.playlists.len() + config.artists.len()
    });
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sidecar_directory_from_template() {
        assert_eq!(
            sidecar_directory("music/{artist}/{title}.{output-ext}"),
            PathBuf::from("music")
        );
        assert_eq!(
            sidecar_directory("{artist}/{title}.{output-ext}"),
            PathBuf::from(".")
        );
    }

    #[test]
    fn test_cli_parses_download_command() {
        let cli = Cli::try_parse_from(["music-courier", "download", "--config", "my.toml"]).unwrap();
        match cli.command {
            Commands::Download { config } => assert_eq!(config, PathBuf::from("my.toml")),
            _ => panic!("expected download command"),
        }
    }

    #[test]
    fn test_cli_requires_subcommand() {
        assert!(Cli::try_parse_from(["music-courier"]).is_err());
    }
}
