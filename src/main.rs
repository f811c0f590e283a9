mod error;
mod extractor;
mod report;
mod settings;
mod sink;
mod source;

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use extractor::count::with_thousands;
use extractor::{extract_with, CategoryStrategy, ExtractConfig, ExtractionRun, RunObserver, Termination};
use settings::Settings;
use sink::{ColumnSet, Sink};
use source::api::{ApiPacing, ApiQuery, ApiSource};
use source::html::HtmlLayout;
use source::http::{SearchFilters, SearchSource};
use source::PageSource;

#[derive(Parser)]
#[command(name = "tgstat_scraper", about = "TGStat channel listing scraper")]
struct Cli {
    /// Settings file (default: ./tgstat.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Bounds and output shared by every scraping subcommand.
#[derive(Args)]
struct RunArgs {
    /// Stop after this many channels
    #[arg(short = 'n', long)]
    target: Option<usize>,
    /// Max pages to walk
    #[arg(long)]
    max_pages: Option<usize>,
    /// Output file (.csv, or .db/.sqlite/.sqlite3 for SQLite)
    #[arg(short, long)]
    out: Option<PathBuf>,
    /// Keep channels without a link (written as N/A)
    #[arg(long)]
    allow_missing_link: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Page through the public search page over plain HTTP
    Search {
        #[command(flatten)]
        run: RunArgs,
        /// Channel language filter, repeatable (default: ru, en)
        #[arg(long = "lang")]
        languages: Vec<String>,
        /// Minimum subscriber count
        #[arg(long, default_value = "10000")]
        min_subscribers: u64,
        /// Minimum channel age in months
        #[arg(long, default_value = "1")]
        min_age: u32,
    },
    /// Drive a Chrome window through a filtered listing
    #[cfg(feature = "browser")]
    Browse {
        #[command(flatten)]
        run: RunArgs,
        /// Listing URL (default: browse_url from settings)
        #[arg(long)]
        url: Option<String>,
        /// Run Chrome without a window
        #[arg(long)]
        headless: bool,
        /// Wait for Enter before scraping (log in, set filters)
        #[arg(long)]
        manual: bool,
        /// Also take the category from short text lines
        #[arg(long)]
        text_categories: bool,
        /// Where to save a screenshot when the first page is empty
        #[arg(long, default_value = "debug/no_containers.png")]
        screenshot: PathBuf,
    },
    /// Query the JSON API (needs TGSTAT_API_TOKEN)
    Api {
        #[command(flatten)]
        run: RunArgs,
        /// Search string
        #[arg(short, long, default_value = "a")]
        query: String,
        #[arg(long, default_value = "RU")]
        country: String,
        #[arg(long)]
        language: Option<String>,
        /// Category id (see `categories`)
        #[arg(long)]
        category: Option<String>,
        /// Look up each channel's creation date for the age column
        #[arg(long)]
        with_age: bool,
        /// Channels per API request (at most 50)
        #[arg(long, default_value = "50")]
        limit: usize,
    },
    /// List API categories
    Categories,
    /// Print the first rows and the largest channels of a results file
    Report {
        #[arg(default_value = "tgstat_channels.csv")]
        file: PathBuf,
        /// Rows to list from the top of the file
        #[arg(short = 'n', long, default_value = "20")]
        first: usize,
        /// Largest channels to list
        #[arg(long, default_value = "10")]
        top: usize,
    },
}

/// What a subcommand does when neither flags nor settings say otherwise.
struct Variant {
    out: &'static str,
    columns: ColumnSet,
    target: Option<usize>,
    require_link: bool,
}

const SEARCH: Variant = Variant {
    out: "tgstat_channels.csv",
    columns: ColumnSet::Extended,
    target: Some(100),
    require_link: true,
};

#[cfg(feature = "browser")]
const BROWSE: Variant = Variant {
    out: "tgstat_filtered_channels.csv",
    columns: ColumnSet::Basic,
    target: None,
    require_link: true,
};

const API: Variant = Variant {
    out: "telegram_channels.csv",
    columns: ColumnSet::Extended,
    target: Some(100),
    require_link: false,
};

fn main() -> anyhow::Result<()> {
    let dotenv = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();
    if let Ok(path) = dotenv {
        tracing::debug!("Loaded {}", path.display());
    }

    let t0 = Instant::now();
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref()).context("Failed to load settings")?;

    let result = match cli.command {
        Commands::Search {
            run,
            languages,
            min_subscribers,
            min_age,
        } => {
            let config = extract_config(&settings, &run, &SEARCH, false)?;
            let mut filters = SearchFilters {
                min_subscribers,
                min_age_months: min_age,
                ..Default::default()
            };
            if !languages.is_empty() {
                filters.languages = languages;
            }
            let layout = HtmlLayout::compile(&settings.selectors)?;
            let mut source = SearchSource::new(
                &settings.search_url,
                &settings.user_agent,
                filters,
                layout,
                settings.page_delay(),
            )?;
            let out = output_path(&run, &SEARCH);
            let outcome = scrape(&mut source, &config, &out, SEARCH.columns)?;
            if outcome.terminated == Some(Termination::NoContainers) {
                println!("No channels on the first page. The search filters may be too strict, or the page layout changed.");
            }
            Ok(())
        }
        #[cfg(feature = "browser")]
        Commands::Browse {
            run,
            url,
            headless,
            manual,
            text_categories,
            screenshot,
        } => {
            use source::browser::{BrowserPacing, BrowserSession};

            let config = extract_config(&settings, &run, &BROWSE, text_categories)?;
            let layout = HtmlLayout::compile(&settings.selectors)?;
            let session = BrowserSession::launch(headless)?;
            session.open(url.as_deref().unwrap_or(&settings.browse_url))?;
            if manual {
                println!("Log in and set the listing filters in the browser, then press Enter...");
                std::io::stdin().read_line(&mut String::new())?;
            }
            session.dismiss_modals();

            let mut source = session.source(
                layout,
                BrowserPacing {
                    advance_timeout: settings.advance_timeout(),
                    poll_interval: settings.poll_interval(),
                    settle: settings.settle(),
                },
            );
            let out = output_path(&run, &BROWSE);
            let outcome = scrape(&mut source, &config, &out, BROWSE.columns)?;
            if outcome.terminated == Some(Termination::NoContainers) {
                println!("No channel cards found. Check that you are logged in and a search was run (try --manual).");
                match session.save_screenshot(&screenshot) {
                    Ok(()) => println!("Screenshot saved to {}", screenshot.display()),
                    Err(e) => tracing::warn!("Screenshot failed: {:#}", e),
                }
            }
            Ok(())
        }
        Commands::Api {
            run,
            query,
            country,
            language,
            category,
            with_age,
            limit,
        } => {
            let config = extract_config(&settings, &run, &API, false)?;
            let query = ApiQuery {
                q: query,
                country: Some(country).filter(|c| !c.is_empty()),
                language,
                category,
            };
            let mut source = api_source(&settings, query)?
                .with_limit(limit)
                .with_age(with_age);
            let out = output_path(&run, &API);
            let outcome = scrape(&mut source, &config, &out, API.columns)?;
            if outcome.terminated == Some(Termination::NoContainers) {
                println!("The API returned no channels for this query.");
            }
            Ok(())
        }
        Commands::Categories => {
            let source = api_source(&settings, ApiQuery::default())?;
            let categories = source.categories()?;
            for c in &categories {
                println!("{:>6}  {}", c.id, c.title);
            }
            println!("\n{} categories", categories.len());
            Ok(())
        }
        Commands::Report { file, first, top } => {
            let rows = report::load(&file)?;
            print!("{}", report::render(&rows, first, top));
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

/// Flags over settings over the subcommand's own defaults.
fn extract_config(
    settings: &Settings,
    run: &RunArgs,
    variant: &Variant,
    text_categories: bool,
) -> anyhow::Result<ExtractConfig> {
    let mut config = settings.extract_config()?;
    config.target_count = run.target.or(settings.target_count).or(variant.target);
    if let Some(max_pages) = run.max_pages {
        config.max_pages = max_pages;
    }
    config.require_link = config.require_link && variant.require_link && !run.allow_missing_link;
    if text_categories && !config.category_strategies.contains(&CategoryStrategy::ShortTextLine) {
        config.category_strategies.push(CategoryStrategy::ShortTextLine);
    }
    Ok(config)
}

fn output_path(run: &RunArgs, variant: &Variant) -> PathBuf {
    run.out.clone().unwrap_or_else(|| PathBuf::from(variant.out))
}

fn api_source(settings: &Settings, query: ApiQuery) -> anyhow::Result<ApiSource> {
    let Some(token) = settings.api_token.as_deref().filter(|t| !t.is_empty()) else {
        bail!("TGSTAT_API_TOKEN is not set (environment or .env)");
    };
    let source = ApiSource::new(
        &settings.api_base,
        token,
        &settings.user_agent,
        &settings.site_origin,
        query,
        ApiPacing {
            page_delay: settings.page_delay(),
            rate_limit_wait: settings.rate_limit_wait(),
            rate_limit_retries: settings.rate_limit_retries,
        },
    )?;
    Ok(source)
}

// ── Running ──

struct Spinner(ProgressBar);

impl Spinner {
    fn new() -> Self {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .unwrap(),
        );
        pb.set_message("page 1...");
        pb.enable_steady_tick(Duration::from_millis(120));
        Spinner(pb)
    }
}

impl RunObserver for Spinner {
    fn page_done(&mut self, page: usize, added: usize, total: usize) {
        self.0
            .set_message(format!("page {} done, +{} ({} channels)", page, added, total));
    }
}

/// Run the extractor, persist whatever it collected, print the summary.
fn scrape(
    source: &mut dyn PageSource,
    config: &ExtractConfig,
    out: &Path,
    columns: ColumnSet,
) -> anyhow::Result<ExtractionRun> {
    let mut spinner = Spinner::new();
    let run = extract_with(source, config, &mut spinner);
    spinner.0.finish_and_clear();

    let writer = sink::for_path(out, columns);
    writer.write(&run.records)?;
    print_summary(&run);
    println!("{}", sink::describe(writer.target(), run.records.len()));
    Ok(run)
}

fn print_summary(run: &ExtractionRun) {
    let reason = run
        .terminated
        .map(|t| t.to_string())
        .unwrap_or_else(|| "unknown".into());
    println!(
        "Stopped: {} after {} page(s). {} channels, {} skipped, {} duplicates.",
        reason,
        run.pages_processed,
        run.records.len(),
        run.skipped,
        run.duplicates
    );
    if let Some(e) = &run.source_error {
        println!("Source error: {}", e);
    }

    let rows: Vec<report::ReportRow> = run.records.iter().map(report::ReportRow::from).collect();
    let top = report::top_by_subscribers(&rows, 10);
    if !top.is_empty() {
        println!("\nTop {} by subscribers:", top.len());
        for r in top {
            println!(
                "- {} ({}) - {}",
                r.name,
                r.subscribers.map(with_thousands).unwrap_or_default(),
                r.link
            );
        }
    }
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
