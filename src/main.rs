mod config;
mod content_map;
mod loader;
mod logging;
mod markdown;
mod page;
mod resource;
mod serve;

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};

use config::SiteConfig;
use loader::{load_all, EntryOutcome};
use markdown::RendererKind;
use page::Page;
use resource::{DirFetcher, Fetcher, HttpFetcher};

/// Format of the per-region report written to stderr by `fill`.
#[derive(Clone, Copy, ValueEnum)]
enum ReportFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve a site, filling page regions with rendered markdown on every request
    Serve {
        /// Site root holding the templates and static directories
        #[arg(default_value = ".")]
        site: PathBuf,
        /// Site configuration file (defaults to <SITE>/mdregions.toml when present)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Interface address to bind to
        #[arg(long, default_value = "127.0.0.1")]
        bind: String,
        /// Starting port number for the HTTP server
        #[arg(long, default_value = "8021")]
        port: u16,
        /// Markdown renderer (overrides the configuration)
        #[arg(long, value_enum)]
        renderer: Option<RendererKind>,
    },
    /// Fill the regions of one HTML page and write it to stdout
    Fill {
        /// HTML page to fill
        page: PathBuf,
        /// Site configuration file (defaults to <SITE>/mdregions.toml when present)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Fetch resources over HTTP from this origin, e.g. http://127.0.0.1:8021
        #[arg(long, conflicts_with = "site")]
        origin: Option<String>,
        /// Read resources from this site root instead of over HTTP
        #[arg(long)]
        site: Option<PathBuf>,
        /// Page name used to select [pages.<name>] regions (defaults to the file stem)
        #[arg(long = "page-name")]
        page_name: Option<String>,
        /// Markdown renderer (overrides the configuration)
        #[arg(long, value_enum)]
        renderer: Option<RendererKind>,
        /// Write a per-region report to stderr
        #[arg(long, value_enum)]
        report: Option<ReportFormat>,
    },
}

#[derive(Parser)]
#[command(
    name = "mdregions",
    version,
    about = "Fill named regions of HTML pages with rendered markdown"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

fn main() -> anyhow::Result<()> {
    match Cli::parse().command {
        Commands::Serve {
            site,
            config,
            bind,
            port,
            renderer,
        } => {
            let mut cfg = SiteConfig::discover(config.as_deref(), &site)?;
            logging::init_logging(cfg.site.log.as_deref());
            if let Some(kind) = renderer {
                cfg.site.renderer = kind;
            }
            let rt = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("failed to start the async runtime")?;
            rt.block_on(serve::run_serve(site, cfg, bind, port))
        }
        Commands::Fill {
            page,
            config,
            origin,
            site,
            page_name,
            renderer,
            report,
        } => {
            let site_root = site.unwrap_or_else(|| PathBuf::from("."));
            let mut cfg = SiteConfig::discover(config.as_deref(), &site_root)?;
            logging::init_logging(cfg.site.log.as_deref());
            if let Some(kind) = renderer {
                cfg.site.renderer = kind;
            }
            run_fill(&page, &cfg, &site_root, origin.as_deref(), page_name, report)
        }
    }
}

/// Fill `page_path` once and print it. Region failures never fail the command.
fn run_fill(
    page_path: &Path,
    cfg: &SiteConfig,
    site_root: &Path,
    origin: Option<&str>,
    page_name: Option<String>,
    report: Option<ReportFormat>,
) -> anyhow::Result<()> {
    let source = std::fs::read_to_string(page_path)
        .with_context(|| format!("reading page {}", page_path.display()))?;
    let name = page_name
        .or_else(|| {
            page_path
                .file_stem()
                .and_then(|s| s.to_str())
                .map(str::to_owned)
        })
        .unwrap_or_default();

    let fetcher: Box<dyn Fetcher> = match origin {
        Some(origin) => Box::new(HttpFetcher::new(origin)?),
        None => Box::new(DirFetcher::new(cfg.static_dir(site_root))),
    };
    let renderer = cfg.site.renderer.build();
    let map = cfg.content_map_for(&name);

    let mut page = Page::new(source);
    let outcomes = load_all(&mut page, &map, fetcher.as_ref(), renderer.as_ref());
    tracing::info!(
        page = %name,
        entries = outcomes.len(),
        loaded = outcomes.iter().filter(|o| o.is_loaded()).count(),
        "page filled"
    );

    let mut stdout = io::stdout().lock();
    stdout.write_all(page.as_str().as_bytes())?;
    stdout.flush()?;

    if let Some(format) = report {
        write_report(&mut io::stderr().lock(), format, &outcomes)?;
    }
    Ok(())
}

fn write_report(
    out: &mut impl Write,
    format: ReportFormat,
    outcomes: &[EntryOutcome],
) -> anyhow::Result<()> {
    match format {
        ReportFormat::Json => {
            let reports: Vec<_> = outcomes.iter().map(EntryOutcome::report).collect();
            serde_json::to_writer_pretty(&mut *out, &reports)?;
            writeln!(out)?;
        }
        ReportFormat::Text => {
            for outcome in outcomes {
                let r = outcome.report();
                match r.error {
                    None => writeln!(out, "ok      {} <- {}", r.target, r.address)?,
                    Some(err) => writeln!(out, "skipped {} <- {}: {}", r.target, r.address, err)?,
                }
            }
        }
    }
    Ok(())
}
