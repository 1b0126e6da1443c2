use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use colored::Colorize;
use console::Emoji;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use podfetch::{
    DownloadPipeline, NoopReporter, PipelineOptions, PlaylistFormat, ProgressEvent,
    ProgressReporter, ReqwestClient, RetryPolicy, RunOutcome, RunReport, SharedProgressReporter,
    VerifyOptions, load_feeds_from_opml, load_feeds_from_text_files,
};

// Emoji with fallback for terminals without Unicode support
static MICROPHONE: Emoji<'_, '_> = Emoji("🎙️  ", "");
static SEARCH: Emoji<'_, '_> = Emoji("🔍 ", "[~] ");
static HEADPHONES: Emoji<'_, '_> = Emoji("🎧 ", "[i] ");
static DOWNLOAD: Emoji<'_, '_> = Emoji("📥 ", "[v] ");
static SUCCESS: Emoji<'_, '_> = Emoji("✅ ", "[+] ");
static FAILURE: Emoji<'_, '_> = Emoji("❌ ", "[!] ");
static WARNING: Emoji<'_, '_> = Emoji("⚠️  ", "[?] ");
static PARTY: Emoji<'_, '_> = Emoji("🎉 ", "[*] ");
static FOLDER: Emoji<'_, '_> = Emoji("📁 ", "");
static CROSS: Emoji<'_, '_> = Emoji("✗ ", "x ");

/// Download podcast episodes from RSS and Atom feeds
#[derive(Parser, Debug)]
#[command(name = "podfetch")]
#[command(about = "Download podcast episodes from RSS and Atom feeds")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download new episodes of every feed
    Download {
        #[command(flatten)]
        common: CommonArgs,

        /// Write a playlist per podcast (m3u, audacious, text); repeatable
        #[arg(short = 'w', long = "write-playlist")]
        write_playlist: Vec<PlaylistFormat>,

        /// Do not write tags into downloaded files
        #[arg(long)]
        skip_tagging: bool,
    },

    /// Check downloaded files against the size reported by the server
    Verify {
        #[command(flatten)]
        common: CommonArgs,

        /// File listing corrupted episodes [default: <DESTINATION>/corrupted_episodes.txt]
        #[arg(long)]
        report: Option<PathBuf>,

        /// Allowed size difference as a fraction of the remote size
        #[arg(long, default_value_t = VerifyOptions::DEFAULT_TOLERANCE)]
        tolerance: f64,
    },

    /// Rewrite tags of episodes that are already downloaded
    Tag {
        #[command(flatten)]
        common: CommonArgs,
    },
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Directory episodes are stored in
    destination: PathBuf,

    /// Feed URL; repeatable
    #[arg(short = 'f', long = "feed")]
    feeds: Vec<String>,

    /// Text file with one feed URL per line; repeatable
    #[arg(short = 'F', long = "file")]
    files: Vec<PathBuf>,

    /// OPML file to load feeds from; repeatable
    #[arg(short = 'o', long = "opml")]
    opml: Vec<PathBuf>,

    /// Number of entries per feed to consider, negative for all
    #[arg(short, long, default_value_t = -1, allow_negative_numbers = true)]
    limit: i64,

    /// Number of concurrent workers for resolving feeds and episodes
    #[arg(short, long, default_value_t = 10)]
    threads: usize,

    /// Number of concurrent downloads [default: --threads]
    #[arg(long)]
    download_threads: Option<usize>,

    /// Maximum number of episodes to download across all feeds
    #[arg(short, long)]
    max_downloads: Option<usize>,

    /// Attempts per request before giving up
    #[arg(long, default_value_t = RetryPolicy::DEFAULT_MAX_ATTEMPTS)]
    max_attempts: u32,

    /// Base delay in seconds between attempts, multiplied by the attempt number
    #[arg(long, default_value_t = RetryPolicy::DEFAULT_BASE_DELAY.as_secs())]
    retry_delay: u64,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - suppress progress output
    #[arg(short, long)]
    quiet: bool,
}

impl CommonArgs {
    fn log_level(&self) -> &'static str {
        match self.verbose {
            0 if self.quiet => "error",
            0 => "warn",
            1 => "info",
            _ => "debug",
        }
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_secs(self.retry_delay),
        }
    }

    fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            limit: usize::try_from(self.limit).ok(),
            threads: self.threads,
            download_threads: self.download_threads,
            max_downloads: self.max_downloads,
            ..Default::default()
        }
    }

    /// Collect feed URLs from `-f`, `-F` and `-o`
    fn sources(&self) -> Result<Vec<String>> {
        let mut sources: Vec<String> = self
            .feeds
            .iter()
            .map(|feed| feed.trim().to_string())
            .filter(|feed| !feed.is_empty())
            .collect();
        sources.extend(
            load_feeds_from_text_files(self.files.as_slice()).context("Failed to load feed list")?,
        );
        sources.extend(
            load_feeds_from_opml(self.opml.as_slice()).context("Failed to load OPML file")?,
        );
        Ok(sources)
    }
}

fn init_logging(common: &CommonArgs) {
    // RUST_LOG wins over -v/-q
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(common.log_level()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Progress reporter using indicatif for terminal output
struct IndicatifReporter {
    multi: MultiProgress,
    bars: Mutex<HashMap<usize, ProgressBar>>,
    main_bar: ProgressBar,
}

impl IndicatifReporter {
    fn new() -> Self {
        let multi = MultiProgress::new();

        let main_style = ProgressStyle::default_bar()
            .template("{spinner:.green} {wide_msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());

        let main_bar = multi.add(ProgressBar::new_spinner());
        main_bar.set_style(main_style);
        main_bar.enable_steady_tick(Duration::from_millis(100));

        Self {
            multi,
            bars: Mutex::new(HashMap::new()),
            main_bar,
        }
    }

    fn get_or_create_bar(&self, download_id: usize) -> ProgressBar {
        let mut bars = self.bars.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(bar) = bars.get(&download_id) {
            return bar.clone();
        }

        let style = ProgressStyle::default_bar()
            .template(&format!(
                "  {DOWNLOAD}[{{bar:30.cyan/blue}}] {{bytes}}/{{total_bytes}} {{wide_msg}}"
            ))
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓░");

        let bar = self.multi.add(ProgressBar::new(0));
        bar.set_style(style);
        bars.insert(download_id, bar.clone());
        bar
    }

    fn finish_bar(&self, download_id: usize) {
        let mut bars = self.bars.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(bar) = bars.remove(&download_id) {
            bar.finish_and_clear();
        }
    }

    fn println(&self, line: String) {
        let _ = self.multi.println(line);
    }
}

impl ProgressReporter for IndicatifReporter {
    fn report(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::FetchingFeeds { count } => {
                self.main_bar.set_message(format!(
                    "{SEARCH}Fetching {} feeds",
                    count.to_string().cyan()
                ));
            }

            ProgressEvent::FeedResolved {
                podcast_title,
                total_episodes,
            } => {
                self.main_bar.set_message(format!(
                    "{HEADPHONES}{} • {} episodes",
                    podcast_title.bold().green(),
                    total_episodes.to_string().cyan()
                ));
            }

            ProgressEvent::FeedFailed { source, error } => {
                self.println(format!("{FAILURE}{} - {}", source.red(), error.dimmed()));
            }

            ProgressEvent::PartialFilesCleanedUp { count } => {
                self.println(format!(
                    "{WARNING}Removed {} partial files of interrupted downloads",
                    count.to_string().yellow()
                ));
            }

            ProgressEvent::EpisodesResolved {
                total_episodes,
                existing,
                to_download,
            } => {
                self.main_bar.set_message(format!(
                    "{HEADPHONES}{} episodes total, {} present, {} to download",
                    total_episodes.to_string().cyan(),
                    existing.to_string().green(),
                    to_download.to_string().yellow()
                ));
            }

            ProgressEvent::DownloadStarting {
                download_id,
                episode_title,
                episode_index,
                total_to_download,
                content_length,
            } => {
                let bar = self.get_or_create_bar(download_id);
                bar.set_length(content_length.unwrap_or(0));
                bar.set_position(0);
                bar.set_message(format!(
                    "[{}/{}] {}",
                    (episode_index + 1).to_string().cyan(),
                    total_to_download.to_string().cyan(),
                    truncate_title(&episode_title, 40)
                ));
            }

            ProgressEvent::DownloadProgress {
                download_id,
                bytes_downloaded,
                total_bytes,
                ..
            } => {
                let bar = self.get_or_create_bar(download_id);
                if let Some(total) = total_bytes {
                    bar.set_length(total);
                }
                bar.set_position(bytes_downloaded);
            }

            ProgressEvent::DownloadCompleted {
                download_id,
                episode_title,
                ..
            } => {
                self.finish_bar(download_id);
                self.println(format!(
                    "{SUCCESS}{}",
                    truncate_title(&episode_title, 60).green()
                ));
            }

            ProgressEvent::DownloadFailed {
                download_id,
                episode_title,
                error,
            } => {
                self.finish_bar(download_id);
                self.println(format!(
                    "{FAILURE}{} - {}",
                    truncate_title(&episode_title, 30).red(),
                    error.red()
                ));
            }

            ProgressEvent::VerifyCompleted { checked, corrupted } => {
                self.main_bar.finish_and_clear();
                println!(
                    "\n{PARTY}{} {} checked, {} corrupted",
                    "Verification complete:".bold().green(),
                    checked.to_string().green().bold(),
                    if corrupted > 0 {
                        corrupted.to_string().red().bold()
                    } else {
                        corrupted.to_string().green()
                    }
                );
            }

            ProgressEvent::TaggingCompleted { tagged, failed } => {
                self.main_bar.finish_and_clear();
                println!(
                    "\n{PARTY}{} {} tagged, {} failed",
                    "Tagging complete:".bold().green(),
                    tagged.to_string().green().bold(),
                    if failed > 0 {
                        failed.to_string().red().bold()
                    } else {
                        failed.to_string().green()
                    }
                );
            }

            ProgressEvent::RunCompleted {
                downloaded_count,
                existing_count,
                failed_count,
            } => {
                self.main_bar.finish_and_clear();
                println!(
                    "\n{PARTY}{} {} downloaded, {} already present, {} failed",
                    "Download complete:".bold().green(),
                    downloaded_count.to_string().green().bold(),
                    existing_count.to_string().yellow(),
                    if failed_count > 0 {
                        failed_count.to_string().red().bold()
                    } else {
                        failed_count.to_string().green()
                    }
                );
            }
        }
    }
}

fn truncate_title(title: &str, max_len: usize) -> String {
    if title.chars().count() <= max_len {
        title.to_string()
    } else {
        let head: String = title.chars().take(max_len.saturating_sub(3)).collect();
        format!("{head}...")
    }
}

fn print_failures(report: &RunReport) {
    if report.failures.is_empty() {
        return;
    }
    println!("\n{}", "Failures:".red().bold());
    for (what, why) in &report.failures {
        println!("  {}{} - {}", CROSS, what.yellow(), why.dimmed());
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let common = match &cli.command {
        Command::Download { common, .. }
        | Command::Verify { common, .. }
        | Command::Tag { common } => common,
    };

    init_logging(common);

    if !common.quiet {
        println!(
            "\n{}{} {}\n",
            MICROPHONE,
            "podfetch".bold().magenta(),
            "- Podcast Downloader".dimmed()
        );
    }

    let sources = common.sources()?;

    let reporter: SharedProgressReporter = if common.quiet {
        NoopReporter::shared()
    } else {
        Arc::new(IndicatifReporter::new())
    };

    let pipeline = DownloadPipeline::new(
        ReqwestClient::new(),
        common.retry_policy(),
        &common.destination,
    )
    .with_reporter(reporter);

    let mut options = common.pipeline_options();

    let outcome = match &cli.command {
        Command::Download {
            write_playlist,
            skip_tagging,
            ..
        } => {
            options.playlists = write_playlist.clone();
            options.write_tags = !skip_tagging;
            pipeline
                .run_download(sources, &options)
                .await
                .context("Failed to download episodes")?
        }
        Command::Verify {
            report, tolerance, ..
        } => {
            let verify = VerifyOptions {
                tolerance: *tolerance,
                report_path: report.clone(),
            };
            pipeline
                .run_verify(sources, &options, &verify)
                .await
                .context("Failed to verify episodes")?
        }
        Command::Tag { .. } => pipeline
            .run_tag(sources, &options)
            .await
            .context("Failed to tag episodes")?,
    };

    let report = match outcome {
        RunOutcome::NoFeeds => {
            if !common.quiet {
                println!("{}", "No feeds have been provided".yellow());
            }
            return Ok(());
        }
        RunOutcome::Completed(report) => report,
    };

    if !common.quiet {
        print_failures(&report);
        println!(
            "\n{FOLDER}Output: {}\n",
            common.destination.display().to_string().cyan()
        );
    }

    if report.failed > 0 && report.downloaded == 0 {
        std::process::exit(1);
    }

    Ok(())
}
