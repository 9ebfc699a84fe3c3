use bili_dl::client::BiliClient;
use bili_dl::fetcher::ProgressCallback;
use bili_dl::muxer::Muxer;
use bili_dl::selection::{Fixed, Highest, QualitySelector};
use bili_dl::{Ledger, QualityCatalog};
use bilifav::progress::ProgressBoard;
use bilifav::{Config, Credentials, DownloadOptions, Downloader, Folder};
use clap::Parser;
use indicatif::MultiProgress;
use indicatif_log_bridge::LogWrapper;
use log::{LevelFilter, error, info, warn};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Clone, Debug)]
#[command(author, version, about = "Download the videos saved in your Bilibili favorites")]
pub struct Cli {
    /// Path to the config file, defaults to <config dir>/bilifav/config.toml
    #[arg(long = "config", short = 'c')]
    pub config: Option<PathBuf>,

    /// Cookie header of a logged-in session, overrides the config file
    #[arg(long = "cookies")]
    pub cookies: Option<String>,

    #[arg(long = "output-dir", short)]
    pub output_dir: Option<PathBuf>,

    #[arg(long = "ffmpeg")]
    pub ffmpeg: Option<PathBuf>,

    #[arg(long = "concurrent-downloads", short = 'j')]
    pub concurrent_downloads: Option<usize>,

    #[arg(long = "max-retries")]
    pub max_retries: Option<usize>,

    /// Download every page in its highest quality without asking
    #[arg(long = "highest", short = 'H', action = clap::ArgAction::SetTrue, conflicts_with = "quality")]
    pub highest: bool,

    /// Download every page in this quality rank, skipping pages without it
    #[arg(long = "quality", short = 'q')]
    pub quality: Option<u32>,

    /// Download from every folder without asking
    #[arg(long = "all-folders", action = clap::ArgAction::SetTrue, conflicts_with = "folder")]
    pub all_folders: bool,

    /// Download from this folder id, can be repeated
    #[arg(long = "folder")]
    pub folder: Vec<i64>,

    /// Also download the HDR version of videos that offer one
    #[arg(long = "hdr", action = clap::ArgAction::SetTrue)]
    pub hdr: bool,

    #[arg(
        long = "verbosity",
        short,
        default_value = "info",
        value_parser = clap::builder::PossibleValuesParser::new([
            "info", "debug", "error", "none", "full"
        ])
    )]
    pub verbosity: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Cli::parse();
    let multi = init_logging(&args.verbosity)?;

    let mut config = Config::load(args.config.as_deref())?;
    apply_overrides(&mut config, &args);
    config.validate()?;
    let credentials = Credentials::parse(&config.cookies)?;
    config.prepare()?;

    let (ledger, ledger_error) = Ledger::open(&config.history_file);
    if let Some(e) = ledger_error {
        warn!("{}, starting with an empty download history", e);
    }
    info!("Loaded {} download records", ledger.len());

    let muxer = Muxer::new(&config.ffmpeg_path);
    if let Err(e) = muxer.probe().await {
        return Err(format!(
            "ffmpeg could not be run from {:?}: {}",
            config.ffmpeg_path, e
        )
        .into());
    }

    let client = BiliClient::new(credentials.header(), config.download_timeout())?
        .with_request_timeout(config.timeout());

    let board = Arc::new(ProgressBoard::new(multi));
    let progress: ProgressCallback = Arc::new(board.callback());
    let downloader = Downloader::new(
        client,
        DownloadOptions::from_config(&config, args.hdr),
        Arc::new(ledger),
        Some(progress),
    );

    let folder_ids = if args.folder.is_empty() {
        let folders = downloader.favorites().folders(credentials.user_id()).await;
        if folders.is_empty() {
            error!("No favorite folders found. Check that the cookies are valid and the network is reachable.");
            return Ok(());
        }

        if args.all_folders {
            folders.iter().map(|folder| folder.id).collect()
        } else {
            select_folders(&folders)?
        }
    } else {
        args.folder.clone()
    };

    if folder_ids.is_empty() {
        info!("Download cancelled");
        return Ok(());
    }

    let selector: Box<dyn QualitySelector> = match args.quality {
        Some(rank) => Box::new(Fixed(rank)),
        None if args.highest || ask_highest()? => Box::new(Highest),
        None => Box::new(PromptSelector),
    };

    let summary = downloader
        .download_folders(&folder_ids, selector.as_ref())
        .await;
    info!("Done: {}", summary);

    Ok(())
}

fn init_logging(
    verbosity: &str,
) -> Result<MultiProgress, Box<dyn std::error::Error + Send + Sync>> {
    let mut builder = env_logger::Builder::new();
    builder.format_timestamp_secs();

    match verbosity {
        "none" => builder.filter_level(LevelFilter::Off),
        "error" => builder.filter_level(LevelFilter::Error),
        "debug" => builder
            .filter_level(LevelFilter::Info)
            .filter_module("bilifav", LevelFilter::Debug)
            .filter_module("bili_dl", LevelFilter::Debug),
        "full" => builder.filter_level(LevelFilter::Trace),
        _ => builder.filter_level(LevelFilter::Info),
    };

    let logger = builder.build();
    let level = logger.filter();
    let multi = MultiProgress::new();

    LogWrapper::new(multi.clone(), logger).try_init()?;
    log::set_max_level(level);

    Ok(multi)
}

fn apply_overrides(config: &mut Config, args: &Cli) {
    if let Some(cookies) = &args.cookies {
        config.cookies = cookies.clone();
    }
    if let Some(output_dir) = &args.output_dir {
        config.save_path = output_dir.clone();
    }
    if let Some(ffmpeg) = &args.ffmpeg {
        config.ffmpeg_path = ffmpeg.clone();
    }
    if let Some(concurrent_downloads) = args.concurrent_downloads {
        config.concurrent_downloads = concurrent_downloads;
    }
    if let Some(max_retries) = args.max_retries {
        config.max_retries = max_retries;
    }
}

fn prompt(message: &str) -> std::io::Result<String> {
    print!("{}", message);
    std::io::stdout().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}

fn ask_highest() -> std::io::Result<bool> {
    let answer = prompt("Download every video in its highest quality? (Y/n): ")?;
    Ok(matches!(answer.to_lowercase().as_str(), "" | "y" | "yes"))
}

fn select_folders(
    folders: &[Folder],
) -> Result<Vec<i64>, Box<dyn std::error::Error + Send + Sync>> {
    println!("\nFavorite folders:");
    for (index, folder) in folders.iter().enumerate() {
        println!("  {}. {}", index + 1, folder);
    }

    loop {
        let input = prompt("\nFolders to download (comma separated, q to quit): ")?;
        match parse_folder_selection(&input, folders.len()) {
            Ok(None) => return Ok(Vec::new()),
            Ok(Some(indices)) => {
                return Ok(indices.into_iter().map(|index| folders[index].id).collect());
            }
            Err(message) => println!("{}", message),
        }
    }
}

/// Parses `1,3` into zero-based indices; `q` quits.
fn parse_folder_selection(input: &str, count: usize) -> Result<Option<Vec<usize>>, String> {
    if input.eq_ignore_ascii_case("q") {
        return Ok(None);
    }

    let mut indices = Vec::new();
    for part in input.split(',') {
        let number: usize = part
            .trim()
            .parse()
            .map_err(|_| "Invalid input, example: 1,3".to_string())?;
        if number == 0 || number > count {
            return Err(format!("Enter numbers between 1 and {}", count));
        }
        if !indices.contains(&(number - 1)) {
            indices.push(number - 1);
        }
    }

    Ok(Some(indices))
}

/// Asks for a tier on every page; Enter takes the best one.
struct PromptSelector;

impl QualitySelector for PromptSelector {
    fn select(&self, catalog: &QualityCatalog) -> Option<u32> {
        let tiers = catalog.tiers();
        let default = tiers.first()?.rank;

        println!("\nAvailable qualities:");
        for (index, tier) in tiers.iter().enumerate() {
            println!("  {}. {}", index + 1, tier);
        }

        loop {
            let input = match prompt(&format!("Quality (default {}): ", default)) {
                Ok(input) => input,
                Err(e) => {
                    warn!("Failed to read input, using {}: {}", default, e);
                    return Some(default);
                }
            };

            match parse_quality_choice(&input, tiers.len()) {
                Ok(None) => return Some(default),
                Ok(Some(index)) => return Some(tiers[index].rank),
                Err(message) => println!("{}", message),
            }
        }
    }
}

/// Parses a one-based tier number; empty input means the default.
fn parse_quality_choice(input: &str, count: usize) -> Result<Option<usize>, String> {
    if input.is_empty() {
        return Ok(None);
    }

    match input.parse::<usize>() {
        Ok(number) if (1..=count).contains(&number) => Ok(Some(number - 1)),
        Ok(_) => Err(format!("Enter a number between 1 and {}", count)),
        Err(_) => Err("Invalid input, enter a number".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folder_selection() {
        assert_eq!(parse_folder_selection("1, 3,1", 3), Ok(Some(vec![0, 2])));
        assert_eq!(parse_folder_selection("Q", 3), Ok(None));
        assert!(parse_folder_selection("4", 3).is_err());
        assert!(parse_folder_selection("0", 3).is_err());
        assert!(parse_folder_selection("one", 3).is_err());
    }

    #[test]
    fn quality_choice() {
        assert_eq!(parse_quality_choice("", 3), Ok(None));
        assert_eq!(parse_quality_choice("2", 3), Ok(Some(1)));
        assert!(parse_quality_choice("4", 3).is_err());
        assert!(parse_quality_choice("x", 3).is_err());
    }

    #[test]
    fn flags_override_config() {
        let args = Cli::parse_from([
            "bilifav",
            "--cookies",
            "DedeUserID=7",
            "-o",
            "/tmp/out",
            "-j",
            "4",
            "--folder",
            "11",
            "--folder",
            "12",
        ]);
        let mut config = Config::default();
        apply_overrides(&mut config, &args);

        assert_eq!(config.cookies, "DedeUserID=7");
        assert_eq!(config.save_path, PathBuf::from("/tmp/out"));
        assert_eq!(config.concurrent_downloads, 4);
        assert_eq!(config.max_retries, 3);
        assert_eq!(args.folder, vec![11, 12]);
    }
}
