//! didimo CLI
//!
//! Entry point for the `didimo` command-line tool.

use clap::{Parser, Subcommand};
use didimo_cli::client::{silent_exit_code, status_many};
use didimo_cli::config::DEFAULT_API_HOST;
use didimo_cli::{
    BatchInputResolver, BatchOrchestrator, BatchReport, BatchRequest, Config, DeformationOutcome,
    DeformationRequest, DeformationRunner, DownloadClient, Error, ErrorCode, ErrorReport, Event,
    HttpClient, InputType, JobId, OutputDisplay, ProfileStore, Result, StatusError, StatusLookup,
    expand_stdin_ids, run_until_interrupted,
};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

/// Exit code after Ctrl+C / SIGTERM
const EXIT_INTERRUPTED: i32 = 130;

#[derive(Parser)]
#[command(name = "didimo")]
#[command(about = "Command line interface for the didimo API", version)]
struct Cli {
    /// Profile to use instead of the default one
    #[arg(long, short = 'c', global = true)]
    config: Option<String>,

    /// Profile directory (default: ~/.didimo)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a profile and make it the default
    Init {
        /// Profile name
        name: String,

        /// API host, with protocol
        #[arg(long, default_value = DEFAULT_API_HOST)]
        host: String,

        /// API access key
        #[arg(long)]
        api_key: String,

        /// API secret key
        #[arg(long)]
        api_secret: String,

        /// Replace an existing profile with the same name
        #[arg(long)]
        force: bool,
    },

    /// List profiles, or make NAME the default
    Config {
        /// Profile to make the default
        name: Option<String>,
    },

    /// Create didimos from a photo, a directory of photos, or a zip of photos
    New {
        /// Input type (photo, rgbd, lofimesh_texture, hifimesh_texture_photo)
        input_type: InputType,

        /// Input file, directory, or zip archive
        input: PathBuf,

        /// Optional feature; may be repeated
        #[arg(long, short = 'f')]
        feature: Vec<String>,

        /// Depth map for the rgbd input type
        #[arg(long, short = 'd')]
        depth: Option<PathBuf>,

        /// Do not download the packages
        #[arg(long, short = 'n')]
        no_download: bool,

        /// Do not wait for processing to finish
        #[arg(long, short = 'w')]
        no_wait: bool,

        /// Output directory for downloaded packages
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,

        /// Package type to request and download; may be repeated
        #[arg(long, short = 'p')]
        package_type: Vec<String>,

        /// Give up on a job after this many seconds
        #[arg(long)]
        job_timeout: Option<u64>,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// List the didimos in the account
    List {
        /// Number of pages to fetch (10 didimos each)
        #[arg(long, short = 'n', default_value_t = 1)]
        number: usize,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Show tier, points and available features
    Account {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Run an on-demand feature on a didimo
    Execute {
        #[command(subcommand)]
        feature: ExecuteCommand,
    },

    /// Show the status of one or more didimos
    Status {
        /// Didimo keys; `-` reads them from stdin, one per line
        #[arg(required = true)]
        ids: Vec<String>,

        /// Print nothing; exit 0 when all done, 1 on error, 2 while pending
        #[arg(long, short = 's')]
        silent: bool,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Download the packages of a didimo
    Download {
        /// Didimo key; `-` reads it from stdin
        id: String,

        /// Output directory
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,

        /// Package type to download; may be repeated
        #[arg(long, short = 'p')]
        package_type: Vec<String>,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Apply a deformation template to a didimo and download the result
    Deform {
        /// Didimo key
        didimo_id: String,

        /// Deformation template file
        template: PathBuf,

        /// Give up waiting after this many seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Suffix appended to the asset key in the output file name
        #[arg(long, default_value = "_deformed")]
        suffix: String,

        /// Output directory
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Print the CLI version
    Version,
}

#[derive(Subcommand)]
enum ExecuteCommand {
    /// Produce high fidelity blendshapes on a didimo
    Blendshapes {
        /// Didimo key; `-` reads it from stdin
        id: String,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Deform a model to match a didimo shape
    Vertexdeform {
        /// Didimo key; `-` reads it from stdin
        id: String,

        /// Vertex file to deform
        vertex: PathBuf,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
}

impl Commands {
    fn display_override(&self) -> Option<OutputDisplay> {
        let json = match self {
            Commands::New { json, .. }
            | Commands::List { json, .. }
            | Commands::Account { json }
            | Commands::Status { json, .. }
            | Commands::Download { json, .. }
            | Commands::Deform { json, .. }
            | Commands::Execute {
                feature: ExecuteCommand::Blendshapes { json, .. } | ExecuteCommand::Vertexdeform { json, .. },
            } => *json,
            _ => false,
        };
        json.then_some(OutputDisplay::Json)
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let json = cli.command.display_override().is_some_and(OutputDisplay::is_json);

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            print_error(&e, json);
            e.exit_code()
        }
    };
    process::exit(code);
}

fn print_error(error: &Error, json: bool) {
    if json {
        match serde_json::to_string_pretty(&ErrorReport::from(error)) {
            Ok(body) => println!("{}", body),
            Err(_) => eprintln!("Error: {}", error),
        }
    } else {
        eprintln!("Error: {}", error);
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Resolve a single id argument, reading the first stdin line for `-`
fn single_id(id: String) -> Result<JobId> {
    expand_stdin_ids(vec![id], std::io::stdin().lock())?
        .into_iter()
        .next()
        .map(JobId::from)
        .ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "no didimo key on stdin",
            ))
        })
}

async fn run(cli: Cli) -> Result<i32> {
    let store = match cli.config_dir {
        Some(dir) => ProfileStore::new(dir),
        None => ProfileStore::open_default()?,
    };
    let display_override = cli.command.display_override();

    let load = |store: &ProfileStore| -> Result<Config> {
        let mut config = match cli.config.as_deref() {
            Some(name) => store.load(name)?,
            None => store.load_default()?,
        };
        config.output_display = config.output_display.resolve(display_override);
        Ok(config)
    };

    match cli.command {
        Commands::Init {
            name,
            host,
            api_key,
            api_secret,
            force,
        } => {
            let path = store.init(&name, &host, &api_key, &api_secret, force)?;
            println!("Profile \"{}\" saved to {} and set as default", name, path.display());
            Ok(0)
        }

        Commands::Config { name: Some(name) } => {
            store.set_default(&name)?;
            println!("Default profile is now \"{}\"", name);
            Ok(0)
        }

        Commands::Config { name: None } => {
            for entry in store.list()? {
                let marker = if entry.is_default { "*" } else { " " };
                println!("{} {}", marker, entry.name);
            }
            Ok(0)
        }

        Commands::New {
            input_type,
            input,
            feature,
            depth,
            no_download,
            no_wait,
            output,
            package_type,
            job_timeout,
            ..
        } => {
            let mut config = load(&store)?;
            if let Some(output) = output {
                config.download.output_dir = output;
            }
            if let Some(secs) = job_timeout {
                config.polling.job_timeout = Some(Duration::from_secs(secs));
            }

            let resolver = BatchInputResolver::new(&config.download.scratch_dir);
            let resolved = resolver.resolve(&input, input_type)?;
            if resolved.is_batch() && !config.output_display.is_json() {
                eprintln!("Batch processing - files count: {}", resolved.files().len());
            }

            let mut request = BatchRequest::new(resolved, input_type);
            request.features = feature;
            request.depth = depth;
            request.package_types = package_type;
            request.no_wait = no_wait;
            request.no_download = no_download;

            let config = Arc::new(config);
            let api = Arc::new(HttpClient::new(config.clone())?);
            let orchestrator = BatchOrchestrator::new(api, config.clone());
            let printer = (!config.output_display.is_json())
                .then(|| spawn_progress_printer(orchestrator.subscribe()));

            let report = run_until_interrupted(orchestrator.run(request)).await;
            drop(orchestrator);
            if let Some(printer) = printer {
                printer.await.ok();
            }

            let Some(report) = report else {
                eprintln!("Interrupted");
                return Ok(EXIT_INTERRUPTED);
            };
            print_batch_report(&report, config.output_display)?;
            Ok(report.exit_code())
        }

        Commands::List { number, .. } => {
            let config = Arc::new(load(&store)?);
            let list = HttpClient::new(config.clone())?.list_didimos(number).await?;

            if config.output_display.is_json() {
                print_json(&list)?;
                return Ok(0);
            }
            println!(
                "{:<18} │ {:<10} │ {:<7} │ {:<10} │ {}",
                "didimo ID", "Type", "Percent", "Status", "Created At"
            );
            println!("{}", "─".repeat(72));
            for didimo in &list.didimos {
                println!(
                    "{:<18} │ {:<10} │ {:<7} │ {:<10} │ {}",
                    didimo.key.as_str(),
                    didimo.input_type.as_deref().unwrap_or("-"),
                    didimo.percent.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string()),
                    format!("{:?}", didimo.status),
                    didimo.created_at.as_deref().unwrap_or("-"),
                );
            }
            Ok(0)
        }

        Commands::Account { .. } => {
            let config = Arc::new(load(&store)?);
            let account = HttpClient::new(config.clone())?.account().await?;

            if config.output_display.is_json() {
                print_json(&account)?;
                return Ok(0);
            }
            let profile = &account.profile;
            println!("Tier: {}", profile.tier_label);
            println!("Points: {}", profile.points);
            println!("Available Features: {}", profile.available_features);
            if let Some(total) = account.total_didimos {
                println!("Total didimos in account: {}", total);
            }
            if let (Some(points), Some(date)) = (&profile.next_expiration_points, &profile.next_expiration_date) {
                eprintln!("\n(!) {} points will expire at {}", points, date);
            }
            Ok(0)
        }

        Commands::Execute { feature } => {
            let config = Arc::new(load(&store)?);
            let client = HttpClient::new(config.clone())?;
            let executed = match feature {
                ExecuteCommand::Blendshapes { id, .. } => client.execute_blendshapes(&single_id(id)?).await?,
                ExecuteCommand::Vertexdeform { id, vertex, .. } => {
                    client.execute_vertexdeform(&single_id(id)?, &vertex).await?
                }
            };

            if config.output_display.is_json() {
                print_json(&executed)?;
            } else {
                println!("{}", executed.key);
            }
            Ok(0)
        }

        Commands::Status { ids, silent, .. } => {
            let config = Arc::new(load(&store)?);
            let client = HttpClient::new(config.clone())?;
            let ids: Vec<JobId> = expand_stdin_ids(ids, std::io::stdin().lock())?
                .into_iter()
                .map(JobId::from)
                .collect();
            let lookups = status_many(&client, &ids).await?;

            if silent {
                return Ok(silent_exit_code(&lookups));
            }
            if config.output_display.is_json() {
                print_json(&lookups)?;
                return Ok(0);
            }
            for lookup in &lookups {
                match lookup {
                    StatusLookup::Found(snapshot) if !snapshot.status_message.is_empty() => println!(
                        "{}: {:?} ({})",
                        snapshot.id, snapshot.status, snapshot.status_message
                    ),
                    StatusLookup::Found(snapshot) => {
                        println!("{}: {:?} ({}%)", snapshot.id, snapshot.status, snapshot.percent)
                    }
                    StatusLookup::NotFound { key } => println!("{}: not found", key),
                }
            }
            Ok(0)
        }

        Commands::Download {
            id,
            output,
            package_type,
            ..
        } => {
            let config = Arc::new(load(&store)?);
            let api = Arc::new(HttpClient::new(config.clone())?);
            let output_dir = output.unwrap_or_else(|| config.download.output_dir.clone());
            let id = single_id(id)?;

            let result = match DownloadClient::silent(api)
                .download_by_id(&id, &package_type, &output_dir)
                .await
            {
                Ok(result) => result,
                Err(StatusError::NotFound { .. }) if !config.output_display.is_json() => {
                    eprintln!("No didimo with the requested key was found on this account.");
                    return Ok(0);
                }
                Err(e) => return Err(e.into()),
            };

            if config.output_display.is_json() {
                print_json(&result)?;
            } else {
                for artifact in &result.artifacts {
                    match &artifact.error_message {
                        None => println!("Downloaded to {}", artifact.output_file.display()),
                        Some(message) => eprintln!(
                            "Error downloading to {}: {}",
                            artifact.output_file.display(),
                            message
                        ),
                    }
                }
                if result.artifacts.is_empty() {
                    if let Some(message) = &result.error_message {
                        eprintln!("Error: {}", message);
                    }
                }
            }
            Ok(if result.succeeded() { 0 } else { 1 })
        }

        Commands::Deform {
            didimo_id,
            template,
            timeout,
            suffix,
            output,
            ..
        } => {
            let mut config = load(&store)?;
            if let Some(output) = output {
                config.download.output_dir = output;
            }
            let config = Arc::new(config);
            let api = Arc::new(HttpClient::new(config.clone())?);
            let json = config.output_display.is_json();

            let (event_tx, event_rx) = broadcast::channel(1000);
            let printer = (!json).then(|| spawn_progress_printer(event_rx));
            let runner = DeformationRunner::new(api, config, event_tx);

            let request = DeformationRequest {
                didimo_key: JobId::from(didimo_id),
                template,
                output_suffix: suffix,
                timeout: timeout.map(Duration::from_secs),
            };
            let report = run_until_interrupted(runner.run(&request)).await;
            drop(runner);
            if let Some(printer) = printer {
                printer.await.ok();
            }

            let Some(report) = report else {
                eprintln!("Interrupted");
                return Ok(EXIT_INTERRUPTED);
            };
            let report = report?;

            if json {
                print_json(&report)?;
            } else {
                match &report.outcome {
                    DeformationOutcome::Done => {}
                    DeformationOutcome::Failed { message } => {
                        eprintln!("There was an error creating package file. Download aborted: {}", message)
                    }
                    DeformationOutcome::TimedOut { after_secs } => {
                        eprintln!("Timeout! No result after {}s", after_secs)
                    }
                }
            }
            Ok(report.exit_code())
        }

        Commands::Version => {
            println!("didimo-cli {}", env!("CARGO_PKG_VERSION"));
            Ok(0)
        }
    }
}

fn print_batch_report(report: &BatchReport, display: OutputDisplay) -> Result<()> {
    if display.is_json() {
        return print_json(report);
    }

    for line in report.summary_lines() {
        if line.starts_with("Error") || line.starts_with("All downloads failed") {
            eprintln!("{}", line);
        } else {
            println!("{}", line);
        }
    }
    if report.download_results.is_none() {
        for id in report.job_ids.iter().flatten() {
            println!("didimo key: {}", id);
        }
    }
    Ok(())
}

/// Render progress events on stderr until the sender side goes away
fn spawn_progress_printer(mut events: broadcast::Receiver<Event>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Some(line) = describe(&event) {
                        eprintln!("{}", line);
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    tracing::debug!(missed, "progress printer fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn describe(event: &Event) -> Option<String> {
    match event {
        Event::Uploading { index, total, path } => Some(format!(
            "Uploading {}/{}: {}",
            index + 1,
            total,
            path.display()
        )),
        Event::Uploaded { job_id, .. } => Some(format!("Created didimo {}", job_id)),
        Event::Progress { job_id, percent, .. } => Some(format!("Processing {}: {}%", job_id, percent)),
        Event::JobDone { job_id } => Some(format!("Finished {}", job_id)),
        Event::DownloadComplete { path, .. } => Some(format!("Downloaded to {}", path.display())),
        _ => None,
    }
}
