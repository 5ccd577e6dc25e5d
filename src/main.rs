use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};

use sage_tester::driver::web::resolve_browser_executable;
use sage_tester::runner::{run_suite, RunOptions};
use sage_tester::utils::config::{Credentials, PortalSettings, Settings};
use sage_tester::{cases, report};

#[derive(Parser)]
#[command(name = "sage-tester")]
#[command(version)]
#[command(about = "AI-assisted web testing CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the test suite
    Run {
        /// Path to settings file (defaults to ./config.yaml when present)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output directory for reports and failure screenshots
        #[arg(short, long, default_value = "./output")]
        output: PathBuf,

        /// Run only the named case
        #[arg(long)]
        case: Option<String>,

        /// Force headless mode on or off, overriding settings
        #[arg(long)]
        headless: Option<bool>,

        /// Continue running remaining cases after a failure
        #[arg(long, default_value = "false")]
        continue_on_failure: bool,

        /// Write JSON and JUnit reports to the output directory
        #[arg(long, default_value = "false")]
        report: bool,
    },

    /// Check credentials, reporting config and browser availability
    Doctor {
        /// Path to settings file (defaults to ./config.yaml when present)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Generate a report from saved suite results
    Report {
        /// Path to suite results JSON
        results: PathBuf,

        /// Output format (json, junit)
        #[arg(short, long, default_value = "junit")]
        format: String,

        /// Output file path (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn resolve_config_path(explicit: Option<PathBuf>) -> Option<PathBuf> {
    explicit.or_else(|| {
        let default = Path::new("config.yaml");
        default.exists().then(|| default.to_path_buf())
    })
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let outcome = match cli.command {
        Commands::Run {
            config,
            output,
            case,
            headless,
            continue_on_failure,
            report,
        } => run(config, output, case, headless, continue_on_failure, report).await,
        Commands::Doctor { config } => doctor(config),
        Commands::Report {
            results,
            format,
            output,
        } => report::generate_report(&results, &format, output.as_deref()),
    };

    if let Err(e) = outcome {
        eprintln!("{} {:#}", "error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(
    config: Option<PathBuf>,
    output: PathBuf,
    case: Option<String>,
    headless: Option<bool>,
    continue_on_failure: bool,
    report: bool,
) -> anyhow::Result<()> {
    let config_path = resolve_config_path(config);
    let mut settings = Settings::load(config_path.as_deref())?;
    if let Some(headless) = headless {
        settings.headless = headless;
    }

    let options = RunOptions {
        output,
        case_filter: case,
        continue_on_failure,
        write_reports: report,
    };

    let summary = run_suite(&settings, &options).await?;
    if !summary.all_passed() {
        std::process::exit(1);
    }
    Ok(())
}

fn doctor(config: Option<PathBuf>) -> anyhow::Result<()> {
    let config_path = resolve_config_path(config);
    let settings = Settings::load(config_path.as_deref())?;

    println!("{}", "sage-tester doctor".bold());
    match &config_path {
        Some(path) => println!("  {} settings file: {}", "✔".green(), path.display()),
        None => println!("  {} no settings file, using defaults", "·".blue()),
    }

    println!(
        "  {} provider: {} (model: {})",
        "·".blue(),
        settings.llm.provider.as_str(),
        settings.llm.model
    );

    let mut healthy = true;
    match Credentials::resolve(settings.llm.provider) {
        Ok(_) => match settings.llm.provider.key_env() {
            Some(var) => println!("  {} {} is set", "✔".green(), var),
            None => println!("  {} no API key required", "✔".green()),
        },
        Err(e) => {
            println!("  {} {}", "✖".red(), e);
            healthy = false;
        }
    }

    match PortalSettings::from_env() {
        Some(portal) => println!(
            "  {} ReportPortal: {} project={}",
            "✔".green(),
            portal.endpoint,
            portal.project
        ),
        None => println!(
            "  {} ReportPortal not configured, reporting disabled",
            "·".blue()
        ),
    }

    match resolve_browser_executable() {
        Some(path) => println!("  {} browser executable: {}", "✔".green(), path.display()),
        None => println!(
            "  {} no system browser found, Playwright's managed browser will be used",
            "·".blue()
        ),
    }

    println!("{}", "  built-in test cases:".bold());
    for case in cases::builtin_cases() {
        println!("    {} {}", case.name.cyan(), case.description);
    }

    if !healthy {
        anyhow::bail!("environment is not ready, fix the items above");
    }
    Ok(())
}
