use clap::Parser;
use loan_app::config::AppConfig;
use loan_app::{logging, reset};

#[derive(Parser)]
#[command(name = "clear-database")]
#[command(about = "Drop every loan management table")]
struct Cli {
    /// Skip the confirmation prompt
    #[arg(long)]
    yes: bool,
}

fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let _log_guard = logging::init_logging();
    let cli = Cli::parse();
    let config = AppConfig::load()?;

    if !cli.yes {
        println!("⚠️  WARNING: This will drop ALL tables in {}!", config.database.path);
        println!("Press Enter to continue or Ctrl+C to cancel...");
        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;
    }

    println!("🗑️  Clearing database...");
    reset::clear_database(&config.database.path)?;

    println!("✅ Database cleared successfully!");
    Ok(())
}
