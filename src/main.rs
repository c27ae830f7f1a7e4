use clap::Parser;

use mailroom::cli::{self, Cli, Commands};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Init { data_dir, roster, invoice_root, soa_root } => {
            cli::init::run(data_dir, roster, invoice_root, soa_root)
        }
        Commands::Scan { sources } => cli::scan::run(&sources),
        Commands::Reconcile { period, aggregate_by, data_dir } => {
            cli::reconcile::run(&period, aggregate_by.as_deref(), data_dir.as_deref())
        }
        Commands::Bundle { period, aggregate_by, output, data_dir } => cli::bundle::run(
            &period,
            aggregate_by.as_deref(),
            output.as_deref(),
            data_dir.as_deref(),
        ),
        Commands::Run { period, aggregate_by, output, sources } => {
            cli::run::run(&period, aggregate_by.as_deref(), output.as_deref(), &sources)
        }
        Commands::Status { data_dir } => cli::status::run(data_dir.as_deref()),
        Commands::Backup { output, data_dir } => cli::backup::run(output, data_dir.as_deref()),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
