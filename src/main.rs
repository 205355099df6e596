use std::env;

use clap::Parser;
use pensionsim::api::{Cli, run_cli, run_http_server};
use pensionsim::core::SalaryTable;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let raw_args: Vec<String> = env::args().collect();
    match raw_args.get(1).map(|s| s.as_str()) {
        Some("serve") => {
            let port = raw_args
                .get(2)
                .and_then(|s| s.parse::<u16>().ok())
                .unwrap_or(8080);
            let salary = match raw_args.get(3) {
                Some(path) => match SalaryTable::from_path(path) {
                    Ok(table) => table,
                    Err(e) => {
                        eprintln!("{e}");
                        std::process::exit(1);
                    }
                },
                None => SalaryTable::default(),
            };
            if let Err(e) = run_http_server(port, salary).await {
                eprintln!("Server error: {e}");
                std::process::exit(1);
            }
        }
        Some("project") => {
            let args = raw_args
                .iter()
                .take(1)
                .chain(raw_args.iter().skip(2))
                .cloned();
            let cli = Cli::parse_from(args);
            match run_cli(&cli) {
                Ok(json) => println!("{json}"),
                Err(e) => {
                    eprintln!("Error: {e}");
                    std::process::exit(1);
                }
            }
        }
        _ => {
            eprintln!("Usage: pensionsim serve [port] [salary-data.json]");
            eprintln!("       pensionsim project --current-age <AGE> --retirement-age <AGE> --annual-income <EUR> [options]");
            std::process::exit(1);
        }
    }
}
