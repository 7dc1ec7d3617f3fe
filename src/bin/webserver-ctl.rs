use clap::{Parser, Subcommand};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "webserver-ctl")]
#[command(about = "Probe and stop a running webserver", long_about = None)]
struct Cli {
    /// Server URL including the base path.
    #[arg(short, long, default_value = "http://localhost:8080/api/v1")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that the process answers
    Liveness,
    /// Check that every readiness determiner is ready
    Readiness,
    /// Dump published metrics
    Vars,
    /// Stop the server (drains unless --hard)
    Stop {
        /// Kill the process instead of draining it
        #[arg(long)]
        hard: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/');

    let ok = match cli.command {
        Commands::Liveness => {
            let res = client.get(format!("{}/liveness", base)).send().await?;
            print_text(res).await?
        }
        Commands::Readiness => {
            let res = client.get(format!("{}/readiness", base)).send().await?;
            print_text(res).await?
        }
        Commands::Vars => {
            let res = client.get(format!("{}/debug/vars", base)).send().await?;
            print_json(res).await?
        }
        Commands::Stop { hard } => {
            let res = client
                .get(format!("{}/stop", base))
                .query(&[("hard", hard)])
                .send()
                .await;
            match res {
                Ok(res) => print_text(res).await?,
                // A killed server may drop the connection before answering.
                Err(err) if hard && (err.is_connect() || err.is_request()) => {
                    println!("connection closed, server killed");
                    true
                }
                Err(err) => return Err(err.into()),
            }
        }
    };

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}

async fn print_text(res: reqwest::Response) -> Result<bool, Box<dyn std::error::Error>> {
    let status = res.status();
    let text = res.text().await?;
    if status.is_success() {
        println!("{}", text.trim_end());
    } else {
        eprintln!("Error: server returned status {}", status);
        eprintln!("Response: {}", text.trim_end());
    }
    Ok(status.is_success())
}

async fn print_json(res: reqwest::Response) -> Result<bool, Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: server returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(false);
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(true)
}
