#![forbid(unsafe_code)]

//! `httpqueue-ctl`: operator CLI for `httpqueue`.
//!
//! Talks to the HTTP API to schedule a timer or inspect one.

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "httpqueue-ctl",
    about = "Operator CLI for the httpqueue service",
    version,
    long_about = None
)]
struct Cli {
    /// Base URL of the httpqueue API.
    #[arg(long, env = "HTTPQUEUE_API", default_value = "http://127.0.0.1:8080")]
    api: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Schedule a webhook call.
    Set {
        /// Webhook URL to POST to when the timer fires.
        url: String,
        /// Hours until the timer fires.
        #[arg(long, default_value_t = 0)]
        hours: i64,
        /// Minutes until the timer fires.
        #[arg(long, default_value_t = 0)]
        minutes: i64,
        /// Seconds until the timer fires.
        #[arg(long, default_value_t = 0)]
        seconds: i64,
    },

    /// Show the time left on a timer.
    Get {
        /// Timer ID.
        id: String,
    },
}

fn main() {
    let args = Cli::parse();

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("Failed to start runtime: {err}");
            std::process::exit(1);
        }
    };

    match runtime.block_on(send_command(&args)) {
        Ok((status, body)) if status.is_success() => {
            println!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
        }
        Ok((status, body)) => {
            let details = body
                .pointer("/error/details")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("unknown error");
            eprintln!("Error ({status}): {details}");
            std::process::exit(1);
        }
        Err(err) => {
            eprintln!("Failed to reach server: {err}");
            eprintln!("Is httpqueue running at '{}'?", args.api);
            std::process::exit(1);
        }
    }
}

/// Issue the request for `args.command` and decode the JSON answer.
async fn send_command(
    args: &Cli,
) -> std::result::Result<(reqwest::StatusCode, serde_json::Value), Box<dyn std::error::Error>> {
    let base = args.api.trim_end_matches('/');
    let client = reqwest::Client::new();

    let response = match &args.command {
        Command::Set {
            url,
            hours,
            minutes,
            seconds,
        } => {
            let body = serde_json::json!({
                "hours": hours,
                "minutes": minutes,
                "seconds": seconds,
                "url": url,
            });
            client
                .post(format!("{base}/timers"))
                .json(&body)
                .send()
                .await?
        }
        Command::Get { id } => client.get(format!("{base}/timers/{id}")).send().await?,
    };

    let status = response.status();
    let body: serde_json::Value = response.json().await?;
    Ok((status, body))
}
