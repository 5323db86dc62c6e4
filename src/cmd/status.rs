use crate::app::socket::{self, SocketRequest, SocketResponse};
use crate::out;
use crate::Cli;
use anyhow::Result;
use clap::Args;
use serde_json::Value;

#[derive(Args, Debug, Clone)]
pub struct StopArgs {
    /// Drop queued work instead of finishing it
    #[arg(long)]
    pub abort: bool,
}

async fn request(cli: &Cli, req: &SocketRequest) -> Result<SocketResponse> {
    let path = cli.layout().socket_path();
    if !socket::is_socket_available(&path) {
        anyhow::bail!("No archive is running (no socket at {})", path.display());
    }
    let resp = socket::send_request(&path, req).await?;
    if !resp.ok {
        anyhow::bail!(
            "Archive refused the request: {}",
            resp.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(resp)
}

pub async fn status(cli: &Cli) -> Result<()> {
    let resp = request(cli, &SocketRequest::Status).await?;
    let status = resp.status.unwrap_or(Value::Null);
    if cli.output.is_json() {
        return out::write_json(&status);
    }
    if cli.output.is_none() {
        return Ok(());
    }
    print_status(&status);
    Ok(())
}

fn print_status(status: &Value) {
    let state = if status["aborted"].as_bool().unwrap_or(false) {
        "aborting"
    } else if status["shutting_down"].as_bool().unwrap_or(false) {
        "stopping"
    } else {
        "running"
    };
    println!("Archive is {}", state);
    println!(
        "{:<10} {:<10} {:>8} {:>10} {:>8} {:>8}",
        "SUBSYSTEM", "STATE", "QUEUED", "PROCESSED", "RETRIES", "CACHED"
    );
    for sub in status["subsystems"].as_array().into_iter().flatten() {
        println!(
            "{:<10} {:<10} {:>8} {:>10} {:>8} {:>8}",
            sub["name"].as_str().unwrap_or("?"),
            sub["state"].as_str().unwrap_or("?"),
            sub["queued"],
            sub["processed"],
            sub["retries"],
            sub["cache_entries"],
        );
    }
    println!(
        "Refresh cache: {} messages from {} windows; {} invalid sticker sets",
        status["refresh_cache_messages"], status["refresh_windows"], status["invalid_sticker_sets"]
    );
    for run in status["runs"].as_array().into_iter().flatten() {
        println!(
            "chat {}: run {}, {} messages saved",
            run["target_id"],
            run["run_id"].as_str().unwrap_or("?"),
            run["stats"]["messages_saved"],
        );
    }
}

pub async fn stop(cli: &Cli, args: &StopArgs) -> Result<()> {
    let req = if args.abort {
        SocketRequest::Abort
    } else {
        SocketRequest::Stop
    };
    request(cli, &req).await?;
    if cli.output.is_json() {
        out::write_json(&serde_json::json!({ "stopping": true, "abort": args.abort }))?;
    } else if !cli.output.is_none() {
        if args.abort {
            println!("Abort requested.");
        } else {
            println!("Stop requested; queued work will finish first.");
        }
    }
    Ok(())
}
