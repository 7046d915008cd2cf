// CLI service commands: serve, status

use std::path::Path;

use reqwest::Client;
use serde_json::Value;

use super::{base_url, handle_request_error};

/// ejs serve
pub async fn cmd_serve(
    host: &str,
    config: Option<&str>,
    port_override: Option<u16>,
    data_dir: Option<&str>,
    verbose: bool,
) -> anyhow::Result<()> {
    let config_path = config.map(Path::new);
    let data_dir_path = data_dir.map(Path::new);

    // Only a non-default global --host overrides the config file.
    let host_override = if host != "127.0.0.1" {
        Some(host)
    } else {
        None
    };

    crate::daemon::start_service(
        config_path,
        data_dir_path,
        host_override,
        port_override,
        verbose,
    )
    .await
}

/// ejs status
pub async fn cmd_status(host: &str, port: u16, verbose: bool) -> anyhow::Result<()> {
    let client = Client::new();
    let url = format!("{}/health", base_url(host, port));

    let response = client
        .get(&url)
        .send()
        .await
        .map_err(|e| handle_request_error(e, host, port))?;

    // A degraded service answers 503 with the same body.
    let body: Value = response
        .json()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to parse response: {}", e))?;

    println!("{}", render_status(&body));

    if verbose {
        println!("\nRaw response:");
        println!("{}", serde_json::to_string_pretty(&body)?);
    }

    if body["status"].as_str() != Some("ok") {
        anyhow::bail!("Service is degraded");
    }
    Ok(())
}

fn render_status(body: &Value) -> String {
    let service_status = body["status"].as_str().unwrap_or("unknown");
    let version = body["version"].as_str().unwrap_or("unknown");
    let uptime = body["uptime_seconds"].as_u64().unwrap_or(0);
    let data_dir = body["data_dir"].as_str().unwrap_or("unknown");
    let job_store = body["stores"]["jobs"].as_str().unwrap_or("unknown");
    let batch_store = body["stores"]["batches"].as_str().unwrap_or("unknown");

    [
        format!("Service Status: {}", service_status),
        format!("  Data Dir:     {}", data_dir),
        format!("  Job store:    {}", job_store),
        format!("  Batch store:  {}", batch_store),
        format!("  Uptime:       {}", format_uptime(uptime)),
        format!("  Version:      {}", version),
    ]
    .join("\n")
}

fn format_uptime(seconds: u64) -> String {
    let days = seconds / 86400;
    let hours = (seconds % 86400) / 3600;
    let mins = (seconds % 3600) / 60;
    let secs = seconds % 60;

    if days > 0 {
        format!("{}d {}h {}m {}s", days, hours, mins, secs)
    } else if hours > 0 {
        format!("{}h {}m {}s", hours, mins, secs)
    } else if mins > 0 {
        format!("{}m {}s", mins, secs)
    } else {
        format!("{}s", secs)
    }
}
