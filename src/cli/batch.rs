// CLI batch commands: batch, batches, batch-show

use reqwest::Client;
use serde_json::{json, Value};

use super::{base_url, send_json};

fn batch_url(host: &str, port: u16) -> String {
    format!("{}/api/v1/batch", base_url(host, port))
}

/// Outcome label derived from the summary counts.
fn outcome(summary: &Value) -> &'static str {
    let total = summary["total_jobs"].as_u64().unwrap_or(0);
    let ok = summary["success_count"].as_u64().unwrap_or(0);
    if total > 0 && ok == total {
        "success"
    } else if ok > 0 {
        "partial"
    } else {
        "failed"
    }
}

fn render_result(result: &Value) -> String {
    let summary = &result["summary"];
    let mut lines = vec![
        format!(
            "Batch {} ({}): {}",
            result["batch_id"].as_str().unwrap_or("?"),
            result["action"].as_str().unwrap_or("?"),
            outcome(summary)
        ),
        format!(
            "  {} of {} succeeded in {}ms",
            summary["success_count"].as_u64().unwrap_or(0),
            summary["total_jobs"].as_u64().unwrap_or(0),
            summary["duration_ms"].as_i64().unwrap_or(0)
        ),
    ];
    if let Some(ids) = result["successful"].as_array() {
        for id in ids {
            lines.push(format!("  ok      {}", id.as_str().unwrap_or("?")));
        }
    }
    if let Some(failed) = result["failed"].as_array() {
        for f in failed {
            lines.push(format!(
                "  failed  {}: {}",
                f["job_id"].as_str().unwrap_or("?"),
                f["error"].as_str().unwrap_or("?")
            ));
        }
    }
    lines.join("\n")
}

/// ejs batch
pub async fn cmd_batch(
    host: &str,
    port: u16,
    action: &str,
    job_ids: &[String],
    source_urls: &[String],
    json: bool,
) -> anyhow::Result<()> {
    let request = Client::new().post(batch_url(host, port)).json(&json!({
        "action": action,
        "job_ids": job_ids,
        "source_urls": source_urls,
    }));
    let body = send_json(request, host, port).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&body)?);
    } else {
        println!("{}", render_result(&body));
    }
    Ok(())
}

/// ejs batches
pub async fn cmd_batches(
    host: &str,
    port: u16,
    status: Option<&str>,
    job_ids: &[String],
    json: bool,
) -> anyhow::Result<()> {
    let mut params: Vec<(&str, String)> = Vec::new();
    if let Some(s) = status {
        params.push(("status", s.to_string()));
    }
    if !job_ids.is_empty() {
        params.push(("job_ids", job_ids.join(",")));
    }

    let request = Client::new().get(batch_url(host, port)).query(&params);
    let body = send_json(request, host, port).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    let empty_vec = vec![];
    let batches = body["batches"].as_array().unwrap_or(&empty_vec);
    if batches.is_empty() {
        println!("No batches found.");
        return Ok(());
    }

    println!(
        "{:<44}{:<8}{:<9}{:<8}{:<8}",
        "BATCH", "ACTION", "OUTCOME", "OK", "FAILED"
    );
    for b in batches {
        let summary = &b["summary"];
        println!(
            "{:<44}{:<8}{:<9}{:<8}{:<8}",
            b["batch_id"].as_str().unwrap_or("?"),
            b["action"].as_str().unwrap_or("?"),
            outcome(summary),
            summary["success_count"].as_u64().unwrap_or(0),
            summary["failure_count"].as_u64().unwrap_or(0),
        );
    }
    Ok(())
}

/// ejs batch-show
pub async fn cmd_batch_show(host: &str, port: u16, batch_id: &str, json: bool) -> anyhow::Result<()> {
    let request = Client::new().get(format!("{}/{}", batch_url(host, port), batch_id));
    let body = send_json(request, host, port).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&body)?);
    } else {
        println!("{}", render_result(&body));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_labels() {
        assert_eq!(outcome(&json!({"total_jobs": 3, "success_count": 3})), "success");
        assert_eq!(outcome(&json!({"total_jobs": 3, "success_count": 1})), "partial");
        assert_eq!(outcome(&json!({"total_jobs": 3, "success_count": 0})), "failed");
        assert_eq!(outcome(&json!({"total_jobs": 0, "success_count": 0})), "failed");
    }

    #[test]
    fn test_render_result_lists_items() {
        let result = json!({
            "batch_id": "batch_1",
            "action": "pause",
            "successful": ["a"],
            "failed": [{"job_id": "b", "error": "job is already paused"}],
            "summary": {"total_jobs": 2, "success_count": 1, "failure_count": 1, "duration_ms": 4}
        });
        let text = render_result(&result);
        assert!(text.starts_with("Batch batch_1 (pause): partial"));
        assert!(text.contains("1 of 2 succeeded in 4ms"));
        assert!(text.contains("ok      a"));
        assert!(text.contains("failed  b: job is already paused"));
    }

    #[tokio::test]
    async fn test_cmd_batch_connection_error() {
        let result = cmd_batch("127.0.0.1", 1, "pause", &["a".to_string()], &[], false).await;
        let err = result.unwrap_err().to_string();
        assert!(
            err.contains("Could not connect") || err.contains("Request failed"),
            "Got: {}",
            err
        );
    }
}
