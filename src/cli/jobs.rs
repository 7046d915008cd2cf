// CLI job commands: encrypt, show, pause/resume/stop, retry, history, list, summary

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::{json, Value};

use super::{base_url, send_json, SortArg};

fn api_url(host: &str, port: u16, path: &str) -> String {
    format!("{}/api/v1{}", base_url(host, port), path)
}

/// Format a relative time string like "2 minutes ago".
fn format_relative_time(dt: &DateTime<Utc>) -> String {
    let secs = Utc::now().signed_duration_since(*dt).num_seconds().max(0);
    if secs < 60 {
        format!("{} seconds ago", secs)
    } else if secs < 3600 {
        format!("{} minutes ago", secs / 60)
    } else if secs < 86400 {
        format!("{} hours ago", secs / 3600)
    } else {
        format!("{} days ago", secs / 86400)
    }
}

fn relative(ts: &Value) -> String {
    ts.as_str()
        .and_then(|s| s.parse::<DateTime<Utc>>().ok())
        .map(|dt| format_relative_time(&dt))
        .unwrap_or_else(|| "-".to_string())
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() > width {
        let kept: String = text.chars().take(width.saturating_sub(3)).collect();
        format!("{}...", kept)
    } else {
        text.to_string()
    }
}

fn print_json(body: &Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(body)?);
    Ok(())
}

/// ejs encrypt
pub async fn cmd_encrypt(host: &str, port: u16, source_url: &str, json: bool) -> anyhow::Result<()> {
    let request = Client::new()
        .post(api_url(host, port, "/encrypt"))
        .json(&json!({ "source_url": source_url }));
    let body = send_json(request, host, port).await?;

    if json {
        return print_json(&body);
    }
    println!("Job started.");
    println!("  ID:      {}", body["job_id"].as_str().unwrap_or("unknown"));
    println!("  Status:  {}", body["status"].as_str().unwrap_or("unknown"));
    println!("  Source:  {}", source_url);
    Ok(())
}

/// ejs show
pub async fn cmd_show(host: &str, port: u16, job_id: &str, json: bool) -> anyhow::Result<()> {
    let request = Client::new().get(api_url(host, port, &format!("/status/{}", job_id)));
    let body = send_json(request, host, port).await?;

    if json {
        return print_json(&body);
    }
    println!("Job {}", body["id"].as_str().unwrap_or(job_id));
    println!("  Source:   {}", body["source_url"].as_str().unwrap_or("?"));
    println!("  Status:   {}", body["status"].as_str().unwrap_or("?"));
    println!("  Progress: {:.1}%", body["progress"].as_f64().unwrap_or(0.0));
    println!("  Created:  {}", relative(&body["created_at"]));
    println!("  Updated:  {}", relative(&body["updated_at"]));
    if let Some(error) = body["error"].as_str() {
        println!("  Error:    {}", error);
    }
    Ok(())
}

/// ejs pause | resume | stop
pub async fn cmd_transition(host: &str, port: u16, job_id: &str, action: &str) -> anyhow::Result<()> {
    let request = Client::new().post(api_url(host, port, &format!("/job/{}/{}", job_id, action)));
    let body = send_json(request, host, port).await?;
    println!(
        "{} (status: {})",
        body["message"].as_str().unwrap_or("Done"),
        body["status"].as_str().unwrap_or("?")
    );
    Ok(())
}

/// ejs retry
pub async fn cmd_retry(host: &str, port: u16, job_id: &str) -> anyhow::Result<()> {
    let request = Client::new().post(api_url(host, port, &format!("/job/{}/retry", job_id)));
    let body = send_json(request, host, port).await?;
    println!(
        "Job {} retried as {}.",
        job_id,
        body["job_id"].as_str().unwrap_or("unknown")
    );
    Ok(())
}

/// ejs history
pub async fn cmd_history(host: &str, port: u16, job_id: &str, json: bool) -> anyhow::Result<()> {
    let request = Client::new().get(api_url(host, port, &format!("/job/{}/history", job_id)));
    let body = send_json(request, host, port).await?;

    if json {
        return print_json(&body);
    }

    let empty_vec = vec![];
    let entries = body["history"].as_array().unwrap_or(&empty_vec);
    if entries.is_empty() {
        println!("No history recorded.");
        return Ok(());
    }

    println!("{:<22}{:<10}{:<14}{:<20}", "WHEN", "ACTION", "STATUS", "BATCH");
    for entry in entries {
        println!(
            "{:<22}{:<10}{:<14}{:<20}",
            relative(&entry["timestamp"]),
            entry["action"].as_str().unwrap_or("?"),
            entry["status"].as_str().unwrap_or("?"),
            truncate(entry["batch_id"].as_str().unwrap_or("-"), 19),
        );
        if let Some(error) = entry["error"].as_str() {
            println!("    error: {}", error);
        }
    }
    Ok(())
}

/// Filters and paging for `ejs list`.
#[derive(Debug, Default)]
pub struct ListQuery {
    pub status: Option<String>,
    pub source: Option<String>,
    pub min_progress: Option<f64>,
    pub since: Option<String>,
    pub until: Option<String>,
    pub sort: Vec<SortArg>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl ListQuery {
    /// Query-string pairs understood by `GET /api/v1/jobs`.
    pub fn to_params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if let Some(s) = &self.status {
            params.push(("status", s.clone()));
        }
        if let Some(s) = &self.source {
            params.push(("source_url", s.clone()));
        }
        if let Some(p) = self.min_progress {
            params.push(("min_progress", p.to_string()));
        }
        if let Some(s) = &self.since {
            params.push(("start_date", s.clone()));
        }
        if let Some(s) = &self.until {
            params.push(("end_date", s.clone()));
        }
        if !self.sort.is_empty() {
            let fields: Vec<&str> = self.sort.iter().map(|s| s.field.as_str()).collect();
            let orders: Vec<&str> = self.sort.iter().map(|s| s.order.as_str()).collect();
            params.push(("sort_by", fields.join(",")));
            params.push(("order", orders.join(",")));
        }
        if let Some(l) = self.limit {
            params.push(("limit", l.to_string()));
        }
        if let Some(o) = self.offset {
            params.push(("offset", o.to_string()));
        }
        params
    }
}

/// ejs list
pub async fn cmd_list(host: &str, port: u16, query: &ListQuery, json: bool) -> anyhow::Result<()> {
    let request = Client::new()
        .get(api_url(host, port, "/jobs"))
        .query(&query.to_params());
    let body = send_json(request, host, port).await?;

    if json {
        return print_json(&body);
    }

    let empty_vec = vec![];
    let jobs = body["jobs"].as_array().unwrap_or(&empty_vec);

    if jobs.is_empty() {
        println!("No jobs found.");
        return Ok(());
    }

    println!(
        "{:<38}{:<13}{:<10}{:<18}{}",
        "ID", "STATUS", "PROGRESS", "CREATED", "SOURCE"
    );
    for job in jobs {
        println!(
            "{:<38}{:<13}{:<10}{:<18}{}",
            job["id"].as_str().unwrap_or("?"),
            job["status"].as_str().unwrap_or("?"),
            format!("{:.0}%", job["progress"].as_f64().unwrap_or(0.0)),
            relative(&job["created_at"]),
            truncate(job["source_url"].as_str().unwrap_or("?"), 40),
        );
    }

    let page = &body["pagination"];
    let offset = page["offset"].as_u64().unwrap_or(0);
    println!(
        "\nShowing {}-{} of {}{}",
        offset + 1,
        offset + jobs.len() as u64,
        page["total"].as_u64().unwrap_or(0),
        if page["has_more"].as_bool().unwrap_or(false) {
            " (more with --offset)"
        } else {
            ""
        }
    );
    Ok(())
}

/// ejs summary
pub async fn cmd_summary(host: &str, port: u16, json: bool) -> anyhow::Result<()> {
    let request = Client::new().get(api_url(host, port, "/jobs/status"));
    let body = send_json(request, host, port).await?;

    if json {
        return print_json(&body);
    }

    println!("Jobs: {}", body["total_jobs"].as_u64().unwrap_or(0));
    if let Some(by_status) = body["by_status"].as_object() {
        for (status, count) in by_status {
            println!("  {:<12} {}", status, count.as_u64().unwrap_or(0));
        }
    }
    println!(
        "Average progress:   {:.1}%",
        body["avg_progress"].as_f64().unwrap_or(0.0)
    );
    println!(
        "Average completion: {:.1}s",
        body["avg_completion_secs"].as_f64().unwrap_or(0.0)
    );
    println!(
        "Success rate:       {:.1}%",
        body["success_rate"].as_f64().unwrap_or(0.0)
    );
    println!(
        "Last 24h / week:    {} / {}",
        body["jobs_last_24h"].as_u64().unwrap_or(0),
        body["jobs_last_week"].as_u64().unwrap_or(0)
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_format_relative_time() {
        let now = Utc::now();
        assert!(format_relative_time(&(now - Duration::seconds(30))).contains("seconds ago"));
        assert_eq!(format_relative_time(&(now - Duration::minutes(5))), "5 minutes ago");
        assert_eq!(format_relative_time(&(now - Duration::hours(3))), "3 hours ago");
        assert_eq!(format_relative_time(&(now - Duration::days(2))), "2 days ago");
    }

    #[test]
    fn test_relative_handles_missing_timestamp() {
        assert_eq!(relative(&Value::Null), "-");
        assert_eq!(relative(&json!("not a date")), "-");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("s3://bucket/very/long/key", 10), "s3://bu...");
    }

    #[test]
    fn test_list_query_params() {
        let query = ListQuery {
            status: Some("FAILED".to_string()),
            min_progress: Some(25.0),
            since: Some("1700000000".to_string()),
            sort: vec![
                SortArg {
                    field: "status".to_string(),
                    order: String::new(),
                },
                SortArg {
                    field: "created_at".to_string(),
                    order: "desc".to_string(),
                },
            ],
            limit: Some(5),
            ..Default::default()
        };
        let params = query.to_params();
        assert!(params.contains(&("status", "FAILED".to_string())));
        assert!(params.contains(&("min_progress", "25".to_string())));
        assert!(params.contains(&("start_date", "1700000000".to_string())));
        assert!(params.contains(&("sort_by", "status,created_at".to_string())));
        assert!(params.contains(&("order", ",desc".to_string())));
        assert!(params.contains(&("limit", "5".to_string())));
        assert!(!params.iter().any(|(k, _)| *k == "offset"));
    }

    #[test]
    fn test_empty_list_query_has_no_params() {
        assert!(ListQuery::default().to_params().is_empty());
    }

    #[tokio::test]
    async fn test_cmd_show_connection_error() {
        let result = cmd_show("127.0.0.1", 1, "job-1", false).await;
        let err = result.unwrap_err().to_string();
        assert!(
            err.contains("Could not connect") || err.contains("Request failed"),
            "Got: {}",
            err
        );
    }
}
