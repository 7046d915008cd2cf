pub mod batch;
pub mod daemon;
pub mod jobs;

use clap::{Parser, Subcommand};
use serde_json::Value;

/// Encryption Job Service - track encryption jobs and run batch operations
#[derive(Parser, Debug)]
#[command(
    name = "ejs",
    version,
    about = "Encryption Job Service - track encryption jobs and run batch operations"
)]
pub struct Cli {
    /// Service host
    #[arg(long, default_value = "127.0.0.1", global = true)]
    pub host: String,

    /// Service port
    #[arg(long, default_value_t = 8080, global = true)]
    pub port: u16,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    /// `serve` sets up its own logging, including the log file.
    pub fn runs_service(&self) -> bool {
        matches!(self.command, Some(Commands::Serve { .. }))
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the service in the foreground
    Serve {
        /// Path to configuration file
        #[arg(short = 'c', long = "config")]
        config: Option<String>,

        /// Port to listen on (overrides config)
        #[arg(short = 'p', long)]
        port: Option<u16>,

        /// Data directory path
        #[arg(long = "data-dir")]
        data_dir: Option<String>,
    },

    /// Show service health
    Status,

    /// Start a new encryption job
    Encrypt {
        /// Source URL to encrypt
        source_url: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show a single job
    Show {
        job_id: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Pause a running job
    Pause { job_id: String },

    /// Resume a paused job
    Resume { job_id: String },

    /// Stop a job
    Stop { job_id: String },

    /// Retry a failed job as a new job
    Retry { job_id: String },

    /// Show a job's history log
    History {
        job_id: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List jobs with filters, sorting and pagination
    List {
        /// Only jobs in this status (e.g. FAILED)
        #[arg(long)]
        status: Option<String>,

        /// Only jobs whose source URL contains this text
        #[arg(long)]
        source: Option<String>,

        /// Minimum progress (0-100)
        #[arg(long = "min-progress")]
        min_progress: Option<f64>,

        /// Created at or after (unix seconds or RFC 3339)
        #[arg(long)]
        since: Option<String>,

        /// Created at or before (unix seconds or RFC 3339)
        #[arg(long)]
        until: Option<String>,

        /// Sort key, repeatable (e.g. --sort status --sort created_at:desc)
        #[arg(long, value_name = "FIELD[:ORDER]", value_parser = parse_sort_arg)]
        sort: Vec<SortArg>,

        /// Page size
        #[arg(long)]
        limit: Option<usize>,

        /// Number of jobs to skip
        #[arg(long)]
        offset: Option<usize>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show summary statistics over all jobs
    Summary {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run a batch operation (start, pause, resume, stop, retry)
    Batch {
        action: String,

        /// Job ID to act on (repeatable)
        #[arg(long = "job", value_name = "ID")]
        jobs: Vec<String>,

        /// Source URL to start (repeatable)
        #[arg(long = "source", value_name = "URL")]
        sources: Vec<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List stored batch results
    Batches {
        /// Only batches with this outcome (success, partial, failed)
        #[arg(long)]
        status: Option<String>,

        /// Only batches mentioning this job (repeatable)
        #[arg(long = "job", value_name = "ID")]
        jobs: Vec<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show one batch result
    BatchShow {
        batch_id: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

/// One `--sort` argument.
#[derive(Debug, Clone, PartialEq)]
pub struct SortArg {
    pub field: String,
    pub order: String,
}

/// Parse `field[:order]`. Field and order names are checked by the server.
pub fn parse_sort_arg(raw: &str) -> Result<SortArg, String> {
    let (field, order) = match raw.split_once(':') {
        Some((f, o)) => (f.trim(), o.trim()),
        None => (raw.trim(), ""),
    };
    if field.is_empty() {
        return Err(format!("Invalid sort '{}'. Expected FIELD[:ORDER]", raw));
    }
    Ok(SortArg {
        field: field.to_string(),
        order: order.to_string(),
    })
}

/// Build the base URL for the service HTTP API.
pub fn base_url(host: &str, port: u16) -> String {
    format!("http://{}:{}", host, port)
}

/// Format a connection error message for when the service is not reachable.
pub fn connection_error_message(host: &str, port: u16) -> String {
    format!(
        "Could not connect to service at {}:{}. Is it running? (try: ejs serve)",
        host, port
    )
}

/// Helper to handle reqwest errors and produce a user-friendly connection error.
pub(crate) fn handle_request_error(err: reqwest::Error, host: &str, port: u16) -> anyhow::Error {
    if err.is_connect() || err.is_timeout() {
        anyhow::anyhow!("{}", connection_error_message(host, port))
    } else {
        anyhow::anyhow!("Request failed: {}", err)
    }
}

/// Send a request and decode the JSON body. Error responses become an
/// error carrying the server's message and field details.
pub(crate) async fn send_json(
    request: reqwest::RequestBuilder,
    host: &str,
    port: u16,
) -> anyhow::Result<Value> {
    let response = request
        .send()
        .await
        .map_err(|e| handle_request_error(e, host, port))?;

    let status = response.status();
    let body: Value = response
        .json()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to parse response: {}", e))?;

    if !status.is_success() {
        return Err(anyhow::anyhow!("{}", describe_error(&body)));
    }
    Ok(body)
}

/// Render an error body as one line per detail.
pub(crate) fn describe_error(body: &Value) -> String {
    let mut message = body["message"]
        .as_str()
        .unwrap_or("Unknown error")
        .to_string();
    if let Some(errors) = body["errors"].as_array() {
        for detail in errors {
            let text = detail["message"].as_str().unwrap_or("?");
            match detail["field"].as_str() {
                Some(field) => message.push_str(&format!("\n  {}: {}", field, text)),
                None => message.push_str(&format!("\n  {}", text)),
            }
        }
    }
    message
}

/// Dispatch the CLI command to the appropriate handler.
pub async fn dispatch(cli: &Cli) -> anyhow::Result<()> {
    let (host, port) = (cli.host.as_str(), cli.port);
    match &cli.command {
        Some(Commands::Serve {
            config,
            port: port_override,
            data_dir,
        }) => {
            daemon::cmd_serve(
                host,
                config.as_deref(),
                *port_override,
                data_dir.as_deref(),
                cli.verbose,
            )
            .await
        }
        Some(Commands::Status) => daemon::cmd_status(host, port, cli.verbose).await,
        Some(Commands::Encrypt { source_url, json }) => {
            jobs::cmd_encrypt(host, port, source_url, *json).await
        }
        Some(Commands::Show { job_id, json }) => jobs::cmd_show(host, port, job_id, *json).await,
        Some(Commands::Pause { job_id }) => jobs::cmd_transition(host, port, job_id, "pause").await,
        Some(Commands::Resume { job_id }) => {
            jobs::cmd_transition(host, port, job_id, "resume").await
        }
        Some(Commands::Stop { job_id }) => jobs::cmd_transition(host, port, job_id, "stop").await,
        Some(Commands::Retry { job_id }) => jobs::cmd_retry(host, port, job_id).await,
        Some(Commands::History { job_id, json }) => {
            jobs::cmd_history(host, port, job_id, *json).await
        }
        Some(Commands::List {
            status,
            source,
            min_progress,
            since,
            until,
            sort,
            limit,
            offset,
            json,
        }) => {
            let query = jobs::ListQuery {
                status: status.clone(),
                source: source.clone(),
                min_progress: *min_progress,
                since: since.clone(),
                until: until.clone(),
                sort: sort.clone(),
                limit: *limit,
                offset: *offset,
            };
            jobs::cmd_list(host, port, &query, *json).await
        }
        Some(Commands::Summary { json }) => jobs::cmd_summary(host, port, *json).await,
        Some(Commands::Batch {
            action,
            jobs: job_ids,
            sources,
            json,
        }) => batch::cmd_batch(host, port, action, job_ids, sources, *json).await,
        Some(Commands::Batches {
            status,
            jobs: job_ids,
            json,
        }) => batch::cmd_batches(host, port, status.as_deref(), job_ids, *json).await,
        Some(Commands::BatchShow { batch_id, json }) => {
            batch::cmd_batch_show(host, port, batch_id, *json).await
        }
        None => {
            // No subcommand provided -- print help
            use clap::CommandFactory;
            Cli::command().print_help()?;
            println!();
            Ok(())
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_cli_version_flag() {
        let result = Cli::try_parse_from(["ejs", "--version"]);
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayVersion);
        let output = err.to_string();
        assert!(
            output.contains("0.1.0"),
            "Expected version 0.1.0 in output: {}",
            output
        );
    }

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::try_parse_from(["ejs", "status"]).expect("Should parse status");
        assert_eq!(cli.host, "127.0.0.1");
        assert_eq!(cli.port, 8080);
        assert!(!cli.verbose);
        assert!(matches!(cli.command, Some(Commands::Status)));
    }

    #[test]
    fn test_cli_no_subcommand() {
        let cli = Cli::try_parse_from(["ejs"]).expect("Should parse with no subcommand");
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_cli_serve_overrides() {
        let cli = Cli::try_parse_from([
            "ejs",
            "serve",
            "--config",
            "/tmp/c.json",
            "--data-dir",
            "/tmp/data",
        ])
        .expect("Should parse serve");

        match &cli.command {
            Some(Commands::Serve {
                config, data_dir, ..
            }) => {
                assert_eq!(config.as_deref(), Some("/tmp/c.json"));
                assert_eq!(data_dir.as_deref(), Some("/tmp/data"));
            }
            other => panic!("Expected Serve command, got: {:?}", other),
        }
    }

    #[test]
    fn test_cli_verbose_serve_runs_service() {
        let cli = Cli::try_parse_from(["ejs", "--verbose", "serve"]).expect("Should parse");
        assert!(cli.verbose);
        assert!(cli.runs_service());

        let cli = Cli::try_parse_from(["ejs", "-v", "status"]).expect("Should parse");
        assert!(cli.verbose);
        assert!(!cli.runs_service());
    }

    #[test]
    fn test_cli_list_parses_filters_and_repeated_sort() {
        let cli = Cli::try_parse_from([
            "ejs",
            "list",
            "--status",
            "FAILED",
            "--min-progress",
            "50",
            "--sort",
            "status",
            "--sort",
            "created_at:desc",
            "--limit",
            "5",
            "--json",
        ])
        .expect("Should parse list");

        match &cli.command {
            Some(Commands::List {
                status,
                min_progress,
                sort,
                limit,
                offset,
                json,
                ..
            }) => {
                assert_eq!(status.as_deref(), Some("FAILED"));
                assert_eq!(*min_progress, Some(50.0));
                assert_eq!(sort.len(), 2);
                assert_eq!(sort[0].field, "status");
                assert_eq!(sort[0].order, "");
                assert_eq!(sort[1].order, "desc");
                assert_eq!(*limit, Some(5));
                assert!(offset.is_none());
                assert!(json);
            }
            other => panic!("Expected List command, got: {:?}", other),
        }
    }

    #[test]
    fn test_cli_batch_collects_repeated_flags() {
        let cli = Cli::try_parse_from([
            "ejs", "batch", "pause", "--job", "a", "--job", "b", "--json",
        ])
        .expect("Should parse batch");

        match &cli.command {
            Some(Commands::Batch {
                action,
                jobs,
                sources,
                json,
            }) => {
                assert_eq!(action, "pause");
                assert_eq!(jobs, &vec!["a".to_string(), "b".to_string()]);
                assert!(sources.is_empty());
                assert!(json);
            }
            other => panic!("Expected Batch command, got: {:?}", other),
        }
    }

    #[test]
    fn test_cli_batch_show_is_kebab_case() {
        let cli = Cli::try_parse_from(["ejs", "batch-show", "batch_1"]).expect("Should parse");
        assert!(matches!(
            cli.command,
            Some(Commands::BatchShow { ref batch_id, json: false }) if batch_id == "batch_1"
        ));
    }

    #[test]
    fn test_cli_global_host_port_after_subcommand() {
        let cli = Cli::try_parse_from(["ejs", "summary", "--host", "10.0.0.1", "--port", "9000"])
            .expect("Should parse");
        assert_eq!(cli.host, "10.0.0.1");
        assert_eq!(cli.port, 9000);
    }

    #[test]
    fn test_parse_sort_arg() {
        assert_eq!(
            parse_sort_arg("progress:asc").unwrap(),
            SortArg {
                field: "progress".to_string(),
                order: "asc".to_string()
            }
        );
        assert_eq!(parse_sort_arg("status").unwrap().order, "");
        assert!(parse_sort_arg(":desc").is_err());
        assert!(parse_sort_arg("").is_err());
    }

    #[test]
    fn test_connection_error_message() {
        let msg = connection_error_message("127.0.0.1", 8080);
        assert!(msg.contains("127.0.0.1:8080"));
        assert!(msg.contains("ejs serve"));
    }

    #[test]
    fn test_describe_error_lists_fields() {
        let body = serde_json::json!({
            "status": "error",
            "message": "validation failed",
            "errors": [
                {"field": "action", "message": "unsupported action", "code": "validation_error"},
                {"message": "boom", "code": "internal_error"}
            ]
        });
        let text = describe_error(&body);
        assert!(text.starts_with("validation failed"));
        assert!(text.contains("action: unsupported action"));
        assert!(text.contains("\n  boom"));
    }
}
