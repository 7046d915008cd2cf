pub mod batch;
pub mod config;
pub mod history;
pub mod job;
pub mod query;

pub use batch::{
    BatchFilter, BatchJobError, BatchOperation, BatchResult, BatchStatus, BatchSummary, NO_JOB_ID,
};
pub use config::ServiceConfig;
pub use history::JobHistoryEntry;
pub use job::{Job, JobAction, JobStatus};
pub use query::{JobFilter, JobSort, SortField};
