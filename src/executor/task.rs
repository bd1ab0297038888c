use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::{batch::Batch, config::Config, consts::*};

/// Lifecycle of a task in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskStatus {
    Draft,
    Queued,
    Running,
    Completed,
    Failed,
    Aborted,
}

impl TaskStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, TaskStatus::Queued | TaskStatus::Running)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Draft => "DRAFT",
            TaskStatus::Queued => "QUEUED",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Aborted => "ABORTED",
        };

        write!(f, "{}", s)
    }
}

/// Struct to represent a draft task built from a batch
///
/// # Example
///
/// ```rust, ignore
/// let task = Task::new(encode_id(1), "bam2fasta_BRCA_1_task_2_files_450.00Gb")
///     .project("tcga-brca")
///     .app("samtools-bam2fasta")
///     .params("--threads 8")
///     .inputs(vec!["a.bam".into(), "b.bam".into()]);
///
/// assert_eq!(task.cmd(), "samtools-bam2fasta --threads 8 a.bam b.bam");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub name: String,
    pub project: String,
    pub app: String,
    #[serde(default)]
    pub params: String,
    pub size_gb: f64,
    pub status: TaskStatus,
    pub created: DateTime<Local>,
    pub inputs: Vec<String>,
}

impl Task {
    /// Create a new draft task; ids are handed out by the ledger
    pub fn new(id: String, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            project: String::new(),
            app: String::new(),
            params: String::new(),
            size_gb: 0.0,
            status: TaskStatus::Draft,
            created: Local::now(),
            inputs: Vec::new(),
        }
    }

    /// Build the draft task for a closed batch.
    ///
    /// # Example
    ///
    /// ```rust, ignore
    /// let task = Task::from_batch(&batch, &config, encode_id(1));
    ///
    /// assert_eq!(task.name, "bam2fasta_BRCA_1_task_2_files_450.00Gb");
    /// ```
    pub fn from_batch(batch: &Batch, config: &Config, id: String) -> Self {
        Task::new(id, format!("{}_{}", TASK_PREFIX, batch.label(config.disease())))
            .project(config.project())
            .app(config.app())
            .params(&config.params.flat(None))
            .size(batch.total_size)
            .inputs(batch.items.iter().map(|item| item.id.clone()).collect())
    }

    pub fn project(mut self, project: &str) -> Self {
        self.project = project.to_string();
        self
    }

    pub fn app(mut self, app: &str) -> Self {
        self.app = app.to_string();
        self
    }

    pub fn params(mut self, params: &str) -> Self {
        self.params = params.to_string();
        self
    }

    pub fn size(mut self, size_gb: f64) -> Self {
        self.size_gb = size_gb;
        self
    }

    pub fn inputs(mut self, inputs: Vec<String>) -> Self {
        self.inputs = inputs;
        self
    }

    /// Command line executed for this task
    pub fn cmd(&self) -> String {
        std::iter::once(self.app.as_str())
            .chain(std::iter::once(self.params.as_str()))
            .chain(self.inputs.iter().map(String::as_str))
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Encode a ledger sequence number as a fixed-width id of TASK_ID_LEN
/// CHARSET characters.
///
/// # Example
///
/// ```rust, ignore
/// assert_eq!(encode_id(37), "AAAAAABB");
/// ```
pub fn encode_id(mut seq: u64) -> String {
    let base = CHARSET.len() as u64;
    let mut id = vec![CHARSET[0]; TASK_ID_LEN];

    for slot in id.iter_mut().rev() {
        *slot = CHARSET[(seq % base) as usize];
        seq /= base;
    }

    id.into_iter().map(char::from).collect()
}

/// Decode an id produced by `encode_id`; `None` for foreign ids.
pub fn decode_id(id: &str) -> Option<u64> {
    if id.len() != TASK_ID_LEN {
        return None;
    }

    id.bytes().try_fold(0u64, |acc, b| {
        let digit = CHARSET.iter().position(|c| *c == b)? as u64;
        acc.checked_mul(CHARSET.len() as u64)?.checked_add(digit)
    })
}
