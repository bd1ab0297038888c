use dashmap::DashMap;
use hashbrown::{HashMap, HashSet};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::str::FromStr;

use crate::{
    batch::Batch,
    config::Config,
    consts::*,
    error::TaskError,
    executor::task::{decode_id, encode_id, Task, TaskStatus},
};

/// Persistent store of draft and launched tasks
///
/// # Example
///
/// ```rust, ignore
/// let mut ledger = TaskLedger::load(config.ledger())?;
/// ledger.create_drafts(&batches, &config);
/// ledger.save()?;
/// ```
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct TaskLedger {
    #[serde(default)]
    tasks: Vec<Task>,
    #[serde(skip)]
    path: PathBuf,
}

impl TaskLedger {
    /// Load a ledger from disk; a missing file yields an empty ledger.
    ///
    /// A ledger holding the same task id twice is rejected, since launches
    /// and outcomes are matched to tasks by id.
    pub fn load(path: &Path) -> Result<Self, TaskError> {
        if !path.exists() {
            log::debug!("No ledger found at {}, starting empty", path.display());
            return Ok(Self {
                tasks: Vec::new(),
                path: path.to_path_buf(),
            });
        }

        let contents = std::fs::read_to_string(path).map_err(|source| TaskError::Ledger {
            path: path.to_path_buf(),
            source,
        })?;

        let mut ledger: TaskLedger =
            toml::from_str(&contents).map_err(|source| TaskError::LedgerParse {
                path: path.to_path_buf(),
                source,
            })?;
        ledger.path = path.to_path_buf();

        {
            let mut seen = HashSet::new();
            if let Some(task) = ledger.tasks.iter().find(|t| !seen.insert(t.id.as_str())) {
                return Err(TaskError::DuplicateId {
                    path: path.to_path_buf(),
                    id: task.id.clone(),
                });
            }
        }

        Ok(ledger)
    }

    /// Write the ledger back to the path it was loaded from.
    pub fn save(&self) -> Result<(), TaskError> {
        let contents = toml::to_string(self)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| TaskError::Ledger {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        std::fs::write(&self.path, contents).map_err(|source| TaskError::Ledger {
            path: self.path.clone(),
            source,
        })
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// Tasks in a given status, in creation order.
    pub fn query(&self, status: TaskStatus) -> Vec<&Task> {
        self.tasks.iter().filter(|t| t.status == status).collect()
    }

    pub fn count(&self, status: TaskStatus) -> usize {
        self.tasks.iter().filter(|t| t.status == status).count()
    }

    pub fn status_counts(&self) -> StatusCounts {
        let mut counts = HashMap::new();
        for task in &self.tasks {
            *counts.entry(task.status).or_insert(0) += 1;
        }

        StatusCounts(counts)
    }

    /// Sequence number for the next task id: one past the highest id
    /// already in the ledger.
    fn next_seq(&self) -> u64 {
        self.tasks
            .iter()
            .filter_map(|task| decode_id(&task.id))
            .max()
            .map_or(0, |seq| seq + 1)
    }

    /// Create one draft task per batch.
    ///
    /// # Returns
    ///
    /// The names of the created tasks, in batch order.
    pub fn create_drafts(&mut self, batches: &[Batch], config: &Config) -> Vec<String> {
        let start = self.next_seq();

        batches
            .iter()
            .zip(start..)
            .map(|(batch, seq)| {
                let task = Task::from_batch(batch, config, encode_id(seq));
                log::info!(
                    "INFO [CREATE]: Task {}: {} files, {:.2} Gb -> {}",
                    batch.index,
                    batch.len(),
                    batch.total_size,
                    task.name
                );

                let name = task.name.clone();
                self.tasks.push(task);
                name
            })
            .collect()
    }

    /// Launch draft tasks for the configured app.
    ///
    /// Fails when the number of queued and running tasks already reaches
    /// `max-per-run`. At most `max-per-run - running` drafts are launched.
    ///
    /// # Returns
    ///
    /// The final status of every launched task, keyed by task id.
    pub fn run_drafts(
        &mut self,
        config: &Config,
        manager: &ParallelManager,
    ) -> Result<HashMap<String, TaskStatus>, TaskError> {
        let max = config.max_per_run();
        let running = self.count(TaskStatus::Running);
        let active = self.tasks.iter().filter(|t| t.status.is_active()).count();

        if active >= max {
            log::info!("INFO: Maximum number of active tasks reached!");
            return Err(TaskError::ActiveLimit { active });
        }

        let drafts = self.query(TaskStatus::Draft);
        if drafts.is_empty() {
            log::info!("INFO: No draft tasks left to be run!");
            return Ok(HashMap::new());
        }

        // INFO: keep only drafts created for the current app
        let app = config.app();
        let executable = drafts
            .into_iter()
            .filter(|task| task.app.contains(app))
            .take(max.saturating_sub(running))
            .map(|task| task.id.clone())
            .collect::<Vec<_>>();

        if executable.is_empty() {
            log::info!("INFO: No draft tasks for {} left to be run!", app);
            return Ok(HashMap::new());
        }

        self.set_status(&executable, TaskStatus::Running);
        self.save()?;

        let launched = self
            .tasks
            .iter()
            .filter(|task| executable.contains(&task.id))
            .cloned()
            .collect::<Vec<_>>();

        let outcomes = match manager.dispatch(&launched, config, self.jobs_path()) {
            Ok(outcomes) => outcomes,
            Err(e) => {
                log::error!("ERROR: Task was not started! {}", e);
                self.set_status(&executable, TaskStatus::Draft);
                self.save()?;
                return Err(e);
            }
        };

        for task in self.tasks.iter_mut() {
            if let Some(status) = outcomes.get(&task.id) {
                task.status = *status;
            }
        }
        self.save()?;

        if let Some(task) = launched
            .iter()
            .find(|task| !matches!(outcomes.get(&task.id), Some(s) if *s != TaskStatus::Draft))
        {
            log::error!("ERROR: Task was not started! Task state is DRAFT!");
            return Err(TaskError::NotStarted {
                name: task.name.clone(),
            });
        }

        Ok(outcomes)
    }

    fn set_status(&mut self, ids: &[String], status: TaskStatus) {
        self.tasks
            .iter_mut()
            .filter(|task| ids.contains(&task.id))
            .for_each(|task| task.status = status);
    }

    fn jobs_path(&self) -> PathBuf {
        self.path.with_file_name(JOBS)
    }
}

/// Number of tasks per status.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusCounts(HashMap<TaskStatus, usize>);

impl StatusCounts {
    pub fn get(&self, status: TaskStatus) -> usize {
        self.0.get(&status).copied().unwrap_or(0)
    }
}

impl std::fmt::Display for StatusCounts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Draft={}, Queued={}, Running={}, Completed={}, Failed={}, Aborted={}",
            self.get(TaskStatus::Draft),
            self.get(TaskStatus::Queued),
            self.get(TaskStatus::Running),
            self.get(TaskStatus::Completed),
            self.get(TaskStatus::Failed),
            self.get(TaskStatus::Aborted),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParallelManager {
    /// Submit the job list through Nextflow
    Nextflow,

    /// Submit the job list through para
    Para,

    /// Run every job on this machine
    Local,
}

impl FromStr for ParallelManager {
    type Err = String;

    /// Convert a string to a ParallelManager
    ///
    /// # Example
    ///
    /// ```rust, ignore
    /// let manager = ParallelManager::from_str("nextflow").unwrap();
    /// assert_eq!(manager, ParallelManager::Nextflow);
    /// ```
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "nextflow" => Ok(ParallelManager::Nextflow),
            "para" => Ok(ParallelManager::Para),
            "local" => Ok(ParallelManager::Local),
            _ => Err(format!("ERROR: Unknown parallel manager: {}", s)),
        }
    }
}

impl std::fmt::Display for ParallelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParallelManager::Nextflow => write!(f, "nextflow"),
            ParallelManager::Para => write!(f, "para"),
            ParallelManager::Local => write!(f, "local"),
        }
    }
}

impl ParallelManager {
    /// Submission command for a written job list; `None` for local runs.
    ///
    /// # Example
    ///
    /// ```rust, ignore
    /// let cmd = ParallelManager::Para.submission(&config, Path::new("jobs"))?;
    /// assert_eq!(cmd.unwrap(), "para make tcga-brca jobs -q short -memoryMb 8000");
    /// ```
    pub fn submission(&self, config: &Config, jobs: &Path) -> Result<Option<String>, TaskError> {
        let mut cmd = match self {
            ParallelManager::Local => return Ok(None),
            ParallelManager::Nextflow => {
                // INFO: 'nextflow run <runner> --joblist <jobs>'
                format!("nextflow run {} --joblist {}", NF_RUNNER, jobs.display())
            }
            ParallelManager::Para => {
                // INFO: 'para make <name> <jobs> -q <queue>'
                let queue = config
                    .tasks
                    .queue
                    .as_deref()
                    .ok_or_else(|| TaskError::Dispatch {
                        reason: "No queue found in [tasks] for para".into(),
                    })?;

                format!(
                    "para make {} {} -q {}",
                    config.project(),
                    jobs.display(),
                    queue
                )
            }
        };

        if let Some(memory) = config.tasks.memory {
            match self {
                ParallelManager::Para => cmd.push_str(&format!(" -memoryMb {}", memory)),
                _ => cmd.push_str(&format!(" --mem {}", memory)),
            }
        }

        Ok(Some(cmd))
    }

    /// Execute tasks and report the final status of each one.
    ///
    /// Para and Nextflow receive the whole job list in a single submission,
    /// so every task shares its outcome. Local runs each job on a rayon pool
    /// sized to the available cores.
    pub fn dispatch(
        &self,
        tasks: &[Task],
        config: &Config,
        jobs: PathBuf,
    ) -> Result<HashMap<String, TaskStatus>, TaskError> {
        log::info!(
            "INFO [{}]: launching {} tasks...",
            self.to_string().to_uppercase(),
            tasks.len()
        );

        match self.submission(config, &jobs)? {
            Some(cmd) => {
                write_jobs(tasks, &jobs)?;

                let status = if shell(&cmd)? {
                    TaskStatus::Completed
                } else {
                    TaskStatus::Failed
                };

                Ok(tasks.iter().map(|task| (task.id.clone(), status)).collect())
            }
            None => run_local(tasks),
        }
    }
}

fn run_local(tasks: &[Task]) -> Result<HashMap<String, TaskStatus>, TaskError> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(num_cpus::get().min(tasks.len()).max(1))
        .build()
        .map_err(|e| TaskError::Dispatch {
            reason: e.to_string(),
        })?;

    let outcomes: DashMap<String, TaskStatus> = DashMap::new();

    pool.install(|| {
        tasks.par_iter().for_each(|task| {
            let status = match shell(&task.cmd()) {
                Ok(true) => TaskStatus::Completed,
                Ok(false) => TaskStatus::Failed,
                Err(e) => {
                    log::error!("ERROR: failed to launch {}: {}", task.name, e);
                    TaskStatus::Failed
                }
            };

            log::info!("INFO [LOCAL]: {} -> {}", task.name, status);
            outcomes.insert(task.id.clone(), status);
        })
    });

    Ok(outcomes.into_iter().collect())
}

/// Write one command per line to the job list file
fn write_jobs(tasks: &[Task], path: &Path) -> Result<(), TaskError> {
    let ledger_err = |source: std::io::Error| TaskError::Ledger {
        path: path.to_path_buf(),
        source,
    };

    let mut file = std::fs::File::create(path).map_err(ledger_err)?;
    for task in tasks {
        writeln!(file, "{}", task.cmd()).map_err(ledger_err)?;
    }

    Ok(())
}

/// Run a command through `sh -c`, returning whether it succeeded.
fn shell(cmd: &str) -> Result<bool, TaskError> {
    log::debug!("Executing: {}", cmd);

    let output = Command::new("sh")
        .arg("-c")
        .arg(cmd)
        .output()
        .map_err(|e| TaskError::Dispatch {
            reason: format!("failed to execute {}: {}", cmd, e),
        })?;

    if !output.status.success() {
        log::error!(
            "ERROR: failed to execute {}\n{}",
            cmd,
            String::from_utf8_lossy(&output.stderr)
        );
    }

    Ok(output.status.success())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{build_batches, Item};

    fn config(dir: &Path, app: &str, max: usize) -> Config {
        let contents = format!(
            "[metadata]\nproject = \"p\"\ndisease = \"BRCA\"\napp = \"{}\"\n\
             [tasks]\nmax-per-run = {}\nqueue = \"short\"\n",
            app, max
        );

        Config::parse(&contents, &dir.join("config.toml")).unwrap()
    }

    fn batches(config: &Config, sizes: &[f64]) -> Vec<Batch> {
        let items = sizes
            .iter()
            .enumerate()
            .map(|(i, size)| Item::new(format!("f{}.bam", i), *size, "WGS"))
            .collect::<Vec<_>>();

        build_batches(&items, &config.policy().unwrap(), config.categories())
            .unwrap()
            .0
    }

    #[test]
    fn test_ledger_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), "true", 5);

        let mut ledger = TaskLedger::load(config.ledger()).unwrap();
        assert!(ledger.tasks().is_empty());

        let names = ledger.create_drafts(&batches(&config, &[450.0, 700.0]), &config);
        assert_eq!(
            names,
            vec![
                "bam2fasta_BRCA_1_task_1_files_450.00Gb",
                "bam2fasta_BRCA_2_task_1_files_700.00Gb"
            ]
        );
        ledger.save().unwrap();

        let reloaded = TaskLedger::load(config.ledger()).unwrap();
        assert_eq!(reloaded.tasks(), ledger.tasks());
        assert_eq!(reloaded.count(TaskStatus::Draft), 2);
    }

    #[test]
    fn test_run_drafts_locally() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), "true", 5);

        let mut ledger = TaskLedger::load(config.ledger()).unwrap();
        ledger.create_drafts(&batches(&config, &[450.0, 700.0, 500.0]), &config);

        let outcomes = ledger.run_drafts(&config, &ParallelManager::Local).unwrap();

        assert_eq!(outcomes.len(), 3);
        assert!(outcomes.values().all(|s| *s == TaskStatus::Completed));
        assert_eq!(ledger.status_counts().get(TaskStatus::Completed), 3);

        let reloaded = TaskLedger::load(config.ledger()).unwrap();
        assert_eq!(reloaded.count(TaskStatus::Completed), 3);
    }

    #[test]
    fn test_failed_local_task() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), "false", 5);

        let mut ledger = TaskLedger::load(config.ledger()).unwrap();
        ledger.create_drafts(&batches(&config, &[450.0]), &config);

        let outcomes = ledger.run_drafts(&config, &ParallelManager::Local).unwrap();

        assert_eq!(outcomes.values().copied().collect::<Vec<_>>(), vec![TaskStatus::Failed]);
        assert_eq!(ledger.count(TaskStatus::Failed), 1);
    }

    #[test]
    fn test_run_drafts_respects_limits() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), "true", 2);

        let mut ledger = TaskLedger::load(config.ledger()).unwrap();
        ledger.create_drafts(&batches(&config, &[450.0, 450.0, 450.0]), &config);

        let outcomes = ledger.run_drafts(&config, &ParallelManager::Local).unwrap();
        assert_eq!(outcomes.len(), 2);
        assert_eq!(ledger.count(TaskStatus::Draft), 1);

        // INFO: two tasks left running elsewhere block further launches
        ledger.tasks[0].status = TaskStatus::Running;
        ledger.tasks[1].status = TaskStatus::Queued;
        let err = ledger.run_drafts(&config, &ParallelManager::Local).unwrap_err();
        assert!(matches!(err, TaskError::ActiveLimit { active: 2 }));
    }

    #[test]
    fn test_run_drafts_skips_other_apps() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), "true", 5);

        let mut ledger = TaskLedger::load(config.ledger()).unwrap();
        ledger.create_drafts(&batches(&config, &[450.0, 450.0]), &config);
        ledger.tasks[0].app = "other-app".into();

        let outcomes = ledger.run_drafts(&config, &ParallelManager::Local).unwrap();

        assert_eq!(outcomes.len(), 1);
        assert!(outcomes.contains_key(&ledger.tasks[1].id));
        assert_eq!(ledger.tasks[0].status, TaskStatus::Draft);
    }

    #[test]
    fn test_no_drafts() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), "true", 5);

        let mut ledger = TaskLedger::load(config.ledger()).unwrap();
        let outcomes = ledger.run_drafts(&config, &ParallelManager::Local).unwrap();

        assert!(outcomes.is_empty());
    }

    #[test]
    fn test_submission_commands() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path(), "true", 5);
        let jobs = Path::new("jobs");

        assert_eq!(
            ParallelManager::Para.submission(&config, jobs).unwrap(),
            Some("para make p jobs -q short".to_string())
        );
        assert_eq!(
            ParallelManager::Nextflow.submission(&config, jobs).unwrap(),
            Some(format!("nextflow run {} --joblist jobs", NF_RUNNER))
        );
        assert_eq!(ParallelManager::Local.submission(&config, jobs).unwrap(), None);

        config.tasks.memory = Some(8000);
        assert_eq!(
            ParallelManager::Para.submission(&config, jobs).unwrap(),
            Some("para make p jobs -q short -memoryMb 8000".to_string())
        );

        config.tasks.queue = None;
        assert!(matches!(
            ParallelManager::Para.submission(&config, jobs),
            Err(TaskError::Dispatch { .. })
        ));
    }

    #[test]
    fn test_status_counts_display() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), "true", 5);

        let mut ledger = TaskLedger::load(config.ledger()).unwrap();
        ledger.create_drafts(&batches(&config, &[450.0, 450.0]), &config);
        ledger.tasks[1].status = TaskStatus::Aborted;

        assert_eq!(
            ledger.status_counts().to_string(),
            "Draft=1, Queued=0, Running=0, Completed=0, Failed=0, Aborted=1"
        );
    }

    #[test]
    fn test_ids_unique_across_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), "true", 5);

        let mut first = TaskLedger::load(config.ledger()).unwrap();
        first.create_drafts(&batches(&config, &[450.0, 450.0]), &config);
        first.save().unwrap();

        let mut second = TaskLedger::load(config.ledger()).unwrap();
        second.create_drafts(&batches(&config, &[450.0, 450.0, 700.0]), &config);
        second.save().unwrap();

        let reloaded = TaskLedger::load(config.ledger()).unwrap();
        let ids = reloaded
            .tasks()
            .iter()
            .map(|t| t.id.as_str())
            .collect::<HashSet<_>>();

        assert_eq!(reloaded.tasks().len(), 5);
        assert_eq!(ids.len(), 5);
        assert_eq!(reloaded.tasks()[2].id, encode_id(2));
    }

    #[test]
    fn test_duplicate_ids_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), "true", 1);

        let mut ledger = TaskLedger::load(config.ledger()).unwrap();
        ledger.create_drafts(&batches(&config, &[450.0, 450.0]), &config);
        ledger.tasks[1].id = ledger.tasks[0].id.clone();
        ledger.save().unwrap();

        let err = TaskLedger::load(config.ledger()).unwrap_err();
        assert!(matches!(err, TaskError::DuplicateId { ref id, .. } if *id == ledger.tasks[0].id));
    }

    #[test]
    fn test_max_per_run_caps_launches() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), "true", 1);

        let mut ledger = TaskLedger::load(config.ledger()).unwrap();
        ledger.create_drafts(&batches(&config, &[450.0, 450.0]), &config);
        ledger.save().unwrap();

        let mut ledger = TaskLedger::load(config.ledger()).unwrap();
        let outcomes = ledger.run_drafts(&config, &ParallelManager::Local).unwrap();

        assert_eq!(outcomes.len(), 1);
        assert_eq!(ledger.count(TaskStatus::Completed), 1);
        assert_eq!(ledger.count(TaskStatus::Draft), 1);
    }

    #[test]
    fn test_manager_from_str() {
        assert_eq!("PARA".parse::<ParallelManager>(), Ok(ParallelManager::Para));
        assert!("snakemake".parse::<ParallelManager>().is_err());
    }
}
