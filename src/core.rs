use log::Level;

use crate::{
    batch::build_batches,
    config::Config,
    consts::TASK_PREFIX,
    executor::manager::{ParallelManager, StatusCounts, TaskLedger},
    executor::task::TaskStatus,
    manifest::read_manifest,
};

/// Group the manifest BAMs into batches and store one draft task per batch.
///
/// # Arguments
///
/// * `config` - Loaded configuration.
/// * `dry_run` - Only log the batches, leave the ledger untouched.
///
/// # Returns
///
/// The names of the tasks created (or that would be created).
///
/// # Example
///
/// ``` rust, ignore
/// let names = create(&config, false)?;
/// ```
pub fn create(config: &Config, dry_run: bool) -> Result<Vec<String>, Box<dyn std::error::Error>> {
    log::info!("INFO: Creating draft tasks.");

    let items = read_manifest(config.manifest())?;
    let policy = config.policy()?;

    let (batches, report) = match build_batches(&items, &policy, config.categories()) {
        Ok(result) => result,
        Err(e) => {
            config.record(Level::Error, &e.to_string());
            return Err(e.into());
        }
    };

    report.log();
    config.record(
        Level::Info,
        &format!(
            "Total tasks created: {} | Total files tasked: {} | Total files for disease type: {}",
            report.batches_created, report.items_placed, report.items_total
        ),
    );

    if dry_run {
        let names = batches
            .iter()
            .map(|batch| format!("{}_{}", TASK_PREFIX, batch.label(config.disease())))
            .inspect(|name| log::info!("INFO [DRY-RUN]: {}", name))
            .collect();

        return Ok(names);
    }

    let mut ledger = TaskLedger::load(config.ledger())?;
    let names = ledger.create_drafts(&batches, config);
    ledger.save()?;

    for name in &names {
        config.record(Level::Info, &format!("Name: {}", name));
    }

    Ok(names)
}

/// Launch the draft tasks stored in the ledger.
///
/// # Example
///
/// ``` rust, ignore
/// let launched = run(&config, &ParallelManager::Local)?;
/// ```
pub fn run(
    config: &Config,
    manager: &ParallelManager,
) -> Result<usize, Box<dyn std::error::Error>> {
    log::info!("INFO: Running tasks!");

    let mut ledger = TaskLedger::load(config.ledger())?;
    let outcomes = ledger.run_drafts(config, manager).inspect_err(|e| {
        config.record(Level::Error, &e.to_string());
    })?;

    let failed = outcomes
        .values()
        .filter(|status| **status == TaskStatus::Failed)
        .count();

    if failed > 0 {
        log::warn!("WARN: {} of {} tasks failed!", failed, outcomes.len());
    }

    config.record(
        Level::Info,
        &format!("Launched {} tasks, {} failed", outcomes.len(), failed),
    );

    Ok(outcomes.len())
}

/// Fetch the task status counts and print them.
///
/// # Example
///
/// ``` rust, ignore
/// let counts = status(&config)?;
/// ```
pub fn status(config: &Config) -> Result<StatusCounts, Box<dyn std::error::Error>> {
    log::info!("INFO: Fetching task statuses!");

    let counts = TaskLedger::load(config.ledger())?.status_counts();
    println!("{}", counts);

    Ok(counts)
}
