use hashbrown::HashMap;

use crate::error::BatchError;

/// A sized input file with its experimental strategy.
///
/// # Example
///
/// ``` rust, ignore
/// let item = Item::new("sample.bam", 250.0, "WGS");
///
/// assert_eq!(item.size, 250.0);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub id: String,
    pub size: f64,
    pub category: String,
}

impl Item {
    pub fn new(id: impl Into<String>, size: f64, category: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            size,
            category: category.into(),
        }
    }
}

/// Lower/upper total-size bounds governing batch closure.
///
/// Both bounds are exclusive: a batch is complete when
/// `lower_bound < total < upper_bound`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchingPolicy {
    lower_bound: f64,
    upper_bound: f64,
}

impl BatchingPolicy {
    /// Create a new policy, rejecting non-positive, non-finite or unordered bounds.
    ///
    /// # Example
    ///
    /// ``` rust, ignore
    /// let policy = BatchingPolicy::new(400.0, 600.0).unwrap();
    ///
    /// assert!(BatchingPolicy::new(600.0, 400.0).is_err());
    /// ```
    pub fn new(lower_bound: f64, upper_bound: f64) -> Result<Self, BatchError> {
        let valid = lower_bound.is_finite()
            && upper_bound.is_finite()
            && lower_bound > 0.0
            && upper_bound > 0.0
            && lower_bound < upper_bound;

        if !valid {
            return Err(BatchError::InvalidPolicy {
                lower: lower_bound,
                upper: upper_bound,
            });
        }

        Ok(Self {
            lower_bound,
            upper_bound,
        })
    }

    pub fn lower_bound(&self) -> f64 {
        self.lower_bound
    }

    pub fn upper_bound(&self) -> f64 {
        self.upper_bound
    }

    fn within_window(&self, total: f64) -> bool {
        total > self.lower_bound && total < self.upper_bound
    }
}

/// A closed, ordered group of items.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub index: usize,
    pub items: Vec<Item>,
    pub total_size: f64,
}

impl Batch {
    /// Human-readable batch label.
    ///
    /// # Example
    ///
    /// ``` rust, ignore
    /// let label = batch.label("BRCA");
    ///
    /// assert_eq!(label, "BRCA_1_task_2_files_450.00Gb");
    /// ```
    pub fn label(&self, prefix: &str) -> String {
        format!(
            "{}_{}_task_{}_files_{:.2}Gb",
            prefix,
            self.index,
            self.items.len(),
            self.total_size
        )
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.items.iter().map(|item| item.id.as_str()).collect()
    }
}

/// Aggregate counters for a batching run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchingReport {
    pub batches_created: usize,
    pub items_placed: usize,
    pub items_total: usize,
    pub categories: HashMap<String, usize>,
    pub unplaced: Vec<String>,
}

impl BatchingReport {
    pub fn category_count(&self, category: &str) -> usize {
        self.categories.get(category).copied().unwrap_or(0)
    }

    /// Log the run summary.
    pub fn log(&self) {
        log::info!("INFO: Total tasks created: {}", self.batches_created);
        log::info!("INFO: Total files tasked: {}", self.items_placed);
        log::info!("INFO: Total files for disease type: {}", self.items_total);

        let mut categories = self.categories.iter().collect::<Vec<_>>();
        categories.sort_unstable();
        for (category, count) in categories {
            log::info!("INFO: Total {} files: {}", category, count);
        }
    }
}

/// Running batch, carried between fold steps.
#[derive(Debug, Clone, Default)]
enum BatchState {
    #[default]
    Empty,
    Accumulating { items: Vec<Item>, total: f64 },
}

impl BatchState {
    fn len(&self) -> usize {
        match self {
            BatchState::Empty => 0,
            BatchState::Accumulating { items, .. } => items.len(),
        }
    }

    fn total(&self) -> f64 {
        match self {
            BatchState::Empty => 0.0,
            BatchState::Accumulating { total, .. } => *total,
        }
    }

    fn push(self, item: Item) -> Self {
        match self {
            BatchState::Empty => BatchState::Accumulating {
                total: item.size,
                items: vec![item],
            },
            BatchState::Accumulating { mut items, total } => {
                let total = total + item.size;
                items.push(item);
                BatchState::Accumulating { items, total }
            }
        }
    }
}

#[derive(Debug, Default)]
struct Fold {
    current: BatchState,
    closed: Vec<Batch>,
    categories: HashMap<String, usize>,
}

impl Fold {
    fn close(mut self) -> Self {
        if let BatchState::Accumulating { items, total } = std::mem::take(&mut self.current) {
            let batch = Batch {
                index: self.closed.len() + 1,
                items,
                total_size: total,
            };

            log::debug!(
                "Task {}: {} files, {:.2} Gb",
                batch.index,
                batch.len(),
                batch.total_size
            );

            self.closed.push(batch);
        }

        self
    }
}

/// Partition an ordered list of items into size-bounded batches.
///
/// Single greedy pass: a batch is split before an item that would push it
/// above `upper_bound` (only when it already holds more than one item), and
/// closed after an item when it is an oversized singleton, when its total
/// falls strictly inside the policy window, or when the input is exhausted.
///
/// # Arguments
///
/// * `items` - Items in caller order (usually sorted by name).
/// * `policy` - Lower/upper size bounds.
/// * `categories` - Recognized category labels.
///
/// # Returns
///
/// The closed batches in order plus a report, or the first fatal error.
///
/// # Example
///
/// ``` rust, ignore
/// let items = vec![
///     Item::new("A", 250.0, "WGS"),
///     Item::new("B", 200.0, "WGS"),
/// ];
/// let policy = BatchingPolicy::new(400.0, 600.0).unwrap();
/// let (batches, report) = build_batches(&items, &policy, &["WGS"]).unwrap();
///
/// assert_eq!(batches.len(), 1);
/// assert_eq!(report.items_placed, 2);
/// ```
pub fn build_batches<S: AsRef<str>>(
    items: &[Item],
    policy: &BatchingPolicy,
    categories: &[S],
) -> Result<(Vec<Batch>, BatchingReport), BatchError> {
    let n = items.len();

    let fold = items
        .iter()
        .enumerate()
        .try_fold(Fold::default(), |fold, (i, item)| {
            step(fold, item, i + 1 == n, policy, categories)
        })?;

    let Fold {
        closed,
        categories: counts,
        ..
    } = fold;

    let unplaced = reconcile(items, &closed);
    if !unplaced.is_empty() {
        return Err(BatchError::Reconciliation { missing: unplaced });
    }

    let report = BatchingReport {
        batches_created: closed.len(),
        items_placed: closed.iter().map(Batch::len).sum(),
        items_total: n,
        categories: counts,
        unplaced,
    };

    Ok((closed, report))
}

fn step<S: AsRef<str>>(
    mut fold: Fold,
    item: &Item,
    last: bool,
    policy: &BatchingPolicy,
    categories: &[S],
) -> Result<Fold, BatchError> {
    if !categories.iter().any(|c| c.as_ref() == item.category) {
        return Err(BatchError::UnrecognizedCategory {
            id: item.id.clone(),
            category: item.category.clone(),
        });
    }

    if !item.size.is_finite() || item.size < 0.0 {
        return Err(BatchError::InvalidSize {
            id: item.id.clone(),
            size: item.size,
        });
    }

    // INFO: split before an item that would overflow a multi-item batch
    if fold.current.total() + item.size > policy.upper_bound && fold.current.len() > 1 {
        fold = fold.close();
    }

    fold.current = std::mem::take(&mut fold.current).push(item.clone());
    *fold.categories.entry(item.category.clone()).or_insert(0) += 1;

    let total = fold.current.total();
    let oversized = fold.current.len() == 1 && total >= policy.upper_bound;

    if oversized || policy.within_window(total) || last {
        fold = fold.close();
    }

    Ok(fold)
}

/// Ids present in the input but missing from the batches (multiset difference).
fn reconcile(items: &[Item], batches: &[Batch]) -> Vec<String> {
    let mut placed: HashMap<&str, usize> = HashMap::new();
    for batch in batches {
        for item in &batch.items {
            *placed.entry(item.id.as_str()).or_insert(0) += 1;
        }
    }

    items
        .iter()
        .filter(|item| match placed.get_mut(item.id.as_str()) {
            Some(count) if *count > 0 => {
                *count -= 1;
                false
            }
            _ => true,
        })
        .map(|item| item.id.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATEGORIES: &[&str] = &["WGS", "RNA-Seq"];

    fn policy() -> BatchingPolicy {
        BatchingPolicy::new(400.0, 600.0).unwrap()
    }

    fn items(sizes: &[(&str, f64)]) -> Vec<Item> {
        sizes
            .iter()
            .map(|(id, size)| Item::new(*id, *size, "WGS"))
            .collect()
    }

    fn partition(batches: &[Batch]) -> Vec<Vec<&str>> {
        batches.iter().map(Batch::ids).collect()
    }

    #[test]
    fn test_greedy_example_flushes_final_batch() {
        let input = items(&[("A", 250.0), ("B", 200.0), ("C", 100.0), ("D", 500.0)]);
        let (batches, report) = build_batches(&input, &policy(), CATEGORIES).unwrap();

        assert_eq!(partition(&batches), vec![vec!["A", "B"], vec!["C", "D"]]);
        assert_eq!(batches[0].total_size, 450.0);
        assert_eq!(batches[1].total_size, 600.0);
        assert_eq!(report.batches_created, 2);
        assert_eq!(report.items_placed, 4);
        assert!(report.unplaced.is_empty());
    }

    #[test]
    fn test_oversized_single_item() {
        let input = items(&[("big", 700.0)]);
        let (batches, _) = build_batches(&input, &policy(), CATEGORIES).unwrap();

        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].ids(), vec!["big"]);
        assert_eq!(batches[0].total_size, 700.0);
    }

    #[test]
    fn test_oversized_item_is_isolated_mid_stream() {
        let input = items(&[("a", 100.0), ("b", 150.0), ("big", 900.0), ("c", 450.0)]);
        let (batches, _) = build_batches(&input, &policy(), CATEGORIES).unwrap();

        assert_eq!(
            partition(&batches),
            vec![vec!["a", "b"], vec!["big"], vec!["c"]]
        );
    }

    #[test]
    fn test_unrecognized_category_aborts() {
        let input = vec![Item::new("x", 10.0, "ChIP-Seq")];
        let err = build_batches(&input, &policy(), CATEGORIES).unwrap_err();

        assert_eq!(
            err,
            BatchError::UnrecognizedCategory {
                id: "x".into(),
                category: "ChIP-Seq".into()
            }
        );
    }

    #[test]
    fn test_unrecognized_category_after_valid_items_returns_nothing() {
        let mut input = items(&[("a", 450.0), ("b", 450.0)]);
        input.push(Item::new("c", 10.0, "ATAC-Seq"));

        assert!(matches!(
            build_batches(&input, &policy(), CATEGORIES),
            Err(BatchError::UnrecognizedCategory { .. })
        ));
    }

    #[test]
    fn test_bounds_are_exclusive() {
        // NOTE: exactly lower_bound does not close, exactly upper_bound on a pair does not either
        let input = items(&[("a", 400.0), ("b", 1.0), ("c", 1.0)]);
        let (batches, _) = build_batches(&input, &policy(), CATEGORIES).unwrap();
        assert_eq!(partition(&batches), vec![vec!["a", "b"], vec!["c"]]);

        let input = items(&[("a", 600.0), ("b", 1.0)]);
        let (batches, _) = build_batches(&input, &policy(), CATEGORIES).unwrap();
        assert_eq!(partition(&batches), vec![vec!["a"], vec!["b"]]);
    }

    #[test]
    fn test_overflow_split_requires_more_than_one_item() {
        let input = items(&[("a", 200.0), ("b", 150.0), ("c", 300.0), ("d", 500.0)]);
        let (batches, _) = build_batches(&input, &policy(), CATEGORIES).unwrap();

        // a+b=350 carried, c would overflow (650) -> split, then c+d=800 flushed last
        assert_eq!(partition(&batches), vec![vec!["a", "b"], vec!["c", "d"]]);
        assert_eq!(batches[1].total_size, 800.0);
    }

    #[test]
    fn test_undersized_batches_are_carried_forward() {
        let input = items(&[("a", 50.0), ("b", 50.0), ("c", 50.0), ("d", 300.0)]);
        let (batches, _) = build_batches(&input, &policy(), CATEGORIES).unwrap();

        assert_eq!(partition(&batches), vec![vec!["a", "b", "c", "d"]]);
        assert_eq!(batches[0].total_size, 450.0);
    }

    #[test]
    fn test_empty_input_yields_no_batches() {
        let (batches, report) = build_batches(&[], &policy(), CATEGORIES).unwrap();

        assert!(batches.is_empty());
        assert_eq!(report.batches_created, 0);
        assert_eq!(report.items_total, 0);
    }

    #[test]
    fn test_category_counts() {
        let input = vec![
            Item::new("a", 100.0, "WGS"),
            Item::new("b", 100.0, "RNA-Seq"),
            Item::new("c", 250.0, "RNA-Seq"),
        ];
        let (_, report) = build_batches(&input, &policy(), CATEGORIES).unwrap();

        assert_eq!(report.category_count("WGS"), 1);
        assert_eq!(report.category_count("RNA-Seq"), 2);
        assert_eq!(report.category_count("ChIP-Seq"), 0);
    }

    #[test]
    fn test_invalid_sizes_and_policies() {
        let input = items(&[("neg", -1.0)]);
        assert!(matches!(
            build_batches(&input, &policy(), CATEGORIES),
            Err(BatchError::InvalidSize { .. })
        ));

        assert!(BatchingPolicy::new(600.0, 400.0).is_err());
        assert!(BatchingPolicy::new(400.0, 400.0).is_err());
        assert!(BatchingPolicy::new(0.0, 400.0).is_err());
        assert!(BatchingPolicy::new(f64::NAN, 400.0).is_err());
    }

    #[test]
    fn test_batch_indices_follow_input_order() {
        let input = items(&[
            ("a", 450.0),
            ("b", 700.0),
            ("c", 300.0),
            ("d", 200.0),
            ("e", 10.0),
        ]);
        let (batches, _) = build_batches(&input, &policy(), CATEGORIES).unwrap();

        let indices = batches.iter().map(|b| b.index).collect::<Vec<_>>();
        assert_eq!(indices, (1..=batches.len()).collect::<Vec<_>>());

        let flat = batches
            .iter()
            .flat_map(|b| b.ids())
            .collect::<Vec<_>>();
        assert_eq!(flat, vec!["a", "b", "c", "d", "e"]);
    }

    #[test]
    fn test_reconcile_reports_missing_ids() {
        let input = items(&[("a", 1.0), ("b", 2.0), ("a", 3.0)]);
        let batches = vec![Batch {
            index: 1,
            items: vec![input[0].clone()],
            total_size: 1.0,
        }];

        assert_eq!(reconcile(&input, &batches), vec!["b", "a"]);
    }

    #[test]
    fn test_label() {
        let input = items(&[("A", 250.0), ("B", 200.0)]);
        let (batches, _) = build_batches(&input, &policy(), CATEGORIES).unwrap();

        assert_eq!(batches[0].label("BRCA"), "BRCA_1_task_2_files_450.00Gb");
    }
}
