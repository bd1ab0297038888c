// formats
pub const BAM: &str = "bam";
pub const TSV: &str = "tsv";

// config pub const keys
pub const PROJECT: &str = "project";
pub const DISEASE: &str = "disease";
pub const APP: &str = "app";
pub const LOG_FILE: &str = "log-file";

// project-wide pub const | names
pub const TASK_PREFIX: &str = "bam2fasta";
pub const JOBS: &str = "jobs";
pub const NF_RUNNER: &str = "execute_joblist.nf";

// default filenames
pub const DEFAULT_CONFIG: &str = "config.toml";
pub const DEFAULT_MANIFEST: &str = "bams.tsv";
pub const DEFAULT_LEDGER: &str = "tasks.toml";

// batching defaults (GB)
pub const DEFAULT_LOWER_BOUND: f64 = 400.0;
pub const DEFAULT_UPPER_BOUND: f64 = 600.0;
pub const DEFAULT_MAX_PER_RUN: usize = 10;
pub const BYTES_PER_GB: f64 = 1073741824.0;

// miscellaneous constants
pub const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
pub const TASK_ID_LEN: usize = 8;

// collections
pub const SPECIAL_PARAMETER: &[&str] = &["secondary"];
pub const DEFAULT_CATEGORIES: &[&str] = &["WGS", "RNA-Seq"];
