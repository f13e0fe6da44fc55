//! Batch-scheduler job identification.
//!
//! A pilot usually runs inside a batch allocation. When it claims a token the
//! scheduler's job id is recorded, so an operator can map a stuck token back
//! to the allocation that held it. Submission systems can be layered (a WMS
//! job running on CREAM running on PBS), so only the outermost id is kept.

/// Token field holding the id as a plain string.
pub const JOB_ID_FIELD: &str = "job_id";

/// Per-scheduler id fields written by older clients. Removed whenever the
/// job id is rewritten or cleared.
pub const LEGACY_JOB_ID_FIELDS: [&str; 5] = [
    "dirac_job_id",
    "wms_job_id",
    "cream_job_id",
    "pbs_job_id",
    "slurm_job_id",
];

/// Kind of scheduler the id came from. Kept in memory only; the token
/// stores the bare id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheduler {
    Dirac,
    Wms,
    Cream,
    Pbs,
    Slurm,
}

/// The batch job a token was claimed from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchJob {
    pub scheduler: Scheduler,
    pub id: String,
}

impl BatchJob {
    pub fn new(scheduler: Scheduler, id: impl Into<String>) -> Self {
        Self {
            scheduler,
            id: id.into(),
        }
    }

    /// Detect the job id from the process environment.
    pub fn from_env() -> Option<Self> {
        Self::detect(|key| std::env::var(key).ok())
    }

    /// Detect the job id through `lookup`, highest-level scheduler first.
    ///
    /// A `GLITE_WMS_JOBID` that is not an URL is ignored and stops the search,
    /// since the lower-level ids then belong to the WMS, not to the pilot.
    pub fn detect<F>(lookup: F) -> Option<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(id) = lookup("DIRACJOBID") {
            return Some(Self::new(Scheduler::Dirac, id));
        }
        if let Some(id) = lookup("GLITE_WMS_JOBID") {
            return id
                .starts_with("http")
                .then(|| Self::new(Scheduler::Wms, id));
        }
        if let Some(id) = lookup("CREAM_JOBID") {
            return Some(Self::new(Scheduler::Cream, id));
        }
        if let Some(id) = lookup("PBS_JOBID") {
            return Some(Self::new(Scheduler::Pbs, id));
        }
        if let Some(array_id) = lookup("SLURM_ARRAY_JOB_ID") {
            let id = match lookup("SLURM_ARRAY_TASK_ID") {
                Some(task_id) => format!("{array_id}_{task_id}"),
                None => array_id,
            };
            return Some(Self::new(Scheduler::Slurm, id));
        }
        lookup("SLURM_JOB_ID").map(|id| Self::new(Scheduler::Slurm, id))
    }
}
