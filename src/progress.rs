//! Job stage tracking
//!
//! The job moves through a fixed sequence of stages. [`JobTracker`] records
//! each transition with a timestamp and notifies registered observers;
//! [`LogObserver`] writes every transition to the log.

use chrono::{DateTime, Utc};
use log::{error, info};
use serde::{Deserialize, Serialize};

/// Stages of a voice-clone job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStage {
    Pending,
    Fetching,
    Preprocessing,
    Synthesizing,
    Uploading,
    Done,
    Failed,
}

impl JobStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Fetching => "fetching",
            Self::Preprocessing => "preprocessing",
            Self::Synthesizing => "synthesizing",
            Self::Uploading => "uploading",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    /// Done and Failed are final
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl std::fmt::Display for JobStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded transition
#[derive(Debug, Clone, Serialize)]
pub struct StageEvent {
    pub stage: JobStage,
    pub at: DateTime<Utc>,
    /// Failure message for [`JobStage::Failed`]
    pub detail: Option<String>,
}

/// Receives stage transitions
pub trait StageObserver: Send + Sync {
    fn on_stage(&self, job_id: &str, event: &StageEvent);
}

/// Logs every transition
#[derive(Debug, Default)]
pub struct LogObserver;

impl StageObserver for LogObserver {
    fn on_stage(&self, job_id: &str, event: &StageEvent) {
        match (&event.stage, &event.detail) {
            (JobStage::Failed, Some(detail)) => error!("[job {}] failed: {}", job_id, detail),
            (stage, _) => info!("[job {}] stage: {}", job_id, stage),
        }
    }
}

/// Stage history of one job
pub struct JobTracker {
    job_id: String,
    history: Vec<StageEvent>,
    /// Last non-terminal stage entered, reported when the job fails
    active: JobStage,
    observers: Vec<Box<dyn StageObserver>>,
}

impl JobTracker {
    /// Tracker in [`JobStage::Pending`] with no observers
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            history: vec![StageEvent {
                stage: JobStage::Pending,
                at: Utc::now(),
                detail: None,
            }],
            active: JobStage::Pending,
            observers: Vec::new(),
        }
    }

    /// Tracker with a [`LogObserver`] attached
    pub fn with_logging(job_id: impl Into<String>) -> Self {
        let mut tracker = Self::new(job_id);
        tracker.add_observer(Box::new(LogObserver));
        tracker
    }

    pub fn add_observer(&mut self, observer: Box<dyn StageObserver>) {
        self.observers.push(observer);
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn current(&self) -> JobStage {
        self.history
            .last()
            .map(|event| event.stage)
            .unwrap_or(JobStage::Pending)
    }

    pub fn history(&self) -> &[StageEvent] {
        &self.history
    }

    /// Enter `stage`; ignored once the job is finished
    pub fn enter(&mut self, stage: JobStage) {
        if self.current().is_terminal() {
            return;
        }
        if !stage.is_terminal() {
            self.active = stage;
        }
        self.record(stage, None);
    }

    /// Move to [`JobStage::Failed`] and return the stage the job failed in
    pub fn fail(&mut self, detail: impl Into<String>) -> JobStage {
        if !self.current().is_terminal() {
            self.record(JobStage::Failed, Some(detail.into()));
        }
        self.active
    }

    fn record(&mut self, stage: JobStage, detail: Option<String>) {
        let event = StageEvent {
            stage,
            at: Utc::now(),
            detail,
        };
        for observer in &self.observers {
            observer.on_stage(&self.job_id, &event);
        }
        self.history.push(event);
    }
}

impl std::fmt::Debug for JobTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobTracker")
            .field("job_id", &self.job_id)
            .field("current", &self.current())
            .field("observers", &self.observers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct Recorder(Arc<Mutex<Vec<JobStage>>>);

    impl StageObserver for Recorder {
        fn on_stage(&self, _job_id: &str, event: &StageEvent) {
            self.0.lock().unwrap().push(event.stage);
        }
    }

    #[test]
    fn stages_are_recorded_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut tracker = JobTracker::new("job-1");
        tracker.add_observer(Box::new(Recorder(seen.clone())));

        tracker.enter(JobStage::Fetching);
        tracker.enter(JobStage::Preprocessing);
        tracker.enter(JobStage::Done);

        let stages: Vec<JobStage> = tracker.history().iter().map(|e| e.stage).collect();
        assert_eq!(
            stages,
            vec![JobStage::Pending, JobStage::Fetching, JobStage::Preprocessing, JobStage::Done]
        );
        assert_eq!(*seen.lock().unwrap(), stages[1..].to_vec());
        assert!(tracker.history().windows(2).all(|w| w[0].at <= w[1].at));
    }

    #[test]
    fn failure_reports_active_stage_and_is_final() {
        let mut tracker = JobTracker::new("job-2");
        tracker.enter(JobStage::Fetching);
        tracker.enter(JobStage::Synthesizing);

        assert_eq!(tracker.fail("cuda oom"), JobStage::Synthesizing);
        assert_eq!(tracker.current(), JobStage::Failed);
        assert_eq!(tracker.history().last().unwrap().detail.as_deref(), Some("cuda oom"));

        tracker.enter(JobStage::Uploading);
        assert_eq!(tracker.current(), JobStage::Failed);
    }
}
