//! Wizard progress tracking
//!
//! The progress marker `foris.wizard.allowed_step_max` lives in the config
//! store and only ever grows. Every read goes to the store so that several
//! frontends and restarts agree on it. Completing a step writes the step's
//! own settings and the advanced marker in one transaction.

use crate::{
    config_tree::{EditTransaction, QueryResult},
    uci_client::{ConfigStore, Filter, StoreError},
};
use log::{debug, info, warn};
use serde::Serialize;
use thiserror::Error;

pub const PROGRESS_PATH: &str = "foris.wizard.allowed_step_max";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum WizardStep {
    Password = 1,
    NetworkMode = 2,
    ConnectivityCheck = 3,
    TimeSync = 4,
    FirmwareUpdate = 5,
    Finish = 6,
}

impl WizardStep {
    pub const ALL: [WizardStep; 6] = [
        WizardStep::Password,
        WizardStep::NetworkMode,
        WizardStep::ConnectivityCheck,
        WizardStep::TimeSync,
        WizardStep::FirmwareUpdate,
        WizardStep::Finish,
    ];

    /// Marker value of a finished wizard.
    pub const COMPLETED: u32 = Self::ALL.len() as u32 + 1;

    pub fn from_number(number: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|step| step.number() == number)
    }

    pub fn number(self) -> u32 {
        self as u32
    }

    pub fn title(self) -> &'static str {
        match self {
            WizardStep::Password => "Password",
            WizardStep::NetworkMode => "Network mode",
            WizardStep::ConnectivityCheck => "Connectivity check",
            WizardStep::TimeSync => "Time settings",
            WizardStep::FirmwareUpdate => "Firmware update",
            WizardStep::Finish => "Finish",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepAccess {
    Allow,
    Redirect(u32),
}

/// Persisted wizard marker; `0` means not started.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct WizardProgress(u32);

impl WizardProgress {
    pub fn new(allowed_max: u32) -> Self {
        Self(allowed_max)
    }

    pub fn allowed_max(self) -> u32 {
        self.0
    }

    /// Highest step that may be visited. The first step is open even before
    /// anything was persisted.
    pub fn furthest_step(self) -> u32 {
        self.0.clamp(1, WizardStep::COMPLETED - 1)
    }

    pub fn is_completed(self) -> bool {
        self.0 >= WizardStep::COMPLETED
    }

    pub fn guard(self, requested: u32) -> StepAccess {
        let furthest = self.furthest_step();
        if (1..=furthest).contains(&requested) {
            StepAccess::Allow
        } else {
            StepAccess::Redirect(requested.min(furthest).max(1))
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepCompletion {
    /// The marker was moved past the step.
    Advanced(WizardProgress),
    /// The marker was already past the step; it was left alone.
    AlreadyCompleted(WizardProgress),
}

impl StepCompletion {
    pub fn progress(self) -> WizardProgress {
        match self {
            StepCompletion::Advanced(progress) | StepCompletion::AlreadyCompleted(progress) => {
                progress
            }
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq)]
pub enum StepError {
    #[error("step {requested} is not available, furthest allowed step is {allowed}")]
    OutOfOrder { requested: u32, allowed: u32 },
    /// The write's effect is unknown and could not be confirmed.
    #[error("step completion not confirmed: {0}")]
    NotConfirmed(StoreError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct WizardService;

impl WizardService {
    /// Current marker, read from the store.
    pub async fn progress<Store>(store: &Store) -> Result<WizardProgress, StoreError>
    where
        Store: ConfigStore,
    {
        let result = store.query(Filter::foris()).await?;
        Ok(Self::progress_from(&result))
    }

    /// Marker in a query result. Absent means not started, a value that is
    /// not a number is treated the same way.
    pub fn progress_from(result: &QueryResult) -> WizardProgress {
        match result.value(PROGRESS_PATH) {
            None => WizardProgress::default(),
            Some(value) => value.trim().parse().map(WizardProgress).unwrap_or_else(|e| {
                warn!("ignoring malformed wizard marker '{value}': {e}");
                WizardProgress::default()
            }),
        }
    }

    pub fn marker_edit(allowed_max: u32) -> EditTransaction {
        let mut edit = EditTransaction::new();
        edit.set("foris", "wizard", "config", "allowed_step_max", allowed_max);
        edit
    }

    /// Complete step `step`, applying `step_edit` with the marker advance.
    ///
    /// A step behind the marker is accepted again: its edit is applied on
    /// its own and the marker is not written. When the store leaves the
    /// outcome of the write unknown the marker is re-read, and the step only
    /// counts as completed if the store shows it.
    pub async fn complete_step<Store>(
        store: &Store,
        step: u32,
        step_edit: EditTransaction,
    ) -> Result<StepCompletion, StepError>
    where
        Store: ConfigStore,
    {
        debug!("complete_step() called");

        let progress = Self::progress(store).await?;
        let furthest = progress.furthest_step();
        if step == 0 || step > furthest {
            return Err(StepError::OutOfOrder {
                requested: step,
                allowed: furthest,
            });
        }

        let next = step + 1;
        if progress.allowed_max() >= next {
            if !step_edit.is_empty() {
                store.apply(step_edit).await.map_err(|e| {
                    if e.is_outcome_unknown() {
                        StepError::NotConfirmed(e)
                    } else {
                        StepError::Store(e)
                    }
                })?;
            }
            return Ok(StepCompletion::AlreadyCompleted(progress));
        }

        let mut edit = step_edit;
        edit.merge(Self::marker_edit(next));

        match store.apply(edit).await {
            Ok(()) => {
                info!("wizard advanced to step {next}");
                Ok(StepCompletion::Advanced(WizardProgress(next)))
            }
            Err(e) if e.is_outcome_unknown() => {
                warn!("completing step {step} left the store in an unknown state: {e}");
                let confirmed = Self::progress(store)
                    .await
                    .map_err(StepError::NotConfirmed)?;
                if confirmed.allowed_max() >= next {
                    info!("wizard advance to step {next} confirmed");
                    Ok(StepCompletion::Advanced(confirmed))
                } else {
                    Err(StepError::NotConfirmed(e))
                }
            }
            Err(e) => Err(StepError::Store(e)),
        }
    }
}
