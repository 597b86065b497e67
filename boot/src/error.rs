use crate::state::BootState;
use thiserror::Error;
use vphone_archive::ArchiveError;
use vphone_display::DisplayError;
use vphone_provision::ProvisionError;
use vphone_shim::ShimError;

#[derive(Error, Debug)]
pub enum BootError {
    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Shim(#[from] ShimError),

    #[error(transparent)]
    Display(#[from] DisplayError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("boot already started (state: {0})")]
    AlreadyStarted(BootState),

    #[error("invalid state transition from {from} to {to}")]
    InvalidTransition { from: BootState, to: BootState },

    #[error("boot task failed: {0}")]
    Join(String),
}
