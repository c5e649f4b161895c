use crate::status::EngineStatus;
use power_driver_skstack::SkError;
use thiserror::Error;

pub type EngineResult<T> = std::result::Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum EngineError {
    /// `start` is only valid from `Ready`.
    #[error("Engine cannot start from status {status}")]
    AlreadyStarted { status: EngineStatus },

    #[error("Engine must be started from within a Tokio runtime")]
    NoRuntime,

    /// Opening the modem or associating with the meter failed; the engine
    /// never reached `Started`.
    #[error("Initialization failed: {0}")]
    Initialization(#[source] SkError),

    /// The steady-state loop ended on a fatal driver error.
    #[error("Meter link failed: {0}")]
    Link(#[source] SkError),

    #[error("Acquisition worker panicked")]
    WorkerPanicked,
}
