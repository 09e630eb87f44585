use crate::agentsim::model::BackendError;
use crate::agentsim::simulation::RunStatus;
use std::error::Error;
use std::fmt;

/// Errors returned by [`Orchestrator`](crate::Orchestrator) operations.
///
/// None of these are fatal to the process; callers decide how to recover.
///
/// # Examples
///
/// ```
/// use agentsim::SimulationError;
///
/// let err = SimulationError::NotFound("1234".into());
/// assert_eq!(err.to_string(), "Simulation 1234 not found");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum SimulationError {
    /// No run is registered under this identifier.
    NotFound(String),

    /// The run exists but holds no turn with this index.
    TurnNotFound { simulation_id: String, turn: usize },

    /// `run` was called while the turn loop is already executing.
    AlreadyRunning(String),

    /// The operation is not allowed from the run's current status (e.g. running a
    /// completed run without truncating it first).
    InvalidState {
        simulation_id: String,
        status: RunStatus,
    },

    /// A [`RunConfig`](crate::simulation::RunConfig) or a previewed turn failed validation.
    InvalidConfig(String),

    /// The language-model backend failed; propagated without modification.
    Backend(BackendError),
}

impl SimulationError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            SimulationError::NotFound(_) | SimulationError::TurnNotFound { .. }
        )
    }

    pub fn is_invalid_state(&self) -> bool {
        matches!(
            self,
            SimulationError::AlreadyRunning(_) | SimulationError::InvalidState { .. }
        )
    }
}

impl fmt::Display for SimulationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimulationError::NotFound(id) => write!(f, "Simulation {} not found", id),
            SimulationError::TurnNotFound {
                simulation_id,
                turn,
            } => write!(
                f,
                "Message with turn {} not found in simulation {}",
                turn, simulation_id
            ),
            SimulationError::AlreadyRunning(id) => {
                write!(f, "Simulation {} is already running", id)
            }
            SimulationError::InvalidState {
                simulation_id,
                status,
            } => write!(
                f,
                "Simulation {} cannot do that while {}",
                simulation_id, status
            ),
            SimulationError::InvalidConfig(msg) => write!(f, "Invalid configuration: {}", msg),
            SimulationError::Backend(err) => write!(f, "{}", err),
        }
    }
}

impl Error for SimulationError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SimulationError::Backend(err) => Some(err),
            _ => None,
        }
    }
}

impl From<BackendError> for SimulationError {
    fn from(err: BackendError) -> Self {
        SimulationError::Backend(err)
    }
}
