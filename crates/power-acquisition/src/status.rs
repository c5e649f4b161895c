use std::fmt;

/// Engine lifecycle.
///
/// ```text
/// Ready -> Starting -> Started -> Stopping -> Stopped
///              \__________________________/^
///                  initialization failure
/// ```
///
/// Transitions only move forward. `Stopped` is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EngineStatus {
    Ready,
    Starting,
    Started,
    Stopping,
    Stopped,
}

impl EngineStatus {
    pub fn is_running(self) -> bool {
        matches!(self, Self::Starting | Self::Started | Self::Stopping)
    }
}

impl fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ready => "Ready",
            Self::Starting => "Starting",
            Self::Started => "Started",
            Self::Stopping => "Stopping",
            Self::Stopped => "Stopped",
        };
        f.write_str(name)
    }
}
