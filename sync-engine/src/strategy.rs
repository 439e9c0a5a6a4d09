use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncDirection {
    ClientToServer,
    ServerToClient,
    Bidirectional,
}

impl SyncDirection {
    pub fn client_may_send(self) -> bool {
        !matches!(self, SyncDirection::ServerToClient)
    }

    pub fn server_may_send(self) -> bool {
        !matches!(self, SyncDirection::ClientToServer)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictStrategy {
    ClientWins,
    ServerWins,
    FireEvent,
}

impl fmt::Display for SyncDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncDirection::ClientToServer => "CLIENT_TO_SERVER",
            SyncDirection::ServerToClient => "SERVER_TO_CLIENT",
            SyncDirection::Bidirectional => "BIDIRECTIONAL",
        };
        f.write_str(name)
    }
}

impl fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConflictStrategy::ClientWins => "CLIENT_WINS",
            ConflictStrategy::ServerWins => "SERVER_WINS",
            ConflictStrategy::FireEvent => "FIRE_EVENT",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Deserialize)]
struct RawStrategy {
    direction: SyncDirection,
    strategy: ConflictStrategy,
}

/// A validated `(direction, strategy)` pair. Only constructible through
/// [`TableSyncStrategy::new`], so an invalid pair can never reach the resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawStrategy")]
pub struct TableSyncStrategy {
    direction: SyncDirection,
    strategy: ConflictStrategy,
}

impl TableSyncStrategy {
    pub fn new(direction: SyncDirection, strategy: ConflictStrategy) -> Result<Self> {
        use ConflictStrategy::*;
        use SyncDirection::*;

        match (direction, strategy) {
            (Bidirectional, _) | (ClientToServer, ClientWins) | (ServerToClient, ServerWins) => {
                Ok(Self { direction, strategy })
            }
            (ClientToServer, ServerWins | FireEvent) | (ServerToClient, ClientWins | FireEvent) => {
                Err(Error::Config(format!(
                    "invalid sync strategy: direction {} cannot be combined with {}",
                    direction, strategy
                )))
            }
        }
    }

    pub fn direction(&self) -> SyncDirection {
        self.direction
    }

    pub fn strategy(&self) -> ConflictStrategy {
        self.strategy
    }
}

impl Default for TableSyncStrategy {
    fn default() -> Self {
        Self {
            direction: SyncDirection::Bidirectional,
            strategy: ConflictStrategy::ServerWins,
        }
    }
}

impl TryFrom<RawStrategy> for TableSyncStrategy {
    type Error = Error;

    fn try_from(raw: RawStrategy) -> Result<Self> {
        Self::new(raw.direction, raw.strategy)
    }
}
