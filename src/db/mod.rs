// Position persistence
pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::CoreError;
use crate::models::Position;

pub use memory::InMemoryPositionRepository;
pub use postgres::PostgresPositionRepository;

/// Durable store of position records
///
/// Rows are never deleted. `close` is a conditional single-row update guarded by
/// `status = OPEN`, so concurrent monitors cannot close the same position twice.
#[async_trait]
pub trait PositionRepository: Send + Sync {
    async fn insert(&self, position: &Position) -> Result<(), CoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<Position>, CoreError>;

    /// All OPEN positions, oldest first
    async fn open_positions(&self) -> Result<Vec<Position>, CoreError>;

    /// Last writer wins; ignored for positions that are no longer OPEN
    async fn update_unrealized_pnl(&self, id: Uuid, unrealized_pnl: f64) -> Result<(), CoreError>;

    /// Persist the terminal fields of `closed`. Returns false if the row was not OPEN.
    async fn close(&self, closed: &Position) -> Result<bool, CoreError>;
}
