use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::PositionRepository;
use crate::error::CoreError;
use crate::models::{Position, PositionStatus};

/// Process-local repository for dry runs and tests
#[derive(Clone, Default)]
pub struct InMemoryPositionRepository {
    positions: Arc<RwLock<HashMap<Uuid, Position>>>,
}

impl InMemoryPositionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all(&self) -> Vec<Position> {
        let positions = self.positions.read().await;
        let mut all: Vec<Position> = positions.values().cloned().collect();
        all.sort_by_key(|p| p.opened_at);
        all
    }
}

#[async_trait]
impl PositionRepository for InMemoryPositionRepository {
    async fn insert(&self, position: &Position) -> Result<(), CoreError> {
        let mut positions = self.positions.write().await;
        if positions.contains_key(&position.id) {
            return Err(CoreError::Persistence(format!(
                "position {} already exists",
                position.id
            )));
        }
        positions.insert(position.id, position.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Position>, CoreError> {
        Ok(self.positions.read().await.get(&id).cloned())
    }

    async fn open_positions(&self) -> Result<Vec<Position>, CoreError> {
        let positions = self.positions.read().await;
        let mut open: Vec<Position> = positions
            .values()
            .filter(|p| p.status == PositionStatus::Open)
            .cloned()
            .collect();
        open.sort_by_key(|p| p.opened_at);
        Ok(open)
    }

    async fn update_unrealized_pnl(&self, id: Uuid, unrealized_pnl: f64) -> Result<(), CoreError> {
        let mut positions = self.positions.write().await;
        if let Some(position) = positions.get_mut(&id) {
            if position.status == PositionStatus::Open {
                position.unrealized_pnl = unrealized_pnl;
            }
        }
        Ok(())
    }

    async fn close(&self, closed: &Position) -> Result<bool, CoreError> {
        let mut positions = self.positions.write().await;
        match positions.get_mut(&closed.id) {
            Some(current) if current.status == PositionStatus::Open => {
                *current = closed.clone();
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(CoreError::Persistence(format!(
                "position {} not found",
                closed.id
            ))),
        }
    }
}
