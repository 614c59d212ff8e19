use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::OnConflict, ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, TransactionTrait,
};

use bridge_relay_entity::{batches, lock_records, listener_cursors, messages, sea_orm_active_enums};

use crate::error::StoreError;
use crate::message::{is_legal_transition, CrossChainMessage, MessageKind, Status};
use crate::store::{BatchRecord, BatchState, Cursor, LockRecord, Store, StoreStats};

/// PostgreSQL-backed implementation of the store contract, reached through a
/// pooled `sea-orm` connection the way every durable sink in this workspace is.
pub struct PostgresStore {
    db: DatabaseConnection,
}

impl PostgresStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

fn model_to_message(model: messages::Model) -> CrossChainMessage {
    CrossChainMessage {
        id: model.id,
        kind: MessageKind::from(model.r#type),
        source_chain: model.source_chain,
        destination_chain: model.destination_chain,
        source_tx_hash: model.source_tx_hash,
        source_block: model.source_block.max(0) as u64,
        source_log_index: model.source_log_index.max(0) as u32,
        sender: model.sender,
        recipient: model.recipient,
        token_contract: model.token_contract,
        amount: model.amount,
        nonce: model.nonce.max(0) as u64,
        timestamp: model.timestamp,
        status: Status::from(model.status),
        attempts: model.attempts.max(0) as u32,
        last_error: model.last_error,
        batch_id: model.batch_id,
    }
}

fn message_to_active_model(msg: &CrossChainMessage) -> messages::ActiveModel {
    let now = Utc::now();
    messages::ActiveModel {
        id: Set(msg.id.clone()),
        r#type: Set(msg.kind.into()),
        source_chain: Set(msg.source_chain.clone()),
        destination_chain: Set(msg.destination_chain.clone()),
        source_tx_hash: Set(msg.source_tx_hash.clone()),
        source_block: Set(msg.source_block as i64),
        source_log_index: Set(msg.source_log_index as i32),
        sender: Set(msg.sender.clone()),
        recipient: Set(msg.recipient.clone()),
        token_contract: Set(msg.token_contract.clone()),
        amount: Set(msg.amount),
        nonce: Set(msg.nonce as i64),
        timestamp: Set(msg.timestamp),
        status: Set(msg.status.into()),
        attempts: Set(msg.attempts as i32),
        last_error: Set(msg.last_error.clone()),
        batch_id: Set(msg.batch_id.clone()),
        created_at: Set(now),
        updated_at: Set(now),
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn save_message(&self, msg: &CrossChainMessage) -> Result<bool, StoreError> {
        let active = message_to_active_model(msg);
        let result = messages::Entity::insert(active)
            .on_conflict(OnConflict::column(messages::Column::Id).do_nothing().to_owned())
            .exec(&self.db)
            .await;
        match result {
            Ok(_) => Ok(true),
            // sea-orm surfaces a fully-skipped `DO NOTHING` conflict as
            // `RecordNotInserted` rather than an error; that is our
            // duplicate-replay short circuit (§8 "Duplicate").
            Err(sea_orm::DbErr::RecordNotInserted) => Ok(false),
            Err(e) => Err(StoreError::Db(e)),
        }
    }

    async fn update_status(
        &self,
        id: &str,
        new_status: Status,
        batch_id: Option<&str>,
        last_error: Option<&str>,
        attempts: Option<u32>,
    ) -> Result<(), StoreError> {
        let txn = self.db.begin().await?;

        let current = messages::Entity::find_by_id(id)
            .one(&txn)
            .await?
            .ok_or_else(|| StoreError::Duplicate(id.to_string()))?;
        let from = Status::from(current.status);
        if from != new_status && !is_legal_transition(from, new_status) {
            return Err(StoreError::IllegalTransition {
                id: id.to_string(),
                from: from.to_string(),
                to: new_status.to_string(),
            });
        }

        let mut active = messages::ActiveModel {
            id: Set(id.to_string()),
            status: Set(new_status.into()),
            updated_at: Set(Utc::now()),
            ..Default::default()
        };
        if let Some(b) = batch_id {
            active.batch_id = Set(Some(b.to_string()));
        }
        if let Some(err) = last_error {
            active.last_error = Set(Some(err.to_string()));
        }
        if let Some(a) = attempts {
            active.attempts = Set(a as i32);
        }
        messages::Entity::update(active)
            .filter(messages::Column::Id.eq(id))
            .exec(&txn)
            .await?;

        txn.commit().await?;
        Ok(())
    }

    async fn get_message(&self, id: &str) -> Result<Option<CrossChainMessage>, StoreError> {
        let model = messages::Entity::find_by_id(id).one(&self.db).await?;
        Ok(model.map(model_to_message))
    }

    async fn list_by_address(&self, address: &str) -> Result<Vec<CrossChainMessage>, StoreError> {
        let models = messages::Entity::find()
            .filter(
                messages::Column::Sender
                    .eq(address)
                    .or(messages::Column::Recipient.eq(address)),
            )
            .order_by_desc(messages::Column::Timestamp)
            .all(&self.db)
            .await?;
        Ok(models.into_iter().map(model_to_message).collect())
    }

    async fn list_pending(&self, source: &str, destination: &str, limit: u64) -> Result<Vec<CrossChainMessage>, StoreError> {
        let models = messages::Entity::find()
            .filter(messages::Column::SourceChain.eq(source))
            .filter(messages::Column::DestinationChain.eq(destination))
            .filter(messages::Column::Status.eq(sea_orm_active_enums::MessageStatus::Queued))
            .order_by_asc(messages::Column::Timestamp)
            .order_by_asc(messages::Column::Id)
            .limit(limit)
            .all(&self.db)
            .await?;
        Ok(models.into_iter().map(model_to_message).collect())
    }

    async fn list_detected(&self, limit: u64) -> Result<Vec<CrossChainMessage>, StoreError> {
        let models = messages::Entity::find()
            .filter(messages::Column::Status.eq(sea_orm_active_enums::MessageStatus::Detected))
            .order_by_asc(messages::Column::Timestamp)
            .limit(limit)
            .all(&self.db)
            .await?;
        Ok(models.into_iter().map(model_to_message).collect())
    }

    /// Optimistic concurrency: update only rows still `Queued`, then read
    /// back which ids actually landed in this batch. Lost races are simply
    /// absent from the returned set.
    async fn claim_for_batch(&self, ids: &[String], batch_id: &str) -> Result<Vec<String>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let txn = self.db.begin().await?;

        messages::Entity::update_many()
            .col_expr(messages::Column::Status, sea_orm::sea_query::Expr::value(sea_orm_active_enums::MessageStatus::Batched))
            .col_expr(messages::Column::BatchId, sea_orm::sea_query::Expr::value(batch_id))
            .col_expr(messages::Column::UpdatedAt, sea_orm::sea_query::Expr::value(Utc::now()))
            .filter(messages::Column::Id.is_in(ids.to_vec()))
            .filter(messages::Column::Status.eq(sea_orm_active_enums::MessageStatus::Queued))
            .exec(&txn)
            .await?;

        let winners = messages::Entity::find()
            .filter(messages::Column::BatchId.eq(batch_id))
            .filter(messages::Column::Id.is_in(ids.to_vec()))
            .all(&txn)
            .await?
            .into_iter()
            .map(|m| m.id)
            .collect();

        txn.commit().await?;
        Ok(winners)
    }

    async fn save_lock_record(&self, record: &LockRecord) -> Result<(), StoreError> {
        let active = lock_records::ActiveModel {
            id: Set(record.id.clone()),
            chain: Set(record.chain.clone()),
            contract: Set(record.contract.clone()),
            sender: Set(record.sender.clone()),
            token: Set(record.token.clone()),
            amount: Set(record.amount),
            block: Set(record.block as i64),
            timestamp: Set(record.timestamp),
            matched_message_id: Set(None),
        };
        lock_records::Entity::insert(active)
            .on_conflict(OnConflict::column(lock_records::Column::Id).do_nothing().to_owned())
            .exec(&self.db)
            .await
            .map(|_| ())
            .or_else(|e| match e {
                sea_orm::DbErr::RecordNotInserted => Ok(()),
                other => Err(StoreError::Db(other)),
            })
    }

    async fn list_unmatched_locks(&self, chain: &str) -> Result<Vec<LockRecord>, StoreError> {
        let models = lock_records::Entity::find()
            .filter(lock_records::Column::Chain.eq(chain))
            .filter(lock_records::Column::MatchedMessageId.is_null())
            .all(&self.db)
            .await?;
        Ok(models
            .into_iter()
            .map(|m| LockRecord {
                id: m.id,
                chain: m.chain,
                contract: m.contract,
                sender: m.sender,
                token: m.token,
                amount: m.amount,
                block: m.block.max(0) as u64,
                timestamp: m.timestamp,
            })
            .collect())
    }

    async fn load_cursor(&self, chain: &str) -> Result<Option<Cursor>, StoreError> {
        let model = listener_cursors::Entity::find_by_id(chain).one(&self.db).await?;
        Ok(model.map(|m| Cursor {
            last_block: m.last_block.max(0) as u64,
            last_block_hash: m.last_block_hash,
        }))
    }

    async fn save_cursor(&self, chain: &str, cursor: &Cursor) -> Result<(), StoreError> {
        let active = listener_cursors::ActiveModel {
            chain: Set(chain.to_string()),
            last_block: Set(cursor.last_block as i64),
            last_block_hash: Set(cursor.last_block_hash.clone()),
            updated_at: Set(Utc::now()),
        };
        listener_cursors::Entity::insert(active)
            .on_conflict(
                OnConflict::column(listener_cursors::Column::Chain)
                    .update_columns([
                        listener_cursors::Column::LastBlock,
                        listener_cursors::Column::LastBlockHash,
                        listener_cursors::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec(&self.db)
            .await?;
        Ok(())
    }

    async fn insert_batch(&self, batch: &BatchRecord) -> Result<(), StoreError> {
        let active = batches::ActiveModel {
            batch_id: Set(batch.batch_id.clone()),
            source: Set(batch.source.clone()),
            destination: Set(batch.destination.clone()),
            state: Set(batch_state_to_entity(batch.state)),
            created_at: Set(batch.created_at),
            dispatched_at: Set(batch.dispatched_at),
            message_count: Set(batch.message_count as i32),
            total_value: Set(batch.total_value),
        };
        batches::Entity::insert(active).exec(&self.db).await?;
        Ok(())
    }

    async fn update_batch_state(&self, batch_id: &str, state: BatchState, dispatched_at: Option<DateTime<Utc>>) -> Result<(), StoreError> {
        let mut active = batches::ActiveModel {
            batch_id: Set(batch_id.to_string()),
            state: Set(batch_state_to_entity(state)),
            ..Default::default()
        };
        if let Some(at) = dispatched_at {
            active.dispatched_at = Set(Some(at));
        }
        batches::Entity::update(active)
            .filter(batches::Column::BatchId.eq(batch_id))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    async fn get_batch_stats(&self) -> Result<StoreStats, StoreError> {
        let pending_batches = batches::Entity::find()
            .filter(batches::Column::State.is_in([
                sea_orm_active_enums::BatchState::Accumulating,
                sea_orm_active_enums::BatchState::Ready,
            ]))
            .all(&self.db)
            .await?;
        let pending_messages = messages::Entity::find()
            .filter(messages::Column::Status.eq(sea_orm_active_enums::MessageStatus::Queued))
            .all(&self.db)
            .await?;
        let total_value_locked = pending_messages.iter().fold(Decimal::ZERO, |acc, m| acc + m.amount);
        Ok(StoreStats {
            pending_batch_count: pending_batches.len() as u64,
            pending_message_count: pending_messages.len() as u64,
            total_value_locked,
        })
    }
}

fn batch_state_to_entity(state: BatchState) -> sea_orm_active_enums::BatchState {
    match state {
        BatchState::Accumulating => sea_orm_active_enums::BatchState::Accumulating,
        BatchState::Ready => sea_orm_active_enums::BatchState::Ready,
        BatchState::Dispatched => sea_orm_active_enums::BatchState::Dispatched,
        BatchState::Acknowledged => sea_orm_active_enums::BatchState::Acknowledged,
        BatchState::Failed => sea_orm_active_enums::BatchState::Failed,
    }
}
