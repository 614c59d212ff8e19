use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Messages::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Messages::Id).string().not_null().primary_key())
                    .col(ColumnDef::new(Messages::Type).string().not_null())
                    .col(ColumnDef::new(Messages::SourceChain).string().not_null())
                    .col(ColumnDef::new(Messages::DestinationChain).string().not_null())
                    .col(ColumnDef::new(Messages::SourceTxHash).string().not_null())
                    .col(ColumnDef::new(Messages::SourceBlock).big_integer().not_null())
                    .col(ColumnDef::new(Messages::SourceLogIndex).integer().not_null())
                    .col(ColumnDef::new(Messages::Sender).string().not_null())
                    .col(ColumnDef::new(Messages::Recipient).string().not_null())
                    .col(ColumnDef::new(Messages::TokenContract).string().not_null())
                    .col(ColumnDef::new(Messages::Amount).decimal_len(78, 0).not_null())
                    .col(ColumnDef::new(Messages::Nonce).big_integer().not_null())
                    .col(ColumnDef::new(Messages::Timestamp).timestamp_with_time_zone().not_null())
                    .col(ColumnDef::new(Messages::Status).string().not_null())
                    .col(ColumnDef::new(Messages::Attempts).integer().not_null().default(0))
                    .col(ColumnDef::new(Messages::LastError).string().null())
                    .col(ColumnDef::new(Messages::BatchId).string().null())
                    .col(
                        ColumnDef::new(Messages::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Messages::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_messages_pending_by_pair")
                    .table(Messages::Table)
                    .col(Messages::SourceChain)
                    .col(Messages::DestinationChain)
                    .col(Messages::Status)
                    .col(Messages::Timestamp)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_messages_status")
                    .table(Messages::Table)
                    .col(Messages::Status)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_messages_sender_recipient")
                    .table(Messages::Table)
                    .col(Messages::Sender)
                    .col(Messages::Recipient)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Batches::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Batches::BatchId).string().not_null().primary_key())
                    .col(ColumnDef::new(Batches::Source).string().not_null())
                    .col(ColumnDef::new(Batches::Destination).string().not_null())
                    .col(ColumnDef::new(Batches::State).string().not_null())
                    .col(
                        ColumnDef::new(Batches::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(ColumnDef::new(Batches::DispatchedAt).timestamp_with_time_zone().null())
                    .col(ColumnDef::new(Batches::MessageCount).integer().not_null().default(0))
                    .col(ColumnDef::new(Batches::TotalValue).decimal_len(78, 0).not_null().default(0))
                    .to_owned(),
            )
            .await?;

        manager
            .create_foreign_key(
                ForeignKey::create()
                    .name("fk_messages_batch_id")
                    .from(Messages::Table, Messages::BatchId)
                    .to(Batches::Table, Batches::BatchId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(LockRecords::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(LockRecords::Id).string().not_null().primary_key())
                    .col(ColumnDef::new(LockRecords::Chain).string().not_null())
                    .col(ColumnDef::new(LockRecords::Contract).string().not_null())
                    .col(ColumnDef::new(LockRecords::Sender).string().not_null())
                    .col(ColumnDef::new(LockRecords::Token).string().not_null())
                    .col(ColumnDef::new(LockRecords::Amount).decimal_len(78, 0).not_null())
                    .col(ColumnDef::new(LockRecords::Block).big_integer().not_null())
                    .col(ColumnDef::new(LockRecords::Timestamp).timestamp_with_time_zone().not_null())
                    .col(ColumnDef::new(LockRecords::MatchedMessageId).string().null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(ListenerCursors::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(ListenerCursors::Chain).string().not_null().primary_key())
                    .col(ColumnDef::new(ListenerCursors::LastBlock).big_integer().not_null())
                    .col(ColumnDef::new(ListenerCursors::LastBlockHash).string().not_null())
                    .col(
                        ColumnDef::new(ListenerCursors::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ListenerCursors::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(LockRecords::Table).to_owned())
            .await?;
        manager
            .drop_foreign_key(
                ForeignKey::drop()
                    .name("fk_messages_batch_id")
                    .table(Messages::Table)
                    .to_owned(),
            )
            .await?;
        manager
            .drop_table(Table::drop().table(Batches::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Messages::Table).to_owned())
            .await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
enum Messages {
    Table,
    Id,
    Type,
    SourceChain,
    DestinationChain,
    SourceTxHash,
    SourceBlock,
    SourceLogIndex,
    Sender,
    Recipient,
    TokenContract,
    Amount,
    Nonce,
    Timestamp,
    Status,
    Attempts,
    LastError,
    BatchId,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Batches {
    Table,
    BatchId,
    Source,
    Destination,
    State,
    CreatedAt,
    DispatchedAt,
    MessageCount,
    TotalValue,
}

#[derive(DeriveIden)]
enum LockRecords {
    Table,
    Id,
    Chain,
    Contract,
    Sender,
    Token,
    Amount,
    Block,
    Timestamp,
    MatchedMessageId,
}

#[derive(DeriveIden)]
enum ListenerCursors {
    Table,
    Chain,
    LastBlock,
    LastBlockHash,
    UpdatedAt,
}
