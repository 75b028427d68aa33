use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Notifications::Table)
                    .if_not_exists()
                    .col(pk_uuid(Notifications::Id))
                    .col(uuid(Notifications::CorrelationId))
                    .col(
                        ColumnDef::new(Notifications::Kind)
                            .string_len(64)
                            .not_null(),
                    )
                    .col(string_len_null(Notifications::RecipientEmail, 255))
                    .col(string_len_null(Notifications::RecipientPhone, 32))
                    .col(string_len_null(Notifications::ReplyTo, 255))
                    .col(json_binary(Notifications::Payload))
                    // absent | pending | claimed | done
                    .col(
                        ColumnDef::new(Notifications::EmailState)
                            .string_len(16)
                            .not_null()
                            .default("absent"),
                    )
                    .col(timestamp_with_time_zone_null(Notifications::EmailClaimedAt))
                    .col(timestamp_with_time_zone_null(Notifications::EmailCompletedAt))
                    .col(
                        ColumnDef::new(Notifications::SmsState)
                            .string_len(16)
                            .not_null()
                            .default("absent"),
                    )
                    .col(timestamp_with_time_zone_null(Notifications::SmsClaimedAt))
                    .col(timestamp_with_time_zone_null(Notifications::SmsCompletedAt))
                    .col(boolean(Notifications::Deleted).default(false))
                    .col(
                        timestamp_with_time_zone(Notifications::CreatedAt)
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Claim selection scans non-deleted rows in creation order
        manager
            .create_index(
                Index::create()
                    .name("idx_notifications_deleted_created_at")
                    .table(Notifications::Table)
                    .col(Notifications::Deleted)
                    .col(Notifications::CreatedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_notifications_correlation_id")
                    .table(Notifications::Table)
                    .col(Notifications::CorrelationId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Notifications::Table).to_owned())
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
enum Notifications {
    Table,
    Id,
    CorrelationId,
    Kind,
    RecipientEmail,
    RecipientPhone,
    ReplyTo,
    Payload,
    EmailState,
    EmailClaimedAt,
    EmailCompletedAt,
    SmsState,
    SmsClaimedAt,
    SmsCompletedAt,
    Deleted,
    CreatedAt,
}
