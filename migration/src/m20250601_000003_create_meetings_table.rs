use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Meetings::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Meetings::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Meetings::GroupId).uuid().not_null())
                    .col(ColumnDef::new(Meetings::Title).string().not_null())
                    .col(ColumnDef::new(Meetings::StartTime).timestamp_with_time_zone())
                    .col(ColumnDef::new(Meetings::EndTime).timestamp_with_time_zone())
                    .col(ColumnDef::new(Meetings::MeetingDate).date())
                    .col(
                        ColumnDef::new(Meetings::PhotoCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(Meetings::Track).json())
                    .col(ColumnDef::new(Meetings::BboxNorth).double())
                    .col(ColumnDef::new(Meetings::BboxSouth).double())
                    .col(ColumnDef::new(Meetings::BboxEast).double())
                    .col(ColumnDef::new(Meetings::BboxWest).double())
                    .col(
                        ColumnDef::new(Meetings::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Meetings::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_meetings_group_id")
                            .from(Meetings::Table, Meetings::GroupId)
                            .to(Groups::Table, Groups::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_meetings_group_start")
                    .table(Meetings::Table)
                    .col(Meetings::GroupId)
                    .col(Meetings::StartTime)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Meetings::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Meetings {
    Table,
    Id,
    GroupId,
    Title,
    StartTime,
    EndTime,
    MeetingDate,
    PhotoCount,
    Track,
    BboxNorth,
    BboxSouth,
    BboxEast,
    BboxWest,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Groups {
    Table,
    Id,
}
