use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Photos::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Photos::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Photos::GroupId).uuid().not_null())
                    .col(ColumnDef::new(Photos::UploaderId).uuid().not_null())
                    .col(ColumnDef::new(Photos::MeetingId).uuid())
                    .col(
                        ColumnDef::new(Photos::ContentHash)
                            .char_len(64)
                            .not_null(),
                    )
                    .col(ColumnDef::new(Photos::OriginalPath).string().not_null())
                    .col(ColumnDef::new(Photos::ThumbPath).string())
                    .col(ColumnDef::new(Photos::Mime).string().not_null())
                    .col(ColumnDef::new(Photos::SizeBytes).big_integer().not_null())
                    .col(ColumnDef::new(Photos::Width).integer())
                    .col(ColumnDef::new(Photos::Height).integer())
                    .col(ColumnDef::new(Photos::ShotAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(Photos::GpsLat).double())
                    .col(ColumnDef::new(Photos::GpsLon).double())
                    .col(ColumnDef::new(Photos::CameraMake).string())
                    .col(ColumnDef::new(Photos::CameraModel).string())
                    .col(
                        ColumnDef::new(Photos::Processed)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(Photos::ProcessingError).text())
                    .col(
                        ColumnDef::new(Photos::UploadedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Photos::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_photos_group_id")
                            .from(Photos::Table, Photos::GroupId)
                            .to(Groups::Table, Groups::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_photos_uploader_id")
                            .from(Photos::Table, Photos::UploaderId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_photos_meeting_id")
                            .from(Photos::Table, Photos::MeetingId)
                            .to(Meetings::Table, Meetings::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("uq_photos_group_content_hash")
                    .table(Photos::Table)
                    .col(Photos::GroupId)
                    .col(Photos::ContentHash)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_photos_group_shot_at")
                    .table(Photos::Table)
                    .col(Photos::GroupId)
                    .col(Photos::ShotAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_photos_meeting_id")
                    .table(Photos::Table)
                    .col(Photos::MeetingId)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Photos::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Photos {
    Table,
    Id,
    GroupId,
    UploaderId,
    MeetingId,
    ContentHash,
    OriginalPath,
    ThumbPath,
    Mime,
    SizeBytes,
    Width,
    Height,
    ShotAt,
    GpsLat,
    GpsLon,
    CameraMake,
    CameraModel,
    Processed,
    ProcessingError,
    UploadedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Groups {
    Table,
    Id,
}

#[derive(DeriveIden)]
enum Users {
    Table,
    Id,
}

#[derive(DeriveIden)]
enum Meetings {
    Table,
    Id,
}
