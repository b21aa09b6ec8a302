use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Overlays::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Overlays::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Overlays::Type).string().not_null())
                    .col(ColumnDef::new(Overlays::Content).text().not_null())
                    .col(
                        ColumnDef::new(Overlays::PositionX)
                            .double()
                            .not_null()
                            .default(0.0),
                    )
                    .col(
                        ColumnDef::new(Overlays::PositionY)
                            .double()
                            .not_null()
                            .default(0.0),
                    )
                    .col(
                        ColumnDef::new(Overlays::Width)
                            .double()
                            .not_null()
                            .default(200.0),
                    )
                    .col(
                        ColumnDef::new(Overlays::Height)
                            .double()
                            .not_null()
                            .default(100.0),
                    )
                    .col(
                        ColumnDef::new(Overlays::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Overlays::UpdatedAt)
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
                    .if_not_exists()
                    .name("idx_overlays_created_at")
                    .table(Overlays::Table)
                    .col(Overlays::CreatedAt)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Overlays::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Overlays {
    Table,
    Id,
    Type,
    Content,
    PositionX,
    PositionY,
    Width,
    Height,
    CreatedAt,
    UpdatedAt,
}
