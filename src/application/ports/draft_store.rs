use crate::domain::entities::{DraftAction, DraftIdMappingEntry, QueueOperation};
use crate::domain::value_objects::{DraftActionId, DraftTag};
use crate::shared::error::AppError;
use async_trait::async_trait;

/// ドラフトアクションの永続化
#[async_trait]
pub trait DraftStore: Send + Sync {
    /// `tag + id` をキーに上書き保存
    async fn write_action(&self, action: DraftAction) -> Result<(), AppError>;

    /// 全アクションを ID 順で返す
    async fn get_all_drafts(&self) -> Result<Vec<DraftAction>, AppError>;

    async fn delete_draft(&self, id: &DraftActionId) -> Result<(), AppError>;

    async fn delete_by_tag(&self, tag: &DraftTag) -> Result<(), AppError>;

    /// 追加・削除・更新とID対応をまとめて不可分に適用
    async fn complete_action(
        &self,
        operations: Vec<QueueOperation>,
        mapping: Option<DraftIdMappingEntry>,
    ) -> Result<(), AppError>;
}
