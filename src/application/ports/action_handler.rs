use crate::domain::entities::{DraftAction, DraftIdMappingEntry, FetchResponse, QueueOperation};
use crate::domain::value_objects::DraftHandlerId;
use crate::shared::error::AppError;
use async_trait::async_trait;

/// 完了したアクションをキューから取り除くための計画
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletionPlan {
    pub operations: Vec<QueueOperation>,
    pub mapping: Option<DraftIdMappingEntry>,
}

/// 組み込みのアクション実行戦略
#[async_trait]
pub trait ActionHandler: Send + Sync {
    fn handler_id(&self) -> DraftHandlerId;

    async fn execute(&self, action: &DraftAction) -> Result<FetchResponse, AppError>;

    /// 完了アクションの削除と、残りのアクションへの書き換えを組み立てる
    fn completion_plan(
        &self,
        action: &DraftAction,
        remaining: &[DraftAction],
    ) -> Result<CompletionPlan, AppError>;

    /// キューから取り除いた後にサーバー結果を取り込む
    async fn handle_action_completed(
        &self,
        action: &DraftAction,
        plan: &CompletionPlan,
    ) -> Result<(), AppError>;
}

/// 利用者が登録する独自アクションの実行戦略
#[async_trait]
pub trait CustomActionExecutor: Send + Sync {
    async fn execute(&self, action: &DraftAction) -> Result<FetchResponse, AppError>;
}
