/// 既定（サーバー確定データ）のセグメント
pub const DEFAULT_SEGMENT: &str = "DEFAULT";
/// ドラフトアクションを保存するセグメント
pub const DRAFT_SEGMENT: &str = "DRAFT";
/// ドラフトIDと確定IDの対応を保存するセグメント
pub const DRAFT_ID_MAPPINGS_SEGMENT: &str = "DRAFT_ID_MAPPINGS";

pub const DRAFT_ACTION_KEY_JUNCTION: &str = "__DraftAction__";
pub const DRAFT_ID_MAPPING_KEY_PREFIX: &str = "DraftIdMapping::";
pub const DRAFT_ID_MAPPING_KEY_JUNCTION: &str = "::";

pub const RECORD_KEY_PREFIX: &str = "UiApi::RecordRepresentation:";
pub const FIELD_KEY_JUNCTION: &str = "__fields__";

/// ローカルで採番した未作成エンティティIDの接頭辞
pub const DRAFT_ID_PREFIX: &str = "DRAFT-";
