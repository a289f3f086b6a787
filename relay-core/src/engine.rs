//! 実行エンジンとの境界

use relay_vars::FrameStack;
use serde_json::{Map, Value};

/// コールバックに渡される属性（スイート・テスト・キーワードの情報）
pub type Attributes = Map<String, Value>;

/// エージェントが必要とする実行エンジンの機能
///
/// 制御リスナーのスレッドからも `request_abort` が呼ばれるため、
/// 実装はスレッド間で共有できなければなりません。
pub trait Engine: Send + Sync + 'static {
    /// エンジンの名前とバージョン（`version` メッセージに載せる）
    fn name_and_version(&self) -> String;

    /// 実行中の変数フレームスタックに対して `f` を実行する
    fn with_variables(&self, f: &mut dyn FnMut(&mut FrameStack));

    /// キーワードを実行して成否を返す
    ///
    /// ブレークポイント条件の評価に使います。実行自体に失敗した場合は
    /// エラーメッセージを返します。
    fn run_keyword_and_return_status(
        &self,
        name: &str,
        args: &[String],
    ) -> std::result::Result<bool, String>;

    /// 実行中のテストを中断させる
    fn request_abort(&self);

    /// このログレベルのメッセージが記録されるかどうか
    fn is_logged(&self, level: &str) -> bool {
        let _ = level;
        true
    }
}

/// エンジンから呼ばれるライフサイクルコールバック
///
/// コールバックはエラーを返しません。エージェント側の失敗はエンジンの実行に
/// 影響させず、エージェント内で処理します。
pub trait ExecutionListener {
    fn start_suite(&mut self, name: &str, attrs: &Attributes);
    fn end_suite(&mut self, name: &str, attrs: &Attributes);
    fn start_test(&mut self, name: &str, attrs: &Attributes);
    fn end_test(&mut self, name: &str, attrs: &Attributes);
    fn start_keyword(&mut self, name: &str, attrs: &Attributes);
    fn end_keyword(&mut self, name: &str, attrs: &Attributes);
    fn message(&mut self, message: &Attributes);
    fn log_message(&mut self, message: &Attributes);
    fn library_import(&mut self, name: &str, attrs: &Attributes);
    fn resource_import(&mut self, name: &str, attrs: &Attributes);
    fn log_file(&mut self, path: &str);
    fn output_file(&mut self, path: &str);
    fn report_file(&mut self, path: &str);
    fn close(&mut self);
}
