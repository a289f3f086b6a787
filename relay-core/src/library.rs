//! ライブラリインポートのプロキシ
//!
//! エンジンのライブラリ解決を包み、次のことを行います。
//!
//! - `(名前, 引数列)` をキーにした結果のキャッシュ（インポートの副作用はキーごとに1回）
//! - ワーカースレッドでの解決とタイムアウト（時間切れのスレッドは切り離して結果を捨てる）
//! - 失敗時のフォールバック（スタブ → プレースホルダ）
//! - キーワードのソース位置の報告（キーワードオブジェクトごとに1回）

use crate::LibraryError;
use parking_lot::Mutex;
use regex::Regex;
use relay_wire::{EventKind, Message};
use serde::Serialize;
use serde_json::json;
use std::any::Any;
use std::collections::HashMap;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// キーワードの宣言位置
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeywordSource {
    pub file_path: String,
    pub line: u32,
    pub column_offset: u32,
    pub length: u32,
}

/// ライブラリが公開するキーワード
pub trait Keyword: Send + Sync {
    fn name(&self) -> &str;

    /// 宣言位置（分からなければ `None`）
    fn source(&self) -> Option<KeywordSource>;
}

/// 解決済みのライブラリ
pub trait Library: Send + Sync {
    fn name(&self) -> &str;
    fn keywords(&self) -> Vec<Arc<dyn Keyword>>;
}

/// エンジンのライブラリ解決機能
pub trait LibraryResolver: Send + Sync + 'static {
    /// ライブラリを解決してインスタンス化する
    fn import_library(&self, name: &str, args: &[String]) -> Result<Arc<dyn Library>, LibraryError>;

    /// キーワードを持たないスタブを作成する
    fn library_stub(&self, name: &str, args: &[String]) -> Result<Arc<dyn Library>, LibraryError>;

    /// キーワードの宣言位置を調べる
    fn keyword_source(&self, keyword: &dyn Keyword) -> Option<KeywordSource> {
        keyword.source()
    }
}

/// ピアへのイベント送信先
pub trait EventSink: Send + Sync {
    fn send_event(&self, message: &Message);
}

impl EventSink for crate::Session {
    fn send_event(&self, message: &Message) {
        self.emit(message);
    }
}

/// 最後のフォールバック（キーワードを持たない）
#[derive(Debug, Clone)]
pub struct PlaceholderLibrary {
    name: String,
}

impl PlaceholderLibrary {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Library for PlaceholderLibrary {
    fn name(&self) -> &str {
        &self.name
    }

    fn keywords(&self) -> Vec<Arc<dyn Keyword>> {
        Vec::new()
    }
}

/// 解決結果
#[derive(Clone)]
pub struct Resolution {
    pub library: Arc<dyn Library>,
    pub errors: Vec<LibraryError>,
}

type CacheKey = (String, Vec<String>);

/// `keyword_source` イベントのペイロード
#[derive(Serialize)]
struct DiscoveredKeyword<'a> {
    name: &'a str,
    owning_library_name: &'a str,
    #[serde(flatten)]
    source: &'a KeywordSource,
}

/// ライブラリインポートのプロキシ
pub struct LibraryImportProxy<R: LibraryResolver> {
    inner: Arc<R>,
    timeout: Duration,
    sink: Option<Arc<dyn EventSink>>,
    /// キーごとの解決スロット（解決中のキーもここに入る）
    cache: Mutex<HashMap<CacheKey, Arc<OnceLock<Resolution>>>>,
    /// 報告済みのキーワード（アドレスを再利用させないよう `Arc` を保持する）
    discovered: Mutex<HashMap<usize, Arc<dyn Keyword>>>,
}

impl<R: LibraryResolver> LibraryImportProxy<R> {
    /// プロキシを作成する
    pub fn new(inner: Arc<R>, timeout: Duration) -> Self {
        Self {
            inner,
            timeout,
            sink: None,
            cache: Mutex::new(HashMap::new()),
            discovered: Mutex::new(HashMap::new()),
        }
    }

    /// エラーとキーワード位置の送信先を設定する
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// 包んでいるリゾルバ
    pub fn inner(&self) -> &Arc<R> {
        &self.inner
    }

    /// キャッシュされているライブラリの数
    pub fn cached(&self) -> usize {
        self.cache
            .lock()
            .values()
            .filter(|slot| slot.get().is_some())
            .count()
    }

    /// ライブラリを解決する
    ///
    /// 同じ `(name, args)` に対しては、最初の解決結果を返し続けます。
    /// 解決に失敗してもフォールバックのインスタンスを返します。
    pub fn resolve(&self, name: &str, args: &[String]) -> Resolution {
        let key = (name.to_string(), args.to_vec());

        // マップのロックはスロットを取り出す間だけ持つ。同じキーの解決は
        // スロットで1回に絞られ、別のキーや入れ子のインポートは待たされない
        let slot = Arc::clone(self.cache.lock().entry(key).or_default());

        let mut resolved_here = false;
        let resolution = slot
            .get_or_init(|| {
                resolved_here = true;
                self.resolve_uncached(name, args)
            })
            .clone();
        if !resolved_here {
            debug!("library '{}' {:?} served from cache", name, args);
            return resolution;
        }

        for error in &resolution.errors {
            self.emit(&Message::event(
                EventKind::Message,
                vec![json!({"level": "ERROR", "message": error.to_string()})],
            ));
        }
        self.report_keywords(resolution.library.as_ref());
        resolution
    }

    fn resolve_uncached(&self, name: &str, args: &[String]) -> Resolution {
        let mut errors = Vec::new();
        let library = match self.import_with_timeout(name, args) {
            Ok(library) => library,
            Err(e) => {
                warn!("{}", e);
                errors.push(e);
                self.fallback(name, args, &mut errors)
            }
        };
        Resolution { library, errors }
    }

    fn import_with_timeout(&self, name: &str, args: &[String]) -> Result<Arc<dyn Library>, LibraryError> {
        let (tx, rx) = mpsc::channel();
        let inner = Arc::clone(&self.inner);
        let (lib_name, lib_args) = (name.to_string(), args.to_vec());

        let spawned = thread::Builder::new()
            .name(format!("relay-import-{}", name))
            .spawn(move || {
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    inner.import_library(&lib_name, &lib_args)
                }));
                // 受信側がタイムアウトで去っていても構わない
                let _ = tx.send(result);
            });
        if let Err(e) = spawned {
            return Err(LibraryError::Import {
                name: name.to_string(),
                message: format!("failed to spawn import worker: {}", e),
            });
        }

        match rx.recv_timeout(self.timeout) {
            Ok(Ok(result)) => result,
            Ok(Err(panic)) => Err(LibraryError::Panicked {
                name: name.to_string(),
                message: panic_message(panic.as_ref()),
            }),
            Err(RecvTimeoutError::Timeout) => {
                // ワーカーは切り離す。完了しても結果は捨てられる
                Err(LibraryError::Timeout {
                    name: name.to_string(),
                    timeout: self.timeout,
                })
            }
            Err(RecvTimeoutError::Disconnected) => Err(LibraryError::Import {
                name: name.to_string(),
                message: "import worker exited without a result".to_string(),
            }),
        }
    }

    fn fallback(&self, name: &str, args: &[String], errors: &mut Vec<LibraryError>) -> Arc<dyn Library> {
        match self.inner.library_stub(name, args) {
            Ok(stub) => {
                info!("library '{}' replaced by a stub", name);
                stub
            }
            Err(e) => {
                warn!("{}", e);
                errors.push(e);
                Arc::new(PlaceholderLibrary::new(name))
            }
        }
    }

    fn report_keywords(&self, library: &dyn Library) {
        for keyword in library.keywords() {
            let identity = Arc::as_ptr(&keyword) as *const () as usize;
            {
                let mut discovered = self.discovered.lock();
                if discovered.contains_key(&identity) {
                    continue;
                }
                discovered.insert(identity, Arc::clone(&keyword));
            }

            if let Some(source) = self.inner.keyword_source(keyword.as_ref()) {
                let payload = DiscoveredKeyword {
                    name: keyword.name(),
                    owning_library_name: library.name(),
                    source: &source,
                };
                match serde_json::to_value(&payload) {
                    Ok(value) => self.emit(&Message::event(EventKind::KeywordSource, vec![value])),
                    Err(e) => warn!("failed to encode source of '{}': {}", keyword.name(), e),
                }
            }
        }
    }

    fn emit(&self, message: &Message) {
        if let Some(sink) = &self.sink {
            sink.send_event(message);
        }
    }
}

impl<R: LibraryResolver> LibraryResolver for LibraryImportProxy<R> {
    fn import_library(&self, name: &str, args: &[String]) -> Result<Arc<dyn Library>, LibraryError> {
        Ok(self.resolve(name, args).library)
    }

    fn library_stub(&self, name: &str, args: &[String]) -> Result<Arc<dyn Library>, LibraryError> {
        self.inner.library_stub(name, args)
    }

    fn keyword_source(&self, keyword: &dyn Keyword) -> Option<KeywordSource> {
        self.inner.keyword_source(keyword)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// `jar:` / `file:` URL 形式のライブラリソースをファイルパスにする
///
/// # Examples
/// ```
/// use relay_core::library::normalize_source;
///
/// assert_eq!(normalize_source("jar:file:/x/lib.jar!/Lib.class").as_deref(), Some("/x/lib.jar"));
/// assert_eq!(normalize_source("/plain/path.py"), None);
/// ```
pub fn normalize_source(source: &str) -> Option<String> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    let pattern = PATTERN
        .get_or_init(|| Regex::new(r"file:(?://)?(/[^!]*)").ok())
        .as_ref()?;
    let captures = pattern.captures(source)?;
    captures.get(1).map(|m| m.as_str().to_string())
}
