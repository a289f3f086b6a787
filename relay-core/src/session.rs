//! セッションの確立とメインチャネル
//!
//! 接続はリトライ付きで行い、接続後はピアが動作モードを決め、
//! プロトコルバージョンの確認と開始の同期をしてから制御をエンジンに返します。

use crate::{AgentConfig, AgentError, Result};
use relay_wire::{Channel, EventKind, Message, PeerKind, WireError};
use serde::Deserialize;
use serde_json::json;
use std::net::TcpStream;
use std::thread;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// エージェントのプロトコルバージョン
pub const PROTOCOL_VERSION: u32 = 2;

/// 動作モード
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatingMode {
    /// イベントの転送のみ（一時停止の問い合わせは間引く）
    Run,
    /// すべての一時停止ポイントで問い合わせる
    Debug,
}

impl OperatingMode {
    /// モード名をパースする（大文字小文字は区別しない）
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "run" => Some(OperatingMode::Run),
            "debug" => Some(OperatingMode::Debug),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OperatingMode::Run => "run",
            OperatingMode::Debug => "debug",
        }
    }
}

#[derive(Deserialize)]
struct OperatingModePayload {
    mode: String,
    #[serde(default)]
    wait_for_start_allowance: bool,
}

#[derive(Deserialize)]
struct ProtocolVersionPayload {
    is_correct: bool,
    #[serde(default)]
    error: String,
}

/// 接続済みのピアとのセッション
pub struct Session {
    channel: Channel,
    mode: OperatingMode,
}

impl Session {
    /// 接続してハンドシェイクを行う
    pub fn establish(config: &AgentConfig, engine_version: &str) -> Result<Self> {
        let stream = connect(config)?;
        let channel = Channel::new(stream)?;
        Self::handshake(channel, engine_version)
    }

    /// 接続済みのチャネルでハンドシェイクを行う
    ///
    /// 失敗した場合、チャネルは閉じられます。
    pub fn handshake(channel: Channel, engine_version: &str) -> Result<Self> {
        match negotiate(&channel, engine_version) {
            Ok(mode) => {
                info!("session with {:?} established in {} mode", channel.peer_addr(), mode.as_str());
                Ok(Self { channel, mode })
            }
            Err(e) => {
                channel.close();
                Err(e)
            }
        }
    }

    /// ピアが指定した動作モード
    pub fn mode(&self) -> OperatingMode {
        self.mode
    }

    /// メインチャネル
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// チャネルが開いているかどうか
    pub fn is_open(&self) -> bool {
        self.channel.is_open()
    }

    /// メッセージを送信する
    ///
    /// 送信に失敗した場合はセッションを閉じ、`false` を返します。
    pub fn emit(&self, message: &Message) -> bool {
        if !self.channel.is_open() {
            return false;
        }
        match self.channel.send(message) {
            Ok(()) => true,
            Err(e) => {
                self.fail(&e);
                false
            }
        }
    }

    /// セッションにとって致命的なエラーを処理する
    ///
    /// チャネルを閉じ、ローカルの標準エラーに1行だけ書き出します。
    /// エンジンの実行は続けます。
    pub fn fail(&self, err: &WireError) {
        if !self.channel.is_open() {
            return;
        }
        error!("session failed: {}", err);
        print_error(&format!("Agent connection lost: {}", err));
        self.channel.close();
    }

    /// セッションを閉じる
    pub fn close(&self) {
        self.channel.close();
    }
}

/// ピアに接続する
///
/// 失敗するたびに `retry_interval` 待って再試行し、`connect_timeout` を過ぎたら諦めます。
pub fn connect(config: &AgentConfig) -> Result<TcpStream> {
    let address = config.address();
    let start = Instant::now();
    let mut trial = 1;

    loop {
        match TcpStream::connect((config.host.as_str(), config.port)) {
            Ok(stream) => {
                debug!("connected to {} on trial #{}", address, trial);
                return Ok(stream);
            }
            Err(e) => warn!("connection trial #{} failed: unable to open socket to {}: {}", trial, address, e),
        }

        let remaining = config.connect_timeout.saturating_sub(start.elapsed());
        if remaining.is_zero() {
            return Err(AgentError::ConnectTimeout {
                address,
                timeout: config.connect_timeout,
            });
        }
        thread::sleep(config.retry_interval.min(remaining));
        trial += 1;
    }
}

fn negotiate(channel: &Channel, engine_version: &str) -> Result<OperatingMode> {
    channel.send(&Message::bare(EventKind::AgentInitializing))?;

    let message = channel.wait_for(&[PeerKind::OperatingMode])?;
    let payload: OperatingModePayload = serde_json::from_value(message.into_payload())
        .map_err(|e| AgentError::Handshake(format!("operating_mode: {}", e)))?;
    let mode = OperatingMode::parse(&payload.mode)
        .ok_or_else(|| AgentError::Handshake(format!("unknown operating mode '{}'", payload.mode)))?;

    channel.send(&Message::event(EventKind::Version, vec![version_info(engine_version)]))?;

    let message = channel.wait_for(&[PeerKind::ProtocolVersion])?;
    let ack: ProtocolVersionPayload = serde_json::from_value(message.into_payload())
        .map_err(|e| AgentError::Handshake(format!("protocol_version: {}", e)))?;
    if !ack.is_correct {
        print_error(&format!(
            "{}\nClosing connection. Please use the agent matching the controller you're using",
            ack.error
        ));
        return Err(AgentError::ProtocolMismatch(ack.error));
    }

    if payload.wait_for_start_allowance {
        channel.send(&Message::bare(EventKind::ReadyToStart))?;
        channel.wait_for(&[PeerKind::DoStart])?;
        debug!("start allowed by peer");
    }
    Ok(mode)
}

fn version_info(engine_version: &str) -> serde_json::Value {
    let cmd_line: Vec<String> = std::env::args().collect();
    json!({
        "cmd_line": cmd_line.join(" "),
        "engine": engine_version,
        "agent": format!("relay {}", env!("CARGO_PKG_VERSION")),
        "os": std::env::consts::OS,
        "pid": std::process::id(),
        "protocol": PROTOCOL_VERSION,
    })
}

/// ローカルの標準エラーにエラーを書き出す
pub(crate) fn print_error(message: &str) {
    eprintln!("[ ERROR ] {}", message);
}
