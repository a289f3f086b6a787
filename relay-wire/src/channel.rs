//! 行区切りの双方向チャネル
//!
//! 送信は1つの書き込みロックで保護され、メッセージの途中で他の送信が
//! 割り込むことはありません。送信のたびに明示的にフラッシュします。

use crate::{codec, Message, PeerKind, Result, WireError};
use parking_lot::Mutex;
use std::io::{BufRead, BufReader, BufWriter, ErrorKind, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::Duration;
use tracing::{debug, trace};

/// 受信側の状態
struct Inbound {
    reader: BufReader<TcpStream>,
    /// タイムアウトをまたいで保持する、まだ改行が来ていない部分行
    pending: Vec<u8>,
}

/// メインチャネル
pub struct Channel {
    outbound: Mutex<Option<BufWriter<TcpStream>>>,
    inbound: Mutex<Option<Inbound>>,
    stream: TcpStream,
    peer: Option<SocketAddr>,
}

impl Channel {
    /// 接続済みのソケットからチャネルを作成する
    pub fn new(stream: TcpStream) -> Result<Self> {
        stream.set_nodelay(true)?;
        let reader = BufReader::new(stream.try_clone()?);
        let writer = BufWriter::new(stream.try_clone()?);
        let peer = stream.peer_addr().ok();

        Ok(Self {
            outbound: Mutex::new(Some(writer)),
            inbound: Mutex::new(Some(Inbound {
                reader,
                pending: Vec::new(),
            })),
            stream,
            peer,
        })
    }

    /// 接続先のアドレス
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// チャネルが開いているかどうか
    pub fn is_open(&self) -> bool {
        self.outbound.lock().is_some()
    }

    /// メッセージを1行送信してフラッシュする
    ///
    /// 閉じたチャネルへの送信は何もしません。
    pub fn send(&self, message: &Message) -> Result<()> {
        let bytes = codec::encode(message)?;

        let mut outbound = self.outbound.lock();
        let Some(writer) = outbound.as_mut() else {
            trace!("channel closed, dropping '{}'", message.kind());
            return Ok(());
        };

        writer.write_all(&bytes)?;
        writer.flush()?;
        trace!("-> {}", String::from_utf8_lossy(&bytes).trim_end());
        Ok(())
    }

    /// メッセージを1つ受信する（ブロッキング）
    pub fn receive(&self) -> Result<Message> {
        loop {
            if let Some(message) = self.receive_within(None)? {
                return Ok(message);
            }
        }
    }

    /// タイムアウト付きでメッセージを1つ受信する
    ///
    /// タイムアウトした場合は `Ok(None)` を返します。途中まで読んだ行は
    /// 破棄せず、次の呼び出しで続きから読みます。
    /// `timeout` が `None` の場合は行が揃うまでブロックします。
    pub fn receive_within(&self, timeout: Option<Duration>) -> Result<Option<Message>> {
        let mut inbound = self.inbound.lock();
        let Inbound { reader, pending } = inbound.as_mut().ok_or(WireError::Closed)?;

        // ゼロ時間のタイムアウトはソケットに設定できない
        let timeout = timeout.map(|t| t.max(Duration::from_millis(1)));
        reader.get_ref().set_read_timeout(timeout)?;

        match reader.read_until(b'\n', pending) {
            Ok(0) if pending.is_empty() => Err(WireError::Closed),
            Ok(_) if !pending.ends_with(b"\n") => {
                // 改行の前にEOFに達した
                let partial = std::mem::take(pending);
                Err(WireError::Malformed(format!(
                    "connection closed in the middle of a message ({} bytes)",
                    partial.len()
                )))
            }
            Ok(_) => {
                let line = std::mem::take(pending);
                trace!("<- {}", String::from_utf8_lossy(&line).trim_end());
                codec::decode(&line).map(Some)
            }
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                ) =>
            {
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// 期待する種別のメッセージが来るまで受信を続ける
    ///
    /// それ以外の種別のメッセージは読み捨てます。
    pub fn wait_for(&self, expected: &[PeerKind]) -> Result<Message> {
        loop {
            let message = self.receive()?;
            match message.peer_kind() {
                Some(kind) if expected.contains(&kind) => return Ok(message),
                _ => debug!(
                    "ignoring '{}' while waiting for {:?}",
                    message.kind(),
                    expected
                ),
            }
        }
    }

    /// チャネルを閉じる
    ///
    /// 先にソケットをシャットダウンするため、別スレッドでブロック中の受信も
    /// エラーで戻ります。
    pub fn close(&self) {
        let _ = self.stream.shutdown(Shutdown::Both);
        if let Some(mut writer) = self.outbound.lock().take() {
            let _ = writer.flush();
        }
        self.inbound.lock().take();
        debug!("channel to {:?} closed", self.peer);
    }
}
