//! 制御/強制終了リスナー
//!
//! OSが割り当てるポートで待ち受け、1接続につき1つのコマンドトークンを受け取って
//! デバッガに適用します。メインチャネルの実行スレッドが一時停止プロトコルの
//! 中でブロックしていても、このリスナーは別スレッドで動き続けます。

use crate::{ControlCommand, KeywordDebugger, Result};
use std::io::Read;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// `kill` を受け取ったときにエンジン内で中断を発生させるコールバック
pub type AbortHandle = Arc<dyn Fn() + Send + Sync>;

/// 1接続からコマンドを読み終えるまでの上限
const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// 制御リスナー
pub struct ControlListener {
    addr: SocketAddr,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ControlListener {
    /// `host` のエフェメラルポートで待ち受けを開始する
    pub fn bind(host: &str, debugger: Arc<KeywordDebugger>, on_kill: AbortHandle) -> Result<Self> {
        let listener = TcpListener::bind((host, 0))?;
        let addr = listener.local_addr()?;
        let stop = Arc::new(AtomicBool::new(false));

        let handle = thread::Builder::new()
            .name("relay-control".to_string())
            .spawn({
                let stop = Arc::clone(&stop);
                move || serve(listener, &debugger, &on_kill, &stop)
            })?;

        info!("control listener bound to {}", addr);
        Ok(Self {
            addr,
            stop,
            handle: Some(handle),
        })
    }

    /// 待ち受けポート
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// 待ち受けアドレス
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// リスナースレッドを停止して終了を待つ
    pub fn shutdown(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.stop.store(true, Ordering::SeqCst);
        // accept() を起こすために自分へ接続する
        if let Err(e) = TcpStream::connect_timeout(&self.addr, READ_TIMEOUT) {
            warn!("failed to wake control listener: {}", e);
        }
        if handle.join().is_err() {
            warn!("control listener thread panicked");
        }
        debug!("control listener on {} stopped", self.addr);
    }
}

impl Drop for ControlListener {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn serve(listener: TcpListener, debugger: &KeywordDebugger, on_kill: &AbortHandle, stop: &AtomicBool) {
    for stream in listener.incoming() {
        if stop.load(Ordering::SeqCst) {
            break;
        }
        match stream {
            Ok(stream) => handle_connection(stream, debugger, on_kill),
            Err(e) => warn!("control connection failed: {}", e),
        }
    }
}

fn handle_connection(mut stream: TcpStream, debugger: &KeywordDebugger, on_kill: &AbortHandle) {
    let peer = stream.peer_addr().ok();
    let mut data = String::new();
    let read = stream
        .set_read_timeout(Some(READ_TIMEOUT))
        .and_then(|_| stream.read_to_string(&mut data));
    if let Err(e) = read {
        warn!("failed to read control command from {:?}: {}", peer, e);
        return;
    }

    match ControlCommand::parse(&data) {
        Some(ControlCommand::Kill) => {
            info!("kill requested by {:?}", peer);
            on_kill();
            debugger.kill();
        }
        Some(command) => {
            debug!("control command '{}' from {:?}", command, peer);
            debugger.apply(command);
        }
        None => warn!("ignoring unknown control command '{}'", data.trim()),
    }
}
