//! デバッガプロセスとの1回分のセッション

use crate::errors::BridgeError;
use crate::pending::{PendingQueue, ResultCallback};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};
use tsunagi_target::DebuggerProcess;

/// セッションのライフサイクル
///
/// `Disconnected → Connecting → Ready → Terminated` の順にだけ進みます。
/// `Terminated` から `Ready` に戻ることはなく、再接続には新しいセッションを使います。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// セッションがまだない
    Disconnected,
    /// プロセスを起動中
    Connecting,
    /// コマンドを受け付けられる
    Ready,
    /// 終了済み
    Terminated,
}

impl SessionState {
    /// 新しい接続を拒むべき状態か
    pub fn is_live(self) -> bool {
        matches!(self, SessionState::Connecting | SessionState::Ready)
    }
}

/// ブリッジが所有する1つのデバッガプロセスとの関係
///
/// 読み取りスレッドと呼び出し側スレッドの間で `Arc` 越しに共有されます。
pub(crate) struct Session {
    state: Mutex<SessionState>,
    process: OnceLock<DebuggerProcess>,
    pub(crate) pending: PendingQueue,
    stop_grace: Duration,
    /// `shutdown` が起動した回収スレッド
    reaper: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    /// `Connecting` 状態のセッションを作成する
    pub(crate) fn new(stop_grace: Duration) -> Self {
        Self {
            state: Mutex::new(SessionState::Connecting),
            process: OnceLock::new(),
            pending: PendingQueue::new(),
            stop_grace,
            reaper: Mutex::new(None),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn state(&self) -> SessionState {
        *self.lock_state()
    }

    pub(crate) fn pid(&self) -> Option<u32> {
        self.process.get().map(DebuggerProcess::pid)
    }

    /// 起動したプロセスを結び付けて `Ready` にする
    ///
    /// 起動中に `stop()` された場合は `false` を返し、プロセスはdropで終了します。
    pub(crate) fn attach(&self, process: DebuggerProcess) -> bool {
        let mut state = self.lock_state();
        if *state != SessionState::Connecting {
            return false;
        }
        if self.process.set(process).is_err() {
            return false;
        }
        *state = SessionState::Ready;
        true
    }

    /// `Terminated` に遷移する。既に終了済みなら `false`
    fn mark_terminated(&self) -> bool {
        let mut state = self.lock_state();
        if *state == SessionState::Terminated {
            return false;
        }
        *state = SessionState::Terminated;
        true
    }

    fn ready_process(&self) -> Result<&DebuggerProcess, BridgeError> {
        match self.state() {
            SessionState::Ready => {}
            SessionState::Terminated => return Err(BridgeError::SessionTerminated),
            _ => return Err(BridgeError::NotConnected),
        }
        let process = self.process.get().ok_or(BridgeError::NotConnected)?;
        if !process.is_alive() {
            return Err(BridgeError::NotConnected);
        }
        Ok(process)
    }

    /// 状態が `Ready` で、プロセスが生存し、入力が開いているか
    pub(crate) fn is_ready(&self) -> bool {
        self.ready_process()
            .map(|process| process.input().is_open())
            .unwrap_or(false)
    }

    /// コマンドを1行書き込む
    pub(crate) fn send(&self, command: &str) -> Result<(), BridgeError> {
        let process = self.ready_process()?;
        let mut input = process.input();
        if !input.is_open() {
            return Err(BridgeError::NotConnected);
        }
        input.write_line(command)?;
        Ok(())
    }

    /// コールバックを登録してからコマンドを書き込む
    ///
    /// 登録と書き込みは入力のロックを保持したまま行うため、
    /// キューの順序と実際に送られた順序は常に一致します。
    pub(crate) fn request(&self, command: &str, callback: ResultCallback) -> Result<(), BridgeError> {
        let process = self.ready_process()?;
        let mut input = process.input();
        if !input.is_open() {
            return Err(BridgeError::NotConnected);
        }
        let seq = self
            .pending
            .enqueue(command, callback)
            .ok_or(BridgeError::SessionTerminated)?;
        if let Err(e) = input.write_line(command) {
            self.pending.cancel(seq);
            return Err(e.into());
        }
        debug!("{} request(s) awaiting output", self.pending.len());
        Ok(())
    }

    /// 終了コマンドを送り、入力を閉じる
    ///
    /// 猶予を待っての強制終了と回収は別スレッドで行い、呼び出し側は待たせません。
    /// 既に終了済みなら `None`、そうでなければ破棄した応答待ちの件数を返します。
    pub(crate) fn shutdown(self: &Arc<Self>, exit_command: &str) -> Option<usize> {
        if !self.mark_terminated() {
            return None;
        }
        if let Some(process) = self.process.get() {
            if let Err(e) = process.write_line(exit_command) {
                debug!("could not send {:?}: {}", exit_command, e);
            }
            process.close_input();

            let session = Arc::clone(self);
            let spawned = thread::Builder::new()
                .name("jdb-reaper".to_string())
                .spawn(move || {
                    if let Some(process) = session.process.get() {
                        session.reap(process);
                    }
                });
            match spawned {
                Ok(handle) => {
                    *self.reaper.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
                }
                Err(e) => {
                    debug!("reaper thread unavailable: {}", e);
                    self.reap(process);
                }
            }
        }
        Some(self.pending.close())
    }

    /// `shutdown` が始めた回収の完了を待つ
    pub(crate) fn wait_reaped(&self) {
        let handle = self
            .reaper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("debugger reaper panicked");
            }
        }
    }

    /// 出力の終端や起動失敗でセッションを終える
    ///
    /// `shutdown` と同じく、既に終了済みなら `None` を返します。
    pub(crate) fn abort(&self) -> Option<usize> {
        if !self.mark_terminated() {
            return None;
        }
        if let Some(process) = self.process.get() {
            self.reap(process);
        }
        Some(self.pending.close())
    }

    fn reap(&self, process: &DebuggerProcess) {
        process.close_input();
        if let Some(status) = process.wait_timeout(self.stop_grace) {
            debug!("debugger {} exited: {}", process.pid(), status);
            return;
        }
        match process.terminate() {
            Ok(status) => debug!("debugger {} killed: {}", process.pid(), status),
            Err(e) => warn!("failed to terminate debugger {}: {}", process.pid(), e),
        }
    }
}
