//! デバッガプロセス制御機能

use crate::Result;
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::{pipe2, Pid};
use std::ffi::{OsStr, OsString};
use std::fs::File;
use std::io::{self, Write};
use std::os::unix::process::CommandExt;
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

/// 終了待ちのポーリング間隔
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// 子プロセスとして起動したデバッガ
///
/// 標準入力はミューテックスで保護され、複数スレッドからのコマンドが
/// 行の途中で混ざることはありません。
/// 標準出力と標準エラー出力は一本のパイプにまとめられ、
/// [`DebuggerProcess::spawn`] が読み取り側を返します。
pub struct DebuggerProcess {
    pid: u32,
    child: Mutex<Child>,
    input: Mutex<Option<ChildStdin>>,
}

/// 標準入力のロックを保持したまま書き込むためのガード
pub struct InputGuard<'a> {
    stdin: MutexGuard<'a, Option<ChildStdin>>,
}

impl InputGuard<'_> {
    /// 入力ストリームが開いているか
    pub fn is_open(&self) -> bool {
        self.stdin.is_some()
    }

    /// 1行書き込んでフラッシュする
    pub fn write_line(&mut self, text: &str) -> io::Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "debugger input is closed"))?;
        let mut line = String::with_capacity(text.len() + 1);
        line.push_str(text);
        line.push('\n');
        stdin.write_all(line.as_bytes())?;
        stdin.flush()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl DebuggerProcess {
    /// デバッガを起動する
    ///
    /// 子プロセスは独立したプロセスグループで起動されるため、
    /// ラッパースクリプト経由で起動された場合でも [`terminate`](Self::terminate)
    /// でまとめて終了できます。
    pub fn spawn<S: AsRef<OsStr>>(program: S, args: &[OsString]) -> Result<(Self, File)> {
        let program = program.as_ref();

        // stdoutとstderrで同じ書き込み端を共有する
        let (read_end, write_end) = pipe2(OFlag::O_CLOEXEC)?;
        let stderr_end = write_end.try_clone()?;

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::from(write_end))
            .stderr(Stdio::from(stderr_end))
            .process_group(0);

        let mut child = command
            .spawn()
            .map_err(|e| anyhow::anyhow!("Failed to spawn {:?}: {}", program, e))?;

        // 親側の書き込み端を閉じないとEOFが届かない
        drop(command);

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow::anyhow!("Debugger stdin is not piped"))?;
        let pid = child.id();
        debug!("spawned debugger {:?} with pid {}", program, pid);

        Ok((
            Self {
                pid,
                child: Mutex::new(child),
                input: Mutex::new(Some(stdin)),
            },
            File::from(read_end),
        ))
    }

    /// プロセスIDを取得する
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// プロセスが生存しているか
    pub fn is_alive(&self) -> bool {
        matches!(lock(&self.child).try_wait(), Ok(None))
    }

    /// 標準入力のロックを取得する
    pub fn input(&self) -> InputGuard<'_> {
        InputGuard {
            stdin: lock(&self.input),
        }
    }

    /// 1行書き込む
    pub fn write_line(&self, text: &str) -> io::Result<()> {
        self.input().write_line(text)
    }

    /// 標準入力を閉じる
    ///
    /// 既に閉じている場合は何もしません。
    pub fn close_input(&self) {
        lock(&self.input).take();
    }

    /// 最大 `grace` だけ自発的な終了を待つ
    pub fn wait_timeout(&self, grace: Duration) -> Option<ExitStatus> {
        let deadline = Instant::now() + grace;
        loop {
            match lock(&self.child).try_wait() {
                Ok(Some(status)) => return Some(status),
                Ok(None) => {}
                Err(_) => return None,
            }
            if Instant::now() >= deadline {
                return None;
            }
            thread::sleep(WAIT_POLL_INTERVAL);
        }
    }

    /// プロセスグループごと強制終了して回収する
    ///
    /// 既に終了済みであれば、シグナルは送らずに終了ステータスを返します。
    pub fn terminate(&self) -> Result<ExitStatus> {
        let mut child = lock(&self.child);
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }

        let pgid = Pid::from_raw(self.pid as i32);
        match killpg(pgid, Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => {
                debug!("killpg({}) failed: {}, falling back to kill", self.pid, e);
                child.kill()?;
            }
        }

        Ok(child.wait()?)
    }
}

impl Drop for DebuggerProcess {
    fn drop(&mut self) {
        let _ = self.terminate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader};

    fn sh(script: &str) -> (DebuggerProcess, File) {
        let args = vec![OsString::from("-c"), OsString::from(script)];
        DebuggerProcess::spawn("sh", &args).unwrap()
    }

    #[test]
    fn test_stdout_and_stderr_are_merged() {
        let (process, output) = sh("echo out; echo err 1>&2");
        let lines: Vec<String> = BufReader::new(output).lines().map(|l| l.unwrap()).collect();
        assert_eq!(lines, vec!["out", "err"]);
        assert!(process.terminate().unwrap().success());
    }

    #[test]
    fn test_write_line_reaches_child() {
        let (process, output) = sh("read line; echo \"got $line\"");
        process.write_line("threads").unwrap();
        let mut reader = BufReader::new(output);
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        assert_eq!(line, "got threads\n");
    }

    #[test]
    fn test_terminate_kills_running_process() {
        let (process, _output) = sh("sleep 30");
        assert!(process.is_alive());
        let status = process.terminate().unwrap();
        assert!(!status.success());
        assert!(!process.is_alive());
        // 2回目は回収済みのステータスを返すだけ
        assert_eq!(process.terminate().unwrap(), status);
    }

    #[test]
    fn test_closed_input_rejects_writes() {
        let (process, _output) = sh("sleep 30");
        process.close_input();
        assert!(!process.input().is_open());
        let err = process.write_line("cont").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn test_spawn_missing_program_fails() {
        assert!(DebuggerProcess::spawn("/nonexistent/jdb", &[]).is_err());
    }
}
