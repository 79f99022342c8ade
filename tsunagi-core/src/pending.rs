//! 応答待ちリクエストのキュー

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// 結果を受け取るコールバック
pub type ResultCallback = Box<dyn FnOnce(Vec<String>) + Send + 'static>;

/// 送信済みで結果を待っているリクエスト
///
/// 対応付けはキュー内の位置だけで行います。`seq` は書き込みに失敗した
/// リクエストを取り消すためだけに使います。
pub struct PendingRequest {
    seq: u64,
    command: String,
    callback: ResultCallback,
}

impl PendingRequest {
    /// 送信したコマンド
    pub fn command(&self) -> &str {
        &self.command
    }

    /// コールバックを呼び出してリクエストを消費する
    pub fn complete(self, lines: Vec<String>) {
        (self.callback)(lines)
    }
}

impl fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingRequest")
            .field("seq", &self.seq)
            .field("command", &self.command)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct QueueState {
    entries: VecDeque<PendingRequest>,
    next_seq: u64,
    closed: bool,
}

/// 投入順に結果を配送するスレッドセーフなFIFO
#[derive(Default)]
pub struct PendingQueue {
    state: Mutex<QueueState>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 末尾に追加する
    ///
    /// キューが閉じられている場合は追加せずに `None` を返します。
    pub fn enqueue(&self, command: impl Into<String>, callback: ResultCallback) -> Option<u64> {
        let mut state = self.lock();
        if state.closed {
            return None;
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        state.entries.push_back(PendingRequest {
            seq,
            command: command.into(),
            callback,
        });
        Some(seq)
    }

    /// 最も古いリクエストを取り出す
    pub fn dequeue_oldest(&self) -> Option<PendingRequest> {
        self.lock().entries.pop_front()
    }

    /// まだ配送されていないリクエストを取り消す
    pub fn cancel(&self, seq: u64) -> bool {
        let mut state = self.lock();
        match state.entries.iter().position(|p| p.seq == seq) {
            Some(pos) => state.entries.remove(pos).is_some(),
            None => false,
        }
    }

    /// キューを閉じ、残っていたリクエストをコールバックを呼ばずに破棄する
    ///
    /// 破棄した件数を返します。
    pub fn close(&self) -> usize {
        let dropped = {
            let mut state = self.lock();
            state.closed = true;
            std::mem::take(&mut state.entries)
        };
        // コールバックのdropはロックの外で行う
        dropped.len()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{mpsc, Arc};
    use std::thread;

    fn noop() -> ResultCallback {
        Box::new(|_| {})
    }

    #[test]
    fn test_fifo_order() {
        let queue = PendingQueue::new();
        queue.enqueue("threads", noop());
        queue.enqueue("where", noop());
        queue.enqueue("locals", noop());

        let order: Vec<String> = std::iter::from_fn(|| queue.dequeue_oldest())
            .map(|p| p.command().to_string())
            .collect();
        assert_eq!(order, vec!["threads", "where", "locals"]);
        assert!(queue.dequeue_oldest().is_none());
    }

    #[test]
    fn test_complete_invokes_callback() {
        let queue = PendingQueue::new();
        let (tx, rx) = mpsc::channel();
        queue.enqueue(
            "locals",
            Box::new(move |lines| {
                tx.send(lines).unwrap();
            }),
        );
        queue
            .dequeue_oldest()
            .unwrap()
            .complete(vec!["i = 10".to_string()]);
        assert_eq!(rx.recv().unwrap(), vec!["i = 10"]);
    }

    #[test]
    fn test_cancel_removes_only_target() {
        let queue = PendingQueue::new();
        let first = queue.enqueue("a", noop()).unwrap();
        let second = queue.enqueue("b", noop()).unwrap();
        assert!(queue.cancel(second));
        assert!(!queue.cancel(second));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.dequeue_oldest().unwrap().command(), "a");
        assert!(!queue.cancel(first));
    }

    #[test]
    fn test_close_drops_without_invoking() {
        let queue = PendingQueue::new();
        let (tx, rx) = mpsc::channel::<()>();
        for _ in 0..3 {
            let tx = tx.clone();
            queue.enqueue("where", Box::new(move |_| tx.send(()).unwrap()));
        }
        drop(tx);

        assert_eq!(queue.close(), 3);
        assert!(queue.is_empty());
        assert!(queue.enqueue("threads", noop()).is_none());
        // すべての送信側がコールバックごと破棄されている
        assert!(rx.recv().is_err());
    }

    #[test]
    fn test_concurrent_enqueue() {
        let queue = Arc::new(PendingQueue::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for i in 0..100 {
                        queue.enqueue(format!("{}-{}", t, i), noop());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(queue.len(), 800);

        // 各スレッド内の投入順は保たれる
        let mut last = vec![-1i32; 8];
        while let Some(p) = queue.dequeue_oldest() {
            let (t, i) = p.command().split_once('-').unwrap();
            let (t, i): (usize, i32) = (t.parse().unwrap(), i.parse().unwrap());
            assert!(i > last[t]);
            last[t] = i;
        }
    }
}
