//! 結果コールバックの配送スレッド
//!
//! 読み取りスレッドは呼び出し側のコードを実行せず、対応付けた結果を
//! チャネルに流すだけです。コールバックはこのスレッドで順番に実行されます。

use crate::pending::PendingRequest;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::Receiver;
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

/// 配送待ちの結果
pub(crate) struct Delivery {
    pub(crate) request: PendingRequest,
    pub(crate) lines: Vec<String>,
}

/// 配送スレッドを起動する
///
/// 送信側がすべて破棄されるとスレッドは終了します。
pub(crate) fn spawn(deliveries: Receiver<Delivery>) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("jdb-dispatch".to_string())
        .spawn(move || run(deliveries))
}

fn run(deliveries: Receiver<Delivery>) {
    for Delivery { request, lines } in deliveries {
        let command = request.command().to_string();
        // コールバックのパニックで配送を止めない
        if panic::catch_unwind(AssertUnwindSafe(|| request.complete(lines))).is_err() {
            warn!("result callback for {:?} panicked", command);
        }
    }
    debug!("dispatcher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pending::PendingQueue;
    use std::sync::mpsc;

    #[test]
    fn test_panicking_callback_does_not_stop_dispatch() {
        let pending = PendingQueue::new();
        let (result_tx, result_rx) = mpsc::channel();
        pending.enqueue("where", Box::new(|_| panic!("boom")));
        pending.enqueue(
            "locals",
            Box::new(move |lines| result_tx.send(lines).unwrap()),
        );

        let (tx, rx) = mpsc::channel();
        let handle = spawn(rx).unwrap();
        while let Some(request) = pending.dequeue_oldest() {
            tx.send(Delivery {
                request,
                lines: vec!["i = 1".to_string()],
            })
            .unwrap();
        }
        drop(tx);
        handle.join().unwrap();

        assert_eq!(result_rx.recv().unwrap(), vec!["i = 1"]);
    }
}
