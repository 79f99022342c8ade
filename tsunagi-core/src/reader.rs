//! 出力の読み取りとコマンドとの対応付け
//!
//! jdbの出力にはメッセージの区切りもリクエストIDもありません。
//! プロンプトらしき行をコマンド1つ分の出力の終わりとみなし、
//! それまでに溜まった行を最も古い応答待ちリクエストに渡します。

use crate::dispatch::Delivery;
use crate::pending::PendingQueue;
use crate::LogSink;
use regex::Regex;
use std::collections::VecDeque;
use std::io::{self, Read};
use std::sync::mpsc::Sender;
use std::sync::OnceLock;
use tracing::{debug, trace};

/// 一度に読み取るバイト数
const READ_CHUNK_SIZE: usize = 4096;

/// プロンプト境界かどうかを判定する
///
/// 前後の空白を除いた行が `>` で終わるか、`]` で終わりそれより前に `[` を含む
/// （`main[1]` のようなインデックス付きプロンプト）場合に境界とみなします。
///
/// # Examples
/// ```
/// use tsunagi_core::reader::is_prompt_boundary;
///
/// assert!(is_prompt_boundary("main[1] "));
/// assert!(is_prompt_boundary("> "));
/// assert!(!is_prompt_boundary("  [1] com.example.Main.main (Main.java:10)"));
/// ```
pub fn is_prompt_boundary(line: &str) -> bool {
    let trimmed = line.trim();
    if trimmed.ends_with('>') {
        return true;
    }
    match trimmed.strip_suffix(']') {
        Some(head) => head.contains('['),
        None => false,
    }
}

/// 行頭に貼り付いたプロンプト
fn glued_prompt_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    // 例: "main[1] Group system:" / "> VM Started"
    PATTERN.get_or_init(|| {
        Regex::new(r"^(> |[^\s\[\]]+\[\d+\] )(.*\S.*)$").expect("valid prompt pattern")
    })
}

/// プロンプトだけでできた断片
fn bare_prompt_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?:> |[^\s\[\]]+\[\d+\] )+$").expect("valid prompt pattern")
    })
}

/// 改行で終わっていない断片がjdbのプロンプトそのものか
///
/// 読み取りは任意の位置で切れるため、`  [12]` のような行の途中を
/// プロンプトと取り違えないよう、末尾の空白まで含めた形でだけ判定します。
fn is_bare_prompt(tail: &str) -> bool {
    bare_prompt_pattern().is_match(tail)
}

/// 行頭に貼り付いたプロンプトを切り離す
///
/// 読み取りが追いつかずプロンプトの直後に次の出力が続いた行
/// （`main[1] Group system:`）は、プロンプトと残りに分けて返します。
/// `arr[0] = 5` のような代入の形は分けません。
pub fn split_glued_prompts(line: &str) -> Vec<&str> {
    let mut segments = Vec::new();
    let mut rest = line;
    while let Some(caps) = glued_prompt_pattern().captures(rest) {
        let prompt_len = caps[1].len();
        if rest[prompt_len..].trim_start().starts_with('=') {
            break;
        }
        trace!("glued prompt: {:?}", &rest[..prompt_len]);
        segments.push(&rest[..prompt_len]);
        rest = &rest[prompt_len..];
    }
    segments.push(rest);
    segments
}

/// 前回の区切り以降に読んだ行
#[derive(Debug, Default)]
pub struct OutputBuffer {
    lines: Vec<String>,
}

impl OutputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// 中身を捨てる
    pub fn clear(&mut self) {
        self.lines.clear();
    }

    /// 空行とプロンプト行を除いた中身を取り出し、バッファを空にする
    pub fn take_block(&mut self) -> Vec<String> {
        self.lines
            .drain(..)
            .filter(|line| !line.trim().is_empty() && !is_prompt_boundary(line))
            .collect()
    }
}

/// 改行で区切った行を返すイテレータ
///
/// jdbはプロンプトを改行なしで出力します。読み取りが改行で終わらず、
/// 残りの断片がプロンプトそのものである場合は、その断片も1行として返します。
/// 行の中身は加工しません。不正なUTF-8は置換文字に変換します。
pub struct PromptLines<R> {
    inner: R,
    partial: Vec<u8>,
    ready: VecDeque<String>,
    chunk: Box<[u8]>,
    eof: bool,
}

impl<R: Read> PromptLines<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            partial: Vec::new(),
            ready: VecDeque::new(),
            chunk: vec![0; READ_CHUNK_SIZE].into_boxed_slice(),
            eof: false,
        }
    }

    fn split_lines(&mut self) {
        while let Some(pos) = self.partial.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.partial.drain(..=pos).collect();
            let mut line = &raw[..pos];
            if let Some(stripped) = line.strip_suffix(b"\r") {
                line = stripped;
            }
            self.ready
                .push_back(String::from_utf8_lossy(line).into_owned());
        }

        if !self.partial.is_empty() {
            let tail = String::from_utf8_lossy(&self.partial).into_owned();
            if is_bare_prompt(&tail) {
                trace!("unterminated prompt: {:?}", tail);
                self.partial.clear();
                self.ready.push_back(tail);
            }
        }
    }
}

impl<R: Read> Iterator for PromptLines<R> {
    type Item = io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(line) = self.ready.pop_front() {
                return Some(Ok(line));
            }
            if self.eof {
                return None;
            }

            match self.inner.read(&mut self.chunk) {
                Ok(0) => {
                    self.eof = true;
                    if !self.partial.is_empty() {
                        let rest = std::mem::take(&mut self.partial);
                        self.ready
                            .push_back(String::from_utf8_lossy(&rest).into_owned());
                    }
                }
                Ok(n) => {
                    self.partial.extend_from_slice(&self.chunk[..n]);
                    self.split_lines();
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    self.eof = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

/// 出力ブロックを応答待ちリクエストに対応付ける
pub(crate) struct Correlator {
    buffer: OutputBuffer,
    deliveries: Sender<Delivery>,
}

impl Correlator {
    pub(crate) fn new(deliveries: Sender<Delivery>) -> Self {
        Self {
            buffer: OutputBuffer::new(),
            deliveries,
        }
    }

    /// 1行を取り込み、境界であればブロックを配送する
    pub(crate) fn on_line(&mut self, line: &str, pending: &PendingQueue) {
        for segment in split_glued_prompts(line) {
            let boundary = is_prompt_boundary(segment);
            self.buffer.push(segment);
            if boundary {
                self.flush(pending);
            }
        }
    }

    fn flush(&mut self, pending: &PendingQueue) {
        let Some(request) = pending.dequeue_oldest() else {
            // 誰も待っていない出力はバナーなどの雑音
            debug!("discarding {} unsolicited line(s)", self.buffer.len());
            self.buffer.clear();
            return;
        };

        let lines = self.buffer.take_block();
        debug!(
            "delivering {} line(s) for {:?}",
            lines.len(),
            request.command()
        );
        if self.deliveries.send(Delivery { request, lines }).is_err() {
            debug!("dispatcher is gone, result dropped");
        }
    }
}

/// 出力が終わるまで読み続ける
///
/// すべての行は対応付けの状態に関係なく、読んだままの形でログシンクにも渡されます。
/// シンクに届いた時点で、その行の対応付けは済んでいます。
pub(crate) fn read_loop<R: Read>(
    output: R,
    pending: &PendingQueue,
    sink: &LogSink,
    deliveries: Sender<Delivery>,
) -> io::Result<()> {
    let mut correlator = Correlator::new(deliveries);
    for line in PromptLines::new(output) {
        let line = line?;
        correlator.on_line(&line, pending);
        sink(&line);
    }
    Ok(())
}
