// 応答待ち
// SPDX-License-Identifier: MPL-2.0
//
//! `LineReader` の上に構築されたポーリングユーティリティ。完了条件が満たさ
//! れるかタイムアウトするまでブロックする。呼び出すのは非読込系 (reads-input
//! = false) の状態行からのみで、ティック駆動の読込系状態行からは使わない
//! (そちらは `LineReader::try_read_line` で1行ずつ進む)。
use crate::line_reader::LineReader;
use std::thread;
use std::time::Duration;

/// 待ち受け完了条件。
pub enum WaitUntil<'a> {
    /// ちょうど `lines` 行読めたら成功。
    LineCount(u32),
    /// いずれかの行にこの部分文字列が含まれたら成功。
    Terminator(&'a str),
    /// 既定動作: `OK` が出たら成功、`FAIL ER` が出たら失敗。
    OkOrFail,
}

pub struct ResponseWaiterConfig {
    pub delay_ms: u64,
    pub timeout_ms: u64,
}

impl Default for ResponseWaiterConfig {
    fn default() -> Self {
        ResponseWaiterConfig {
            delay_ms: 100,
            timeout_ms: 5_000,
        }
    }
}

/// 完了結果。
#[derive(Debug, Clone, Default)]
pub struct WaitOutcome {
    pub success: bool,
    pub transcript: Vec<String>,
}

/// `until` が満たされるか `config.timeout_ms` が経過するまでブロックする。
/// `timeout_ms == 0` は無制限を意味する。
pub fn wait_for(
    reader: &mut LineReader,
    until: WaitUntil,
    config: &ResponseWaiterConfig,
    collect_transcript: bool,
) -> std::io::Result<WaitOutcome> {
    let mut elapsed_ms: u64 = 0;
    let mut transcript = Vec::new();
    let mut line_count: u32 = 0;

    loop {
        while let Some(line) = reader.try_read_line()? {
            if collect_transcript {
                transcript.push(line.clone());
            }
            line_count += 1;

            if let WaitUntil::LineCount(target) = until {
                if line_count >= target {
                    return Ok(WaitOutcome {
                        success: true,
                        transcript,
                    });
                }
                continue;
            }

            if let WaitUntil::Terminator(needle) = until {
                if line.contains(needle) {
                    return Ok(WaitOutcome {
                        success: true,
                        transcript,
                    });
                }
                continue;
            }

            // WaitUntil::OkOrFail
            if line.contains("FAIL ER") {
                reader.discard(config.delay_ms)?;
                return Ok(WaitOutcome {
                    success: false,
                    transcript,
                });
            }
            if line.contains("OK") {
                return Ok(WaitOutcome {
                    success: true,
                    transcript,
                });
            }
        }

        if config.timeout_ms != 0 && elapsed_ms >= config.timeout_ms {
            return Ok(WaitOutcome {
                success: false,
                transcript,
            });
        }
        thread::sleep(Duration::from_millis(config.delay_ms));
        elapsed_ms += config.delay_ms;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::serial::FakeSerialPort;

    #[test]
    fn succeeds_on_bare_ok() {
        let mut port = FakeSerialPort::new();
        port.push_line("OK");
        let mut reader = LineReader::new(&mut port);
        let outcome = wait_for(
            &mut reader,
            WaitUntil::OkOrFail,
            &ResponseWaiterConfig {
                delay_ms: 0,
                timeout_ms: 50,
            },
            true,
        )
        .unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.transcript, vec!["OK".to_string()]);
    }

    #[test]
    fn fails_on_fail_er_and_drains() {
        let mut port = FakeSerialPort::new();
        port.push_line("FAIL ER04");
        let mut reader = LineReader::new(&mut port);
        let outcome = wait_for(
            &mut reader,
            WaitUntil::OkOrFail,
            &ResponseWaiterConfig {
                delay_ms: 0,
                timeout_ms: 50,
            },
            true,
        )
        .unwrap();
        assert!(!outcome.success);
    }

    #[test]
    fn line_count_checked_before_terminator() {
        // ともに満たされる場合は行数優先で先に完了する。
        let mut port = FakeSerialPort::new();
        port.push_line("marker line 1");
        let mut reader = LineReader::new(&mut port);
        let outcome = wait_for(
            &mut reader,
            WaitUntil::LineCount(1),
            &ResponseWaiterConfig {
                delay_ms: 0,
                timeout_ms: 50,
            },
            true,
        )
        .unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.transcript.len(), 1);
    }

    #[test]
    fn terminator_match_succeeds() {
        let mut port = FakeSerialPort::new();
        port.push_line("EVENT 20 FE80:0000:0000:0000:0000:0000:0000:0000");
        let mut reader = LineReader::new(&mut port);
        let outcome = wait_for(
            &mut reader,
            WaitUntil::Terminator("EVENT"),
            &ResponseWaiterConfig {
                delay_ms: 0,
                timeout_ms: 50,
            },
            false,
        )
        .unwrap();
        assert!(outcome.success);
        assert!(outcome.transcript.is_empty());
    }

    #[test]
    fn times_out_when_nothing_arrives() {
        let mut port = FakeSerialPort::new();
        let mut reader = LineReader::new(&mut port);
        let outcome = wait_for(
            &mut reader,
            WaitUntil::OkOrFail,
            &ResponseWaiterConfig {
                delay_ms: 1,
                timeout_ms: 3,
            },
            true,
        )
        .unwrap();
        assert!(!outcome.success);
    }
}
