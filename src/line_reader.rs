// 行単位の読み込み
// SPDX-License-Identifier: MPL-2.0
//
//! `SerialPort` の上に一枚重なる、行単位の読み込み層。このレイヤーより上では
//! バイトではなく「1行」を単位としてやり取りする。
use crate::serial::SerialPort;
use std::thread;
use std::time::Duration;

pub struct LineReader<'a> {
    port: &'a mut dyn SerialPort,
}

impl<'a> LineReader<'a> {
    pub fn new(port: &'a mut dyn SerialPort) -> Self {
        LineReader { port }
    }

    /// 改行が来るまで(タイムアウトするまで)ブロックして1行読む。
    pub fn read_line_blocking(&mut self) -> std::io::Result<String> {
        self.port.read_line_until_lf()
    }

    /// 行が読める状態なら1行返す。データがなければ `Ok(None)`。
    /// `reads-input=true` な状態行が「行が無ければ発火しない」ことを実現するために使う。
    pub fn try_read_line(&mut self) -> std::io::Result<Option<String>> {
        if self.port.available()? == 0 {
            return Ok(None);
        }
        match self.port.read_line_until_lf() {
            Ok(line) => Ok(Some(line)),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// 短い遅延の後、読めるだけのバイトを捨てる。パースは一切行わない。
    /// `FAIL ER…` の後に続く説明文の残骸を掃除するために使う。
    pub fn discard(&mut self, delay_ms: u64) -> std::io::Result<()> {
        thread::sleep(Duration::from_millis(delay_ms));
        while self.port.available()? > 0 {
            if self.port.read_byte()?.is_none() {
                break;
            }
        }
        Ok(())
    }
}
