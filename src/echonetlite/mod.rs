// ECHONET Lite フレーミング
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
//! ECHONET Liteフレームのバイト列表現とその符号化/復号のみを扱う。
//! プロパティの意味論(EPCごとの値の解釈)はここでは扱わない。
pub mod edata;
pub mod frame;

pub use edata::EchonetliteEdata;
pub use frame::EchonetliteFrame;
