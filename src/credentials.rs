// ルートB認証情報
// SPDX-License-Identifier: MPL-2.0
//
use std::fmt;
use std::str::FromStr;

/// ルートB ID。32文字固定長のASCII文字列。
#[derive(Clone, PartialEq, Eq)]
pub struct RouteBId([u8; 32]);

impl FromStr for RouteBId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !s.is_ascii() {
            return Err("IDはASCII文字列でなければなりません".to_string());
        }
        s.as_bytes()
            .try_into()
            .map(RouteBId)
            .map_err(|_| "IDは32文字固定長です".to_string())
    }
}

impl fmt::Display for RouteBId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Debug for RouteBId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "RouteBId(\"{}\")", self)
    }
}

/// ルートB パスワード。12文字固定長のASCII文字列。
#[derive(Clone, PartialEq, Eq)]
pub struct RouteBPassword([u8; 12]);

impl FromStr for RouteBPassword {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !s.is_ascii() {
            return Err("PASSWORDはASCII文字列でなければなりません".to_string());
        }
        s.as_bytes()
            .try_into()
            .map(RouteBPassword)
            .map_err(|_| "PASSWORDは12文字固定長です".to_string())
    }
}

impl fmt::Display for RouteBPassword {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Debug for RouteBPassword {
    fn fmt(&self, _f: &mut fmt::Formatter) -> fmt::Result {
        write!(_f, "RouteBPassword(***)")
    }
}

/// 認証情報。一度構築したら変更されない。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub id: RouteBId,
    pub password: RouteBPassword,
}

impl Credentials {
    pub fn new(id: &str, password: &str) -> Result<Self, String> {
        Ok(Credentials {
            id: RouteBId::from_str(id)?,
            password: RouteBPassword::from_str(password)?,
        })
    }
}
