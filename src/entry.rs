//! Quiz entry URL and the admin's share link.

use crate::error::{Error, Result};
use log::{debug, warn};
use std::io::Write;
use std::process::{Command, Stdio};

pub const ADMIN_UID_PARAM: &str = "adminUid";
pub const DEFAULT_ENTRY_PATH: &str = "index.html";

/// Reads `adminUid` from the query string of `url`. Missing and empty values
/// both mean "no admin".
pub fn admin_uid_from_url(url: &str) -> Option<String> {
    let query = url.split_once('?')?.1;
    let query = query.split('#').next().unwrap_or_default();
    query
        .split('&')
        .filter_map(|pair| pair.split_once('=').or(Some((pair, ""))))
        .find(|(name, _)| percent_decode(name) == ADMIN_UID_PARAM)
        .map(|(_, value)| percent_decode(value))
        .filter(|value| !value.trim().is_empty())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareLink {
    origin: String,
    entry_path: String,
}

impl ShareLink {
    pub fn new(origin: &str, entry_path: &str) -> Self {
        ShareLink {
            origin: origin.trim_end_matches('/').to_string(),
            entry_path: entry_path.trim_start_matches('/').to_string(),
        }
    }

    /// `<origin>/<entry-path>?adminUid=<uid>`
    pub fn for_admin(&self, uid: &str) -> String {
        format!(
            "{}/{}?{}={}",
            self.origin,
            self.entry_path,
            ADMIN_UID_PARAM,
            percent_encode(uid)
        )
    }
}

fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
                match hex.and_then(|hex| u8::from_str_radix(hex, 16).ok()) {
                    Some(byte) => {
                        out.push(byte);
                        i += 2;
                    }
                    None => out.push(b'%'),
                }
            }
            byte => out.push(byte),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn percent_encode(input: &str) -> String {
    input
        .bytes()
        .map(|byte| match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                (byte as char).to_string()
            }
            other => format!("%{:02X}", other),
        })
        .collect()
}

/// Hands `text` to the first clipboard tool that accepts it.
pub fn copy_to_clipboard(text: &str) -> Result<()> {
    let tools: [(&str, &[&str]); 4] = [
        ("pbcopy", &[]),
        ("wl-copy", &[]),
        ("xclip", &["-selection", "clipboard"]),
        ("xsel", &["--clipboard", "--input"]),
    ];
    for (tool, args) in tools {
        let child = Command::new(tool)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();
        let mut child = match child {
            Ok(child) => child,
            Err(_) => continue,
        };
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(text.as_bytes())?;
        }
        if child.wait()?.success() {
            debug!("[Admin] Copied link with {}", tool);
            return Ok(());
        }
        warn!("[Admin] {} refused the clipboard contents", tool);
    }
    Err(Error::Io(std::io::Error::new(
        std::io::ErrorKind::NotFound,
        "no clipboard tool available",
    )))
}
