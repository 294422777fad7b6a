//! Keys command implementation

use anyhow::{Context, Result};
use pkgdb::prelude::*;

pub fn execute(config: DbConfig, tag: &str) -> Result<()> {
    let tag: Tag = tag.parse()?;
    let db = Database::open(config).context("Failed to open database")?;
    TerminationController::global().install_signal_listener()?;

    let mut keys = db.key_iter(tag)?;
    while keys.advance()? {
        if let Some(key) = keys.key() {
            println!("{}", display_key(tag, key));
        }
    }
    keys.free();
    db.close()?;
    Ok(())
}

/// Text keys print as-is; integers and digests as numbers or hex.
fn display_key(tag: Tag, key: &[u8]) -> String {
    match tag {
        Tag::Packages | Tag::Installtid => match <[u8; 4]>::try_from(key) {
            Ok(raw) => u32::from_be_bytes(raw).to_string(),
            Err(_) => hex(key),
        },
        Tag::Sigmd5 => hex(key),
        _ => match std::str::from_utf8(key) {
            Ok(text) => text.to_string(),
            Err(_) => hex(key),
        },
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_key() {
        assert_eq!(display_key(Tag::Name, b"bash"), "bash");
        assert_eq!(display_key(Tag::Installtid, &7u32.to_be_bytes()), "7");
        assert_eq!(display_key(Tag::Sigmd5, &[0xde, 0xad]), "dead");
        assert_eq!(display_key(Tag::Basenames, &[0xff]), "ff");
    }
}
