//! Persistence of finalized streams.
//!
//! Conversations land under `<out>/conversations/` keyed by stream ident
//! and first-packet timestamp, in a raw and an ANSI-colored variant.
//! Service banners (the first bytes the server wrote) land under
//! `<out>/banners/` keyed by ident.

use std::fs;
use std::io;
use std::path::PathBuf;

use super::reader::StreamReader;

const CONVERSATIONS_DIR: &str = "conversations";
const BANNERS_DIR: &str = "banners";

pub struct StreamSaver {
    conversations: PathBuf,
    banners: PathBuf,
    banner_size: usize,
}

impl StreamSaver {
    pub fn new(out_dir: &std::path::Path, banner_size: usize) -> io::Result<Self> {
        let conversations = out_dir.join(CONVERSATIONS_DIR);
        let banners = out_dir.join(BANNERS_DIR);
        fs::create_dir_all(&conversations)?;
        fs::create_dir_all(&banners)?;
        Ok(Self {
            conversations,
            banners,
            banner_size,
        })
    }

    /// Persist the full exchange of a closed connection, raw and colored.
    /// Marks the reader saved.
    pub fn save_conversation(&self, reader: &StreamReader) -> io::Result<()> {
        let stem = format!(
            "{}-{}",
            sanitize(reader.ident()),
            reader.first_packet()
        );
        fs::write(
            self.conversations.join(format!("{stem}.bin")),
            reader.conversation_raw(),
        )?;
        fs::write(
            self.conversations.join(format!("{stem}.colored.bin")),
            reader.conversation_colored(),
        )?;
        reader.mark_saved();
        Ok(())
    }

    /// Persist the first `banner_size` bytes the server wrote toward the
    /// client. Marks the reader saved.
    pub fn save_banner(&self, reader: &StreamReader) -> io::Result<()> {
        let mut banner = reader.data();
        banner.truncate(self.banner_size);
        fs::write(
            self.banners.join(format!("{}.bin", sanitize(reader.ident()))),
            banner,
        )?;
        reader.mark_saved();
        Ok(())
    }
}

/// Stream idents contain `:` and `->`; only the path separator needs
/// replacing.
fn sanitize(ident: &str) -> String {
    ident.replace(['/', '\\'], "_")
}
