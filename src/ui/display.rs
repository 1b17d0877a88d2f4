//! Console messages.

use std::path::Path;

use bytesize::ByteSize;
use console::style;
use strongbox::types::Processing;

pub fn show_success(processing: Processing, path: &Path) {
    let size = path.metadata().ok().filter(|meta| meta.is_file()).map(|meta| format!(" ({})", ByteSize::b(meta.len()))).unwrap_or_default();

    println!();
    println!("{} {}", style("✓").green(), style(format!("Successfully {}: {}{size}", processing.done_label(), path.display())).bold());
}
