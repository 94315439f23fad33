//! `portico origin`: show how a locator resolves against a document.

use crate::ui;
use anyhow::Context;
use portico_wire::origin::{origin_for_sending, DocumentLocation};
use portico_wire::resolve_origin;

pub fn cmd_origin(src: Option<&str>, location: &str) -> anyhow::Result<()> {
    let document = DocumentLocation::parse(location)
        .with_context(|| format!("'{location}' is not an absolute URL with a host"))?;
    let origin = resolve_origin(src, &document);

    ui::section("Origin");
    ui::kv("Document", &document.origin());
    ui::kv("Locator", src.unwrap_or("(none)"));
    ui::kv_ok("Origin", &origin);
    let target = origin_for_sending(&origin);
    if target != origin {
        ui::kv_warn("Send to", target);
        ui::hint("opaque origins cannot be targeted; messages go to any origin");
    }
    Ok(())
}
